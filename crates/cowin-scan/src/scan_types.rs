use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use slot_store::StoreError;
use validator::Validate;

/// Date format used by the CoWin API, both in query parameters and in responses.
pub const COWIN_DATE_FORMAT: &str = "%d-%m-%Y";

/// Request structure for a slot search, as collected from the command line
#[derive(Debug, Clone, Default, Validate)]
pub struct SearchRequest {
    /// Six digit area pincode; takes precedence over state and district
    #[validate(custom(function = "validate_pincode"))]
    pub pincode: Option<String>,

    /// Name of the state the district belongs to
    #[validate(length(min = 1, message = "State name is required"))]
    pub state: Option<String>,

    /// Name of the district to search in
    #[validate(length(min = 1, message = "District name is required"))]
    pub district: Option<String>,

    /// Age of the person looking for a slot
    #[validate(range(min = 1, message = "Age group must be positive"))]
    pub age_group: u32,

    /// Vaccine name, restricted to the known vaccines
    #[validate(custom(function = "validate_vaccine"))]
    pub vaccine: Option<String>,

    /// Dose number
    #[validate(range(min = 1, max = 2, message = "Dose must be 1 or 2"))]
    pub dose: Option<u8>,

    /// Fee filter
    pub fee_mode: Option<FeeMode>,
}

impl SearchRequest {
    /// Validate the request and convert it into typed search criteria.
    pub fn into_criteria(self) -> Result<SearchCriteria, ScanError> {
        self.validate()
            .map_err(|e| ScanError::InvalidArgument(e.to_string()))?;

        let location = match (self.pincode, self.state, self.district) {
            (Some(pincode), _, _) => Location::Pincode(pincode.trim().to_string()),
            (None, Some(state), Some(district)) => Location::District {
                state: state.trim().to_string(),
                district: district.trim().to_string(),
            },
            _ => {
                return Err(ScanError::InvalidArgument(
                    "Either a pincode or both state and district need to be passed".to_string(),
                ));
            }
        };

        let vaccine = self
            .vaccine
            .as_deref()
            .map(str::parse::<Vaccine>)
            .transpose()?;
        let dose = self.dose.map(Dose::try_from).transpose()?;

        Ok(SearchCriteria {
            location,
            age_group: self.age_group,
            vaccine,
            dose,
            fee_mode: self.fee_mode,
        })
    }
}

/// Validated filters for one slot search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Where to search
    pub location: Location,
    /// Only sessions with a minimum age limit at or below this age are kept
    pub age_group: u32,
    /// Only sessions for this vaccine are kept
    pub vaccine: Option<Vaccine>,
    /// Capacity is measured for this dose instead of the total
    pub dose: Option<Dose>,
    /// Only free or only paid centers are kept
    pub fee_mode: Option<FeeMode>,
}

/// Area a search covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Location {
    /// Search by postal pincode
    Pincode(String),
    /// Search by district name within a state
    District {
        /// State name
        state: String,
        /// District name
        district: String,
    },
}

impl Location {
    /// Labelled parts of the location, in display order.
    pub fn area_fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            Location::Pincode(pincode) => vec![("Pincode", pincode.as_str())],
            Location::District { state, district } => {
                vec![("District", district.as_str()), ("State", state.as_str())]
            }
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Pincode(pincode) => write!(f, "pincode {}", pincode),
            Location::District { state, district } => write!(f, "{}, {}", district, state),
        }
    }
}

/// Vaccines the notifier knows how to filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Vaccine {
    /// COVISHIELD
    #[serde(rename = "COVISHIELD")]
    Covishield,
    /// COVAXIN
    #[serde(rename = "COVAXIN")]
    Covaxin,
    /// SPUTNIK V
    #[serde(rename = "SPUTNIK V")]
    SputnikV,
}

impl Vaccine {
    /// Every accepted vaccine.
    pub const ALL: [Vaccine; 3] = [Vaccine::Covishield, Vaccine::Covaxin, Vaccine::SputnikV];

    /// Name as the CoWin API spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Vaccine::Covishield => "COVISHIELD",
            Vaccine::Covaxin => "COVAXIN",
            Vaccine::SputnikV => "SPUTNIK V",
        }
    }

    /// Whether a vaccine name from an API response refers to this vaccine.
    pub fn matches(&self, name: &str) -> bool {
        squash(name) == squash(self.as_str())
    }
}

fn squash(name: &str) -> String {
    name.split_whitespace()
        .collect::<String>()
        .to_uppercase()
}

impl fmt::Display for Vaccine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vaccine {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Vaccine::ALL
            .into_iter()
            .find(|vaccine| vaccine.matches(s))
            .ok_or_else(|| ScanError::InvalidArgument(format!("Unknown vaccine '{}'", s)))
    }
}

/// Dose number a search is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Dose {
    /// First dose
    First,
    /// Second dose
    Second,
}

impl From<Dose> for u8 {
    fn from(dose: Dose) -> u8 {
        match dose {
            Dose::First => 1,
            Dose::Second => 2,
        }
    }
}

impl TryFrom<u8> for Dose {
    type Error = ScanError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Dose::First),
            2 => Ok(Dose::Second),
            other => Err(ScanError::InvalidArgument(format!(
                "Dose must be 1 or 2, got {}",
                other
            ))),
        }
    }
}

/// Whether a center charges for vaccination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeeMode {
    /// Free of charge
    Free,
    /// Paid
    Paid,
}

impl FeeMode {
    /// Fee filter selected by the `--free` / `--paid` flags; both or neither means no filter.
    pub fn from_flags(free: bool, paid: bool) -> Option<FeeMode> {
        match (free, paid) {
            (true, false) => Some(FeeMode::Free),
            (false, true) => Some(FeeMode::Paid),
            _ => None,
        }
    }

    /// Name as the CoWin API spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeMode::Free => "Free",
            FeeMode::Paid => "Paid",
        }
    }

    /// Whether a fee type from an API response matches this mode.
    pub fn matches(&self, fee_type: &str) -> bool {
        fee_type.trim().eq_ignore_ascii_case(self.as_str())
    }
}

impl fmt::Display for FeeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one independent diff stream in the snapshot store.
///
/// Two searches that could return different results always have different keys, and
/// every date of a multi-day scan gets its own key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QueryKey {
    /// Date the sessions are for
    pub date: NaiveDate,
    /// Pincode searched, if any
    pub pincode: Option<String>,
    /// State searched, if any
    pub state: Option<String>,
    /// District searched, if any
    pub district: Option<String>,
    /// Age group filter
    pub age_group: u32,
    /// Vaccine filter
    pub vaccine: Option<Vaccine>,
    /// Dose filter
    pub dose: Option<Dose>,
    /// Fee filter
    pub fee_mode: Option<FeeMode>,
}

impl QueryKey {
    /// Build the key for `criteria` on `date`.
    pub fn new(date: NaiveDate, criteria: &SearchCriteria) -> Self {
        let (pincode, state, district) = match &criteria.location {
            Location::Pincode(pincode) => (Some(pincode.trim().to_string()), None, None),
            Location::District { state, district } => {
                (None, Some(normalize_name(state)), Some(normalize_name(district)))
            }
        };

        Self {
            date,
            pincode,
            state,
            district,
            age_group: criteria.age_group,
            vaccine: criteria.vaccine,
            dose: criteria.dose,
            fee_mode: criteria.fee_mode,
        }
    }

    /// Stable string form used as the store key.
    pub fn storage_key(&self) -> String {
        fn part<T: ToString>(value: Option<T>) -> String {
            value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
        }

        format!(
            "{}|pincode={}|state={}|district={}|age={}|vaccine={}|dose={}|fee={}",
            self.date.format(COWIN_DATE_FORMAT),
            part(self.pincode.as_deref()),
            part(self.state.as_deref()),
            part(self.district.as_deref()),
            self.age_group,
            part(self.vaccine),
            part(self.dose.map(u8::from)),
            part(self.fee_mode),
        )
    }
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Custom error type for scan operations
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Bad filter value or combination
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport failure talking to the CoWin API
    #[error("Network error: {0}")]
    Network(String),

    /// The CoWin API answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// State or district name did not match any known location
    #[error("Location not found: {0}")]
    LocationNotFound(String),

    /// Response body could not be decoded
    #[error("Data format error: {0}")]
    DataFormat(String),

    /// Snapshot store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ScanError {
    /// Whether the error only spoils the fetch for one date and the loop may carry on.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            ScanError::Network(_)
                | ScanError::Http { .. }
                | ScanError::LocationNotFound(_)
                | ScanError::DataFormat(_)
        )
    }
}

/// Custom validation function for pincodes
fn validate_pincode(pincode: &str) -> Result<(), validator::ValidationError> {
    let pincode = pincode.trim();
    if pincode.len() == 6 && pincode.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_pincode"))
    }
}

/// Custom validation function for vaccine names
fn validate_vaccine(vaccine: &str) -> Result<(), validator::ValidationError> {
    if Vaccine::ALL.iter().any(|known| known.matches(vaccine)) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("unknown_vaccine"))
    }
}
