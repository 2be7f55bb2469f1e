use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue, PRAGMA};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::scan_types::{COWIN_DATE_FORMAT, Location, ScanError};

/// Source of raw session data for a location and date
#[async_trait]
pub trait SlotFetcher: Send + Sync {
    /// Fetch every session published for `location` on `date`.
    async fn fetch_sessions(
        &self,
        location: &Location,
        date: NaiveDate,
    ) -> Result<Vec<RawSession>, ScanError>;
}

/// Client for the public CoWin appointment API
pub struct CowinClient {
    client: Client,
    base_url: String,

    /// Memoized state list, fetched once per client
    states: RwLock<Option<Vec<StateEntry>>>,

    /// Memoized district lists keyed by state id
    districts: RwLock<HashMap<u32, Vec<DistrictEntry>>>,
}

/// Session as returned by the `findByPin` / `findByDistrict` endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct RawSession {
    /// Center identifier
    pub center_id: u64,
    /// Center name
    pub name: String,
    /// Street address
    #[serde(default)]
    pub address: String,
    /// "Free" or "Paid"
    #[serde(default)]
    pub fee_type: String,
    /// Session identifier
    #[serde(default)]
    pub session_id: String,
    /// Session date
    #[serde(deserialize_with = "deserialize_cowin_date")]
    pub date: NaiveDate,
    /// Total available capacity
    #[serde(default)]
    pub available_capacity: u32,
    /// Capacity left for first doses
    #[serde(default)]
    pub available_capacity_dose1: u32,
    /// Capacity left for second doses
    #[serde(default)]
    pub available_capacity_dose2: u32,
    /// Minimum age limit
    pub min_age_limit: u32,
    /// Vaccine name
    #[serde(default)]
    pub vaccine: String,
    /// Time slots
    #[serde(default)]
    pub slots: Vec<RawSlot>,
}

/// A time slot, either a bare time range or an object with seat counts
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSlot {
    /// "09:00AM-11:00AM"
    Time(String),
    /// {"time": "09:00AM-11:00AM", "seats": 12}
    Detailed {
        /// Time range
        time: String,
        /// Seats left in the slot
        #[serde(default)]
        seats: Option<u32>,
    },
}

impl RawSlot {
    /// Time range of the slot.
    pub fn time(&self) -> &str {
        match self {
            RawSlot::Time(time) => time,
            RawSlot::Detailed { time, .. } => time,
        }
    }
}

/// Response structure from the session search endpoints
#[derive(Debug, Deserialize)]
pub struct SessionsResponse {
    /// Sessions for the requested day
    #[serde(default)]
    pub sessions: Vec<RawSession>,
}

/// State entry from the location API
#[derive(Debug, Clone, Deserialize)]
pub struct StateEntry {
    /// CoWin state id
    pub state_id: u32,
    /// State name
    pub state_name: String,
}

#[derive(Debug, Deserialize)]
struct StatesResponse {
    states: Vec<StateEntry>,
}

/// District entry from the location API
#[derive(Debug, Clone, Deserialize)]
pub struct DistrictEntry {
    /// CoWin district id
    pub district_id: u32,
    /// District name
    pub district_name: String,
}

#[derive(Debug, Deserialize)]
struct DistrictsResponse {
    districts: Vec<DistrictEntry>,
}

fn deserialize_cowin_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveDate::parse_from_str(&raw, COWIN_DATE_FORMAT).map_err(serde::de::Error::custom)
}

impl CowinClient {
    /// Create a client against the public CoWin CDN endpoint
    pub fn new() -> Result<Self, ScanError> {
        Self::with_base_url("https://cdn-api.co-vin.in/api")
    }

    /// Create a client against another deployment of the API
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ScanError> {
        // The CDN rejects requests that don't look like they come from a browser
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "application/json,text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .user_agent("Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:88.0) Gecko/20100101 Firefox/88.0")
            .default_headers(headers)
            .build()
            .map_err(|e| ScanError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            states: RwLock::new(None),
            districts: RwLock::new(HashMap::new()),
        })
    }

    /// Sessions at all centers in a pincode on `date`
    pub async fn find_by_pincode(
        &self,
        pincode: &str,
        date: NaiveDate,
    ) -> Result<Vec<RawSession>, ScanError> {
        debug!("Fetching sessions for pincode {} on {}", pincode, date);

        let url = format!("{}/v2/appointment/sessions/public/findByPin", self.base_url);
        let params = [
            ("pincode", pincode.to_string()),
            ("date", date.format(COWIN_DATE_FORMAT).to_string()),
        ];

        let response: SessionsResponse = self.get_json(&url, &params).await?;
        Ok(response.sessions)
    }

    /// Sessions at all centers in a district on `date`
    pub async fn find_by_district_id(
        &self,
        district_id: u32,
        date: NaiveDate,
    ) -> Result<Vec<RawSession>, ScanError> {
        debug!("Fetching sessions for district {} on {}", district_id, date);

        let url = format!(
            "{}/v2/appointment/sessions/public/findByDistrict",
            self.base_url
        );
        let params = [
            ("district_id", district_id.to_string()),
            ("date", date.format(COWIN_DATE_FORMAT).to_string()),
        ];

        let response: SessionsResponse = self.get_json(&url, &params).await?;
        Ok(response.sessions)
    }

    /// All states and union territories
    pub async fn fetch_states(&self) -> Result<Vec<StateEntry>, ScanError> {
        {
            let cached = self.states.read().await;
            if let Some(states) = cached.as_ref() {
                return Ok(states.clone());
            }
        }

        let url = format!("{}/v2/admin/location/states", self.base_url);
        let response: StatesResponse = self.get_json(&url, &[]).await?;

        *self.states.write().await = Some(response.states.clone());
        Ok(response.states)
    }

    /// All districts of a state
    pub async fn fetch_districts(&self, state_id: u32) -> Result<Vec<DistrictEntry>, ScanError> {
        {
            let cached = self.districts.read().await;
            if let Some(districts) = cached.get(&state_id) {
                return Ok(districts.clone());
            }
        }

        let url = format!("{}/v2/admin/location/districts/{}", self.base_url, state_id);
        let response: DistrictsResponse = self.get_json(&url, &[]).await?;

        self.districts
            .write()
            .await
            .insert(state_id, response.districts.clone());
        Ok(response.districts)
    }

    /// Resolve a state name to its CoWin id
    pub async fn resolve_state_id(&self, state: &str) -> Result<u32, ScanError> {
        let states = self.fetch_states().await?;
        let pattern = name_pattern(state)?;

        states
            .iter()
            .find(|entry| pattern.is_match(&entry.state_name.trim().to_lowercase()))
            .map(|entry| entry.state_id)
            .ok_or_else(|| ScanError::LocationNotFound(format!("No match found for state '{}'", state)))
    }

    /// Resolve a district name within a state to its CoWin id
    pub async fn resolve_district_id(&self, district: &str, state: &str) -> Result<u32, ScanError> {
        let state_id = self.resolve_state_id(state).await?;
        let districts = self.fetch_districts(state_id).await?;
        let pattern = name_pattern(district)?;

        districts
            .iter()
            .find(|entry| pattern.is_match(&entry.district_name.trim().to_lowercase()))
            .map(|entry| entry.district_id)
            .ok_or_else(|| {
                ScanError::LocationNotFound(format!(
                    "No match found for district '{}' in state '{}'",
                    district, state
                ))
            })
    }

    /// Issue a GET request and decode the JSON body
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, ScanError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| ScanError::Network(format!("HTTP request failed: {}", e)))?;

        debug!("API response status: {}", response.status());

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            warn!("API request to {} failed with status {}: {}", url, status, body);

            return Err(ScanError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ScanError::DataFormat(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl SlotFetcher for CowinClient {
    async fn fetch_sessions(
        &self,
        location: &Location,
        date: NaiveDate,
    ) -> Result<Vec<RawSession>, ScanError> {
        match location {
            Location::Pincode(pincode) => self.find_by_pincode(pincode, date).await,
            Location::District { state, district } => {
                let district_id = self.resolve_district_id(district, state).await?;
                self.find_by_district_id(district_id, date).await
            }
        }
    }
}

/// Prefix pattern for a location name that ignores case and whitespace between words,
/// so "tamil nadu" matches both "Tamil Nadu" and "Tamilnadu".
fn name_pattern(name: &str) -> Result<Regex, ScanError> {
    let words: Vec<String> = name
        .to_lowercase()
        .split_whitespace()
        .map(regex::escape)
        .collect();

    if words.is_empty() {
        return Err(ScanError::InvalidArgument(
            "Location name must not be empty".to_string(),
        ));
    }

    Regex::new(&format!("^{}", words.join(r"\s*")))
        .map_err(|e| ScanError::InvalidArgument(format!("Bad location name '{}': {}", name, e)))
}
