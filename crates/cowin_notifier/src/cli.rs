use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use cowin_scan::{FeeMode, ScanError, ScanExecutorConfig, SearchCriteria, SearchRequest};

/// Command line flags
#[derive(Parser, Debug)]
#[command(name = "cowin_notifier")]
#[command(about = "Emails you when CoWin vaccination slots open up")]
#[command(version)]
pub struct Cli {
    /// Six digit pincode to search in
    #[arg(long, short = 'p')]
    pub pincode: Option<String>,

    /// District to search in (requires --state)
    #[arg(long, short = 'd')]
    pub district: Option<String>,

    /// State the district belongs to
    #[arg(long, short = 's')]
    pub state: Option<String>,

    /// Your age; sessions with a higher minimum age are ignored
    #[arg(long, short = 'a', default_value_t = 45)]
    pub age_group: u32,

    /// Number of days to check, starting today
    #[arg(long, short = 'c', default_value_t = 5)]
    pub check_period: u32,

    /// Seconds to wait between checks
    #[arg(long, short = 'r', default_value_t = 300)]
    pub recur_period: u64,

    /// Only report this vaccine (COVISHIELD, COVAXIN or SPUTNIK V)
    #[arg(long)]
    pub vaccine: Option<String>,

    /// Only report capacity for this dose (1 or 2)
    #[arg(long)]
    pub dose: Option<u8>,

    /// Only report free centers
    #[arg(long, default_value_t = false)]
    pub free: bool,

    /// Only report paid centers
    #[arg(long, default_value_t = false)]
    pub paid: bool,

    /// Log every request and diff
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,

    /// File remembering what was already reported
    #[arg(long, default_value = ".previous.db")]
    pub cache: PathBuf,

    /// File listing recipients, one "Name <email>" or "email" per line
    #[arg(long, default_value = "recipients")]
    pub recipients: PathBuf,

    /// Extra recipient; may be repeated
    #[arg(long = "to")]
    pub to: Vec<String>,

    /// Check once and exit
    #[arg(long, default_value_t = false)]
    pub once: bool,
}

impl Cli {
    /// Validated search criteria
    pub fn criteria(&self) -> Result<SearchCriteria, ScanError> {
        SearchRequest {
            pincode: self.pincode.clone(),
            state: self.state.clone(),
            district: self.district.clone(),
            age_group: self.age_group,
            vaccine: self.vaccine.clone(),
            dose: self.dose,
            fee_mode: FeeMode::from_flags(self.free, self.paid),
        }
        .into_criteria()
    }

    /// Loop timing
    pub fn executor_config(&self) -> ScanExecutorConfig {
        ScanExecutorConfig {
            check_period_days: self.check_period,
            recur_period: Duration::from_secs(self.recur_period),
            run_once: self.once,
            ..Default::default()
        }
    }

    /// Default log filter
    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}

#[cfg(test)]
mod tests {
    use cowin_scan::{Dose, Location, Vaccine};

    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["cowin_notifier", "-p", "110001"]);

        assert_eq!(cli.age_group, 45);
        assert_eq!(cli.check_period, 5);
        assert_eq!(cli.recur_period, 300);
        assert_eq!(cli.cache, PathBuf::from(".previous.db"));
        assert_eq!(cli.recipients, PathBuf::from("recipients"));
        assert!(cli.to.is_empty());
        assert_eq!(cli.log_level(), "info");

        let config = cli.executor_config();
        assert_eq!(config.recur_period, Duration::from_secs(300));
        assert!(!config.run_once);
    }

    #[test]
    fn test_filters_become_criteria() {
        let cli = Cli::parse_from([
            "cowin_notifier",
            "-s",
            "Tamil Nadu",
            "-d",
            "Chennai",
            "-a",
            "18",
            "--vaccine",
            "covishield",
            "--dose",
            "1",
            "--paid",
            "--to",
            "a@example.com",
            "--to",
            "Ravi <ravi@example.org>",
        ]);

        let criteria = cli.criteria().unwrap();
        assert_eq!(
            criteria.location,
            Location::District {
                state: "Tamil Nadu".to_string(),
                district: "Chennai".to_string(),
            }
        );
        assert_eq!(criteria.vaccine, Some(Vaccine::Covishield));
        assert_eq!(criteria.dose, Some(Dose::First));
        assert_eq!(criteria.fee_mode, Some(FeeMode::Paid));
        assert_eq!(cli.to.len(), 2);
    }

    #[test]
    fn test_missing_location_rejected() {
        let cli = Cli::parse_from(["cowin_notifier", "-d", "Chennai"]);
        assert!(matches!(cli.criteria(), Err(ScanError::InvalidArgument(_))));
    }
}
