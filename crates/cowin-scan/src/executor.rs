use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::cowin_client::SlotFetcher;
use crate::diff::{DiffResult, diff};
use crate::normalizer::normalize;
use crate::recipients::Recipient;
use crate::scan_types::*;
use crate::snapshot_store::{DEFAULT_SNAPSHOT_TTL, SnapshotStore};

/// Offset of Indian Standard Time from UTC, in seconds
const IST_OFFSET_SECONDS: i32 = 5 * 60 * 60 + 30 * 60;

/// New availability found for one area on one date
#[derive(Debug, Clone, Serialize)]
pub struct SlotDigest {
    /// Area that was searched
    pub area: Location,
    /// Date of the sessions
    pub date: NaiveDate,
    /// Centers worth notifying about
    pub diff: DiffResult,
}

/// Outcome of delivering one digest to every recipient
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Recipients the digest was handed to, with the provider's message id
    pub delivered: Vec<(Recipient, String)>,
    /// Recipients that could not be reached
    pub failures: Vec<(Recipient, NotificationError)>,
}

impl DeliveryReport {
    /// Whether every recipient received the digest.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Main scan execution engine
pub struct ScanExecutor {
    fetcher: Arc<dyn SlotFetcher>,
    store: Arc<dyn SnapshotStore>,
    notification_service: Arc<dyn NotificationService>,
    criteria: SearchCriteria,

    /// Configuration
    config: ScanExecutorConfig,
}

/// Timing knobs of the polling loop
#[derive(Debug, Clone)]
pub struct ScanExecutorConfig {
    /// Number of days to scan, starting today (default: 5)
    pub check_period_days: u32,

    /// Pause between iterations (default: 5 minutes)
    pub recur_period: Duration,

    /// How long a stored snapshot stays valid (default: 6 hours)
    pub snapshot_ttl: Duration,

    /// Stop after the first iteration
    pub run_once: bool,
}

impl Default for ScanExecutorConfig {
    fn default() -> Self {
        Self {
            check_period_days: 5,
            recur_period: Duration::from_secs(5 * 60), // 5 minutes
            snapshot_ttl: DEFAULT_SNAPSHOT_TTL,
            run_once: false,
        }
    }
}

/// Trait for services delivering slot digests
#[async_trait::async_trait]
pub trait NotificationService: Send + Sync {
    /// Deliver one digest covering every area and date with news.
    async fn send_slot_digest(
        &self,
        digests: &[SlotDigest],
    ) -> Result<DeliveryReport, NotificationError>;
}

/// Errors raised while notifying recipients
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// The mail provider rejected the configured credentials
    #[error("Authentication error: {0}")]
    Authentication(String),
    /// A message could not be delivered
    #[error("Delivery error: {0}")]
    Delivery(String),
    /// A recipient line did not parse
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
    /// Mail settings are missing or malformed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScanExecutor {
    /// Create an executor polling `fetcher` for `criteria`.
    pub fn new(
        fetcher: Arc<dyn SlotFetcher>,
        store: Arc<dyn SnapshotStore>,
        notification_service: Arc<dyn NotificationService>,
        criteria: SearchCriteria,
        config: Option<ScanExecutorConfig>,
    ) -> Self {
        Self {
            fetcher,
            store,
            notification_service,
            criteria,
            config: config.unwrap_or_default(),
        }
    }

    /// Run the polling loop until shutdown is requested, then close the store.
    ///
    /// Shutdown is honoured between iterations and while sleeping. Store failures end
    /// the loop and are returned after the store is closed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ScanError> {
        info!(
            "Starting scan for {} over {} days, every {:?}",
            self.criteria.location, self.config.check_period_days, self.config.recur_period
        );

        let result = self.run_loop(&mut shutdown).await;

        self.store.close().await;
        info!("Scan stopped");
        result
    }

    async fn run_loop(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), ScanError> {
        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested");
                return Ok(());
            }

            let digests = self.run_iteration(ist_today()).await?;
            if digests.is_empty() {
                debug!("No new availability this iteration");
            } else {
                self.notify(&digests).await;
            }

            if self.config.run_once {
                return Ok(());
            }

            tokio::select! {
                _ = sleep(self.config.recur_period) => {}
                _ = wait_for_shutdown(shutdown) => {
                    info!("Shutdown requested while sleeping");
                    return Ok(());
                }
            }
        }
    }

    /// One pass over the date window starting at `today`.
    ///
    /// Expired snapshots are swept first. A date whose fetch fails is logged and skipped
    /// without touching its stored snapshot.
    pub async fn run_iteration(&self, today: NaiveDate) -> Result<Vec<SlotDigest>, ScanError> {
        let swept = self.store.expire_sweep().await?;
        if swept > 0 {
            debug!("Expired {} stale snapshots", swept);
        }

        let mut digests = Vec::new();

        for date in upcoming_dates(today, self.config.check_period_days) {
            match self.poll_date(date).await {
                Ok(Some(digest)) => {
                    info!(
                        "Found {} sessions with new availability in {} on {}",
                        digest.diff.len(),
                        digest.area,
                        date.format(COWIN_DATE_FORMAT)
                    );
                    digests.push(digest);
                }
                Ok(None) => {}
                Err(e) if e.is_fetch_failure() => {
                    error!(
                        "Failed to fetch slots for {} on {}: {}",
                        self.criteria.location,
                        date.format(COWIN_DATE_FORMAT),
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(digests)
    }

    /// Fetch, normalize and diff a single date
    async fn poll_date(&self, date: NaiveDate) -> Result<Option<SlotDigest>, ScanError> {
        let sessions = self
            .fetcher
            .fetch_sessions(&self.criteria.location, date)
            .await?;

        let snapshot = normalize(&sessions, &self.criteria);
        let key = QueryKey::new(date, &self.criteria);

        let result = diff(snapshot, self.store.as_ref(), &key, self.config.snapshot_ttl).await?;

        Ok(result.map(|diff| SlotDigest {
            area: self.criteria.location.clone(),
            date,
            diff,
        }))
    }

    /// Hand the digests to the notification service and log the outcome
    async fn notify(&self, digests: &[SlotDigest]) {
        match serde_json::to_string(digests) {
            Ok(json) => debug!("Slot digest: {}", json),
            Err(e) => warn!("Could not serialize slot digest: {}", e),
        }

        match self.notification_service.send_slot_digest(digests).await {
            Ok(report) => {
                for (recipient, e) in &report.failures {
                    error!("Failed to notify {}: {}", recipient, e);
                }
                info!(
                    "Notified {} recipients, {} failed",
                    report.delivered.len(),
                    report.failures.len()
                );
            }
            Err(e) => error!("Failed to send slot digest: {}", e),
        }
    }
}

/// Current date in Indian Standard Time
pub fn ist_today() -> NaiveDate {
    match FixedOffset::east_opt(IST_OFFSET_SECONDS) {
        Some(ist) => Utc::now().with_timezone(&ist).date_naive(),
        None => Utc::now().date_naive(),
    }
}

/// `days` consecutive dates starting at `start`
pub fn upcoming_dates(start: NaiveDate, days: u32) -> Vec<NaiveDate> {
    start.iter_days().take(days as usize).collect()
}

/// Resolves once `true` is sent; never resolves if the sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::cowin_client::{RawSession, RawSlot};
    use crate::snapshot_store::MemorySnapshotStore;

    /// Fetcher answering from a table of per-date responses
    struct MockFetcher {
        responses: Mutex<HashMap<NaiveDate, Result<Vec<RawSession>, String>>>,
    }

    impl MockFetcher {
        fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
            }
        }

        fn respond(&self, date: NaiveDate, response: Result<Vec<RawSession>, String>) {
            self.responses.lock().unwrap().insert(date, response);
        }
    }

    #[async_trait]
    impl SlotFetcher for MockFetcher {
        async fn fetch_sessions(
            &self,
            _location: &Location,
            date: NaiveDate,
        ) -> Result<Vec<RawSession>, ScanError> {
            match self.responses.lock().unwrap().get(&date) {
                Some(Ok(sessions)) => Ok(sessions.clone()),
                Some(Err(message)) => Err(ScanError::Network(message.clone())),
                None => Ok(Vec::new()),
            }
        }
    }

    /// Notifier that records every digest batch it is given
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Vec<SlotDigest>>>,
    }

    #[async_trait]
    impl NotificationService for RecordingNotifier {
        async fn send_slot_digest(
            &self,
            digests: &[SlotDigest],
        ) -> Result<DeliveryReport, NotificationError> {
            self.sent.lock().unwrap().push(digests.to_vec());
            Ok(DeliveryReport::default())
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 5, 20).unwrap()
    }

    fn session(center_id: u64, date: NaiveDate, capacity: u32) -> RawSession {
        RawSession {
            center_id,
            name: format!("Center {}", center_id),
            address: "Station Road".to_string(),
            fee_type: "Free".to_string(),
            session_id: format!("{}-{}", center_id, date),
            date,
            available_capacity: capacity,
            available_capacity_dose1: capacity,
            available_capacity_dose2: 0,
            min_age_limit: 18,
            vaccine: "COVAXIN".to_string(),
            slots: vec![RawSlot::Time("02:00PM-04:00PM".to_string())],
        }
    }

    fn criteria() -> SearchCriteria {
        SearchCriteria {
            location: Location::Pincode("411001".to_string()),
            age_group: 45,
            vaccine: None,
            dose: None,
            fee_mode: None,
        }
    }

    fn executor(
        fetcher: Arc<MockFetcher>,
        store: Arc<MemorySnapshotStore>,
        notifier: Arc<RecordingNotifier>,
        config: ScanExecutorConfig,
    ) -> ScanExecutor {
        ScanExecutor::new(fetcher, store, notifier, criteria(), Some(config))
    }

    fn three_days() -> ScanExecutorConfig {
        ScanExecutorConfig {
            check_period_days: 3,
            run_once: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_upcoming_dates() {
        let dates = upcoming_dates(NaiveDate::from_ymd_opt(2021, 5, 30).unwrap(), 3);
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2021, 5, 30).unwrap(),
                NaiveDate::from_ymd_opt(2021, 5, 31).unwrap(),
                NaiveDate::from_ymd_opt(2021, 6, 1).unwrap(),
            ]
        );
        assert!(upcoming_dates(today(), 0).is_empty());
    }

    #[tokio::test]
    async fn test_iteration_reports_only_changes() {
        let fetcher = Arc::new(MockFetcher::new());
        let store = Arc::new(MemorySnapshotStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = executor(fetcher.clone(), store.clone(), notifier, three_days());

        let tomorrow = today().succ_opt().unwrap();
        fetcher.respond(today(), Ok(vec![session(1, today(), 5), session(2, today(), 3)]));
        fetcher.respond(tomorrow, Ok(vec![session(1, tomorrow, 2)]));

        let digests = executor.run_iteration(today()).await.unwrap();
        assert_eq!(digests.len(), 2);
        assert_eq!(digests[0].date, today());
        assert_eq!(digests[0].diff.len(), 2);
        assert_eq!(digests[1].date, tomorrow);

        // Every date gets its own stored snapshot, empty ones included
        assert_eq!(store.len().await, 3);

        let digests = executor.run_iteration(today()).await.unwrap();
        assert!(digests.is_empty());

        fetcher.respond(today(), Ok(vec![session(1, today(), 8), session(2, today(), 3)]));
        let digests = executor.run_iteration(today()).await.unwrap();
        assert_eq!(digests.len(), 1);
        let entries = digests[0].diff.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.center_id, 1);
        assert_eq!(entries[0].record.capacity(), 8);
    }

    #[tokio::test]
    async fn test_failed_date_leaves_store_untouched() {
        let fetcher = Arc::new(MockFetcher::new());
        let store = Arc::new(MemorySnapshotStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = executor(fetcher.clone(), store.clone(), notifier, three_days());

        fetcher.respond(today(), Ok(vec![session(1, today(), 5)]));
        executor.run_iteration(today()).await.unwrap();

        let key = QueryKey::new(today(), &criteria());
        let before = store.get(&key).await.unwrap();

        fetcher.respond(today(), Err("connection reset".to_string()));
        let digests = executor.run_iteration(today()).await.unwrap();
        assert!(digests.is_empty());
        assert_eq!(store.get(&key).await.unwrap(), before);

        // Recovery compares against the snapshot from before the failure
        fetcher.respond(today(), Ok(vec![session(1, today(), 5)]));
        let digests = executor.run_iteration(today()).await.unwrap();
        assert!(digests.is_empty());
    }

    #[tokio::test]
    async fn test_run_once_notifies_and_closes_store() {
        let fetcher = Arc::new(MockFetcher::new());
        let store = Arc::new(MemorySnapshotStore::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let ist = ist_today();
        fetcher.respond(ist, Ok(vec![session(7, ist, 4)]));

        let executor = executor(fetcher, store.clone(), notifier.clone(), three_days());
        let (_tx, rx) = watch::channel(false);
        executor.run(rx).await.unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0].diff.entries()[0].record.center_id, 7);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_nothing_new_sends_nothing() {
        let fetcher = Arc::new(MockFetcher::new());
        let store = Arc::new(MemorySnapshotStore::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let executor = executor(fetcher, store, notifier.clone(), three_days());
        let (_tx, rx) = watch::channel(false);
        executor.run(rx).await.unwrap();

        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let fetcher = Arc::new(MockFetcher::new());
        let store = Arc::new(MemorySnapshotStore::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let config = ScanExecutorConfig {
            run_once: false,
            ..three_days()
        };
        let executor = executor(fetcher, store.clone(), notifier.clone(), config);

        let (_tx, rx) = watch::channel(true);
        executor.run(rx).await.unwrap();

        assert!(store.is_empty().await);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let fetcher = Arc::new(MockFetcher::new());
        let store = Arc::new(MemorySnapshotStore::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let config = ScanExecutorConfig {
            recur_period: Duration::from_secs(3600),
            run_once: false,
            ..three_days()
        };
        let executor = executor(fetcher, store.clone(), notifier, config);

        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        });

        tokio::time::timeout(Duration::from_secs(5), executor.run(rx))
            .await
            .unwrap()
            .unwrap();
        stopper.await.unwrap();

        assert!(store.is_closed());
    }
}
