//! # CoWin Scan
//!
//! This crate provides the polling engine of the CoWin slot notifier. It fetches vaccination
//! sessions from the CoWin API, keeps a snapshot of what was available for every search and
//! date, and emails a digest whenever a center appears or its capacity grows.

/// Types for slot search criteria and errors
mod scan_types;
pub use scan_types::*;

/// Client for the CoWin appointment and location APIs
pub mod cowin_client;
pub use cowin_client::{CowinClient, RawSession, SlotFetcher};

/// Per-session availability records and snapshots
pub mod snapshot;
pub use snapshot::{CenterRecord, SessionKey, Snapshot};

/// Filtering raw sessions into snapshots
pub mod normalizer;
pub use normalizer::normalize;

/// Change detection between snapshots
pub mod diff;
pub use diff::{Change, DiffEntry, DiffResult, compute_diff};

/// Snapshot persistence with time-to-live
pub mod snapshot_store;
pub use snapshot_store::{DEFAULT_SNAPSHOT_TTL, SnapshotStore};

/// Recipient list parsing
pub mod recipients;
pub use recipients::{Recipient, load_recipients, parse_recipients};

/// Polling loop
pub mod executor;
pub use executor::{
    DeliveryReport, NotificationError, NotificationService, ScanExecutor, ScanExecutorConfig,
    SlotDigest,
};

/// Digest rendering and delivery
pub mod notification_service;
pub use notification_service::{EmailService, NotificationServiceImpl};

/// Email providers
pub mod email_service;
pub use email_service::{EmailConfig, EmailProvider, create_email_service};
