use std::collections::BTreeMap;
use std::collections::btree_map;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::scan_types::Dose;

/// Availability of one session at a vaccination center, after filtering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CenterRecord {
    /// CoWin center identifier
    pub center_id: u64,
    /// Center name
    pub name: String,
    /// Street address
    pub address: String,
    /// Fee type as reported by CoWin ("Free" or "Paid")
    pub fee_mode: String,
    /// Date of the session
    pub date: NaiveDate,
    /// Total available capacity
    pub available_capacity: u32,
    /// Capacity left for first doses
    pub available_capacity_dose1: u32,
    /// Capacity left for second doses
    pub available_capacity_dose2: u32,
    /// Dose the search filtered on, which decides what [`CenterRecord::capacity`] measures
    pub dose: Option<Dose>,
    /// Minimum age limit of the session
    pub age_limit: u32,
    /// Vaccine administered
    pub vaccine: String,
    /// Bookable time slots
    pub slots: Vec<String>,
}

/// Identity of a session: one center can run several sessions on a date, one per
/// age limit and vaccine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    /// CoWin center identifier
    pub center_id: u64,
    /// Date of the session
    pub date: NaiveDate,
    /// Minimum age limit
    pub age_limit: u32,
    /// Vaccine name, uppercased with whitespace removed
    pub vaccine: String,
}

impl CenterRecord {
    /// Capacity relevant to the search: dose specific when a dose was requested.
    pub fn capacity(&self) -> u32 {
        match self.dose {
            Some(Dose::First) => self.available_capacity_dose1,
            Some(Dose::Second) => self.available_capacity_dose2,
            None => self.available_capacity,
        }
    }

    /// Identity of the session this record describes.
    pub fn session_key(&self) -> SessionKey {
        SessionKey {
            center_id: self.center_id,
            date: self.date,
            age_limit: self.age_limit,
            vaccine: self
                .vaccine
                .split_whitespace()
                .collect::<String>()
                .to_uppercase(),
        }
    }
}

/// Everything available for one query at one point in time, keyed by session identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<CenterRecord>", into = "Vec<CenterRecord>")]
pub struct Snapshot {
    sessions: BTreeMap<SessionKey, CenterRecord>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any record for the same session.
    pub fn insert(&mut self, record: CenterRecord) -> Option<CenterRecord> {
        self.sessions.insert(record.session_key(), record)
    }

    /// Record for the session `key`, if present.
    pub fn get(&self, key: &SessionKey) -> Option<&CenterRecord> {
        self.sessions.get(key)
    }

    /// Whether any session of `center_id` is present.
    pub fn contains_center(&self, center_id: u64) -> bool {
        self.sessions.keys().any(|key| key.center_id == center_id)
    }

    /// Sessions of `center_id`.
    pub fn sessions_for(&self, center_id: u64) -> impl Iterator<Item = &CenterRecord> {
        self.sessions
            .values()
            .filter(move |record| record.center_id == center_id)
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session has availability.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Records ordered by center id, then date, age limit and vaccine.
    pub fn records(&self) -> btree_map::Values<'_, SessionKey, CenterRecord> {
        self.sessions.values()
    }
}

impl FromIterator<CenterRecord> for Snapshot {
    fn from_iter<I: IntoIterator<Item = CenterRecord>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for record in iter {
            snapshot.insert(record);
        }
        snapshot
    }
}

impl From<Vec<CenterRecord>> for Snapshot {
    fn from(records: Vec<CenterRecord>) -> Self {
        records.into_iter().collect()
    }
}

impl From<Snapshot> for Vec<CenterRecord> {
    fn from(snapshot: Snapshot) -> Self {
        snapshot.into_iter().collect()
    }
}

impl IntoIterator for Snapshot {
    type Item = CenterRecord;
    type IntoIter = btree_map::IntoValues<SessionKey, CenterRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.sessions.into_values()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A record for `center_id` on 20-05-2021, age 18+, COVISHIELD, with `capacity` total seats.
    pub fn record(center_id: u64, capacity: u32) -> CenterRecord {
        CenterRecord {
            center_id,
            name: format!("Center {}", center_id),
            address: format!("{} Main Road", center_id),
            fee_mode: "Free".to_string(),
            date: NaiveDate::from_ymd_opt(2021, 5, 20).unwrap(),
            available_capacity: capacity,
            available_capacity_dose1: capacity,
            available_capacity_dose2: 0,
            dose: None,
            age_limit: 18,
            vaccine: "COVISHIELD".to_string(),
            slots: vec!["09:00AM-11:00AM".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::record;
    use super::*;

    #[test]
    fn test_capacity_follows_requested_dose() {
        let mut rec = record(1, 10);
        rec.available_capacity_dose1 = 7;
        rec.available_capacity_dose2 = 3;

        assert_eq!(rec.capacity(), 10);
        rec.dose = Some(Dose::First);
        assert_eq!(rec.capacity(), 7);
        rec.dose = Some(Dose::Second);
        assert_eq!(rec.capacity(), 3);
    }

    #[test]
    fn test_session_key_ignores_capacity() {
        let a = record(1, 10);
        let mut b = record(1, 2);
        b.vaccine = "covi shield".to_string();
        assert_eq!(a.session_key(), b.session_key());

        b.vaccine = "COVAXIN".to_string();
        assert_ne!(a.session_key(), b.session_key());
    }

    #[test]
    fn test_center_with_several_sessions() {
        let covishield = record(1, 10);
        let mut covaxin = record(1, 3);
        covaxin.vaccine = "COVAXIN".to_string();
        let snapshot: Snapshot = vec![covishield.clone(), covaxin.clone(), record(2, 1)]
            .into_iter()
            .collect();

        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.contains_center(1));
        assert!(!snapshot.contains_center(5));
        assert_eq!(snapshot.sessions_for(1).count(), 2);
        assert_eq!(snapshot.get(&covaxin.session_key()), Some(&covaxin));
        assert_eq!(snapshot.get(&covishield.session_key()), Some(&covishield));
    }

    #[test]
    fn test_snapshot_json_keeps_sessions() {
        let mut covaxin = record(7, 4);
        covaxin.vaccine = "COVAXIN".to_string();
        let snapshot: Snapshot = vec![record(7, 1), covaxin, record(3, 2)].into_iter().collect();

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(back, snapshot);
        let ids: Vec<u64> = back.records().map(|r| r.center_id).collect();
        assert_eq!(ids, vec![3, 7, 7]);
    }
}
