use tracing::debug;

use crate::cowin_client::RawSession;
use crate::scan_types::SearchCriteria;
use crate::snapshot::{CenterRecord, Snapshot};

/// Turn raw sessions into a snapshot of centers matching `criteria`.
///
/// A session qualifies when its effective capacity is positive, its minimum age limit is
/// at or below the requested age group, and the vaccine and fee filters (when set) match.
/// Every qualifying session is kept; a session repeated in the response keeps its
/// largest capacity.
pub fn normalize(sessions: &[RawSession], criteria: &SearchCriteria) -> Snapshot {
    let mut snapshot = Snapshot::new();

    for session in sessions {
        let record = to_record(session, criteria);

        if !qualifies(&record, criteria) {
            continue;
        }

        match snapshot.get(&record.session_key()) {
            Some(existing) if existing.capacity() >= record.capacity() => {}
            _ => {
                snapshot.insert(record);
            }
        }
    }

    debug!(
        "Normalized {} sessions into {} qualifying sessions",
        sessions.len(),
        snapshot.len()
    );
    snapshot
}

fn to_record(session: &RawSession, criteria: &SearchCriteria) -> CenterRecord {
    CenterRecord {
        center_id: session.center_id,
        name: session.name.trim().to_string(),
        address: session.address.trim().to_string(),
        fee_mode: session.fee_type.trim().to_string(),
        date: session.date,
        available_capacity: session.available_capacity,
        available_capacity_dose1: session.available_capacity_dose1,
        available_capacity_dose2: session.available_capacity_dose2,
        dose: criteria.dose,
        age_limit: session.min_age_limit,
        vaccine: session.vaccine.trim().to_string(),
        slots: session.slots.iter().map(|s| s.time().to_string()).collect(),
    }
}

fn qualifies(record: &CenterRecord, criteria: &SearchCriteria) -> bool {
    record.capacity() > 0
        && record.age_limit <= criteria.age_group
        && criteria
            .vaccine
            .is_none_or(|vaccine| vaccine.matches(&record.vaccine))
        && criteria
            .fee_mode
            .is_none_or(|fee_mode| fee_mode.matches(&record.fee_mode))
}
