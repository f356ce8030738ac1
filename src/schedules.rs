//! Schedule management: the operations a client performs after a run.
//!
//! Listing, enabling/disabling and deleting schedules, plus the hook the
//! reminder system calls after it delivered a reminder. Each operation turns
//! a missing schedule into [`PrescriptionError::ScheduleNotFound`].

use crate::error::PrescriptionError;
use crate::model::{PrescriptionRecord, ScheduleRecord};
use crate::store::DocumentStore;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

/// All schedules owned by `user_id`.
pub fn list_schedules(
    store: &dyn DocumentStore,
    user_id: &str,
) -> Result<Vec<ScheduleRecord>, PrescriptionError> {
    Ok(store.schedules_for_user(user_id)?)
}

/// All prescriptions owned by `user_id`, newest first.
pub fn list_prescriptions(
    store: &dyn DocumentStore,
    user_id: &str,
) -> Result<Vec<PrescriptionRecord>, PrescriptionError> {
    Ok(store.prescriptions_for_user(user_id)?)
}

/// Enable or disable reminders for one schedule.
pub fn toggle_schedule(
    store: &dyn DocumentStore,
    schedule_id: Uuid,
    enabled: bool,
) -> Result<(), PrescriptionError> {
    if !store.set_schedule_enabled(schedule_id, enabled)? {
        return Err(PrescriptionError::ScheduleNotFound { schedule_id });
    }
    info!("Schedule {} enabled={}", schedule_id, enabled);
    Ok(())
}

pub fn delete_schedule(store: &dyn DocumentStore, schedule_id: Uuid) -> Result<(), PrescriptionError> {
    if !store.delete_schedule(schedule_id)? {
        return Err(PrescriptionError::ScheduleNotFound { schedule_id });
    }
    info!("Schedule {} deleted", schedule_id);
    Ok(())
}

/// Record that a reminder for `schedule_id` went out at `at`.
pub fn mark_reminder_sent(
    store: &dyn DocumentStore,
    schedule_id: Uuid,
    at: DateTime<Utc>,
) -> Result<(), PrescriptionError> {
    if !store.set_last_reminder_sent(schedule_id, at)? {
        return Err(PrescriptionError::ScheduleNotFound { schedule_id });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::{TimeSlot, ValidatedMedicine};
    use crate::store::MemoryStore;

    fn seeded() -> (MemoryStore, ScheduleRecord) {
        let store = MemoryStore::new();
        let record = ScheduleRecord::new(
            Uuid::new_v4(),
            "u1",
            &ValidatedMedicine {
                medicine_name: "Metformin".into(),
                dosage: "500mg".into(),
                quantity: "N/A".into(),
                frequency: "twice a day".into(),
                timings: vec![TimeSlot::Morning, TimeSlot::Evening],
            },
        );
        store.insert_schedule(&record).unwrap();
        (store, record)
    }

    #[test]
    fn toggle_and_list() {
        let (store, record) = seeded();
        toggle_schedule(&store, record.id, false).unwrap();
        let listed = list_schedules(&store, "u1").unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].enabled);
    }

    #[test]
    fn unknown_schedule_is_not_found() {
        let (store, _) = seeded();
        let missing = Uuid::new_v4();
        for err in [
            toggle_schedule(&store, missing, true).unwrap_err(),
            delete_schedule(&store, missing).unwrap_err(),
            mark_reminder_sent(&store, missing, Utc::now()).unwrap_err(),
        ] {
            assert!(matches!(err, PrescriptionError::ScheduleNotFound { schedule_id } if schedule_id == missing));
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
    }

    #[test]
    fn delete_then_list_is_empty() {
        let (store, record) = seeded();
        delete_schedule(&store, record.id).unwrap();
        assert!(list_schedules(&store, "u1").unwrap().is_empty());
    }

    #[test]
    fn reminder_timestamp_is_recorded() {
        let (store, record) = seeded();
        let at = Utc::now();
        mark_reminder_sent(&store, record.id, at).unwrap();
        let listed = list_schedules(&store, "u1").unwrap();
        assert_eq!(listed[0].last_reminder_sent, Some(at));
    }
}
