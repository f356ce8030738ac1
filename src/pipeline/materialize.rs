//! Schedule materialization: validated medicines → persisted schedules.
//!
//! Entries without a usable name or without timings are reported back as
//! [`SkippedMedicine`]s instead of being stored. Accepted entries become one
//! enabled [`ScheduleRecord`] each, in input order.

use crate::error::StoreError;
use crate::model::{ScheduleRecord, SkipReason, SkippedMedicine, ValidatedMedicine, PLACEHOLDER};
use crate::progress::ProgressCallback;
use crate::store::DocumentStore;
use tracing::{debug, info};
use uuid::Uuid;

/// Names that mean "the extractor did not find one".
const PLACEHOLDER_NAMES: &[&str] = &[PLACEHOLDER, "Unknown", "Unknown Medicine"];

/// Outcome of one materialization.
#[derive(Debug, Clone, Default)]
pub struct Materialized {
    /// Created records, in medicine order.
    pub records: Vec<ScheduleRecord>,
    pub skipped: Vec<SkippedMedicine>,
}

/// Why `medicine` must not become a schedule, if anything.
pub fn skip_reason(medicine: &ValidatedMedicine) -> Option<SkipReason> {
    let name = medicine.medicine_name.trim();
    if name.is_empty() || PLACEHOLDER_NAMES.contains(&name) {
        Some(SkipReason::PlaceholderName)
    } else if medicine.timings.is_empty() {
        Some(SkipReason::NoTimings)
    } else {
        None
    }
}

/// Create one schedule per acceptable medicine.
pub fn materialize(
    store: &dyn DocumentStore,
    prescription_id: Uuid,
    user_id: &str,
    medicines: &[ValidatedMedicine],
    progress: Option<&ProgressCallback>,
) -> Result<Materialized, StoreError> {
    let mut out = Materialized::default();

    for medicine in medicines {
        if let Some(reason) = skip_reason(medicine) {
            debug!("Skipping '{}': {}", medicine.medicine_name, reason);
            if let Some(cb) = progress {
                cb.on_schedule_skipped(&medicine.medicine_name, reason);
            }
            out.skipped.push(SkippedMedicine {
                medicine_name: medicine.medicine_name.clone(),
                reason,
            });
            continue;
        }

        let record = ScheduleRecord::new(prescription_id, user_id, medicine);
        store.insert_schedule(&record)?;
        if let Some(cb) = progress {
            cb.on_schedule_created(&record.medicine_name);
        }
        out.records.push(record);
    }

    info!(
        "Created {} schedules, skipped {}",
        out.records.len(),
        out.skipped.len()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeSlot;
    use crate::store::MemoryStore;

    fn medicine(name: &str, timings: Vec<TimeSlot>) -> ValidatedMedicine {
        ValidatedMedicine {
            medicine_name: name.into(),
            dosage: "N/A".into(),
            quantity: "N/A".into(),
            frequency: "N/A".into(),
            timings,
        }
    }

    #[test]
    fn placeholder_names_are_skipped() {
        for name in ["", "  ", "N/A", "Unknown", " Unknown Medicine "] {
            let m = medicine(name, vec![TimeSlot::Morning]);
            assert_eq!(skip_reason(&m), Some(SkipReason::PlaceholderName), "{name:?}");
        }
        assert_eq!(skip_reason(&medicine("Zinc", vec![TimeSlot::Night])), None);
    }

    #[test]
    fn empty_timings_are_skipped() {
        let m = medicine("Paracetamol", vec![]);
        assert_eq!(skip_reason(&m), Some(SkipReason::NoTimings));
    }

    #[test]
    fn records_follow_input_order() {
        let store = MemoryStore::new();
        let rx = Uuid::new_v4();
        let input = vec![
            medicine("Metformin", vec![TimeSlot::Morning, TimeSlot::Evening]),
            medicine("N/A", vec![TimeSlot::Morning]),
            medicine("Amlodipine", vec![TimeSlot::Morning]),
            medicine("Paracetamol", vec![]),
        ];

        let out = materialize(&store, rx, "u1", &input, None).unwrap();
        let names: Vec<_> = out.records.iter().map(|r| r.medicine_name.as_str()).collect();
        assert_eq!(names, vec!["Metformin", "Amlodipine"]);
        assert_eq!(out.skipped.len(), 2);
        assert_eq!(out.skipped[0].reason, SkipReason::PlaceholderName);
        assert_eq!(out.skipped[1].reason, SkipReason::NoTimings);

        let stored = store.schedules_for_user("u1").unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|s| s.enabled && s.last_reminder_sent.is_none()));
        assert!(stored.iter().all(|s| s.prescription_id == rx));
    }

    #[test]
    fn same_input_same_decisions() {
        let input = vec![
            medicine("Unknown", vec![TimeSlot::Morning]),
            medicine("Zinc", vec![TimeSlot::Night]),
        ];
        let a = materialize(&MemoryStore::new(), Uuid::new_v4(), "u", &input, None).unwrap();
        let b = materialize(&MemoryStore::new(), Uuid::new_v4(), "u", &input, None).unwrap();
        assert_eq!(a.skipped, b.skipped);
        assert_eq!(a.records.len(), b.records.len());
    }
}
