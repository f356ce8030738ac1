//! Normalisation: enforce the output contract on extracted candidates.
//!
//! Runs identically for both extractors, so downstream code never has to
//! care which one produced the data. The stage is pure and idempotent: it
//! neither reorders nor drops candidates (rejection belongs to
//! [`crate::pipeline::materialize`]).

use crate::model::{MedicineCandidate, TimeSlot, ValidatedMedicine, PLACEHOLDER};

/// Normalise every candidate, preserving order.
pub fn normalize(candidates: &[MedicineCandidate]) -> Vec<ValidatedMedicine> {
    candidates.iter().map(normalize_one).collect()
}

/// Normalise one candidate.
///
/// Missing textual fields become `"N/A"`. Timings are filtered to the four
/// canonical slots (first occurrence wins) and default to `[morning]` when
/// nothing valid survives.
pub fn normalize_one(candidate: &MedicineCandidate) -> ValidatedMedicine {
    ValidatedMedicine {
        medicine_name: or_placeholder(&candidate.medicine_name),
        dosage: or_placeholder(&candidate.dosage),
        quantity: or_placeholder(&candidate.quantity),
        frequency: or_placeholder(&candidate.frequency),
        timings: normalize_timings(&candidate.timings),
    }
}

fn or_placeholder(field: &Option<String>) -> String {
    field.clone().unwrap_or_else(|| PLACEHOLDER.to_string())
}

/// Keep valid, distinct slots in input order; never return an empty set.
pub fn normalize_timings<S: AsRef<str>>(raw: &[S]) -> Vec<TimeSlot> {
    let mut slots: Vec<TimeSlot> = Vec::with_capacity(raw.len());
    for slot in raw.iter().filter_map(|t| t.as_ref().parse::<TimeSlot>().ok()) {
        if !slots.contains(&slot) {
            slots.push(slot);
        }
    }
    if slots.is_empty() {
        slots.push(TimeSlot::Morning);
    }
    slots
}

/// Turn a validated medicine back into a candidate.
///
/// Used to check idempotence: `normalize(denormalize(normalize(x))) == normalize(x)`.
pub fn denormalize(medicine: &ValidatedMedicine) -> MedicineCandidate {
    MedicineCandidate {
        medicine_name: Some(medicine.medicine_name.clone()),
        dosage: Some(medicine.dosage.clone()),
        quantity: Some(medicine.quantity.clone()),
        frequency: Some(medicine.frequency.clone()),
        timings: medicine.timings.iter().map(|t| t.as_str().to_string()).collect(),
    }
}
