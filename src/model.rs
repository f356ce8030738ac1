//! Data model shared by every pipeline stage.
//!
//! ```text
//! RecognizedText ─▶ MedicineCandidate ─▶ ValidatedMedicine ─▶ ScheduleRecord
//!    (String)         (raw, optional)      (contract-checked)    (persisted)
//! ```
//!
//! Candidates keep their timings as raw strings because model output may
//! contain anything; only [`ValidatedMedicine`] and [`ScheduleRecord`] carry
//! the closed [`TimeSlot`] enumeration.

use crate::error::MalformedExtraction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Raw text returned by the recognition stage.
pub type RecognizedText = String;

/// Placeholder substituted for any missing textual field.
pub const PLACEHOLDER: &str = "N/A";

/// One of the four canonical times of day a dose may be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSlot {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeSlot {
    pub const ALL: [TimeSlot; 4] = [
        TimeSlot::Morning,
        TimeSlot::Afternoon,
        TimeSlot::Evening,
        TimeSlot::Night,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeSlot::Morning => "morning",
            TimeSlot::Afternoon => "afternoon",
            TimeSlot::Evening => "evening",
            TimeSlot::Night => "night",
        }
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeSlot {
    type Err = String;

    /// Case- and whitespace-insensitive; anything outside the four slots is
    /// rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "morning" => Ok(TimeSlot::Morning),
            "afternoon" => Ok(TimeSlot::Afternoon),
            "evening" => Ok(TimeSlot::Evening),
            "night" => Ok(TimeSlot::Night),
            other => Err(format!("not a time slot: {other:?}")),
        }
    }
}

/// An extracted medicine entry before validation.
///
/// Produced by either extractor. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedicineCandidate {
    pub medicine_name: Option<String>,
    pub dosage: Option<String>,
    pub quantity: Option<String>,
    pub frequency: Option<String>,
    pub timings: Vec<String>,
}

impl MedicineCandidate {
    /// The entry substituted when an extractor's answer cannot be parsed.
    pub fn placeholder() -> Self {
        Self {
            medicine_name: Some("Unknown".to_string()),
            dosage: Some("As prescribed".to_string()),
            quantity: None,
            frequency: Some("Daily".to_string()),
            timings: vec![TimeSlot::Morning.as_str().to_string()],
        }
    }
}

/// A medicine entry that satisfies the output contract: every textual field
/// present and `timings` a non-empty, duplicate-free set of [`TimeSlot`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedMedicine {
    pub medicine_name: String,
    pub dosage: String,
    pub quantity: String,
    pub frequency: String,
    pub timings: Vec<TimeSlot>,
}

/// A persisted reminder schedule for one medicine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: Uuid,
    pub user_id: String,
    pub prescription_id: Uuid,
    pub medicine_name: String,
    pub dosage: String,
    pub frequency: String,
    pub timings: Vec<TimeSlot>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_reminder_sent: Option<DateTime<Utc>>,
}

impl ScheduleRecord {
    /// Build a fresh, enabled schedule for `medicine`.
    pub fn new(prescription_id: Uuid, user_id: &str, medicine: &ValidatedMedicine) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            prescription_id,
            medicine_name: medicine.medicine_name.clone(),
            dosage: medicine.dosage.clone(),
            frequency: medicine.frequency.clone(),
            timings: medicine.timings.clone(),
            enabled: true,
            created_at: Utc::now(),
            last_reminder_sent: None,
        }
    }
}

/// A persisted prescription: the raw recognized text plus the validated
/// medicine list serialised as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionRecord {
    pub id: Uuid,
    pub user_id: String,
    pub raw_text: String,
    pub structured_data: String,
    pub created_at: DateTime<Utc>,
}

impl PrescriptionRecord {
    pub fn new(
        user_id: &str,
        raw_text: &str,
        medicines: &[ValidatedMedicine],
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            raw_text: raw_text.to_string(),
            structured_data: serde_json::to_string(medicines)?,
            created_at: Utc::now(),
        })
    }

    /// Decode `structured_data` back into the medicine list.
    pub fn medicines(&self) -> Result<Vec<ValidatedMedicine>, serde_json::Error> {
        serde_json::from_str(&self.structured_data)
    }
}

/// Why a validated medicine was not turned into a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Name is empty or one of the "unknown" placeholders.
    PlaceholderName,
    /// No valid time slot survived validation.
    NoTimings,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::PlaceholderName => f.write_str("invalid medicine name"),
            SkipReason::NoTimings => f.write_str("no valid timings"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedMedicine {
    pub medicine_name: String,
    pub reason: SkipReason,
}

/// Which extractor produced the candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Generative-language service with model fallback. (default)
    #[default]
    Model,
    /// Deterministic, offline rule-based parser.
    Rules,
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStrategy::Model => f.write_str("model"),
            ExtractionStrategy::Rules => f.write_str("rules"),
        }
    }
}

/// Timing and provenance figures for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub strategy: ExtractionStrategy,
    pub recognized_chars: usize,
    pub candidate_count: usize,
    /// Model that answered (model-backed strategy only).
    pub model_used: Option<String>,
    /// Models tried, including the one that answered.
    pub model_attempts: usize,
    pub recognition_ms: u64,
    pub extraction_ms: u64,
    pub total_ms: u64,
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub prescription_id: Uuid,
    /// Created schedule ids, in medicine order.
    pub schedule_ids: Vec<Uuid>,
    /// Every validated medicine, including those that were not scheduled.
    pub medicines: Vec<ValidatedMedicine>,
    pub skipped: Vec<SkippedMedicine>,
    /// Set when the extractor's answer was unparseable and the placeholder
    /// entry was used instead.
    pub extraction_warning: Option<MalformedExtraction>,
    pub stats: PipelineStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_slot_parses_loosely() {
        assert_eq!(" Morning ".parse::<TimeSlot>(), Ok(TimeSlot::Morning));
        assert_eq!("NIGHT".parse::<TimeSlot>(), Ok(TimeSlot::Night));
        assert!("bedtime".parse::<TimeSlot>().is_err());
        assert!("".parse::<TimeSlot>().is_err());
    }

    #[test]
    fn time_slot_serialises_lowercase() {
        let json = serde_json::to_string(&TimeSlot::ALL).unwrap();
        assert_eq!(json, r#"["morning","afternoon","evening","night"]"#);
    }

    #[test]
    fn schedule_record_starts_enabled_without_reminder() {
        let med = ValidatedMedicine {
            medicine_name: "Metformin".into(),
            dosage: "500mg".into(),
            quantity: "N/A".into(),
            frequency: "twice a day".into(),
            timings: vec![TimeSlot::Morning, TimeSlot::Evening],
        };
        let pid = Uuid::new_v4();
        let rec = ScheduleRecord::new(pid, "user-1", &med);
        assert!(rec.enabled);
        assert!(rec.last_reminder_sent.is_none());
        assert_eq!(rec.prescription_id, pid);
        assert_eq!(rec.timings, med.timings);
    }

    #[test]
    fn prescription_record_round_trips_structured_data() {
        let meds = vec![ValidatedMedicine {
            medicine_name: "Paracetamol".into(),
            dosage: "650mg".into(),
            quantity: "10 tablets".into(),
            frequency: "thrice a day".into(),
            timings: vec![TimeSlot::Morning, TimeSlot::Afternoon, TimeSlot::Evening],
        }];
        let rec = PrescriptionRecord::new("u", "raw", &meds).unwrap();
        assert!(rec.structured_data.contains("\"afternoon\""));
        assert_eq!(rec.medicines().unwrap(), meds);
    }

    #[test]
    fn placeholder_candidate_shape() {
        let p = MedicineCandidate::placeholder();
        assert_eq!(p.medicine_name.as_deref(), Some("Unknown"));
        assert_eq!(p.frequency.as_deref(), Some("Daily"));
        assert_eq!(p.timings, vec!["morning"]);
        assert!(p.quantity.is_none());
    }
}
