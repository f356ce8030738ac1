//! Rule-based extraction: a deterministic, offline prescription parser.
//!
//! Each line of recognized text is filtered and pattern-matched on its own:
//!
//! ```text
//! line ─▶ trim/strip markup ─▶ noise filters ─▶ dosage pattern ─▶ name check ─▶ frequency
//!          (short lines out)    (keywords,        (name + number     (stoplist)    inference
//!                                 dates, phones)     + unit)
//! ```
//!
//! Accepted lines become [`MedicineCandidate`]s; the final list is
//! deduplicated by exact medicine name, keeping the first occurrence.
//!
//! ## Frequency precedence
//!
//! 1. Compact `N dd` counts (`2 dd` → twice).
//! 2. Keyword families (thrice/tid/3x, twice/bid/2x, four times/qid/4x,
//!    once/qd/daily/1x). Checked after `dd`, so a keyword always wins.
//! 3. Meal relation (before/after meals) only refines a thrice frequency.
//!
//! With no signal at all the default is once a day in the morning.

use crate::model::{MedicineCandidate, TimeSlot};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

const MIN_LINE_LEN: usize = 3;
const MIN_NAME_LEN: usize = 3;

/// Administrative terms that mark header/footer lines, matched as
/// case-insensitive substrings.
const NOISE_KEYWORDS: &[&str] = &[
    "doctor",
    "dr.",
    "patient",
    "clinic",
    "hospital",
    "address",
    "signature",
    "sign:",
    "age:",
    "age/",
    "sex:",
    "gender",
    "phone",
    "tel.",
    "tel:",
    "mobile",
    "email",
    "e-mail",
    "reg. no",
    "reg no",
    "registration",
    "diagnosis",
    "date:",
    "follow up",
    "follow-up",
    "www.",
    "http",
    "pincode",
    "pin code",
    "mbbs",
    "name:",
    "weight:",
];

/// Words the dosage pattern can capture as a "name" that are never medicines.
const NAME_STOPLIST: &[&str] = &[
    "age", "tel", "phone", "address", "date", "street", "the", "and", "for",
];

const UNIT_ALTERNATION: &str =
    r"mcg|mg|ml|gm|g|iu|tablets?|tabs?|capsules?|caps?|units?";

static RE_ENUMERATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-•]|\d{1,2}[.)])\s*").unwrap());

static RE_NUMERIC_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\d\s\p{P}\p{S}]+$").unwrap());

static RE_LONG_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{3,}").unwrap());

static RE_UNIT_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)^(?:\.\d+)?\s*(?:{UNIT_ALTERNATION})\b")).unwrap()
});

static RE_MEDICINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^(?:(?:tab|tablet|cap|capsule|syp|syrup|inj|injection)s?\.?\s+)?([a-z][a-z\-]*(?:\s+[a-z][a-z\-]*)*)\s*(\d+(?:\.\d+)?)\s*({UNIT_ALTERNATION})\b"
    ))
    .unwrap()
});

static RE_DD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b([1-4])\s*dd\b").unwrap());

static RE_THRICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:thrice|three\s+times|t\.?i\.?d|3\s*x|3\s+times)\b").unwrap()
});
static RE_TWICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:twice|two\s+times|b\.?i\.?d|bd|2\s*x|2\s+times)\b").unwrap()
});
static RE_FOUR_TIMES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:four\s+times|q\.?i\.?d|4\s*x|4\s+times)\b").unwrap()
});
static RE_ONCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:once|q\.?d|od|daily|1\s*x|1\s+time)\b").unwrap()
});

static RE_BEFORE_MEAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbefore\s+(?:meals?|food)\b").unwrap());
static RE_AFTER_MEAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bafter\s+(?:meals?|food)\b").unwrap());

/// Why a line produced no candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooShort,
    Noise,
    NumericOnly,
    BareNumber,
    NoDosage,
    StopWord,
}

/// Dosing frequency inferred from a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Once,
    Twice,
    Thrice,
    FourTimes,
}

impl Frequency {
    fn from_count(n: u8) -> Option<Self> {
        match n {
            1 => Some(Frequency::Once),
            2 => Some(Frequency::Twice),
            3 => Some(Frequency::Thrice),
            4 => Some(Frequency::FourTimes),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Frequency::Once => "once a day",
            Frequency::Twice => "twice a day",
            Frequency::Thrice => "thrice a day",
            Frequency::FourTimes => "four times a day",
        }
    }

    pub fn slots(&self) -> Vec<TimeSlot> {
        match self {
            Frequency::Once => vec![TimeSlot::Morning],
            Frequency::Twice => vec![TimeSlot::Morning, TimeSlot::Evening],
            Frequency::Thrice => vec![TimeSlot::Morning, TimeSlot::Afternoon, TimeSlot::Evening],
            Frequency::FourTimes => TimeSlot::ALL.to_vec(),
        }
    }
}

/// Parse recognized text into deduplicated candidates.
pub fn parse_prescription(text: &str) -> Vec<MedicineCandidate> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates = Vec::new();

    for raw in text.lines() {
        match parse_line(raw) {
            Ok(candidate) => {
                let name = candidate.medicine_name.clone().unwrap_or_default();
                if seen.insert(name.clone()) {
                    candidates.push(candidate);
                } else {
                    debug!("Rules: duplicate medicine '{}' dropped", name);
                }
            }
            Err(reason) => {
                if reason != Rejection::TooShort {
                    debug!("Rules: line {:?} rejected ({:?})", raw.trim(), reason);
                }
            }
        }
    }

    debug!("Rules: {} candidates", candidates.len());
    candidates
}

/// Parse a single line, reporting why it was rejected.
pub fn parse_line(raw: &str) -> Result<MedicineCandidate, Rejection> {
    let trimmed = raw.trim();
    if trimmed.chars().count() < MIN_LINE_LEN {
        return Err(Rejection::TooShort);
    }

    let line = strip_markup(trimmed);
    if line.chars().count() < MIN_LINE_LEN {
        return Err(Rejection::TooShort);
    }

    let lower = line.to_lowercase();
    if NOISE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Err(Rejection::Noise);
    }
    if RE_NUMERIC_ONLY.is_match(&line) {
        return Err(Rejection::NumericOnly);
    }
    if has_bare_long_number(&line) {
        return Err(Rejection::BareNumber);
    }

    let caps = RE_MEDICINE.captures(&line).ok_or(Rejection::NoDosage)?;
    let name = caps[1].trim().to_string();
    if name.chars().count() < MIN_NAME_LEN || NAME_STOPLIST.contains(&name.to_lowercase().as_str())
    {
        return Err(Rejection::StopWord);
    }
    let dosage = format_dosage(&caps[2], &caps[3]);

    let rest_start = caps.get(0).map(|m| m.end()).unwrap_or(line.len());
    let (frequency, timings) = infer_schedule(&line[rest_start..]);

    Ok(MedicineCandidate {
        medicine_name: Some(name),
        dosage: Some(dosage),
        quantity: Some("As prescribed".to_string()),
        frequency: Some(frequency),
        timings: timings.iter().map(|t| t.as_str().to_string()).collect(),
    })
}

/// Remove markdown emphasis/heading markers and list bullets.
fn strip_markup(line: &str) -> String {
    let stripped: String = line.chars().filter(|c| *c != '*' && *c != '#').collect();
    RE_ENUMERATOR.replace(stripped.trim(), "").trim().to_string()
}

/// A 3+ digit run not followed by a dosage unit (phone numbers, PIN codes).
fn has_bare_long_number(line: &str) -> bool {
    RE_LONG_DIGITS
        .find_iter(line)
        .any(|m| !RE_UNIT_PREFIX.is_match(&line[m.end()..]))
}

/// Mass/volume units attach to the number ("500mg"); count units are spaced
/// ("1 tablet").
fn format_dosage(amount: &str, unit: &str) -> String {
    let unit = unit.to_lowercase();
    match unit.as_str() {
        "mcg" | "mg" | "ml" | "gm" | "g" | "iu" => format!("{amount}{unit}"),
        _ => format!("{amount} {unit}"),
    }
}

/// Infer frequency label and time slots from the text after the dosage.
pub fn infer_schedule(rest: &str) -> (String, Vec<TimeSlot>) {
    let mut frequency = RE_DD
        .captures(rest)
        .and_then(|c| c[1].parse::<u8>().ok())
        .and_then(Frequency::from_count);

    let keyword = if RE_THRICE.is_match(rest) {
        Some(Frequency::Thrice)
    } else if RE_TWICE.is_match(rest) {
        Some(Frequency::Twice)
    } else if RE_FOUR_TIMES.is_match(rest) {
        Some(Frequency::FourTimes)
    } else if RE_ONCE.is_match(rest) {
        Some(Frequency::Once)
    } else {
        None
    };
    if keyword.is_some() {
        frequency = keyword;
    }

    let frequency = frequency.unwrap_or(Frequency::Once);
    let mut label = frequency.label().to_string();
    if frequency == Frequency::Thrice {
        if RE_BEFORE_MEAL.is_match(rest) {
            label.push_str(" before meals");
        } else if RE_AFTER_MEAL.is_match(rest) {
            label.push_str(" after meals");
        }
    }

    (label, frequency.slots())
}
