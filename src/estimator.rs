use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Share of the final mark already earned through continuous assessment.
const COURSEWORK_WEIGHT: f64 = 60.0;
/// Points available on the final exam before the simulated shortfall.
const EXAM_POINTS: f64 = 40.0;
/// Widest error range accepted; each integer in the range gets a weight.
pub const MAX_RANGE_WIDTH: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EstimateError {
    #[error("error range is inverted: min {min} > max {max}")]
    InvertedRange { min: i64, max: i64 },
    #[error("error range {min}..={max} is wider than {}", MAX_RANGE_WIDTH)]
    RangeTooWide { min: i64, max: i64 },
}

#[derive(Debug, Deserialize)]
pub struct RawErrorRange {
    #[serde(default)]
    min: i64,
    #[serde(default)]
    max: i64,
}

/// Inclusive `[min, max]` bound of the simulated exam-day shortfall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawErrorRange")]
pub struct ErrorRange {
    min: i64,
    max: i64,
}

impl TryFrom<RawErrorRange> for ErrorRange {
    type Error = EstimateError;

    fn try_from(raw: RawErrorRange) -> Result<Self, Self::Error> {
        ErrorRange::new(raw.min, raw.max)
    }
}

impl ErrorRange {
    pub fn new(min: i64, max: i64) -> Result<Self, EstimateError> {
        if min > max {
            return Err(EstimateError::InvertedRange { min, max });
        }
        if max.saturating_sub(min) > MAX_RANGE_WIDTH {
            return Err(EstimateError::RangeTooWide { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    fn width(&self) -> i64 {
        self.max - self.min
    }
}

/// Normalized sampling weights for every integer in the range, `min` first.
///
/// Subjects with more credit hours than half the range width lean toward
/// `min`; lighter subjects lean toward `max`.
pub fn sample_weights(range: ErrorRange, hours: f64) -> Vec<f64> {
    let favour_min = hours > range.width() as f64 / 2.0;
    let raw: Vec<f64> = (range.min..=range.max)
        .map(|i| {
            let distance = if favour_min {
                (i - range.min).abs()
            } else {
                (range.max - i).abs()
            };
            1.0 / (distance as f64 + 1.0)
        })
        .collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

/// Inverse-CDF pick for a uniform draw in `[0, 1)`.
pub fn weighted_choice(range: ErrorRange, weights: &[f64], draw: f64) -> i64 {
    let mut cumulative = 0.0;
    for (i, w) in (range.min..=range.max).zip(weights) {
        cumulative += w;
        if draw < cumulative {
            return i;
        }
    }
    // Rounding can leave the final cumulative weight a hair under 1.0.
    range.max
}

pub fn estimate<R: Rng>(range: ErrorRange, hours: f64, mark: f64, rng: &mut R) -> f64 {
    let weights = sample_weights(range, hours);
    let shortfall = weighted_choice(range, &weights, rng.random::<f64>());
    COURSEWORK_WEIGHT * (mark / 100.0) + (EXAM_POINTS - shortfall as f64)
}

/// One row of the calculator. Marks and hours arrive as typed by the user,
/// so they may be numbers, numeric strings, or junk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub marks: serde_json::Value,
    #[serde(default)]
    pub hours: serde_json::Value,
}

impl SubjectEntry {
    pub fn new(name: &str, marks: serde_json::Value, hours: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            marks,
            hours,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    InvalidMarks,
    InvalidHours,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcludedSubject {
    pub name: String,
    pub reason: Exclusion,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaReport {
    pub gpa: f64,
    pub estimated_gpa: f64,
    pub gpa_display: String,
    pub estimated_gpa_display: String,
    pub total_hours: f64,
    pub included: Vec<String>,
    pub excluded: Vec<ExcludedSubject>,
}

fn parse_number(v: &serde_json::Value) -> Option<f64> {
    let n = match v {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

pub fn parse_marks(v: &serde_json::Value) -> Option<f64> {
    parse_number(v).filter(|m| (0.0..=100.0).contains(m))
}

pub fn parse_hours(v: &serde_json::Value) -> Option<f64> {
    parse_number(v).filter(|h| *h > 0.0)
}

/// Hours-weighted average of raw marks and of estimated finals.
///
/// Rows with unusable marks or hours drop out of both numerator and
/// denominator.
pub fn weighted_gpa<R: Rng>(subjects: &[SubjectEntry], range: ErrorRange, rng: &mut R) -> GpaReport {
    let mut total_marks = 0.0;
    let mut total_estimated = 0.0;
    let mut total_hours = 0.0;
    let mut included = Vec::new();
    let mut excluded = Vec::new();

    for s in subjects {
        let Some(marks) = parse_marks(&s.marks) else {
            excluded.push(ExcludedSubject {
                name: s.name.clone(),
                reason: Exclusion::InvalidMarks,
            });
            continue;
        };
        let Some(hours) = parse_hours(&s.hours) else {
            excluded.push(ExcludedSubject {
                name: s.name.clone(),
                reason: Exclusion::InvalidHours,
            });
            continue;
        };
        total_marks += marks * hours;
        total_estimated += estimate(range, hours, marks, rng) * hours;
        total_hours += hours;
        included.push(s.name.clone());
    }

    let (gpa, estimated_gpa) = if total_hours > 0.0 {
        (total_marks / total_hours, total_estimated / total_hours)
    } else {
        (0.0, 0.0)
    };

    GpaReport {
        gpa,
        estimated_gpa,
        gpa_display: format!("{gpa:.2}"),
        estimated_gpa_display: format!("{estimated_gpa:.2}"),
        total_hours,
        included,
        excluded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0x5eed)
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert_eq!(
            ErrorRange::new(5, 2),
            Err(EstimateError::InvertedRange { min: 5, max: 2 })
        );
        let parsed: Result<ErrorRange, _> = serde_json::from_value(json!({ "min": 3, "max": 1 }));
        assert!(parsed.is_err());
        let parsed: ErrorRange = serde_json::from_value(json!({})).unwrap();
        assert_eq!(parsed, ErrorRange::default());
    }

    #[test]
    fn degenerate_range_is_deterministic() {
        let range = ErrorRange::new(7, 7).unwrap();
        let mut r = rng();
        for _ in 0..50 {
            let v = estimate(range, 4.0, 85.0, &mut r);
            assert!((v - (60.0 * 0.85 + 33.0)).abs() < 1e-9);
        }
    }

    #[test]
    fn estimate_stays_within_bounds() {
        let mut r = rng();
        for (min, max) in [(0, 10), (-3, 4), (2, 2), (0, 40)] {
            let range = ErrorRange::new(min, max).unwrap();
            for mark in [0.0, 37.5, 100.0] {
                for hours in [1.0, 4.0, 8.0, 30.0] {
                    let v = estimate(range, hours, mark, &mut r);
                    let base = 60.0 * (mark / 100.0);
                    assert!(v >= base + (40 - max) as f64 - 1e-9);
                    assert!(v <= base + (40 - min) as f64 + 1e-9);
                }
            }
        }
    }

    #[test]
    fn weights_lean_by_hours() {
        let range = ErrorRange::new(0, 4).unwrap();
        // width/2 = 2: more hours favour min.
        let heavy = sample_weights(range, 3.0);
        assert!(heavy[0] > heavy[4]);
        let light = sample_weights(range, 2.0);
        assert!(light[4] > light[0]);
        let total: f64 = heavy.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!((heavy[0] - 1.0 / (1.0 + 0.5 + 1.0 / 3.0 + 0.25 + 0.2)).abs() < 1e-12);
    }

    #[test]
    fn weighted_choice_walks_cdf() {
        let range = ErrorRange::new(0, 2).unwrap();
        let w = [0.5, 0.3, 0.2];
        assert_eq!(weighted_choice(range, &w, 0.0), 0);
        assert_eq!(weighted_choice(range, &w, 0.49), 0);
        assert_eq!(weighted_choice(range, &w, 0.5), 1);
        assert_eq!(weighted_choice(range, &w, 0.85), 2);
        // Short weights fall back to max.
        assert_eq!(weighted_choice(range, &[0.1, 0.1, 0.1], 0.99), 2);
    }

    #[test]
    fn invalid_rows_are_excluded_from_both_sums() {
        let subjects = vec![
            SubjectEntry::new("Broken", json!("abc"), json!(4)),
            SubjectEntry::new("Math", json!(80), json!(2)),
        ];
        let report = weighted_gpa(&subjects, ErrorRange::default(), &mut rng());
        assert_eq!(report.gpa_display, "80.00");
        assert_eq!(report.total_hours, 2.0);
        assert_eq!(report.included, vec!["Math".to_string()]);
        assert_eq!(report.excluded[0].reason, Exclusion::InvalidMarks);
        // Zero-width range: 60% of 80 plus the full 40 exam points.
        assert_eq!(report.estimated_gpa_display, "88.00");
    }

    #[test]
    fn string_inputs_and_bad_hours() {
        let subjects = vec![
            SubjectEntry::new("A", json!(" 90 "), json!("4")),
            SubjectEntry::new("B", json!(70), json!(0)),
            SubjectEntry::new("C", json!(null), json!(2)),
            SubjectEntry::new("D", json!(120), json!(2)),
            SubjectEntry::new("E", json!(60), json!("")),
        ];
        let report = weighted_gpa(&subjects, ErrorRange::default(), &mut rng());
        assert_eq!(report.included, vec!["A".to_string()]);
        assert_eq!(report.gpa, 90.0);
        assert_eq!(report.excluded.len(), 4);
        assert_eq!(report.excluded[0].reason, Exclusion::InvalidHours);
    }

    #[test]
    fn gpa_ignores_subject_order() {
        let a = vec![
            SubjectEntry::new("Math", json!(91), json!(5)),
            SubjectEntry::new("English", json!(77), json!(8)),
            SubjectEntry::new("Islam", json!(64), json!(1)),
        ];
        let mut b = a.clone();
        b.reverse();
        let ra = weighted_gpa(&a, ErrorRange::default(), &mut rng());
        let rb = weighted_gpa(&b, ErrorRange::default(), &mut rng());
        assert!((ra.gpa - rb.gpa).abs() < 1e-9);
        assert!((ra.estimated_gpa - rb.estimated_gpa).abs() < 1e-9);
    }

    #[test]
    fn empty_input_reports_zero() {
        let report = weighted_gpa(&[], ErrorRange::default(), &mut rng());
        assert_eq!(report.gpa, 0.0);
        assert_eq!(report.gpa_display, "0.00");
    }

    #[test]
    fn seeded_runs_repeat() {
        let range = ErrorRange::new(0, 12).unwrap();
        let a = estimate(range, 2.0, 75.0, &mut StdRng::seed_from_u64(9));
        let b = estimate(range, 2.0, 75.0, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }
}
