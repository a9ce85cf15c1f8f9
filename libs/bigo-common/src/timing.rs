/// Timing Extraction - Markers to Complexity Class
///
/// **Core Responsibility:**
/// Instrumented programs print three markers, one per input size
/// (1000/2000/4000, i.e. doubling). Two wire formats exist:
///
/// - `SMALL_TIME=<µs>` / `MEDIUM_TIME=` / `LARGE_TIME=` (boilerplate mode)
/// - `SMALL: <s>` / `MEDIUM:` / `LARGE:` (signature-cache mode)
///
/// Both are normalized to microseconds.

use serde::Serialize;
use std::fmt;

/// Smallest reported sample (µs); sub-resolution timings are not zero
pub const MIN_SAMPLE_US: f64 = 1.0;

/// Which marker form a program was instrumented with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerFormat {
    /// `KEY_TIME=value`, microseconds
    Assignment,
    /// `KEY: value`, seconds
    Labeled,
}

impl MarkerFormat {
    fn keys(&self) -> [&'static str; 3] {
        match self {
            MarkerFormat::Assignment => ["SMALL_TIME=", "MEDIUM_TIME=", "LARGE_TIME="],
            MarkerFormat::Labeled => ["SMALL:", "MEDIUM:", "LARGE:"],
        }
    }

    fn to_micros(&self, value: f64) -> f64 {
        match self {
            MarkerFormat::Assignment => value,
            MarkerFormat::Labeled => value * 1_000_000.0,
        }
    }
}

/// Three clamped samples, microseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParsedTiming {
    pub small: f64,
    pub medium: f64,
    pub large: f64,
}

impl ParsedTiming {
    pub fn ratio1(&self) -> f64 {
        self.medium / self.small
    }

    pub fn ratio2(&self) -> f64 {
        self.large / self.medium
    }
}

/// Values found before parsing gave up
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedTimings {
    pub small: Option<f64>,
    pub medium: Option<f64>,
    pub large: Option<f64>,
}

/// Raised when any marker is absent or not a number; carries raw stdout
#[derive(Debug, Clone, PartialEq)]
pub struct TimingParseError {
    pub missing: Vec<&'static str>,
    pub extracted: ExtractedTimings,
    pub stdout: String,
}

impl fmt::Display for TimingParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let extracted = serde_json::to_string(&self.extracted).unwrap_or_default();
        write!(
            f,
            "Failed to parse fully expected timing outputs. Missing: {}. Extracted: {}\nStdout:\n{}",
            self.missing.join(", "),
            extracted,
            self.stdout
        )
    }
}

impl std::error::Error for TimingParseError {}

/// Extract the three markers, ignoring every other line
pub fn parse_timings(stdout: &str, format: MarkerFormat) -> Result<ParsedTiming, TimingParseError> {
    let keys = format.keys();
    let mut found = [None; 3];

    for line in stdout.lines() {
        let line = line.trim();
        for (slot, key) in found.iter_mut().zip(keys.iter()) {
            if let Some(rest) = line.strip_prefix(key) {
                if let Ok(value) = rest.trim().parse::<f64>() {
                    if value.is_finite() {
                        *slot = Some(format.to_micros(value));
                    }
                }
            }
        }
    }

    match found {
        [Some(small), Some(medium), Some(large)] => Ok(ParsedTiming {
            small: small.max(MIN_SAMPLE_US),
            medium: medium.max(MIN_SAMPLE_US),
            large: large.max(MIN_SAMPLE_US),
        }),
        [small, medium, large] => {
            let missing = keys
                .iter()
                .zip(found.iter())
                .filter(|(_, v)| v.is_none())
                .map(|(k, _)| k.trim_end_matches(['=', ':']))
                .collect();
            Err(TimingParseError {
                missing,
                extracted: ExtractedTimings { small, medium, large },
                stdout: stdout.to_string(),
            })
        }
    }
}

/// Coarse asymptotic class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComplexityClass {
    Constant,
    /// O(n) and O(n log n) are indistinguishable by doubling ratios
    Linear,
    Quadratic,
    Cubic,
    Exponential,
}

impl ComplexityClass {
    pub fn label(&self) -> &'static str {
        match self {
            ComplexityClass::Constant => "O(1)",
            ComplexityClass::Linear => "O(n) or O(n log n)",
            ComplexityClass::Quadratic => "O(n^2)",
            ComplexityClass::Cubic => "O(n^3)",
            ComplexityClass::Exponential => "O(2^n) or worse",
        }
    }

    /// Classify an averaged doubling ratio; upper bounds are inclusive
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio <= 1.5 {
            ComplexityClass::Constant
        } else if ratio <= 3.0 {
            ComplexityClass::Linear
        } else if ratio <= 6.0 {
            ComplexityClass::Quadratic
        } else if ratio <= 12.0 {
            ComplexityClass::Cubic
        } else {
            ComplexityClass::Exponential
        }
    }
}

impl fmt::Display for ComplexityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Weighted doubling ratio; the large-input transition carries more weight
/// because fixed overhead distorts it less
pub fn weighted_ratio(small: f64, medium: f64, large: f64) -> f64 {
    let small = small.max(MIN_SAMPLE_US);
    let medium = medium.max(MIN_SAMPLE_US);
    let large = large.max(MIN_SAMPLE_US);
    let ratio1 = medium / small;
    let ratio2 = large / medium;
    ratio1 * 0.4 + ratio2 * 0.6
}

pub fn estimate_complexity(small: f64, medium: f64, large: f64) -> ComplexityClass {
    ComplexityClass::from_ratio(weighted_ratio(small, medium, large))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment_markers_with_noise() {
        let stdout = "warming up\nSMALL_TIME=100\nresult 42\n  MEDIUM_TIME=200  \nLARGE_TIME=400\ndone";
        let timing = parse_timings(stdout, MarkerFormat::Assignment).unwrap();
        assert_eq!(
            timing,
            ParsedTiming {
                small: 100.0,
                medium: 200.0,
                large: 400.0
            }
        );
        assert_eq!(timing.ratio1(), 2.0);
        assert_eq!(timing.ratio2(), 2.0);
    }

    #[test]
    fn test_parse_labeled_markers_converts_seconds() {
        let stdout = "SMALL: 0.001000\nMEDIUM: 0.002000\nLARGE: 0.004000\n";
        let timing = parse_timings(stdout, MarkerFormat::Labeled).unwrap();
        assert!((timing.small - 1_000.0).abs() < 1e-6);
        assert!((timing.medium - 2_000.0).abs() < 1e-6);
        assert!((timing.large - 4_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_clamps_zero_samples() {
        let stdout = "SMALL_TIME=0\nMEDIUM_TIME=0\nLARGE_TIME=0.2";
        let timing = parse_timings(stdout, MarkerFormat::Assignment).unwrap();
        assert_eq!(timing.small, 1.0);
        assert_eq!(timing.medium, 1.0);
        assert_eq!(timing.large, 1.0);
    }

    #[test]
    fn test_parse_missing_marker_names_it() {
        let stdout = "SMALL_TIME=100\nLARGE_TIME=400";
        let err = parse_timings(stdout, MarkerFormat::Assignment).unwrap_err();
        assert_eq!(err.missing, vec!["MEDIUM_TIME"]);
        assert_eq!(err.extracted.small, Some(100.0));
        assert_eq!(err.extracted.medium, None);
        assert_eq!(err.stdout, stdout);

        let message = err.to_string();
        assert!(message.starts_with("Failed to parse fully expected timing outputs"));
        assert!(message.contains("MEDIUM_TIME"));
        assert!(message.contains("SMALL_TIME=100"));
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        let stdout = "SMALL: fast\nMEDIUM: 0.2\nLARGE: 0.4";
        let err = parse_timings(stdout, MarkerFormat::Labeled).unwrap_err();
        assert_eq!(err.missing, vec!["SMALL"]);
    }

    #[test]
    fn test_formats_do_not_cross_parse() {
        let stdout = "SMALL_TIME=1\nMEDIUM_TIME=2\nLARGE_TIME=4";
        let err = parse_timings(stdout, MarkerFormat::Labeled).unwrap_err();
        assert_eq!(err.missing.len(), 3);
    }

    #[test]
    fn test_parse_syntax_error_output() {
        let err = parse_timings("syntax error on line 1", MarkerFormat::Assignment).unwrap_err();
        assert_eq!(err.missing, vec!["SMALL_TIME", "MEDIUM_TIME", "LARGE_TIME"]);
    }

    #[test]
    fn test_classification_examples() {
        assert_eq!(estimate_complexity(1.0, 2.0, 4.0), ComplexityClass::Linear);
        assert_eq!(estimate_complexity(1.0, 1.0, 1.0), ComplexityClass::Constant);
        assert_eq!(estimate_complexity(1.0, 4.0, 16.0), ComplexityClass::Quadratic);
        assert_eq!(estimate_complexity(1.0, 8.0, 64.0), ComplexityClass::Cubic);
        assert_eq!(estimate_complexity(1.0, 30.0, 900.0), ComplexityClass::Exponential);
        assert_eq!(estimate_complexity(100.0, 200.0, 400.0).label(), "O(n) or O(n log n)");
    }

    #[test]
    fn test_classification_clamps_zero_inputs() {
        let class = estimate_complexity(0.0, 0.0, 0.0);
        assert_eq!(class, ComplexityClass::Constant);
        assert!(weighted_ratio(0.0, 0.0, 0.0).is_finite());
    }

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(ComplexityClass::from_ratio(0.5), ComplexityClass::Constant);
        assert_eq!(ComplexityClass::from_ratio(1.0), ComplexityClass::Constant);
        assert_eq!(ComplexityClass::from_ratio(1.5), ComplexityClass::Constant);
        assert_eq!(ComplexityClass::from_ratio(1.51), ComplexityClass::Linear);
        assert_eq!(ComplexityClass::from_ratio(3.0), ComplexityClass::Linear);
        assert_eq!(ComplexityClass::from_ratio(3.01), ComplexityClass::Quadratic);
        assert_eq!(ComplexityClass::from_ratio(6.0), ComplexityClass::Quadratic);
        assert_eq!(ComplexityClass::from_ratio(12.0), ComplexityClass::Cubic);
        assert_eq!(ComplexityClass::from_ratio(12.01), ComplexityClass::Exponential);
    }

    #[test]
    fn test_buckets_are_monotonic() {
        let order = |c: ComplexityClass| match c {
            ComplexityClass::Constant => 0,
            ComplexityClass::Linear => 1,
            ComplexityClass::Quadratic => 2,
            ComplexityClass::Cubic => 3,
            ComplexityClass::Exponential => 4,
        };
        let mut previous = 0;
        for step in 1..400 {
            let ratio = step as f64 * 0.05;
            let current = order(ComplexityClass::from_ratio(ratio));
            assert!(current >= previous, "ratio {} went backwards", ratio);
            previous = current;
        }
    }
}
