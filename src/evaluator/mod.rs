//! Expectation evaluation
//!
//! Compares an [`Observation`] against its [`Expectation`]:
//!
//! - disabled expectations pass and are marked skipped; they are never
//!   extracted, so they carry no observation
//! - numeric: `|mean - nominal| <= deviation`
//! - exact: the observed string equals the nominal string
//! - numeric against exact (or the reverse) fails as a kind mismatch

pub mod expectation;

pub use expectation::{Expectation, ExpectationTable, ExpectedValue};

use serde::{Deserialize, Serialize};

use crate::stats::Observation;

/// Why a verdict passed or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    WithinDeviation,
    OutsideDeviation,
    ExactMatch,
    ExactMismatch,
    KindMismatch,
    Disabled,
}

impl std::fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            VerdictReason::WithinDeviation => "within deviation",
            VerdictReason::OutsideDeviation => "outside deviation",
            VerdictReason::ExactMatch => "exact match",
            VerdictReason::ExactMismatch => "exact mismatch",
            VerdictReason::KindMismatch => "kind mismatch",
            VerdictReason::Disabled => "skipped: disabled",
        };
        f.write_str(text)
    }
}

/// Outcome of comparing one measurement with its expectation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub test_name: String,
    pub measurement_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<Observation>,
    pub expectation: Expectation,
    passed: bool,
    pub reason: VerdictReason,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn is_skipped(&self) -> bool {
        self.reason == VerdictReason::Disabled
    }
}

/// Evaluate an observation against an expectation
pub fn evaluate(test_name: &str, observed: Observation, expectation: &Expectation) -> Verdict {
    let (passed, reason) = judge(&observed, expectation);
    Verdict {
        test_name: test_name.to_string(),
        measurement_name: expectation.name.clone(),
        observed: Some(observed),
        expectation: expectation.clone(),
        passed,
        reason,
    }
}

/// Passing verdict for a disabled expectation that was not measured
pub fn skip_disabled(test_name: &str, expectation: &Expectation) -> Verdict {
    Verdict {
        test_name: test_name.to_string(),
        measurement_name: expectation.name.clone(),
        observed: None,
        expectation: expectation.clone(),
        passed: true,
        reason: VerdictReason::Disabled,
    }
}

fn judge(observed: &Observation, expectation: &Expectation) -> (bool, VerdictReason) {
    if !expectation.enabled {
        return (true, VerdictReason::Disabled);
    }
    match (observed, &expectation.nominal) {
        (Observation::Summary(s), ExpectedValue::Numeric(nominal)) => {
            if (s.mean - nominal).abs() <= expectation.deviation {
                (true, VerdictReason::WithinDeviation)
            } else {
                (false, VerdictReason::OutsideDeviation)
            }
        }
        (Observation::Exact(e), ExpectedValue::Exact(nominal)) => {
            if e.is_consistent() && &e.value == nominal {
                (true, VerdictReason::ExactMatch)
            } else {
                (false, VerdictReason::ExactMismatch)
            }
        }
        (Observation::Summary(_), ExpectedValue::Exact(_))
        | (Observation::Exact(_), ExpectedValue::Numeric(_)) => {
            (false, VerdictReason::KindMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{aggregate, aggregate_exact};

    fn summary(mean: f64) -> Observation {
        Observation::Summary(aggregate("m", &[mean]).unwrap())
    }

    fn exact(value: &str) -> Observation {
        Observation::Exact(aggregate_exact("m", &[value.to_string()]).unwrap())
    }

    #[test]
    fn test_deviation_boundary_is_inclusive() {
        let e = Expectation::numeric("m", 2.5, 0.5);
        assert!(evaluate("t", summary(3.0), &e).passed());
        assert!(evaluate("t", summary(2.0), &e).passed());
        let v = evaluate("t", summary(3.01), &e);
        assert!(!v.passed());
        assert_eq!(v.reason, VerdictReason::OutsideDeviation);
    }

    #[test]
    fn test_zero_deviation() {
        let e = Expectation::numeric("m", 1.0, 0.0);
        assert!(evaluate("t", summary(1.0), &e).passed());
        assert!(!evaluate("t", summary(1.0000001), &e).passed());
    }

    #[test]
    fn test_exact_match() {
        let e = Expectation::exact("board_ip", "192.168.1.1");
        let v = evaluate("mac", exact("192.168.1.1"), &e);
        assert!(v.passed());
        assert_eq!(v.reason, VerdictReason::ExactMatch);
        assert_eq!(v.test_name, "mac");
        assert_eq!(v.measurement_name, "board_ip");

        assert!(!evaluate("mac", exact("192.168.1.2"), &e).passed());
    }

    #[test]
    fn test_inconsistent_exact_fails() {
        let e = Expectation::exact("m", "a");
        let obs = aggregate_exact("m", &["a".to_string(), "b".to_string()]).unwrap();
        assert!(!evaluate("t", Observation::Exact(obs), &e).passed());
    }

    #[test]
    fn test_kind_mismatch() {
        let v = evaluate("t", summary(42.0), &Expectation::exact("m", "42"));
        assert!(!v.passed());
        assert_eq!(v.reason.to_string(), "kind mismatch");

        let v = evaluate("t", exact("x"), &Expectation::numeric("m", 1.0, 1.0));
        assert_eq!(v.reason, VerdictReason::KindMismatch);
    }

    #[test]
    fn test_disabled_is_skipped() {
        let e = Expectation::numeric("m", 100.0, 0.0).disabled();
        let v = evaluate("t", summary(0.0), &e);
        assert!(v.passed());
        assert!(v.is_skipped());
        assert_eq!(v.reason.to_string(), "skipped: disabled");
    }

    #[test]
    fn test_skip_disabled_has_no_observation() {
        let e = Expectation::exact("ph_dest_mac", "ff:ff:ff:ff:ff:ff").disabled();
        let v = skip_disabled("mac", &e);
        assert!(v.passed());
        assert!(v.is_skipped());
        assert!(v.observed.is_none());
        assert_eq!(v.measurement_name, "ph_dest_mac");
    }
}
