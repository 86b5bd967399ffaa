//! Expectation table
//!
//! Loaded once from JSON and shared read-only by every test.
//!
//! ```json
//! {
//!   "hk_vals": {
//!     "v12mon": {"val": 12.0, "deviation": 0.5},
//!     "fwver":  {"val": "3v01"}
//!   },
//!   "mac": {
//!     "board_ip": {"val": "192.168.1.1", "valid": true}
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Nominal value of an expectation
///
/// A JSON string is always an exact-match value, even if it looks numeric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedValue {
    Numeric(f64),
    Exact(String),
}

impl std::fmt::Display for ExpectedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedValue::Numeric(v) => write!(f, "{}", v),
            ExpectedValue::Exact(s) => write!(f, "{:?}", s),
        }
    }
}

/// Expected value of one measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expectation {
    pub name: String,
    pub nominal: ExpectedValue,
    /// Allowed absolute deviation of the mean (numeric only)
    pub deviation: f64,
    pub enabled: bool,
}

impl Expectation {
    pub fn numeric(name: &str, nominal: f64, deviation: f64) -> Self {
        Self {
            name: name.to_string(),
            nominal: ExpectedValue::Numeric(nominal),
            deviation,
            enabled: true,
        }
    }

    pub fn exact(name: &str, nominal: &str) -> Self {
        Self {
            name: name.to_string(),
            nominal: ExpectedValue::Exact(nominal.to_string()),
            deviation: 0.0,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// On-disk form of an expectation
#[derive(Debug, Serialize, Deserialize)]
struct ExpectationEntry {
    val: ExpectedValue,
    #[serde(default)]
    deviation: f64,
    #[serde(default = "default_valid")]
    valid: bool,
}

fn default_valid() -> bool {
    true
}

/// Expectations keyed by test name, then measurement name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpectationTable {
    tests: BTreeMap<String, BTreeMap<String, Expectation>>,
}

impl ExpectationTable {
    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse from JSON, validating every entry
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let raw: BTreeMap<String, BTreeMap<String, ExpectationEntry>> =
            serde_json::from_str(content)?;

        let mut table = Self::default();
        for (test, entries) in raw {
            for (name, entry) in entries {
                if !entry.deviation.is_finite() || entry.deviation < 0.0 {
                    return Err(ConfigError::InvalidValue(format!(
                        "{}.{}: deviation must be a finite value >= 0, got {}",
                        test, name, entry.deviation
                    )));
                }
                let expectation = Expectation {
                    name: name.clone(),
                    nominal: entry.val,
                    deviation: entry.deviation,
                    enabled: entry.valid,
                };
                table.insert(&test, expectation);
            }
        }
        Ok(table)
    }

    /// Add or replace an expectation
    pub fn insert(&mut self, test: &str, expectation: Expectation) {
        self.tests
            .entry(test.to_string())
            .or_default()
            .insert(expectation.name.clone(), expectation);
    }

    pub fn get(&self, test: &str, measurement: &str) -> Option<&Expectation> {
        self.tests.get(test)?.get(measurement)
    }

    /// All expectations of a test, ordered by measurement name
    pub fn for_test(&self, test: &str) -> impl Iterator<Item = &Expectation> {
        self.tests.get(test).into_iter().flat_map(|m| m.values())
    }

    /// Measurement names configured for a test
    pub fn measurement_names(&self, test: &str) -> Vec<String> {
        self.for_test(test).map(|e| e.name.clone()).collect()
    }

    pub fn test_names(&self) -> impl Iterator<Item = &str> {
        self.tests.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tests.values().all(BTreeMap::is_empty)
    }

    /// Serialize in the same form [`ExpectationTable::from_json`] reads
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let raw: BTreeMap<&str, BTreeMap<&str, ExpectationEntry>> = self
            .tests
            .iter()
            .map(|(test, entries)| {
                let entries = entries
                    .iter()
                    .map(|(name, e)| {
                        let entry = ExpectationEntry {
                            val: e.nominal.clone(),
                            deviation: e.deviation,
                            valid: e.enabled,
                        };
                        (name.as_str(), entry)
                    })
                    .collect();
                (test.as_str(), entries)
            })
            .collect();
        serde_json::to_string_pretty(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table() {
        let json = r#"{
            "hk_vals": {
                "v12mon": {"val": 12.0, "deviation": 0.5},
                "fwver": {"val": "3v01"},
                "det_temp": {"val": 25, "deviation": 10, "valid": false}
            },
            "mac": {"board_ip": {"val": "192.168.1.1", "valid": true}}
        }"#;
        let table = ExpectationTable::from_json(json).unwrap();

        let v12 = table.get("hk_vals", "v12mon").unwrap();
        assert_eq!(v12.nominal, ExpectedValue::Numeric(12.0));
        assert_eq!(v12.deviation, 0.5);
        assert!(v12.enabled);

        let fw = table.get("hk_vals", "fwver").unwrap();
        assert_eq!(fw.nominal, ExpectedValue::Exact("3v01".to_string()));
        assert_eq!(fw.deviation, 0.0);

        assert!(!table.get("hk_vals", "det_temp").unwrap().enabled);
        assert_eq!(
            table.measurement_names("hk_vals"),
            vec!["det_temp", "fwver", "v12mon"]
        );
        assert!(table.get("mac", "mac_address").is_none());
        assert_eq!(table.test_names().count(), 2);
    }

    #[test]
    fn test_numeric_looking_string_is_exact() {
        let table = ExpectationTable::from_json(r#"{"t": {"m": {"val": "42"}}}"#).unwrap();
        assert_eq!(
            table.get("t", "m").unwrap().nominal,
            ExpectedValue::Exact("42".to_string())
        );
    }

    #[test]
    fn test_negative_deviation_rejected() {
        let err = ExpectationTable::from_json(r#"{"t": {"m": {"val": 1, "deviation": -1}}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_missing_val_rejected() {
        assert!(ExpectationTable::from_json(r#"{"t": {"m": {"deviation": 1}}}"#).is_err());
    }

    #[test]
    fn test_json_output_reloads() {
        let mut table = ExpectationTable::default();
        table.insert("ph_data", Expectation::numeric("ph_max", 1000.0, 5.0));
        table.insert("mac", Expectation::exact("board_ip", "192.168.1.1").disabled());

        let json = table.to_json().unwrap();
        assert!(json.contains("\"val\""));
        assert_eq!(ExpectationTable::from_json(&json).unwrap(), table);
    }

    #[test]
    fn test_unknown_test_is_empty() {
        let table = ExpectationTable::default();
        assert!(table.is_empty());
        assert_eq!(table.for_test("hk_vals").count(), 0);
    }
}
