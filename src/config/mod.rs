//! Configuration module for the Quabo autotest engine
//!
//! Supports loading configuration from:
//! - TOML files (analysis settings, test plan overrides, file locations)
//! - JSON files (packet layouts, expectations, MAROC tag table)
//!
//! # Example
//! ```ignore
//! let config = AutotestConfig::load("autotest.toml")?;
//! let layouts = config.layouts()?;
//! let expectations = config.expectations()?;
//! ```

pub mod layout;

pub use layout::{
    ByteOrder, FieldLayoutTable, HkFieldDef, HkFieldKind, HkLayout, ScienceLayout,
    SCIENCE_BOARDLOC_OFFSET,
};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decoder::DEFAULT_SEQUENCE_MODULUS;
use crate::emulator::EmulatorConfig;
use crate::evaluator::ExpectationTable;
use crate::extractor::{PatternConfig, PeakConfig};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// MAROC tag table: tag name -> four comma-separated per-chip values
pub type MarocTagTable = BTreeMap<String, String>;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutotestConfig {
    /// Signal analysis parameters
    #[serde(default)]
    pub analysis: AnalysisSettings,

    /// Per-test overrides, keyed by test name
    #[serde(default)]
    pub tests: BTreeMap<String, TestPlanConfig>,

    /// Inline MAROC tags; these take precedence over `maroc_file`
    #[serde(default)]
    pub maroc: MarocTagTable,

    /// JSON packet layout table (default: built-in firmware layout)
    #[serde(default)]
    pub layout_file: Option<PathBuf>,

    /// JSON expectation table
    #[serde(default)]
    pub expectations_file: Option<PathBuf>,

    /// Board configuration JSON holding a `maroc` section
    #[serde(default)]
    pub maroc_file: Option<PathBuf>,

    /// Synthetic board used by the emulator binary
    #[serde(default)]
    pub emulator: EmulatorConfig,
}

impl AutotestConfig {
    /// Load configuration from a TOML file
    ///
    /// Relative file paths inside the config are resolved against the
    /// directory of the config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AutotestConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.layout_file,
            &mut self.expectations_file,
            &mut self.maroc_file,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.analysis.validate()
    }

    /// Measurement override for a test, if configured
    pub fn measurements_for(&self, test: &str) -> Option<&[String]> {
        self.tests.get(test)?.measurements.as_deref()
    }

    /// Packet layouts from `layout_file`, or the built-in defaults
    pub fn layouts(&self) -> Result<FieldLayoutTable, ConfigError> {
        match &self.layout_file {
            Some(path) => FieldLayoutTable::load(path),
            None => Ok(FieldLayoutTable::default()),
        }
    }

    /// Expectation table from `expectations_file`
    pub fn expectations(&self) -> Result<ExpectationTable, ConfigError> {
        let path = self
            .expectations_file
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField("expectations_file".to_string()))?;
        ExpectationTable::load(path)
    }

    /// MAROC tags from `maroc_file` merged with the inline `[maroc]` table
    pub fn maroc_tags(&self) -> Result<MarocTagTable, ConfigError> {
        let mut tags = match &self.maroc_file {
            Some(path) => load_maroc_tags(path)?,
            None => MarocTagTable::new(),
        };
        tags.extend(self.maroc.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(tags)
    }
}

/// Signal analysis parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub peaks: PeakConfig,
    pub pattern: PatternConfig,
    /// Modulus of the PH packet counter
    pub sequence_modulus: u32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            peaks: PeakConfig::default(),
            pattern: PatternConfig::default(),
            sequence_modulus: DEFAULT_SEQUENCE_MODULUS,
        }
    }
}

impl AnalysisSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peaks.min_distance == 0 {
            return Err(ConfigError::InvalidValue(
                "analysis.peaks.min_distance must be at least 1".to_string(),
            ));
        }
        if self.pattern.half_window == 0 {
            return Err(ConfigError::InvalidValue(
                "analysis.pattern.half_window must be at least 1".to_string(),
            ));
        }
        if self.sequence_modulus < 2 {
            return Err(ConfigError::InvalidValue(format!(
                "analysis.sequence_modulus must be at least 2, got {}",
                self.sequence_modulus
            )));
        }
        Ok(())
    }
}

/// Per-test plan override
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestPlanConfig {
    /// Measurements to compute instead of the test's defaults
    #[serde(default)]
    pub measurements: Option<Vec<String>>,
}

/// Load a MAROC tag table from JSON
///
/// Accepts either a board configuration object with a `maroc` section or a
/// bare tag table.
pub fn load_maroc_tags<P: AsRef<Path>>(path: P) -> Result<MarocTagTable, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_maroc_tags(&content)
}

/// Parse a MAROC tag table from JSON text
pub fn parse_maroc_tags(content: &str) -> Result<MarocTagTable, ConfigError> {
    let mut value: serde_json::Value = serde_json::from_str(content)?;
    if let Some(section) = value.get_mut("maroc") {
        value = section.take();
    }
    Ok(serde_json::from_value(value)?)
}

// =============================================================================
// Tests
// =============================================================================
