//! Error types for the analysis engine
//!
//! Every failure inside a test pass is an [`EngineError`]. Each variant maps
//! to one [`ErrorCategory`] for the report:
//!
//! - `Packet`: malformed payloads, PH sequence regressions and out-of-order
//!   timestamps, carrying the index of the offending packet when known
//! - `Samples`: too few values for a measurement or an empty aggregate
//! - `Configuration`: missing or unknown expectations, bad plans, absent
//!   HK fields
//!
//! The orchestrator turns these into per-test failure records; none of them
//! abort a run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decoder::PacketKind;

/// Engine errors raised while decoding, extracting, aggregating or evaluating
///
/// All of these are local to a single test case. The orchestrator catches
/// them and records them in the test outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Payload length or shape does not match the declared layout
    #[error("Malformed {kind} packet{}: {reason}", fmt_index(.index))]
    MalformedPacket {
        index: Option<usize>,
        kind: PacketKind,
        reason: String,
    },

    /// PH packet number went backwards without wrapping
    #[error("Sequence regression at packet {index}: {previous} -> {current}")]
    SequenceRegression {
        index: usize,
        previous: u32,
        current: u32,
    },

    /// Capture timestamps are not monotonic
    #[error("Capture timestamp went backwards at packet {index}")]
    OutOfOrder { index: usize },

    /// Fewer records than the measurement needs
    #[error("Insufficient samples for {measurement}: need {required}, got {actual}")]
    InsufficientSamples {
        measurement: String,
        required: usize,
        actual: usize,
    },

    /// Zero measurements reached the aggregator
    #[error("Empty sample for {measurement}")]
    EmptySample { measurement: String },

    /// A requested measurement has no expectation entry
    #[error("Missing expectation for {test}.{measurement}")]
    MissingExpectation { test: String, measurement: String },

    /// A test has nothing to evaluate
    #[error("No expectations configured for {test}")]
    NoExpectations { test: String },

    /// The test cannot produce this measurement
    #[error("Unknown measurement {measurement} for test {test}")]
    UnknownMeasurement { test: String, measurement: String },

    /// HK field not present in the layout or record
    #[error("Missing HK field: {0}")]
    MissingField(String),

    /// Other configuration problem
    #[error("Configuration error: {0}")]
    Config(String),
}

fn fmt_index(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" at index {}", i),
        None => String::new(),
    }
}

/// Coarse error classes used in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Packet could not be decoded
    Packet,
    /// Not enough data to compute a statistic
    Samples,
    /// Expectation or plan problem
    Configuration,
}

impl EngineError {
    /// Create a malformed packet error without an index
    pub fn malformed(kind: PacketKind, reason: impl Into<String>) -> Self {
        Self::MalformedPacket {
            index: None,
            kind,
            reason: reason.into(),
        }
    }

    /// Create an insufficient samples error
    pub fn insufficient(measurement: impl Into<String>, required: usize, actual: usize) -> Self {
        Self::InsufficientSamples {
            measurement: measurement.into(),
            required,
            actual,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Attach a packet index to a malformed packet error
    pub fn with_index(self, at: usize) -> Self {
        match self {
            Self::MalformedPacket { kind, reason, .. } => Self::MalformedPacket {
                index: Some(at),
                kind,
                reason,
            },
            other => other,
        }
    }

    /// Report category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedPacket { .. }
            | Self::SequenceRegression { .. }
            | Self::OutOfOrder { .. } => ErrorCategory::Packet,
            Self::InsufficientSamples { .. } | Self::EmptySample { .. } => ErrorCategory::Samples,
            Self::MissingExpectation { .. }
            | Self::NoExpectations { .. }
            | Self::UnknownMeasurement { .. }
            | Self::MissingField(_)
            | Self::Config(_) => ErrorCategory::Configuration,
        }
    }
}

/// Result type alias using EngineError
pub type EngineResult<T> = Result<T, EngineError>;
