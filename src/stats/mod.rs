//! Statistics aggregation
//!
//! Numeric measurements are reduced with Welford's one-pass algorithm to a
//! [`SummaryStatistic`]. Exact (string) measurements are reduced to an
//! [`ExactObservation`] that records whether all values agree.

use serde::{Deserialize, Serialize};

use crate::common::{EngineError, EngineResult};
use crate::extractor::{Measurement, MeasurementValue};

/// Running mean/variance/min/max accumulator
#[derive(Debug, Clone)]
pub struct RunningStats {
    count: usize,
    mean: f64,
    /// Sum of squared deviations from the running mean
    m2: f64,
    min: f64,
    max: f64,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Sample standard deviation (n - 1); zero below two samples
    pub fn stdev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / (self.count - 1) as f64).max(0.0).sqrt()
    }

    /// Snapshot the accumulator; `None` if nothing was pushed
    pub fn summary(&self, name: &str) -> Option<SummaryStatistic> {
        if self.count == 0 {
            return None;
        }
        Some(SummaryStatistic {
            name: name.to_string(),
            // Rounding can push the running mean a hair outside the range
            mean: self.mean.clamp(self.min, self.max),
            stdev: self.stdev(),
            min: self.min,
            max: self.max,
            n: self.count,
            low_confidence: self.count < 2,
        })
    }
}

/// Summary of a numeric measurement series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistic {
    pub name: String,
    pub mean: f64,
    pub stdev: f64,
    pub min: f64,
    pub max: f64,
    pub n: usize,
    /// Set when the statistic rests on a single sample
    pub low_confidence: bool,
}

/// Summary of an exact (string) measurement series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactObservation {
    pub name: String,
    /// Common value, or all distinct values joined by `|` when they disagree
    pub value: String,
    pub n: usize,
    /// Number of distinct values seen
    pub distinct: usize,
}

impl ExactObservation {
    pub fn is_consistent(&self) -> bool {
        self.distinct == 1
    }
}

/// Aggregated observation handed to the evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    Summary(SummaryStatistic),
    Exact(ExactObservation),
}

impl Observation {
    pub fn name(&self) -> &str {
        match self {
            Observation::Summary(s) => &s.name,
            Observation::Exact(e) => &e.name,
        }
    }

    pub fn n(&self) -> usize {
        match self {
            Observation::Summary(s) => s.n,
            Observation::Exact(e) => e.n,
        }
    }
}

/// Aggregate numeric values
pub fn aggregate(name: &str, values: &[f64]) -> EngineResult<SummaryStatistic> {
    let mut stats = RunningStats::new();
    for &v in values {
        stats.push(v);
    }
    stats.summary(name).ok_or_else(|| EngineError::EmptySample {
        measurement: name.to_string(),
    })
}

/// Aggregate exact values
pub fn aggregate_exact(name: &str, values: &[String]) -> EngineResult<ExactObservation> {
    if values.is_empty() {
        return Err(EngineError::EmptySample {
            measurement: name.to_string(),
        });
    }
    let mut distinct: Vec<&str> = Vec::new();
    for v in values {
        if !distinct.contains(&v.as_str()) {
            distinct.push(v);
        }
    }
    Ok(ExactObservation {
        name: name.to_string(),
        value: distinct.join("|"),
        n: values.len(),
        distinct: distinct.len(),
    })
}

/// Aggregate a measurement series that is all numeric or all exact
pub fn aggregate_measurements(name: &str, measurements: &[Measurement]) -> EngineResult<Observation> {
    let Some(first) = measurements.first() else {
        return Err(EngineError::EmptySample {
            measurement: name.to_string(),
        });
    };

    match first.value {
        MeasurementValue::Numeric(_) => {
            let values = measurements
                .iter()
                .map(|m| m.value.as_numeric())
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| mixed(name))?;
            aggregate(name, &values).map(Observation::Summary)
        }
        MeasurementValue::Exact(_) => {
            let values = measurements
                .iter()
                .map(|m| m.value.as_exact().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| mixed(name))?;
            aggregate_exact(name, &values).map(Observation::Exact)
        }
    }
}

fn mixed(name: &str) -> EngineError {
    EngineError::config(format!("{} mixes numeric and exact values", name))
}
