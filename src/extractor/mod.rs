//! Signal extraction
//!
//! Turns decoded records into named measurements. Each measurement name maps
//! to a [`MeasurementKind`], and [`SignalExtractor::extract`] produces one
//! value per record (per-packet measurements) or per record pair
//! (intervals).

pub mod housekeeping;
pub mod interval;
pub mod maroc;
pub mod pattern;
pub mod peaks;

pub use housekeeping::{dest_mac_reply, format_mac, mac_from_uid, DestMacTarget};
pub use interval::deltas;
pub use maroc::{compare_echo, reverse_bits, EchoComparison, MarocCommandBuilder};
pub use pattern::{classify_peak, PatternConfig, PulsePattern};
pub use peaks::{find_peaks, Peak, PeakConfig};

use serde::{Deserialize, Serialize};

use crate::common::{EngineError, EngineResult};
use crate::decoder::{DecodedRecord, PacketKind, PhRecord};

/// Value of a single measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasurementValue {
    Numeric(f64),
    Exact(String),
}

impl MeasurementValue {
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            MeasurementValue::Numeric(v) => Some(*v),
            MeasurementValue::Exact(_) => None,
        }
    }

    pub fn as_exact(&self) -> Option<&str> {
        match self {
            MeasurementValue::Numeric(_) => None,
            MeasurementValue::Exact(s) => Some(s),
        }
    }
}

/// A named measurement value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    pub value: MeasurementValue,
}

impl Measurement {
    pub fn new(name: impl Into<String>, value: MeasurementValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn numeric(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MeasurementValue::Numeric(value))
    }

    pub fn exact(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, MeasurementValue::Exact(value.into()))
    }
}

/// What a measurement name computes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeasurementKind {
    /// Value of a named HK field
    HkField(String),
    /// Capture-time interval between packets of a kind (seconds)
    CaptureInterval(PacketKind),
    /// WR timestamp interval between packets of a kind (nanoseconds)
    HardwareInterval(PacketKind),
    BoardIp,
    MacAddress,
    DestMac(DestMacTarget),
    MarocEcho,
    MarocMismatches,
    /// Maximum sample of each PH packet
    PhMax,
    /// Mean sample of each PH packet
    PhMean,
    /// Number of peaks in each PH packet
    PhPeakCount,
    /// Number of peaks of one shape in each PH packet
    PhPattern(PulsePattern),
}

/// Extraction parameters shared by all tests of a run
#[derive(Debug, Clone, Default)]
pub struct SignalExtractor {
    pub peaks: PeakConfig,
    pub pattern: PatternConfig,
    /// Expected MAROC command for echo comparison
    pub maroc_command: Vec<u8>,
}

impl SignalExtractor {
    pub fn new(peaks: PeakConfig, pattern: PatternConfig, maroc_command: Vec<u8>) -> Self {
        Self {
            peaks,
            pattern,
            maroc_command,
        }
    }

    /// Compute `measurement` of kind `kind` over `records`
    pub fn extract(
        &self,
        measurement: &str,
        kind: &MeasurementKind,
        records: &[DecodedRecord],
    ) -> EngineResult<Vec<Measurement>> {
        match kind {
            MeasurementKind::HkField(field) => {
                housekeeping::field_values(measurement, field, records)
            }
            MeasurementKind::CaptureInterval(kind) => {
                numeric(measurement, interval::capture_intervals(measurement, records, *kind)?)
            }
            MeasurementKind::HardwareInterval(kind) => {
                numeric(measurement, interval::hardware_intervals(measurement, records, *kind)?)
            }
            MeasurementKind::BoardIp => housekeeping::board_ips(measurement, records),
            MeasurementKind::MacAddress => housekeeping::mac_addresses(measurement, records),
            MeasurementKind::DestMac(target) => {
                housekeeping::dest_macs(measurement, *target, records)
            }
            MeasurementKind::MarocEcho => {
                maroc::echo_status(measurement, &self.maroc_command, records)
            }
            MeasurementKind::MarocMismatches => {
                maroc::echo_mismatches(measurement, &self.maroc_command, records)
            }
            MeasurementKind::PhMax => per_ph_packet(measurement, records, |ph| {
                ph.samples.iter().max().map(|&m| m as f64)
            }),
            MeasurementKind::PhMean => per_ph_packet(measurement, records, |ph| {
                if ph.samples.is_empty() {
                    return None;
                }
                let sum: i64 = ph.samples.iter().map(|&s| s as i64).sum();
                Some(sum as f64 / ph.samples.len() as f64)
            }),
            MeasurementKind::PhPeakCount => per_ph_packet(measurement, records, |ph| {
                Some(find_peaks(&ph.samples, &self.peaks).len() as f64)
            }),
            MeasurementKind::PhPattern(pattern) => per_ph_packet(measurement, records, |ph| {
                let count = find_peaks(&ph.samples, &self.peaks)
                    .iter()
                    .filter(|p| classify_peak(&ph.samples, p.index, &self.pattern) == *pattern)
                    .count();
                Some(count as f64)
            }),
        }
    }
}

fn numeric(measurement: &str, values: Vec<f64>) -> EngineResult<Vec<Measurement>> {
    Ok(values
        .into_iter()
        .map(|v| Measurement::numeric(measurement, v))
        .collect())
}

/// One numeric value per PH record; records yielding `None` are skipped
fn per_ph_packet<F>(
    measurement: &str,
    records: &[DecodedRecord],
    f: F,
) -> EngineResult<Vec<Measurement>>
where
    F: Fn(&PhRecord) -> Option<f64>,
{
    let out: Vec<_> = records
        .iter()
        .filter_map(DecodedRecord::as_ph)
        .filter_map(|ph| f(ph))
        .map(|v| Measurement::numeric(measurement, v))
        .collect();
    if out.is_empty() {
        return Err(EngineError::insufficient(measurement, 1, 0));
    }
    Ok(out)
}
