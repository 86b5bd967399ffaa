//! Test names, measurement catalog and per-test stage machine

use serde::{Deserialize, Serialize};

use crate::common::EngineError;
use crate::decoder::PacketKind;
use crate::extractor::{DestMacTarget, MeasurementKind, PulsePattern};

/// Named autotest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestName {
    /// HK field values against nominal readings
    HkVals,
    /// HK packet cadence
    HkTime,
    /// MAROC configuration echo
    Maroc,
    /// Board IP, MAC and configured destination MACs
    Mac,
    /// White Rabbit timing of movie packets
    WrTiming,
    /// Pulse-height amplitudes
    PhData,
    /// PH packet cadence
    PhTiming,
    /// Peaks per PH packet
    PhPeaks,
    /// Pulse shapes per PH packet
    PhPattern,
}

impl TestName {
    pub const ALL: [TestName; 9] = [
        TestName::HkVals,
        TestName::HkTime,
        TestName::Maroc,
        TestName::Mac,
        TestName::WrTiming,
        TestName::PhData,
        TestName::PhTiming,
        TestName::PhPeaks,
        TestName::PhPattern,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TestName::HkVals => "hk_vals",
            TestName::HkTime => "hk_time",
            TestName::Maroc => "maroc",
            TestName::Mac => "mac",
            TestName::WrTiming => "wr_timing",
            TestName::PhData => "ph_data",
            TestName::PhTiming => "ph_timing",
            TestName::PhPeaks => "ph_peaks",
            TestName::PhPattern => "ph_pattern",
        }
    }

    /// Measurements this test can produce
    ///
    /// `hk_vals` accepts any HK field name, so its list is empty.
    pub fn measurements(self) -> &'static [&'static str] {
        match self {
            TestName::HkVals => &[],
            TestName::HkTime => &["hk_interval"],
            TestName::Maroc => &["maroc_echo", "maroc_mismatches"],
            TestName::Mac => &["board_ip", "mac_address", "ph_dest_mac", "movie_dest_mac"],
            TestName::WrTiming => &["wr_interval", "movie_interval"],
            TestName::PhData => &["ph_max", "ph_mean"],
            TestName::PhTiming => &["ph_interval", "ph_hw_interval"],
            TestName::PhPeaks => &["ph_peak_count"],
            TestName::PhPattern => &[
                "ph_single_pulse",
                "ph_double_peak",
                "ph_saturated",
                "ph_unknown_shape",
            ],
        }
    }

    /// Map a measurement name to what it computes for this test
    pub fn resolve(self, measurement: &str) -> Option<MeasurementKind> {
        use MeasurementKind as K;
        let kind = match (self, measurement) {
            (TestName::HkVals, field) => K::HkField(field.to_string()),
            (TestName::HkTime, "hk_interval") => K::CaptureInterval(PacketKind::Hk),
            (TestName::Maroc, "maroc_echo") => K::MarocEcho,
            (TestName::Maroc, "maroc_mismatches") => K::MarocMismatches,
            (TestName::Mac, "board_ip") => K::BoardIp,
            (TestName::Mac, "mac_address") => K::MacAddress,
            (TestName::Mac, "ph_dest_mac") => K::DestMac(DestMacTarget::Ph),
            (TestName::Mac, "movie_dest_mac") => K::DestMac(DestMacTarget::Movie),
            (TestName::WrTiming, "wr_interval") => K::HardwareInterval(PacketKind::Movie),
            (TestName::WrTiming, "movie_interval") => K::CaptureInterval(PacketKind::Movie),
            (TestName::PhData, "ph_max") => K::PhMax,
            (TestName::PhData, "ph_mean") => K::PhMean,
            (TestName::PhTiming, "ph_interval") => K::CaptureInterval(PacketKind::Ph),
            (TestName::PhTiming, "ph_hw_interval") => K::HardwareInterval(PacketKind::Ph),
            (TestName::PhPeaks, "ph_peak_count") => K::PhPeakCount,
            (TestName::PhPattern, name) => K::PhPattern(PulsePattern::from_measurement_name(name)?),
            _ => return None,
        };
        Some(kind)
    }

    /// Movie packets without WR time are rejected for this test
    pub fn requires_timing(self) -> bool {
        self == TestName::WrTiming
    }
}

impl std::fmt::Display for TestName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TestName {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TestName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EngineError::config(format!("unknown test {:?}", s)))
    }
}

/// Progress of one test case
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStage {
    #[default]
    NotRun,
    Decoding,
    Extracting,
    Aggregating,
    Evaluating,
    Done,
    Failed,
}

impl TestStage {
    /// Check if transition to target stage is valid
    pub fn can_transition_to(&self, target: TestStage) -> bool {
        use TestStage::*;
        matches!(
            (self, target),
            // Normal flow
            (NotRun, Decoding)
            | (Decoding, Extracting)
            | (Extracting, Aggregating)
            | (Aggregating, Evaluating)
            | (Evaluating, Done)
            // Failure can happen from any active stage
            | (Decoding, Failed)
            | (Extracting, Failed)
            | (Aggregating, Failed)
            | (Evaluating, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TestStage::Done | TestStage::Failed)
    }
}

impl std::fmt::Display for TestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStage::NotRun => write!(f, "NotRun"),
            TestStage::Decoding => write!(f, "Decoding"),
            TestStage::Extracting => write!(f, "Extracting"),
            TestStage::Aggregating => write!(f, "Aggregating"),
            TestStage::Evaluating => write!(f, "Evaluating"),
            TestStage::Done => write!(f, "Done"),
            TestStage::Failed => write!(f, "Failed"),
        }
    }
}
