//! Pulse shape classification
//!
//! Each detected peak is classified from a window of `half_window` samples on
//! either side. The predicates are checked in order and the first match wins:
//!
//! 1. [`PulsePattern::Saturated`]: peak height at or above the saturation level
//! 2. [`PulsePattern::DoublePeak`]: two rise-to-fall turns in the window
//! 3. [`PulsePattern::SingleRiseFall`]: rises into the peak, falls after it,
//!    one rise-to-fall turn
//! 4. [`PulsePattern::Unknown`]: everything else

use serde::{Deserialize, Serialize};

/// Pulse shape classifier parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Samples on each side of the peak included in the window
    pub half_window: usize,
    /// ADC value at which a pulse counts as saturated
    pub saturation_level: i32,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            half_window: 8,
            saturation_level: 4095,
        }
    }
}

/// Shape of a detected pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulsePattern {
    SingleRiseFall,
    DoublePeak,
    Saturated,
    Unknown,
}

impl PulsePattern {
    pub const ALL: [PulsePattern; 4] = [
        PulsePattern::SingleRiseFall,
        PulsePattern::DoublePeak,
        PulsePattern::Saturated,
        PulsePattern::Unknown,
    ];

    /// Name of the per-packet count measurement for this pattern
    pub fn measurement_name(self) -> &'static str {
        match self {
            PulsePattern::SingleRiseFall => "ph_single_pulse",
            PulsePattern::DoublePeak => "ph_double_peak",
            PulsePattern::Saturated => "ph_saturated",
            PulsePattern::Unknown => "ph_unknown_shape",
        }
    }

    pub fn from_measurement_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.measurement_name() == name)
    }
}

/// Classify the pulse whose maximum is at `peak`
pub fn classify_peak(samples: &[i32], peak: usize, config: &PatternConfig) -> PulsePattern {
    if peak >= samples.len() {
        return PulsePattern::Unknown;
    }
    let window = window(samples, peak, config.half_window);

    if is_saturated(samples[peak], config) {
        PulsePattern::Saturated
    } else if is_double_peak(window) {
        PulsePattern::DoublePeak
    } else if is_single_rise_fall(samples, peak, window) {
        PulsePattern::SingleRiseFall
    } else {
        PulsePattern::Unknown
    }
}

fn window(samples: &[i32], peak: usize, half_window: usize) -> &[i32] {
    let lo = peak.saturating_sub(half_window);
    let hi = (peak + half_window + 1).min(samples.len());
    &samples[lo..hi]
}

fn is_saturated(height: i32, config: &PatternConfig) -> bool {
    height >= config.saturation_level
}

fn is_double_peak(window: &[i32]) -> bool {
    rise_fall_turns(window) == 2
}

fn is_single_rise_fall(samples: &[i32], peak: usize, window: &[i32]) -> bool {
    let rises_in = peak > 0 && samples[peak - 1] < samples[peak];
    let falls_out = peak + 1 < samples.len() && samples[peak + 1] < samples[peak];
    rises_in && falls_out && rise_fall_turns(window) == 1
}

/// Number of places where the slope turns from rising to falling
///
/// Flat steps are skipped so a plateau between a rise and a fall still
/// counts as one turn.
fn rise_fall_turns(window: &[i32]) -> usize {
    let mut turns = 0;
    let mut rising = false;
    for pair in window.windows(2) {
        match pair[1].cmp(&pair[0]) {
            std::cmp::Ordering::Greater => rising = true,
            std::cmp::Ordering::Less => {
                if rising {
                    turns += 1;
                }
                rising = false;
            }
            std::cmp::Ordering::Equal => {}
        }
    }
    turns
}
