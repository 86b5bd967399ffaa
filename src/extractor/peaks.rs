//! Peak detection over pulse-height samples

use serde::{Deserialize, Serialize};

/// Peak detection parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Minimum height of a peak (ADC counts)
    pub threshold: i32,
    /// Peaks closer than this many samples are merged
    pub min_distance: usize,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            threshold: 100,
            min_distance: 5,
        }
    }
}

/// Local maximum in a sample sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peak {
    pub index: usize,
    pub height: i32,
}

/// Find peaks in `samples`
///
/// A peak is strictly greater than each neighbour it has and at least
/// `threshold`. Candidates closer than `min_distance` to the last kept peak
/// are merged into it, keeping the taller one (the earlier one on ties).
pub fn find_peaks(samples: &[i32], config: &PeakConfig) -> Vec<Peak> {
    let mut peaks: Vec<Peak> = Vec::new();

    for (index, &height) in samples.iter().enumerate() {
        if height < config.threshold || !is_local_max(samples, index) {
            continue;
        }
        let candidate = Peak { index, height };
        match peaks.last_mut() {
            Some(last) if index - last.index < config.min_distance => {
                if candidate.height > last.height {
                    *last = candidate;
                }
            }
            _ => peaks.push(candidate),
        }
    }

    peaks
}

fn is_local_max(samples: &[i32], index: usize) -> bool {
    let height = samples[index];
    let left_ok = index == 0 || height > samples[index - 1];
    let right_ok = index + 1 >= samples.len() || height > samples[index + 1];
    left_ok && right_ok
}
