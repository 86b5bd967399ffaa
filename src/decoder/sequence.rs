//! PH packet number continuity check
//!
//! Packet numbers must not go backwards within a capture window. A drop
//! larger than half the modulus is a counter wraparound and is accepted.

use tracing::warn;

use crate::common::{EngineError, EngineResult};

/// Default modulus of the 16-bit packet counter
pub const DEFAULT_SEQUENCE_MODULUS: u32 = 1 << 16;

/// Outcome of observing one packet number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStep {
    /// First packet of the window
    First,
    /// Same number as the previous packet
    Repeat,
    /// Next expected number
    Next,
    /// Forward jump; `missing` packets were skipped
    Gap { missing: u32 },
    /// Counter wrapped around the modulus
    Wrap,
}

/// Tracks packet numbers across a capture window
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    modulus: u32,
    last: Option<u32>,
    missing: u64,
    wraps: u32,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SEQUENCE_MODULUS)
    }
}

impl SequenceTracker {
    pub fn new(modulus: u32) -> Self {
        Self {
            modulus: modulus.max(2),
            last: None,
            missing: 0,
            wraps: 0,
        }
    }

    /// Observe the packet number of the packet at `index`
    pub fn observe(&mut self, index: usize, current: u32) -> EngineResult<SequenceStep> {
        let current = current % self.modulus;
        let Some(previous) = self.last else {
            self.last = Some(current);
            return Ok(SequenceStep::First);
        };

        let step = if current == previous {
            SequenceStep::Repeat
        } else if current > previous {
            let missing = current - previous - 1;
            if missing == 0 {
                SequenceStep::Next
            } else {
                self.missing += missing as u64;
                warn!(index, previous, current, missing, "PH packet number gap");
                SequenceStep::Gap { missing }
            }
        } else if previous - current > self.modulus / 2 {
            self.wraps += 1;
            let missing = (self.modulus - previous - 1) + current;
            self.missing += missing as u64;
            SequenceStep::Wrap
        } else {
            return Err(EngineError::SequenceRegression {
                index,
                previous,
                current,
            });
        };

        self.last = Some(current);
        Ok(step)
    }

    /// Total packets skipped so far
    pub fn missing(&self) -> u64 {
        self.missing
    }

    /// Number of counter wraparounds seen
    pub fn wraps(&self) -> u32 {
        self.wraps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_sequence() {
        let mut t = SequenceTracker::default();
        assert_eq!(t.observe(0, 10).unwrap(), SequenceStep::First);
        assert_eq!(t.observe(1, 11).unwrap(), SequenceStep::Next);
        assert_eq!(t.observe(2, 11).unwrap(), SequenceStep::Repeat);
        assert_eq!(t.observe(3, 15).unwrap(), SequenceStep::Gap { missing: 3 });
        assert_eq!(t.missing(), 3);
    }

    #[test]
    fn test_wraparound_is_tolerated() {
        let mut t = SequenceTracker::default();
        t.observe(0, 65534).unwrap();
        t.observe(1, 65535).unwrap();
        assert_eq!(t.observe(2, 0).unwrap(), SequenceStep::Wrap);
        assert_eq!(t.observe(3, 1).unwrap(), SequenceStep::Next);
        assert_eq!(t.wraps(), 1);
        assert_eq!(t.missing(), 0);
    }

    #[test]
    fn test_wraparound_with_gap() {
        let mut t = SequenceTracker::default();
        t.observe(0, 65530).unwrap();
        assert_eq!(t.observe(1, 2).unwrap(), SequenceStep::Wrap);
        assert_eq!(t.missing(), 7);
    }

    #[test]
    fn test_regression_is_error() {
        let mut t = SequenceTracker::default();
        t.observe(0, 100).unwrap();
        let err = t.observe(1, 90).unwrap_err();
        assert_eq!(
            err,
            EngineError::SequenceRegression {
                index: 1,
                previous: 100,
                current: 90
            }
        );
    }

    #[test]
    fn test_small_modulus() {
        let mut t = SequenceTracker::new(8);
        t.observe(0, 6).unwrap();
        t.observe(1, 7).unwrap();
        assert_eq!(t.observe(2, 0).unwrap(), SequenceStep::Wrap);
        assert_eq!(t.observe(3, 3).unwrap(), SequenceStep::Gap { missing: 2 });
        assert!(t.observe(4, 1).is_err());
    }
}
