//! Inter-packet interval measurements
//!
//! Deltas are computed in integer nanoseconds so that they sum exactly to
//! `t_n - t_1`; conversion to seconds happens at the end.

use crate::common::{EngineError, EngineResult};
use crate::decoder::{DecodedRecord, PacketKind};

const NS_PER_SEC: f64 = 1e9;

/// Consecutive differences of a monotonic timestamp sequence
///
/// Needs at least two timestamps. A decrease is reported as
/// [`EngineError::OutOfOrder`] at the index of the later timestamp.
pub fn deltas(measurement: &str, timestamps: &[u64]) -> EngineResult<Vec<u64>> {
    if timestamps.len() < 2 {
        return Err(EngineError::insufficient(measurement, 2, timestamps.len()));
    }
    timestamps
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            pair[1]
                .checked_sub(pair[0])
                .ok_or(EngineError::OutOfOrder { index: i + 1 })
        })
        .collect()
}

/// Capture-time intervals (seconds) between records of `kind`
pub fn capture_intervals(
    measurement: &str,
    records: &[DecodedRecord],
    kind: PacketKind,
) -> EngineResult<Vec<f64>> {
    let times: Vec<u64> = records
        .iter()
        .filter(|r| r.kind() == kind)
        .map(DecodedRecord::capture_ns)
        .collect();
    Ok(deltas(measurement, &times)?
        .into_iter()
        .map(|d| d as f64 / NS_PER_SEC)
        .collect())
}

/// White Rabbit timestamp intervals (nanoseconds) between records of `kind`
pub fn hardware_intervals(
    measurement: &str,
    records: &[DecodedRecord],
    kind: PacketKind,
) -> EngineResult<Vec<f64>> {
    let times: Vec<u64> = records
        .iter()
        .filter(|r| r.kind() == kind)
        .filter_map(|r| r.wr_timestamp())
        .map(|ts| ts.as_ns())
        .collect();
    Ok(deltas(measurement, &times)?
        .into_iter()
        .map(|d| d as f64)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{MovieRecord, ReplyRecord, ScienceHeader, WrTimestamp};

    fn movie(capture_ns: u64, tai: u32, nanosec: u32) -> DecodedRecord {
        DecodedRecord::Movie(MovieRecord {
            capture_ns,
            header: ScienceHeader {
                timestamp: WrTimestamp::new(tai, nanosec),
                ..ScienceHeader::default()
            },
            samples: vec![],
            timestamp_valid: true,
        })
    }

    #[test]
    fn test_deltas_sum_to_span() {
        let ts = [100, 250, 251, 1_000_000, 1_000_007];
        let d = deltas("x", &ts).unwrap();
        assert_eq!(d.len(), ts.len() - 1);
        assert_eq!(d.iter().sum::<u64>(), ts[ts.len() - 1] - ts[0]);
    }

    #[test]
    fn test_deltas_need_two() {
        assert_eq!(
            deltas("hk_interval", &[5]).unwrap_err(),
            EngineError::insufficient("hk_interval", 2, 1)
        );
        assert!(deltas("hk_interval", &[]).is_err());
    }

    #[test]
    fn test_out_of_order() {
        assert_eq!(
            deltas("x", &[10, 20, 15]).unwrap_err(),
            EngineError::OutOfOrder { index: 2 }
        );
    }

    #[test]
    fn test_capture_intervals_in_seconds() {
        let records = vec![
            movie(0, 1, 0),
            DecodedRecord::Reply(ReplyRecord {
                capture_ns: 10,
                bytes: vec![1],
            }),
            movie(500_000_000, 1, 200),
        ];
        let v = capture_intervals("movie_interval", &records, PacketKind::Movie).unwrap();
        assert_eq!(v, vec![0.5]);
    }

    #[test]
    fn test_hardware_intervals_cross_second() {
        let records = vec![movie(0, 1, 999_999_900), movie(1, 2, 100)];
        let v = hardware_intervals("wr_interval", &records, PacketKind::Movie).unwrap();
        assert_eq!(v, vec![200.0]);
    }
}
