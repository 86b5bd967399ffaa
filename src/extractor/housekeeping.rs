//! Housekeeping field and network identity extraction

use super::{Measurement, MeasurementValue};
use crate::common::{EngineError, EngineResult};
use crate::decoder::{DecodedRecord, FieldValue, HkRecord, ReplyRecord};

/// Length of the destination-MAC reply (PH MAC then movie MAC)
pub const DEST_MAC_REPLY_LEN: usize = 12;

/// Which half of the destination-MAC reply to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestMacTarget {
    Ph,
    Movie,
}

impl DestMacTarget {
    fn range(self) -> std::ops::Range<usize> {
        match self {
            DestMacTarget::Ph => 0..6,
            DestMacTarget::Movie => 6..12,
        }
    }
}

fn hk_records(records: &[DecodedRecord]) -> impl Iterator<Item = &HkRecord> {
    records.iter().filter_map(DecodedRecord::as_hk)
}

fn require_some(measurement: &str, out: Vec<Measurement>) -> EngineResult<Vec<Measurement>> {
    if out.is_empty() {
        return Err(EngineError::insufficient(measurement, 1, 0));
    }
    Ok(out)
}

/// Value of an HK field, one measurement per HK record
///
/// Numeric fields yield numeric measurements and text fields yield exact ones.
pub fn field_values(
    measurement: &str,
    field: &str,
    records: &[DecodedRecord],
) -> EngineResult<Vec<Measurement>> {
    let out = hk_records(records)
        .map(|hk| {
            let value = hk
                .value(field)
                .ok_or_else(|| EngineError::MissingField(field.to_string()))?;
            let value = match value {
                FieldValue::Number(v) => MeasurementValue::Numeric(*v),
                FieldValue::Text(s) => MeasurementValue::Exact(s.clone()),
            };
            Ok(Measurement::new(measurement, value))
        })
        .collect::<EngineResult<Vec<_>>>()?;
    require_some(measurement, out)
}

/// Board IP address as decoded from the HK board location
pub fn board_ips(measurement: &str, records: &[DecodedRecord]) -> EngineResult<Vec<Measurement>> {
    field_values(measurement, "boardloc", records)
}

/// Board MAC address derived from the flash UID in HK packets
pub fn mac_addresses(
    measurement: &str,
    records: &[DecodedRecord],
) -> EngineResult<Vec<Measurement>> {
    let out = hk_records(records)
        .map(|hk| {
            let uid = hk
                .text("uid")
                .ok_or_else(|| EngineError::MissingField("uid".to_string()))?;
            let mac = mac_from_uid(uid).ok_or_else(|| {
                EngineError::config(format!("UID {:?} is too short to derive a MAC", uid))
            })?;
            Ok(Measurement::exact(measurement, mac))
        })
        .collect::<EngineResult<Vec<_>>>()?;
    require_some(measurement, out)
}

/// Derive the board MAC from its flash UID hex string
///
/// The MAC is `00` followed by UID bytes 5 down to 1.
pub fn mac_from_uid(uid: &str) -> Option<String> {
    if uid.len() < 12 || !uid.is_ascii() {
        return None;
    }
    let byte = |i: usize| &uid[2 * i..2 * i + 2];
    Some(format!(
        "00:{}:{}:{}:{}:{}",
        byte(5),
        byte(4),
        byte(3),
        byte(2),
        byte(1)
    ))
}

/// Destination MAC for PH or movie packets read back from the board
pub fn dest_macs(
    measurement: &str,
    target: DestMacTarget,
    records: &[DecodedRecord],
) -> EngineResult<Vec<Measurement>> {
    let out = records
        .iter()
        .filter_map(DecodedRecord::as_reply)
        .filter(|r| r.bytes.len() == DEST_MAC_REPLY_LEN)
        .map(|r| Measurement::exact(measurement, format_mac(&r.bytes[target.range()])))
        .collect();
    require_some(measurement, out)
}

/// Format bytes as colon-separated lowercase hex
pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Build a destination-MAC reply (used by the emulator and tests)
pub fn dest_mac_reply(ph: [u8; 6], movie: [u8; 6], capture_ns: u64) -> ReplyRecord {
    let mut bytes = Vec::with_capacity(DEST_MAC_REPLY_LEN);
    bytes.extend_from_slice(&ph);
    bytes.extend_from_slice(&movie);
    ReplyRecord { capture_ns, bytes }
}
