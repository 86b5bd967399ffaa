//! Common types for decoder module

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Packet kind tag attached by the capture side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PacketKind {
    /// Housekeeping packet (port 60002)
    Hk,
    /// Pulse-height science packet
    Ph,
    /// Movie-mode science packet
    Movie,
    /// Reply to an echo-enabled command (MAROC echo, destination MAC)
    Reply,
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketKind::Hk => write!(f, "HK"),
            PacketKind::Ph => write!(f, "PH"),
            PacketKind::Movie => write!(f, "MOVIE"),
            PacketKind::Reply => write!(f, "REPLY"),
        }
    }
}

/// Raw packet as handed over by the capture collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPacket {
    pub kind: PacketKind,
    pub bytes: Vec<u8>,
    /// Monotonic arrival time in nanoseconds
    pub capture_ns: u64,
}

impl RawPacket {
    /// Create a RawPacket
    pub fn new(kind: PacketKind, bytes: Vec<u8>, capture_ns: u64) -> Self {
        Self {
            kind,
            bytes,
            capture_ns,
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Decoded value of one HK field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Number(_) => None,
            FieldValue::Text(s) => Some(s),
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Number(v) => write!(f, "{}", v),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Raw content of a field, kept so a record can be encoded again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawField {
    /// Integer read from `width` bytes (bit fields keep the whole byte)
    Int(u64),
    /// Bytes copied verbatim (text fields)
    Bytes(Vec<u8>),
}

/// One decoded HK field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedField {
    pub raw: RawField,
    pub value: FieldValue,
}

/// Housekeeping record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HkRecord {
    pub capture_ns: u64,
    pub fields: BTreeMap<String, DecodedField>,
}

impl HkRecord {
    /// Get the decoded value of a field
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).map(|f| &f.value)
    }

    /// Get a numeric field value
    pub fn number(&self, name: &str) -> Option<f64> {
        self.value(name).and_then(FieldValue::as_number)
    }

    /// Get a text field value
    pub fn text(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(FieldValue::as_text)
    }
}

/// White Rabbit timestamp embedded in science packets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WrTimestamp {
    /// TAI seconds
    pub tai: u32,
    /// Nanoseconds within the second
    pub nanosec: u32,
}

impl WrTimestamp {
    pub fn new(tai: u32, nanosec: u32) -> Self {
        Self { tai, nanosec }
    }

    /// All-zero timestamp means the timing source is not synchronized
    pub fn is_zero(&self) -> bool {
        self.tai == 0 && self.nanosec == 0
    }

    /// Total nanoseconds since the TAI epoch
    pub fn as_ns(&self) -> u64 {
        self.tai as u64 * 1_000_000_000 + self.nanosec as u64
    }
}

/// Common 16-byte header of PH and movie packets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScienceHeader {
    pub acq_mode: u8,
    pub packet_ver: u8,
    pub packet_no: u16,
    pub boardloc: u16,
    pub timestamp: WrTimestamp,
}

impl ScienceHeader {
    /// Board location formatted as IP address
    pub fn board_ip(&self) -> String {
        board_ip(self.boardloc)
    }
}

/// Pulse-height record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhRecord {
    pub capture_ns: u64,
    pub header: ScienceHeader,
    pub samples: Vec<i32>,
}

/// Movie-mode record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub capture_ns: u64,
    pub header: ScienceHeader,
    pub samples: Vec<i32>,
    /// False when the WR timestamp was all-zero (low confidence)
    pub timestamp_valid: bool,
}

/// Command reply record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRecord {
    pub capture_ns: u64,
    pub bytes: Vec<u8>,
}

/// Decoded record, one variant per packet kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecodedRecord {
    Hk(HkRecord),
    Ph(PhRecord),
    Movie(MovieRecord),
    Reply(ReplyRecord),
}

impl DecodedRecord {
    pub fn kind(&self) -> PacketKind {
        match self {
            DecodedRecord::Hk(_) => PacketKind::Hk,
            DecodedRecord::Ph(_) => PacketKind::Ph,
            DecodedRecord::Movie(_) => PacketKind::Movie,
            DecodedRecord::Reply(_) => PacketKind::Reply,
        }
    }

    pub fn capture_ns(&self) -> u64 {
        match self {
            DecodedRecord::Hk(r) => r.capture_ns,
            DecodedRecord::Ph(r) => r.capture_ns,
            DecodedRecord::Movie(r) => r.capture_ns,
            DecodedRecord::Reply(r) => r.capture_ns,
        }
    }

    /// Hardware timestamp for science records
    pub fn wr_timestamp(&self) -> Option<WrTimestamp> {
        match self {
            DecodedRecord::Ph(r) => Some(r.header.timestamp),
            DecodedRecord::Movie(r) => Some(r.header.timestamp),
            DecodedRecord::Hk(_) | DecodedRecord::Reply(_) => None,
        }
    }

    /// Sample sequence for science records
    pub fn samples(&self) -> Option<&[i32]> {
        match self {
            DecodedRecord::Ph(r) => Some(&r.samples),
            DecodedRecord::Movie(r) => Some(&r.samples),
            DecodedRecord::Hk(_) | DecodedRecord::Reply(_) => None,
        }
    }

    pub fn as_hk(&self) -> Option<&HkRecord> {
        match self {
            DecodedRecord::Hk(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_ph(&self) -> Option<&PhRecord> {
        match self {
            DecodedRecord::Ph(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_reply(&self) -> Option<&ReplyRecord> {
        match self {
            DecodedRecord::Reply(r) => Some(r),
            _ => None,
        }
    }
}

/// Format a 16-bit board location as the board's IP address
pub fn board_ip(boardloc: u16) -> String {
    format!("192.168.{}.{}", boardloc >> 8, boardloc & 0xff)
}
