//! Capture file format
//!
//! A capture file holds the packet windows handed over by the capture side,
//! one or more blocks per test.
//!
//! File structure:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Header                                 │
//! │  - Magic (8 bytes)                      │
//! │  - Length prefix (u32 LE)               │
//! │  - MsgPack CaptureHeader                │
//! ├─────────────────────────────────────────┤
//! │  Block 1                                │
//! │  - Length prefix (u32 LE)               │
//! │  - MsgPack CaptureBlock {test, packets} │
//! ├─────────────────────────────────────────┤
//! │  ...                                    │
//! ├─────────────────────────────────────────┤
//! │  Footer (fixed 64 bytes)                │
//! │  - Magic, checksum, counts, time range  │
//! └─────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

use super::CaptureSet;
use crate::decoder::RawPacket;
use crate::orchestrator::TestName;

/// Magic bytes at the start of a capture file
pub const CAPTURE_MAGIC: [u8; 8] = *b"QUABOCAP";

/// Current capture format version
pub const FORMAT_VERSION: u32 = 1;

/// Footer magic bytes
pub const FOOTER_MAGIC: [u8; 8] = *b"QCAPEND1";

/// Fixed footer size in bytes
pub const FOOTER_SIZE: usize = 64;

/// Upper bound on a single block, guards against corrupt length prefixes
const MAX_BLOCK_LEN: usize = 256 * 1024 * 1024;

/// Capture file header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureHeader {
    pub version: u32,
    /// Flash UID of the board under test
    pub board_uid: String,
    /// Board IP the packets were captured from
    pub board_ip: String,
    pub created_at: DateTime<Utc>,
    /// Free-form description
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CaptureHeader {
    pub fn new(board_uid: impl Into<String>, board_ip: impl Into<String>) -> Self {
        Self {
            version: FORMAT_VERSION,
            board_uid: board_uid.into(),
            board_ip: board_ip.into(),
            created_at: Utc::now(),
            comment: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Serialize with magic and length prefix
    pub fn to_bytes(&self) -> Result<Vec<u8>, CaptureFormatError> {
        let body = rmp_serde::to_vec_named(self)?;
        let mut buf = Vec::with_capacity(12 + body.len());
        buf.extend_from_slice(&CAPTURE_MAGIC);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, CaptureFormatError> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if magic != CAPTURE_MAGIC {
            return Err(CaptureFormatError::InvalidMagic);
        }
        let body = read_prefixed(reader)?;
        let header: Self = rmp_serde::from_slice(&body)?;
        if header.version != FORMAT_VERSION {
            return Err(CaptureFormatError::UnsupportedVersion(header.version));
        }
        Ok(header)
    }
}

/// One block of packets belonging to a test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureBlock {
    pub test: TestName,
    pub packets: Vec<RawPacket>,
}

/// Fixed-size trailer written when a capture is closed cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFooter {
    /// Chained xxHash64 over all blocks (prefix + body)
    pub checksum: u64,
    pub total_blocks: u64,
    pub total_packets: u64,
    /// Bytes between header and footer
    pub data_bytes: u64,
    /// Earliest packet capture time
    pub first_capture_ns: u64,
    /// Latest packet capture time
    pub last_capture_ns: u64,
    /// Unix time the file was closed, nanoseconds
    pub closed_at_ns: u64,
}

impl Default for CaptureFooter {
    fn default() -> Self {
        Self {
            checksum: 0,
            total_blocks: 0,
            total_packets: 0,
            data_bytes: 0,
            first_capture_ns: u64::MAX,
            last_capture_ns: 0,
            closed_at_ns: 0,
        }
    }
}

impl CaptureFooter {
    fn record_block(&mut self, block: &CaptureBlock, encoded_len: usize) {
        self.total_blocks += 1;
        self.total_packets += block.packets.len() as u64;
        self.data_bytes += 4 + encoded_len as u64;
        for p in &block.packets {
            self.first_capture_ns = self.first_capture_ns.min(p.capture_ns);
            self.last_capture_ns = self.last_capture_ns.max(p.capture_ns);
        }
    }

    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..8].copy_from_slice(&FOOTER_MAGIC);
        let fields = [
            self.checksum,
            self.total_blocks,
            self.total_packets,
            self.data_bytes,
            self.first_capture_ns,
            self.last_capture_ns,
            self.closed_at_ns,
        ];
        for (i, value) in fields.iter().enumerate() {
            let at = 8 + i * 8;
            buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
        }
        buf
    }

    pub fn from_bytes(data: &[u8; FOOTER_SIZE]) -> Result<Self, CaptureFormatError> {
        if data[0..8] != FOOTER_MAGIC {
            return Err(CaptureFormatError::InvalidFooterMagic);
        }
        let field = |i: usize| {
            let at = 8 + i * 8;
            let mut word = [0u8; 8];
            word.copy_from_slice(&data[at..at + 8]);
            u64::from_le_bytes(word)
        };
        Ok(Self {
            checksum: field(0),
            total_blocks: field(1),
            total_packets: field(2),
            data_bytes: field(3),
            first_capture_ns: field(4),
            last_capture_ns: field(5),
            closed_at_ns: field(6),
        })
    }
}

/// Chained xxHash64: each chunk is hashed with the previous digest as seed
#[derive(Debug, Clone, Default)]
pub struct ChecksumCalculator {
    state: u64,
    bytes_processed: u64,
}

impl ChecksumCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.state = xxh64(data, self.state);
        self.bytes_processed += data.len() as u64;
    }

    pub fn finalize(&self) -> u64 {
        self.state
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }
}

/// Capture file errors
#[derive(Debug, thiserror::Error)]
pub enum CaptureFormatError {
    #[error("Data too short to contain valid structure")]
    TooShort,

    #[error("Invalid capture magic bytes")]
    InvalidMagic,

    #[error("Invalid footer magic bytes")]
    InvalidFooterMagic,

    #[error("Unsupported capture format version {0}")]
    UnsupportedVersion(u32),

    #[error("Block length {0} exceeds limit")]
    BlockTooLarge(usize),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checksum mismatch: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    #[error("Packet count mismatch: footer says {expected}, read {actual}")]
    PacketCountMismatch { expected: u64, actual: u64 },
}

fn read_prefixed<R: Read>(reader: &mut R) -> Result<Vec<u8>, CaptureFormatError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_BLOCK_LEN {
        return Err(CaptureFormatError::BlockTooLarge(len));
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// Streams blocks into a capture file
pub struct CaptureWriter<W: Write> {
    writer: W,
    checksum: ChecksumCalculator,
    footer: CaptureFooter,
}

impl<W: Write> CaptureWriter<W> {
    /// Start a capture file by writing its header
    pub fn new(mut writer: W, header: &CaptureHeader) -> Result<Self, CaptureFormatError> {
        writer.write_all(&header.to_bytes()?)?;
        Ok(Self {
            writer,
            checksum: ChecksumCalculator::new(),
            footer: CaptureFooter::default(),
        })
    }

    /// Append a block of packets for `test`
    pub fn write_block(
        &mut self,
        test: TestName,
        packets: &[RawPacket],
    ) -> Result<(), CaptureFormatError> {
        let block = CaptureBlock {
            test,
            packets: packets.to_vec(),
        };
        let body = rmp_serde::to_vec_named(&block)?;
        let prefix = (body.len() as u32).to_le_bytes();

        self.writer.write_all(&prefix)?;
        self.writer.write_all(&body)?;
        self.checksum.update(&prefix);
        self.checksum.update(&body);
        self.footer.record_block(&block, body.len());

        debug!(test = %test, packets = packets.len(), bytes = body.len(), "Capture block written");
        Ok(())
    }

    /// Write every window of a capture set, one block per test
    pub fn write_set(&mut self, set: &CaptureSet) -> Result<(), CaptureFormatError> {
        for (test, packets) in set.iter() {
            self.write_block(test, packets)?;
        }
        Ok(())
    }

    /// Write the footer and return the inner writer
    pub fn finish(mut self) -> Result<(W, CaptureFooter), CaptureFormatError> {
        self.footer.checksum = self.checksum.finalize();
        self.footer.closed_at_ns = Utc::now()
            .timestamp_nanos_opt()
            .map(|ns| ns.max(0) as u64)
            .unwrap_or_default();
        if self.footer.total_packets == 0 {
            self.footer.first_capture_ns = 0;
        }
        self.writer.write_all(&self.footer.to_bytes())?;
        self.writer.flush()?;
        Ok((self.writer, self.footer))
    }
}

/// Reads a complete capture file
pub struct CaptureReader<R> {
    reader: R,
    header: CaptureHeader,
    footer: CaptureFooter,
    data_start: u64,
    data_end: u64,
}

impl<R: Read + Seek> CaptureReader<R> {
    /// Open a capture and read its header and footer
    pub fn new(mut reader: R) -> Result<Self, CaptureFormatError> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let header = CaptureHeader::read_from(&mut reader)?;
        let data_start = reader.stream_position()?;
        if file_size < data_start + FOOTER_SIZE as u64 {
            return Err(CaptureFormatError::TooShort);
        }

        let data_end = file_size - FOOTER_SIZE as u64;
        reader.seek(SeekFrom::Start(data_end))?;
        let mut buf = [0u8; FOOTER_SIZE];
        reader.read_exact(&mut buf)?;
        let footer = CaptureFooter::from_bytes(&buf)?;

        Ok(Self {
            reader,
            header,
            footer,
            data_start,
            data_end,
        })
    }

    pub fn header(&self) -> &CaptureHeader {
        &self.header
    }

    pub fn footer(&self) -> &CaptureFooter {
        &self.footer
    }

    /// Read all blocks, verifying the checksum and packet count
    pub fn read_blocks(&mut self) -> Result<Vec<CaptureBlock>, CaptureFormatError> {
        self.reader.seek(SeekFrom::Start(self.data_start))?;
        let mut checksum = ChecksumCalculator::new();
        let mut blocks = Vec::new();

        while self.reader.stream_position()? < self.data_end {
            let body = read_prefixed(&mut self.reader)?;
            checksum.update(&(body.len() as u32).to_le_bytes());
            checksum.update(&body);
            blocks.push(rmp_serde::from_slice::<CaptureBlock>(&body)?);
        }

        let actual = checksum.finalize();
        if actual != self.footer.checksum {
            return Err(CaptureFormatError::ChecksumMismatch {
                expected: self.footer.checksum,
                actual,
            });
        }
        let packets: u64 = blocks.iter().map(|b| b.packets.len() as u64).sum();
        if packets != self.footer.total_packets {
            return Err(CaptureFormatError::PacketCountMismatch {
                expected: self.footer.total_packets,
                actual: packets,
            });
        }
        Ok(blocks)
    }

    /// Read all blocks into a capture set
    pub fn read_set(&mut self) -> Result<CaptureSet, CaptureFormatError> {
        let mut set = CaptureSet::default();
        for block in self.read_blocks()? {
            set.extend(block.test, block.packets);
        }
        Ok(set)
    }
}
