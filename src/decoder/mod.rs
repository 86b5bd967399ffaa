//! Decoder module for Quabo packets
//!
//! Converts raw captured buffers into typed records. Layouts come from a
//! [`FieldLayoutTable`], so a firmware revision change is a configuration
//! change rather than a code change.

pub mod common;
pub mod hk;
pub mod science;
pub mod sequence;

pub use common::{
    board_ip, DecodedField, DecodedRecord, FieldValue, HkRecord, MovieRecord, PacketKind,
    PhRecord, RawField, RawPacket, ReplyRecord, ScienceHeader, WrTimestamp,
};
pub use hk::{covered_bytes, decode_hk, encode_hk};
pub use science::{decode_movie, decode_ph, encode_science};
pub use sequence::{SequenceStep, SequenceTracker, DEFAULT_SEQUENCE_MODULUS};

use tracing::warn;

use crate::common::{EngineError, EngineResult};
use crate::config::FieldLayoutTable;

/// Options that change how a capture window is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Reject movie packets whose WR timestamp is all-zero
    pub require_timing: bool,
    /// Modulus of the PH packet counter
    pub sequence_modulus: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            require_timing: false,
            sequence_modulus: DEFAULT_SEQUENCE_MODULUS,
        }
    }
}

/// Stateless packet decoder bound to a layout table
#[derive(Debug, Clone, Copy)]
pub struct PacketDecoder<'a> {
    layouts: &'a FieldLayoutTable,
    options: DecodeOptions,
}

impl<'a> PacketDecoder<'a> {
    pub fn new(layouts: &'a FieldLayoutTable) -> Self {
        Self::with_options(layouts, DecodeOptions::default())
    }

    pub fn with_options(layouts: &'a FieldLayoutTable, options: DecodeOptions) -> Self {
        Self { layouts, options }
    }

    pub fn options(&self) -> DecodeOptions {
        self.options
    }

    /// Decode a single packet
    pub fn decode(&self, packet: &RawPacket) -> EngineResult<DecodedRecord> {
        let bytes = &packet.bytes;
        let at = packet.capture_ns;
        match packet.kind {
            PacketKind::Hk => decode_hk(&self.layouts.hk, bytes, at).map(DecodedRecord::Hk),
            PacketKind::Ph => decode_ph(&self.layouts.ph, bytes, at).map(DecodedRecord::Ph),
            PacketKind::Movie => {
                decode_movie(&self.layouts.movie, bytes, at, self.options.require_timing)
                    .map(DecodedRecord::Movie)
            }
            PacketKind::Reply => {
                if bytes.is_empty() {
                    return Err(EngineError::malformed(PacketKind::Reply, "empty reply"));
                }
                Ok(DecodedRecord::Reply(ReplyRecord {
                    capture_ns: at,
                    bytes: bytes.clone(),
                }))
            }
        }
    }

    /// Decode a capture window in order
    ///
    /// Errors carry the index of the offending packet. PH packet numbers are
    /// checked for regressions across the whole window.
    pub fn decode_window(&self, packets: &[RawPacket]) -> EngineResult<Vec<DecodedRecord>> {
        let mut tracker = SequenceTracker::new(self.options.sequence_modulus);
        let mut records = Vec::with_capacity(packets.len());

        for (index, packet) in packets.iter().enumerate() {
            let record = self.decode(packet).map_err(|e| e.with_index(index))?;
            if let DecodedRecord::Ph(ph) = &record {
                tracker.observe(index, ph.header.packet_no as u32)?;
            }
            records.push(record);
        }

        if tracker.missing() > 0 {
            warn!(
                packets = packets.len(),
                missing = tracker.missing(),
                wraps = tracker.wraps(),
                "PH window has packet number gaps"
            );
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ph_packet(packet_no: u16, capture_ns: u64) -> RawPacket {
        let layouts = FieldLayoutTable::default();
        let header = ScienceHeader {
            packet_no,
            ..ScienceHeader::default()
        };
        RawPacket::new(
            PacketKind::Ph,
            encode_science(&layouts.ph, &header, &[0, 10, 0]),
            capture_ns,
        )
    }

    #[test]
    fn test_decode_dispatch() {
        let layouts = FieldLayoutTable::default();
        let decoder = PacketDecoder::new(&layouts);

        let hk = RawPacket::new(PacketKind::Hk, vec![0u8; 64], 5);
        let rec = decoder.decode(&hk).unwrap();
        assert_eq!(rec.kind(), PacketKind::Hk);
        assert_eq!(rec.capture_ns(), 5);

        let reply = RawPacket::new(PacketKind::Reply, vec![1, 2, 3], 6);
        assert_eq!(
            decoder.decode(&reply).unwrap().as_reply().unwrap().bytes,
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_empty_reply_is_malformed() {
        let layouts = FieldLayoutTable::default();
        let decoder = PacketDecoder::new(&layouts);
        let reply = RawPacket::new(PacketKind::Reply, Vec::new(), 0);
        assert!(decoder.decode(&reply).is_err());
    }

    #[test]
    fn test_window_attaches_index() {
        let layouts = FieldLayoutTable::default();
        let decoder = PacketDecoder::new(&layouts);
        let packets = vec![
            ph_packet(0, 0),
            ph_packet(1, 10),
            RawPacket::new(PacketKind::Ph, vec![0u8; 17], 20),
        ];
        let err = decoder.decode_window(&packets).unwrap_err();
        assert!(matches!(
            err,
            EngineError::MalformedPacket {
                index: Some(2),
                kind: PacketKind::Ph,
                ..
            }
        ));
    }

    #[test]
    fn test_window_sequence_regression() {
        let layouts = FieldLayoutTable::default();
        let decoder = PacketDecoder::new(&layouts);
        let packets = vec![ph_packet(5, 0), ph_packet(7, 10), ph_packet(6, 20)];
        assert_eq!(
            decoder.decode_window(&packets).unwrap_err(),
            EngineError::SequenceRegression {
                index: 2,
                previous: 7,
                current: 6
            }
        );
    }

    #[test]
    fn test_window_with_gaps_and_wrap() {
        let layouts = FieldLayoutTable::default();
        let decoder = PacketDecoder::new(&layouts);
        let packets = vec![ph_packet(65533, 0), ph_packet(65535, 10), ph_packet(1, 20)];
        let records = decoder.decode_window(&packets).unwrap();
        assert_eq!(records.len(), 3);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_window_gaps_logged_at_warn() {
        let layouts = FieldLayoutTable::default();
        let decoder = PacketDecoder::new(&layouts);
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let packets = vec![ph_packet(0, 0), ph_packet(3, 10)];
            decoder.decode_window(&packets).unwrap();
        });

        let logged = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("packet number gaps"), "{}", logged);
        assert!(logged.contains("WARN"));
    }

    #[test]
    fn test_require_timing_option() {
        let layouts = FieldLayoutTable::default();
        let movie = RawPacket::new(PacketKind::Movie, vec![0u8; 528], 0);

        let lenient = PacketDecoder::new(&layouts);
        assert!(lenient.decode(&movie).is_ok());

        let strict = PacketDecoder::with_options(
            &layouts,
            DecodeOptions {
                require_timing: true,
                ..DecodeOptions::default()
            },
        );
        assert!(strict.decode(&movie).is_err());
    }
}
