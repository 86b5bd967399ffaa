//! PH and movie packet decoder
//!
//! Both packet types share a 16-byte header followed by per-pixel samples.
//!
//! # Data Format
//!
//! ```text
//! byte 0      acq_mode
//! byte 1      packet_ver
//! bytes 2-3   packet_no   (u16)
//! bytes 4-5   boardloc    (u16)
//! bytes 6-9   WR TAI      (u32)
//! bytes 10-13 WR nanosec  (u32)
//! bytes 16..  samples     (1 or 2 bytes each)
//! ```

use super::common::{MovieRecord, PacketKind, PhRecord, ScienceHeader, WrTimestamp};
use crate::common::{EngineError, EngineResult};
use crate::config::{ScienceLayout, SCIENCE_BOARDLOC_OFFSET};

/// Decode a pulse-height packet
pub fn decode_ph(layout: &ScienceLayout, bytes: &[u8], capture_ns: u64) -> EngineResult<PhRecord> {
    let (header, samples) = decode_science(layout, PacketKind::Ph, bytes)?;
    Ok(PhRecord {
        capture_ns,
        header,
        samples,
    })
}

/// Decode a movie packet
///
/// With `require_timing` an all-zero WR timestamp is rejected; otherwise it
/// is kept and the record is flagged as low confidence.
pub fn decode_movie(
    layout: &ScienceLayout,
    bytes: &[u8],
    capture_ns: u64,
    require_timing: bool,
) -> EngineResult<MovieRecord> {
    let (header, samples) = decode_science(layout, PacketKind::Movie, bytes)?;
    let timestamp_valid = !header.timestamp.is_zero();
    if !timestamp_valid && require_timing {
        return Err(EngineError::malformed(
            PacketKind::Movie,
            "WR timestamp is all-zero (timing source not synchronized)",
        ));
    }
    Ok(MovieRecord {
        capture_ns,
        header,
        samples,
        timestamp_valid,
    })
}

fn decode_science(
    layout: &ScienceLayout,
    kind: PacketKind,
    bytes: &[u8],
) -> EngineResult<(ScienceHeader, Vec<i32>)> {
    check_length(layout, kind, bytes.len())?;

    let order = layout.byte_order;
    let read = |offset: usize, width: usize| order.read_uint(&bytes[offset..offset + width]);

    let header = ScienceHeader {
        acq_mode: bytes[0],
        packet_ver: bytes[1],
        packet_no: read(layout.packet_no_offset, 2) as u16,
        boardloc: read(SCIENCE_BOARDLOC_OFFSET, 2) as u16,
        timestamp: WrTimestamp::new(
            read(layout.tai_offset, 4) as u32,
            read(layout.nanosec_offset, 4) as u32,
        ),
    };

    let samples = bytes[layout.header_len..]
        .chunks_exact(layout.sample_width)
        .map(|chunk| decode_sample(layout, chunk))
        .collect();

    Ok((header, samples))
}

fn check_length(layout: &ScienceLayout, kind: PacketKind, len: usize) -> EngineResult<()> {
    if let Some(expected) = layout.packet_len() {
        if len != expected {
            return Err(EngineError::malformed(
                kind,
                format!("length {}, expected {}", len, expected),
            ));
        }
        return Ok(());
    }

    if len < layout.header_len {
        return Err(EngineError::malformed(
            kind,
            format!("length {} shorter than {}-byte header", len, layout.header_len),
        ));
    }
    let payload = len - layout.header_len;
    if payload % layout.sample_width != 0 {
        return Err(EngineError::malformed(
            kind,
            format!(
                "payload of {} bytes is not a whole number of {}-byte samples",
                payload, layout.sample_width
            ),
        ));
    }
    Ok(())
}

fn decode_sample(layout: &ScienceLayout, chunk: &[u8]) -> i32 {
    let raw = layout.byte_order.read_uint(chunk);
    match (layout.sample_width, layout.signed) {
        (1, true) => raw as u8 as i8 as i32,
        (1, false) => raw as u8 as i32,
        (_, true) => raw as u16 as i16 as i32,
        (_, false) => raw as u16 as i32,
    }
}

/// Build a science packet (used by the emulator and tests)
pub fn encode_science(layout: &ScienceLayout, header: &ScienceHeader, samples: &[i32]) -> Vec<u8> {
    let mut buf = vec![0u8; layout.header_len + samples.len() * layout.sample_width];
    let order = layout.byte_order;
    buf[0] = header.acq_mode;
    buf[1] = header.packet_ver;
    order.write_uint(
        header.packet_no as u64,
        &mut buf[layout.packet_no_offset..layout.packet_no_offset + 2],
    );
    order.write_uint(
        header.boardloc as u64,
        &mut buf[SCIENCE_BOARDLOC_OFFSET..SCIENCE_BOARDLOC_OFFSET + 2],
    );
    order.write_uint(
        header.timestamp.tai as u64,
        &mut buf[layout.tai_offset..layout.tai_offset + 4],
    );
    order.write_uint(
        header.timestamp.nanosec as u64,
        &mut buf[layout.nanosec_offset..layout.nanosec_offset + 4],
    );
    for (i, sample) in samples.iter().enumerate() {
        let start = layout.header_len + i * layout.sample_width;
        order.write_uint(
            *sample as u64,
            &mut buf[start..start + layout.sample_width],
        );
    }
    buf
}
