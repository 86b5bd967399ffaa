//! Housekeeping packet decoder
//!
//! Walks the field table of an [`HkLayout`] and turns each byte range into a
//! [`DecodedField`]. The raw value of every field is kept so that
//! [`encode_hk`] can rebuild the packet.

use std::collections::BTreeMap;

use super::common::{board_ip, DecodedField, FieldValue, HkRecord, PacketKind, RawField};
use crate::common::{EngineError, EngineResult};
use crate::config::{HkFieldDef, HkFieldKind, HkLayout};

/// Decode an HK payload
pub fn decode_hk(layout: &HkLayout, bytes: &[u8], capture_ns: u64) -> EngineResult<HkRecord> {
    if bytes.len() != layout.packet_len {
        return Err(EngineError::malformed(
            PacketKind::Hk,
            format!("length {}, expected {}", bytes.len(), layout.packet_len),
        ));
    }

    let mut fields = BTreeMap::new();
    for def in &layout.fields {
        let range = def.range();
        let Some(slice) = bytes.get(range.clone()) else {
            return Err(EngineError::malformed(
                PacketKind::Hk,
                format!("field {} ({:?}) out of bounds", def.name, range),
            ));
        };
        fields.insert(def.name.clone(), decode_field(layout, def, slice));
    }

    Ok(HkRecord { capture_ns, fields })
}

fn decode_field(layout: &HkLayout, def: &HkFieldDef, slice: &[u8]) -> DecodedField {
    if let HkFieldKind::Text { reversed } = def.kind {
        let mut text_bytes = slice.to_vec();
        if reversed {
            text_bytes.reverse();
        }
        let text = String::from_utf8_lossy(&text_bytes)
            .trim_end_matches('\0')
            .to_string();
        return DecodedField {
            raw: RawField::Bytes(slice.to_vec()),
            value: FieldValue::Text(text),
        };
    }

    let raw = layout.byte_order.read_uint(slice);
    let value = match def.kind {
        HkFieldKind::Unsigned => FieldValue::Number(def.scale(raw as f64)),
        HkFieldKind::Signed => FieldValue::Number(def.scale(sign_extend(raw, def.width) as f64)),
        HkFieldKind::Bit { bit } => FieldValue::Number(((raw >> bit) & 0x1) as f64),
        HkFieldKind::BoardLocation => FieldValue::Text(board_ip(raw as u16)),
        HkFieldKind::Hex => FieldValue::Text(format!("{:0width$x}", raw, width = def.width * 2)),
        HkFieldKind::Text { .. } => FieldValue::Text(String::from_utf8_lossy(slice).into_owned()),
    };
    DecodedField {
        raw: RawField::Int(raw),
        value,
    }
}

fn sign_extend(raw: u64, width: usize) -> i64 {
    let bits = (width * 8) as u32;
    if bits >= 64 {
        return raw as i64;
    }
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

/// Encode an HK record back into a packet of `layout.packet_len` bytes
///
/// Bytes not covered by any field are zero.
pub fn encode_hk(layout: &HkLayout, record: &HkRecord) -> EngineResult<Vec<u8>> {
    let mut buf = vec![0u8; layout.packet_len];
    for def in &layout.fields {
        let field = record
            .fields
            .get(&def.name)
            .ok_or_else(|| EngineError::MissingField(def.name.clone()))?;
        let out = buf
            .get_mut(def.range())
            .ok_or_else(|| EngineError::config(format!("field {} out of bounds", def.name)))?;
        match &field.raw {
            RawField::Int(value) => layout.byte_order.write_uint(*value, out),
            RawField::Bytes(bytes) => {
                let n = bytes.len().min(out.len());
                out[..n].copy_from_slice(&bytes[..n]);
            }
        }
    }
    Ok(buf)
}

/// Byte ranges covered by at least one field
pub fn covered_bytes(layout: &HkLayout) -> Vec<bool> {
    let mut covered = vec![false; layout.packet_len];
    for def in &layout.fields {
        for i in def.range() {
            if let Some(c) = covered.get_mut(i) {
                *c = true;
            }
        }
    }
    covered
}
