//! MAROC register command and echo check
//!
//! The board echoes the 492-byte MAROC configuration command when echo is
//! enabled. The expected command is rebuilt from the MAROC tag table and the
//! echo is compared byte by byte, skipping the unused gaps between the four
//! chip register blocks.
//!
//! ```text
//! byte 0        0x81 (echo) / 0x01
//! bytes 4..108  chip 0 register (104 bytes, 829 serial bits)
//! bytes 132..   chip 1, 260.. chip 2, 388.. chip 3
//! ```

use std::ops::Range;

use tracing::{debug, warn};

use super::Measurement;
use crate::common::{EngineError, EngineResult};
use crate::decoder::DecodedRecord;

pub const MAROC_COMMAND_LEN: usize = 492;
pub const MAROC_CHIPS: usize = 4;
pub const MAROC_REG_LEN: usize = 104;
/// Length of the MAROC slow-control shift register in bits
pub const SERIAL_COMMAND_LENGTH: usize = 829;

const CHIP_OFFSETS: [usize; MAROC_CHIPS] = [4, 132, 260, 388];
const UNUSED_WINDOWS: [Range<usize>; 3] = [108..132, 236..260, 364..388];
const MAX_FIELD_WIDTH: usize = 16;
const CHANNELS: usize = 64;

/// Single-bit tags and their bit position
const FLAG_TAGS: &[(&str, usize)] = &[
    ("OTABG_ON", 0),
    ("DAC_ON", 1),
    ("SMALL_DAC", 2),
    ("ENB_OUT_ADC", 23),
    ("INV_START_GRAY", 24),
    ("RAMP8B", 25),
    ("RAMP10B", 26),
    ("CMD_CK_MUX", 155),
    ("D1_D2", 156),
    ("INV_DISCR_ADC", 157),
    ("POLAR_DISCRI", 158),
    ("ENB3ST", 159),
    ("VAL_DC_FSB2", 160),
    ("SW_FSB2_50F", 161),
    ("SW_FSB2_100F", 162),
    ("SW_FSB2_100K", 163),
    ("SW_FSB2_50K", 164),
    ("VALID_DC_FS", 165),
    ("CMD_FSB_FSU", 166),
    ("SW_FSB1_50F", 167),
    ("SW_FSB1_100F", 168),
    ("SW_FSB1_100K", 169),
    ("SW_FSB1_50k", 170),
    ("SW_FSU_100K", 171),
    ("SW_FSU_50K", 172),
    ("SW_FSU_25K", 173),
    ("SW_FSU_40F", 174),
    ("SW_FSU_20F", 175),
    ("H1H2_CHOICE", 176),
    ("EN_ADC", 177),
    ("SW_SS_1200F", 178),
    ("SW_SS_600F", 179),
    ("SW_SS_300F", 180),
    ("ON_OFF_SS", 181),
    ("SWB_BUF_2P", 182),
    ("SWB_BUF_1P", 183),
    ("SWB_BUF_500F", 184),
    ("SWB_BUF_250F", 185),
    ("CMD_FSB", 186),
    ("CMD_SS", 187),
    ("CMD_FSU", 188),
];

/// Placement of a tag's value in the shift register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarocField {
    pub lsb_pos: usize,
    pub width: usize,
    /// Value is shifted in MSB first and must be bit-reversed
    pub reversed: bool,
}

impl MarocField {
    const fn flag(lsb_pos: usize) -> Self {
        Self {
            lsb_pos,
            width: 1,
            reversed: false,
        }
    }

    const fn reversed(lsb_pos: usize, width: usize) -> Self {
        Self {
            lsb_pos,
            width,
            reversed: true,
        }
    }

    /// Resolve a tag name
    pub fn for_tag(tag: &str) -> Option<Self> {
        if let Some((_, pos)) = FLAG_TAGS.iter().find(|(name, _)| *name == tag) {
            return Some(Self::flag(*pos));
        }
        match tag {
            "DAC1" => return Some(Self::reversed(13, 10)),
            "DAC2" => return Some(Self::reversed(3, 10)),
            _ => {}
        }
        if let Some(chan) = channel(tag, "MASKOR1_") {
            return Some(Self::flag(154 - 2 * chan));
        }
        if let Some(chan) = channel(tag, "MASKOR2_") {
            return Some(Self::flag(153 - 2 * chan));
        }
        if let Some(chan) = channel(tag, "CTEST_") {
            return Some(Self::flag(828 - chan));
        }
        if let Some(chan) = channel(tag, "GAIN") {
            return Some(Self::reversed(757 - 9 * chan, 8));
        }
        None
    }
}

fn channel(tag: &str, prefix: &str) -> Option<usize> {
    let chan: usize = tag.strip_prefix(prefix)?.parse().ok()?;
    (chan < CHANNELS).then_some(chan)
}

/// Reverse the low `width` bits of `value`
pub fn reverse_bits(value: u32, width: usize) -> u32 {
    (0..width).fold(0, |out, i| (out << 1) | ((value >> i) & 1))
}

/// Parse an integer with a `0x`/`0o`/`0b` prefix or in decimal
pub fn parse_int(text: &str) -> Option<u32> {
    let text = text.trim();
    let lower = text.to_ascii_lowercase();
    let (digits, radix) = if let Some(rest) = lower.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (rest, 2)
    } else {
        (lower.as_str(), 10)
    };
    u32::from_str_radix(&digits.replace('_', ""), radix).ok()
}

/// Builds the MAROC configuration command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarocCommandBuilder {
    regs: [[u8; MAROC_REG_LEN]; MAROC_CHIPS],
}

impl Default for MarocCommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MarocCommandBuilder {
    pub fn new() -> Self {
        Self {
            regs: [[0; MAROC_REG_LEN]; MAROC_CHIPS],
        }
    }

    /// Build from a tag table (`tag -> "v0,v1,v2,v3"`)
    ///
    /// Unknown tags are ignored with a warning.
    pub fn from_tags<'a, I>(tags: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut builder = Self::new();
        for (tag, values) in tags {
            if !builder.apply_tag(tag, values)? {
                warn!(tag = %tag, "Ignoring unknown MAROC tag");
            }
        }
        Ok(builder)
    }

    /// Set one field of one chip's register
    ///
    /// The value is masked to `width` bits. Fields may span up to three bytes.
    pub fn set_bits(
        &mut self,
        chip: usize,
        lsb_pos: usize,
        width: usize,
        value: u32,
    ) -> EngineResult<()> {
        if chip >= MAROC_CHIPS {
            return Err(EngineError::config(format!("MAROC chip {} out of range", chip)));
        }
        if width == 0 || width > MAX_FIELD_WIDTH || lsb_pos + width > SERIAL_COMMAND_LENGTH {
            return Err(EngineError::config(format!(
                "MAROC field at bit {} with width {} does not fit",
                lsb_pos, width
            )));
        }

        let shift = lsb_pos % 8;
        let byte_pos = lsb_pos / 8;
        let field_mask = (1u32 << width) - 1;
        let mask = field_mask << shift;
        let bits = (value & field_mask) << shift;

        for k in 0..3 {
            let m = (mask >> (8 * k)) as u8;
            if m == 0 {
                continue;
            }
            let reg = &mut self.regs[chip][byte_pos + k];
            *reg = (*reg & !m) | ((bits >> (8 * k)) as u8 & m);
        }
        Ok(())
    }

    /// Apply a tag with four comma-separated values, one per chip
    ///
    /// Returns `Ok(false)` if the tag is unknown.
    pub fn apply_tag(&mut self, tag: &str, values: &str) -> EngineResult<bool> {
        let Some(field) = MarocField::for_tag(tag) else {
            return Ok(false);
        };

        let parsed = values
            .split(',')
            .map(|v| {
                parse_int(v).ok_or_else(|| {
                    EngineError::config(format!("MAROC tag {}: bad value {:?}", tag, v))
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        if parsed.len() != MAROC_CHIPS {
            return Err(EngineError::config(format!(
                "MAROC tag {} needs {} values, got {}",
                tag,
                MAROC_CHIPS,
                parsed.len()
            )));
        }

        for (chip, value) in parsed.into_iter().enumerate() {
            let value = if field.reversed {
                reverse_bits(value, field.width)
            } else {
                value
            };
            self.set_bits(chip, field.lsb_pos, field.width, value)?;
        }
        debug!(tag, values, "MAROC tag applied");
        Ok(true)
    }

    /// Register bytes of one chip
    pub fn register(&self, chip: usize) -> Option<&[u8]> {
        self.regs.get(chip).map(|r| &r[..])
    }

    /// Assemble the 492-byte command
    pub fn build(&self, echo: bool) -> Vec<u8> {
        let mut cmd = vec![0u8; MAROC_COMMAND_LEN];
        cmd[0] = if echo { 0x81 } else { 0x01 };
        for (reg, offset) in self.regs.iter().zip(CHIP_OFFSETS) {
            cmd[offset..offset + MAROC_REG_LEN].copy_from_slice(reg);
        }
        cmd
    }
}

/// Result of comparing a MAROC echo against the expected command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoComparison {
    /// Number of differing bytes outside the unused windows
    pub mismatches: usize,
    /// Human-readable verdict: `match` or the first difference
    pub status: String,
}

fn is_unused(index: usize) -> bool {
    UNUSED_WINDOWS.iter().any(|w| w.contains(&index))
}

/// Compare an echo with the expected command
pub fn compare_echo(expected: &[u8], echo: &[u8]) -> EchoComparison {
    let mut mismatches = 0;
    let mut first = None;
    for (i, (e, r)) in expected.iter().zip(echo).enumerate() {
        if is_unused(i) || e == r {
            continue;
        }
        mismatches += 1;
        first.get_or_insert_with(|| {
            format!("byte {}: expected 0x{:02x}, got 0x{:02x}", i, e, r)
        });
    }

    if echo.len() != expected.len() {
        mismatches += expected.len().abs_diff(echo.len());
        return EchoComparison {
            mismatches,
            status: format!("length {}, expected {}", echo.len(), expected.len()),
        };
    }
    EchoComparison {
        mismatches,
        status: first.unwrap_or_else(|| "match".to_string()),
    }
}

fn echo_comparisons(
    measurement: &str,
    expected: &[u8],
    records: &[DecodedRecord],
) -> EngineResult<Vec<EchoComparison>> {
    let out: Vec<_> = records
        .iter()
        .filter_map(DecodedRecord::as_reply)
        .map(|r| compare_echo(expected, &r.bytes))
        .collect();
    if out.is_empty() {
        return Err(EngineError::insufficient(measurement, 1, 0));
    }
    Ok(out)
}

/// `match` or a description of the first difference, per echo
pub fn echo_status(
    measurement: &str,
    expected: &[u8],
    records: &[DecodedRecord],
) -> EngineResult<Vec<Measurement>> {
    Ok(echo_comparisons(measurement, expected, records)?
        .into_iter()
        .map(|c| Measurement::exact(measurement, c.status))
        .collect())
}

/// Number of differing bytes, per echo
pub fn echo_mismatches(
    measurement: &str,
    expected: &[u8],
    records: &[DecodedRecord],
) -> EngineResult<Vec<Measurement>> {
    Ok(echo_comparisons(measurement, expected, records)?
        .into_iter()
        .map(|c| Measurement::numeric(measurement, c.mismatches as f64))
        .collect())
}
