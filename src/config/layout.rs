//! Packet field layouts
//!
//! Offsets and widths depend on the firmware revision, so they are data
//! rather than decoder logic. The defaults follow the current Quabo packet
//! interface:
//!
//! ```text
//! HK (64 bytes, big endian)
//!   0  tag        2  boardloc   4..11  hvmon0-3   12..19 hvimon0-3
//!   20 rawhvmon   22 v12mon     24 v18mon   26 v33mon   28 v37mon
//!   30 i10mon     32 i18mon     34 i33mon   36 det_temp 38 fpga_temp
//!   40 vccint     42 vccaux     44 uid (8)  52 status bits
//!   53 pcbrev     56 fwtime (4) 60 fwver (4, reversed ASCII)
//!
//! PH / MOVIE
//!   0 acq_mode  1 packet_ver  2 packet_no  4 boardloc  6 tai  10 nanosec
//!   16.. samples
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Byte order of multi-byte fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    /// Read an unsigned integer of `bytes.len()` bytes (at most 8)
    pub fn read_uint(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::Big => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64),
            ByteOrder::Little => bytes
                .iter()
                .rev()
                .fold(0u64, |acc, &b| (acc << 8) | b as u64),
        }
    }

    /// Write the low `out.len()` bytes of `value`
    pub fn write_uint(self, value: u64, out: &mut [u8]) {
        let width = out.len();
        for i in 0..width {
            let byte = (value >> (8 * i)) as u8;
            match self {
                ByteOrder::Big => out[width - 1 - i] = byte,
                ByteOrder::Little => out[i] = byte,
            }
        }
    }
}

/// How the raw bytes of an HK field are interpreted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HkFieldKind {
    /// Unsigned integer, scaled by lsb/constant
    Unsigned,
    /// Two's complement integer, scaled by lsb/constant
    Signed,
    /// Single bit of the field
    Bit { bit: u8 },
    /// ASCII text, optionally stored byte-reversed
    Text {
        #[serde(default)]
        reversed: bool,
    },
    /// 16-bit board location, rendered as 192.168.<hi>.<lo>
    BoardLocation,
    /// Integer rendered as zero-padded lowercase hex
    Hex,
}

/// One HK field definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HkFieldDef {
    pub name: String,
    pub offset: usize,
    pub width: usize,
    #[serde(flatten)]
    pub kind: HkFieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<f64>,
}

impl HkFieldDef {
    fn new(name: &str, offset: usize, width: usize, kind: HkFieldKind) -> Self {
        Self {
            name: name.to_string(),
            offset,
            width,
            kind,
            lsb: None,
            constant: None,
        }
    }

    fn unsigned(name: &str, offset: usize, width: usize) -> Self {
        Self::new(name, offset, width, HkFieldKind::Unsigned)
    }

    fn scaled(name: &str, offset: usize, lsb: f64) -> Self {
        Self {
            lsb: Some(lsb),
            ..Self::unsigned(name, offset, 2)
        }
    }

    fn with_constant(mut self, constant: f64) -> Self {
        self.constant = Some(constant);
        self
    }

    /// Byte range covered by this field
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.width
    }

    /// Scale a raw integer into physical units
    pub fn scale(&self, raw: f64) -> f64 {
        raw * self.lsb.unwrap_or(1.0) + self.constant.unwrap_or(0.0)
    }
}

/// HK packet layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HkLayout {
    pub packet_len: usize,
    #[serde(default)]
    pub byte_order: ByteOrder,
    pub fields: Vec<HkFieldDef>,
}

const HV_LSB: f64 = -1.209361e-3;
const HVI_LSB: f64 = -38.147e-9;

impl Default for HkLayout {
    fn default() -> Self {
        let mut fields = vec![
            HkFieldDef::new("tag", 0, 1, HkFieldKind::Signed),
            HkFieldDef::new("boardloc", 2, 2, HkFieldKind::BoardLocation),
        ];
        for i in 0..4 {
            fields.push(HkFieldDef::scaled(&format!("hvmon{}", i), 4 + 2 * i, HV_LSB));
        }
        for i in 0..4 {
            // (65536 - N) * 38.147 nA
            fields.push(
                HkFieldDef::scaled(&format!("hvimon{}", i), 12 + 2 * i, HVI_LSB)
                    .with_constant(65536.0 * 38.147e-9),
            );
        }
        fields.extend([
            HkFieldDef::scaled("rawhvmon", 20, HV_LSB),
            HkFieldDef::scaled("v12mon", 22, 19.07e-6),
            HkFieldDef::scaled("v18mon", 24, 38.14e-6),
            HkFieldDef::scaled("v33mon", 26, 76.2e-6),
            HkFieldDef::scaled("v37mon", 28, 76.2e-6),
            HkFieldDef::scaled("i10mon", 30, 182e-6),
            HkFieldDef::scaled("i18mon", 32, 37.8e-6),
            HkFieldDef::scaled("i33mon", 34, 37.8e-6),
            HkFieldDef::scaled("det_temp", 36, 0.25),
            HkFieldDef::scaled("fpga_temp", 38, 1.0 / 130.04).with_constant(-273.15),
            HkFieldDef::scaled("vccint", 40, 3.0 / 65536.0),
            HkFieldDef::scaled("vccaux", 42, 3.0 / 65536.0),
            HkFieldDef::new("uid", 44, 8, HkFieldKind::Hex),
            HkFieldDef::new("shutter_status", 52, 1, HkFieldKind::Bit { bit: 0 }),
            HkFieldDef::new("sensor_status", 52, 1, HkFieldKind::Bit { bit: 1 }),
            HkFieldDef::new("pcbrev", 53, 1, HkFieldKind::Bit { bit: 0 }),
            HkFieldDef::unsigned("fwtime", 56, 4),
            HkFieldDef::new("fwver", 60, 4, HkFieldKind::Text { reversed: true }),
        ]);

        Self {
            packet_len: 64,
            byte_order: ByteOrder::Big,
            fields,
        }
    }
}

impl HkLayout {
    /// Look up a field definition by name
    pub fn field(&self, name: &str) -> Option<&HkFieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check that every field fits in the packet and has a sensible width
    pub fn validate(&self) -> Result<(), ConfigError> {
        for field in &self.fields {
            if field.width == 0 || field.offset + field.width > self.packet_len {
                return Err(ConfigError::InvalidValue(format!(
                    "HK field {} ({}..{}) does not fit in {} bytes",
                    field.name,
                    field.offset,
                    field.offset + field.width,
                    self.packet_len
                )));
            }
            let numeric = !matches!(field.kind, HkFieldKind::Text { .. });
            if numeric && field.width > 8 {
                return Err(ConfigError::InvalidValue(format!(
                    "HK field {} is {} bytes wide, numeric fields are at most 8",
                    field.name, field.width
                )));
            }
            if let HkFieldKind::Bit { bit } = field.kind {
                if bit as usize >= field.width * 8 {
                    return Err(ConfigError::InvalidValue(format!(
                        "HK field {} selects bit {} of a {}-bit field",
                        field.name,
                        bit,
                        field.width * 8
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Layout of a PH or movie packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScienceLayout {
    /// Header length; samples start here
    pub header_len: usize,
    /// Bytes per sample (1 or 2)
    pub sample_width: usize,
    /// Samples are two's complement
    pub signed: bool,
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Fixed pixel count; `None` derives the count from the payload length
    #[serde(default)]
    pub pixels: Option<usize>,
    /// Offset of the WR TAI seconds field
    #[serde(default = "default_tai_offset")]
    pub tai_offset: usize,
    /// Offset of the WR nanoseconds field
    #[serde(default = "default_nanosec_offset")]
    pub nanosec_offset: usize,
    /// Offset of the 16-bit packet number
    #[serde(default = "default_packet_no_offset")]
    pub packet_no_offset: usize,
}

/// Offset of the 16-bit board location in PH and movie headers
pub const SCIENCE_BOARDLOC_OFFSET: usize = 4;

fn default_tai_offset() -> usize {
    6
}

fn default_nanosec_offset() -> usize {
    10
}

fn default_packet_no_offset() -> usize {
    2
}

impl ScienceLayout {
    /// Default pulse-height layout: 16-bit signed samples, count from length
    pub fn pulse_height() -> Self {
        Self {
            header_len: 16,
            sample_width: 2,
            signed: true,
            byte_order: ByteOrder::Big,
            pixels: None,
            tai_offset: default_tai_offset(),
            nanosec_offset: default_nanosec_offset(),
            packet_no_offset: default_packet_no_offset(),
        }
    }

    /// Default 16-bit movie layout: 256 pixels (528 bytes)
    pub fn movie_16bit() -> Self {
        Self {
            signed: false,
            pixels: Some(256),
            ..Self::pulse_height()
        }
    }

    /// 8-bit movie layout: 256 pixels (272 bytes)
    pub fn movie_8bit() -> Self {
        Self {
            sample_width: 1,
            ..Self::movie_16bit()
        }
    }

    /// Expected total packet length, if fixed
    pub fn packet_len(&self) -> Option<usize> {
        self.pixels.map(|n| self.header_len + n * self.sample_width)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.sample_width, 1 | 2) {
            return Err(ConfigError::InvalidValue(format!(
                "sample_width must be 1 or 2, got {}",
                self.sample_width
            )));
        }
        // acq_mode, packet_ver and boardloc sit at fixed offsets 0, 1 and 4
        let header_fields = [
            (0, 2),
            (SCIENCE_BOARDLOC_OFFSET, 2),
            (self.tai_offset, 4),
            (self.nanosec_offset, 4),
            (self.packet_no_offset, 2),
        ];
        if header_fields
            .iter()
            .any(|(offset, width)| offset + width > self.header_len)
        {
            return Err(ConfigError::InvalidValue(
                "science header fields exceed header_len".to_string(),
            ));
        }
        Ok(())
    }
}

/// Layouts for every packet kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldLayoutTable {
    #[serde(default)]
    pub hk: HkLayout,
    #[serde(default = "ScienceLayout::pulse_height")]
    pub ph: ScienceLayout,
    #[serde(default = "ScienceLayout::movie_16bit")]
    pub movie: ScienceLayout,
}

impl Default for FieldLayoutTable {
    fn default() -> Self {
        Self {
            hk: HkLayout::default(),
            ph: ScienceLayout::pulse_height(),
            movie: ScienceLayout::movie_16bit(),
        }
    }
}

impl FieldLayoutTable {
    /// Load a layout table from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate a layout table from JSON
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let table: Self = serde_json::from_str(content)?;
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hk.validate()?;
        self.ph.validate()?;
        self.movie.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hk_layout_is_valid() {
        let layout = HkLayout::default();
        assert_eq!(layout.packet_len, 64);
        assert!(layout.validate().is_ok());
        assert_eq!(layout.field("uid").unwrap().width, 8);
        assert_eq!(layout.field("fwver").unwrap().offset, 60);
        assert!(layout.field("nonexistent").is_none());
    }

    #[test]
    fn fpga_temp_scaling() {
        let layout = HkLayout::default();
        let field = layout.field("fpga_temp").unwrap();
        // 40 °C ≈ (313.15 * 130.04) counts
        let raw = (313.15 * 130.04_f64).round();
        assert!((field.scale(raw) - 40.0).abs() < 0.01);
    }

    #[test]
    fn byte_order_read_write() {
        let mut buf = [0u8; 4];
        ByteOrder::Big.write_uint(0x1234_5678, &mut buf);
        assert_eq!(buf, [0x12, 0x34, 0x56, 0x78]);
        assert_eq!(ByteOrder::Big.read_uint(&buf), 0x1234_5678);

        ByteOrder::Little.write_uint(0x1234_5678, &mut buf);
        assert_eq!(buf, [0x78, 0x56, 0x34, 0x12]);
        assert_eq!(ByteOrder::Little.read_uint(&buf), 0x1234_5678);
    }

    #[test]
    fn science_packet_lengths() {
        assert_eq!(ScienceLayout::movie_16bit().packet_len(), Some(528));
        assert_eq!(ScienceLayout::movie_8bit().packet_len(), Some(272));
        assert_eq!(ScienceLayout::pulse_height().packet_len(), None);
    }

    #[test]
    fn invalid_field_rejected() {
        let mut layout = HkLayout::default();
        layout.fields.push(HkFieldDef::unsigned("past_end", 63, 2));
        assert!(matches!(
            layout.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn invalid_sample_width_rejected() {
        let layout = ScienceLayout {
            sample_width: 3,
            ..ScienceLayout::pulse_height()
        };
        assert!(layout.validate().is_err());
    }

    #[test]
    fn bit_outside_field_rejected() {
        let mut layout = HkLayout::default();
        layout
            .fields
            .push(HkFieldDef::new("flag", 56, 1, HkFieldKind::Bit { bit: 8 }));
        assert!(matches!(
            layout.validate(),
            Err(ConfigError::InvalidValue(_))
        ));

        let mut layout = HkLayout::default();
        layout
            .fields
            .push(HkFieldDef::new("flag", 56, 8, HkFieldKind::Bit { bit: 63 }));
        assert!(layout.validate().is_ok());
    }

    #[test]
    fn short_science_header_rejected() {
        let layout = ScienceLayout {
            header_len: 4,
            tai_offset: 0,
            nanosec_offset: 0,
            packet_no_offset: 0,
            ..ScienceLayout::pulse_height()
        };
        assert!(matches!(
            layout.validate(),
            Err(ConfigError::InvalidValue(_))
        ));

        let json = r#"{"ph": {"header_len": 4, "sample_width": 2, "signed": true,
            "tai_offset": 0, "nanosec_offset": 0, "packet_no_offset": 0}}"#;
        assert!(FieldLayoutTable::from_json(json).is_err());
    }

    #[test]
    fn layout_table_json_roundtrip() {
        let table = FieldLayoutTable::default();
        let json = serde_json::to_string_pretty(&table).unwrap();
        let restored = FieldLayoutTable::from_json(&json).unwrap();
        assert_eq!(restored, table);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let json = r#"{
            "movie": {"header_len": 16, "sample_width": 1, "signed": false, "pixels": 256}
        }"#;
        let table = FieldLayoutTable::from_json(json).unwrap();
        assert_eq!(table.movie.packet_len(), Some(272));
        assert_eq!(table.hk, HkLayout::default());
        assert_eq!(table.movie.tai_offset, 6);
    }
}
