//! Packet emulator - synthesizes Quabo packet windows for tests and dry runs
//!
//! Produces a [`CaptureSet`] covering every autotest, together with the
//! [`ExpectationTable`] the synthetic board should satisfy.
//!
//! Signal model:
//! - HK: fixed readings, capture cadence `hk_period_ns` with Gaussian jitter
//! - PH: flat baseline plus one Gaussian pulse per packet, amplitude jittered
//! - MOVIE: baseline plus Gaussian pixel noise, WR time advancing by
//!   `movie_period_ns`
//! - REPLY: MAROC echo built from the tag table, destination-MAC readback

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::capture::CaptureSet;
use crate::common::EngineError;
use crate::config::{FieldLayoutTable, HkFieldKind, MarocTagTable};
use crate::decoder::{
    board_ip, decode_hk, encode_hk, encode_science, PacketKind, RawField, RawPacket,
    ScienceHeader, WrTimestamp,
};
use crate::evaluator::{Expectation, ExpectationTable};
use crate::extractor::{dest_mac_reply, format_mac, mac_from_uid, MarocCommandBuilder};
use crate::orchestrator::TestName;

/// Emulator configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// RNG seed; equal seeds give identical captures
    pub seed: u64,
    /// Flash UID as 16 hex digits
    pub board_uid: String,
    /// Board location, high byte = third IP octet
    pub boardloc: u16,
    /// Firmware version string (4 ASCII characters)
    pub fw_version: String,
    /// HK readings in physical units, keyed by field name
    pub hk_readings: BTreeMap<String, f64>,
    pub hk_packets: usize,
    pub hk_period_ns: u64,
    /// Standard deviation of capture-time jitter
    pub capture_jitter_ns: f64,
    pub ph_packets: usize,
    pub ph_period_ns: u64,
    pub ph_samples: usize,
    pub ph_baseline: i32,
    pub pulse_amplitude: f64,
    /// Standard deviation of the pulse amplitude
    pub pulse_amplitude_jitter: f64,
    /// Gaussian pulse width in samples
    pub pulse_sigma: f64,
    pub movie_packets: usize,
    pub movie_period_ns: u64,
    pub movie_baseline: f64,
    pub movie_noise: f64,
    /// TAI seconds of the first science packet
    pub start_tai: u32,
    pub ph_dest_mac: [u8; 6],
    pub movie_dest_mac: [u8; 6],
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        let hk_readings = [
            ("det_temp", 25.0),
            ("fpga_temp", 45.0),
            ("vccint", 1.0),
            ("vccaux", 1.8),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            seed: 42,
            board_uid: "0011223344556677".to_string(),
            boardloc: 0x0101,
            fw_version: "v1.0".to_string(),
            hk_readings,
            hk_packets: 10,
            hk_period_ns: 1_000_000_000,
            capture_jitter_ns: 100_000.0,
            ph_packets: 10,
            ph_period_ns: 1_000_000,
            ph_samples: 64,
            ph_baseline: 0,
            pulse_amplitude: 1000.0,
            pulse_amplitude_jitter: 20.0,
            pulse_sigma: 1.5,
            movie_packets: 10,
            movie_period_ns: 1_000_000,
            movie_baseline: 200.0,
            movie_noise: 5.0,
            start_tai: 1_700_000_000,
            ph_dest_mac: [0x3c, 0xec, 0xef, 0x10, 0x20, 0x30],
            movie_dest_mac: [0x3c, 0xec, 0xef, 0x10, 0x20, 0x31],
        }
    }
}

/// Emulator errors
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Invalid board UID {0:?}, expected 16 hex digits")]
    InvalidUid(String),

    #[error("HK layout has no field {0}")]
    UnknownField(String),

    #[error("HK reading {field}={value} does not fit the field")]
    InvalidReading { field: String, value: f64 },

    #[error("Invalid emulator setting: {0}")]
    InvalidSetting(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Deterministic packet generator for one synthetic board
pub struct Emulator {
    config: EmulatorConfig,
    layouts: FieldLayoutTable,
    maroc_tags: MarocTagTable,
    uid: u64,
    rng: StdRng,
    amplitude: Normal<f64>,
    pixel_noise: Normal<f64>,
    jitter: Normal<f64>,
    capture_ns: u64,
    wr_ns: u64,
    packet_no: u16,
}

impl Emulator {
    pub fn new(config: EmulatorConfig, layouts: FieldLayoutTable) -> Result<Self, EmulatorError> {
        let uid = parse_uid(&config.board_uid)?;
        let normal = |mean: f64, sd: f64, what: &str| {
            Normal::new(mean, sd)
                .map_err(|e| EmulatorError::InvalidSetting(format!("{}: {}", what, e)))
        };
        let amplitude = normal(
            config.pulse_amplitude,
            config.pulse_amplitude_jitter,
            "pulse_amplitude_jitter",
        )?;
        let pixel_noise = normal(config.movie_baseline, config.movie_noise, "movie_noise")?;
        let jitter = normal(0.0, config.capture_jitter_ns, "capture_jitter_ns")?;
        if config.ph_samples < 3 {
            return Err(EmulatorError::InvalidSetting(
                "ph_samples must be at least 3".to_string(),
            ));
        }

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            wr_ns: config.start_tai as u64 * 1_000_000_000,
            config,
            layouts,
            maroc_tags: MarocTagTable::new(),
            uid,
            amplitude,
            pixel_noise,
            jitter,
            capture_ns: 0,
            packet_no: 0,
        })
    }

    /// Use `tags` for the MAROC echo
    pub fn with_maroc_tags(mut self, tags: MarocTagTable) -> Self {
        self.maroc_tags = tags;
        self
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Advance the capture clock by `period_ns` plus jitter
    fn next_capture_ns(&mut self, period_ns: u64) -> u64 {
        let jitter = self.jitter.sample(&mut self.rng);
        let step = (period_ns as f64 + jitter).max(1.0) as u64;
        self.capture_ns += step;
        self.capture_ns
    }

    fn next_wr(&mut self, period_ns: u64) -> WrTimestamp {
        self.wr_ns += period_ns;
        WrTimestamp::new(
            (self.wr_ns / 1_000_000_000) as u32,
            (self.wr_ns % 1_000_000_000) as u32,
        )
    }

    fn science_header(&mut self, acq_mode: u8, period_ns: u64) -> ScienceHeader {
        let header = ScienceHeader {
            acq_mode,
            packet_ver: 1,
            packet_no: self.packet_no,
            boardloc: self.config.boardloc,
            timestamp: self.next_wr(period_ns),
        };
        self.packet_no = self.packet_no.wrapping_add(1);
        header
    }

    /// One HK packet carrying the configured readings
    pub fn hk_packet(&mut self) -> Result<RawPacket, EmulatorError> {
        let layout = &self.layouts.hk;
        let mut record = decode_hk(layout, &vec![0u8; layout.packet_len], 0)?;

        let mut set_raw = |name: &str, raw: RawField| -> Result<(), EmulatorError> {
            let field = record
                .fields
                .get_mut(name)
                .ok_or_else(|| EmulatorError::UnknownField(name.to_string()))?;
            field.raw = raw;
            Ok(())
        };
        set_raw("boardloc", RawField::Int(self.config.boardloc as u64))?;
        set_raw("uid", RawField::Int(self.uid))?;
        if layout.field("fwver").is_some() {
            let mut text = self.config.fw_version.clone().into_bytes();
            if matches!(
                layout.field("fwver").map(|d| &d.kind),
                Some(HkFieldKind::Text { reversed: true })
            ) {
                text.reverse();
            }
            set_raw("fwver", RawField::Bytes(text))?;
        }
        for (name, value) in &self.config.hk_readings {
            set_raw(name, RawField::Int(raw_reading(&self.layouts, name, *value)?))?;
        }

        let bytes = encode_hk(layout, &record)?;
        let capture_ns = self.next_capture_ns(self.config.hk_period_ns);
        Ok(RawPacket::new(PacketKind::Hk, bytes, capture_ns))
    }

    /// One PH packet with a single Gaussian pulse
    pub fn ph_packet(&mut self) -> RawPacket {
        let n = self.config.ph_samples;
        let margin = (4.0 * self.config.pulse_sigma).ceil() as usize + 1;
        let center = if 2 * margin < n {
            self.rng.gen_range(margin..n - margin)
        } else {
            n / 2
        };
        let amplitude = self.amplitude.sample(&mut self.rng).max(0.0);
        let two_sigma_sq = 2.0 * self.config.pulse_sigma.powi(2);

        let samples: Vec<i32> = (0..n)
            .map(|i| {
                let d = i as f64 - center as f64;
                let pulse = amplitude * (-(d * d) / two_sigma_sq).exp();
                (self.config.ph_baseline + pulse.round() as i32).clamp(i16::MIN as i32, i16::MAX as i32)
            })
            .collect();

        let header = self.science_header(0x1, self.config.ph_period_ns);
        let capture_ns = self.next_capture_ns(self.config.ph_period_ns);
        let bytes = encode_science(&self.layouts.ph, &header, &samples);
        RawPacket::new(PacketKind::Ph, bytes, capture_ns)
    }

    /// One movie frame with noisy pixels
    pub fn movie_packet(&mut self) -> RawPacket {
        let layout = &self.layouts.movie;
        let pixels = layout.pixels.unwrap_or(256);
        let max = if layout.sample_width == 1 { u8::MAX as f64 } else { u16::MAX as f64 };
        let samples: Vec<i32> = (0..pixels)
            .map(|_| self.pixel_noise.sample(&mut self.rng).clamp(0.0, max).round() as i32)
            .collect();

        let header = self.science_header(0x2, self.config.movie_period_ns);
        let capture_ns = self.next_capture_ns(self.config.movie_period_ns);
        let bytes = encode_science(&self.layouts.movie, &header, &samples);
        RawPacket::new(PacketKind::Movie, bytes, capture_ns)
    }

    /// Echo of the MAROC configuration command
    pub fn maroc_echo(&mut self) -> Result<RawPacket, EmulatorError> {
        let command = MarocCommandBuilder::from_tags(&self.maroc_tags)?.build(true);
        let capture_ns = self.next_capture_ns(1_000_000);
        Ok(RawPacket::new(PacketKind::Reply, command, capture_ns))
    }

    /// Readback of the configured destination MACs
    pub fn dest_mac_packet(&mut self) -> RawPacket {
        let capture_ns = self.next_capture_ns(1_000_000);
        let reply = dest_mac_reply(self.config.ph_dest_mac, self.config.movie_dest_mac, capture_ns);
        RawPacket::new(PacketKind::Reply, reply.bytes, reply.capture_ns)
    }

    fn hk_window(&mut self) -> Result<Vec<RawPacket>, EmulatorError> {
        (0..self.config.hk_packets).map(|_| self.hk_packet()).collect()
    }

    fn ph_window(&mut self) -> Vec<RawPacket> {
        (0..self.config.ph_packets).map(|_| self.ph_packet()).collect()
    }

    /// Capture windows for every test
    pub fn capture_set(&mut self) -> Result<CaptureSet, EmulatorError> {
        let mut set = CaptureSet::default();
        for test in TestName::ALL {
            let packets = match test {
                TestName::HkVals | TestName::HkTime => self.hk_window()?,
                TestName::Mac => {
                    let mut packets = self.hk_window()?;
                    packets.push(self.dest_mac_packet());
                    packets
                }
                TestName::Maroc => vec![self.maroc_echo()?],
                TestName::WrTiming => (0..self.config.movie_packets)
                    .map(|_| self.movie_packet())
                    .collect(),
                TestName::PhData | TestName::PhTiming | TestName::PhPeaks | TestName::PhPattern => {
                    self.ph_window()
                }
            };
            debug!(test = %test, packets = packets.len(), "Emulated capture window");
            set.insert(test, packets);
        }
        info!(
            seed = self.config.seed,
            packets = set.total_packets(),
            "Emulated capture set"
        );
        Ok(set)
    }

    /// Expectations the emulated board satisfies
    pub fn expectations(&self) -> Result<ExpectationTable, EmulatorError> {
        let cfg = &self.config;
        let mut table = ExpectationTable::default();
        // Mean capture jitter stays well inside five standard deviations
        let capture_dev_s = (5.0 * cfg.capture_jitter_ns).max(1.0) * 1e-9;
        let ip = board_ip(cfg.boardloc);

        for (name, value) in &cfg.hk_readings {
            let raw = raw_reading(&self.layouts, name, *value)?;
            let def = self
                .layouts
                .hk
                .field(name)
                .ok_or_else(|| EmulatorError::UnknownField(name.clone()))?;
            let lsb = def.lsb.unwrap_or(1.0).abs();
            table.insert("hk_vals", Expectation::numeric(name, def.scale(raw as f64), lsb));
        }
        table.insert("hk_vals", Expectation::exact("boardloc", &ip));
        table.insert("hk_vals", Expectation::exact("uid", &format!("{:016x}", self.uid)));
        table.insert("hk_vals", Expectation::exact("fwver", &cfg.fw_version));

        table.insert(
            "hk_time",
            Expectation::numeric("hk_interval", cfg.hk_period_ns as f64 * 1e-9, capture_dev_s),
        );

        table.insert("maroc", Expectation::exact("maroc_echo", "match"));
        table.insert("maroc", Expectation::numeric("maroc_mismatches", 0.0, 0.0));

        let mac = mac_from_uid(&format!("{:016x}", self.uid))
            .ok_or_else(|| EmulatorError::InvalidUid(cfg.board_uid.clone()))?;
        table.insert("mac", Expectation::exact("board_ip", &ip));
        table.insert("mac", Expectation::exact("mac_address", &mac));
        table.insert("mac", Expectation::exact("ph_dest_mac", &format_mac(&cfg.ph_dest_mac)));
        table.insert(
            "mac",
            Expectation::exact("movie_dest_mac", &format_mac(&cfg.movie_dest_mac)),
        );

        table.insert(
            "wr_timing",
            Expectation::numeric("wr_interval", cfg.movie_period_ns as f64, 0.0),
        );
        table.insert(
            "wr_timing",
            Expectation::numeric("movie_interval", cfg.movie_period_ns as f64 * 1e-9, capture_dev_s),
        );

        table.insert(
            "ph_data",
            Expectation::numeric(
                "ph_max",
                cfg.ph_baseline as f64 + cfg.pulse_amplitude,
                5.0 * cfg.pulse_amplitude_jitter + 1.0,
            ),
        );
        table.insert(
            "ph_timing",
            Expectation::numeric("ph_interval", cfg.ph_period_ns as f64 * 1e-9, capture_dev_s),
        );
        table.insert(
            "ph_timing",
            Expectation::numeric("ph_hw_interval", cfg.ph_period_ns as f64, 0.0),
        );
        table.insert("ph_peaks", Expectation::numeric("ph_peak_count", 1.0, 0.0));
        table.insert("ph_pattern", Expectation::numeric("ph_single_pulse", 1.0, 0.0));
        table.insert("ph_pattern", Expectation::numeric("ph_double_peak", 0.0, 0.0));

        Ok(table)
    }
}

fn parse_uid(uid: &str) -> Result<u64, EmulatorError> {
    if uid.len() != 16 {
        return Err(EmulatorError::InvalidUid(uid.to_string()));
    }
    u64::from_str_radix(uid, 16).map_err(|_| EmulatorError::InvalidUid(uid.to_string()))
}

/// Raw integer that decodes to the reading closest to `value`
fn raw_reading(layouts: &FieldLayoutTable, name: &str, value: f64) -> Result<u64, EmulatorError> {
    let def = layouts
        .hk
        .field(name)
        .ok_or_else(|| EmulatorError::UnknownField(name.to_string()))?;
    let raw = ((value - def.constant.unwrap_or(0.0)) / def.lsb.unwrap_or(1.0)).round();
    let max = if def.width >= 8 { u64::MAX as f64 } else { ((1u64 << (8 * def.width)) - 1) as f64 };
    if !matches!(def.kind, HkFieldKind::Unsigned) || !(0.0..=max).contains(&raw) {
        return Err(EmulatorError::InvalidReading {
            field: name.to_string(),
            value,
        });
    }
    Ok(raw as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodedRecord, PacketDecoder};
    use crate::extractor::{find_peaks, PeakConfig};

    fn emulator() -> Emulator {
        Emulator::new(EmulatorConfig::default(), FieldLayoutTable::default()).unwrap()
    }

    #[test]
    fn default_config() {
        let config = EmulatorConfig::default();
        assert_eq!(config.board_uid.len(), 16);
        assert_eq!(board_ip(config.boardloc), "192.168.1.1");
        assert_eq!(config.ph_packets, 10);
    }

    #[test]
    fn invalid_uid_rejected() {
        let config = EmulatorConfig {
            board_uid: "xyz".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            Emulator::new(config, FieldLayoutTable::default()),
            Err(EmulatorError::InvalidUid(_))
        ));
    }

    #[test]
    fn reading_out_of_range_rejected() {
        let layouts = FieldLayoutTable::default();
        assert!(raw_reading(&layouts, "det_temp", 25.0).is_ok());
        assert!(matches!(
            raw_reading(&layouts, "det_temp", 1e9),
            Err(EmulatorError::InvalidReading { .. })
        ));
        assert!(matches!(
            raw_reading(&layouts, "no_such_field", 1.0),
            Err(EmulatorError::UnknownField(_))
        ));
    }

    #[test]
    fn hk_packet_decodes_to_readings() {
        let layouts = FieldLayoutTable::default();
        let mut emu = emulator();
        let packet = emu.hk_packet().unwrap();
        let record = PacketDecoder::new(&layouts).decode(&packet).unwrap();
        let hk = record.as_hk().unwrap();
        assert_eq!(hk.text("boardloc"), Some("192.168.1.1"));
        assert_eq!(hk.text("uid"), Some("0011223344556677"));
        assert_eq!(hk.text("fwver"), Some("v1.0"));
        assert_eq!(hk.number("det_temp"), Some(25.0));
    }

    #[test]
    fn ph_packet_has_one_clean_peak() {
        let layouts = FieldLayoutTable::default();
        let mut emu = emulator();
        for _ in 0..20 {
            let packet = emu.ph_packet();
            let record = PacketDecoder::new(&layouts).decode(&packet).unwrap();
            let samples = record.samples().unwrap();
            assert_eq!(samples.len(), 64);
            assert_eq!(find_peaks(samples, &PeakConfig::default()).len(), 1);
        }
    }

    #[test]
    fn movie_packets_advance_wr_time() {
        let layouts = FieldLayoutTable::default();
        let mut emu = emulator();
        let decoder = PacketDecoder::new(&layouts);
        let a = decoder.decode(&emu.movie_packet()).unwrap();
        let b = decoder.decode(&emu.movie_packet()).unwrap();
        let (DecodedRecord::Movie(a), DecodedRecord::Movie(b)) = (a, b) else {
            panic!("expected movie records");
        };
        assert_eq!(a.samples.len(), 256);
        assert!(a.timestamp_valid);
        assert_eq!(
            b.header.timestamp.as_ns() - a.header.timestamp.as_ns(),
            EmulatorConfig::default().movie_period_ns
        );
        assert!(b.capture_ns > a.capture_ns);
    }

    #[test]
    fn same_seed_same_capture() {
        let a = emulator().capture_set().unwrap();
        let b = emulator().capture_set().unwrap();
        assert_eq!(a, b);
        for test in TestName::ALL {
            assert!(!a.packets(test).is_empty(), "{} has no packets", test);
        }
    }

    #[test]
    fn expectations_cover_every_test() {
        let table = emulator().expectations().unwrap();
        for test in TestName::ALL {
            assert!(
                !table.measurement_names(test.as_str()).is_empty(),
                "{} has no expectations",
                test
            );
        }
        assert!(table.get("mac", "mac_address").is_some());
    }
}
