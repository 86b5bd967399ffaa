//! Captured packet windows
//!
//! A [`CaptureSet`] maps each test to the raw packets collected for it.
//! Sets can be persisted to and restored from capture files, see [`format`].

pub mod format;

pub use format::{
    CaptureBlock, CaptureFooter, CaptureFormatError, CaptureHeader, CaptureReader, CaptureWriter,
    ChecksumCalculator, CAPTURE_MAGIC, FOOTER_SIZE, FORMAT_VERSION,
};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use tracing::info;

use crate::decoder::RawPacket;
use crate::orchestrator::TestName;

/// Packet windows keyed by test
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureSet {
    windows: BTreeMap<TestName, Vec<RawPacket>>,
}

impl CaptureSet {
    /// Replace the window of `test`
    pub fn insert(&mut self, test: TestName, packets: Vec<RawPacket>) {
        self.windows.insert(test, packets);
    }

    /// Append packets to the window of `test`
    pub fn extend(&mut self, test: TestName, packets: impl IntoIterator<Item = RawPacket>) {
        self.windows.entry(test).or_default().extend(packets);
    }

    /// Packets captured for `test`; empty when nothing was captured
    pub fn packets(&self, test: TestName) -> &[RawPacket] {
        self.windows.get(&test).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tests(&self) -> impl Iterator<Item = TestName> + '_ {
        self.windows.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TestName, &[RawPacket])> {
        self.windows.iter().map(|(t, p)| (*t, p.as_slice()))
    }

    pub fn total_packets(&self) -> usize {
        self.windows.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_packets() == 0
    }

    /// Write the set to a capture file
    pub fn write_file<P: AsRef<Path>>(
        &self,
        path: P,
        header: &CaptureHeader,
    ) -> Result<CaptureFooter, CaptureFormatError> {
        let file = File::create(path.as_ref())?;
        let mut writer = CaptureWriter::new(BufWriter::new(file), header)?;
        writer.write_set(self)?;
        let (_, footer) = writer.finish()?;
        info!(
            path = %path.as_ref().display(),
            blocks = footer.total_blocks,
            packets = footer.total_packets,
            "Capture file written"
        );
        Ok(footer)
    }

    /// Read a capture file, verifying its checksum
    pub fn read_file<P: AsRef<Path>>(
        path: P,
    ) -> Result<(CaptureHeader, CaptureSet), CaptureFormatError> {
        let file = File::open(path.as_ref())?;
        let mut reader = CaptureReader::new(BufReader::new(file))?;
        let set = reader.read_set()?;
        info!(
            path = %path.as_ref().display(),
            board = %reader.header().board_uid,
            packets = set.total_packets(),
            "Capture file loaded"
        );
        Ok((reader.header().clone(), set))
    }
}
