//! quabo-emulator - write a synthetic capture file
//!
//! Usage:
//!   quabo-emulator                                   # Defaults, emulated.qcap
//!   quabo-emulator -f bench.toml -o run.qcap         # [emulator] section from config
//!   quabo-emulator -s 7 -e expectations.json         # Seed 7, also write expectations

use clap::Parser;
use quabo_autotest::capture::CaptureHeader;
use quabo_autotest::common::{init_tracing, EmulateArgs};
use quabo_autotest::config::AutotestConfig;
use quabo_autotest::decoder::board_ip;
use quabo_autotest::emulator::Emulator;
use tracing::info;

fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let args = EmulateArgs::parse();

    let config_path = &args.common.config_file;
    let config = if std::path::Path::new(config_path).exists() {
        info!(config_file = %config_path, "Loaded configuration");
        AutotestConfig::load(config_path)?
    } else {
        AutotestConfig::default()
    };

    let mut emulator_config = config.emulator.clone();
    if let Some(seed) = args.seed {
        emulator_config.seed = seed;
    }

    let mut emulator = Emulator::new(emulator_config, config.layouts()?)?
        .with_maroc_tags(config.maroc_tags()?);
    let captures = emulator.capture_set()?;

    let cfg = emulator.config();
    let mut header = CaptureHeader::new(cfg.board_uid.clone(), board_ip(cfg.boardloc));
    header.comment = "emulated".to_string();
    header
        .metadata
        .insert("seed".to_string(), cfg.seed.to_string());
    let footer = captures.write_file(&args.output, &header)?;

    if let Some(path) = &args.expectations {
        let table = emulator.expectations()?;
        std::fs::write(path, table.to_json()?)?;
        info!(path = %path.display(), "Expectations written");
    }

    println!(
        "Wrote {} packets in {} blocks to {}",
        footer.total_packets,
        footer.total_blocks,
        args.output.display()
    );
    Ok(())
}
