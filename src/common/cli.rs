//! CLI argument parsing for the autotest binaries
//!
//! Each binary has its own Args struct that embeds [`CommonArgs`].

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Arguments shared by all binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to configuration file
    #[arg(
        short = 'f',
        long = "config",
        env = "QUABO_CONFIG",
        default_value = "autotest.toml"
    )]
    pub config_file: String,
}

/// Arguments for the analysis binary
#[derive(Parser, Debug, Clone)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Capture file to analyze
    #[arg(short = 'c', long = "capture")]
    pub capture: PathBuf,

    /// Test to run (can specify multiple times; default: all)
    #[arg(short = 't', long = "test", action = clap::ArgAction::Append)]
    pub tests: Vec<String>,

    /// Run tests on parallel threads
    #[arg(short = 'p', long)]
    pub parallel: bool,

    /// Write the JSON report here instead of stdout
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

/// Arguments for the emulator binary
#[derive(Parser, Debug, Clone)]
pub struct EmulateArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Capture file to write
    #[arg(short = 'o', long = "output", default_value = "emulated.qcap")]
    pub output: PathBuf,

    /// Also write the matching expectation table as JSON
    #[arg(short = 'e', long = "expectations")]
    pub expectations: Option<PathBuf>,

    /// Override the RNG seed
    #[arg(short = 's', long)]
    pub seed: Option<u64>,
}

/// Initialize tracing with `RUST_LOG`, defaulting this crate to info
pub fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("quabo_autotest=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
