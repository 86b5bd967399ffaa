//! quabo-analyze - run the autotest engine over a capture file
//!
//! Usage:
//!   quabo-analyze -c run.qcap                        # All tests, report to stdout
//!   quabo-analyze -f bench.toml -c run.qcap -t mac   # One test
//!   quabo-analyze -c run.qcap --parallel -o report.json
//!
//! Exits with status 1 when any test fails.

use clap::Parser;
use quabo_autotest::capture::CaptureSet;
use quabo_autotest::common::{init_tracing, AnalyzeArgs};
use quabo_autotest::config::AutotestConfig;
use quabo_autotest::orchestrator::{EngineContext, TestName, TestRunner};
use tracing::info;

fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let args = AnalyzeArgs::parse();

    let config_path = &args.common.config_file;
    let config = if std::path::Path::new(config_path).exists() {
        info!(config_file = %config_path, "Loaded configuration");
        AutotestConfig::load(config_path)?
    } else {
        info!(config_file = %config_path, "Config file not found, using defaults");
        AutotestConfig::default()
    };

    let tests: Vec<TestName> = if args.tests.is_empty() {
        TestName::ALL.to_vec()
    } else {
        args.tests
            .iter()
            .map(|t| t.parse::<TestName>())
            .collect::<Result<_, _>>()?
    };

    let ctx = EngineContext::from_config(&config)?;
    let (header, captures) = CaptureSet::read_file(&args.capture)?;
    info!(
        board_uid = %header.board_uid,
        board_ip = %header.board_ip,
        created_at = %header.created_at,
        "Capture loaded"
    );

    let runner = TestRunner::new(&ctx);
    let report = if args.parallel {
        runner.run_parallel(&tests, &captures)
    } else {
        runner.run(&tests, &captures)
    };

    let json = report.to_json()?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{}", json),
    }

    let counts = report.counts();
    eprintln!(
        "passed={} failed_mismatch={} failed_error={} skipped={}",
        counts.passed, counts.failed_mismatch, counts.failed_error, counts.skipped
    );
    if !report.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}
