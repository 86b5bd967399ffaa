//! quabo-autotest: packet decoding and statistical validation for Quabo boards
//!
//! Captured packet windows flow through a fixed pipeline per test:
//!
//! ```text
//! RawPacket ─→ decoder ─→ extractor ─→ stats ─→ evaluator ─→ Report
//!   (bytes)    (records)  (measurements) (summary) (verdicts)
//! ```
//!
//! [`orchestrator::TestRunner`] drives the pipeline for the named tests;
//! [`capture`] persists packet windows and [`emulator`] synthesizes them.

pub mod capture;
pub mod common;
pub mod config;
pub mod decoder;
pub mod emulator;
pub mod evaluator;
pub mod extractor;
pub mod orchestrator;
pub mod stats;
