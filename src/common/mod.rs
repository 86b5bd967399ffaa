//! Shared error types and CLI plumbing

pub mod cli;
pub mod error;

pub use cli::{init_tracing, AnalyzeArgs, CommonArgs, EmulateArgs};
pub use error::{EngineError, EngineResult, ErrorCategory};
