//! Data-room diligence pipeline
//!
//! Takes a zip of business documents, extracts and classifies their text,
//! has a language model distill per-document findings, aggregates them and
//! renders a markdown diligence report.

pub mod ai;
pub mod config;
pub mod documents;
pub mod error;
pub mod pipeline;
pub mod report;

pub use ai::LanguageModelGateway;
pub use config::{LlmConfig, PipelineConfig};
pub use error::{ErrorKind, PipelineError};
pub use pipeline::{AnalysisResult, Orchestrator, RunReport};

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber with `RUST_LOG` filtering.
///
/// Default: warn for dependencies, info for this crate. `RUST_LOG=debug`
/// shows per-file and per-call detail.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,dataroom_diligence=info,diligence=info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
