//! Policy consistency pipeline
//!
//! Wires the stages together for one first-party / third-party pair:
//!
//! | Stage | Crate |
//! |-------|-------|
//! | segment, chunk | `polcon-ingest` |
//! | extract (bounded, retried, cancellable) | `polcon-extract` |
//! | normalize, graph, validate | `polcon-graph` |
//! | align, compare, verify, report | `polcon-reason` |
//!
//! ```no_run
//! # async fn demo() -> Result<(), polcon_pipeline::PipelineError> {
//! use polcon_pipeline::{write_artifacts, CancelToken, PartyType, Pipeline, PipelineConfig, PolicyInput};
//!
//! let pipeline = Pipeline::new(PipelineConfig::default())?;
//! let first = PolicyInput::new("app", PartyType::FirstParty, "We do not sell your data.");
//! let third = PolicyInput::new("sdk", PartyType::ThirdParty, "We may sell device identifiers.");
//! let output = pipeline.run(&first, &third, &CancelToken::new()).await?;
//! write_artifacts(&output, std::path::Path::new("out"))?;
//! # Ok(())
//! # }
//! ```

pub mod artifacts;
pub mod config;
pub mod error;
pub mod run;
pub mod summary;

pub use artifacts::{
    write_artifacts, ArtifactPaths, GRAPH_FILE, HUMAN_REPORT_FILE, MACHINE_REPORT_FILE, SUMMARY_FILE,
};
pub use config::{ConfigError, ExtractorKind, LlmSettings, PipelineConfig, VerifierSettings};
pub use error::PipelineError;
pub use run::{segment_policy, Pipeline, PipelineOutput};
pub use summary::{PolicyCounts, RunSummary};

pub use polcon_extract::CancelToken;
pub use polcon_ingest::{PartyType, PolicyInput};
