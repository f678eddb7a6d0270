//! Fatal pipeline errors. Everything detected after extraction starts is
//! recorded as data instead.

use crate::config::ConfigError;
use polcon_ingest::{IngestionError, PartyType};
use polcon_ontology::OntologyError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ontology(#[from] OntologyError),

    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    #[error("policy `{policy_id}` was given as {given} but is expected to be {expected}")]
    PartyMismatch {
        policy_id: String,
        given: PartyType,
        expected: PartyType,
    },

    #[error("both policies use the id `{0}`")]
    DuplicatePolicyId(String),

    #[error("cannot build extractor backend: {0}")]
    Backend(String),

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
