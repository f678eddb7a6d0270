//! Policy ingestion for polcon
//!
//! Turns raw policy text into addressable structure:
//!
//! ```text
//!   PolicyInput ──clean──► cleaned text ──segment──► PolicyDocument
//!                                                   (sections, clauses, definitions)
//!                                                          │
//!                                                        chunk
//!                                                          ▼
//!                                                   Vec<Chunk>  (section-bounded, overlapping)
//! ```
//!
//! Every offset produced here is a UTF-8 byte offset into the *cleaned*
//! text and always falls on a `char` boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod chunk;
pub mod clean;
pub mod segment;
pub mod text;

pub use chunk::{chunk_document, Chunk, ChunkerConfig};
pub use clean::clean_text;
pub use segment::{ClauseKind, ClauseUnit, PolicyDocument, Section, SegmentStats, Segmenter};

// ============================================================================
// Inputs
// ============================================================================

/// Which side of the comparison a policy is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyType {
    FirstParty,
    ThirdParty,
}

impl PartyType {
    /// Short tag used in ids and the human report.
    pub fn tag(self) -> &'static str {
        match self {
            PartyType::FirstParty => "1P",
            PartyType::ThirdParty => "3P",
        }
    }
}

impl fmt::Display for PartyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PartyType::FirstParty => "first_party",
            PartyType::ThirdParty => "third_party",
        })
    }
}

/// A heading the collector already knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintedHeading {
    pub title: String,
    #[serde(default = "default_hint_level")]
    pub level: usize,
}

fn default_hint_level() -> usize {
    1
}

/// Raw policy text plus identity, as handed over by the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyInput {
    pub policy_id: String,
    pub party_type: PartyType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_hint: Option<Vec<HintedHeading>>,
}

impl PolicyInput {
    pub fn new(policy_id: impl Into<String>, party_type: PartyType, text: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            party_type,
            text: text.into(),
            section_hint: None,
        }
    }

    pub fn with_section_hint(mut self, hint: Vec<HintedHeading>) -> Self {
        self.section_hint = Some(hint);
        self
    }

    /// Build from raw bytes, rejecting anything that is not UTF-8 text.
    pub fn from_bytes(policy_id: impl Into<String>, party_type: PartyType, bytes: &[u8]) -> Result<Self, IngestionError> {
        let policy_id = policy_id.into();
        let text = std::str::from_utf8(bytes).map_err(|e| IngestionError::NotText {
            policy_id: policy_id.clone(),
            reason: format!("invalid UTF-8 at byte {}", e.valid_up_to()),
        })?;
        Ok(Self::new(policy_id, party_type, text))
    }
}

// ============================================================================
// Errors
// ============================================================================

/// The only errors ingestion can raise; odd formatting never fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestionError {
    #[error("policy `{0}` is empty after cleaning")]
    Empty(String),
    #[error("policy `{policy_id}` is not text: {reason}")]
    NotText { policy_id: String, reason: String },
}

/// Clean and segment one policy.
pub fn ingest(input: &PolicyInput) -> Result<PolicyDocument, IngestionError> {
    Segmenter::new().segment(input)
}
