//! Backend wire contract.
//!
//! Every backend, deterministic or not, answers with this bounded JSON
//! shape. Offsets are *character* offsets relative to the chunk text; the
//! gateway translates them to document byte offsets after checking them.
//!
//! ```json
//! {"operations": [{"op_id": "...", "action": {"label": "share", "evidence": "share"},
//!   "subject": {...}, "purposes": [{...}], "view": {...},
//!   "context": {"temporal": null, "localisation": null, "manner": null,
//!               "recipient": {...}, "legal_basis": null, "source": null},
//!   "evidence_spans": [{"quote": "...", "char_start": 0, "char_end": 42}]}],
//!  "nonextractable_notes": ["..."]}
//! ```

use polcon_ingest::{Chunk, PartyType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a backend is asked to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub chunk_id: String,
    pub policy_id: String,
    pub party_type: PartyType,
    pub section_path: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub definitions: BTreeMap<String, String>,
}

impl ExtractionRequest {
    pub fn from_chunk(chunk: &Chunk, definitions: &BTreeMap<String, String>) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            policy_id: chunk.policy_id.clone(),
            party_type: chunk.party_type,
            section_path: chunk.section_path.clone(),
            text: chunk.text.clone(),
            definitions: definitions.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireLabel {
    pub label: String,
    #[serde(default)]
    pub evidence: Option<String>,
}

impl WireLabel {
    pub fn new(label: impl Into<String>, evidence: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            evidence: Some(evidence.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WireContext {
    pub temporal: Option<WireLabel>,
    pub localisation: Option<WireLabel>,
    pub manner: Option<WireLabel>,
    pub recipient: Option<WireLabel>,
    pub legal_basis: Option<WireLabel>,
    pub source: Option<WireLabel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireSpan {
    pub quote: String,
    pub char_start: usize,
    pub char_end: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireOperation {
    #[serde(default)]
    pub op_id: Option<String>,
    #[serde(default)]
    pub action: Option<WireLabel>,
    #[serde(default)]
    pub subject: Option<WireLabel>,
    #[serde(default)]
    pub purposes: Vec<WireLabel>,
    #[serde(default)]
    pub context: WireContext,
    #[serde(default)]
    pub view: Option<WireLabel>,
    #[serde(default)]
    pub evidence_spans: Vec<WireSpan>,
}

/// Typed response, as built by backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireResponse {
    #[serde(default)]
    pub operations: Vec<WireOperation>,
    #[serde(default)]
    pub nonextractable_notes: Vec<String>,
}

impl WireResponse {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "operations": [] }))
    }
}

/// Envelope parsed by the gateway; operations stay untyped so one bad
/// operation does not sink the others.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub operations: Vec<serde_json::Value>,
    #[serde(default)]
    pub nonextractable_notes: Vec<String>,
}
