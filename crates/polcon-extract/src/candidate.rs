//! Accepted extraction output, before normalization.

use polcon_ingest::PartyType;
use serde::{Deserialize, Serialize};

/// A raw label as written in the policy, with the sub-quote supporting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledSpan {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl LabeledSpan {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            evidence: None,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }
}

/// Verbatim quote plus byte offsets into the cleaned policy text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvidenceSpan {
    pub quote: String,
    pub char_start: usize,
    pub char_end: usize,
}

/// Free-text context slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<LabeledSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localisation: Option<LabeledSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manner: Option<LabeledSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<LabeledSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_basis: Option<LabeledSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<LabeledSpan>,
}

/// One extracted data-processing statement that passed the schema and
/// evidence checks. `None` slots were not explicit in the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationCandidate {
    pub op_id: String,
    pub policy_id: String,
    pub party_type: PartyType,
    pub chunk_id: String,
    pub section_path: String,
    pub action: Option<LabeledSpan>,
    pub subject: Option<LabeledSpan>,
    pub view: Option<LabeledSpan>,
    #[serde(default)]
    pub purposes: Vec<LabeledSpan>,
    #[serde(default)]
    pub context: ContextRaw,
    pub evidence: Vec<EvidenceSpan>,
}

impl OperationCandidate {
    /// Start offset of the first evidence span, used for ordering.
    pub fn first_offset(&self) -> usize {
        self.evidence.iter().map(|e| e.char_start).min().unwrap_or(0)
    }
}
