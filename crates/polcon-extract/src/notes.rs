//! Soft extraction outcomes. These are data, never control flow.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    /// Operation did not match the closed wire schema
    SchemaViolation,
    /// Quote not found at its stated offsets
    EvidenceMismatch,
    BackendTimeout,
    BackendError,
    /// Backend explained why it extracted nothing
    NonExtractable,
    /// Same statement already extracted from an overlapping chunk
    Duplicate,
    /// Chunk skipped because the run was cancelled or halted
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionNote {
    pub kind: NoteKind,
    pub policy_id: String,
    pub chunk_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_index: Option<usize>,
    pub message: String,
}

impl ExtractionNote {
    pub fn new(kind: NoteKind, policy_id: &str, chunk_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            policy_id: policy_id.to_string(),
            chunk_id: chunk_id.to_string(),
            op_index: None,
            message: message.into(),
        }
    }

    pub fn for_op(mut self, index: usize) -> Self {
        self.op_index = Some(index);
        self
    }
}
