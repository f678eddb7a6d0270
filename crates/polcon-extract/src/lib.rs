//! Bounded extraction of data-processing statements
//!
//! Turns policy chunks into [`OperationCandidate`]s. Backends (deterministic
//! rules, an LLM, or test doubles) only *propose* operations in a closed
//! JSON shape; the [`ExtractionGateway`] decides what is accepted:
//!
//! - the response must match the wire schema exactly
//! - every operation needs evidence spans that are found verbatim at their
//!   stated offsets
//! - failures are retried with backoff, then recorded as notes
//!
//! Nothing a backend says is repaired or guessed. A rejected operation is
//! dropped and explained by an [`ExtractionNote`].

pub mod backend;
pub mod cancel;
pub mod candidate;
pub mod deterministic;
pub mod evidence;
pub mod gateway;
pub mod llm;
pub mod llm_backend;
pub mod notes;
pub mod wire;

pub use backend::{BackendError, ExtractorBackend};
pub use cancel::CancelToken;
pub use candidate::{ContextRaw, EvidenceSpan, LabeledSpan, OperationCandidate};
pub use deterministic::RuleBackend;
pub use gateway::{
    ChunkJob, ChunkOutcome, ConjunctionPolicy, ExtractionGateway, ExtractionRun, GatewayConfig, GatewayStats,
};
pub use llm::{ChatClient, LlmConfig, LlmError, Provider};
pub use llm_backend::LlmBackend;
pub use notes::{ExtractionNote, NoteKind};
pub use wire::{ExtractionRequest, WireContext, WireLabel, WireOperation, WireResponse, WireSpan};
