//! Normalized operations, the statement graph and constraint validation
//!
//! Three deterministic stages sit between extraction and reasoning:
//!
//! 1. [`Normalizer`] maps raw labels to vocabulary URIs (or `null`)
//! 2. [`StatementGraph`] records every operation as provenance-carrying triples
//! 3. [`ConstraintValidator`] attaches issues; operations with an error are
//!    kept in the graph but excluded from reasoning

pub mod graph;
pub mod normalize;
pub mod validate;

pub use graph::{Node, NodeId, Predicate, Provenance, StatementGraph, Triple, TripleRecord};
pub use normalize::{
    canonicalize, singularize, ChooserError, MatchReason, NormalizeChooser, NormalizeNote, NormalizedContext,
    NormalizedField, NormalizedOperation, Normalizer,
};
pub use validate::{ConstraintValidator, IssueCode, Severity, ValidationIssue, ValidationReport};
