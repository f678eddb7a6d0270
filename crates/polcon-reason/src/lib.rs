//! Reasoning over validated operations
//!
//! Aligns first-party and third-party operations, evaluates the mismatch
//! predicates, passes the result through an optional verifier gate and
//! renders the reports. Everything here is deterministic except the
//! verifier, which can only remove or downgrade findings.

pub mod align;
pub mod compare;
pub mod finding;
pub mod report;
pub mod verify;

pub use align::{AlignedPair, Aligner};
pub use compare::{Comparator, ComparatorConfig, Comparison};
pub use finding::{
    assign_ids, CitedEvidence, ComplianceFinding, FindingClass, MismatchType, Scope, Verification,
};
pub use report::{render_human, MachineReport, ReportMeta, UnvalidatedOperation};
pub use verify::{
    parse_decision, DroppedFinding, FindingVerifier, GateOutcome, LlmFindingVerifier, VerifierDecision,
    VerifierError, VerifierGate,
};
