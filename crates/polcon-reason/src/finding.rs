//! Compliance findings and the predicate → class table.

use polcon_extract::EvidenceSpan;
use polcon_ontology::TermUri;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MismatchType {
    Contradiction,
    PurposeMismatch,
    ConditionMismatch,
    ContextMismatch,
    GranularityMismatch,
    Omission,
}

impl MismatchType {
    pub const ALL: [MismatchType; 6] = [
        MismatchType::Contradiction,
        MismatchType::PurposeMismatch,
        MismatchType::ConditionMismatch,
        MismatchType::ContextMismatch,
        MismatchType::GranularityMismatch,
        MismatchType::Omission,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MismatchType::Contradiction => "Contradiction",
            MismatchType::PurposeMismatch => "PurposeMismatch",
            MismatchType::ConditionMismatch => "ConditionMismatch",
            MismatchType::ContextMismatch => "ContextMismatch",
            MismatchType::GranularityMismatch => "GranularityMismatch",
            MismatchType::Omission => "Omission",
        }
    }

    /// Base weight before field confidences are applied.
    pub fn base_weight(self) -> f64 {
        match self {
            MismatchType::Contradiction => 0.9,
            MismatchType::PurposeMismatch => 0.8,
            MismatchType::ConditionMismatch => 0.75,
            MismatchType::ContextMismatch | MismatchType::GranularityMismatch | MismatchType::Omission => 0.7,
        }
    }

    /// Fixed finding class; strict mode escalates the under-specified ones.
    pub fn class(self, strict_mode: bool) -> FindingClass {
        match self {
            MismatchType::Omission | MismatchType::GranularityMismatch if strict_mode => {
                FindingClass::ViolatedRequirement
            }
            MismatchType::Omission | MismatchType::GranularityMismatch => FindingClass::UnderSpecifiedRequirement,
            _ => FindingClass::InconsistentRequirement,
        }
    }
}

impl fmt::Display for MismatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FindingClass {
    InconsistentRequirement,
    UnderSpecifiedRequirement,
    ViolatedRequirement,
}

impl fmt::Display for FindingClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FindingClass::InconsistentRequirement => "InconsistentRequirement",
            FindingClass::UnderSpecifiedRequirement => "UnderSpecifiedRequirement",
            FindingClass::ViolatedRequirement => "ViolatedRequirement",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    CrossPolicy,
    IntraPolicy,
}

/// What the verifier gate made of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    #[default]
    NotRun,
    Confirmed,
    UnderSpecified,
    VerifierError,
}

/// A quote with the section it was found in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitedEvidence {
    pub op_id: String,
    pub policy_id: String,
    pub section_path: String,
    pub quote: String,
    pub char_start: usize,
    pub char_end: usize,
}

impl CitedEvidence {
    pub fn new(op_id: &str, policy_id: &str, section_path: &str, span: &EvidenceSpan) -> Self {
        Self {
            op_id: op_id.to_string(),
            policy_id: policy_id.to_string(),
            section_path: section_path.to_string(),
            quote: span.quote.clone(),
            char_start: span.char_start,
            char_end: span.char_end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceFinding {
    pub finding_id: String,
    pub mismatch_type: MismatchType,
    pub finding_class: FindingClass,
    pub scope: Scope,
    pub first_party_evidence: Vec<CitedEvidence>,
    pub third_party_evidence: Vec<CitedEvidence>,
    pub first_party_op_ids: Vec<String>,
    pub third_party_op_ids: Vec<String>,
    pub aligned_subject: Option<TermUri>,
    pub aligned_action: Option<TermUri>,
    /// facet name -> value(s) involved
    #[serde(default)]
    pub aligned_context: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_or_missing: Vec<TermUri>,
    pub confidence: f64,
    pub rationale: String,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub verification: Verification,
}

impl ComplianceFinding {
    /// Every finding cites at least one quote; cross-policy findings other
    /// than omissions cite both parties; omissions cite a note instead of
    /// first-party evidence.
    pub fn is_well_cited(&self) -> bool {
        let fp = !self.first_party_evidence.is_empty();
        let tp = !self.third_party_evidence.is_empty();
        match (self.scope, self.mismatch_type) {
            (Scope::IntraPolicy, _) => self.first_party_evidence.len() >= 2,
            (Scope::CrossPolicy, MismatchType::Omission) => tp && !fp && !self.notes.is_empty(),
            (Scope::CrossPolicy, _) => fp && tp,
        }
    }

    /// Ordering key: type, scope, then the cited operations.
    pub(crate) fn sort_key(&self) -> (MismatchType, Scope, &[String], &[String], &[TermUri]) {
        (
            self.mismatch_type,
            self.scope,
            &self.first_party_op_ids,
            &self.third_party_op_ids,
            &self.extra_or_missing,
        )
    }
}

/// Sort findings deterministically and assign `F0001…`.
pub fn assign_ids(findings: &mut [ComplianceFinding]) {
    findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    for (i, finding) in findings.iter_mut().enumerate() {
        finding.finding_id = format!("F{:04}", i + 1);
    }
}
