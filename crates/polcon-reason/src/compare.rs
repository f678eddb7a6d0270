//! Mismatch predicates over aligned operations.
//!
//! ```text
//! valid 1P ops ─┐
//!               ├─► cross-policy alignment ─► pair predicates ─┐
//! valid 3P ops ─┘          │                                   │
//!                          ├─► per-3P predicates ──────────────┼─► sort ─► F0001…
//! valid 1P ops ─► intra-policy alignment ─► Contradiction ─────┘
//! ```
//!
//! Only operations that passed validation are considered. A contradiction
//! on a pair suppresses every other pair predicate for it.

use crate::align::{AlignedPair, Aligner};
use crate::finding::{assign_ids, CitedEvidence, ComplianceFinding, MismatchType, Scope, Verification};
use polcon_graph::{NormalizedOperation, ValidationReport};
use polcon_ingest::PartyType;
use polcon_ontology::{FieldKind, Modality, Ontology, TermUri};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparatorConfig {
    /// Escalate Omission and GranularityMismatch to ViolatedRequirement
    pub strict_mode: bool,
    /// Incompatible context facets block alignment
    pub strict_context: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Comparison {
    pub findings: Vec<ComplianceFinding>,
    pub aligned_pairs: Vec<AlignedPair>,
    pub intra_pairs: Vec<AlignedPair>,
}

impl Comparison {
    pub fn count_by_type(&self) -> BTreeMap<MismatchType, usize> {
        let mut counts = BTreeMap::new();
        for finding in &self.findings {
            *counts.entry(finding.mismatch_type).or_insert(0) += 1;
        }
        counts
    }
}

pub struct Comparator<'a> {
    ontology: &'a Ontology,
    config: ComparatorConfig,
}

impl<'a> Comparator<'a> {
    pub fn new(ontology: &'a Ontology, config: ComparatorConfig) -> Self {
        Self { ontology, config }
    }

    /// Run every predicate over the valid operations of both policies.
    pub fn compare(&self, ops: &[NormalizedOperation], validation: &ValidationReport) -> Comparison {
        let valid: Vec<&NormalizedOperation> = validation.valid(ops);
        let first: Vec<&NormalizedOperation> =
            valid.iter().copied().filter(|op| op.party_type == PartyType::FirstParty).collect();
        let third: Vec<&NormalizedOperation> =
            valid.iter().copied().filter(|op| op.party_type == PartyType::ThirdParty).collect();

        let aligner = Aligner::new(&self.ontology.hierarchy).with_strict_context(self.config.strict_context);
        let aligned_pairs = aligner.cross_policy(&first, &third);
        let intra_pairs = aligner.intra_policy(&first);
        let by_id: BTreeMap<&str, &NormalizedOperation> = valid.iter().map(|op| (op.op_id.as_str(), *op)).collect();

        let mut findings = Vec::new();
        let mut partners: BTreeMap<&str, Vec<&NormalizedOperation>> = BTreeMap::new();

        for pair in &aligned_pairs {
            let (Some(&fp), Some(&tp)) = (by_id.get(pair.left.as_str()), by_id.get(pair.right.as_str())) else {
                continue;
            };
            if let Some(finding) = self.contradiction(fp, tp, Scope::CrossPolicy) {
                findings.push(finding);
                continue;
            }
            partners.entry(tp.op_id.as_str()).or_default().push(fp);
            if !both_affirmative(fp, tp) {
                continue;
            }
            findings.extend(self.purpose_mismatch(fp, tp));
            findings.extend(self.condition_mismatch(fp, tp));
            findings.extend(self.context_mismatch(fp, tp, &pair.context_conflicts));
        }

        let aligned_third: BTreeSet<&str> = aligned_pairs.iter().map(|p| p.right.as_str()).collect();
        for tp in &third {
            if !aligned_third.contains(tp.op_id.as_str()) {
                findings.push(self.omission(tp));
            } else if let Some(fps) = partners.get(tp.op_id.as_str()) {
                findings.extend(self.granularity_mismatch(fps, tp));
            }
        }

        for pair in &intra_pairs {
            let (Some(&a), Some(&b)) = (by_id.get(pair.left.as_str()), by_id.get(pair.right.as_str())) else {
                continue;
            };
            let finding = self
                .contradiction(a, b, Scope::IntraPolicy)
                .or_else(|| self.contradiction(b, a, Scope::IntraPolicy));
            findings.extend(finding);
        }

        assign_ids(&mut findings);
        let comparison = Comparison {
            findings,
            aligned_pairs,
            intra_pairs,
        };
        tracing::info!(
            first_party = first.len(),
            third_party = third.len(),
            aligned = comparison.aligned_pairs.len(),
            intra = comparison.intra_pairs.len(),
            findings = comparison.findings.len(),
            "compared policies"
        );
        comparison
    }

    // ========================================================================
    // Predicates
    // ========================================================================

    /// `negative` says do_not while `other` says do or may.
    fn contradiction(
        &self,
        negative: &NormalizedOperation,
        other: &NormalizedOperation,
        scope: Scope,
    ) -> Option<ComplianceFinding> {
        if negative.modality != Some(Modality::DoNot) || !other.modality.is_some_and(Modality::is_affirmative) {
            return None;
        }
        let (fps, tps): (Vec<&NormalizedOperation>, Vec<&NormalizedOperation>) = match scope {
            Scope::CrossPolicy => (vec![negative], vec![other]),
            Scope::IntraPolicy => (vec![negative, other], vec![]),
        };
        let rationale = format!(
            "{} states it does not {} {}, but {} states it {} {} it",
            party_label(negative),
            local(negative.action_uri()),
            local(negative.subject_uri()),
            party_label(other),
            modality_word(other.modality),
            local(other.action_uri()),
        );
        Some(self.finding(MismatchType::Contradiction, scope, &fps, &tps, rationale))
    }

    fn purpose_mismatch(&self, fp: &NormalizedOperation, tp: &NormalizedOperation) -> Option<ComplianceFinding> {
        let allowed: Vec<TermUri> = fp.purpose_uris().into_iter().cloned().collect();
        let closure = self.ontology.hierarchy.closure(FieldKind::Purpose, &allowed);
        let extra: Vec<TermUri> = tp
            .purpose_uris()
            .into_iter()
            .filter(|p| !closure.contains(*p))
            .cloned()
            .collect();
        if extra.is_empty() {
            return None;
        }

        let stated = if allowed.is_empty() {
            "no purpose".to_string()
        } else {
            join_local(&allowed)
        };
        let rationale = format!(
            "first party discloses {} for {}, the third party also uses it for {}",
            local(fp.subject_uri()),
            stated,
            join_local(&extra),
        );
        let mut finding = self.finding(MismatchType::PurposeMismatch, Scope::CrossPolicy, &[fp], &[tp], rationale);
        finding.extra_or_missing = extra;
        Some(finding)
    }

    fn condition_mismatch(&self, fp: &NormalizedOperation, tp: &NormalizedOperation) -> Option<ComplianceFinding> {
        let a = fp.context_uri(FieldKind::LegalBasis);
        let b = tp.context_uri(FieldKind::LegalBasis);
        let differs = match (a, b) {
            (None, None) => false,
            (Some(a), Some(b)) => !self.ontology.hierarchy.related(a.as_str(), b.as_str()),
            _ => true,
        };
        if !differs {
            return None;
        }

        let rationale = format!(
            "legal basis differs: first party {}, third party {}",
            a.map_or("unstated", |u| u.local_name()),
            b.map_or("unstated", |u| u.local_name()),
        );
        let mut finding = self.finding(MismatchType::ConditionMismatch, Scope::CrossPolicy, &[fp], &[tp], rationale);
        for (side, uri) in [("first_party", a), ("third_party", b)] {
            if let Some(uri) = uri {
                finding.aligned_context.insert(format!("legal_basis.{side}"), uri.to_string());
            }
        }
        Some(finding)
    }

    fn context_mismatch(
        &self,
        fp: &NormalizedOperation,
        tp: &NormalizedOperation,
        conflicts: &[FieldKind],
    ) -> Option<ComplianceFinding> {
        if conflicts.is_empty() {
            return None;
        }
        let mut context = BTreeMap::new();
        let mut parts = Vec::new();
        for facet in conflicts {
            let a = fp.context_uri(*facet).map(|u| u.to_string()).unwrap_or_default();
            let b = tp.context_uri(*facet).map(|u| u.to_string()).unwrap_or_default();
            parts.push(format!("{facet}: {a} vs {b}"));
            context.insert(facet.as_str().to_string(), format!("{a} | {b}"));
        }
        let rationale = format!("incompatible context ({})", parts.join("; "));
        let mut finding = self.finding(MismatchType::ContextMismatch, Scope::CrossPolicy, &[fp], &[tp], rationale);
        finding.aligned_context.extend(context);
        Some(finding)
    }

    fn omission(&self, tp: &NormalizedOperation) -> ComplianceFinding {
        let rationale = format!(
            "third party {} {} with no corresponding first-party statement",
            local(tp.action_uri()),
            local(tp.subject_uri()),
        );
        let mut finding = self.finding(MismatchType::Omission, Scope::CrossPolicy, &[], &[tp], rationale);
        finding
            .notes
            .push("no counterpart: the first-party policy has no aligned operation".to_string());
        finding
    }

    /// Third-party recipient deeper than every aligned first-party recipient.
    fn granularity_mismatch(
        &self,
        fps: &[&NormalizedOperation],
        tp: &NormalizedOperation,
    ) -> Option<ComplianceFinding> {
        let hierarchy = &self.ontology.hierarchy;
        let recipient_depth = |op: &NormalizedOperation| -> i64 {
            op.context_uri(FieldKind::Recipient)
                .and_then(|uri| hierarchy.depth(uri.as_str()))
                .map_or(-1, |d| d as i64)
        };
        let tp_recipient = tp.context_uri(FieldKind::Recipient)?;
        let tp_depth = recipient_depth(tp);
        let fp_depth = fps.iter().map(|op| recipient_depth(op)).max().unwrap_or(-1);
        if tp_depth <= fp_depth {
            return None;
        }

        let fp_recipients: BTreeSet<&str> = fps
            .iter()
            .filter_map(|op| op.context_uri(FieldKind::Recipient).map(|u| u.local_name()))
            .collect();
        let rationale = format!(
            "third party names recipient {}, first party only discloses {}",
            tp_recipient.local_name(),
            if fp_recipients.is_empty() {
                "no recipient".to_string()
            } else {
                fp_recipients.into_iter().collect::<Vec<_>>().join(", ")
            },
        );
        let mut finding = self.finding(MismatchType::GranularityMismatch, Scope::CrossPolicy, fps, &[tp], rationale);
        finding
            .aligned_context
            .insert("recipient".to_string(), tp_recipient.to_string());
        Some(finding)
    }

    // ========================================================================
    // Assembly
    // ========================================================================

    fn finding(
        &self,
        mismatch_type: MismatchType,
        scope: Scope,
        fps: &[&NormalizedOperation],
        tps: &[&NormalizedOperation],
        rationale: String,
    ) -> ComplianceFinding {
        let cite = |ops: &[&NormalizedOperation]| -> Vec<CitedEvidence> {
            ops.iter()
                .flat_map(|op| {
                    op.evidence
                        .iter()
                        .map(|span| CitedEvidence::new(&op.op_id, &op.policy_id, &op.section_path, span))
                })
                .collect()
        };
        let confidence = fps
            .iter()
            .chain(tps)
            .map(|op| op.min_confidence())
            .fold(1.0, f64::min)
            * mismatch_type.base_weight();
        // the subject/action the pair shares; the more specific third-party side wins
        let anchor = tps.first().or_else(|| fps.first());

        let mut aligned_context = BTreeMap::new();
        if let Some(op) = anchor {
            for facet in FieldKind::CONTEXT_FACETS {
                if let Some(uri) = op.context_uri(facet) {
                    aligned_context.insert(facet.as_str().to_string(), uri.to_string());
                }
            }
        }

        ComplianceFinding {
            finding_id: String::new(),
            mismatch_type,
            finding_class: mismatch_type.class(self.config.strict_mode),
            scope,
            first_party_evidence: cite(fps),
            third_party_evidence: cite(tps),
            first_party_op_ids: fps.iter().map(|op| op.op_id.clone()).collect(),
            third_party_op_ids: tps.iter().map(|op| op.op_id.clone()).collect(),
            aligned_subject: anchor.and_then(|op| op.subject_uri().cloned()),
            aligned_action: anchor.and_then(|op| op.action_uri().cloned()),
            aligned_context,
            extra_or_missing: Vec::new(),
            confidence,
            rationale,
            notes: Vec::new(),
            verification: Verification::NotRun,
        }
    }
}

fn both_affirmative(a: &NormalizedOperation, b: &NormalizedOperation) -> bool {
    a.modality != Some(Modality::DoNot) && b.modality != Some(Modality::DoNot)
}

fn party_label(op: &NormalizedOperation) -> &'static str {
    match op.party_type {
        PartyType::FirstParty => "first party",
        PartyType::ThirdParty => "third party",
    }
}

fn modality_word(modality: Option<Modality>) -> &'static str {
    match modality {
        Some(Modality::May) => "may",
        Some(Modality::DoNot) => "does not",
        _ => "does",
    }
}

fn local(uri: Option<&TermUri>) -> &str {
    uri.map_or("?", |u| u.local_name())
}

fn join_local(uris: &[TermUri]) -> String {
    uris.iter().map(|u| u.local_name()).collect::<Vec<_>>().join(", ")
}
