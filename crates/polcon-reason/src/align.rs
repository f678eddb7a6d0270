//! Pairwise alignment of normalized operations.
//!
//! Two operations align when their subjects are equal or in subsumption and
//! their actions correspond. Context facets are compared afterwards: with
//! `strict_context` an incompatible facet blocks the pair, otherwise the
//! pair aligns and the facet is reported as a conflict.
//!
//! Alignment is symmetric, and every aligned pair is kept; there is no
//! best-match selection.

use polcon_graph::NormalizedOperation;
use polcon_ontology::{FieldKind, HierarchyIndex};
use serde::{Deserialize, Serialize};

use crate::finding::Scope;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignedPair {
    pub left: String,
    pub right: String,
    pub scope: Scope,
    /// Facets present on both sides with incompatible values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_conflicts: Vec<FieldKind>,
}

pub struct Aligner<'a> {
    hierarchy: &'a HierarchyIndex,
    strict_context: bool,
}

impl<'a> Aligner<'a> {
    pub fn new(hierarchy: &'a HierarchyIndex) -> Self {
        Self {
            hierarchy,
            strict_context: false,
        }
    }

    pub fn with_strict_context(mut self, strict: bool) -> Self {
        self.strict_context = strict;
        self
    }

    /// `None` if the operations do not align, otherwise the conflicting facets.
    pub fn align(&self, a: &NormalizedOperation, b: &NormalizedOperation, cross_party: bool) -> Option<Vec<FieldKind>> {
        let (sa, sb) = (a.subject_uri()?, b.subject_uri()?);
        if !self.hierarchy.related(sa.as_str(), sb.as_str()) {
            return None;
        }
        let (aa, ab) = (a.action_uri()?, b.action_uri()?);
        if !self.hierarchy.actions_correspond(aa.as_str(), ab.as_str(), cross_party) {
            return None;
        }

        let conflicts: Vec<FieldKind> = FieldKind::CONTEXT_FACETS
            .into_iter()
            .filter(|facet| {
                let va = a.context_uri(*facet).map(|u| u.as_str());
                let vb = b.context_uri(*facet).map(|u| u.as_str());
                !self.hierarchy.context_compatible(*facet, va, vb)
            })
            .collect();
        if self.strict_context && !conflicts.is_empty() {
            return None;
        }
        Some(conflicts)
    }

    /// Every aligned (first, third) pair.
    pub fn cross_policy(&self, first: &[&NormalizedOperation], third: &[&NormalizedOperation]) -> Vec<AlignedPair> {
        let mut pairs = Vec::new();
        for fp in first {
            for tp in third {
                if let Some(context_conflicts) = self.align(fp, tp, true) {
                    pairs.push(AlignedPair {
                        left: fp.op_id.clone(),
                        right: tp.op_id.clone(),
                        scope: Scope::CrossPolicy,
                        context_conflicts,
                    });
                }
            }
        }
        pairs
    }

    /// Every aligned unordered pair inside one policy.
    pub fn intra_policy(&self, ops: &[&NormalizedOperation]) -> Vec<AlignedPair> {
        let mut pairs = Vec::new();
        for (i, a) in ops.iter().enumerate() {
            for b in &ops[i + 1..] {
                if let Some(context_conflicts) = self.align(a, b, false) {
                    pairs.push(AlignedPair {
                        left: a.op_id.clone(),
                        right: b.op_id.clone(),
                        scope: Scope::IntraPolicy,
                        context_conflicts,
                    });
                }
            }
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polcon_extract::{ContextRaw, EvidenceSpan, LabeledSpan, OperationCandidate};
    use polcon_graph::Normalizer;
    use polcon_ingest::PartyType;
    use polcon_ontology::Ontology;

    fn op(ontology: &Ontology, action: &str, subject: &str, localisation: Option<&str>) -> NormalizedOperation {
        let candidate = OperationCandidate {
            op_id: format!("{action}-{subject}"),
            policy_id: "p".into(),
            party_type: PartyType::FirstParty,
            chunk_id: "p:root:0".into(),
            section_path: "Root".into(),
            action: Some(LabeledSpan::new(action)),
            subject: Some(LabeledSpan::new(subject)),
            view: Some(LabeledSpan::new("do")),
            purposes: vec![],
            context: ContextRaw {
                localisation: localisation.map(LabeledSpan::new),
                ..Default::default()
            },
            evidence: vec![EvidenceSpan {
                quote: "x".into(),
                char_start: 0,
                char_end: 1,
            }],
        };
        Normalizer::new(&ontology.vocabulary).normalize(&candidate).0
    }

    #[test]
    fn subsumed_subjects_and_counterpart_actions_align() {
        let ontology = Ontology::builtin().unwrap();
        let aligner = Aligner::new(&ontology.hierarchy);
        let share = op(&ontology, "action:share", "subject:location", None);
        let receive = op(&ontology, "action:receive", "subject:precise_location", None);

        assert_eq!(aligner.align(&share, &receive, true), Some(vec![]));
        assert_eq!(aligner.align(&receive, &share, true), Some(vec![]));
        // counterparts only hold across policies
        assert_eq!(aligner.align(&share, &receive, false), None);

        let email = op(&ontology, "action:share", "subject:email", None);
        assert_eq!(aligner.align(&share, &email, true), None);
    }

    #[test]
    fn strict_context_blocks_incompatible_pairs() {
        let ontology = Ontology::builtin().unwrap();
        let eu = op(&ontology, "action:share", "subject:email", Some("context:eu_only"));
        let us = op(&ontology, "action:share", "subject:email", Some("context:us"));

        let relaxed = Aligner::new(&ontology.hierarchy);
        assert_eq!(relaxed.align(&eu, &us, true), Some(vec![FieldKind::Localisation]));
        let strict = Aligner::new(&ontology.hierarchy).with_strict_context(true);
        assert_eq!(strict.align(&eu, &us, true), None);
    }

    #[test]
    fn intra_policy_pairs_are_unordered() {
        let ontology = Ontology::builtin().unwrap();
        let a = op(&ontology, "action:share", "subject:email", None);
        let b = op(&ontology, "action:sell", "subject:contact_info", None);
        let c = op(&ontology, "action:collect", "subject:email", None);
        let pairs = Aligner::new(&ontology.hierarchy).intra_policy(&[&a, &b, &c]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].left, a.op_id);
        assert_eq!(pairs[0].right, b.op_id);
    }
}
