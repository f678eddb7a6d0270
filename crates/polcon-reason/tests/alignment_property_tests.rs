//! Property tests for alignment and the comparator
//!
//! 1. Alignment is symmetric in its two arguments
//! 2. Every finding is cited the way its type requires
//! 3. Finding ids are dense and follow the sorted order

use polcon_extract::{ContextRaw, EvidenceSpan, LabeledSpan, OperationCandidate};
use polcon_graph::{ConstraintValidator, NormalizedOperation, Normalizer};
use polcon_ingest::PartyType;
use polcon_ontology::Ontology;
use polcon_reason::*;
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn pick(options: &'static [&'static str]) -> impl Strategy<Value = &'static str> {
    prop::sample::select(options)
}

fn op_strategy() -> impl Strategy<Value = (&'static str, &'static str, &'static str, Option<&'static str>, Option<&'static str>, Vec<&'static str>)> {
    (
        pick(&["share", "sell", "receive", "collect", "use"]),
        pick(&["location", "precise location", "email", "contact information", "device identifiers", "cookies"]),
        pick(&["do", "do not", "may"]),
        prop::option::of(pick(&["context:eu_only", "context:us", "context:global"])),
        prop::option::of(pick(&["third parties", "partners", "advertising partners"])),
        prop::collection::vec(pick(&["advertising", "marketing", "analytics", "service provision"]), 0..3),
    )
}

fn build(
    ontology: &Ontology,
    idx: usize,
    party: PartyType,
    shape: (&str, &str, &str, Option<&str>, Option<&str>, Vec<&str>),
) -> NormalizedOperation {
    let (action, subject, view, localisation, recipient, purposes) = shape;
    let policy = if party == PartyType::FirstParty { "fp" } else { "tp" };
    let quote = format!("{policy} statement {idx}");
    let candidate = OperationCandidate {
        op_id: format!("{policy}#op{idx}"),
        policy_id: policy.into(),
        party_type: party,
        chunk_id: format!("{policy}:root:0"),
        section_path: "Root".into(),
        action: Some(LabeledSpan::new(action)),
        subject: Some(LabeledSpan::new(subject)),
        view: Some(LabeledSpan::new(view)),
        purposes: purposes.into_iter().map(LabeledSpan::new).collect(),
        context: ContextRaw {
            localisation: localisation.map(LabeledSpan::new),
            recipient: recipient.map(LabeledSpan::new),
            ..Default::default()
        },
        evidence: vec![EvidenceSpan {
            char_start: 0,
            char_end: quote.len(),
            quote,
        }],
    };
    Normalizer::new(&ontology.vocabulary).normalize(&candidate).0
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn alignment_is_symmetric(a in op_strategy(), b in op_strategy(), strict in any::<bool>(), cross in any::<bool>()) {
        let ontology = Ontology::builtin().unwrap();
        let a = build(&ontology, 0, PartyType::FirstParty, a);
        let b = build(&ontology, 1, PartyType::ThirdParty, b);
        let aligner = Aligner::new(&ontology.hierarchy).with_strict_context(strict);
        prop_assert_eq!(aligner.align(&a, &b, cross), aligner.align(&b, &a, cross));
    }

    #[test]
    fn findings_are_cited_and_numbered(
        firsts in prop::collection::vec(op_strategy(), 0..5),
        thirds in prop::collection::vec(op_strategy(), 0..5),
        strict_mode in any::<bool>(),
        strict_context in any::<bool>(),
    ) {
        let ontology = Ontology::builtin().unwrap();
        let mut ops = Vec::new();
        for (i, shape) in firsts.into_iter().enumerate() {
            ops.push(build(&ontology, i, PartyType::FirstParty, shape));
        }
        for (i, shape) in thirds.into_iter().enumerate() {
            ops.push(build(&ontology, i, PartyType::ThirdParty, shape));
        }
        let validation = ConstraintValidator::new(&ontology).validate(&ops);
        let comparison = Comparator::new(&ontology, ComparatorConfig { strict_mode, strict_context })
            .compare(&ops, &validation);

        for (i, finding) in comparison.findings.iter().enumerate() {
            prop_assert!(finding.is_well_cited(), "{:?}", finding);
            prop_assert_eq!(&finding.finding_id, &format!("F{:04}", i + 1));
            prop_assert!(finding.confidence > 0.0 && finding.confidence <= 1.0);
            prop_assert_eq!(finding.finding_class, finding.mismatch_type.class(strict_mode));
        }
        for pair in comparison.findings.windows(2) {
            prop_assert!(pair[0].mismatch_type <= pair[1].mismatch_type);
        }
    }
}
