//! Evidence invariants for the deterministic backend and the span gate
//!
//! Whatever text a chunk holds, every span the rule backend emits must pass
//! verification, and every verified span must be an exact slice of the
//! document.

use polcon_extract::evidence::verify_span;
use polcon_extract::{RuleBackend, WireSpan};
use polcon_ingest::{chunk_document, ingest, ChunkerConfig, PartyType, PolicyInput};
use polcon_ontology::Vocabulary;
use proptest::prelude::*;

fn sentence() -> impl Strategy<Value = String> {
    let subject = prop_oneof![
        Just("your email address"),
        Just("précise location data"),
        Just("device identifiers"),
        Just("usage   data"),
        Just("cookies"),
    ];
    let verb = prop_oneof![Just("share"), Just("collect"), Just("never sell"), Just("may receive"), Just("use")];
    let tail = prop_oneof![
        Just(""),
        Just(" with advertising partners"),
        Just(" from partners"),
        Just(" for analytics"),
        Just(" to provide our services, in the EU"),
    ];
    (verb, subject, tail).prop_map(|(v, s, t)| format!("We {v} {s}{t}."))
}

fn policy() -> impl Strategy<Value = String> {
    prop::collection::vec((sentence(), prop_oneof![Just(" "), Just("\n"), Just("\n\n")]), 1..25).prop_map(|parts| {
        let mut text = String::from("Ünïcode préface.\n\n");
        for (s, sep) in parts {
            text.push_str(&s);
            text.push_str(sep);
        }
        text
    })
}

proptest! {
    #[test]
    fn emitted_spans_verify_and_slice_exactly(text in policy(), target in 5usize..60) {
        let backend = RuleBackend::from_vocabulary(&Vocabulary::builtin().unwrap()).unwrap();
        let doc = ingest(&PolicyInput::new("tp", PartyType::ThirdParty, text)).unwrap();

        for chunk in chunk_document(&doc, &ChunkerConfig::new(target, 0.12)) {
            let response = backend.extract_text(&chunk.text);
            for op in &response.operations {
                prop_assert!(!op.evidence_spans.is_empty());
                for span in &op.evidence_spans {
                    let accepted = verify_span(&chunk, span).unwrap();
                    prop_assert_eq!(&doc.text[accepted.char_start..accepted.char_end], accepted.quote.as_str());
                }
            }
        }
    }

    #[test]
    fn shifted_offsets_are_never_accepted(text in policy(), shift in 1usize..5) {
        let backend = RuleBackend::from_vocabulary(&Vocabulary::builtin().unwrap()).unwrap();
        let doc = ingest(&PolicyInput::new("tp", PartyType::ThirdParty, text)).unwrap();

        for chunk in chunk_document(&doc, &ChunkerConfig::default()) {
            for op in backend.extract_text(&chunk.text).operations {
                let span = &op.evidence_spans[0];
                let moved = WireSpan {
                    quote: span.quote.clone(),
                    char_start: span.char_start + shift,
                    char_end: span.char_end + shift,
                };
                prop_assert!(verify_span(&chunk, &moved).is_err());
            }
        }
    }
}
