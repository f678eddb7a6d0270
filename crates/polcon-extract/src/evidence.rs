//! Schema and evidence gate applied to every backend answer.
//!
//! A candidate is accepted only when every evidence span is found verbatim
//! (modulo whitespace) at its stated offsets in the chunk. Mismatches are
//! dropped with a note; offsets are never searched for or repaired.

use crate::candidate::{ContextRaw, EvidenceSpan, LabeledSpan, OperationCandidate};
use crate::notes::{ExtractionNote, NoteKind};
use crate::wire::{WireLabel, WireOperation, WireSpan};
use polcon_ingest::text::{char_to_byte, collapse_ws};
use polcon_ingest::Chunk;

/// Check one wire span against the chunk and translate it to document
/// byte offsets. The accepted quote is the exact source slice.
pub fn verify_span(chunk: &Chunk, span: &WireSpan) -> Result<EvidenceSpan, String> {
    if span.char_start >= span.char_end {
        return Err(format!("empty or inverted span {}..{}", span.char_start, span.char_end));
    }
    let (Some(start), Some(end)) = (
        char_to_byte(&chunk.text, span.char_start),
        char_to_byte(&chunk.text, span.char_end),
    ) else {
        return Err(format!(
            "span {}..{} outside chunk of {} chars",
            span.char_start,
            span.char_end,
            chunk.text.chars().count()
        ));
    };

    let slice = &chunk.text[start..end];
    let expected = collapse_ws(&span.quote);
    if expected.is_empty() || collapse_ws(slice) != expected {
        return Err(format!(
            "quote {:?} not found at {}..{}",
            preview(&span.quote),
            span.char_start,
            span.char_end
        ));
    }

    Ok(EvidenceSpan {
        quote: slice.to_string(),
        char_start: chunk.char_start + start,
        char_end: chunk.char_start + end,
    })
}

/// Validate one raw wire operation. `index` is its position in the
/// backend's answer and fixes the op id.
pub(crate) fn accept_operation(chunk: &Chunk, index: usize, raw: &serde_json::Value) -> Result<OperationCandidate, ExtractionNote> {
    let note = |kind: NoteKind, message: String| {
        ExtractionNote::new(kind, &chunk.policy_id, &chunk.chunk_id, message).for_op(index)
    };

    let op: WireOperation = serde_json::from_value(raw.clone())
        .map_err(|e| note(NoteKind::SchemaViolation, format!("operation does not match schema: {e}")))?;

    let labels = labeled_fields(&op);
    if let Some((field, _)) = labels.iter().find(|(_, l)| l.label.trim().is_empty()) {
        return Err(note(NoteKind::SchemaViolation, format!("empty label for `{field}`")));
    }
    if op.evidence_spans.is_empty() {
        return Err(note(NoteKind::SchemaViolation, "operation has no evidence spans".to_string()));
    }

    let evidence = op
        .evidence_spans
        .iter()
        .map(|span| verify_span(chunk, span))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|msg| note(NoteKind::EvidenceMismatch, msg))?;

    let haystack = collapse_ws(&chunk.text);
    for (field, label) in &labels {
        if let Some(ev) = label.evidence.as_deref().map(collapse_ws).filter(|e| !e.is_empty()) {
            if !haystack.contains(&ev) {
                return Err(note(
                    NoteKind::EvidenceMismatch,
                    format!("`{field}` evidence {:?} does not occur in chunk", preview(&ev)),
                ));
            }
        }
    }

    Ok(OperationCandidate {
        op_id: format!("{}#op{}", chunk.chunk_id, index),
        policy_id: chunk.policy_id.clone(),
        party_type: chunk.party_type,
        chunk_id: chunk.chunk_id.clone(),
        section_path: chunk.section_path.clone(),
        action: op.action.as_ref().map(to_span),
        subject: op.subject.as_ref().map(to_span),
        view: op.view.as_ref().map(to_span),
        purposes: op.purposes.iter().map(to_span).collect(),
        context: ContextRaw {
            temporal: op.context.temporal.as_ref().map(to_span),
            localisation: op.context.localisation.as_ref().map(to_span),
            manner: op.context.manner.as_ref().map(to_span),
            recipient: op.context.recipient.as_ref().map(to_span),
            legal_basis: op.context.legal_basis.as_ref().map(to_span),
            source: op.context.source.as_ref().map(to_span),
        },
        evidence,
    })
}

fn labeled_fields(op: &WireOperation) -> Vec<(&'static str, &WireLabel)> {
    let singles = [
        ("action", &op.action),
        ("subject", &op.subject),
        ("view", &op.view),
        ("temporal", &op.context.temporal),
        ("localisation", &op.context.localisation),
        ("manner", &op.context.manner),
        ("recipient", &op.context.recipient),
        ("legal_basis", &op.context.legal_basis),
        ("source", &op.context.source),
    ];
    singles
        .into_iter()
        .filter_map(|(name, label)| label.as_ref().map(|l| (name, l)))
        .chain(op.purposes.iter().map(|p| ("purposes", p)))
        .collect()
}

fn to_span(label: &WireLabel) -> LabeledSpan {
    LabeledSpan {
        label: label.label.trim().to_string(),
        evidence: label.evidence.clone().filter(|e| !e.trim().is_empty()),
    }
}

fn preview(s: &str) -> String {
    let mut out: String = s.chars().take(60).collect();
    if s.chars().count() > 60 {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use polcon_ingest::PartyType;
    use serde_json::json;

    fn chunk(text: &str, offset: usize) -> Chunk {
        Chunk {
            chunk_id: "fp:sharing:0".into(),
            policy_id: "fp".into(),
            party_type: PartyType::FirstParty,
            section_id: "s1".into(),
            section_path: "Sharing".into(),
            char_start: offset,
            char_end: offset + text.len(),
            chunk_hash: String::new(),
            text: text.into(),
            clause_ids: vec![],
            units: 0,
        }
    }

    #[test]
    fn span_translates_to_document_offsets() {
        let c = chunk("Intro. We share data.", 100);
        let span = verify_span(&c, &WireSpan { quote: "We share data.".into(), char_start: 7, char_end: 21 }).unwrap();
        assert_eq!(span.char_start, 107);
        assert_eq!(span.char_end, 121);
        assert_eq!(span.quote, "We share data.");
    }

    #[test]
    fn span_uses_char_offsets_for_non_ascii() {
        let c = chunk("Über uns. We share data.", 0);
        let span = verify_span(&c, &WireSpan { quote: "We share data.".into(), char_start: 10, char_end: 24 }).unwrap();
        assert_eq!(&c.text[span.char_start..span.char_end], "We share data.");
    }

    #[test]
    fn whitespace_differences_are_tolerated() {
        let c = chunk("We share\ndata.", 0);
        let span = verify_span(&c, &WireSpan { quote: "We share data.".into(), char_start: 0, char_end: 14 }).unwrap();
        assert_eq!(span.quote, "We share\ndata.");
    }

    #[test]
    fn wrong_offsets_are_rejected_not_repaired() {
        let c = chunk("Intro. We share data.", 0);
        assert!(verify_span(&c, &WireSpan { quote: "We share data.".into(), char_start: 0, char_end: 14 }).is_err());
        assert!(verify_span(&c, &WireSpan { quote: "x".into(), char_start: 5, char_end: 500 }).is_err());
        assert!(verify_span(&c, &WireSpan { quote: "x".into(), char_start: 5, char_end: 5 }).is_err());
    }

    #[test]
    fn unknown_fields_are_schema_violations() {
        let c = chunk("We share data.", 0);
        let raw = json!({"action": {"label": "share"}, "confidence": 0.9,
                         "evidence_spans": [{"quote": "We share data.", "char_start": 0, "char_end": 14}]});
        let note = accept_operation(&c, 0, &raw).unwrap_err();
        assert_eq!(note.kind, NoteKind::SchemaViolation);
        assert_eq!(note.op_index, Some(0));
    }

    #[test]
    fn missing_evidence_and_empty_labels_rejected() {
        let c = chunk("We share data.", 0);
        let no_evidence = json!({"action": {"label": "share"}});
        assert_eq!(accept_operation(&c, 0, &no_evidence).unwrap_err().kind, NoteKind::SchemaViolation);

        let empty = json!({"action": {"label": "  "},
                           "evidence_spans": [{"quote": "We share data.", "char_start": 0, "char_end": 14}]});
        assert_eq!(accept_operation(&c, 0, &empty).unwrap_err().kind, NoteKind::SchemaViolation);
    }

    #[test]
    fn label_evidence_must_occur_in_chunk() {
        let c = chunk("We share data.", 0);
        let raw = json!({"action": {"label": "sell", "evidence": "sell"},
                         "evidence_spans": [{"quote": "We share data.", "char_start": 0, "char_end": 14}]});
        assert_eq!(accept_operation(&c, 3, &raw).unwrap_err().kind, NoteKind::EvidenceMismatch);
    }

    #[test]
    fn accepted_operation_keeps_nulls() {
        let c = chunk("We share data.", 10);
        let raw = json!({"action": {"label": "share", "evidence": "share"}, "subject": null,
                         "evidence_spans": [{"quote": "We share data.", "char_start": 0, "char_end": 14}]});
        let op = accept_operation(&c, 2, &raw).unwrap();
        assert_eq!(op.op_id, "fp:sharing:0#op2");
        assert!(op.subject.is_none());
        assert_eq!(op.action.unwrap().label, "share");
        assert_eq!(op.evidence[0].char_start, 10);
    }
}
