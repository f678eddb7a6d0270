//! Deterministic rule/dictionary backend.
//!
//! Builds one case-insensitive alternation per field from the vocabulary's
//! labels and alternative labels (longest phrase first), then reads each
//! sentence of the chunk:
//!
//! ```text
//!   "We may share device identifiers with advertising partners."
//!        │     │       │                      │
//!      view  action  subject            recipient ("with ...")
//! ```
//!
//! A phrase is claimed by the first field that matches it, so
//! "advertising partners" is a recipient and not also an advertising purpose.
//! Every emitted operation quotes its whole sentence as evidence.

use crate::backend::{BackendError, ExtractorBackend};
use crate::wire::{ExtractionRequest, WireContext, WireLabel, WireOperation, WireResponse, WireSpan};
use async_trait::async_trait;
use polcon_ingest::text::{byte_to_char, sentence_spans};
use polcon_ontology::{FieldKind, Vocabulary};
use regex::Regex;
use std::collections::HashSet;

const NEGATION: &str = r"(?i)\b(?:(?:do|does|will|shall|would|may|can)\s+not|cannot|don't|doesn't|won't|never|not)\b";
const MODAL: &str = r"(?i)\b(?:may|might|can|could)\b";
const FROM_BEFORE: &str = r"(?i)\bfrom\s+(?:(?:our|your|the|its|their|trusted|selected|certain|other)\s+)*$";

pub struct RuleBackend {
    action: Regex,
    negation: Regex,
    modal: Regex,
    from_before: Regex,
    subject: Regex,
    party: Regex,
    recipients: HashSet<String>,
    sources: HashSet<String>,
    legal_basis: Regex,
    temporal: Regex,
    localisation: Regex,
    manner: Regex,
    purpose: Regex,
}

type Span = (usize, usize);

impl RuleBackend {
    pub fn from_vocabulary(vocab: &Vocabulary) -> Result<Self, regex::Error> {
        let recipients = phrases(vocab, &[FieldKind::Recipient]);
        let sources = phrases(vocab, &[FieldKind::Source]);

        Ok(Self {
            action: alternation(&phrases(vocab, &[FieldKind::Action]))?,
            negation: Regex::new(NEGATION)?,
            modal: Regex::new(MODAL)?,
            from_before: Regex::new(FROM_BEFORE)?,
            subject: alternation(&phrases(vocab, &[FieldKind::Subject]))?,
            party: alternation(&phrases(vocab, &[FieldKind::Recipient, FieldKind::Source]))?,
            legal_basis: alternation(&phrases(vocab, &[FieldKind::LegalBasis]))?,
            temporal: alternation(&phrases(vocab, &[FieldKind::Temporal]))?,
            localisation: alternation(&phrases(vocab, &[FieldKind::Localisation]))?,
            manner: alternation(&phrases(vocab, &[FieldKind::Manner]))?,
            purpose: alternation(&phrases(vocab, &[FieldKind::Purpose]))?,
            recipients: recipients.into_iter().collect(),
            sources: sources.into_iter().collect(),
        })
    }

    /// Read a chunk's text and answer with the wire shape.
    pub fn extract_text(&self, text: &str) -> WireResponse {
        let mut response = WireResponse::default();

        for (idx, (start, end)) in sentence_spans(text).into_iter().enumerate() {
            let sentence = &text[start..end];
            let mut claimed: Vec<Span> = Vec::new();

            let action = claim(&self.action, sentence, &mut claimed, false).into_iter().next();
            let subjects = claim(&self.subject, sentence, &mut claimed, true);
            let char_start = byte_to_char(text, start);

            let action = match (action, subjects.is_empty()) {
                (None, true) => continue,
                (None, false) => {
                    response
                        .nonextractable_notes
                        .push(format!("sentence at char {char_start} names data but no processing action"));
                    continue;
                }
                (Some(_), true) => {
                    response
                        .nonextractable_notes
                        .push(format!("sentence at char {char_start} names an action but no data subject"));
                    continue;
                }
                (Some(action), false) => action,
            };

            let view = self.view(sentence, action, &mut claimed);

            let mut recipient = None;
            let mut source = None;
            for (s, e) in claim(&self.party, sentence, &mut claimed, true) {
                let phrase = sentence[s..e].to_lowercase();
                if self.from_before.is_match(&sentence[..s]) {
                    source.get_or_insert((s, e));
                } else if self.recipients.contains(&phrase) {
                    recipient.get_or_insert((s, e));
                } else if !self.sources.contains(&phrase) {
                    recipient.get_or_insert((s, e));
                }
            }

            let first = |re: &Regex, claimed: &mut Vec<Span>| claim(re, sentence, claimed, false).into_iter().next();
            let legal_basis = first(&self.legal_basis, &mut claimed);
            let temporal = first(&self.temporal, &mut claimed);
            let localisation = first(&self.localisation, &mut claimed);
            let manner = first(&self.manner, &mut claimed);
            let purposes = claim(&self.purpose, sentence, &mut claimed, true);

            let label = |span: Span| {
                let surface = &sentence[span.0..span.1];
                WireLabel::new(surface, surface)
            };
            let evidence = WireSpan {
                quote: sentence.to_string(),
                char_start,
                char_end: byte_to_char(text, end),
            };

            for (k, subject) in subjects.into_iter().enumerate() {
                response.operations.push(WireOperation {
                    op_id: Some(format!("s{idx}.o{k}")),
                    action: Some(label(action)),
                    subject: Some(label(subject)),
                    purposes: purposes.iter().copied().map(label).collect(),
                    context: WireContext {
                        temporal: temporal.map(label),
                        localisation: localisation.map(label),
                        manner: manner.map(label),
                        recipient: recipient.map(label),
                        legal_basis: legal_basis.map(label),
                        source: source.map(label),
                    },
                    view: Some(view.clone()),
                    evidence_spans: vec![evidence.clone()],
                });
            }
        }

        response
    }

    fn view(&self, sentence: &str, action: Span, claimed: &mut Vec<Span>) -> WireLabel {
        for (re, label) in [(&self.negation, "do not"), (&self.modal, "may")] {
            if let Some((s, e)) = claim(re, sentence, claimed, false).into_iter().next() {
                return WireLabel::new(label, &sentence[s..e]);
            }
        }
        // plain indicative: the action verb itself is the evidence
        WireLabel::new("do", &sentence[action.0..action.1])
    }
}

#[async_trait]
impl ExtractorBackend for RuleBackend {
    fn name(&self) -> &str {
        "deterministic"
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<serde_json::Value, BackendError> {
        Ok(self.extract_text(&request.text).to_value())
    }
}

/// Lowercased labels and alternative labels of the given fields.
fn phrases(vocab: &Vocabulary, fields: &[FieldKind]) -> Vec<String> {
    let mut out: Vec<String> = fields
        .iter()
        .flat_map(|f| vocab.terms(*f))
        .flat_map(|t| std::iter::once(&t.label).chain(t.alt_labels.iter()))
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    out.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    out.dedup();
    out
}

fn alternation(phrases: &[String]) -> Result<Regex, regex::Error> {
    if phrases.is_empty() {
        return Regex::new(r"[^\s\S]");
    }
    let body: Vec<String> = phrases.iter().map(|p| regex::escape(p)).collect();
    Regex::new(&format!(r"(?i)\b(?:{})\b", body.join("|")))
}

/// Matches of `re` not overlapping anything already claimed; the returned
/// spans become claimed. Stops after the first when `all` is false.
fn claim(re: &Regex, sentence: &str, claimed: &mut Vec<Span>, all: bool) -> Vec<Span> {
    let mut out = Vec::new();
    for m in re.find_iter(sentence) {
        let span = (m.start(), m.end());
        if claimed.iter().any(|&(s, e)| span.0 < e && s < span.1) {
            continue;
        }
        claimed.push(span);
        out.push(span);
        if !all {
            break;
        }
    }
    out
}
