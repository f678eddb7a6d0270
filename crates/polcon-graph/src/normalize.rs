//! Normalization of raw labels into vocabulary URIs.
//!
//! Lookup order per field, first hit wins:
//!
//! | step | match                              | confidence |
//! |------|------------------------------------|-----------:|
//! | 1    | label already is a URI of the field | 1.0        |
//! | 2    | exact label / alternative label     | 1.0        |
//! | 3    | singularized form                   | 0.9        |
//! | 4    | longest label contained as words    | 0.85       |
//! | 5    | disambiguation hook (optional)      | 0.6        |
//!
//! Anything left over stays `null`; nothing is guessed.

use polcon_extract::{EvidenceSpan, LabeledSpan, OperationCandidate};
use polcon_ingest::PartyType;
use polcon_ontology::{FieldKind, Modality, TermUri, Vocabulary};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

const LEADING_STOPWORDS: &[&str] = &[
    "a", "an", "the", "our", "your", "their", "its", "his", "her", "this", "these", "those", "such", "any", "to", "for",
    "with", "from", "of", "by", "via", "in", "on", "about",
];

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    UriPassthrough,
    ExactLabel,
    AltLabel,
    Singularized,
    ContainedLabel,
    Chooser,
    Unmapped,
}

impl MatchReason {
    pub fn confidence(self) -> f64 {
        match self {
            MatchReason::UriPassthrough | MatchReason::ExactLabel | MatchReason::AltLabel => 1.0,
            MatchReason::Singularized => 0.9,
            MatchReason::ContainedLabel => 0.85,
            MatchReason::Chooser => 0.6,
            MatchReason::Unmapped => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedField {
    pub raw_label: String,
    pub normalized_uri: Option<TermUri>,
    pub confidence: f64,
    pub reason: MatchReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl NormalizedField {
    fn mapped(raw: &LabeledSpan, uri: TermUri, reason: MatchReason) -> Self {
        Self {
            raw_label: raw.label.clone(),
            normalized_uri: Some(uri),
            confidence: reason.confidence(),
            reason,
            evidence: raw.evidence.clone(),
        }
    }

    fn unmapped(raw: &LabeledSpan) -> Self {
        Self {
            raw_label: raw.label.clone(),
            normalized_uri: None,
            confidence: 0.0,
            reason: MatchReason::Unmapped,
            evidence: raw.evidence.clone(),
        }
    }

    pub fn uri(&self) -> Option<&TermUri> {
        self.normalized_uri.as_ref()
    }

    fn as_span(&self) -> LabeledSpan {
        LabeledSpan {
            label: self.raw_label.clone(),
            evidence: self.evidence.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<NormalizedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localisation: Option<NormalizedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manner: Option<NormalizedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<NormalizedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_basis: Option<NormalizedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<NormalizedField>,
}

impl NormalizedContext {
    /// `(field, value)` for every slot present in the text.
    pub fn slots(&self) -> Vec<(FieldKind, &NormalizedField)> {
        [
            (FieldKind::Temporal, &self.temporal),
            (FieldKind::Localisation, &self.localisation),
            (FieldKind::Manner, &self.manner),
            (FieldKind::Recipient, &self.recipient),
            (FieldKind::LegalBasis, &self.legal_basis),
            (FieldKind::Source, &self.source),
        ]
        .into_iter()
        .filter_map(|(field, slot)| slot.as_ref().map(|f| (field, f)))
        .collect()
    }

    pub fn get(&self, field: FieldKind) -> Option<&NormalizedField> {
        match field {
            FieldKind::Temporal => self.temporal.as_ref(),
            FieldKind::Localisation => self.localisation.as_ref(),
            FieldKind::Manner => self.manner.as_ref(),
            FieldKind::Recipient => self.recipient.as_ref(),
            FieldKind::LegalBasis => self.legal_basis.as_ref(),
            FieldKind::Source => self.source.as_ref(),
            _ => None,
        }
    }
}

/// Canonical form of one extracted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOperation {
    pub op_id: String,
    pub policy_id: String,
    pub party_type: PartyType,
    pub chunk_id: String,
    pub section_path: String,
    pub action: Option<NormalizedField>,
    pub subject: Option<NormalizedField>,
    pub view: Option<NormalizedField>,
    pub modality: Option<Modality>,
    #[serde(default)]
    pub purposes: Vec<NormalizedField>,
    #[serde(default)]
    pub context: NormalizedContext,
    pub evidence: Vec<EvidenceSpan>,
}

impl NormalizedOperation {
    pub fn action_uri(&self) -> Option<&TermUri> {
        self.action.as_ref().and_then(NormalizedField::uri)
    }

    pub fn subject_uri(&self) -> Option<&TermUri> {
        self.subject.as_ref().and_then(NormalizedField::uri)
    }

    pub fn view_uri(&self) -> Option<&TermUri> {
        self.view.as_ref().and_then(NormalizedField::uri)
    }

    /// Mapped purposes, duplicates removed, in order.
    pub fn purpose_uris(&self) -> Vec<&TermUri> {
        let mut out: Vec<&TermUri> = Vec::new();
        for uri in self.purposes.iter().filter_map(NormalizedField::uri) {
            if !out.contains(&uri) {
                out.push(uri);
            }
        }
        out
    }

    pub fn context_uri(&self, field: FieldKind) -> Option<&TermUri> {
        self.context.get(field).and_then(NormalizedField::uri)
    }

    /// Every field present on the operation, with its field kind.
    pub fn fields(&self) -> Vec<(FieldKind, &NormalizedField)> {
        let mut out = Vec::new();
        for (kind, slot) in [
            (FieldKind::Action, &self.action),
            (FieldKind::Subject, &self.subject),
            (FieldKind::View, &self.view),
        ] {
            if let Some(field) = slot {
                out.push((kind, field));
            }
        }
        out.extend(self.purposes.iter().map(|p| (FieldKind::Purpose, p)));
        out.extend(self.context.slots());
        out
    }

    /// Lowest confidence among the fields that were mapped to a URI.
    pub fn min_confidence(&self) -> f64 {
        self.fields()
            .into_iter()
            .filter(|(_, f)| f.normalized_uri.is_some())
            .map(|(_, f)| f.confidence)
            .fold(1.0, f64::min)
    }

    pub fn first_offset(&self) -> usize {
        self.evidence.iter().map(|e| e.char_start).min().unwrap_or(0)
    }
}

/// A disambiguation hook result that could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeNote {
    pub op_id: String,
    pub field: FieldKind,
    pub raw_label: String,
    pub message: String,
}

// ============================================================================
// Disambiguation hook
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChooserError {
    #[error("chooser failed: {0}")]
    Failed(String),
}

/// Picks a URI for a label the dictionary could not map. Must answer with
/// one of `candidates` or `None`.
pub trait NormalizeChooser: Send + Sync {
    fn choose(&self, field: FieldKind, raw_label: &str, candidates: &[TermUri]) -> Result<Option<TermUri>, ChooserError>;
}

// ============================================================================
// Normalizer
// ============================================================================

struct Entry {
    uri: TermUri,
    reason: MatchReason,
}

pub struct Normalizer<'a> {
    vocab: &'a Vocabulary,
    chooser: Option<Arc<dyn NormalizeChooser>>,
    /// canonical phrase -> entry, per field
    exact: HashMap<FieldKind, HashMap<String, Entry>>,
    /// singularized canonical phrase -> uri, per field
    singular: HashMap<FieldKind, HashMap<String, TermUri>>,
    /// canonical phrases longest first, per field
    phrases: HashMap<FieldKind, Vec<(String, TermUri)>>,
}

impl<'a> Normalizer<'a> {
    pub fn new(vocab: &'a Vocabulary) -> Self {
        let mut exact: HashMap<FieldKind, HashMap<String, Entry>> = HashMap::new();
        let mut singular: HashMap<FieldKind, HashMap<String, TermUri>> = HashMap::new();
        let mut phrases: HashMap<FieldKind, Vec<(String, TermUri)>> = HashMap::new();

        for (field, term) in vocab.iter() {
            let labels = std::iter::once((&term.label, MatchReason::ExactLabel))
                .chain(term.alt_labels.iter().map(|l| (l, MatchReason::AltLabel)));
            for (label, reason) in labels {
                let key = canonicalize(label);
                if key.is_empty() {
                    continue;
                }
                exact.entry(field).or_default().entry(key.clone()).or_insert(Entry {
                    uri: term.uri.clone(),
                    reason,
                });
                singular
                    .entry(field)
                    .or_default()
                    .entry(singularize(&key))
                    .or_insert_with(|| term.uri.clone());
                phrases.entry(field).or_default().push((key, term.uri.clone()));
            }
        }
        for list in phrases.values_mut() {
            list.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        }

        Self {
            vocab,
            chooser: None,
            exact,
            singular,
            phrases,
        }
    }

    pub fn with_chooser(mut self, chooser: Arc<dyn NormalizeChooser>) -> Self {
        self.chooser = Some(chooser);
        self
    }

    /// Dictionary lookup only (steps 1-4).
    fn lookup(&self, field: FieldKind, label: &str) -> Option<(TermUri, MatchReason)> {
        let trimmed = label.trim();
        if trimmed.starts_with(field.uri_prefix()) && self.vocab.contains(field, trimmed) {
            return Some((TermUri::new(trimmed), MatchReason::UriPassthrough));
        }

        let key = canonicalize(trimmed);
        if key.is_empty() {
            return None;
        }
        if let Some(entry) = self.exact.get(&field).and_then(|m| m.get(&key)) {
            return Some((entry.uri.clone(), entry.reason));
        }
        if let Some(uri) = self.singular.get(&field).and_then(|m| m.get(&singularize(&key))) {
            return Some((uri.clone(), MatchReason::Singularized));
        }

        let padded = format!(" {key} ");
        self.phrases
            .get(&field)
            .into_iter()
            .flatten()
            .find(|(phrase, _)| padded.contains(&format!(" {phrase} ")))
            .map(|(_, uri)| (uri.clone(), MatchReason::ContainedLabel))
    }

    fn normalize_field(
        &self,
        op_id: &str,
        field: FieldKind,
        raw: &LabeledSpan,
        notes: &mut Vec<NormalizeNote>,
    ) -> NormalizedField {
        if let Some((uri, reason)) = self.lookup(field, &raw.label) {
            return NormalizedField::mapped(raw, uri, reason);
        }

        let Some(chooser) = &self.chooser else {
            return NormalizedField::unmapped(raw);
        };
        let candidates = self.vocab.uris(field);
        let note = |message: String| NormalizeNote {
            op_id: op_id.to_string(),
            field,
            raw_label: raw.label.clone(),
            message,
        };
        match chooser.choose(field, &raw.label, &candidates) {
            Ok(Some(uri)) if candidates.contains(&uri) => NormalizedField::mapped(raw, uri, MatchReason::Chooser),
            Ok(Some(uri)) => {
                tracing::warn!(op_id, field = %field, uri = %uri, "chooser answered outside the candidate list");
                notes.push(note(format!("chooser answered `{uri}`, which is not a {field} term")));
                NormalizedField::unmapped(raw)
            }
            Ok(None) => NormalizedField::unmapped(raw),
            Err(e) => {
                tracing::warn!(op_id, field = %field, error = %e, "chooser failed");
                notes.push(note(e.to_string()));
                NormalizedField::unmapped(raw)
            }
        }
    }

    /// Normalize one candidate. Notes record unusable hook answers.
    pub fn normalize(&self, candidate: &OperationCandidate) -> (NormalizedOperation, Vec<NormalizeNote>) {
        let mut notes = Vec::new();
        let op_id = candidate.op_id.as_str();
        let one = |field: FieldKind, raw: &Option<LabeledSpan>, notes: &mut Vec<NormalizeNote>| {
            raw.as_ref().map(|r| self.normalize_field(op_id, field, r, notes))
        };

        let action = one(FieldKind::Action, &candidate.action, &mut notes);
        let subject = one(FieldKind::Subject, &candidate.subject, &mut notes);
        let view = one(FieldKind::View, &candidate.view, &mut notes);
        let ctx = &candidate.context;
        let context = NormalizedContext {
            temporal: one(FieldKind::Temporal, &ctx.temporal, &mut notes),
            localisation: one(FieldKind::Localisation, &ctx.localisation, &mut notes),
            manner: one(FieldKind::Manner, &ctx.manner, &mut notes),
            recipient: one(FieldKind::Recipient, &ctx.recipient, &mut notes),
            legal_basis: one(FieldKind::LegalBasis, &ctx.legal_basis, &mut notes),
            source: one(FieldKind::Source, &ctx.source, &mut notes),
        };
        let purposes = candidate
            .purposes
            .iter()
            .map(|p| self.normalize_field(op_id, FieldKind::Purpose, p, &mut notes))
            .collect();

        let modality = view.as_ref().and_then(NormalizedField::uri).and_then(Modality::from_uri);
        let op = NormalizedOperation {
            op_id: candidate.op_id.clone(),
            policy_id: candidate.policy_id.clone(),
            party_type: candidate.party_type,
            chunk_id: candidate.chunk_id.clone(),
            section_path: candidate.section_path.clone(),
            action,
            subject,
            view,
            modality,
            purposes,
            context,
            evidence: candidate.evidence.clone(),
        };
        (op, notes)
    }

    pub fn normalize_all(&self, candidates: &[OperationCandidate]) -> (Vec<NormalizedOperation>, Vec<NormalizeNote>) {
        let mut ops = Vec::with_capacity(candidates.len());
        let mut notes = Vec::new();
        for candidate in candidates {
            let (op, op_notes) = self.normalize(candidate);
            ops.push(op);
            notes.extend(op_notes);
        }

        let unmapped = ops
            .iter()
            .flat_map(|op| op.fields())
            .filter(|(_, f)| f.normalized_uri.is_none())
            .count();
        tracing::info!(operations = ops.len(), unmapped_fields = unmapped, notes = notes.len(), "normalized operations");
        (ops, notes)
    }

    /// Normalize an already-normalized operation again. Mapped fields pass
    /// through unchanged; unmapped ones get the dictionary once more.
    pub fn renormalize(&self, op: &NormalizedOperation) -> NormalizedOperation {
        let again = |field: FieldKind, value: &NormalizedField| match value.uri() {
            Some(uri) if self.vocab.contains(field, uri.as_str()) => value.clone(),
            _ => match self.lookup(field, &value.raw_label) {
                Some((uri, reason)) => NormalizedField::mapped(&value.as_span(), uri, reason),
                None => NormalizedField::unmapped(&value.as_span()),
            },
        };
        let slot = |field: FieldKind, value: &Option<NormalizedField>| value.as_ref().map(|v| again(field, v));

        let action = slot(FieldKind::Action, &op.action);
        let subject = slot(FieldKind::Subject, &op.subject);
        let view = slot(FieldKind::View, &op.view);
        let modality = view.as_ref().and_then(NormalizedField::uri).and_then(Modality::from_uri);
        NormalizedOperation {
            action,
            subject,
            view,
            modality,
            purposes: op.purposes.iter().map(|p| again(FieldKind::Purpose, p)).collect(),
            context: NormalizedContext {
                temporal: slot(FieldKind::Temporal, &op.context.temporal),
                localisation: slot(FieldKind::Localisation, &op.context.localisation),
                manner: slot(FieldKind::Manner, &op.context.manner),
                recipient: slot(FieldKind::Recipient, &op.context.recipient),
                legal_basis: slot(FieldKind::LegalBasis, &op.context.legal_basis),
                source: slot(FieldKind::Source, &op.context.source),
            },
            ..op.clone()
        }
    }
}

// ============================================================================
// Canonical forms
// ============================================================================

/// Lowercase, unify apostrophes, collapse whitespace, trim punctuation and
/// drop leading determiners, possessives and prepositions.
pub fn canonicalize(label: &str) -> String {
    let lowered = label.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'");
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| !c.is_alphanumeric());

    let mut words: Vec<&str> = trimmed.split(' ').collect();
    while words.len() > 1 && LEADING_STOPWORDS.contains(&words[0]) {
        words.remove(0);
    }
    words.join(" ")
}

/// Naive English singular of the last word.
pub fn singularize(phrase: &str) -> String {
    let (head, last) = match phrase.rsplit_once(' ') {
        Some((head, last)) => (Some(head), last),
        None => (None, phrase),
    };
    let single = if let Some(stem) = last.strip_suffix("ies").filter(|s| s.len() > 1) {
        format!("{stem}y")
    } else if last.ends_with("ss") || last.ends_with("us") || last.len() <= 3 {
        last.to_string()
    } else if let Some(stem) = last.strip_suffix('s') {
        stem.to_string()
    } else {
        last.to_string()
    };
    match head {
        Some(head) => format!("{head} {single}"),
        None => single,
    }
}
