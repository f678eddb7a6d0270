//! Vocabulary loading
//!
//! Two on-disk layouts are accepted:
//! - a single `vocab.json` with one array per field plus a `context` map of facets
//! - a directory of per-field files (`actions.json`, `data_categories.json`,
//!   `purposes.json`, `views.json`, `recipients.json`, `legal_bases.json`),
//!   each `{"terms": [...]}`, and `context.json` as `{"context": {facet: [...]}}`

use crate::{FieldKind, OntologyError, TermUri};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use walkdir::WalkDir;

const BUILTIN_VOCAB: &str = include_str!("../data/vocab.json");

// ============================================================================
// Terms
// ============================================================================

/// One canonical vocabulary entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabTerm {
    pub uri: TermUri,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TermUri>,
    #[serde(default)]
    pub alt_labels: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTerm {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    alt_labels: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VocabFile {
    actions: Vec<RawTerm>,
    #[serde(alias = "data_categories")]
    subjects: Vec<RawTerm>,
    purposes: Vec<RawTerm>,
    views: Vec<RawTerm>,
    recipients: Vec<RawTerm>,
    legal_bases: Vec<RawTerm>,
    context: BTreeMap<String, Vec<RawTerm>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TermsFile {
    terms: Vec<RawTerm>,
    context: BTreeMap<String, Vec<RawTerm>>,
}

// ============================================================================
// Vocabulary
// ============================================================================

/// Closed term lists per field, indexed by URI.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    fields: BTreeMap<FieldKind, Vec<VocabTerm>>,
    index: HashMap<String, (FieldKind, usize)>,
}

impl Vocabulary {
    /// The vocabulary embedded in the crate.
    pub fn builtin() -> Result<Self, OntologyError> {
        Self::from_json_str(BUILTIN_VOCAB, "builtin vocab.json")
    }

    /// Parse a single-file vocabulary.
    pub fn from_json_str(json: &str, origin: &str) -> Result<Self, OntologyError> {
        let file: VocabFile = serde_json::from_str(json).map_err(|e| OntologyError::Parse {
            origin: origin.to_string(),
            message: e.to_string(),
        })?;

        let mut raw = Vec::new();
        push_all(&mut raw, FieldKind::Action, file.actions);
        push_all(&mut raw, FieldKind::Subject, file.subjects);
        push_all(&mut raw, FieldKind::Purpose, file.purposes);
        push_all(&mut raw, FieldKind::View, file.views);
        push_all(&mut raw, FieldKind::Recipient, file.recipients);
        push_all(&mut raw, FieldKind::LegalBasis, file.legal_bases);
        push_context(&mut raw, file.context, origin);

        Self::build(raw, origin)
    }

    /// Load a vocabulary file or a directory of per-field files.
    pub fn load(path: &Path) -> Result<Self, OntologyError> {
        if path.is_dir() {
            return Self::load_dir(path);
        }
        let json = read(path)?;
        Self::from_json_str(&json, &path.display().to_string())
    }

    fn load_dir(dir: &Path) -> Result<Self, OntologyError> {
        let mut raw = Vec::new();
        let origin = dir.display().to_string();

        for entry in WalkDir::new(dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            let field = match stem {
                "actions" => Some(FieldKind::Action),
                "data_categories" | "subjects" => Some(FieldKind::Subject),
                "purposes" => Some(FieldKind::Purpose),
                "views" => Some(FieldKind::View),
                "recipients" => Some(FieldKind::Recipient),
                "legal_bases" => Some(FieldKind::LegalBasis),
                "context" => None,
                other => {
                    tracing::debug!(file = %path.display(), stem = other, "ignoring unrecognized vocabulary file");
                    continue;
                }
            };

            let json = read(path)?;
            let file: TermsFile = serde_json::from_str(&json).map_err(|e| OntologyError::Parse {
                origin: path.display().to_string(),
                message: e.to_string(),
            })?;
            match field {
                Some(field) => push_all(&mut raw, field, file.terms),
                None => push_context(&mut raw, file.context, &origin),
            }
        }

        Self::build(raw, &origin)
    }

    fn build(raw: Vec<(FieldKind, RawTerm)>, origin: &str) -> Result<Self, OntologyError> {
        let mut vocab = Vocabulary::default();

        for (field, term) in raw {
            let uri = match term.uri.as_deref().map(str::trim) {
                Some(uri) if !uri.is_empty() => uri.to_string(),
                _ => {
                    tracing::warn!(origin, field = %field, label = ?term.label, "skipping vocabulary term without uri");
                    continue;
                }
            };
            if !uri.starts_with(field.uri_prefix()) {
                return Err(OntologyError::WrongNamespace {
                    uri,
                    field,
                    expected: field.uri_prefix(),
                });
            }
            if vocab.index.contains_key(&uri) {
                return Err(OntologyError::DuplicateUri(uri));
            }

            let uri = TermUri::new(uri);
            let label = term
                .label
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| uri.local_name().replace('_', " "));
            let entry = VocabTerm {
                parent: term.parent.filter(|p| !p.trim().is_empty()).map(TermUri::new),
                alt_labels: term.alt_labels,
                label,
                uri,
            };

            let terms = vocab.fields.entry(field).or_default();
            vocab
                .index
                .insert(entry.uri.as_str().to_string(), (field, terms.len()));
            terms.push(entry);
        }

        vocab.check_parents()?;

        for field in [FieldKind::Action, FieldKind::Subject] {
            if vocab.terms(field).is_empty() {
                return Err(OntologyError::Empty(field));
            }
        }

        tracing::debug!(origin, terms = vocab.len(), "vocabulary loaded");
        Ok(vocab)
    }

    fn check_parents(&self) -> Result<(), OntologyError> {
        for (field, terms) in &self.fields {
            for term in terms {
                if let Some(parent) = &term.parent {
                    if self.field_of(parent.as_str()) != Some(*field) {
                        return Err(OntologyError::UnknownParent {
                            uri: term.uri.to_string(),
                            parent: parent.to_string(),
                        });
                    }
                }

                let mut seen = HashSet::new();
                let mut cursor = Some(&term.uri);
                while let Some(uri) = cursor {
                    if !seen.insert(uri.as_str()) {
                        return Err(OntologyError::Cycle(term.uri.to_string()));
                    }
                    cursor = self.parent_of(uri.as_str());
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    pub fn terms(&self, field: FieldKind) -> &[VocabTerm] {
        self.fields.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, uri: &str) -> Option<&VocabTerm> {
        let (field, idx) = self.index.get(uri)?;
        self.fields.get(field).and_then(|terms| terms.get(*idx))
    }

    pub fn field_of(&self, uri: &str) -> Option<FieldKind> {
        self.index.get(uri).map(|(field, _)| *field)
    }

    pub fn contains(&self, field: FieldKind, uri: &str) -> bool {
        self.field_of(uri) == Some(field)
    }

    pub fn parent_of(&self, uri: &str) -> Option<&TermUri> {
        self.get(uri).and_then(|t| t.parent.as_ref())
    }

    /// All URIs of a field, in file order.
    pub fn uris(&self, field: FieldKind) -> Vec<TermUri> {
        self.terms(field).iter().map(|t| t.uri.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldKind, &VocabTerm)> {
        self.fields
            .iter()
            .flat_map(|(field, terms)| terms.iter().map(move |t| (*field, t)))
    }

    pub fn counts(&self) -> BTreeMap<FieldKind, usize> {
        self.fields.iter().map(|(f, t)| (*f, t.len())).collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

fn push_all(out: &mut Vec<(FieldKind, RawTerm)>, field: FieldKind, terms: Vec<RawTerm>) {
    out.extend(terms.into_iter().map(|t| (field, t)));
}

fn push_context(out: &mut Vec<(FieldKind, RawTerm)>, context: BTreeMap<String, Vec<RawTerm>>, origin: &str) {
    for (facet, terms) in context {
        match FieldKind::from_facet(&facet) {
            Some(field) => push_all(out, field, terms),
            None => tracing::warn!(origin, facet = %facet, "ignoring unknown context facet"),
        }
    }
}

fn read(path: &Path) -> Result<String, OntologyError> {
    std::fs::read_to_string(path).map_err(|source| OntologyError::Io {
        path: path.display().to_string(),
        source,
    })
}
