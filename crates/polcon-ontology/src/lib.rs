//! Privacy ontology for polcon
//!
//! The closed vocabulary every other stage normalizes into:
//! - **Vocabulary**: canonical URIs per field (actions, subjects, purposes,
//!   views, recipients, legal bases, context facets), each with a label,
//!   optional parent and alternative labels
//! - **Compatibility rules**: extra subsumption edges, cross-party action
//!   counterparts, and per-facet context (in)compatibilities
//! - **Hierarchy index**: subsumption, taxonomy depth and closures computed
//!   once from the two above
//!
//! ```text
//!   vocab.json ──┐
//!                ├──► Ontology { vocabulary, rules, hierarchy }
//!   rules.json ──┘            (read-only, passed by reference)
//! ```
//!
//! The vocabulary is loaded once per run and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub mod hierarchy;
pub mod rules;
pub mod vocab;

pub use hierarchy::HierarchyIndex;
pub use rules::{CompatibilityRules, ContextRule, CounterpartRule, SubsumptionEdge};
pub use vocab::{VocabTerm, Vocabulary};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OntologyError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid ontology JSON in {origin}: {message}")]
    Parse { origin: String, message: String },
    #[error("duplicate vocabulary URI `{0}`")]
    DuplicateUri(String),
    #[error("term `{uri}` names unknown parent `{parent}`")]
    UnknownParent { uri: String, parent: String },
    #[error("term `{uri}` does not belong to the `{field}` namespace (expected prefix `{expected}`)")]
    WrongNamespace {
        uri: String,
        field: FieldKind,
        expected: &'static str,
    },
    #[error("parent cycle detected at `{0}`")]
    Cycle(String),
    #[error("vocabulary has no {0} terms")]
    Empty(FieldKind),
    #[error("compatibility rule references unknown term `{0}`")]
    UnknownRuleTerm(String),
}

// ============================================================================
// Field kinds and canonical URIs
// ============================================================================

/// The closed set of operation fields that normalize into the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Action,
    Subject,
    Purpose,
    View,
    Recipient,
    LegalBasis,
    Temporal,
    Localisation,
    Manner,
    Source,
}

impl FieldKind {
    pub const ALL: [FieldKind; 10] = [
        FieldKind::Action,
        FieldKind::Subject,
        FieldKind::Purpose,
        FieldKind::View,
        FieldKind::Recipient,
        FieldKind::LegalBasis,
        FieldKind::Temporal,
        FieldKind::Localisation,
        FieldKind::Manner,
        FieldKind::Source,
    ];

    /// Context facets compared by the compatibility rules.
    pub const CONTEXT_FACETS: [FieldKind; 4] = [
        FieldKind::Temporal,
        FieldKind::Localisation,
        FieldKind::Manner,
        FieldKind::Source,
    ];

    /// URI prefix every term of this field must carry.
    pub fn uri_prefix(self) -> &'static str {
        match self {
            FieldKind::Action => "action:",
            FieldKind::Subject => "subject:",
            FieldKind::Purpose => "purpose:",
            FieldKind::View => "view:",
            FieldKind::Recipient => "recipient:",
            FieldKind::LegalBasis => "basis:",
            FieldKind::Temporal
            | FieldKind::Localisation
            | FieldKind::Manner
            | FieldKind::Source => "context:",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Action => "action",
            FieldKind::Subject => "subject",
            FieldKind::Purpose => "purpose",
            FieldKind::View => "view",
            FieldKind::Recipient => "recipient",
            FieldKind::LegalBasis => "legal_basis",
            FieldKind::Temporal => "temporal",
            FieldKind::Localisation => "localisation",
            FieldKind::Manner => "manner",
            FieldKind::Source => "source",
        }
    }

    /// Parse a context facet name as used in `context.json` and the rules file.
    pub fn from_facet(name: &str) -> Option<FieldKind> {
        match name {
            "temporal" => Some(FieldKind::Temporal),
            "localisation" | "localization" => Some(FieldKind::Localisation),
            "manner" => Some(FieldKind::Manner),
            "source" => Some(FieldKind::Source),
            _ => None,
        }
    }

    pub fn is_context_facet(self) -> bool {
        Self::CONTEXT_FACETS.contains(&self)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical vocabulary URI such as `purpose:advertising`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermUri(String);

impl TermUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local part after the namespace prefix (`advertising` for `purpose:advertising`).
    pub fn local_name(&self) -> &str {
        self.0.split_once(':').map(|(_, rest)| rest).unwrap_or(&self.0)
    }
}

impl fmt::Display for TermUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TermUri {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Typed view of a normalized `view:` URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Do,
    DoNot,
    May,
}

impl Modality {
    pub fn from_uri(uri: &TermUri) -> Option<Modality> {
        match uri.as_str() {
            "view:do" => Some(Modality::Do),
            "view:do_not" => Some(Modality::DoNot),
            "view:may" => Some(Modality::May),
            _ => None,
        }
    }

    /// `do` and `may` both assert that processing can happen.
    pub fn is_affirmative(self) -> bool {
        matches!(self, Modality::Do | Modality::May)
    }
}

// ============================================================================
// Ontology bundle
// ============================================================================

/// Vocabulary, rules and the derived hierarchy index.
#[derive(Debug, Clone)]
pub struct Ontology {
    pub vocabulary: Vocabulary,
    pub rules: CompatibilityRules,
    pub hierarchy: HierarchyIndex,
}

impl Ontology {
    pub fn new(vocabulary: Vocabulary, rules: CompatibilityRules) -> Result<Self, OntologyError> {
        rules.check_terms(&vocabulary)?;
        let hierarchy = HierarchyIndex::build(&vocabulary, &rules);
        Ok(Self {
            vocabulary,
            rules,
            hierarchy,
        })
    }

    /// The embedded default vocabulary and rules.
    pub fn builtin() -> Result<Self, OntologyError> {
        Self::new(Vocabulary::builtin()?, CompatibilityRules::builtin()?)
    }

    /// Load from optional paths, falling back to the embedded defaults.
    pub fn load(vocab_path: Option<&Path>, rules_path: Option<&Path>) -> Result<Self, OntologyError> {
        let vocabulary = match vocab_path {
            Some(path) => Vocabulary::load(path)?,
            None => Vocabulary::builtin()?,
        };
        let rules = match rules_path {
            Some(path) => CompatibilityRules::load(path)?,
            None => CompatibilityRules::builtin()?,
        };
        Self::new(vocabulary, rules)
    }
}
