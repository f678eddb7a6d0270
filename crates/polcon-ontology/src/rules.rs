//! Compatibility rules
//!
//! Extra knowledge layered on top of the vocabulary's own parent links:
//! subsumption edges between purposes/subjects, action pairs that describe
//! the two ends of one data flow, and explicit context-facet (in)compatibilities.

use crate::{FieldKind, OntologyError, Vocabulary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const BUILTIN_RULES: &str = include_str!("../data/compatibility_rules.json");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsumptionEdge {
    pub parent: String,
    pub child: String,
}

/// Two actions describing the same flow seen from either party
/// (first party shares, third party receives).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartRule {
    pub a: String,
    pub b: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRule {
    pub a: String,
    pub b: String,
    pub compatible: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatibilityRules {
    pub purpose_subsumption: Vec<SubsumptionEdge>,
    pub subject_subsumption: Vec<SubsumptionEdge>,
    pub action_counterparts: Vec<CounterpartRule>,
    /// facet name (`localisation`, `manner`, ...) -> rules
    pub context_compatibility: BTreeMap<String, Vec<ContextRule>>,
}

impl CompatibilityRules {
    pub fn builtin() -> Result<Self, OntologyError> {
        Self::from_json_str(BUILTIN_RULES, "builtin compatibility_rules.json")
    }

    pub fn from_json_str(json: &str, origin: &str) -> Result<Self, OntologyError> {
        serde_json::from_str(json).map_err(|e| OntologyError::Parse {
            origin: origin.to_string(),
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, OntologyError> {
        let json = std::fs::read_to_string(path).map_err(|source| OntologyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json, &path.display().to_string())
    }

    /// Rules registered for a context facet.
    pub fn context_rules(&self, facet: FieldKind) -> &[ContextRule] {
        self.context_compatibility
            .get(facet.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every URI a rule mentions must exist in the vocabulary.
    pub fn check_terms(&self, vocab: &Vocabulary) -> Result<(), OntologyError> {
        let known = |uri: &str| {
            if vocab.get(uri).is_some() {
                Ok(())
            } else {
                Err(OntologyError::UnknownRuleTerm(uri.to_string()))
            }
        };

        for edge in self.purpose_subsumption.iter().chain(&self.subject_subsumption) {
            known(&edge.parent)?;
            known(&edge.child)?;
        }
        for rule in &self.action_counterparts {
            known(&rule.a)?;
            known(&rule.b)?;
        }
        for (facet, rules) in &self.context_compatibility {
            if FieldKind::from_facet(facet).is_none() {
                tracing::warn!(facet = %facet, "compatibility rules name an unknown context facet");
            }
            for rule in rules {
                known(&rule.a)?;
                known(&rule.b)?;
            }
        }
        Ok(())
    }
}
