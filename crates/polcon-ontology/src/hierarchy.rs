//! Taxonomy index: subsumption, depth and closures.
//!
//! Built once from the vocabulary parent links plus the rule edges. All
//! queries take plain `&str` URIs so callers can pass `TermUri::as_str()`.

use crate::{CompatibilityRules, ContextRule, FieldKind, TermUri, Vocabulary};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct HierarchyIndex {
    /// child -> direct parents (vocabulary parent first, then rule edges)
    parents: HashMap<String, Vec<String>>,
    /// depth along the vocabulary parent chain (roots are 0)
    depth: HashMap<String, usize>,
    members: BTreeMap<FieldKind, Vec<String>>,
    counterparts: Vec<(String, String)>,
    context_rules: BTreeMap<FieldKind, Vec<ContextRule>>,
}

impl HierarchyIndex {
    pub fn build(vocab: &Vocabulary, rules: &CompatibilityRules) -> Self {
        let mut index = HierarchyIndex::default();

        for (field, term) in vocab.iter() {
            let uri = term.uri.as_str().to_string();
            let entry = index.parents.entry(uri.clone()).or_default();
            if let Some(parent) = &term.parent {
                entry.push(parent.as_str().to_string());
            }
            index.members.entry(field).or_default().push(uri);
        }

        for edge in rules.purpose_subsumption.iter().chain(&rules.subject_subsumption) {
            let parents = index.parents.entry(edge.child.clone()).or_default();
            if !parents.contains(&edge.parent) {
                parents.push(edge.parent.clone());
            }
        }

        for (_, term) in vocab.iter() {
            let mut depth = 0;
            let mut cursor = term.parent.as_ref();
            let mut seen = HashSet::new();
            while let Some(parent) = cursor {
                if !seen.insert(parent.as_str()) {
                    break;
                }
                depth += 1;
                cursor = vocab.parent_of(parent.as_str());
            }
            index.depth.insert(term.uri.as_str().to_string(), depth);
        }

        index.counterparts = rules
            .action_counterparts
            .iter()
            .map(|r| (r.a.clone(), r.b.clone()))
            .collect();

        for facet in FieldKind::CONTEXT_FACETS {
            let facet_rules = rules.context_rules(facet);
            if !facet_rules.is_empty() {
                index.context_rules.insert(facet, facet_rules.to_vec());
            }
        }

        index
    }

    // ========================================================================
    // Subsumption
    // ========================================================================

    /// True when `parent` equals `child` or is one of its (transitive) ancestors.
    pub fn is_subsumed(&self, parent: &str, child: &str) -> bool {
        if parent == child {
            return true;
        }
        let mut queue = VecDeque::from([child]);
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            for p in self.parents.get(current).into_iter().flatten() {
                if p == parent {
                    return true;
                }
                queue.push_back(p.as_str());
            }
        }
        false
    }

    /// Equal, or one subsumes the other.
    pub fn related(&self, a: &str, b: &str) -> bool {
        self.is_subsumed(a, b) || self.is_subsumed(b, a)
    }

    /// Taxonomy depth of a vocabulary term; `None` for unknown URIs.
    pub fn depth(&self, uri: &str) -> Option<usize> {
        self.depth.get(uri).copied()
    }

    /// Is `target` covered by any of `allowed` (including descendants)?
    pub fn purpose_in_closure<'a>(&self, allowed: impl IntoIterator<Item = &'a str>, target: &str) -> bool {
        allowed.into_iter().any(|p| self.is_subsumed(p, target))
    }

    /// `roots` plus every vocabulary term of `field` they subsume.
    pub fn closure(&self, field: FieldKind, roots: &[TermUri]) -> BTreeSet<TermUri> {
        let mut out: BTreeSet<TermUri> = roots.iter().cloned().collect();
        for uri in self.members.get(&field).into_iter().flatten() {
            if roots.iter().any(|r| self.is_subsumed(r.as_str(), uri)) {
                out.insert(TermUri::new(uri.as_str()));
            }
        }
        out
    }

    // ========================================================================
    // Actions and context
    // ========================================================================

    /// Whether two actions describe the same processing.
    ///
    /// With `cross_party` set, declared counterpart pairs (and their
    /// descendants) also correspond, in either order.
    pub fn actions_correspond(&self, a: &str, b: &str, cross_party: bool) -> bool {
        if self.related(a, b) {
            return true;
        }
        cross_party
            && self.counterparts.iter().any(|(x, y)| {
                (self.is_subsumed(x, a) && self.is_subsumed(y, b))
                    || (self.is_subsumed(y, a) && self.is_subsumed(x, b))
            })
    }

    /// Facet compatibility. A missing side or equal values are compatible;
    /// otherwise the first rule matching the pair (or their ancestors) decides,
    /// and pairs no rule mentions are compatible.
    pub fn context_compatible(&self, facet: FieldKind, a: Option<&str>, b: Option<&str>) -> bool {
        let (Some(a), Some(b)) = (a, b) else {
            return true;
        };
        if a == b {
            return true;
        }
        self.context_rules
            .get(&facet)
            .into_iter()
            .flatten()
            .find(|rule| {
                (self.is_subsumed(&rule.a, a) && self.is_subsumed(&rule.b, b))
                    || (self.is_subsumed(&rule.b, a) && self.is_subsumed(&rule.a, b))
            })
            .map(|rule| rule.compatible)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ontology;

    fn index() -> HierarchyIndex {
        Ontology::builtin().unwrap().hierarchy
    }

    #[test]
    fn subsumption_is_reflexive_and_transitive() {
        let h = index();
        assert!(h.is_subsumed("subject:location", "subject:location"));
        assert!(h.is_subsumed("subject:location", "subject:precise_location"));
        assert!(h.is_subsumed("subject:personal_data", "subject:precise_location"));
        assert!(!h.is_subsumed("subject:precise_location", "subject:location"));
        assert!(h.is_subsumed("purpose:advertising", "purpose:marketing"));
    }

    #[test]
    fn depth_follows_vocabulary_parents() {
        let h = index();
        assert_eq!(h.depth("recipient:third_party"), Some(0));
        assert_eq!(h.depth("recipient:partner"), Some(1));
        assert_eq!(h.depth("recipient:advertising_partner"), Some(2));
        assert_eq!(h.depth("recipient:unknown"), None);
    }

    #[test]
    fn purpose_closure_includes_descendants() {
        let h = index();
        let closure = h.closure(FieldKind::Purpose, &[TermUri::new("purpose:advertising")]);
        assert!(closure.contains(&TermUri::new("purpose:marketing")));
        assert!(closure.contains(&TermUri::new("purpose:personalized_ads")));
        assert!(!closure.contains(&TermUri::new("purpose:analytics")));
        assert!(h.purpose_in_closure(["purpose:service_provision"], "purpose:service_improvement"));
        assert!(!h.purpose_in_closure(["purpose:service_provision"], "purpose:advertising"));
    }

    #[test]
    fn counterparts_only_apply_across_parties() {
        let h = index();
        assert!(h.actions_correspond("action:share", "action:receive", true));
        assert!(h.actions_correspond("action:receive", "action:sell", true));
        assert!(!h.actions_correspond("action:share", "action:receive", false));
        assert!(h.actions_correspond("action:sell", "action:share", false));
    }

    #[test]
    fn context_rules_decide_compatibility() {
        let h = index();
        assert!(!h.context_compatible(FieldKind::Localisation, Some("context:eu_only"), Some("context:global")));
        assert!(!h.context_compatible(FieldKind::Localisation, Some("context:global"), Some("context:eu_only")));
        assert!(h.context_compatible(FieldKind::Localisation, Some("context:eu_only"), None));
        assert!(h.context_compatible(FieldKind::Localisation, Some("context:us"), Some("context:global")));
        // rule on the parent covers the child
        assert!(!h.context_compatible(
            FieldKind::Temporal,
            Some("context:temporal_deletion"),
            Some("context:temporal_indefinite")
        ));
    }
}
