//! Provenance-carrying statement graph.
//!
//! ```text
//!                 hasAction / hasSubject / hasPurpose / ...
//!   Operation ─────────────────────────────────────────────▶ Term (interned by URI)
//!       │  statedIn
//!       ├──────────▶ Policy
//!       │  evidencedBy
//!       ├──────────▶ Evidence (one per span)
//!       │  hasIssue
//!       └──────────▶ Issue
//! ```
//!
//! Nodes live in an arena and edges are index pairs. The graph only grows;
//! nothing is rewritten once appended.

use crate::normalize::NormalizedOperation;
use crate::validate::{IssueCode, Severity, ValidationReport};
use dashmap::DashMap;
use polcon_extract::EvidenceSpan;
use polcon_ingest::PartyType;
use polcon_ontology::{FieldKind, TermUri};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Term {
        uri: TermUri,
        field: FieldKind,
    },
    Operation {
        op_id: String,
        policy_id: String,
        party_type: PartyType,
    },
    Policy {
        policy_id: String,
    },
    Evidence {
        policy_id: String,
        char_start: usize,
        char_end: usize,
        quote: String,
    },
    Issue {
        issue_id: String,
        code: IssueCode,
        severity: Severity,
    },
}

impl Node {
    /// Stable key used for interning and in the JSONL output.
    pub fn key(&self) -> String {
        match self {
            Node::Term { uri, .. } => uri.to_string(),
            Node::Operation { op_id, .. } => format!("op:{op_id}"),
            Node::Policy { policy_id } => format!("policy:{policy_id}"),
            Node::Evidence {
                policy_id,
                char_start,
                char_end,
                ..
            } => format!("evidence:{policy_id}:{char_start}-{char_end}"),
            Node::Issue { issue_id, .. } => format!("issue:{issue_id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Predicate {
    HasAction,
    HasSubject,
    HasPurpose,
    HasView,
    HasRecipient,
    HasLegalBasis,
    HasTemporal,
    HasLocalisation,
    HasManner,
    HasSource,
    StatedIn,
    EvidencedBy,
    HasIssue,
}

impl Predicate {
    pub fn for_field(field: FieldKind) -> Predicate {
        match field {
            FieldKind::Action => Predicate::HasAction,
            FieldKind::Subject => Predicate::HasSubject,
            FieldKind::Purpose => Predicate::HasPurpose,
            FieldKind::View => Predicate::HasView,
            FieldKind::Recipient => Predicate::HasRecipient,
            FieldKind::LegalBasis => Predicate::HasLegalBasis,
            FieldKind::Temporal => Predicate::HasTemporal,
            FieldKind::Localisation => Predicate::HasLocalisation,
            FieldKind::Manner => Predicate::HasManner,
            FieldKind::Source => Predicate::HasSource,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Predicate::HasAction => "hasAction",
            Predicate::HasSubject => "hasSubject",
            Predicate::HasPurpose => "hasPurpose",
            Predicate::HasView => "hasView",
            Predicate::HasRecipient => "hasRecipient",
            Predicate::HasLegalBasis => "hasLegalBasis",
            Predicate::HasTemporal => "hasTemporal",
            Predicate::HasLocalisation => "hasLocalisation",
            Predicate::HasManner => "hasManner",
            Predicate::HasSource => "hasSource",
            Predicate::StatedIn => "statedIn",
            Predicate::EvidencedBy => "evidencedBy",
            Predicate::HasIssue => "hasIssue",
        }
    }
}

/// Where a triple comes from in the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub policy_id: String,
    pub section_path: String,
    pub char_start: usize,
    pub char_end: usize,
    pub quote: String,
}

impl Provenance {
    fn from_span(op: &NormalizedOperation, span: &EvidenceSpan) -> Self {
        Self {
            policy_id: op.policy_id.clone(),
            section_path: op.section_path.clone(),
            char_start: span.char_start,
            char_end: span.char_end,
            quote: span.quote.clone(),
        }
    }

    /// First evidence span of the operation, or an empty anchor when it has none.
    fn for_operation(op: &NormalizedOperation) -> Self {
        match op.evidence.first() {
            Some(span) => Self::from_span(op, span),
            None => Self {
                policy_id: op.policy_id.clone(),
                section_path: op.section_path.clone(),
                char_start: 0,
                char_end: 0,
                quote: String::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub subject: NodeId,
    pub predicate: Predicate,
    pub object: NodeId,
    pub provenance: Provenance,
}

/// One line of `graph.triples.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripleRecord {
    pub subject: String,
    pub predicate: Predicate,
    pub object: String,
    pub object_node: Node,
    pub provenance: Provenance,
}

// ============================================================================
// Graph
// ============================================================================

#[derive(Debug, Default)]
pub struct StatementGraph {
    nodes: Vec<Node>,
    triples: Vec<Triple>,
    /// node key -> arena index
    index: DashMap<String, NodeId, ahash::RandomState>,
    next_id: AtomicU32,
    /// op_id -> (operation node, anchor provenance)
    operations: HashMap<String, (NodeId, Provenance)>,
}

impl StatementGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_operations<'a>(ops: impl IntoIterator<Item = &'a NormalizedOperation>) -> Self {
        let mut graph = Self::new();
        for op in ops {
            graph.add_operation(op);
        }
        tracing::info!(nodes = graph.node_count(), triples = graph.len(), "built statement graph");
        graph
    }

    /// Return the arena id for `node`, appending it on first sight.
    fn intern(&mut self, node: Node) -> NodeId {
        let key = node.key();
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let id = NodeId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.nodes.push(node);
        self.index.insert(key, id);
        id
    }

    fn push(&mut self, subject: NodeId, predicate: Predicate, object: NodeId, provenance: Provenance) {
        self.triples.push(Triple {
            subject,
            predicate,
            object,
            provenance,
        });
    }

    /// Append one operation with its field edges, policy edge and evidence.
    /// Unmapped fields produce no edge.
    pub fn add_operation(&mut self, op: &NormalizedOperation) -> NodeId {
        if let Some((id, _)) = self.operations.get(&op.op_id) {
            return *id;
        }
        let anchor = Provenance::for_operation(op);
        let op_node = self.intern(Node::Operation {
            op_id: op.op_id.clone(),
            policy_id: op.policy_id.clone(),
            party_type: op.party_type,
        });

        for (field, value) in op.fields() {
            let Some(uri) = value.uri() else {
                continue;
            };
            let term = self.intern(Node::Term {
                uri: uri.clone(),
                field,
            });
            self.push(op_node, Predicate::for_field(field), term, anchor.clone());
        }

        let policy = self.intern(Node::Policy {
            policy_id: op.policy_id.clone(),
        });
        self.push(op_node, Predicate::StatedIn, policy, anchor.clone());

        for span in &op.evidence {
            let evidence = self.intern(Node::Evidence {
                policy_id: op.policy_id.clone(),
                char_start: span.char_start,
                char_end: span.char_end,
                quote: span.quote.clone(),
            });
            self.push(op_node, Predicate::EvidencedBy, evidence, Provenance::from_span(op, span));
        }

        self.operations.insert(op.op_id.clone(), (op_node, anchor));
        op_node
    }

    /// Append `hasIssue` triples for every issue whose operation is in the graph.
    pub fn annotate_issues(&mut self, report: &ValidationReport) -> usize {
        let mut added = 0;
        for issue in &report.issues {
            let Some((op_node, anchor)) = self.operations.get(&issue.op_id).cloned() else {
                tracing::debug!(op_id = %issue.op_id, "issue for an operation not in the graph");
                continue;
            };
            let node = self.intern(Node::Issue {
                issue_id: issue.issue_id.clone(),
                code: issue.code,
                severity: issue.severity,
            });
            self.push(op_node, Predicate::HasIssue, node, anchor);
            added += 1;
        }
        added
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    pub fn node_id(&self, key: &str) -> Option<NodeId> {
        self.index.get(key).map(|id| *id)
    }

    pub fn operation_node(&self, op_id: &str) -> Option<NodeId> {
        self.operations.get(op_id).map(|(id, _)| *id)
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    /// Triples leaving `subject`.
    pub fn outgoing(&self, subject: NodeId) -> impl Iterator<Item = &Triple> {
        self.triples.iter().filter(move |t| t.subject == subject)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn count_by_predicate(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for triple in &self.triples {
            *counts.entry(triple.predicate.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn records(&self) -> Vec<TripleRecord> {
        self.triples
            .iter()
            .filter_map(|t| {
                let subject = self.node(t.subject)?;
                let object = self.node(t.object)?;
                Some(TripleRecord {
                    subject: subject.key(),
                    predicate: t.predicate,
                    object: object.key(),
                    object_node: object.clone(),
                    provenance: t.provenance.clone(),
                })
            })
            .collect()
    }

    /// One JSON object per line, in append order.
    pub fn write_jsonl<W: Write>(&self, mut out: W) -> io::Result<()> {
        for record in self.records() {
            serde_json::to_writer(&mut out, &record)?;
            out.write_all(b"\n")?;
        }
        out.flush()
    }

    pub fn to_jsonl(&self) -> io::Result<String> {
        let mut buf = Vec::new();
        self.write_jsonl(&mut buf)?;
        String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Normalizer;
    use crate::validate::ConstraintValidator;
    use polcon_extract::{ContextRaw, LabeledSpan, OperationCandidate};
    use polcon_ontology::Ontology;

    const TEXT: &str = "We share your email address with partners for advertising.";

    fn candidate(op_id: &str, subject: Option<&str>) -> OperationCandidate {
        OperationCandidate {
            op_id: op_id.into(),
            policy_id: "fp".into(),
            party_type: PartyType::FirstParty,
            chunk_id: "fp:root:0".into(),
            section_path: "Sharing".into(),
            action: Some(LabeledSpan::new("share")),
            subject: subject.map(LabeledSpan::new),
            view: Some(LabeledSpan::new("do")),
            purposes: vec![LabeledSpan::new("advertising")],
            context: ContextRaw {
                recipient: Some(LabeledSpan::new("partners")),
                ..Default::default()
            },
            evidence: vec![EvidenceSpan {
                quote: TEXT.into(),
                char_start: 0,
                char_end: TEXT.len(),
            }],
        }
    }

    #[test]
    fn operations_share_interned_terms() {
        let ontology = Ontology::builtin().unwrap();
        let normalizer = Normalizer::new(&ontology.vocabulary);
        let (ops, _) = normalizer.normalize_all(&[
            candidate("fp#op0", Some("email address")),
            candidate("fp#op1", Some("email")),
        ]);
        let graph = StatementGraph::from_operations(&ops);

        // 2 operations, 5 terms, 1 policy, 1 shared evidence node
        assert_eq!(graph.node_count(), 9);
        let counts = graph.count_by_predicate();
        assert_eq!(counts["hasSubject"], 2);
        assert_eq!(counts["statedIn"], 2);
        assert_eq!(counts["evidencedBy"], 2);
        assert_eq!(graph.node_id("subject:email").map(|id| id.0), Some(2));

        for triple in graph.triples() {
            assert_eq!(triple.provenance.quote, TEXT);
            assert_eq!(triple.provenance.section_path, "Sharing");
        }
    }

    #[test]
    fn unmapped_fields_have_no_edge_and_issues_are_appended() {
        let ontology = Ontology::builtin().unwrap();
        let normalizer = Normalizer::new(&ontology.vocabulary);
        let (ops, _) = normalizer.normalize_all(&[candidate("fp#op0", None)]);
        let report = ConstraintValidator::new(&ontology).validate(&ops);

        let mut graph = StatementGraph::from_operations(&ops);
        let before = graph.len();
        assert!(!graph.count_by_predicate().contains_key("hasSubject"));
        assert_eq!(graph.annotate_issues(&report), 1);
        assert_eq!(graph.len(), before + 1);

        let op = graph.operation_node("fp#op0").unwrap();
        let issue = graph.outgoing(op).find(|t| t.predicate == Predicate::HasIssue).unwrap();
        assert!(matches!(
            graph.node(issue.object),
            Some(Node::Issue { code: IssueCode::MissingSubject, .. })
        ));
    }

    #[test]
    fn jsonl_has_one_record_per_triple() {
        let ontology = Ontology::builtin().unwrap();
        let normalizer = Normalizer::new(&ontology.vocabulary);
        let (ops, _) = normalizer.normalize_all(&[candidate("fp#op0", Some("email"))]);
        let graph = StatementGraph::from_operations(&ops);

        let jsonl = graph.to_jsonl().unwrap();
        let records: Vec<TripleRecord> = jsonl.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(records.len(), graph.len());
        assert_eq!(records[0].subject, "op:fp#op0");
        assert_eq!(records[0].predicate, Predicate::HasAction);
        assert_eq!(records[0].object, "action:share");
        assert!(!jsonl.contains("\"predicate\":\"hasLegalBasis\""));
        assert!(jsonl.contains("\"predicate\":\"evidencedBy\""));
    }
}
