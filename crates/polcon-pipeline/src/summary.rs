//! `summary.json`: counts for one run.

use chrono::{DateTime, Utc};
use polcon_extract::{ExtractionRun, GatewayStats, NoteKind};
use polcon_graph::{IssueCode, Severity, StatementGraph, ValidationReport};
use polcon_ingest::{PartyType, PolicyDocument, SegmentStats};
use polcon_reason::{Comparison, GateOutcome, MismatchType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCounts {
    pub policy_id: String,
    pub party_type: PartyType,
    #[serde(flatten)]
    pub segments: SegmentStats,
    pub chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub backend: String,
    pub partial: bool,
    pub policies: Vec<PolicyCounts>,
    pub chunks: usize,
    pub chunks_extracted: usize,
    pub chunks_degraded: usize,
    pub chunks_skipped: usize,
    pub extraction: GatewayStats,
    pub candidates: usize,
    /// Candidates rejected by the gateway, by note kind
    pub dropped_by_reason: BTreeMap<NoteKind, usize>,
    pub notes_by_kind: BTreeMap<NoteKind, usize>,
    pub operations: usize,
    pub valid_operations: usize,
    pub unmapped_fields: usize,
    pub issues_by_severity: BTreeMap<Severity, usize>,
    pub issues_by_code: BTreeMap<IssueCode, usize>,
    pub graph_triples: usize,
    pub aligned_pairs: usize,
    pub intra_policy_pairs: usize,
    pub findings_by_type: BTreeMap<MismatchType, usize>,
    pub findings: usize,
    pub findings_dropped: usize,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Everything the summary is computed from.
pub(crate) struct SummaryInput<'a> {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub documents: &'a [PolicyDocument],
    pub chunk_counts: &'a [usize],
    pub extraction: &'a ExtractionRun,
    pub operations: usize,
    pub unmapped_fields: usize,
    pub validation: &'a ValidationReport,
    pub graph: &'a StatementGraph,
    pub comparison: &'a Comparison,
    pub gate: &'a GateOutcome,
    pub notes: Vec<String>,
}

impl RunSummary {
    pub(crate) fn build(input: SummaryInput<'_>) -> Self {
        let mut notes_by_kind = BTreeMap::new();
        for note in &input.extraction.notes {
            *notes_by_kind.entry(note.kind).or_insert(0) += 1;
        }
        let dropped_by_reason = notes_by_kind
            .iter()
            .filter(|(kind, _)| {
                matches!(
                    kind,
                    NoteKind::SchemaViolation | NoteKind::EvidenceMismatch | NoteKind::Duplicate
                )
            })
            .map(|(kind, count)| (*kind, *count))
            .collect();

        let mut findings_by_type = BTreeMap::new();
        for finding in &input.gate.kept {
            *findings_by_type.entry(finding.mismatch_type).or_insert(0) += 1;
        }

        let policies = input
            .documents
            .iter()
            .zip(input.chunk_counts)
            .map(|(doc, chunks)| PolicyCounts {
                policy_id: doc.policy_id.clone(),
                party_type: doc.party_type,
                segments: doc.stats(),
                chunks: *chunks,
            })
            .collect();

        Self {
            run_id: input.run_id,
            started_at: input.started_at,
            finished_at: Utc::now(),
            backend: input.extraction.backend.clone(),
            partial: input.extraction.partial,
            policies,
            chunks: input.extraction.chunks_total,
            chunks_extracted: input.extraction.chunks_extracted,
            chunks_degraded: input.extraction.chunks_degraded,
            chunks_skipped: input.extraction.chunks_skipped,
            extraction: input.extraction.stats.clone(),
            candidates: input.extraction.candidates.len(),
            dropped_by_reason,
            notes_by_kind,
            operations: input.operations,
            valid_operations: input.validation.valid_op_ids.len(),
            unmapped_fields: input.unmapped_fields,
            issues_by_severity: input.validation.count_by_severity(),
            issues_by_code: input.validation.count_by_code(),
            graph_triples: input.graph.len(),
            aligned_pairs: input.comparison.aligned_pairs.len(),
            intra_policy_pairs: input.comparison.intra_pairs.len(),
            findings: input.gate.kept.len(),
            findings_by_type,
            findings_dropped: input.gate.dropped.len(),
            notes: input.notes,
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
