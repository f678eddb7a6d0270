//! Machine and human reports over the frozen finding set.
//!
//! Both are pure functions of their inputs. Quotes and section paths are
//! reproduced exactly as recorded in provenance.

use crate::finding::{CitedEvidence, ComplianceFinding, MismatchType, Scope};
use crate::verify::DroppedFinding;
use polcon_graph::{NormalizedOperation, ValidationIssue, ValidationReport};
use polcon_ingest::PartyType;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Run-level facts the report needs besides findings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportMeta {
    pub report_id: String,
    pub first_party_policy_id: String,
    pub third_party_policy_id: String,
    pub partial: bool,
    pub strict_mode: bool,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// An operation kept out of reasoning, with the issues that excluded it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnvalidatedOperation {
    pub op_id: String,
    pub policy_id: String,
    pub party_type: PartyType,
    pub section_path: String,
    pub quotes: Vec<String>,
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineReport {
    pub report_id: String,
    pub first_party_policy_id: String,
    pub third_party_policy_id: String,
    pub partial: bool,
    pub strict_mode: bool,
    pub findings: Vec<ComplianceFinding>,
    #[serde(default)]
    pub dropped_findings: Vec<DroppedFinding>,
    #[serde(default)]
    pub unvalidated_operations: Vec<UnvalidatedOperation>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl MachineReport {
    pub fn build(
        meta: ReportMeta,
        findings: &[ComplianceFinding],
        dropped: &[DroppedFinding],
        ops: &[NormalizedOperation],
        validation: &ValidationReport,
    ) -> Self {
        let unvalidated_operations = ops
            .iter()
            .filter(|op| !validation.is_valid(&op.op_id))
            .map(|op| UnvalidatedOperation {
                op_id: op.op_id.clone(),
                policy_id: op.policy_id.clone(),
                party_type: op.party_type,
                section_path: op.section_path.clone(),
                quotes: op.evidence.iter().map(|e| e.quote.clone()).collect(),
                issues: validation.issues_for(&op.op_id).cloned().collect(),
            })
            .collect();

        Self {
            report_id: meta.report_id,
            first_party_policy_id: meta.first_party_policy_id,
            third_party_policy_id: meta.third_party_policy_id,
            partial: meta.partial,
            strict_mode: meta.strict_mode,
            findings: findings.to_vec(),
            dropped_findings: dropped.to_vec(),
            unvalidated_operations,
            notes: meta.notes,
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

// ============================================================================
// Human narrative
// ============================================================================

pub fn render_human(report: &MachineReport) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = write_human(&mut out, report);
    out
}

fn write_human(out: &mut String, report: &MachineReport) -> std::fmt::Result {
    writeln!(out, "Policy consistency report {}", report.report_id)?;
    writeln!(out, "First party: {}", report.first_party_policy_id)?;
    writeln!(out, "Third party: {}", report.third_party_policy_id)?;
    if report.partial {
        writeln!(out, "Status: PARTIAL (not every chunk was extracted)")?;
    } else {
        writeln!(out, "Status: complete")?;
    }
    if report.strict_mode {
        writeln!(out, "Mode: strict")?;
    }
    writeln!(out, "Findings: {}", report.findings.len())?;

    for mismatch in MismatchType::ALL {
        let group: Vec<&ComplianceFinding> =
            report.findings.iter().filter(|f| f.mismatch_type == mismatch).collect();
        if group.is_empty() {
            continue;
        }
        writeln!(out)?;
        writeln!(out, "== {} ({}) ==", mismatch, group.len())?;
        for finding in group {
            writeln!(out)?;
            writeln!(
                out,
                "[{}] {}, confidence {:.2}, {}",
                finding.finding_id,
                finding.finding_class,
                finding.confidence,
                match finding.scope {
                    Scope::CrossPolicy => "across policies",
                    Scope::IntraPolicy => "within the first-party policy",
                }
            )?;
            writeln!(out, "  {}", finding.rationale)?;
            if !finding.extra_or_missing.is_empty() {
                let terms: Vec<&str> = finding.extra_or_missing.iter().map(|u| u.as_str()).collect();
                writeln!(out, "  Not covered: {}", terms.join(", "))?;
            }
            write_quotes(out, "First party", &finding.first_party_evidence)?;
            write_quotes(out, "Third party", &finding.third_party_evidence)?;
            for note in &finding.notes {
                writeln!(out, "  Note: {note}")?;
            }
        }
    }

    if !report.unvalidated_operations.is_empty() {
        writeln!(out)?;
        writeln!(out, "== Unvalidated operations ({}) ==", report.unvalidated_operations.len())?;
        for op in &report.unvalidated_operations {
            writeln!(out)?;
            writeln!(out, "{} [{} {}] {}", op.op_id, op.party_type.tag(), op.policy_id, op.section_path)?;
            for quote in &op.quotes {
                writeln!(out, "    \"{quote}\"")?;
            }
            for issue in &op.issues {
                writeln!(out, "  {} {}: {}", issue.severity, issue.code, issue.message)?;
            }
        }
    }

    if !report.dropped_findings.is_empty() {
        writeln!(out)?;
        writeln!(out, "== Dropped by verifier gate ({}) ==", report.dropped_findings.len())?;
        for dropped in &report.dropped_findings {
            writeln!(out, "{}: {}", dropped.finding_id, dropped.reason)?;
        }
    }

    if !report.notes.is_empty() {
        writeln!(out)?;
        writeln!(out, "== Notes ==")?;
        for note in &report.notes {
            writeln!(out, "- {note}")?;
        }
    }
    Ok(())
}

fn write_quotes(out: &mut String, party: &str, evidence: &[CitedEvidence]) -> std::fmt::Result {
    for e in evidence {
        writeln!(out, "  {party} ({}) {}:", e.policy_id, e.section_path)?;
        writeln!(out, "    \"{}\"", e.quote)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{FindingClass, Verification};
    use polcon_extract::EvidenceSpan;
    use polcon_graph::{ConstraintValidator, Normalizer};
    use polcon_ontology::{Ontology, TermUri};
    use std::collections::BTreeMap;

    fn cited(op: &str, policy: &str, quote: &str) -> CitedEvidence {
        CitedEvidence::new(
            op,
            policy,
            "Data Sharing > Partners",
            &EvidenceSpan {
                quote: quote.into(),
                char_start: 10,
                char_end: 10 + quote.len(),
            },
        )
    }

    fn finding() -> ComplianceFinding {
        ComplianceFinding {
            finding_id: "F0001".into(),
            mismatch_type: MismatchType::PurposeMismatch,
            finding_class: FindingClass::InconsistentRequirement,
            scope: Scope::CrossPolicy,
            first_party_evidence: vec![cited("fp#op0", "fp", "We share your email to provide our services.")],
            third_party_evidence: vec![cited("tp#op0", "tp", "We use email addresses for advertising.")],
            first_party_op_ids: vec!["fp#op0".into()],
            third_party_op_ids: vec!["tp#op0".into()],
            aligned_subject: Some(TermUri::new("subject:email")),
            aligned_action: Some(TermUri::new("action:share")),
            aligned_context: BTreeMap::new(),
            extra_or_missing: vec![TermUri::new("purpose:advertising")],
            confidence: 0.8,
            rationale: "extra purpose".into(),
            notes: vec![],
            verification: Verification::NotRun,
        }
    }

    fn meta() -> ReportMeta {
        ReportMeta {
            report_id: "r-1".into(),
            first_party_policy_id: "fp".into(),
            third_party_policy_id: "tp".into(),
            ..Default::default()
        }
    }

    #[test]
    fn human_report_quotes_verbatim() {
        let report = MachineReport::build(meta(), &[finding()], &[], &[], &ValidationReport::default());
        let text = render_human(&report);
        assert!(text.contains("== PurposeMismatch (1) =="));
        assert!(text.contains("\"We share your email to provide our services.\""));
        assert!(text.contains("\"We use email addresses for advertising.\""));
        assert!(text.contains("Data Sharing > Partners"));
        assert!(text.contains("Not covered: purpose:advertising"));
        assert!(text.contains("Status: complete"));
        assert!(!text.contains("ContextMismatch"));
    }

    #[test]
    fn unvalidated_operations_are_listed() {
        let ontology = Ontology::builtin().unwrap();
        let candidate = polcon_extract::OperationCandidate {
            op_id: "tp#op0".into(),
            policy_id: "tp".into(),
            party_type: PartyType::ThirdParty,
            chunk_id: "tp:root:0".into(),
            section_path: "Root".into(),
            action: Some(polcon_extract::LabeledSpan::new("share")),
            subject: None,
            view: Some(polcon_extract::LabeledSpan::new("do")),
            purposes: vec![],
            context: Default::default(),
            evidence: vec![EvidenceSpan {
                quote: "We share it.".into(),
                char_start: 0,
                char_end: 12,
            }],
        };
        let (ops, _) = Normalizer::new(&ontology.vocabulary).normalize_all(&[candidate]);
        let validation = ConstraintValidator::new(&ontology).validate(&ops);

        let mut meta = meta();
        meta.partial = true;
        let report = MachineReport::build(meta, &[], &[], &ops, &validation);
        assert_eq!(report.unvalidated_operations.len(), 1);
        assert_eq!(report.unvalidated_operations[0].quotes, vec!["We share it.".to_string()]);

        let text = render_human(&report);
        assert!(text.contains("Status: PARTIAL"));
        assert!(text.contains("error MISSING_SUBJECT"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["unvalidated_operations"][0]["issues"][0]["code"], "MISSING_SUBJECT");
        assert_eq!(json["partial"], true);
    }
}
