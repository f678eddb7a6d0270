//! Constraint validation of normalized operations.
//!
//! Deterministic per-operation checks. Issues are attached, never used to
//! delete anything; an operation with at least one `error` is excluded from
//! reasoning but stays visible in the report.

use crate::normalize::{NormalizedField, NormalizedOperation};
use polcon_ontology::{FieldKind, Modality, Ontology};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    MissingAction,
    MissingSubject,
    MissingView,
    PurposeUnspecified,
    UnknownUri,
    WrongNamespace,
    DuplicatePurpose,
    NoEvidence,
    EvidenceOffset,
    RecipientUnspecified,
}

impl IssueCode {
    pub fn severity(self) -> Severity {
        match self {
            IssueCode::MissingView
            | IssueCode::PurposeUnspecified
            | IssueCode::DuplicatePurpose
            | IssueCode::RecipientUnspecified => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IssueCode::MissingAction => "MISSING_ACTION",
            IssueCode::MissingSubject => "MISSING_SUBJECT",
            IssueCode::MissingView => "MISSING_VIEW",
            IssueCode::PurposeUnspecified => "PURPOSE_UNSPECIFIED",
            IssueCode::UnknownUri => "UNKNOWN_URI",
            IssueCode::WrongNamespace => "WRONG_NAMESPACE",
            IssueCode::DuplicatePurpose => "DUPLICATE_PURPOSE",
            IssueCode::NoEvidence => "NO_EVIDENCE",
            IssueCode::EvidenceOffset => "EVIDENCE_OFFSET",
            IssueCode::RecipientUnspecified => "RECIPIENT_UNSPECIFIED",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub issue_id: String,
    pub severity: Severity,
    pub code: IssueCode,
    pub op_id: String,
    pub policy_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<FieldKind>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    /// Operations with no error-severity issue
    pub valid_op_ids: BTreeSet<String>,
    pub checked: usize,
}

impl ValidationReport {
    pub fn is_valid(&self, op_id: &str) -> bool {
        self.valid_op_ids.contains(op_id)
    }

    pub fn issues_for<'a>(&'a self, op_id: &'a str) -> impl Iterator<Item = &'a ValidationIssue> + 'a {
        self.issues.iter().filter(move |i| i.op_id == op_id)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn count_by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for issue in &self.issues {
            *counts.entry(issue.severity).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_by_code(&self) -> BTreeMap<IssueCode, usize> {
        let mut counts = BTreeMap::new();
        for issue in &self.issues {
            *counts.entry(issue.code).or_insert(0) += 1;
        }
        counts
    }

    /// Keep only operations that passed.
    pub fn valid<'a>(&self, ops: &'a [NormalizedOperation]) -> Vec<&'a NormalizedOperation> {
        ops.iter().filter(|op| self.is_valid(&op.op_id)).collect()
    }
}

// ============================================================================
// Validator
// ============================================================================

pub struct ConstraintValidator<'a> {
    ontology: &'a Ontology,
    /// policy_id -> cleaned text, for evidence offset checks
    sources: BTreeMap<String, &'a str>,
}

impl<'a> ConstraintValidator<'a> {
    pub fn new(ontology: &'a Ontology) -> Self {
        Self {
            ontology,
            sources: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, policy_id: &str, text: &'a str) -> Self {
        self.sources.insert(policy_id.to_string(), text);
        self
    }

    pub fn validate(&self, ops: &[NormalizedOperation]) -> ValidationReport {
        let mut report = ValidationReport {
            checked: ops.len(),
            ..Default::default()
        };

        for op in ops {
            let found = self.check(op);
            if !found.iter().any(|(code, _, _)| code.severity() == Severity::Error) {
                report.valid_op_ids.insert(op.op_id.clone());
            }
            for (code, field, message) in found {
                report.issues.push(ValidationIssue {
                    issue_id: format!("V{:04}", report.issues.len() + 1),
                    severity: code.severity(),
                    code,
                    op_id: op.op_id.clone(),
                    policy_id: op.policy_id.clone(),
                    field,
                    message,
                });
            }
        }

        let counts = report.count_by_severity();
        tracing::info!(
            checked = report.checked,
            valid = report.valid_op_ids.len(),
            errors = counts.get(&Severity::Error).copied().unwrap_or(0),
            warnings = counts.get(&Severity::Warning).copied().unwrap_or(0),
            "validated operations"
        );
        report
    }

    fn check(&self, op: &NormalizedOperation) -> Vec<(IssueCode, Option<FieldKind>, String)> {
        let mut out = Vec::new();

        self.required(&mut out, FieldKind::Action, op.action.as_ref(), IssueCode::MissingAction);
        self.required(&mut out, FieldKind::Subject, op.subject.as_ref(), IssueCode::MissingSubject);
        self.required(&mut out, FieldKind::View, op.view.as_ref(), IssueCode::MissingView);

        let mut seen = HashSet::new();
        for purpose in &op.purposes {
            self.membership(&mut out, FieldKind::Purpose, purpose);
            if let Some(uri) = purpose.uri() {
                if !seen.insert(uri.as_str()) {
                    out.push((
                        IssueCode::DuplicatePurpose,
                        Some(FieldKind::Purpose),
                        format!("purpose `{uri}` is stated more than once"),
                    ));
                }
            }
        }
        if seen.is_empty() && op.modality != Some(Modality::DoNot) {
            let message = if op.purposes.is_empty() {
                "no purpose stated".to_string()
            } else {
                "no stated purpose maps to the vocabulary".to_string()
            };
            out.push((IssueCode::PurposeUnspecified, Some(FieldKind::Purpose), message));
        }

        for (field, value) in op.context.slots() {
            self.membership(&mut out, field, value);
        }

        if let Some(action) = op.action_uri() {
            let shares = self.ontology.hierarchy.is_subsumed("action:share", action.as_str());
            if shares && op.context_uri(FieldKind::Recipient).is_none() {
                out.push((
                    IssueCode::RecipientUnspecified,
                    Some(FieldKind::Recipient),
                    format!("`{action}` without a recipient"),
                ));
            }
        }

        if op.evidence.is_empty() {
            out.push((IssueCode::NoEvidence, None, "operation carries no evidence".to_string()));
        }
        if let Some(text) = self.sources.get(&op.policy_id) {
            for span in &op.evidence {
                if text.get(span.char_start..span.char_end) != Some(span.quote.as_str()) {
                    out.push((
                        IssueCode::EvidenceOffset,
                        None,
                        format!("quote no longer matches source at {}..{}", span.char_start, span.char_end),
                    ));
                }
            }
        }

        out
    }

    fn required(
        &self,
        out: &mut Vec<(IssueCode, Option<FieldKind>, String)>,
        field: FieldKind,
        value: Option<&NormalizedField>,
        missing: IssueCode,
    ) {
        match value {
            None => out.push((missing, Some(field), format!("no {field} stated"))),
            Some(v) if v.normalized_uri.is_none() => out.push((
                missing,
                Some(field),
                format!("{field} `{}` does not map to the vocabulary", v.raw_label),
            )),
            Some(v) => self.membership(out, field, v),
        }
    }

    fn membership(&self, out: &mut Vec<(IssueCode, Option<FieldKind>, String)>, field: FieldKind, value: &NormalizedField) {
        let Some(uri) = value.uri() else {
            return;
        };
        if !uri.as_str().starts_with(field.uri_prefix()) {
            out.push((
                IssueCode::WrongNamespace,
                Some(field),
                format!("`{uri}` is not in the `{}` namespace", field.uri_prefix()),
            ));
        } else if !self.ontology.vocabulary.contains(field, uri.as_str()) {
            out.push((IssueCode::UnknownUri, Some(field), format!("`{uri}` is not a known {field} term")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::MatchReason;
    use polcon_extract::EvidenceSpan;
    use polcon_ingest::PartyType;
    use polcon_ontology::TermUri;

    const TEXT: &str = "We share your email address with partners.";

    fn field(uri: &str) -> Option<NormalizedField> {
        Some(NormalizedField {
            raw_label: uri.to_string(),
            normalized_uri: Some(TermUri::new(uri)),
            confidence: 1.0,
            reason: MatchReason::UriPassthrough,
            evidence: None,
        })
    }

    fn op() -> NormalizedOperation {
        let mut op = NormalizedOperation {
            op_id: "tp#op0".into(),
            policy_id: "tp".into(),
            party_type: PartyType::ThirdParty,
            chunk_id: "tp:c:0".into(),
            section_path: "Sharing".into(),
            action: field("action:share"),
            subject: field("subject:email"),
            view: field("view:do"),
            modality: Some(Modality::Do),
            purposes: vec![field("purpose:advertising").unwrap()],
            context: Default::default(),
            evidence: vec![EvidenceSpan {
                quote: TEXT.into(),
                char_start: 0,
                char_end: TEXT.len(),
            }],
        };
        op.context.recipient = field("recipient:partner");
        op
    }

    fn codes(report: &ValidationReport) -> Vec<IssueCode> {
        report.issues.iter().map(|i| i.code).collect()
    }

    #[test]
    fn clean_operation_passes() {
        let ontology = Ontology::builtin().unwrap();
        let report = ConstraintValidator::new(&ontology).with_source("tp", TEXT).validate(&[op()]);
        assert!(report.issues.is_empty());
        assert!(report.is_valid("tp#op0"));
    }

    #[test]
    fn missing_subject_is_an_error() {
        let ontology = Ontology::builtin().unwrap();
        let mut o = op();
        o.subject = None;
        let report = ConstraintValidator::new(&ontology).validate(&[o]);
        assert_eq!(codes(&report), vec![IssueCode::MissingSubject]);
        assert_eq!(report.issues[0].severity, Severity::Error);
        assert!(!report.is_valid("tp#op0"));
    }

    #[test]
    fn warnings_keep_the_operation_valid() {
        let ontology = Ontology::builtin().unwrap();
        let mut o = op();
        o.view = None;
        o.modality = None;
        o.context.recipient = None;
        o.purposes = vec![field("purpose:analytics").unwrap(), field("purpose:analytics").unwrap()];
        let report = ConstraintValidator::new(&ontology).validate(&[o]);
        assert_eq!(
            codes(&report),
            vec![IssueCode::MissingView, IssueCode::DuplicatePurpose, IssueCode::RecipientUnspecified]
        );
        assert!(report.is_valid("tp#op0"));
    }

    #[test]
    fn purpose_unspecified_skips_negative_statements() {
        let ontology = Ontology::builtin().unwrap();
        let mut o = op();
        o.purposes.clear();
        let report = ConstraintValidator::new(&ontology).validate(&[o.clone()]);
        assert_eq!(codes(&report), vec![IssueCode::PurposeUnspecified]);

        o.view = field("view:do_not");
        o.modality = Some(Modality::DoNot);
        let report = ConstraintValidator::new(&ontology).validate(&[o]);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn namespace_and_membership_errors() {
        let ontology = Ontology::builtin().unwrap();
        let mut o = op();
        o.action = field("subject:email");
        o.context.manner = field("context:eu_only");
        let report = ConstraintValidator::new(&ontology).validate(&[o]);
        assert_eq!(codes(&report), vec![IssueCode::WrongNamespace, IssueCode::UnknownUri]);
        assert_eq!(report.issues[1].field, Some(FieldKind::Manner));
    }

    #[test]
    fn evidence_checks() {
        let ontology = Ontology::builtin().unwrap();
        let mut shifted = op();
        shifted.evidence[0].char_start += 1;
        let mut bare = op();
        bare.op_id = "tp#op1".into();
        bare.evidence.clear();
        let report = ConstraintValidator::new(&ontology)
            .with_source("tp", TEXT)
            .validate(&[shifted, bare]);
        assert_eq!(codes(&report), vec![IssueCode::EvidenceOffset, IssueCode::NoEvidence]);
        assert!(report.valid_op_ids.is_empty());
        assert_eq!(report.issues[1].issue_id, "V0002");
    }
}
