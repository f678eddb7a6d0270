//! Verifier gate over comparator findings.
//!
//! A verifier answers with one of three bounded decisions. The gate can only
//! remove or downgrade findings; it never adds one or changes its evidence.
//!
//! | decision          | effect                          |
//! |-------------------|---------------------------------|
//! | `CONFIRMED`       | kept                            |
//! | `NOT_CONFIRMED`   | dropped                         |
//! | `UNDER_SPECIFIED` | kept, confidence halved         |
//! | verifier error    | kept, note added                |
//!
//! Afterwards every finding below `min_confidence` is dropped.

use crate::finding::{ComplianceFinding, Verification};
use async_trait::async_trait;
use polcon_extract::{ChatClient, LlmError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifierDecision {
    Confirmed,
    NotConfirmed,
    UnderSpecified,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("verifier backend failed: {0}")]
    Backend(String),

    #[error("verifier answered outside the allowed decisions: {0}")]
    InvalidDecision(String),
}

impl From<LlmError> for VerifierError {
    fn from(e: LlmError) -> Self {
        VerifierError::Backend(e.to_string())
    }
}

#[async_trait]
pub trait FindingVerifier: Send + Sync {
    fn name(&self) -> &str;

    async fn verify(&self, finding: &ComplianceFinding) -> Result<VerifierDecision, VerifierError>;
}

/// Why a finding left the set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedFinding {
    pub finding_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateOutcome {
    pub kept: Vec<ComplianceFinding>,
    pub dropped: Vec<DroppedFinding>,
    pub verifier_errors: usize,
}

#[derive(Clone, Default)]
pub struct VerifierGate {
    verifier: Option<Arc<dyn FindingVerifier>>,
    min_confidence: f64,
}

impl VerifierGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn FindingVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    pub fn is_noop(&self) -> bool {
        self.verifier.is_none() && self.min_confidence <= 0.0
    }

    /// Filter findings in order; ids are left as assigned.
    pub async fn apply(&self, findings: Vec<ComplianceFinding>) -> GateOutcome {
        let mut outcome = GateOutcome::default();

        for mut finding in findings {
            if let Some(verifier) = &self.verifier {
                match verifier.verify(&finding).await {
                    Ok(VerifierDecision::Confirmed) => finding.verification = Verification::Confirmed,
                    Ok(VerifierDecision::NotConfirmed) => {
                        tracing::debug!(finding_id = %finding.finding_id, "verifier did not confirm finding");
                        outcome.dropped.push(DroppedFinding {
                            finding_id: finding.finding_id,
                            reason: format!("not confirmed by {}", verifier.name()),
                        });
                        continue;
                    }
                    Ok(VerifierDecision::UnderSpecified) => {
                        finding.verification = Verification::UnderSpecified;
                        finding.confidence /= 2.0;
                    }
                    Err(e) => {
                        tracing::warn!(finding_id = %finding.finding_id, error = %e, "verifier failed, keeping finding");
                        outcome.verifier_errors += 1;
                        finding.verification = Verification::VerifierError;
                        finding.notes.push(format!("verifier {} failed: {e}", verifier.name()));
                    }
                }
            }

            if finding.confidence < self.min_confidence {
                outcome.dropped.push(DroppedFinding {
                    reason: format!("confidence {:.2} below {:.2}", finding.confidence, self.min_confidence),
                    finding_id: finding.finding_id,
                });
                continue;
            }
            outcome.kept.push(finding);
        }

        tracing::info!(
            kept = outcome.kept.len(),
            dropped = outcome.dropped.len(),
            verifier_errors = outcome.verifier_errors,
            "applied verifier gate"
        );
        outcome
    }
}

// ============================================================================
// LLM-backed verifier
// ============================================================================

const VERIFIER_PROMPT: &str = r#"You check a claimed inconsistency between two privacy policies.
You are given the mismatch type, a rationale and the literal quotes from each policy.
Decide only from the quotes.

Answer with a single JSON object: {"decision": "CONFIRMED" | "NOT_CONFIRMED" | "UNDER_SPECIFIED"}
- CONFIRMED: the quotes support the claim.
- NOT_CONFIRMED: the quotes do not support the claim.
- UNDER_SPECIFIED: the quotes are too vague to decide."#;

#[derive(Deserialize)]
struct DecisionEnvelope {
    decision: String,
}

pub struct LlmFindingVerifier {
    client: ChatClient,
}

impl LlmFindingVerifier {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    fn prompt(finding: &ComplianceFinding) -> String {
        let mut prompt = format!(
            "Mismatch type: {}\nScope: {:?}\nRationale: {}\n",
            finding.mismatch_type, finding.scope, finding.rationale
        );
        for (label, evidence) in [
            ("First-party", &finding.first_party_evidence),
            ("Third-party", &finding.third_party_evidence),
        ] {
            if evidence.is_empty() {
                prompt.push_str(&format!("{label} quotes: none\n"));
                continue;
            }
            prompt.push_str(&format!("{label} quotes:\n"));
            for e in evidence {
                prompt.push_str(&format!("- [{}] \"{}\"\n", e.section_path, e.quote));
            }
        }
        for note in &finding.notes {
            prompt.push_str(&format!("Note: {note}\n"));
        }
        prompt
    }
}

/// Parse a bounded decision; anything else is an error, never a guess.
pub fn parse_decision(value: serde_json::Value) -> Result<VerifierDecision, VerifierError> {
    let envelope: DecisionEnvelope =
        serde_json::from_value(value).map_err(|e| VerifierError::InvalidDecision(e.to_string()))?;
    match envelope.decision.trim() {
        "CONFIRMED" => Ok(VerifierDecision::Confirmed),
        "NOT_CONFIRMED" => Ok(VerifierDecision::NotConfirmed),
        "UNDER_SPECIFIED" => Ok(VerifierDecision::UnderSpecified),
        other => Err(VerifierError::InvalidDecision(other.to_string())),
    }
}

#[async_trait]
impl FindingVerifier for LlmFindingVerifier {
    fn name(&self) -> &str {
        "llm"
    }

    async fn verify(&self, finding: &ComplianceFinding) -> Result<VerifierDecision, VerifierError> {
        let value = self.client.complete_json(VERIFIER_PROMPT, &Self::prompt(finding)).await?;
        parse_decision(value)
    }
}
