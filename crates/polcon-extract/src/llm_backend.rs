//! LLM extraction backend.
//!
//! Sends one chunk per request and returns the model's JSON untouched; the
//! gateway decides what survives.

use crate::backend::{BackendError, ExtractorBackend};
use crate::llm::ChatClient;
use crate::wire::ExtractionRequest;
use async_trait::async_trait;
use polcon_ontology::{FieldKind, Vocabulary};

const SYSTEM_PROMPT: &str = r#"You extract data-processing statements from privacy policy text.

Rules:
- Only report what the text states explicitly. Never infer.
- Use null for any slot the text does not state.
- Each operation needs at least one evidence span: an exact quote from the text with
  char_start/char_end as character offsets into the text you were given.
- Label evidence strings must be copied verbatim from the text.
- If a sentence talks about data handling but cannot be expressed in the schema,
  add a short explanation to nonextractable_notes instead of guessing.
- Answer with a single JSON object and nothing else.

Schema:
{"operations": [{"op_id": string|null,
  "action": {"label": string, "evidence": string}|null,
  "subject": {"label": string, "evidence": string}|null,
  "purposes": [{"label": string, "evidence": string}],
  "context": {"temporal": L|null, "localisation": L|null, "manner": L|null,
              "recipient": L|null, "legal_basis": L|null, "source": L|null},
  "view": {"label": "do"|"do not"|"may", "evidence": string}|null,
  "evidence_spans": [{"quote": string, "char_start": int, "char_end": int}]}],
 "nonextractable_notes": [string]}
where L = {"label": string, "evidence": string}. No other keys are allowed."#;

pub struct LlmBackend {
    client: ChatClient,
    vocabulary_hint: Option<String>,
}

impl LlmBackend {
    pub fn new(client: ChatClient) -> Self {
        Self {
            client,
            vocabulary_hint: None,
        }
    }

    /// Show the model the preferred labels per field. Labels outside the
    /// list are still accepted and left to the normalizer.
    pub fn with_vocabulary_hint(mut self, vocab: &Vocabulary) -> Self {
        let mut hint = String::from("Preferred labels:\n");
        for field in FieldKind::ALL {
            let labels: Vec<&str> = vocab.terms(field).iter().map(|t| t.label.as_str()).collect();
            if !labels.is_empty() {
                hint.push_str(&format!("- {}: {}\n", field.as_str(), labels.join(", ")));
            }
        }
        self.vocabulary_hint = Some(hint);
        self
    }

    fn user_prompt(&self, request: &ExtractionRequest) -> String {
        let mut prompt = format!(
            "Policy: {} ({})\nSection: {}\n",
            request.policy_id, request.party_type, request.section_path
        );
        if !request.definitions.is_empty() {
            prompt.push_str("Definitions from this policy:\n");
            for (term, meaning) in &request.definitions {
                prompt.push_str(&format!("- {term}: {meaning}\n"));
            }
        }
        if let Some(hint) = &self.vocabulary_hint {
            prompt.push_str(hint);
        }
        prompt.push_str("\nText:\n");
        prompt.push_str(&request.text);
        prompt
    }
}

#[async_trait]
impl ExtractorBackend for LlmBackend {
    fn name(&self) -> &str {
        "llm"
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<serde_json::Value, BackendError> {
        tracing::debug!(
            chunk_id = %request.chunk_id,
            model = %self.client.config().model,
            "sending chunk to LLM"
        );
        let value = self
            .client
            .complete_json(SYSTEM_PROMPT, &self.user_prompt(request))
            .await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmConfig;
    use polcon_ingest::PartyType;
    use std::collections::BTreeMap;

    #[test]
    fn prompt_carries_section_definitions_and_text() {
        let client = ChatClient::new(LlmConfig::local("http://localhost:1/v1", "m")).unwrap();
        let backend = LlmBackend::new(client).with_vocabulary_hint(&Vocabulary::builtin().unwrap());
        let mut definitions = BTreeMap::new();
        definitions.insert("Partners".to_string(), "companies we work with".to_string());
        let request = ExtractionRequest {
            chunk_id: "tp:sharing:0".into(),
            policy_id: "tp".into(),
            party_type: PartyType::ThirdParty,
            section_path: "Sharing".into(),
            text: "We share your email address with partners.".into(),
            definitions,
        };
        let prompt = backend.user_prompt(&request);
        assert!(prompt.contains("Section: Sharing"));
        assert!(prompt.contains("- Partners: companies we work with"));
        assert!(prompt.contains("- action: collect"));
        assert!(prompt.ends_with("We share your email address with partners."));
    }
}
