//! End-to-end run over one policy pair.
//!
//! ```text
//! first ─┐                                    ┌─ graph.triples.jsonl
//!        ├─ ingest ─ chunk ─ extract ─ normalize ─ validate ─ compare ─ gate ─┼─ report.machine.json
//! third ─┘             (async, bounded)                                       ├─ report.human.txt
//!                                                                             └─ summary.json
//! ```
//!
//! Only ingestion and configuration can fail. Once extraction starts every
//! problem becomes a note, an issue or a partial flag, and the run always
//! reaches the report.

use crate::config::{ExtractorKind, PipelineConfig};
use crate::error::PipelineError;
use crate::summary::{RunSummary, SummaryInput};
use chrono::Utc;
use polcon_extract::{
    CancelToken, ChatClient, ChunkJob, ExtractionGateway, ExtractionRun, ExtractorBackend, LlmBackend, RuleBackend,
};
use polcon_graph::{
    ConstraintValidator, NormalizeChooser, NormalizeNote, NormalizedOperation, Normalizer, StatementGraph,
    ValidationReport,
};
use polcon_ingest::{chunk_document, ingest, Chunk, ChunkerConfig, PartyType, PolicyDocument, PolicyInput};
use polcon_ontology::Ontology;
use polcon_reason::{
    render_human, Comparator, Comparison, FindingVerifier, GateOutcome, LlmFindingVerifier, MachineReport,
    ReportMeta, VerifierGate,
};
use std::sync::Arc;
use uuid::Uuid;

/// Everything a run produced, frozen.
#[derive(Debug)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub documents: Vec<PolicyDocument>,
    pub chunks: Vec<Chunk>,
    pub extraction: ExtractionRun,
    pub normalize_notes: Vec<NormalizeNote>,
    pub operations: Vec<NormalizedOperation>,
    pub validation: ValidationReport,
    pub graph: StatementGraph,
    pub comparison: Comparison,
    pub gate: GateOutcome,
    pub report: MachineReport,
    pub human_report: String,
    pub summary: RunSummary,
}

impl PipelineOutput {
    pub fn partial(&self) -> bool {
        self.report.partial
    }
}

/// Ingest and chunk one policy.
pub fn segment_policy(input: &PolicyInput, config: &ChunkerConfig) -> Result<(PolicyDocument, Vec<Chunk>), PipelineError> {
    let doc = ingest(input)?;
    let chunks = chunk_document(&doc, config);
    let stats = doc.stats();
    tracing::info!(
        policy_id = %doc.policy_id,
        party = %doc.party_type,
        sections = stats.sections,
        clauses = stats.clauses,
        definitions = stats.definitions,
        chunks = chunks.len(),
        "segmented policy"
    );
    Ok((doc, chunks))
}

pub struct Pipeline {
    config: PipelineConfig,
    ontology: Arc<Ontology>,
    backend: Option<Arc<dyn ExtractorBackend>>,
    chooser: Option<Arc<dyn NormalizeChooser>>,
    verifier: Option<Arc<dyn FindingVerifier>>,
}

impl Pipeline {
    /// Validate the configuration and load the vocabulary it names.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let ontology = config.load_ontology()?;
        Ok(Self::with_ontology(config, Arc::new(ontology)))
    }

    pub fn with_ontology(config: PipelineConfig, ontology: Arc<Ontology>) -> Self {
        Self {
            config,
            ontology,
            backend: None,
            chooser: None,
            verifier: None,
        }
    }

    /// Use this backend instead of the configured one.
    pub fn with_backend(mut self, backend: Arc<dyn ExtractorBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_chooser(mut self, chooser: Arc<dyn NormalizeChooser>) -> Self {
        self.chooser = Some(chooser);
        self
    }

    /// Use this verifier; it runs even if the config leaves the verifier disabled.
    pub fn with_verifier(mut self, verifier: Arc<dyn FindingVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }

    fn build_backend(&self) -> Result<Arc<dyn ExtractorBackend>, PipelineError> {
        if let Some(backend) = &self.backend {
            return Ok(Arc::clone(backend));
        }
        match self.config.extractor_backend {
            ExtractorKind::Deterministic => {
                let backend = RuleBackend::from_vocabulary(&self.ontology.vocabulary)
                    .map_err(|e| PipelineError::Backend(e.to_string()))?;
                Ok(Arc::new(backend))
            }
            ExtractorKind::Llm => {
                let client = self.chat_client()?;
                Ok(Arc::new(LlmBackend::new(client).with_vocabulary_hint(&self.ontology.vocabulary)))
            }
        }
    }

    fn build_gate(&self) -> Result<VerifierGate, PipelineError> {
        let settings = &self.config.verifier;
        let mut gate = VerifierGate::new().with_min_confidence(settings.min_confidence);
        if let Some(verifier) = &self.verifier {
            gate = gate.with_verifier(Arc::clone(verifier));
        } else if settings.enabled && settings.use_llm {
            gate = gate.with_verifier(Arc::new(LlmFindingVerifier::new(self.chat_client()?)));
        }
        Ok(gate)
    }

    fn chat_client(&self) -> Result<ChatClient, PipelineError> {
        let config = self.config.llm.to_llm_config()?;
        ChatClient::new(config).map_err(|e| PipelineError::Backend(e.to_string()))
    }

    fn check_inputs(first: &PolicyInput, third: &PolicyInput) -> Result<(), PipelineError> {
        for (input, expected) in [(first, PartyType::FirstParty), (third, PartyType::ThirdParty)] {
            if input.party_type != expected {
                return Err(PipelineError::PartyMismatch {
                    policy_id: input.policy_id.clone(),
                    given: input.party_type,
                    expected,
                });
            }
        }
        if first.policy_id == third.policy_id {
            return Err(PipelineError::DuplicatePolicyId(first.policy_id.clone()));
        }
        Ok(())
    }

    /// Run every stage over a first-party and a third-party policy.
    ///
    /// Cancelling `cancel` stops new extraction calls; the run then finishes
    /// over what was collected and is marked partial.
    pub async fn run(
        &self,
        first: &PolicyInput,
        third: &PolicyInput,
        cancel: &CancelToken,
    ) -> Result<PipelineOutput, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        Self::check_inputs(first, third)?;
        let backend = self.build_backend()?;
        let gate = self.build_gate()?;
        tracing::info!(%run_id, backend = backend.name(), "starting run");

        // Stages 1-2: segment and chunk
        let chunker = self.config.chunker_config();
        let mut documents = Vec::with_capacity(2);
        let mut chunks = Vec::new();
        let mut chunk_counts = Vec::with_capacity(2);
        for input in [first, third] {
            let (doc, doc_chunks) = segment_policy(input, &chunker)?;
            chunk_counts.push(doc_chunks.len());
            chunks.extend(doc_chunks);
            documents.push(doc);
        }

        // Stage 3: bounded extraction
        let definitions: Vec<_> = documents.iter().map(|d| Arc::new(d.definitions.clone())).collect();
        let jobs: Vec<ChunkJob> = chunks
            .iter()
            .map(|chunk| {
                let idx = usize::from(chunk.party_type == PartyType::ThirdParty);
                ChunkJob::new(chunk.clone(), Arc::clone(&definitions[idx]))
            })
            .collect();
        let gateway = ExtractionGateway::new(backend, self.config.gateway_config());
        let extraction = gateway.extract_all(jobs, cancel).await;
        if let Some(error) = &extraction.fatal_error {
            tracing::warn!(%error, "extraction stopped after a fatal backend error");
        }

        // Stages 4-6: normalize, validate, graph
        let mut normalizer = Normalizer::new(&self.ontology.vocabulary);
        if let Some(chooser) = &self.chooser {
            normalizer = normalizer.with_chooser(Arc::clone(chooser));
        }
        let (operations, normalize_notes) = normalizer.normalize_all(&extraction.candidates);
        let unmapped_fields = operations
            .iter()
            .flat_map(|op| op.fields())
            .filter(|(_, f)| f.normalized_uri.is_none())
            .count();

        let mut validator = ConstraintValidator::new(&self.ontology);
        for doc in &documents {
            validator = validator.with_source(&doc.policy_id, &doc.text);
        }
        let validation = validator.validate(&operations);

        let mut graph = StatementGraph::from_operations(&operations);
        graph.annotate_issues(&validation);

        // Stages 7-8: compare and gate
        let comparison = Comparator::new(&self.ontology, self.config.comparator_config()).compare(&operations, &validation);
        let gate_outcome = gate.apply(comparison.findings.clone()).await;

        // Stage 9: reports
        let notes = run_notes(&extraction, &normalize_notes, &gate_outcome, cancel);
        let meta = ReportMeta {
            report_id: run_id.to_string(),
            first_party_policy_id: first.policy_id.clone(),
            third_party_policy_id: third.policy_id.clone(),
            partial: extraction.partial,
            strict_mode: self.config.strict_mode,
            notes: notes.clone(),
        };
        let report = MachineReport::build(meta, &gate_outcome.kept, &gate_outcome.dropped, &operations, &validation);
        let human_report = render_human(&report);

        let summary = RunSummary::build(SummaryInput {
            run_id,
            started_at,
            documents: &documents,
            chunk_counts: &chunk_counts,
            extraction: &extraction,
            operations: operations.len(),
            unmapped_fields,
            validation: &validation,
            graph: &graph,
            comparison: &comparison,
            gate: &gate_outcome,
            notes,
        });
        tracing::info!(
            %run_id,
            operations = summary.operations,
            valid = summary.valid_operations,
            findings = summary.findings,
            partial = summary.partial,
            "run finished"
        );

        Ok(PipelineOutput {
            run_id,
            documents,
            chunks,
            extraction,
            normalize_notes,
            operations,
            validation,
            graph,
            comparison,
            gate: gate_outcome,
            report,
            human_report,
            summary,
        })
    }
}

/// Run-level notes shared by the report and the summary.
fn run_notes(
    extraction: &ExtractionRun,
    normalize_notes: &[NormalizeNote],
    gate: &GateOutcome,
    cancel: &CancelToken,
) -> Vec<String> {
    let mut notes = Vec::new();
    // a cancel that lands after the last chunk changes nothing
    if cancel.is_cancelled() && extraction.chunks_skipped > 0 {
        notes.push("run was cancelled; results cover only the chunks extracted before cancellation".to_string());
    }
    if let Some(error) = &extraction.fatal_error {
        notes.push(format!("extraction stopped after a fatal backend error: {error}"));
    }
    if extraction.chunks_degraded > 0 {
        notes.push(format!(
            "{} chunk(s) yielded no operations after backend failures",
            extraction.chunks_degraded
        ));
    }
    for note in &extraction.notes {
        notes.push(format!("[{}] {:?}: {}", note.chunk_id, note.kind, note.message));
    }
    for note in normalize_notes {
        notes.push(format!("[{}] {} `{}`: {}", note.op_id, note.field, note.raw_label, note.message));
    }
    if gate.verifier_errors > 0 {
        notes.push(format!("verifier failed on {} finding(s); they were kept", gate.verifier_errors));
    }
    notes
}
