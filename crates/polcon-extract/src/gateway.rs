//! Extraction gateway: the single async boundary of the pipeline.
//!
//! ```text
//!   chunks ──► [semaphore: concurrency_limit] ──► backend.extract()
//!                                                   │ timeout, retry, backoff
//!                                                   ▼
//!                                      envelope ─► evidence gate ─► candidates
//!                                                   │
//!                                          notes (never errors)
//! ```
//!
//! Every chunk ends in a [`ChunkOutcome`]. Degraded chunks contribute zero
//! operations; a fatal backend error stops new calls and marks the run
//! partial. Cancellation behaves the same way, and also cuts short a chunk
//! waiting out its retry backoff. Backoff, a server's `Retry-After`
//! included, never exceeds `max_backoff_ms`.

use crate::backend::{BackendError, ExtractorBackend};
use crate::cancel::CancelToken;
use crate::candidate::OperationCandidate;
use crate::evidence::accept_operation;
use crate::notes::{ExtractionNote, NoteKind};
use crate::wire::{Envelope, ExtractionRequest};
use parking_lot::Mutex;
use polcon_ingest::Chunk;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

// ============================================================================
// Configuration
// ============================================================================

/// How statements listing several purposes become operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConjunctionPolicy {
    /// One operation carrying every purpose
    #[default]
    Merge,
    /// One operation per purpose
    Split,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,
    pub concurrency_limit: usize,
    pub conjunction: ConjunctionPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            timeout_ms: 30_000,
            backoff_base_ms: 250,
            max_backoff_ms: 8_000,
            concurrency_limit: 4,
            conjunction: ConjunctionPolicy::Merge,
        }
    }
}

impl GatewayConfig {
    /// Exponential backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor).min(self.max_backoff_ms))
    }
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStats {
    /// Backend invocations, retries included
    pub calls: usize,
    pub retries: usize,
    pub timeouts: usize,
    /// Chunks that ended degraded or fatal
    pub failures: usize,
}

#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    Extracted {
        candidates: Vec<OperationCandidate>,
        notes: Vec<ExtractionNote>,
    },
    /// Retries exhausted; the chunk contributes nothing
    Degraded { notes: Vec<ExtractionNote> },
    /// Non-retryable backend failure; the run must stop issuing calls
    Fatal {
        error: BackendError,
        notes: Vec<ExtractionNote>,
    },
    /// Stopped while waiting to retry; counted as skipped
    Cancelled,
}

impl ChunkOutcome {
    pub fn notes(&self) -> &[ExtractionNote] {
        match self {
            ChunkOutcome::Extracted { notes, .. } | ChunkOutcome::Degraded { notes } | ChunkOutcome::Fatal { notes, .. } => {
                notes
            }
            ChunkOutcome::Cancelled => &[],
        }
    }
}

/// A chunk plus the policy-level context sent with it.
#[derive(Debug, Clone)]
pub struct ChunkJob {
    pub chunk: Chunk,
    pub definitions: Arc<BTreeMap<String, String>>,
}

impl ChunkJob {
    pub fn new(chunk: Chunk, definitions: Arc<BTreeMap<String, String>>) -> Self {
        Self { chunk, definitions }
    }
}

/// Everything one extraction pass produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionRun {
    pub backend: String,
    pub candidates: Vec<OperationCandidate>,
    pub notes: Vec<ExtractionNote>,
    pub stats: GatewayStats,
    pub chunks_total: usize,
    pub chunks_extracted: usize,
    pub chunks_degraded: usize,
    pub chunks_skipped: usize,
    pub fatal_error: Option<String>,
    pub partial: bool,
}

// ============================================================================
// Gateway
// ============================================================================

#[derive(Clone)]
pub struct ExtractionGateway {
    backend: Arc<dyn ExtractorBackend>,
    config: GatewayConfig,
    stats: Arc<Mutex<GatewayStats>>,
}

impl ExtractionGateway {
    pub fn new(backend: Arc<dyn ExtractorBackend>, config: GatewayConfig) -> Self {
        Self {
            backend,
            config,
            stats: Arc::new(Mutex::new(GatewayStats::default())),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats.lock().clone()
    }

    /// Extract one chunk with timeout, retry and backoff.
    ///
    /// A tripped `cancel` ends the backoff sleep early with
    /// [`ChunkOutcome::Cancelled`]; a call already in flight runs to its
    /// timeout.
    pub async fn extract_chunk(
        &self,
        chunk: &Chunk,
        definitions: &BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> ChunkOutcome {
        let request = ExtractionRequest::from_chunk(chunk, definitions);
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.stats.lock().calls += 1;

            let result = match tokio::time::timeout(timeout, self.backend.extract(&request)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(self.config.timeout_ms)),
            };
            let result = result.and_then(|value| {
                serde_json::from_value::<Envelope>(value)
                    .map_err(|e| BackendError::Malformed(format!("response envelope: {e}")))
            });

            let err = match result {
                Ok(envelope) => return self.accept(chunk, envelope),
                Err(err) => err,
            };

            if err.is_timeout() {
                self.stats.lock().timeouts += 1;
            }

            if !err.is_retryable() {
                self.stats.lock().failures += 1;
                tracing::warn!(chunk_id = %chunk.chunk_id, error = %err, "fatal backend error");
                let note = ExtractionNote::new(NoteKind::BackendError, &chunk.policy_id, &chunk.chunk_id, err.to_string());
                return ChunkOutcome::Fatal {
                    error: err,
                    notes: vec![note],
                };
            }

            if attempt > self.config.max_retries {
                self.stats.lock().failures += 1;
                tracing::warn!(
                    chunk_id = %chunk.chunk_id,
                    attempts = attempt,
                    error = %err,
                    "chunk degraded after retries"
                );
                let kind = if err.is_timeout() {
                    NoteKind::BackendTimeout
                } else {
                    NoteKind::BackendError
                };
                let note = ExtractionNote::new(
                    kind,
                    &chunk.policy_id,
                    &chunk.chunk_id,
                    format!("{err} (gave up after {attempt} attempts)"),
                );
                return ChunkOutcome::Degraded { notes: vec![note] };
            }

            self.stats.lock().retries += 1;
            let delay = self.retry_delay(attempt, &err);
            tracing::debug!(
                chunk_id = %chunk.chunk_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying chunk"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    tracing::debug!(chunk_id = %chunk.chunk_id, attempt, "retry abandoned, run cancelled");
                    return ChunkOutcome::Cancelled;
                }
            }
        }
    }

    /// Backoff for `attempt`, stretched to a rate limit's `Retry-After` but
    /// never past `max_backoff_ms`.
    fn retry_delay(&self, attempt: u32, err: &BackendError) -> Duration {
        let delay = self.config.backoff(attempt);
        let BackendError::RateLimited { retry_after_ms } = err else {
            return delay;
        };
        if *retry_after_ms > self.config.max_backoff_ms {
            tracing::warn!(
                retry_after_ms = *retry_after_ms,
                max_backoff_ms = self.config.max_backoff_ms,
                "server asked for a longer wait than allowed, capping"
            );
        }
        delay
            .max(Duration::from_millis(*retry_after_ms))
            .min(Duration::from_millis(self.config.max_backoff_ms))
    }

    fn accept(&self, chunk: &Chunk, envelope: Envelope) -> ChunkOutcome {
        let mut candidates = Vec::new();
        let mut notes = Vec::new();

        for (index, raw) in envelope.operations.iter().enumerate() {
            match accept_operation(chunk, index, raw) {
                Ok(candidate) => match self.config.conjunction {
                    ConjunctionPolicy::Merge => candidates.push(candidate),
                    ConjunctionPolicy::Split => candidates.extend(split_purposes(candidate)),
                },
                Err(note) => {
                    tracing::warn!(
                        chunk_id = %chunk.chunk_id,
                        op_index = index,
                        kind = ?note.kind,
                        reason = %note.message,
                        "dropped candidate"
                    );
                    notes.push(note);
                }
            }
        }

        notes.extend(envelope.nonextractable_notes.into_iter().map(|message| {
            ExtractionNote::new(NoteKind::NonExtractable, &chunk.policy_id, &chunk.chunk_id, message)
        }));

        tracing::debug!(
            chunk_id = %chunk.chunk_id,
            candidates = candidates.len(),
            notes = notes.len(),
            "chunk extracted"
        );
        ChunkOutcome::Extracted { candidates, notes }
    }

    /// Extract every job under the concurrency limit.
    ///
    /// `cancel` is checked before each chunk acquires its permit and again
    /// once it holds one. Whatever was collected before cancellation or a
    /// fatal error is kept.
    pub async fn extract_all(&self, jobs: Vec<ChunkJob>, cancel: &CancelToken) -> ExtractionRun {
        let total = jobs.len();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit.max(1)));
        // trips on a fatal error or when the caller cancels
        let halt = CancelToken::new();
        let forward = tokio::spawn({
            let cancel = cancel.clone();
            let halt = halt.clone();
            async move {
                cancel.cancelled().await;
                halt.cancel();
            }
        });
        let mut set = JoinSet::new();

        for (idx, job) in jobs.into_iter().enumerate() {
            let gateway = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let halt = halt.clone();

            set.spawn(async move {
                let stopped = || cancel.is_cancelled() || halt.is_cancelled();
                if stopped() {
                    return (idx, job.chunk, None);
                }
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (idx, job.chunk, None);
                };
                if stopped() {
                    return (idx, job.chunk, None);
                }
                let outcome = gateway.extract_chunk(&job.chunk, &job.definitions, &halt).await;
                if matches!(outcome, ChunkOutcome::Fatal { .. }) {
                    halt.cancel();
                }
                (idx, job.chunk, Some(outcome))
            });
        }

        let mut results = Vec::with_capacity(total);
        let mut lost_tasks = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    lost_tasks += 1;
                    tracing::warn!(error = %e, "extraction task failed");
                }
            }
        }
        forward.abort();
        results.sort_by_key(|(idx, _, _)| *idx);

        let mut run = ExtractionRun {
            backend: self.backend_name().to_string(),
            chunks_total: total,
            ..Default::default()
        };
        let mut candidates = Vec::new();

        for (_, chunk, outcome) in results {
            match outcome {
                Some(ChunkOutcome::Extracted { candidates: found, notes }) => {
                    run.chunks_extracted += 1;
                    candidates.extend(found);
                    run.notes.extend(notes);
                }
                Some(ChunkOutcome::Degraded { notes }) => {
                    run.chunks_degraded += 1;
                    run.notes.extend(notes);
                }
                Some(ChunkOutcome::Fatal { error, notes }) => {
                    run.chunks_degraded += 1;
                    run.fatal_error.get_or_insert_with(|| error.to_string());
                    run.notes.extend(notes);
                }
                Some(ChunkOutcome::Cancelled) | None => {
                    run.chunks_skipped += 1;
                    let reason = if cancel.is_cancelled() {
                        "run cancelled before chunk was extracted"
                    } else {
                        "extraction halted after a fatal backend error"
                    };
                    run.notes
                        .push(ExtractionNote::new(NoteKind::Cancelled, &chunk.policy_id, &chunk.chunk_id, reason));
                }
            }
        }

        let (mut candidates, duplicates) = dedupe(candidates);
        run.notes.extend(duplicates);
        candidates.sort_by(|a, b| {
            a.section_path
                .cmp(&b.section_path)
                .then(a.first_offset().cmp(&b.first_offset()))
                .then_with(|| a.op_id.cmp(&b.op_id))
        });
        run.candidates = candidates;
        run.stats = self.stats();
        run.partial = run.chunks_skipped > 0 || run.fatal_error.is_some() || lost_tasks > 0;

        tracing::info!(
            backend = %run.backend,
            chunks = total,
            extracted = run.chunks_extracted,
            degraded = run.chunks_degraded,
            skipped = run.chunks_skipped,
            candidates = run.candidates.len(),
            notes = run.notes.len(),
            partial = run.partial,
            "extraction finished"
        );
        run
    }
}

/// One candidate per purpose; op ids gain a `.k` suffix.
fn split_purposes(candidate: OperationCandidate) -> Vec<OperationCandidate> {
    if candidate.purposes.len() < 2 {
        return vec![candidate];
    }
    candidate
        .purposes
        .iter()
        .enumerate()
        .map(|(k, purpose)| {
            let mut part = candidate.clone();
            part.op_id = format!("{}.{}", candidate.op_id, k);
            part.purposes = vec![purpose.clone()];
            part
        })
        .collect()
}

/// Drop candidates repeated by chunk overlap: same policy, same labels,
/// same evidence offsets. The first occurrence (earliest chunk) wins.
fn dedupe(candidates: Vec<OperationCandidate>) -> (Vec<OperationCandidate>, Vec<ExtractionNote>) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(candidates.len());
    let mut notes = Vec::new();

    for candidate in candidates {
        if seen.insert(identity(&candidate)) {
            kept.push(candidate);
        } else {
            notes.push(ExtractionNote::new(
                NoteKind::Duplicate,
                &candidate.policy_id,
                &candidate.chunk_id,
                format!("{} repeats an operation from an overlapping chunk", candidate.op_id),
            ));
        }
    }
    (kept, notes)
}

fn identity(candidate: &OperationCandidate) -> String {
    let mut key = candidate.clone();
    key.op_id.clear();
    key.chunk_id.clear();
    key.section_path.clear();
    serde_json::to_string(&key).unwrap_or_else(|_| candidate.op_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deterministic::RuleBackend;
    use async_trait::async_trait;
    use polcon_ingest::PartyType;
    use polcon_ontology::Vocabulary;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunk(id: &str, text: &str, offset: usize) -> Chunk {
        Chunk {
            chunk_id: id.into(),
            policy_id: "tp".into(),
            party_type: PartyType::ThirdParty,
            section_id: "s1".into(),
            section_path: "Sharing".into(),
            char_start: offset,
            char_end: offset + text.len(),
            chunk_hash: String::new(),
            text: text.into(),
            clause_ids: vec![],
            units: 0,
        }
    }

    fn fast() -> GatewayConfig {
        GatewayConfig {
            backoff_base_ms: 1,
            max_backoff_ms: 2,
            timeout_ms: 1_000,
            ..Default::default()
        }
    }

    fn one_op(text: &str) -> serde_json::Value {
        json!({"operations": [{
            "action": {"label": "share", "evidence": "share"},
            "subject": {"label": "email address", "evidence": "email address"},
            "purposes": [{"label": "advertising", "evidence": "advertising"}, {"label": "analytics", "evidence": "analytics"}],
            "evidence_spans": [{"quote": text, "char_start": 0, "char_end": text.chars().count()}]
        }]})
    }

    /// Fails `failures` times with `error`, then answers with one operation.
    struct Flaky {
        failures: usize,
        error: BackendError,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExtractorBackend for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn extract(&self, request: &ExtractionRequest) -> Result<serde_json::Value, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(self.error.clone());
            }
            Ok(one_op(&request.text))
        }
    }

    struct Slow;

    #[async_trait]
    impl ExtractorBackend for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn extract(&self, _request: &ExtractionRequest) -> Result<serde_json::Value, BackendError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({"operations": []}))
        }
    }

    const TEXT: &str = "We share your email address for advertising and analytics.";

    #[tokio::test]
    async fn retries_then_succeeds() {
        let backend = Arc::new(Flaky {
            failures: 2,
            error: BackendError::Transport("reset".into()),
            calls: AtomicUsize::new(0),
        });
        let gateway = ExtractionGateway::new(backend, fast());
        let outcome = gateway.extract_chunk(&chunk("tp:sharing:0", TEXT, 0), &BTreeMap::new(), &CancelToken::new()).await;
        match outcome {
            ChunkOutcome::Extracted { candidates, .. } => assert_eq!(candidates.len(), 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        let stats = gateway.stats();
        assert_eq!(stats.calls, 3);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade() {
        let backend = Arc::new(Flaky {
            failures: 10,
            error: BackendError::RateLimited { retry_after_ms: 1 },
            calls: AtomicUsize::new(0),
        });
        let gateway = ExtractionGateway::new(backend, fast());
        let outcome = gateway.extract_chunk(&chunk("tp:sharing:0", TEXT, 0), &BTreeMap::new(), &CancelToken::new()).await;
        let ChunkOutcome::Degraded { notes } = outcome else {
            panic!("expected degraded outcome");
        };
        assert_eq!(notes[0].kind, NoteKind::BackendError);
        assert_eq!(gateway.stats().calls, 3);
    }

    #[tokio::test]
    async fn timeouts_become_notes() {
        let config = GatewayConfig {
            timeout_ms: 10,
            max_retries: 0,
            ..fast()
        };
        let gateway = ExtractionGateway::new(Arc::new(Slow), config);
        let outcome = gateway.extract_chunk(&chunk("tp:sharing:0", TEXT, 0), &BTreeMap::new(), &CancelToken::new()).await;
        assert_eq!(outcome.notes()[0].kind, NoteKind::BackendTimeout);
        assert_eq!(gateway.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn malformed_envelope_is_retried() {
        struct Garbage;
        #[async_trait]
        impl ExtractorBackend for Garbage {
            fn name(&self) -> &str {
                "garbage"
            }
            async fn extract(&self, _r: &ExtractionRequest) -> Result<serde_json::Value, BackendError> {
                Ok(json!({"ops": "nope"}))
            }
        }
        let gateway = ExtractionGateway::new(Arc::new(Garbage), fast());
        let outcome = gateway.extract_chunk(&chunk("tp:sharing:0", TEXT, 0), &BTreeMap::new(), &CancelToken::new()).await;
        assert!(matches!(outcome, ChunkOutcome::Degraded { .. }));
        assert_eq!(gateway.stats().retries, 2);
    }

    #[tokio::test]
    async fn fatal_error_halts_remaining_chunks() {
        let backend = Arc::new(Flaky {
            failures: 100,
            error: BackendError::Unauthorized("bad key".into()),
            calls: AtomicUsize::new(0),
        });
        let config = GatewayConfig {
            concurrency_limit: 1,
            ..fast()
        };
        let gateway = ExtractionGateway::new(backend, config);
        let jobs = (0..3)
            .map(|i| ChunkJob::new(chunk(&format!("tp:sharing:{i}"), TEXT, i * 100), Arc::default()))
            .collect();
        let run = gateway.extract_all(jobs, &CancelToken::new()).await;
        assert!(run.partial);
        assert!(run.fatal_error.is_some());
        assert_eq!(run.stats.calls, 1);
        assert_eq!(run.chunks_skipped, 2);
        assert!(run.candidates.is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_makes_no_calls() {
        let backend = Arc::new(Flaky {
            failures: 0,
            error: BackendError::Transport(String::new()),
            calls: AtomicUsize::new(0),
        });
        let gateway = ExtractionGateway::new(backend.clone(), fast());
        let cancel = CancelToken::new();
        cancel.cancel();
        let jobs = vec![ChunkJob::new(chunk("tp:sharing:0", TEXT, 0), Arc::default())];
        let run = gateway.extract_all(jobs, &cancel).await;
        assert!(run.partial);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(run.notes[0].kind, NoteKind::Cancelled);
    }

    #[tokio::test]
    async fn split_policy_yields_one_operation_per_purpose() {
        let backend = Arc::new(Flaky {
            failures: 0,
            error: BackendError::Transport(String::new()),
            calls: AtomicUsize::new(0),
        });
        let config = GatewayConfig {
            conjunction: ConjunctionPolicy::Split,
            ..fast()
        };
        let gateway = ExtractionGateway::new(backend, config);
        let jobs = vec![ChunkJob::new(chunk("tp:sharing:0", TEXT, 0), Arc::default())];
        let run = gateway.extract_all(jobs, &CancelToken::new()).await;
        let ids: Vec<&str> = run.candidates.iter().map(|c| c.op_id.as_str()).collect();
        assert_eq!(ids, vec!["tp:sharing:0#op0.0", "tp:sharing:0#op0.1"]);
        assert!(run.candidates.iter().all(|c| c.purposes.len() == 1));
    }

    #[tokio::test]
    async fn overlapping_chunks_are_deduplicated() {
        let doc = "We share your email address with affiliates. We collect your phone number. We sell your location.";
        let second = doc.find("We collect").unwrap();
        let third = doc.find("We sell").unwrap();
        let backend = Arc::new(RuleBackend::from_vocabulary(&Vocabulary::builtin().unwrap()).unwrap());
        let gateway = ExtractionGateway::new(backend, fast());
        let jobs = vec![
            ChunkJob::new(chunk("tp:sharing:0", &doc[..third - 1], 0), Arc::default()),
            ChunkJob::new(chunk("tp:sharing:1", &doc[second..], second), Arc::default()),
        ];
        let run = gateway.extract_all(jobs, &CancelToken::new()).await;
        assert_eq!(run.candidates.len(), 3);
        assert_eq!(run.notes.iter().filter(|n| n.kind == NoteKind::Duplicate).count(), 1);
        let offsets: Vec<usize> = run.candidates.iter().map(|c| c.first_offset()).collect();
        assert_eq!(offsets, vec![0, second, third]);
        for c in &run.candidates {
            let e = &c.evidence[0];
            assert_eq!(&doc[e.char_start..e.char_end], e.quote);
        }
    }

    #[tokio::test]
    async fn retry_after_is_capped_by_max_backoff() {
        let backend = Arc::new(Flaky {
            failures: 1,
            error: BackendError::RateLimited { retry_after_ms: 1_500 },
            calls: AtomicUsize::new(0),
        });
        let config = GatewayConfig {
            max_backoff_ms: 10,
            ..fast()
        };
        let gateway = ExtractionGateway::new(backend, config);
        let started = std::time::Instant::now();
        let outcome = gateway.extract_chunk(&chunk("tp:sharing:0", TEXT, 0), &BTreeMap::new(), &CancelToken::new()).await;
        assert!(matches!(outcome, ChunkOutcome::Extracted { .. }));
        assert!(started.elapsed() < Duration::from_millis(500), "waited {:?}", started.elapsed());
        assert_eq!(gateway.stats().retries, 1);
    }

    #[test]
    fn retry_delay_honours_retry_after_within_the_cap() {
        let gateway = ExtractionGateway::new(Arc::new(Slow), GatewayConfig::default());
        let limited = |ms| BackendError::RateLimited { retry_after_ms: ms };
        assert_eq!(gateway.retry_delay(1, &limited(2_000)), Duration::from_millis(2_000));
        assert_eq!(gateway.retry_delay(1, &limited(86_400_000)), Duration::from_millis(8_000));
        assert_eq!(gateway.retry_delay(1, &limited(10)), Duration::from_millis(250));
        assert_eq!(gateway.retry_delay(2, &BackendError::Transport("reset".into())), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn cancel_interrupts_backoff() {
        let backend = Arc::new(Flaky {
            failures: 10,
            error: BackendError::Transport("reset".into()),
            calls: AtomicUsize::new(0),
        });
        let config = GatewayConfig {
            backoff_base_ms: 60_000,
            max_backoff_ms: 60_000,
            ..fast()
        };
        let gateway = ExtractionGateway::new(backend.clone(), config);
        let cancel = CancelToken::new();
        let jobs = vec![ChunkJob::new(chunk("tp:sharing:0", TEXT, 0), Arc::default())];

        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trip.cancel();
        });
        let run = tokio::time::timeout(Duration::from_secs(5), gateway.extract_all(jobs, &cancel))
            .await
            .expect("backoff was not interrupted");

        assert!(run.partial);
        assert_eq!(run.chunks_skipped, 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(run.notes[0].kind, NoteKind::Cancelled);
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let config = GatewayConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(250));
        assert_eq!(config.backoff(3), Duration::from_millis(1000));
        assert_eq!(config.backoff(30), Duration::from_millis(8000));
    }
}
