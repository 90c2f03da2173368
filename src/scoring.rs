//! Driver for the external variant-effect scoring service.
//!
//! The service is rate-limited and remote. Calls are retried with exponential backoff,
//! successes are appended to a checkpoint log so an interrupted run resumes where it
//! stopped, and a variant that still fails is recorded and skipped.

use std::{
    collections::{HashMap, HashSet},
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use bon::Builder;
use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::{
    effects::{GeneEffect, VariantEffect},
    error::{Error, ExternalServiceError, Result},
    variant::{Chromosome, Variant},
};

/// One call to the scoring service.
#[derive(Debug, Clone, PartialEq, new)]
pub struct ScoringRequest {
    pub variant_id: String,
    pub chromosome: Chromosome,
    pub position: u64,
    pub ref_allele: String,
    pub alt_allele: String,
    /// Symmetric flank around the variant
    pub flank_bp: u64,
}

impl ScoringRequest {
    pub fn from_variant(variant: &Variant, flank_bp: u64) -> Self {
        Self::new(
            variant.id.clone(),
            variant.chromosome,
            variant.position,
            variant.ref_allele.clone(),
            variant.alt_allele.clone(),
            flank_bp,
        )
    }

    /// Half-open sequence interval sent with the request, clipped at the chromosome start
    pub fn interval(&self) -> (u64, u64) {
        let start = self.position.saturating_sub(self.flank_bp);
        (start, start + 2 * self.flank_bp)
    }
}

/// The external scoring collaborator.
pub trait VariantScorer: Send + Sync {
    /// Returns the effect of the variant on every candidate target gene.
    fn score(&self, request: &ScoringRequest) -> std::result::Result<Vec<GeneEffect>, ExternalServiceError>;
}

/// Adapts a closure into a [`VariantScorer`].
///
/// Every error from the closure is treated as transient.
pub struct FnScorer<F>(pub F);

impl<F> VariantScorer for FnScorer<F>
where
    F: Fn(&ScoringRequest) -> anyhow::Result<Vec<GeneEffect>> + Send + Sync,
{
    fn score(&self, request: &ScoringRequest) -> std::result::Result<Vec<GeneEffect>, ExternalServiceError> {
        (self.0)(request).map_err(|e| ExternalServiceError::Transient(format!("{e:#}")))
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per variant, including the first
    #[builder(default = 3)]
    pub max_attempts: u32,
    #[builder(default = 1_000)]
    pub initial_backoff_ms: u64,
    #[builder(default = 2.0)]
    pub multiplier: f64,
    #[builder(default = 30_000)]
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let scaled = self.initial_backoff_ms as f64 * self.multiplier.powi(retry as i32);
        Duration::from_millis(scaled.min(self.max_backoff_ms as f64) as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::Config(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}

/// Durable record of already-scored variants.
pub trait CheckpointStore {
    fn get(&self, variant_id: &str) -> Option<&VariantEffect>;
    fn record(&mut self, effect: &VariantEffect) -> Result<()>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Checkpoint kept only in memory.
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    entries: HashMap<String, VariantEffect>,
}

impl CheckpointStore for MemoryCheckpoint {
    fn get(&self, variant_id: &str) -> Option<&VariantEffect> {
        self.entries.get(variant_id)
    }

    fn record(&mut self, effect: &VariantEffect) -> Result<()> {
        self.entries.insert(effect.variant_id.clone(), effect.clone());
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Append-only JSON-lines checkpoint file, one [`VariantEffect`] per line.
pub struct CheckpointLog {
    path: PathBuf,
    writer: BufWriter<File>,
    entries: HashMap<String, VariantEffect>,
    /// The file ends in a torn line that the next record must not extend
    needs_newline: bool,
}

impl CheckpointLog {
    /// Opens (or creates) the log at `path` and loads every complete record.
    ///
    /// A line that fails to parse, typically the tail of an interrupted write, is
    /// skipped; the variant it described is scored again.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();
        let mut needs_newline = false;
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            needs_newline = !raw.is_empty() && !raw.ends_with('\n');
            for (line_number, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<VariantEffect>(line) {
                    Ok(effect) => {
                        entries.insert(effect.variant_id.clone(), effect);
                    }
                    Err(err) => tracing::warn!(
                        "skipping unreadable checkpoint line {} in {}: {err}",
                        line_number + 1,
                        path.display()
                    ),
                }
            }
            tracing::info!(
                "resuming from checkpoint {}: {} variants already scored",
                path.display(),
                entries.len()
            );
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            entries,
            needs_newline,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for CheckpointLog {
    fn get(&self, variant_id: &str) -> Option<&VariantEffect> {
        self.entries.get(variant_id)
    }

    fn record(&mut self, effect: &VariantEffect) -> Result<()> {
        let line = serde_json::to_string(effect)?;
        if self.needs_newline {
            writeln!(self.writer)?;
            self.needs_newline = false;
        }
        writeln!(self.writer, "{line}")?;
        self.writer.flush().map_err(|e| {
            Error::Checkpoint(format!("failed to flush {}: {e}", self.path.display()))
        })?;
        self.entries.insert(effect.variant_id.clone(), effect.clone());
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A variant the scoring service could not score.
#[derive(Debug, Clone, PartialEq, new)]
pub struct ScoringFailure {
    pub variant_id: String,
    pub attempts: u32,
    pub error: ExternalServiceError,
}

#[derive(Debug, Default)]
pub struct ScoringReport {
    pub effects: HashMap<String, VariantEffect>,
    pub failures: Vec<ScoringFailure>,
    /// Variants scored by a call in this run
    pub n_scored: usize,
    /// Variants taken from the checkpoint
    pub n_resumed: usize,
}

/// Calls the scorer until success, a non-transient error, or the attempt budget runs out.
fn score_with_retry<S: VariantScorer + ?Sized>(
    scorer: &S,
    request: &ScoringRequest,
    policy: &RetryPolicy,
) -> std::result::Result<Vec<GeneEffect>, (u32, ExternalServiceError)> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match scorer.score(request) {
            Ok(effects) => return Ok(effects),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt - 1);
                tracing::debug!(
                    "variant {} attempt {attempt}/{} failed: {err}; retrying in {delay:?}",
                    request.variant_id,
                    policy.max_attempts
                );
                std::thread::sleep(delay);
            }
            Err(err) => return Err((attempt, err)),
        }
    }
}

/// Drops effects below `min_gene_effect` or with a non-finite primary value and zeroes
/// non-finite modality values, so every recorded effect serializes losslessly.
fn retain_effects(variant_id: &str, targets: Vec<GeneEffect>, min_gene_effect: f64) -> Vec<GeneEffect> {
    targets
        .into_iter()
        .filter(|t| t.primary.is_finite() && t.primary.abs() > min_gene_effect)
        .map(|mut t| {
            let non_finite = t
                .modalities
                .iter()
                .filter(|(_, v)| !v.is_finite())
                .map(|(m, _)| m)
                .collect::<Vec<_>>();
            for modality in non_finite {
                tracing::warn!(
                    "variant {variant_id} gene {}: non-finite {} effect replaced by 0.0",
                    t.gene,
                    modality
                );
                t.modalities[modality] = 0.0;
            }
            t
        })
        .collect()
}

/// Scores every request, consulting and extending `checkpoint`.
///
/// Gene effects whose primary magnitude does not exceed `min_gene_effect` are dropped
/// before recording. Per-variant failures never abort the run; only a checkpoint write
/// failure does.
pub fn score_variants<S, C>(
    requests: &[ScoringRequest],
    scorer: &S,
    checkpoint: &mut C,
    policy: &RetryPolicy,
    min_gene_effect: f64,
) -> Result<ScoringReport>
where
    S: VariantScorer + ?Sized,
    C: CheckpointStore + ?Sized,
{
    let mut report = ScoringReport::default();
    let mut seen = HashSet::new();
    for request in requests {
        if !seen.insert(request.variant_id.as_str()) {
            continue;
        }
        if let Some(effect) = checkpoint.get(&request.variant_id) {
            report.effects.insert(request.variant_id.clone(), effect.clone());
            report.n_resumed += 1;
            continue;
        }

        match score_with_retry(scorer, request, policy) {
            Ok(targets) => {
                let targets = retain_effects(&request.variant_id, targets, min_gene_effect);
                let effect = VariantEffect {
                    variant_id: request.variant_id.clone(),
                    targets,
                };
                checkpoint.record(&effect)?;
                report.effects.insert(effect.variant_id.clone(), effect);
                report.n_scored += 1;
            }
            Err((attempts, error)) => {
                tracing::warn!(
                    "variant {} failed after {attempts} attempt(s): {error}",
                    request.variant_id
                );
                report
                    .failures
                    .push(ScoringFailure::new(request.variant_id.clone(), attempts, error));
            }
        }
    }
    tracing::info!(
        "scoring finished: {} scored, {} resumed, {} failed",
        report.n_scored,
        report.n_resumed,
        report.failures.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{Modality, ModalityVector};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn no_wait() -> RetryPolicy {
        RetryPolicy::builder().initial_backoff_ms(0).build()
    }

    fn request(id: &str, position: u64) -> ScoringRequest {
        ScoringRequest::new(id.into(), Chromosome::Autosome(1), position, "A".into(), "G".into(), 262_144)
    }

    fn effect(gene: &str, primary: f64) -> GeneEffect {
        GeneEffect::new(gene, primary, ModalityVector::from_pairs([(Modality::Dnase, primary)]))
    }

    /// Fails transiently a fixed number of times per variant, then succeeds.
    struct FlakyScorer {
        failures_before_success: usize,
        calls: AtomicUsize,
    }

    impl VariantScorer for FlakyScorer {
        fn score(&self, request: &ScoringRequest) -> std::result::Result<Vec<GeneEffect>, ExternalServiceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(ExternalServiceError::Transient("rate limited".into()))
            } else {
                Ok(vec![effect(&format!("GENE_{}", request.variant_id), 0.8)])
            }
        }
    }

    #[test]
    fn test_interval_is_clipped_at_zero() {
        let near_start = request("rs1", 1_000);
        assert_eq!(near_start.interval(), (0, 524_288));
        let inner = request("rs2", 1_000_000);
        assert_eq!(inner.interval(), (1_000_000 - 262_144, 1_000_000 + 262_144));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::builder()
            .initial_backoff_ms(100)
            .max_backoff_ms(350)
            .build();
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let scorer = FlakyScorer {
            failures_before_success: 2,
            calls: AtomicUsize::new(0),
        };
        let mut checkpoint = MemoryCheckpoint::default();
        let report =
            score_variants(&[request("rs1", 10)], &scorer, &mut checkpoint, &no_wait(), 0.1).unwrap();
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.n_scored, 1);
        assert!(report.failures.is_empty());
        assert_eq!(checkpoint.len(), 1);
    }

    #[test]
    fn test_exhausted_retries_become_failures() {
        let scorer = FlakyScorer {
            failures_before_success: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let mut checkpoint = MemoryCheckpoint::default();
        let report = score_variants(
            &[request("rs1", 10), request("rs2", 20)],
            &scorer,
            &mut checkpoint,
            &no_wait(),
            0.1,
        )
        .unwrap();
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].attempts, 3);
        assert!(report.effects.is_empty());
        assert!(checkpoint.is_empty());
    }

    #[test]
    fn test_rejected_requests_are_not_retried() {
        struct RejectingScorer {
            calls: AtomicUsize,
        }
        impl VariantScorer for RejectingScorer {
            fn score(&self, _: &ScoringRequest) -> std::result::Result<Vec<GeneEffect>, ExternalServiceError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(ExternalServiceError::Rejected("unsupported allele".into()))
            }
        }

        let scorer = RejectingScorer {
            calls: AtomicUsize::new(0),
        };
        let mut checkpoint = MemoryCheckpoint::default();
        let report =
            score_variants(&[request("rs1", 10)], &scorer, &mut checkpoint, &no_wait(), 0.1).unwrap();
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.failures[0].attempts, 1);
        assert!(!report.failures[0].error.is_transient());
    }

    #[test]
    fn test_fn_scorer_filters_small_effects() {
        let scorer = FnScorer(|_: &ScoringRequest| -> anyhow::Result<Vec<GeneEffect>> {
            Ok(vec![effect("BIG", -0.9), effect("SMALL", 0.05), effect("EDGE", 0.1)])
        });
        let mut checkpoint = MemoryCheckpoint::default();
        let report =
            score_variants(&[request("rs1", 10)], &scorer, &mut checkpoint, &no_wait(), 0.1).unwrap();
        let genes = report.effects["rs1"]
            .targets
            .iter()
            .map(|t| t.gene.as_str())
            .collect::<Vec<_>>();
        assert_eq!(genes, vec!["BIG"]);
    }

    #[test]
    fn test_fn_scorer_errors_are_transient() {
        let scorer = FnScorer(|_: &ScoringRequest| -> anyhow::Result<Vec<GeneEffect>> {
            Err(anyhow::anyhow!("connection reset"))
        });
        let mut checkpoint = MemoryCheckpoint::default();
        let policy = RetryPolicy::builder().initial_backoff_ms(0).max_attempts(2).build();
        let report =
            score_variants(&[request("rs1", 10)], &scorer, &mut checkpoint, &policy, 0.1).unwrap();
        assert_eq!(report.failures[0].attempts, 2);
        assert!(report.failures[0].error.is_transient());
    }

    #[test]
    fn test_duplicate_requests_are_scored_once() {
        let scorer = FlakyScorer {
            failures_before_success: 0,
            calls: AtomicUsize::new(0),
        };
        let mut checkpoint = MemoryCheckpoint::default();
        let report = score_variants(
            &[request("rs1", 10), request("rs1", 10)],
            &scorer,
            &mut checkpoint,
            &no_wait(),
            0.1,
        )
        .unwrap();
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.n_scored, 1);
    }

    #[test]
    fn test_checkpoint_log_resumes_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.jsonl");
        let requests = vec![request("rs1", 10), request("rs2", 20)];

        {
            let scorer = FlakyScorer {
                failures_before_success: 0,
                calls: AtomicUsize::new(0),
            };
            let mut log = CheckpointLog::open(&path).unwrap();
            score_variants(&requests[..1], &scorer, &mut log, &no_wait(), 0.1).unwrap();
        }

        // Simulate a crash in the middle of a write.
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"{\"variant_id\":\"rs2\",\"tar")
            .unwrap();

        let scorer = FlakyScorer {
            failures_before_success: 0,
            calls: AtomicUsize::new(0),
        };
        let mut log = CheckpointLog::open(&path).unwrap();
        assert_eq!(log.len(), 1);
        let report = score_variants(&requests, &scorer, &mut log, &no_wait(), 0.1).unwrap();
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.n_resumed, 1);
        assert_eq!(report.n_scored, 1);
        assert_eq!(report.effects["rs1"].targets[0].gene, "GENE_rs1");

        let reopened = CheckpointLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.get("rs2").is_some());

        // One line per record plus the torn line, no blank separators
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 3);
        assert!(raw.lines().all(|l| !l.trim().is_empty()));
    }

    #[test]
    fn test_non_finite_effects_survive_the_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.jsonl");
        let scorer = FnScorer(|_: &ScoringRequest| -> anyhow::Result<Vec<GeneEffect>> {
            Ok(vec![
                GeneEffect::new(
                    "GRIN2A",
                    0.9,
                    ModalityVector::from_pairs([(Modality::Dnase, f64::NAN), (Modality::Rna, 0.4)]),
                ),
                effect("INF", f64::INFINITY),
            ])
        });
        {
            let mut log = CheckpointLog::open(&path).unwrap();
            score_variants(&[request("rs1", 10)], &scorer, &mut log, &no_wait(), 0.1).unwrap();
        }

        let log = CheckpointLog::open(&path).unwrap();
        let effect = log.get("rs1").unwrap();
        assert_eq!(effect.targets.len(), 1);
        assert_eq!(effect.targets[0].modalities[Modality::Dnase], 0.0);
        assert_eq!(effect.targets[0].modalities[Modality::Rna], 0.4);
    }
}
