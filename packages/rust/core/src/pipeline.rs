//! End-to-end `generate` pipeline:
//! manifest → prompts → generation → doc blocks → schema files → summary.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use docgen_generation::{
    GenerationClient, GenerationJob, GenerationProgress, GenerationProvider, PromptStrategy,
};
use docgen_shared::{
    DescriptionPolicy, DocBlockName, DocgenError, FailureKind, GenerationConfig, ModelInfo, Result,
};

use crate::docblock::DocBlockWriter;
use crate::schema::{EntryOutcome, SchemaEntry, SchemaUpdateRecord, SchemaUpdater};

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// dbt project root; schema paths in the manifest are relative to it.
    pub project_root: PathBuf,
    /// Path to `manifest.json`.
    pub manifest_path: PathBuf,
    /// Directory doc block files are written to.
    pub docs_dir: PathBuf,
    pub generation: GenerationConfig,
    pub description_policy: DescriptionPolicy,
    /// Stop admitting generation requests after this long.
    pub run_timeout: Option<Duration>,
    /// Model names to process; empty means all.
    pub select: Vec<String>,
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Succeeded,
    /// Doc block written, schema entry already current or deliberately kept.
    Skipped,
    Failed,
}

/// Per-model line of the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct ModelOutcome {
    pub unique_id: String,
    pub name: String,
    pub status: ModelStatus,
    pub failure: Option<FailureKind>,
    /// Failure cause or skip reason.
    pub detail: Option<String>,
    pub doc_path: Option<PathBuf>,
}

impl ModelOutcome {
    fn succeeded(model: &ModelInfo, doc_path: PathBuf) -> Self {
        Self {
            unique_id: model.unique_id.clone(),
            name: model.name.clone(),
            status: ModelStatus::Succeeded,
            failure: None,
            detail: None,
            doc_path: Some(doc_path),
        }
    }

    fn skipped(model: &ModelInfo, doc_path: PathBuf, reason: &str) -> Self {
        Self {
            status: ModelStatus::Skipped,
            detail: Some(reason.to_string()),
            ..Self::succeeded(model, doc_path)
        }
    }

    fn failed(model: &ModelInfo, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            unique_id: model.unique_id.clone(),
            name: model.name.clone(),
            status: ModelStatus::Failed,
            failure: Some(kind),
            detail: Some(reason.into()),
            doc_path: None,
        }
    }

    fn from_error(model: &ModelInfo, err: &DocgenError) -> Self {
        Self::failed(model, err.kind(), err.to_string())
    }
}

/// Aggregated result of a pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Sorted by `unique_id`.
    pub outcomes: Vec<ModelOutcome>,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub schema_files_rewritten: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub timed_out: bool,
}

impl RunSummary {
    fn from_outcomes(mut outcomes: Vec<ModelOutcome>) -> Self {
        outcomes.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));
        let count = |status| outcomes.iter().filter(|o| o.status == status).count();
        Self {
            succeeded: count(ModelStatus::Succeeded),
            skipped: count(ModelStatus::Skipped),
            failed: count(ModelStatus::Failed),
            outcomes,
            ..Self::default()
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &ModelOutcome> {
        self.outcomes.iter().filter(|o| o.status == ModelStatus::Failed)
    }

    /// No failures and no timeout.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.timed_out
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when one model's generation finishes, successfully or not.
    fn model_generated(&self, unique_id: &str, succeeded: bool, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn model_generated(&self, _unique_id: &str, _succeeded: bool, _current: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Adapts a `ProgressReporter` to the engine's `GenerationProgress`.
struct PipelineGenerationProgress<'a> {
    inner: &'a dyn ProgressReporter,
    finished: AtomicUsize,
    total: usize,
}

impl GenerationProgress for PipelineGenerationProgress<'_> {
    fn generation_finished(&self, unique_id: &str, succeeded: bool) {
        let current = self.finished.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.model_generated(unique_id, succeeded, current, self.total);
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run the full `generate` pipeline.
///
/// 1. Load models from the manifest (failure aborts the run)
/// 2. Build one prompt per model
/// 3. Generate under the concurrency bound
/// 4. Write doc blocks for successful generations
/// 5. Update schema files, one grouped update per file
///
/// Per-model and per-file failures are recorded in the summary; the run continues.
#[instrument(skip_all, fields(manifest = %config.manifest_path.display(), provider = provider.name()))]
pub async fn run_pipeline(
    config: &PipelineConfig,
    provider: Arc<dyn GenerationProvider>,
    strategy: &dyn PromptStrategy,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let started_at = Utc::now();
    let start = std::time::Instant::now();
    let deadline = config.run_timeout.map(|timeout| Instant::now() + timeout);

    // --- Phase 1: Load ---
    progress.phase("Loading manifest");
    let loaded = docgen_manifest::load_models(&config.manifest_path).inspect_err(|e| {
        if e.is_fatal() {
            error!(kind = %e.kind(), error = %e, "aborting run");
        }
    })?;
    let models = select_models(loaded, &config.select);
    let by_id: HashMap<&str, &ModelInfo> = models.iter().map(|m| (m.unique_id.as_str(), m)).collect();

    info!(models = models.len(), strategy = strategy.name(), "starting generate pipeline");

    let mut outcomes: Vec<ModelOutcome> = Vec::with_capacity(models.len());

    // --- Phase 2: Prompts ---
    progress.phase("Building prompts");
    let mut claimed: HashMap<DocBlockName, &str> = HashMap::new();
    let mut jobs = Vec::with_capacity(models.len());
    for model in &models {
        let block = model.doc_block_name();
        if let Some(owner) = claimed.get(&block) {
            let err = DocgenError::write(
                config.docs_dir.join(block.file_name()),
                format!("doc block '{block}' is already produced by {owner}"),
            );
            warn!(unique_id = %model.unique_id, %block, "doc block name collision");
            outcomes.push(ModelOutcome::from_error(model, &err));
            continue;
        }
        claimed.insert(block, &model.unique_id);
        jobs.push(GenerationJob {
            unique_id: model.unique_id.clone(),
            prompt: strategy.build(model),
        });
    }

    // --- Phase 3: Generate ---
    progress.phase("Generating documentation");
    let client = GenerationClient::new(provider, config.generation.clone());
    let adapter = PipelineGenerationProgress {
        inner: progress,
        finished: AtomicUsize::new(0),
        total: jobs.len(),
    };
    let batch = client.generate_all(jobs, deadline, &adapter).await;

    // --- Phase 4: Doc blocks ---
    progress.phase("Writing doc blocks");
    let writer = DocBlockWriter::new(&config.docs_dir);
    let mut tokens_in = 0;
    let mut tokens_out = 0;
    let mut groups: BTreeMap<PathBuf, Vec<SchemaEntry>> = BTreeMap::new();
    let mut doc_paths: HashMap<String, PathBuf> = HashMap::new();

    for (unique_id, outcome) in batch.outcomes {
        let Some(model) = by_id.get(unique_id.as_str()).copied() else {
            continue;
        };
        let generated = match outcome {
            Ok(generated) => generated,
            Err(e) => {
                warn!(%unique_id, error = %e, "generation failed");
                outcomes.push(ModelOutcome::from_error(model, &e));
                continue;
            }
        };
        tokens_in += generated.tokens_in;
        tokens_out += generated.tokens_out;

        let block = model.doc_block_name();
        match writer.write(&block, &generated.result) {
            Ok(path) => {
                doc_paths.insert(unique_id.clone(), path);
                groups
                    .entry(config.project_root.join(&model.schema_file_path))
                    .or_default()
                    .push(SchemaEntry {
                        unique_id,
                        model_name: model.name.clone(),
                        block,
                    });
            }
            Err(e) => {
                warn!(%unique_id, error = %e, "doc block write failed");
                outcomes.push(ModelOutcome::from_error(model, &e));
            }
        }
    }

    // --- Phase 5: Schema files ---
    progress.phase("Updating schema files");
    let updater = SchemaUpdater::new(config.description_policy);
    let mut schema_files_rewritten = 0;

    for (path, entries) in groups {
        let record = SchemaUpdateRecord { path, entries };
        match updater.apply(&record) {
            Ok(report) => {
                if report.rewritten {
                    schema_files_rewritten += 1;
                }
                for entry in &record.entries {
                    let (Some(model), Some(doc_path)) = (
                        by_id.get(entry.unique_id.as_str()).copied(),
                        doc_paths.remove(&entry.unique_id),
                    ) else {
                        continue;
                    };
                    let outcome = match report.outcomes.get(&entry.unique_id) {
                        Some(EntryOutcome::Updated) => ModelOutcome::succeeded(model, doc_path),
                        Some(EntryOutcome::AlreadyCurrent) => {
                            ModelOutcome::skipped(model, doc_path, "description already references the doc block")
                        }
                        Some(EntryOutcome::KeptExisting) => {
                            ModelOutcome::skipped(model, doc_path, "kept existing description")
                        }
                        Some(EntryOutcome::Missing) | None => ModelOutcome::failed(
                            model,
                            FailureKind::SchemaMalformedError,
                            format!("model not declared in {}", record.path.display()),
                        ),
                    };
                    outcomes.push(outcome);
                }
            }
            Err(e) => {
                warn!(path = %record.path.display(), error = %e, models = record.entries.len(), "schema update failed");
                for entry in &record.entries {
                    if let Some(model) = by_id.get(entry.unique_id.as_str()).copied() {
                        outcomes.push(ModelOutcome::from_error(model, &e));
                    }
                }
            }
        }
    }

    let summary = RunSummary {
        tokens_in,
        tokens_out,
        schema_files_rewritten,
        started_at,
        elapsed: start.elapsed(),
        timed_out: batch.timed_out,
        ..RunSummary::from_outcomes(outcomes)
    };

    info!(
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        tokens_in = summary.tokens_in,
        tokens_out = summary.tokens_out,
        timed_out = summary.timed_out,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "generate pipeline complete"
    );

    progress.done(&summary);
    Ok(summary)
}

/// Keep models whose name is in `select`; an empty selection keeps all.
fn select_models(models: Vec<ModelInfo>, select: &[String]) -> Vec<ModelInfo> {
    if select.is_empty() {
        return models;
    }

    let wanted: HashSet<&str> = select.iter().map(String::as_str).collect();
    let found: HashSet<&str> = models
        .iter()
        .map(|m| m.name.as_str())
        .filter(|name| wanted.contains(name))
        .collect();
    for name in wanted.difference(&found) {
        warn!(model = %name, "selected model not found in manifest");
    }

    models
        .into_iter()
        .filter(|m| wanted.contains(m.name.as_str()))
        .collect()
}
