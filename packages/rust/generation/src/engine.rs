//! Bounded-concurrency generation engine.
//!
//! A single control loop admits jobs in submission order while fewer than
//! `concurrency` requests are in flight. Each job retries on its own
//! schedule; one model's failure never cancels or delays another.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use docgen_shared::{DocgenError, GenerationConfig, GenerationResult, Result};

use crate::prompt::Prompt;
use crate::providers::{GenerationProvider, ProviderError};
use crate::retry::Backoff;
use crate::sections::parse_sections;

// ---------------------------------------------------------------------------
// Jobs and results
// ---------------------------------------------------------------------------

/// One prompt to generate, keyed by model identity.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub unique_id: String,
    pub prompt: Prompt,
}

/// A validated generation for one model.
#[derive(Debug, Clone)]
pub struct GeneratedDoc {
    pub result: GenerationResult,
    pub tokens_in: u64,
    pub tokens_out: u64,
    /// Provider calls made, including the successful one.
    pub attempts: u32,
}

/// Outcome of a whole batch, attributed by `unique_id`.
#[derive(Debug, Default)]
pub struct GenerationBatch {
    pub outcomes: BTreeMap<String, Result<GeneratedDoc>>,
    /// The deadline passed before every job was admitted.
    pub timed_out: bool,
}

/// Observer for per-model generation events.
pub trait GenerationProgress: Send + Sync {
    fn generation_started(&self, _unique_id: &str) {}
    fn generation_finished(&self, _unique_id: &str, _succeeded: bool) {}
}

/// Ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentGenerationProgress;

impl GenerationProgress for SilentGenerationProgress {}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Sends prompts to a [`GenerationProvider`] under a concurrency bound.
#[derive(Clone)]
pub struct GenerationClient {
    provider: Arc<dyn GenerationProvider>,
    config: GenerationConfig,
    backoff: Backoff,
}

impl GenerationClient {
    pub fn new(provider: Arc<dyn GenerationProvider>, config: GenerationConfig) -> Self {
        let backoff = Backoff::from_config(&config);
        Self {
            provider,
            config,
            backoff,
        }
    }

    /// Effective in-flight bound (never below 1).
    pub fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    /// Generate every job, admitting FIFO under the concurrency bound.
    ///
    /// Once `deadline` passes no further jobs are admitted: they fail with
    /// [`DocgenError::RunTimeout`] while in-flight requests run to completion.
    #[instrument(skip_all, fields(provider = self.provider.name(), jobs = jobs.len(), concurrency = self.concurrency()))]
    pub async fn generate_all(
        &self,
        jobs: Vec<GenerationJob>,
        deadline: Option<Instant>,
        progress: &dyn GenerationProgress,
    ) -> GenerationBatch {
        let concurrency = self.concurrency();
        let mut queue: VecDeque<GenerationJob> = jobs.into();
        let mut in_flight: JoinSet<(String, Result<GeneratedDoc>)> = JoinSet::new();
        let mut task_models: HashMap<task::Id, String> = HashMap::new();
        let mut batch = GenerationBatch::default();

        info!("starting generation");

        loop {
            while !batch.timed_out && in_flight.len() < concurrency {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    batch.timed_out = true;
                    break;
                }
                let Some(job) = queue.pop_front() else { break };

                progress.generation_started(&job.unique_id);
                let client = self.clone();
                let unique_id = job.unique_id.clone();
                let handle = in_flight.spawn(async move {
                    let outcome = client.generate_one(&job.unique_id, &job.prompt).await;
                    (job.unique_id, outcome)
                });
                task_models.insert(handle.id(), unique_id);
            }

            if batch.timed_out && !queue.is_empty() {
                warn!(unadmitted = queue.len(), "run timeout reached, no further requests admitted");
                for job in queue.drain(..) {
                    progress.generation_finished(&job.unique_id, false);
                    batch.outcomes.insert(job.unique_id, Err(DocgenError::RunTimeout));
                }
            }

            if in_flight.is_empty() {
                break;
            }

            // Only wake on the deadline while something is still waiting for admission.
            let joined = match deadline.filter(|_| !batch.timed_out && !queue.is_empty()) {
                Some(deadline) => tokio::select! {
                    biased;
                    joined = in_flight.join_next_with_id() => joined,
                    () = tokio::time::sleep_until(deadline) => {
                        batch.timed_out = true;
                        continue;
                    }
                },
                None => in_flight.join_next_with_id().await,
            };

            let Some(joined) = joined else { break };
            let (unique_id, outcome) = match joined {
                Ok((id, (unique_id, outcome))) => {
                    task_models.remove(&id);
                    (unique_id, outcome)
                }
                Err(join_err) => {
                    let Some(unique_id) = task_models.remove(&join_err.id()) else {
                        warn!(error = %join_err, "unattributed generation task failure");
                        continue;
                    };
                    warn!(%unique_id, error = %join_err, "generation task aborted");
                    let outcome = Err(DocgenError::GenerationTransport(format!(
                        "generation task failed: {join_err}"
                    )));
                    (unique_id, outcome)
                }
            };

            progress.generation_finished(&unique_id, outcome.is_ok());
            batch.outcomes.insert(unique_id, outcome);
        }

        let failed = batch.outcomes.values().filter(|o| o.is_err()).count();
        info!(
            succeeded = batch.outcomes.len() - failed,
            failed,
            timed_out = batch.timed_out,
            "generation finished"
        );

        batch
    }

    /// Generate one model, retrying rate limits and transport failures.
    #[instrument(skip(self, prompt))]
    pub async fn generate_one(&self, unique_id: &str, prompt: &Prompt) -> Result<GeneratedDoc> {
        let mut attempts = 0u32;
        let mut rate_limit_retries = 0u32;
        let mut transport_retries = 0u32;

        loop {
            attempts += 1;
            match self.provider.complete(prompt).await {
                Ok(completion) => {
                    let result = parse_sections(&completion.text).inspect_err(|e| {
                        warn!(error = %e, "response rejected");
                    })?;
                    debug!(attempts, "generation succeeded");
                    return Ok(GeneratedDoc {
                        result,
                        tokens_in: completion.tokens_in,
                        tokens_out: completion.tokens_out,
                        attempts,
                    });
                }
                Err(ProviderError::RateLimited { retry_after }) => {
                    if rate_limit_retries >= self.config.max_rate_limit_retries {
                        warn!(attempts, "rate limit retries exhausted");
                        return Err(DocgenError::GenerationExhausted { attempts });
                    }
                    let delay = self.backoff.delay(rate_limit_retries, retry_after);
                    rate_limit_retries += 1;
                    debug!(retry = rate_limit_retries, delay_ms = delay.as_millis() as u64, "rate limited, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(ProviderError::Transport(message)) => {
                    if transport_retries >= self.config.transport_retries {
                        warn!(attempts, error = %message, "transport retries exhausted");
                        return Err(DocgenError::GenerationTransport(message));
                    }
                    let delay = self.backoff.delay(transport_retries, None);
                    transport_retries += 1;
                    debug!(retry = transport_retries, delay_ms = delay.as_millis() as u64, error = %message, "transport error, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(ProviderError::Rejected { status, body }) => {
                    warn!(status, "request rejected");
                    return Err(DocgenError::GenerationTransport(format!(
                        "request rejected with HTTP {status}: {body}"
                    )));
                }
                Err(ProviderError::Malformed(message)) => {
                    warn!(error = %message, "malformed provider response");
                    return Err(DocgenError::invalid(message));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::providers::Completion;

    const VALID: &str = "## Business Overview\nA\n## Technical Implementation\nB\n## Data Dictionary\nC\n";

    #[derive(Clone)]
    enum Step {
        Respond(&'static str),
        RateLimited,
        Transport,
        Rejected,
        Panic,
    }

    /// Plays back a per-prompt script, falling back to a valid response.
    struct ScriptedProvider {
        scripts: Mutex<HashMap<String, VecDeque<Step>>>,
        delay: Duration,
        calls: Mutex<Vec<String>>,
        current: AtomicUsize,
        max_seen: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(delay: Duration) -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                delay,
                calls: Mutex::new(Vec::new()),
                current: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
            }
        }

        fn script(self, user: &str, steps: Vec<Step>) -> Self {
            self.scripts.lock().unwrap().insert(user.to_string(), steps.into());
            self
        }

        fn calls_for(&self, user: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == user).count()
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        async fn complete(&self, prompt: &Prompt) -> std::result::Result<Completion, ProviderError> {
            self.calls.lock().unwrap().push(prompt.user.clone());
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            let step = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&prompt.user)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Step::Respond(VALID));

            match step {
                Step::Respond(text) => Ok(Completion {
                    text: text.to_string(),
                    tokens_in: 10,
                    tokens_out: 5,
                }),
                Step::RateLimited => Err(ProviderError::RateLimited { retry_after: None }),
                Step::Transport => Err(ProviderError::Transport("connection reset".into())),
                Step::Rejected => Err(ProviderError::Rejected {
                    status: 401,
                    body: "bad key".into(),
                }),
                Step::Panic => panic!("provider blew up"),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn config(concurrency: usize) -> GenerationConfig {
        GenerationConfig {
            concurrency,
            max_rate_limit_retries: 2,
            transport_retries: 1,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: false,
            ..GenerationConfig::default()
        }
    }

    fn job(id: &str) -> GenerationJob {
        GenerationJob {
            unique_id: format!("model.shop.{id}"),
            prompt: Prompt {
                system: "sys".into(),
                user: id.to_string(),
            },
        }
    }

    fn jobs(ids: &[&str]) -> Vec<GenerationJob> {
        ids.iter().map(|id| job(id)).collect()
    }

    #[tokio::test]
    async fn respects_concurrency_bound() {
        let provider = Arc::new(ScriptedProvider::new(Duration::from_millis(20)));
        let client = GenerationClient::new(provider.clone(), config(3));

        let ids: Vec<String> = (0..12).map(|i| format!("m{i}")).collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let batch = client.generate_all(jobs(&ids), None, &SilentGenerationProgress).await;

        assert_eq!(batch.outcomes.len(), 12);
        assert!(batch.outcomes.values().all(|o| o.is_ok()));
        assert_eq!(provider.max_seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn admits_in_submission_order() {
        let provider = Arc::new(ScriptedProvider::new(Duration::from_millis(1)));
        let client = GenerationClient::new(provider.clone(), config(1));

        client
            .generate_all(jobs(&["c", "a", "d", "b"]), None, &SilentGenerationProgress)
            .await;

        assert_eq!(*provider.calls.lock().unwrap(), vec!["c", "a", "d", "b"]);
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let provider = Arc::new(
            ScriptedProvider::new(Duration::from_millis(1))
                .script("b", vec![Step::RateLimited; 10])
                .script("c", vec![Step::Respond("no headings here")]),
        );
        let client = GenerationClient::new(provider.clone(), config(2));

        let batch = client
            .generate_all(jobs(&["a", "b", "c", "d"]), None, &SilentGenerationProgress)
            .await;

        assert!(batch.outcomes["model.shop.a"].is_ok());
        assert!(batch.outcomes["model.shop.d"].is_ok());
        assert!(matches!(
            batch.outcomes["model.shop.b"],
            Err(DocgenError::GenerationExhausted { attempts: 3 })
        ));
        assert!(matches!(
            batch.outcomes["model.shop.c"],
            Err(DocgenError::GenerationInvalid { .. })
        ));
        assert_eq!(provider.calls_for("b"), 3);
        assert!(!batch.timed_out);
    }

    #[tokio::test]
    async fn transport_errors_retry_once() {
        let provider = Arc::new(
            ScriptedProvider::new(Duration::ZERO)
                .script("flaky", vec![Step::Transport])
                .script("down", vec![Step::Transport, Step::Transport, Step::Transport]),
        );
        let client = GenerationClient::new(provider.clone(), config(2));

        let flaky = client.generate_one("model.shop.flaky", &job("flaky").prompt).await.unwrap();
        assert_eq!(flaky.attempts, 2);
        assert_eq!(flaky.result.data_dictionary, "C");

        let down = client.generate_one("model.shop.down", &job("down").prompt).await.unwrap_err();
        assert!(matches!(down, DocgenError::GenerationTransport(_)));
        assert_eq!(provider.calls_for("down"), 2);
    }

    #[tokio::test]
    async fn rejected_requests_are_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO).script("a", vec![Step::Rejected]));
        let client = GenerationClient::new(provider.clone(), config(1));

        let err = client.generate_one("model.shop.a", &job("a").prompt).await.unwrap_err();
        assert!(err.to_string().contains("401"));
        assert_eq!(provider.calls_for("a"), 1);
    }

    #[tokio::test]
    async fn rate_limit_recovers_within_budget() {
        let provider = Arc::new(
            ScriptedProvider::new(Duration::ZERO).script("a", vec![Step::RateLimited, Step::RateLimited]),
        );
        let client = GenerationClient::new(provider, config(1));

        let doc = client.generate_one("model.shop.a", &job("a").prompt).await.unwrap();
        assert_eq!(doc.attempts, 3);
        assert_eq!(doc.tokens_in, 10);
    }

    #[tokio::test]
    async fn deadline_stops_admission_but_finishes_in_flight() {
        let provider = Arc::new(ScriptedProvider::new(Duration::from_millis(150)));
        let client = GenerationClient::new(provider.clone(), config(1));

        let deadline = Instant::now() + Duration::from_millis(50);
        let batch = client
            .generate_all(jobs(&["a", "b", "c"]), Some(deadline), &SilentGenerationProgress)
            .await;

        assert!(batch.timed_out);
        assert!(batch.outcomes["model.shop.a"].is_ok());
        assert!(matches!(batch.outcomes["model.shop.b"], Err(DocgenError::RunTimeout)));
        assert!(matches!(batch.outcomes["model.shop.c"], Err(DocgenError::RunTimeout)));
        assert_eq!(provider.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_deadline_admits_nothing() {
        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO));
        let client = GenerationClient::new(provider.clone(), config(4));

        let batch = client
            .generate_all(jobs(&["a", "b"]), Some(Instant::now()), &SilentGenerationProgress)
            .await;

        assert!(batch.timed_out);
        assert_eq!(batch.outcomes.len(), 2);
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn panicking_task_is_attributed_to_its_model() {
        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO).script("boom", vec![Step::Panic]));
        let client = GenerationClient::new(provider, config(2));

        let batch = client
            .generate_all(jobs(&["ok", "boom"]), None, &SilentGenerationProgress)
            .await;

        assert!(batch.outcomes["model.shop.ok"].is_ok());
        assert!(matches!(
            batch.outcomes["model.shop.boom"],
            Err(DocgenError::GenerationTransport(_))
        ));
    }

    #[derive(Default)]
    struct CountingProgress {
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    impl GenerationProgress for CountingProgress {
        fn generation_started(&self, _unique_id: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn generation_finished(&self, _unique_id: &str, _succeeded: bool) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn reports_progress_for_every_job() {
        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO));
        let client = GenerationClient::new(provider, config(2));
        let progress = CountingProgress::default();

        client.generate_all(jobs(&["a", "b", "c"]), None, &progress).await;

        assert_eq!(progress.started.load(Ordering::SeqCst), 3);
        assert_eq!(progress.finished.load(Ordering::SeqCst), 3);
    }
}
