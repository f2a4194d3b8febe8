use anyhow::{Context, Result};
use log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::client::{ChatClient, ClientConfig, RequestParams, normalize_api_url};
use crate::dispatcher::ConcurrentDispatcher;
use crate::metrics::RUNNING;
use crate::prompt::Prompt;
use crate::report::BenchmarkSummary;

/// Parameters of a single-target benchmark run.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Target URL; normalized to its `/v1` API root before use
    pub target_url: String,
    /// Model to request; the server's first listed model when absent
    pub model: Option<String>,
    pub total_requests: usize,
    pub concurrency: usize,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Per-request timeout, also used for the model listing
    pub timeout: Duration,
    /// Print periodic progress windows at this interval while running
    pub progress_interval: Option<Duration>,
}

/// Benchmarks one OpenAI-compatible endpoint.
///
/// Requests cycle through the prompt set round robin (`i % prompts.len()`)
/// and are dispatched with at most `concurrency` in flight. The summary is
/// computed from the full outcome set once every request has finished.
///
/// # Examples
///
/// ```no_run
/// use slm_bench::benchmark::{BenchmarkConfig, BenchmarkRunner};
/// use slm_bench::prompt::load_prompts;
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let prompts = load_prompts("data/prompts.jsonl".as_ref()).await?;
/// let runner = BenchmarkRunner::new(BenchmarkConfig {
///     target_url: "http://localhost:8000".to_string(),
///     model: None,
///     total_requests: 50,
///     concurrency: 4,
///     temperature: 0.0,
///     max_tokens: 128,
///     timeout: Duration::from_secs(60),
///     progress_interval: None,
/// })?;
/// let summary = runner.run(&prompts).await?;
/// println!("p95: {:.1}ms", summary.p95_ms);
/// # Ok(())
/// # }
/// ```
pub struct BenchmarkRunner {
    client: Arc<ChatClient>,
    config: BenchmarkConfig,
    api_url: String,
}

impl BenchmarkRunner {
    pub fn new(config: BenchmarkConfig) -> Result<Self> {
        anyhow::ensure!(config.concurrency >= 1, "concurrency must be at least 1");
        anyhow::ensure!(!config.target_url.trim().is_empty(), "target URL must not be empty");

        // Pool size matches concurrency
        let client = ChatClient::new(ClientConfig {
            pool_size: config.concurrency,
        })?;
        let api_url = normalize_api_url(&config.target_url);

        Ok(Self {
            client: Arc::new(client),
            config,
            api_url,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub async fn run(&self, prompts: &[Prompt]) -> Result<BenchmarkSummary> {
        if self.config.total_requests > 0 && prompts.is_empty() {
            anyhow::bail!("No prompts loaded; at least one prompt is required");
        }

        let model = self
            .client
            .resolve_model(&self.api_url, self.config.model.as_deref(), self.config.timeout)
            .await
            .with_context(|| format!("Failed to resolve model for {}", self.api_url))?;

        let dispatcher = ConcurrentDispatcher::new(Arc::clone(&self.client), self.config.concurrency)?;

        info!(
            "Sending {} requests to {} (model: {}, concurrency: {})",
            self.config.total_requests, self.api_url, model, self.config.concurrency
        );

        RUNNING.store(true, Ordering::Relaxed);
        let stats_handle = self
            .config
            .progress_interval
            .map(|interval| tokio::spawn(crate::stats::periodic_stats(interval)));

        let api_url = self.api_url.clone();
        let request_model = model.clone();
        let temperature = self.config.temperature;
        let max_tokens = self.config.max_tokens;
        let timeout = self.config.timeout;

        let started = Instant::now();
        let outcomes = dispatcher
            .run(self.config.total_requests, |idx| RequestParams {
                endpoint_url: api_url.clone(),
                model: request_model.clone(),
                messages: prompts[idx % prompts.len()].messages.clone(),
                temperature,
                max_tokens,
                timeout,
            })
            .await;
        let elapsed = started.elapsed();

        RUNNING.store(false, Ordering::Relaxed);
        if let Some(handle) = stats_handle {
            let _ = handle.await;
        }

        debug!(
            "Collected {} outcomes in {:.3}s",
            outcomes.len(),
            elapsed.as_secs_f64()
        );

        let summary = BenchmarkSummary::from_outcomes(
            &self.api_url,
            &model,
            self.config.concurrency,
            self.config.total_requests,
            &outcomes,
            elapsed,
        );

        info!(
            "Benchmark completed in {:.1}s: {} ok, {} failed",
            summary.elapsed_seconds, summary.success_count, summary.error_count
        );

        Ok(summary)
    }
}
