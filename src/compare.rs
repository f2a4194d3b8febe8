use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::client::{ChatClient, ClientConfig, RequestOutcome, RequestParams, normalize_api_url};
use crate::prompt::Prompt;
use crate::report::file_stamp;

/// Default directory for comparison artifacts.
pub const AB_OUTPUT_DIR: &str = "runs/ab";

#[derive(Debug, Clone)]
pub struct ComparisonConfig {
    pub base_url: String,
    pub candidate_url: String,
    /// Use this model on both targets instead of asking each server
    pub model_override: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Sampling parameters shared by both legs of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RequestSettings {
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Paired result for one prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub prompt_id: String,
    pub request_params: RequestSettings,
    pub base: RequestOutcome,
    pub candidate: RequestOutcome,
    pub timestamp: DateTime<Utc>,
}

/// Compares a base and a candidate deployment on the same prompts.
pub struct ComparisonRunner {
    client: ChatClient,
    config: ComparisonConfig,
}

impl ComparisonRunner {
    pub fn new(config: ComparisonConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() || config.candidate_url.trim().is_empty() {
            anyhow::bail!("Both a base URL and a candidate URL are required");
        }

        let client = ChatClient::new(ClientConfig { pool_size: 2 })?;
        Ok(Self { client, config })
    }

    /// Resolves the model for each target and returns the record stream.
    ///
    /// Without an override each target is asked for its own first listed
    /// model, so the two legs may use different model identifiers. No chat
    /// request is sent until [`ComparisonStream::next`] is called.
    pub async fn start(self, prompts: Vec<Prompt>) -> Result<ComparisonStream> {
        let base_url = normalize_api_url(&self.config.base_url);
        let candidate_url = normalize_api_url(&self.config.candidate_url);
        let model_override = self.config.model_override.as_deref();
        let timeout = self.config.timeout;

        let base_model = self
            .client
            .resolve_model(&base_url, model_override, timeout)
            .await
            .with_context(|| format!("Failed to resolve base model at {}", base_url))?;
        let candidate_model = self
            .client
            .resolve_model(&candidate_url, model_override, timeout)
            .await
            .with_context(|| format!("Failed to resolve candidate model at {}", candidate_url))?;

        info!(
            "Comparing base {} ({}) against candidate {} ({}) on {} prompts",
            base_url,
            base_model,
            candidate_url,
            candidate_model,
            prompts.len()
        );

        Ok(ComparisonStream {
            client: self.client,
            base_url,
            base_model,
            candidate_url,
            candidate_model,
            settings: RequestSettings {
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            },
            timeout,
            prompts: prompts.into_iter(),
        })
    }
}

/// Lazily produces one [`ComparisonRecord`] per prompt, in prompt order.
///
/// Every call to [`next`](Self::next) performs live requests: base first,
/// then candidate. The stream is finite and cannot be restarted.
pub struct ComparisonStream {
    client: ChatClient,
    base_url: String,
    base_model: String,
    candidate_url: String,
    candidate_model: String,
    settings: RequestSettings,
    timeout: Duration,
    prompts: std::vec::IntoIter<Prompt>,
}

impl ComparisonStream {
    pub fn base_model(&self) -> &str {
        &self.base_model
    }

    pub fn candidate_model(&self) -> &str {
        &self.candidate_model
    }

    /// Prompts not yet compared.
    pub fn remaining(&self) -> usize {
        self.prompts.len()
    }

    pub async fn next(&mut self) -> Option<ComparisonRecord> {
        let prompt = self.prompts.next()?;
        let timestamp = Utc::now();

        let base = self
            .client
            .send(&self.params(&self.base_url, &self.base_model, &prompt))
            .await;
        let candidate = self
            .client
            .send(&self.params(&self.candidate_url, &self.candidate_model, &prompt))
            .await;

        Some(ComparisonRecord {
            prompt_id: prompt.id,
            request_params: self.settings,
            base,
            candidate,
            timestamp,
        })
    }

    fn params(&self, endpoint_url: &str, model: &str, prompt: &Prompt) -> RequestParams {
        RequestParams {
            endpoint_url: endpoint_url.to_string(),
            model: model.to_string(),
            messages: prompt.messages.clone(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            timeout: self.timeout,
        }
    }
}

/// Appends comparison records to a JSONL file, one line per record.
///
/// Each line is flushed as soon as it is written so an interrupted run
/// keeps every completed record.
pub struct ComparisonWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    written: usize,
}

impl ComparisonWriter {
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;

        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            written: 0,
        })
    }

    pub async fn write(&mut self, record: &ComparisonRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        self.written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

/// Picks the comparison artifact path.
///
/// `out` and `out_dir` are mutually exclusive. Without either the record
/// stream goes to `runs/ab/ab_<stamp>.jsonl`.
pub fn ab_output_path(out: Option<&Path>, out_dir: Option<&Path>) -> Result<PathBuf> {
    match (out, out_dir) {
        (Some(_), Some(_)) => anyhow::bail!("Use --out or --out-dir, not both"),
        (Some(out), None) => Ok(out.to_path_buf()),
        (None, dir) => {
            let dir = dir.unwrap_or(Path::new(AB_OUTPUT_DIR));
            Ok(dir.join(format!("ab_{}.jsonl", file_stamp(Utc::now()))))
        }
    }
}

/// Runs a full comparison, streaming each record to `writer`.
///
/// Returns the number of records written.
pub async fn run_comparison(
    runner: ComparisonRunner,
    prompts: Vec<Prompt>,
    writer: &mut ComparisonWriter,
) -> Result<usize> {
    let total = prompts.len();
    let mut stream = runner.start(prompts).await?;
    let mut index = 0;

    while let Some(record) = stream.next().await {
        index += 1;
        info!(
            "[{}/{}] {}: base {} ({:.0}ms) candidate {} ({:.0}ms)",
            index,
            total,
            record.prompt_id,
            describe_status(&record.base),
            record.base.latency_ms,
            describe_status(&record.candidate),
            record.candidate.latency_ms
        );
        writer.write(&record).await?;
    }

    Ok(writer.written())
}

fn describe_status(outcome: &RequestOutcome) -> String {
    match outcome.status {
        Some(status) => status.to_string(),
        None => "no response".to_string(),
    }
}
