use anyhow::{Context, Result};
use log::{debug, info};
use std::time::Duration;

use crate::cli::SmokeArgs;
use crate::client::{ChatClient, ClientConfig, Message, RequestParams, normalize_api_url};

pub const SMOKE_PROMPT: &str = "Say hello in one short sentence.";
const SMOKE_TEMPERATURE: f64 = 0.2;
const SMOKE_MAX_TOKENS: u32 = 128;

/// One server to check.
#[derive(Debug, Clone)]
pub struct SmokeTarget {
    /// Printed before the reply, e.g. `BASE`
    pub label: &'static str,
    pub url: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SmokeTimings {
    /// Overall readiness budget per target
    pub ready_timeout: Duration,
    pub retry_interval: Duration,
    pub probe_timeout: Duration,
    pub request_timeout: Duration,
}

impl SmokeTimings {
    pub fn with_ready_timeout(ready_timeout: Duration) -> Self {
        Self {
            ready_timeout,
            retry_interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Targets selected by `--mode`, base first.
pub fn targets(args: &SmokeArgs) -> Vec<SmokeTarget> {
    let mut targets = Vec::with_capacity(2);
    if args.mode.includes_base() {
        targets.push(SmokeTarget {
            label: "BASE",
            url: args.base_url(),
            model: args.model.clone(),
        });
    }
    if args.mode.includes_ft() {
        targets.push(SmokeTarget {
            label: "FT",
            url: args.ft_url(),
            model: args.ft_model().map(str::to_string),
        });
    }
    targets
}

/// Waits for `target`, sends the greeting prompt and returns the reply.
pub async fn check_target(
    client: &ChatClient,
    target: &SmokeTarget,
    timings: SmokeTimings,
) -> Result<String> {
    let api_url = normalize_api_url(&target.url);

    client
        .check_server_ready(
            &api_url,
            timings.ready_timeout,
            timings.retry_interval,
            timings.probe_timeout,
        )
        .await?;

    let model = client
        .resolve_model(&api_url, target.model.as_deref(), timings.probe_timeout)
        .await
        .with_context(|| format!("Failed to resolve model for {}", api_url))?;
    debug!("{} using model {}", target.label, model);

    let outcome = client
        .send(&RequestParams {
            endpoint_url: api_url.clone(),
            model,
            messages: vec![Message {
                role: "user".to_string(),
                content: SMOKE_PROMPT.to_string(),
            }],
            temperature: SMOKE_TEMPERATURE,
            max_tokens: SMOKE_MAX_TOKENS,
            timeout: timings.request_timeout,
        })
        .await;

    if let Some(error) = outcome.error {
        anyhow::bail!("{} request to {} failed: {}", target.label, api_url, error);
    }

    info!("{} answered in {:.0}ms", target.label, outcome.latency_ms);
    Ok(outcome.text.unwrap_or_default())
}

/// Checks every target in order, printing `LABEL: reply` for each.
///
/// Stops at the first failing target.
pub async fn run_smoke(targets: &[SmokeTarget], timings: SmokeTimings) -> Result<()> {
    let client = ChatClient::new(ClientConfig::default())?;

    for target in targets {
        let text = check_target(&client, target, timings).await?;
        println!("{}: {}", target.label, text);
    }

    Ok(())
}
