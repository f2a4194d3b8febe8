use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "slm-bench")]
#[command(author, version, about = "Benchmark and A/B compare OpenAI-compatible model servers", long_about = None)]
pub struct Cli {
    /// Optional TOML file with logging, runtime and output settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level regardless of the configured level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Measure latency and throughput of one endpoint under fixed concurrency
    Perf(PerfArgs),
    /// Send every prompt to a base and a fine-tuned endpoint and record both answers
    Ab(AbArgs),
    /// Wait for the servers and send one short chat request to each
    Smoke(SmokeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PerfArgs {
    /// Target server URL (`/v1` is appended when missing)
    #[arg(long)]
    pub url: String,

    #[arg(long, default_value = "data/prompts.jsonl")]
    pub prompts: PathBuf,

    /// Model to request; defaults to the first model the server lists
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long, default_value_t = 0.0)]
    pub temperature: f64,

    #[arg(long, default_value_t = 128)]
    pub max_tokens: u32,

    /// Maximum number of requests in flight
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub concurrency: u64,

    /// Total number of requests to send
    #[arg(long, default_value_t = 50)]
    pub requests: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Summary output path (default: runs/perf/perf_<timestamp>.json)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct AbArgs {
    #[arg(long, default_value = "data/prompts.jsonl")]
    pub prompts: PathBuf,

    /// Output JSONL file
    #[arg(long, conflicts_with = "out_dir")]
    pub out: Option<PathBuf>,

    /// Directory for a timestamped output file (default: runs/ab)
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    #[arg(long, env = "BASE_API_URL", default_value = "")]
    pub base_url: String,

    #[arg(long, env = "FT_API_URL", default_value = "")]
    pub ft_url: String,

    /// Use this model on both servers instead of asking each one
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long, default_value_t = 0.0)]
    pub temperature: f64,

    #[arg(long, default_value_t = 128)]
    pub max_tokens: u32,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,
}

impl AbArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_url.trim().is_empty() || self.ft_url.trim().is_empty() {
            anyhow::bail!("BASE_API_URL and FT_API_URL must be set");
        }
        Ok(())
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmokeMode {
    Base,
    Ft,
    Both,
}

impl SmokeMode {
    pub fn includes_base(&self) -> bool {
        matches!(self, SmokeMode::Base | SmokeMode::Both)
    }

    pub fn includes_ft(&self) -> bool {
        matches!(self, SmokeMode::Ft | SmokeMode::Both)
    }
}

#[derive(Args, Debug, Clone)]
pub struct SmokeArgs {
    #[arg(long, value_enum, default_value_t = SmokeMode::Both)]
    pub mode: SmokeMode,

    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "BASE_PORT", default_value_t = 8000)]
    pub port_base: u16,

    #[arg(long, env = "FT_PORT", default_value_t = 8001)]
    pub port_ft: u16,

    /// Base server URL; overrides --host/--port-base
    #[arg(long, env = "BASE_API_URL")]
    pub base_api_url: Option<String>,

    /// Fine-tuned server URL; overrides --host/--port-ft
    #[arg(long, env = "FT_API_URL")]
    pub ft_api_url: Option<String>,

    /// Model for both servers; each server's first listed model when absent
    #[arg(long, env = "BASE_MODEL_ID")]
    pub model: Option<String>,

    /// Model for the fine-tuned server only; takes precedence over --model
    #[arg(long, env = "FT_SERVED_MODEL_NAME")]
    pub ft_model: Option<String>,

    #[arg(long, env = "TIMEOUT_SECONDS", default_value_t = 180)]
    pub timeout_seconds: u64,
}

impl SmokeArgs {
    pub fn base_url(&self) -> String {
        target_url(self.base_api_url.as_deref(), &self.host, self.port_base)
    }

    pub fn ft_url(&self) -> String {
        target_url(self.ft_api_url.as_deref(), &self.host, self.port_ft)
    }

    pub fn ft_model(&self) -> Option<&str> {
        self.ft_model.as_deref().or(self.model.as_deref())
    }
}

fn target_url(explicit: Option<&str>, host: &str, port: u16) -> String {
    match explicit.map(str::trim).filter(|url| !url.is_empty()) {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => format!("http://{}:{}", host, port),
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
