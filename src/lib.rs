pub mod benchmark;
pub mod cli;
pub mod client;
pub mod compare;
pub mod config;
pub mod dispatcher;
pub mod extract;
pub mod metrics;
pub mod prompt;
pub mod report;
pub mod smoke;
pub mod stats;

#[cfg(test)]
mod testing;

pub use benchmark::{BenchmarkConfig, BenchmarkRunner};
pub use cli::Cli;
pub use client::{ChatClient, ClientConfig, ClientError, Message, RequestOutcome, RequestParams};
pub use compare::{ComparisonConfig, ComparisonRecord, ComparisonRunner, ComparisonWriter};
pub use config::Config;
pub use dispatcher::ConcurrentDispatcher;
pub use extract::extract_text;
pub use metrics::{ErrorKind, Metrics};
pub use prompt::{Prompt, PromptError, load_prompts};
pub use report::BenchmarkSummary;
pub use stats::percentile;
