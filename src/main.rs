use anyhow::{Context, Result};
use env_logger::{Target, WriteStyle};
use log::{LevelFilter, info};
use slm_bench::cli::{AbArgs, Command, PerfArgs, SmokeArgs};
use slm_bench::{
    BenchmarkConfig, BenchmarkRunner, Cli, ComparisonConfig, ComparisonRunner, ComparisonWriter,
    Config,
};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Maximum log file size before rotation (10MB)
const LOG_FILE_MAX_SIZE: u64 = 1024 * 1024 * 10;

/// Parse log filter strings like "hyper=info" into a map of module prefix to level filter
fn parse_log_filters(filters: &[String]) -> HashMap<String, LevelFilter> {
    let mut map = HashMap::new();
    for filter in filters {
        if let Some((module, level)) = filter.split_once('=') {
            let level_filter = match level.trim().to_lowercase().as_str() {
                "error" => LevelFilter::Error,
                "warn" => LevelFilter::Warn,
                "info" => LevelFilter::Info,
                "debug" => LevelFilter::Debug,
                "trace" => LevelFilter::Trace,
                "off" => LevelFilter::Off,
                _ => continue,
            };
            map.insert(module.trim().to_string(), level_filter);
        }
    }
    map
}

/// Opens the trace log for appending, moving it to `<name>.old` first when
/// it has grown past `max_size`.
fn open_log_file(log_file: &Path, max_size: u64) -> Result<std::fs::File> {
    if let Ok(metadata) = std::fs::metadata(log_file)
        && metadata.len() >= max_size
    {
        let backup_file = log_file.with_extension("old");
        std::fs::rename(log_file, &backup_file)
            .with_context(|| format!("Failed to rotate {}", log_file.display()))?;
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))
}

fn init_logging(config: &Config, verbose: bool) -> Result<()> {
    let log_level = if verbose {
        LevelFilter::Debug.max(config.log.level.to_level_filter())
    } else {
        config.log.level.to_level_filter()
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level).format_timestamp_millis();

    // Module directives override the global level, the most specific match wins
    for (module, level) in parse_log_filters(&config.log.filter) {
        builder.filter_module(&module, level);
    }

    if let Some(ref log_file) = config.output.trace_log {
        let file = open_log_file(log_file, LOG_FILE_MAX_SIZE)?;
        builder
            .target(Target::Pipe(Box::new(file)))
            .write_style(WriteStyle::Never);
    }

    builder
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logger: {}", e))
}

fn main() -> Result<()> {
    // .env values become clap env fallbacks
    let _ = dotenvy::dotenv();

    let cli = Cli::parse_args();
    let config = Config::load(cli.config.as_deref())?;

    init_logging(&config, cli.verbose)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Command::Perf(args) => run_perf(args, &config).await,
            Command::Ab(args) => run_ab(args).await,
            Command::Smoke(args) => run_smoke(args).await,
        }
    })
}

async fn run_perf(args: PerfArgs, config: &Config) -> Result<()> {
    let out_path = slm_bench::report::perf_output_path(args.out.as_deref());

    let runner = BenchmarkRunner::new(BenchmarkConfig {
        target_url: args.url,
        model: args.model,
        total_requests: args.requests,
        concurrency: usize::try_from(args.concurrency)?,
        temperature: args.temperature,
        max_tokens: args.max_tokens,
        timeout: Duration::from_secs(args.timeout),
        progress_interval: config.progress_interval(),
    })?;

    let prompts = slm_bench::prompt::load_prompts(&args.prompts).await?;

    if !config.output.quiet {
        println!("SLM Benchmark");
        println!("   Target: {}", runner.api_url());
        println!("   Prompts: {} ({})", args.prompts.display(), prompts.len());
        println!(
            "   Requests: {} Concurrency: {}",
            args.requests, args.concurrency
        );
        println!();
    }

    let summary = runner.run(&prompts).await?;
    summary.write_json(&out_path).await?;

    if !config.output.quiet {
        summary.print_console_report();
    }
    info!("Wrote {}", out_path.display());
    Ok(())
}

async fn run_ab(args: AbArgs) -> Result<()> {
    args.validate()?;
    let out_path =
        slm_bench::compare::ab_output_path(args.out.as_deref(), args.out_dir.as_deref())?;

    let runner = ComparisonRunner::new(ComparisonConfig {
        base_url: args.base_url,
        candidate_url: args.ft_url,
        model_override: args.model,
        temperature: args.temperature,
        max_tokens: args.max_tokens,
        timeout: Duration::from_secs(args.timeout),
    })?;

    let prompts = slm_bench::prompt::load_prompts(&args.prompts).await?;
    info!("Comparing {} prompts, writing {}", prompts.len(), out_path.display());

    let mut writer = ComparisonWriter::create(&out_path).await?;
    let written = slm_bench::compare::run_comparison(runner, prompts, &mut writer).await?;

    info!("Wrote {} records to {}", written, writer.path().display());
    Ok(())
}

async fn run_smoke(args: SmokeArgs) -> Result<()> {
    let targets = slm_bench::smoke::targets(&args);
    let timings =
        slm_bench::smoke::SmokeTimings::with_ready_timeout(Duration::from_secs(args.timeout_seconds));

    slm_bench::smoke::run_smoke(&targets, timings)
        .await
        .map_err(|e| e.context("Smoke test failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_filters() {
        let filters = parse_log_filters(&[
            "hyper=info".to_string(),
            "reqwest = WARN".to_string(),
            "h2=loud".to_string(),
            "no-level".to_string(),
        ]);
        assert_eq!(filters.len(), 2);
        assert_eq!(filters["hyper"], LevelFilter::Info);
        assert_eq!(filters["reqwest"], LevelFilter::Warn);
    }

    #[test]
    fn test_open_log_file_rotates_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("bench.log");
        std::fs::write(&log_file, "0123456789").unwrap();

        drop(open_log_file(&log_file, 100).unwrap());
        assert_eq!(std::fs::read_to_string(&log_file).unwrap(), "0123456789");

        drop(open_log_file(&log_file, 10).unwrap());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("bench.old")).unwrap(),
            "0123456789"
        );
        assert_eq!(std::fs::read_to_string(&log_file).unwrap(), "");
    }
}
