use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::RequestOutcome;
use crate::metrics::ErrorKind;
use crate::stats::percentile;

/// Default directory for benchmark artifacts.
pub const PERF_OUTPUT_DIR: &str = "runs/perf";

/// Failed requests by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBreakdown {
    pub connection_errors: usize,
    pub timeout_errors: usize,
    pub http_4xx_errors: usize,
    pub http_5xx_errors: usize,
    pub other_errors: usize,
}

impl ErrorBreakdown {
    fn record(&mut self, kind: Option<ErrorKind>) {
        match kind {
            Some(ErrorKind::Connection) => self.connection_errors += 1,
            Some(ErrorKind::Timeout) => self.timeout_errors += 1,
            Some(ErrorKind::Http4xx) => self.http_4xx_errors += 1,
            Some(ErrorKind::Http5xx) => self.http_5xx_errors += 1,
            _ => self.other_errors += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.connection_errors
            + self.timeout_errors
            + self.http_4xx_errors
            + self.http_5xx_errors
            + self.other_errors
    }
}

/// Aggregate result of one benchmark run against a single target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub target_url: String,
    pub model: String,
    pub concurrency: usize,
    pub total_requests: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub throughput_rps: f64,
    pub elapsed_seconds: f64,
    pub errors: ErrorBreakdown,
    /// Latencies of the successful requests, in completion order
    pub latencies: Vec<f64>,
    pub timestamp: DateTime<Utc>,
}

impl BenchmarkSummary {
    /// Builds the summary from the outcome set of a run of `requested`
    /// requests.
    ///
    /// An outcome counts as a success when its status is 200; everything
    /// else is an error. Requests that produced no outcome at all are
    /// counted as `other_errors`.
    pub fn from_outcomes(
        target_url: &str,
        model: &str,
        concurrency: usize,
        requested: usize,
        outcomes: &[RequestOutcome],
        elapsed: Duration,
    ) -> Self {
        let mut latencies = Vec::with_capacity(outcomes.len());
        let mut errors = ErrorBreakdown::default();

        for outcome in outcomes {
            if outcome.is_success() {
                latencies.push(outcome.latency_ms);
            } else {
                errors.record(outcome.error_kind);
            }
        }

        let total_requests = requested.max(outcomes.len());
        errors.other_errors += total_requests - outcomes.len();

        let success_count = latencies.len();
        let elapsed_seconds = elapsed.as_secs_f64();

        Self {
            target_url: target_url.to_string(),
            model: model.to_string(),
            concurrency,
            total_requests,
            success_count,
            error_count: total_requests - success_count,
            p50_ms: percentile(&latencies, 50.0),
            p95_ms: percentile(&latencies, 95.0),
            throughput_rps: throughput(success_count, elapsed_seconds),
            elapsed_seconds,
            errors,
            latencies,
            timestamp: Utc::now(),
        }
    }

    /// Writes the summary as pretty-printed JSON, creating parent directories.
    pub async fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(self)? + "\n";
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn print_console_report(&self) {
        let timestamp = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, false);

        println!();
        println!("{}", timestamp);
        println!("{} -----", timestamp);
        println!("{} Benchmark Complete", timestamp);
        println!("{} Target: {}", timestamp, self.target_url);
        println!("{} Model: {}", timestamp, self.model);
        println!(
            "{} Duration: {:.1}s Concurrency: {}",
            timestamp, self.elapsed_seconds, self.concurrency
        );

        let success_rate = if self.total_requests > 0 {
            100.0 * self.success_count as f64 / self.total_requests as f64
        } else {
            0.0
        };
        println!(
            "{} Requests: Total: {} Ok: {} Err: {} Success: {:.2}%",
            timestamp, self.total_requests, self.success_count, self.error_count, success_rate
        );

        if self.errors.total() > 0 {
            println!(
                "{} Errors: Connection: {} 4xx: {} 5xx: {} Timeout: {} Other: {}",
                timestamp,
                self.errors.connection_errors,
                self.errors.http_4xx_errors,
                self.errors.http_5xx_errors,
                self.errors.timeout_errors,
                self.errors.other_errors
            );
        }

        println!(
            "{} Throughput: Requests/s: {:.2}",
            timestamp, self.throughput_rps
        );
        println!(
            "{} Request Latency (ms): p50: {:.2} p95: {:.2}",
            timestamp, self.p50_ms, self.p95_ms
        );
        println!();
    }
}

/// Successful requests per second; `0.0` when no time has elapsed.
pub fn throughput(success_count: usize, elapsed_seconds: f64) -> f64 {
    if elapsed_seconds > 0.0 {
        success_count as f64 / elapsed_seconds
    } else {
        0.0
    }
}

/// Compact UTC stamp used in default artifact names, e.g. `20260114-093000`.
pub fn file_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d-%H%M%S").to_string()
}

/// `runs/perf/perf_<stamp>.json` unless a path was given.
pub fn perf_output_path(out: Option<&Path>) -> PathBuf {
    match out {
        Some(path) => path.to_path_buf(),
        None => Path::new(PERF_OUTPUT_DIR).join(format!("perf_{}.json", file_stamp(Utc::now()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn outcome(status: Option<u16>, latency_ms: f64, kind: Option<ErrorKind>) -> RequestOutcome {
        RequestOutcome {
            model: "m".to_string(),
            latency_ms,
            status,
            text: status.filter(|s| *s == 200).map(|_| "ok".to_string()),
            usage: None,
            error: kind.map(|k| format!("{:?}", k)),
            error_kind: kind,
        }
    }

    fn mixed_outcomes() -> Vec<RequestOutcome> {
        vec![
            outcome(Some(200), 30.0, None),
            outcome(Some(500), 5.0, Some(ErrorKind::Http5xx)),
            outcome(Some(200), 10.0, None),
            outcome(None, 60000.0, Some(ErrorKind::Timeout)),
            outcome(Some(200), 20.0, Some(ErrorKind::Extraction)),
            outcome(Some(429), 1.0, Some(ErrorKind::Http4xx)),
            outcome(None, 2.0, Some(ErrorKind::Connection)),
        ]
    }

    #[test]
    fn test_summary_counts_and_order() {
        let outcomes = mixed_outcomes();
        let summary =
            BenchmarkSummary::from_outcomes("http://x/v1", "m", 4, 7, &outcomes, Duration::from_secs(2));

        assert_eq!(summary.total_requests, 7);
        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.error_count, 4);
        assert_eq!(summary.success_count + summary.error_count, summary.total_requests);
        assert_eq!(summary.latencies.len(), summary.success_count);
        // completion order is preserved, not sorted
        assert_eq!(summary.latencies, vec![30.0, 10.0, 20.0]);
        assert_eq!(summary.p50_ms, 20.0);
        assert!((summary.p95_ms - 29.0).abs() < 1e-9);
        assert!((summary.throughput_rps - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_error_breakdown() {
        let summary = BenchmarkSummary::from_outcomes(
            "http://x/v1",
            "m",
            1,
            7,
            &mixed_outcomes(),
            Duration::from_secs(1),
        );
        assert_eq!(
            summary.errors,
            ErrorBreakdown {
                connection_errors: 1,
                timeout_errors: 1,
                http_4xx_errors: 1,
                http_5xx_errors: 1,
                other_errors: 0,
            }
        );
        assert_eq!(summary.errors.total(), summary.error_count);
    }

    #[test]
    fn test_empty_run() {
        let summary = BenchmarkSummary::from_outcomes("u", "m", 1, 0, &[], Duration::ZERO);
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.p50_ms, 0.0);
        assert_eq!(summary.p95_ms, 0.0);
        assert_eq!(summary.throughput_rps, 0.0);
    }

    #[test]
    fn test_missing_outcomes_count_as_errors() {
        let outcomes = vec![outcome(Some(200), 10.0, None), outcome(Some(200), 20.0, None)];
        let summary =
            BenchmarkSummary::from_outcomes("u", "m", 2, 5, &outcomes, Duration::from_secs(1));

        assert_eq!(summary.total_requests, 5);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.error_count, 3);
        assert_eq!(summary.errors.other_errors, 3);
        assert_eq!(summary.errors.total(), summary.error_count);
    }

    #[test]
    fn test_throughput_zero_elapsed() {
        assert_eq!(throughput(10, 0.0), 0.0);
        assert_eq!(throughput(0, 0.0), 0.0);
        assert_eq!(throughput(10, 2.0), 5.0);
    }

    #[test]
    fn test_all_failed_run_has_zero_percentiles() {
        let outcomes = vec![
            outcome(Some(500), 5.0, Some(ErrorKind::Http5xx)),
            outcome(None, 1.0, Some(ErrorKind::Connection)),
        ];
        let summary =
            BenchmarkSummary::from_outcomes("u", "m", 1, 2, &outcomes, Duration::from_millis(10));
        assert_eq!(summary.success_count, 0);
        assert_eq!(summary.error_count, 2);
        assert!(summary.latencies.is_empty());
        assert_eq!(summary.p50_ms, 0.0);
        assert_eq!(summary.throughput_rps, 0.0);
    }

    #[test]
    fn test_file_stamp() {
        let now = Utc.with_ymd_and_hms(2026, 1, 14, 9, 30, 5).unwrap();
        assert_eq!(file_stamp(now), "20260114-093005");
    }

    #[test]
    fn test_perf_output_path() {
        let explicit = Path::new("out/summary.json");
        assert_eq!(perf_output_path(Some(explicit)), explicit);

        let default = perf_output_path(None);
        assert!(default.starts_with(PERF_OUTPUT_DIR));
        let name = default.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("perf_") && name.ends_with(".json"));
    }

    #[tokio::test]
    async fn test_write_json_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/perf.json");
        let summary = BenchmarkSummary::from_outcomes(
            "http://x/v1",
            "m",
            2,
            7,
            &mixed_outcomes(),
            Duration::from_secs(1),
        );

        summary.write_json(&path).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["target_url"], "http://x/v1");
        assert_eq!(value["success_count"], 3);
        assert_eq!(value["error_count"], 4);
        assert_eq!(value["latencies"].as_array().unwrap().len(), 3);

        let parsed: BenchmarkSummary = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.latencies, summary.latencies);
        assert_eq!(parsed.errors, summary.errors);
        assert_eq!(parsed.timestamp, summary.timestamp);
    }
}
