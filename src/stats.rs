use chrono::{Timelike, Utc};
use metriken::histogram::Histogram;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::{Instant, interval_at, timeout};

use crate::metrics::{
    ERRORS_CONNECTION, ERRORS_EXTRACTION, ERRORS_HTTP_4XX, ERRORS_HTTP_5XX, ERRORS_OTHER,
    ERRORS_PARSE, REQUEST_LATENCY, REQUESTS_FAILED, REQUESTS_INFLIGHT, REQUESTS_SENT,
    REQUESTS_SUCCESS, REQUESTS_TIMEOUT, RUNNING,
};

/// Print with timestamp prefix
macro_rules! output {
    () => {
        let now = chrono::Utc::now();
        println!("{}", now.to_rfc3339_opts(chrono::SecondsFormat::Millis, false));
    };
    ($($arg:tt)*) => {{
        let now = chrono::Utc::now();
        print!("{} ", now.to_rfc3339_opts(chrono::SecondsFormat::Millis, false));
        println!($($arg)*);
    }};
}

/// Linearly interpolated percentile of `values`.
///
/// `pct` is in `[0, 100]` (values outside are clamped). The input is not
/// reordered. An empty sample yields `0.0`.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pct = pct.clamp(0.0, 100.0);
    let k = (sorted.len() - 1) as f64 * (pct / 100.0);
    let f = k.floor() as usize;
    let c = (f + 1).min(sorted.len() - 1);

    if f == c {
        return sorted[f];
    }

    sorted[f] + (sorted[c] - sorted[f]) * (k - f as f64)
}

struct WindowSnapshot {
    requests_sent: u64,
    requests_success: u64,
    requests_failed: u64,
    requests_timeout: u64,
    errors_connection: u64,
    errors_4xx: u64,
    errors_5xx: u64,
    errors_parse: u64,
    errors_extraction: u64,
    errors_other: u64,
    request_histogram: Option<Histogram>,
}

impl WindowSnapshot {
    fn capture() -> Self {
        Self {
            requests_sent: REQUESTS_SENT.value(),
            requests_success: REQUESTS_SUCCESS.value(),
            requests_failed: REQUESTS_FAILED.value(),
            requests_timeout: REQUESTS_TIMEOUT.value(),
            errors_connection: ERRORS_CONNECTION.value(),
            errors_4xx: ERRORS_HTTP_4XX.value(),
            errors_5xx: ERRORS_HTTP_5XX.value(),
            errors_parse: ERRORS_PARSE.value(),
            errors_extraction: ERRORS_EXTRACTION.value(),
            errors_other: ERRORS_OTHER.value(),
            request_histogram: REQUEST_LATENCY.load(),
        }
    }
}

/// Prints a progress window every `interval` while [`RUNNING`] is set.
///
/// Figures are deltas against the previous window, so each line describes
/// only the traffic of the last interval.
pub async fn periodic_stats(interval_duration: Duration) {
    // Align the first tick to the next whole second
    let start = Instant::now() - Duration::from_nanos(Utc::now().nanosecond() as u64)
        + Duration::from_secs(1);
    let mut interval = interval_at(start, interval_duration);
    let mut window_id = 1;
    let mut previous = WindowSnapshot::capture();
    let mut previous_at = Instant::now();

    while RUNNING.load(Ordering::Relaxed) {
        // Use timeout to check RUNNING flag periodically
        if timeout(Duration::from_secs(1), interval.tick())
            .await
            .is_err()
        {
            continue;
        }
        if !RUNNING.load(Ordering::Relaxed) {
            break;
        }

        let current = WindowSnapshot::capture();
        let now = Instant::now();
        // The first window is shorter than the interval because of the alignment above
        let elapsed = now.duration_since(previous_at);

        let sent = current.requests_sent - previous.requests_sent;
        let success = current.requests_success - previous.requests_success;
        let failed = current.requests_failed - previous.requests_failed;
        let timed_out = current.requests_timeout - previous.requests_timeout;
        let responses = success + failed + timed_out;

        output!();
        output!("-----");
        output!("Window: {}", window_id);
        output!(
            "Requests/s: Sent: {:.2} In-flight: {}",
            per_second(sent, elapsed),
            REQUESTS_INFLIGHT.value()
        );

        let success_pct = if responses > 0 {
            100.0 * success as f64 / responses as f64
        } else {
            0.0
        };
        output!(
            "Responses/s: Total: {:.2} Ok: {:.2} Err: {:.2} Success: {:.2}%",
            per_second(responses, elapsed),
            per_second(success, elapsed),
            per_second(failed + timed_out, elapsed),
            success_pct
        );

        if failed > 0 || timed_out > 0 {
            output!(
                "Errors: Connection: {} 4xx: {} 5xx: {} Parse: {} Timeout: {} Other: {}",
                current.errors_connection - previous.errors_connection,
                current.errors_4xx - previous.errors_4xx,
                current.errors_5xx - previous.errors_5xx,
                current.errors_parse - previous.errors_parse,
                timed_out,
                current.errors_other - previous.errors_other
            );
        }

        let extraction = current.errors_extraction - previous.errors_extraction;
        if extraction > 0 {
            output!("Responses without text: {}", extraction);
        }

        let window_histogram = match (&current.request_histogram, &previous.request_histogram) {
            (Some(current), Some(previous)) => current.wrapping_sub(previous).ok(),
            (Some(current), None) => Some(current.clone()),
            _ => None,
        };
        if let Some(histogram) = window_histogram
            && let Ok(Some(percentiles)) = histogram.percentiles(&[50.0, 95.0, 99.0])
            && percentiles.len() >= 3
        {
            output!(
                "Request Latency (ms): p50: {} p95: {} p99: {}",
                percentiles[0].1.end() / 1_000_000,
                percentiles[1].1.end() / 1_000_000,
                percentiles[2].1.end() / 1_000_000
            );
        }

        previous = current;
        previous_at = now;
        window_id += 1;
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}
