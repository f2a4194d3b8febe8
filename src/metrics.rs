use metriken::{AtomicHistogram, Counter, Gauge, LazyCounter, LazyGauge, metric};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Failure category of a single request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Timeout,
    #[serde(rename = "http_4xx")]
    Http4xx,
    #[serde(rename = "http_5xx")]
    Http5xx,
    Parse,
    Extraction,
    Other,
}

impl ErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            400..=499 => ErrorKind::Http4xx,
            500..=599 => ErrorKind::Http5xx,
            _ => ErrorKind::Other,
        }
    }
}

// Set while a dispatch is in progress so background reporters know when to stop
pub static RUNNING: AtomicBool = AtomicBool::new(false);

#[metric(
    name = "requests",
    description = "Total number of requests",
    metadata = { status = "sent" }
)]
pub static REQUESTS_SENT: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "requests",
    description = "Requests answered with HTTP 200",
    metadata = { status = "success" }
)]
pub static REQUESTS_SUCCESS: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "requests",
    description = "Failed requests",
    metadata = { status = "failed" }
)]
pub static REQUESTS_FAILED: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "requests",
    description = "Timed out requests",
    metadata = { status = "timeout" }
)]
pub static REQUESTS_TIMEOUT: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "Connection errors",
    metadata = { "type" = "connection" }
)]
pub static ERRORS_CONNECTION: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "HTTP 4xx errors",
    metadata = { "type" = "http_4xx" }
)]
pub static ERRORS_HTTP_4XX: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "HTTP 5xx errors",
    metadata = { "type" = "http_5xx" }
)]
pub static ERRORS_HTTP_5XX: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "Unparseable response bodies",
    metadata = { "type" = "parse" }
)]
pub static ERRORS_PARSE: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "Responses with no recognizable text field",
    metadata = { "type" = "extraction" }
)]
pub static ERRORS_EXTRACTION: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "Other errors",
    metadata = { "type" = "other" }
)]
pub static ERRORS_OTHER: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "requests_inflight",
    description = "Current number of requests in flight"
)]
pub static REQUESTS_INFLIGHT: LazyGauge = LazyGauge::new(Gauge::default);

// Histogram parameters: (grouping_power=5, max_value_power=64)
#[metric(
    name = "request_latency",
    description = "Total request latency in nanoseconds",
    metadata = { unit = "nanoseconds" }
)]
pub static REQUEST_LATENCY: AtomicHistogram = AtomicHistogram::new(5, 64);

pub struct Metrics;

impl Metrics {
    pub fn record_request_sent() {
        REQUESTS_SENT.increment();
        REQUESTS_INFLIGHT.increment();
    }

    /// Records the end of a request. `status` is the HTTP status when one was
    /// received; `error` is the failure category, if any.
    pub fn record_request_complete(status: Option<u16>, error: Option<ErrorKind>) {
        REQUESTS_INFLIGHT.decrement();

        // HTTP 200 counts as a success even when the body yielded no text
        if status == Some(200) {
            REQUESTS_SUCCESS.increment();
            if error == Some(ErrorKind::Extraction) {
                ERRORS_EXTRACTION.increment();
            } else if error == Some(ErrorKind::Parse) {
                ERRORS_PARSE.increment();
            }
            return;
        }

        match error.unwrap_or(ErrorKind::Other) {
            ErrorKind::Timeout => {
                REQUESTS_TIMEOUT.increment();
                return;
            }
            ErrorKind::Connection => ERRORS_CONNECTION.increment(),
            ErrorKind::Http4xx => ERRORS_HTTP_4XX.increment(),
            ErrorKind::Http5xx => ERRORS_HTTP_5XX.increment(),
            ErrorKind::Parse => ERRORS_PARSE.increment(),
            ErrorKind::Extraction => ERRORS_EXTRACTION.increment(),
            ErrorKind::Other => ERRORS_OTHER.increment(),
        };
        REQUESTS_FAILED.increment();
    }

    pub fn record_latency(duration: Duration) {
        let _ = REQUEST_LATENCY.increment(duration.as_nanos() as u64);
    }
}
