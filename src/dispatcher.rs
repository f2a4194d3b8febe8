use anyhow::Result;
use log::{debug, error};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};

use crate::client::{ChatClient, RequestOutcome, RequestParams};
use crate::metrics::Metrics;

/// Runs a batch of requests against one endpoint with at most `concurrency`
/// of them in flight.
///
/// Each request runs in its own task and waits for a semaphore permit
/// before sending. Finished outcomes are sent over a channel to a single
/// collector task, which is the only owner of the result set.
pub struct ConcurrentDispatcher {
    client: Arc<ChatClient>,
    concurrency: usize,
}

impl ConcurrentDispatcher {
    pub fn new(client: Arc<ChatClient>, concurrency: usize) -> Result<Self> {
        anyhow::ensure!(concurrency >= 1, "concurrency must be at least 1");
        Ok(Self {
            client,
            concurrency,
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Issues `total_requests` requests built by `request_factory(i)` and
    /// waits for all of them.
    ///
    /// Outcomes come back in completion order. Failed requests are part of
    /// the result; the dispatch itself never fails because of them.
    pub async fn run<F>(&self, total_requests: usize, request_factory: F) -> Vec<RequestOutcome>
    where
        F: Fn(usize) -> RequestParams,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::channel::<RequestOutcome>(self.concurrency.max(16));

        let collector = tokio::spawn(async move {
            let mut outcomes = Vec::with_capacity(total_requests);
            while let Some(outcome) = rx.recv().await {
                outcomes.push(outcome);
            }
            outcomes
        });

        let mut handles = Vec::with_capacity(total_requests);
        for idx in 0..total_requests {
            let params = request_factory(idx);
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("semaphore should never be closed");

                Metrics::record_request_sent();
                let outcome = client.send(&params).await;
                Metrics::record_latency(Duration::from_secs_f64(outcome.latency_ms / 1000.0));
                Metrics::record_request_complete(outcome.status, outcome.error_kind);

                match &outcome.error {
                    Some(e) => debug!("Request {} failed after {:.1}ms: {}", idx, outcome.latency_ms, e),
                    None => debug!("Request {} completed in {:.1}ms", idx, outcome.latency_ms),
                }

                if tx.send(outcome).await.is_err() {
                    error!("Outcome collector stopped before request {} finished", idx);
                }
            });
            handles.push(handle);
        }

        // The collector finishes once every task has dropped its sender
        drop(tx);

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Request task failed: {}", e);
            }
        }

        match collector.await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                error!("Outcome collector failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConfig, Message};
    use crate::testing::{StubBehavior, spawn_stub};
    use std::time::Instant;

    fn client(pool_size: usize) -> Arc<ChatClient> {
        Arc::new(ChatClient::new(ClientConfig { pool_size }).unwrap())
    }

    fn factory(api_url: String) -> impl Fn(usize) -> RequestParams {
        move |idx| RequestParams {
            endpoint_url: api_url.clone(),
            model: "stub-model".to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: format!("request {}", idx),
            }],
            temperature: 0.0,
            max_tokens: 8,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(ConcurrentDispatcher::new(client(1), 0).is_err());
    }

    #[tokio::test]
    async fn test_zero_requests() {
        let stub = spawn_stub(StubBehavior::ok()).await;
        let dispatcher = ConcurrentDispatcher::new(client(1), 4).unwrap();
        let outcomes = dispatcher.run(0, factory(stub.api_url())).await;
        assert!(outcomes.is_empty());
        assert_eq!(stub.hits(), 0);
    }

    #[tokio::test]
    async fn test_sequential_when_concurrency_is_one() {
        let stub = spawn_stub(StubBehavior::ok().with_delay(Duration::from_millis(50))).await;
        let dispatcher = ConcurrentDispatcher::new(client(1), 1).unwrap();

        let started = Instant::now();
        let outcomes = dispatcher.run(3, factory(stub.api_url())).await;
        let elapsed = started.elapsed();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.status == Some(200)));
        for outcome in &outcomes {
            assert!(outcome.latency_ms >= 49.0, "latency {}", outcome.latency_ms);
            assert!(outcome.latency_ms < 500.0, "latency {}", outcome.latency_ms);
        }
        assert!(elapsed >= Duration::from_millis(150), "elapsed {:?}", elapsed);
        assert_eq!(stub.max_inflight(), 1);
    }

    #[tokio::test]
    async fn test_parallel_within_cap() {
        let stub = spawn_stub(StubBehavior::ok().with_delay(Duration::from_millis(50))).await;
        let dispatcher = ConcurrentDispatcher::new(client(3), 3).unwrap();

        let started = Instant::now();
        let outcomes = dispatcher.run(3, factory(stub.api_url())).await;
        let elapsed = started.elapsed();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.status == Some(200)));
        assert!(elapsed < Duration::from_millis(145), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_inflight_never_exceeds_cap() {
        let stub = spawn_stub(StubBehavior::ok().with_delay(Duration::from_millis(20))).await;
        let dispatcher = ConcurrentDispatcher::new(client(4), 4).unwrap();

        let outcomes = dispatcher.run(20, factory(stub.api_url())).await;

        assert_eq!(outcomes.len(), 20);
        assert_eq!(stub.hits(), 20);
        assert!(stub.max_inflight() <= 4, "max in flight {}", stub.max_inflight());
        assert!(stub.max_inflight() >= 2, "max in flight {}", stub.max_inflight());
    }

    #[tokio::test]
    async fn test_failures_are_collected() {
        let stub = spawn_stub(StubBehavior::status(503)).await;
        let dispatcher = ConcurrentDispatcher::new(client(2), 2).unwrap();

        let outcomes = dispatcher.run(5, factory(stub.api_url())).await;

        assert_eq!(outcomes.len(), 5);
        assert!(outcomes.iter().all(|o| o.status == Some(503) && o.error.is_some()));
    }

    #[tokio::test]
    async fn test_factory_called_for_every_index() {
        let stub = spawn_stub(StubBehavior::ok()).await;
        let dispatcher = ConcurrentDispatcher::new(client(2), 2).unwrap();

        dispatcher.run(4, factory(stub.api_url())).await;

        let mut contents: Vec<String> = stub
            .requests()
            .iter()
            .map(|body| body["messages"][0]["content"].as_str().unwrap().to_string())
            .collect();
        contents.sort();
        assert_eq!(
            contents,
            vec!["request 0", "request 1", "request 2", "request 3"]
        );
    }
}
