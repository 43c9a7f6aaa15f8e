//! # Integration Tests
//!
//! End-to-end tests driving a real `Client` against an in-memory backend.
//!
//! Covers:
//! - Contract snapshot tests
//! - Delivery scenarios (single event, saturated executor, endless topology changes)
//! - Drain, flush and close behaviour

#[cfg(test)]
mod contract_tests {
    use contracts::{Message, Track};

    #[test]
    fn test_batch_body_decodes_into_messages() {
        use dispatcher::{BatchEncoder, JsonEnvelope, QueuedMessage};

        let messages = vec![
            Message::from(Track {
                user_id: "u1".to_string(),
                event: "Signed Up".to_string(),
                ..Default::default()
            }),
            Message::from(contracts::Identify {
                user_id: "u2".to_string(),
                ..Default::default()
            }),
        ];
        let queued: Vec<QueuedMessage> = messages
            .iter()
            .cloned()
            .map(|m| QueuedMessage::encode(m, usize::MAX).unwrap())
            .collect();
        let body = JsonEnvelope.encode(&queued).unwrap();

        #[derive(serde::Deserialize)]
        struct Envelope {
            batch: Vec<Message>,
        }
        let envelope: Envelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.batch, messages);
    }

    #[test]
    fn test_track_wire_shape() {
        let message = Message::from(Track {
            user_id: "u1".to_string(),
            event: "Signed Up".to_string(),
            ..Default::default()
        });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "track");
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["event"], "Signed Up");
    }

    #[test]
    fn test_settings_from_toml() {
        let settings = config_loader::ConfigLoader::load_from_str(
            "write_key = \"k\"\n[engine]\nendpoint = \"https://example.com\"\n",
            config_loader::ConfigFormat::Toml,
        )
        .unwrap();
        assert_eq!(settings.engine.batch_size, 250);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use contracts::{EngineConfig, Message, Track};
    use dispatcher::shard::shard_for;
    use dispatcher::{
        Client, ClusterInfo, DispatcherError, EngineState, Observer, Transport, TransportError,
        UploadRequest, UploadResponse,
    };

    /// In-memory data plane shared between the test and the client
    #[derive(Clone)]
    struct MockBackend {
        state: Arc<BackendState>,
    }

    struct BackendState {
        uploads: Mutex<Vec<UploadRequest>>,
        script: Mutex<VecDeque<u16>>,
        fallback_status: u16,
        delay: Duration,
        node_count: usize,
        cluster_calls: AtomicUsize,
        /// Shard whose next upload is answered with 451
        change_on: Mutex<Option<usize>>,
    }

    impl MockBackend {
        fn new(fallback_status: u16, node_count: usize) -> Self {
            Self::build(fallback_status, node_count, Duration::ZERO, [])
        }

        fn build(
            fallback_status: u16,
            node_count: usize,
            delay: Duration,
            script: impl IntoIterator<Item = u16>,
        ) -> Self {
            Self {
                state: Arc::new(BackendState {
                    uploads: Mutex::new(Vec::new()),
                    script: Mutex::new(script.into_iter().collect()),
                    fallback_status,
                    delay,
                    node_count,
                    cluster_calls: AtomicUsize::new(0),
                    change_on: Mutex::new(None),
                }),
            }
        }

        /// Answer the next upload targeting `shard` with a topology change
        fn change_topology_once_on(&self, shard: usize) {
            *self.state.change_on.lock().unwrap() = Some(shard);
        }

        fn uploads(&self) -> Vec<UploadRequest> {
            self.state.uploads.lock().unwrap().clone()
        }

        /// Message ids of every upload, in order
        fn uploaded_batches(&self) -> Vec<Vec<String>> {
            self.uploads()
                .iter()
                .map(|request| {
                    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
                    body["batch"]
                        .as_array()
                        .unwrap()
                        .iter()
                        .map(|m| m["messageId"].as_str().unwrap().to_string())
                        .collect()
                })
                .collect()
        }

        fn cluster_calls(&self) -> usize {
            self.state.cluster_calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for MockBackend {
        async fn upload(&self, request: UploadRequest) -> Result<UploadResponse, TransportError> {
            if !self.state.delay.is_zero() {
                tokio::time::sleep(self.state.delay).await;
            }
            let target = request.target.map(|target| target.index);
            self.state.uploads.lock().unwrap().push(request);

            let mut change_on = self.state.change_on.lock().unwrap();
            if target.is_some() && *change_on == target {
                *change_on = None;
                return Ok(UploadResponse {
                    status: 451,
                    body: String::new(),
                });
            }
            drop(change_on);

            let status = self
                .state
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.state.fallback_status);
            Ok(UploadResponse {
                status,
                body: String::new(),
            })
        }

        async fn cluster_info(&self) -> Result<ClusterInfo, TransportError> {
            self.state.cluster_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ClusterInfo {
                node_count: self.state.node_count,
            })
        }
    }

    #[derive(Default)]
    struct Outcomes {
        successes: Mutex<Vec<String>>,
        failures: Mutex<Vec<(String, String)>>,
    }

    impl Outcomes {
        fn successes(&self) -> Vec<String> {
            self.successes.lock().unwrap().clone()
        }

        fn failures(&self) -> Vec<(String, String)> {
            self.failures.lock().unwrap().clone()
        }

        fn total(&self) -> usize {
            self.successes.lock().unwrap().len() + self.failures.lock().unwrap().len()
        }
    }

    impl Observer for Outcomes {
        fn on_success(&self, message: &Message) {
            self.successes
                .lock()
                .unwrap()
                .push(message.message_id().to_string());
        }

        fn on_failure(&self, message: &Message, error: &DispatcherError) {
            self.failures
                .lock()
                .unwrap()
                .push((message.message_id().to_string(), error.reason().to_string()));
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            disable_gzip: true,
            flush_interval_ms: 60_000,
            ..EngineConfig::with_endpoint("http://backend.test")
        }
    }

    fn start(
        config: EngineConfig,
        backend: &MockBackend,
    ) -> (Client<MockBackend>, Arc<Outcomes>) {
        let outcomes = Arc::new(Outcomes::default());
        let client = Client::builder("write-key", config)
            .observer(outcomes.clone())
            .retry_after(|_: u32| Duration::ZERO)
            .refresh_delay(Duration::from_millis(1))
            .build_with_transport(backend.clone())
            .unwrap();
        (client, outcomes)
    }

    fn track(id: &str, user: &str, anonymous: &str) -> Track {
        Track {
            message_id: id.to_string(),
            user_id: user.to_string(),
            anonymous_id: anonymous.to_string(),
            event: "Item Purchased".to_string(),
            ..Default::default()
        }
    }

    async fn eventually(condition: impl Fn() -> bool) {
        let wait = async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        timeout(wait).await;
    }

    async fn timeout<F: Future>(future: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(5), future)
            .await
            .expect("condition not reached in time")
    }

    /// Single event, batch size 1: one request of one message, one success
    #[tokio::test]
    async fn test_single_event_is_delivered() {
        let backend = MockBackend::new(200, 1);
        let (client, outcomes) = start(
            EngineConfig {
                batch_size: 1,
                ..config()
            },
            &backend,
        );

        client.enqueue(track("m1", "u1", "")).await.unwrap();
        eventually(|| outcomes.total() == 1).await;
        client.close().await.unwrap();

        assert_eq!(outcomes.successes(), vec!["m1".to_string()]);
        assert!(outcomes.failures().is_empty());
        assert_eq!(backend.uploaded_batches(), vec![vec!["m1".to_string()]]);

        let target = backend.uploads()[0].target.unwrap();
        assert_eq!((target.index, target.node_count), (0, 1));
        assert!(backend.cluster_calls() >= 1);
    }

    /// One upload slot held by a slow request: the next batch fails with Capacity
    #[tokio::test]
    async fn test_saturated_executor_rejects_batch() {
        let backend = MockBackend::build(200, 1, Duration::from_millis(10), []);
        let (client, outcomes) = start(
            EngineConfig {
                batch_size: 1,
                max_concurrent_requests: 1,
                no_proxy_support: true,
                ..config()
            },
            &backend,
        );

        client.enqueue(track("m1", "u1", "")).await.unwrap();
        client.enqueue(track("m2", "u2", "")).await.unwrap();
        client.close().await.unwrap();

        assert_eq!(outcomes.successes(), vec!["m1".to_string()]);
        assert_eq!(
            outcomes.failures(),
            vec![("m2".to_string(), "capacity".to_string())]
        );
        assert_eq!(backend.uploads().len(), 1);
        assert_eq!(client.metrics().rejected, 1);
        assert_eq!(backend.cluster_calls(), 0);
    }

    /// Backend always answers 451: every message fails after the round ceiling
    #[tokio::test]
    async fn test_endless_topology_change_fails_messages() {
        let backend = MockBackend::new(451, 1);
        let (client, outcomes) = start(
            EngineConfig {
                batch_size: 2,
                topology_backoff_step_ms: 1,
                topology_backoff_max_ms: 2,
                ..config()
            },
            &backend,
        );

        client.enqueue(track("m1", "u1", "")).await.unwrap();
        client.enqueue(track("m2", "u2", "")).await.unwrap();
        eventually(|| outcomes.total() == 2).await;
        client.close().await.unwrap();

        assert!(outcomes.successes().is_empty());
        let failures = outcomes.failures();
        assert_eq!(failures.len(), 2);
        assert!(failures
            .iter()
            .all(|(_, reason)| reason == "topology_changed"));

        // one refresh at start-up plus one per round
        assert!(client.refresh_count() >= 10, "refreshes: {}", client.refresh_count());
        assert!(backend.cluster_calls() >= 10);
        assert_eq!(client.metrics().topology_changes, 10);
    }

    /// After a topology change only the unacknowledged shard is re-sent
    #[tokio::test]
    async fn test_reroute_skips_acknowledged_shard() {
        let node_count = std::num::NonZeroUsize::new(2).unwrap();
        let user_on = |shard: usize| {
            (0..)
                .map(|i| format!("user-{i}"))
                .find(|user| shard_for(user, "anon", node_count) == shard)
                .unwrap()
        };
        let first = user_on(0);
        let second = user_on(1);

        let backend = MockBackend::new(200, 2);
        backend.change_topology_once_on(1);
        let (client, outcomes) = start(
            EngineConfig {
                batch_size: 2,
                ..config()
            },
            &backend,
        );
        eventually(|| client.node_count().is_some()).await;

        client.enqueue(track("m1", &first, "anon")).await.unwrap();
        client.enqueue(track("m2", &second, "anon")).await.unwrap();
        eventually(|| outcomes.total() == 2).await;
        client.close().await.unwrap();

        let sent = |id: &str| {
            backend
                .uploaded_batches()
                .iter()
                .flatten()
                .filter(|m| m.as_str() == id)
                .count()
        };
        assert_eq!(sent("m1"), 1);
        assert_eq!(sent("m2"), 2);
        assert_eq!(backend.uploads().len(), 3);

        let mut successes = outcomes.successes();
        successes.sort();
        assert_eq!(successes, vec!["m1".to_string(), "m2".to_string()]);
        assert_eq!(client.metrics().topology_changes, 1);
    }

    /// Retryable statuses followed by success count as retries
    #[tokio::test]
    async fn test_retry_then_success() {
        let backend = MockBackend::build(200, 1, Duration::ZERO, [500, 503]);
        let (client, outcomes) = start(
            EngineConfig {
                batch_size: 1,
                no_proxy_support: true,
                ..config()
            },
            &backend,
        );

        client.enqueue(track("m1", "u1", "")).await.unwrap();
        eventually(|| outcomes.total() == 1).await;
        client.close().await.unwrap();

        assert_eq!(outcomes.successes(), vec!["m1".to_string()]);
        assert_eq!(backend.uploads().len(), 3);
        assert_eq!(client.metrics().retries, 2);
    }

    /// Close drains a partial batch through a final flush
    #[tokio::test]
    async fn test_close_drains_partial_batch() {
        let backend = MockBackend::new(200, 1);
        let (client, outcomes) = start(config(), &backend);

        for i in 0..5 {
            client
                .enqueue(track(&format!("m{i}"), &format!("u{i}"), ""))
                .await
                .unwrap();
        }
        assert!(outcomes.successes().is_empty());

        timeout(client.close()).await.unwrap();

        assert_eq!(client.state(), EngineState::Stopped);
        assert_eq!(outcomes.successes().len(), 5);
        assert_eq!(backend.uploads().len(), 1);
        assert_eq!(client.metrics().outstanding(), 0);
    }

    /// The flush timer ships a partial batch without a close
    #[tokio::test]
    async fn test_flush_interval_ships_partial_batch() {
        let backend = MockBackend::new(200, 1);
        let (client, outcomes) = start(
            EngineConfig {
                flush_interval_ms: 20,
                ..config()
            },
            &backend,
        );

        for i in 0..3 {
            client
                .enqueue(track(&format!("m{i}"), &format!("u{i}"), ""))
                .await
                .unwrap();
        }
        eventually(|| outcomes.successes().len() == 3).await;
        assert_eq!(client.state(), EngineState::Running);

        client.close().await.unwrap();
        assert_eq!(backend.uploads().len(), 1);
    }

    /// Second close and late enqueue both fail fast with Closed
    #[tokio::test]
    async fn test_close_is_terminal() {
        let backend = MockBackend::new(200, 1);
        let (client, outcomes) = start(config(), &backend);

        client.close().await.unwrap();
        assert!(matches!(client.close().await, Err(DispatcherError::Closed)));
        assert!(matches!(
            client.enqueue(track("late", "u1", "")).await,
            Err(DispatcherError::Closed)
        ));

        assert!(backend.uploads().is_empty());
        assert_eq!(outcomes.total(), 0);
    }

    /// Invalid events are refused at admission and never reach the backend
    #[tokio::test]
    async fn test_invalid_event_rejected_at_admission() {
        let backend = MockBackend::new(200, 1);
        let (client, outcomes) = start(config(), &backend);

        let result = client.enqueue(track("m1", "", "")).await;
        assert!(matches!(result, Err(DispatcherError::Validation(_))));

        client.close().await.unwrap();
        assert!(backend.uploads().is_empty());
        assert_eq!(outcomes.total(), 0);
    }

    /// Settings loaded from a config file drive a working client
    #[tokio::test]
    async fn test_client_from_loaded_settings() {
        let settings = config_loader::ConfigLoader::load_from_str(
            r#"{
                "write_key": "k",
                "engine": {
                    "endpoint": "http://backend.test",
                    "batch_size": 1,
                    "disable_gzip": true,
                    "no_proxy_support": true
                }
            }"#,
            config_loader::ConfigFormat::Json,
        )
        .unwrap();

        let backend = MockBackend::new(200, 1);
        let outcomes = Arc::new(Outcomes::default());
        let client = Client::builder(settings.write_key, settings.engine)
            .observer(outcomes.clone())
            .build_with_transport(backend.clone())
            .unwrap();

        client.enqueue(track("m1", "u1", "")).await.unwrap();
        client.close().await.unwrap();

        assert_eq!(outcomes.successes(), vec!["m1".to_string()]);
        assert!(backend.uploads()[0].target.is_none());
    }
}
