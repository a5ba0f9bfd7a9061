//! # Concurrency Tests
//!
//! Many distinct IDs and racing duplicates against the shared state store,
//! on the multi-threaded runtime.

#[cfg(test)]
mod tests {
    use crate::support::fast_config;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tunnel_gateway::service::Dispatch;
    use tunnel_gateway::{
        ClearnetExecutor, LoopbackConnector, SystemClock, TunnelConfig, TunnelService,
    };
    use tunnel_types::{Request, Response};

    const CLIENTS: usize = 150;

    /// Counts executions and answers 200 after a short yield
    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClearnetExecutor for CountingExecutor {
        async fn execute(&self, request: Request) -> Response {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Response {
                id: request.id,
                status_code: 200,
                status: "200 OK".into(),
                headers: Default::default(),
                body: Vec::new(),
                error: None,
            }
        }
    }

    async fn service(config: TunnelConfig) -> (TunnelService, Arc<CountingExecutor>, LoopbackConnector) {
        let connector = LoopbackConnector::default();
        let executor = Arc::new(CountingExecutor::default());
        let service = TunnelService::bootstrap_with(
            config,
            &connector,
            executor.clone(),
            Arc::new(SystemClock),
        )
        .await
        .unwrap();
        (service, executor, connector)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_ids_dispatched_concurrently() {
        let (service, executor, _) = service(fast_config()).await;
        let ingestor = service.ingestor();

        let dispatches = (0..CLIENTS).map(|i| {
            let ingestor = Arc::clone(&ingestor);
            tokio::spawn(async move {
                let request = Request::new(format!("client{}:{}", i, i), "GET", "http://origin/");
                matches!(ingestor.dispatch(request), Dispatch::Spawned(_))
            })
        });
        let spawned = join_all(dispatches)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(spawned, CLIENTS);

        // handles were detached above, so wait on the store
        tokio::time::timeout(Duration::from_secs(10), async {
            while service.store().counts().pending_responses < CLIENTS {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let ids: HashSet<_> = service.store().snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), CLIENTS);
        assert_eq!(service.store().counts().pending_requests, 0);
        assert_eq!(executor.calls.load(Ordering::SeqCst), CLIENTS);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_duplicates_execute_once() {
        let (service, executor, _) = service(fast_config()).await;
        let ingestor = service.ingestor();

        let attempts = (0..64).map(|_| {
            let ingestor = Arc::clone(&ingestor);
            tokio::spawn(async move {
                match ingestor.dispatch(Request::new("same:1", "GET", "http://origin/")) {
                    Dispatch::Spawned(handle) => {
                        handle.await.unwrap();
                        1
                    }
                    _ => 0,
                }
            })
        });
        let executed: usize = join_all(attempts).await.into_iter().map(|r| r.unwrap()).sum();

        assert_eq!(executed, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.store().snapshot().len(), 1);
        assert_eq!(service.store().stats().total_duplicates.load(Ordering::Relaxed), 63);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_clients_through_queue() {
        let mut config = fast_config();
        config.ingest.batch_size = 32;
        let (mut service, executor, connector) = service(config).await;
        let overlay = connector.overlay();
        let queue = service.queue().clone();

        // clients race for slots; collisions move them to the next one
        let submissions = (0..CLIENTS).map(|i| {
            let overlay = Arc::clone(&overlay);
            let queue = queue.clone();
            tokio::spawn(async move {
                overlay
                    .submit(&queue, &Request::new(format!("c{}:1", i), "GET", "http://origin/"))
                    .await
                    .unwrap()
            })
        });
        let slots: HashSet<u64> = join_all(submissions)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(slots, (0..CLIENTS as u64).collect());

        service.start();
        let public_key = service.keys().public.clone();
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let mut answered = 0;
                for i in 0..CLIENTS {
                    if overlay
                        .fetch_response(&public_key, &format!("c{}:1", i))
                        .await
                        .unwrap()
                        .is_some()
                    {
                        answered += 1;
                    }
                }
                if answered == CLIENTS {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(service.ingestor().cursor().await, CLIENTS as u64);
        assert_eq!(executor.calls.load(Ordering::SeqCst), CLIENTS);
        service.shutdown().await;
        assert!(service.store().snapshot().is_empty());
    }
}
