//! End-to-end tests for the cascade
//!
//! These run the full topology on the tokio runtime with in-memory sinks
//! and drive it through `Pipeline::run` until every unit of work settles.

#[cfg(test)]
mod pipeline_tests {
    use crate::cascade::{Pipeline, RunExit};
    use crate::config::PipelineConfig;
    use crate::error::SinkError;
    use crate::health::{components, ComponentStatus, HealthRegistry};
    use crate::models::{Granularity, MetricAggregate, MetricSample, StreamKey};
    use crate::observability::{PipelineMetrics, StructuredLogger};
    use crate::reliability::RedeliveryPolicy;
    use crate::sink::{MemorySink, PersistenceSink, RetryPolicy, SinkFanout};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc};

    /// Persistence sink failing a given (granularity, timestamp) a fixed number of times
    struct FlakyPersistence {
        inner: MemorySink,
        fail_at: (Granularity, i64),
        remaining_failures: AtomicU32,
    }

    impl FlakyPersistence {
        fn new(granularity: Granularity, timestamp: i64, failures: u32) -> Self {
            Self {
                inner: MemorySink::new(),
                fail_at: (granularity, timestamp),
                remaining_failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl PersistenceSink for FlakyPersistence {
        async fn persist(&self, aggregate: &MetricAggregate) -> Result<(), SinkError> {
            if (aggregate.granularity, aggregate.timestamp) == self.fail_at
                && self
                    .remaining_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(SinkError::Persistence("injected failure".to_string()));
            }
            self.inner.persist(aggregate).await
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            sink: RetryPolicy::no_retry(Duration::from_secs(1)),
            redelivery: RedeliveryPolicy {
                max_attempts: 3,
                redelivery_delay_ms: 0,
            },
            ..Default::default()
        }
    }

    fn start(
        config: &PipelineConfig,
        persistence: Arc<dyn PersistenceSink>,
        notifications: Arc<MemorySink>,
    ) -> Pipeline {
        start_with_health(config, persistence, notifications, HealthRegistry::new())
    }

    fn start_with_health(
        config: &PipelineConfig,
        persistence: Arc<dyn PersistenceSink>,
        notifications: Arc<MemorySink>,
        health: HealthRegistry,
    ) -> Pipeline {
        let sinks = SinkFanout::new(
            persistence,
            notifications,
            config.persist_granularities.iter().copied(),
            config.sink.clone(),
        );
        Pipeline::start(
            config,
            Arc::new(sinks),
            PipelineMetrics::new(),
            StructuredLogger::new("test"),
            health,
        )
        .unwrap()
    }

    async fn drive(pipeline: &mut Pipeline, samples: Vec<MetricSample>) -> RunExit {
        let (tx, rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let feeder = tokio::spawn(async move {
            for sample in samples {
                tx.send(sample).await.unwrap();
            }
        });

        let exit = tokio::time::timeout(Duration::from_secs(10), pipeline.run(rx, shutdown_rx))
            .await
            .expect("pipeline did not drain");
        feeder.await.unwrap();
        exit
    }

    fn cpu() -> StreamKey {
        StreamKey::simple("acctA", "CPU")
    }

    fn at(ts: i64, value: f64) -> MetricSample {
        MetricSample::new(cpu(), ts, value)
    }

    #[tokio::test]
    async fn test_warmup_then_spike_flags_raw_once() {
        let mut config = config();
        config.engine.warmup_samples = 20;

        let notifications = Arc::new(MemorySink::new());
        let mut pipeline = start(&config, Arc::new(MemorySink::new()), notifications.clone());

        let mut values = vec![1.0; 30];
        values.extend([1.0, 1.0, 50.0, 1.0, 1.0]);
        let samples = values
            .iter()
            .enumerate()
            .map(|(i, v)| at(i as i64 * 1_000, *v))
            .collect();

        assert_eq!(drive(&mut pipeline, samples).await, RunExit::Drained);

        let raw: Vec<_> = notifications
            .notified()
            .await
            .into_iter()
            .filter(|a| a.granularity == Granularity::Raw)
            .collect();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].timestamp, 32_000);
        assert_eq!(raw[0].value, 50.0);
        assert_eq!(raw[0].severity.level(), 2);

        let stats = pipeline.shutdown(RunExit::Drained).await.unwrap();
        assert_eq!(stats.acked, 35);
    }

    #[tokio::test]
    async fn test_minute_forwards_only_after_period() {
        let config = config();
        let persistence = Arc::new(MemorySink::new());
        let mut pipeline = start(&config, persistence.clone(), Arc::new(MemorySink::new()));

        let samples = (0..=30).map(|i| at(i * 10_000, 1.0 + i as f64)).collect();
        drive(&mut pipeline, samples).await;

        let handle = pipeline.handle();
        let raw = handle.inspect(Granularity::Raw, &cpu()).await.unwrap().unwrap();
        let minute = handle
            .inspect(Granularity::Minute, &cpu())
            .await
            .unwrap()
            .unwrap();
        let hour = handle.inspect(Granularity::Hour, &cpu()).await.unwrap().unwrap();

        assert_eq!(raw.sample_count, 31);
        assert_eq!(minute.sample_count, 30);
        assert_eq!(minute.opened_at, 10_000);
        assert_eq!(minute.last_emitted_timestamp, Some(250_000));
        assert_eq!(hour.sample_count, 4);
        assert_eq!(hour.opened_at, 70_000);
        assert!(handle
            .inspect(Granularity::Day, &cpu())
            .await
            .unwrap()
            .is_none());

        // Only HOUR and coarser are persisted by default
        let persisted = persistence.persisted().await;
        let timestamps: Vec<i64> = persisted.iter().map(|a| a.timestamp).collect();
        assert!(persisted.iter().all(|a| a.granularity == Granularity::Hour));
        assert_eq!(timestamps, vec![70_000, 130_000, 190_000, 250_000]);
        assert!(timestamps
            .windows(2)
            .all(|w| w[1] - w[0] >= Granularity::Minute.period_ms()));

        pipeline.shutdown(RunExit::Drained).await.unwrap();
    }

    #[tokio::test]
    async fn test_hour_sink_failure_double_counts_finer_tiers() {
        let config = config();
        let persistence = Arc::new(FlakyPersistence::new(Granularity::Hour, 3_661_000, 1));
        let mut pipeline = start(&config, persistence.clone(), Arc::new(MemorySink::new()));

        let samples = vec![at(0, 1.0), at(1_000, 1.0), at(61_000, 1.0), at(3_661_000, 1.0)];
        assert_eq!(drive(&mut pipeline, samples).await, RunExit::Drained);

        let handle = pipeline.handle();
        let count = |g| {
            let handle = handle.clone();
            async move {
                handle
                    .inspect(g, &cpu())
                    .await
                    .unwrap()
                    .map(|s| s.sample_count)
            }
        };

        // The redelivered sample is folded twice wherever the first pass reached
        assert_eq!(count(Granularity::Raw).await, Some(5));
        assert_eq!(count(Granularity::Minute).await, Some(4));
        assert_eq!(count(Granularity::Hour).await, Some(3));
        assert_eq!(count(Granularity::Day).await, Some(1));
        assert_eq!(count(Granularity::Week).await, None);

        let persisted: Vec<(Granularity, i64)> = persistence
            .inner
            .persisted()
            .await
            .iter()
            .map(|a| (a.granularity, a.timestamp))
            .collect();
        assert_eq!(
            persisted,
            vec![
                (Granularity::Hour, 61_000),
                (Granularity::Hour, 3_661_000),
                (Granularity::Day, 3_661_000),
            ]
        );

        let stats = pipeline.shutdown(RunExit::Drained).await.unwrap();
        assert_eq!(stats.emitted, 4);
        assert_eq!(stats.acked, 4);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.redelivered, 1);
        assert_eq!(stats.dead_lettered, 0);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_redelivery_reaches_failed_tier_after_later_sample() {
        let mut config = config();
        config.redelivery.redelivery_delay_ms = 50;
        let persistence = Arc::new(FlakyPersistence::new(Granularity::Hour, 3_661_000, 1));
        let mut pipeline = start(&config, persistence.clone(), Arc::new(MemorySink::new()));

        // 3_662_000 moves the raw window past the failed unit before it comes back
        let samples = vec![
            at(0, 1.0),
            at(1_000, 1.0),
            at(61_000, 1.0),
            at(3_661_000, 1.0),
            at(3_662_000, 1.0),
        ];
        assert_eq!(drive(&mut pipeline, samples).await, RunExit::Drained);

        let handle = pipeline.handle();
        let state = |g| {
            let handle = handle.clone();
            async move { handle.inspect(g, &cpu()).await.unwrap() }
        };

        let raw = state(Granularity::Raw).await.unwrap();
        let minute = state(Granularity::Minute).await.unwrap();
        let hour = state(Granularity::Hour).await.unwrap();
        let day = state(Granularity::Day).await.unwrap();
        assert_eq!(raw.sample_count, 6);
        assert_eq!(raw.last_emitted_timestamp, Some(3_662_000));
        assert_eq!(minute.sample_count, 5);
        assert_eq!(minute.last_emitted_timestamp, Some(3_661_000));
        assert_eq!(hour.sample_count, 3);
        assert_eq!(hour.last_emitted_timestamp, Some(3_661_000));
        assert_eq!(day.sample_count, 1);

        let persisted: Vec<(Granularity, i64)> = persistence
            .inner
            .persisted()
            .await
            .iter()
            .map(|a| (a.granularity, a.timestamp))
            .collect();
        assert_eq!(
            persisted,
            vec![
                (Granularity::Hour, 61_000),
                (Granularity::Hour, 3_661_000),
                (Granularity::Day, 3_661_000),
            ]
        );

        let stats = pipeline.shutdown(RunExit::Drained).await.unwrap();
        assert_eq!(stats.emitted, 5);
        assert_eq!(stats.acked, 5);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.redelivered, 1);
        assert_eq!(stats.dead_lettered, 0);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_sink_failure_degrades_health() {
        let mut config = config();
        config.redelivery.max_attempts = 1;
        let registry = HealthRegistry::new();
        registry.register(components::TOPOLOGY).await;
        let persistence = Arc::new(FlakyPersistence::new(Granularity::Hour, 61_000, u32::MAX));
        let mut pipeline = start_with_health(
            &config,
            persistence,
            Arc::new(MemorySink::new()),
            registry.clone(),
        );

        let samples = vec![at(0, 1.0), at(1_000, 1.0), at(61_000, 1.0)];
        assert_eq!(drive(&mut pipeline, samples).await, RunExit::Drained);

        let report = registry.health().await;
        assert_eq!(report.status, ComponentStatus::Degraded);
        let sink = &report.components[components::PERSISTENCE_SINK];
        assert_eq!(sink.status, ComponentStatus::Degraded);
        assert!(sink
            .message
            .as_deref()
            .unwrap()
            .contains("injected failure"));
        assert_eq!(
            report.components[components::TOPOLOGY].status,
            ComponentStatus::Healthy
        );

        let stats = pipeline.shutdown(RunExit::Drained).await.unwrap();
        assert_eq!(stats.dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_persistent_failure_dead_letters_unit() {
        let mut config = config();
        config.redelivery.max_attempts = 2;
        let persistence = Arc::new(FlakyPersistence::new(Granularity::Hour, 61_000, u32::MAX));
        let mut pipeline = start(&config, persistence, Arc::new(MemorySink::new()));

        let samples = vec![at(0, 1.0), at(1_000, 1.0), at(61_000, 1.0)];
        assert_eq!(drive(&mut pipeline, samples).await, RunExit::Drained);

        let hour = pipeline
            .handle()
            .inspect(Granularity::Hour, &cpu())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hour.sample_count, 2);
        assert_eq!(hour.last_emitted_timestamp, None);

        let stats = pipeline.shutdown(RunExit::Drained).await.unwrap();
        assert_eq!(stats.emitted, 3);
        assert_eq!(stats.acked, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.redelivered, 1);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_invalid_sample_acked_without_state() {
        let config = config();
        let mut pipeline = start(
            &config,
            Arc::new(MemorySink::new()),
            Arc::new(MemorySink::new()),
        );

        let nan = MetricSample::new(StreamKey::simple("acctA", "MEM"), 0, f64::NAN);
        drive(&mut pipeline, vec![nan, at(0, 1.0)]).await;

        let census = pipeline.handle().census().await.unwrap();
        assert_eq!(census[0].granularity, Granularity::Raw);
        assert_eq!(census[0].states, 1);

        let stats = pipeline.shutdown(RunExit::Drained).await.unwrap();
        assert_eq!(stats.acked, 2);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_keys_spread_over_workers_keep_own_state() {
        let config = config();
        let mut pipeline = start(
            &config,
            Arc::new(MemorySink::new()),
            Arc::new(MemorySink::new()),
        );

        let keys: Vec<StreamKey> = (0..5)
            .map(|i| StreamKey::new("acctA", "CPU", [("RESOURCE_ID", format!("i-{}", i))]))
            .collect();
        let samples = keys
            .iter()
            .flat_map(|k| {
                [
                    MetricSample::new(k.clone(), 0, 1.0),
                    MetricSample::new(k.clone(), 1_000, 2.0),
                ]
            })
            .collect();
        drive(&mut pipeline, samples).await;

        let handle = pipeline.handle();
        for key in &keys {
            let raw = handle.inspect(Granularity::Raw, key).await.unwrap().unwrap();
            assert_eq!(raw.sample_count, 2);
            assert_eq!(raw.min, 1.0);
            assert_eq!(raw.max, 2.0);
        }
        assert!(handle
            .inspect(Granularity::Raw, &StreamKey::simple("acctB", "CPU"))
            .await
            .unwrap()
            .is_none());

        let census = handle.census().await.unwrap();
        let states: Vec<usize> = census.iter().map(|c| c.states).collect();
        let workers: Vec<usize> = census.iter().map(|c| c.workers).collect();
        assert_eq!(states, vec![5, 5, 0, 0, 0, 0]);
        assert_eq!(workers, vec![8, 8, 1, 1, 1, 1]);

        pipeline.shutdown(RunExit::Drained).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_signal_interrupts_run() {
        let config = config();
        let mut pipeline = start(
            &config,
            Arc::new(MemorySink::new()),
            Arc::new(MemorySink::new()),
        );

        let (_tx, rx) = mpsc::channel::<MetricSample>(1);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        shutdown_tx.send(()).unwrap();

        let exit = pipeline.run(rx, shutdown_rx).await;
        assert_eq!(exit, RunExit::Interrupted);
        pipeline.shutdown(exit).await.unwrap();
    }
}
