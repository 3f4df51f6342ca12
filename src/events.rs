//! Live multiplexed stream of delivery records across all running jobs.
//!
//! The stream has its own fixed tick, independent of each node's frequency. On
//! every tick it sends one extra reading for each live node and yields the
//! resulting records.

use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::delivery_log::DeliveryRecord;
use crate::error::SchedulerError;
use crate::registry::TaskRegistry;

/// Subscription source for live delivery events.
#[derive(Clone)]
pub struct EventStream {
    registry: Arc<TaskRegistry>,
    tick: Duration,
    shutdown: CancellationToken,
}

impl EventStream {
    pub fn new(registry: Arc<TaskRegistry>, tick: Duration) -> Self {
        Self {
            registry,
            tick,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that ends every open subscription when cancelled (server shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Open a new subscription starting from now.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NoActiveJobs` if no job is live at subscribe time.
    pub fn subscribe(
        &self,
    ) -> Result<impl Stream<Item = (String, DeliveryRecord)> + Send + 'static, SchedulerError> {
        if self.registry.live_count() == 0 {
            return Err(SchedulerError::NoActiveJobs);
        }

        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(async_stream::stream! {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                for status in registry.snapshot() {
                    if !status.is_live {
                        continue;
                    }
                    if let Some(record) = registry.send_out_of_band(&status.node_id).await {
                        debug!(node_id = %status.node_id, success = record.is_success(), "Event delivered");
                        yield (status.node_id, record);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NodeJobConfig;
    use crate::reading::ParamSpec;
    use crate::testing::{store_with, RecordingTransmitter};
    use futures_util::StreamExt;

    fn config(node_id: &str) -> NodeJobConfig {
        NodeJobConfig::new(
            node_id,
            3600,
            vec![
                ParamSpec::new("pm10", 10.0, 60.0),
                ParamSpec::new("pm25", 10.0, 60.0),
            ],
            "onem2m",
            "https",
        )
        .unwrap()
    }

    fn setup(nodes: &[&str]) -> (Arc<TaskRegistry>, Arc<RecordingTransmitter>) {
        let transmitter = Arc::new(RecordingTransmitter::new());
        let registry = Arc::new(TaskRegistry::new(
            Arc::new(store_with(nodes)),
            transmitter.clone(),
        ));
        (registry, transmitter)
    }

    #[tokio::test]
    async fn test_subscribe_without_jobs_fails() {
        let (registry, _transmitter) = setup(&["A"]);
        let events = EventStream::new(registry, Duration::from_secs(1));

        assert!(matches!(events.subscribe(), Err(SchedulerError::NoActiveJobs)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_multiplexes_live_nodes_on_its_own_tick() {
        let (registry, transmitter) = setup(&["A", "B"]);
        registry.start(vec![config("A"), config("B")]).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        // One scheduled send each; the hour-long frequency adds no more
        assert_eq!(transmitter.count("A"), 1);

        let events = EventStream::new(registry.clone(), Duration::from_secs(1));
        let stream = events.subscribe().unwrap();
        tokio::pin!(stream);

        let started = tokio::time::Instant::now();
        let mut seen = Vec::new();
        for _ in 0..4 {
            let (node_id, record) = stream.next().await.unwrap();
            assert_eq!(record.node_id, node_id);
            seen.push(node_id);
        }
        assert_eq!(seen, vec!["A", "B", "A", "B"]);
        assert!(tokio::time::Instant::now() - started >= Duration::from_secs(1));

        // Out-of-band readings use the job's frozen parameter specs
        let readings = transmitter.readings("A");
        assert_eq!(readings.len(), 3);
        assert!(readings.iter().all(|r| r.values.len() == 2));

        registry.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_nodes_drop_out_of_stream() {
        let (registry, transmitter) = setup(&["A", "B"]);
        registry.start(vec![config("A"), config("B")]).await;

        let events = EventStream::new(registry.clone(), Duration::from_secs(1));
        let stream = events.subscribe().unwrap();
        tokio::pin!(stream);

        assert_eq!(stream.next().await.unwrap().0, "A");
        assert_eq!(stream.next().await.unwrap().0, "B");

        registry.stop(vec!["A".to_string()]).await;
        let a_after_stop = transmitter.count("A");

        for _ in 0..3 {
            assert_eq!(stream.next().await.unwrap().0, "B");
        }
        assert_eq!(transmitter.count("A"), a_after_stop);

        registry.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_stream() {
        let (registry, _transmitter) = setup(&["A"]);
        registry.start(vec![config("A")]).await;

        let events = EventStream::new(registry.clone(), Duration::from_secs(1));
        let stream = events.subscribe().unwrap();
        tokio::pin!(stream);
        assert!(stream.next().await.is_some());

        events.shutdown_token().cancel();
        assert!(stream.next().await.is_none());

        registry.stop_all().await;
    }
}
