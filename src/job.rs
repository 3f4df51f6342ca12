//! Per-node periodic send loop.
//!
//! A job cycles `generate -> send -> sleep(frequency)` until its cancellation
//! token fires. The first reading goes out immediately. Cancellation is checked
//! before each reading and races the sleep, so a stop waits at most for the
//! send already in flight.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ValidationError;
use crate::reading::{ParamSpec, ReadingGenerator};
use crate::transmitter::Transmitter;

/// Frozen configuration of one job, taken at start time.
///
/// Only constructible through [`NodeJobConfig::new`], so every instance has a
/// non-empty node id, a positive frequency and ordered parameter bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeJobConfig {
    node_id: String,
    parameters: Vec<ParamSpec>,
    frequency_secs: u64,
    platform: String,
    protocol: String,
}

impl NodeJobConfig {
    pub fn new(
        node_id: impl Into<String>,
        frequency_secs: i64,
        parameters: Vec<ParamSpec>,
        platform: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let node_id = node_id.into();
        if node_id.trim().is_empty() {
            return Err(ValidationError::EmptyNodeId);
        }

        if frequency_secs <= 0 {
            return Err(ValidationError::NonPositiveFrequency {
                node_id,
                frequency: frequency_secs,
            });
        }

        for spec in &parameters {
            if !spec.min.is_finite() || !spec.max.is_finite() {
                return Err(ValidationError::NonFiniteBound {
                    node_id,
                    name: spec.name.clone(),
                });
            }
            if spec.min > spec.max {
                return Err(ValidationError::InvertedRange {
                    node_id,
                    name: spec.name.clone(),
                    min: spec.min,
                    max: spec.max,
                });
            }
        }

        Ok(Self {
            node_id,
            parameters,
            frequency_secs: frequency_secs as u64,
            platform: platform.into(),
            protocol: protocol.into(),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn parameters(&self) -> &[ParamSpec] {
        &self.parameters
    }

    pub fn frequency_secs(&self) -> u64 {
        self.frequency_secs
    }

    pub fn frequency(&self) -> Duration {
        Duration::from_secs(self.frequency_secs)
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }
}

/// Lifecycle of a job loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Running,
    CancelRequested,
    Stopped,
}

/// Summary returned by a job loop when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobExit {
    /// Readings sent, successful or not
    pub cycles: u64,

    /// Sends that produced a failure record
    pub failures: u64,
}

/// Everything a job loop needs; consumed by [`JobContext::run`].
pub struct JobContext {
    pub config: Arc<NodeJobConfig>,
    pub generator: ReadingGenerator,
    pub transmitter: Arc<dyn Transmitter>,
    pub cancel: CancellationToken,
    pub state: watch::Sender<JobState>,
}

impl JobContext {
    pub async fn run(self) -> JobExit {
        let node_id = self.config.node_id();
        let period = self.config.frequency();
        let mut exit = JobExit::default();

        self.state.send_replace(JobState::Running);
        info!(
            node_id = %node_id,
            frequency_secs = self.config.frequency_secs(),
            parameters = self.config.parameters().len(),
            "Job started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let reading = self.generator.generate(self.config.parameters());
            let record = self.transmitter.send(node_id, &reading).await;
            exit.cycles += 1;
            if !record.is_success() {
                // Delivery failure is not job failure; keep the cadence
                exit.failures += 1;
            }
            debug!(node_id = %node_id, cycle = exit.cycles, success = record.is_success(), "Job cycle complete");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
        }

        self.state.send_replace(JobState::Stopped);
        info!(
            node_id = %node_id,
            cycles = exit.cycles,
            failures = exit.failures,
            "Job stopped"
        );
        exit
    }
}
