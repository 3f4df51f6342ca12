//! Task registry: owns the set of running per-node jobs.
//!
//! Each node identity has a slot guarded by its own async mutex. Registering
//! or removing a node's job happens entirely under that slot's lock, so at most
//! one live job exists per node while unrelated nodes never contend. Slots are
//! never removed from the table; a waiter holding an old slot therefore always
//! sees the current state.
//!
//! Read-only [`JobView`]s are kept beside the slots so that [`TaskRegistry::snapshot`]
//! never waits on a slot lock or a job loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::delivery_log::DeliveryRecord;
use crate::error::{SchedulerError, StoreError};
use crate::job::{JobContext, JobExit, JobState, NodeJobConfig};
use crate::reading::{ParamSpec, ReadingGenerator};
use crate::store::{NodeStore, ServiceState};
use crate::transmitter::Transmitter;

type Slot = Arc<Mutex<Option<JobHandle>>>;

/// Runtime record of one job. Owned by its slot; never cloned.
struct JobHandle {
    run_id: Uuid,
    config: Arc<NodeJobConfig>,
    cancel: CancellationToken,
    task: JoinHandle<JobExit>,
}

impl JobHandle {
    fn is_live(&self) -> bool {
        !self.task.is_finished() && !self.cancel.is_cancelled()
    }
}

/// Lock-free view of a job for snapshots.
#[derive(Clone)]
struct JobView {
    run_id: Uuid,
    config: Arc<NodeJobConfig>,
    cancel: CancellationToken,
    state: watch::Receiver<JobState>,
    started_at: DateTime<Utc>,
}

impl JobView {
    fn state(&self) -> JobState {
        // A closed channel means the loop is gone, even if it died mid-cycle
        if self.state.has_changed().is_err() {
            return JobState::Stopped;
        }
        let state = *self.state.borrow();
        if state != JobState::Stopped && self.cancel.is_cancelled() {
            JobState::CancelRequested
        } else {
            state
        }
    }
}

/// Point-in-time status of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub node_id: String,
    pub run_id: Uuid,
    pub frequency_secs: u64,
    pub platform: String,
    pub protocol: String,
    pub state: JobState,
    pub is_live: bool,
    pub started_at: DateTime<Utc>,
    pub parameters: Vec<ParamSpec>,
}

/// Result of a start or stop request for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub node_id: String,
    pub result: Result<(), SchedulerError>,
}

impl NodeOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct TaskRegistry {
    slots: DashMap<String, Slot>,
    views: Arc<DashMap<String, JobView>>,
    store: Arc<dyn NodeStore>,
    transmitter: Arc<dyn Transmitter>,
    generator: ReadingGenerator,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn NodeStore>, transmitter: Arc<dyn Transmitter>) -> Self {
        Self {
            slots: DashMap::new(),
            views: Arc::new(DashMap::new()),
            store,
            transmitter,
            generator: ReadingGenerator::new(),
        }
    }

    /// Start a job per config. Each entry succeeds or fails on its own.
    pub async fn start(&self, configs: Vec<NodeJobConfig>) -> Vec<NodeOutcome> {
        let mut outcomes = Vec::with_capacity(configs.len());
        for config in configs {
            let node_id = config.node_id().to_string();
            let result = self.start_one(config).await;
            if let Err(e) = &result {
                info!(node_id = %node_id, error = %e, "Start rejected");
            }
            outcomes.push(NodeOutcome { node_id, result });
        }
        outcomes
    }

    /// Stop the job of each node, waiting for every loop to exit.
    pub async fn stop(&self, node_ids: Vec<String>) -> Vec<NodeOutcome> {
        let mut outcomes = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            let result = self.stop_one(&node_id).await;
            if let Err(e) = &result {
                info!(node_id = %node_id, error = %e, "Stop rejected");
            }
            outcomes.push(NodeOutcome { node_id, result });
        }
        outcomes
    }

    /// Stop every live job. Used on shutdown.
    pub async fn stop_all(&self) -> Vec<NodeOutcome> {
        let live: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter(|s| s.is_live)
            .map(|s| s.node_id)
            .collect();
        self.stop(live).await
    }

    /// Status of every known job, sorted by node id.
    pub fn snapshot(&self) -> Vec<JobStatus> {
        let mut statuses: Vec<JobStatus> = self
            .views
            .iter()
            .map(|entry| {
                let view = entry.value();
                let state = view.state();
                JobStatus {
                    node_id: entry.key().clone(),
                    run_id: view.run_id,
                    frequency_secs: view.config.frequency_secs(),
                    platform: view.config.platform().to_string(),
                    protocol: view.config.protocol().to_string(),
                    state,
                    is_live: matches!(state, JobState::Created | JobState::Running),
                    started_at: view.started_at,
                    parameters: view.config.parameters().to_vec(),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        statuses
    }

    pub fn live_count(&self) -> usize {
        self.views
            .iter()
            .filter(|entry| {
                matches!(
                    entry.value().state(),
                    JobState::Created | JobState::Running
                )
            })
            .count()
    }

    /// Generate and send one extra reading for a live node, outside its cadence.
    ///
    /// Runs under the node's slot lock, so it cannot interleave with a stop:
    /// once `stop` has returned, this yields `None` for that node.
    pub async fn send_out_of_band(&self, node_id: &str) -> Option<DeliveryRecord> {
        let slot = self.slots.get(node_id).map(|s| s.value().clone())?;
        let guard = slot.lock().await;
        let handle = guard.as_ref().filter(|h| h.is_live())?;

        let reading = self.generator.generate(handle.config.parameters());
        Some(self.transmitter.send(node_id, &reading).await)
    }

    fn slot(&self, node_id: &str) -> Slot {
        self.slots
            .entry(node_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    async fn start_one(&self, config: NodeJobConfig) -> Result<(), SchedulerError> {
        let node_id = config.node_id().to_string();
        let mut guard = self.slot(&node_id).lock_owned().await;

        if guard.as_ref().is_some_and(|h| h.is_live()) {
            return Err(SchedulerError::AlreadyRunning(node_id));
        }
        if let Some(dead) = guard.take() {
            self.reap(&node_id, dead).await;
        }

        match self.store.get_by_id(&node_id).await {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => return Err(SchedulerError::UnknownNode(node_id)),
            Err(e) => {
                warn!(node_id = %node_id, error = %e, "Node lookup failed, starting anyway");
            }
        }

        let config = Arc::new(config);
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(JobState::Created);
        let run_id = Uuid::new_v4();

        let context = JobContext {
            config: config.clone(),
            generator: self.generator,
            transmitter: self.transmitter.clone(),
            cancel: cancel.clone(),
            state: state_tx,
        };
        let task = tokio::spawn(context.run());

        self.views.insert(
            node_id.clone(),
            JobView {
                run_id,
                config: config.clone(),
                cancel: cancel.clone(),
                state: state_rx,
                started_at: Utc::now(),
            },
        );
        *guard = Some(JobHandle {
            run_id,
            config,
            cancel,
            task,
        });

        // The write owns the slot lock and still lands if this caller goes away
        let store = self.store.clone();
        let persist = tokio::spawn(async move {
            let _slot = guard;
            if let Err(e) = store.set_services(&node_id, ServiceState::Start).await {
                warn!(node_id = %node_id, error = %e, "Failed to persist services=start");
            }
        });
        if let Err(e) = persist.await {
            warn!(error = %e, "Persisting services=start ended abnormally");
        }
        Ok(())
    }

    async fn stop_one(&self, node_id: &str) -> Result<(), SchedulerError> {
        let not_running = || SchedulerError::NotRunning(node_id.to_string());

        let slot = self
            .slots
            .get(node_id)
            .map(|s| s.value().clone())
            .ok_or_else(not_running)?;
        let mut guard = slot.lock_owned().await;
        let handle = guard.take().ok_or_else(not_running)?;

        if !handle.is_live() {
            self.reap(node_id, handle).await;
            return Err(not_running());
        }
        handle.cancel.cancel();
        let run_id = handle.run_id;

        // Join, view removal and persistence run detached while holding the
        // slot, so a dropped caller cannot leave them half done
        let views = self.views.clone();
        let store = self.store.clone();
        let id = node_id.to_string();
        let finish = tokio::spawn(async move {
            let _slot = guard;
            match handle.task.await {
                Ok(exit) => info!(
                    node_id = %id,
                    cycles = exit.cycles,
                    failures = exit.failures,
                    "Job joined"
                ),
                Err(e) => warn!(node_id = %id, error = %e, "Job task ended abnormally"),
            }
            views.remove_if(&id, |_, view| view.run_id == run_id);

            if let Err(e) = store.set_services(&id, ServiceState::Stop).await {
                warn!(node_id = %id, error = %e, "Failed to persist services=stop");
            }
        });
        if let Err(e) = finish.await {
            warn!(node_id = %node_id, error = %e, "Stop finalization ended abnormally");
        }
        Ok(())
    }

    /// Drop a handle whose loop already exited on its own.
    async fn reap(&self, node_id: &str, handle: JobHandle) {
        let run_id = handle.run_id;
        if let Err(e) = handle.task.await {
            warn!(node_id = %node_id, error = %e, "Reaped job that exited abnormally");
        }
        self.views.remove_if(node_id, |_, view| view.run_id == run_id);
    }
}
