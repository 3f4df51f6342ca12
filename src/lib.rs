//! Node Simulator Library
//!
//! This library provides the scheduler behind the node simulator service:
//!
//! - **reading**: Synthetic reading vectors from parameter ranges
//! - **transmitter**: Delivery of readings to the oneM2M-style sink
//! - **delivery_log**: Per-node append-only JSON delivery records
//! - **job**: The periodic generate/send/sleep loop of one node
//! - **registry**: Start/stop of node jobs, at most one live job per node
//! - **events**: Live multiplexed delivery stream on a fixed tick
//! - **store**: Node persistence interface and in-memory store
//! - **api**: HTTP control surface
//! - **config**: Environment-based configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use node_simulator::config::Config;
//! use node_simulator::delivery_log::DeliveryLog;
//! use node_simulator::job::NodeJobConfig;
//! use node_simulator::reading::ParamSpec;
//! use node_simulator::registry::TaskRegistry;
//! use node_simulator::store::MemoryNodeStore;
//! use node_simulator::transmitter::HttpsTransmitter;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     let log = Arc::new(DeliveryLog::new(&config.log_dir));
//!     let transmitter = HttpsTransmitter::new(&config.sink, log).expect("Failed to build transmitter");
//!     let store = MemoryNodeStore::load("nodes.json".as_ref()).expect("Failed to load nodes");
//!     let registry = TaskRegistry::new(Arc::new(store), Arc::new(transmitter));
//!
//!     let job = NodeJobConfig::new(
//!         "WQ-01",
//!         10,
//!         vec![ParamSpec::new("pm10", 10.0, 60.0)],
//!         "onem2m",
//!         "https",
//!     )
//!     .expect("Invalid job config");
//!     registry.start(vec![job]).await;
//! }
//! ```

// Module declarations
pub mod api;
pub mod config;
pub mod delivery_log;
pub mod error;
pub mod events;
pub mod job;
pub mod reading;
pub mod registry;
pub mod store;
pub mod transmitter;

#[cfg(test)]
mod testing;

// Re-export commonly used types at crate root for convenience
pub use config::{Config, ConfigError, SinkConfig};
pub use delivery_log::{DeliveryLog, DeliveryOutcome, DeliveryRecord};
pub use error::{LogError, SchedulerError, StoreError, ValidationError};
pub use events::EventStream;
pub use job::{JobState, NodeJobConfig};
pub use reading::{ParamSpec, ReadingGenerator, ReadingVector};
pub use registry::{JobStatus, NodeOutcome, TaskRegistry};
pub use store::{MemoryNodeStore, NodeRecord, NodeStore, ServiceState};
pub use transmitter::{DeliveryError, HttpsTransmitter, Transmitter, TransmitterStats};
