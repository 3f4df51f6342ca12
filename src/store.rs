//! Node persistence interface used by the scheduler.
//!
//! The relational CRUD layer lives outside this crate; the scheduler only needs
//! to look a node up and flip its `services` flag. [`MemoryNodeStore`] backs
//! the binary and the tests.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Persisted run flag of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Start,
    #[default]
    Stop,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Start => write!(f, "start"),
            ServiceState::Stop => write!(f, "stop"),
        }
    }
}

/// A named grouping of nodes and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertical {
    pub id: i64,
    pub name: String,
}

/// A measurement parameter defined within a vertical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: i64,
    pub name: String,
    pub min_value: f64,
    pub max_value: f64,
    pub vertical_id: i64,
    pub data_type: String,
}

/// Stored node definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub vertical_id: i64,
    /// Ids of the parameters this node reports, in reading order
    #[serde(default)]
    pub parameter_ids: Vec<i64>,
    pub platform: String,
    pub protocol: String,
    pub frequency: i64,
    #[serde(default)]
    pub services: ServiceState,
}

#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn get_by_id(&self, node_id: &str) -> Result<NodeRecord, StoreError>;

    async fn set_services(&self, node_id: &str, state: ServiceState) -> Result<(), StoreError>;
}

/// Contents of a node seed file.
#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub verticals: Vec<Vertical>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
}

/// In-memory node store.
#[derive(Default)]
pub struct MemoryNodeStore {
    verticals: DashMap<i64, Vertical>,
    parameters: DashMap<i64, Parameter>,
    nodes: DashMap<String, NodeRecord>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: SeedData) -> Self {
        let store = Self::new();
        for vertical in seed.verticals {
            store.verticals.insert(vertical.id, vertical);
        }
        for parameter in seed.parameters {
            store.parameters.insert(parameter.id, parameter);
        }
        for node in seed.nodes {
            store.insert(node);
        }
        store
    }

    /// Load a seed file of the form `{"verticals": [...], "parameters": [...], "nodes": [...]}`.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Seed(format!("{}: {}", path.display(), e)))?;
        let seed: SeedData = serde_json::from_str(&content)
            .map_err(|e| StoreError::Seed(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_seed(seed))
    }

    pub fn insert(&self, node: NodeRecord) {
        self.nodes.insert(node.node_id.clone(), node);
    }

    pub fn list(&self) -> Vec<NodeRecord> {
        let mut nodes: Vec<NodeRecord> = self.nodes.iter().map(|n| n.value().clone()).collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn vertical(&self, id: i64) -> Option<Vertical> {
        self.verticals.get(&id).map(|v| v.value().clone())
    }

    /// Parameters of a node in `parameter_ids` order; unknown ids are skipped.
    pub fn parameters_for(&self, node: &NodeRecord) -> Vec<Parameter> {
        node.parameter_ids
            .iter()
            .filter_map(|id| self.parameters.get(id).map(|p| p.value().clone()))
            .collect()
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn get_by_id(&self, node_id: &str) -> Result<NodeRecord, StoreError> {
        self.nodes
            .get(node_id)
            .map(|n| n.value().clone())
            .ok_or_else(|| StoreError::NotFound(node_id.to_string()))
    }

    async fn set_services(&self, node_id: &str, state: ServiceState) -> Result<(), StoreError> {
        match self.nodes.get_mut(node_id) {
            Some(mut node) => {
                node.services = state;
                Ok(())
            }
            None => Err(StoreError::NotFound(node_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(node_id: &str) -> NodeRecord {
        NodeRecord {
            node_id: node_id.to_string(),
            vertical_id: 1,
            parameter_ids: vec![1, 2],
            platform: "onem2m".to_string(),
            protocol: "https".to_string(),
            frequency: 10,
            services: ServiceState::Stop,
        }
    }

    const SEED: &str = r#"{
        "verticals": [{"id": 1, "name": "Water Quality"}],
        "parameters": [
            {"id": 1, "name": "pm10", "min_value": 10, "max_value": 60, "vertical_id": 1, "data_type": "float"},
            {"id": 2, "name": "pm25", "min_value": 10, "max_value": 60, "vertical_id": 1, "data_type": "float"}
        ],
        "nodes": [
            {"node_id": "WQ-01", "vertical_id": 1, "parameter_ids": [2, 1, 9],
             "platform": "onem2m", "protocol": "https", "frequency": 10}
        ]
    }"#;

    #[tokio::test]
    async fn test_seed_and_lookup() {
        let seed: SeedData = serde_json::from_str(SEED).unwrap();
        let store = MemoryNodeStore::from_seed(seed);

        let node = store.get_by_id("WQ-01").await.unwrap();
        assert_eq!(node.services, ServiceState::Stop);
        assert_eq!(store.vertical(1).unwrap().name, "Water Quality");

        let params: Vec<String> = store
            .parameters_for(&node)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(params, vec!["pm25", "pm10"]);
    }

    #[tokio::test]
    async fn test_set_services() {
        let store = MemoryNodeStore::new();
        store.insert(node("n1"));

        store.set_services("n1", ServiceState::Start).await.unwrap();
        assert_eq!(
            store.get_by_id("n1").await.unwrap().services,
            ServiceState::Start
        );

        let err = store.set_services("missing", ServiceState::Start).await;
        assert!(matches!(err, Err(StoreError::NotFound(id)) if id == "missing"));
    }

    #[test]
    fn test_load_reports_bad_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nodes.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(MemoryNodeStore::load(&path), Err(StoreError::Seed(_))));
        assert!(matches!(
            MemoryNodeStore::load(&tmp.path().join("absent.json")),
            Err(StoreError::Seed(_))
        ));
    }

    #[test]
    fn test_service_state_serde() {
        assert_eq!(serde_json::to_string(&ServiceState::Start).unwrap(), r#""start""#);
        let state: ServiceState = serde_json::from_str(r#""stop""#).unwrap();
        assert_eq!(state, ServiceState::Stop);
        assert_eq!(ServiceState::Start.to_string(), "start");
    }
}
