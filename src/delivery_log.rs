//! Append-only per-node record of delivery attempts.
//!
//! Each node gets its own file, `node_<id>_log.json`, holding one JSON object
//! per line. The file is a stream of objects, not a single JSON document.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::LogError;

/// Outcome of one transmission attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The sink answered with a 2xx status
    Success {
        response: u16,
        data: serde_json::Value,
    },

    /// Transport error or non-success status
    Failure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<u16>,
        error: String,
    },
}

/// One logged transmission attempt for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub node_id: String,

    /// When the attempt was made
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

impl DeliveryRecord {
    pub fn success(node_id: impl Into<String>, response: u16, data: serde_json::Value) -> Self {
        Self {
            node_id: node_id.into(),
            timestamp: Utc::now(),
            outcome: DeliveryOutcome::Success { response, data },
        }
    }

    pub fn failure(
        node_id: impl Into<String>,
        response: Option<u16>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            timestamp: Utc::now(),
            outcome: DeliveryOutcome::Failure {
                response,
                error: error.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Success { .. })
    }
}

/// Per-node append-only delivery log rooted at a directory.
///
/// Appends for the same node are serialized behind one writer; different nodes
/// write concurrently. Files and the directory are created lazily on the first
/// attempt for a node.
pub struct DeliveryLog {
    dir: PathBuf,

    /// File name -> lazily opened append handle
    writers: DashMap<String, Arc<Mutex<Option<File>>>>,
}

impl DeliveryLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writers: DashMap::new(),
        }
    }

    /// Path of the log file for `node_id`.
    pub fn path_for(&self, node_id: &str) -> PathBuf {
        self.dir.join(file_name(node_id))
    }

    /// Append one record to its node's log.
    pub async fn append(&self, record: &DeliveryRecord) -> Result<(), LogError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let name = file_name(&record.node_id);
        let writer = self
            .writers
            .entry(name.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut guard = writer.lock().await;
        if guard.is_none() {
            fs::create_dir_all(&self.dir).await?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(&name))
                .await?;
            debug!(node_id = %record.node_id, file = %name, "Opened delivery log");
            *guard = Some(file);
        }

        if let Some(file) = guard.as_mut() {
            file.write_all(&line).await?;
            file.flush().await?;
        }
        Ok(())
    }

    /// Read back every record logged for `node_id`, oldest first.
    ///
    /// A node with no attempts yet has an empty log.
    pub async fn read(&self, node_id: &str) -> Result<Vec<DeliveryRecord>, LogError> {
        let content = match fs::read_to_string(self.path_for(node_id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        serde_json::Deserializer::from_str(&content)
            .into_iter::<DeliveryRecord>()
            .map(|r| r.map_err(LogError::from))
            .collect()
    }
}

/// Log file name for a node, with path-unsafe characters replaced.
fn file_name(node_id: &str) -> String {
    let safe: String = node_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("node_{}_log.json", safe)
}
