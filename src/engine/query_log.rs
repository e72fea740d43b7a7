// Grantmesh Engine — Query Log
//
// Append-only NDJSON record of every top-level query, for offline
// analysis of routing quality and latency. One writer task owns the file;
// callers funnel entries through an unbounded channel and never block.
//
// A logging failure must never fail the request — send errors and write
// errors are logged and swallowed.

use std::path::PathBuf;

use log::{info, warn};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::atoms::types::QueryFilters;

/// One line of the query log.
#[derive(Debug, Clone, Serialize)]
pub struct QueryLogEntry {
    pub query: String,
    pub filters: QueryFilters,
    pub agents_used: Vec<String>,
    pub result_count: usize,
    pub latency_ms: f64,
    pub timestamp: String,
    pub routing_strategy: String,
    pub cache_hit_rate: f64,
    pub orchestrator_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decomposed: Option<bool>,
}

/// Handle to the single writer task. Cheap to clone.
#[derive(Clone)]
pub struct QueryLog {
    tx: mpsc::UnboundedSender<QueryLogEntry>,
}

impl QueryLog {
    /// Spawn the writer task for `path`. Must be called from within a
    /// tokio runtime. The parent directory is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> QueryLog {
        let path = path.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<QueryLogEntry>();

        tokio::spawn(async move {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
            }

            let mut file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) => {
                    warn!("[query_log] Cannot open {}: {} — logging disabled", path.display(), e);
                    return;
                }
            };
            info!("[query_log] Writing to {}", path.display());

            while let Some(entry) = rx.recv().await {
                let line = match serde_json::to_string(&entry) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("[query_log] Serialization failed: {}", e);
                        continue;
                    }
                };
                if let Err(e) = file.write_all(format!("{}\n", line).as_bytes()).await {
                    warn!("[query_log] Write failed: {}", e);
                    continue;
                }
                let _ = file.flush().await;
            }
        });

        QueryLog { tx }
    }

    /// Enqueue an entry. Fire-and-forget.
    pub fn append(&self, entry: QueryLogEntry) {
        if self.tx.send(entry).is_err() {
            warn!("[query_log] Writer task gone, entry dropped");
        }
    }
}
