// Grantmesh Engine — Vector Collection Client
//
// Thin handle over an external vector index (Chroma-style REST service).
// One logical collection per `{silo}_{domain}`; two agents never share a
// collection.
//
// The backend accepts only primitive metadata values, so nested lists and
// maps are serialized to JSON text on write and parsed back on read. That
// round trip is a contract: lists in = lists out.

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde_json::{json, Map, Value};

use crate::atoms::error::{MeshError, MeshResult};

// ═══════════════════════════════════════════════════════════════════════════
// Index seam
// ═══════════════════════════════════════════════════════════════════════════

/// One nearest-neighbour match from the index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    /// Non-negative; smaller = more similar.
    pub distance: f32,
    pub document: String,
    pub metadata: Map<String, Value>,
}

/// Per-agent handle over one external vector collection.
///
/// `upsert` is idempotent by id — re-writing the same id overwrites the
/// stored record. `where_clause` is a conjunction of flat key/equality
/// predicates matched against the metadata map.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        documents: &[String],
        metadatas: &[Map<String, Value>],
    ) -> MeshResult<()>;

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        where_clause: Option<&Map<String, Value>>,
    ) -> MeshResult<Vec<VectorHit>>;

    /// Bulk metadata read for dumps, up to `limit` rows.
    async fn get(&self, limit: usize) -> MeshResult<Vec<Map<String, Value>>>;

    /// Collection name (`{silo}_{domain}`).
    fn name(&self) -> &str;
}

// ═══════════════════════════════════════════════════════════════════════════
// Metadata codec — nested values on a flat-typed backend
// ═══════════════════════════════════════════════════════════════════════════

/// Flatten a JSON object for storage: primitives pass through, nulls are
/// dropped, lists and maps become JSON text under the same key.
pub fn flatten_metadata(record: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    let Some(object) = record.as_object() else {
        return out;
    };
    for (key, value) in object {
        match value {
            Value::Null => {}
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                out.insert(key.clone(), value.clone());
            }
            Value::Array(_) | Value::Object(_) => {
                out.insert(
                    key.clone(),
                    Value::String(serde_json::to_string(value).unwrap_or_default()),
                );
            }
        }
    }
    out
}

/// Undo `flatten_metadata`: any string value that looks like serialized
/// JSON (leading `[` or `{`) is parsed back, falling back to the raw
/// string when parsing fails.
pub fn parse_metadata(metadata: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in metadata {
        let parsed = match value {
            Value::String(s) if s.starts_with('[') || s.starts_with('{') => {
                serde_json::from_str::<Value>(s).unwrap_or_else(|_| value.clone())
            }
            other => other.clone(),
        };
        out.insert(key.clone(), parsed);
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════
// Chroma-style REST client
// ═══════════════════════════════════════════════════════════════════════════

/// Connection to a Chroma-style vector service; hands out per-collection
/// handles.
pub struct ChromaStore {
    client: Client,
    base_url: String,
}

impl ChromaStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: Client::new(), base_url: base_url.into() }
    }

    /// Get or create the collection for one agent, namespaced
    /// `{silo}_{domain}`.
    pub async fn collection(
        &self,
        silo: &str,
        domain: &str,
        agent_id: &str,
    ) -> MeshResult<ChromaCollection> {
        let name = format!("{}_{}", silo, domain);
        let url = format!("{}/api/v1/collections", self.base_url.trim_end_matches('/'));
        let body = json!({
            "name": name,
            "get_or_create": true,
            "metadata": {
                "agent_id": agent_id,
                "domain": domain,
                "silo": silo,
            },
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(MeshError::backend("chroma", format!("{} — {}", status, text)));
        }

        let v: Value = resp.json().await?;
        let id = v["id"]
            .as_str()
            .ok_or_else(|| MeshError::backend("chroma", "No collection id in response"))?
            .to_string();

        info!("[vector] Collection ready: {} ({})", name, id);
        Ok(ChromaCollection {
            client: self.client.clone(),
            base_url: self.base_url.trim_end_matches('/').to_string(),
            collection_id: id,
            name,
        })
    }
}

/// Handle over one remote collection.
pub struct ChromaCollection {
    client: Client,
    base_url: String,
    collection_id: String,
    name: String,
}

impl ChromaCollection {
    fn endpoint(&self, op: &str) -> String {
        format!("{}/api/v1/collections/{}/{}", self.base_url, self.collection_id, op)
    }

    async fn post(&self, op: &str, body: Value) -> MeshResult<Value> {
        let resp = self.client.post(self.endpoint(op)).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(MeshError::backend("chroma", format!("{} {} — {}", op, status, text)));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl VectorIndex for ChromaCollection {
    async fn upsert(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        documents: &[String],
        metadatas: &[Map<String, Value>],
    ) -> MeshResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.post(
            "upsert",
            json!({
                "ids": ids,
                "embeddings": vectors,
                "documents": documents,
                "metadatas": metadatas,
            }),
        )
        .await?;
        debug!("[vector] Upserted {} records into {}", ids.len(), self.name);
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        where_clause: Option<&Map<String, Value>>,
    ) -> MeshResult<Vec<VectorHit>> {
        let mut body = json!({
            "query_embeddings": [vector],
            "n_results": k,
            "include": ["metadatas", "documents", "distances"],
        });
        if let Some(clause) = where_clause {
            if !clause.is_empty() {
                body["where"] = Value::Object(clause.clone());
            }
        }

        let v = self.post("query", body).await?;

        // Responses are grouped per query vector; we always send exactly one.
        let ids = v["ids"][0].as_array().cloned().unwrap_or_default();
        let distances = v["distances"][0].as_array().cloned().unwrap_or_default();
        let documents = v["documents"][0].as_array().cloned().unwrap_or_default();
        let metadatas = v["metadatas"][0].as_array().cloned().unwrap_or_default();

        let mut hits = Vec::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            let Some(id) = id.as_str() else { continue };
            hits.push(VectorHit {
                id: id.to_string(),
                distance: distances.get(i).and_then(|d| d.as_f64()).unwrap_or(0.0) as f32,
                document: documents
                    .get(i)
                    .and_then(|d| d.as_str())
                    .unwrap_or_default()
                    .to_string(),
                metadata: metadatas
                    .get(i)
                    .and_then(|m| m.as_object())
                    .cloned()
                    .unwrap_or_default(),
            });
        }
        Ok(hits)
    }

    async fn get(&self, limit: usize) -> MeshResult<Vec<Map<String, Value>>> {
        let v = self
            .post("get", json!({ "limit": limit, "include": ["metadatas"] }))
            .await?;
        let metadatas = v["metadatas"].as_array().cloned().unwrap_or_default();
        Ok(metadatas.into_iter().filter_map(|m| m.as_object().cloned()).collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
