// Grantmesh Engine — Agent Indexing Path
//
// Ingestion is idempotent by grant id: re-indexing the same id overwrites
// the stored record, so re-ingests never grow the collection.
//
// `index_batch` is the fast path: one `encode_batch` round trip and one
// upsert for the whole batch, counters updated once at the end. Per-grant
// preparation failures are collected, never fatal.

use log::info;
use serde_json::Value;

use crate::atoms::error::{MeshError, MeshResult};
use crate::atoms::types::{BatchOutcome, GrantRecord, IndexFailure};
use crate::engine::vector::flatten_metadata;

use super::Agent;

/// A prepared record: final id, canonical document, flat metadata.
struct Prepared {
    grant_id: String,
    document: String,
    metadata: serde_json::Map<String, Value>,
}

impl Agent {
    /// Index a single grant. Returns the (possibly generated) grant id.
    pub async fn index_one(&self, grant: &GrantRecord) -> MeshResult<String> {
        let prepared = self.prepare(grant)?;
        let vector = self.encoder.encode(&prepared.document).await?;

        self.collection
            .upsert(
                &[prepared.grant_id.clone()],
                &[vector],
                &[prepared.document],
                &[prepared.metadata],
            )
            .await?;

        self.note_indexed(1);
        info!("[{}] Indexed grant: {}", self.id, prepared.grant_id);
        Ok(prepared.grant_id)
    }

    /// Bulk index. One batched encode, one upsert; output ids match input
    /// order (failed grants excluded and reported in `errors`). An empty
    /// batch returns immediately without touching the backend.
    pub async fn index_batch(&self, grants: &[GrantRecord]) -> MeshResult<BatchOutcome> {
        if grants.is_empty() {
            return Ok(BatchOutcome::default());
        }

        info!("[{}] Batch indexing {} grants...", self.id, grants.len());

        let mut ids = Vec::with_capacity(grants.len());
        let mut documents = Vec::with_capacity(grants.len());
        let mut metadatas = Vec::with_capacity(grants.len());
        let mut errors = Vec::new();

        for grant in grants {
            match self.prepare(grant) {
                Ok(prepared) => {
                    ids.push(prepared.grant_id);
                    documents.push(prepared.document);
                    metadatas.push(prepared.metadata);
                }
                Err(e) => errors.push(IndexFailure {
                    grant_id: grant.grant_id.clone(),
                    message: e.to_string(),
                }),
            }
        }

        if ids.is_empty() {
            return Ok(BatchOutcome { indexed: ids, errors });
        }

        let vectors = self.encoder.encode_batch(&documents, self.batch_size).await?;
        self.collection.upsert(&ids, &vectors, &documents, &metadatas).await?;

        self.note_indexed(ids.len() as u64);
        info!(
            "[{}] Batch indexed {} grants ({} failed preparation)",
            self.id,
            ids.len(),
            errors.len()
        );
        Ok(BatchOutcome { indexed: ids, errors })
    }

    /// Assemble the canonical document and the flat metadata map for one
    /// grant, stamping the derived index-time fields.
    fn prepare(&self, grant: &GrantRecord) -> MeshResult<Prepared> {
        let grant_id = if grant.grant_id.is_empty() {
            format!("{}_{}", self.id, uuid::Uuid::new_v4())
        } else {
            grant.grant_id.clone()
        };

        let document = (self.document_builder)(grant);
        if document.trim().is_empty() {
            return Err(MeshError::Other(format!(
                "Grant '{}' produced an empty document — nothing to embed",
                grant_id
            )));
        }

        let mut value = serde_json::to_value(grant)?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| MeshError::Other("Grant did not serialize to an object".to_string()))?;
        object.insert("grant_id".into(), Value::String(grant_id.clone()));
        object.insert("agent_id".into(), Value::String(self.id.clone()));
        object.insert("domain".into(), Value::String(self.domain.clone()));
        object.insert("silo".into(), Value::String(self.silo.clone()));
        object.insert(
            "indexed_at".into(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );

        Ok(Prepared { grant_id, document, metadata: flatten_metadata(&value) })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::{test_agent, MemoryIndex};
    use super::super::{Agent, AgentBlueprint};
    use crate::atoms::types::GrantRecord;
    use crate::engine::agent::testkit::HashEncoder;
    use crate::engine::config::HybridConfig;
    use crate::engine::embedder::{EmbedderPool, TextEncoder};
    use crate::engine::simp::EnvelopeLog;
    use crate::engine::vector::VectorIndex;
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn sample_grant(id: &str, title: &str) -> GrantRecord {
        let mut grant = GrantRecord::new(id, title);
        grant.description = "Funding for innovative projects".into();
        grant.sectors = vec!["AI".into(), "Digital".into()];
        grant.deadline = NaiveDate::from_ymd_opt(2025, 12, 31);
        grant
    }

    async fn agent_with_index() -> (Arc<Agent>, Arc<MemoryIndex>) {
        let pool = EmbedderPool::with_factory(Box::new(|_model| {
            Arc::new(HashEncoder) as Arc<dyn TextEncoder>
        }));
        let index = MemoryIndex::new("UK_innovate_uk");
        let agent = Agent::initialize(
            AgentBlueprint::new("innovate_uk", "Innovate UK Expert", "innovate_uk", "UK"),
            &pool,
            index.clone(),
            EnvelopeLog::new(),
            HybridConfig::default(),
        )
        .await
        .unwrap();
        (agent, index)
    }

    #[tokio::test]
    async fn test_index_one_stamps_derived_fields() {
        let (agent, index) = agent_with_index().await;
        let id = agent.index_one(&sample_grant("IUK_001", "Smart Grant")).await.unwrap();
        assert_eq!(id, "IUK_001");

        let rows = index.get(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["agent_id"], "innovate_uk");
        assert_eq!(rows[0]["silo"], "UK");
        assert_eq!(rows[0]["domain"], "innovate_uk");
        assert!(rows[0].contains_key("indexed_at"));
        // Nested sectors list is stored as JSON text.
        assert!(rows[0]["sectors"].as_str().unwrap().starts_with('['));
    }

    #[tokio::test]
    async fn test_reindex_same_id_keeps_collection_size() {
        let (agent, index) = agent_with_index().await;
        agent.index_one(&sample_grant("IUK_001", "Smart Grant")).await.unwrap();
        agent.index_one(&sample_grant("IUK_001", "Smart Grant v2")).await.unwrap();
        assert_eq!(index.len(), 1);

        let rows = index.get(10).await.unwrap();
        assert_eq!(rows[0]["title"], "Smart Grant v2");
    }

    #[tokio::test]
    async fn test_missing_id_is_generated() {
        let (agent, _index) = agent_with_index().await;
        let mut grant = sample_grant("", "Anonymous Call");
        grant.grant_id = String::new();
        let id = agent.index_one(&grant).await.unwrap();
        assert!(id.starts_with("innovate_uk_"));
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let (agent, index) = agent_with_index().await;
        let outcome = agent.index_batch(&[]).await.unwrap();
        assert!(outcome.indexed.is_empty());
        assert!(outcome.errors.is_empty());
        assert_eq!(index.len(), 0);
        assert_eq!(agent.counters().grants_indexed, 0);
    }

    #[tokio::test]
    async fn test_batch_matches_sequential_indexing() {
        let (batch_agent, batch_index) = agent_with_index().await;
        let (seq_agent, seq_index) = agent_with_index().await;

        let grants: Vec<GrantRecord> = (0..5)
            .map(|i| sample_grant(&format!("IUK_{:03}", i), &format!("Grant {}", i)))
            .collect();

        let outcome = batch_agent.index_batch(&grants).await.unwrap();
        for grant in &grants {
            seq_agent.index_one(grant).await.unwrap();
        }

        assert_eq!(outcome.indexed, grants.iter().map(|g| g.grant_id.clone()).collect::<Vec<_>>());
        assert_eq!(batch_index.len(), seq_index.len());
        assert_eq!(batch_agent.counters().grants_indexed, 5);

        // Same ids, same documents, same metadata apart from timestamps.
        let mut batch_rows = batch_index.get(10).await.unwrap();
        let mut seq_rows = seq_index.get(10).await.unwrap();
        for row in batch_rows.iter_mut().chain(seq_rows.iter_mut()) {
            row.remove("indexed_at");
        }
        assert_eq!(batch_rows, seq_rows);
    }

    #[tokio::test]
    async fn test_batch_collects_per_grant_failures() {
        let (agent, index) = agent_with_index().await;
        let empty = GrantRecord::default(); // no title, no description
        let good = sample_grant("IUK_OK", "Working Grant");

        let outcome = agent.index_batch(&[empty, good]).await.unwrap();
        assert_eq!(outcome.indexed, vec!["IUK_OK"]);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].message.contains("empty document"));
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_nested_eligibility_roundtrips_through_flat_metadata() {
        let (agent, index) = agent_with_index().await;
        let mut grant = sample_grant("IUK_002", "Eligibility Grant");
        grant.eligibility = Some(crate::atoms::types::Eligibility {
            company_type: Some("Limited Company".into()),
            location: Some("UK".into()),
            max_employees: Some(250),
            criteria: serde_json::Map::new(),
        });
        agent.index_one(&grant).await.unwrap();

        let rows = index.get(10).await.unwrap();
        let parsed = crate::engine::vector::parse_metadata(&rows[0]);
        assert_eq!(
            parsed["eligibility"],
            json!({ "company_type": "Limited Company", "location": "UK", "max_employees": 250 })
        );
        assert_eq!(parsed["sectors"], Value::Array(vec!["AI".into(), "Digital".into()]));
    }

    #[tokio::test]
    async fn test_index_counters_update_once_per_batch() {
        let (agent, _index) = agent_with_index().await;
        let grants: Vec<GrantRecord> =
            (0..3).map(|i| sample_grant(&format!("G{}", i), "Title")).collect();
        agent.index_batch(&grants).await.unwrap();
        let counters = agent.counters();
        assert_eq!(counters.grants_indexed, 3);
        assert!(counters.last_updated.is_some());
    }
}
