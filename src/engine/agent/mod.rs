// Grantmesh Engine — Agent Base Runtime
//
// An agent is a domain-scoped unit that owns exactly one vector collection
// and services envelopes. There is no type hierarchy: a funding body is a
// VALUE (`AgentBlueprint`) that contributes identity, a document-builder
// closure and extra handlers — the runtime in this module is the same for
// every agent.
//
// Module layout:
//   mod.rs      — agent struct, blueprint, dispatch, default handlers
//   indexing.rs — index_one / index_batch and metadata preparation
//   search.rs   — hybrid (semantic + lexical) search
//
// Dispatch contract: every inbound envelope produces exactly one reply
// envelope with the same correlation id and swapped endpoints. Failures
// become ERROR envelopes, never raw errors.

mod indexing;
mod search;

pub use search::grant_from_metadata;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::atoms::error::{ErrorCode, MeshError, MeshResult};
use crate::atoms::types::{
    AgentState, AgentStatusReport, Capabilities, CounterSnapshot, GrantRecord,
};
use crate::engine::config::HybridConfig;
use crate::engine::embedder::{EmbedderPool, TextEncoder};
use crate::engine::simp::{Envelope, EnvelopeLog, Intent, Payload};
use crate::engine::vector::VectorIndex;

// ═══════════════════════════════════════════════════════════════════════════
// Handler and hook types
// ═══════════════════════════════════════════════════════════════════════════

/// Intent handler: borrows the agent and the (validated) envelope, returns
/// the reply. Errors are converted to ERROR envelopes by the dispatcher.
pub type Handler =
    Arc<dyn for<'a> Fn(&'a Agent, &'a Envelope) -> BoxFuture<'a, MeshResult<Envelope>> + Send + Sync>;

/// Builds the canonical text document a grant is embedded under.
pub type DocumentBuilder = Arc<dyn Fn(&GrantRecord) -> String + Send + Sync>;

/// Lifecycle hook invoked on initialize / shutdown.
pub type LifecycleHook = Arc<dyn Fn(&Agent) + Send + Sync>;

/// Wrap a handler fn into the shared handler type.
pub fn handler<F>(f: F) -> Handler
where
    F: for<'a> Fn(&'a Agent, &'a Envelope) -> BoxFuture<'a, MeshResult<Envelope>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

// ═══════════════════════════════════════════════════════════════════════════
// Blueprint — a funding body as a value
// ═══════════════════════════════════════════════════════════════════════════

/// Everything that makes one agent different from another.
pub struct AgentBlueprint {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub silo: String,
    pub capabilities: Capabilities,
    pub document_builder: DocumentBuilder,
    /// Registered after the defaults, so a blueprint may also override
    /// SEARCH / STATUS / FETCH.
    pub extra_handlers: Vec<(Intent, Handler)>,
    pub on_initialize: Option<LifecycleHook>,
    pub on_shutdown: Option<LifecycleHook>,
}

impl AgentBlueprint {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        domain: impl Into<String>,
        silo: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            domain: domain.into(),
            silo: silo.into(),
            capabilities: Capabilities::default(),
            document_builder: Arc::new(default_document),
            extra_handlers: Vec::new(),
            on_initialize: None,
            on_shutdown: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_document_builder(
        mut self,
        builder: impl Fn(&GrantRecord) -> String + Send + Sync + 'static,
    ) -> Self {
        self.document_builder = Arc::new(builder);
        self
    }

    pub fn with_handler(mut self, intent: Intent, handler: Handler) -> Self {
        self.extra_handlers.push((intent, handler));
        self
    }

    pub fn with_on_initialize(mut self, hook: impl Fn(&Agent) + Send + Sync + 'static) -> Self {
        self.on_initialize = Some(Arc::new(hook));
        self
    }

    pub fn with_on_shutdown(mut self, hook: impl Fn(&Agent) + Send + Sync + 'static) -> Self {
        self.on_shutdown = Some(Arc::new(hook));
        self
    }
}

/// Base document: title + description. Bodies layer their own fields on
/// top via `with_document_builder`.
pub fn default_document(grant: &GrantRecord) -> String {
    format!("{} {}", grant.title, grant.description)
}

// ═══════════════════════════════════════════════════════════════════════════
// Counters
// ═══════════════════════════════════════════════════════════════════════════

/// Per-agent counters. Updated only by the owning agent, atomically —
/// an agent may service concurrent requests.
struct Counters {
    queries_handled: AtomicU64,
    grants_indexed: AtomicU64,
    errors: AtomicU64,
    last_updated: Mutex<Option<DateTime<Utc>>>,
}

impl Counters {
    fn new() -> Self {
        Self {
            queries_handled: AtomicU64::new(0),
            grants_indexed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_updated: Mutex::new(None),
        }
    }

    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            queries_handled: self.queries_handled.load(Ordering::Relaxed),
            grants_indexed: self.grants_indexed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_updated: self.last_updated.lock().map(|t| t.to_rfc3339()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Agent
// ═══════════════════════════════════════════════════════════════════════════

pub struct Agent {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub silo: String,
    pub capabilities: Capabilities,
    state: Mutex<AgentState>,
    counters: Counters,
    pub(crate) collection: Arc<dyn VectorIndex>,
    pub(crate) encoder: Arc<dyn TextEncoder>,
    history: EnvelopeLog,
    handlers: HashMap<Intent, Handler>,
    pub(crate) document_builder: DocumentBuilder,
    pub(crate) hybrid: HybridConfig,
    pub(crate) batch_size: usize,
    on_shutdown: Option<LifecycleHook>,
}

impl Agent {
    /// Build and initialize an agent from its blueprint: resolve the shared
    /// encoder from the pool, take ownership of the collection, register
    /// handlers, run the blueprint's init hook, go active.
    pub async fn initialize(
        blueprint: AgentBlueprint,
        pool: &EmbedderPool,
        collection: Arc<dyn VectorIndex>,
        history: EnvelopeLog,
        hybrid: HybridConfig,
    ) -> MeshResult<Arc<Agent>> {
        info!("[{}] Initializing...", blueprint.id);
        let encoder = pool.default_encoder().await;

        let mut handlers: HashMap<Intent, Handler> = HashMap::new();
        handlers.insert(Intent::Search, handler(search_entry));
        handlers.insert(Intent::Status, handler(status_entry));
        handlers.insert(Intent::Fetch, handler(fetch_entry));
        for (intent, h) in blueprint.extra_handlers {
            handlers.insert(intent, h);
        }

        let agent = Agent {
            id: blueprint.id,
            name: blueprint.name,
            domain: blueprint.domain,
            silo: blueprint.silo,
            capabilities: blueprint.capabilities,
            state: Mutex::new(AgentState::Initializing),
            counters: Counters::new(),
            collection,
            encoder,
            history,
            handlers,
            document_builder: blueprint.document_builder,
            hybrid,
            batch_size: pool.batch_size,
            on_shutdown: blueprint.on_shutdown,
        };

        if let Some(hook) = &blueprint.on_initialize {
            hook(&agent);
        }

        *agent.state.lock() = AgentState::Active;
        info!("[{}] Initialization complete ({} / {})", agent.id, agent.domain, agent.silo);
        Ok(Arc::new(agent))
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn status_report(&self) -> AgentStatusReport {
        AgentStatusReport {
            agent_id: self.id.clone(),
            name: self.name.clone(),
            domain: self.domain.clone(),
            silo: self.silo.clone(),
            state: self.state(),
            counters: self.counters.snapshot(),
            capabilities: self.capabilities,
        }
    }

    /// Run the shutdown hook and go offline.
    pub async fn shutdown(&self) {
        info!("[{}] Shutting down...", self.id);
        if let Some(hook) = &self.on_shutdown {
            hook(self);
        }
        *self.state.lock() = AgentState::Offline;
        info!("[{}] Shutdown complete", self.id);
    }

    pub(crate) fn note_indexed(&self, count: u64) {
        self.counters.grants_indexed.fetch_add(count, Ordering::Relaxed);
        *self.counters.last_updated.lock() = Some(Utc::now());
    }

    // ── Message dispatch ───────────────────────────────────────────────

    /// Main entry point for all communication. Always returns an envelope;
    /// failures are ERROR envelopes, never raw errors.
    pub async fn handle(&self, envelope: &Envelope) -> Envelope {
        let mut env = envelope.clone();
        // An unaddressed envelope that reached us is ours.
        if env.receiver.is_empty() {
            env.receiver = self.id.clone();
        }

        if let Err(reason) = env.validate() {
            warn!("[{}] Invalid message: {}", self.id, reason);
            return env.fail(reason, ErrorCode::InvalidMessage);
        }

        debug!("[{}] ← {}: {}", self.id, env.sender, env.intent);
        self.history.record(&env);

        let response = match self.handlers.get(&env.intent) {
            Some(h) => {
                let h = h.clone();
                match (h.as_ref())(self, &env).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!("[{}] Error processing message: {}", self.id, e);
                        self.counters.errors.fetch_add(1, Ordering::Relaxed);
                        env.fail(e.to_string(), e.error_code())
                    }
                }
            }
            None => env.fail(
                format!("No handler for intent: {}", env.intent),
                ErrorCode::NoHandler,
            ),
        };

        debug!("[{}] → {}: response", self.id, env.sender);
        self.history.record(&response);
        self.counters.queries_handled.fetch_add(1, Ordering::Relaxed);
        response
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Default handlers
// ═══════════════════════════════════════════════════════════════════════════

fn search_entry<'a>(agent: &'a Agent, env: &'a Envelope) -> BoxFuture<'a, MeshResult<Envelope>> {
    Box::pin(handle_search(agent, env))
}

async fn handle_search(agent: &Agent, env: &Envelope) -> MeshResult<Envelope> {
    let Payload::SearchQuery { query, max_results, filters } = &env.context else {
        return Err(MeshError::protocol(
            ErrorCode::ProcessingError,
            "SEARCH envelope without a search_query payload",
        ));
    };

    let results = agent
        .search_with_embedding(query, *max_results, filters, env.embedding.as_deref())
        .await?;

    Ok(env.reply(Payload::SearchResults {
        total: results.len(),
        results,
        agent_id: agent.id.clone(),
        domain: agent.domain.clone(),
    }))
}

fn status_entry<'a>(agent: &'a Agent, env: &'a Envelope) -> BoxFuture<'a, MeshResult<Envelope>> {
    Box::pin(async move { Ok(env.reply(Payload::StatusReport(agent.status_report()))) })
}

fn fetch_entry<'a>(agent: &'a Agent, env: &'a Envelope) -> BoxFuture<'a, MeshResult<Envelope>> {
    Box::pin(handle_fetch(agent, env))
}

async fn handle_fetch(agent: &Agent, env: &Envelope) -> MeshResult<Envelope> {
    let Payload::FetchQuery { limit } = &env.context else {
        return Err(MeshError::protocol(
            ErrorCode::ProcessingError,
            "FETCH envelope without a fetch_query payload",
        ));
    };

    let rows = agent.collection.get(*limit).await?;
    let grants: Vec<GrantRecord> = rows
        .iter()
        .map(|row| grant_from_metadata(crate::engine::vector::parse_metadata(row)))
        .collect();

    Ok(env.reply(Payload::FetchResults {
        total: grants.len(),
        grants,
        agent_id: agent.id.clone(),
    }))
}

// ═══════════════════════════════════════════════════════════════════════════
// Test doubles shared across the agent test modules
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
pub(crate) mod testkit {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    pub const DIM: usize = 32;

    /// Deterministic encoder: token-bucket hashing, L2-normalized. Texts
    /// sharing tokens land near each other, which is all hybrid search
    /// needs from a test double.
    pub struct HashEncoder;

    pub fn hash_embed(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        for token in text.to_lowercase().split_whitespace() {
            let mut h = DefaultHasher::new();
            token.hash(&mut h);
            v[(h.finish() % DIM as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }

    #[async_trait]
    impl TextEncoder for HashEncoder {
        async fn encode(&self, text: &str) -> MeshResult<Vec<f32>> {
            Ok(hash_embed(text))
        }

        async fn encode_batch(
            &self,
            texts: &[String],
            _batch_size: usize,
        ) -> MeshResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| hash_embed(t)).collect())
        }

        fn model_name(&self) -> &str {
            "hash-test"
        }
    }

    /// In-memory vector index with cosine distance and upsert-by-id.
    pub struct MemoryIndex {
        name: String,
        rows: parking_lot::Mutex<Vec<(String, Vec<f32>, String, Map<String, Value>)>>,
    }

    impl MemoryIndex {
        pub fn new(name: impl Into<String>) -> Arc<Self> {
            Arc::new(Self { name: name.into(), rows: parking_lot::Mutex::new(Vec::new()) })
        }

        pub fn len(&self) -> usize {
            self.rows.lock().len()
        }
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            0.0
        } else {
            dot / (na * nb)
        }
    }

    #[async_trait]
    impl VectorIndex for MemoryIndex {
        async fn upsert(
            &self,
            ids: &[String],
            vectors: &[Vec<f32>],
            documents: &[String],
            metadatas: &[Map<String, Value>],
        ) -> MeshResult<()> {
            let mut rows = self.rows.lock();
            for i in 0..ids.len() {
                let row = (
                    ids[i].clone(),
                    vectors[i].clone(),
                    documents[i].clone(),
                    metadatas[i].clone(),
                );
                if let Some(existing) = rows.iter_mut().find(|r| r.0 == ids[i]) {
                    *existing = row;
                } else {
                    rows.push(row);
                }
            }
            Ok(())
        }

        async fn query(
            &self,
            vector: &[f32],
            k: usize,
            where_clause: Option<&Map<String, Value>>,
        ) -> MeshResult<Vec<crate::engine::vector::VectorHit>> {
            let rows = self.rows.lock();
            let mut hits: Vec<crate::engine::vector::VectorHit> = rows
                .iter()
                .filter(|(_, _, _, meta)| match where_clause {
                    Some(clause) => clause.iter().all(|(key, val)| meta.get(key) == Some(val)),
                    None => true,
                })
                .map(|(id, vec, doc, meta)| crate::engine::vector::VectorHit {
                    id: id.clone(),
                    distance: 1.0 - cosine(vector, vec),
                    document: doc.clone(),
                    metadata: meta.clone(),
                })
                .collect();
            hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
            hits.truncate(k);
            Ok(hits)
        }

        async fn get(&self, limit: usize) -> MeshResult<Vec<Map<String, Value>>> {
            Ok(self.rows.lock().iter().take(limit).map(|r| r.3.clone()).collect())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    /// A fully initialized agent over fresh in-memory backends.
    pub async fn test_agent(blueprint: AgentBlueprint) -> Arc<Agent> {
        let pool = EmbedderPool::with_factory(Box::new(|_model| {
            Arc::new(HashEncoder) as Arc<dyn TextEncoder>
        }));
        let index = MemoryIndex::new(format!("{}_{}", blueprint.silo, blueprint.domain));
        Agent::initialize(blueprint, &pool, index, EnvelopeLog::new(), HybridConfig::default())
            .await
            .unwrap()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
