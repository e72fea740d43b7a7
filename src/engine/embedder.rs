// Grantmesh Engine — Embedding Client & Pool
//
// Calls Ollama or OpenAI-compatible embedding APIs to produce vector
// representations of text. Every agent and the orchestrator draw their
// encoder from one process-wide `EmbedderPool`, so N agents sharing a
// model pay the load cost once, not N times.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::{json, Value};

use crate::atoms::constants::{DEFAULT_EMBEDDING_BATCH_SIZE, DEFAULT_EMBEDDING_MODEL};
use crate::atoms::error::{MeshError, MeshResult};

// ═══════════════════════════════════════════════════════════════════════════
// Encoder seam
// ═══════════════════════════════════════════════════════════════════════════

/// Text → fixed-dimensional vector. The model is an external service; this
/// trait is the crate's only view of it.
///
/// Implementations must be cheap to share — encoders are handed out as
/// `Arc<dyn TextEncoder>` and read concurrently by every agent.
#[async_trait]
pub trait TextEncoder: Send + Sync {
    async fn encode(&self, text: &str) -> MeshResult<Vec<f32>>;

    /// Batch encode. One round trip per `batch_size` chunk — orders of
    /// magnitude faster than per-text calls during bulk ingestion.
    /// Output order matches input order.
    async fn encode_batch(&self, texts: &[String], batch_size: usize) -> MeshResult<Vec<Vec<f32>>>;

    fn model_name(&self) -> &str;
}

// ═══════════════════════════════════════════════════════════════════════════
// HTTP embedder (Ollama / OpenAI-compatible)
// ═══════════════════════════════════════════════════════════════════════════

/// Embedding client — tries the Ollama `/api/embed` endpoint first, then
/// falls back to the OpenAI-compatible `/v1/embeddings` form.
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self { client: Client::new(), base_url: base_url.into(), model: model.into() }
    }

    /// Ollama API: POST /api/embed { model, input } → { embeddings: [[f32…]] }.
    /// `input` may be a single string or an array.
    async fn embed_ollama(&self, input: Value) -> MeshResult<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let body = json!({ "model": self.model, "input": input });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(std::time::Duration::from_secs(60))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(MeshError::backend("embedder", format!("{} — {}", status, text)));
        }

        let v: Value = resp.json().await?;

        if let Some(embeddings) = v["embeddings"].as_array() {
            let vectors: Vec<Vec<f32>> = embeddings
                .iter()
                .filter_map(|e| e.as_array())
                .map(|v| parse_vector(v))
                .collect();
            if !vectors.is_empty() && vectors.iter().all(|v| !v.is_empty()) {
                return Ok(vectors);
            }
        }
        // Some versions return singular "embedding" even on /api/embed.
        if let Some(embedding) = v["embedding"].as_array() {
            let vector = parse_vector(embedding);
            if !vector.is_empty() {
                return Ok(vec![vector]);
            }
        }

        Err(MeshError::backend("embedder", "No embedding array in Ollama response"))
    }

    /// OpenAI-compatible: POST /v1/embeddings { model, input } →
    /// { data: [{ embedding: [f32…] }, …] }.
    async fn embed_openai(&self, input: Value) -> MeshResult<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let body = json!({ "model": self.model, "input": input });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(MeshError::backend("embedder", format!("{} — {}", status, text)));
        }

        let v: Value = resp.json().await?;
        let data = v["data"]
            .as_array()
            .ok_or_else(|| MeshError::backend("embedder", "No 'data' array in response"))?;

        let vectors: Vec<Vec<f32>> = data
            .iter()
            .filter_map(|d| d["embedding"].as_array())
            .map(|v| parse_vector(v))
            .collect();

        if vectors.is_empty() || vectors.iter().any(|v| v.is_empty()) {
            return Err(MeshError::backend("embedder", "Empty embedding vector in response"));
        }
        Ok(vectors)
    }

    async fn embed_any(&self, input: Value) -> MeshResult<Vec<Vec<f32>>> {
        match self.embed_ollama(input.clone()).await {
            Ok(vectors) => Ok(vectors),
            Err(ollama_err) => match self.embed_openai(input).await {
                Ok(vectors) => Ok(vectors),
                Err(openai_err) => Err(MeshError::backend(
                    "embedder",
                    format!("Ollama: {} | OpenAI: {}", ollama_err, openai_err),
                )),
            },
        }
    }
}

fn parse_vector(values: &[Value]) -> Vec<f32> {
    values.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect()
}

#[async_trait]
impl TextEncoder for HttpEmbedder {
    async fn encode(&self, text: &str) -> MeshResult<Vec<f32>> {
        let mut vectors = self.embed_any(Value::String(text.to_string())).await?;
        let result = vectors
            .drain(..)
            .next()
            .ok_or_else(|| MeshError::backend("embedder", "Empty embedding response"));
        result
    }

    async fn encode_batch(&self, texts: &[String], batch_size: usize) -> MeshResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let chunk = batch_size.max(1);
        let mut out = Vec::with_capacity(texts.len());
        for window in texts.chunks(chunk) {
            let input = Value::Array(window.iter().map(|t| Value::String(t.clone())).collect());
            let vectors = self.embed_any(input).await?;
            if vectors.len() != window.len() {
                return Err(MeshError::backend(
                    "embedder",
                    format!("Asked for {} embeddings, got {}", window.len(), vectors.len()),
                ));
            }
            out.extend(vectors);
        }
        debug!("[embedder] Batch-encoded {} texts (model {})", texts.len(), self.model);
        Ok(out)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Embedder pool
// ═══════════════════════════════════════════════════════════════════════════

/// Builds an encoder for a model name. The default factory constructs an
/// `HttpEmbedder` against the configured service; tests and alternative
/// deployments swap in their own.
pub type EncoderFactory = Box<dyn Fn(&str) -> Arc<dyn TextEncoder> + Send + Sync>;

/// Process-wide lazy cache of text encoders keyed by model name.
///
/// Double-checked locking: the read lock answers the hot path, the async
/// load mutex guarantees at most one in-flight load per pool, and the
/// re-check under the mutex prevents a duplicate load after a race.
///
/// Not a global — one pool is created at mesh construction and handed to
/// each agent at registration.
pub struct EmbedderPool {
    encoders: RwLock<HashMap<String, Arc<dyn TextEncoder>>>,
    load_lock: tokio::sync::Mutex<()>,
    factory: EncoderFactory,
    pub default_model: String,
    pub batch_size: usize,
}

impl EmbedderPool {
    /// Pool backed by an HTTP embedding service.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self::with_factory(Box::new(move |model| {
            Arc::new(HttpEmbedder::new(base_url.clone(), model)) as Arc<dyn TextEncoder>
        }))
    }

    /// Pool with a custom encoder factory.
    pub fn with_factory(factory: EncoderFactory) -> Self {
        Self {
            encoders: RwLock::new(HashMap::new()),
            load_lock: tokio::sync::Mutex::new(()),
            factory,
            default_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
        }
    }

    pub fn set_default_model(&mut self, model: impl Into<String>) {
        self.default_model = model.into();
    }

    /// Get the shared encoder for a model, loading it on first request.
    pub async fn get_or_load(&self, model: &str) -> Arc<dyn TextEncoder> {
        if let Some(encoder) = self.encoders.read().get(model) {
            return encoder.clone();
        }

        let _guard = self.load_lock.lock().await;
        // Re-check: another task may have loaded while we waited.
        if let Some(encoder) = self.encoders.read().get(model) {
            debug!("[embedder] Using cached encoder: {}", model);
            return encoder.clone();
        }

        info!("[embedder] Loading embedding model: {}", model);
        let encoder = (self.factory)(model);
        self.encoders.write().insert(model.to_string(), encoder.clone());
        encoder
    }

    /// The encoder for the pool's default model.
    pub async fn default_encoder(&self) -> Arc<dyn TextEncoder> {
        let model = self.default_model.clone();
        self.get_or_load(&model).await
    }

    /// Pre-seed the pool with an already-built encoder (tests, local
    /// models, alternative backends).
    pub fn insert(&self, model: impl Into<String>, encoder: Arc<dyn TextEncoder>) {
        self.encoders.write().insert(model.into(), encoder);
    }

    pub fn loaded_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.encoders.read().keys().cloned().collect();
        models.sort();
        models
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEncoder {
        model: String,
    }

    #[async_trait]
    impl TextEncoder for FixedEncoder {
        async fn encode(&self, _text: &str) -> MeshResult<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        async fn encode_batch(
            &self,
            texts: &[String],
            _batch_size: usize,
        ) -> MeshResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn model_name(&self) -> &str {
            &self.model
        }
    }

    fn counting_pool() -> (Arc<AtomicUsize>, EmbedderPool) {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let pool = EmbedderPool::with_factory(Box::new(move |model| {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(FixedEncoder { model: model.to_string() }) as Arc<dyn TextEncoder>
        }));
        (loads, pool)
    }

    #[tokio::test]
    async fn test_pool_loads_each_model_once() {
        let (loads, pool) = counting_pool();

        let a = pool.get_or_load("all-MiniLM-L6-v2").await;
        let b = pool.get_or_load("all-MiniLM-L6-v2").await;
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));

        pool.get_or_load("nomic-embed-text").await;
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(pool.loaded_models(), vec!["all-MiniLM-L6-v2", "nomic-embed-text"]);
    }

    #[tokio::test]
    async fn test_pool_single_load_under_contention() {
        let (loads, pool) = counting_pool();
        let pool = Arc::new(pool);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                pool.get_or_load("all-MiniLM-L6-v2").await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_insert_preseeds_without_factory() {
        let (loads, pool) = counting_pool();
        pool.insert("custom", Arc::new(FixedEncoder { model: "custom".into() }));
        let enc = pool.get_or_load("custom").await;
        assert_eq!(enc.model_name(), "custom");
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_empty_is_noop() {
        let enc = FixedEncoder { model: "m".into() };
        let out = enc.encode_batch(&[], 32).await.unwrap();
        assert!(out.is_empty());
    }
}
