// Grantmesh Engine — Configuration
//
// One `MeshConfig` with a section per subsystem. Every field carries a
// serde default so a partial TOML file (or none at all) yields a working
// configuration; sections can be overridden independently.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::atoms::constants::*;
use crate::atoms::error::{MeshError, MeshResult};

// ── Cache ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECONDS
}

fn default_cache_max_entries() -> usize {
    DEFAULT_CACHE_MAX_ENTRIES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: default_cache_ttl(), max_entries: default_cache_max_entries() }
    }
}

// ── Fan-out ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Hard deadline per agent call.
    #[serde(default = "default_fanout_timeout")]
    pub timeout_seconds: u64,
    /// Total attempts per agent (first try included).
    #[serde(default = "default_fanout_max_retries")]
    pub max_retries: u32,
    /// First backoff; doubles on each further attempt (1 s, 2 s, 4 s).
    #[serde(default = "default_fanout_backoff_base")]
    pub backoff_base_seconds: u64,
    /// Cap on concurrent agent calls, sub-queries included.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
}

fn default_fanout_timeout() -> u64 {
    DEFAULT_FANOUT_TIMEOUT_SECONDS
}

fn default_fanout_max_retries() -> u32 {
    DEFAULT_FANOUT_MAX_ATTEMPTS
}

fn default_fanout_backoff_base() -> u64 {
    DEFAULT_FANOUT_BACKOFF_BASE_SECONDS
}

fn default_max_inflight() -> usize {
    DEFAULT_MAX_INFLIGHT_CALLS
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_fanout_timeout(),
            max_retries: default_fanout_max_retries(),
            backoff_base_seconds: default_fanout_backoff_base(),
            max_inflight: default_max_inflight(),
        }
    }
}

// ── Hybrid search ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_overfetch")]
    pub overfetch_multiplier: usize,
}

fn default_semantic_weight() -> f64 {
    DEFAULT_SEMANTIC_WEIGHT
}

fn default_keyword_weight() -> f64 {
    DEFAULT_KEYWORD_WEIGHT
}

fn default_overfetch() -> usize {
    DEFAULT_OVERFETCH_MULTIPLIER
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            keyword_weight: default_keyword_weight(),
            overfetch_multiplier: default_overfetch(),
        }
    }
}

// ── Routing ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// "silo" (default), "keyword" or "broadcast".
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Per-domain trigger phrases for keyword routing. Empty = built-ins.
    #[serde(default)]
    pub keyword_triggers: BTreeMap<String, Vec<String>>,
}

fn default_strategy() -> String {
    "silo".into()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { strategy: default_strategy(), keyword_triggers: BTreeMap::new() }
    }
}

// ── Embedder ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    #[serde(default = "default_embedder_url")]
    pub base_url: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_embedder_url() -> String {
    "http://localhost:11434".into()
}

fn default_model_name() -> String {
    DEFAULT_EMBEDDING_MODEL.into()
}

fn default_batch_size() -> usize {
    DEFAULT_EMBEDDING_BATCH_SIZE
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedder_url(),
            model_name: default_model_name(),
            batch_size: default_batch_size(),
        }
    }
}

// ── Vector backend ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default = "default_vector_url")]
    pub base_url: String,
}

fn default_vector_url() -> String {
    "http://localhost:8000".into()
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self { base_url: default_vector_url() }
    }
}

// ── Query log ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_query_log_path")]
    pub query_log_path: String,
    #[serde(default = "default_true")]
    pub enable_query_logging: bool,
}

fn default_query_log_path() -> String {
    "logs/query_log.jsonl".into()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { query_log_path: default_query_log_path(), enable_query_logging: true }
    }
}

// ── Top level ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub hybrid: HybridConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub embedder: EmbedderConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl MeshConfig {
    pub fn from_toml_str(toml_str: &str) -> MeshResult<Self> {
        toml::from_str(toml_str).map_err(|e| MeshError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> MeshResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}
