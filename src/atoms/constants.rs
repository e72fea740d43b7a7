// ── Grantmesh Atoms: Constants ─────────────────────────────────────────────
// All named constants for the crate live here.
// Rationale: collecting constants in one place eliminates magic numbers,
// makes auditing easier, and keeps every layer's code self-documenting.

// ── Protocol ───────────────────────────────────────────────────────────────
// Version string copied verbatim into every reply. Bump only on a wire
// format change.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Default envelope time-to-live. A receiver rejects any envelope whose
/// `created_at + ttl_seconds` has passed.
pub const DEFAULT_TTL_SECONDS: u64 = 300;

/// Envelope priority range (advisory, used for scheduling when queued).
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 5;

/// How many envelopes the in-process ring buffer retains (FIFO eviction).
pub const ENVELOPE_HISTORY_CAP: usize = 1000;

// ── Result cache ───────────────────────────────────────────────────────────
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;

// ── Fan-out ────────────────────────────────────────────────────────────────
// A single slow agent retries then contributes an error, never a hang:
// worst-case per-agent latency is TIMEOUT × MAX_ATTEMPTS plus backoff.
pub const DEFAULT_FANOUT_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_FANOUT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_FANOUT_BACKOFF_BASE_SECONDS: u64 = 1;

/// Cap on concurrent agent calls across one orchestrator, decomposed
/// sub-queries included.
pub const DEFAULT_MAX_INFLIGHT_CALLS: usize = 32;

// ── Hybrid search ──────────────────────────────────────────────────────────
pub const DEFAULT_SEMANTIC_WEIGHT: f64 = 0.7;
pub const DEFAULT_KEYWORD_WEIGHT: f64 = 0.3;

/// The collection is asked for `multiplier × max_results` neighbours so the
/// lexical re-rank has room to promote rows past the pure-vector ordering.
pub const DEFAULT_OVERFETCH_MULTIPLIER: usize = 3;

// ── Embedder ───────────────────────────────────────────────────────────────
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 32;

// ── Misc defaults ──────────────────────────────────────────────────────────
/// Default `max_results` for a search when the caller does not say.
pub const DEFAULT_MAX_RESULTS: usize = 10;

/// Default row cap for bulk FETCH reads.
pub const DEFAULT_FETCH_LIMIT: usize = 100;

/// Reported in every aggregated response and query-log line.
pub const ORCHESTRATOR_VERSION: &str = "1.0";
