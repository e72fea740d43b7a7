// Grantmesh Engine — SIMP (Structured Inter-Mesh Protocol)
//
// Compact schema-first envelope for all orchestrator ↔ agent traffic.
// Structured routing needs no model in the loop: the intent IS the route,
// payload schemas are fixed per intent, and embeddings computed once ride
// along instead of being recomputed downstream.
//
// Envelopes are immutable — replies are constructed, never mutated.
// A RESPONSE or ERROR keeps the correlation id of its trigger and swaps
// the endpoints, so a correlation id threads a whole conversation.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::atoms::constants::{
    DEFAULT_FETCH_LIMIT, DEFAULT_TTL_SECONDS, ENVELOPE_HISTORY_CAP, MAX_PRIORITY, MIN_PRIORITY,
    PROTOCOL_VERSION,
};
use crate::atoms::error::{ErrorCode, MeshResult};
use crate::atoms::types::{
    AgentStatusReport, CompanyProfile, EligibilityReport, GrantRecord, QueryFilters, ScoredGrant,
};

// ═══════════════════════════════════════════════════════════════════════════
// Message kinds and intents
// ═══════════════════════════════════════════════════════════════════════════

/// Top-level envelope classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Query,
    Response,
    Command,
    Notification,
    Error,
}

/// What the sender wants done. Doubles as the dispatch key in every
/// agent's handler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Search,
    Analyze,
    Validate,
    Fetch,
    Update,
    Status,
    Scrape,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Intent::Search => "search",
            Intent::Analyze => "analyze",
            Intent::Validate => "validate",
            Intent::Fetch => "fetch",
            Intent::Update => "update",
            Intent::Status => "status",
            Intent::Scrape => "scrape",
        };
        f.write_str(s)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Payloads — one typed variant per operation
// ═══════════════════════════════════════════════════════════════════════════

/// Envelope payload. The schema is fixed per operation; the free-form side
/// channel for anything untyped is `Envelope::metadata`, never this enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    SearchQuery {
        query: String,
        max_results: usize,
        #[serde(default)]
        filters: QueryFilters,
    },
    SearchResults {
        results: Vec<ScoredGrant>,
        total: usize,
        agent_id: String,
        domain: String,
    },
    StatusQuery {},
    StatusReport(AgentStatusReport),
    FetchQuery {
        limit: usize,
    },
    FetchResults {
        grants: Vec<GrantRecord>,
        total: usize,
        agent_id: String,
    },
    /// Expert-hints request: enrich a query with domain insight.
    AnalyzeQuery {
        query: String,
        #[serde(default)]
        filters: QueryFilters,
    },
    ExpertHint {
        agent_id: String,
        insights: String,
        #[serde(default)]
        suggested_domains: Vec<String>,
    },
    /// Funding-body eligibility analysis for an applicant profile.
    EligibilityQuery {
        company: CompanyProfile,
        #[serde(default)]
        sectors: Vec<String>,
    },
    EligibilityReport(EligibilityReport),
    ValidateQuery {
        grant: GrantRecord,
    },
    ValidateReport {
        agent_id: String,
        valid: bool,
        problems: Vec<String>,
    },
    /// Scrapers are external; the command exists so the orchestrator can
    /// route the request to whichever integration registered a handler.
    ScrapeCommand {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        domain: Option<String>,
    },
    ScrapeReport {
        agent_id: String,
        accepted: bool,
        detail: String,
    },
    Failure {
        message: String,
        code: ErrorCode,
        original_context: Box<Payload>,
    },
}

// ═══════════════════════════════════════════════════════════════════════════
// Envelope
// ═══════════════════════════════════════════════════════════════════════════

/// The wire record for all inter-agent traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_version")]
    pub version: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub sender: String,
    /// Empty means "route by intent/strategy" — resolved before dispatch.
    #[serde(default)]
    pub receiver: String,
    pub intent: Intent,
    pub context: Payload,
    /// Precomputed query vector, attached once by the sender so receivers
    /// skip re-encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// 1–5, higher = more urgent. Advisory, used for scheduling when queued.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Uninterpreted side channel (e.g. `sme_context` expert hints).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

fn default_version() -> String {
    PROTOCOL_VERSION.to_string()
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECONDS
}

fn default_priority() -> u8 {
    MIN_PRIORITY
}

impl Envelope {
    /// Construct a fresh envelope with a new correlation id.
    pub fn new(
        kind: MessageKind,
        intent: Intent,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        context: Payload,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            kind,
            sender: sender.into(),
            receiver: receiver.into(),
            intent,
            context,
            embedding: None,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            ttl_seconds: DEFAULT_TTL_SECONDS,
            priority: MIN_PRIORITY,
            metadata: Map::new(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        self
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Build the RESPONSE to this envelope: endpoints swapped, correlation
    /// id kept, version and priority copied verbatim.
    pub fn reply(&self, context: Payload) -> Envelope {
        Envelope {
            version: self.version.clone(),
            kind: MessageKind::Response,
            sender: self.receiver.clone(),
            receiver: self.sender.clone(),
            intent: self.intent,
            context,
            embedding: None,
            correlation_id: self.correlation_id.clone(),
            created_at: Utc::now(),
            ttl_seconds: self.ttl_seconds,
            priority: self.priority,
            metadata: Map::new(),
        }
    }

    /// Build the ERROR reply: like `reply`, but the original payload is
    /// preserved under `original_context` for the sender to inspect.
    pub fn fail(&self, message: impl Into<String>, code: ErrorCode) -> Envelope {
        let mut out = self.reply(Payload::Failure {
            message: message.into(),
            code,
            original_context: Box::new(self.context.clone()),
        });
        out.kind = MessageKind::Error;
        out
    }

    /// Seconds since this envelope was created (never negative).
    pub fn age_seconds(&self) -> u64 {
        (Utc::now() - self.created_at).num_seconds().max(0) as u64
    }

    pub fn is_expired(&self) -> bool {
        self.age_seconds() > self.ttl_seconds
    }

    /// Receiver-side validation. Kind and intent absence are already parse
    /// errors, so this checks the rest: a sender must be present and the
    /// envelope must still be alive.
    pub fn validate(&self) -> Result<(), String> {
        if self.sender.is_empty() {
            return Err("Missing sender".into());
        }
        if self.is_expired() {
            return Err(format!(
                "Message expired (age: {}s, ttl: {}s)",
                self.age_seconds(),
                self.ttl_seconds
            ));
        }
        Ok(())
    }

    pub fn to_json(&self) -> MeshResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> MeshResult<Envelope> {
        Ok(serde_json::from_str(json)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Construction helpers
// ═══════════════════════════════════════════════════════════════════════════

/// SEARCH query, unaddressed (the routing strategy picks receivers).
pub fn search_query(
    sender: impl Into<String>,
    query: impl Into<String>,
    max_results: usize,
    filters: QueryFilters,
) -> Envelope {
    Envelope::new(
        MessageKind::Query,
        Intent::Search,
        sender,
        "",
        Payload::SearchQuery { query: query.into(), max_results, filters },
    )
}

/// STATUS query addressed to one agent.
pub fn status_query(sender: impl Into<String>, receiver: impl Into<String>) -> Envelope {
    Envelope::new(MessageKind::Query, Intent::Status, sender, receiver, Payload::StatusQuery {})
}

/// FETCH query for a bulk metadata dump.
pub fn fetch_query(
    sender: impl Into<String>,
    receiver: impl Into<String>,
    limit: Option<usize>,
) -> Envelope {
    Envelope::new(
        MessageKind::Query,
        Intent::Fetch,
        sender,
        receiver,
        Payload::FetchQuery { limit: limit.unwrap_or(DEFAULT_FETCH_LIMIT) },
    )
}

/// SCRAPE command addressed to a capable agent.
pub fn scrape_command(
    sender: impl Into<String>,
    receiver: impl Into<String>,
    url: impl Into<String>,
    domain: Option<String>,
) -> Envelope {
    Envelope::new(
        MessageKind::Command,
        Intent::Scrape,
        sender,
        receiver,
        Payload::ScrapeCommand { url: url.into(), domain },
    )
}

/// ANALYZE query used for the expert-hints pass.
pub fn analyze_query(
    sender: impl Into<String>,
    receiver: impl Into<String>,
    query: impl Into<String>,
    filters: QueryFilters,
) -> Envelope {
    Envelope::new(
        MessageKind::Query,
        Intent::Analyze,
        sender,
        receiver,
        Payload::AnalyzeQuery { query: query.into(), filters },
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// Envelope ring buffer
// ═══════════════════════════════════════════════════════════════════════════

/// Bounded FIFO of recent envelopes for debugging and correlation-id
/// traversal.
///
/// One instance is created at mesh construction and handed to every agent
/// and the orchestrator — shared by clone (Arc), never a global.
#[derive(Clone)]
pub struct EnvelopeLog {
    inner: Arc<Mutex<VecDeque<Envelope>>>,
    cap: usize,
}

impl EnvelopeLog {
    pub fn new() -> Self {
        Self::with_capacity(ENVELOPE_HISTORY_CAP)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { inner: Arc::new(Mutex::new(VecDeque::with_capacity(cap.min(64)))), cap }
    }

    /// Record an envelope, evicting the oldest when full.
    pub fn record(&self, envelope: &Envelope) {
        let mut buf = self.inner.lock();
        if buf.len() == self.cap {
            buf.pop_front();
        }
        buf.push_back(envelope.clone());
    }

    /// Every recorded envelope with the given correlation id, oldest first.
    pub fn conversation(&self, correlation_id: &str) -> Vec<Envelope> {
        self.inner
            .lock()
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    /// The most recent `n` envelopes, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Envelope> {
        let buf = self.inner.lock();
        buf.iter().skip(buf.len().saturating_sub(n)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for EnvelopeLog {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
