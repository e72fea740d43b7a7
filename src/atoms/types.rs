// ── Grantmesh Atoms: Pure Data Types ───────────────────────────────────────
// All plain struct/enum definitions with no logic beyond constructors and
// small accessors. Atoms layer rule: no I/O, no side effects, no imports
// from engine/.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::atoms::constants::DEFAULT_MAX_RESULTS;

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 1: Grant records
// ═══════════════════════════════════════════════════════════════════════════

/// Structured eligibility sub-record attached to a grant.
///
/// Funding bodies describe eligibility in wildly different vocabularies;
/// the common denominators get named fields and everything else rides in
/// `criteria`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Eligibility {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_employees: Option<u32>,
    /// Free-form criteria the named fields do not cover.
    #[serde(flatten)]
    pub criteria: Map<String, Value>,
}

impl Eligibility {
    /// One line of searchable text assembled from every populated field.
    pub fn as_search_text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(ct) = &self.company_type {
            parts.push(ct.clone());
        }
        if let Some(loc) = &self.location {
            parts.push(loc.clone());
        }
        if let Some(max) = self.max_employees {
            parts.push(format!("max {} employees", max));
        }
        for value in self.criteria.values() {
            match value {
                Value::String(s) => parts.push(s.clone()),
                Value::Null => {}
                other => parts.push(other.to_string()),
            }
        }
        parts.join(" ")
    }
}

/// One grant-funding opportunity, owned by exactly one agent.
///
/// `grant_id` is unique within an agent's collection; the same id may
/// legitimately exist in another agent's collection (cross-silo source).
/// Body-specific fields (scope, program, topics, funding_stream, council,
/// TRL range, …) ride in `extra` and round-trip through the flat metadata
/// map of the vector index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrantRecord {
    #[serde(default)]
    pub grant_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sectors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligibility: Option<Eligibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supplementary_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_urls: Vec<String>,
    /// Body-specific fields plus the derived index-time fields
    /// (agent_id, silo, domain, indexed_at) on read-back.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GrantRecord {
    /// Minimal constructor used by tests and ingestion pipelines.
    pub fn new(grant_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self { grant_id: grant_id.into(), title: title.into(), ..Default::default() }
    }

    /// `title + description`, the text re-embedded during aggregation.
    pub fn headline_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// A grant as returned from an agent's hybrid search, scores attached.
///
/// `relevance_score` and `agent_source` are stamped by the orchestrator
/// during aggregation; agents leave them empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoredGrant {
    #[serde(flatten)]
    pub grant: GrantRecord,
    pub combined_score: f64,
    pub semantic_score: f64,
    pub keyword_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_source: Option<String>,
}

impl ScoredGrant {
    /// Dedup identity: grant id, falling back to title.
    pub fn identity(&self) -> &str {
        if self.grant.grant_id.is_empty() {
            &self.grant.title
        } else {
            &self.grant.grant_id
        }
    }

    /// Sort key for final ordering: relevance descending, then deadline
    /// ascending with missing deadlines last.
    pub fn rank_key(&self) -> (f64, NaiveDate) {
        (
            -self.relevance_score.unwrap_or(self.combined_score),
            self.grant.deadline.unwrap_or(NaiveDate::MAX),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 2: Queries and filters
// ═══════════════════════════════════════════════════════════════════════════

/// Routing and search filters carried with every query.
///
/// `silos`/`domains` steer agent selection; `metadata` is a flat equality
/// conjunction forwarded to the vector index's `where` clause.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub silos: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.silos.is_empty() && self.domains.is_empty() && self.metadata.is_empty()
    }

    /// Filters narrowed to a single silo (used by query decomposition).
    pub fn with_silo(&self, silo: &str) -> Self {
        let mut out = self.clone();
        out.silos = vec![silo.to_string()];
        out
    }

    /// Filters narrowed to a single domain (used by query decomposition).
    pub fn with_domain(&self, domain: &str) -> Self {
        let mut out = self.clone();
        out.domains = vec![domain.to_string()];
        out
    }

    /// Canonical text form: sorted keys, sorted values. Identical filters
    /// always canonicalize identically, which makes cache keys stable.
    pub fn canonical(&self) -> String {
        let mut silos = self.silos.clone();
        silos.sort();
        let mut domains = self.domains.clone();
        domains.sort();
        let mut meta: Vec<(String, String)> = self
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        meta.sort();
        format!("silos={:?};domains={:?};meta={:?}", silos, domains, meta)
    }
}

/// The inbound request at the boundary of the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub filters: QueryFilters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 3: Aggregated response
// ═══════════════════════════════════════════════════════════════════════════

/// One agent's failure during fan-out, surfaced instead of swallowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFailure {
    pub agent_id: String,
    pub message: String,
}

/// The unified answer assembled by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResponse {
    pub query: String,
    pub agents_queried: Vec<String>,
    pub total_results: usize,
    pub grants: Vec<ScoredGrant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expert_hint: Option<String>,
    pub processing_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_cache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_age_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decomposed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_query_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<AgentFailure>>,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 4: Agent identity and status
// ═══════════════════════════════════════════════════════════════════════════

/// Agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Initializing,
    Active,
    Offline,
}

impl Default for AgentState {
    fn default() -> Self {
        AgentState::Initializing
    }
}

/// Capability flags advertised in STATUS replies and used for command
/// routing (e.g. only a `can_scrape` agent receives SCRAPE commands).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_search: bool,
    pub can_scrape: bool,
    pub can_analyze: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self { can_search: true, can_scrape: false, can_analyze: true }
    }
}

/// Point-in-time snapshot of an agent's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub queries_handled: u64,
    pub grants_indexed: u64,
    pub errors: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Full STATUS reply body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusReport {
    pub agent_id: String,
    pub name: String,
    pub domain: String,
    pub silo: String,
    pub state: AgentState,
    pub counters: CounterSnapshot,
    pub capabilities: Capabilities,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 5: Eligibility analysis
// ═══════════════════════════════════════════════════════════════════════════

/// Applicant profile submitted for eligibility analysis.
///
/// Covers both the company-centric checks (Innovate UK) and the
/// organisation-centric checks (Horizon Europe); either side reads the
/// fields it cares about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employees: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annual_revenue: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trl: Option<u8>,
}

/// Result of a funding body's eligibility analysis. The individual checks
/// are body-specific, so they travel as a named map; the recommendation is
/// the human-readable verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EligibilityReport {
    pub agent_id: String,
    pub checks: Map<String, Value>,
    pub recommendation: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 6: Batch indexing outcome
// ═══════════════════════════════════════════════════════════════════════════

/// A single grant that could not be prepared during batch ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFailure {
    pub grant_id: String,
    pub message: String,
}

/// Outcome of `index_batch`: ids in input order, failures alongside.
/// Per-grant failures never abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub indexed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<IndexFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_roundtrip_keeps_extra_fields() {
        let mut grant = GrantRecord::new("IUK_001", "Smart Grants Spring");
        grant.description = "AI funding".into();
        grant.sectors = vec!["AI".into(), "Digital".into()];
        grant.deadline = NaiveDate::from_ymd_opt(2025, 3, 31);
        grant.extra.insert("scope".into(), Value::String("UK-wide".into()));

        let json = serde_json::to_string(&grant).unwrap();
        let back: GrantRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, grant);
        assert_eq!(back.extra["scope"], Value::String("UK-wide".into()));
    }

    #[test]
    fn test_scored_grant_flattens_scores_beside_grant_fields() {
        let scored = ScoredGrant {
            grant: GrantRecord::new("g1", "EIC Accelerator 2025"),
            combined_score: 0.8,
            semantic_score: 0.9,
            keyword_score: 0.5,
            relevance_score: Some(0.7),
            agent_source: Some("horizon_europe".into()),
        };
        let value = serde_json::to_value(&scored).unwrap();
        assert_eq!(value["grant_id"], "g1");
        assert_eq!(value["combined_score"], 0.8);

        let back: ScoredGrant = serde_json::from_value(value).unwrap();
        assert_eq!(back, scored);
        // Score fields must not leak into the grant's extra map.
        assert!(back.grant.extra.is_empty());
    }

    #[test]
    fn test_identity_falls_back_to_title() {
        let mut scored = ScoredGrant::default();
        scored.grant.title = "Untitled Call".into();
        assert_eq!(scored.identity(), "Untitled Call");
        scored.grant.grant_id = "X1".into();
        assert_eq!(scored.identity(), "X1");
    }

    #[test]
    fn test_filters_canonical_is_order_insensitive() {
        let a = QueryFilters {
            silos: vec!["UK".into(), "EU".into()],
            domains: vec!["nihr".into()],
            metadata: Map::new(),
        };
        let b = QueryFilters {
            silos: vec!["EU".into(), "UK".into()],
            domains: vec!["nihr".into()],
            metadata: Map::new(),
        };
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_rank_key_orders_missing_deadline_last() {
        let mut early = ScoredGrant::default();
        early.relevance_score = Some(0.5);
        early.grant.deadline = NaiveDate::from_ymd_opt(2025, 3, 31);

        let mut missing = ScoredGrant::default();
        missing.relevance_score = Some(0.5);

        assert!(early.rank_key() < missing.rank_key());
    }

    #[test]
    fn test_eligibility_search_text() {
        let elig = Eligibility {
            company_type: Some("Limited Company".into()),
            location: Some("UK".into()),
            max_employees: Some(250),
            criteria: Map::new(),
        };
        let text = elig.as_search_text();
        assert!(text.contains("Limited Company"));
        assert!(text.contains("max 250 employees"));
    }
}
