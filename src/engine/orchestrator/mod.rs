// Grantmesh Engine — Orchestrator
//
// The smart router for the mesh: cache lookup, complex-query
// decomposition, expert hints, agent selection, bounded parallel fan-out
// with retry, and cosine re-ranking of the union.
//
// Module layout:
//   mod.rs    — registry, query pipeline, aggregation, status/scrape ops
//   fanout.rs — invoke_with_retry (timeout + backoff + semaphore bound)
//
// Ordering contract: fan-out is unordered; the final grant order depends
// only on (relevance descending, deadline ascending), never on which
// agent answered first.

mod fanout;

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::atoms::constants::ORCHESTRATOR_VERSION;
use crate::atoms::error::{MeshError, MeshResult};
use crate::atoms::types::{
    AgentFailure, AgentState, AgentStatusReport, AggregatedResponse, QueryFilters, ScoredGrant,
};
use crate::engine::agent::Agent;
use crate::engine::cache::ResultCache;
use crate::engine::config::{FanoutConfig, MeshConfig};
use crate::engine::embedder::TextEncoder;
use crate::engine::query_log::{QueryLog, QueryLogEntry};
use crate::engine::routing::{AgentRegistry, RoutingStrategy};
use crate::engine::simp::{
    analyze_query, scrape_command, search_query, status_query, EnvelopeLog, MessageKind, Payload,
};

use fanout::invoke_with_retry;

// ═══════════════════════════════════════════════════════════════════════════
// Decomposition tables
// ═══════════════════════════════════════════════════════════════════════════

/// Signals that a query may span silos or domains and is worth splitting.
const COMPLEXITY_INDICATORS: &[&str] = &[
    " and ", " or ", " with ", " for ",
    "ai medical", "uk startup", "health tech",
    "multiple", "different", "various",
];

/// Geographic decomposition: query term → silo slice.
const GEO_SLICES: &[(&str, &str)] = &[("uk", "UK"), ("eu", "EU"), ("europe", "EU"), ("us", "US")];

/// Domain decomposition: query term → domain slice.
const DOMAIN_SLICES: &[(&str, &str)] = &[
    ("medical", "nihr"),
    ("health", "nihr"),
    ("innovation", "innovate_uk"),
    ("research", "ukri"),
    ("horizon", "horizon_europe"),
];

// ═══════════════════════════════════════════════════════════════════════════
// Stats
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrchestratorStats {
    pub total_queries: u64,
    pub total_results_returned: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub average_latency_ms: f64,
    pub agent_count: usize,
}

struct Stats {
    total_queries: AtomicU64,
    total_results: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    average_latency_ms: Mutex<f64>,
}

impl Stats {
    fn new() -> Self {
        Self {
            total_queries: AtomicU64::new(0),
            total_results: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            average_latency_ms: Mutex::new(0.0),
        }
    }
}

/// Snapshot returned by `get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub state: AgentState,
    pub stats: OrchestratorStats,
    pub agents: Vec<AgentStatusReport>,
    pub expert_available: bool,
}

/// Outcome of routing a SCRAPE command.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeOutcome {
    pub success: bool,
    pub agent_id: Option<String>,
    pub detail: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════════════════════

pub struct Orchestrator {
    agents: RwLock<AgentRegistry>,
    expert: RwLock<Option<Arc<Agent>>>,
    cache: ResultCache,
    encoder: Arc<dyn TextEncoder>,
    routing: RwLock<RoutingStrategy>,
    history: EnvelopeLog,
    query_log: Option<QueryLog>,
    fanout: FanoutConfig,
    inflight: Semaphore,
    stats: Stats,
    state: Mutex<AgentState>,
    batch_size: usize,
}

impl Orchestrator {
    pub fn new(
        config: &MeshConfig,
        encoder: Arc<dyn TextEncoder>,
        history: EnvelopeLog,
        query_log: Option<QueryLog>,
    ) -> Self {
        info!("[orchestrator] Initialized (strategy: {})", config.routing.strategy);
        Self {
            agents: RwLock::new(AgentRegistry::new()),
            expert: RwLock::new(None),
            cache: ResultCache::new(&config.cache),
            encoder,
            routing: RwLock::new(RoutingStrategy::from_config(&config.routing)),
            history,
            query_log,
            fanout: config.fanout.clone(),
            inflight: Semaphore::new(config.fanout.max_inflight),
            stats: Stats::new(),
            state: Mutex::new(AgentState::Active),
            batch_size: config.embedder.batch_size,
        }
    }

    // ── Registry ───────────────────────────────────────────────────────

    /// Register an agent. Additive; call during startup.
    pub fn register_agent(&self, agent: Arc<Agent>) {
        info!("[orchestrator] Registered agent: {} ({})", agent.id, agent.domain);
        self.agents.write().insert(agent.id.clone(), agent);
    }

    /// Register the expert-hints agent consulted before every fan-out.
    pub fn register_expert(&self, agent: Arc<Agent>) {
        info!("[orchestrator] Registered expert context: {}", agent.id);
        *self.expert.write() = Some(agent);
    }

    pub fn agent_count(&self) -> usize {
        self.agents.read().len()
    }

    /// Swap the routing strategy at runtime.
    pub fn set_routing_strategy(&self, strategy: RoutingStrategy) {
        info!("[orchestrator] Routing strategy set to: {}", strategy.name());
        *self.routing.write() = strategy;
    }

    pub fn routing_strategy_name(&self) -> &'static str {
        self.routing.read().name()
    }

    // ── Query pipeline ─────────────────────────────────────────────────

    /// The one public search operation: cache → decomposition → routing →
    /// fan-out → re-rank → cache store → analytics.
    pub async fn query(
        &self,
        user_query: &str,
        max_results: usize,
        filters: QueryFilters,
    ) -> MeshResult<AggregatedResponse> {
        if user_query.trim().is_empty() {
            return Err(MeshError::Config("query must not be empty".into()));
        }
        let started = Instant::now();

        let key = ResultCache::key(user_query, max_results, &filters);
        if let Some((mut cached, age)) = self.cache.get(&key) {
            info!("[orchestrator] Cache hit: {}", user_query);
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            cached.from_cache = Some(true);
            cached.cache_age_seconds = Some(age);
            return Ok(cached);
        }
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let slices = if is_complex_query(user_query) {
            self.decompose(user_query, &filters)
        } else {
            Vec::new()
        };

        let response = if slices.is_empty() {
            self.execute(user_query, max_results, &filters).await
        } else {
            info!("[orchestrator] Decomposed into {} sub-queries", slices.len());
            let sub_results =
                join_all(slices.iter().map(|f| self.execute(user_query, max_results, f))).await;
            merge_results(sub_results, user_query)
        };

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let n = self.stats.total_queries.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut avg = self.stats.average_latency_ms.lock();
            *avg = (*avg * (n - 1) as f64 + latency_ms) / n as f64;
        }
        self.stats.total_results.fetch_add(response.total_results as u64, Ordering::Relaxed);

        self.cache.put(key, response.clone());

        if let Some(log) = &self.query_log {
            log.append(QueryLogEntry {
                query: user_query.to_string(),
                filters,
                agents_used: response.agents_queried.clone(),
                result_count: response.total_results,
                latency_ms,
                timestamp: Utc::now().to_rfc3339(),
                routing_strategy: self.routing_strategy_name().to_string(),
                cache_hit_rate: self.cache_hit_rate(),
                orchestrator_version: ORCHESTRATOR_VERSION.to_string(),
                decomposed: response.decomposed,
            });
        }

        info!(
            "[orchestrator] Returned {} results in {:.2}ms",
            response.total_results, latency_ms
        );
        Ok(response)
    }

    /// Execute one (sub-)query: hints → routing → fan-out → aggregation.
    async fn execute(
        &self,
        query: &str,
        max_results: usize,
        filters: &QueryFilters,
    ) -> AggregatedResponse {
        let started = Instant::now();
        info!("[orchestrator] Query: {}", query);

        let expert_hint = self.expert_hint(query, filters).await;

        let selection = {
            let agents = self.agents.read();
            let strategy = self.routing.read();
            strategy.select(query, filters, &agents)
        };
        info!(
            "[orchestrator] Routing to {} agents: {:?}",
            selection.len(),
            selection.iter().map(|a| a.id.as_str()).collect::<Vec<_>>()
        );

        // Encode the query once; the vector rides along in every envelope
        // and is reused for the relevance re-rank below.
        let query_vector = match self.encoder.encode(query).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!("[orchestrator] Query embedding failed: {} — re-rank degraded", e);
                None
            }
        };

        let outcomes = join_all(selection.iter().map(|agent| {
            let mut envelope = search_query("orchestrator", query, max_results, filters.clone());
            envelope.receiver = agent.id.clone();
            if let Some(vector) = &query_vector {
                envelope = envelope.with_embedding(vector.clone());
            }
            if let Some(hint) = &expert_hint {
                envelope = envelope.with_metadata("sme_context", Value::String(hint.clone()));
            }
            self.history.record(&envelope);
            async move { invoke_with_retry(agent, &envelope, &self.fanout, &self.inflight).await }
        }))
        .await;

        let mut agents_queried = Vec::new();
        let mut errors: Vec<AgentFailure> = Vec::new();
        let mut grants: Vec<ScoredGrant> = Vec::new();

        for (agent, outcome) in selection.iter().zip(outcomes) {
            match outcome {
                Ok(reply) => match reply.context {
                    Payload::SearchResults { results, .. } => {
                        agents_queried.push(agent.id.clone());
                        for mut grant in results {
                            grant.agent_source = Some(agent.id.clone());
                            grants.push(grant);
                        }
                    }
                    other => errors.push(AgentFailure {
                        agent_id: agent.id.clone(),
                        message: format!("unexpected reply payload: {}", payload_name(&other)),
                    }),
                },
                Err(failure) => errors.push(failure),
            }
        }

        self.rerank(&mut grants, query_vector.as_deref()).await;

        AggregatedResponse {
            query: query.to_string(),
            agents_queried,
            total_results: grants.len(),
            grants,
            expert_hint,
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            from_cache: None,
            cache_age_seconds: None,
            decomposed: None,
            sub_query_count: None,
            errors: if errors.is_empty() { None } else { Some(errors) },
        }
    }

    /// Attach a relevance score (cosine of query vector vs a fresh
    /// embedding of title + description, batched in one call) and order by
    /// (relevance descending, deadline ascending).
    async fn rerank(&self, grants: &mut [ScoredGrant], query_vector: Option<&[f32]>) {
        if let Some(query_vector) = query_vector {
            if !grants.is_empty() {
                let texts: Vec<String> =
                    grants.iter().map(|g| g.grant.headline_text()).collect();
                match self.encoder.encode_batch(&texts, self.batch_size).await {
                    Ok(vectors) => {
                        for (grant, vector) in grants.iter_mut().zip(&vectors) {
                            grant.relevance_score = Some(cosine(query_vector, vector) as f64);
                        }
                    }
                    Err(e) => warn!("[orchestrator] Grant re-embedding failed: {}", e),
                }
            }
        }
        grants.sort_by(|a, b| {
            a.rank_key().partial_cmp(&b.rank_key()).unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// Ask the expert agent for a hint. Failure is silent by design: the
    /// query proceeds without the hint.
    async fn expert_hint(&self, query: &str, filters: &QueryFilters) -> Option<String> {
        let expert = self.expert.read().clone()?;
        let envelope = analyze_query("orchestrator", expert.id.clone(), query, filters.clone());
        let reply = expert.handle(&envelope).await;

        if reply.kind == MessageKind::Response {
            if let Payload::ExpertHint { insights, .. } = reply.context {
                if !insights.is_empty() {
                    return Some(insights);
                }
            }
        } else {
            debug!("[orchestrator] Expert hint unavailable, continuing without");
        }
        None
    }

    /// Decompose a complex query into narrower filter slices, restricted
    /// to silos and domains that actually have registered agents.
    fn decompose(&self, query: &str, filters: &QueryFilters) -> Vec<QueryFilters> {
        let lower = query.to_lowercase();
        let agents = self.agents.read();
        let known_silos: BTreeSet<&str> = agents.values().map(|a| a.silo.as_str()).collect();
        let known_domains: BTreeSet<&str> = agents.values().map(|a| a.domain.as_str()).collect();

        let mut seen = HashSet::new();
        let mut slices = Vec::new();

        for (term, silo) in GEO_SLICES {
            if lower.contains(term)
                && known_silos.contains(silo)
                && seen.insert(format!("silo:{}", silo))
            {
                slices.push(filters.with_silo(silo));
            }
        }
        for (term, domain) in DOMAIN_SLICES {
            if lower.contains(term)
                && known_domains.contains(domain)
                && seen.insert(format!("domain:{}", domain))
            {
                slices.push(filters.with_domain(domain));
            }
        }
        slices
    }

    // ── Command routing & status ───────────────────────────────────────

    /// Route a SCRAPE command to a capable agent (by domain when given).
    pub async fn trigger_scrape(&self, url: &str, domain: Option<&str>) -> ScrapeOutcome {
        let target = {
            let agents = self.agents.read();
            match domain {
                Some(d) => agents.values().find(|a| a.domain == d).cloned(),
                None => agents.values().find(|a| a.capabilities.can_scrape).cloned(),
            }
        };

        let Some(agent) = target else {
            return ScrapeOutcome {
                success: false,
                agent_id: None,
                detail: "No suitable agent found for scraping".to_string(),
            };
        };

        let envelope =
            scrape_command("orchestrator", agent.id.clone(), url, domain.map(str::to_string));
        let reply = agent.handle(&envelope).await;
        ScrapeOutcome {
            success: reply.kind != MessageKind::Error,
            agent_id: Some(agent.id.clone()),
            detail: match reply.context {
                Payload::ScrapeReport { detail, .. } => detail,
                Payload::Failure { message, .. } => message,
                _ => String::new(),
            },
        }
    }

    /// STATUS snapshot of the orchestrator and every registered agent.
    pub async fn get_status(&self) -> OrchestratorStatus {
        let agents: Vec<Arc<Agent>> = self.agents.read().values().cloned().collect();
        let mut reports = Vec::new();
        for agent in agents {
            let envelope = status_query("orchestrator", agent.id.clone());
            if let Payload::StatusReport(report) = agent.handle(&envelope).await.context {
                reports.push(report);
            }
        }
        OrchestratorStatus {
            state: *self.state.lock(),
            stats: self.stats_snapshot(),
            agents: reports,
            expert_available: self.expert.read().is_some(),
        }
    }

    pub fn stats_snapshot(&self) -> OrchestratorStats {
        OrchestratorStats {
            total_queries: self.stats.total_queries.load(Ordering::Relaxed),
            total_results_returned: self.stats.total_results.load(Ordering::Relaxed),
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
            average_latency_ms: *self.stats.average_latency_ms.lock(),
            agent_count: self.agents.read().len(),
        }
    }

    fn cache_hit_rate(&self) -> f64 {
        let hits = self.stats.cache_hits.load(Ordering::Relaxed) as f64;
        let misses = self.stats.cache_misses.load(Ordering::Relaxed) as f64;
        hits / (hits + misses).max(1.0)
    }

    /// Shut down every agent, then go offline.
    pub async fn shutdown(&self) {
        info!("[orchestrator] Shutting down...");
        let agents: Vec<Arc<Agent>> = self.agents.read().values().cloned().collect();
        join_all(agents.iter().map(|a| a.shutdown())).await;
        if let Some(expert) = self.expert.read().clone() {
            expert.shutdown().await;
        }
        *self.state.lock() = AgentState::Offline;
        info!("[orchestrator] Shutdown complete");
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Pure helpers
// ═══════════════════════════════════════════════════════════════════════════

fn is_complex_query(query: &str) -> bool {
    let lower = query.to_lowercase();
    COMPLEXITY_INDICATORS.iter().any(|indicator| lower.contains(indicator))
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn payload_name(payload: &Payload) -> &'static str {
    match payload {
        Payload::SearchQuery { .. } => "search_query",
        Payload::SearchResults { .. } => "search_results",
        Payload::StatusQuery {} => "status_query",
        Payload::StatusReport(_) => "status_report",
        Payload::FetchQuery { .. } => "fetch_query",
        Payload::FetchResults { .. } => "fetch_results",
        Payload::AnalyzeQuery { .. } => "analyze_query",
        Payload::ExpertHint { .. } => "expert_hint",
        Payload::EligibilityQuery { .. } => "eligibility_query",
        Payload::EligibilityReport(_) => "eligibility_report",
        Payload::ValidateQuery { .. } => "validate_query",
        Payload::ValidateReport { .. } => "validate_report",
        Payload::ScrapeCommand { .. } => "scrape_command",
        Payload::ScrapeReport { .. } => "scrape_report",
        Payload::Failure { .. } => "failure",
    }
}

/// Union sub-query results: dedup by grant id (falling back to title),
/// re-sort, sum processing times.
fn merge_results(sub_results: Vec<AggregatedResponse>, original_query: &str) -> AggregatedResponse {
    let sub_query_count = sub_results.len();
    let mut all_grants: Vec<ScoredGrant> = Vec::new();
    let mut agents_queried: BTreeSet<String> = BTreeSet::new();
    let mut errors: Vec<AgentFailure> = Vec::new();
    let mut expert_hint = None;
    let mut total_time_ms = 0.0;

    for result in sub_results {
        total_time_ms += result.processing_time_ms;
        agents_queried.extend(result.agents_queried);
        if let Some(sub_errors) = result.errors {
            errors.extend(sub_errors);
        }
        if expert_hint.is_none() {
            expert_hint = result.expert_hint;
        }
        all_grants.extend(result.grants);
    }

    let mut seen = HashSet::new();
    let mut unique: Vec<ScoredGrant> = Vec::new();
    for grant in all_grants {
        let identity = grant.identity().to_string();
        if identity.is_empty() || seen.insert(identity) {
            unique.push(grant);
        }
    }

    unique.sort_by(|a, b| {
        a.rank_key().partial_cmp(&b.rank_key()).unwrap_or(std::cmp::Ordering::Equal)
    });

    AggregatedResponse {
        query: original_query.to_string(),
        agents_queried: agents_queried.into_iter().collect(),
        total_results: unique.len(),
        grants: unique,
        expert_hint,
        processing_time_ms: total_time_ms,
        from_cache: None,
        cache_age_seconds: None,
        decomposed: Some(true),
        sub_query_count: Some(sub_query_count),
        errors: if errors.is_empty() { None } else { Some(errors) },
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::GrantRecord;
    use crate::engine::agent::testkit::{test_agent, HashEncoder};
    use crate::engine::agent::AgentBlueprint;
    use crate::engine::bodies;
    use chrono::NaiveDate;

    async fn mesh() -> Orchestrator {
        let orchestrator = Orchestrator::new(
            &MeshConfig::default(),
            Arc::new(HashEncoder),
            EnvelopeLog::new(),
            None,
        );
        for blueprint in [
            bodies::innovate_uk(),
            bodies::nihr(),
            AgentBlueprint::new("horizon_europe", "Horizon Europe Expert", "horizon_europe", "EU"),
        ] {
            orchestrator.register_agent(test_agent(blueprint).await);
        }
        orchestrator
    }

    fn grant(id: &str, title: &str, description: &str, deadline: (i32, u32, u32)) -> GrantRecord {
        let mut g = GrantRecord::new(id, title);
        g.description = description.into();
        g.deadline = NaiveDate::from_ymd_opt(deadline.0, deadline.1, deadline.2);
        g
    }

    #[tokio::test]
    async fn test_empty_query_is_hard_failure() {
        let orchestrator = mesh().await;
        let err = orchestrator.query("   ", 10, QueryFilters::default()).await.unwrap_err();
        assert!(matches!(err, MeshError::Config(_)));
    }

    #[tokio::test]
    async fn test_query_counts_and_caches() {
        let orchestrator = mesh().await;
        let first = orchestrator.query("AI funding", 10, QueryFilters::default()).await.unwrap();
        assert_eq!(first.from_cache, None);

        let second = orchestrator.query("ai  FUNDING", 10, QueryFilters::default()).await.unwrap();
        assert_eq!(second.from_cache, Some(true));
        assert!(second.cache_age_seconds.unwrap() >= 0.0);
        assert_eq!(second.grants, first.grants);

        let stats = orchestrator.stats_snapshot();
        assert_eq!(stats.total_queries, 1, "cache hits do not re-execute");
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[tokio::test]
    async fn test_agent_source_matches_agents_queried() {
        let orchestrator = mesh().await;
        let iuk = orchestrator.agents.read().get("innovate_uk").unwrap().clone();
        iuk.index_one(&grant("g1", "Smart Grants Spring", "AI and digital", (2025, 3, 31)))
            .await
            .unwrap();

        let response =
            orchestrator.query("Smart Grants", 10, QueryFilters::default()).await.unwrap();
        assert!(response.total_results >= 1);
        for g in &response.grants {
            let source = g.agent_source.as_deref().unwrap();
            assert!(response.agents_queried.iter().any(|a| a == source));
            assert!(g.relevance_score.is_some());
        }
    }

    #[tokio::test]
    async fn test_decompose_respects_registry() {
        let orchestrator = mesh().await;
        // "us" has no registered silo and "research" (ukri) no registered
        // domain, so neither produces a slice.
        let slices = orchestrator.decompose("UK and US research", &QueryFilters::default());
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].silos, vec!["UK"]);
    }

    #[tokio::test]
    async fn test_decompose_dedups_eu_terms() {
        let orchestrator = mesh().await;
        let slices =
            orchestrator.decompose("europe and eu health funding", &QueryFilters::default());
        // "eu" + "europe" collapse into one EU slice; "health" adds nihr.
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].silos, vec!["EU"]);
        assert_eq!(slices[1].domains, vec!["nihr"]);
    }

    #[test]
    fn test_is_complex_query() {
        assert!(is_complex_query("UK AI and EU research"));
        assert!(is_complex_query("grants for various sectors"));
        assert!(!is_complex_query("clinical trials"));
        assert!(!is_complex_query("AI accelerator"));
    }

    #[test]
    fn test_merge_dedups_and_sums_time() {
        let mut a = ScoredGrant::default();
        a.grant = GrantRecord::new("g1", "Shared Grant");
        a.relevance_score = Some(0.9);
        let mut b = a.clone();
        b.relevance_score = Some(0.8);
        let mut c = ScoredGrant::default();
        c.grant = GrantRecord::new("g2", "Other Grant");
        c.relevance_score = Some(0.5);

        let merged = merge_results(
            vec![
                AggregatedResponse {
                    query: "q".into(),
                    agents_queried: vec!["innovate_uk".into()],
                    total_results: 2,
                    grants: vec![a, c],
                    processing_time_ms: 10.0,
                    ..Default::default()
                },
                AggregatedResponse {
                    query: "q".into(),
                    agents_queried: vec!["horizon_europe".into()],
                    total_results: 1,
                    grants: vec![b],
                    processing_time_ms: 15.0,
                    ..Default::default()
                },
            ],
            "original",
        );

        assert_eq!(merged.total_results, 2, "duplicate grant_id collapsed");
        assert_eq!(merged.sub_query_count, Some(2));
        assert_eq!(merged.decomposed, Some(true));
        assert!((merged.processing_time_ms - 25.0).abs() < 1e-9);
        assert_eq!(merged.agents_queried, vec!["horizon_europe", "innovate_uk"]);
        // First occurrence wins; order by relevance.
        assert_eq!(merged.grants[0].relevance_score, Some(0.9));
    }

    #[test]
    fn test_cosine_bounds() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_scrape_without_capable_agent() {
        let orchestrator = Orchestrator::new(
            &MeshConfig::default(),
            Arc::new(HashEncoder),
            EnvelopeLog::new(),
            None,
        );
        let outcome = orchestrator.trigger_scrape("https://example.org", None).await;
        assert!(!outcome.success);
        assert!(outcome.agent_id.is_none());
    }

    #[tokio::test]
    async fn test_scrape_routes_to_domain_agent_without_handler() {
        let orchestrator = mesh().await;
        let outcome =
            orchestrator.trigger_scrape("https://example.org", Some("innovate_uk")).await;
        // The default agents register no SCRAPE handler, so the command is
        // answered with an error envelope.
        assert!(!outcome.success);
        assert_eq!(outcome.agent_id.as_deref(), Some("innovate_uk"));
        assert!(outcome.detail.contains("No handler"));
    }

    #[tokio::test]
    async fn test_get_status_and_shutdown() {
        let orchestrator = mesh().await;
        let status = orchestrator.get_status().await;
        assert_eq!(status.state, AgentState::Active);
        assert_eq!(status.agents.len(), 3);
        assert!(!status.expert_available);

        orchestrator.shutdown().await;
        let status = orchestrator.get_status().await;
        assert_eq!(status.state, AgentState::Offline);
    }
}
