// Grantmesh Engine — Routing Strategies
//
// Pure selection: (query, filters, registry) → ordered subset of agents.
// No strategy ever returns an empty list while agents exist — an empty
// match falls back to "all agents".
//
// Determinism: the registry is a BTreeMap and keyword triggers are walked
// in sorted domain order, so identical inputs always select identically.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::atoms::types::QueryFilters;
use crate::engine::agent::Agent;
use crate::engine::config::RoutingConfig;

/// Agent registry: additive during startup, read-only at query time.
pub type AgentRegistry = BTreeMap<String, Arc<Agent>>;

/// Per-domain trigger phrases for keyword routing.
pub type KeywordTriggers = BTreeMap<String, Vec<String>>;

#[derive(Clone)]
pub enum RoutingStrategy {
    /// Filter by silo/domain tags (default). Empty filter = any.
    Silo,
    /// Select domains whose trigger phrases appear in the query.
    Keyword(KeywordTriggers),
    /// Always all agents.
    Broadcast,
}

/// Built-in trigger phrases, used when the config does not override them.
pub fn default_keyword_triggers() -> KeywordTriggers {
    let mut triggers = BTreeMap::new();
    triggers.insert(
        "horizon_europe".to_string(),
        vec!["horizon".into(), "eic".into(), "european".into(), "eu funding".into()],
    );
    triggers.insert(
        "innovate_uk".to_string(),
        vec!["innovate uk".into(), "iuk".into(), "cr&d".into()],
    );
    triggers.insert(
        "nihr".to_string(),
        vec!["nihr".into(), "health research".into(), "clinical".into()],
    );
    triggers.insert(
        "ukri".to_string(),
        vec!["ukri".into(), "research council".into(), "epsrc".into(), "esrc".into(), "nerc".into()],
    );
    triggers
}

impl RoutingStrategy {
    /// Resolve the configured strategy name.
    pub fn from_config(config: &RoutingConfig) -> Self {
        match config.strategy.as_str() {
            "broadcast" => RoutingStrategy::Broadcast,
            "keyword" => {
                let triggers = if config.keyword_triggers.is_empty() {
                    default_keyword_triggers()
                } else {
                    config.keyword_triggers.clone()
                };
                RoutingStrategy::Keyword(triggers)
            }
            _ => RoutingStrategy::Silo,
        }
    }

    /// Strategy name as written to the query log.
    pub fn name(&self) -> &'static str {
        match self {
            RoutingStrategy::Silo => "SiloRouting",
            RoutingStrategy::Keyword(_) => "KeywordRouting",
            RoutingStrategy::Broadcast => "BroadcastRouting",
        }
    }

    /// Select the agents that should service this query. Pure: no strategy
    /// may mutate anything.
    pub fn select(
        &self,
        query: &str,
        filters: &QueryFilters,
        agents: &AgentRegistry,
    ) -> Vec<Arc<Agent>> {
        let selected = match self {
            RoutingStrategy::Silo => agents
                .values()
                .filter(|agent| {
                    (filters.silos.is_empty() || filters.silos.contains(&agent.silo))
                        && (filters.domains.is_empty() || filters.domains.contains(&agent.domain))
                })
                .cloned()
                .collect::<Vec<_>>(),

            RoutingStrategy::Keyword(triggers) => {
                let query_lower = query.to_lowercase();
                let matched_domains: Vec<&String> = triggers
                    .iter()
                    .filter(|(_, keywords)| keywords.iter().any(|kw| query_lower.contains(kw)))
                    .map(|(domain, _)| domain)
                    .collect();
                agents
                    .values()
                    .filter(|agent| matched_domains.iter().any(|d| **d == agent.domain))
                    .cloned()
                    .collect()
            }

            RoutingStrategy::Broadcast => agents.values().cloned().collect(),
        };

        // Routing never returns an empty list while agents exist.
        if selected.is_empty() {
            agents.values().cloned().collect()
        } else {
            selected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::agent::testkit::test_agent;
    use crate::engine::agent::AgentBlueprint;
    use crate::engine::bodies;

    async fn registry() -> AgentRegistry {
        let mut agents = AgentRegistry::new();
        for blueprint in [
            bodies::innovate_uk(),
            bodies::nihr(),
            AgentBlueprint::new("horizon_europe", "Horizon Europe Expert", "horizon_europe", "EU"),
        ] {
            let agent = test_agent(blueprint).await;
            agents.insert(agent.id.clone(), agent);
        }
        agents
    }

    fn ids(selected: &[Arc<Agent>]) -> Vec<&str> {
        selected.iter().map(|a| a.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_silo_routing_filters_by_silo() {
        let agents = registry().await;
        let mut filters = QueryFilters::default();
        filters.silos = vec!["UK".into()];

        let selected = RoutingStrategy::Silo.select("AI funding", &filters, &agents);
        assert_eq!(ids(&selected), vec!["innovate_uk", "nihr"]);
    }

    #[tokio::test]
    async fn test_silo_routing_filters_by_domain() {
        let agents = registry().await;
        let mut filters = QueryFilters::default();
        filters.domains = vec!["nihr".into()];

        let selected = RoutingStrategy::Silo.select("clinical", &filters, &agents);
        assert_eq!(ids(&selected), vec!["nihr"]);
    }

    #[tokio::test]
    async fn test_silo_routing_empty_filter_selects_all() {
        let agents = registry().await;
        let selected = RoutingStrategy::Silo.select("anything", &QueryFilters::default(), &agents);
        assert_eq!(selected.len(), 3);
    }

    #[tokio::test]
    async fn test_impossible_filter_falls_back_to_all() {
        let agents = registry().await;
        let mut filters = QueryFilters::default();
        filters.silos = vec!["US".into()];

        let selected = RoutingStrategy::Silo.select("anything", &filters, &agents);
        assert_eq!(selected.len(), 3, "selection must never be empty while agents exist");
    }

    #[tokio::test]
    async fn test_keyword_routing_matches_trigger() {
        let agents = registry().await;
        let strategy = RoutingStrategy::Keyword(default_keyword_triggers());

        let selected = strategy.select("horizon opportunities", &QueryFilters::default(), &agents);
        assert_eq!(ids(&selected), vec!["horizon_europe"]);

        let selected = strategy.select("clinical trials", &QueryFilters::default(), &agents);
        assert_eq!(ids(&selected), vec!["nihr"]);
    }

    #[tokio::test]
    async fn test_keyword_routing_no_match_selects_all() {
        let agents = registry().await;
        let strategy = RoutingStrategy::Keyword(default_keyword_triggers());
        let selected = strategy.select("quantum computing", &QueryFilters::default(), &agents);
        assert_eq!(selected.len(), 3);
    }

    #[tokio::test]
    async fn test_broadcast_selects_all() {
        let agents = registry().await;
        let mut filters = QueryFilters::default();
        filters.silos = vec!["UK".into()]; // ignored by broadcast
        let selected = RoutingStrategy::Broadcast.select("anything", &filters, &agents);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_from_config_resolves_names() {
        let mut config = RoutingConfig::default();
        assert_eq!(RoutingStrategy::from_config(&config).name(), "SiloRouting");
        config.strategy = "keyword".into();
        assert_eq!(RoutingStrategy::from_config(&config).name(), "KeywordRouting");
        config.strategy = "broadcast".into();
        assert_eq!(RoutingStrategy::from_config(&config).name(), "BroadcastRouting");
    }
}
