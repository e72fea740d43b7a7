// Grantmesh Engine — Agent Hybrid Search
//
// Blends vector similarity (semantic) with token overlap (lexical):
//
//   semantic = clamp(1 − distance, 0, 1)
//   keyword  = |Q ∩ T| / max(|Q|, 1)
//   combined = semantic_weight · semantic + keyword_weight · keyword
//
// The collection is over-fetched (default 3×) so the lexical component can
// promote rows past the raw vector ordering before the cut to max_results.

use std::collections::HashSet;

use log::info;
use serde_json::{Map, Value};

use crate::atoms::error::MeshResult;
use crate::atoms::types::{GrantRecord, QueryFilters, ScoredGrant};
use crate::engine::vector::parse_metadata;

use super::Agent;

impl Agent {
    /// Hybrid search over this agent's collection.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        filters: &QueryFilters,
    ) -> MeshResult<Vec<ScoredGrant>> {
        self.search_with_embedding(query, max_results, filters, None).await
    }

    /// Like `search`, but reuses a precomputed query embedding when the
    /// sender attached one to the envelope.
    pub(crate) async fn search_with_embedding(
        &self,
        query: &str,
        max_results: usize,
        filters: &QueryFilters,
        precomputed: Option<&[f32]>,
    ) -> MeshResult<Vec<ScoredGrant>> {
        let query_vector = match precomputed {
            Some(vector) => vector.to_vec(),
            None => self.encoder.encode(query).await?,
        };
        let query_terms = token_set(query);

        // Over-fetch so re-ranking has room to work with.
        let k = (max_results * self.hybrid.overfetch_multiplier).max(1);
        let where_clause = if filters.metadata.is_empty() {
            None
        } else {
            Some(&filters.metadata)
        };

        let hits = self.collection.query(&query_vector, k, where_clause).await?;

        let mut grants: Vec<ScoredGrant> = Vec::with_capacity(hits.len());
        for hit in &hits {
            let grant = grant_from_metadata(parse_metadata(&hit.metadata));

            let semantic = (1.0 - hit.distance as f64).clamp(0.0, 1.0);
            let grant_terms = token_set(&grant.headline_text());
            let overlap = query_terms.intersection(&grant_terms).count();
            let keyword = overlap as f64 / query_terms.len().max(1) as f64;
            let combined =
                self.hybrid.semantic_weight * semantic + self.hybrid.keyword_weight * keyword;

            grants.push(ScoredGrant {
                grant,
                combined_score: combined,
                semantic_score: semantic,
                keyword_score: keyword,
                relevance_score: None,
                agent_source: None,
            });
        }

        grants.sort_by(|a, b| {
            b.combined_score.partial_cmp(&a.combined_score).unwrap_or(std::cmp::Ordering::Equal)
        });
        grants.truncate(max_results);

        info!("[{}] Hybrid search '{}': {} results", self.id, query, grants.len());
        Ok(grants)
    }
}

/// Lowercased whitespace token set.
fn token_set(text: &str) -> HashSet<String> {
    text.to_lowercase().split_whitespace().map(str::to_string).collect()
}

/// Rebuild a grant from a parsed metadata map, tolerating rows whose typed
/// fields do not deserialize (they are demoted to `extra` instead of being
/// dropped).
pub fn grant_from_metadata(metadata: Map<String, Value>) -> GrantRecord {
    match serde_json::from_value(Value::Object(metadata.clone())) {
        Ok(grant) => grant,
        Err(_) => {
            let mut grant = GrantRecord::default();
            for (key, value) in metadata {
                match key.as_str() {
                    "grant_id" => grant.grant_id = value.as_str().unwrap_or_default().to_string(),
                    "title" => grant.title = value.as_str().unwrap_or_default().to_string(),
                    "description" => {
                        grant.description = value.as_str().unwrap_or_default().to_string()
                    }
                    _ => {
                        grant.extra.insert(key, value);
                    }
                }
            }
            grant
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::test_agent;
    use super::super::AgentBlueprint;
    use super::*;
    use crate::atoms::types::GrantRecord;
    use chrono::NaiveDate;
    use serde_json::json;

    fn blueprint() -> AgentBlueprint {
        AgentBlueprint::new("innovate_uk", "Innovate UK Expert", "innovate_uk", "UK")
    }

    fn grant(id: &str, title: &str, description: &str) -> GrantRecord {
        let mut g = GrantRecord::new(id, title);
        g.description = description.into();
        g
    }

    #[tokio::test]
    async fn test_exact_title_query_ranks_first() {
        let agent = test_agent(blueprint()).await;
        agent.index_one(&grant("g1", "Smart Grants Spring", "AI and digital funding")).await.unwrap();
        agent.index_one(&grant("g2", "Clean Energy Voucher", "heat pump installations")).await.unwrap();
        agent.index_one(&grant("g3", "Aerospace CR&D", "collaborative aerospace research")).await.unwrap();

        let results = agent
            .search("Smart Grants Spring", 10, &QueryFilters::default())
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].grant.grant_id, "g1");
        assert!(results[0].keyword_score > results[1].keyword_score);
    }

    #[tokio::test]
    async fn test_scores_attached_and_in_range() {
        let agent = test_agent(blueprint()).await;
        agent.index_one(&grant("g1", "AI Innovation", "funding for AI")).await.unwrap();

        let results = agent.search("AI funding", 5, &QueryFilters::default()).await.unwrap();
        for r in &results {
            assert!((0.0..=1.0).contains(&r.semantic_score));
            assert!((0.0..=1.0).contains(&r.keyword_score));
            assert!((0.0..=1.0).contains(&r.combined_score));
            let expected = 0.7 * r.semantic_score + 0.3 * r.keyword_score;
            assert!((r.combined_score - expected).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_returns_at_most_max_results() {
        let agent = test_agent(blueprint()).await;
        for i in 0..8 {
            agent
                .index_one(&grant(&format!("g{}", i), &format!("AI grant {}", i), "AI funding"))
                .await
                .unwrap();
        }
        let results = agent.search("AI funding", 3, &QueryFilters::default()).await.unwrap();
        assert_eq!(results.len(), 3);

        // Sorted non-increasing by combined score.
        for pair in results.windows(2) {
            assert!(pair[0].combined_score >= pair[1].combined_score);
        }
    }

    #[tokio::test]
    async fn test_nested_fields_deserialized_in_results() {
        let agent = test_agent(blueprint()).await;
        let mut g = grant("g1", "Sector Grant", "multi sector call");
        g.sectors = vec!["AI".into(), "Health & Life Sciences".into()];
        g.deadline = NaiveDate::from_ymd_opt(2025, 3, 31);
        agent.index_one(&g).await.unwrap();

        let results = agent.search("Sector Grant", 5, &QueryFilters::default()).await.unwrap();
        let hit = &results[0];
        assert_eq!(hit.grant.sectors, vec!["AI", "Health & Life Sciences"]);
        assert_eq!(hit.grant.deadline, NaiveDate::from_ymd_opt(2025, 3, 31));
        // Derived fields surface through `extra`.
        assert_eq!(hit.grant.extra["agent_id"], json!("innovate_uk"));
    }

    #[tokio::test]
    async fn test_metadata_filter_narrows_results() {
        let agent = test_agent(blueprint()).await;
        let mut open = grant("g1", "Open Call", "general funding");
        open.extra.insert("stage".into(), json!("open"));
        let mut closed = grant("g2", "Closed Call", "general funding");
        closed.extra.insert("stage".into(), json!("closed"));
        agent.index_one(&open).await.unwrap();
        agent.index_one(&closed).await.unwrap();

        let mut filters = QueryFilters::default();
        filters.metadata.insert("stage".into(), json!("open"));
        let results = agent.search("general funding", 10, &filters).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].grant.grant_id, "g1");
    }

    #[tokio::test]
    async fn test_precomputed_embedding_is_used() {
        let agent = test_agent(blueprint()).await;
        agent.index_one(&grant("g1", "Quantum Grant", "quantum computing")).await.unwrap();

        let vector = super::super::testkit::hash_embed("Quantum Grant quantum computing");
        let results = agent
            .search_with_embedding("Quantum Grant", 5, &QueryFilters::default(), Some(&vector))
            .await
            .unwrap();
        assert_eq!(results[0].grant.grant_id, "g1");
        assert!(results[0].semantic_score > 0.9);
    }

    #[test]
    fn test_grant_from_metadata_tolerates_bad_types() {
        let mut map = Map::new();
        map.insert("grant_id".into(), json!("g1"));
        map.insert("title".into(), json!("Broken Deadline"));
        map.insert("deadline".into(), json!("not-a-date"));
        let grant = grant_from_metadata(map);
        assert_eq!(grant.grant_id, "g1");
        assert_eq!(grant.title, "Broken Deadline");
        assert!(grant.deadline.is_none());
        assert_eq!(grant.extra["deadline"], json!("not-a-date"));
    }

    #[test]
    fn test_token_set_lowercases() {
        let set = token_set("AI Funding for SMEs");
        assert!(set.contains("ai"));
        assert!(set.contains("funding"));
        assert!(set.contains("smes"));
    }
}
