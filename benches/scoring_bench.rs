// Hybrid scoring micro-benchmarks: token-overlap scoring and the
// combined-score sort that every search response goes through.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashSet;

fn token_set(text: &str) -> HashSet<String> {
    text.to_lowercase().split_whitespace().map(str::to_string).collect()
}

fn keyword_score(query_terms: &HashSet<String>, text: &str) -> f64 {
    let grant_terms = token_set(text);
    let overlap = query_terms.intersection(&grant_terms).count();
    overlap as f64 / query_terms.len().max(1) as f64
}

fn corpus() -> Vec<String> {
    (0..300)
        .map(|i| {
            format!(
                "Grant {i}: collaborative research and development funding for AI, digital \
                 health and clean energy projects led by UK registered SMEs, round {i}"
            )
        })
        .collect()
}

fn bench_keyword_scoring(c: &mut Criterion) {
    let query_terms = token_set("AI funding for UK digital health SMEs");
    let docs = corpus();

    c.bench_function("keyword_score_300_docs", |b| {
        b.iter(|| {
            let total: f64 =
                docs.iter().map(|doc| keyword_score(black_box(&query_terms), doc)).sum();
            black_box(total)
        })
    });
}

fn bench_combined_sort(c: &mut Criterion) {
    let query_terms = token_set("AI funding for UK digital health SMEs");
    let docs = corpus();
    let scored: Vec<(f64, usize)> = docs
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let semantic = 1.0 - (i as f64 / docs.len() as f64);
            let keyword = keyword_score(&query_terms, doc);
            (0.7 * semantic + 0.3 * keyword, i)
        })
        .collect();

    c.bench_function("combined_sort_300_docs", |b| {
        b.iter(|| {
            let mut rows = scored.clone();
            rows.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            black_box(rows.first().copied())
        })
    });
}

criterion_group!(benches, bench_keyword_scoring, bench_combined_sort);
criterion_main!(benches);
