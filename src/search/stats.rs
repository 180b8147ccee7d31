//! Per-request statistics and the orchestrator's running counters.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::types::{ProcessedQuery, RetrievedFragment, SearchMode, SearchStats};

const UNKNOWN: &str = "unknown";

fn distribution<'a>(labels: impl Iterator<Item = Option<&'a str>>) -> BTreeMap<String, usize> {
   let mut counts = BTreeMap::new();
   for label in labels {
      *counts
         .entry(label.unwrap_or(UNKNOWN).to_string())
         .or_insert(0) += 1;
   }
   counts
}

/// Statistics over the fragments the backend returned, before filtering.
pub fn request_stats(
   request_id: String,
   pq: &ProcessedQuery,
   fragments: &[RetrievedFragment],
   search_ms: f64,
   expansion_applied: bool,
) -> SearchStats {
   let search_sources = SearchMode::ALL
      .into_iter()
      .map(|mode| {
         let count = fragments.iter().filter(|f| f.source == mode).count();
         (mode.as_str().to_string(), count)
      })
      .collect();

   let avg_result_score = if fragments.is_empty() {
      0.0
   } else {
      fragments.iter().map(|f| f.score).sum::<f64>() / fragments.len() as f64
   };

   SearchStats {
      request_id,
      query_processing_ms: pq.processing_ms,
      search_ms,
      results_found: fragments.len(),
      used_query_rewriting: pq.used_rewriting,
      query_confidence: pq.confidence,
      expansion_applied,
      search_sources,
      avg_result_score,
      stack_distribution: distribution(fragments.iter().map(|f| f.metadata.stack.as_deref())),
      category_distribution: distribution(
         fragments.iter().map(|f| f.metadata.category.as_deref()),
      ),
      ..SearchStats::default()
   }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
   pub total_searches:    u64,
   pub cache_hits:        u64,
   pub errors:            u64,
   pub avg_processing_ms: f64,
   pub searches_by_mode:  BTreeMap<String, u64>,
   pub top_queries:       Vec<(String, u64)>,
}

/// Counters shared by all requests; the orchestrator keeps them behind a
/// mutex.
#[derive(Debug)]
pub struct EngineCounters {
   total_searches:    u64,
   cache_hits:        u64,
   errors:            u64,
   avg_processing_ms: f64,
   by_mode:           BTreeMap<SearchMode, u64>,
   top_queries:       HashMap<String, u64>,
   capacity:          usize,
}

impl EngineCounters {
   pub fn new(top_query_capacity: usize) -> Self {
      Self {
         total_searches:    0,
         cache_hits:        0,
         errors:            0,
         avg_processing_ms: 0.0,
         by_mode:           BTreeMap::new(),
         top_queries:       HashMap::new(),
         capacity:          top_query_capacity,
      }
   }

   pub fn record_search(&mut self, mode: SearchMode, query: &str, elapsed_ms: f64) {
      self.total_searches += 1;
      let n = self.total_searches as f64;
      self.avg_processing_ms = self.avg_processing_ms.mul_add(n - 1.0, elapsed_ms) / n;
      *self.by_mode.entry(mode).or_insert(0) += 1;

      *self
         .top_queries
         .entry(query.trim().to_lowercase())
         .or_insert(0) += 1;
      if self.top_queries.len() > self.capacity {
         let keep: HashMap<String, u64> = ranked(&self.top_queries)
            .into_iter()
            .take(self.capacity)
            .collect();
         self.top_queries = keep;
      }
   }

   pub const fn record_cache_hit(&mut self) {
      self.cache_hits += 1;
   }

   pub const fn record_error(&mut self) {
      self.errors += 1;
   }

   pub fn snapshot(&self, top: usize) -> EngineStats {
      EngineStats {
         total_searches:    self.total_searches,
         cache_hits:        self.cache_hits,
         errors:            self.errors,
         avg_processing_ms: self.avg_processing_ms,
         searches_by_mode:  SearchMode::ALL
            .into_iter()
            .map(|mode| (mode.to_string(), self.by_mode.get(&mode).copied().unwrap_or(0)))
            .collect(),
         top_queries:       ranked(&self.top_queries).into_iter().take(top).collect(),
      }
   }
}

/// Most frequent first, ties alphabetical.
fn ranked(queries: &HashMap<String, u64>) -> Vec<(String, u64)> {
   let mut ranked: Vec<(String, u64)> = queries.iter().map(|(q, n)| (q.clone(), *n)).collect();
   ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
   ranked
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::types::{FragmentMetadata, Intent};

   fn fragment(source: SearchMode, score: f64, stack: Option<&str>) -> RetrievedFragment {
      RetrievedFragment {
         id: format!("{source}-{score}"),
         content: String::new(),
         title: None,
         url: None,
         license: None,
         score,
         source,
         rationale: None,
         highlights: Vec::new(),
         metadata: FragmentMetadata {
            stack: stack.map(str::to_string),
            ..FragmentMetadata::default()
         },
      }
   }

   #[test]
   fn request_stats_summarize_fragments() {
      let pq = ProcessedQuery {
         original:        "q".into(),
         rewritten:       "q".into(),
         expansion_terms: Vec::new(),
         intent:          Intent::General,
         stack_hints:     Vec::new(),
         category_hints:  Vec::new(),
         confidence:      0.8,
         used_rewriting:  true,
         processing_ms:   3.0,
      };
      let fragments = vec![
         fragment(SearchMode::Vector, 0.5, Some("react")),
         fragment(SearchMode::Text, 0.3, Some("react")),
         fragment(SearchMode::Text, 0.1, None),
      ];
      let stats = request_stats("id".into(), &pq, &fragments, 7.0, true);
      assert_eq!(stats.results_found, 3);
      assert_eq!(stats.search_sources["text"], 2);
      assert_eq!(stats.search_sources["hybrid"], 0);
      assert!((stats.avg_result_score - 0.3).abs() < 1e-9);
      assert_eq!(stats.stack_distribution["react"], 2);
      assert_eq!(stats.stack_distribution["unknown"], 1);
      assert_eq!(stats.category_distribution["unknown"], 3);
      assert!(stats.expansion_applied);
      assert!(stats.used_query_rewriting);
   }

   #[test]
   fn rolling_average_and_modes() {
      let mut counters = EngineCounters::new(100);
      counters.record_search(SearchMode::Hybrid, "a", 10.0);
      counters.record_search(SearchMode::Text, "b", 20.0);
      counters.record_search(SearchMode::Hybrid, "A ", 30.0);
      let stats = counters.snapshot(10);
      assert_eq!(stats.total_searches, 3);
      assert!((stats.avg_processing_ms - 20.0).abs() < 1e-9);
      assert_eq!(stats.searches_by_mode["hybrid"], 2);
      assert_eq!(stats.searches_by_mode["vector"], 0);
      assert_eq!(stats.top_queries[0], ("a".to_string(), 2));
   }

   #[test]
   fn top_queries_are_capped() {
      let mut counters = EngineCounters::new(3);
      for _ in 0..5 {
         counters.record_search(SearchMode::Text, "popular", 1.0);
      }
      for i in 0..10 {
         counters.record_search(SearchMode::Text, &format!("rare {i}"), 1.0);
      }
      let stats = counters.snapshot(100);
      assert_eq!(stats.top_queries.len(), 3);
      assert_eq!(stats.top_queries[0], ("popular".to_string(), 5));
   }
}
