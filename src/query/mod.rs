//! Query analysis: intent and hint detection, optional external rewriting
//! behind a confidence gate, and local term expansion.

pub mod rewrite;
pub mod vocab;

use std::{
   sync::{
      Arc,
      atomic::{AtomicU64, Ordering},
   },
   time::Instant,
};

use moka::{future::Cache, policy::EvictionPolicy};
pub use rewrite::{HttpRewriter, Rewrite, RewriteRequest, Rewriter};
use serde::Serialize;

use crate::{
   config::QueryConfig,
   error::RewriteError,
   types::{Intent, ProcessedQuery, QueryContext},
};

/// Intent with the most phrase hits wins; ties resolve in table order. No
/// hits means [`Intent::General`].
pub fn detect_intent(query: &str) -> Intent {
   let lower = query.to_lowercase();
   let mut best = (Intent::General, 0usize);
   for (intent, phrases) in vocab::INTENT_PHRASES {
      let hits = phrases.iter().filter(|phrase| lower.contains(*phrase)).count();
      if hits > best.1 {
         best = (*intent, hits);
      }
   }
   best.0
}

fn detect_labels(query: &str, table: &[(&str, &[&str])]) -> Vec<String> {
   let lower = query.to_lowercase();
   table
      .iter()
      .filter(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
      .map(|(label, _)| (*label).to_string())
      .collect()
}

pub fn detect_stacks(query: &str) -> Vec<String> {
   detect_labels(query, vocab::STACK_KEYWORDS)
}

pub fn detect_categories(query: &str) -> Vec<String> {
   detect_labels(query, vocab::CATEGORY_KEYWORDS)
}

/// Very short queries and queries already pinned to two or more stacks with a
/// clear intent are left alone.
pub fn should_rewrite(query: &str, intent: Intent, stack_hints: &[String]) -> bool {
   if query.split_whitespace().count() <= 2 {
      return false;
   }
   !(stack_hints.len() >= 2 && intent != Intent::General)
}

/// Table-driven synonyms for the detected hints, minus words already in the
/// query. Order follows the tables; duplicates are dropped.
pub fn expand_locally(
   query: &str,
   stack_hints: &[String],
   category_hints: &[String],
) -> Vec<String> {
   let lower = query.to_lowercase();
   let words: Vec<&str> = lower.split_whitespace().collect();

   let fires = |rule: &vocab::Expansion, hints: &[String]| {
      hints.iter().any(|h| h == rule.hint)
         && (rule.triggers.is_empty() || rule.triggers.iter().any(|t| lower.contains(t)))
   };

   let mut terms: Vec<String> = Vec::new();
   let rules = vocab::STACK_EXPANSIONS
      .iter()
      .filter(|rule| fires(rule, stack_hints))
      .chain(vocab::CATEGORY_EXPANSIONS.iter().filter(|rule| fires(rule, category_hints)));
   for rule in rules {
      for term in rule.terms {
         let folded = term.to_lowercase();
         let duplicate = terms.iter().any(|t| t.eq_ignore_ascii_case(term));
         if duplicate || words.contains(&folded.as_str()) {
            continue;
         }
         terms.push((*term).to_string());
      }
   }
   terms
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
   pub processed:          u64,
   pub memo_hits:          u64,
   pub rewrites_attempted: u64,
   pub rewrites_accepted:  u64,
   pub rewrites_rejected:  u64,
   pub rewrites_failed:    u64,
   pub memo_entries:       u64,
}

#[derive(Default)]
struct Counters {
   processed: AtomicU64,
   memo_hits: AtomicU64,
   attempted: AtomicU64,
   accepted:  AtomicU64,
   rejected:  AtomicU64,
   failed:    AtomicU64,
}

pub struct QueryProcessor {
   config:   QueryConfig,
   rewriter: Option<Arc<dyn Rewriter>>,
   memo:     Cache<String, Arc<ProcessedQuery>>,
   counters: Counters,
}

impl QueryProcessor {
   pub fn new(config: QueryConfig, rewriter: Option<Arc<dyn Rewriter>>) -> Self {
      // Least-recently-used trimming stands in for oldest-first; a hot key
      // survives longer than under pure insertion order.
      let memo = Cache::builder()
         .max_capacity(config.memo_capacity)
         .eviction_policy(EvictionPolicy::lru())
         .build();
      Self { config, rewriter, memo, counters: Counters::default() }
   }

   pub const fn config(&self) -> &QueryConfig {
      &self.config
   }

   /// Analyzes `query`. Never fails: rewriting problems fall back to the
   /// original text. Identical query and context pairs are memoized.
   pub async fn process(&self, query: &str, context: &QueryContext) -> ProcessedQuery {
      let key = memo_key(query, context);
      if let Some(hit) = self.memo.get(&key).await {
         self.counters.memo_hits.fetch_add(1, Ordering::Relaxed);
         // Keys are case-folded; echo the caller's own spelling.
         let mut processed = (*hit).clone();
         processed.original = query.trim().to_string();
         if !processed.used_rewriting {
            processed.rewritten.clone_from(&processed.original);
         }
         return processed;
      }

      let processed = self.analyze(query, context).await;
      self.counters.processed.fetch_add(1, Ordering::Relaxed);
      self.memo.insert(key, Arc::new(processed.clone())).await;
      processed
   }

   async fn analyze(&self, query: &str, context: &QueryContext) -> ProcessedQuery {
      let start = Instant::now();
      let original = query.trim().to_string();
      let intent = detect_intent(&original);
      let stack_hints = detect_stacks(&original);
      let category_hints = detect_categories(&original);

      let mut rewritten = original.clone();
      let mut proposed_terms = None;
      let mut confidence = 1.0;
      let mut used_rewriting = false;

      if let Some(rewriter) = &self.rewriter
         && should_rewrite(&original, intent, &stack_hints)
      {
         let request = RewriteRequest {
            query: &original,
            intent,
            stack_hints: &stack_hints,
            category_hints: &category_hints,
            context,
         };
         self.counters.attempted.fetch_add(1, Ordering::Relaxed);
         match self.call_rewriter(rewriter.as_ref(), &request).await {
            Ok(proposal) if proposal.confidence >= self.config.rewrite_threshold => {
               self.counters.accepted.fetch_add(1, Ordering::Relaxed);
               rewritten = proposal.rewritten_query.trim().to_string();
               proposed_terms = Some(proposal.expanded_terms);
               confidence = proposal.confidence;
               used_rewriting = true;
            },
            Ok(proposal) => {
               self.counters.rejected.fetch_add(1, Ordering::Relaxed);
               tracing::debug!(
                  confidence = proposal.confidence,
                  "rewrite below threshold, keeping original"
               );
            },
            Err(e) => {
               self.counters.failed.fetch_add(1, Ordering::Relaxed);
               tracing::warn!(error = %e, "query rewrite failed, keeping original");
            },
         }
      }

      // Local synonyms only stand in when no rewrite was accepted.
      let expansion_terms = proposed_terms
         .unwrap_or_else(|| expand_locally(&original, &stack_hints, &category_hints));
      let expansion_terms = normalize_terms(expansion_terms, self.config.max_expanded_terms);

      ProcessedQuery {
         original,
         rewritten,
         expansion_terms,
         intent,
         stack_hints,
         category_hints,
         confidence,
         used_rewriting,
         processing_ms: start.elapsed().as_secs_f64() * 1000.0,
      }
   }

   async fn call_rewriter(
      &self,
      rewriter: &dyn Rewriter,
      request: &RewriteRequest<'_>,
   ) -> Result<Rewrite, RewriteError> {
      let timeout = self.config.rewrite_timeout();
      match tokio::time::timeout(timeout, rewriter.rewrite(request)).await {
         Ok(result) => result?.validate(),
         Err(_) => Err(RewriteError::Timeout(timeout.as_millis() as u64)),
      }
   }

   pub fn stats(&self) -> ProcessorStats {
      let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
      ProcessorStats {
         processed:          load(&self.counters.processed),
         memo_hits:          load(&self.counters.memo_hits),
         rewrites_attempted: load(&self.counters.attempted),
         rewrites_accepted:  load(&self.counters.accepted),
         rewrites_rejected:  load(&self.counters.rejected),
         rewrites_failed:    load(&self.counters.failed),
         memo_entries:       self.memo.entry_count(),
      }
   }

   /// Drops all memoized analyses.
   pub fn clear(&self) {
      self.memo.invalidate_all();
   }
}

fn memo_key(query: &str, context: &QueryContext) -> String {
   let context = serde_json::to_string(context).unwrap_or_default();
   format!("{}|{context}", query.trim().to_lowercase())
}

fn normalize_terms(terms: Vec<String>, limit: usize) -> Vec<String> {
   let mut out: Vec<String> = Vec::with_capacity(terms.len().min(limit));
   for term in terms {
      let term = term.trim();
      if term.is_empty() || out.iter().any(|t| t.eq_ignore_ascii_case(term)) {
         continue;
      }
      out.push(term.to_string());
      if out.len() == limit {
         break;
      }
   }
   out
}

#[cfg(test)]
mod tests {
   use std::{sync::atomic::AtomicUsize, time::Duration};

   use super::*;

   struct FixedRewriter {
      reply: Result<Rewrite, fn() -> RewriteError>,
      calls: AtomicUsize,
      delay: Option<Duration>,
   }

   impl FixedRewriter {
      fn proposing(query: &str, confidence: f64) -> Arc<Self> {
         Arc::new(Self {
            reply: Ok(Rewrite {
               rewritten_query: query.to_string(),
               expanded_terms: vec!["keyframes".to_string(), "easing".to_string()],
               confidence,
            }),
            calls: AtomicUsize::new(0),
            delay: None,
         })
      }

      fn failing() -> Arc<Self> {
         Arc::new(Self {
            reply: Err(|| RewriteError::Status(503)),
            calls: AtomicUsize::new(0),
            delay: None,
         })
      }
   }

   #[async_trait::async_trait]
   impl Rewriter for FixedRewriter {
      async fn rewrite(&self, _request: &RewriteRequest<'_>) -> Result<Rewrite, RewriteError> {
         self.calls.fetch_add(1, Ordering::SeqCst);
         if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
         }
         match &self.reply {
            Ok(rewrite) => Ok(rewrite.clone()),
            Err(make) => Err(make()),
         }
      }
   }

   fn processor(rewriter: Option<Arc<dyn Rewriter>>) -> QueryProcessor {
      QueryProcessor::new(QueryConfig::default(), rewriter)
   }

   const QUERY: &str = "smooth fade in animation for cards";

   #[test]
   fn intent_detection_prefers_most_hits() {
      assert_eq!(detect_intent("how to implement a modal"), Intent::Implementation);
      assert_eq!(detect_intent("button props reference"), Intent::Documentation);
      assert_eq!(detect_intent("login error not working"), Intent::Troubleshooting);
      assert_eq!(detect_intent("dark theme"), Intent::General);
      assert_eq!(detect_intent("como implementar autenticação"), Intent::Implementation);
   }

   #[test]
   fn intent_ties_resolve_in_ranked_order() {
      // one implementation phrase and one example phrase
      assert_eq!(detect_intent("tutorial demo"), Intent::Implementation);
   }

   #[test]
   fn stack_and_category_hints() {
      assert_eq!(detect_stacks("prisma schema migration"), vec!["prisma"]);
      assert_eq!(detect_stacks("next.js app router with tailwind"), vec!["nextjs", "tailwind"]);
      assert_eq!(detect_categories("dialog component"), vec!["ui_components"]);
      assert!(detect_categories("rotate").is_empty());
   }

   #[test]
   fn rewrite_skipped_for_short_or_pinned_queries() {
      assert!(!should_rewrite("hover effect", Intent::General, &[]));
      let pinned = vec!["react".to_string(), "tailwind".to_string()];
      let query = "how to implement react tailwind card";
      assert!(!should_rewrite(query, Intent::Implementation, &pinned));
      assert!(should_rewrite(query, Intent::General, &pinned));
      assert!(should_rewrite("animated gradient border card", Intent::General, &[]));
   }

   #[test]
   fn local_expansion_follows_hints() {
      let terms = expand_locally(
         "react state component",
         &["react".to_string()],
         &["ui_components".to_string()],
      );
      assert_eq!(terms[..3], ["useState", "useEffect", "useContext"]);
      assert!(terms.contains(&"jsx".to_string()));
      // "props" appears once even though two rules propose it
      assert_eq!(terms.iter().filter(|t| *t == "props").count(), 1);
   }

   #[test]
   fn local_expansion_skips_words_in_query() {
      let terms = expand_locally("routing middleware", &[], &["routing".to_string()]);
      assert_eq!(terms, vec!["navigation", "params", "query string"]);
   }

   #[tokio::test]
   async fn rewrite_below_threshold_is_rejected() {
      let rewriter = FixedRewriter::proposing("css fade-in keyframes card", 0.69);
      let qp = processor(Some(rewriter.clone()));
      let pq = qp.process(QUERY, &QueryContext::new()).await;
      assert_eq!(rewriter.calls.load(Ordering::SeqCst), 1);
      assert!(!pq.used_rewriting);
      assert_eq!(pq.rewritten, QUERY);
      assert!(pq.expansion_terms.is_empty());
      assert_eq!(pq.confidence, 1.0);
      assert_eq!(qp.stats().rewrites_rejected, 1);
   }

   #[tokio::test]
   async fn rewrite_above_threshold_is_accepted() {
      let rewriter = FixedRewriter::proposing("css fade-in keyframes card", 0.71);
      let qp = processor(Some(rewriter));
      let pq = qp.process(QUERY, &QueryContext::new()).await;
      assert!(pq.used_rewriting);
      assert_eq!(pq.rewritten, "css fade-in keyframes card");
      assert_eq!(pq.expansion_terms, vec!["keyframes", "easing"]);
      assert_eq!(pq.confidence, 0.71);
      assert_eq!(qp.stats().rewrites_accepted, 1);
   }

   #[tokio::test]
   async fn accepted_rewrite_supplies_all_expansion_terms() {
      let rewriter = Arc::new(FixedRewriter {
         reply: Ok(Rewrite {
            rewritten_query: "react useState in a function component".to_string(),
            expanded_terms:  vec!["hooks".to_string()],
            confidence:      0.9,
         }),
         calls: AtomicUsize::new(0),
         delay: None,
      });
      let qp = processor(Some(rewriter));
      let pq = qp.process("need react state in a component", &QueryContext::new()).await;
      assert!(pq.used_rewriting);
      assert_eq!(pq.stack_hints, vec!["react"]);
      assert_eq!(pq.expansion_terms, vec!["hooks"]);
   }

   #[tokio::test]
   async fn rejected_rewrite_falls_back_to_local_expansion() {
      let rewriter = FixedRewriter::proposing("react state", 0.2);
      let qp = processor(Some(rewriter));
      let pq = qp.process("need react state in a component", &QueryContext::new()).await;
      assert!(!pq.used_rewriting);
      assert_eq!(pq.expansion_terms[..3], ["useState", "useEffect", "useContext"]);
      assert!(!pq.expansion_terms.contains(&"keyframes".to_string()));
   }

   #[tokio::test]
   async fn rewriter_failure_keeps_original() {
      let qp = processor(Some(FixedRewriter::failing()));
      let pq = qp.process(QUERY, &QueryContext::new()).await;
      assert!(!pq.used_rewriting);
      assert_eq!(pq.rewritten, QUERY);
      assert_eq!(qp.stats().rewrites_failed, 1);
   }

   #[tokio::test(start_paused = true)]
   async fn slow_rewriter_times_out() {
      let rewriter = Arc::new(FixedRewriter {
         delay: Some(Duration::from_secs(60)),
         ..Arc::into_inner(FixedRewriter::proposing("never used", 0.99)).unwrap()
      });
      let qp = processor(Some(rewriter));
      let pq = qp.process(QUERY, &QueryContext::new()).await;
      assert!(!pq.used_rewriting);
      assert_eq!(qp.stats().rewrites_failed, 1);
   }

   #[tokio::test]
   async fn short_query_never_calls_rewriter() {
      let rewriter = FixedRewriter::proposing("anything", 0.99);
      let qp = processor(Some(rewriter.clone()));
      let pq = qp.process("hover", &QueryContext::new()).await;
      assert_eq!(rewriter.calls.load(Ordering::SeqCst), 0);
      assert_eq!(pq.rewritten, "hover");
   }

   #[tokio::test]
   async fn identical_requests_are_memoized() {
      let rewriter = FixedRewriter::proposing("css fade-in keyframes card", 0.9);
      let qp = processor(Some(rewriter.clone()));
      let first = qp.process(QUERY, &QueryContext::new()).await;
      let shouted = format!("  {}  ", QUERY.to_uppercase());
      let second = qp.process(&shouted, &QueryContext::new()).await;
      assert_eq!(second.rewritten, first.rewritten);
      assert_eq!(second.expansion_terms, first.expansion_terms);
      assert_eq!(second.original, QUERY.to_uppercase());
      assert_eq!(rewriter.calls.load(Ordering::SeqCst), 1);
      assert_eq!(qp.stats().memo_hits, 1);

      let mut context = QueryContext::new();
      context.insert("current_stack".to_string(), "react".to_string());
      qp.process(QUERY, &context).await;
      assert_eq!(rewriter.calls.load(Ordering::SeqCst), 2);

      qp.clear();
      qp.process(QUERY, &QueryContext::new()).await;
      assert_eq!(rewriter.calls.load(Ordering::SeqCst), 3);
   }

   #[test]
   fn expansion_terms_are_capped() {
      let terms = (0..20).map(|i| format!("term{i}")).collect();
      assert_eq!(normalize_terms(terms, 10).len(), 10);
   }
}
