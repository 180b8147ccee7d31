//! Domain-specific reranking for CSS animation queries.
//!
//! Fragments are scored against a handful of structural detectors and the
//! domain vocabulary; the resulting multiplier is applied to the retrieval
//! score and the list is re-sorted. Nothing is dropped.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::types::{BoostInfo, RerankSummary, ResultMetadata, SearchResult};

/// Upper bound on the multiplier applied to any single fragment.
pub const MAX_BOOST: f64 = 10.0;
pub const DENSITY_WEIGHT: f64 = 0.5;
pub const DOMAIN_SCORE_MIN: f64 = 0.1;
pub const DOMAIN_SCORE_WEIGHT: f64 = 2.0;
const QUALITY_BONUS: f64 = 0.2;

/// Query terms that mark a domain query. Portuguese forms included.
pub const QUERY_TERMS: &[&str] = &[
   "animação",
   "animation",
   "animar",
   "animate",
   "transição",
   "transition",
   "transicionar",
   "transform",
   "transformar",
   "rotacionar",
   "rotate",
   "escalar",
   "scale",
   "mover",
   "translate",
   "keyframes",
   "efeito",
   "hover",
   "movimento",
];

/// Words counted for the density bonus.
pub const VOCABULARY: &[&str] = &[
   "keyframes",
   "transition",
   "transform",
   "animation",
   "ease",
   "cubic-bezier",
   "linear",
   "ease-in",
   "ease-out",
   "rotate",
   "scale",
   "translate",
   "skew",
   "matrix",
   "opacity",
   "visibility",
   "hover",
   "active",
   "focus",
   "duration",
   "delay",
   "iteration",
   "direction",
   "fill-mode",
];

const ADVANCED_TERMS: &[&str] = &["cubic-bezier", "steps", "matrix", "perspective"];

macro_rules! static_regex {
   ($($name:ident = $regex:expr),* $(,)?) => {
      $(
         static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
      )*
   };
}

static_regex! {
   KEYFRAMES_BLOCK    = r"(?i)@keyframes\s+[\w-]+\s*\{",
   KEYFRAMES_USAGE    = r"(?i)animation(?:-name)?\s*:\s*[\w-]+",
   TRANSITION_DECL    = r"(?i)transition(?:-[\w-]+)?\s*:",
   TRANSFORM_DECL     = r"(?i)transform(?:-[\w-]+)?\s*:",
   ANIMATION_PROPERTY = r"(?i)animation(?:-[\w-]+)?\s*:",
   CSS_RULE           = r"(?is)\{[^}]*(?:animation|transition|transform)[^}]*\}",
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
   haystack
      .as_bytes()
      .windows(needle.len())
      .any(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}

/// Structural detectors, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
   Keyframes,
   Transition,
   Transform,
   AnimationProperty,
   CssRule,
}

impl Pattern {
   pub const ALL: [Self; 5] =
      [Self::Keyframes, Self::Transition, Self::Transform, Self::AnimationProperty, Self::CssRule];

   /// Contribution to the boost when the detector fires at least once.
   pub const fn weight(self) -> f64 {
      match self {
         Self::Keyframes => 2.0,
         Self::Transition => 1.5,
         Self::Transform => 1.0,
         Self::AnimationProperty => 0.8,
         Self::CssRule => 0.5,
      }
   }

   fn matches(self, text: &str) -> bool {
      match self {
         Self::Keyframes => KEYFRAMES_BLOCK.is_match(text) || KEYFRAMES_USAGE.is_match(text),
         Self::Transition => TRANSITION_DECL.is_match(text),
         Self::Transform => TRANSFORM_DECL.is_match(text),
         Self::AnimationProperty => ANIMATION_PROPERTY.is_match(text),
         Self::CssRule => CSS_RULE.is_match(text),
      }
   }
}

/// What the reranker saw in one fragment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainAnalysis {
   pub patterns:                Vec<Pattern>,
   pub keyword_density:         f64,
   pub domain_score:            Option<f64>,
   pub css_examples:            usize,
   pub has_advanced_techniques: bool,
}

impl DomainAnalysis {
   pub fn weighted_score(&self, quality_score: f64) -> f64 {
      let mut score: f64 = self.patterns.iter().map(|p| p.weight()).sum();
      score += self.keyword_density * DENSITY_WEIGHT;
      if let Some(domain) = self.domain_score
         && domain >= DOMAIN_SCORE_MIN
      {
         score += domain * DOMAIN_SCORE_WEIGHT;
      }
      if quality_score > 0.7 {
         score += QUALITY_BONUS;
      }
      score
   }

   pub fn boost(&self, quality_score: f64) -> f64 {
      (1.0 + self.weighted_score(quality_score)).min(MAX_BOOST)
   }
}

#[derive(Debug, Clone)]
pub struct Reranked {
   pub results: Vec<SearchResult>,
   pub summary: RerankSummary,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DomainReranker;

impl DomainReranker {
   pub const fn new() -> Self {
      Self
   }

   pub fn is_domain_query(&self, query: &str) -> bool {
      let lower = query.to_lowercase();
      QUERY_TERMS.iter().any(|term| lower.contains(term))
   }

   pub fn vocabulary(&self) -> &'static [&'static str] {
      VOCABULARY
   }

   /// Fraction of whitespace-separated words accounted for by distinct
   /// vocabulary hits.
   pub fn keyword_density(&self, text: &str) -> f64 {
      let words = text.split_whitespace().count();
      if words == 0 {
         return 0.0;
      }
      let hits = VOCABULARY.iter().filter(|kw| contains_ci(text, kw)).count();
      hits as f64 / words as f64
   }

   pub fn analyze(&self, text: &str, metadata: &ResultMetadata) -> DomainAnalysis {
      DomainAnalysis {
         patterns:                Pattern::ALL.into_iter().filter(|p| p.matches(text)).collect(),
         keyword_density:         self.keyword_density(text),
         domain_score:            metadata.domain_score,
         css_examples:            CSS_RULE.find_iter(text).take(3).count(),
         has_advanced_techniques: ADVANCED_TERMS.iter().any(|t| contains_ci(text, t)),
      }
   }

   /// Boosts and re-sorts `results` for a domain query. Identity otherwise.
   pub fn rerank(&self, query: &str, mut results: Vec<SearchResult>) -> Reranked {
      if !self.is_domain_query(query) {
         tracing::debug!("not a domain query, skipping rerank");
         return Reranked { results, summary: RerankSummary::default() };
      }

      let mut boosted = 0;
      for result in &mut results {
         let analysis = self.analyze(&result.chunk, &result.metadata);
         let boost = analysis.boost(result.metadata.quality_score);
         if boost > 1.0 {
            boosted += 1;
         }
         let original_score = result.score;
         result.score = original_score * boost;
         result.boost = Some(BoostInfo {
            original_score,
            boost,
            matched_patterns: analysis.patterns.len(),
         });
      }

      results.sort_by(|a, b| {
         b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
      });

      tracing::debug!(results = results.len(), boosted, "domain rerank applied");
      let summary = RerankSummary { applied: true, results_reranked: results.len(), boosted };
      Reranked { results, summary }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::types::{SearchMode, Source};

   fn result(id: &str, chunk: &str, score: f64) -> SearchResult {
      SearchResult {
         chunk:      chunk.to_string(),
         source:     Source { title: id.to_string(), url: String::new() },
         license:    "MIT".to_string(),
         score,
         rationale:  String::new(),
         metadata:   ResultMetadata {
            id:             id.to_string(),
            stack:          "css".to_string(),
            category:       "styling".to_string(),
            language:       "css".to_string(),
            maturity_level: "stable".to_string(),
            quality_score:  0.5,
            domain_score:   None,
            updated_at:     String::new(),
            description:    None,
            search_source:  SearchMode::Hybrid,
         },
         highlights: Vec::new(),
         boost:      None,
      }
   }

   fn ids(results: &[SearchResult]) -> Vec<&str> {
      results.iter().map(|r| r.metadata.id.as_str()).collect()
   }

   #[test]
   fn detects_domain_queries() {
      let reranker = DomainReranker::new();
      assert!(reranker.is_domain_query("rotate transform hover"));
      assert!(reranker.is_domain_query("Como fazer uma ANIMAÇÃO de entrada"));
      assert!(!reranker.is_domain_query("prisma schema relations"));
   }

   #[test]
   fn non_domain_query_is_identity() {
      let reranker = DomainReranker::new();
      let input = vec![result("a", "plain text", 0.4), result("b", "transform: scale(2);", 0.3)];
      let out = reranker.rerank("database pooling", input.clone());
      assert_eq!(out.results, input);
      assert!(!out.summary.applied);
   }

   #[test]
   fn detectors_fire_on_css() {
      let css = "@keyframes spin { from { transform: rotate(0deg); } }\n\
                 .loader { animation: spin 1s linear infinite; transition: opacity .2s; }";
      let analysis = DomainReranker::new().analyze(css, &result("x", "", 0.0).metadata);
      assert_eq!(analysis.patterns, Pattern::ALL);
      assert!(analysis.css_examples >= 1);
   }

   #[test]
   fn boost_is_capped() {
      let analysis = DomainAnalysis {
         patterns:                Pattern::ALL.to_vec(),
         keyword_density:         4.0,
         domain_score:            Some(1.0),
         css_examples:            3,
         has_advanced_techniques: true,
      };
      assert_eq!(analysis.boost(0.9), MAX_BOOST);
   }

   #[test]
   fn low_domain_score_is_ignored() {
      let mut analysis = DomainAnalysis {
         patterns:                Vec::new(),
         keyword_density:         0.0,
         domain_score:            Some(0.05),
         css_examples:            0,
         has_advanced_techniques: false,
      };
      assert_eq!(analysis.boost(0.5), 1.0);
      analysis.domain_score = Some(0.5);
      assert_eq!(analysis.boost(0.5), 2.0);
   }

   #[test]
   fn two_patterns_never_rank_below_zero_matches() {
      let reranker = DomainReranker::new();
      let plain = result("plain", "a card component with a shadow", 0.5);
      let styled = result("styled", "button { transition: color 1s; transform: none }", 0.5);
      let out = reranker.rerank("hover transition", vec![plain, styled]);
      assert_eq!(ids(&out.results), ["styled", "plain"]);
      let top = out.results[0].boost.unwrap();
      assert!(top.matched_patterns >= 2);
      assert!(top.boost >= 1.5);
   }

   #[test]
   fn keyframes_and_transform_move_to_front() {
      let reranker = DomainReranker::new();
      let input = vec![
         result("prose", "Hover states explained without code", 0.9),
         result("kf", "@keyframes pulse { 50% { opacity: .5 } }", 0.6),
         result("tf", ".card:hover { transform: rotate(3deg) }", 0.5),
         result("grid", "grid-template-columns: repeat(3, 1fr)", 0.8),
      ];
      let out = reranker.rerank("rotate transform hover", input);
      assert_eq!(ids(&out.results[..2]), ["kf", "tf"]);
      for r in &out.results[..2] {
         assert!(r.boost.unwrap().boost >= 1.5);
      }
      assert_eq!(out.summary.results_reranked, 4);
      assert!(out.summary.applied);
   }

   #[test]
   fn nothing_is_dropped() {
      let reranker = DomainReranker::new();
      let input: Vec<_> = (0..7).map(|i| result(&format!("r{i}"), "text", 0.1)).collect();
      assert_eq!(reranker.rerank("animation", input).results.len(), 7);
   }
}
