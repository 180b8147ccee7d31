//! Mapping backend fragments to the public result shape.

use crate::types::{
   Intent, ProcessedQuery, ResultMetadata, RetrievedFragment, SearchMode, SearchResult, Source,
};

const UNTITLED: &str = "Untitled";
const UNSPECIFIED_LICENSE: &str = "unspecified";
const DEFAULT_LANGUAGE: &str = "en";
const MAX_HIGHLIGHTS: usize = 3;

fn round4(score: f64) -> f64 {
   (score * 10_000.0).round() / 10_000.0
}

pub fn format_results(fragments: Vec<RetrievedFragment>, pq: &ProcessedQuery) -> Vec<SearchResult> {
   fragments
      .into_iter()
      .map(|fragment| format_result(fragment, pq))
      .collect()
}

pub fn format_result(fragment: RetrievedFragment, pq: &ProcessedQuery) -> SearchResult {
   let rationale = match &fragment.rationale {
      Some(r) if !r.trim().is_empty() => r.clone(),
      _ => basic_rationale(&fragment, pq),
   };
   let meta = fragment.metadata;

   SearchResult {
      chunk: fragment.content,
      source: Source {
         title: fragment.title.unwrap_or_else(|| UNTITLED.to_string()),
         url:   fragment.url.unwrap_or_default(),
      },
      license: fragment
         .license
         .unwrap_or_else(|| UNSPECIFIED_LICENSE.to_string()),
      score: round4(fragment.score),
      rationale,
      metadata: ResultMetadata {
         id:             fragment.id,
         stack:          meta.stack.unwrap_or_default(),
         category:       meta.category.unwrap_or_default(),
         language:       meta.language.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
         maturity_level: meta.maturity_level.unwrap_or_default(),
         quality_score:  meta.quality_score.unwrap_or(0.0),
         domain_score:   meta.domain_score,
         updated_at:     meta.updated_at.unwrap_or_default(),
         description:    meta.description,
         search_source:  fragment.source,
      },
      highlights: fragment.highlights.into_iter().take(MAX_HIGHLIGHTS).collect(),
      boost: None,
   }
}

/// Explanation used when the backend supplies none.
pub fn basic_rationale(fragment: &RetrievedFragment, pq: &ProcessedQuery) -> String {
   let mut reasons = vec![match fragment.source {
      SearchMode::Vector => "semantically relevant".to_string(),
      SearchMode::Text => "a match on key terms".to_string(),
      SearchMode::Hybrid => "relevant both semantically and by keywords".to_string(),
   }];

   if let Some(stack) = &fragment.metadata.stack
      && pq.stack_hints.iter().any(|hint| hint == stack)
   {
      reasons.push(format!("specific to {stack}"));
   }
   if pq.intent != Intent::General {
      reasons.push(format!("suited to {}", pq.intent));
   }
   if fragment.metadata.quality_score.unwrap_or(0.0) >= 0.8 {
      reasons.push("high quality".to_string());
   }

   format!("Relevant because it is {}.", reasons.join(", "))
}
