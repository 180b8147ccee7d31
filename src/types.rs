use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Caller-supplied and derived retrieval filters. Ordered so that two equal
/// maps always serialize identically.
pub type Filters = BTreeMap<String, serde_json::Value>;

/// Free-form context forwarded to query analysis (e.g. `current_stack`).
pub type QueryContext = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
   /// Semantic (embedding similarity) retrieval.
   Vector,
   /// Lexical (keyword) retrieval.
   Text,
   Hybrid,
}

impl SearchMode {
   pub const ALL: [Self; 3] = [Self::Vector, Self::Text, Self::Hybrid];

   pub const fn as_str(self) -> &'static str {
      match self {
         Self::Vector => "vector",
         Self::Text => "text",
         Self::Hybrid => "hybrid",
      }
   }
}

impl fmt::Display for SearchMode {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

impl FromStr for SearchMode {
   type Err = ValidationError;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      match s.trim().to_ascii_lowercase().as_str() {
         "vector" => Ok(Self::Vector),
         "text" => Ok(Self::Text),
         "hybrid" => Ok(Self::Hybrid),
         _ => Err(ValidationError::UnknownMode(s.to_string())),
      }
   }
}

/// Request as received at the service boundary, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSearchRequest {
   pub query:       String,
   #[serde(default)]
   pub filters:     Option<Filters>,
   #[serde(default)]
   pub top_k:       Option<usize>,
   #[serde(default)]
   pub search_type: Option<String>,
   #[serde(default)]
   pub use_cache:   Option<bool>,
   #[serde(default)]
   pub rerank:      Option<bool>,
   #[serde(default)]
   pub context:     Option<QueryContext>,
}

impl RawSearchRequest {
   pub fn new(query: impl Into<String>) -> Self {
      Self { query: query.into(), ..Self::default() }
   }

   pub const fn top_k(mut self, top_k: usize) -> Self {
      self.top_k = Some(top_k);
      self
   }

   pub fn mode(mut self, mode: impl Into<String>) -> Self {
      self.search_type = Some(mode.into());
      self
   }

   pub fn filter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
      self
         .filters
         .get_or_insert_with(Filters::new)
         .insert(key.into(), value.into());
      self
   }

   pub const fn use_cache(mut self, use_cache: bool) -> Self {
      self.use_cache = Some(use_cache);
      self
   }

   pub const fn rerank(mut self, rerank: bool) -> Self {
      self.rerank = Some(rerank);
      self
   }
}

/// Validated, immutable search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
   pub query:     String,
   pub filters:   Filters,
   pub top_k:     usize,
   pub mode:      SearchMode,
   pub use_cache: bool,
   pub rerank:    bool,
   pub context:   QueryContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
   Implementation,
   Documentation,
   Example,
   Troubleshooting,
   General,
}

impl Intent {
   pub const fn as_str(self) -> &'static str {
      match self {
         Self::Implementation => "implementation",
         Self::Documentation => "documentation",
         Self::Example => "example",
         Self::Troubleshooting => "troubleshooting",
         Self::General => "general",
      }
   }
}

impl fmt::Display for Intent {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// Result of query analysis. Built once per request and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedQuery {
   pub original:         String,
   pub rewritten:        String,
   pub expansion_terms:  Vec<String>,
   pub intent:           Intent,
   pub stack_hints:      Vec<String>,
   pub category_hints:   Vec<String>,
   pub confidence:       f64,
   pub used_rewriting:   bool,
   pub processing_ms:    f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FragmentMetadata {
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub stack:          Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub category:       Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub quality_score:  Option<f64>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub domain_score:   Option<f64>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub updated_at:     Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub language:       Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub maturity_level: Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub description:    Option<String>,
   #[serde(default, flatten)]
   pub extra:          BTreeMap<String, serde_json::Value>,
}

/// A span returned by a retrieval backend. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedFragment {
   pub id:         String,
   pub content:    String,
   #[serde(default)]
   pub title:      Option<String>,
   #[serde(default)]
   pub url:        Option<String>,
   #[serde(default)]
   pub license:    Option<String>,
   pub score:      f64,
   pub source:     SearchMode,
   #[serde(default)]
   pub rationale:  Option<String>,
   #[serde(default)]
   pub highlights: Vec<String>,
   #[serde(default)]
   pub metadata:   FragmentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
   pub title: String,
   pub url:   String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
   pub id:             String,
   pub stack:          String,
   pub category:       String,
   pub language:       String,
   pub maturity_level: String,
   pub quality_score:  f64,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub domain_score:   Option<f64>,
   pub updated_at:     String,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub description:    Option<String>,
   pub search_source:  SearchMode,
}

/// Boost annotation attached by the domain reranker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostInfo {
   pub original_score:   f64,
   pub boost:            f64,
   pub matched_patterns: usize,
}

/// Public result shape consumed by response assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
   pub chunk:      String,
   pub source:     Source,
   pub license:    String,
   pub score:      f64,
   pub rationale:  String,
   pub metadata:   ResultMetadata,
   #[serde(default, skip_serializing_if = "Vec::is_empty")]
   pub highlights: Vec<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub boost:      Option<BoostInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryInfo {
   pub original_query:   String,
   pub rewritten_query:  String,
   pub intent:           Option<Intent>,
   pub stack_context:    Vec<String>,
   pub category_context: Vec<String>,
   pub expanded_terms:   Vec<String>,
   pub used_rewriting:   bool,
   pub confidence:       f64,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub error:            Option<String>,
}

impl From<&ProcessedQuery> for QueryInfo {
   fn from(pq: &ProcessedQuery) -> Self {
      Self {
         original_query:   pq.original.clone(),
         rewritten_query:  pq.rewritten.clone(),
         intent:           Some(pq.intent),
         stack_context:    pq.stack_hints.clone(),
         category_context: pq.category_hints.clone(),
         expanded_terms:   pq.expansion_terms.clone(),
         used_rewriting:   pq.used_rewriting,
         confidence:       pq.confidence,
         error:            None,
      }
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
   Public,
   Authorized,
   Filtered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSummary {
   pub access_granted:      bool,
   pub access_level:        AccessLevel,
   pub restricted_count:    usize,
   pub removed_count:       usize,
   pub authorization_found: bool,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub message:             Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RerankSummary {
   pub applied:          bool,
   pub results_reranked: usize,
   pub boosted:          usize,
}

/// Pipeline stage of a single request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
   Validating,
   CacheCheck,
   Processing,
   Retrieving,
   Formatting,
   AccessFiltering,
   Reranking,
   #[default]
   Responding,
   Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
   pub request_id:            String,
   pub query_processing_ms:   f64,
   pub search_ms:             f64,
   pub total_ms:              f64,
   pub results_found:         usize,
   pub used_query_rewriting:  bool,
   pub query_confidence:      f64,
   pub expansion_applied:     bool,
   pub search_sources:        BTreeMap<String, usize>,
   pub avg_result_score:      f64,
   pub stack_distribution:    BTreeMap<String, usize>,
   pub category_distribution: BTreeMap<String, usize>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub access_control:        Option<AccessSummary>,
   #[serde(default)]
   pub reranking:             RerankSummary,
   /// `Responding` for answered requests, `Failed` when enrichment broke down.
   #[serde(default)]
   pub stage:                 Stage,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub failed_stage:          Option<Stage>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub error:                 Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
   pub results:       Vec<SearchResult>,
   pub query_info:    QueryInfo,
   pub search_stats:  SearchStats,
   pub total_results: usize,
   pub cached:        bool,
}
