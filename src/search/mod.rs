//! Request orchestration: validation, cache, query analysis, retrieval with
//! expansion fallback, formatting, access gating, domain rerank, stats.

pub mod format;
pub mod stats;

use std::{any::Any, collections::HashSet, panic::AssertUnwindSafe, sync::Arc, time::Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

pub use self::stats::EngineStats;
use self::stats::EngineCounters;
use crate::{
   access::AccessGate,
   backend::{BackendRegistry, RetrievalBackend, RetrievalQuery},
   cache::{CacheLookup, CachedSearch, ResultCache},
   config::SearchConfig,
   error::{Error, Result, ValidationError},
   query::QueryProcessor,
   rerank::{DomainReranker, Reranked},
   types::{
      Filters, Intent, ProcessedQuery, QueryInfo, RawSearchRequest, RetrievedFragment,
      SearchMode, SearchRequest, SearchResponse, SearchResult, SearchStats, Stage,
   },
};

/// Everything the enrichment stages produced for one request.
struct Enriched {
   pq:      ProcessedQuery,
   results: Vec<SearchResult>,
   stats:   SearchStats,
}

pub struct SearchOrchestrator {
   config:    SearchConfig,
   cache:     Arc<ResultCache>,
   processor: Arc<QueryProcessor>,
   gate:      Arc<AccessGate>,
   reranker:  DomainReranker,
   backends:  BackendRegistry,
   counters:  Mutex<EngineCounters>,
}

impl SearchOrchestrator {
   pub fn new(
      config: SearchConfig,
      cache: Arc<ResultCache>,
      processor: Arc<QueryProcessor>,
      gate: Arc<AccessGate>,
      reranker: DomainReranker,
      backends: BackendRegistry,
   ) -> Self {
      let counters = Mutex::new(EngineCounters::new(config.top_query_capacity));
      Self { config, cache, processor, gate, reranker, backends, counters }
   }

   pub const fn cache(&self) -> &Arc<ResultCache> {
      &self.cache
   }

   pub const fn processor(&self) -> &Arc<QueryProcessor> {
      &self.processor
   }

   pub const fn gate(&self) -> &Arc<AccessGate> {
      &self.gate
   }

   pub fn validate(&self, raw: RawSearchRequest) -> Result<SearchRequest, ValidationError> {
      let query = raw.query.trim().to_string();
      if query.is_empty() {
         return Err(ValidationError::EmptyQuery);
      }
      let len = query.chars().count();
      if len > self.config.max_query_len {
         return Err(ValidationError::QueryTooLong { len, max: self.config.max_query_len });
      }

      let top_k = raw.top_k.unwrap_or(self.config.default_top_k);
      if top_k == 0 || top_k > self.config.max_top_k {
         return Err(ValidationError::TopKOutOfRange { top_k, max: self.config.max_top_k });
      }

      let mode = match raw.search_type.as_deref() {
         None => SearchMode::Hybrid,
         Some(name) => name.parse()?,
      };

      Ok(SearchRequest {
         query,
         filters: raw.filters.unwrap_or_default(),
         top_k,
         mode,
         use_cache: raw.use_cache.unwrap_or(true),
         rerank: raw.rerank.unwrap_or(true),
         context: raw.context.unwrap_or_default(),
      })
   }

   /// Runs one request. Validation problems, an unreachable backend and
   /// cancellation are errors; any other failure is reported inside a
   /// well-formed empty response.
   pub async fn search(&self, raw: RawSearchRequest) -> Result<SearchResponse> {
      let started = Instant::now();
      let request = match self.validate(raw) {
         Ok(request) => request,
         Err(e) => {
            self.counters.lock().record_error();
            tracing::debug!(stage = ?Stage::Validating, error = %e, "rejected search request");
            return Err(e.into());
         },
      };

      let request_id = Uuid::new_v4().to_string();
      let span = tracing::info_span!("search", %request_id, mode = %request.mode);
      self
         .run(&request, request_id, started)
         .instrument(span)
         .await
   }

   /// Like [`search`](Self::search) but gives up with [`Error::Cancelled`]
   /// once `cancel` fires. Nothing is cached for a cancelled request.
   pub async fn search_with_cancel(
      &self,
      raw: RawSearchRequest,
      cancel: &CancellationToken,
   ) -> Result<SearchResponse> {
      tokio::select! {
         biased;
         () = cancel.cancelled() => {
            tracing::info!("search cancelled by caller");
            Err(Error::Cancelled)
         }
         result = self.search(raw) => result,
      }
   }

   async fn run(
      &self,
      request: &SearchRequest,
      request_id: String,
      started: Instant,
   ) -> Result<SearchResponse> {
      let mut stage = Stage::CacheCheck;
      let lookup = CacheLookup::new(&request.query, &request.filters, request.top_k, request.mode);
      if request.use_cache
         && let Some(cached) = self.cache.get(&lookup)
      {
         self.counters.lock().record_cache_hit();
         tracing::debug!(?stage, results = cached.results.len(), "served from cache");

         // Results stay as stored; the stats describe this request.
         let mut search_stats = cached.search_stats;
         search_stats.request_id = request_id;
         search_stats.total_ms = elapsed_ms(started);
         search_stats.stage = Stage::Responding;
         return Ok(SearchResponse {
            total_results: cached.results.len(),
            results:       cached.results,
            query_info:    cached.query_info,
            search_stats,
            cached:        true,
         });
      }

      let outcome = AssertUnwindSafe(self.enrich(request, request_id.clone(), &mut stage))
         .catch_unwind()
         .await;

      let enriched = match outcome {
         Ok(Ok(enriched)) => enriched,
         Ok(Err(e)) if surfaces_to_caller(&e) => {
            self.counters.lock().record_error();
            tracing::warn!(error = %e, ?stage, "search aborted");
            return Err(e);
         },
         Ok(Err(e)) => return Ok(self.failed(request, request_id, stage, &e.to_string(), started)),
         Err(panic) => {
            let reason = panic_message(&*panic);
            return Ok(self.failed(request, request_id, stage, &reason, started));
         },
      };

      let Enriched { pq, results, mut stats } = enriched;
      stats.total_ms = elapsed_ms(started);

      let response = SearchResponse {
         total_results: results.len(),
         results,
         query_info: QueryInfo::from(&pq),
         search_stats: stats,
         cached: false,
      };

      if request.use_cache && !response.results.is_empty() {
         let payload = CachedSearch {
            results:      response.results.clone(),
            query_info:   response.query_info.clone(),
            search_stats: response.search_stats.clone(),
         };
         self.cache.set(&lookup, &payload, None);
      }

      self
         .counters
         .lock()
         .record_search(request.mode, &request.query, response.search_stats.total_ms);
      tracing::info!(
         results = response.total_results,
         elapsed_ms = response.search_stats.total_ms,
         "search complete"
      );
      Ok(response)
   }

   async fn enrich(
      &self,
      request: &SearchRequest,
      request_id: String,
      stage: &mut Stage,
   ) -> Result<Enriched> {
      *stage = Stage::Processing;
      let pq = self.processor.process(&request.query, &request.context).await;
      tracing::debug!(
         intent = %pq.intent,
         rewritten = pq.used_rewriting,
         terms = pq.expansion_terms.len(),
         "query processed"
      );

      *stage = Stage::Retrieving;
      let retrieval_started = Instant::now();
      let (fragments, expansion_applied) = self.retrieve(request, &pq).await?;
      let search_ms = elapsed_ms(retrieval_started);

      *stage = Stage::Formatting;
      let mut stats = stats::request_stats(request_id, &pq, &fragments, search_ms, expansion_applied);
      let results = format::format_results(fragments, &pq);

      *stage = Stage::AccessFiltering;
      let decision = self.gate.check(&pq.original, results);
      if decision.restricted_count > 0 {
         tracing::info!(detail = %self.gate.message(&decision), "access control applied");
      }
      stats.access_control = Some(decision.summary());
      let results = decision.fragments;

      *stage = Stage::Reranking;
      let results = if request.rerank {
         let Reranked { results, summary } = self.reranker.rerank(&pq.original, results);
         stats.reranking = summary;
         results
      } else {
         results
      };

      *stage = Stage::Responding;
      stats.stage = Stage::Responding;
      Ok(Enriched { pq, results, stats })
   }

   /// One retrieval call, plus a single expansion call when fewer than half
   /// the requested fragments came back. Duplicates keep their first
   /// occurrence.
   async fn retrieve(
      &self,
      request: &SearchRequest,
      pq: &ProcessedQuery,
   ) -> Result<(Vec<RetrievedFragment>, bool)> {
      let backend = self.backends.get(request.mode)?;
      let filters = self.derive_filters(&request.filters, pq);

      let mut fragments = self
         .retrieve_once(&**backend, &pq.rewritten, request.top_k, request.mode, &filters)
         .await?;

      let mut expanded = false;
      if fragments.len() < request.top_k / 2 && !pq.expansion_terms.is_empty() {
         let terms: Vec<&str> = pq
            .expansion_terms
            .iter()
            .take(self.config.expansion_terms)
            .map(String::as_str)
            .collect();
         let query = format!("{} {}", pq.rewritten, terms.join(" "));
         let remaining = request.top_k - fragments.len();
         tracing::debug!(found = fragments.len(), %query, "sparse results, expanding query");

         let extra = self
            .retrieve_once(&**backend, &query, remaining, request.mode, &filters)
            .await?;
         fragments.extend(extra);
         expanded = true;
      }

      let mut seen = HashSet::new();
      fragments.retain(|f| seen.insert(f.id.clone()));
      fragments.truncate(request.top_k);
      Ok((fragments, expanded))
   }

   async fn retrieve_once(
      &self,
      backend: &dyn RetrievalBackend,
      text: &str,
      top_k: usize,
      mode: SearchMode,
      filters: &Filters,
   ) -> Result<Vec<RetrievedFragment>> {
      let query = RetrievalQuery { text, top_k, mode, filters };
      let timeout = self.config.retrieval_timeout();
      if let Ok(result) = tokio::time::timeout(timeout, backend.search(query)).await {
         result
      } else {
         tracing::warn!(
            backend = backend.name(),
            timeout_ms = timeout.as_millis() as u64,
            "retrieval timed out, treating as empty"
         );
         Ok(Vec::new())
      }
   }

   /// Adds preference filters from the query analysis. Caller-supplied keys
   /// are never overwritten.
   pub fn derive_filters(&self, filters: &Filters, pq: &ProcessedQuery) -> Filters {
      let mut derived = filters.clone();

      if let Some(stack) = pq.stack_hints.first()
         && !derived.contains_key("stack")
      {
         derived
            .entry("stack_preference".to_string())
            .or_insert_with(|| stack.clone().into());
      }
      if let Some(category) = pq.category_hints.first()
         && !derived.contains_key("category")
      {
         derived
            .entry("category_preference".to_string())
            .or_insert_with(|| category.clone().into());
      }

      if self.reranker.is_domain_query(&pq.original) {
         derived
            .entry("domain_score_min".to_string())
            .or_insert_with(|| 0.1.into());
         derived
            .entry("prefer_domain_content".to_string())
            .or_insert_with(|| true.into());
         derived
            .entry("quality_score_min".to_string())
            .or_insert_with(|| 0.3.into());
      } else if matches!(pq.intent, Intent::Implementation | Intent::Example) {
         derived
            .entry("quality_score_min".to_string())
            .or_insert_with(|| 0.7.into());
      }

      derived
   }

   fn failed(
      &self,
      request: &SearchRequest,
      request_id: String,
      stage: Stage,
      reason: &str,
      started: Instant,
   ) -> SearchResponse {
      self.counters.lock().record_error();
      tracing::error!(?stage, error = reason, "search failed");

      SearchResponse {
         results:       Vec::new(),
         query_info:    QueryInfo {
            original_query:  request.query.clone(),
            rewritten_query: request.query.clone(),
            error:           Some(reason.to_string()),
            ..QueryInfo::default()
         },
         search_stats:  SearchStats {
            request_id,
            total_ms: elapsed_ms(started),
            stage: Stage::Failed,
            failed_stage: Some(stage),
            error: Some(reason.to_string()),
            ..SearchStats::default()
         },
         total_results: 0,
         cached:        false,
      }
   }

   pub fn stats(&self, top: usize) -> EngineStats {
      self.counters.lock().snapshot(top)
   }

   /// Empties the result cache (memory and snapshot) and the analysis memo.
   pub async fn clear_caches(&self) {
      self.cache.clear().await;
      self.processor.clear();
      tracing::info!("search caches cleared");
   }
}

/// Errors the caller sees as errors rather than as a failed response.
const fn surfaces_to_caller(err: &Error) -> bool {
   err.is_client_error() || err.is_unavailable() || matches!(err, Error::Cancelled)
}

fn elapsed_ms(since: Instant) -> f64 {
   since.elapsed().as_secs_f64() * 1000.0
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
   panic
      .downcast_ref::<&str>()
      .map(|s| (*s).to_string())
      .or_else(|| panic.downcast_ref::<String>().cloned())
      .unwrap_or_else(|| "unknown panic".to_string())
}
