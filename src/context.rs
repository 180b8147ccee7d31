//! Explicit wiring of the long-lived components shared by every request.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
   Result,
   access::AccessGate,
   backend::BackendRegistry,
   cache::{FileSnapshotStore, ResultCache, SnapshotStore, spawn_maintenance},
   clock::{Clock, SystemClock},
   config::Config,
   query::{HttpRewriter, QueryProcessor, Rewriter},
   rerank::DomainReranker,
   search::SearchOrchestrator,
};

pub struct ServiceContext {
   config:       Config,
   orchestrator: Arc<SearchOrchestrator>,
   cancel:       CancellationToken,
   maintenance:  Option<JoinHandle<()>>,
}

impl ServiceContext {
   /// Builds every component from `config`, restores the cache snapshot and
   /// starts the maintenance task.
   pub async fn build(config: Config) -> Result<Self> {
      let backends = BackendRegistry::from_config(&config.backend).await?;
      let rewriter = HttpRewriter::from_config(&config.rewriter, config.query.rewrite_timeout())?
         .map(|r| Arc::new(r) as Arc<dyn Rewriter>);
      let store = config
         .cache
         .persist
         .then(|| Arc::new(FileSnapshotStore::in_data_dir()) as Arc<dyn SnapshotStore>);

      Self::assemble(config, backends, rewriter, store, Arc::new(SystemClock)).await
   }

   pub async fn assemble(
      config: Config,
      backends: BackendRegistry,
      rewriter: Option<Arc<dyn Rewriter>>,
      store: Option<Arc<dyn SnapshotStore>>,
      clock: Arc<dyn Clock>,
   ) -> Result<Self> {
      let mut cache = ResultCache::new(config.cache.clone(), clock);
      if let Some(store) = store {
         cache = cache.with_store(store);
      }
      let cache = Arc::new(cache);
      let restored = cache.restore().await;

      let processor = Arc::new(QueryProcessor::new(config.query.clone(), rewriter));
      let gate = Arc::new(AccessGate::new(&config.access.auth_phrase));
      let orchestrator = Arc::new(SearchOrchestrator::new(
         config.search.clone(),
         Arc::clone(&cache),
         processor,
         gate,
         DomainReranker::new(),
         backends,
      ));

      let cancel = CancellationToken::new();
      let maintenance =
         spawn_maintenance(Arc::clone(&cache), config.cache.sweep_interval(), cancel.clone());

      tracing::debug!(restored, backend = backend_kind(&config), "service context ready");
      Ok(Self { config, orchestrator, cancel, maintenance: Some(maintenance) })
   }

   pub const fn config(&self) -> &Config {
      &self.config
   }

   pub fn orchestrator(&self) -> Arc<SearchOrchestrator> {
      Arc::clone(&self.orchestrator)
   }

   pub fn cache(&self) -> &Arc<ResultCache> {
      self.orchestrator.cache()
   }

   /// Token that fires when the context shuts down. Hand it to
   /// `search_with_cancel` to abort in-flight requests.
   pub fn cancellation(&self) -> CancellationToken {
      self.cancel.child_token()
   }

   /// Stops maintenance, which writes a final snapshot, and waits for it.
   pub async fn shutdown(mut self) {
      self.cancel.cancel();
      if let Some(handle) = self.maintenance.take()
         && let Err(e) = handle.await
      {
         tracing::warn!(error = %e, "maintenance task did not stop cleanly");
         self.orchestrator.cache().close().await;
      }
   }
}

impl Drop for ServiceContext {
   fn drop(&mut self) {
      self.cancel.cancel();
   }
}

fn backend_kind(config: &Config) -> &'static str {
   if config.backend.endpoint.is_some() {
      "http"
   } else if config.backend.corpus.is_some() {
      "corpus"
   } else {
      "none"
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::{
      backend::testing::{ScriptedBackend, fragment},
      cache::MemorySnapshotStore,
      clock::ManualClock,
      config::SNAPSHOT_NAME,
      types::RawSearchRequest,
   };

   async fn context(store: Arc<MemorySnapshotStore>) -> ServiceContext {
      let backend = ScriptedBackend::returning(vec![
         fragment("a", "flexbox centering", 0.8),
         fragment("b", "grid areas", 0.6),
      ]);
      ServiceContext::assemble(
         Config::default(),
         BackendRegistry::uniform(Arc::new(backend)),
         None,
         Some(store as Arc<dyn SnapshotStore>),
         Arc::new(ManualClock::new(1_700_000_000_000)),
      )
      .await
      .unwrap()
   }

   #[tokio::test]
   async fn shutdown_persists_the_cache() {
      let store = Arc::new(MemorySnapshotStore::new());
      let ctx = context(Arc::clone(&store)).await;

      let response = ctx
         .orchestrator()
         .search(RawSearchRequest::new("center a div with flexbox"))
         .await
         .unwrap();
      assert_eq!(response.results.len(), 2);
      assert_eq!(ctx.cache().len(), 1);

      ctx.shutdown().await;
      assert!(store.contains(SNAPSHOT_NAME));
   }

   #[tokio::test]
   async fn snapshot_is_restored_on_next_start() {
      let store = Arc::new(MemorySnapshotStore::new());
      let first = context(Arc::clone(&store)).await;
      first
         .orchestrator()
         .search(RawSearchRequest::new("center a div with flexbox"))
         .await
         .unwrap();
      first.shutdown().await;

      let second = context(store).await;
      assert_eq!(second.cache().len(), 1);
      let response = second
         .orchestrator()
         .search(RawSearchRequest::new("center a div with flexbox"))
         .await
         .unwrap();
      assert!(response.cached);
      second.shutdown().await;
   }

   #[tokio::test]
   async fn cancellation_token_follows_shutdown() {
      let ctx = context(Arc::new(MemorySnapshotStore::new())).await;
      let token = ctx.cancellation();
      assert!(!token.is_cancelled());
      ctx.shutdown().await;
      assert!(token.is_cancelled());
   }

   #[tokio::test]
   async fn build_without_backend_answers_unavailable() {
      let mut config = Config::default();
      config.cache.persist = false;
      let ctx = ServiceContext::build(config).await.unwrap();
      let err = ctx
         .orchestrator()
         .search(RawSearchRequest::new("anything at all"))
         .await
         .unwrap_err();
      assert!(err.is_unavailable());
      ctx.shutdown().await;
   }
}
