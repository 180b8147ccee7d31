//! Retrieval backends and the per-mode registry the orchestrator resolves
//! them from.

pub mod corpus;
pub mod http;

use std::{collections::HashMap, sync::Arc};

pub use corpus::CorpusBackend;
pub use http::HttpBackend;

use crate::{
   config::BackendConfig,
   error::{Error, Result},
   types::{Filters, RetrievedFragment, SearchMode},
};

pub struct RetrievalQuery<'a> {
   pub text:    &'a str,
   pub top_k:   usize,
   pub mode:    SearchMode,
   pub filters: &'a Filters,
}

/// A source of ranked fragments. Implementations ignore filter keys they do
/// not understand.
#[async_trait::async_trait]
pub trait RetrievalBackend: Send + Sync {
   fn name(&self) -> &'static str;

   async fn search(&self, query: RetrievalQuery<'_>) -> Result<Vec<RetrievedFragment>>;
}

#[async_trait::async_trait]
impl<T: RetrievalBackend + ?Sized> RetrievalBackend for Arc<T> {
   fn name(&self) -> &'static str {
      (**self).name()
   }

   async fn search(&self, query: RetrievalQuery<'_>) -> Result<Vec<RetrievedFragment>> {
      (**self).search(query).await
   }
}

/// Maps each search mode to the backend serving it. Built once at startup.
#[derive(Clone, Default)]
pub struct BackendRegistry {
   backends: HashMap<SearchMode, Arc<dyn RetrievalBackend>>,
}

impl BackendRegistry {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn register(mut self, mode: SearchMode, backend: Arc<dyn RetrievalBackend>) -> Self {
      self.backends.insert(mode, backend);
      self
   }

   /// Serves every mode from one backend.
   pub fn uniform(backend: Arc<dyn RetrievalBackend>) -> Self {
      SearchMode::ALL
         .into_iter()
         .fold(Self::new(), |registry, mode| registry.register(mode, backend.clone()))
   }

   /// HTTP endpoint wins over a local corpus. Neither yields an empty
   /// registry, which answers every search with `BackendUnavailable`.
   pub async fn from_config(config: &BackendConfig) -> Result<Self> {
      if let Some(endpoint) = &config.endpoint {
         tracing::info!(%endpoint, "using http retrieval backend");
         return Ok(Self::uniform(Arc::new(HttpBackend::new(endpoint)?)));
      }
      if let Some(path) = &config.corpus {
         let corpus = CorpusBackend::load(path).await?;
         tracing::info!(path = %path.display(), documents = corpus.len(), "using corpus backend");
         return Ok(Self::uniform(Arc::new(corpus)));
      }
      tracing::warn!("no retrieval backend configured");
      Ok(Self::new())
   }

   pub fn get(&self, mode: SearchMode) -> Result<&Arc<dyn RetrievalBackend>> {
      self
         .backends
         .get(&mode)
         .ok_or_else(|| Error::BackendUnavailable(format!("no backend registered for {mode}")))
   }

   pub fn modes(&self) -> Vec<SearchMode> {
      SearchMode::ALL
         .into_iter()
         .filter(|mode| self.backends.contains_key(mode))
         .collect()
   }
}

#[cfg(test)]
pub(crate) mod testing {
   use std::{collections::VecDeque, time::Duration};

   use parking_lot::Mutex;

   use super::*;
   use crate::types::FragmentMetadata;

   pub fn fragment(id: &str, content: &str, score: f64) -> RetrievedFragment {
      RetrievedFragment {
         id:         id.to_string(),
         content:    content.to_string(),
         title:      Some(format!("{id} title")),
         url:        Some(format!("https://docs.example/{id}")),
         license:    Some("MIT".to_string()),
         score,
         source:     SearchMode::Hybrid,
         rationale:  None,
         highlights: Vec::new(),
         metadata:   FragmentMetadata {
            stack: Some("css".to_string()),
            category: Some("styling".to_string()),
            quality_score: Some(0.6),
            ..FragmentMetadata::default()
         },
      }
   }

   /// Replays queued responses in order, then repeats `fallback`.
   #[derive(Default)]
   pub struct ScriptedBackend {
      queue:    Mutex<VecDeque<Result<Vec<RetrievedFragment>>>>,
      fallback: Vec<RetrievedFragment>,
      calls:    Mutex<Vec<(String, usize)>>,
      delay:    Option<Duration>,
      panics:   bool,
   }

   impl ScriptedBackend {
      pub fn returning(fragments: Vec<RetrievedFragment>) -> Self {
         Self { fallback: fragments, ..Self::default() }
      }

      pub fn then(self, response: Result<Vec<RetrievedFragment>>) -> Self {
         self.queue.lock().push_back(response);
         self
      }

      pub fn delayed(mut self, delay: Duration) -> Self {
         self.delay = Some(delay);
         self
      }

      pub fn panicking() -> Self {
         Self { panics: true, ..Self::default() }
      }

      /// `(query text, top_k)` of every call so far.
      pub fn calls(&self) -> Vec<(String, usize)> {
         self.calls.lock().clone()
      }
   }

   #[async_trait::async_trait]
   impl RetrievalBackend for ScriptedBackend {
      fn name(&self) -> &'static str {
         "scripted"
      }

      async fn search(&self, query: RetrievalQuery<'_>) -> Result<Vec<RetrievedFragment>> {
         self.calls.lock().push((query.text.to_string(), query.top_k));
         if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
         }
         assert!(!self.panics, "scripted backend panic");
         let next = self.queue.lock().pop_front();
         match next {
            Some(response) => response,
            None => Ok(self.fallback.iter().take(query.top_k).cloned().collect()),
         }
      }
   }
}

#[cfg(test)]
mod tests {
   use super::{testing::ScriptedBackend, *};

   #[test]
   fn empty_registry_is_unavailable() {
      let registry = BackendRegistry::new();
      let err = registry.get(SearchMode::Vector).err().unwrap();
      assert!(err.is_unavailable());
      assert!(registry.modes().is_empty());
   }

   #[test]
   fn uniform_registry_serves_all_modes() {
      let registry = BackendRegistry::uniform(Arc::new(ScriptedBackend::default()));
      assert_eq!(registry.modes(), SearchMode::ALL);
      assert_eq!(registry.get(SearchMode::Text).unwrap().name(), "scripted");
   }

   #[test]
   fn per_mode_registration() {
      let registry =
         BackendRegistry::new().register(SearchMode::Text, Arc::new(ScriptedBackend::default()));
      assert!(registry.get(SearchMode::Text).is_ok());
      assert!(registry.get(SearchMode::Hybrid).is_err());
   }

   #[test]
   fn unconfigured_registry_is_empty() {
      let registry =
         tokio_test::block_on(BackendRegistry::from_config(&BackendConfig::default())).unwrap();
      assert!(registry.modes().is_empty());
   }
}
