use std::{path::PathBuf, time::Duration};

use directories::BaseDirs;
use figment::{
   Figment,
   providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{Result, types::SearchMode};

pub const ENV_PREFIX: &str = "RAGCORE_";
pub const CONFIG_FILE: &str = "config.toml";
pub const SNAPSHOT_NAME: &str = "search_cache";

pub const DEFAULT_TOP_K: usize = 8;
pub const MAX_TOP_K: usize = 50;
pub const MAX_QUERY_LEN: usize = 500;

/// A single entry may take at most this fraction of the byte budget.
pub const MAX_ENTRY_FRACTION: u64 = 10;

pub const DEFAULT_AUTH_PHRASE: &str = "vinapermitecriar";

pub fn data_dir() -> PathBuf {
   BaseDirs::new().map_or_else(
      || PathBuf::from(".ragcore"),
      |dirs| dirs.home_dir().join(".ragcore"),
   )
}

pub fn cache_dir() -> PathBuf {
   data_dir().join("cache")
}

pub fn config_path() -> PathBuf {
   std::env::var("RAGCORE_CONFIG")
      .ok()
      .map_or_else(|| data_dir().join(CONFIG_FILE), PathBuf::from)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
   pub search:   SearchConfig,
   pub cache:    CacheConfig,
   pub query:    QueryConfig,
   pub rewriter: RewriterConfig,
   pub backend:  BackendConfig,
   pub access:   AccessConfig,
}

impl Config {
   /// Compiled defaults, then the TOML file, then `RAGCORE_*` variables
   /// (nested keys separated by `__`).
   pub fn load() -> Result<Self> {
      let config = Figment::from(Serialized::defaults(Self::default()))
         .merge(Toml::file(config_path()))
         .merge(Env::prefixed(ENV_PREFIX).split("__"))
         .extract()?;
      Ok(config)
   }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
   pub default_top_k:        usize,
   pub max_top_k:            usize,
   pub max_query_len:        usize,
   pub retrieval_timeout_ms: u64,
   pub expansion_terms:      usize,
   pub top_query_capacity:   usize,
}

impl Default for SearchConfig {
   fn default() -> Self {
      Self {
         default_top_k:        DEFAULT_TOP_K,
         max_top_k:            MAX_TOP_K,
         max_query_len:        MAX_QUERY_LEN,
         retrieval_timeout_ms: 5_000,
         expansion_terms:      3,
         top_query_capacity:   100,
      }
   }
}

impl SearchConfig {
   pub const fn retrieval_timeout(&self) -> Duration {
      Duration::from_millis(self.retrieval_timeout_ms)
   }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
   pub max_size_mb:           u64,
   pub default_ttl_secs:      u64,
   pub ttl_vector_secs:       u64,
   pub ttl_text_secs:         u64,
   pub ttl_hybrid_secs:       u64,
   pub sweep_interval_secs:   u64,
   pub max_snapshot_age_secs: u64,
   pub persist:               bool,
}

impl Default for CacheConfig {
   fn default() -> Self {
      Self {
         max_size_mb:           100,
         default_ttl_secs:      3_600,
         ttl_vector_secs:       3_600,
         ttl_text_secs:         1_800,
         ttl_hybrid_secs:       2_400,
         sweep_interval_secs:   300,
         max_snapshot_age_secs: 24 * 3_600,
         persist:               true,
      }
   }
}

impl CacheConfig {
   pub const fn max_bytes(&self) -> u64 {
      self.max_size_mb * 1024 * 1024
   }

   pub const fn ttl_for(&self, mode: SearchMode) -> Duration {
      let secs = match mode {
         SearchMode::Vector => self.ttl_vector_secs,
         SearchMode::Text => self.ttl_text_secs,
         SearchMode::Hybrid => self.ttl_hybrid_secs,
      };
      Duration::from_secs(secs)
   }

   pub const fn sweep_interval(&self) -> Duration {
      Duration::from_secs(self.sweep_interval_secs)
   }

   pub const fn max_snapshot_age(&self) -> Duration {
      Duration::from_secs(self.max_snapshot_age_secs)
   }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
   pub rewrite_threshold:  f64,
   pub max_expanded_terms: usize,
   pub memo_capacity:      u64,
   pub rewrite_timeout_ms: u64,
}

impl Default for QueryConfig {
   fn default() -> Self {
      Self {
         rewrite_threshold:  0.7,
         max_expanded_terms: 10,
         memo_capacity:      1_000,
         rewrite_timeout_ms: 8_000,
      }
   }
}

impl QueryConfig {
   pub const fn rewrite_timeout(&self) -> Duration {
      Duration::from_millis(self.rewrite_timeout_ms)
   }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriterConfig {
   /// OpenAI-compatible chat completions URL. Rewriting is disabled when unset.
   pub endpoint:    Option<String>,
   pub model:       String,
   pub api_key_env: String,
   pub max_tokens:  u32,
}

impl Default for RewriterConfig {
   fn default() -> Self {
      Self {
         endpoint:    None,
         model:       "gpt-4o".to_string(),
         api_key_env: "OPENAI_API_KEY".to_string(),
         max_tokens:  500,
      }
   }
}

impl RewriterConfig {
   pub fn api_key(&self) -> Option<String> {
      std::env::var(&self.api_key_env)
         .ok()
         .filter(|key| !key.is_empty())
   }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
   /// Remote index service exposing `POST {endpoint}/search`.
   pub endpoint: Option<String>,
   /// JSON file of fragments for local runs.
   pub corpus:   Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
   pub auth_phrase: String,
}

impl Default for AccessConfig {
   fn default() -> Self {
      Self { auth_phrase: DEFAULT_AUTH_PHRASE.to_string() }
   }
}
