//! Retrieval core for knowledge-augmented answering: query analysis and
//! rewriting, a TTL/LRU result cache, access gating, and domain reranking
//! around a pluggable retrieval backend.

pub mod access;
pub mod backend;
pub mod cache;
pub mod clock;
pub mod cmd;
pub mod config;
pub mod context;
pub mod error;
pub mod query;
pub mod rerank;
pub mod search;
pub mod types;

pub use error::{Error, Result};
