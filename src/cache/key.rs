use sha2::{Digest, Sha256};

use crate::types::{Filters, SearchMode};

/// Everything that determines a cached response.
#[derive(Debug, Clone, Copy)]
pub struct CacheLookup<'a> {
   pub query:   &'a str,
   pub filters: &'a Filters,
   pub top_k:   usize,
   pub mode:    SearchMode,
}

impl<'a> CacheLookup<'a> {
   pub const fn new(query: &'a str, filters: &'a Filters, top_k: usize, mode: SearchMode) -> Self {
      Self { query, filters, top_k, mode }
   }

   pub fn key(&self) -> String {
      cache_key(self)
   }
}

/// Content-addressed key: 16 hex chars of SHA-256 over
/// `lower(trim(query)) | filters (sorted keys) | top_k | mode`.
pub fn cache_key(lookup: &CacheLookup<'_>) -> String {
   let normalized = lookup.query.trim().to_lowercase();
   let filters = serde_json::to_string(lookup.filters).unwrap_or_default();
   let material = format!("{normalized}|{filters}|{}|{}", lookup.top_k, lookup.mode);

   let digest = Sha256::digest(material.as_bytes());
   hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn normalizes_case_and_whitespace() {
      let filters = Filters::new();
      let a = CacheLookup::new("  Hover Effect ", &filters, 5, SearchMode::Hybrid);
      let b = CacheLookup::new("hover effect", &filters, 5, SearchMode::Hybrid);
      assert_eq!(a.key(), b.key());
      assert_eq!(a.key().len(), 16);
   }

   #[test]
   fn filter_insertion_order_does_not_matter() {
      let mut first = Filters::new();
      first.insert("stack".into(), "react".into());
      first.insert("category".into(), "styling".into());

      let mut second = Filters::new();
      second.insert("category".into(), "styling".into());
      second.insert("stack".into(), "react".into());

      let a = CacheLookup::new("q", &first, 5, SearchMode::Text);
      let b = CacheLookup::new("q", &second, 5, SearchMode::Text);
      assert_eq!(a.key(), b.key());
   }

   #[test]
   fn count_and_mode_change_the_key() {
      let filters = Filters::new();
      let base = CacheLookup::new("q", &filters, 5, SearchMode::Text).key();
      assert_ne!(base, CacheLookup::new("q", &filters, 6, SearchMode::Text).key());
      assert_ne!(base, CacheLookup::new("q", &filters, 5, SearchMode::Vector).key());
   }
}
