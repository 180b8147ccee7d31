//! In-process backend over a JSON file of documents. Scores by term overlap;
//! meant for local runs and tests, not as an index engine.

use std::{collections::HashSet, path::Path};

use serde::Deserialize;

use super::{RetrievalBackend, RetrievalQuery};
use crate::{
   error::Result,
   types::{FragmentMetadata, RetrievedFragment, SearchMode},
};

#[derive(Debug, Clone, Deserialize)]
pub struct CorpusDocument {
   pub id:       String,
   pub content:  String,
   #[serde(default)]
   pub title:    Option<String>,
   #[serde(default)]
   pub url:      Option<String>,
   #[serde(default)]
   pub license:  Option<String>,
   #[serde(default)]
   pub metadata: FragmentMetadata,
}

pub struct CorpusBackend {
   documents: Vec<(CorpusDocument, HashSet<String>)>,
}

fn tokens(text: &str) -> HashSet<String> {
   text
      .split(|c: char| !c.is_alphanumeric() && c != '-')
      .filter(|t| t.len() > 1)
      .map(str::to_lowercase)
      .collect()
}

fn field_matches(filter: Option<&serde_json::Value>, value: Option<&str>) -> bool {
   match filter.and_then(|f| f.as_str()) {
      None => true,
      Some(wanted) => value.is_some_and(|v| v.eq_ignore_ascii_case(wanted)),
   }
}

impl CorpusBackend {
   pub fn new(documents: Vec<CorpusDocument>) -> Self {
      let documents = documents
         .into_iter()
         .map(|doc| {
            let mut text = doc.content.clone();
            if let Some(title) = &doc.title {
               text.push(' ');
               text.push_str(title);
            }
            let terms = tokens(&text);
            (doc, terms)
         })
         .collect();
      Self { documents }
   }

   /// Reads a JSON array of documents.
   pub async fn load(path: &Path) -> Result<Self> {
      let raw = tokio::fs::read(path).await?;
      let documents: Vec<CorpusDocument> = serde_json::from_slice(&raw)?;
      Ok(Self::new(documents))
   }

   pub fn len(&self) -> usize {
      self.documents.len()
   }

   pub fn is_empty(&self) -> bool {
      self.documents.is_empty()
   }

   fn score(mode: SearchMode, query: &HashSet<String>, doc: &HashSet<String>) -> f64 {
      if query.is_empty() || doc.is_empty() {
         return 0.0;
      }
      let shared = query.intersection(doc).count() as f64;
      // lexical: query coverage; vector: set similarity
      let lexical = shared / query.len() as f64;
      let semantic = shared / query.union(doc).count() as f64;
      match mode {
         SearchMode::Text => lexical,
         SearchMode::Vector => semantic,
         SearchMode::Hybrid => 0.5 * lexical + 0.5 * semantic,
      }
   }
}

#[async_trait::async_trait]
impl RetrievalBackend for CorpusBackend {
   fn name(&self) -> &'static str {
      "corpus"
   }

   async fn search(&self, query: RetrievalQuery<'_>) -> Result<Vec<RetrievedFragment>> {
      let terms = tokens(query.text);
      let stack = query.filters.get("stack");
      let category = query.filters.get("category");

      let mut hits: Vec<RetrievedFragment> = self
         .documents
         .iter()
         .filter(|(doc, _)| {
            field_matches(stack, doc.metadata.stack.as_deref())
               && field_matches(category, doc.metadata.category.as_deref())
         })
         .filter_map(|(doc, doc_terms)| {
            let score = Self::score(query.mode, &terms, doc_terms);
            (score > 0.0).then(|| RetrievedFragment {
               id: doc.id.clone(),
               content: doc.content.clone(),
               title: doc.title.clone(),
               url: doc.url.clone(),
               license: doc.license.clone(),
               score,
               source: query.mode,
               rationale: None,
               highlights: Vec::new(),
               metadata: doc.metadata.clone(),
            })
         })
         .collect();

      hits.sort_by(|a, b| {
         b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
      });
      hits.truncate(query.top_k);
      Ok(hits)
   }
}

#[cfg(test)]
mod tests {
   use std::io::Write;

   use super::*;
   use crate::types::Filters;

   const CORPUS: &str = r#"[
      {"id": "spin", "title": "Spinner", "content": "@keyframes spin { to { transform: rotate(360deg) } }",
       "metadata": {"stack": "css", "category": "styling"}},
      {"id": "fade", "title": "Fade on hover", "content": ".card:hover { opacity: 1; transition: opacity .3s }",
       "metadata": {"stack": "tailwind", "category": "styling"}},
      {"id": "prisma", "title": "Relations", "content": "Prisma schema relations between models",
       "metadata": {"stack": "prisma", "category": "database"}}
   ]"#;

   async fn corpus() -> CorpusBackend {
      let mut file = tempfile::NamedTempFile::new().unwrap();
      file.write_all(CORPUS.as_bytes()).unwrap();
      CorpusBackend::load(file.path()).await.unwrap()
   }

   fn query<'a>(text: &'a str, mode: SearchMode, filters: &'a Filters) -> RetrievalQuery<'a> {
      RetrievalQuery { text, top_k: 10, mode, filters }
   }

   #[tokio::test]
   async fn loads_and_ranks_by_overlap() {
      let backend = corpus().await;
      assert_eq!(backend.len(), 3);
      let filters = Filters::new();
      let hits = backend.search(query("rotate spin", SearchMode::Text, &filters)).await.unwrap();
      assert_eq!(hits[0].id, "spin");
      assert_eq!(hits[0].source, SearchMode::Text);
      assert!(hits.iter().all(|h| h.id != "prisma"));
   }

   #[tokio::test]
   async fn honors_stack_filter_and_ignores_unknown_keys() {
      let backend = corpus().await;
      let mut filters = Filters::new();
      filters.insert("stack".to_string(), "tailwind".into());
      filters.insert("prefer_domain_content".to_string(), true.into());
      let hits = backend.search(query("hover opacity", SearchMode::Hybrid, &filters)).await.unwrap();
      assert_eq!(hits.len(), 1);
      assert_eq!(hits[0].id, "fade");
   }

   #[tokio::test]
   async fn no_overlap_returns_nothing() {
      let backend = corpus().await;
      let filters = Filters::new();
      let hits = backend.search(query("graphql", SearchMode::Vector, &filters)).await.unwrap();
      assert!(hits.is_empty());
   }
}
