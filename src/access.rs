//! Post-retrieval access control.
//!
//! Fragments that mention a restricted category are withheld unless the
//! category's authorization phrase appears somewhere in the query text.

use std::sync::atomic::{AtomicU64, Ordering};

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::{
   Result,
   config::DEFAULT_AUTH_PHRASE,
   types::{AccessLevel, AccessSummary, RetrievedFragment, SearchResult},
};

/// Text the gate scans for a piece of content.
pub trait GatedContent {
   fn gate_text(&self) -> String;
}

impl GatedContent for RetrievedFragment {
   fn gate_text(&self) -> String {
      let mut text = self.content.clone();
      for part in [self.title.as_deref(), self.metadata.description.as_deref()]
         .into_iter()
         .flatten()
      {
         text.push(' ');
         text.push_str(part);
      }
      text
   }
}

impl GatedContent for SearchResult {
   fn gate_text(&self) -> String {
      let mut text = format!("{} {}", self.chunk, self.source.title);
      if let Some(description) = &self.metadata.description {
         text.push(' ');
         text.push_str(description);
      }
      text
   }
}

pub const AGENT_BUILDING: &str = "agent_building";

const AGENT_BUILDING_KEYWORDS: &[&str] = &[
   "agent builder",
   "agent creation",
   "building agents",
   "create agent",
   "agent development",
   "agent framework development",
   "agent architecture design",
   "langchain agent tutorial",
   "langgraph agent creation",
   "autogen setup",
   "crewai implementation",
   "multi-agent system development",
   "agent deployment guide",
   "agent orchestration setup",
   "how to build agent",
   "agent development tutorial",
   "agent design patterns implementation",
   "agent best practices guide",
];

const AGENT_BUILDING_PATTERNS: &[&str] = &[
   r"\b(agent|agente)\s+(building|creation|development|framework)\b",
   r"\b(ai|artificial intelligence)\s+agent\b",
   r"\b(multi-agent|multiagent)\b",
   r"\b(langchain|langgraph|autogen|crewai)\b",
   r"\b(agent|agente)\s+(architecture|design|pattern)\b",
   r"\b(autonomous|conversational|task)\s+agent\b",
   r"\b(rag|retrieval augmented generation)\s+agent\b",
   r"\b(agent|agente)\s+(deployment|orchestration|workflow)\b",
];

/// A class of content that needs an authorization phrase.
#[derive(Debug, Clone)]
pub struct RestrictedCategory {
   name:        String,
   description: String,
   auth_phrase: String,
   keywords:    Vec<String>,
   patterns:    Vec<Regex>,
}

impl RestrictedCategory {
   pub fn new(
      name: impl Into<String>,
      auth_phrase: impl Into<String>,
      description: impl Into<String>,
   ) -> Self {
      Self {
         name:        name.into(),
         description: description.into(),
         auth_phrase: auth_phrase.into().to_lowercase(),
         keywords:    Vec::new(),
         patterns:    Vec::new(),
      }
   }

   /// Built-in category for material on building AI agents.
   pub fn agent_building(auth_phrase: &str) -> Self {
      Self::new(AGENT_BUILDING, auth_phrase, "material on building and deploying AI agents")
         .keywords(AGENT_BUILDING_KEYWORDS)
         .patterns(AGENT_BUILDING_PATTERNS)
         .unwrap_or_else(|e| unreachable!("built-in pattern failed to compile: {e}"))
   }

   pub fn keywords(mut self, keywords: &[&str]) -> Self {
      self
         .keywords
         .extend(keywords.iter().map(|kw| kw.to_lowercase()));
      self
   }

   /// Adds case-insensitive detection patterns.
   pub fn patterns(mut self, patterns: &[&str]) -> Result<Self> {
      for pattern in patterns {
         self
            .patterns
            .push(RegexBuilder::new(pattern).case_insensitive(true).build()?);
      }
      Ok(self)
   }

   pub fn name(&self) -> &str {
      &self.name
   }

   pub fn description(&self) -> &str {
      &self.description
   }

   /// `text` must already be lowercased.
   fn matches(&self, text: &str) -> bool {
      self.patterns.iter().any(|re| re.is_match(text))
         || self.keywords.iter().any(|kw| text.contains(kw.as_str()))
   }

   fn authorized_by(&self, query: &str) -> bool {
      !self.auth_phrase.is_empty() && query.contains(self.auth_phrase.as_str())
   }
}

#[derive(Debug, Clone)]
pub struct AccessDecision<T> {
   pub access_granted:      bool,
   pub fragments:           Vec<T>,
   /// Fragments that matched any restricted category.
   pub restricted_count:    usize,
   /// Fragments withheld from `fragments`.
   pub removed_count:       usize,
   pub access_level:        AccessLevel,
   pub authorization_found: bool,
   pub message:             Option<String>,
}

impl<T> AccessDecision<T> {
   pub fn summary(&self) -> AccessSummary {
      AccessSummary {
         access_granted:      self.access_granted,
         access_level:        self.access_level,
         restricted_count:    self.restricted_count,
         removed_count:       self.removed_count,
         authorization_found: self.authorization_found,
         message:             self.message.clone(),
      }
   }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GateStats {
   pub total_checks:               u64,
   pub access_granted:             u64,
   pub access_denied:              u64,
   pub restricted_filtered:        u64,
   pub authorization_attempts:     u64,
   pub successful_authorizations:  u64,
   pub access_rate:                f64,
   pub authorization_success_rate: f64,
   pub avg_restricted_per_check:   f64,
}

#[derive(Default)]
struct Counters {
   checks:     AtomicU64,
   granted:    AtomicU64,
   denied:     AtomicU64,
   filtered:   AtomicU64,
   attempts:   AtomicU64,
   authorized: AtomicU64,
}

pub struct AccessGate {
   categories: Vec<RestrictedCategory>,
   counters:   Counters,
}

impl Default for AccessGate {
   fn default() -> Self {
      Self::new(DEFAULT_AUTH_PHRASE)
   }
}

impl AccessGate {
   /// Gate with the built-in agent-building category.
   pub fn new(auth_phrase: &str) -> Self {
      Self::empty().with_category(RestrictedCategory::agent_building(auth_phrase))
   }

   pub fn empty() -> Self {
      Self { categories: Vec::new(), counters: Counters::default() }
   }

   /// Adds a category, replacing any existing one with the same name.
   pub fn with_category(mut self, category: RestrictedCategory) -> Self {
      self.categories.retain(|c| c.name != category.name);
      tracing::debug!(category = %category.name, "restricted category registered");
      self.categories.push(category);
      self
   }

   pub fn without_category(mut self, name: &str) -> Self {
      self.categories.retain(|c| c.name != name);
      self
   }

   pub fn categories(&self) -> &[RestrictedCategory] {
      &self.categories
   }

   pub fn check<T: GatedContent>(&self, query: &str, fragments: Vec<T>) -> AccessDecision<T> {
      self.counters.checks.fetch_add(1, Ordering::Relaxed);
      self.counters.attempts.fetch_add(1, Ordering::Relaxed);

      let query = query.trim().to_lowercase();
      let authorization_found = self.categories.iter().any(|c| c.authorized_by(&query));
      if authorization_found {
         tracing::info!("authorization phrase present in query");
      }

      let mut restricted_count = 0;
      let mut removed_count = 0;
      let mut kept = Vec::with_capacity(fragments.len());
      for fragment in fragments {
         let text = fragment.gate_text().to_lowercase();
         let mut matched = self.categories.iter().filter(|c| c.matches(&text)).peekable();
         if matched.peek().is_none() {
            kept.push(fragment);
            continue;
         }
         restricted_count += 1;
         if matched.all(|c| c.authorized_by(&query)) {
            kept.push(fragment);
         } else {
            removed_count += 1;
         }
      }

      let access_level = if restricted_count == 0 {
         AccessLevel::Public
      } else if removed_count == 0 {
         AccessLevel::Authorized
      } else {
         AccessLevel::Filtered
      };
      let access_granted = removed_count == 0;

      if access_granted {
         self.counters.granted.fetch_add(1, Ordering::Relaxed);
      } else {
         self.counters.denied.fetch_add(1, Ordering::Relaxed);
         self.counters.filtered.fetch_add(removed_count as u64, Ordering::Relaxed);
         tracing::info!(restricted_count, removed_count, "restricted fragments withheld");
      }
      if access_level == AccessLevel::Authorized {
         self.counters.authorized.fetch_add(1, Ordering::Relaxed);
      }

      let mut decision = AccessDecision {
         access_granted,
         fragments: kept,
         restricted_count,
         removed_count,
         access_level,
         authorization_found,
         message: None,
      };
      if access_level != AccessLevel::Public {
         decision.message = Some(self.message(&decision));
      }
      decision
   }

   /// User-facing explanation of a decision.
   pub fn message<T>(&self, decision: &AccessDecision<T>) -> String {
      match decision.access_level {
         AccessLevel::Public => "Query processed normally.".to_string(),
         AccessLevel::Authorized => format!(
            "Authorized access granted to {} restricted resources.",
            decision.restricted_count
         ),
         AccessLevel::Filtered => format!(
            "{} restricted resources were withheld. Include the authorization phrase in your \
             query to access them.",
            decision.removed_count
         ),
      }
   }

   pub fn stats(&self) -> GateStats {
      let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
      let checks = load(&self.counters.checks);
      let granted = load(&self.counters.granted);
      let filtered = load(&self.counters.filtered);
      let attempts = load(&self.counters.attempts);
      let authorized = load(&self.counters.authorized);
      GateStats {
         total_checks: checks,
         access_granted: granted,
         access_denied: load(&self.counters.denied),
         restricted_filtered: filtered,
         authorization_attempts: attempts,
         successful_authorizations: authorized,
         access_rate: granted as f64 / checks.max(1) as f64,
         authorization_success_rate: authorized as f64 / attempts.max(1) as f64,
         avg_restricted_per_check: filtered as f64 / checks.max(1) as f64,
      }
   }
}
