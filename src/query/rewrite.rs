//! External query rewriting.

use std::{
   sync::{Arc, LazyLock},
   time::Duration,
};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
   config::RewriterConfig,
   error::{Result, RewriteError},
   types::{Intent, QueryContext},
};

static JSON_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

const SYSTEM_PROMPT: &str = "You rewrite developer search queries for a documentation index. \
                             Reply with JSON only.";

/// What the rewriter is told about a query.
#[derive(Debug, Clone, Copy)]
pub struct RewriteRequest<'a> {
   pub query:          &'a str,
   pub intent:         Intent,
   pub stack_hints:    &'a [String],
   pub category_hints: &'a [String],
   pub context:        &'a QueryContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rewrite {
   pub rewritten_query: String,
   pub expanded_terms:  Vec<String>,
   pub confidence:      f64,
}

impl Rewrite {
   /// Rejects proposals the processor can't act on.
   pub fn validate(self) -> Result<Self, RewriteError> {
      if self.rewritten_query.trim().is_empty() {
         return Err(RewriteError::Malformed("empty rewritten_query".to_string()));
      }
      if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
         let reason = format!("confidence {} out of range", self.confidence);
         return Err(RewriteError::Malformed(reason));
      }
      Ok(self)
   }
}

/// Proposes a better phrasing of a query. Any error keeps the original.
#[async_trait::async_trait]
pub trait Rewriter: Send + Sync {
   async fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<Rewrite, RewriteError>;
}

#[async_trait::async_trait]
impl<T: Rewriter + ?Sized> Rewriter for Arc<T> {
   async fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<Rewrite, RewriteError> {
      (**self).rewrite(request).await
   }
}

pub fn build_prompt(request: &RewriteRequest<'_>) -> String {
   let join = |items: &[String]| {
      if items.is_empty() {
         "none".to_string()
      } else {
         items.join(", ")
      }
   };
   let context = if request.context.is_empty() {
      "none".to_string()
   } else {
      request
         .context
         .iter()
         .map(|(k, v)| format!("{k}={v}"))
         .collect::<Vec<_>>()
         .join(", ")
   };

   format!(
      "Rewrite the search query below so it retrieves the most relevant documentation and \
       code fragments.\n\nQuery: \"{query}\"\nDetected intent: {intent}\nDetected stacks: \
       {stacks}\nDetected categories: {categories}\nContext: {context}\n\nKeep the original \
       meaning, use precise technical vocabulary, and add up to five related terms.\n\nAnswer \
       with a JSON object:\n{{\"rewritten_query\": \"...\", \"expanded_terms\": [\"...\"], \
       \"confidence\": 0.0}}",
      query = request.query,
      intent = request.intent,
      stacks = join(request.stack_hints),
      categories = join(request.category_hints),
   )
}

/// Extracts the first `{...}` span of a model reply and decodes it.
pub fn parse_rewrite(content: &str) -> Result<Rewrite, RewriteError> {
   #[derive(Deserialize)]
   struct RawRewrite {
      rewritten_query: Option<String>,
      expanded_terms:  Option<Vec<String>>,
      confidence:      Option<f64>,
   }

   let span = JSON_OBJECT
      .find(content)
      .ok_or_else(|| RewriteError::Malformed("no JSON object in reply".to_string()))?;
   let raw: RawRewrite = serde_json::from_str(span.as_str())
      .map_err(|e| RewriteError::Malformed(e.to_string()))?;

   let missing = |field: &str| RewriteError::Malformed(format!("missing field {field}"));
   Rewrite {
      rewritten_query: raw.rewritten_query.ok_or_else(|| missing("rewritten_query"))?,
      expanded_terms:  raw.expanded_terms.ok_or_else(|| missing("expanded_terms"))?,
      confidence:      raw.confidence.ok_or_else(|| missing("confidence"))?,
   }
   .validate()
}

/// Rewriter backed by an OpenAI-compatible chat completions endpoint.
pub struct HttpRewriter {
   client:     reqwest::Client,
   endpoint:   String,
   model:      String,
   api_key:    Option<String>,
   max_tokens: u32,
   timeout:    Duration,
}

impl HttpRewriter {
   pub fn new(
      endpoint: impl Into<String>,
      config: &RewriterConfig,
      timeout: Duration,
   ) -> Result<Self> {
      let client = reqwest::Client::builder().timeout(timeout).build()?;
      Ok(Self {
         client,
         endpoint: endpoint.into(),
         model: config.model.clone(),
         api_key: config.api_key(),
         max_tokens: config.max_tokens,
         timeout,
      })
   }

   /// Returns `None` when no endpoint is configured.
   pub fn from_config(config: &RewriterConfig, timeout: Duration) -> Result<Option<Self>> {
      config
         .endpoint
         .as_deref()
         .map(|endpoint| Self::new(endpoint, config, timeout))
         .transpose()
   }
}

#[async_trait::async_trait]
impl Rewriter for HttpRewriter {
   async fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<Rewrite, RewriteError> {
      #[derive(Serialize)]
      struct Message<'a> {
         role:    &'a str,
         content: &'a str,
      }

      #[derive(Serialize)]
      struct ChatRequest<'a> {
         model:       &'a str,
         messages:    [Message<'a>; 2],
         max_tokens:  u32,
         temperature: f32,
      }

      #[derive(Deserialize)]
      struct ChatResponse {
         choices: Vec<Choice>,
      }

      #[derive(Deserialize)]
      struct Choice {
         message: ReplyMessage,
      }

      #[derive(Deserialize)]
      struct ReplyMessage {
         content: Option<String>,
      }

      let prompt = build_prompt(request);
      let body = ChatRequest {
         model:       &self.model,
         messages:    [
            Message { role: "system", content: SYSTEM_PROMPT },
            Message { role: "user", content: &prompt },
         ],
         max_tokens:  self.max_tokens,
         temperature: 0.1,
      };

      let mut builder = self.client.post(&self.endpoint).json(&body);
      if let Some(key) = &self.api_key {
         builder = builder.bearer_auth(key);
      }

      let response = builder.send().await.map_err(|e| {
         if e.is_timeout() {
            RewriteError::Timeout(self.timeout.as_millis() as u64)
         } else {
            RewriteError::from(e)
         }
      })?;
      if !response.status().is_success() {
         return Err(RewriteError::Status(response.status().as_u16()));
      }

      let reply: ChatResponse = response
         .json()
         .await
         .map_err(|e| RewriteError::Malformed(e.to_string()))?;
      let content = reply
         .choices
         .into_iter()
         .next()
         .and_then(|choice| choice.message.content)
         .ok_or_else(|| RewriteError::Malformed("empty completion".to_string()))?;

      parse_rewrite(&content)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn request<'a>(
      query: &'a str,
      stacks: &'a [String],
      context: &'a QueryContext,
   ) -> RewriteRequest<'a> {
      RewriteRequest {
         query,
         intent: Intent::Implementation,
         stack_hints: stacks,
         category_hints: &[],
         context,
      }
   }

   #[test]
   fn parses_json_wrapped_in_prose() {
      let reply = "Sure! Here it is:\n```json\n{\"rewritten_query\": \"react useState hook\", \
                   \"expanded_terms\": [\"state\", \"hooks\"], \"confidence\": 0.82}\n```";
      let rewrite = parse_rewrite(reply).unwrap();
      assert_eq!(rewrite.rewritten_query, "react useState hook");
      assert_eq!(rewrite.expanded_terms, vec!["state", "hooks"]);
      assert!((rewrite.confidence - 0.82).abs() < f64::EPSILON);
   }

   #[test]
   fn missing_fields_are_malformed() {
      let err = parse_rewrite(r#"{"rewritten_query": "x", "confidence": 0.9}"#).unwrap_err();
      assert!(matches!(err, RewriteError::Malformed(msg) if msg.contains("expanded_terms")));
   }

   #[test]
   fn no_json_is_malformed() {
      assert!(matches!(parse_rewrite("I cannot help"), Err(RewriteError::Malformed(_))));
   }

   #[test]
   fn confidence_outside_unit_range_is_malformed() {
      let err = parse_rewrite(
         r#"{"rewritten_query": "x", "expanded_terms": [], "confidence": 1.5}"#,
      )
      .unwrap_err();
      assert!(matches!(err, RewriteError::Malformed(_)));
   }

   #[test]
   fn prompt_mentions_hints_and_context() {
      let stacks = vec!["react".to_string()];
      let mut context = QueryContext::new();
      context.insert("current_stack".to_string(), "nextjs".to_string());
      let prompt = build_prompt(&request("button with state", &stacks, &context));
      assert!(prompt.contains("\"button with state\""));
      assert!(prompt.contains("Detected intent: implementation"));
      assert!(prompt.contains("Detected stacks: react"));
      assert!(prompt.contains("Detected categories: none"));
      assert!(prompt.contains("current_stack=nextjs"));
   }

   #[test]
   fn rewriter_disabled_without_endpoint() {
      let config = RewriterConfig::default();
      let rewriter = HttpRewriter::from_config(&config, Duration::from_secs(1)).unwrap();
      assert!(rewriter.is_none());
   }
}
