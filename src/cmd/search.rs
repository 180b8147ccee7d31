use anyhow::{Context, Result, bail};
use console::style;
use serde_json::Value;

use crate::{
   config::Config,
   context::ServiceContext,
   types::{QueryContext, RawSearchRequest, SearchResponse, SearchResult},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
   pub content:   bool,
   pub scores:    bool,
   pub json:      bool,
   pub no_cache:  bool,
   pub no_rerank: bool,
   pub plain:     bool,
}

#[derive(Debug, Clone, Copy)]
struct FormatOptions {
   content: bool,
   scores:  bool,
   plain:   bool,
}

pub async fn execute(
   query: String,
   max: Option<usize>,
   mode: Option<String>,
   filters: Vec<String>,
   context: Vec<String>,
   options: SearchOptions,
) -> Result<()> {
   let mut request = RawSearchRequest::new(query.clone())
      .use_cache(!options.no_cache)
      .rerank(!options.no_rerank);
   if let Some(max) = max {
      request = request.top_k(max);
   }
   if let Some(mode) = mode {
      request = request.mode(mode);
   }
   for pair in &filters {
      let (key, value) = parse_pair(pair)?;
      request = request.filter(key, value);
   }
   if !context.is_empty() {
      let mut map = QueryContext::new();
      for pair in &context {
         let (key, value) = split_pair(pair)?;
         map.insert(key.to_string(), value.to_string());
      }
      request.context = Some(map);
   }

   let config = Config::load().context("failed to load configuration")?;
   let ctx = ServiceContext::build(config)
      .await
      .context("failed to start retrieval core")?;

   let outcome = ctx
      .orchestrator()
      .search_with_cancel(request, &ctx.cancellation())
      .await;
   ctx.shutdown().await;

   let response = outcome.with_context(|| format!("search for '{query}' failed"))?;

   if options.json {
      println!("{}", serde_json::to_string(&response)?);
      return Ok(());
   }

   if response.results.is_empty() {
      if let Some(error) = &response.search_stats.error {
         eprintln!("{}", style(format!("Search degraded: {error}")).yellow());
      }
      println!("No results found for '{query}'");
      return Ok(());
   }

   format_results(&response, FormatOptions {
      content: options.content,
      scores:  options.scores,
      plain:   options.plain,
   });
   Ok(())
}

fn split_pair(pair: &str) -> Result<(&str, &str)> {
   let Some((key, value)) = pair.split_once('=') else {
      bail!("expected key=value, got '{pair}'");
   };
   let key = key.trim();
   if key.is_empty() {
      bail!("empty key in '{pair}'");
   }
   Ok((key, value.trim()))
}

/// `key=value`, where the value is read as JSON when it parses and kept as a
/// string otherwise.
fn parse_pair(pair: &str) -> Result<(String, Value)> {
   let (key, raw) = split_pair(pair)?;
   let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
   Ok((key.to_string(), value))
}

fn format_results(response: &SearchResponse, options: FormatOptions) {
   const MAX_PREVIEW_LINES: usize = 12;

   let info = &response.query_info;
   if options.plain {
      println!("\nSearch results for: {}", info.original_query);
      if info.used_rewriting {
         println!("Rewritten: {}", info.rewritten_query);
      }
      println!();
   } else {
      println!("\n{}", style(format!("Search results for: {}", info.original_query)).bold());
      if info.used_rewriting {
         println!("{}", style(format!("Rewritten: {}", info.rewritten_query)).dim());
      }
      if response.cached {
         println!("{}", style("(cached)").dim());
      }
      println!();
   }

   for (i, result) in response.results.iter().enumerate() {
      print_header(i, result, options);

      let lines: Vec<&str> = result.chunk.lines().collect();
      let total_lines = lines.len();
      let show_all = options.content || total_lines <= MAX_PREVIEW_LINES;
      let display_lines = if show_all {
         total_lines
      } else {
         MAX_PREVIEW_LINES
      };

      for line in lines.iter().take(display_lines) {
         if options.plain {
            println!("  | {line}");
         } else {
            println!("  {} {}", style("|").dim(), line);
         }
      }

      if !show_all {
         let remaining = total_lines - display_lines;
         if options.plain {
            println!("  | ... (+{remaining} more lines)");
         } else {
            println!(
               "  {} {}",
               style("|").dim(),
               style(format!("... (+{remaining} more lines)")).dim()
            );
         }
      }

      if options.plain {
         println!("  {}", result.rationale);
      } else {
         println!("  {}", style(&result.rationale).italic().dim());
      }
      println!();
   }

   if let Some(access) = &response.search_stats.access_control
      && let Some(message) = &access.message
   {
      if options.plain {
         println!("{message}");
      } else {
         println!("{}", style(message).yellow());
      }
   }
}

fn print_header(i: usize, result: &SearchResult, options: FormatOptions) {
   if options.plain {
      print!("{}) {} [{}]", i + 1, result.source.title, result.metadata.stack);
      if !result.source.url.is_empty() {
         print!(" {}", result.source.url);
      }
      if options.scores {
         print!(" (score: {:.3})", result.score);
         if let Some(boost) = result.boost {
            print!(" (boost: x{:.2})", boost.boost);
         }
      }
   } else {
      print!("{}", style(format!("{}) ", i + 1)).bold().cyan());
      print!("{} ", style(&result.source.title).green());
      print!("{}", style(format!("[{}]", result.metadata.stack)).magenta());
      if !result.source.url.is_empty() {
         print!(" {}", style(&result.source.url).underlined());
      }
      if options.scores {
         print!(" {}", style(format!("(score: {:.3})", result.score)).dim());
         if let Some(boost) = result.boost {
            print!(" {}", style(format!("(boost: x{:.2})", boost.boost)).dim());
         }
      }
   }
   println!();
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn pair_values_parse_as_json_when_possible() {
      assert_eq!(parse_pair("top=3").unwrap(), ("top".to_string(), Value::from(3)));
      assert_eq!(parse_pair("strict=true").unwrap().1, Value::Bool(true));
      assert_eq!(parse_pair("stack = react").unwrap(), ("stack".to_string(), Value::from("react")));
   }

   #[test]
   fn pair_requires_key_and_separator() {
      assert!(parse_pair("react").is_err());
      assert!(parse_pair("=react").is_err());
      assert_eq!(split_pair("current_stack=nextjs").unwrap(), ("current_stack", "nextjs"));
   }
}
