use std::sync::Arc;

use anyhow::{Context, Result, bail};
use console::style;

use crate::{
   cache::{FileSnapshotStore, ResultCache},
   clock::SystemClock,
   config::Config,
};

#[derive(Debug, Clone)]
pub enum Invalidate {
   Pattern(String),
   Source(String),
   All,
}

async fn open() -> Result<ResultCache> {
   let config = Config::load().context("failed to load configuration")?;
   if !config.cache.persist {
      bail!("cache persistence is disabled, nothing to inspect");
   }
   let cache = ResultCache::new(config.cache, Arc::new(SystemClock))
      .with_store(Arc::new(FileSnapshotStore::in_data_dir()));
   cache.restore().await;
   Ok(cache)
}

pub async fn stats(json: bool) -> Result<()> {
   let cache = open().await?;
   let stats = cache.stats();

   if json {
      println!("{}", serde_json::to_string_pretty(&stats)?);
      return Ok(());
   }

   println!("{}", style("Result cache").bold());
   println!("  entries:     {}", stats.total_entries);
   println!(
      "  size:        {:.1} KiB of {:.1} MiB",
      stats.total_size_bytes as f64 / 1024.0,
      stats.max_size_bytes as f64 / (1024.0 * 1024.0)
   );
   println!(
      "  hit rate:    {:.1}% ({} hits, {} misses)",
      stats.hit_rate * 100.0,
      stats.hits,
      stats.misses
   );
   println!("  evictions:   {}", stats.evictions);
   println!("  expirations: {}", stats.expirations);
   if let Some(oldest) = &stats.oldest_entry {
      println!("  oldest:      {}", style(oldest).dim());
   }
   if let Some(newest) = &stats.newest_entry {
      println!("  newest:      {}", style(newest).dim());
   }
   Ok(())
}

pub async fn top(limit: usize, prefix: Option<String>) -> Result<()> {
   let cache = open().await?;
   let ranked = match &prefix {
      Some(partial) => cache.suggestions(partial, limit),
      None => cache.top_queries(limit),
   };

   if ranked.is_empty() {
      println!("{}", style("No cached queries").dim());
      return Ok(());
   }

   for (i, (query, hits)) in ranked.iter().enumerate() {
      println!(
         "{} {} {}",
         style(format!("{:>2})", i + 1)).bold().cyan(),
         query,
         style(format!("({hits} hits)")).dim()
      );
   }
   Ok(())
}

pub async fn invalidate(target: Invalidate) -> Result<()> {
   let cache = open().await?;

   let removed = match &target {
      Invalidate::Pattern(pattern) => cache.invalidate_by_pattern(pattern),
      Invalidate::Source(url) => cache.invalidate_by_source(url),
      Invalidate::All => {
         let count = cache.len();
         cache.clear().await;
         println!("{}", style(format!("Cleared {count} cached searches")).green());
         return Ok(());
      },
   };

   cache
      .persist()
      .await
      .context("failed to write cache snapshot")?;
   println!("{}", style(format!("Removed {removed} cached searches")).green());
   Ok(())
}
