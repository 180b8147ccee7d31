use anyhow::Result;
use clap::{Parser, Subcommand};
use ragcore::cmd::{self, cache::Invalidate, search::SearchOptions};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "ragcore")]
#[command(version)]
#[command(about = "Retrieval core: cached, gated and reranked search over a knowledge base")]
#[command(propagate_version = true)]
struct Cli {
   /// Raise log verbosity (-v info, -vv debug, -vvv trace)
   #[arg(short, long, global = true, action = clap::ArgAction::Count)]
   verbose: u8,

   #[command(subcommand)]
   command: Commands,
}

#[derive(Subcommand)]
enum Commands {
   /// Search the knowledge base
   Search {
      query: String,

      #[arg(short = 'm', long = "max")]
      max: Option<usize>,

      /// vector, text or hybrid
      #[arg(long)]
      mode: Option<String>,

      /// Retrieval filter as key=value (repeatable)
      #[arg(short = 'f', long = "filter")]
      filters: Vec<String>,

      /// Query context as key=value, e.g. current_stack=nextjs (repeatable)
      #[arg(long = "context")]
      context: Vec<String>,

      #[arg(short = 'c', long)]
      content: bool,

      #[arg(long)]
      scores: bool,

      #[arg(long)]
      json: bool,

      #[arg(long)]
      no_cache: bool,

      #[arg(long)]
      no_rerank: bool,

      #[arg(long)]
      plain: bool,
   },

   /// Inspect or invalidate the persisted result cache
   Cache {
      #[command(subcommand)]
      action: CacheAction,
   },

   /// Print the effective configuration
   Config,
}

#[derive(Subcommand)]
enum CacheAction {
   Stats {
      #[arg(long)]
      json: bool,
   },

   /// Most requested queries, optionally only those extending a prefix
   Top {
      #[arg(short, long, default_value_t = 10)]
      limit: usize,

      #[arg(long)]
      prefix: Option<String>,
   },

   Invalidate {
      /// Drop entries whose query contains this text
      #[arg(long, conflicts_with_all = ["source", "all"])]
      pattern: Option<String>,

      /// Drop entries holding a result from this URL
      #[arg(long, conflicts_with = "all")]
      source: Option<String>,

      #[arg(long)]
      all: bool,
   },
}

fn init_tracing(verbose: u8) {
   let filter = match verbose {
      0 => EnvFilter::try_from_env("RAGCORE_LOG")
         .or_else(|_| EnvFilter::try_from_default_env())
         .unwrap_or_else(|_| EnvFilter::new("warn")),
      1 => EnvFilter::new("info"),
      2 => EnvFilter::new("debug"),
      _ => EnvFilter::new("trace"),
   };

   fmt()
      .with_env_filter(filter)
      .with_target(false)
      .with_writer(std::io::stderr)
      .init();
}

#[tokio::main]
async fn main() -> Result<()> {
   let cli = Cli::parse();
   init_tracing(cli.verbose);

   match cli.command {
      Commands::Search {
         query,
         max,
         mode,
         filters,
         context,
         content,
         scores,
         json,
         no_cache,
         no_rerank,
         plain,
      } => {
         let options = SearchOptions { content, scores, json, no_cache, no_rerank, plain };
         cmd::search::execute(query, max, mode, filters, context, options).await
      },
      Commands::Cache { action } => match action {
         CacheAction::Stats { json } => cmd::cache::stats(json).await,
         CacheAction::Top { limit, prefix } => cmd::cache::top(limit, prefix).await,
         CacheAction::Invalidate { pattern, source, all } => {
            let target = match (pattern, source, all) {
               (Some(pattern), _, _) => Invalidate::Pattern(pattern),
               (None, Some(source), _) => Invalidate::Source(source),
               (None, None, true) => Invalidate::All,
               (None, None, false) => {
                  anyhow::bail!("one of --pattern, --source or --all is required")
               },
            };
            cmd::cache::invalidate(target).await
         },
      },
      Commands::Config => cmd::config::execute(),
   }
}
