use anyhow::{Context, Result};
use console::style;

use crate::config::{self, Config};

/// Prints the effective configuration after file and environment overrides.
pub fn execute() -> Result<()> {
   let config = Config::load().context("failed to load configuration")?;
   let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;

   println!("{}", style(format!("# {}", config::config_path().display())).dim());
   print!("{rendered}");
   Ok(())
}
