// src/cli.rs
// =============================================================================
// This file defines our command-line interface using the `clap` crate.
//
// Two subcommands:
// - run: prerender a site served by a running upstream server
// - config: print the resolved configuration without rendering anything
//
// Every `run` flag is optional and overrides the matching config file value,
// so a config file can hold the project defaults and CI can tweak one knob.
//
// Rust concepts:
// - Derive macros: clap generates the parser from these types
// - Option<T>: "not given on the command line" is different from a default
// =============================================================================

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use prerender_kit::{OnError, PrerenderConfig, TrailingSlash};

#[derive(Parser, Debug)]
#[command(
    name = "prerender-kit",
    version,
    about = "Prerender a server-rendered site into static files",
    long_about = "prerender-kit renders every page of a site once, starting from a set of entry \
                  points and following links, and writes the results to an output directory \
                  that any static file host can serve."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Prerender the site served at --upstream
    ///
    /// Example: prerender-kit run --upstream http://localhost:3000 --out build
    Run {
        /// Server that renders the pages (e.g., http://localhost:3000)
        #[arg(long)]
        upstream: String,

        #[command(flatten)]
        overrides: Overrides,

        /// Print the manifest as JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Also write the manifest to <out>/prerendered.json
        #[arg(long)]
        manifest: bool,

        /// Log every skipped link and deduplicated write
        #[arg(long, short)]
        verbose: bool,
    },

    /// Print the resolved configuration as JSON
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Config file plus per-field overrides shared by both subcommands
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Config file (.toml or .json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output directory
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Directory of static files that are copied, not rendered
    #[arg(long)]
    pub assets: Option<PathBuf>,

    /// Maximum number of renders in flight
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Only render the entry points, don't follow links
    #[arg(long)]
    pub no_crawl: bool,

    /// What to do when a page fails to render
    #[arg(long, value_enum)]
    pub on_error: Option<OnError>,

    /// Trailing slash policy for page paths
    #[arg(long, value_enum)]
    pub trailing_slash: Option<TrailingSlash>,

    /// Path the site is mounted under (e.g., /docs)
    #[arg(long)]
    pub base: Option<String>,

    /// Entry point to start from; repeatable, `*` means every known route
    #[arg(long = "entry")]
    pub entries: Vec<String>,

    /// Also render the client-side routing fallback page to this file
    #[arg(long)]
    pub fallback: Option<String>,
}

impl Overrides {
    /// Loads the config file (or the defaults) and applies the flags on top
    pub fn resolve(&self) -> anyhow::Result<PrerenderConfig> {
        let mut config = match &self.config {
            Some(path) => PrerenderConfig::load(path)?,
            None => PrerenderConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut PrerenderConfig) {
        if let Some(out) = &self.out {
            config.out_dir = out.clone();
        }
        if let Some(assets) = &self.assets {
            config.assets_dir = assets.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if self.no_crawl {
            config.crawl = false;
        }
        if let Some(on_error) = self.on_error {
            config.on_error = on_error;
        }
        if let Some(trailing_slash) = self.trailing_slash {
            config.trailing_slash = trailing_slash;
        }
        if let Some(base) = &self.base {
            config.base = base.clone();
        }
        if !self.entries.is_empty() {
            config.entries = self.entries.clone();
        }
        if let Some(fallback) = &self.fallback {
            config.fallback = Some(fallback.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags_override_defaults() {
        let cli = Cli::parse_from([
            "prerender-kit",
            "run",
            "--upstream",
            "http://localhost:3000",
            "--concurrency",
            "4",
            "--no-crawl",
            "--on-error",
            "continue",
            "--trailing-slash",
            "always",
            "--entry",
            "/",
            "--entry",
            "/blog",
        ]);

        let Commands::Run { upstream, overrides, .. } = cli.command else {
            panic!("expected the run subcommand");
        };
        assert_eq!(upstream, "http://localhost:3000");

        let config = overrides.resolve().unwrap();
        assert_eq!(config.concurrency, 4);
        assert!(!config.crawl);
        assert_eq!(config.on_error, OnError::Continue);
        assert_eq!(config.trailing_slash, TrailingSlash::Always);
        assert_eq!(config.entries, vec!["/", "/blog"]);
    }

    #[test]
    fn test_no_flags_keep_defaults() {
        let config = Overrides::default().resolve().unwrap();
        assert_eq!(config, PrerenderConfig::default());
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let overrides = Overrides {
            base: Some("docs/".to_string()),
            ..Default::default()
        };
        assert!(overrides.resolve().is_err());
    }
}

// -----------------------------------------------------------------------------
// BEGINNER NOTES:
//
// 1. What does #[command(flatten)] do?
//    - It splices the fields of another Args struct into this subcommand
//    - Both `run` and `config` accept the same override flags this way
//
// 2. Why Option<usize> instead of usize with a default?
//    - None means "the user didn't say", so the config file value wins
//    - A plain default would silently overwrite the config file
//
// 3. What is value_enum?
//    - It lets clap parse a flag straight into one of our enums
//    - `--on-error continue` becomes OnError::Continue
// -----------------------------------------------------------------------------
