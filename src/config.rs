// src/config.rs
// =============================================================================
// This module defines the prerender configuration.
//
// A config can come from three places, later ones winning:
// 1. Built-in defaults (`PrerenderConfig::default()`)
// 2. A config file, TOML or JSON depending on the extension
// 3. Command-line flags (applied in main.rs)
//
// Example prerender.toml:
//
//     concurrency = 4
//     trailing_slash = "always"
//     base = "/docs"
//     entries = ["*", "/hidden"]
//     routes = ["/", "/about", "/blog"]
//     on_error = "continue"
//     fallback = "200.html"
// =============================================================================

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ErrorPolicy;
use crate::paths::TrailingSlash;

/// Built-in reaction to a failed resource; custom handlers are only
/// available through the library API (`ErrorPolicy::custom`)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    Continue,
    #[default]
    Fail,
}

impl From<OnError> for ErrorPolicy {
    fn from(on_error: OnError) -> Self {
        match on_error {
            OnError::Continue => ErrorPolicy::Continue,
            OnError::Fail => ErrorPolicy::Fail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrerenderConfig {
    /// Crawl and render at all (the fallback is rendered either way)
    pub enabled: bool,

    /// Follow links found in rendered HTML
    pub crawl: bool,

    /// Maximum number of renders in flight
    pub concurrency: usize,

    /// Seed paths; `*` expands to every path in `routes`
    pub entries: Vec<String>,

    pub on_error: OnError,

    pub trailing_slash: TrailingSlash,

    /// Path prefix the app is served under, "" or e.g. "/docs"
    pub base: String,

    /// Origin requests are issued against while prerendering
    pub origin: String,

    /// Where the static site is written
    pub out_dir: PathBuf,

    /// Static files served as-is, never rendered
    pub assets_dir: PathBuf,

    /// Directory (relative to the base) the bundler emits into
    pub app_dir: String,

    /// Bundled asset filenames, relative to `app_dir`
    pub build_files: Vec<String>,

    /// Statically known entry points
    pub routes: Vec<String>,

    /// Output file for the client-side routing fallback page
    pub fallback: Option<String>,
}

impl Default for PrerenderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            crawl: true,
            concurrency: 1,
            entries: vec!["*".to_string()],
            on_error: OnError::Fail,
            trailing_slash: TrailingSlash::Never,
            base: String::new(),
            origin: "http://prerender.local".to_string(),
            out_dir: PathBuf::from("build"),
            assets_dir: PathBuf::from("static"),
            app_dir: "_app".to_string(),
            build_files: Vec::new(),
            routes: vec!["/".to_string()],
            fallback: None,
        }
    }
}

impl PrerenderConfig {
    /// Loads a config file; `.json` files are parsed as JSON, anything else
    /// as TOML. Missing fields fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?
        };

        Ok(config)
    }

    /// Checks the values a run depends on
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }

        if !self.base.is_empty() && (!self.base.starts_with('/') || self.base.ends_with('/')) {
            bail!(
                "base path must be empty or start with '/' and not end with '/' (got '{}')",
                self.base
            );
        }

        for entry in &self.entries {
            if entry != "*" && !entry.starts_with('/') {
                bail!("entry '{}' must be '*' or start with '/'", entry);
            }
        }

        for route in &self.routes {
            if !route.starts_with('/') {
                bail!("route '{}' must start with '/'", route);
            }
        }

        self.origin_url()?;
        Ok(())
    }

    /// The parsed `origin`; must be a bare http(s) origin
    pub fn origin_url(&self) -> Result<Url> {
        let origin = Url::parse(&self.origin)
            .map_err(|e| anyhow!("Invalid origin '{}': {}", self.origin, e))?;

        if origin.scheme() != "http" && origin.scheme() != "https" {
            bail!("origin must be an http or https URL (got '{}')", self.origin);
        }
        if origin.path() != "/" || origin.query().is_some() || origin.fragment().is_some() {
            bail!("origin must not have a path, query or fragment (got '{}')", self.origin);
        }

        Ok(origin)
    }

    /// The seed paths (decoded), with `*` expanded and the base prepended
    pub fn seed_paths(&self) -> Vec<String> {
        let mut seeds = Vec::new();

        for entry in &self.entries {
            if entry == "*" {
                seeds.extend(self.routes.iter().map(|route| format!("{}{}", self.base, route)));
            } else {
                seeds.push(format!("{}{}", self.base, entry));
            }
        }

        seeds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PrerenderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency, 1);
        assert!(config.crawl);
        assert_eq!(config.seed_paths(), vec!["/"]);
    }

    #[test]
    fn test_load_toml_with_partial_fields() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
concurrency = 4
trailing_slash = "always"
on_error = "continue"
base = "/docs"
routes = ["/", "/intro"]
"#
        )
        .unwrap();

        let config = PrerenderConfig::load(file.path()).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.trailing_slash, TrailingSlash::Always);
        assert_eq!(config.on_error, OnError::Continue);
        assert_eq!(config.origin, "http://prerender.local");
        assert_eq!(config.seed_paths(), vec!["/docs/", "/docs/intro"]);
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"crawl": false, "entries": ["/a", "/b"]}}"#).unwrap();

        let config = PrerenderConfig::load(file.path()).unwrap();
        assert!(!config.crawl);
        assert_eq!(config.seed_paths(), vec!["/a", "/b"]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero = PrerenderConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let trailing_base = PrerenderConfig {
            base: "/docs/".to_string(),
            ..Default::default()
        };
        assert!(trailing_base.validate().is_err());

        let relative_entry = PrerenderConfig {
            entries: vec!["about".to_string()],
            ..Default::default()
        };
        assert!(relative_entry.validate().is_err());

        let origin_with_path = PrerenderConfig {
            origin: "http://example.com/app".to_string(),
            ..Default::default()
        };
        assert!(origin_with_path.validate().is_err());
    }
}
