// src/prerender/mod.rs
// =============================================================================
// This module is the prerender engine: it turns seed paths into a static site.
//
// How it works:
// 1. Every seed path is enqueued on the work queue
// 2. A queued path is rendered once through the Renderer
// 3. The response is saved: a page, an asset, or a redirect page
// 4. Everything page logic fetched during that render is saved next to it
// 5. HTML pages are crawled; new same-site links go back to step 2
// 6. When the queue drains, the fallback page (if any) is rendered
//
// Exactly-once guarantees:
// - `seen` (decoded paths) makes enqueueing idempotent: a page linked from a
//   hundred places is rendered once
// - `written` (output files) makes saving idempotent: the first writer of a
//   file wins and later saves of the same file do nothing
// - the manifest itself refuses a second entry for the same path
// Each check-then-insert happens under that set's lock.
//
// Submodules:
// - manifest: the record of what was produced
// - output: redirect documents and file writing
// =============================================================================

mod manifest;
mod output;

pub use manifest::{AssetEntry, Manifest, ManifestEntry, PageEntry, RedirectEntry};
pub use output::redirect_document;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use scraper::Html;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::PrerenderConfig;
use crate::crawl::{lock, references, WorkQueue};
use crate::error::{ErrorPolicy, PrerenderFailure, ReferenceType};
use crate::files::KnownFiles;
use crate::paths::{decode_uri, encode_uri, normalize_path, PathResolver, TrailingSlash};
use crate::render::{DependencyTracker, RenderRequest, Renderer, ResponseHead};
use output::write_file;

/// Request path used to render the fallback page
pub const FALLBACK_PATH: &str = "/[fallback]";

/// Prerenders a site with the error policy named in the config
pub async fn prerender(config: PrerenderConfig, renderer: Arc<dyn Renderer>) -> Result<Manifest> {
    Prerenderer::new(config, renderer).run().await
}

/// Configures and runs one prerender
pub struct Prerenderer {
    config: PrerenderConfig,
    renderer: Arc<dyn Renderer>,
    policy: ErrorPolicy,
    files: Option<KnownFiles>,
}

impl Prerenderer {
    pub fn new(config: PrerenderConfig, renderer: Arc<dyn Renderer>) -> Self {
        let policy = config.on_error.into();
        Self {
            config,
            renderer,
            policy,
            files: None,
        }
    }

    /// Overrides the config's `on_error`, e.g. with `ErrorPolicy::custom`
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Uses this set of known build files instead of scanning `assets_dir`
    pub fn with_known_files(mut self, files: KnownFiles) -> Self {
        self.files = Some(files);
        self
    }

    /// Runs the prerender and returns the manifest
    pub async fn run(self) -> Result<Manifest> {
        let config = self.config;
        config.validate()?;

        if !config.enabled && config.fallback.is_none() {
            return Ok(Manifest::default());
        }

        let files = match self.files {
            Some(files) => files,
            None => {
                let assets_dir = config.assets_dir.clone();
                let app_dir = config.app_dir.clone();
                let build_files = config.build_files.clone();
                tokio::task::spawn_blocking(move || {
                    KnownFiles::scan(&assets_dir, &app_dir, &build_files)
                })
                .await
                .context("Static file scan panicked")??
            }
        };

        // Shared by every render for fetches to other origins
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let resolver = PathResolver::new(
            config.base.clone(),
            config.origin_url()?,
            config.trailing_slash,
        );

        let engine = Arc::new(Engine {
            resolver,
            renderer: self.renderer,
            files: Arc::new(files),
            client,
            policy: self.policy,
            out_dir: config.out_dir.clone(),
            crawl: config.crawl,
            queue: WorkQueue::new(config.concurrency),
            seen: Mutex::new(HashSet::new()),
            written: Mutex::new(HashSet::new()),
            manifest: Mutex::new(Manifest::default()),
            aborted: AtomicBool::new(false),
        });

        if config.enabled {
            info!(
                "prerendering {} seed path(s) with concurrency {}",
                config.seed_paths().len(),
                config.concurrency
            );

            for seed in config.seed_paths() {
                let decoded = engine.resolver.normalize(&seed);
                engine.enqueue(None, decoded, None);
            }

            engine.queue.done().await?;
        }

        if let Some(fallback) = &config.fallback {
            engine.render_fallback(fallback).await?;
        }

        let manifest = std::mem::take(&mut *lock(&engine.manifest));
        info!(
            "prerendered {} page(s), {} asset(s), {} redirect(s)",
            manifest.pages.len(),
            manifest.assets.len(),
            manifest.redirects.len()
        );
        Ok(manifest)
    }
}

// Shared state of one run, owned jointly by every queued task
struct Engine {
    resolver: PathResolver,
    renderer: Arc<dyn Renderer>,
    files: Arc<KnownFiles>,
    client: Client,
    policy: ErrorPolicy,
    out_dir: PathBuf,
    crawl: bool,
    queue: WorkQueue,
    seen: Mutex<HashSet<String>>,
    written: Mutex<HashSet<String>>,
    manifest: Mutex<Manifest>,
    // set once any task fails; queued renders are skipped from then on
    aborted: AtomicBool,
}

impl Engine {
    /// Queues `decoded` for rendering unless it was seen before or is
    /// already a build file. Returns true if a render was queued.
    fn enqueue(
        self: &Arc<Self>,
        referrer: Option<String>,
        decoded: String,
        encoded: Option<String>,
    ) -> bool {
        let first_sighting = lock(&self.seen).insert(decoded.clone());
        if !first_sighting {
            return false;
        }

        if self.resolver.is_under_base(&decoded)
            && self.files.contains(self.resolver.relative_file(&decoded))
        {
            debug!("{} is part of the build output, not rendering it", decoded);
            return false;
        }

        let encoded = encoded.unwrap_or_else(|| encode_uri(&decoded));
        let engine = Arc::clone(self);

        self.queue.add(async move {
            let result = engine.visit(&decoded, &encoded, referrer.as_deref()).await;
            if result.is_err() {
                engine.aborted.store(true, Ordering::SeqCst);
            }
            result
        });
        true
    }

    // A tracker for one render of `url`
    fn tracker(&self, url: Url) -> DependencyTracker {
        DependencyTracker::new(url, self.resolver.base(), Arc::clone(&self.files))
            .with_client(self.client.clone())
    }

    /// Renders one path and persists everything the render produced
    async fn visit(
        self: &Arc<Self>,
        decoded: &str,
        encoded: &str,
        referrer: Option<&str>,
    ) -> Result<()> {
        if self.aborted.load(Ordering::SeqCst) {
            debug!("run aborted, skipping {}", decoded);
            return Ok(());
        }

        if !self.resolver.is_under_base(decoded) {
            return self.policy.report(&PrerenderFailure {
                status: 404,
                path: decoded.to_string(),
                referrer: referrer.map(str::to_string),
                reference_type: ReferenceType::Linked,
            });
        }

        let url = self.resolver.request_url(encoded)?;
        let tracker = self.tracker(url.clone());

        let response = self
            .renderer
            .render(RenderRequest::new(url), &tracker)
            .await
            .with_context(|| format!("Failed to render {}", decoded))?;

        let (head, body) = response.into_parts();
        let body = body
            .bytes()
            .await
            .with_context(|| format!("Failed to read response body of {}", decoded))?;

        self.save(&head, &body, decoded, encoded, referrer, ReferenceType::Linked)
            .await?;

        for dependency in tracker.into_dependencies() {
            let (path, dependency_head, dependency_body) = dependency.into_parts().await?;

            // Going through the URL parser means we don't care whether the
            // recorded path was encoded or not
            let dependency_encoded = self.resolver.request_url(&path)?.path().to_string();
            let dependency_decoded = decode_uri(&dependency_encoded);

            if !self.resolver.is_under_base(&dependency_decoded) {
                warn!(
                    "{} fetched {}, which is outside the base path; not saving it",
                    decoded, dependency_decoded
                );
                continue;
            }

            // Rendered as part of this page; never render it again on its own
            lock(&self.seen).insert(dependency_decoded.clone());

            self.save(
                &dependency_head,
                &dependency_body,
                &dependency_decoded,
                &dependency_encoded,
                Some(decoded),
                ReferenceType::Fetched,
            )
            .await?;
        }

        if self.crawl && head.is_html() {
            self.follow_links(&body, decoded, encoded);
        }

        Ok(())
    }

    // Enqueues every same-site link of a rendered page
    fn follow_links(self: &Arc<Self>, body: &[u8], decoded: &str, encoded: &str) {
        let html = String::from_utf8_lossy(body);
        let document = Html::parse_document(&html);

        for href in references(&document) {
            if href.starts_with("data:") || href.starts_with('#') {
                continue;
            }

            // links outside the base are followed too, and reported as 404
            let resolved = self.resolver.resolve(encoded, &href);
            if !self.resolver.is_same_origin(&resolved) {
                continue;
            }

            let Ok(parsed) = self.resolver.request_url(&resolved) else {
                continue;
            };

            if parsed.query().is_some() {
                debug!(
                    "skipping {} linked from {}: query strings have no effect on prerendered pages",
                    resolved, decoded
                );
                continue;
            }

            let pathname = self.resolver.normalize(parsed.path());
            self.enqueue(Some(decoded.to_string()), decode_uri(&pathname), Some(pathname));
        }
    }

    /// Persists one response: a redirect page, a page or asset, or a
    /// failure report
    async fn save(
        self: &Arc<Self>,
        head: &ResponseHead,
        body: &[u8],
        decoded: &str,
        encoded: &str,
        referrer: Option<&str>,
        reference_type: ReferenceType,
    ) -> Result<()> {
        let status = head.status;
        let is_redirect = status.is_redirection();
        let is_html = is_redirect || head.is_html();

        let file = self.resolver.output_filename(decoded, is_html);
        let first_write = lock(&self.written).insert(file.clone());
        if !first_write {
            debug!("{} was already written, ignoring {}", file, decoded);
            return Ok(());
        }

        let dest = self.out_dir.join(&file);
        let listed = normalize_path(decoded, TrailingSlash::Never);

        if is_redirect {
            let Some(location) = head.location() else {
                warn!("location header missing on redirect received from {}", decoded);
                return Ok(());
            };

            warn!("{} {} -> {}", status.as_u16(), decoded, location);

            let resolved = self.resolver.resolve(encoded, location);
            let target = if self.resolver.is_same_origin(&resolved) {
                Some(self.normalize_location(&resolved)?)
            } else {
                None
            };

            let entry = ManifestEntry::Redirect(RedirectEntry {
                status: status.as_u16(),
                location: target
                    .as_ref()
                    .map_or_else(|| resolved.clone(), |(location, _)| location.clone()),
            });
            let recorded = lock(&self.manifest).insert(decoded, entry, listed);
            if !recorded {
                debug!("{} already has a manifest entry", decoded);
                return Ok(());
            }

            write_file(&dest, redirect_document(location).as_bytes()).await?;

            if let Some((_, pathname)) = target {
                self.enqueue(Some(decoded.to_string()), decode_uri(&pathname), Some(pathname));
            }

            return Ok(());
        }

        if status == StatusCode::OK {
            let entry = if is_html {
                ManifestEntry::Page(PageEntry { file })
            } else {
                ManifestEntry::Asset(AssetEntry {
                    content_type: head.content_type().map(str::to_string),
                })
            };

            let recorded = lock(&self.manifest).insert(decoded, entry, listed);
            if !recorded {
                debug!("{} already has a manifest entry", decoded);
                return Ok(());
            }

            info!("{} {}", status.as_u16(), decoded);
            write_file(&dest, body).await?;
        } else {
            self.policy.report(&PrerenderFailure {
                status: status.as_u16(),
                path: decoded.to_string(),
                referrer: referrer.map(str::to_string),
                reference_type,
            })?;
        }

        Ok(())
    }

    // Normalizes the path part of a root-relative location; returns the full
    // normalized location and the bare path to crawl
    fn normalize_location(&self, resolved: &str) -> Result<(String, String)> {
        let target = self.resolver.request_url(resolved)?;
        let pathname = self.resolver.normalize(target.path());

        let mut location = pathname.clone();
        if let Some(query) = target.query() {
            location.push('?');
            location.push_str(query);
        }
        if let Some(fragment) = target.fragment() {
            location.push('#');
            location.push_str(fragment);
        }

        Ok((location, pathname))
    }

    /// Renders the client-side routing fallback page. It sits outside the
    /// crawl: no dedup, no manifest entry, always written.
    async fn render_fallback(&self, fallback: &str) -> Result<()> {
        let url = self.resolver.request_url(FALLBACK_PATH)?;
        let tracker = self.tracker(url.clone());

        let response = self
            .renderer
            .render(RenderRequest::fallback(url, fallback), &tracker)
            .await
            .context("Failed to render the fallback page")?;
        let body = response.body.bytes().await?;

        let dest = self.out_dir.join(fallback);
        write_file(&dest, &body).await?;
        info!("wrote fallback page {}", dest.display());

        Ok(())
    }
}
