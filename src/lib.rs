// src/lib.rs
// =============================================================================
// prerender-kit: turns a dynamically rendered site into static files.
//
// Starting from a set of seed paths, every page is rendered once through a
// `Renderer`, written to the output directory, and crawled for more
// same-site links until nothing new turns up.
//
// Module map:
// - paths: encoding, trailing-slash policy, output file names
// - crawl: link extraction and the bounded-concurrency work queue
// - render: the Renderer seam, dependency tracking, an HTTP renderer
// - prerender: the engine, the manifest, output writing
// - files: the static/build files that are never rendered
// - config, error, escape: configuration, failure policy, HTML escaping
//
// Typical use:
//
//     let renderer = Arc::new(HttpRenderer::new("http://localhost:3000")?);
//     let manifest = prerender(PrerenderConfig::default(), renderer).await?;
// =============================================================================

pub mod config;
pub mod crawl;
pub mod error;
pub mod escape;
pub mod files;
pub mod paths;
pub mod prerender;
pub mod render;

pub use config::{OnError, PrerenderConfig};
pub use crawl::{crawl, references, Links, TaskHandle, WorkQueue};
pub use error::{ErrorPolicy, FailureHandler, PrerenderFailure, ReferenceType};
pub use files::KnownFiles;
pub use paths::{
    decode_uri, encode_uri, normalize_path, strip_base, PathResolver, TrailingSlash,
};
pub use prerender::{
    prerender, AssetEntry, Manifest, ManifestEntry, PageEntry, Prerenderer, RedirectEntry,
    FALLBACK_PATH,
};
pub use render::{
    Body, CapturedResponse, DependencyRecord, DependencyTracker, HttpRenderer, RenderRequest,
    RenderResponse, Renderer, ResponseHead,
};
