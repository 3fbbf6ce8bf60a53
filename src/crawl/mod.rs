// src/crawl/mod.rs
// =============================================================================
// This module holds the crawling machinery the prerender engine drives.
//
// Submodules:
// - links: pulls href/src/srcset references out of rendered HTML
// - queue: the bounded-concurrency work queue every render runs on
//
// Neither knows anything about rendering or the manifest; the engine in
// src/prerender/ wires them together.
// =============================================================================

mod links;
mod queue;

pub use links::{crawl, references, Links};
pub use queue::{TaskHandle, WorkQueue};

pub(crate) use queue::lock;
