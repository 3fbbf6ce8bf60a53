// src/error.rs
// =============================================================================
// This module decides what happens when a resource can't be prerendered.
//
// "Expected" failures (a 404 link, a 500 from the renderer, a path outside the
// base path) are reported as a `PrerenderFailure` to the run's `ErrorPolicy`:
// - Continue: log the failure and keep crawling
// - Fail: turn the failure into an error, which aborts the run
// - Custom: hand the failure to caller-supplied code, which picks either
//
// Everything else (I/O errors, a renderer returning Err) is an ordinary
// anyhow::Error and always propagates.
// =============================================================================

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How the failing resource was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    /// Seeded, or linked to from a rendered page or redirect
    Linked,
    /// Requested by page logic during another page's render
    Fetched,
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceType::Linked => write!(f, "linked"),
            ReferenceType::Fetched => write!(f, "fetched"),
        }
    }
}

/// One resource that could not be prerendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerenderFailure {
    pub status: u16,
    pub path: String,
    pub referrer: Option<String>,
    pub reference_type: ReferenceType,
}

impl fmt::Display for PrerenderFailure {
    // "404 /missing (linked from /)"
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.path)?;
        if let Some(referrer) = &self.referrer {
            write!(f, " ({} from {})", self.reference_type, referrer)?;
        }
        Ok(())
    }
}

impl std::error::Error for PrerenderFailure {}

/// Caller-supplied failure handler. Returning `Err` aborts the run.
pub type FailureHandler = Arc<dyn Fn(&PrerenderFailure) -> Result<()> + Send + Sync>;

/// What to do with a `PrerenderFailure`
#[derive(Clone, Default)]
pub enum ErrorPolicy {
    Continue,
    #[default]
    Fail,
    Custom(FailureHandler),
}

impl ErrorPolicy {
    pub fn custom<F>(handler: F) -> Self
    where
        F: Fn(&PrerenderFailure) -> Result<()> + Send + Sync + 'static,
    {
        ErrorPolicy::Custom(Arc::new(handler))
    }

    /// Reports a failure. `Err` means the run must stop.
    pub fn report(&self, failure: &PrerenderFailure) -> Result<()> {
        match self {
            ErrorPolicy::Continue => {
                tracing::error!("{}", failure);
                Ok(())
            }
            ErrorPolicy::Fail => Err(anyhow::Error::new(failure.clone())),
            ErrorPolicy::Custom(handler) => handler(failure),
        }
    }
}

impl fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Continue => write!(f, "Continue"),
            ErrorPolicy::Fail => write!(f, "Fail"),
            ErrorPolicy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
