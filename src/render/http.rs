// src/render/http.rs
// =============================================================================
// This module renders pages by asking a running server for them.
//
// The app's own server (started by the build pipeline) already knows how to
// render every route. `HttpRenderer` forwards each prerender request to it and
// hands the raw response back to the engine:
// - redirects are NOT followed; the engine turns them into redirect pages
// - a Location pointing back at the upstream server is rewritten to a
//   root-relative path, so it is crawled like any other link
// - request failures are described in plain words (timeout, DNS, TLS...)
//
// In-render data fetches happen inside the upstream server, so this renderer
// records no dependencies of its own.
//
// Rust concepts:
// - async_trait: lets us implement the async Renderer trait
// - Client reuse: one reqwest::Client shares its connection pool
// =============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, LOCATION};
use reqwest::Client;
use std::time::Duration;
use url::{Position, Url};

use super::{Body, DependencyTracker, RenderRequest, RenderResponse, Renderer, ResponseHead};

/// Renders by forwarding requests to an upstream server
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    client: Client,
    upstream: Url,
}

impl HttpRenderer {
    /// Creates a renderer for the server at `upstream`
    /// (e.g. "http://localhost:3000")
    pub fn new(upstream: &str) -> Result<Self> {
        let upstream =
            Url::parse(upstream).map_err(|e| anyhow!("Invalid upstream URL '{}': {}", upstream, e))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self { client, upstream })
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// The upstream URL a prerender request maps to
    fn target(&self, request: &RenderRequest) -> Result<Url> {
        let path = &request.url[Position::BeforePath..Position::AfterQuery];
        self.upstream
            .join(path)
            .map_err(|e| anyhow!("Invalid request path '{}': {}", path, e))
    }

    // Rewrites `http://upstream/x` to `/x`; other locations pass through
    fn rewrite_location(&self, location: &str) -> Option<String> {
        let absolute = Url::parse(location).ok()?;
        if absolute.origin() == self.upstream.origin() {
            Some(absolute[Position::BeforePath..].to_string())
        } else {
            None
        }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(
        &self,
        request: RenderRequest,
        _dependencies: &DependencyTracker,
    ) -> Result<RenderResponse> {
        let target = self.target(&request)?;

        let mut builder = self.client.get(target.clone()).header("x-prerender", "1");
        if let Some(fallback) = &request.fallback {
            builder = builder.header("x-prerender-fallback", fallback);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| anyhow!("{} ({})", describe_error(&e), target))?;

        let status = response.status();
        let mut headers = response.headers().clone();

        if let Some(rewritten) = headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| self.rewrite_location(location))
        {
            if let Ok(value) = HeaderValue::from_str(&rewritten) {
                headers.insert(LOCATION, value);
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| anyhow!("{} reading body of {}", describe_error(&e), target))?;

        Ok(RenderResponse {
            head: ResponseHead { status, headers },
            body: Body::Buffered(body.to_vec()),
        })
    }
}

// Describes a reqwest error in plain words
fn describe_error(error: &reqwest::Error) -> String {
    // Convert error to string once to avoid lifetime issues
    let error_string = error.to_string();

    if error.is_timeout() {
        "Request timed out".to_string()
    } else if error.is_connect() {
        // Connection errors often mean DNS issues or the server isn't up
        if error_string.contains("dns") {
            "Could not resolve upstream hostname".to_string()
        } else {
            "Connection to upstream failed".to_string()
        }
    } else if error_string.contains("certificate") || error_string.contains("ssl") {
        "SSL certificate error".to_string()
    } else {
        error_string
    }
}
