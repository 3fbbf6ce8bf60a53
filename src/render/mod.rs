// src/render/mod.rs
// =============================================================================
// This module defines the seam between the engine and the app being rendered.
//
// The engine never knows how a page is produced. It hands a `Renderer` a
// request for one path plus a render-scoped `DependencyTracker`, and gets back
// a status, headers and a body. Page logic that needs data during the render
// fetches it through the tracker, which is how the engine learns about the
// extra files one render produces.
//
// Submodules:
// - dependency: the tracker and the body-capturing response wrapper
// - http: a renderer that forwards requests to a running server (reqwest)
// =============================================================================

mod dependency;
mod http;

pub use dependency::{CapturedResponse, DependencyRecord, DependencyTracker};
pub use http::HttpRenderer;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;
use std::fmt;
use url::{Position, Url};

/// Renders one request into a response
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Renders `request`. Data fetched by page logic must go through
    /// `dependencies` so it is recorded and persisted next to the page.
    async fn render(
        &self,
        request: RenderRequest,
        dependencies: &DependencyTracker,
    ) -> Result<RenderResponse>;
}

/// A request on the synthetic prerender origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub url: Url,
    /// Set when rendering the client-side routing fallback page
    pub fallback: Option<String>,
}

impl RenderRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            fallback: None,
        }
    }

    pub fn fallback(url: Url, file: impl Into<String>) -> Self {
        Self {
            url,
            fallback: Some(file.into()),
        }
    }

    /// The encoded path
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// The encoded path with query and fragment
    pub fn path_and_query(&self) -> &str {
        &self.url[Position::BeforePath..]
    }
}

/// A response body, readable exactly once
pub enum Body {
    Buffered(Vec<u8>),
    Stream(BoxStream<'static, Result<Vec<u8>>>),
}

impl Body {
    pub fn empty() -> Self {
        Body::Buffered(Vec::new())
    }

    /// Reads the whole body
    pub async fn bytes(self) -> Result<Vec<u8>> {
        match self {
            Body::Buffered(bytes) => Ok(bytes),
            Body::Stream(mut stream) => {
                let mut bytes = Vec::new();
                while let Some(chunk) = stream.next().await {
                    bytes.extend_from_slice(&chunk?);
                }
                Ok(bytes)
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Buffered(bytes) => write!(f, "Body::Buffered({} bytes)", bytes.len()),
            Body::Stream(_) => write!(f, "Body::Stream(..)"),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Buffered(bytes)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Buffered(text.into_bytes())
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Buffered(text.as_bytes().to_vec())
    }
}

/// Status and headers of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// True when the media type is text/html, ignoring parameters such as
    /// `; charset=utf-8`
    pub fn is_html(&self) -> bool {
        self.content_type()
            .and_then(|value| value.split(';').next())
            .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("text/html"))
    }
}

/// What a `Renderer` returns
#[derive(Debug)]
pub struct RenderResponse {
    pub head: ResponseHead,
    pub body: Body,
}

impl RenderResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            head: ResponseHead::new(status),
            body: Body::empty(),
        }
    }

    /// A 200 response with a content type
    pub fn ok(content_type: &str, body: impl Into<Body>) -> Self {
        Self::new(StatusCode::OK)
            .with_header("content-type", content_type)
            .with_body(body)
    }

    /// A redirect to `location`
    pub fn redirect(status: StatusCode, location: &str) -> Self {
        Self::new(status).with_header("location", location)
    }

    /// Adds a header; invalid names or values are skipped
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.head.headers.insert(name, value);
            }
            _ => tracing::warn!("dropping invalid header {}: {}", name, value),
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    pub fn into_parts(self) -> (ResponseHead, Body) {
        (self.head, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_html_ignores_parameters() {
        let page = RenderResponse::ok("text/html; charset=utf-8", "<h1>hi</h1>");
        assert!(page.head.is_html());

        let data = RenderResponse::ok("application/json", "{}");
        assert!(!data.head.is_html());

        assert!(!RenderResponse::new(StatusCode::OK).head.is_html());
    }

    #[test]
    fn test_redirect_has_location() {
        let response = RenderResponse::redirect(StatusCode::MOVED_PERMANENTLY, "/redirected");
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.head.location(), Some("/redirected"));
    }

    #[test]
    fn test_invalid_header_is_dropped() {
        let response = RenderResponse::new(StatusCode::OK).with_header("bad header", "x");
        assert!(response.head.headers.is_empty());
    }

    #[tokio::test]
    async fn test_stream_body_is_concatenated() {
        let chunks: Vec<Result<Vec<u8>>> = vec![Ok(b"hello ".to_vec()), Ok(b"world".to_vec())];
        let body = Body::Stream(futures::stream::iter(chunks).boxed());
        assert_eq!(body.bytes().await.unwrap(), b"hello world");
    }

    #[test]
    fn test_request_path() {
        let url = Url::parse("http://prerender.local/blog/caf%C3%A9?x=1").unwrap();
        let request = RenderRequest::new(url);
        assert_eq!(request.path(), "/blog/caf%C3%A9");
        assert_eq!(request.path_and_query(), "/blog/caf%C3%A9?x=1");
    }
}
