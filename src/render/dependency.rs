// src/render/dependency.rs
// =============================================================================
// This module records what page logic fetches while a page renders.
//
// One render can produce several files: the page itself plus every data
// endpoint its logic called. Instead of rendering those endpoints again later,
// the tracker keeps each fetched response (and, once read, its body) so the
// engine can write it out next to the page.
//
// How a fetch is answered:
// 1. Protocol-relative URLs (`//host/x`) are refused: the scheme is ambiguous
//    on the server.
// 2. A static file from the assets directory is read from disk. It is already
//    part of the build, so it is NOT recorded.
// 3. Any other same-origin URL is rendered through the renderer and recorded
//    under its resolved path.
// 4. An external URL is fetched over HTTP. It is not part of the site, so it
//    is NOT recorded either.
//
// The response handed back to page logic is a `CapturedResponse`. Reading a
// recorded response's body through text()/bytes()/json() copies the bytes
// into its record. text()/json() of ANY fetch add the response to the page's
// hydration payload, so the client never has to fetch it again.
// =============================================================================

use anyhow::{anyhow, bail, Context, Result};
use percent_encoding::percent_decode_str;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use url::Url;

use super::{Body, RenderRequest, RenderResponse, Renderer, ResponseHead};
use crate::crawl::lock;
use crate::escape::{escape_html_attr, escape_json_in_html};
use crate::files::{content_type_for, KnownFiles};
use crate::paths::strip_base;

/// A response fetched during a render, keyed by its resolved path
#[derive(Debug)]
pub struct DependencyRecord {
    pub path: String,
    pub head: ResponseHead,
    body: RecordedBody,
}

#[derive(Debug)]
enum RecordedBody {
    Captured(Vec<u8>),
    Unread(Body),
    Absent,
}

impl DependencyRecord {
    /// The body, if page logic read it during the render
    pub fn captured_body(&self) -> Option<&[u8]> {
        match &self.body {
            RecordedBody::Captured(bytes) => Some(bytes.as_slice()),
            _ => None,
        }
    }

    /// Splits the record into path, head and body, reading the body now if
    /// page logic never did
    pub async fn into_parts(self) -> Result<(String, ResponseHead, Vec<u8>)> {
        let body = match self.body {
            RecordedBody::Captured(bytes) => bytes,
            RecordedBody::Unread(body) => body.bytes().await?,
            RecordedBody::Absent => Vec::new(),
        };
        Ok((self.path, self.head, body))
    }
}

// A fetched response serialized for the client to reuse instead of
// refetching it during hydration
#[derive(Debug, Clone)]
struct FetchedPayload {
    url: String,
    json: String,
}

#[derive(Serialize)]
struct SerializedFetch<'a> {
    status: u16,
    #[serde(rename = "statusText")]
    status_text: &'a str,
    headers: BTreeMap<String, String>,
    body: &'a str,
}

impl FetchedPayload {
    fn new(url: &str, head: &ResponseHead, body: &str) -> Result<Self> {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &head.headers {
            let name = name.as_str();
            if name == "set-cookie" || name == "etag" {
                continue;
            }
            let Ok(value) = value.to_str() else { continue };
            headers
                .entry(name.to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        let serialized = SerializedFetch {
            status: head.status.as_u16(),
            status_text: head.status.canonical_reason().unwrap_or(""),
            headers,
            body,
        };

        Ok(Self {
            url: url.to_string(),
            json: escape_json_in_html(&serde_json::to_string(&serialized)?),
        })
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    records: Vec<DependencyRecord>,
    fetched: Vec<FetchedPayload>,
}

impl TrackerState {
    fn record_mut(&mut self, path: &str) -> Option<&mut DependencyRecord> {
        self.records.iter_mut().find(|record| record.path == path)
    }

    // Same path fetched twice in one render: the later response wins, but it
    // keeps its original position
    fn upsert(&mut self, record: DependencyRecord) {
        match self.record_mut(&record.path) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }
}

/// Render-scoped record of every dependency one page fetched
pub struct DependencyTracker {
    page: Url,
    base: String,
    files: Arc<KnownFiles>,
    client: Option<Client>,
    state: Arc<Mutex<TrackerState>>,
}

impl DependencyTracker {
    pub fn new(page: Url, base: impl Into<String>, files: Arc<KnownFiles>) -> Self {
        Self {
            page,
            base: base.into(),
            files,
            client: None,
            state: Arc::new(Mutex::new(TrackerState::default())),
        }
    }

    /// Uses `client` for external fetches instead of building one per fetch
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// A tracker with no base path and no known files
    pub fn detached(page: Url) -> Self {
        Self::new(page, "", Arc::new(KnownFiles::empty()))
    }

    /// The URL of the page being rendered
    pub fn page(&self) -> &Url {
        &self.page
    }

    /// Fetches `href` (resolved against the page) on behalf of page logic
    pub async fn fetch(&self, renderer: &dyn Renderer, href: &str) -> Result<CapturedResponse> {
        if href.starts_with("//") {
            bail!("Cannot request protocol-relative URL ({}) in server-side fetch", href);
        }

        let requested = self
            .page
            .join(href)
            .map_err(|e| anyhow!("Invalid fetch URL '{}': {}", href, e))?;

        if requested.origin() != self.page.origin() {
            return self.fetch_external(requested, href).await;
        }

        let resolved = requested.path().to_string();

        if let Some(file) = self.static_file(&resolved) {
            tracing::debug!("serving fetch of {} from static file {}", href, file);
            let body = self.files.read(&file).await?;
            let mut response = RenderResponse::new(StatusCode::OK).with_body(body);
            if let Some(content_type) = content_type_for(&file) {
                response = response.with_header("content-type", content_type);
            }
            return Ok(CapturedResponse::new(response, self.capture(href, None)));
        }

        let response = renderer
            .render(RenderRequest::new(requested), self)
            .await
            .with_context(|| format!("Failed to render fetched resource {}", resolved))?;

        lock(&self.state).upsert(DependencyRecord {
            path: resolved.clone(),
            head: response.head.clone(),
            body: RecordedBody::Absent,
        });

        Ok(CapturedResponse::new(
            response,
            self.capture(href, Some(resolved)),
        ))
    }

    // Fetches a URL on another origin; the response is never persisted
    async fn fetch_external(&self, url: Url, href: &str) -> Result<CapturedResponse> {
        let client = match &self.client {
            Some(client) => client.clone(),
            None => Client::builder()
                .build()
                .context("Failed to create HTTP client")?,
        };

        tracing::debug!("fetching external {} during render of {}", url, self.page.path());

        let response = client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to fetch external URL {}", url))?;

        let head = ResponseHead {
            status: response.status(),
            headers: response.headers().clone(),
        };
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read response body of {}", url))?;

        let response = RenderResponse {
            head,
            body: Body::Buffered(body.to_vec()),
        };
        Ok(CapturedResponse::new(response, self.capture(href, None)))
    }

    fn capture(&self, href: &str, record: Option<String>) -> Capture {
        Capture {
            state: Arc::clone(&self.state),
            url: href.to_string(),
            record,
        }
    }

    // The static file answering a fetch of `resolved`, if any. Only paths
    // under the base can name one.
    fn static_file(&self, resolved: &str) -> Option<String> {
        let relative = strip_base(resolved, &self.base)?;
        let decoded = percent_decode_str(relative).decode_utf8_lossy();
        let filename = decoded.strip_prefix('/').unwrap_or(&decoded);
        self.files.lookup(filename)
    }

    /// Records data produced by the render itself (e.g. a page's
    /// `__data.json`) as a dependency, without any fetch
    pub fn record_data(&self, path: &str, body: impl Into<Vec<u8>>) {
        let mut head = ResponseHead::new(StatusCode::OK);
        head.headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        lock(&self.state).upsert(DependencyRecord {
            path: path.to_string(),
            head,
            body: RecordedBody::Captured(body.into()),
        });
    }

    /// Number of dependencies recorded so far
    pub fn len(&self) -> usize {
        lock(&self.state).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The hydration payload as `<script>` elements, one per fetch whose
    /// body was read as text, for the renderer to inline
    pub fn hydration_scripts(&self) -> String {
        lock(&self.state)
            .fetched
            .iter()
            .map(|payload| {
                format!(
                    r#"<script type="application/json" data-type="prerender-data" data-url={}>{}</script>"#,
                    escape_html_attr(&payload.url),
                    payload.json
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Takes every recorded dependency, in the order first fetched
    pub fn into_dependencies(self) -> Vec<DependencyRecord> {
        let records = std::mem::take(&mut lock(&self.state).records);
        records
    }
}

impl fmt::Debug for DependencyTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyTracker")
            .field("page", &self.page.as_str())
            .field("dependencies", &self.len())
            .finish()
    }
}

// Where a fetched response reports what page logic reads
struct Capture {
    state: Arc<Mutex<TrackerState>>,
    url: String,
    // path of the dependency record; None for fetches that aren't persisted
    record: Option<String>,
}

impl Capture {
    fn store(&self, bytes: &[u8]) {
        let Some(path) = &self.record else { return };
        if let Some(record) = lock(&self.state).record_mut(path) {
            record.body = RecordedBody::Captured(bytes.to_vec());
        }
    }

    fn store_unread(&self, body: Body) {
        let Some(path) = &self.record else { return };
        if let Some(record) = lock(&self.state).record_mut(path) {
            if matches!(record.body, RecordedBody::Absent) {
                record.body = RecordedBody::Unread(body);
            }
        }
    }

    fn add_payload(&self, head: &ResponseHead, text: &str) -> Result<()> {
        let payload = FetchedPayload::new(&self.url, head, text)?;
        lock(&self.state).fetched.push(payload);
        Ok(())
    }
}

/// The response page logic gets back from `DependencyTracker::fetch`
pub struct CapturedResponse {
    head: ResponseHead,
    body: Option<Body>,
    capture: Capture,
}

impl CapturedResponse {
    fn new(response: RenderResponse, capture: Capture) -> Self {
        let (head, body) = response.into_parts();
        Self {
            head,
            body: Some(body),
            capture,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// True for a 2xx status
    pub fn ok(&self) -> bool {
        self.head.status.is_success()
    }

    /// True if this fetch was recorded as a dependency of the page
    pub fn is_tracked(&self) -> bool {
        self.capture.record.is_some()
    }

    pub async fn bytes(mut self) -> Result<Vec<u8>> {
        let body = self.body.take().unwrap_or_else(Body::empty);
        let bytes = body.bytes().await?;

        self.capture.store(&bytes);
        Ok(bytes)
    }

    pub async fn text(mut self) -> Result<String> {
        let body = self.body.take().unwrap_or_else(Body::empty);
        let text =
            String::from_utf8(body.bytes().await?).context("response body is not valid UTF-8")?;

        self.capture.store(text.as_bytes());
        self.capture.add_payload(&self.head, &text)?;
        Ok(text)
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let text = self.text().await?;
        serde_json::from_str(&text).context("response body is not valid JSON")
    }
}

impl Drop for CapturedResponse {
    // Page logic that never reads the body still gets it persisted
    fn drop(&mut self) {
        if let Some(body) = self.body.take() {
            self.capture.store_unread(body);
        }
    }
}

impl fmt::Debug for CapturedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedResponse")
            .field("status", &self.head.status)
            .field("tracked", &self.is_tracked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Api {
        renders: AtomicUsize,
    }

    #[async_trait]
    impl Renderer for Api {
        async fn render(
            &self,
            request: RenderRequest,
            _dependencies: &DependencyTracker,
        ) -> Result<RenderResponse> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            Ok(match request.path() {
                "/api/data.json" => RenderResponse::ok("application/json", r#"{"answer":42}"#)
                    .with_header("etag", "\"abc\"")
                    .with_header("set-cookie", "session=1"),
                "/api/evil" => RenderResponse::ok("text/plain", "</script><script>alert(1)"),
                _ => RenderResponse::new(StatusCode::NOT_FOUND),
            })
        }
    }

    fn page(path: &str) -> Url {
        Url::parse("http://prerender.local").unwrap().join(path).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_records_dependency_and_captures_text() {
        let api = Api::default();
        let tracker = DependencyTracker::detached(page("/blog/post"));

        let response = tracker.fetch(&api, "../api/data.json").await.unwrap();
        assert!(response.is_tracked());
        let data: serde_json::Value = response.json().await.unwrap();
        assert_eq!(data["answer"], 42);

        let scripts = tracker.hydration_scripts();
        assert!(scripts.contains(r#"data-url="../api/data.json""#));
        assert!(scripts.contains(r#""status":200"#));
        assert!(!scripts.contains("etag"));
        assert!(!scripts.contains("set-cookie"));

        let records = tracker.into_dependencies();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "/api/data.json");
        assert_eq!(records[0].captured_body(), Some(&br#"{"answer":42}"#[..]));
        assert_eq!(api.renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bytes_are_captured_without_payload() {
        let api = Api::default();
        let tracker = DependencyTracker::detached(page("/"));

        let bytes = tracker.fetch(&api, "/api/data.json").await.unwrap().bytes().await.unwrap();
        assert_eq!(bytes, br#"{"answer":42}"#);
        assert!(tracker.hydration_scripts().is_empty());
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn test_unread_body_is_kept_for_persisting() {
        let api = Api::default();
        let tracker = DependencyTracker::detached(page("/"));

        let response = tracker.fetch(&api, "/api/data.json").await.unwrap();
        assert!(response.ok());
        drop(response);

        let mut records = tracker.into_dependencies();
        let (path, head, body) = records.remove(0).into_parts().await.unwrap();
        assert_eq!(path, "/api/data.json");
        assert_eq!(head.content_type(), Some("application/json"));
        assert_eq!(body, br#"{"answer":42}"#);
    }

    #[tokio::test]
    async fn test_static_files_are_served_from_disk_and_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"static":true}"#).unwrap();
        let files = Arc::new(KnownFiles::scan(dir.path(), "_app", &[]).unwrap());

        let api = Api::default();
        let tracker = DependencyTracker::new(page("/docs/intro"), "/docs", files);

        let response = tracker.fetch(&api, "/docs/config.json").await.unwrap();
        assert!(!response.is_tracked());
        assert_eq!(response.head().content_type(), Some("application/json"));
        assert_eq!(response.text().await.unwrap(), r#"{"static":true}"#);

        // not a dependency, but still inlined for the client
        assert!(tracker.is_empty());
        let scripts = tracker.hydration_scripts();
        assert!(scripts.contains(r#"data-url="/docs/config.json""#));
        assert!(scripts.contains(r#"\"static\":true"#));
        assert_eq!(api.renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_static_lookup_respects_base_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let files = Arc::new(KnownFiles::new(
            dir.path(),
            vec!["earch/x".to_string()],
            "_app",
            Vec::new(),
        ));

        let api = Api::default();
        let tracker = DependencyTracker::new(page("/docs/intro"), "/docs", files);

        let response = tracker.fetch(&api, "/docsearch/x").await.unwrap();
        assert!(response.is_tracked());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(api.renders.load(Ordering::SeqCst), 1);
    }

    // Answers a single request on a local port with a canned JSON body
    async fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await;

            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        format!("http://{}/rates", addr)
    }

    #[tokio::test]
    async fn test_external_fetch_is_inlined_but_not_recorded() {
        let url = serve_once(r#"{"rate":1.5}"#).await;
        let client = Client::builder().no_proxy().build().unwrap();

        let api = Api::default();
        let tracker = DependencyTracker::detached(page("/")).with_client(client);

        let response = tracker.fetch(&api, &url).await.unwrap();
        assert!(!response.is_tracked());
        let data: serde_json::Value = response.json().await.unwrap();
        assert_eq!(data["rate"], 1.5);

        assert!(tracker.is_empty());
        assert!(tracker
            .hydration_scripts()
            .contains(&format!(r#"data-url="{}""#, url)));
        assert_eq!(api.renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_protocol_relative_fetches_are_refused() {
        let api = Api::default();
        let tracker = DependencyTracker::detached(page("/"));

        let err = tracker.fetch(&api, "//cdn.example.com/data").await.unwrap_err();
        assert!(err.to_string().contains("protocol-relative"));
        assert!(tracker.is_empty());
        assert!(tracker.hydration_scripts().is_empty());
    }

    #[tokio::test]
    async fn test_payload_cannot_break_out_of_script() {
        let api = Api::default();
        let tracker = DependencyTracker::detached(page("/"));

        tracker.fetch(&api, "/api/evil").await.unwrap().text().await.unwrap();
        let scripts = tracker.hydration_scripts();

        assert_eq!(scripts.matches("</script>").count(), 1);
        assert!(scripts.ends_with("</script>"));
    }

    #[test]
    fn test_record_data() {
        let tracker = DependencyTracker::detached(page("/blog"));
        tracker.record_data("/blog/__data.json", r#"{"posts":[]}"#);

        let records = tracker.into_dependencies();
        assert_eq!(records[0].path, "/blog/__data.json");
        assert_eq!(records[0].head.content_type(), Some("application/json"));
        assert_eq!(records[0].captured_body(), Some(&br#"{"posts":[]}"#[..]));
    }
}
