// src/paths.rs
// =============================================================================
// This module turns the many ways a page can be linked to into one stable key.
//
// Every URL the engine sees is resolved against a synthetic origin (the
// configured `origin`, e.g. http://prerender.local), so relative links,
// absolute paths and fully qualified same-origin URLs all collapse into the
// same root-relative form.
//
// Two spellings of every path travel together:
// - encoded: what goes on the wire and what relative links resolve against
// - decoded: the identity key for dedup and the manifest
//
// The trailing-slash policy decides both the canonical path (`/about` vs
// `/about/`) and the file it lands in (`about.html` vs `about/index.html`).
// =============================================================================

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use url::{Position, Url};

/// Characters `encodeURI` escapes. Reserved URL punctuation passes through.
const URI_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Bytes that `decode_uri` leaves percent-encoded, so a decoded path still
/// parses the same way the encoded one did.
const RESERVED: &[u8] = b";/?:@&=+$,#";

/// How paths are canonicalised with respect to a trailing slash
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum TrailingSlash {
    /// `/about/` becomes `/about`, written to `about.html`
    #[default]
    Never,
    /// `/about` becomes `/about/`, written to `about/index.html`
    Always,
    /// Paths are kept exactly as linked
    Ignore,
}

/// Percent-encodes a decoded path the way `encodeURI` does
pub fn encode_uri(decoded: &str) -> String {
    utf8_percent_encode(decoded, URI_ESCAPES).to_string()
}

/// Decodes a percent-encoded path, keeping reserved characters escaped.
///
/// Malformed input (a bad escape or invalid UTF-8 after decoding) is
/// returned unchanged.
pub fn decode_uri(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escaped = bytes
                .get(i + 1..i + 3)
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());

            match escaped {
                Some(byte) if RESERVED.contains(&byte) => out.extend_from_slice(&bytes[i..i + 3]),
                Some(byte) => out.push(byte),
                None => return encoded.to_string(),
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).unwrap_or_else(|_| encoded.to_string())
}

/// Applies a trailing-slash policy to a path.
///
/// `/` is left alone. Under `Always` a slash is only added when the last
/// segment has no extension, so `/feed.xml` stays a file.
pub fn normalize_path(path: &str, trailing_slash: TrailingSlash) -> String {
    if path == "/" {
        return path.to_string();
    }

    match trailing_slash {
        TrailingSlash::Ignore => path.to_string(),
        TrailingSlash::Never => path.strip_suffix('/').unwrap_or(path).to_string(),
        TrailingSlash::Always => {
            let last = path.rsplit('/').next().unwrap_or("");
            if path.contains('/') && !last.is_empty() && !last.contains('.') {
                format!("{}/", path)
            } else {
                path.to_string()
            }
        }
    }
}

/// Strips `base` from the front of `path` at a segment boundary: `/docs`
/// matches `/docs` and `/docs/x` but not `/docsearch`. Returns the rest,
/// which is empty or starts with '/', '?' or '#'.
pub fn strip_base<'a>(path: &'a str, base: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(base)?;
    let at_boundary = base.is_empty()
        || rest.is_empty()
        || rest.starts_with('/')
        || rest.starts_with('?')
        || rest.starts_with('#');
    at_boundary.then_some(rest)
}

/// Resolves and classifies paths for one prerender run
#[derive(Debug, Clone)]
pub struct PathResolver {
    base: String,
    origin: Url,
    trailing_slash: TrailingSlash,
}

impl PathResolver {
    pub fn new(base: impl Into<String>, origin: Url, trailing_slash: TrailingSlash) -> Self {
        Self {
            base: base.into(),
            origin,
            trailing_slash,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn trailing_slash(&self) -> TrailingSlash {
        self.trailing_slash
    }

    /// True if `path` sits at or below the base path
    pub fn is_under_base(&self, path: &str) -> bool {
        path.starts_with('/') && strip_base(path, &self.base).is_some()
    }

    /// True for an absolute path on the site's own origin, whether or not it
    /// is under the base. Protocol-relative (`//host/x`) and absolute
    /// external URLs are not.
    pub fn is_same_origin(&self, path: &str) -> bool {
        path.starts_with('/') && !path.starts_with("//")
    }

    /// True for a same-origin path at or below the base path
    pub fn is_root_relative(&self, path: &str) -> bool {
        self.is_same_origin(path) && self.is_under_base(path)
    }

    /// Resolves `href` against the page at `base_encoded`.
    ///
    /// Anything landing on the synthetic origin comes back as a root-relative
    /// path (with query and fragment). Everything else, including hrefs that
    /// don't parse, is returned untouched. Existing percent escapes are kept
    /// as-is, so resolving a resolved path again yields the same string.
    pub fn resolve(&self, base_encoded: &str, href: &str) -> String {
        let base = match self.origin.join(base_encoded) {
            Ok(url) => url,
            Err(_) => return href.to_string(),
        };

        match base.join(href) {
            Ok(joined) if joined.origin() == self.origin.origin() => {
                joined[Position::BeforePath..].to_string()
            }
            _ => href.to_string(),
        }
    }

    /// Parses a root-relative path into a full URL on the synthetic origin
    pub fn request_url(&self, encoded: &str) -> anyhow::Result<Url> {
        self.origin
            .join(encoded)
            .map_err(|e| anyhow::anyhow!("Invalid path '{}': {}", encoded, e))
    }

    /// `normalize_path` under this run's trailing-slash policy
    pub fn normalize(&self, path: &str) -> String {
        normalize_path(path, self.trailing_slash)
    }

    /// The part of a decoded path after `<base>/`, e.g. `about` for
    /// `/docs/about` under base `/docs`. Empty for the base itself.
    pub fn relative_file<'a>(&self, decoded: &'a str) -> &'a str {
        decoded.get(self.base.len() + 1..).unwrap_or("")
    }

    /// The output file (relative to the output directory) for a resource
    pub fn output_filename(&self, decoded: &str, is_html: bool) -> String {
        let file = self.relative_file(decoded);

        if file.is_empty() {
            return "index.html".to_string();
        }

        if is_html && !file.ends_with(".html") {
            if file.ends_with('/') {
                return format!("{}index.html", file);
            }
            return match self.trailing_slash {
                TrailingSlash::Always => format!("{}/index.html", file),
                _ => format!("{}.html", file),
            };
        }

        file.to_string()
    }
}
