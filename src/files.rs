// src/files.rs
// =============================================================================
// This module tracks the build output that already exists as plain files.
//
// Two kinds of files are known before any page is rendered:
// - static files copied verbatim from the assets directory
// - bundled client assets emitted under the app directory
//
// A path that names one of these is never rendered: the crawler skips it, and
// an in-render fetch for a static file is answered straight from disk.
// =============================================================================

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Build files that are served as-is
#[derive(Debug, Clone, Default)]
pub struct KnownFiles {
    root: PathBuf,
    statics: HashSet<String>,
    all: HashSet<String>,
}

impl KnownFiles {
    /// No known files; every discovered path gets rendered
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the set from a list of static files (relative to `root`, with
    /// '/' separators) and bundled files (relative to `app_dir`)
    pub fn new<S, B>(root: impl Into<PathBuf>, statics: S, app_dir: &str, build_files: B) -> Self
    where
        S: IntoIterator<Item = String>,
        B: IntoIterator<Item = String>,
    {
        let statics: HashSet<String> = statics.into_iter().collect();
        let mut all = statics.clone();

        for file in build_files {
            all.insert(format!("{}/{}", app_dir, file));
        }

        // a static `about/index.html` also covers the `about` page
        for file in &statics {
            if let Some(dir) = file.strip_suffix("/index.html") {
                all.insert(dir.to_string());
            }
        }

        Self {
            root: root.into(),
            statics,
            all,
        }
    }

    /// Scans `assets_dir` recursively for static files. A missing directory
    /// simply means there are none.
    pub fn scan(assets_dir: &Path, app_dir: &str, build_files: &[String]) -> Result<Self> {
        let mut statics = Vec::new();
        if assets_dir.is_dir() {
            walk(assets_dir, &mut statics)?;
        }

        Ok(Self::new(
            assets_dir,
            statics,
            app_dir,
            build_files.iter().cloned(),
        ))
    }

    /// True if `file` (a path relative to the base, no leading '/') is
    /// already part of the build output
    pub fn contains(&self, file: &str) -> bool {
        self.all.contains(file)
    }

    /// Finds the static file that answers a fetch for `filename`, trying
    /// `filename/index.html` as well
    pub fn lookup(&self, filename: &str) -> Option<String> {
        if self.statics.contains(filename) {
            return Some(filename.to_string());
        }

        let index = if filename.is_empty() {
            "index.html".to_string()
        } else {
            format!("{}/index.html", filename.trim_end_matches('/'))
        };
        self.statics.contains(&index).then_some(index)
    }

    /// Reads a static file found by `lookup`
    pub async fn read(&self, file: &str) -> Result<Vec<u8>> {
        let path = self.root.join(file);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read static file: {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

// Every regular file under `root`, relative to it with '/' separators
fn walk(root: &Path, files: &mut Vec<String>) -> Result<()> {
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to read directory: {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        if let Ok(relative) = entry.path().strip_prefix(root) {
            let parts: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            files.push(parts.join("/"));
        }
    }

    Ok(())
}

/// Guesses a content type from a file extension
pub fn content_type_for(file: &str) -> Option<&'static str> {
    let extension = file.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())?;

    let content_type = match extension.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => return None,
    };

    Some(content_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_html_covers_directory() {
        let files = KnownFiles::new(
            "static",
            vec!["robots.txt".to_string(), "docs/index.html".to_string()],
            "_app",
            vec!["immutable/start.js".to_string()],
        );

        assert!(files.contains("robots.txt"));
        assert!(files.contains("docs"));
        assert!(files.contains("docs/index.html"));
        assert!(files.contains("_app/immutable/start.js"));
        assert!(!files.contains("about"));
    }

    #[test]
    fn test_lookup_only_sees_static_files() {
        let files = KnownFiles::new(
            "static",
            vec!["data.json".to_string(), "docs/index.html".to_string()],
            "_app",
            vec!["start.js".to_string()],
        );

        assert_eq!(files.lookup("data.json"), Some("data.json".to_string()));
        assert_eq!(files.lookup("docs"), Some("docs/index.html".to_string()));
        assert_eq!(files.lookup("_app/start.js"), None);
    }

    #[tokio::test]
    async fn test_scan_and_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("api")).unwrap();
        std::fs::write(dir.path().join("api/data.json"), r#"{"answer":42}"#).unwrap();
        std::fs::write(dir.path().join("favicon.png"), b"png").unwrap();

        let files = KnownFiles::scan(dir.path(), "_app", &[]).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.contains("api/data.json"));

        let body = files.read("api/data.json").await.unwrap();
        assert_eq!(body, br#"{"answer":42}"#);
    }

    #[test]
    fn test_scan_descends_into_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs/guide/img")).unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("docs/guide/index.html"), "<h1>guide</h1>").unwrap();
        std::fs::write(dir.path().join("docs/guide/img/logo.svg"), "<svg/>").unwrap();

        let mut statics = Vec::new();
        walk(dir.path(), &mut statics).unwrap();
        assert_eq!(statics, vec!["docs/guide/img/logo.svg", "docs/guide/index.html"]);

        let files = KnownFiles::scan(dir.path(), "_app", &[]).unwrap();
        assert!(files.contains("docs/guide"));
        assert!(!files.contains("empty"));
        assert_eq!(
            files.lookup("docs/guide"),
            Some("docs/guide/index.html".to_string())
        );
    }

    #[test]
    fn test_scan_missing_directory() {
        let files = KnownFiles::scan(Path::new("/definitely/not/here"), "_app", &[]).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a/b.JSON"), Some("application/json"));
        assert_eq!(content_type_for("index.html"), Some("text/html"));
        assert_eq!(content_type_for("LICENSE"), None);
    }
}
