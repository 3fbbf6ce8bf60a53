// src/prerender/output.rs
// =============================================================================
// Writing rendered resources to the output directory.
// =============================================================================

use anyhow::{Context, Result};
use std::path::Path;

use crate::escape::escape_html_attr;

/// The document written in place of a redirect: an immediate meta refresh.
/// The location is attribute-escaped, so a hostile Location header can't
/// inject markup.
pub fn redirect_document(location: &str) -> String {
    format!(
        r#"<meta http-equiv="refresh" content={}>"#,
        escape_html_attr(&format!("0;url={}", location))
    )
}

/// Writes `contents` to `dest`, creating parent directories as needed
pub async fn write_file(dest: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    tokio::fs::write(dest, contents)
        .await
        .with_context(|| format!("Failed to write file: {}", dest.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_document() {
        assert_eq!(
            redirect_document("https://example.com/redirected"),
            r#"<meta http-equiv="refresh" content="0;url=https://example.com/redirected">"#
        );
    }

    #[test]
    fn test_redirect_document_escapes_location() {
        assert_eq!(
            redirect_document(r#"https://example.com/</script>alert("pwned")"#),
            r#"<meta http-equiv="refresh" content="0;url=https://example.com/&lt;/script&gt;alert(&quot;pwned&quot;)">"#
        );
    }

    #[test]
    fn test_redirect_document_keeps_encoded_query() {
        assert_eq!(
            redirect_document("https://example.com/redirected?returnTo=%2Ffoo%3Fbar%3Dbaz"),
            r#"<meta http-equiv="refresh" content="0;url=https://example.com/redirected?returnTo=%2Ffoo%3Fbar%3Dbaz">"#
        );
    }

    #[tokio::test]
    async fn test_write_file_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("blog/2024/post.html");

        write_file(&dest, b"<h1>post</h1>").await.unwrap();
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "<h1>post</h1>");
    }
}
