// src/escape.rs
// =============================================================================
// Escaping for text the engine writes into HTML documents.
//
// Two places put untrusted strings into markup:
// - redirect pages, where the Location header lands in an attribute
// - hydration payloads, where fetched JSON lands inside a <script> element
// =============================================================================

/// Escapes a value and wraps it in double quotes for use as an HTML
/// attribute, e.g. `a"b` becomes `"a&quot;b"`
pub fn escape_html_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('"');
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped.push('"');
    escaped
}

/// Makes serialized JSON safe to inline in a <script> element. The result is
/// still valid JSON.
pub fn escape_json_in_html(json: &str) -> String {
    let mut escaped = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => escaped.push_str("\\u003C"),
            '>' => escaped.push_str("\\u003E"),
            '/' => escaped.push_str("\\u002F"),
            '\u{2028}' => escaped.push_str("\\u2028"),
            '\u{2029}' => escaped.push_str("\\u2029"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html_attr() {
        assert_eq!(
            escape_html_attr(r#"0;url=https://example.com/</script>alert("pwned")"#),
            r#""0;url=https://example.com/&lt;/script&gt;alert(&quot;pwned&quot;)""#
        );
        assert_eq!(escape_html_attr("a&b"), r#""a&amp;b""#);
    }

    #[test]
    fn test_escape_json_in_html() {
        let json = serde_json::to_string("</script><script>alert(1)").unwrap();
        let escaped = escape_json_in_html(&json);
        assert!(!escaped.contains("</script>"));

        let back: String = serde_json::from_str(&escaped).unwrap();
        assert_eq!(back, "</script><script>alert(1)");
    }
}
