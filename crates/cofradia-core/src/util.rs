//! Small helpers shared by config, the remote adapter and the sync engine.

/// Longest error excerpt kept on a queued row or in the sync banner.
pub const ERROR_EXCERPT_CHARS: usize = 180;

/// Trimmed value, or `None` when missing or blank.
pub fn non_blank(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Single-line excerpt of an error or response body.
///
/// Whitespace runs (newlines from HTML or pretty-printed JSON bodies) collapse
/// to one space so the text fits a status line.
pub fn error_excerpt(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(ERROR_EXCERPT_CHARS)
        .collect()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn blank_values_are_dropped() {
        assert_eq!(non_blank(None), None);
        assert_eq!(non_blank(Some(" \n ".to_string())), None);
        assert_eq!(non_blank(Some(" key ".to_string())).as_deref(), Some("key"));
    }

    #[test]
    fn error_excerpt_is_one_bounded_line() {
        let body = "<html>\n  <body>502 Bad Gateway</body>\n</html>";
        assert_eq!(
            error_excerpt(body),
            "<html> <body>502 Bad Gateway</body> </html>"
        );
        assert_eq!(
            error_excerpt(&"x".repeat(400)).chars().count(),
            ERROR_EXCERPT_CHARS
        );
    }
}
