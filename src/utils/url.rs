// src/utils/url.rs

//! URL helpers for feed entries.

use url::Url;

/// Resolve a potentially relative URL against a base URL.
///
/// Returns `href` untouched when the base does not parse or the join fails.
pub fn resolve(base: &str, href: &str) -> String {
    Url::parse(base)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Whether a feed location is fetched over HTTP rather than read from disk.
pub fn is_remote(location: &str) -> bool {
    Url::parse(location).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let base = "https://example.com/board/view.do?id=1";
        assert_eq!(
            resolve(base, "/files/a.pdf"),
            "https://example.com/files/a.pdf"
        );
        assert_eq!(
            resolve(base, "img/b.png"),
            "https://example.com/board/img/b.png"
        );
        assert_eq!(resolve(base, "https://cdn.test/c"), "https://cdn.test/c");
        assert_eq!(resolve("not a url", "a.pdf"), "a.pdf");
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://example.com/feed.json"));
        assert!(is_remote("http://localhost:8080/feed"));
        assert!(!is_remote("/var/lib/feed.json"));
        assert!(!is_remote("feeds/cse.json"));
        assert!(!is_remote("file:///tmp/feed.json"));
    }
}
