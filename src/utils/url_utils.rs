//! URL helpers shared across the pipeline.
//!
//! Host extraction feeds the scheduler and robots cache; query stripping
//! keeps tokens and search terms out of log lines.

use url::Url;

/// Check if a URL is structurally valid for fetching.
///
/// Only absolute http/https URLs with a host qualify; everything else is
/// recorded as `invalid_url` without any network activity.
#[must_use]
pub fn is_fetchable_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }

    match Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

/// Extract the host portion of a URL.
pub fn extract_host(url_str: &str) -> Result<String, String> {
    match Url::parse(url_str) {
        Ok(url) => {
            if let Some(host) = url.host_str() {
                Ok(host.to_lowercase())
            } else {
                Err(format!("URL has no host: {url_str}"))
            }
        }
        Err(e) => Err(format!("Failed to parse URL {url_str}: {e}")),
    }
}

/// Strip query string and fragment from a URL for logging.
///
/// Query parameters routinely carry tokens and session ids; log lines only
/// ever see scheme://host/path.
#[must_use]
pub fn loggable_url(url_str: &str) -> String {
    match Url::parse(url_str) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => "<unparseable-url>".to_string(),
    }
}

/// Truncate an error message to a safe persisted length on a char boundary.
#[must_use]
pub fn truncate_message(msg: &str, max_chars: usize) -> String {
    if msg.chars().count() <= max_chars {
        return msg.to_string();
    }
    msg.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetchable_urls() {
        assert!(is_fetchable_url("https://example.com"));
        assert!(is_fetchable_url("http://example.com/path?q=1"));
        assert!(!is_fetchable_url(""));
        assert!(!is_fetchable_url("not a url"));
        assert!(!is_fetchable_url("ftp://example.com"));
        assert!(!is_fetchable_url("javascript:void(0)"));
        assert!(!is_fetchable_url("data:text/html,hi"));
    }

    #[test]
    fn host_extraction() {
        assert_eq!(
            extract_host("https://Example.COM/path").expect("valid URL"),
            "example.com"
        );
        assert_eq!(
            extract_host("http://sub.example.com:8080/a?b=1").expect("valid URL"),
            "sub.example.com"
        );
        assert!(extract_host("not a url").is_err());
    }

    #[test]
    fn query_stripped_for_logs() {
        assert_eq!(
            loggable_url("https://example.com/search?q=secret+term&token=abc#frag"),
            "https://example.com/search"
        );
        assert_eq!(loggable_url(":::"), "<unparseable-url>");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_message("héllo wörld", 5), "héllo");
        assert_eq!(truncate_message("short", 300), "short");
    }
}
