//! Input normalization for user-submitted video URLs.
//!
//! [`normalize`] is a pure function: it validates a raw string against the
//! supported host allow-list, strips tracking parameters, and returns a
//! [`NormalizedUrl`] describing the result. It performs no I/O and is cheap
//! enough to run on every keystroke.

use serde::Serialize;
use url::Url;

/// Longest URL accepted before parsing.
pub const MAX_URL_LENGTH: usize = 2048;

/// Short-link hosts that redirect to a canonical video page.
const SHORT_LINK_HOSTS: &[&str] = &["vm.tiktok.com", "vt.tiktok.com", "youtu.be"];

/// Canonical hosts, matched after stripping a `www.` or `m.` prefix.
const CANONICAL_HOSTS: &[&str] = &["tiktok.com", "youtube.com"];

/// Query keys removed from every URL.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "igshid",
    "si",
    "feature",
    "is_from_webapp",
    "sender_device",
    "sender_web_id",
    "_r",
    "_t",
    "share_app_id",
    "share_link_id",
    "refer",
];

/// Video platform a normalized URL belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    TikTok,
    YouTube,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::TikTok => write!(f, "TikTok"),
            Platform::YouTube => write!(f, "YouTube"),
        }
    }
}

/// Result of normalizing one raw input string. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedUrl {
    /// The input exactly as the user typed or pasted it.
    pub raw: String,
    /// Canonical form sent to the remote service. Empty when invalid.
    pub sanitized: String,
    pub is_valid: bool,
    /// Human-readable rejection reason when `is_valid` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl NormalizedUrl {
    fn valid(raw: &str, sanitized: String) -> Self {
        Self {
            raw: raw.to_string(),
            sanitized,
            is_valid: true,
            error_message: None,
        }
    }

    fn invalid(raw: &str, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.to_string(),
            sanitized: String::new(),
            is_valid: false,
            error_message: Some(reason.into()),
        }
    }

    /// Platform of a valid URL, `None` when invalid.
    pub fn platform(&self) -> Option<Platform> {
        if !self.is_valid {
            return None;
        }
        let host = Url::parse(&self.sanitized)
            .ok()?
            .host_str()?
            .to_ascii_lowercase();
        if host.ends_with("tiktok.com") {
            Some(Platform::TikTok)
        } else {
            Some(Platform::YouTube)
        }
    }
}

/// Validate and canonicalize a raw URL string.
pub fn normalize(raw: &str) -> NormalizedUrl {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return NormalizedUrl::invalid(raw, "URL cannot be empty");
    }

    let candidate = match extract_candidate(trimmed) {
        Some(c) => c,
        None => return NormalizedUrl::invalid(raw, "No link found in the shared text"),
    };

    if candidate.len() > MAX_URL_LENGTH {
        return NormalizedUrl::invalid(
            raw,
            format!("URL too long (max {MAX_URL_LENGTH} characters)"),
        );
    }

    let url = match Url::parse(&candidate) {
        Ok(u) => u,
        Err(e) => return NormalizedUrl::invalid(raw, format!("Invalid URL format: {e}")),
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return NormalizedUrl::invalid(
            raw,
            format!("Unsupported scheme '{}': use an http(s) link", url.scheme()),
        );
    }

    let host = match url.host_str() {
        Some(h) => h.to_ascii_lowercase(),
        None => return NormalizedUrl::invalid(raw, "URL has no host"),
    };

    let Some(kind) = classify_host(&host) else {
        return NormalizedUrl::invalid(
            raw,
            format!("Unsupported host '{host}': paste a TikTok or YouTube video link"),
        );
    };

    let path = url.path().trim_end_matches('/');
    let query = strip_tracking(url.query());

    if let Err(reason) = check_video_path(kind, path, query.as_deref()) {
        return NormalizedUrl::invalid(raw, reason);
    }

    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    let query = query.map(|q| format!("?{q}")).unwrap_or_default();
    let sanitized = format!("{}://{host}{port}{path}{query}", url.scheme());

    NormalizedUrl::valid(raw, sanitized)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostKind {
    TikTokShort,
    TikTok,
    YouTubeShort,
    YouTube,
}

fn classify_host(host: &str) -> Option<HostKind> {
    if SHORT_LINK_HOSTS.contains(&host) {
        return Some(if host == "youtu.be" {
            HostKind::YouTubeShort
        } else {
            HostKind::TikTokShort
        });
    }
    let bare = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .unwrap_or(host);
    match CANONICAL_HOSTS.iter().find(|h| **h == bare) {
        Some(&"tiktok.com") => Some(HostKind::TikTok),
        Some(_) => Some(HostKind::YouTube),
        None => None,
    }
}

/// Pick the URL out of the input. Share sheets often wrap the link in prose.
fn extract_candidate(input: &str) -> Option<String> {
    let lower = input.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(input.to_string());
    }
    if let Some(pos) = lower.find("https://").or_else(|| lower.find("http://")) {
        let token = input
            .get(pos..)?
            .split_whitespace()
            .next()?
            .trim_end_matches(['.', ',', ')', '"', '\'']);
        return Some(token.to_string());
    }
    if input.contains(char::is_whitespace) {
        return None;
    }
    let host = lower.split('/').next().unwrap_or_default();
    if classify_host(host).is_some() {
        return Some(format!("https://{input}"));
    }
    // Let the parser produce the error message.
    Some(input.to_string())
}

fn is_tracking_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Drop tracking pairs, keeping the remaining pairs in their original encoding.
fn strip_tracking(query: Option<&str>) -> Option<String> {
    let kept: Vec<&str> = query?
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            !is_tracking_key(key)
        })
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join("&"))
    }
}

fn check_video_path(kind: HostKind, path: &str, query: Option<&str>) -> Result<(), String> {
    let first_segment = path.trim_start_matches('/').split('/').next().unwrap_or("");
    match kind {
        HostKind::TikTokShort | HostKind::YouTubeShort => {
            if first_segment.is_empty() {
                return Err("Short link is missing its video code".into());
            }
        }
        HostKind::TikTok => {
            if !path.contains("/video/") {
                return Err("TikTok URL does not point to a video".into());
            }
        }
        HostKind::YouTube => {
            let has_video_param = query
                .map(|q| {
                    q.split('&')
                        .any(|p| p.strip_prefix("v=").is_some_and(|v| !v.is_empty()))
                })
                .unwrap_or(false);
            let is_watch = path == "/watch" && has_video_param;
            let is_short = path
                .strip_prefix("/shorts/")
                .is_some_and(|id| !id.is_empty());
            if !is_watch && !is_short {
                return Err("YouTube URL does not point to a video".into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_input_is_invalid() {
        for input in ["", "   ", "\n\t"] {
            let n = normalize(input);
            assert!(!n.is_valid);
            assert!(n.sanitized.is_empty());
            assert_eq!(n.error_message.as_deref(), Some("URL cannot be empty"));
        }
    }

    #[test]
    fn short_link_keeps_code_and_drops_trailing_slash() {
        let n = normalize("  https://vm.tiktok.com/ZMA2MTD9C/  ");
        assert!(n.is_valid, "{n:?}");
        assert_eq!(n.sanitized, "https://vm.tiktok.com/ZMA2MTD9C");
        assert_eq!(n.platform(), Some(Platform::TikTok));
    }

    #[test]
    fn tracking_params_are_stripped() {
        let n = normalize(
            "https://www.tiktok.com/@creator/video/7301234567890?is_from_webapp=1&sender_device=pc&utm_source=copy",
        );
        assert!(n.is_valid, "{n:?}");
        assert_eq!(n.sanitized, "https://www.tiktok.com/@creator/video/7301234567890");
    }

    #[test]
    fn non_tracking_params_survive() {
        let n = normalize("https://www.youtube.com/watch?v=dQw4w9WgXcQ&si=abc&t=42&feature=share");
        assert!(n.is_valid, "{n:?}");
        assert_eq!(n.sanitized, "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42");
        assert_eq!(n.platform(), Some(Platform::YouTube));
    }

    #[test]
    fn host_is_lowercased() {
        let n = normalize("https://VM.TikTok.com/ZMabc123/");
        assert!(n.is_valid);
        assert_eq!(n.sanitized, "https://vm.tiktok.com/ZMabc123");
    }

    #[test]
    fn unsupported_host_is_rejected_with_reason() {
        let n = normalize("https://example.com/video/123");
        assert!(!n.is_valid);
        assert!(n.error_message.unwrap().contains("example.com"));
    }

    #[test]
    fn lookalike_host_is_rejected() {
        assert!(!normalize("https://nottiktok.com/@a/video/1").is_valid);
        assert!(!normalize("https://tiktok.com.evil.net/@a/video/1").is_valid);
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let n = normalize("ftp://vm.tiktok.com/ZMabc123");
        assert!(!n.is_valid);
        assert!(n.error_message.unwrap().contains("scheme"));
    }

    #[test]
    fn url_is_extracted_from_shared_text() {
        let n = normalize("Watch this! https://vm.tiktok.com/ZMA2MTD9C/ #fyp");
        assert!(n.is_valid, "{n:?}");
        assert_eq!(n.sanitized, "https://vm.tiktok.com/ZMA2MTD9C");
        assert_eq!(n.raw, "Watch this! https://vm.tiktok.com/ZMA2MTD9C/ #fyp");
    }

    #[test]
    fn scheme_less_supported_host_gets_https() {
        let n = normalize("youtu.be/dQw4w9WgXcQ");
        assert!(n.is_valid, "{n:?}");
        assert_eq!(n.sanitized, "https://youtu.be/dQw4w9WgXcQ");
    }

    #[test]
    fn prose_without_link_is_rejected() {
        let n = normalize("check out my video");
        assert!(!n.is_valid);
    }

    #[test]
    fn canonical_hosts_require_video_path() {
        assert!(!normalize("https://www.tiktok.com/").is_valid);
        assert!(!normalize("https://www.tiktok.com/@creator").is_valid);
        assert!(!normalize("https://www.youtube.com/watch").is_valid);
        assert!(!normalize("https://youtu.be/").is_valid);
        assert!(normalize("https://m.youtube.com/shorts/abc123").is_valid);
    }

    #[test]
    fn overlong_url_is_rejected() {
        let long = format!("https://vm.tiktok.com/{}", "a".repeat(MAX_URL_LENGTH));
        let n = normalize(&long);
        assert!(!n.is_valid);
        assert!(n.error_message.unwrap().contains("too long"));
    }

    #[test]
    fn normalize_is_deterministic() {
        let input = "https://vm.tiktok.com/ZMA2MTD9C/?utm_campaign=x";
        assert_eq!(normalize(input), normalize(input));
    }
}
