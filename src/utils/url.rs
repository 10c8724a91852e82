//! URL normalization and platform detection, backing `POST /validate` and
//! `POST /convert`'s admission checks (spec.md §6).

use url::Url;

use crate::domain::Platform;

#[derive(Debug, Clone)]
pub struct ValidatedUrl {
    pub normalized: String,
    pub platform: Platform,
    pub video_id: Option<String>,
}

/// Parse and classify a source URL. Returns `None` if the string isn't even
/// a well-formed absolute HTTP(S) URL — callers surface that as
/// `ErrorKind::InvalidUrl`.
pub fn validate_url(raw: &str) -> Option<ValidatedUrl> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = Url::parse(trimmed).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }

    let platform = classify_host(&host);
    let video_id = extract_video_id(&parsed, platform);
    let normalized = normalize(&parsed);

    Some(ValidatedUrl {
        normalized,
        platform,
        video_id,
    })
}

fn classify_host(host: &str) -> Platform {
    if is_domain(host, "youtube.com") || host == "youtu.be" {
        Platform::Youtube
    } else if is_domain(host, "tiktok.com") {
        Platform::Tiktok
    } else if is_domain(host, "twitter.com") || is_domain(host, "x.com") {
        Platform::Twitter
    } else if is_domain(host, "facebook.com") || host == "fb.watch" {
        Platform::Facebook
    } else if is_domain(host, "instagram.com") {
        Platform::Instagram
    } else {
        Platform::Other
    }
}

/// `host` is `domain` itself or a subdomain of it — a plain suffix match
/// would also accept e.g. `evilyoutube.com` or `notx.com`.
fn is_domain(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn extract_video_id(url: &Url, platform: Platform) -> Option<String> {
    match platform {
        Platform::Youtube => {
            if url.host_str() == Some("youtu.be") {
                url.path_segments()?.next().map(str::to_string)
            } else {
                url.query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned())
            }
        }
        Platform::Tiktok | Platform::Instagram | Platform::Twitter | Platform::Facebook => url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string),
        Platform::Other => None,
    }
}

/// Strip tracking query parameters and a trailing slash; lowercase the host.
/// Not a full canonicalization — just enough to make `(id, url)` dedup-stable
/// for logging and to keep stored URLs consistent.
fn normalize(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let keep: Vec<(String, String)> = normalized
        .query_pairs()
        .filter(|(k, _)| k == "v")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if keep.is_empty() {
        normalized.set_query(None);
    } else {
        let query = keep
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        normalized.set_query(Some(&query));
    }

    let mut s = normalized.to_string();
    if s.ends_with('/') && normalized.path() != "/" {
        s.pop();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_youtube_watch_url() {
        let v = validate_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=abc").unwrap();
        assert_eq!(v.platform, Platform::Youtube);
        assert_eq!(v.video_id.as_deref(), Some("dQw4w9WgXcQ"));
        assert!(v.normalized.contains("v=dQw4w9WgXcQ"));
        assert!(!v.normalized.contains("list="));
    }

    #[test]
    fn classifies_youtu_be_short_url() {
        let v = validate_url("https://youtu.be/dQw4w9WgXcQ").unwrap();
        assert_eq!(v.platform, Platform::Youtube);
        assert_eq!(v.video_id.as_deref(), Some("dQw4w9WgXcQ"));
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(validate_url("ftp://example.com/video").is_none());
    }

    #[test]
    fn rejects_empty_and_malformed() {
        assert!(validate_url("").is_none());
        assert!(validate_url("not a url").is_none());
    }

    #[test]
    fn unknown_host_classifies_as_other() {
        let v = validate_url("https://example.com/video/123").unwrap();
        assert_eq!(v.platform, Platform::Other);
    }

    #[test]
    fn lookalike_domains_do_not_spoof_a_platform() {
        let v = validate_url("https://www.netflix.com/watch/123").unwrap();
        assert_eq!(v.platform, Platform::Other);

        let v = validate_url("https://evilyoutube.com/watch?v=abc").unwrap();
        assert_eq!(v.platform, Platform::Other);

        let v = validate_url("https://notx.com/foo").unwrap();
        assert_eq!(v.platform, Platform::Other);
    }
}
