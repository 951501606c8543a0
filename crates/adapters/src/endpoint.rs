use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/v\d+(beta\d*)?/?$").expect("valid version suffix regex"));

/// Normalizes an OpenAI-compatible base URL. A trailing `#` pins the URL as
/// written; otherwise `/v1` is appended unless a version segment is present.
pub fn normalize_base_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Some(pinned) = trimmed.strip_suffix('#') {
        return pinned.trim_end_matches('/').to_string();
    }

    if VERSION_SUFFIX_RE.is_match(trimmed) || trimmed.contains("/v1/") {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("{}/v1", trimmed.trim_end_matches('/'))
    }
}

/// `base_url` if configured, the provider default otherwise, normalized.
pub fn resolve_base_url(base_url: &str, default: &str) -> String {
    if base_url.trim().is_empty() {
        normalize_base_url(default)
    } else {
        normalize_base_url(base_url)
    }
}

pub fn join_endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_v1_when_missing() {
        assert_eq!(
            normalize_base_url("https://example.com/"),
            "https://example.com/v1"
        );
    }

    #[test]
    fn keeps_existing_version() {
        assert_eq!(
            normalize_base_url("https://example.com/v2"),
            "https://example.com/v2"
        );
        assert_eq!(
            normalize_base_url("https://example.com/v1beta/"),
            "https://example.com/v1beta"
        );
    }

    #[test]
    fn hash_suffix_pins_url() {
        assert_eq!(
            normalize_base_url("https://proxy.local/openai/#"),
            "https://proxy.local/openai"
        );
    }

    #[test]
    fn falls_back_to_provider_default() {
        assert_eq!(
            resolve_base_url("  ", "https://api.openai.com/v1"),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            join_endpoint("https://api.openai.com/v1/", "/images/generations"),
            "https://api.openai.com/v1/images/generations"
        );
    }
}
