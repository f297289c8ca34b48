//! URL normalisation for result deduplication.
//!
//! Canonicalises URLs so that equivalent pages (differing only in
//! query-parameter order, tracking parameters, fragments, default ports or
//! capitalisation) compare as equal.

use url::Url;

/// Tracking query parameters that are stripped during normalisation.
/// Any `utm_*` parameter is stripped as well.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "ref", "ref_src", "si",
    "feature", "_hsenc", "_hsmi",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Normalise a URL for deduplication comparison.
///
/// Applies the following transformations:
///
/// 1. Lowercase scheme and host (path is preserved as-is).
/// 2. Remove default ports (`:80` for HTTP, `:443` for HTTPS).
/// 3. Remove trailing slash from the path (unless path is exactly `"/"`).
/// 4. Strip tracking parameters and sort the rest by key, then value.
/// 5. Remove the fragment.
///
/// If the input cannot be parsed as an absolute URL, the trimmed input is
/// returned unchanged.
///
/// # Examples
///
/// ```
/// use research_search::orchestrator::url_normalize::normalize_url;
///
/// let a = normalize_url("https://Example.COM/path/?b=2&a=1&utm_source=x#section");
/// let b = normalize_url("https://example.com/path?a=1&b=2");
/// assert_eq!(a, b);
/// ```
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(mut parsed) = Url::parse(raw) else {
        return raw.to_string();
    };

    parsed.set_fragment(None);

    if is_default_port(&parsed) {
        // Only fails for cannot-be-a-base URLs, which have no port to drop.
        let _ = parsed.set_port(None);
    }

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    if params.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(&params);
    }

    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }

    // Url::parse already lowercases scheme and host.
    parsed.to_string()
}

/// Returns `true` if the URL uses the default port for its scheme.
fn is_default_port(url: &Url) -> bool {
    matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM/Path"),
            "https://example.com/Path"
        );
    }

    #[test]
    fn removes_trailing_slash() {
        assert_eq!(
            normalize_url("https://example.com/path/"),
            "https://example.com/path"
        );
    }

    #[test]
    fn preserves_root_slash() {
        assert_eq!(normalize_url("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn strips_fragment() {
        assert_eq!(
            normalize_url("https://example.com/page#section-2"),
            "https://example.com/page"
        );
    }

    #[test]
    fn strips_utm_family_and_click_ids() {
        assert_eq!(
            normalize_url("https://example.com/a?utm_source=x&utm_id=7&gclid=1&fbclid=2&id=9"),
            "https://example.com/a?id=9"
        );
    }

    #[test]
    fn sorts_remaining_params() {
        assert_eq!(
            normalize_url("https://example.com/search?z=1&a=2"),
            "https://example.com/search?a=2&z=1"
        );
    }

    #[test]
    fn removes_default_ports() {
        assert_eq!(normalize_url("http://example.com:80/x"), "http://example.com/x");
        assert_eq!(normalize_url("https://example.com:443/x"), "https://example.com/x");
        assert_eq!(
            normalize_url("https://example.com:8443/x"),
            "https://example.com:8443/x"
        );
    }

    #[test]
    fn keeps_scheme_distinct() {
        assert_ne!(
            normalize_url("http://example.com/x"),
            normalize_url("https://example.com/x")
        );
    }

    #[test]
    fn unparseable_input_is_returned_trimmed() {
        assert_eq!(normalize_url("  not a url "), "not a url");
    }
}
