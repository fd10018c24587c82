use crate::UrlError;
use url::Url;

/// Query parameters that never change which listing or product a URL names
const TRACKING_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "msclkid",
    "mc_eid",
    "srsltid",
    "_ga",
    "ref",
];

/// Canonicalizes a storefront URL so it can serve as a dedup key
///
/// # Canonicalization Steps
///
/// 1. Parse the URL; reject anything that is not absolute http(s)
/// 2. Lowercase the host
/// 3. Normalize the path:
///    - Remove dot segments and empty segments
///    - Remove trailing slash (except for root /)
/// 4. Remove the fragment
/// 5. Remove tracking query parameters (`utm_*` and known click ids)
/// 6. Sort remaining query parameters by key, keeping the relative order of
///    repeated keys
///
/// The scheme and a `www.` prefix are kept: storefronts routinely serve
/// different content on those variants.
///
/// # Examples
///
/// ```
/// use shelf_crawler::url::canonicalize_url;
///
/// let url = canonicalize_url("https://Shop.Example.com/c/shoes/?sort=asc&utm_source=mail#top").unwrap();
/// assert_eq!(url.as_str(), "https://shop.example.com/c/shoes?sort=asc");
/// ```
pub fn canonicalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or(UrlError::MissingDomain)?;
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let path = normalize_path(url.path());
    url.set_path(&path);
    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut()
                .clear()
                .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
    }

    Ok(url)
}

/// Resolves an `href` found on `base` into a canonical absolute URL
///
/// Returns None for empty links, in-page anchors and non-http(s) targets
/// such as `javascript:` or `mailto:`.
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let joined = base.join(href).ok()?;
    canonicalize_url(joined.as_str()).ok()
}

fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    format!("/{}", segments.join("/"))
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    // Stable sort keeps repeated keys in their original order
    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
