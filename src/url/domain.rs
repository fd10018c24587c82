use crate::UrlError;
use url::Url;

/// Extracts the lowercase host from a URL string
///
/// # Arguments
///
/// * `url_str` - An absolute http(s) URL
///
/// # Returns
///
/// * `Ok(String)` - The lowercase host, without port
/// * `Err(UrlError)` - The URL is malformed, not http(s), or has no host
///
/// # Examples
///
/// ```
/// use shelf_crawler::url::extract_domain;
///
/// assert_eq!(extract_domain("https://Shop.Example.com/c/shoes").unwrap(), "shop.example.com");
/// assert!(extract_domain("mailto:sales@example.com").is_err());
/// ```
pub fn extract_domain(url_str: &str) -> Result<String, UrlError> {
    let url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }
    host_of(&url).ok_or(UrlError::MissingDomain)
}

/// Returns the lowercase host of a parsed URL
pub fn host_of(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Whether two URLs share scheme, host and port
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// Checks a hostname against RFC 1123 label rules
///
/// Labels are 1-63 alphanumeric or hyphen characters and may not start or end
/// with a hyphen. At least two labels are required and the whole name is at
/// most 253 characters. IPv4 literals pass.
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }

    if domain.starts_with('.') || domain.ends_with('.') || !domain.contains('.') {
        return false;
    }

    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
