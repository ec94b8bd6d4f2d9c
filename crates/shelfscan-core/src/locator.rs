//! Locator parsing and normalization.
//!
//! Two locators name the same product when their normalized forms are equal:
//! the fragment is dropped, tracking parameters are stripped, and the
//! remaining query parameters are sorted so their order does not matter.
//! Host case and default ports are already canonicalised by [`Url`].

use url::Url;

use crate::error::AppError;

/// Query parameters that only carry campaign or click attribution.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "gbraid", "wbraid", "dclid", "msclkid", "yclid", "igshid", "mc_cid",
    "mc_eid", "_ga", "_gl", "ref", "ref_", "spm", "scm", "napm", "nt_source", "nt_medium",
    "nt_detail", "nt_keyword", "trk", "srsltid",
];

/// Tracking parameter families matched by prefix.
const TRACKING_PREFIXES: &[&str] = &["utm_", "pk_", "mtm_"];

/// Parse a locator, accepting only absolute http(s) URLs with a host.
pub fn parse(locator: &str) -> Result<Url, AppError> {
    let trimmed = locator.trim();
    let invalid = |reason: String| AppError::InvalidLocator {
        locator: trimmed.to_string(),
        reason,
    };

    let url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(invalid(format!("scheme '{scheme}' is not http/https"))),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// Normalize a locator into the key used to deduplicate products.
///
/// `normalize(normalize(x)) == normalize(x)` holds for every valid input.
pub fn normalize(locator: &str) -> Result<String, AppError> {
    let mut url = parse(locator)?;
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    Ok(url.into())
}

/// Returns the lowercase host and the path of a locator, if it parses.
pub fn host_and_path(locator: &str) -> Option<(String, String)> {
    let url = parse(locator).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    Some((host, url.path().to_string()))
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    TRACKING_PARAMS.contains(&key.as_str())
        || TRACKING_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}
