//! Shared helpers for request handling.

use axum::http::HeaderMap;

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token string without the "Bearer " prefix, or None if
/// the header is missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Build a frontend link such as `https://app/billing?status=success&plan=banana`.
///
/// Query values are percent-encoded; `{CHECKOUT_SESSION_ID}` is passed through
/// untouched so Stripe can substitute it on redirect.
pub fn frontend_link(base: &str, path: &str, query: &[(&str, &str)]) -> String {
    let mut url = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    for (i, (key, value)) in query.iter().enumerate() {
        url.push(if i == 0 { '?' } else { '&' });
        url.push_str(&urlencoding::encode(key));
        url.push('=');
        if *value == "{CHECKOUT_SESSION_ID}" {
            url.push_str(value);
        } else {
            url.push_str(&urlencoding::encode(value));
        }
    }
    url
}
