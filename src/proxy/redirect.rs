use rama::http::{HeaderMap, StatusCode, header};
use url::Url;

use crate::error::{RelayError, RelayResult};

pub fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// The `Location` of a redirect response, if it has a readable one.
pub fn location(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Resolves `location` against the URL that produced the redirect.
///
/// Absolute locations are taken as they are; relative ones follow standard
/// reference resolution against the current target.
pub fn resolve(current: &Url, location: &str) -> RelayResult<Url> {
    current
        .join(location)
        .map_err(|err| RelayError::invalid_url(location, err))
}

pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}
