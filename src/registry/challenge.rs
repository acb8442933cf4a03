use std::collections::HashMap;
use std::fmt;

use crate::error::ChallengeError;

const BEARER_PREFIX: &str = "Bearer ";

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge.
///
/// `realm` and `service` are always non-empty. An empty `scope` is the same
/// as no scope at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub realm: String,
    pub service: String,
    pub scope: Option<String>,
}

impl AuthChallenge {
    pub fn parse(header: &str) -> Result<Self, ChallengeError> {
        let mut params = parse_params(header);
        let realm = params.remove("realm").filter(|v| !v.is_empty());
        let service = params.remove("service").filter(|v| !v.is_empty());
        let scope = params.remove("scope").filter(|v| !v.is_empty());

        match (realm, service) {
            (Some(realm), Some(service)) => Ok(Self {
                realm,
                service,
                scope,
            }),
            _ => Err(ChallengeError::IncompleteParams),
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.realm, &self.service, self.scope.as_deref())
    }

    /// Same challenge, pointing clients at another token endpoint.
    pub fn with_realm(&self, realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            service: self.service.clone(),
            scope: self.scope.clone(),
        }
    }

    pub fn to_header_value(&self) -> String {
        let mut value = format!(
            "{BEARER_PREFIX}realm=\"{}\",service=\"{}\"",
            self.realm, self.service
        );
        if let Some(scope) = &self.scope {
            value.push_str(&format!(",scope=\"{scope}\""));
        }
        value
    }
}

/// Splits a challenge into its `key=value` parameters.
///
/// Segments without `=` are skipped. Commas inside a quoted value do not split,
/// so `scope="repository:x:pull,push"` survives intact.
pub fn parse_params(header: &str) -> HashMap<String, String> {
    let header = header.trim();
    let rest = match header.get(..BEARER_PREFIX.len()) {
        Some(scheme) if scheme.eq_ignore_ascii_case(BEARER_PREFIX) => {
            &header[BEARER_PREFIX.len()..]
        }
        _ => header,
    };

    split_segments(rest)
        .into_iter()
        .filter_map(|segment| {
            let (key, value) = segment.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_ascii_lowercase(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn split_segments(input: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (idx, ch) in input.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                segments.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    segments.push(&input[start..]);

    segments
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// The `(realm, service, scope)` triple identifying one authorization context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(realm: &str, service: &str, scope: Option<&str>) -> Self {
        // Newline cannot appear in a header value, so it never collides.
        Self(format!("{realm}\n{service}\n{}", scope.unwrap_or_default()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.replace('\n', " "))
    }
}
