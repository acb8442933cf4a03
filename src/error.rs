//! Error taxonomy for the relay.
//!
//! [`RelayError`] is fatal for the current request and becomes a 5xx.
//! [`ChallengeError`] never reaches the caller: the relay degrades to passing
//! the registry's own 401 through.

use rama::http::StatusCode;

pub type RelayResult<T> = std::result::Result<T, RelayError>;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("upstream request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("spooling request body failed: {0}")]
    Spool(#[source] std::io::Error),
    #[error("reading inbound request body failed: {0}")]
    InboundBody(String),
    #[error("invalid url {input:?}: {source}")]
    InvalidUrl {
        input: String,
        #[source]
        source: url::ParseError,
    },
    #[error("gave up after {0} redirect hops")]
    TooManyHops(u32),
    #[error("building response failed: {0}")]
    Response(String),
}

impl RelayError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn invalid_url(input: impl Into<String>, source: url::ParseError) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            source,
        }
    }

    /// Status surfaced to the caller. The body never carries the error detail.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Network { .. } | Self::TooManyHops(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn public_message(&self) -> &'static str {
        match self.status() {
            StatusCode::BAD_GATEWAY => "upstream error\n",
            _ => "internal server error\n",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    #[error("challenge is missing realm or service")]
    IncompleteParams,
    #[error("challenge realm {realm:?} is not a usable url: {source}")]
    InvalidRealm {
        realm: String,
        #[source]
        source: url::ParseError,
    },
    #[error("token request failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("token endpoint answered {0}")]
    TokenEndpointError(StatusCode),
    #[error("token endpoint returned malformed json: {0}")]
    MalformedResponse(#[source] reqwest::Error),
    #[error("token endpoint response carried no token")]
    NoTokenInResponse,
}
