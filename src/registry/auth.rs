use std::sync::Arc;
use std::time::Duration;

use rama::http::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{AuthChallenge, TokenCache};
use crate::error::ChallengeError;
use crate::upstream::UpstreamClient;

/// Upper bound on a token lifetime stated by the token endpoint.
const MAX_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl TokenResponse {
    fn into_token(self) -> Option<(String, Option<u64>)> {
        let expires_in = self.expires_in.filter(|secs| *secs > 0);
        self.token
            .filter(|t| !t.is_empty())
            .or(self.access_token.filter(|t| !t.is_empty()))
            .map(|token| (token, expires_in))
    }
}

/// Exchanges registry auth challenges for bearer tokens, through the cache.
#[derive(Clone)]
pub struct TokenResolver {
    client: UpstreamClient,
    cache: Arc<TokenCache>,
    default_ttl: Duration,
}

impl TokenResolver {
    pub fn new(client: UpstreamClient, cache: Arc<TokenCache>, default_ttl: Duration) -> Self {
        Self {
            client,
            cache,
            default_ttl,
        }
    }

    /// Resolves a raw `WWW-Authenticate` value into a token.
    pub async fn resolve(&self, header: &str, request_id: &str) -> Result<String, ChallengeError> {
        let challenge = AuthChallenge::parse(header)?;
        self.resolve_challenge(&challenge, request_id).await
    }

    pub async fn resolve_challenge(
        &self,
        challenge: &AuthChallenge,
        request_id: &str,
    ) -> Result<String, ChallengeError> {
        let key = challenge.cache_key();
        if let Some(cached) = self.cache.get(&key) {
            debug!(
                request_id,
                key = %key,
                remaining_secs = cached
                    .expires_at
                    .saturating_duration_since(std::time::Instant::now())
                    .as_secs(),
                "using cached token"
            );
            return Ok(cached.value);
        }

        debug!(request_id, key = %key, "fetching new token");
        let (token, expires_in) = self.fetch(challenge, request_id).await?;
        let ttl = expires_in
            .map(|secs| Duration::from_secs(secs).min(MAX_TOKEN_TTL))
            .unwrap_or(self.default_ttl);
        self.cache.put(key, token.clone(), ttl);
        Ok(token)
    }

    async fn fetch(
        &self,
        challenge: &AuthChallenge,
        request_id: &str,
    ) -> Result<(String, Option<u64>), ChallengeError> {
        let url = token_url(challenge)?;
        debug!(request_id, %url, "requesting token");

        let response = self
            .client
            .get(url)
            .await
            .map_err(ChallengeError::Network)?;

        if response.status() != StatusCode::OK {
            return Err(ChallengeError::TokenEndpointError(response.status()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(ChallengeError::MalformedResponse)?;

        body.into_token().ok_or(ChallengeError::NoTokenInResponse)
    }
}

/// `<realm>?service=<service>[&scope=<scope>]`, replacing any existing values
/// of those two parameters on the realm.
pub(crate) fn token_url(challenge: &AuthChallenge) -> Result<Url, ChallengeError> {
    let mut url = Url::parse(&challenge.realm).map_err(|source| ChallengeError::InvalidRealm {
        realm: challenge.realm.clone(),
        source,
    })?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "service" && k != "scope")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        pairs.extend_pairs(kept);
        pairs.append_pair("service", &challenge.service);
        if let Some(scope) = &challenge.scope {
            pairs.append_pair("scope", scope);
        }
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamConfig;
    use crate::registry::CacheKey;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver(cache: Arc<TokenCache>) -> TokenResolver {
        let client = UpstreamClient::new(&UpstreamConfig::default()).unwrap();
        TokenResolver::new(client, cache, Duration::from_secs(300))
    }

    fn challenge(server: &MockServer, scope: Option<&str>) -> String {
        let mut value = format!(
            r#"Bearer realm="{}/token",service="registry.example.com""#,
            server.uri()
        );
        if let Some(scope) = scope {
            value.push_str(&format!(r#",scope="{scope}""#));
        }
        value
    }

    #[test]
    fn token_url_carries_service_and_scope() {
        let challenge = AuthChallenge {
            realm: "https://auth.example.com/token".to_string(),
            service: "registry.example.com".to_string(),
            scope: Some("repository:lib/x:pull".to_string()),
        };
        let url = token_url(&challenge).unwrap();
        assert_eq!(
            url.as_str(),
            "https://auth.example.com/token?service=registry.example.com&scope=repository%3Alib%2Fx%3Apull"
        );
    }

    #[test]
    fn token_url_without_scope() {
        let challenge = AuthChallenge {
            realm: "https://auth.example.com/token?client=hubp&service=old".to_string(),
            service: "reg".to_string(),
            scope: None,
        };
        let url = token_url(&challenge).unwrap();
        assert_eq!(
            url.as_str(),
            "https://auth.example.com/token?client=hubp&service=reg"
        );
    }

    #[test]
    fn relative_realm_is_rejected() {
        let challenge = AuthChallenge {
            realm: "/token".to_string(),
            service: "reg".to_string(),
            scope: None,
        };
        assert!(matches!(
            token_url(&challenge),
            Err(ChallengeError::InvalidRealm { .. })
        ));
    }

    #[test]
    fn token_field_wins_over_access_token() {
        let body = TokenResponse {
            token: Some("primary".into()),
            access_token: Some("secondary".into()),
            expires_in: None,
        };
        assert_eq!(body.into_token().unwrap().0, "primary");

        let body = TokenResponse {
            token: Some(String::new()),
            access_token: Some("secondary".into()),
            expires_in: Some(0),
        };
        assert_eq!(body.into_token(), Some(("secondary".to_string(), None)));

        assert!(TokenResponse::default().into_token().is_none());
    }

    #[tokio::test]
    async fn fetches_token_with_query_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("service", "registry.example.com"))
            .and(query_param("scope", "repository:lib/x:pull"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "abc123"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver(Arc::new(TokenCache::new()));
        let token = resolver
            .resolve(&challenge(&server, Some("repository:lib/x:pull")), "t")
            .await
            .unwrap();
        assert_eq!(token, "abc123");
    }

    #[tokio::test]
    async fn falls_back_to_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param_is_missing("scope"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "oauth-style"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver(Arc::new(TokenCache::new()));
        let token = resolver.resolve(&challenge(&server, None), "t").await.unwrap();
        assert_eq!(token, "oauth-style");
    }

    #[tokio::test]
    async fn second_identical_challenge_is_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(path("/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "once"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(TokenCache::new());
        let resolver = resolver(cache.clone());
        let header = challenge(&server, Some("repository:a:pull"));
        assert_eq!(resolver.resolve(&header, "t1").await.unwrap(), "once");
        assert_eq!(resolver.resolve(&header, "t2").await.unwrap(), "once");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn expired_entry_triggers_fresh_fetch() {
        let server = MockServer::start().await;
        Mock::given(path("/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "fresh"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(TokenCache::new());
        let header = challenge(&server, Some("repository:a:pull"));
        let parsed = AuthChallenge::parse(&header).unwrap();
        cache.put(parsed.cache_key(), "stale", Duration::ZERO);

        let resolver = resolver(cache.clone());
        assert_eq!(resolver.resolve(&header, "t").await.unwrap(), "fresh");
        assert_eq!(cache.get(&parsed.cache_key()).unwrap().value, "fresh");
    }

    #[tokio::test]
    async fn expires_in_overrides_default_ttl() {
        let server = MockServer::start().await;
        Mock::given(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"token": "short", "expires_in": 1}),
            ))
            .mount(&server)
            .await;

        let cache = Arc::new(TokenCache::new());
        let resolver = resolver(cache.clone());
        resolver
            .resolve(&challenge(&server, None), "t")
            .await
            .unwrap();

        let key = CacheKey::new(&format!("{}/token", server.uri()), "registry.example.com", None);
        let entry = cache.get(&key).unwrap();
        let remaining = entry
            .expires_at
            .saturating_duration_since(std::time::Instant::now());
        assert!(remaining <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn oversized_expires_in_is_clamped() {
        let server = MockServer::start().await;
        Mock::given(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"token": "long", "expires_in": u64::MAX}),
            ))
            .mount(&server)
            .await;

        let cache = Arc::new(TokenCache::new());
        let resolver = resolver(cache.clone());
        let token = resolver
            .resolve(&challenge(&server, None), "t")
            .await
            .unwrap();
        assert_eq!(token, "long");

        let key = CacheKey::new(&format!("{}/token", server.uri()), "registry.example.com", None);
        let entry = cache.get(&key).unwrap();
        let remaining = entry
            .expires_at
            .saturating_duration_since(std::time::Instant::now());
        assert!(remaining <= MAX_TOKEN_TTL);
        assert!(remaining > Duration::from_secs(300));
    }

    #[tokio::test]
    async fn non_200_is_token_endpoint_error() {
        let server = MockServer::start().await;
        Mock::given(path("/token"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let cache = Arc::new(TokenCache::new());
        let err = resolver(cache.clone())
            .resolve(&challenge(&server, None), "t")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChallengeError::TokenEndpointError(StatusCode::FORBIDDEN)
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn empty_token_fields_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"token": "", "access_token": ""}),
            ))
            .mount(&server)
            .await;

        let err = resolver(Arc::new(TokenCache::new()))
            .resolve(&challenge(&server, None), "t")
            .await
            .unwrap_err();
        assert!(matches!(err, ChallengeError::NoTokenInResponse));
    }

    #[tokio::test]
    async fn incomplete_challenge_makes_no_network_call() {
        let server = MockServer::start().await;
        Mock::given(path("/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let header = format!(r#"Bearer realm="{}/token""#, server.uri());
        let err = resolver(Arc::new(TokenCache::new()))
            .resolve(&header, "t")
            .await
            .unwrap_err();
        assert!(matches!(err, ChallengeError::IncompleteParams));
    }
}
