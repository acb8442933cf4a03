//! Registry Bearer-token handshake: challenge parsing, the token cache, and
//! the resolver that turns a `WWW-Authenticate` challenge into a token.

mod auth;
mod challenge;
mod token_cache;

pub use auth::TokenResolver;
pub use challenge::{AuthChallenge, CacheKey, parse_params};
pub use token_cache::{CachedToken, TokenCache};
