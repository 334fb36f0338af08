//! Control-plane Authentication
//!
//! Bearer tokens come either from a static token (`ASSESSCTL_TOKEN`) or from
//! Application Default Credentials. ADC tokens are cached and refreshed
//! shortly before they expire.

use super::client::ClientError;
use gcp_auth::TokenProvider;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default scopes for control-plane access
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

/// Token expiry buffer - refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if we can't determine expiry (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Clone)]
enum TokenSource {
    Static(String),
    Adc(Arc<dyn TokenProvider>),
}

/// Credentials holder with token caching, shared read-only by every
/// concurrent resource lifecycle
#[derive(Clone)]
pub struct Credentials {
    source: TokenSource,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl Credentials {
    /// Credentials that always present the same bearer token
    pub fn from_static(token: &str) -> Self {
        Self {
            source: TokenSource::Static(token.to_string()),
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Credentials resolved through Application Default Credentials
    pub async fn from_adc() -> Result<Self, ClientError> {
        let provider = gcp_auth::provider().await.map_err(|e| {
            ClientError::Auth(format!(
                "failed to initialize Application Default Credentials: {e}"
            ))
        })?;

        Ok(Self {
            source: TokenSource::Adc(provider),
            token_cache: Arc::new(RwLock::new(None)),
        })
    }

    /// Get an access token for API calls
    pub async fn get_token(&self) -> Result<String, ClientError> {
        let provider = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Adc(provider) => provider,
        };

        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let token = provider
            .token(DEFAULT_SCOPES)
            .await
            .map_err(|e| ClientError::Auth(format!("failed to get access token: {e}")))?;

        let token_str = token.as_str().to_string();
        let expires_at = Instant::now() + DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER;

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: token_str.clone(),
                expires_at,
            });
        }

        tracing::debug!(
            "New token cached, expires in ~{} minutes",
            (DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(token_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_is_returned_verbatim() {
        let credentials = Credentials::from_static("static-token");
        assert_eq!(credentials.get_token().await.unwrap(), "static-token");
        assert!(credentials.token_cache.read().await.is_none());
    }

    #[test]
    fn test_cached_token_validity() {
        let fresh = CachedToken {
            token: "t".to_string(),
            expires_at: Instant::now() + Duration::from_secs(60),
        };
        assert!(fresh.is_valid());

        let stale = CachedToken {
            token: "t".to_string(),
            expires_at: Instant::now() - Duration::from_secs(1),
        };
        assert!(!stale.is_valid());
    }
}
