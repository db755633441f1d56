//! Shared access signature tokens for the Service Bus REST API

use std::time::Duration;

use aws_lc_rs::hmac;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use chrono::Utc;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

/// Tokens are renewed this long before they expire
const RENEWAL_MARGIN_SECONDS: i64 = 300;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Issues and caches namespace-scoped SAS tokens
#[derive(Debug)]
pub struct SasTokenProvider {
    resource_uri: String,
    key_name: String,
    key: SecretString,
    token_ttl: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl SasTokenProvider {
    pub fn new(
        resource_uri: impl Into<String>,
        key_name: impl Into<String>,
        key: SecretString,
        token_ttl: Duration,
    ) -> Self {
        Self {
            resource_uri: resource_uri.into(),
            key_name: key_name.into(),
            key,
            token_ttl,
            cached: Mutex::new(None),
        }
    }

    /// Current token, issuing a new one when the cached token is close to expiry
    pub fn token(&self) -> String {
        let now = Utc::now().timestamp();
        let mut cached = self.cached.lock();

        if let Some(existing) = cached.as_ref() {
            if existing.expires_at - now > RENEWAL_MARGIN_SECONDS {
                return existing.token.clone();
            }
        }

        let ttl = i64::try_from(self.token_ttl.as_secs()).unwrap_or(i64::MAX / 2);
        let expires_at = now.saturating_add(ttl.max(RENEWAL_MARGIN_SECONDS * 2));
        let token = sign(&self.resource_uri, &self.key_name, &self.key, expires_at);

        debug!(
            resource_uri = %self.resource_uri,
            expires_at = expires_at,
            "🔑 SAS: Issued new token"
        );

        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        token
    }
}

/// Build a `SharedAccessSignature` authorization value
pub fn sign(resource_uri: &str, key_name: &str, key: &SecretString, expires_at: i64) -> String {
    let encoded_uri = url_encode(resource_uri);
    let string_to_sign = format!("{encoded_uri}\n{expires_at}");

    let signing_key = hmac::Key::new(hmac::HMAC_SHA256, key.expose_secret().as_bytes());
    let tag = hmac::sign(&signing_key, string_to_sign.as_bytes());
    let signature = BASE64_STANDARD.encode(tag.as_ref());

    format!(
        "SharedAccessSignature sr={encoded_uri}&sig={}&se={expires_at}&skn={}",
        url_encode(&signature),
        url_encode(key_name)
    )
}

fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_known_vector() {
        let token = sign(
            "https://example.servicebus.windows.net/",
            "drain",
            &SecretString::new("c2VjcmV0LWtleQ==".to_string()),
            1_700_000_000,
        );

        assert_eq!(
            token,
            "SharedAccessSignature sr=https%3A%2F%2Fexample.servicebus.windows.net%2F\
             &sig=842K2WkgU91zYd0Enne4KT37BddSwlKKlufQZTT7OEY%3D&se=1700000000&skn=drain"
        );
    }

    #[test]
    fn test_token_is_cached() {
        let provider = SasTokenProvider::new(
            "https://example.servicebus.windows.net/",
            "drain",
            SecretString::new("key".to_string()),
            Duration::from_secs(3600),
        );

        let first = provider.token();
        let second = provider.token();
        assert_eq!(first, second);
        assert!(first.starts_with("SharedAccessSignature sr="));
    }
}
