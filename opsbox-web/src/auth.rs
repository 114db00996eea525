//! Authentication modes for web sources.
//!
//! Credentials are never inlined in configuration; every mode names the
//! environment variables the secrets are resolved from at call time.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use opsbox_core::SourceError;

/// Safety margin subtracted from OAuth2 token lifetimes.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Authentication mode of a web source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication.
    #[default]
    None,
    /// Static API key sent as a header or query parameter.
    ApiKey {
        /// Header name carrying the key (e.g. `X-Api-Key`).
        #[serde(default)]
        header: Option<String>,
        /// Query parameter carrying the key, used when `header` is unset.
        #[serde(default)]
        query_param: Option<String>,
        /// Environment variable holding the key.
        key_env: String,
    },
    /// Static bearer token.
    Bearer {
        /// Environment variable holding the token.
        token_env: String,
    },
    /// OAuth2 client-credentials flow with refresh on 401.
    Oauth2 {
        /// Token endpoint URL.
        token_url: String,
        /// Environment variable holding the client id.
        client_id_env: String,
        /// Environment variable holding the client secret.
        client_secret_env: String,
        /// Optional scope parameter.
        #[serde(default)]
        scope: Option<String>,
    },
}

fn env(name: &str) -> Result<String, SourceError> {
    std::env::var(name)
        .map_err(|_| SourceError::AuthFailed(format!("environment variable '{name}' is not set")))
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Runtime authentication state: applies credentials to outbound requests
/// and caches OAuth2 tokens until they near expiry.
pub(crate) struct AuthState {
    config: AuthConfig,
    token: RwLock<Option<CachedToken>>,
}

impl AuthState {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            token: RwLock::new(None),
        }
    }

    /// Applies the configured credentials to a request builder.
    pub async fn apply(
        &self,
        client: &reqwest::Client,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, SourceError> {
        match &self.config {
            AuthConfig::None => Ok(builder),
            AuthConfig::ApiKey {
                header,
                query_param,
                key_env,
            } => {
                let key = env(key_env)?;
                match (header, query_param) {
                    (Some(header), _) => Ok(builder.header(header.as_str(), key)),
                    (None, Some(param)) => Ok(builder.query(&[(param.as_str(), key.as_str())])),
                    (None, None) => Ok(builder.header("X-Api-Key", key)),
                }
            }
            AuthConfig::Bearer { token_env } => Ok(builder.bearer_auth(env(token_env)?)),
            AuthConfig::Oauth2 { .. } => {
                let token = self.oauth_token(client).await?;
                Ok(builder.bearer_auth(token))
            }
        }
    }

    /// Drops any cached token so the next call re-authenticates. Called on
    /// a 401 response.
    pub async fn invalidate(&self) {
        let mut token = self.token.write().await;
        if token.take().is_some() {
            debug!("cached oauth token invalidated after 401");
        }
    }

    /// Whether a 401 is worth retrying after re-authentication.
    pub fn refreshable(&self) -> bool {
        matches!(self.config, AuthConfig::Oauth2 { .. })
    }

    async fn oauth_token(&self, client: &reqwest::Client) -> Result<String, SourceError> {
        {
            let token = self.token.read().await;
            if let Some(cached) = token.as_ref()
                && cached.expires_at > Instant::now()
            {
                return Ok(cached.token.clone());
            }
        }

        let AuthConfig::Oauth2 {
            token_url,
            client_id_env,
            client_secret_env,
            scope,
        } = &self.config
        else {
            return Err(SourceError::AuthFailed("not an oauth2 source".to_owned()));
        };

        let client_id = env(client_id_env)?;
        let client_secret = env(client_secret_env)?;
        let mut form = vec![
            ("grant_type", "client_credentials".to_owned()),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope.clone()));
        }

        let response = client
            .post(token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| SourceError::Transient(format!("token endpoint unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(SourceError::AuthFailed(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| SourceError::AuthFailed(format!("token response unreadable: {e}")))?;
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::AuthFailed("token response missing access_token".into()))?
            .to_owned();
        let expires_in = body
            .get("expires_in")
            .and_then(Value::as_u64)
            .unwrap_or(3600);

        let expires_at = Instant::now()
            + Duration::from_secs(expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let mut token = self.token.write().await;
        *token = Some(CachedToken {
            token: access_token.clone(),
            expires_at,
        });
        Ok(access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn api_key_header_is_applied() {
        // SAFETY: test-local env mutation; tests touching env use unique names.
        unsafe { std::env::set_var("OPSBOX_TEST_API_KEY", "sekrit") };
        let auth = AuthState::new(AuthConfig::ApiKey {
            header: Some("X-Api-Key".to_owned()),
            query_param: None,
            key_env: "OPSBOX_TEST_API_KEY".to_owned(),
        });
        let client = reqwest::Client::new();
        let builder = auth
            .apply(&client, client.get("https://example.com/"))
            .await
            .unwrap();
        let request = builder.build().unwrap();
        assert_eq!(request.headers()["X-Api-Key"], "sekrit");
    }

    #[tokio::test]
    async fn api_key_query_param_is_applied() {
        unsafe { std::env::set_var("OPSBOX_TEST_QUERY_KEY", "qk") };
        let auth = AuthState::new(AuthConfig::ApiKey {
            header: None,
            query_param: Some("api_key".to_owned()),
            key_env: "OPSBOX_TEST_QUERY_KEY".to_owned(),
        });
        let client = reqwest::Client::new();
        let request = auth
            .apply(&client, client.get("https://example.com/docs"))
            .await
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.url().query(), Some("api_key=qk"));
    }

    #[tokio::test]
    async fn bearer_token_is_applied() {
        unsafe { std::env::set_var("OPSBOX_TEST_BEARER", "tok") };
        let auth = AuthState::new(AuthConfig::Bearer {
            token_env: "OPSBOX_TEST_BEARER".to_owned(),
        });
        let client = reqwest::Client::new();
        let request = auth
            .apply(&client, client.get("https://example.com/"))
            .await
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.headers()["authorization"], "Bearer tok");
    }

    #[tokio::test]
    async fn missing_env_is_auth_failed() {
        let auth = AuthState::new(AuthConfig::Bearer {
            token_env: "OPSBOX_TEST_MISSING_VAR".to_owned(),
        });
        let client = reqwest::Client::new();
        let err = auth
            .apply(&client, client.get("https://example.com/"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::AuthFailed(_)));
    }
}
