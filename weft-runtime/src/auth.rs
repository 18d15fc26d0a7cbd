//! ABOUTME: Auth-provider lifecycle: resolved provider copies and cached cloud sessions
//! ABOUTME: Cloud sessions refresh under a per-provider mutex when temporary credentials expire

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use weft_core::{Result, WeftError};
use weft_dsl::semantic::AuthProvider;

use crate::secrets::{resolve_secret_value, SecretManager};

/// A ready-to-use authentication session.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthSession {
    ApiKey {
        api_key: String,
        host: Option<String>,
    },
    Bearer {
        token: String,
    },
    OAuth2 {
        client_id: String,
        client_secret: String,
        token_url: String,
        scopes: Vec<String>,
    },
    Cloud(CloudSession),
}

impl AuthSession {
    /// Header value for bearer-style authentication, when applicable.
    #[must_use]
    pub fn bearer_header(&self) -> Option<String> {
        match self {
            Self::ApiKey { api_key, .. } => Some(format!("Bearer {api_key}")),
            Self::Bearer { token } => Some(format!("Bearer {token}")),
            _ => None,
        }
    }
}

/// Temporary or static cloud credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudSession {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CloudSession {
    /// Temporary credentials are refreshed shortly before they lapse.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.expires_at
            .is_some_and(|at| at - Utc::now() < Duration::minutes(5))
    }
}

/// Derives cloud sessions from provider descriptors. Role assumption goes
/// base credentials -> broker -> temporary session.
#[async_trait]
pub trait CloudSessionBroker: Send + Sync {
    async fn base_session(&self, fields: &CloudBaseCredentials) -> Result<CloudSession>;

    async fn assume_role(
        &self,
        base: &CloudSession,
        role_arn: &str,
        session_name: &str,
        external_id: Option<&str>,
    ) -> Result<CloudSession>;
}

/// Resolved static inputs for a cloud session.
#[derive(Debug, Clone)]
pub struct CloudBaseCredentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub profile_name: Option<String>,
    pub region: Option<String>,
}

/// Broker for static-key credentials; role assumption requires a real STS
/// broker supplied by the embedding application.
#[derive(Debug, Default)]
pub struct StaticCloudBroker;

#[async_trait]
impl CloudSessionBroker for StaticCloudBroker {
    async fn base_session(&self, fields: &CloudBaseCredentials) -> Result<CloudSession> {
        match (&fields.access_key_id, &fields.secret_access_key) {
            (Some(key), Some(secret)) => Ok(CloudSession {
                access_key_id: key.clone(),
                secret_access_key: secret.clone(),
                session_token: fields.session_token.clone(),
                region: fields.region.clone(),
                expires_at: None,
            }),
            _ => Err(WeftError::configuration(format!(
                "cloud auth via profile '{}' requires an external session broker",
                fields.profile_name.as_deref().unwrap_or("<none>")
            ))),
        }
    }

    async fn assume_role(
        &self,
        _base: &CloudSession,
        role_arn: &str,
        _session_name: &str,
        _external_id: Option<&str>,
    ) -> Result<CloudSession> {
        Err(WeftError::configuration(format!(
            "role assumption for '{role_arn}' requires an external session broker"
        )))
    }
}

struct CachedCloud {
    fingerprint: String,
    session: CloudSession,
}

/// Produces auth sessions from providers, caching cloud sessions keyed by
/// provider id and credential fingerprint.
pub struct AuthManager {
    secrets: Arc<dyn SecretManager>,
    broker: Arc<dyn CloudSessionBroker>,
    cloud_cache: DashMap<String, Arc<Mutex<Option<CachedCloud>>>>,
}

impl AuthManager {
    #[must_use]
    pub fn new(secrets: Arc<dyn SecretManager>, broker: Arc<dyn CloudSessionBroker>) -> Self {
        Self {
            secrets,
            broker,
            cloud_cache: DashMap::new(),
        }
    }

    /// Produce a session for the provider: a resolved copy for api-key,
    /// bearer and oauth2 providers, or a (possibly cached) cloud session.
    pub async fn session(&self, provider: &AuthProvider) -> Result<AuthSession> {
        match provider {
            AuthProvider::ApiKey { api_key, host, .. } => Ok(AuthSession::ApiKey {
                api_key: resolve_secret_value(api_key, self.secrets.as_ref())?,
                host: host.clone(),
            }),
            AuthProvider::BearerToken { token, .. } => Ok(AuthSession::Bearer {
                token: resolve_secret_value(token, self.secrets.as_ref())?,
            }),
            AuthProvider::OAuth2 {
                client_id,
                client_secret,
                token_url,
                scopes,
                ..
            } => Ok(AuthSession::OAuth2 {
                client_id: client_id.clone(),
                client_secret: resolve_secret_value(client_secret, self.secrets.as_ref())?,
                token_url: token_url.clone(),
                scopes: scopes.clone(),
            }),
            AuthProvider::Cloud { .. } => {
                Ok(AuthSession::Cloud(self.cloud_session(provider).await?))
            }
        }
    }

    async fn cloud_session(&self, provider: &AuthProvider) -> Result<CloudSession> {
        let AuthProvider::Cloud {
            id,
            access_key_id,
            secret_access_key,
            session_token,
            profile_name,
            role_arn,
            role_session_name,
            external_id,
            region,
        } = provider
        else {
            return Err(WeftError::internal("cloud_session on non-cloud provider"));
        };

        let base = CloudBaseCredentials {
            access_key_id: access_key_id
                .as_ref()
                .map(|v| resolve_secret_value(v, self.secrets.as_ref()))
                .transpose()?,
            secret_access_key: secret_access_key
                .as_ref()
                .map(|v| resolve_secret_value(v, self.secrets.as_ref()))
                .transpose()?,
            session_token: session_token
                .as_ref()
                .map(|v| resolve_secret_value(v, self.secrets.as_ref()))
                .transpose()?,
            profile_name: profile_name.clone(),
            region: region.clone(),
        };
        let fingerprint = credential_fingerprint(&base, role_arn.as_deref());

        let slot = self
            .cloud_cache
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        // Refresh happens under the provider-scoped mutex so concurrent
        // steps never race a credential exchange.
        let mut guard = slot.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.fingerprint == fingerprint && !cached.session.needs_refresh() {
                return Ok(cached.session.clone());
            }
        }

        debug!(provider = %id, "establishing cloud session");
        let mut session = self.broker.base_session(&base).await?;
        if let Some(role_arn) = role_arn {
            let session_name = role_session_name
                .clone()
                .unwrap_or_else(|| format!("weft-{id}"));
            session = self
                .broker
                .assume_role(&session, role_arn, &session_name, external_id.as_deref())
                .await?;
        }
        *guard = Some(CachedCloud {
            fingerprint,
            session: session.clone(),
        });
        Ok(session)
    }
}

fn credential_fingerprint(base: &CloudBaseCredentials, role_arn: Option<&str>) -> String {
    let mut fields = BTreeMap::new();
    fields.insert("access_key_id", base.access_key_id.clone());
    fields.insert("secret_access_key", base.secret_access_key.clone());
    fields.insert("session_token", base.session_token.clone());
    fields.insert("profile_name", base.profile_name.clone());
    fields.insert("region", base.region.clone());
    fields.insert("role_arn", role_arn.map(String::from));
    let rendered = serde_json::to_string(&fields).unwrap_or_default();
    format!("{:x}", Sha256::digest(rendered.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::NoopSecretManager;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weft_dsl::model::SecretValue;

    struct CountingBroker {
        calls: AtomicUsize,
        expires_soon: bool,
    }

    #[async_trait]
    impl CloudSessionBroker for CountingBroker {
        async fn base_session(&self, fields: &CloudBaseCredentials) -> Result<CloudSession> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CloudSession {
                access_key_id: fields.access_key_id.clone().unwrap_or_default(),
                secret_access_key: fields.secret_access_key.clone().unwrap_or_default(),
                session_token: None,
                region: fields.region.clone(),
                expires_at: if self.expires_soon {
                    Some(Utc::now() + Duration::minutes(1))
                } else {
                    Some(Utc::now() + Duration::hours(1))
                },
            })
        }

        async fn assume_role(
            &self,
            base: &CloudSession,
            _role_arn: &str,
            session_name: &str,
            _external_id: Option<&str>,
        ) -> Result<CloudSession> {
            Ok(CloudSession {
                access_key_id: format!("assumed-{}", base.access_key_id),
                secret_access_key: "temp".to_string(),
                session_token: Some(session_name.to_string()),
                region: base.region.clone(),
                expires_at: Some(Utc::now() + Duration::hours(1)),
            })
        }
    }

    fn cloud_provider() -> AuthProvider {
        AuthProvider::Cloud {
            id: "cloud_main".into(),
            access_key_id: Some(SecretValue::Literal("AKIA123".into())),
            secret_access_key: Some(SecretValue::Literal("shh".into())),
            session_token: None,
            profile_name: None,
            role_arn: None,
            role_session_name: None,
            external_id: None,
            region: Some("us-east-1".into()),
        }
    }

    #[tokio::test]
    async fn test_cloud_session_cached_by_fingerprint() {
        let broker = Arc::new(CountingBroker {
            calls: AtomicUsize::new(0),
            expires_soon: false,
        });
        let manager = AuthManager::new(Arc::new(NoopSecretManager), broker.clone());
        let provider = cloud_provider();

        manager.session(&provider).await.unwrap();
        manager.session(&provider).await.unwrap();
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expiring_session_is_refreshed() {
        let broker = Arc::new(CountingBroker {
            calls: AtomicUsize::new(0),
            expires_soon: true,
        });
        let manager = AuthManager::new(Arc::new(NoopSecretManager), broker.clone());
        let provider = cloud_provider();

        manager.session(&provider).await.unwrap();
        manager.session(&provider).await.unwrap();
        assert_eq!(broker.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_role_assumption_goes_through_broker() {
        let broker = Arc::new(CountingBroker {
            calls: AtomicUsize::new(0),
            expires_soon: false,
        });
        let manager = AuthManager::new(Arc::new(NoopSecretManager), broker);
        let mut provider = cloud_provider();
        if let AuthProvider::Cloud { role_arn, .. } = &mut provider {
            *role_arn = Some("arn:cloud:role/runner".into());
        }
        let AuthSession::Cloud(session) = manager.session(&provider).await.unwrap() else {
            panic!("expected cloud session");
        };
        assert_eq!(session.access_key_id, "assumed-AKIA123");
    }

    #[tokio::test]
    async fn test_api_key_provider_resolves_copy() {
        let manager = AuthManager::new(Arc::new(NoopSecretManager), Arc::new(StaticCloudBroker));
        let provider = AuthProvider::ApiKey {
            id: "llm_key".into(),
            api_key: SecretValue::Literal("sk-123".into()),
            host: Some("api.example.com".into()),
        };
        let session = manager.session(&provider).await.unwrap();
        assert_eq!(
            session.bearer_header().as_deref(),
            Some("Bearer sk-123")
        );
    }
}
