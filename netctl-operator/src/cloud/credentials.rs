//! GCP credential acquisition, memoized process-wide with a single-flight
//! refresh guard: a lazily-initialised value behind a lock that is only
//! held while a refresh is actually in flight.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

const TOKEN_URI_DEFAULT: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
/// Refresh this long before the provider-reported expiry to absorb clock
/// skew and in-flight request latency.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("failed to read service account key file {path}: {reason}")]
    KeyFile { path: String, reason: String },
    #[error("failed to exchange credentials for an access token: {0}")]
    TokenExchange(String),
}

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
    project_id: Option<String>,
}

fn default_token_uri() -> String {
    TOKEN_URI_DEFAULT.to_string()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Process-wide credential cache. `project` is resolved once at construction
/// (from the service-account key, or the caller's configured project for
/// ambient credentials) and never refreshed; only the bearer token is.
pub struct CredentialCache {
    source: Source,
    project: String,
    cached: Arc<Mutex<Option<CachedToken>>>,
    http: reqwest::Client,
}

enum Source {
    ServiceAccount(ServiceAccountKey),
    Ambient,
}

impl CredentialCache {
    /// Reads `GOOGLE_APPLICATION_CREDENTIALS` if set, else falls back to
    /// ambient workload-identity / node-default credentials served by the
    /// GCE metadata server.
    pub fn from_env(fallback_project: &str) -> Result<Self, CredentialError> {
        match std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            Ok(path) => Self::from_key_file(&path),
            Err(_) => Ok(Self {
                source: Source::Ambient,
                project: fallback_project.to_string(),
                cached: Arc::new(Mutex::new(None)),
                http: super::http_client(),
            }),
        }
    }

    fn from_key_file(path: &str) -> Result<Self, CredentialError> {
        let contents = std::fs::read_to_string(path).map_err(|e| CredentialError::KeyFile {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let key: ServiceAccountKey =
            serde_json::from_str(&contents).map_err(|e| CredentialError::KeyFile {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        let project = key
            .project_id
            .clone()
            .unwrap_or_else(|| "unknown-project".to_string());
        Ok(Self {
            source: Source::ServiceAccount(key),
            project,
            cached: Arc::new(Mutex::new(None)),
            http: super::http_client(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Returns a valid bearer token, refreshing under a single-flight lock
    /// when the cached one is absent or reports expiry.
    pub async fn access_token(&self) -> Result<String, CredentialError> {
        let mut guard = self.cached.lock().await;
        if let Some(cached) = guard.as_ref()
            && cached.expires_at > Instant::now()
        {
            return Ok(cached.access_token.clone());
        }
        let fresh = self.fetch_token().await?;
        let token = fresh.access_token.clone();
        *guard = Some(CachedToken {
            access_token: fresh.access_token,
            expires_at: Instant::now()
                + Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_SKEW),
        });
        Ok(token)
    }

    async fn fetch_token(&self) -> Result<TokenResponse, CredentialError> {
        match &self.source {
            Source::Ambient => self
                .http
                .get(METADATA_TOKEN_URL)
                .header("Metadata-Flavor", "Google")
                .send()
                .await
                .map_err(|e| CredentialError::TokenExchange(e.to_string()))?
                .error_for_status()
                .map_err(|e| CredentialError::TokenExchange(e.to_string()))?
                .json::<TokenResponse>()
                .await
                .map_err(|e| CredentialError::TokenExchange(e.to_string())),
            Source::ServiceAccount(key) => self.exchange_jwt(key).await,
        }
    }

    async fn exchange_jwt(&self, key: &ServiceAccountKey) -> Result<TokenResponse, CredentialError> {
        use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
        use serde::Serialize;

        #[derive(Serialize)]
        struct Claims<'a> {
            iss: &'a str,
            scope: &'a str,
            aud: &'a str,
            iat: i64,
            exp: i64,
        }

        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &key.client_email,
            scope: SCOPE,
            aud: &key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| CredentialError::TokenExchange(format!("invalid private key: {e}")))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|e| CredentialError::TokenExchange(e.to_string()))?;

        let form = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];
        self.http
            .post(&key.token_uri)
            .form(&form)
            .send()
            .await
            .map_err(|e| CredentialError::TokenExchange(e.to_string()))?
            .error_for_status()
            .map_err(|e| CredentialError::TokenExchange(e.to_string()))?
            .json::<TokenResponse>()
            .await
            .map_err(|e| CredentialError::TokenExchange(e.to_string()))
    }
}
