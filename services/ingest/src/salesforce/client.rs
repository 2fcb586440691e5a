use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::models::{QueryResponse, TokenResponse};
use crate::connector::{RecordSource, RemoteRecord, SourceError};

#[derive(Debug, Clone)]
pub enum Credentials {
    /// Pre-issued session or integration token.
    AccessToken(String),
    /// OAuth username-password flow.
    Password(PasswordGrant),
}

#[derive(Debug, Clone)]
pub struct PasswordGrant {
    pub login_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub security_token: String,
}

#[derive(Debug, Clone)]
pub struct SalesforceClientConfig {
    /// Replaced by the token response's `instance_url` under the password flow.
    pub instance_url: String,
    pub api_version: String,
    pub credentials: Credentials,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl SalesforceClientConfig {
    /// Load Salesforce config from environment.
    ///
    /// `SF_ACCESS_TOKEN` wins when set; otherwise every password-flow variable is
    /// mandatory. Missing credentials are an error, never a silent skip.
    pub fn from_env() -> Result<Self, String> {
        let instance_url = std::env::var("SF_INSTANCE_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());

        let credentials = match non_empty_var("SF_ACCESS_TOKEN") {
            Some(token) => {
                if instance_url.is_none() {
                    return Err("SF_INSTANCE_URL is required with SF_ACCESS_TOKEN".to_string());
                }
                Credentials::AccessToken(token)
            }
            None => {
                let domain = non_empty_var("SF_DOMAIN").unwrap_or_else(|| "login".to_string());
                Credentials::Password(PasswordGrant {
                    login_url: format!("https://{domain}.salesforce.com"),
                    client_id: required_var("SF_CLIENT_ID")?,
                    client_secret: required_var("SF_CLIENT_SECRET")?,
                    username: required_var("SF_USERNAME")?,
                    password: required_var("SF_PASSWORD")?,
                    security_token: std::env::var("SF_SECURITY_TOKEN").unwrap_or_default(),
                })
            }
        };

        let api_version = non_empty_var("SF_API_VERSION").unwrap_or_else(|| "59.0".to_string());
        let max_retries = parsed_var("SF_MAX_RETRIES", 3)?;
        let timeout_secs = parsed_var("SF_TIMEOUT_SECS", 30)?;

        Ok(Self {
            instance_url: instance_url.unwrap_or_default(),
            api_version,
            credentials,
            max_retries,
            timeout_secs,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(key: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("invalid {key}: {e}")),
        None => Ok(default),
    }
}

fn required_var(key: &str) -> Result<String, String> {
    non_empty_var(key).ok_or_else(|| {
        format!("{key} is required when SF_ACCESS_TOKEN is not set, but not found")
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SalesforceClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("query cancelled")]
    Cancelled,
}

impl From<SalesforceClientError> for SourceError {
    fn from(err: SalesforceClientError) -> Self {
        match err {
            SalesforceClientError::Cancelled => SourceError::Cancelled,
            other => SourceError::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    instance_url: String,
}

#[derive(Clone)]
pub struct SalesforceClient {
    client: Client,
    config: SalesforceClientConfig,
    session: Arc<RwLock<Option<Session>>>,
}

impl SalesforceClient {
    pub fn new(config: SalesforceClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            session: Arc::new(RwLock::new(None)),
        })
    }

    /// For testing: point both the login and query endpoints at a mock server.
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.instance_url = base_url.to_string();
        if let Credentials::Password(grant) = &mut self.config.credentials {
            grant.login_url = base_url.to_string();
        }
        self
    }

    /// Run a SOQL query and follow `nextRecordsUrl` until the result set is exhausted.
    pub async fn query_all(
        &self,
        soql: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteRecord>, SalesforceClientError> {
        if cancel.is_cancelled() {
            return Err(SalesforceClientError::Cancelled);
        }

        let query_path = format!("/services/data/v{}/query", self.config.api_version);
        let mut page = self.get_page(&query_path, Some(soql)).await?;
        let mut records = Vec::with_capacity(page.total_size.min(10_000) as usize);
        let mut pages = 1u32;

        loop {
            records.extend(page.records);
            let next = match page.next_records_url {
                Some(next) if !page.done => next,
                _ => break,
            };
            if cancel.is_cancelled() {
                tracing::info!(pages, fetched = records.len(), "query cancelled between pages");
                return Err(SalesforceClientError::Cancelled);
            }
            page = self.get_page(&next, None).await?;
            pages += 1;
        }

        tracing::debug!(pages, records = records.len(), "query complete");
        Ok(records)
    }

    async fn session(&self) -> Result<Session, SalesforceClientError> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.clone());
        }
        self.refresh_session().await
    }

    async fn refresh_session(&self) -> Result<Session, SalesforceClientError> {
        let session = match &self.config.credentials {
            Credentials::AccessToken(token) => Session {
                access_token: token.clone(),
                instance_url: self.config.instance_url.clone(),
            },
            Credentials::Password(grant) => self.login(grant).await?,
        };
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn login(&self, grant: &PasswordGrant) -> Result<Session, SalesforceClientError> {
        let url = format!("{}/services/oauth2/token", grant.login_url);
        let password = format!("{}{}", grant.password, grant.security_token);
        let params = [
            ("grant_type", "password"),
            ("client_id", grant.client_id.as_str()),
            ("client_secret", grant.client_secret.as_str()),
            ("username", grant.username.as_str()),
            ("password", password.as_str()),
        ];

        let response = self.client.post(&url).form(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SalesforceClientError::Auth(format!("{status}: {body}")));
        }

        let token: TokenResponse = response.json().await?;
        tracing::info!(instance_url = %token.instance_url, "authenticated with salesforce");
        Ok(Session {
            access_token: token.access_token,
            instance_url: token.instance_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_page(
        &self,
        path: &str,
        soql: Option<&str>,
    ) -> Result<QueryResponse, SalesforceClientError> {
        let mut session = self.session().await?;
        let mut last_error = String::new();
        let mut relogged = false;
        let mut retry_now = false;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 && !std::mem::take(&mut retry_now) {
                let backoff_secs = std::cmp::min(1u64 << attempt, 30);
                tracing::warn!(attempt, backoff_secs, "retrying after backoff");
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }

            let mut request = self
                .client
                .get(format!("{}{}", session.instance_url, path))
                .bearer_auth(&session.access_token);
            if let Some(soql) = soql {
                request = request.query(&[("q", soql)]);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(SalesforceClientError::RequestError(e));
                }
            };

            let status = response.status();

            if status.is_success() {
                return response
                    .json::<QueryResponse>()
                    .await
                    .map_err(SalesforceClientError::RequestError);
            }

            // Expired session: log in again once, then treat 401 as final
            if status == StatusCode::UNAUTHORIZED
                && !relogged
                && matches!(self.config.credentials, Credentials::Password(_))
            {
                tracing::warn!("session rejected, logging in again");
                relogged = true;
                retry_now = true;
                last_error = "401 Unauthorized".to_string();
                session = self.refresh_session().await?;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, 60);
                    tracing::warn!(wait, "rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    retry_now = true;
                }
                last_error = "429 Too Many Requests".to_string();
                continue;
            }

            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(SalesforceClientError::HttpError { status, body });
        }

        Err(SalesforceClientError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}

#[async_trait]
impl RecordSource for SalesforceClient {
    fn source_name(&self) -> &str {
        "salesforce"
    }

    async fn query(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteRecord>, SourceError> {
        Ok(self.query_all(query, cancel).await?)
    }
}
