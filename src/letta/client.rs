//! HTTP client core for the Letta API.

use crate::auth::AuthConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::retry::{retry_with_config, RetryConfig};
use reqwest::header::HeaderMap;
use std::time::Duration;
use url::Url;

/// Default per-call timeout for Letta requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for blocking message dispatch, which can span several agent steps.
pub const BLOCKING_MESSAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for the Letta client.
#[derive(Debug, Clone)]
pub struct LettaClientConfig {
    /// Base URL for the Letta API.
    pub base_url: Url,
    /// Authentication configuration.
    pub auth: AuthConfig,
    /// Request timeout duration.
    pub timeout: Duration,
}

impl LettaClientConfig {
    /// Create a new client configuration.
    pub fn new(base_url: impl AsRef<str>) -> BridgeResult<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        Ok(Self {
            base_url,
            auth: AuthConfig::default(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Set the authentication configuration.
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Typed Letta API client.
///
/// API sections hang off this core: [`agents`](crate::letta::AgentApi),
/// [`blocks`](crate::letta::BlockApi), [`folders`](crate::letta::FolderApi),
/// and [`messages`](crate::letta::MessageApi).
#[derive(Debug, Clone)]
pub struct LettaClient {
    http: reqwest::Client,
    config: LettaClientConfig,
    retry_config: RetryConfig,
}

impl LettaClient {
    /// Create a new Letta client.
    pub fn new(config: LettaClientConfig) -> BridgeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            config,
            retry_config: RetryConfig::default(),
        })
    }

    /// Create a client for the given base URL with an optional bearer token.
    pub fn connect(base_url: impl AsRef<str>, token: Option<&str>) -> BridgeResult<Self> {
        let mut config = LettaClientConfig::new(base_url)?;
        if let Some(token) = token {
            let auth = AuthConfig::bearer(token);
            auth.validate()?;
            config = config.auth(auth);
        }
        Self::new(config)
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    /// Get the HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Get the authentication configuration.
    pub fn auth(&self) -> &AuthConfig {
        &self.config.auth
    }

    /// Get the retry configuration.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    /// Set the retry configuration.
    pub fn set_retry_config(&mut self, config: RetryConfig) {
        self.retry_config = config;
    }

    /// Get the agent API.
    pub fn agents(&self) -> super::AgentApi<'_> {
        super::AgentApi::new(self)
    }

    /// Get the block API.
    pub fn blocks(&self) -> super::BlockApi<'_> {
        super::BlockApi::new(self)
    }

    /// Get the folder API.
    pub fn folders(&self) -> super::FolderApi<'_> {
        super::FolderApi::new(self)
    }

    /// Get the message API.
    pub fn messages(&self) -> super::MessageApi<'_> {
        super::MessageApi::new(self)
    }

    fn auth_headers(&self) -> BridgeResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        self.auth().apply_to_headers(&mut headers)?;
        Ok(headers)
    }

    async fn check_response<T>(
        response: reqwest::Response,
        url: &Url,
        method: &str,
    ) -> BridgeResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.text().await?;
            return Err(BridgeError::from_letta_response(
                status,
                body,
                Some(&headers),
                Some(url.clone()),
                Some(method.to_string()),
            ));
        }
        Ok(response.json().await?)
    }

    /// Make a GET request.
    #[tracing::instrument(skip(self), fields(path = %path))]
    pub async fn get<T>(&self, path: &str) -> BridgeResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.base_url().join(path.trim_start_matches('/'))?;

        retry_with_config(&self.retry_config, || async {
            let headers = self.auth_headers()?;
            let response = self.http().get(url.clone()).headers(headers).send().await?;
            Self::check_response(response, &url, "GET").await
        })
        .await
    }

    /// Make a GET request with query parameters.
    #[tracing::instrument(skip(self, query), fields(path = %path))]
    pub async fn get_with_query<T, Q>(&self, path: &str, query: &Q) -> BridgeResult<T>
    where
        T: serde::de::DeserializeOwned,
        Q: serde::Serialize + ?Sized,
    {
        let url = self.base_url().join(path.trim_start_matches('/'))?;

        retry_with_config(&self.retry_config, || async {
            let headers = self.auth_headers()?;
            let response = self
                .http()
                .get(url.clone())
                .headers(headers)
                .query(query)
                .send()
                .await?;
            Self::check_response(response, &url, "GET").await
        })
        .await
    }

    /// Make a POST request with a JSON body.
    #[tracing::instrument(skip(self, body), fields(path = %path))]
    pub async fn post<T, B>(&self, path: &str, body: &B) -> BridgeResult<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        self.post_with_timeout(path, body, None).await
    }

    /// Make a POST request with a JSON body and a per-call timeout override.
    ///
    /// Blocking agent dispatch uses this with
    /// [`BLOCKING_MESSAGE_TIMEOUT`]; everything else keeps the client-wide
    /// default.
    #[tracing::instrument(skip(self, body, timeout), fields(path = %path))]
    pub async fn post_with_timeout<T, B>(
        &self,
        path: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> BridgeResult<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let url = self.base_url().join(path.trim_start_matches('/'))?;
        let body_json = serde_json::to_value(body)?;

        retry_with_config(&self.retry_config, || async {
            let headers = self.auth_headers()?;
            let mut request = self
                .http()
                .post(url.clone())
                .headers(headers)
                .json(&body_json);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }
            let response = request.send().await?;
            Self::check_response(response, &url, "POST").await
        })
        .await
    }

    /// Make a PATCH request with a JSON body.
    #[tracing::instrument(skip(self, body), fields(path = %path))]
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> BridgeResult<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let url = self.base_url().join(path.trim_start_matches('/'))?;
        let body_json = serde_json::to_value(body)?;

        retry_with_config(&self.retry_config, || async {
            let headers = self.auth_headers()?;
            let response = self
                .http()
                .patch(url.clone())
                .headers(headers)
                .json(&body_json)
                .send()
                .await?;
            Self::check_response(response, &url, "PATCH").await
        })
        .await
    }

    /// Make a POST request with multipart form data.
    ///
    /// Multipart uploads are not retried; the form is consumed by the send.
    #[tracing::instrument(skip(self, form), fields(path = %path))]
    pub async fn post_multipart<T>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> BridgeResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.base_url().join(path.trim_start_matches('/'))?;
        let headers = self.auth_headers()?;

        let response = self
            .http()
            .post(url.clone())
            .headers(headers)
            .multipart(form)
            .send()
            .await?;

        Self::check_response(response, &url, "POST").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config() {
        let config = LettaClientConfig::new("http://localhost:8283").unwrap();
        assert_eq!(config.base_url.as_str(), "http://localhost:8283/");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_connect_with_token() {
        let client = LettaClient::connect("http://localhost:8283", Some("tok")).unwrap();
        assert!(client.auth().is_authenticated());

        let client = LettaClient::connect("http://localhost:8283", None).unwrap();
        assert!(!client.auth().is_authenticated());
    }

    #[test]
    fn test_connect_rejects_empty_token() {
        assert!(LettaClient::connect("http://localhost:8283", Some("  ")).is_err());
    }

    #[test]
    fn test_invalid_url() {
        assert!(LettaClientConfig::new("not a url").is_err());
    }
}
