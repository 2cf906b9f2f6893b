//! Authenticated JSON client for the XSOAR REST API
//!
//! Wraps a `reqwest::Client` preconfigured with the authentication headers,
//! the TLS verification toggle and the request timeout, and maps transport
//! failures and HTTP statuses onto [`ClientError`].

use crate::client::retry::RetryManager;
use crate::config::{ConnectionConfig, RetryConfig};
use crate::error::ClientError;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the key id of an XSOAR 8 advanced API key
const API_KEY_ID_HEADER: &str = "x-xdr-auth-id";

/// Longest error body excerpt kept in a [`ClientError::Validation`]
const MAX_ERROR_EXCERPT: usize = 512;

/// HTTP client for one XSOAR server
///
/// Lookups (`get`, `query`) are retried on transient failures; mutating
/// calls (`post`, `put`, `delete`) are sent exactly once.
#[derive(Clone)]
pub struct XsoarClient {
    client: Client,
    base_url: String,
    basic_auth: Option<(String, String)>,
    retry: RetryManager,
}

impl XsoarClient {
    /// Build a client from connection settings
    pub fn new(conn: &ConnectionConfig, retry: RetryConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &conn.api_key {
            let mut value = HeaderValue::from_str(api_key).map_err(|_| {
                ClientError::Configuration("API key contains invalid header characters".into())
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        if let Some(key_id) = &conn.api_key_id {
            let value = HeaderValue::from_str(key_id).map_err(|_| {
                ClientError::Configuration("API key id contains invalid header characters".into())
            })?;
            headers.insert(API_KEY_ID_HEADER, value);
        }

        let basic_auth = match (&conn.username, &conn.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };

        if !conn.validate_certs {
            warn!(url = %conn.url, "TLS certificate validation is disabled");
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(conn.request_timeout_secs))
            .danger_accept_invalid_certs(!conn.validate_certs)
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: conn.url.trim_end_matches('/').to_string(),
            basic_auth,
            retry: RetryManager::new(retry),
        })
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of an API path, scoped to a tenant account when given
    pub fn endpoint(&self, account: Option<&str>, suffix: &str) -> String {
        let suffix = suffix.trim_start_matches('/');
        match account {
            Some(account) => format!("{}/acc_{}/{}", self.base_url, account, suffix),
            None => format!("{}/{}", self.base_url, suffix),
        }
    }

    /// GET a JSON document, retrying transient failures
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ClientError> {
        self.retry
            .execute(|| async move {
                let body = self.send(Method::GET, url, None, None).await?;
                decode(url, body)
            })
            .await
    }

    /// POST a read-only search request, retrying transient failures
    pub async fn query<B, T>(&self, url: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = encode(body)?;
        let body = &body;
        self.retry
            .execute(|| async move {
                let response = self.send(Method::POST, url, Some(body), None).await?;
                decode(url, response)
            })
            .await
    }

    /// POST a mutating request
    pub async fn post<B>(&self, url: &str, body: &B) -> Result<Option<Value>, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let body = encode(body)?;
        self.send(Method::POST, url, Some(&body), None).await
    }

    /// POST a mutating request with a timeout overriding the client default
    pub async fn post_with_timeout<B>(
        &self,
        url: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<Option<Value>, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let body = encode(body)?;
        self.send(Method::POST, url, Some(&body), Some(timeout))
            .await
    }

    /// PUT a mutating request
    pub async fn put<B>(&self, url: &str, body: &B) -> Result<Option<Value>, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let body = encode(body)?;
        self.send(Method::PUT, url, Some(&body), None).await
    }

    /// PUT a mutating request with a timeout overriding the client default
    pub async fn put_with_timeout<B>(
        &self,
        url: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<Option<Value>, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let body = encode(body)?;
        self.send(Method::PUT, url, Some(&body), Some(timeout)).await
    }

    /// DELETE a resource, optionally with a longer timeout
    pub async fn delete(
        &self,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>, ClientError> {
        self.send(Method::DELETE, url, None, timeout).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>, ClientError> {
        let mut request = self.client.request(method.clone(), url);
        if let Some((user, password)) = &self.basic_auth {
            request = request.basic_auth(user, Some(password));
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        debug!(%method, url = url, "Sending XSOAR API request");

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        if status.is_success() {
            debug!(
                %method,
                url = url,
                status = status.as_u16(),
                body_size = text.len(),
                "Received response"
            );
            if text.trim().is_empty() {
                return Ok(None);
            }
            let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
            return Ok(Some(value));
        }

        Err(map_status(&method, url, status, &text))
    }
}

impl std::fmt::Debug for XsoarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XsoarClient")
            .field("base_url", &self.base_url)
            .field("basic_auth", &self.basic_auth.as_ref().map(|(user, _)| user))
            .field("retry", &self.retry)
            .finish()
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Value, ClientError> {
    serde_json::to_value(body)
        .map_err(|e| ClientError::InvalidData(format!("Failed to encode request body: {}", e)))
}

fn decode<T: DeserializeOwned>(url: &str, body: Option<Value>) -> Result<T, ClientError> {
    serde_json::from_value(body.unwrap_or(Value::Null))
        .map_err(|e| ClientError::InvalidData(format!("Unexpected response from {}: {}", url, e)))
}

fn map_transport_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        return ClientError::NetworkTimeout;
    }
    let chain = error_chain(&err);
    let lowered = chain.to_lowercase();
    if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("handshake")
    {
        return ClientError::Tls(chain);
    }
    if err.is_connect() {
        return ClientError::ConnectionRefused(chain);
    }
    ClientError::Network(chain)
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn map_status(method: &Method, url: &str, status: StatusCode, body: &str) -> ClientError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            warn!(%method, url = url, status = status.as_u16(), "Request not authorized");
            ClientError::Unauthorized(status.as_u16())
        }
        StatusCode::NOT_FOUND => {
            debug!(%method, url = url, "Resource not found (404)");
            ClientError::NotFound
        }
        status if status.is_server_error() => {
            warn!(%method, url = url, status = status.as_u16(), "Server error");
            ClientError::ServerError(status.as_u16())
        }
        status => {
            let message = error_message(body);
            warn!(
                %method,
                url = url,
                status = status.as_u16(),
                message = %message,
                "Request rejected"
            );
            ClientError::Validation {
                status: status.as_u16(),
                message,
            }
        }
    }
}

/// Pull a readable message out of an XSOAR error body
fn error_message(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "error", "title", "message"] {
            if let Some(Value::String(message)) = map.get(key) {
                if !message.is_empty() {
                    return message.clone();
                }
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_EXCERPT).collect()
    }
}
