//! HTTP request executor for the admin REST backend.
//!
//! This module provides the `HttpClient` struct. Every domain service builds
//! on its five verbs; URL construction, identity headers, body encoding,
//! response parsing and error classification all happen here.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{ApiError, ClientError};
use super::request::{
    build_url, Params, RequestBody, RequestDescriptor, RequestOptions, ResponseBody,
};
use crate::auth::TokenManager;
use crate::config::Config;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Clones share the connection pool and cookie store.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    tokens: TokenManager,
    max_rate_limit_retries: u32,
    initial_backoff: Duration,
}

impl HttpClient {
    /// Build a client with a cookie store (same-origin session cookies) and
    /// the configured transport timeout.
    pub fn new(config: &Config, tokens: TokenManager) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .cookie_store(true)
            .build()?;

        Ok(Self::with_client(client, &config.base_url, tokens)
            .with_rate_limit_policy(
                config.max_rate_limit_retries,
                Duration::from_millis(INITIAL_BACKOFF_MS),
            ))
    }

    /// Wrap an existing transport, sharing its connection pool.
    pub fn with_client(client: Client, base_url: &str, tokens: TokenManager) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            max_rate_limit_retries: 0,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    pub fn with_rate_limit_policy(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_rate_limit_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn url_for(&self, path: &str, params: &Params) -> Result<Url, ClientError> {
        build_url(&self.base_url, path, params)
    }

    /// JSON defaults, then identity headers, then caller headers (caller wins).
    /// Multipart bodies drop `Content-Type` so the transport can set the boundary.
    pub fn compose_headers(&self, body: &RequestBody, caller: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (name, value) in self.tokens.identity_headers() {
            if let Some(name) = name {
                headers.insert(name, value);
            }
        }

        let mut last_name = None;
        for (name, value) in caller.clone() {
            // HeaderMap iteration yields `None` for repeated values of the previous name
            match name {
                Some(name) => {
                    headers.insert(name.clone(), value);
                    last_name = Some(name);
                }
                None => {
                    if let Some(ref name) = last_name {
                        headers.append(name.clone(), value);
                    }
                }
            }
        }

        if body.is_multipart() {
            headers.remove(header::CONTENT_TYPE);
        }
        headers
    }

    /// Execute a request and return the parsed body.
    ///
    /// Non-2xx responses become `ClientError::Api`. 429 responses are retried
    /// with exponential backoff up to the configured limit (multipart bodies
    /// are sent once, since a form cannot be replayed).
    pub async fn request(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<ResponseBody, ClientError> {
        let sends_body = descriptor.sends_body();
        let RequestDescriptor {
            method,
            path,
            options,
        } = descriptor;
        let RequestOptions {
            params,
            body,
            headers: caller_headers,
            cancel,
        } = options;

        let url = self.url_for(&path, &params)?;
        let headers = self.compose_headers(&body, &caller_headers);

        let (json_body, mut multipart) = match body {
            RequestBody::Json(value) if sends_body => (Some(serde_json::to_vec(&value)?), None),
            RequestBody::Multipart(form) if sends_body => (None, Some(form)),
            _ => (None, None),
        };
        let replayable = multipart.is_none();

        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let mut builder = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            if let Some(ref bytes) = json_body {
                builder = builder.body(bytes.clone());
            }
            if let Some(form) = multipart.take() {
                builder = builder.multipart(form);
            }

            debug!(method = %method, url = %url, attempt = retries + 1, "Sending request");
            let response = with_cancel(cancel.as_ref(), async {
                builder.send().await.map_err(ClientError::from)
            })
            .await?;

            let status = response.status();
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = with_cancel(cancel.as_ref(), async {
                response.bytes().await.map_err(ClientError::from)
            })
            .await?;

            if status.is_success() {
                return Ok(ResponseBody::parse(content_type.as_deref(), &bytes)?);
            }

            let body = ResponseBody::parse(content_type.as_deref(), &bytes).unwrap_or_else(|_| {
                ResponseBody::Text(String::from_utf8_lossy(&bytes).into_owned())
            });
            let error = ApiError::from_response(status, body);

            if status == StatusCode::TOO_MANY_REQUESTS
                && replayable
                && retries < self.max_rate_limit_retries
            {
                retries += 1;
                warn!(
                    url = %url,
                    retry = retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, backing off"
                );
                with_cancel(cancel.as_ref(), async {
                    tokio::time::sleep(backoff).await;
                    Ok(())
                })
                .await?;
                backoff *= 2; // Exponential backoff
                continue;
            }

            debug!(
                method = %method,
                url = %url,
                status = status.as_u16(),
                body = %error.body_preview(),
                "Request failed"
            );
            return Err(error.into());
        }
    }

    // ===== Verbs =====

    pub async fn get(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ResponseBody, ClientError> {
        self.request(RequestDescriptor::new(Method::GET, path, options)).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<ResponseBody, ClientError> {
        self.request(RequestDescriptor::new(Method::POST, path, options.body(body)))
            .await
    }

    pub async fn put(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<ResponseBody, ClientError> {
        self.request(RequestDescriptor::new(Method::PUT, path, options.body(body)))
            .await
    }

    pub async fn patch(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<ResponseBody, ClientError> {
        self.request(RequestDescriptor::new(Method::PATCH, path, options.body(body)))
            .await
    }

    /// DELETE may carry a body through `options.body`.
    pub async fn delete(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ResponseBody, ClientError> {
        self.request(RequestDescriptor::new(Method::DELETE, path, options))
            .await
    }

    // ===== Typed helpers =====

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ClientError> {
        self.get(path, options).await?.decode()
    }

    pub async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ClientError> {
        self.request(RequestDescriptor::new(method, path, options))
            .await?
            .decode()
    }
}

/// Race `fut` against the cancellation token, if any.
async fn with_cancel<T, F>(cancel: Option<&CancellationToken>, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(ClientError::Cancelled),
                result = fut => result,
            }
        }
        None => fut.await,
    }
}
