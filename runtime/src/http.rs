// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Async HTTP client wrapping reqwest.
//!
//! Retries on 5xx and transport errors with exponential backoff, and honours
//! `retry-after` on 429. Non-success statuses surface as [`FetchError::Status`].
//! [`HttpClient::send_once`] skips retries for callers that count attempts.

use std::time::Duration;

use crate::error::FetchError;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Default number of in-request retries on 5xx/429/transport failure.
pub const DEFAULT_RETRIES: u32 = 2;

/// A successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// HTTP client for the offline manager and connectivity probe.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(timeout_ms: u64, max_retries: u32) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("geolens/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            client,
            max_retries,
        })
    }

    /// GET a resource.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.send(reqwest::Method::GET, url, None).await
    }

    /// Issue a request with an optional JSON body, retrying transient
    /// failures.
    pub async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<HttpResponse, FetchError> {
        self.send_with_retries(method, url, body, self.max_retries).await
    }

    /// Issue exactly one request. Used where the caller counts attempts
    /// itself and a repeated request would duplicate a mutation.
    pub async fn send_once(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<HttpResponse, FetchError> {
        self.send_with_retries(method, url, body, 0).await
    }

    async fn send_with_retries(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&serde_json::Value>,
        max_retries: u32,
    ) -> Result<HttpResponse, FetchError> {
        let mut retries = 0u32;

        loop {
            let mut builder = self.client.request(method.clone(), url);
            if let Some(json) = body {
                builder = builder.json(json);
            }

            match builder.send().await {
                Ok(r) => {
                    let status = r.status().as_u16();

                    // Retry on 5xx
                    if status >= 500 && retries < max_retries {
                        retries += 1;
                        tokio::time::sleep(backoff(retries)).await;
                        continue;
                    }

                    // Backoff on 429
                    if status == 429 && retries < max_retries {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(2);
                        tokio::time::sleep(Duration::from_secs(retry_after.min(10))).await;
                        continue;
                    }

                    if !r.status().is_success() {
                        return Err(FetchError::Status {
                            url: url.to_string(),
                            status,
                        });
                    }

                    let content_type = r
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let body = r.bytes().await.map_err(|e| transport(url, &e))?;

                    return Ok(HttpResponse {
                        url: url.to_string(),
                        status,
                        content_type,
                        body: body.to_vec(),
                    });
                }
                Err(e) => {
                    if retries < max_retries {
                        retries += 1;
                        tokio::time::sleep(backoff(retries)).await;
                        continue;
                    }
                    return Err(transport(url, &e));
                }
            }
        }
    }

    /// Whether `url` answers at all. Any HTTP status counts as reachable.
    pub async fn probe(&self, url: &str) -> bool {
        self.client.head(url).send().await.is_ok()
    }
}

fn backoff(retry: u32) -> Duration {
    Duration::from_millis(500 * 2u64.pow(retry.saturating_sub(1)))
}

fn transport(url: &str, e: &reqwest::Error) -> FetchError {
    FetchError::Transport {
        url: url.to_string(),
        message: e.to_string(),
    }
}
