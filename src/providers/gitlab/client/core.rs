use graphql_client::{QueryBody, Response as GraphQLResponse};
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

use crate::auth::Token;
use crate::error::{PipeguardError, Result};

const MAX_CONCURRENT_REQUESTS: usize = 16;
pub(super) const PAGE_SIZE: usize = 100;

/// Exponential backoff applied to connection errors, 429 and 5xx answers.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), capped at `max_backoff`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}

pub struct GitLabClient {
    client: Client,
    instance_url: String,
    api_url: Url,
    graphql_url: Url,
    token: Option<Token>,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
}

impl GitLabClient {
    pub fn new(
        base_url: &str,
        token: Option<Token>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("pipeguard/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PipeguardError::Config(format!("Failed to create HTTP client: {e}")))?;

        let instance_url = base_url.trim_end_matches('/').to_string();
        let base = Url::parse(&format!("{instance_url}/"))
            .map_err(|e| PipeguardError::Config(format!("Invalid base URL: {e}")))?;

        let api_url = base
            .join("api/v4/")
            .map_err(|e| PipeguardError::Config(format!("Invalid API base URL: {e}")))?;
        let graphql_url = base
            .join("api/graphql")
            .map_err(|e| PipeguardError::Config(format!("Invalid GraphQL URL: {e}")))?;

        Ok(Self {
            client,
            instance_url,
            api_url,
            graphql_url,
            token,
            retry,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        })
    }

    /// Instance URL without trailing slash, e.g. `https://gitlab.com`.
    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    pub fn auth_request(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token.as_str())
        } else {
            request
        }
    }

    /// REST endpoint under `api/v4/`. Each segment is percent-encoded on its
    /// own, so a project path like `group/app` stays a single segment.
    pub(super) fn api_endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| PipeguardError::Config(format!("Invalid API base URL: {}", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request, retrying on connection errors, timeouts, 429 and 5xx.
    /// Any other non-success status becomes `ApiError`.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| PipeguardError::Api(format!("Request limiter closed: {e}")))?;

        let mut retry_count = 0;
        loop {
            let response = match self.auth_request(build()).send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    if retry_count >= self.retry.max_retries {
                        return Err(e.into());
                    }
                    let delay = self.retry.delay(retry_count);
                    warn!(
                        "Network error ({e}), retrying in {:.1}s ({}/{})...",
                        delay.as_secs_f64(),
                        retry_count + 1,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= self.retry.max_retries {
                    return Err(PipeguardError::ApiErrorAfterRetries {
                        status: status.as_u16(),
                        retries: self.retry.max_retries,
                    });
                }
                let delay = self.retry.delay(retry_count);
                warn!(
                    "GitLab API error (status {status}). Waiting {:.1}s before retry {}/{}...",
                    delay.as_secs_f64(),
                    retry_count + 1,
                    self.retry.max_retries
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                return Err(PipeguardError::ApiError {
                    status: status.as_u16(),
                    message: error_text,
                });
            }

            return Ok(response);
        }
    }

    pub(super) async fn get_json<T>(&self, url: &Url, query: &[(&str, &str)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        debug!("GET {url}");
        let response = self
            .send_with_retry(|| self.client.get(url.clone()).query(query))
            .await?;
        Ok(response.json().await?)
    }

    pub(super) async fn get_text(&self, url: &Url, query: &[(&str, &str)]) -> Result<String> {
        debug!("GET {url}");
        let response = self
            .send_with_retry(|| self.client.get(url.clone()).query(query))
            .await?;
        Ok(response.text().await?)
    }

    /// Collect every page of a REST list endpoint.
    pub(super) async fn get_paginated<T>(&self, url: &Url) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let per_page = PAGE_SIZE.to_string();
        let mut items = Vec::new();
        let mut page = 1usize;

        loop {
            let page_param = page.to_string();
            let batch: Vec<T> = self
                .get_json(url, &[("per_page", &per_page), ("page", &page_param)])
                .await?;
            let count = batch.len();
            items.extend(batch);
            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    /// Run a GraphQL operation and return its `data`, failing on any reported error.
    pub(super) async fn execute_graphql_request<V, T>(
        &self,
        operation_name: &'static str,
        query: &'static str,
        variables: V,
    ) -> Result<T>
    where
        V: Serialize,
        T: DeserializeOwned,
    {
        let body = QueryBody {
            variables,
            query,
            operation_name,
        };
        debug!("GraphQL {operation_name}");

        let response = self
            .send_with_retry(|| self.client.post(self.graphql_url.clone()).json(&body))
            .await?;
        let response_body: GraphQLResponse<T> = response.json().await?;

        if let Some(errors) = response_body.errors {
            if !errors.is_empty() {
                return Err(PipeguardError::GraphQLError {
                    query_type: operation_name.to_string(),
                    errors: errors
                        .iter()
                        .map(|e| e.message.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
        }

        response_body.data.ok_or(PipeguardError::NoResponseData)
    }
}

/// Cursor pagination info returned by GitLab connections.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PageInfo {
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub end_cursor: Option<String>,
}
