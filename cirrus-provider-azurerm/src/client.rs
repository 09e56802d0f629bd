//! ARM REST client
//!
//! Implements [`ManagementClient`] over HTTP:
//!
//! - `GET/PUT/DELETE {endpoint}{id}?api-version=...` with a bearer token
//! - accepted mutations are tracked through `Azure-AsyncOperation`, then
//!   `Location`, then the object's own `provisioningState`
//! - 429 and 5xx answers are retried up to `max_retries` times, honoring
//!   `Retry-After`; anything still failing becomes [`CoreError::Transport`]

use std::time::Duration;

use cirrus_core::{
    BoxFuture, CoreError, CoreResult, ManagementClient, Operation, OperationKind, PollHandle,
    PollStatus, PollStyle, ResourceIdentifier, Submitted,
};
use log::{debug, warn};
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use url::Url;

use crate::config::{ConfigError, ProviderConfig};

const ASYNC_OPERATION: &str = "Azure-AsyncOperation";

/// Maximum length of a response body quoted in logs
const MAX_LOG_BODY_LENGTH: usize = 200;

fn truncate_for_log(body: &str) -> String {
    if body.len() > MAX_LOG_BODY_LENGTH {
        let end = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [{} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    }
}

/// Upper bound on the wait between retries when no `Retry-After` is sent
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Exponential wait before retry `attempt` (1-based), capped at `MAX_BACKOFF`
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt)).min(MAX_BACKOFF)
}

/// One HTTP answer, read to the end
#[derive(Debug)]
struct Reply {
    status: StatusCode,
    async_operation: Option<String>,
    location: Option<String>,
    retry_after: Option<Duration>,
    body: Option<Value>,
    raw: String,
}

fn header(headers: &HeaderMap, name: impl reqwest::header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

impl Reply {
    async fn read(response: reqwest::Response) -> CoreResult<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let raw = response
            .text()
            .await
            .map_err(|e| CoreError::transport(Some(status.as_u16()), e.to_string()))?;

        Ok(Self {
            status,
            async_operation: header(&headers, ASYNC_OPERATION),
            location: header(&headers, LOCATION),
            retry_after: header(&headers, RETRY_AFTER)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
            body: serde_json::from_str(&raw).ok(),
            raw,
        })
    }

    fn is_retryable(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS || self.status.is_server_error()
    }

    /// `{"error": {"code": ..., "message": ...}}`, or the status line
    fn error(&self) -> (String, String) {
        let error = self.body.as_ref().and_then(|b| b.get("error"));
        let field = |name: &str| {
            error
                .and_then(|e| e.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        (
            field("code").unwrap_or_else(|| self.status.as_u16().to_string()),
            field("message").unwrap_or_else(|| {
                self.status
                    .canonical_reason()
                    .unwrap_or("unexpected response")
                    .to_string()
            }),
        )
    }

    fn provisioning_state(&self) -> Option<&str> {
        self.body
            .as_ref()?
            .get("properties")?
            .get("provisioningState")?
            .as_str()
    }
}

fn is_terminal(state: &str) -> bool {
    ["Succeeded", "Failed", "Canceled"]
        .iter()
        .any(|s| s.eq_ignore_ascii_case(state))
}

/// HTTP client for Azure Resource Manager
#[derive(Clone)]
pub struct ArmClient {
    http: Client,
    endpoint: Url,
    token: String,
    max_retries: u32,
}

impl ArmClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let http = Client::builder()
            .user_agent(concat!("cirrus/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint_url()?,
            token: config.access_token.clone(),
            max_retries: config.max_retries,
        })
    }

    fn resource_url(&self, id: &ResourceIdentifier, api_version: &str) -> CoreResult<Url> {
        let mut url = self
            .endpoint
            .join(id.format().trim_start_matches('/'))
            .map_err(|e| CoreError::transport(None, format!("invalid URL for {}: {}", id, e)))?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    /// Send a request, retrying throttled and server-side failures
    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> CoreResult<Reply> {
        let mut attempt = 0;
        loop {
            debug!("{} {}", method, url);
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(&self.token);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .map_err(|e| CoreError::transport(None, e.to_string()))?;
            let reply = Reply::read(response).await?;

            if !reply.is_retryable() {
                return Ok(reply);
            }
            if attempt >= self.max_retries {
                warn!(
                    "{} {} failed after {} attempts: {} {}",
                    method,
                    url,
                    attempt + 1,
                    reply.status,
                    truncate_for_log(&reply.raw)
                );
                let (_, message) = reply.error();
                return Err(CoreError::transport(Some(reply.status.as_u16()), message));
            }

            attempt += 1;
            let delay = reply
                .retry_after
                .unwrap_or_else(|| backoff(attempt));
            warn!(
                "{} {} answered {}, retrying in {:?} (attempt {}/{})",
                method, url, reply.status, delay, attempt, self.max_retries
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn remote_failed(
        &self,
        reply: &Reply,
        target: &ResourceIdentifier,
        operation: OperationKind,
    ) -> CoreError {
        debug!(
            "{} of {} failed: {} {}",
            operation,
            target,
            reply.status,
            truncate_for_log(&reply.raw)
        );
        let (code, message) = reply.error();
        CoreError::RemoteFailed {
            id: target.to_string(),
            operation,
            code,
            message,
        }
    }

    fn poll_url(&self, handle: &PollHandle) -> CoreResult<Url> {
        match (&handle.url, handle.style) {
            (Some(url), PollStyle::AsyncOperation | PollStyle::Location) => Url::parse(url)
                .map_err(|e| CoreError::transport(None, format!("invalid poll URL {}: {}", url, e))),
            _ => self.resource_url(&handle.target, handle.api_version),
        }
    }

    async fn poll_async_operation(&self, handle: &PollHandle) -> CoreResult<PollStatus> {
        let reply = self.send(Method::GET, self.poll_url(handle)?, None).await?;
        if reply.status == StatusCode::NOT_FOUND {
            return Ok(PollStatus::NotFound);
        }
        if !reply.status.is_success() {
            return Err(self.remote_failed(&reply, &handle.target, handle.kind));
        }

        let status = reply
            .body
            .as_ref()
            .and_then(|b| b.get("status"))
            .and_then(Value::as_str)
            .unwrap_or("InProgress");
        Ok(match status.to_ascii_lowercase().as_str() {
            "succeeded" => PollStatus::Succeeded(None),
            "failed" => {
                let (code, message) = reply.error();
                PollStatus::Failed { code, message }
            }
            "canceled" | "cancelled" => PollStatus::Canceled {
                message: reply.error().1,
            },
            _ => PollStatus::InProgress {
                retry_after: reply.retry_after,
            },
        })
    }

    async fn poll_location(&self, handle: &PollHandle) -> CoreResult<PollStatus> {
        let reply = self.send(Method::GET, self.poll_url(handle)?, None).await?;
        Ok(match reply.status {
            StatusCode::ACCEPTED => PollStatus::InProgress {
                retry_after: reply.retry_after,
            },
            StatusCode::NOT_FOUND => PollStatus::NotFound,
            s if s.is_success() => PollStatus::Succeeded(reply.body),
            _ => {
                let (code, message) = reply.error();
                PollStatus::Failed { code, message }
            }
        })
    }

    async fn poll_provisioning_state(&self, handle: &PollHandle) -> CoreResult<PollStatus> {
        let reply = self.send(Method::GET, self.poll_url(handle)?, None).await?;
        if reply.status == StatusCode::NOT_FOUND {
            return Ok(PollStatus::NotFound);
        }
        if !reply.status.is_success() {
            return Err(self.remote_failed(&reply, &handle.target, handle.kind));
        }

        let state = reply.provisioning_state().unwrap_or("Succeeded").to_string();
        Ok(match state.to_ascii_lowercase().as_str() {
            "succeeded" => PollStatus::Succeeded(reply.body),
            "failed" => PollStatus::Failed {
                code: "ProvisioningFailed".to_string(),
                message: format!("{} ended in provisioning state {}", handle.target, state),
            },
            "canceled" => PollStatus::Canceled {
                message: format!("{} ended in provisioning state {}", handle.target, state),
            },
            _ => PollStatus::InProgress {
                retry_after: reply.retry_after,
            },
        })
    }

    /// Decide how an accepted mutation will be tracked
    fn accepted(&self, operation: &Operation, reply: &Reply) -> Option<PollHandle> {
        let handle = |style, url: Option<&String>| PollHandle {
            target: operation.target.clone(),
            kind: operation.kind,
            api_version: operation.api_version,
            style,
            url: url.cloned(),
            retry_after: reply.retry_after,
        };

        if reply.async_operation.is_some() {
            return Some(handle(PollStyle::AsyncOperation, reply.async_operation.as_ref()));
        }
        if reply.status == StatusCode::ACCEPTED {
            return Some(match &reply.location {
                Some(location) => handle(PollStyle::Location, Some(location)),
                None => handle(PollStyle::ProvisioningState, None),
            });
        }
        match reply.provisioning_state() {
            Some(state) if !is_terminal(state) => Some(handle(PollStyle::ProvisioningState, None)),
            _ => None,
        }
    }
}

impl ManagementClient for ArmClient {
    fn get<'a>(
        &'a self,
        id: &'a ResourceIdentifier,
        api_version: &'a str,
    ) -> BoxFuture<'a, CoreResult<Option<Value>>> {
        Box::pin(async move {
            let reply = self
                .send(Method::GET, self.resource_url(id, api_version)?, None)
                .await?;
            match reply.status {
                StatusCode::NOT_FOUND => Ok(None),
                s if s.is_success() => match reply.body {
                    Some(body) => Ok(Some(body)),
                    None => Err(CoreError::transport(
                        Some(s.as_u16()),
                        format!("GET {} returned no JSON body", id),
                    )),
                },
                _ => Err(self.remote_failed(&reply, id, OperationKind::Read)),
            }
        })
    }

    fn submit<'a>(&'a self, operation: &'a Operation) -> BoxFuture<'a, CoreResult<Submitted>> {
        Box::pin(async move {
            let url = self.resource_url(&operation.target, operation.api_version)?;
            let method = match operation.kind {
                OperationKind::Delete => Method::DELETE,
                _ => Method::PUT,
            };

            let reply = self.send(method, url, operation.body.as_ref()).await?;
            if reply.status == StatusCode::NOT_FOUND {
                return Ok(Submitted::NotFound);
            }
            if !reply.status.is_success() {
                return Err(self.remote_failed(&reply, &operation.target, operation.kind));
            }

            match self.accepted(operation, &reply) {
                Some(handle) => {
                    debug!(
                        "{} of {} accepted, tracking via {:?}",
                        operation.kind, operation.target, handle.style
                    );
                    Ok(Submitted::Accepted(handle))
                }
                None => Ok(Submitted::Completed(reply.body)),
            }
        })
    }

    fn poll<'a>(&'a self, handle: &'a PollHandle) -> BoxFuture<'a, CoreResult<PollStatus>> {
        Box::pin(async move {
            match handle.style {
                PollStyle::AsyncOperation => self.poll_async_operation(handle).await,
                PollStyle::Location => self.poll_location(handle).await,
                PollStyle::ProvisioningState => self.poll_provisioning_state(handle).await,
            }
        })
    }
}
