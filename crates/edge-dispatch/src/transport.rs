//! Network transport with status classification and streamed bodies.

use crate::request::Streaming;
use crate::response::global_error_body;
use crate::{DispatchError, DispatchResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

/// Statuses the server uses to ask for a later retry.
pub const RECOVERABLE_STATUS_CODES: [u16; 4] = [408, 429, 503, 504];

/// Extra time allowed on top of connect + read timeouts.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// One POST to the Edge Network.
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub url: Url,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

/// Raw HTTP response. Header names are lowercase.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Performs HTTP exchanges.
#[async_trait]
pub trait NetworkService: Send + Sync {
    async fn send(&self, request: NetworkRequest) -> DispatchResult<HttpResponse>;
}

/// [`NetworkService`] backed by reqwest.
pub struct ReqwestNetworkService {
    client: Client,
}

impl ReqwestNetworkService {
    pub fn new(connect_timeout: Duration) -> DispatchResult<Self> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NetworkService for ReqwestNetworkService {
    async fn send(&self, request: NetworkRequest) -> DispatchResult<HttpResponse> {
        let mut builder = self
            .client
            .post(request.url)
            .timeout(request.connect_timeout + request.read_timeout)
            .body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Receives the outcome of one request.
pub trait ResponseCallback: Send + Sync {
    /// One complete JSON response document.
    fn on_response(&self, content: &str);

    /// One error document.
    fn on_error(&self, content: &str);

    /// No more content will arrive for this request.
    fn on_complete(&self);
}

/// What the caller should do after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The server asked for a retry, optionally after a given delay.
    Retry { retry_after: Option<Duration> },
    /// The request is finished; `on_complete` has been called.
    Done,
}

/// Sends Edge requests and classifies the outcome.
pub struct EdgeNetworkService {
    network: Arc<dyn NetworkService>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl EdgeNetworkService {
    pub fn new(
        network: Arc<dyn NetworkService>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            network,
            connect_timeout,
            read_timeout,
        }
    }

    /// Send one request.
    ///
    /// Success content goes to `on_response`, failures to `on_error`, and
    /// `on_complete` fires exactly once whenever the result is
    /// [`RetryDecision::Done`]. A retry decision invokes no callbacks.
    pub async fn do_request<B>(
        &self,
        url: &Url,
        body: &B,
        headers: &[(String, String)],
        streaming: &Streaming,
        callback: &dyn ResponseCallback,
    ) -> RetryDecision
    where
        B: Serialize + Sync + ?Sized,
    {
        let body = match serde_json::to_vec(body) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to serialize request body, dropping request");
                callback.on_complete();
                return RetryDecision::Done;
            }
        };

        let request = NetworkRequest {
            url: url.clone(),
            body,
            headers: headers.to_vec(),
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
        };

        debug!(url = %url, "Sending request");
        let budget = self.connect_timeout + self.read_timeout + TIMEOUT_GRACE;
        let decision = match tokio::time::timeout(budget, self.network.send(request)).await {
            Ok(Ok(response)) => handle_response(response, streaming, callback),
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "Request failed");
                callback.on_error(&global_error_body(&e.to_string()));
                RetryDecision::Done
            }
            Err(_) => {
                let e = DispatchError::Network(format!(
                    "request timed out after {}ms",
                    budget.as_millis()
                ));
                warn!(url = %url, error = %e, "Request timed out");
                callback.on_error(&global_error_body(&e.to_string()));
                RetryDecision::Done
            }
        };

        if decision == RetryDecision::Done {
            callback.on_complete();
        }
        decision
    }
}

fn handle_response(
    response: HttpResponse,
    streaming: &Streaming,
    callback: &dyn ResponseCallback,
) -> RetryDecision {
    match response.status {
        204 => {
            debug!("Request accepted with no content");
            RetryDecision::Done
        }
        status if (200..300).contains(&status) => {
            handle_content(&response.body, streaming, callback);
            RetryDecision::Done
        }
        status if RECOVERABLE_STATUS_CODES.contains(&status) => {
            let retry_after = parse_retry_after(&response);
            warn!(status, retry_after = ?retry_after, "Recoverable error, will retry");
            RetryDecision::Retry { retry_after }
        }
        status => {
            error!(status, "Request failed");
            callback.on_error(&error_content(&response));
            RetryDecision::Done
        }
    }
}

/// Deliver success content, one callback per streamed record.
pub fn handle_content(body: &str, streaming: &Streaming, callback: &dyn ResponseCallback) {
    let separators = match (&streaming.record_separator, &streaming.line_feed) {
        (Some(rs), Some(lf)) if streaming.enabled => Some((rs.as_str(), lf.as_str())),
        _ => None,
    };

    match separators {
        Some((record_separator, line_feed)) => {
            for fragment in body.split(line_feed) {
                let record = fragment
                    .trim_start_matches(record_separator)
                    .trim_end_matches(record_separator);
                if record.trim().is_empty() {
                    continue;
                }
                callback.on_response(record);
            }
        }
        None => callback.on_response(body),
    }
}

/// Error bodies that are not JSON objects are wrapped as global errors.
fn error_content(response: &HttpResponse) -> String {
    let is_json_object = serde_json::from_str::<serde_json::Value>(&response.body)
        .map(|value| value.is_object())
        .unwrap_or(false);
    if is_json_object {
        return response.body.clone();
    }

    let message = if response.body.trim().is_empty() {
        format!("request failed with status {}", response.status)
    } else {
        response.body.clone()
    };
    global_error_body(&message)
}

fn parse_retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .header("retry-after")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
