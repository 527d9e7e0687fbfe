//! # Outbound HTTP Client
//!
//! Every call the mock platform makes to a connector goes through here so
//! that it lands in the ledger at the moment it is initiated.

use crate::ledger::{Direction, Exchange, Ledger, parse_body, parse_query};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Errors from the outbound client layer.
#[derive(Debug)]
pub enum ClientError {
    /// The request could not be built (bad url, bad header).
    InvalidRequest(String),
    /// Cannot reach the target.
    ConnectionFailed(String),
    /// Target answered with a non-success status.
    Status(u16, String),
    /// Failed to parse response body.
    ParseError(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {msg}"),
            Self::ConnectionFailed(url) => write!(f, "Cannot connect to {url}"),
            Self::Status(status, body) => write!(f, "Unexpected status ({status}): {body}"),
            Self::ParseError(msg) => write!(f, "Parse error: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

/// Description of one outbound call.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub query: Vec<(&'static str, String)>,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(reqwest::Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(reqwest::Method::POST, url)
    }

    fn new(method: reqwest::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn query(mut self, params: Vec<(&'static str, String)>) -> Self {
        self.query.extend(params);
        self
    }

    #[must_use]
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// HTTP client that records each call in the ledger before sending it.
#[derive(Clone)]
pub struct OutboundClient {
    http: reqwest::Client,
    ledger: Arc<Ledger>,
}

impl OutboundClient {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            http: reqwest::Client::new(),
            ledger,
        }
    }

    /// Build the request and capture it as an outbound exchange.
    ///
    /// The ledger position is taken here, before anything is sent.
    pub fn prepare(&self, request: OutboundRequest) -> Result<PreparedCall, ClientError> {
        let mut builder = self.http.request(request.method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let built = builder
            .build()
            .map_err(|e| ClientError::InvalidRequest(format!("{}: {e}", request.url)))?;

        self.ledger
            .capture(Direction::Outbound, exchange_of(&built));

        Ok(PreparedCall {
            http: self.http.clone(),
            request: built,
        })
    }

    /// Capture and send, returning the raw response.
    pub async fn send(&self, request: OutboundRequest) -> Result<reqwest::Response, ClientError> {
        self.prepare(request)?.send().await
    }

    /// Capture and send, requiring success and a JSON body.
    pub async fn send_json(&self, request: OutboundRequest) -> Result<Value, ClientError> {
        let resp = self.send(request).await?;
        handle_response(resp).await
    }
}

/// A captured request ready to be sent.
pub struct PreparedCall {
    http: reqwest::Client,
    request: reqwest::Request,
}

impl PreparedCall {
    pub fn url(&self) -> &str {
        self.request.url().as_str()
    }

    pub async fn send(self) -> Result<reqwest::Response, ClientError> {
        let url = self.request.url().to_string();
        self.http
            .execute(self.request)
            .await
            .map_err(|e| ClientError::ConnectionFailed(format!("{url}: {e}")))
    }

    /// Send and report only the status, failing on non-success.
    pub async fn send_status(self) -> Result<u16, ClientError> {
        let resp = self.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status(status.as_u16(), body));
        }
        Ok(status.as_u16())
    }
}

/// Check the status code and parse JSON.
async fn handle_response(resp: reqwest::Response) -> Result<Value, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Status(status.as_u16(), body));
    }
    resp.json::<Value>()
        .await
        .map_err(|e| ClientError::ParseError(e.to_string()))
}

fn exchange_of(request: &reqwest::Request) -> Exchange {
    let url = request.url();
    let headers: BTreeMap<String, String> = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    let body = request
        .body()
        .and_then(reqwest::Body::as_bytes)
        .map(parse_body)
        .unwrap_or(Value::Null);
    Exchange {
        method: request.method().as_str().to_string(),
        path: url.path().to_string(),
        url: Some(url.to_string()),
        headers,
        query: url.query().map(parse_query).unwrap_or_default(),
        body,
    }
}
