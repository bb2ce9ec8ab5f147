//! Generic HTTP connector.
//!
//! Executes a single `request` operation described by its parameters:
//! `{method, url, headers, query, body}`. Credentials are applied as
//! bearer, basic, or API-key headers depending on their type.

use crate::connector::{Connector, ConnectorInfo, Operation, OperationMetadata, OperationResult};
use crate::credential::CredentialData;
use crate::error::ConnectorError;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};

const REQUEST_OPERATION: &str = "request";
const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// A parsed HTTP request description.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequestSpec {
    /// Upper-case HTTP method.
    pub method: String,
    /// Absolute request URL.
    pub url: String,
    /// Extra headers in declaration order.
    pub headers: Vec<(String, String)>,
    /// Query parameters in declaration order.
    pub query: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<JsonValue>,
}

impl HttpRequestSpec {
    /// Parses operation parameters into a request description.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameters` if `url` is missing or a header, query, or
    /// method value has the wrong shape.
    pub fn from_parameters(parameters: &JsonValue) -> Result<Self, ConnectorError> {
        let invalid = |reason: &str| ConnectorError::InvalidParameters {
            operation: REQUEST_OPERATION.to_string(),
            reason: reason.to_string(),
        };

        let url = parameters
            .get("url")
            .and_then(JsonValue::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| invalid("'url' must be a non-empty string"))?
            .to_string();

        let method = match parameters.get("method") {
            None | Some(JsonValue::Null) => "GET".to_string(),
            Some(JsonValue::String(m)) => m.to_ascii_uppercase(),
            Some(_) => return Err(invalid("'method' must be a string")),
        };

        let headers = string_pairs(parameters.get("headers"))
            .ok_or_else(|| invalid("'headers' must be an object"))?;
        let query = string_pairs(parameters.get("query"))
            .ok_or_else(|| invalid("'query' must be an object"))?;
        let body = parameters.get("body").filter(|b| !b.is_null()).cloned();

        Ok(Self {
            method,
            url,
            headers,
            query,
            body,
        })
    }
}

/// Flattens an optional JSON object into string pairs.
fn string_pairs(value: Option<&JsonValue>) -> Option<Vec<(String, String)>> {
    match value {
        None | Some(JsonValue::Null) => Some(Vec::new()),
        Some(JsonValue::Object(map)) => Some(
            map.iter()
                .map(|(k, v)| {
                    let v = match v {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Some(_) => None,
    }
}

/// A connector that performs HTTP requests with reqwest.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    /// Creates a connector whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::ConnectionFailed {
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    fn apply_credentials(
        request: reqwest::RequestBuilder,
        credentials: Option<&CredentialData>,
    ) -> reqwest::RequestBuilder {
        match credentials {
            None | Some(CredentialData::Custom { .. }) => request,
            Some(CredentialData::BearerToken { token }) => request.bearer_auth(token),
            Some(CredentialData::Oauth2 { access_token, .. }) => request.bearer_auth(access_token),
            Some(CredentialData::BasicAuth { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            Some(CredentialData::ApiKey { key, header_name }) => request.header(
                header_name.as_deref().unwrap_or(DEFAULT_API_KEY_HEADER),
                key,
            ),
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            id: "http".to_string(),
            name: "HTTP Request".to_string(),
            description: "Performs an HTTP request and returns the response".to_string(),
            protocol: "rest".to_string(),
            operations: vec![REQUEST_OPERATION.to_string()],
        }
    }

    #[tracing::instrument(skip(self, operation, credentials), fields(operation = %operation.name))]
    async fn execute(
        &self,
        operation: Operation,
        credentials: Option<&CredentialData>,
    ) -> Result<OperationResult, ConnectorError> {
        if operation.name != REQUEST_OPERATION {
            return Err(ConnectorError::OperationNotSupported {
                operation: operation.name,
            });
        }
        let spec = HttpRequestSpec::from_parameters(&operation.parameters)?;
        let method = reqwest::Method::from_bytes(spec.method.as_bytes()).map_err(|_| {
            ConnectorError::InvalidParameters {
                operation: REQUEST_OPERATION.to_string(),
                reason: format!("unknown method '{}'", spec.method),
            }
        })?;

        let mut request = self.client.request(method, &spec.url).query(&spec.query);
        for (name, value) in &spec.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &spec.body {
            request = request.json(body);
        }
        request = Self::apply_credentials(request, credentials);

        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            tracing::warn!(error = %e, url = %spec.url, "HTTP request failed");
            if e.is_timeout() {
                ConnectorError::Timeout
            } else {
                ConnectorError::ConnectionFailed {
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ConnectorError::RateLimited {
                retry_after_secs: retry_after_secs(response.headers()),
            });
        }
        let text = response
            .text()
            .await
            .map_err(|e| ConnectorError::ProtocolError {
                reason: e.to_string(),
            })?;
        let metadata = OperationMetadata {
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            api_calls: 1,
            rate_limit_remaining: None,
        };

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ConnectorError::AuthenticationFailed {
                reason: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            tracing::warn!(status = %status, url = %spec.url, "HTTP endpoint returned error");
            return Ok(OperationResult::failure(
                format!("HTTP {status}: {text}"),
                metadata,
            ));
        }

        let body = serde_json::from_str(&text).unwrap_or(JsonValue::String(text));
        Ok(OperationResult::success(
            serde_json::json!({ "status": status.as_u16(), "body": body }),
            metadata,
        ))
    }
}

/// Reads a `Retry-After` header given in seconds.
fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
