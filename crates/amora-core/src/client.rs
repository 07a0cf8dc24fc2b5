//! Resilience-wrapped outbound HTTP client.
//!
//! Every inter-service call carries the caller's correlation ID, creates a
//! child span and forwards its ids, is wrapped by the circuit breaker (and
//! optionally retry), and logs a structured `trace_propagation` record.
//! Transport errors and upstream 5xx are raised so the breaker observes
//! them; upstream 4xx envelopes are returned to the caller untouched.

use std::sync::Arc;
use std::time::Duration;

pub use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;

use crate::envelope::RequestEnvelope;
use crate::error::{ApiError, ApiResult};
use crate::middleware::correlation::CORRELATION_ID_HEADER;
use crate::resilience::breaker::BreakerObservable;
use crate::resilience::{BreakerConfig, BreakerError, CircuitBreaker, RetryPolicy};

/// Default service-to-service deadline; the gateway uses its own longer one.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error calling {service}: {source}")]
    Transport {
        service: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned HTTP {status}")]
    UpstreamServer {
        service: String,
        status: u16,
        body: Value,
    },
}

impl ClientError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport { .. })
    }
}

impl BreakerObservable for ClientError {
    fn counts_as_failure(&self) -> bool {
        // Both transport failures and upstream 5xx open the circuit;
        // upstream 4xx never reaches this type.
        true
    }
}

/// Upstream response below the 5xx range.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub status: u16,
    pub body: Value,
}

impl ServiceResponse {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// Success body, or the upstream 4xx envelope surfaced verbatim.
    pub fn into_result(self) -> ApiResult<Value> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(ApiError::Upstream {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// One outbound request.
pub struct OutboundCall<'a> {
    pub method: Method,
    pub path: &'a str,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Bearer token forwarded verbatim, when the downstream needs the
    /// caller's credential.
    pub bearer: Option<String>,
}

impl<'a> OutboundCall<'a> {
    pub fn get(path: &'a str) -> Self {
        Self {
            method: Method::GET,
            path,
            query: Vec::new(),
            body: None,
            bearer: None,
        }
    }

    pub fn post(path: &'a str, body: Value) -> Self {
        Self {
            method: Method::POST,
            path,
            query: Vec::new(),
            body: Some(body),
            bearer: None,
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }
}

/// Client for one downstream dependency, identified by logical name.
pub struct ServiceClient {
    caller: String,
    target: String,
    base_url: String,
    http: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    retry: Option<RetryPolicy>,
}

impl ServiceClient {
    pub fn new(
        caller: &str,
        target: &str,
        base_url: &str,
        breaker_config: BreakerConfig,
        retry: Option<RetryPolicy>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .expect("reqwest client construction");
        Self {
            caller: caller.to_string(),
            target: target.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            breaker: CircuitBreaker::new(caller, target, breaker_config),
            retry,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Headers for one outbound hop: correlation ID, child-span trace ids,
    /// idempotency key, and optional bearer credential.
    fn outbound_headers(&self, call: &OutboundCall<'_>, envelope: &RequestEnvelope) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let insert = |headers: &mut HeaderMap, name: &str, value: &str| {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        };

        if !envelope.correlation_id.is_empty() {
            insert(&mut headers, CORRELATION_ID_HEADER, &envelope.correlation_id);
        }
        let child = envelope.trace.child();
        for (name, value) in child.to_headers() {
            insert(&mut headers, name, &value);
        }
        if let Some(key) = &envelope.idempotency_key {
            insert(&mut headers, "idempotency-key", key);
        }
        if let Some(bearer) = &call.bearer {
            insert(&mut headers, "authorization", &format!("Bearer {bearer}"));
        }
        headers
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        headers: HeaderMap,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<ServiceResponse, ClientError> {
        let mut request = self.http.request(method, &url).headers(headers);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| ClientError::Transport {
            service: self.target.clone(),
            source: e,
        })?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| ClientError::Transport {
            service: self.target.clone(),
            source: e,
        })?;
        let body = serde_json::from_str(&text).unwrap_or_else(|_| json!({ "raw": text }));

        if status >= 500 {
            return Err(ClientError::UpstreamServer {
                service: self.target.clone(),
                status,
                body,
            });
        }
        Ok(ServiceResponse { status, body })
    }

    /// Execute one resilience-wrapped call.
    ///
    /// Breaker-open and transport exhaustion surface as `503 SYS_002`;
    /// upstream 5xx as `502 EXT_001` with the upstream envelope in
    /// `details`; upstream 4xx come back as an [`Ok`] response for the
    /// caller to surface.
    pub async fn call(
        &self,
        call: OutboundCall<'_>,
        envelope: &RequestEnvelope,
    ) -> ApiResult<ServiceResponse> {
        let headers = self.outbound_headers(&call, envelope);
        let url = format!("{}{}", self.base_url, call.path);

        info!(
            event_type = "trace_propagation",
            from_service = %self.caller,
            to_service = %self.target,
            operation = %format!("{} {}", call.method, call.path),
            correlation_id = %envelope.correlation_id,
            trace_id = %envelope.trace.trace_id,
            span_id = %envelope.trace.span_id,
            request_id = %envelope.request_id,
            user_id = envelope.principal.user_id(),
            "outbound call"
        );

        let attempt = || {
            self.breaker.call(self.send(
                call.method.clone(),
                url.clone(),
                headers.clone(),
                &call.query,
                call.body.as_ref(),
            ))
        };

        let result = match &self.retry {
            Some(policy) => {
                policy
                    .run(
                        |e: &BreakerError<ClientError>| {
                            matches!(e, BreakerError::Inner(inner) if inner.is_transport())
                        },
                        attempt,
                    )
                    .await
            }
            None => attempt().await,
        };

        match result {
            Ok(response) => Ok(response),
            Err(BreakerError::Open { target }) => {
                Err(ApiError::ServiceUnavailable { service: target })
            }
            Err(BreakerError::Inner(ClientError::Transport { service, source })) => {
                tracing::warn!(
                    target_service = %service,
                    error = %source,
                    "transport failure after retries"
                );
                Err(ApiError::ServiceUnavailable { service })
            }
            Err(BreakerError::Inner(ClientError::UpstreamServer { service, status, body })) => {
                Err(ApiError::ExternalService {
                    service,
                    message: format!("HTTP {status}"),
                    details: Some(body),
                })
            }
        }
    }

    pub async fn get(&self, path: &str, envelope: &RequestEnvelope) -> ApiResult<ServiceResponse> {
        self.call(OutboundCall::get(path), envelope).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: Value,
        envelope: &RequestEnvelope,
    ) -> ApiResult<ServiceResponse> {
        self.call(OutboundCall::post(path, body), envelope).await
    }
}
