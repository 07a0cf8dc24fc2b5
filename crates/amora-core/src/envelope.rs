//! Per-request envelope carried through the middleware chain.
//!
//! The envelope is created at ingress, mutated only by middleware in the
//! normative order, and dropped once the response has been written. Handlers
//! read it from request extensions; only the authentication layer writes
//! `principal` after a credential has been verified.

use axum::http::{Extensions, HeaderMap};
use uuid::Uuid;

/// Who is making the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Principal {
    #[default]
    Unauthenticated,
    User(i64),
    Admin(i64),
}

impl Principal {
    pub fn user_id(&self) -> Option<i64> {
        match self {
            Principal::User(id) => Some(*id),
            _ => None,
        }
    }

    pub fn admin_id(&self) -> Option<i64> {
        match self {
            Principal::Admin(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Principal::Unauthenticated)
    }
}

/// W3C-compatible trace identifiers for one service hop.
///
/// `trace_id` is 32 lowercase hex chars (128-bit), `span_id` 16 (64-bit).
/// A new span is created per hop; the upstream span becomes the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
}

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACE_ID_HEADER: &str = "x-trace-id";
pub const SPAN_ID_HEADER: &str = "x-span-id";
pub const PARENT_SPAN_ID_HEADER: &str = "x-parent-span-id";

fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

impl TraceContext {
    /// Fresh root context with no parent.
    pub fn generate() -> Self {
        Self {
            trace_id: new_trace_id(),
            span_id: new_span_id(),
            parent_span_id: None,
        }
    }

    /// Extract a context from inbound headers.
    ///
    /// The custom `X-Trace-ID`/`X-Span-ID` headers win; the W3C
    /// `traceparent` header is the fallback. Missing fields are regenerated.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut trace_id = header_str(headers, TRACE_ID_HEADER).map(str::to_owned);
        let mut span_id = header_str(headers, SPAN_ID_HEADER).map(str::to_owned);
        let parent_span_id = header_str(headers, PARENT_SPAN_ID_HEADER).map(str::to_owned);

        if trace_id.is_none() || span_id.is_none() {
            if let Some(traceparent) = header_str(headers, TRACEPARENT_HEADER) {
                let parts: Vec<&str> = traceparent.split('-').collect();
                if parts.len() >= 3 {
                    trace_id.get_or_insert_with(|| parts[1].to_string());
                    span_id.get_or_insert_with(|| parts[2].to_string());
                }
            }
        }

        Self {
            trace_id: trace_id.unwrap_or_else(new_trace_id),
            span_id: span_id.unwrap_or_else(new_span_id),
            parent_span_id,
        }
    }

    /// Child context for an outbound call: same trace, new span, this span
    /// as parent.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            parent_span_id: Some(self.span_id.clone()),
        }
    }

    /// `00-{trace_id}-{span_id}-01` wire form.
    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }

    /// Header set carrying this context (custom headers plus `traceparent`).
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (TRACE_ID_HEADER, self.trace_id.clone()),
            (SPAN_ID_HEADER, self.span_id.clone()),
        ];
        if let Some(parent) = &self.parent_span_id {
            headers.push((PARENT_SPAN_ID_HEADER, parent.clone()));
        }
        headers.push((TRACEPARENT_HEADER, self.traceparent()));
        headers
    }
}

/// Request-scoped metadata owned by the fabric, distinct from the domain
/// payload.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub trace: TraceContext,
    /// Opaque string identifying the logical user action across services.
    pub correlation_id: String,
    /// Short per-process identifier for log joining.
    pub request_id: String,
    pub principal: Principal,
    pub api_version: String,
    /// Caller-provided key on idempotent writes; forwarded verbatim.
    pub idempotency_key: Option<String>,
}

impl RequestEnvelope {
    pub fn new(trace: TraceContext, idempotency_key: Option<String>) -> Self {
        Self {
            trace,
            correlation_id: String::new(),
            request_id: String::new(),
            principal: Principal::Unauthenticated,
            api_version: "v1".to_string(),
            idempotency_key,
        }
    }

    /// Envelope with a fresh root trace, used when a layer runs without the
    /// tracing layer above it (the gateway's reduced stack).
    pub fn empty() -> Self {
        Self::new(TraceContext::generate(), None)
    }
}

/// Fetch the envelope from request extensions, inserting a fresh one when
/// the current stack has not created it yet.
pub fn ensure_envelope(extensions: &mut Extensions) -> &mut RequestEnvelope {
    if extensions.get::<RequestEnvelope>().is_none() {
        extensions.insert(RequestEnvelope::empty());
    }
    extensions
        .get_mut::<RequestEnvelope>()
        .expect("envelope inserted above")
}
