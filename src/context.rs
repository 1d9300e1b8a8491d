//! Request-scoped context passed explicitly through every workflow

use uuid::Uuid;

/// Header carrying the trace id in and out of the HTTP boundary
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub trace_id: String,
}

impl RequestContext {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
        }
    }

    /// Context with a freshly generated trace id
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().simple().to_string())
    }

    /// Use the caller's trace id when it is usable, otherwise generate one
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(id) if !id.is_empty() && id.len() <= 128 && id.is_ascii() => Self::new(id),
            _ => Self::generate(),
        }
    }
}
