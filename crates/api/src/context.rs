use heroes_infra::CorrelationId;

/// Per-request context inserted by the request-id middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    request_id: String,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Correlation id for jobs triggered by this request.
    pub fn correlation_id(&self) -> CorrelationId {
        CorrelationId::from(self.request_id.as_str())
    }
}
