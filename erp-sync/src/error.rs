use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Store(#[from] storage::StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed for database {database}: {message}")]
    Authentication { database: String, message: String },

    #[error("ERP call rejected: {message}")]
    Rpc { message: String },

    #[error("Unsupported entity type: {0}")]
    UnsupportedType(String),

    #[error("Tenant not provisioned: {0}")]
    TenantNotProvisioned(String),

    #[error("Broker API error: {status} - {message}")]
    BrokerApi { status: u16, message: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid webhook payload: {0}")]
    InvalidWebhookPayload(String)
}

impl SyncError {
    /// Transport-level failures may succeed on a later run; classification
    /// and credential failures will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Store(_) | Self::BrokerApi { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_type_is_not_retryable() {
        let err = SyncError::UnsupportedType("RoadSegment".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Unsupported entity type: RoadSegment");
    }

    #[test]
    fn test_broker_api_error_is_retryable() {
        let err = SyncError::BrokerApi {
            status: 503,
            message: "unavailable".to_string()
        };
        assert!(err.is_retryable());
    }
}
