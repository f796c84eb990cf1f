//! Error kinds surfaced by the fetch layer and the fold step.

/// Failure of a single fetch (page, enrichment or company list).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// A required filter field or setting is absent. Never reaches the network.
    ConfigurationMissing { field: &'static str },
    /// Network or HTTP-level failure. Retried within the budget.
    TransportFailure { message: String },
    /// The source answered but reported a domain error.
    UpstreamError { status: Option<u16>, message: String },
}

impl FetchError {
    pub fn missing(field: &'static str) -> Self {
        Self::ConfigurationMissing { field }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            message: message.into(),
        }
    }

    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::UpstreamError {
            status,
            message: message.into(),
        }
    }

    /// Only transport failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransportFailure { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigurationMissing { .. } => "configuration_missing",
            Self::TransportFailure { .. } => "transport_failure",
            Self::UpstreamError { .. } => "upstream_error",
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigurationMissing { field } => {
                write!(f, "required field missing: {}", field)
            }
            Self::TransportFailure { message } => write!(f, "transport failure: {}", message),
            Self::UpstreamError {
                status: Some(status),
                message,
            } => write!(f, "upstream error {}: {}", status, message),
            Self::UpstreamError {
                status: None,
                message,
            } => write!(f, "upstream error: {}", message),
        }
    }
}

impl std::error::Error for FetchError {}

/// Folding requires at least one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldError {
    NoPages,
}

impl std::fmt::Display for FoldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPages => write!(f, "cannot fold an empty page sequence"),
        }
    }
}

impl std::error::Error for FoldError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_transient() {
        assert!(FetchError::transport("connection reset").is_transient());
        assert!(!FetchError::upstream(Some(400), "bad filter").is_transient());
        assert!(!FetchError::missing("companyName").is_transient());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            FetchError::upstream(Some(422), "unknown hs code").to_string(),
            "upstream error 422: unknown hs code"
        );
        assert_eq!(
            FetchError::missing("companyName").to_string(),
            "required field missing: companyName"
        );
    }
}
