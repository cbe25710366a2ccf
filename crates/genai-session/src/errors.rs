use crate::live::LiveState;
use crate::model::ProviderId;
use crate::schema::FieldDefect;

/// Errors returned by a provider adapter or live transport before they are
/// normalized for the public session API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Endpoint rejected the call (HTTP status, auth, quota, content policy).
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
    },
    /// Network, connection or stream I/O failed.
    #[error("transport error ({provider}): {message}")]
    Transport {
        provider: ProviderId,
        message: String,
    },
    /// Response shape or event sequencing was invalid.
    #[error("protocol error ({provider}): {message}")]
    Protocol {
        provider: ProviderId,
        message: String,
    },
}

impl ProviderError {
    /// Creates a provider-level error.
    pub fn provider(
        provider: impl Into<ProviderId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Creates a transport-level error.
    pub fn transport(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns the provider associated with this error.
    pub fn provider_id(&self) -> &ProviderId {
        match self {
            Self::Provider { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Protocol { provider, .. } => provider,
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Provider { message, .. }
            | Self::Transport { message, .. }
            | Self::Protocol { message, .. } => message,
        }
    }
}

/// Top-level error type for the public session API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// Invalid client or session configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input to a builder or operation.
    #[error("validation error: {0}")]
    Validation(String),
    /// Normalization met an input shape it cannot turn into content.
    #[error("unsupported content type: {type_name}")]
    UnsupportedContentType { type_name: String },
    /// Normalization produced a message with no parts.
    #[error("content must contain at least one part")]
    EmptyContent,
    /// Network or connection failure during connect, send or streaming.
    #[error("transport error: {0}")]
    Transport(String),
    /// The endpoint rejected the call.
    #[error(transparent)]
    Provider(ProviderError),
    /// Response text is not a syntactically valid JSON document.
    #[error("malformed payload: {message}")]
    MalformedPayload { message: String },
    /// Response parsed but does not satisfy the contract.
    #[error("schema validation failed for `{contract}`: {}", format_defects(.defects))]
    SchemaValidation {
        contract: String,
        defects: Vec<FieldDefect>,
    },
    /// Live session operation invoked in a state that forbids it.
    #[error("cannot {operation} while live session is {state}")]
    InvalidStateTransition {
        operation: &'static str,
        state: LiveState,
    },
    /// The in-flight call was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    pub(crate) fn unsupported(type_name: impl Into<String>) -> Self {
        Self::UnsupportedContentType {
            type_name: type_name.into(),
        }
    }

    pub(crate) fn invalid_state(operation: &'static str, state: LiveState) -> Self {
        Self::InvalidStateTransition { operation, state }
    }

    /// Returns the defect list when this is a schema validation failure.
    pub fn defects(&self) -> Option<&[FieldDefect]> {
        match self {
            Self::SchemaValidation { defects, .. } => Some(defects),
            _ => None,
        }
    }
}

impl From<ProviderError> for SessionError {
    fn from(value: ProviderError) -> Self {
        match value {
            ProviderError::Transport { .. } => SessionError::Transport(value.to_string()),
            other => SessionError::Provider(other),
        }
    }
}

fn format_defects(defects: &[FieldDefect]) -> String {
    defects
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DefectKind;

    #[test]
    fn transport_provider_errors_map_to_transport() {
        let err: SessionError = ProviderError::transport("gemini", "reset by peer").into();
        assert!(matches!(err, SessionError::Transport(msg) if msg.contains("reset by peer")));
    }

    #[test]
    fn rejection_errors_keep_status_code() {
        let err: SessionError = ProviderError::provider("gemini", "quota", Some(429)).into();
        assert!(matches!(
            err,
            SessionError::Provider(ProviderError::Provider {
                status_code: Some(429),
                ..
            })
        ));
    }

    #[test]
    fn schema_validation_message_lists_defects() {
        let err = SessionError::SchemaValidation {
            contract: "Country".into(),
            defects: vec![
                FieldDefect::new("name", DefectKind::Missing),
                FieldDefect::new(
                    "population",
                    DefectKind::TypeMismatch {
                        expected: "integer".into(),
                        found: "string".into(),
                    },
                ),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("`Country`"));
        assert!(text.contains("name: missing"));
        assert!(text.contains("population: expected integer, found string"));
        assert_eq!(err.defects().map(<[_]>::len), Some(2));
    }
}
