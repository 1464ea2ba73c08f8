use crate::messages;

/// Failure categories surfaced by the generation path and the file input boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StudioError {
    /// Rejected before any network call.
    #[error("{0}")]
    Validation(String),

    #[error("{}", messages::MISSING_CREDENTIAL)]
    Configuration,

    #[error("{}", messages::QUOTA_EXCEEDED)]
    QuotaExceeded,

    #[error("{}", messages::INVALID_CREDENTIAL)]
    InvalidCredential,

    #[error("{}", messages::NO_IMAGE_RETURNED)]
    NoImageReturned,

    #[error("Failed to read image file {path}: {reason}")]
    FileRead { path: String, reason: String },

    /// Unclassified upstream failure carrying the original message.
    #[error("{0}")]
    Upstream(String),
}

impl StudioError {
    /// Text shown to the user once the failure reaches the action handler.
    pub fn user_message(&self) -> String {
        match self {
            StudioError::NoImageReturned => {
                format!("{}: {}", messages::GENERATION_FAILED, messages::NO_IMAGE_RETURNED)
            }
            StudioError::Upstream(message) => {
                format!("{}: {}", messages::GENERATION_FAILED, message)
            }
            other => other.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StudioError::Validation(_) => "validation",
            StudioError::Configuration => "configuration",
            StudioError::QuotaExceeded => "quota_exceeded",
            StudioError::InvalidCredential => "invalid_credential",
            StudioError::NoImageReturned => "no_image_returned",
            StudioError::FileRead { .. } => "file_read",
            StudioError::Upstream(_) => "upstream",
        }
    }
}

pub type StudioResult<T> = Result<T, StudioError>;

#[cfg(test)]
mod tests {
    use super::StudioError;
    use crate::messages;

    #[test]
    fn remediation_errors_render_catalog_text() {
        assert_eq!(StudioError::QuotaExceeded.user_message(), messages::QUOTA_EXCEEDED);
        assert_eq!(
            StudioError::InvalidCredential.user_message(),
            messages::INVALID_CREDENTIAL
        );
        assert_eq!(
            StudioError::Configuration.user_message(),
            messages::MISSING_CREDENTIAL
        );
    }

    #[test]
    fn upstream_errors_keep_original_message() {
        let err = StudioError::Upstream("Gemini request failed (500): boom".to_string());
        assert_eq!(err.to_string(), "Gemini request failed (500): boom");
        assert!(err.user_message().ends_with("Gemini request failed (500): boom"));
        assert_eq!(err.kind(), "upstream");
    }
}
