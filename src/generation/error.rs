use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("Invalid value '{raw_value}' for {key}: {reason}")]
    InvalidParameter {
        key: String,
        raw_value: String,
        reason: String,
    },
    #[error("Image API request failed: {0}")]
    RemoteError(String),
    #[error("Image generation job failed: {0}")]
    JobFailed(String),
    #[error("Image generation timed out after {}s", waited.as_secs())]
    TimedOut { waited: Duration },
    #[error("Unrecognized image API response: {0}")]
    UnrecognizedResponse(String),
    #[error("Image generation was cancelled")]
    Cancelled,
}

impl GenerationError {
    pub fn invalid(key: &str, raw_value: &str, reason: impl Into<String>) -> Self {
        GenerationError::InvalidParameter {
            key: key.to_string(),
            raw_value: raw_value.to_string(),
            reason: reason.into(),
        }
    }

    /// Short machine-friendly label, used in timing logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::InvalidParameter { .. } => "invalid_parameter",
            GenerationError::RemoteError(_) => "remote_error",
            GenerationError::JobFailed(_) => "job_failed",
            GenerationError::TimedOut { .. } => "timed_out",
            GenerationError::UnrecognizedResponse(_) => "unrecognized_response",
            GenerationError::Cancelled => "cancelled",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::TimedOut { .. } | GenerationError::RemoteError(_)
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            GenerationError::InvalidParameter { .. } => {
                format!("{self}. Fix the value and try again.")
            }
            GenerationError::RemoteError(detail) => {
                format!("The image service could not be reached: {detail}")
            }
            GenerationError::JobFailed(detail) => {
                format!("The image service reported a failure: {detail}")
            }
            GenerationError::TimedOut { waited } => format!(
                "The image took longer than {}s to generate. Please try again.",
                waited.as_secs()
            ),
            GenerationError::UnrecognizedResponse(_) => {
                "The image service returned something I could not read.".to_string()
            }
            GenerationError::Cancelled => "Image generation cancelled.".to_string(),
        }
    }
}

/// Transport-level failure from a single backend call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    pub retryable: bool,
}

impl BackendError {
    pub fn retryable(message: impl Into<String>) -> Self {
        BackendError {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        BackendError {
            message: message.into(),
            retryable: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_parameter_message_names_the_field() {
        let err = GenerationError::invalid("width", "abc", "expected a whole number");
        assert_eq!(
            err.user_message(),
            "Invalid value 'abc' for width: expected a whole number. Fix the value and try again."
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn timeout_is_retryable_but_job_failure_is_not() {
        let timed_out = GenerationError::TimedOut {
            waited: Duration::from_secs(300),
        };
        assert!(timed_out.is_retryable());
        assert!(timed_out.user_message().contains("300s"));
        assert!(!GenerationError::JobFailed("nsfw".to_string()).is_retryable());
    }
}
