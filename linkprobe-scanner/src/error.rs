use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP {code}: {reason}")]
    Status { code: u16, reason: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Other error: {0}")]
    Other(String),
}

impl ScanError {
    /// Builds the error for a response whose status is 400 or above.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        let reason = match status.canonical_reason() {
            Some(text) => format!("{} {}", status.as_u16(), text),
            None => status.as_u16().to_string(),
        };
        ScanError::Status {
            code: status.as_u16(),
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_message() {
        let err = ScanError::from_status(reqwest::StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "HTTP 404: 404 Not Found");
    }

    #[test]
    fn test_status_error_without_reason() {
        let status = reqwest::StatusCode::from_u16(499).unwrap();
        let err = ScanError::from_status(status);
        assert_eq!(err.to_string(), "HTTP 499: 499");
    }
}
