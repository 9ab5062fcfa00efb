use thiserror::Error;

/// Classified failure of a remote call, a poll loop or a user action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("{0}")]
    Validation(String),

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("job did not finish after {attempts} status checks")]
    JobTimedOut { attempts: u32 },

    #[error("maximum retry attempts ({limit}) reached")]
    RetryLimitReached { limit: u32 },

    #[error("could not write {path}: {message}")]
    Io { path: String, message: String },

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;

impl WorkflowError {
    /// Text shown next to the controls of the stage that failed.
    pub fn user_message(&self) -> String {
        match self {
            WorkflowError::Network(_) => {
                "Could not reach the story service. Check your connection and try again.".to_string()
            }
            WorkflowError::Server { message, .. } => message.clone(),
            WorkflowError::MalformedResponse(_) => {
                "The story service returned an unexpected response.".to_string()
            }
            WorkflowError::Validation(message) => message.clone(),
            WorkflowError::JobFailed(details) => {
                if details.is_empty() {
                    "The job failed on the server.".to_string()
                } else {
                    format!("The job failed on the server: {}", details)
                }
            }
            WorkflowError::JobTimedOut { .. } => {
                "The job is taking too long. Please retry.".to_string()
            }
            WorkflowError::RetryLimitReached { .. } => {
                "Maximum retry attempts reached. Please submit again.".to_string()
            }
            WorkflowError::Io { path, .. } => format!("Could not save {}.", path),
            WorkflowError::Cancelled => "The request was cancelled.".to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkflowError::Cancelled)
    }
}

impl From<reqwest::Error> for WorkflowError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            WorkflowError::MalformedResponse(e.to_string())
        } else if let Some(status) = e.status() {
            WorkflowError::Server {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            WorkflowError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(e: serde_json::Error) -> Self {
        WorkflowError::MalformedResponse(e.to_string())
    }
}
