use thiserror::Error;

/// Unified error type for the engine.
/// All fallible functions return `Result<T, EngineError>` instead of String errors.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("user is not logged in")]
    Unauthenticated,

    #[error("user {user} is not enrolled in semester {semester}")]
    NotEnrolled { user: String, semester: String },

    #[error("teachers cannot enroll in their own course")]
    IsTeacher,

    #[error("join code does not match")]
    BadJoinCode,

    #[error("join code expired")]
    JoinCodeExpired,

    #[error("theory of parent topic {parent_topic} has not been reached yet")]
    PrerequisiteNotMet { parent_topic: String },

    #[error("practice requested before theory was started in any topic")]
    TheoryNotStarted,

    #[error("theory of topic {topic} is already completed")]
    TopicTheoryDone { topic: String },

    #[error("practice of topic {topic} is already completed")]
    TopicPracticeDone { topic: String },

    #[error("no problem available")]
    NoProblemAvailable,

    #[error("attempt limit for problem {problem} is exhausted")]
    AttemptsExhausted { problem: String },

    #[error("problem {problem} is already solved")]
    AlreadySolved { problem: String },

    #[error("bad answer payload: {reason}")]
    BadPayload { reason: String },

    #[error("content inconsistency: {reason}")]
    ContentInconsistency { reason: String },

    #[error("storage error: {reason}")]
    Storage { reason: String },

    #[error("sandbox error: {reason}")]
    Sandbox { reason: String },
}

impl EngineError {
    pub fn bad_payload<S: Into<String>>(reason: S) -> Self {
        EngineError::BadPayload {
            reason: reason.into(),
        }
    }

    pub fn inconsistency<S: Into<String>>(reason: S) -> Self {
        EngineError::ContentInconsistency {
            reason: reason.into(),
        }
    }

    /// Transient errors are retried at the facade level; domain errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Storage { .. })
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage {
            reason: format!("I/O error: {err}"),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Storage {
            reason: format!("JSON error: {err}"),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Sandbox {
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
