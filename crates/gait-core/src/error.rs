//! Error types for the gait analysis pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Missing input: {0}")]
    InputMissing(String),

    #[error("Ambiguous input: {0}")]
    InputAmbiguous(String),

    #[error("Invalid step cycle: {0}")]
    CycleInvalid(String),

    #[error(
        "Degenerate angle {angle} at {time}s: {first} and {second} share the same coordinates"
    )]
    NumericDegenerate {
        angle: String,
        time: f64,
        first: String,
        second: String,
    },

    #[error("Mismatch across subjects at ID {id}: {detail}")]
    CrossSubjectMismatch { id: String, detail: String },

    #[error("Unreadable input format: {0}")]
    IoFormat(String),

    #[error("No valid step cycles left for {subject}")]
    EmptyCycles { subject: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration source error: {0}")]
    Config(String),
}

/// Where an error stops the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Drop the cycle, continue with the subject
    Cycle,
    /// Drop the subject, continue with the group
    Subject,
    /// Abort the whole analysis
    Group,
}

impl Error {
    pub fn scope(&self) -> ErrorScope {
        match self {
            Error::CycleInvalid(_) | Error::NumericDegenerate { .. } => ErrorScope::Cycle,
            Error::CrossSubjectMismatch { .. } => ErrorScope::Group,
            Error::InputMissing(_)
            | Error::InputAmbiguous(_)
            | Error::EmptyCycles { .. }
            | Error::IoFormat(_)
            | Error::Io(_) => ErrorScope::Subject,
            Error::ConfigInvalid(_) | Error::Serialization(_) | Error::Config(_) => {
                ErrorScope::Group
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_classification() {
        assert_eq!(Error::CycleInvalid("x".into()).scope(), ErrorScope::Cycle);
        assert_eq!(
            Error::EmptyCycles { subject: "S1".into() }.scope(),
            ErrorScope::Subject
        );
        assert_eq!(
            Error::CrossSubjectMismatch {
                id: "S2".into(),
                detail: "bin_num".into()
            }
            .scope(),
            ErrorScope::Group
        );
    }

    #[test]
    fn test_degenerate_message_names_joints() {
        let err = Error::NumericDegenerate {
            angle: "Knee".into(),
            time: 0.05,
            first: "Knee".into(),
            second: "Ankle".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Knee"));
        assert!(msg.contains("Ankle"));
        assert!(msg.contains("0.05"));
    }
}
