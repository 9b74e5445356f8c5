//! Service error taxonomy.
//!
//! Internal plumbing returns [`anyhow::Result`]; the service boundary
//! classifies failures into [`TutorError`] so the HTTP layer can choose a
//! status code and decide whether the failure belongs in the error sink.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TutorError {
    /// Malformed JSON or a missing required field. Never logged to the sink.
    #[error("{0}")]
    ClientInput(String),

    /// The source-hosting API answered with a non-success status.
    #[error("{message}")]
    Upstream {
        status: u16,
        message: String,
        details: String,
    },

    /// No artifacts, no recognizable structure, or a missing file.
    #[error("{0}")]
    NotFound(String),

    /// Store, queue, or network failure on our side.
    #[error(transparent)]
    Transient(#[from] anyhow::Error),

    /// The tutorial flow engine failed or timed out.
    #[error("{0}")]
    Generation(String),
}

impl TutorError {
    pub fn client(message: impl Into<String>) -> Self {
        Self::ClientInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Stable machine-readable tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientInput(_) => "client_input",
            Self::Upstream { .. } => "upstream",
            Self::NotFound(_) => "not_found",
            Self::Transient(_) => "transient",
            Self::Generation(_) => "generation",
        }
    }

    /// Whether this failure should be persisted to the error sink.
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Generation(_))
    }
}

pub type TutorResult<T> = std::result::Result<T, TutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_operational_failures_are_recorded() {
        assert!(!TutorError::client("Invalid JSON").is_recorded());
        assert!(!TutorError::not_found("File not found").is_recorded());
        assert!(TutorError::Transient(anyhow::anyhow!("disk full")).is_recorded());
        assert!(TutorError::Generation("boom".into()).is_recorded());
    }

    #[test]
    fn transient_preserves_anyhow_context() {
        let err: TutorError = anyhow::anyhow!("root cause").context("listing tutorials").into();
        assert_eq!(err.kind(), "transient");
        assert_eq!(err.to_string(), "listing tutorials");
        if let TutorError::Transient(inner) = err {
            assert_eq!(format!("{:#}", inner), "listing tutorials: root cause");
        }
    }
}
