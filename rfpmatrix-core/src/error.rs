use crate::observability::Stage;
use std::fmt::Display;
use thiserror::Error;

/// Failures surfaced by the extraction core.
///
/// Validation drops and alignment misses are expected outcomes and are
/// counted in run statistics instead of being raised.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unreadable document {path}: {reason}")]
    UnreadableDocument { path: String, reason: String },

    #[error("malformed model output in {stage} stage: {reason}")]
    MalformedModelOutput { stage: Stage, reason: String },

    #[error("model call timed out in {stage} stage")]
    ModelTimeout { stage: Stage },

    #[error("model transport failed in {stage} stage: {reason}")]
    ModelTransport { stage: Stage, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn unreadable(path: impl Display, reason: impl Display) -> Self {
        PipelineError::UnreadableDocument {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_document_level(&self) -> bool {
        matches!(self, PipelineError::UnreadableDocument { .. } | PipelineError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors signalled by a model-call implementation.
///
/// Stages treat every variant the same way: retry once, then fail the batch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("malformed output: {0}")]
    Malformed(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl ModelError {
    pub fn at_stage(self, stage: Stage) -> PipelineError {
        match self {
            ModelError::Malformed(reason) => PipelineError::MalformedModelOutput { stage, reason },
            ModelError::Timeout(_) => PipelineError::ModelTimeout { stage },
            ModelError::Transport(reason) => PipelineError::ModelTransport { stage, reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_maps_to_stage_error() {
        let err = ModelError::Malformed("not json".into()).at_stage(Stage::Classify);
        assert_eq!(
            err.to_string(),
            "malformed model output in classify stage: not json"
        );

        let err = ModelError::Timeout("120s".into()).at_stage(Stage::Ground);
        assert!(matches!(err, PipelineError::ModelTimeout { stage: Stage::Ground }));
    }

    #[test]
    fn test_unreadable_is_document_level() {
        let err = PipelineError::unreadable("a.pdf", "encrypted");
        assert!(err.is_document_level());
        assert_eq!(err.to_string(), "unreadable document a.pdf: encrypted");
    }
}
