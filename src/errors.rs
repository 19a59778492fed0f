use std::sync::Arc;
use thiserror::Error;

/// Failure taxonomy for the decisioning engine. Faults local to one fetch or
/// one rule never abort a whole request; they are routed through the
/// configured [`ErrorReporter`] and evaluation continues.
#[derive(Debug, Error)]
pub enum DecisioningError {
    #[error("artifact fetch failed: {0}")]
    ArtifactFetch(String),

    #[error("artifact rejected: {0}")]
    ArtifactParse(String),

    #[error("rule evaluation failed: {0}")]
    RuleEvaluation(String),

    #[error("remote delivery call failed: {0}")]
    RemoteDelivery(String),
}

impl DecisioningError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecisioningError::ArtifactFetch(_) => ErrorKind::ArtifactFetch,
            DecisioningError::ArtifactParse(_) => ErrorKind::ArtifactParse,
            DecisioningError::RuleEvaluation(_) => ErrorKind::RuleEvaluation,
            DecisioningError::RemoteDelivery(_) => ErrorKind::RemoteDelivery,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ArtifactFetch,
    ArtifactParse,
    RuleEvaluation,
    RemoteDelivery,
}

/// Host-application hook for surfacing internal faults. The engine never
/// panics or returns errors to request callers for these; it reports and
/// degrades.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &DecisioningError);
}

/// Default reporter: forwards everything to the `log` facade.
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: &DecisioningError) {
        log::warn!("{error}");
    }
}

pub type SharedReporter = Arc<dyn ErrorReporter>;

pub fn report(reporter: &SharedReporter, error: DecisioningError) {
    reporter.report(&error);
}
