use thiserror::Error;

/// What the driver should do with a failed reconcile: retry with backoff,
/// or park the object until its spec changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Retryable,
    Fatal,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid resource reference: {0}")]
    InvalidReference(String),
    #[error("source not found: {0}")]
    SourceMissing(String),
    #[error("write conflict on {0}")]
    Conflict(String),
    #[error("rejected by api server: {0}")]
    Rejected(String),
    #[error("reconcile deadline exceeded")]
    DeadlineExceeded,
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl ReconcileError {
    pub fn severity(&self) -> Severity {
        match self {
            ReconcileError::InvalidReference(_)
            | ReconcileError::SourceMissing(_)
            | ReconcileError::Rejected(_)
            | ReconcileError::Serde(_) => Severity::Fatal,
            ReconcileError::Conflict(_) | ReconcileError::DeadlineExceeded => Severity::Retryable,
            // Validation rejections the applier did not already classify
            ReconcileError::Kube(kube::Error::Api(ae)) if matches!(ae.code, 400 | 422) => {
                Severity::Fatal
            }
            // Everything else from the client is transport trouble
            ReconcileError::Kube(_) => Severity::Retryable,
        }
    }
}
