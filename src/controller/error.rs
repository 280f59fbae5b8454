use crate::crd::runner::RunnerKey;
use crate::k8s::error::K8sError;
use crate::wire::error::WireError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("{0}")]
    K8s(#[from] K8sError),

    #[error("wire: {0}")]
    Wire(#[from] WireError),

    #[error("the wire of `{0}` lost its agent identity")]
    InvalidWire(RunnerKey),

    #[error("the object has no namespace")]
    MissingNamespace,

    #[error("finalizer: {0}")]
    Finalizer(String),
}

impl ReconcileError {
    /// Whether the runner identity has to be regenerated.
    pub fn is_unrecoverable(&self) -> bool {
        match self {
            ReconcileError::Wire(err) => err.is_unrecoverable(),
            ReconcileError::InvalidWire(_) => true,
            _ => false,
        }
    }
}
