use core::error::Error;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to read NodeAllocationState {name}: {message}")]
    ReadFailed { name: String, message: String },
    #[display("Failed to update NodeAllocationState {name}: {message}")]
    UpdateFailed { name: String, message: String },
}

impl Error for KubernetesError {}
