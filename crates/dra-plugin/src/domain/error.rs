use std::path::PathBuf;

use thiserror::Error;

use super::pool::PoolError;

/// Failures reported by a [`super::traits::DeviceEnumerator`]
#[derive(Debug, Error)]
pub enum EnumeratorError {
    #[error("failed to enumerate devices: {message}")]
    Enumeration { message: String },

    #[error("failed to create MIG device with profile {profile} on GPU {gpu_uuid}: {message}")]
    Create {
        gpu_uuid: String,
        profile: String,
        message: String,
    },

    #[error("failed to destroy MIG device {uuid}: {message}")]
    Destroy { uuid: String, message: String },
}

/// Failures reported by a [`super::traits::CdiRegistry`]
#[derive(Debug, Error)]
pub enum CdiError {
    #[error("failed to read CDI spec {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse CDI spec {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Errors returned by the device state engine
#[derive(Debug, Error)]
pub enum DeviceStateError {
    #[error("error enumerating all possible devices")]
    EnumerationFailed(#[source] EnumeratorError),

    #[error("device {uuid} was enumerated more than once")]
    DuplicateDevice { uuid: String },

    #[error("unable to refresh the CDI registry")]
    CdiRefreshFailed(#[source] CdiError),

    #[error("unable to restore claim {claim_uid} from NodeAllocationState: {message}")]
    RecordInconsistent { claim_uid: String, message: String },

    #[error("invalid device requirements: {message}")]
    InvalidRequirements { message: String },

    #[error("not enough GPUs available for allocation (available: {available}, required: {requested})")]
    InsufficientCapacity { available: usize, requested: u32 },

    #[error("no MIG devices with profile {profile} available on any GPU")]
    ProfileUnavailable { profile: String },

    #[error("error creating MIG device")]
    CreateFailed(#[source] EnumeratorError),

    #[error(
        "failed to free claim {claim_uid}: could not destroy MIG device {device_uuid} (released before failure: {released:?})"
    )]
    DestroyFailed {
        claim_uid: String,
        device_uuid: String,
        released: Vec<String>,
        #[source]
        source: EnumeratorError,
    },

    #[error("device {cdi_device} not found in the CDI registry")]
    UnknownDeviceInRegistry { cdi_device: String },

    #[error("available pool out of sync with allocations")]
    PoolInconsistent(#[from] PoolError),
}

/// Result type for device state operations
pub type Result<T> = std::result::Result<T, DeviceStateError>;
