//! Error types shared by all backends.

use thiserror::Error;

/// Failure of an abstract device operation.
///
/// Backends keep their native result codes at the hook boundary; this type
/// is what add-ons observe when they call into a device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The driver ran out of host or device memory.
    #[error("out of memory")]
    OutOfMemory,

    /// The device was lost or removed.
    #[error("device lost")]
    DeviceLost,

    /// An argument failed validation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The operation or descriptor cannot be expressed on this backend.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Any other native failure, carrying the native result code.
    #[error("native call failed with code {0:#x}")]
    Native(i64),
}

/// Result type for abstract device operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Handle registry contract violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackingError {
    #[error("handle {0:#x} is not registered")]
    NotFound(u64),

    #[error("handle {0:#x} is already registered")]
    AlreadyRegistered(u64),
}
