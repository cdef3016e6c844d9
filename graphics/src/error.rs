//! Layer-level error types.

use lumen_core::ApiError;

/// Errors raised by the layer itself rather than by a native driver.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayerError {
    /// A hook ran before [`LayerService::init`](crate::LayerService::init)
    /// or after shutdown.
    #[error("layer service is not initialized")]
    NotInitialized,
    /// A hook received a dispatchable handle the layer never saw created.
    #[error("unknown {kind} {handle:#x}")]
    UnknownObject { kind: &'static str, handle: u64 },
    #[error(transparent)]
    Api(#[from] ApiError),
}
