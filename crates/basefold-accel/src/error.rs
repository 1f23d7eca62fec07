//! Accelerator error types

use thiserror::Error;

/// Result type for device operations
pub type AccelResult<T> = Result<T, AccelError>;

/// Errors raised by an accelerator device or its engines.
///
/// At the engine boundary these convert into the core backend error kind;
/// the stage never falls back to the host path on a device failure.
#[derive(Error, Debug)]
pub enum AccelError {
    /// Device not present or not initialized
    #[error("accelerator device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Requested geometry exceeds what the device supports
    #[error("device capability exceeded: {0}")]
    CapabilityExceeded(String),

    /// Host/device transfer failed
    #[error("device transfer failed: {0}")]
    TransferFailed(String),

    /// Kernel launch or execution failed
    #[error("device kernel failed: {0}")]
    KernelFailed(String),

    /// Operation the device cannot perform
    #[error("not supported by this device: {0}")]
    NotSupported(String),
}

impl From<AccelError> for basefold_core::Error {
    fn from(err: AccelError) -> Self {
        basefold_core::Error::Backend(err.to_string())
    }
}
