//! GPU error types.

use std::fmt;
use std::time::Duration;

use crate::access::AccessViolation;
use crate::registry::HandleError;
use crate::types::{DeviceLostReason, RequestKind};

/// Errors that can occur while negotiating or using GPU objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The process-wide GPU state has not been initialized.
    NotInitialized,
    /// A live instance already exists for this runtime.
    InstanceAlreadyExists,
    /// The feature or backend is not available in this build, platform or device.
    Unsupported(String),
    /// No adapter matched the request, or the driver rejected it.
    AdapterUnavailable(String),
    /// The driver refused to create the device.
    DeviceRequestFailed(String),
    /// A blocking request did not complete within its timeout.
    RequestTimeout {
        /// Which request timed out.
        request: RequestKind,
        /// How long the caller waited.
        waited: Duration,
    },
    /// The driver dropped a request without ever completing it.
    RequestAbandoned(RequestKind),
    /// The device was lost.
    DeviceLost {
        /// Why the device was lost.
        reason: DeviceLostReason,
        /// Driver-provided message.
        message: String,
    },
    /// A handle passed across the boundary was null or already released.
    InvalidHandle(HandleError),
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// The platform refused access to a shared resource.
    AccessDenied(String),
    /// Begin/end access calls were not correctly paired.
    Access(AccessViolation),
    /// A fence did not reach the requested value in time.
    FenceTimeout {
        /// The value that was waited for.
        value: u64,
    },
    /// An internal error occurred.
    Internal(String),
}

impl GpuError {
    /// Stable numeric code used by the C boundary.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::InstanceAlreadyExists => ErrorCode::InstanceAlreadyExists,
            Self::Unsupported(_) => ErrorCode::Unsupported,
            Self::AdapterUnavailable(_) => ErrorCode::AdapterUnavailable,
            Self::DeviceRequestFailed(_) => ErrorCode::DeviceRequestFailed,
            Self::RequestTimeout { .. } | Self::FenceTimeout { .. } => ErrorCode::Timeout,
            Self::RequestAbandoned(_) => ErrorCode::RequestAbandoned,
            Self::DeviceLost { .. } => ErrorCode::DeviceLost,
            Self::InvalidHandle(HandleError::Null) => ErrorCode::NullHandle,
            Self::InvalidHandle(HandleError::Stale) => ErrorCode::StaleHandle,
            Self::InvalidParameter(_) => ErrorCode::InvalidParameter,
            Self::AccessDenied(_) => ErrorCode::AccessDenied,
            Self::Access(_) => ErrorCode::AccessProtocol,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether this error means "not available here" rather than "attempted and failed".
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "GPU runtime not initialized"),
            Self::InstanceAlreadyExists => write!(f, "a GPU instance is already live"),
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
            Self::AdapterUnavailable(msg) => write!(f, "adapter unavailable: {msg}"),
            Self::DeviceRequestFailed(msg) => write!(f, "device request failed: {msg}"),
            Self::RequestTimeout { request, waited } => {
                write!(f, "{request} request timed out after {waited:?}")
            }
            Self::RequestAbandoned(request) => {
                write!(f, "{request} request abandoned by the driver")
            }
            Self::DeviceLost { reason, message } => {
                write!(f, "GPU device lost ({reason:?}): {message}")
            }
            Self::InvalidHandle(err) => write!(f, "invalid handle: {err}"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::AccessDenied(msg) => write!(f, "shared resource access denied: {msg}"),
            Self::Access(violation) => write!(f, "access protocol violation: {violation}"),
            Self::FenceTimeout { value } => write!(f, "fence did not reach value {value}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GpuError {}

impl From<HandleError> for GpuError {
    fn from(err: HandleError) -> Self {
        Self::InvalidHandle(err)
    }
}

impl From<AccessViolation> for GpuError {
    fn from(violation: AccessViolation) -> Self {
        Self::Access(violation)
    }
}

/// Numeric error codes reported by `redlilium_gpu_last_error`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCode {
    /// The last call succeeded.
    #[default]
    None = 0,
    NotInitialized = 1,
    InstanceAlreadyExists = 2,
    Unsupported = 3,
    AdapterUnavailable = 4,
    DeviceRequestFailed = 5,
    Timeout = 6,
    RequestAbandoned = 7,
    DeviceLost = 8,
    NullHandle = 9,
    StaleHandle = 10,
    InvalidParameter = 11,
    AccessDenied = 12,
    AccessProtocol = 13,
    Internal = 14,
}
