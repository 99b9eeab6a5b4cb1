//! # RedLilium GPU
//!
//! GPU device acquisition and shared texture synchronization for hosts that
//! render with their own Direct3D device.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GpuInstance`] → [`GpuAdapter`] → [`GpuDevice`] → [`GpuQueue`] acquisition,
//!   where each asynchronous driver request is turned into a blocking call by
//!   the [`broker`]
//! - [`DeviceSession`] - The whole acquisition sequence as a state machine
//! - [`SharedTextureMemory`] - Import of D3D11 textures and D3D12 resources,
//!   with fence-based [`begin_access`](SharedTextureMemory::begin_access) /
//!   [`end_access`](SharedTextureMemory::end_access) synchronization
//! - [`ffi`] - A C boundary exposing every object as a reference-counted handle
//! - Multiple driver support: wgpu and Dummy (for testing)
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_gpu::{BackendType, DeviceSession, InstanceParameters};
//!
//! let mut session = DeviceSession::new(InstanceParameters::from_env());
//! session.establish(BackendType::D3D12)?;
//! let device = session.device().unwrap();
//! let memory = device.import_shared_texture_memory(&desc)?;
//! let texture = memory.create_texture()?;
//! memory.begin_access(&texture, &BeginAccessDescriptor::new())?;
//! // Render...
//! let state = memory.end_access(&texture)?;
//! ```

pub mod access;
pub mod adapter;
pub mod broker;
pub mod device;
pub mod driver;
pub mod error;
pub mod ffi;
pub mod foreign;
pub mod instance;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod shared_memory;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use access::{AccessViolation, BeginAccessDescriptor, EndAccessState, TextureId};
pub use adapter::GpuAdapter;
pub use broker::{FutureId, RequestFailure, RequestStatus, WaitStatus};
pub use device::{DeviceDescriptor, DeviceEventSink, DeviceHealth, GpuDevice};
pub use driver::{
    DummyComObject, DummyConfig, DummyDriver, DummyObjectKind, DummyStats, GpuDriver,
    NativeObjectKind,
};
pub use error::{ErrorCode, GpuError};
pub use foreign::ForeignRef;
pub use instance::{DriverSelection, GpuInstance, InstanceParameters};
pub use queue::GpuQueue;
pub use registry::{HandleError, HandleTable, RawHandle, RegistryReport};
pub use runtime::GpuRuntime;
pub use session::{DeviceSession, SessionState, StepState};
pub use shared_memory::{
    ForeignResource, SharedTexture, SharedTextureMemory, SharedTextureMemoryDescriptor,
};
pub use sync::{FenceStatus, SharedFence, SharedFenceState};
pub use types::{
    AdapterInfo, AdapterType, BackendType, DeviceEvent, DeviceFeatures, DeviceLostInfo,
    DeviceLostReason, DeviceStatus, InstanceFeatures, InstanceToggles, RequestKind,
    SharedTextureProperties, SubmissionIndex, TextureFormat, TextureUsage, UncapturedErrorKind,
};

/// GPU library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the GPU subsystem.
///
/// Called by `redlilium_gpu_init`; Rust callers may skip it.
pub fn init() {
    log::info!("RedLilium GPU v{} initialized", VERSION);
}

// Objects handed across the C boundary may be released from any thread.
static_assertions::assert_impl_all!(GpuInstance: Send, Sync);
static_assertions::assert_impl_all!(GpuAdapter: Send, Sync);
static_assertions::assert_impl_all!(GpuDevice: Send, Sync);
static_assertions::assert_impl_all!(GpuQueue: Send, Sync);
static_assertions::assert_impl_all!(SharedTextureMemory: Send, Sync);
static_assertions::assert_impl_all!(SharedTexture: Send, Sync);
static_assertions::assert_impl_all!(ForeignRef: Send, Sync);
static_assertions::assert_impl_all!(DeviceSession: Send, Sync);
