//! Native driver abstraction layer.
//!
//! The session layer talks to the native GPU stack through the [`GpuDriver`]
//! trait. The driver is chosen once, when the instance is created.
//!
//! # Available Drivers
//!
//! - `dummy` (always compiled): instrumented in-process driver used for
//!   testing, with configurable adapters, failures and device loss
//! - `wgpu-backend`: real adapters and devices through wgpu
//!
//! # Architecture
//!
//! Each driver implements [`GpuDriver`], which provides:
//! - Callback-based adapter and device requests completed through an event pump
//! - Queue access and submission
//! - Shared texture memory import, texture creation and access transitions
//! - Extraction of platform interop objects

pub mod dummy;
pub(crate) mod events;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_driver;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::access::{BeginAccessDescriptor, EndAccessState};
use crate::broker::{FutureId, RequestCallback, WaitStatus};
use crate::device::DeviceHealth;
use crate::error::GpuError;
use crate::foreign::ForeignRef;
use crate::instance::{DriverSelection, InstanceParameters};
use crate::shared_memory::ForeignResource;
use crate::types::{
    AdapterInfo, BackendType, DeviceFeatures, InstanceFeatures, InstanceToggles,
    SharedTextureProperties,
};

pub use dummy::{DummyComObject, DummyConfig, DummyDriver, DummyObjectKind, DummyStats};

/// Native adapter.
#[derive(Clone)]
pub enum NativeAdapter {
    Dummy(Arc<dummy::DummyAdapter>),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu::Adapter>),
}

/// Native device.
#[derive(Clone)]
pub enum NativeDevice {
    Dummy(Arc<dummy::DummyDevice>),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu_driver::WgpuDevice>),
}

/// Native queue.
pub enum NativeQueue {
    Dummy(dummy::DummyQueue),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu_driver::WgpuDevice>),
}

/// Native shared texture memory.
pub enum NativeSharedMemory {
    Dummy(Arc<dummy::DummySharedMemory>),
}

/// Native texture minted from shared texture memory.
pub enum NativeTexture {
    Dummy(dummy::DummyTexture),
}

macro_rules! impl_native_debug {
    ($ty:ident { $($variant:ident),* $(,)? }) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    Self::Dummy(_) => write!(f, concat!(stringify!($ty), "::Dummy")),
                    $(
                        #[cfg(feature = "wgpu-backend")]
                        Self::$variant(_) => {
                            write!(f, concat!(stringify!($ty), "::", stringify!($variant)))
                        }
                    )*
                }
            }
        }
    };
}

impl_native_debug!(NativeAdapter { Wgpu });
impl_native_debug!(NativeDevice { Wgpu });
impl_native_debug!(NativeQueue { Wgpu });
impl_native_debug!(NativeSharedMemory {});
impl_native_debug!(NativeTexture {});

/// Platform object that can be extracted from a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeObjectKind {
    D3D11Device,
    D3D12Device,
    D3D11On12Device,
    D3D12CommandQueue,
}

impl NativeObjectKind {
    /// Backend the device must run on for the object to exist.
    pub fn required_backend(&self) -> BackendType {
        match self {
            Self::D3D11Device => BackendType::D3D11,
            Self::D3D12Device | Self::D3D11On12Device | Self::D3D12CommandQueue => {
                BackendType::D3D12
            }
        }
    }

    /// Interface name of the object.
    pub fn interface_name(&self) -> &'static str {
        match self {
            Self::D3D11Device => "ID3D11Device",
            Self::D3D12Device => "ID3D12Device",
            Self::D3D11On12Device => "ID3D11On12Device",
            Self::D3D12CommandQueue => "ID3D12CommandQueue",
        }
    }
}

/// Fixed policy the instance is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeInstanceDescriptor {
    pub features: InstanceFeatures,
    pub toggles: InstanceToggles,
}

/// A resolved adapter request.
#[derive(Debug, Clone)]
pub struct AdapterGrant {
    pub native: NativeAdapter,
    pub info: AdapterInfo,
    pub features: DeviceFeatures,
}

/// A device request as handed to the driver.
pub struct NativeDeviceRequest {
    pub label: Option<String>,
    pub required_features: DeviceFeatures,
    /// Receives device-lost and uncaptured-error notifications.
    pub health: Arc<DeviceHealth>,
}

/// Native GPU stack behind the session layer.
///
/// Requests never block: they return a [`FutureId`] and complete later, when
/// the caller pumps [`GpuDriver::process_events`] or waits through
/// [`GpuDriver::wait_any`].
pub trait GpuDriver: Send + Sync + 'static {
    /// Get the driver name.
    fn name(&self) -> &'static str;

    /// Start an adapter request filtered by backend.
    fn request_adapter(
        &self,
        backend: BackendType,
        callback: RequestCallback<AdapterGrant>,
    ) -> FutureId;

    /// Start a device request on an adapter.
    fn request_device(
        &self,
        adapter: &NativeAdapter,
        request: NativeDeviceRequest,
        callback: RequestCallback<NativeDevice>,
    ) -> FutureId;

    /// Fire every completed callback on the calling thread.
    fn process_events(&self);

    /// Pump until `future` completes or `timeout` elapses. `None` waits forever.
    fn wait_any(&self, future: FutureId, timeout: Option<Duration>) -> WaitStatus;

    /// Get a new reference to the device's queue.
    fn get_queue(&self, device: &NativeDevice) -> Result<NativeQueue, GpuError>;

    /// Submit work that references `textures`. Returns the submission index.
    fn submit(&self, queue: &NativeQueue, textures: &[&NativeTexture]) -> Result<u64, GpuError>;

    /// Import a foreign resource as shared texture memory.
    fn import_shared_texture_memory(
        &self,
        device: &NativeDevice,
        resource: &ForeignResource,
        label: Option<&str>,
    ) -> Result<(NativeSharedMemory, SharedTextureProperties), GpuError>;

    /// Mint a texture from shared texture memory.
    fn create_texture(&self, memory: &NativeSharedMemory) -> Result<NativeTexture, GpuError>;

    /// Begin this side's access to a texture.
    fn begin_access(
        &self,
        memory: &NativeSharedMemory,
        texture: &NativeTexture,
        desc: &BeginAccessDescriptor,
    ) -> Result<(), GpuError>;

    /// End this side's access to a texture.
    fn end_access(
        &self,
        memory: &NativeSharedMemory,
        texture: &NativeTexture,
    ) -> Result<EndAccessState, GpuError>;

    /// Extract a platform object backing the device, with one new reference.
    fn copy_native_object(
        &self,
        device: &NativeDevice,
        kind: NativeObjectKind,
    ) -> Result<ForeignRef, GpuError>;
}

/// Create the driver selected by `params`.
pub fn create_driver(
    params: &InstanceParameters,
    desc: &NativeInstanceDescriptor,
) -> Result<Arc<dyn GpuDriver>, GpuError> {
    match params.driver {
        DriverSelection::Dummy => {
            log::info!("Using dummy driver");
            Ok(Arc::new(DummyDriver::new(params.dummy.clone(), desc)))
        }
        DriverSelection::Wgpu => create_wgpu_driver(desc),
        DriverSelection::Auto => {
            #[cfg(feature = "wgpu-backend")]
            {
                match create_wgpu_driver(desc) {
                    Ok(driver) => return Ok(driver),
                    Err(e) => log::warn!("Failed to create wgpu driver: {}", e),
                }
            }

            // Fall back to dummy driver
            log::info!("Using dummy driver");
            Ok(Arc::new(DummyDriver::new(params.dummy.clone(), desc)))
        }
    }
}

#[cfg(feature = "wgpu-backend")]
fn create_wgpu_driver(desc: &NativeInstanceDescriptor) -> Result<Arc<dyn GpuDriver>, GpuError> {
    log::info!("Using wgpu driver");
    Ok(Arc::new(wgpu_driver::WgpuDriver::new(desc)))
}

#[cfg(not(feature = "wgpu-backend"))]
fn create_wgpu_driver(_desc: &NativeInstanceDescriptor) -> Result<Arc<dyn GpuDriver>, GpuError> {
    Err(GpuError::Unsupported(
        "wgpu driver (build without the `wgpu-backend` feature)".to_string(),
    ))
}
