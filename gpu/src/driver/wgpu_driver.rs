//! wgpu driver implementation.
//!
//! Adapters and devices come from one wgpu instance owned by the driver.
//! Requests run on worker threads and complete through the event pump, so
//! the caller's wait and its timeout cover the whole native request. wgpu
//! picks its preferred adapter; a request for another backend reports the
//! adapter as unavailable. wgpu has no shared texture memory or D3D interop
//! surface, so those operations report [`GpuError::Unsupported`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::access::{BeginAccessDescriptor, EndAccessState};
use crate::broker::{FutureId, RequestCallback, RequestFailure, RequestStatus, WaitStatus};
use crate::error::GpuError;
use crate::foreign::ForeignRef;
use crate::shared_memory::ForeignResource;
use crate::types::{
    AdapterInfo, AdapterType, BackendType, DeviceFeatures, DeviceLostInfo, DeviceLostReason,
    InstanceFeatures, SharedTextureProperties, UncapturedErrorKind,
};

use super::events::EventQueue;
use super::{
    AdapterGrant, GpuDriver, NativeAdapter, NativeDevice, NativeDeviceRequest,
    NativeInstanceDescriptor, NativeObjectKind, NativeQueue, NativeSharedMemory, NativeTexture,
};

/// A wgpu device with its queue.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    submissions: AtomicU64,
}

impl WgpuDevice {
    /// Get the wgpu device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get the wgpu queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

/// wgpu driver.
pub struct WgpuDriver {
    instance: Arc<wgpu::Instance>,
    events: Arc<EventQueue>,
    timed_wait_any: bool,
}

impl std::fmt::Debug for WgpuDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDriver")
            .field("pending", &self.events.pending_count())
            .finish()
    }
}

impl WgpuDriver {
    /// Create a new wgpu driver.
    pub fn new(desc: &NativeInstanceDescriptor) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            backend_options: wgpu::BackendOptions::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        });

        Self {
            instance: Arc::new(instance),
            events: Arc::new(EventQueue::new()),
            timed_wait_any: desc.features.contains(InstanceFeatures::TIMED_WAIT_ANY),
        }
    }

    /// Get the wgpu instance.
    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    fn fail<T: Send + 'static>(
        &self,
        callback: RequestCallback<T>,
        failure: RequestFailure,
    ) -> FutureId {
        let id = self.events.next_id();
        self.events
            .schedule(id, Some(Instant::now()), move || callback(Err(failure)));
        id
    }

    fn spawn<T, F>(&self, name: &str, callback: RequestCallback<T>, work: F) -> FutureId
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, RequestFailure> + Send + 'static,
    {
        let id = self.events.next_id();
        self.events.complete_on_worker(id, name, move || {
            let result = work();
            move || callback(result)
        });
        id
    }
}

fn adapter_result(
    instance: &wgpu::Instance,
    backend: BackendType,
) -> Result<AdapterGrant, RequestFailure> {
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .map_err(|e| {
        RequestFailure::new(
            RequestStatus::Unavailable,
            format!("no compatible {backend} adapter: {e}"),
        )
    })?;

    let wgpu_info = adapter.get_info();
    let info = AdapterInfo {
        name: wgpu_info.name.clone(),
        vendor: format!("{:#06x}", wgpu_info.vendor),
        device_type: adapter_type(wgpu_info.device_type),
        backend: backend_type(wgpu_info.backend),
    };
    if !backend.accepts(info.backend) {
        return Err(RequestFailure::new(
            RequestStatus::Unavailable,
            format!(
                "wgpu adapter '{}' runs on {}, not {backend}",
                info.name, info.backend
            ),
        ));
    }
    log::info!("wgpu adapter: {:?}", wgpu_info);

    Ok(AdapterGrant {
        native: NativeAdapter::Wgpu(Arc::new(adapter)),
        info,
        features: DeviceFeatures::empty(),
    })
}

fn device_result(
    adapter: &wgpu::Adapter,
    request: NativeDeviceRequest,
) -> Result<NativeDevice, RequestFailure> {
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: request.label.as_deref(),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::default(),
        memory_hints: wgpu::MemoryHints::default(),
        experimental_features: wgpu::ExperimentalFeatures::default(),
        trace: wgpu::Trace::Off,
    }))
    .map_err(|e| RequestFailure::new(RequestStatus::Error, e.to_string()))?;

    let health = request.health.clone();
    device.set_device_lost_callback(move |reason, message| {
        let reason = match reason {
            wgpu::DeviceLostReason::Destroyed => DeviceLostReason::Destroyed,
            #[allow(unreachable_patterns)]
            _ => DeviceLostReason::Unknown,
        };
        health.mark_lost(DeviceLostInfo { reason, message });
    });

    let health = request.health;
    device.on_uncaptured_error(Arc::new(move |error: wgpu::Error| {
        let kind = match &error {
            wgpu::Error::Validation { .. } => UncapturedErrorKind::Validation,
            wgpu::Error::OutOfMemory { .. } => UncapturedErrorKind::OutOfMemory,
            wgpu::Error::Internal { .. } => UncapturedErrorKind::Internal,
            #[allow(unreachable_patterns)]
            _ => UncapturedErrorKind::Unknown,
        };
        health.report_uncaptured_error(kind, error.to_string());
    }));

    Ok(NativeDevice::Wgpu(Arc::new(WgpuDevice {
        device,
        queue,
        submissions: AtomicU64::new(0),
    })))
}

impl Drop for WgpuDriver {
    fn drop(&mut self) {
        let abandoned = self.events.abandon_all();
        if abandoned > 0 {
            log::debug!("WgpuDriver: dropped {} pending requests", abandoned);
        }
    }
}

fn backend_type(backend: wgpu::Backend) -> BackendType {
    match backend {
        wgpu::Backend::Vulkan => BackendType::Vulkan,
        wgpu::Backend::Metal => BackendType::Metal,
        wgpu::Backend::Dx12 => BackendType::D3D12,
        wgpu::Backend::Gl => BackendType::OpenGl,
        wgpu::Backend::BrowserWebGpu => BackendType::WebGpu,
        #[allow(unreachable_patterns)]
        _ => BackendType::Null,
    }
}

fn adapter_type(device_type: wgpu::DeviceType) -> AdapterType {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => AdapterType::Discrete,
        wgpu::DeviceType::IntegratedGpu => AdapterType::Integrated,
        wgpu::DeviceType::Cpu => AdapterType::Software,
        _ => AdapterType::Unknown,
    }
}

#[allow(unreachable_patterns)]
fn wgpu_device(device: &NativeDevice) -> Result<&Arc<WgpuDevice>, GpuError> {
    match device {
        NativeDevice::Wgpu(device) => Ok(device),
        _ => Err(GpuError::Internal(
            "device belongs to another driver".to_string(),
        )),
    }
}

fn unsupported<T>(what: &str) -> Result<T, GpuError> {
    Err(GpuError::Unsupported(format!("{what} on the wgpu driver")))
}

impl GpuDriver for WgpuDriver {
    fn name(&self) -> &'static str {
        "wgpu Driver"
    }

    fn request_adapter(
        &self,
        backend: BackendType,
        callback: RequestCallback<AdapterGrant>,
    ) -> FutureId {
        if matches!(backend, BackendType::Null | BackendType::D3D11) {
            let failure = RequestFailure::new(
                RequestStatus::Unavailable,
                format!("wgpu has no {backend} backend"),
            );
            return self.fail(callback, failure);
        }
        let instance = self.instance.clone();
        self.spawn("wgpu-adapter", callback, move || adapter_result(&instance, backend))
    }

    #[allow(unreachable_patterns)]
    fn request_device(
        &self,
        adapter: &NativeAdapter,
        request: NativeDeviceRequest,
        callback: RequestCallback<NativeDevice>,
    ) -> FutureId {
        let adapter = match adapter {
            NativeAdapter::Wgpu(adapter) => adapter.clone(),
            _ => {
                let failure =
                    RequestFailure::new(RequestStatus::Error, "adapter belongs to another driver");
                return self.fail(callback, failure);
            }
        };
        if !request.required_features.is_empty() {
            let failure = RequestFailure::new(
                RequestStatus::Unsupported,
                format!("wgpu devices cannot enable {:?}", request.required_features),
            );
            return self.fail(callback, failure);
        }
        self.spawn("wgpu-device", callback, move || device_result(&adapter, request))
    }

    fn process_events(&self) {
        self.events.process_events();
    }

    fn wait_any(&self, future: FutureId, timeout: Option<Duration>) -> WaitStatus {
        if !self.timed_wait_any {
            return WaitStatus::Unsupported;
        }
        self.events.wait_any(future, timeout)
    }

    fn get_queue(&self, device: &NativeDevice) -> Result<NativeQueue, GpuError> {
        Ok(NativeQueue::Wgpu(wgpu_device(device)?.clone()))
    }

    #[allow(unreachable_patterns)]
    fn submit(&self, queue: &NativeQueue, textures: &[&NativeTexture]) -> Result<u64, GpuError> {
        let NativeQueue::Wgpu(device) = queue else {
            return Err(GpuError::Internal("queue belongs to another driver".to_string()));
        };
        if !textures.is_empty() {
            return unsupported("shared textures");
        }
        device.queue.submit(std::iter::empty());
        Ok(device.submissions.fetch_add(1, Ordering::AcqRel) + 1)
    }

    fn import_shared_texture_memory(
        &self,
        _device: &NativeDevice,
        resource: &ForeignResource,
        _label: Option<&str>,
    ) -> Result<(NativeSharedMemory, SharedTextureProperties), GpuError> {
        unsupported(&format!("importing {}", resource.interface_name()))
    }

    fn create_texture(&self, _memory: &NativeSharedMemory) -> Result<NativeTexture, GpuError> {
        unsupported("shared texture memory")
    }

    fn begin_access(
        &self,
        _memory: &NativeSharedMemory,
        _texture: &NativeTexture,
        _desc: &BeginAccessDescriptor,
    ) -> Result<(), GpuError> {
        unsupported("shared texture memory")
    }

    fn end_access(
        &self,
        _memory: &NativeSharedMemory,
        _texture: &NativeTexture,
    ) -> Result<EndAccessState, GpuError> {
        unsupported("shared texture memory")
    }

    fn copy_native_object(
        &self,
        _device: &NativeDevice,
        kind: NativeObjectKind,
    ) -> Result<ForeignRef, GpuError> {
        unsupported(kind.interface_name())
    }
}
