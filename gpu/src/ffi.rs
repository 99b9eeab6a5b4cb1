//! C boundary.
//!
//! Every object crosses the boundary as an opaque 64-bit handle held in a
//! [`HandleTable`]. Creation functions return a handle with one reference
//! owned by the caller; `*_add_ref` and `*_release` adjust that count and the
//! object is destroyed when it reaches zero. Null handles are accepted
//! everywhere and make the call a no-op.
//!
//! Failures surface as a null handle or `false`. The reason of the most recent
//! call on the current thread is available from
//! [`redlilium_gpu_last_error`], which tells "unsupported here" apart from
//! "attempted and failed".
//!
//! # Ordering
//!
//! [`redlilium_gpu_init`] must be called before any other function. It is
//! idempotent. [`redlilium_gpu_shutdown`] releases every outstanding handle,
//! textures first and instances last; the boundary stays usable afterwards.

use std::cell::Cell;
use std::ffi::{CStr, c_char, c_void};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::access::BeginAccessDescriptor;
use crate::adapter::GpuAdapter;
use crate::device::{DeviceDescriptor, GpuDevice};
use crate::driver::NativeObjectKind;
use crate::error::{ErrorCode, GpuError};
use crate::foreign::{self, ForeignRef};
use crate::instance::{GpuInstance, InstanceParameters};
use crate::queue::GpuQueue;
use crate::registry::{HandleError, HandleTable, RawHandle, RegistryReport};
use crate::runtime::GpuRuntime;
use crate::shared_memory::{SharedTexture, SharedTextureMemory, SharedTextureMemoryDescriptor};
use crate::types::{BackendType, DeviceFeatures};

/// Default bound on the CPU-side fence wait done by `end_access`.
pub const DEFAULT_FENCE_WAIT: Duration = Duration::from_secs(5);

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub RawHandle);

        impl $name {
            /// The null handle.
            pub const NULL: $name = $name(RawHandle::NULL);

            /// Check if this is the null handle.
            pub fn is_null(self) -> bool {
                self.0.is_null()
            }
        }
    };
}

define_handle!(
    /// Handle to a [`GpuInstance`].
    InstanceHandle
);
define_handle!(
    /// Handle to a [`GpuAdapter`].
    AdapterHandle
);
define_handle!(
    /// Handle to a [`GpuDevice`].
    DeviceHandle
);
define_handle!(
    /// Handle to a [`GpuQueue`].
    QueueHandle
);
define_handle!(
    /// Handle to a [`SharedTextureMemory`].
    SharedTextureMemoryHandle
);
define_handle!(
    /// Handle to a [`SharedTexture`].
    TextureHandle
);

thread_local! {
    static LAST_ERROR: Cell<ErrorCode> = const { Cell::new(ErrorCode::None) };
}

fn set_last_error(code: ErrorCode) {
    LAST_ERROR.with(|last| last.set(code));
}

/// Error code of the most recent boundary call on this thread.
pub fn last_error() -> ErrorCode {
    LAST_ERROR.with(Cell::get)
}

fn record<T>(op: &str, result: Result<T, GpuError>) -> Option<T> {
    match result {
        Ok(value) => {
            set_last_error(ErrorCode::None);
            Some(value)
        }
        Err(e) => {
            match &e {
                GpuError::InvalidHandle(HandleError::Null) => log::debug!("{op}: {e}"),
                GpuError::InvalidHandle(HandleError::Stale) => log::error!("{op}: {e}"),
                _ => log::warn!("{op}: {e}"),
            }
            set_last_error(e.code());
            None
        }
    }
}

/// Live handles per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundaryReport {
    pub instances: RegistryReport,
    pub adapters: RegistryReport,
    pub devices: RegistryReport,
    pub queues: RegistryReport,
    pub memories: RegistryReport,
    pub textures: RegistryReport,
}

impl BoundaryReport {
    /// Sum over every table.
    pub fn total(&self) -> RegistryReport {
        self.instances + self.adapters + self.devices + self.queues + self.memories + self.textures
    }

    /// Check that no handle is outstanding.
    pub fn is_empty(&self) -> bool {
        self.total().is_empty()
    }
}

/// Handle tables and runtime behind the C entry points.
///
/// The extern functions delegate to a process-wide instance; tests can create
/// their own.
#[derive(Debug)]
pub struct Boundary {
    runtime: GpuRuntime,
    fence_wait: Duration,
    instances: HandleTable<Arc<GpuInstance>>,
    adapters: HandleTable<Arc<GpuAdapter>>,
    devices: HandleTable<Arc<GpuDevice>>,
    queues: HandleTable<Arc<GpuQueue>>,
    memories: HandleTable<Arc<SharedTextureMemory>>,
    textures: HandleTable<Arc<SharedTexture>>,
}

impl Boundary {
    /// Create a boundary whose instances use `parameters`.
    pub fn new(parameters: InstanceParameters) -> Self {
        Self {
            runtime: GpuRuntime::new(parameters),
            fence_wait: DEFAULT_FENCE_WAIT,
            instances: HandleTable::new("instances"),
            adapters: HandleTable::new("adapters"),
            devices: HandleTable::new("devices"),
            queues: HandleTable::new("queues"),
            memories: HandleTable::new("shared_texture_memories"),
            textures: HandleTable::new("textures"),
        }
    }

    /// Bound the fence wait done by `end_access`.
    pub fn with_fence_wait(mut self, timeout: Duration) -> Self {
        self.fence_wait = timeout;
        self
    }

    /// Get the runtime.
    pub fn runtime(&self) -> &GpuRuntime {
        &self.runtime
    }

    /// Snapshot every table.
    pub fn report(&self) -> BoundaryReport {
        BoundaryReport {
            instances: self.instances.report(),
            adapters: self.adapters.report(),
            devices: self.devices.report(),
            queues: self.queues.report(),
            memories: self.memories.report(),
            textures: self.textures.report(),
        }
    }

    /// Release every outstanding handle, dependents first.
    ///
    /// Returns how many handles were still live.
    pub fn clear(&self) -> usize {
        let mut leaked = 0;
        leaked += self.textures.drain().len();
        leaked += self.memories.drain().len();
        leaked += self.queues.drain().len();
        leaked += self.devices.drain().len();
        leaked += self.adapters.drain().len();
        leaked += self.instances.drain().len();
        if leaked > 0 {
            log::warn!("Released {} outstanding GPU handles", leaked);
        }
        leaked
    }

    // ------------------------------------------------------------------
    // Instance
    // ------------------------------------------------------------------

    /// Create the instance.
    pub fn instance_create(&self) -> InstanceHandle {
        record("instance_create", self.runtime.create_instance())
            .map(|instance| InstanceHandle(self.instances.insert(instance)))
            .unwrap_or_default()
    }

    /// Release an instance handle.
    pub fn instance_release(&self, instance: InstanceHandle) {
        record("instance_release", release(&self.instances, instance.0));
    }

    /// Pump the instance's events.
    pub fn instance_process_events(&self, instance: InstanceHandle) {
        let result = self.instances.get(instance.0).map_err(GpuError::from);
        if let Some(instance) = record("instance_process_events", result) {
            instance.process_events();
        }
    }

    /// Request an adapter for a raw [`BackendType`] value.
    pub fn instance_request_adapter(
        &self,
        instance: InstanceHandle,
        backend: u32,
    ) -> AdapterHandle {
        let result = (|| {
            let instance = self.instances.get(instance.0)?;
            let backend = BackendType::from_raw(backend).ok_or_else(|| {
                GpuError::InvalidParameter(format!("unknown backend type {backend}"))
            })?;
            instance.request_adapter(backend)
        })();
        record("instance_request_adapter", result)
            .map(|adapter| AdapterHandle(self.adapters.insert(adapter)))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Adapter
    // ------------------------------------------------------------------

    /// Release an adapter handle.
    pub fn adapter_release(&self, adapter: AdapterHandle) {
        record("adapter_release", release(&self.adapters, adapter.0));
    }

    /// Request the adapter's default device.
    pub fn adapter_request_device(
        &self,
        instance: InstanceHandle,
        adapter: AdapterHandle,
    ) -> DeviceHandle {
        self.adapter_request_device_with_features(instance, adapter, 0)
    }

    /// Request a device with raw [`DeviceFeatures`] bits.
    pub fn adapter_request_device_with_features(
        &self,
        instance: InstanceHandle,
        adapter: AdapterHandle,
        features: u32,
    ) -> DeviceHandle {
        let result = (|| {
            let instance = self.instances.get(instance.0)?;
            let adapter = self.adapters.get(adapter.0)?;
            if !Arc::ptr_eq(adapter.instance(), &instance) {
                return Err(GpuError::InvalidParameter(
                    "adapter was negotiated on another instance".to_string(),
                ));
            }
            let features = DeviceFeatures::from_bits(features).ok_or_else(|| {
                GpuError::InvalidParameter(format!("unknown device feature bits {features:#x}"))
            })?;
            adapter.request_device_with(&DeviceDescriptor::new().with_required_features(features))
        })();
        record("adapter_request_device", result)
            .map(|device| DeviceHandle(self.devices.insert(device)))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Device
    // ------------------------------------------------------------------

    /// Add a reference to a device.
    pub fn device_add_ref(&self, device: DeviceHandle) {
        record("device_add_ref", self.devices.add_ref(device.0).map_err(GpuError::from));
    }

    /// Release a device reference.
    pub fn device_release(&self, device: DeviceHandle) {
        record("device_release", release(&self.devices, device.0));
    }

    /// Get a new queue handle for a device.
    pub fn device_get_queue(&self, device: DeviceHandle) -> QueueHandle {
        let result = self
            .devices
            .get(device.0)
            .map_err(GpuError::from)
            .and_then(|device| device.queue());
        record("device_get_queue", result)
            .map(|queue| QueueHandle(self.queues.insert(queue)))
            .unwrap_or_default()
    }

    /// Check whether a device has been lost. Unknown handles report `false`.
    pub fn device_is_lost(&self, device: DeviceHandle) -> bool {
        let result = self.devices.get(device.0).map_err(GpuError::from);
        record("device_is_lost", result).is_some_and(|device| device.is_lost())
    }

    /// Extract a platform object from a device, transferring one reference.
    pub fn device_copy_native(&self, device: DeviceHandle, kind: NativeObjectKind) -> *mut c_void {
        let result = self
            .devices
            .get(device.0)
            .map_err(GpuError::from)
            .and_then(|device| device.copy_native_object(kind));
        record("device_copy_native", result)
            .map(ForeignRef::into_raw)
            .unwrap_or(std::ptr::null_mut())
    }

    /// Import a foreign texture or resource.
    ///
    /// # Safety
    ///
    /// `resource` must be null or a live COM object of the kind named by
    /// `d3d12`. The caller keeps its own reference.
    pub unsafe fn device_import(
        &self,
        device: DeviceHandle,
        resource: *mut c_void,
        d3d12: bool,
        label: Option<String>,
    ) -> SharedTextureMemoryHandle {
        let result = (|| {
            let device = self.devices.get(device.0)?;
            // SAFETY: guaranteed by the caller.
            let resource = unsafe { ForeignRef::from_raw_borrowed(resource) }
                .ok_or_else(|| GpuError::InvalidParameter("null foreign resource".to_string()))?;
            let mut desc = if d3d12 {
                SharedTextureMemoryDescriptor::d3d12_resource(resource)
            } else {
                SharedTextureMemoryDescriptor::d3d11_texture_2d(resource)
            };
            desc.label = label;
            device.import_shared_texture_memory(&desc)
        })();
        record("device_import_shared_texture_memory", result)
            .map(|memory| SharedTextureMemoryHandle(self.memories.insert(memory)))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Release a queue handle.
    pub fn queue_release(&self, queue: QueueHandle) {
        record("queue_release", release(&self.queues, queue.0));
    }

    /// Submit empty work. Returns the submission index, or zero on failure.
    pub fn queue_submit(&self, queue: QueueHandle) -> u64 {
        let result = self
            .queues
            .get(queue.0)
            .map_err(GpuError::from)
            .and_then(|queue| queue.submit(&[]));
        record("queue_submit", result).map_or(0, |index| index.0)
    }

    // ------------------------------------------------------------------
    // Texture
    // ------------------------------------------------------------------

    /// Add a reference to a texture.
    pub fn texture_add_ref(&self, texture: TextureHandle) {
        record("texture_add_ref", self.textures.add_ref(texture.0).map_err(GpuError::from));
    }

    /// Release a texture reference.
    pub fn texture_release(&self, texture: TextureHandle) {
        record("texture_release", release(&self.textures, texture.0));
    }

    // ------------------------------------------------------------------
    // Shared texture memory
    // ------------------------------------------------------------------

    /// Mint a texture from shared texture memory.
    pub fn shared_texture_memory_create_texture(
        &self,
        memory: SharedTextureMemoryHandle,
    ) -> TextureHandle {
        let result = self
            .memories
            .get(memory.0)
            .map_err(GpuError::from)
            .and_then(|memory| memory.create_texture());
        record("shared_texture_memory_create_texture", result)
            .map(|texture| TextureHandle(self.textures.insert(texture)))
            .unwrap_or_default()
    }

    /// Add a reference to shared texture memory.
    pub fn shared_texture_memory_add_ref(&self, memory: SharedTextureMemoryHandle) {
        record(
            "shared_texture_memory_add_ref",
            self.memories.add_ref(memory.0).map_err(GpuError::from),
        );
    }

    /// Release a shared texture memory reference.
    pub fn shared_texture_memory_release(&self, memory: SharedTextureMemoryHandle) {
        record("shared_texture_memory_release", release(&self.memories, memory.0));
    }

    /// Begin exclusive access to a texture.
    pub fn shared_texture_memory_begin_access(
        &self,
        memory: SharedTextureMemoryHandle,
        texture: TextureHandle,
    ) -> bool {
        let result = (|| {
            let memory = self.memories.get(memory.0)?;
            let texture = self.textures.get(texture.0)?;
            memory.begin_access(&texture, &BeginAccessDescriptor::new())
        })();
        record("shared_texture_memory_begin_access", result).is_some()
    }

    /// End access to a texture and wait until this side's work completed.
    pub fn shared_texture_memory_end_access(
        &self,
        memory: SharedTextureMemoryHandle,
        texture: TextureHandle,
    ) -> bool {
        let result = (|| {
            let memory = self.memories.get(memory.0)?;
            let texture = self.textures.get(texture.0)?;
            let state = memory.end_access(&texture)?;
            if !state.wait(self.fence_wait) {
                let value = state
                    .fences
                    .iter()
                    .find(|fence| !fence.is_complete())
                    .map_or(0, |fence| fence.signaled_value);
                return Err(GpuError::FenceTimeout { value });
            }
            Ok(())
        })();
        record("shared_texture_memory_end_access", result).is_some()
    }
}

/// Release one reference; the value, if it was the last one, drops here.
fn release<T>(table: &HandleTable<T>, handle: RawHandle) -> Result<(), GpuError> {
    if handle.is_null() {
        return Ok(());
    }
    drop(table.release(handle)?);
    Ok(())
}

// ============================================================================
// extern "C" entry points
// ============================================================================

static BOUNDARY: OnceLock<Boundary> = OnceLock::new();

fn boundary() -> Option<&'static Boundary> {
    let boundary = BOUNDARY.get();
    if boundary.is_none() {
        log::error!("redlilium_gpu_init has not been called");
        set_last_error(ErrorCode::NotInitialized);
    }
    boundary
}

/// # Safety
///
/// `label` must be null or a valid NUL-terminated string.
unsafe fn label_from_ptr(label: *const c_char) -> Option<String> {
    if label.is_null() {
        return None;
    }
    // SAFETY: guaranteed by the caller.
    let label = unsafe { CStr::from_ptr(label) };
    Some(label.to_string_lossy().into_owned())
}

/// Initialize the process-wide GPU state from the environment.
///
/// Safe to call more than once; later calls do nothing.
#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_init() -> bool {
    BOUNDARY.get_or_init(|| {
        crate::init();
        Boundary::new(InstanceParameters::from_env())
    });
    set_last_error(ErrorCode::None);
    true
}

/// Release every outstanding handle.
#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_shutdown() {
    if let Some(boundary) = BOUNDARY.get() {
        boundary.clear();
    }
}

/// Error code of the most recent call on this thread.
#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_last_error() -> ErrorCode {
    last_error()
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_instance_create() -> InstanceHandle {
    boundary().map_or(InstanceHandle::NULL, Boundary::instance_create)
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_instance_release(instance: InstanceHandle) {
    if let Some(boundary) = boundary() {
        boundary.instance_release(instance);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_instance_process_events(instance: InstanceHandle) {
    if let Some(boundary) = boundary() {
        boundary.instance_process_events(instance);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_instance_request_adapter(
    instance: InstanceHandle,
    backend: u32,
) -> AdapterHandle {
    boundary().map_or(AdapterHandle::NULL, |b| {
        b.instance_request_adapter(instance, backend)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_adapter_release(adapter: AdapterHandle) {
    if let Some(boundary) = boundary() {
        boundary.adapter_release(adapter);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_adapter_request_device(
    instance: InstanceHandle,
    adapter: AdapterHandle,
) -> DeviceHandle {
    boundary().map_or(DeviceHandle::NULL, |b| {
        b.adapter_request_device(instance, adapter)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_adapter_request_device_with_features(
    instance: InstanceHandle,
    adapter: AdapterHandle,
    features: u32,
) -> DeviceHandle {
    boundary().map_or(DeviceHandle::NULL, |b| {
        b.adapter_request_device_with_features(instance, adapter, features)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_device_add_ref(device: DeviceHandle) {
    if let Some(boundary) = boundary() {
        boundary.device_add_ref(device);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_device_release(device: DeviceHandle) {
    if let Some(boundary) = boundary() {
        boundary.device_release(device);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_device_get_queue(device: DeviceHandle) -> QueueHandle {
    boundary().map_or(QueueHandle::NULL, |b| b.device_get_queue(device))
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_device_is_lost(device: DeviceHandle) -> bool {
    boundary().is_some_and(|b| b.device_is_lost(device))
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_queue_release(queue: QueueHandle) {
    if let Some(boundary) = boundary() {
        boundary.queue_release(queue);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_queue_submit(queue: QueueHandle) -> u64 {
    boundary().map_or(0, |b| b.queue_submit(queue))
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_texture_add_ref(texture: TextureHandle) {
    if let Some(boundary) = boundary() {
        boundary.texture_add_ref(texture);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_texture_release(texture: TextureHandle) {
    if let Some(boundary) = boundary() {
        boundary.texture_release(texture);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_shared_texture_memory_create_texture(
    memory: SharedTextureMemoryHandle,
) -> TextureHandle {
    boundary().map_or(TextureHandle::NULL, |b| {
        b.shared_texture_memory_create_texture(memory)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_shared_texture_memory_add_ref(memory: SharedTextureMemoryHandle) {
    if let Some(boundary) = boundary() {
        boundary.shared_texture_memory_add_ref(memory);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_shared_texture_memory_release(memory: SharedTextureMemoryHandle) {
    if let Some(boundary) = boundary() {
        boundary.shared_texture_memory_release(memory);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_shared_texture_memory_begin_access(
    memory: SharedTextureMemoryHandle,
    texture: TextureHandle,
) -> bool {
    boundary().is_some_and(|b| b.shared_texture_memory_begin_access(memory, texture))
}

#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_shared_texture_memory_end_access(
    memory: SharedTextureMemoryHandle,
    texture: TextureHandle,
) -> bool {
    boundary().is_some_and(|b| b.shared_texture_memory_end_access(memory, texture))
}

/// Import an `ID3D11Texture2D` as shared texture memory.
///
/// # Safety
///
/// `texture` must be null or a live `ID3D11Texture2D`; `label` must be null or
/// a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn redlilium_gpu_device_import_shared_texture_memory_from_d3d11_texture(
    device: DeviceHandle,
    texture: *mut c_void,
    label: *const c_char,
) -> SharedTextureMemoryHandle {
    let Some(boundary) = boundary() else {
        return SharedTextureMemoryHandle::NULL;
    };
    // SAFETY: guaranteed by the caller.
    unsafe { boundary.device_import(device, texture, false, label_from_ptr(label)) }
}

/// Import an `ID3D12Resource` as shared texture memory.
///
/// # Safety
///
/// `resource` must be null or a live `ID3D12Resource`; `label` must be null or
/// a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn redlilium_gpu_device_import_shared_texture_memory_from_d3d12_resource(
    device: DeviceHandle,
    resource: *mut c_void,
    label: *const c_char,
) -> SharedTextureMemoryHandle {
    let Some(boundary) = boundary() else {
        return SharedTextureMemoryHandle::NULL;
    };
    // SAFETY: guaranteed by the caller.
    unsafe { boundary.device_import(device, resource, true, label_from_ptr(label)) }
}

/// Get the device's `ID3D11Device`. The caller owns the returned reference.
#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_device_copy_native_d3d11_device(
    device: DeviceHandle,
) -> *mut c_void {
    boundary().map_or(std::ptr::null_mut(), |b| {
        b.device_copy_native(device, NativeObjectKind::D3D11Device)
    })
}

/// Get the device's `ID3D12Device`. The caller owns the returned reference.
#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_device_copy_native_d3d12_device(
    device: DeviceHandle,
) -> *mut c_void {
    boundary().map_or(std::ptr::null_mut(), |b| {
        b.device_copy_native(device, NativeObjectKind::D3D12Device)
    })
}

/// Get the device's `ID3D11On12Device`. The caller owns the returned reference.
#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_device_copy_native_d3d11on12_device(
    device: DeviceHandle,
) -> *mut c_void {
    boundary().map_or(std::ptr::null_mut(), |b| {
        b.device_copy_native(device, NativeObjectKind::D3D11On12Device)
    })
}

/// Get the device's `ID3D12CommandQueue`. The caller owns the returned reference.
#[unsafe(no_mangle)]
pub extern "C" fn redlilium_gpu_device_copy_native_d3d12_command_queue(
    device: DeviceHandle,
) -> *mut c_void {
    boundary().map_or(std::ptr::null_mut(), |b| {
        b.device_copy_native(device, NativeObjectKind::D3D12CommandQueue)
    })
}

/// `AddRef` on a COM object. Null is a no-op.
///
/// # Safety
///
/// `object` must be null or a live COM object.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn redlilium_gpu_com_add_ref(object: *mut c_void) -> u32 {
    // SAFETY: guaranteed by the caller.
    unsafe { foreign::com_add_ref(object) }
}

/// `Release` on a COM object. Null is a no-op.
///
/// # Safety
///
/// `object` must be null or a live COM object the caller owns a reference to.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn redlilium_gpu_com_release(object: *mut c_void) -> u32 {
    // SAFETY: guaranteed by the caller.
    unsafe { foreign::com_release(object) }
}
