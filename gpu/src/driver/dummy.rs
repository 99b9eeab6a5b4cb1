//! Dummy GPU driver for testing and development.
//!
//! This driver doesn't talk to any GPU but implements the full request,
//! submission and shared-memory protocol in process. Every native object it
//! creates is counted in [`DummyStats`], so tests can check that each object
//! is destroyed exactly once and that nothing leaks. [`DummyConfig`] can make
//! requests fail, stall or get abandoned, and can simulate device loss.

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::events::EventQueue;
use super::{
    AdapterGrant, GpuDriver, NativeAdapter, NativeDevice, NativeDeviceRequest,
    NativeInstanceDescriptor, NativeObjectKind, NativeQueue, NativeSharedMemory, NativeTexture,
};
use crate::access::{AccessViolation, BeginAccessDescriptor, EndAccessState};
use crate::broker::{FutureId, RequestCallback, RequestFailure, RequestStatus, WaitStatus};
use crate::device::DeviceHealth;
use crate::error::GpuError;
use crate::foreign::{ForeignRef, Guid, IID_IUNKNOWN, IUnknownVtbl, E_NOINTERFACE, E_POINTER, S_OK};
use crate::shared_memory::ForeignResource;
use crate::sync::{SharedFence, SharedFenceState};
use crate::types::{
    AdapterInfo, AdapterType, BackendType, DeviceFeatures, DeviceLostInfo, DeviceLostReason,
    InstanceFeatures, SharedTextureProperties,
};

// ============================================================================
// Instrumentation
// ============================================================================

/// Kinds of native objects the dummy driver counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DummyObjectKind {
    Adapter,
    Device,
    Queue,
    SharedTextureMemory,
    Texture,
    ComObject,
}

impl DummyObjectKind {
    /// Every kind.
    pub const ALL: [DummyObjectKind; 6] = [
        Self::Adapter,
        Self::Device,
        Self::Queue,
        Self::SharedTextureMemory,
        Self::Texture,
        Self::ComObject,
    ];
}

#[derive(Debug, Default)]
struct KindCounter {
    created: AtomicU64,
    destroyed: AtomicU64,
}

/// Creation and destruction counts per object kind.
#[derive(Debug, Default)]
pub struct DummyStats {
    counters: [KindCounter; 6],
}

impl DummyStats {
    /// Create a fresh set of counters.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn counter(&self, kind: DummyObjectKind) -> &KindCounter {
        &self.counters[kind as usize]
    }

    fn record_created(&self, kind: DummyObjectKind) {
        self.counter(kind).created.fetch_add(1, Ordering::AcqRel);
    }

    fn record_destroyed(&self, kind: DummyObjectKind) {
        self.counter(kind).destroyed.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of objects of `kind` created so far.
    pub fn created(&self, kind: DummyObjectKind) -> u64 {
        self.counter(kind).created.load(Ordering::Acquire)
    }

    /// Number of objects of `kind` destroyed so far.
    pub fn destroyed(&self, kind: DummyObjectKind) -> u64 {
        self.counter(kind).destroyed.load(Ordering::Acquire)
    }

    /// Number of live objects of `kind`.
    pub fn live(&self, kind: DummyObjectKind) -> u64 {
        self.created(kind).saturating_sub(self.destroyed(kind))
    }

    /// Number of live objects of any kind.
    pub fn total_live(&self) -> u64 {
        DummyObjectKind::ALL.iter().map(|&kind| self.live(kind)).sum()
    }
}

/// Counts one object for its whole lifetime.
#[derive(Debug)]
struct LeakGuard {
    kind: DummyObjectKind,
    stats: Arc<DummyStats>,
}

impl LeakGuard {
    fn new(kind: DummyObjectKind, stats: &Arc<DummyStats>) -> Self {
        stats.record_created(kind);
        Self {
            kind,
            stats: stats.clone(),
        }
    }
}

impl Drop for LeakGuard {
    fn drop(&mut self) {
        log::trace!("DummyDriver: destroying {:?}", self.kind);
        self.stats.record_destroyed(self.kind);
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// An adapter the dummy driver offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyAdapterDescriptor {
    pub info: AdapterInfo,
    pub features: DeviceFeatures,
}

impl DummyAdapterDescriptor {
    /// Describe an adapter on `backend` supporting `features`.
    pub fn new(name: &str, backend: BackendType, features: DeviceFeatures) -> Self {
        Self {
            info: AdapterInfo {
                name: name.to_string(),
                vendor: "RedLilium".to_string(),
                device_type: AdapterType::Software,
                backend,
            },
            features,
        }
    }
}

/// Behavior of the dummy driver.
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Adapters offered, in preference order.
    pub adapters: Vec<DummyAdapterDescriptor>,
    /// Fail every adapter and device request.
    pub reject_all: bool,
    /// Drop request callbacks without ever calling them.
    pub abandon_requests: bool,
    /// Fail device creation with this message.
    pub fail_device_creation: Option<String>,
    /// Delay before a request completes.
    pub completion_delay: Duration,
    /// Never complete requests.
    pub never_complete: bool,
    /// Resolve requests on a worker thread after the completion delay, the
    /// way a native stack does.
    pub threaded_completion: bool,
    /// Support waiting on a single future with a timeout.
    pub timed_wait_any: bool,
    /// Lose devices once they have seen this many submissions.
    pub lose_device_after_submissions: Option<u64>,
    /// Refuse every begin access, as a platform denying the resource would.
    pub deny_access: bool,
    /// Properties reported for imported textures.
    pub shared_texture: SharedTextureProperties,
    /// How long a submission waits on begin-access fences.
    pub fence_wait_timeout: Duration,
    /// Object counters.
    pub stats: Arc<DummyStats>,
}

impl DummyConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the offered adapters.
    pub fn with_adapters(mut self, adapters: Vec<DummyAdapterDescriptor>) -> Self {
        self.adapters = adapters;
        self
    }

    /// Fail every request.
    pub fn with_reject_all(mut self, reject_all: bool) -> Self {
        self.reject_all = reject_all;
        self
    }

    /// Drop request callbacks without calling them.
    pub fn with_abandon_requests(mut self, abandon: bool) -> Self {
        self.abandon_requests = abandon;
        self
    }

    /// Fail device creation with `message`.
    pub fn with_device_failure(mut self, message: impl Into<String>) -> Self {
        self.fail_device_creation = Some(message.into());
        self
    }

    /// Delay request completion.
    pub fn with_completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = delay;
        self
    }

    /// Never complete requests.
    pub fn with_never_complete(mut self, never: bool) -> Self {
        self.never_complete = never;
        self
    }

    /// Resolve requests on a worker thread.
    pub fn with_threaded_completion(mut self, threaded: bool) -> Self {
        self.threaded_completion = threaded;
        self
    }

    /// Enable or disable timed waits on single futures.
    pub fn with_timed_wait_any(mut self, enabled: bool) -> Self {
        self.timed_wait_any = enabled;
        self
    }

    /// Lose devices after `submissions` queue submissions.
    pub fn with_device_loss_after(mut self, submissions: u64) -> Self {
        self.lose_device_after_submissions = Some(submissions);
        self
    }

    /// Refuse begin access.
    pub fn with_deny_access(mut self, deny: bool) -> Self {
        self.deny_access = deny;
        self
    }

    /// Set the properties of imported textures.
    pub fn with_shared_texture(mut self, properties: SharedTextureProperties) -> Self {
        self.shared_texture = properties;
        self
    }

    /// Set the submission fence wait timeout.
    pub fn with_fence_wait_timeout(mut self, timeout: Duration) -> Self {
        self.fence_wait_timeout = timeout;
        self
    }

    /// Use the given counters.
    pub fn with_stats(mut self, stats: Arc<DummyStats>) -> Self {
        self.stats = stats;
        self
    }
}

impl Default for DummyConfig {
    fn default() -> Self {
        let d3d11 = DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D11_TEXTURE_2D
            | DeviceFeatures::SHARED_FENCE_DXGI_SHARED_HANDLE;
        Self {
            adapters: vec![
                DummyAdapterDescriptor::new(
                    "Dummy Adapter",
                    BackendType::Null,
                    DeviceFeatures::all(),
                ),
                DummyAdapterDescriptor::new("Dummy D3D11 Adapter", BackendType::D3D11, d3d11),
                DummyAdapterDescriptor::new(
                    "Dummy D3D12 Adapter",
                    BackendType::D3D12,
                    DeviceFeatures::all(),
                ),
            ],
            reject_all: false,
            abandon_requests: false,
            fail_device_creation: None,
            completion_delay: Duration::ZERO,
            never_complete: false,
            threaded_completion: false,
            timed_wait_any: true,
            lose_device_after_submissions: None,
            deny_access: false,
            shared_texture: SharedTextureProperties::default(),
            fence_wait_timeout: Duration::from_secs(1),
            stats: DummyStats::new(),
        }
    }
}

// ============================================================================
// Native objects
// ============================================================================

/// Dummy adapter.
#[derive(Debug)]
pub struct DummyAdapter {
    info: AdapterInfo,
    features: DeviceFeatures,
    _guard: LeakGuard,
}

impl DummyAdapter {
    /// Get the adapter info.
    pub fn info(&self) -> &AdapterInfo {
        &self.info
    }
}

/// Dummy device.
#[derive(Debug)]
pub struct DummyDevice {
    label: Option<String>,
    backend: BackendType,
    features: DeviceFeatures,
    health: Arc<DeviceHealth>,
    timeline: Arc<SharedFence>,
    /// Submission count; held while the timeline is signaled.
    submissions: Mutex<u64>,
    lose_after: Option<u64>,
    deny_access: bool,
    shared_texture: SharedTextureProperties,
    fence_wait_timeout: Duration,
    interop: Mutex<HashMap<NativeObjectKind, ForeignRef>>,
    stats: Arc<DummyStats>,
    _guard: LeakGuard,
}

impl DummyDevice {
    /// Number of submissions made on this device.
    pub fn submissions(&self) -> u64 {
        *self.submissions.lock()
    }

    /// Fence signaled with the index of every completed submission.
    pub fn timeline(&self) -> &Arc<SharedFence> {
        &self.timeline
    }

    /// Get the device label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl Drop for DummyDevice {
    fn drop(&mut self) {
        if !self.health.is_lost() {
            self.health.mark_lost(DeviceLostInfo {
                reason: DeviceLostReason::Destroyed,
                message: "device destroyed".to_string(),
            });
        }
    }
}

/// Dummy queue.
#[derive(Debug)]
pub struct DummyQueue {
    device: Arc<DummyDevice>,
    _guard: LeakGuard,
}

#[derive(Debug)]
struct DummyAccess {
    initialized: bool,
    waits: Vec<SharedFenceState>,
    last_submission: u64,
}

/// Dummy shared texture memory.
#[derive(Debug)]
pub struct DummySharedMemory {
    device: Arc<DummyDevice>,
    /// Keeps the foreign resource alive for the import's lifetime.
    resource: ForeignRef,
    label: Option<String>,
    next_serial: AtomicU64,
    accesses: Mutex<HashMap<u64, DummyAccess>>,
    _guard: LeakGuard,
}

impl DummySharedMemory {
    /// Raw pointer of the imported foreign resource.
    pub fn resource(&self) -> *mut c_void {
        self.resource.as_raw()
    }

    /// Get the import label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Number of textures the driver considers under access.
    pub fn open_accesses(&self) -> usize {
        self.accesses.lock().len()
    }
}

/// Dummy texture.
#[derive(Debug)]
pub struct DummyTexture {
    memory: Arc<DummySharedMemory>,
    serial: u64,
    _guard: LeakGuard,
}

// ============================================================================
// Fake COM objects
// ============================================================================

/// Heap object with an `IUnknown`-compatible layout.
///
/// Stands in for D3D resources and devices in tests and for the interop
/// objects the dummy driver hands out.
#[repr(C)]
pub struct DummyComObject {
    vtbl: *const IUnknownVtbl,
    refs: AtomicU32,
    interface: String,
    _guard: Option<LeakGuard>,
}

static DUMMY_COM_VTBL: IUnknownVtbl = IUnknownVtbl {
    query_interface: dummy_query_interface,
    add_ref: dummy_add_ref,
    release: dummy_release,
};

impl DummyComObject {
    /// Create an object with one reference, owned by the returned value.
    pub fn create(interface: &str, stats: Option<&Arc<DummyStats>>) -> ForeignRef {
        let object = Box::new(Self {
            vtbl: &DUMMY_COM_VTBL,
            refs: AtomicU32::new(1),
            interface: interface.to_string(),
            _guard: stats.map(|stats| LeakGuard::new(DummyObjectKind::ComObject, stats)),
        });
        let ptr = NonNull::from(Box::leak(object)).cast::<c_void>();
        // SAFETY: freshly allocated with exactly one reference.
        unsafe { ForeignRef::adopt(ptr) }
    }

    /// Current reference count of a dummy object.
    ///
    /// # Safety
    ///
    /// `object` must have been created by [`DummyComObject::create`].
    pub unsafe fn ref_count(object: &ForeignRef) -> u32 {
        // SAFETY: guaranteed by the caller.
        unsafe { (*object.as_raw().cast::<DummyComObject>()).refs.load(Ordering::Acquire) }
    }

    /// Interface name the object was created with.
    ///
    /// # Safety
    ///
    /// `object` must have been created by [`DummyComObject::create`].
    pub unsafe fn interface(object: &ForeignRef) -> String {
        // SAFETY: guaranteed by the caller.
        unsafe { (*object.as_raw().cast::<DummyComObject>()).interface.clone() }
    }
}

unsafe extern "system" fn dummy_query_interface(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> i32 {
    if out.is_null() || iid.is_null() {
        return E_POINTER;
    }
    // SAFETY: COM callers pass valid pointers.
    unsafe {
        if *iid != IID_IUNKNOWN {
            *out = std::ptr::null_mut();
            return E_NOINTERFACE;
        }
        dummy_add_ref(this);
        *out = this;
    }
    S_OK
}

unsafe extern "system" fn dummy_add_ref(this: *mut c_void) -> u32 {
    // SAFETY: `this` points to a live DummyComObject.
    let object = unsafe { &*this.cast::<DummyComObject>() };
    object.refs.fetch_add(1, Ordering::AcqRel) + 1
}

unsafe extern "system" fn dummy_release(this: *mut c_void) -> u32 {
    // SAFETY: `this` points to a live DummyComObject.
    let object = unsafe { &*this.cast::<DummyComObject>() };
    let previous = object.refs.fetch_sub(1, Ordering::AcqRel);
    if previous == 1 {
        // SAFETY: last reference; the object was allocated by `create`.
        drop(unsafe { Box::from_raw(this.cast::<DummyComObject>()) });
    }
    previous - 1
}

// ============================================================================
// Driver
// ============================================================================

/// Dummy GPU driver.
pub struct DummyDriver {
    config: DummyConfig,
    events: Arc<EventQueue>,
    timed_wait_any: bool,
}

impl DummyDriver {
    /// Create a new dummy driver.
    pub fn new(config: DummyConfig, desc: &NativeInstanceDescriptor) -> Self {
        let timed_wait_any =
            config.timed_wait_any && desc.features.contains(InstanceFeatures::TIMED_WAIT_ANY);
        log::debug!(
            "DummyDriver: {} adapters, timed wait-any {}, toggles {:?}",
            config.adapters.len(),
            timed_wait_any,
            desc.toggles
        );
        Self {
            config,
            events: Arc::new(EventQueue::new()),
            timed_wait_any,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Get the object counters.
    pub fn stats(&self) -> &Arc<DummyStats> {
        &self.config.stats
    }

    fn completion_time(&self) -> Option<Instant> {
        if self.config.never_complete {
            None
        } else {
            Some(Instant::now() + self.config.completion_delay)
        }
    }

    fn complete<T: Send + 'static>(
        &self,
        callback: RequestCallback<T>,
        result: Result<T, RequestFailure>,
    ) -> FutureId {
        let id = self.events.next_id();
        if self.config.abandon_requests {
            log::debug!("DummyDriver: abandoning future {}", id.0);
            return id;
        }
        if self.config.threaded_completion && !self.config.never_complete {
            let delay = self.config.completion_delay;
            self.events.complete_on_worker(id, "dummy-request", move || {
                std::thread::sleep(delay);
                move || callback(result)
            });
            return id;
        }
        self.events
            .schedule(id, self.completion_time(), move || callback(result));
        id
    }

    fn adapter_result(&self, backend: BackendType) -> Result<AdapterGrant, RequestFailure> {
        if self.config.reject_all {
            return Err(RequestFailure::new(
                RequestStatus::Unavailable,
                "dummy driver rejects all adapter requests",
            ));
        }
        let descriptor = self
            .config
            .adapters
            .iter()
            .find(|adapter| backend.accepts(adapter.info.backend))
            .ok_or_else(|| {
                RequestFailure::new(
                    RequestStatus::Unavailable,
                    format!("no {backend} adapter available"),
                )
            })?;

        let adapter = DummyAdapter {
            info: descriptor.info.clone(),
            features: descriptor.features,
            _guard: LeakGuard::new(DummyObjectKind::Adapter, &self.config.stats),
        };
        Ok(AdapterGrant {
            native: NativeAdapter::Dummy(Arc::new(adapter)),
            info: descriptor.info.clone(),
            features: descriptor.features,
        })
    }

    fn device_result(
        &self,
        adapter: &NativeAdapter,
        request: NativeDeviceRequest,
    ) -> Result<NativeDevice, RequestFailure> {
        let adapter = dummy_adapter(adapter)
            .map_err(|e| RequestFailure::new(RequestStatus::Error, e.to_string()))?;

        if self.config.reject_all {
            return Err(RequestFailure::new(
                RequestStatus::Error,
                "dummy driver rejects all device requests",
            ));
        }
        if let Some(message) = &self.config.fail_device_creation {
            return Err(RequestFailure::new(RequestStatus::Error, message.clone()));
        }
        let missing = request.required_features - adapter.features;
        if !missing.is_empty() {
            return Err(RequestFailure::new(
                RequestStatus::Unsupported,
                format!("adapter '{}' lacks features {missing:?}", adapter.info.name),
            ));
        }

        log::trace!(
            "DummyDriver: creating device {:?} with {:?}",
            request.label,
            request.required_features
        );
        let device = DummyDevice {
            label: request.label,
            backend: adapter.info.backend,
            features: request.required_features,
            health: request.health,
            timeline: Arc::new(SharedFence::new()),
            submissions: Mutex::new(0),
            lose_after: self.config.lose_device_after_submissions,
            deny_access: self.config.deny_access,
            shared_texture: self.config.shared_texture,
            fence_wait_timeout: self.config.fence_wait_timeout,
            interop: Mutex::new(HashMap::new()),
            stats: self.config.stats.clone(),
            _guard: LeakGuard::new(DummyObjectKind::Device, &self.config.stats),
        };
        Ok(NativeDevice::Dummy(Arc::new(device)))
    }
}

impl std::fmt::Debug for DummyDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyDriver")
            .field("adapters", &self.config.adapters.len())
            .field("timed_wait_any", &self.timed_wait_any)
            .finish_non_exhaustive()
    }
}

impl Drop for DummyDriver {
    fn drop(&mut self) {
        let abandoned = self.events.abandon_all();
        if abandoned > 0 {
            log::debug!("DummyDriver: dropped {} pending requests", abandoned);
        }
    }
}

#[allow(unreachable_patterns)]
fn dummy_adapter(adapter: &NativeAdapter) -> Result<&Arc<DummyAdapter>, GpuError> {
    match adapter {
        NativeAdapter::Dummy(adapter) => Ok(adapter),
        _ => Err(GpuError::Internal(
            "adapter belongs to another driver".to_string(),
        )),
    }
}

#[allow(unreachable_patterns)]
fn dummy_device(device: &NativeDevice) -> Result<&Arc<DummyDevice>, GpuError> {
    match device {
        NativeDevice::Dummy(device) => Ok(device),
        _ => Err(GpuError::Internal(
            "device belongs to another driver".to_string(),
        )),
    }
}

#[allow(unreachable_patterns)]
fn dummy_queue(queue: &NativeQueue) -> Result<&DummyQueue, GpuError> {
    match queue {
        NativeQueue::Dummy(queue) => Ok(queue),
        _ => Err(GpuError::Internal("queue belongs to another driver".to_string())),
    }
}

fn dummy_memory(memory: &NativeSharedMemory) -> &Arc<DummySharedMemory> {
    match memory {
        NativeSharedMemory::Dummy(memory) => memory,
    }
}

fn dummy_texture(texture: &NativeTexture) -> &DummyTexture {
    match texture {
        NativeTexture::Dummy(texture) => texture,
    }
}

impl GpuDriver for DummyDriver {
    fn name(&self) -> &'static str {
        "Dummy Driver"
    }

    fn request_adapter(
        &self,
        backend: BackendType,
        callback: RequestCallback<AdapterGrant>,
    ) -> FutureId {
        log::trace!("DummyDriver: requesting {} adapter", backend);
        let result = self.adapter_result(backend);
        self.complete(callback, result)
    }

    fn request_device(
        &self,
        adapter: &NativeAdapter,
        request: NativeDeviceRequest,
        callback: RequestCallback<NativeDevice>,
    ) -> FutureId {
        let result = self.device_result(adapter, request);
        self.complete(callback, result)
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
        let device = dummy_device(device)?;
        Ok(NativeQueue::Dummy(DummyQueue {
            device: device.clone(),
            _guard: LeakGuard::new(DummyObjectKind::Queue, &device.stats),
        }))
    }

    fn submit(&self, queue: &NativeQueue, textures: &[&NativeTexture]) -> Result<u64, GpuError> {
        let device = &dummy_queue(queue)?.device;
        device.health.check_alive()?;

        for texture in textures.iter().map(|t| dummy_texture(t)) {
            let waits = texture
                .memory
                .accesses
                .lock()
                .get_mut(&texture.serial)
                .map(|access| std::mem::take(&mut access.waits))
                .unwrap_or_default();
            for wait in waits {
                if !wait.wait_timeout(device.fence_wait_timeout) {
                    return Err(GpuError::FenceTimeout {
                        value: wait.signaled_value,
                    });
                }
            }
        }

        let index = {
            let mut submissions = device.submissions.lock();
            *submissions += 1;
            for texture in textures.iter().map(|t| dummy_texture(t)) {
                if let Some(access) = texture.memory.accesses.lock().get_mut(&texture.serial) {
                    access.last_submission = *submissions;
                }
            }
            device.timeline.signal(*submissions);
            *submissions
        };

        if let Some(limit) = device.lose_after
            && index >= limit
            && !device.health.is_lost()
        {
            let health = device.health.clone();
            let info = DeviceLostInfo {
                reason: DeviceLostReason::Unknown,
                message: format!("simulated device loss after {index} submissions"),
            };
            // Loss is reported from a driver thread.
            let reporter = std::thread::spawn(move || {
                health.mark_lost(info);
            });
            if reporter.join().is_err() {
                return Err(GpuError::Internal("device loss reporter panicked".to_string()));
            }
        }

        Ok(index)
    }

    fn import_shared_texture_memory(
        &self,
        device: &NativeDevice,
        resource: &ForeignResource,
        label: Option<&str>,
    ) -> Result<(NativeSharedMemory, SharedTextureProperties), GpuError> {
        let device = dummy_device(device)?;
        let required = resource.required_feature();
        if !device.features.contains(required) {
            return Err(GpuError::Unsupported(format!(
                "{} import requires device feature {required:?}",
                resource.interface_name()
            )));
        }

        log::trace!(
            "DummyDriver: importing {} {:?}",
            resource.interface_name(),
            label
        );
        let memory = DummySharedMemory {
            device: device.clone(),
            resource: resource.foreign().clone(),
            label: label.map(str::to_string),
            next_serial: AtomicU64::new(0),
            accesses: Mutex::new(HashMap::new()),
            _guard: LeakGuard::new(DummyObjectKind::SharedTextureMemory, &device.stats),
        };
        Ok((
            NativeSharedMemory::Dummy(Arc::new(memory)),
            device.shared_texture,
        ))
    }

    fn create_texture(&self, memory: &NativeSharedMemory) -> Result<NativeTexture, GpuError> {
        let memory = dummy_memory(memory);
        let serial = memory.next_serial.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(NativeTexture::Dummy(DummyTexture {
            memory: memory.clone(),
            serial,
            _guard: LeakGuard::new(DummyObjectKind::Texture, &memory.device.stats),
        }))
    }

    fn begin_access(
        &self,
        memory: &NativeSharedMemory,
        texture: &NativeTexture,
        desc: &BeginAccessDescriptor,
    ) -> Result<(), GpuError> {
        let memory = dummy_memory(memory);
        let texture = dummy_texture(texture);
        if !Arc::ptr_eq(memory, &texture.memory) {
            return Err(GpuError::Access(AccessViolation::ForeignTexture));
        }
        if memory.device.deny_access {
            return Err(GpuError::AccessDenied(
                "dummy driver refuses shared resource access".to_string(),
            ));
        }
        memory.accesses.lock().insert(
            texture.serial,
            DummyAccess {
                initialized: desc.initialized,
                waits: desc.fences.clone(),
                last_submission: 0,
            },
        );
        Ok(())
    }

    fn end_access(
        &self,
        memory: &NativeSharedMemory,
        texture: &NativeTexture,
    ) -> Result<EndAccessState, GpuError> {
        let memory = dummy_memory(memory);
        let texture = dummy_texture(texture);
        let access = memory
            .accesses
            .lock()
            .remove(&texture.serial)
            .ok_or(GpuError::Access(AccessViolation::NotAccessing))?;
        Ok(EndAccessState {
            initialized: access.initialized || access.last_submission > 0,
            fences: vec![SharedFenceState::new(
                memory.device.timeline.clone(),
                access.last_submission,
            )],
        })
    }

    fn copy_native_object(
        &self,
        device: &NativeDevice,
        kind: NativeObjectKind,
    ) -> Result<ForeignRef, GpuError> {
        let device = dummy_device(device)?;
        if device.backend != kind.required_backend() {
            return Err(GpuError::Unsupported(format!(
                "{} requires a {} device, not {}",
                kind.interface_name(),
                kind.required_backend(),
                device.backend
            )));
        }
        let mut interop = device.interop.lock();
        let object = interop
            .entry(kind)
            .or_insert_with(|| DummyComObject::create(kind.interface_name(), Some(&device.stats)));
        Ok(object.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InstanceToggles;

    fn driver(config: DummyConfig) -> DummyDriver {
        DummyDriver::new(
            config,
            &NativeInstanceDescriptor {
                features: InstanceFeatures::TIMED_WAIT_ANY,
                toggles: InstanceToggles::ALLOW_UNSAFE_APIS,
            },
        )
    }

    fn grant(driver: &DummyDriver, backend: BackendType) -> Option<AdapterGrant> {
        let slot = Arc::new(Mutex::new(None));
        let id = {
            let slot = slot.clone();
            driver.request_adapter(
                backend,
                Box::new(move |result| *slot.lock() = Some(result)),
            )
        };
        driver.wait_any(id, None);
        let result = slot.lock().take();
        result.and_then(Result::ok)
    }

    fn device(driver: &DummyDriver, features: DeviceFeatures) -> Arc<DummyDevice> {
        let adapter = grant(driver, BackendType::Null).unwrap();
        let slot = Arc::new(Mutex::new(None));
        let id = {
            let slot = slot.clone();
            driver.request_device(
                &adapter.native,
                NativeDeviceRequest {
                    label: Some("test".to_string()),
                    required_features: features,
                    health: Arc::new(DeviceHealth::new(None)),
                },
                Box::new(move |result| *slot.lock() = Some(result)),
            )
        };
        driver.wait_any(id, None);
        let native = slot.lock().take().unwrap().unwrap();
        match native {
            NativeDevice::Dummy(device) => device,
            #[allow(unreachable_patterns)]
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_adapter_backend_filter() {
        let driver = driver(DummyConfig::default());
        assert!(grant(&driver, BackendType::Null).is_some());
        assert!(grant(&driver, BackendType::D3D12).is_some());
        assert!(grant(&driver, BackendType::Vulkan).is_none());
        assert!(grant(&driver, BackendType::Metal).is_none());
    }

    #[test]
    fn test_callbacks_fire_only_when_pumped() {
        let driver = driver(DummyConfig::default());
        let slot = Arc::new(Mutex::new(None));
        {
            let slot = slot.clone();
            driver.request_adapter(
                BackendType::Null,
                Box::new(move |result| *slot.lock() = Some(result.is_ok())),
            );
        }
        assert!(slot.lock().is_none());
        driver.process_events();
        assert_eq!(*slot.lock(), Some(true));
    }

    #[test]
    fn test_stats_track_lifetimes() {
        let stats = DummyStats::new();
        let driver = driver(DummyConfig::default().with_stats(stats.clone()));

        let adapter = grant(&driver, BackendType::Null).unwrap();
        assert_eq!(stats.live(DummyObjectKind::Adapter), 1);
        drop(adapter);
        assert_eq!(stats.live(DummyObjectKind::Adapter), 0);
        assert_eq!(stats.destroyed(DummyObjectKind::Adapter), 1);

        let device = device(&driver, DeviceFeatures::empty());
        let queue = driver
            .get_queue(&NativeDevice::Dummy(device.clone()))
            .unwrap();
        drop(device);
        // The queue keeps the native device alive.
        assert_eq!(stats.live(DummyObjectKind::Device), 1);
        drop(queue);
        assert_eq!(stats.total_live(), 0);
    }

    #[test]
    fn test_device_drop_reports_destroyed() {
        let driver = driver(DummyConfig::default());
        let device = device(&driver, DeviceFeatures::empty());
        let health = device.health.clone();
        drop(device);
        assert_eq!(
            health.lost_info().map(|info| info.reason),
            Some(DeviceLostReason::Destroyed)
        );
    }

    #[test]
    fn test_missing_feature_is_unsupported() {
        let driver = driver(DummyConfig::default().with_adapters(vec![
            DummyAdapterDescriptor::new("bare", BackendType::Null, DeviceFeatures::empty()),
        ]));
        let adapter = grant(&driver, BackendType::Null).unwrap();
        let slot = Arc::new(Mutex::new(None));
        let id = {
            let slot = slot.clone();
            driver.request_device(
                &adapter.native,
                NativeDeviceRequest {
                    label: None,
                    required_features: DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D12_RESOURCE,
                    health: Arc::new(DeviceHealth::new(None)),
                },
                Box::new(move |result| *slot.lock() = Some(result)),
            )
        };
        driver.wait_any(id, None);
        let failure = slot.lock().take().unwrap().unwrap_err();
        assert_eq!(failure.status, RequestStatus::Unsupported);
    }

    #[test]
    fn test_submission_signals_timeline() {
        let driver = driver(DummyConfig::default());
        let device = device(&driver, DeviceFeatures::empty());
        let queue = driver
            .get_queue(&NativeDevice::Dummy(device.clone()))
            .unwrap();

        assert_eq!(driver.submit(&queue, &[]).unwrap(), 1);
        assert_eq!(driver.submit(&queue, &[]).unwrap(), 2);
        assert_eq!(device.submissions(), 2);
        assert_eq!(device.timeline().completed_value(), 2);
    }

    #[test]
    fn test_concurrent_submissions_signal_in_order() {
        let driver = driver(DummyConfig::default());
        let device = device(&driver, DeviceFeatures::empty());
        let queue = driver
            .get_queue(&NativeDevice::Dummy(device.clone()))
            .unwrap();

        let (driver, queue, timeline) = (&driver, &queue, device.timeline());
        let mut indices: Vec<u64> = std::thread::scope(|scope| {
            let mut workers = Vec::new();
            for _ in 0..4 {
                workers.push(scope.spawn(move || {
                    let mut seen = Vec::new();
                    for _ in 0..50 {
                        let index = driver.submit(queue, &[]).unwrap();
                        assert!(timeline.completed_value() >= index);
                        seen.push(index);
                    }
                    seen
                }));
            }
            workers
                .into_iter()
                .flat_map(|worker| worker.join().unwrap())
                .collect()
        });

        indices.sort_unstable();
        assert_eq!(indices, (1..=200).collect::<Vec<_>>());
        assert_eq!(device.submissions(), 200);
        assert_eq!(timeline.completed_value(), 200);
    }

    #[test]
    fn test_device_loss_after_submissions() {
        let driver = driver(DummyConfig::default().with_device_loss_after(3));
        let device = device(&driver, DeviceFeatures::empty());
        let queue = driver
            .get_queue(&NativeDevice::Dummy(device.clone()))
            .unwrap();

        for _ in 0..3 {
            driver.submit(&queue, &[]).unwrap();
        }
        assert!(device.health.is_lost());
        assert!(matches!(
            driver.submit(&queue, &[]),
            Err(GpuError::DeviceLost { .. })
        ));
    }

    #[test]
    fn test_com_object_release_frees() {
        let stats = DummyStats::new();
        let object = DummyComObject::create("ID3D12Resource", Some(&stats));
        assert_eq!(stats.live(DummyObjectKind::ComObject), 1);
        assert_eq!(unsafe { DummyComObject::interface(&object) }, "ID3D12Resource");

        let copy = object.clone();
        drop(object);
        assert_eq!(stats.live(DummyObjectKind::ComObject), 1);
        drop(copy);
        assert_eq!(stats.live(DummyObjectKind::ComObject), 0);
    }

    #[test]
    fn test_query_interface() {
        let object = DummyComObject::create("ID3D11Texture2D", None);
        let mut out = std::ptr::null_mut();
        let hr = unsafe { dummy_query_interface(object.as_raw(), &IID_IUNKNOWN, &mut out) };
        assert_eq!(hr, S_OK);
        assert_eq!(out, object.as_raw());
        assert_eq!(unsafe { DummyComObject::ref_count(&object) }, 2);
        unsafe { crate::foreign::com_release(out) };

        let other = Guid {
            data1: 1,
            ..IID_IUNKNOWN
        };
        let hr = unsafe { dummy_query_interface(object.as_raw(), &other, &mut out) };
        assert_eq!(hr, E_NOINTERFACE);
        assert!(out.is_null());
    }
}
