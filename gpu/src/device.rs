//! GPU device.
//!
//! The [`GpuDevice`] is the active execution context negotiated from an
//! adapter. It hands out queues, imports shared texture memory and exposes
//! the platform objects behind it for interop.
//!
//! Device loss and errors the driver cannot attribute to a call arrive out of
//! band, possibly on a driver thread. They are recorded in [`DeviceHealth`],
//! which can be polled, and forwarded to an optional [`DeviceEventSink`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::driver::{NativeDevice, NativeObjectKind};
use crate::error::GpuError;
use crate::foreign::ForeignRef;
use crate::instance::GpuInstance;
use crate::queue::GpuQueue;
use crate::shared_memory::{SharedTextureMemory, SharedTextureMemoryDescriptor};
use crate::types::{
    AdapterInfo, DeviceEvent, DeviceFeatures, DeviceLostInfo, DeviceLostReason, DeviceStatus,
    UncapturedErrorKind,
};

/// Caller-supplied receiver of device events.
///
/// May be called from any thread.
pub type DeviceEventSink = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

/// Parameters for requesting a device.
#[derive(Clone, Default)]
pub struct DeviceDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Optional features the device must support.
    pub required_features: DeviceFeatures,
    /// Receiver of device-lost and uncaptured-error events.
    pub event_sink: Option<DeviceEventSink>,
    /// Bound on the blocking request, overriding the instance default.
    pub request_timeout: Option<Duration>,
}

impl DeviceDescriptor {
    /// Create a descriptor with no label and no optional features.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the required features.
    pub fn with_required_features(mut self, features: DeviceFeatures) -> Self {
        self.required_features = features;
        self
    }

    /// Set the event sink.
    pub fn with_event_sink(
        mut self,
        sink: impl Fn(&DeviceEvent) + Send + Sync + 'static,
    ) -> Self {
        self.event_sink = Some(Arc::new(sink));
        self
    }

    /// Bound the blocking request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDescriptor")
            .field("label", &self.label)
            .field("required_features", &self.required_features)
            .field("event_sink", &self.event_sink.is_some())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Out-of-band state of a device, shared with the driver.
pub struct DeviceHealth {
    lost: AtomicBool,
    lost_info: Mutex<Option<DeviceLostInfo>>,
    uncaptured_errors: AtomicU64,
    sink: Option<DeviceEventSink>,
}

impl DeviceHealth {
    pub(crate) fn new(sink: Option<DeviceEventSink>) -> Self {
        Self {
            lost: AtomicBool::new(false),
            lost_info: Mutex::new(None),
            uncaptured_errors: AtomicU64::new(0),
            sink,
        }
    }

    /// Check if the device has been lost.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Get the pollable status.
    pub fn status(&self) -> DeviceStatus {
        if self.is_lost() {
            DeviceStatus::Lost
        } else {
            DeviceStatus::Alive
        }
    }

    /// Details of the loss, if the device was lost.
    pub fn lost_info(&self) -> Option<DeviceLostInfo> {
        self.lost_info.lock().clone()
    }

    /// Number of uncaptured errors reported so far.
    pub fn uncaptured_error_count(&self) -> u64 {
        self.uncaptured_errors.load(Ordering::Acquire)
    }

    /// Record that the device was lost.
    ///
    /// Only the first loss is recorded and forwarded. Returns whether this
    /// call recorded it.
    pub fn mark_lost(&self, info: DeviceLostInfo) -> bool {
        {
            let mut slot = self.lost_info.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(info.clone());
            self.lost.store(true, Ordering::Release);
        }

        match info.reason {
            DeviceLostReason::Destroyed => log::debug!("GPU device destroyed"),
            DeviceLostReason::Unknown => log::warn!("GPU device lost: {}", info.message),
        }
        if let Some(sink) = &self.sink {
            sink(&DeviceEvent::Lost(info));
        }
        true
    }

    /// Record an error the driver could not attribute to a call.
    pub fn report_uncaptured_error(&self, kind: UncapturedErrorKind, message: String) {
        log::error!("Uncaptured GPU error ({:?}): {}", kind, message);
        self.uncaptured_errors.fetch_add(1, Ordering::AcqRel);
        if let Some(sink) = &self.sink {
            sink(&DeviceEvent::UncapturedError { kind, message });
        }
    }

    /// The error returned by operations on a lost device.
    pub fn lost_error(&self) -> GpuError {
        let info = self.lost_info();
        GpuError::DeviceLost {
            reason: info.as_ref().map_or(DeviceLostReason::Unknown, |i| i.reason),
            message: info.map(|i| i.message).unwrap_or_default(),
        }
    }

    /// Fail with [`GpuError::DeviceLost`] if the device was lost.
    pub fn check_alive(&self) -> Result<(), GpuError> {
        if self.is_lost() {
            Err(self.lost_error())
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for DeviceHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHealth")
            .field("lost_info", &self.lost_info())
            .field("uncaptured_errors", &self.uncaptured_error_count())
            .finish_non_exhaustive()
    }
}

/// State shared by a device and everything created from it.
///
/// Queues and shared memory hold this instead of the [`GpuDevice`], so the
/// native device outlives the device handle while they exist.
pub(crate) struct DeviceCore {
    pub instance: Arc<GpuInstance>,
    pub native: NativeDevice,
    pub adapter_info: AdapterInfo,
    pub features: DeviceFeatures,
    pub health: Arc<DeviceHealth>,
}

/// An active GPU execution context.
///
/// # Thread Safety
///
/// `GpuDevice` is `Send + Sync` and can be safely shared across threads.
///
/// # Example
///
/// ```ignore
/// let device = adapter.request_device()?;
/// let queue = device.queue()?;
/// if device.is_lost() {
///     // renegotiate
/// }
/// ```
pub struct GpuDevice {
    core: Arc<DeviceCore>,
    label: Option<String>,
}

impl GpuDevice {
    pub(crate) fn new(
        instance: Arc<GpuInstance>,
        native: NativeDevice,
        adapter_info: AdapterInfo,
        desc: &DeviceDescriptor,
        health: Arc<DeviceHealth>,
    ) -> Self {
        Self {
            core: Arc::new(DeviceCore {
                instance,
                native,
                adapter_info,
                features: desc.required_features,
                health,
            }),
            label: desc.label.clone(),
        }
    }

    pub(crate) fn core(&self) -> &Arc<DeviceCore> {
        &self.core
    }

    /// Get the instance this device belongs to.
    pub fn instance(&self) -> &Arc<GpuInstance> {
        &self.core.instance
    }

    /// Get the debug label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Features enabled on this device.
    pub fn features(&self) -> DeviceFeatures {
        self.core.features
    }

    /// Information about the adapter the device was created on.
    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.core.adapter_info
    }

    /// Get the pollable device status.
    pub fn status(&self) -> DeviceStatus {
        self.core.health.status()
    }

    /// Check if the device has been lost.
    pub fn is_lost(&self) -> bool {
        self.core.health.is_lost()
    }

    /// Details of the loss, if the device was lost.
    pub fn lost_info(&self) -> Option<DeviceLostInfo> {
        self.core.health.lost_info()
    }

    /// Number of uncaptured driver errors reported for this device.
    pub fn uncaptured_error_count(&self) -> u64 {
        self.core.health.uncaptured_error_count()
    }

    /// Get a new reference to the device's queue.
    ///
    /// Every call returns an independently owned queue.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::DeviceLost`] if the device was lost.
    pub fn queue(&self) -> Result<Arc<GpuQueue>, GpuError> {
        self.core.health.check_alive()?;
        let native = self.core.instance.driver().get_queue(&self.core.native)?;
        Ok(Arc::new(GpuQueue::new(self.core.clone(), native)))
    }

    /// Import a foreign resource as shared texture memory.
    ///
    /// The import takes its own reference to the foreign resource and holds
    /// it for as long as the memory object exists.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::Unsupported`] if the device was created without the
    /// matching shared texture memory feature.
    pub fn import_shared_texture_memory(
        &self,
        desc: &SharedTextureMemoryDescriptor,
    ) -> Result<Arc<SharedTextureMemory>, GpuError> {
        SharedTextureMemory::import(&self.core, desc).map(Arc::new)
    }

    /// Extract a platform object backing this device.
    ///
    /// The returned reference is owned by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::Unsupported`] if the device does not run on the
    /// backend that owns such an object.
    pub fn copy_native_object(&self, kind: NativeObjectKind) -> Result<ForeignRef, GpuError> {
        self.core.health.check_alive()?;
        log::trace!("Copying native {}", kind.interface_name());
        self.core
            .instance
            .driver()
            .copy_native_object(&self.core.native, kind)
    }

    /// Get the `ID3D11Device` of a D3D11 device.
    pub fn copy_d3d11_device(&self) -> Result<ForeignRef, GpuError> {
        self.copy_native_object(NativeObjectKind::D3D11Device)
    }

    /// Get the `ID3D12Device` of a D3D12 device.
    pub fn copy_d3d12_device(&self) -> Result<ForeignRef, GpuError> {
        self.copy_native_object(NativeObjectKind::D3D12Device)
    }

    /// Get the `ID3D11On12Device` layered over a D3D12 device.
    pub fn copy_d3d11on12_device(&self) -> Result<ForeignRef, GpuError> {
        self.copy_native_object(NativeObjectKind::D3D11On12Device)
    }

    /// Get the `ID3D12CommandQueue` of a D3D12 device.
    pub fn copy_d3d12_command_queue(&self) -> Result<ForeignRef, GpuError> {
        self.copy_native_object(NativeObjectKind::D3D12CommandQueue)
    }
}

impl std::fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDevice")
            .field("label", &self.label)
            .field("adapter", &self.core.adapter_info.name)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_health_records_first_loss_only() {
        let events = Arc::new(AtomicUsize::new(0));
        let sink: DeviceEventSink = {
            let events = events.clone();
            Arc::new(move |_event: &DeviceEvent| {
                events.fetch_add(1, Ordering::SeqCst);
            })
        };
        let health = DeviceHealth::new(Some(sink));
        assert_eq!(health.status(), DeviceStatus::Alive);
        assert!(health.check_alive().is_ok());

        assert!(health.mark_lost(DeviceLostInfo {
            reason: DeviceLostReason::Unknown,
            message: "hung".to_string(),
        }));
        assert!(!health.mark_lost(DeviceLostInfo {
            reason: DeviceLostReason::Destroyed,
            message: "dropped".to_string(),
        }));

        assert_eq!(health.status(), DeviceStatus::Lost);
        assert_eq!(events.load(Ordering::SeqCst), 1);
        assert_eq!(
            health.check_alive(),
            Err(GpuError::DeviceLost {
                reason: DeviceLostReason::Unknown,
                message: "hung".to_string(),
            })
        );
    }

    #[test]
    fn test_health_counts_uncaptured_errors() {
        let health = DeviceHealth::new(None);
        health.report_uncaptured_error(UncapturedErrorKind::Validation, "bad".to_string());
        health.report_uncaptured_error(UncapturedErrorKind::OutOfMemory, "oom".to_string());
        assert_eq!(health.uncaptured_error_count(), 2);
        assert!(!health.is_lost());
    }

    #[test]
    fn test_descriptor_builder() {
        let desc = DeviceDescriptor::new()
            .with_label("main")
            .with_required_features(DeviceFeatures::SHARED_FENCE_DXGI_SHARED_HANDLE)
            .with_event_sink(|_| {})
            .with_request_timeout(Duration::from_secs(1));
        assert_eq!(desc.label.as_deref(), Some("main"));
        assert!(desc.event_sink.is_some());
        assert!(format!("{desc:?}").contains("main"));
    }
}
