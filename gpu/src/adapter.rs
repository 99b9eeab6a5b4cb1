//! Negotiated GPU adapter.

use std::sync::Arc;
use std::time::Duration;

use crate::broker;
use crate::device::{DeviceDescriptor, DeviceHealth, GpuDevice};
use crate::driver::{AdapterGrant, NativeAdapter, NativeDeviceRequest};
use crate::error::GpuError;
use crate::instance::GpuInstance;
use crate::types::{AdapterInfo, DeviceFeatures, RequestKind};

/// A backend GPU target produced by [`GpuInstance::request_adapter`].
///
/// An adapter may produce any number of devices.
pub struct GpuAdapter {
    instance: Arc<GpuInstance>,
    native: NativeAdapter,
    info: AdapterInfo,
    features: DeviceFeatures,
}

impl GpuAdapter {
    pub(crate) fn new(instance: Arc<GpuInstance>, grant: AdapterGrant) -> Self {
        Self {
            instance,
            native: grant.native,
            info: grant.info,
            features: grant.features,
        }
    }

    /// Get the instance this adapter was negotiated on.
    pub fn instance(&self) -> &Arc<GpuInstance> {
        &self.instance
    }

    /// Get information about the adapter.
    pub fn info(&self) -> &AdapterInfo {
        &self.info
    }

    /// Features devices created from this adapter may request.
    pub fn features(&self) -> DeviceFeatures {
        self.features
    }

    /// Request the adapter's default device with no optional features.
    ///
    /// Device-lost and uncaptured-error notifications are recorded on the
    /// device and can be polled with [`GpuDevice::status`].
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::DeviceRequestFailed`] if the driver refuses the
    /// device.
    pub fn request_device(&self) -> Result<Arc<GpuDevice>, GpuError> {
        self.request_device_with(&DeviceDescriptor::new())
    }

    /// Request a device described by `desc`.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::Unsupported`] if the adapter lacks a required
    /// feature and [`GpuError::DeviceRequestFailed`] if creation fails.
    pub fn request_device_with(&self, desc: &DeviceDescriptor) -> Result<Arc<GpuDevice>, GpuError> {
        let timeout = desc
            .request_timeout
            .or(self.instance.parameters().request_timeout);
        self.request_device_timeout(desc, timeout)
    }

    fn request_device_timeout(
        &self,
        desc: &DeviceDescriptor,
        timeout: Option<Duration>,
    ) -> Result<Arc<GpuDevice>, GpuError> {
        log::debug!(
            "Requesting device {:?} on '{}' with {:?}",
            desc.label,
            self.info.name,
            desc.required_features
        );

        let health = Arc::new(DeviceHealth::new(desc.event_sink.clone()));
        let request = NativeDeviceRequest {
            label: desc.label.clone(),
            required_features: desc.required_features,
            health: health.clone(),
        };

        let driver = self.instance.driver().as_ref();
        let native = broker::block_on(driver, RequestKind::Device, timeout, |callback| {
            driver.request_device(&self.native, request, callback)
        })?;

        log::info!("Device {:?} created on '{}'", desc.label, self.info.name);
        Ok(Arc::new(GpuDevice::new(
            self.instance.clone(),
            native,
            self.info.clone(),
            desc,
            health,
        )))
    }
}

impl std::fmt::Debug for GpuAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuAdapter")
            .field("info", &self.info)
            .field("features", &self.features)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DummyConfig;
    use crate::instance::{DriverSelection, InstanceParameters};
    use crate::types::BackendType;

    fn adapter(config: DummyConfig) -> Arc<GpuAdapter> {
        let params = InstanceParameters::new()
            .with_driver(DriverSelection::Dummy)
            .with_dummy_config(config);
        let instance = GpuInstance::with_parameters(params).unwrap();
        instance.request_adapter(BackendType::Null).unwrap()
    }

    #[test]
    fn test_default_device_has_no_features() {
        let device = adapter(DummyConfig::default()).request_device().unwrap();
        assert!(device.features().is_empty());
    }

    #[test]
    fn test_device_with_features() {
        let adapter = adapter(DummyConfig::default());
        let desc = DeviceDescriptor::new()
            .with_label("interop")
            .with_required_features(DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D12_RESOURCE);
        let device = adapter.request_device_with(&desc).unwrap();
        assert_eq!(device.label(), Some("interop"));
        assert!(
            device
                .features()
                .contains(DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D12_RESOURCE)
        );
    }

    #[test]
    fn test_device_creation_failure() {
        let adapter = adapter(DummyConfig::default().with_device_failure("out of memory"));
        let err = adapter.request_device().unwrap_err();
        assert_eq!(
            err,
            GpuError::DeviceRequestFailed("out of memory".to_string())
        );
    }

    #[test]
    fn test_adapter_produces_many_devices() {
        let adapter = adapter(DummyConfig::default());
        let first = adapter.request_device().unwrap();
        let second = adapter.request_device().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
