//! Common utilities for GPU integration tests.
//!
//! Every context runs on the dummy driver with its own [`DummyStats`], so
//! tests can check that each native object was destroyed exactly once.

use std::sync::Arc;

use redlilium_gpu::{
    BackendType, DeviceDescriptor, DeviceFeatures, DriverSelection, DummyComObject, DummyConfig,
    DummyStats, ForeignRef, GpuAdapter, GpuDevice, GpuInstance, GpuQueue, InstanceParameters,
    SharedTextureMemory, SharedTextureMemoryDescriptor,
};

/// Initialize logging for test output.
pub fn init_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

/// Build dummy-driver parameters from `config`.
pub fn dummy_parameters(config: DummyConfig) -> InstanceParameters {
    InstanceParameters::new()
        .with_driver(DriverSelection::Dummy)
        .with_dummy_config(config)
}

/// Test context holding a negotiated device on the dummy driver.
pub struct TestContext {
    /// Counters for every dummy object created through this context.
    pub stats: Arc<DummyStats>,
    #[allow(dead_code)]
    pub instance: Arc<GpuInstance>,
    #[allow(dead_code)]
    pub adapter: Arc<GpuAdapter>,
    pub device: Arc<GpuDevice>,
    pub queue: Arc<GpuQueue>,
}

impl TestContext {
    /// Negotiate a device on `backend` with every shared texture feature the
    /// adapter offers.
    pub fn new(backend: BackendType) -> Self {
        Self::with_config(backend, DummyConfig::new())
    }

    /// Negotiate with a custom dummy configuration. The context installs its
    /// own stats counters.
    pub fn with_config(backend: BackendType, config: DummyConfig) -> Self {
        init_logging();
        let stats = DummyStats::new();
        let params = dummy_parameters(config.with_stats(stats.clone()));

        let instance = GpuInstance::with_parameters(params).expect("Failed to create instance");
        let adapter = instance
            .request_adapter(backend)
            .expect("Failed to get adapter");
        let features = adapter.features()
            & (DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D11_TEXTURE_2D
                | DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D12_RESOURCE);
        let device = adapter
            .request_device_with(
                &DeviceDescriptor::new()
                    .with_label("test device")
                    .with_required_features(features),
            )
            .expect("Failed to create device");
        let queue = device.queue().expect("Failed to get queue");

        Self {
            stats,
            instance,
            adapter,
            device,
            queue,
        }
    }

    /// Create a fake foreign resource of the kind the device can import.
    pub fn create_resource(&self) -> ForeignRef {
        if self
            .device
            .features()
            .contains(DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D12_RESOURCE)
        {
            DummyComObject::create("ID3D12Resource", Some(&self.stats))
        } else {
            DummyComObject::create("ID3D11Texture2D", Some(&self.stats))
        }
    }

    /// Import a fresh foreign resource.
    pub fn import(&self) -> Arc<SharedTextureMemory> {
        let resource = self.create_resource();
        let desc = if unsafe { DummyComObject::interface(&resource) } == "ID3D12Resource" {
            SharedTextureMemoryDescriptor::d3d12_resource(resource)
        } else {
            SharedTextureMemoryDescriptor::d3d11_texture_2d(resource)
        };
        self.device
            .import_shared_texture_memory(&desc.with_label("test memory"))
            .expect("Failed to import shared texture memory")
    }
}
