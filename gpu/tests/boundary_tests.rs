//! Integration tests for the handle-based boundary.
//!
//! Each test owns a [`Boundary`] so the handle tables and dummy counters are
//! not shared between tests.

mod common;

use rstest::rstest;

use common::{dummy_parameters, init_logging};
use redlilium_gpu::ffi::{
    AdapterHandle, Boundary, DeviceHandle, InstanceHandle, SharedTextureMemoryHandle,
    TextureHandle, last_error,
};
use redlilium_gpu::{
    BackendType, DeviceFeatures, DummyComObject, DummyConfig, DummyObjectKind, DummyStats,
    ErrorCode, NativeObjectKind,
};

fn boundary(config: DummyConfig) -> (Boundary, std::sync::Arc<DummyStats>) {
    init_logging();
    let stats = DummyStats::new();
    let boundary = Boundary::new(dummy_parameters(config.with_stats(stats.clone())));
    (boundary, stats)
}

const ALL_SHARED_FEATURES: u32 = DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D11_TEXTURE_2D.bits()
    | DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D12_RESOURCE.bits()
    | DeviceFeatures::SHARED_FENCE_DXGI_SHARED_HANDLE.bits();

struct Negotiated {
    instance: InstanceHandle,
    adapter: AdapterHandle,
    device: DeviceHandle,
}

fn negotiate(boundary: &Boundary, backend: BackendType, features: u32) -> Negotiated {
    let instance = boundary.instance_create();
    assert!(!instance.is_null());
    let adapter = boundary.instance_request_adapter(instance, backend as u32);
    assert!(!adapter.is_null(), "{:?}", last_error());
    let device = boundary.adapter_request_device_with_features(instance, adapter, features);
    assert!(!device.is_null(), "{:?}", last_error());
    Negotiated {
        instance,
        adapter,
        device,
    }
}

#[test]
fn test_device_destroyed_exactly_once() {
    let (b, stats) = boundary(DummyConfig::new());
    let n = negotiate(&b, BackendType::Null, 0);

    b.device_add_ref(n.device);
    b.device_release(n.device);
    assert_eq!(stats.destroyed(DummyObjectKind::Device), 0);
    assert!(!b.device_is_lost(n.device));

    b.device_release(n.device);
    assert_eq!(stats.destroyed(DummyObjectKind::Device), 1);

    b.adapter_release(n.adapter);
    b.instance_release(n.instance);
    assert!(b.report().is_empty());
    assert_eq!(stats.total_live(), 0);
}

#[rstest]
#[case::null(BackendType::Null, true)]
#[case::d3d11(BackendType::D3D11, true)]
#[case::d3d12(BackendType::D3D12, true)]
#[case::vulkan(BackendType::Vulkan, false)]
#[case::metal(BackendType::Metal, false)]
fn test_adapter_availability(#[case] backend: BackendType, #[case] available: bool) {
    let (b, _stats) = boundary(DummyConfig::new());
    let instance = b.instance_create();
    let adapter = b.instance_request_adapter(instance, backend as u32);
    assert_eq!(!adapter.is_null(), available);
    if !available {
        assert_eq!(last_error(), ErrorCode::AdapterUnavailable);
    }
    b.adapter_release(adapter);
    b.instance_release(instance);
    assert!(b.report().is_empty());
}

#[test]
fn test_adapter_keeps_instance_alive() {
    let (b, _stats) = boundary(DummyConfig::new());
    let n = negotiate(&b, BackendType::Null, 0);
    b.device_release(n.device);
    b.instance_release(n.instance);

    // The adapter keeps the first instance alive, so no second one exists.
    assert!(b.instance_create().is_null());
    b.adapter_release(n.adapter);

    let second = b.instance_create();
    assert!(!second.is_null());
    let device = b.adapter_request_device(second, n.adapter);
    assert!(device.is_null());
    assert_eq!(last_error(), ErrorCode::StaleHandle);
    b.instance_release(second);
}

#[test]
fn test_full_scenario_leaves_nothing_behind() {
    let (b, stats) = boundary(DummyConfig::new());
    let n = negotiate(&b, BackendType::D3D12, ALL_SHARED_FEATURES);
    let queue = b.device_get_queue(n.device);
    assert!(!queue.is_null());

    let resource = DummyComObject::create("ID3D12Resource", Some(&stats));
    let memory =
        unsafe { b.device_import(n.device, resource.as_raw(), true, Some("frame".into())) };
    assert!(!memory.is_null(), "{:?}", last_error());
    let texture = b.shared_texture_memory_create_texture(memory);
    assert!(!texture.is_null());

    for _ in 0..3 {
        assert!(b.shared_texture_memory_begin_access(memory, texture));
        assert!(b.queue_submit(queue) > 0);
        assert!(b.shared_texture_memory_end_access(memory, texture));
    }

    let d3d12 = b.device_copy_native(n.device, NativeObjectKind::D3D12Device);
    assert!(!d3d12.is_null());
    unsafe { redlilium_gpu::foreign::com_release(d3d12) };

    b.texture_release(texture);
    b.shared_texture_memory_release(memory);
    b.queue_release(queue);
    b.device_release(n.device);
    b.adapter_release(n.adapter);
    b.instance_release(n.instance);

    assert!(b.report().is_empty());
    assert_eq!(unsafe { DummyComObject::ref_count(&resource) }, 1);
    drop(resource);
    assert_eq!(stats.total_live(), 0);
    for kind in DummyObjectKind::ALL {
        assert_eq!(stats.created(kind), stats.destroyed(kind), "{kind:?}");
    }
}

#[test]
fn test_begin_end_protocol() {
    let (b, _stats) = boundary(DummyConfig::new());
    let features = DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D11_TEXTURE_2D
        | DeviceFeatures::SHARED_FENCE_DXGI_SHARED_HANDLE;
    let n = negotiate(&b, BackendType::D3D11, features.bits());
    let resource = DummyComObject::create("ID3D11Texture2D", None);
    let memory = unsafe { b.device_import(n.device, resource.as_raw(), false, None) };
    let texture = b.shared_texture_memory_create_texture(memory);

    assert!(!b.shared_texture_memory_end_access(memory, texture));
    assert_eq!(last_error(), ErrorCode::AccessProtocol);

    assert!(b.shared_texture_memory_begin_access(memory, texture));
    assert!(!b.shared_texture_memory_begin_access(memory, texture));
    assert_eq!(last_error(), ErrorCode::AccessProtocol);
    assert!(b.shared_texture_memory_end_access(memory, texture));
    assert_eq!(last_error(), ErrorCode::None);

    assert_eq!(b.clear(), 5);
}

#[test]
fn test_two_textures_are_independent() {
    let (b, stats) = boundary(DummyConfig::new());
    let n = negotiate(&b, BackendType::D3D12, ALL_SHARED_FEATURES);
    let resource = DummyComObject::create("ID3D12Resource", None);
    let memory = unsafe { b.device_import(n.device, resource.as_raw(), true, None) };
    let first = b.shared_texture_memory_create_texture(memory);
    let second = b.shared_texture_memory_create_texture(memory);
    assert_ne!(first, second);

    b.texture_add_ref(first);
    b.texture_release(first);
    b.texture_release(first);
    assert_eq!(stats.live(DummyObjectKind::Texture), 1);

    b.shared_texture_memory_release(memory);
    assert!(b.shared_texture_memory_create_texture(memory).is_null());
    assert_eq!(last_error(), ErrorCode::StaleHandle);
    assert_eq!(stats.live(DummyObjectKind::SharedTextureMemory), 1);

    b.texture_release(second);
    assert_eq!(stats.live(DummyObjectKind::SharedTextureMemory), 0);
    assert_eq!(b.clear(), 3);
}

#[test]
fn test_import_with_null_device() {
    let (b, _stats) = boundary(DummyConfig::new());
    let resource = DummyComObject::create("ID3D11Texture2D", None);
    let memory = unsafe { b.device_import(DeviceHandle::NULL, resource.as_raw(), false, None) };
    assert_eq!(memory, SharedTextureMemoryHandle::NULL);
    assert_eq!(unsafe { DummyComObject::ref_count(&resource) }, 1);
}

#[test]
fn test_import_requires_feature() {
    let (b, _stats) = boundary(DummyConfig::new());
    let n = negotiate(&b, BackendType::D3D12, 0);
    let resource = DummyComObject::create("ID3D12Resource", None);
    let memory = unsafe { b.device_import(n.device, resource.as_raw(), true, None) };
    assert!(memory.is_null());
    assert_eq!(last_error(), ErrorCode::Unsupported);
    assert_eq!(b.clear(), 3);
}

#[test]
fn test_device_lost_after_100_submissions() {
    let (b, _stats) = boundary(DummyConfig::new().with_device_loss_after(100));
    let n = negotiate(&b, BackendType::Null, 0);
    let queue = b.device_get_queue(n.device);

    for i in 1..=100 {
        assert_eq!(b.queue_submit(queue), i);
    }
    assert!(b.device_is_lost(n.device));
    assert_eq!(b.queue_submit(queue), 0);
    assert_eq!(last_error(), ErrorCode::DeviceLost);
    assert!(b.device_get_queue(n.device).is_null());
    assert_eq!(last_error(), ErrorCode::DeviceLost);

    assert_eq!(b.clear(), 4);
}

#[test]
fn test_unknown_feature_bits() {
    let (b, _stats) = boundary(DummyConfig::new());
    let instance = b.instance_create();
    let adapter = b.instance_request_adapter(instance, BackendType::Null as u32);
    let device = b.adapter_request_device_with_features(instance, adapter, 1 << 31);
    assert!(device.is_null());
    assert_eq!(last_error(), ErrorCode::InvalidParameter);
    assert_eq!(b.clear(), 2);
}

#[test]
fn test_null_texture_handles() {
    let (b, _stats) = boundary(DummyConfig::new());
    b.texture_release(TextureHandle::NULL);
    assert_eq!(last_error(), ErrorCode::None);
    assert!(b.report().is_empty());
}

#[test]
fn test_rejecting_driver_returns_null() {
    let (b, _stats) = boundary(DummyConfig::new().with_reject_all(true));
    let instance = b.instance_create();
    for backend in BackendType::ALL {
        b.instance_process_events(instance);
        assert!(b.instance_request_adapter(instance, backend as u32).is_null());
        assert_eq!(last_error(), ErrorCode::AdapterUnavailable);
    }
    b.instance_release(instance);
    assert!(b.report().is_empty());
}

#[test]
fn test_texture_release_order_leaves_memory_count() {
    let (b, _stats) = boundary(DummyConfig::new());
    let n = negotiate(&b, BackendType::D3D12, ALL_SHARED_FEATURES);
    let resource = DummyComObject::create("ID3D12Resource", None);
    let memory = unsafe { b.device_import(n.device, resource.as_raw(), true, None) };
    assert_eq!(b.report().memories.references, 1);

    let first = b.shared_texture_memory_create_texture(memory);
    let second = b.shared_texture_memory_create_texture(memory);
    assert_eq!(b.report().memories.references, 1);
    b.texture_release(second);
    b.texture_release(first);
    assert_eq!(b.report().memories.references, 1);
    assert_eq!(b.report().textures.live, 0);

    b.shared_texture_memory_release(memory);
    assert_eq!(b.clear(), 3);
}
