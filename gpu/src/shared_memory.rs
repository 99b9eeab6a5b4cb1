//! Shared texture memory imported from a foreign graphics API.
//!
//! A [`SharedTextureMemory`] binds a D3D11 texture or D3D12 resource to a
//! [`GpuDevice`](crate::GpuDevice). Any number of [`SharedTexture`]s can be
//! minted from it, and each must be bracketed by
//! [`SharedTextureMemory::begin_access`] and
//! [`SharedTextureMemory::end_access`] while this side uses it.
//!
//! # Example
//!
//! ```ignore
//! let memory = device.import_shared_texture_memory(
//!     &SharedTextureMemoryDescriptor::d3d12_resource(resource).with_label("video frame"),
//! )?;
//! let texture = memory.create_texture()?;
//!
//! memory.begin_access(&texture, &BeginAccessDescriptor::new())?;
//! queue.submit(&[&texture])?;
//! let state = memory.end_access(&texture)?;
//! state.wait(Duration::from_secs(1));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::access::{
    AccessTracker, AccessViolation, BeginAccessDescriptor, EndAccessState, TextureId,
};
use crate::device::DeviceCore;
use crate::driver::{NativeSharedMemory, NativeTexture};
use crate::error::GpuError;
use crate::foreign::ForeignRef;
use crate::types::{DeviceFeatures, SharedTextureProperties};

/// A foreign resource to import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForeignResource {
    /// An `ID3D11Texture2D`.
    D3D11Texture2D(ForeignRef),
    /// An `ID3D12Resource`.
    D3D12Resource(ForeignRef),
}

impl ForeignResource {
    /// Get the foreign object.
    pub fn foreign(&self) -> &ForeignRef {
        match self {
            Self::D3D11Texture2D(object) | Self::D3D12Resource(object) => object,
        }
    }

    /// Device feature required to import this kind of resource.
    pub fn required_feature(&self) -> DeviceFeatures {
        match self {
            Self::D3D11Texture2D(_) => DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D11_TEXTURE_2D,
            Self::D3D12Resource(_) => DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D12_RESOURCE,
        }
    }

    /// Interface name of the resource.
    pub fn interface_name(&self) -> &'static str {
        match self {
            Self::D3D11Texture2D(_) => "ID3D11Texture2D",
            Self::D3D12Resource(_) => "ID3D12Resource",
        }
    }
}

/// Parameters for importing shared texture memory.
#[derive(Debug, Clone)]
pub struct SharedTextureMemoryDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Resource to import.
    pub resource: ForeignResource,
}

impl SharedTextureMemoryDescriptor {
    /// Import an `ID3D11Texture2D`.
    pub fn d3d11_texture_2d(texture: ForeignRef) -> Self {
        Self {
            label: None,
            resource: ForeignResource::D3D11Texture2D(texture),
        }
    }

    /// Import an `ID3D12Resource`.
    pub fn d3d12_resource(resource: ForeignRef) -> Self {
        Self {
            label: None,
            resource: ForeignResource::D3D12Resource(resource),
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// State shared by a memory object and its textures.
pub(crate) struct MemoryCore {
    device: Arc<DeviceCore>,
    native: NativeSharedMemory,
    resource: ForeignResource,
    label: Option<String>,
    properties: SharedTextureProperties,
    access: AccessTracker,
    next_texture: AtomicU64,
}

/// Foreign resource imported into a device.
///
/// Textures minted from the memory keep the import alive on their own, so
/// their lifetimes never affect ownership of the memory object itself.
pub struct SharedTextureMemory {
    core: Arc<MemoryCore>,
}

impl SharedTextureMemory {
    pub(crate) fn import(
        device: &Arc<DeviceCore>,
        desc: &SharedTextureMemoryDescriptor,
    ) -> Result<Self, GpuError> {
        device.health.check_alive()?;
        let (native, properties) = device.instance.driver().import_shared_texture_memory(
            &device.native,
            &desc.resource,
            desc.label.as_deref(),
        )?;
        log::debug!(
            "Imported {} as shared texture memory {:?} ({}x{} {:?})",
            desc.resource.interface_name(),
            desc.label,
            properties.width,
            properties.height,
            properties.format
        );

        Ok(Self {
            core: Arc::new(MemoryCore {
                device: device.clone(),
                native,
                resource: desc.resource.clone(),
                label: desc.label.clone(),
                properties,
                access: AccessTracker::new(),
                next_texture: AtomicU64::new(0),
            }),
        })
    }

    /// Get the debug label.
    pub fn label(&self) -> Option<&str> {
        self.core.label.as_deref()
    }

    /// Get the imported texture's properties.
    pub fn properties(&self) -> SharedTextureProperties {
        self.core.properties
    }

    /// Get the imported foreign resource.
    pub fn resource(&self) -> &ForeignResource {
        &self.core.resource
    }

    /// Number of textures holding an open access.
    pub fn open_access_count(&self) -> usize {
        self.core.access.open_count()
    }

    /// Check whether `texture` holds an open access.
    pub fn is_accessing(&self, texture: &SharedTexture) -> bool {
        self.core.access.is_accessing(texture.id)
    }

    /// Mint a new texture bound to this memory.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::DeviceLost`] if the device was lost.
    pub fn create_texture(&self) -> Result<Arc<SharedTexture>, GpuError> {
        self.core.device.health.check_alive()?;
        let native = self
            .core
            .device
            .instance
            .driver()
            .create_texture(&self.core.native)?;
        let id = TextureId(self.core.next_texture.fetch_add(1, Ordering::Relaxed) + 1);
        log::trace!("Created shared texture {} from {:?}", id.0, self.core.label);
        Ok(Arc::new(SharedTexture {
            memory: self.core.clone(),
            native,
            id,
        }))
    }

    /// Begin this side's access to `texture`.
    ///
    /// Must be called before any submitted work references the texture.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::Access`] if the texture already has an open access
    /// or another texture of this memory holds an exclusive one, and
    /// [`GpuError::AccessDenied`] if the platform refuses access.
    pub fn begin_access(
        &self,
        texture: &SharedTexture,
        desc: &BeginAccessDescriptor,
    ) -> Result<(), GpuError> {
        self.check_owner(texture)?;
        self.core.device.health.check_alive()?;
        self.core.access.begin(texture.id, desc)?;

        let result = self.core.device.instance.driver().begin_access(
            &self.core.native,
            &texture.native,
            desc,
        );
        if let Err(e) = result {
            log::warn!("begin_access on texture {} failed: {}", texture.id.0, e);
            // Roll back the bookkeeping; the access never started.
            let _ = self.core.access.end(texture.id);
            return Err(e);
        }
        Ok(())
    }

    /// End this side's access to `texture`.
    ///
    /// The returned state lists the fences the other side must wait on
    /// before using the texture.
    ///
    /// The access stays open when this fails, on both sides, so the call can
    /// be repeated; dropping the texture ends it regardless.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::Access`] if no access is open and
    /// [`GpuError::DeviceLost`] if the device was lost.
    pub fn end_access(&self, texture: &SharedTexture) -> Result<EndAccessState, GpuError> {
        self.check_owner(texture)?;
        if !self.core.access.is_accessing(texture.id) {
            return Err(AccessViolation::NotAccessing.into());
        }
        self.core.device.health.check_alive()?;

        let mut state = self
            .core
            .device
            .instance
            .driver()
            .end_access(&self.core.native, &texture.native)?;
        let session = self.core.access.end(texture.id)?;
        state.initialized |= session.initialized;
        Ok(state)
    }

    fn check_owner(&self, texture: &SharedTexture) -> Result<(), GpuError> {
        if Arc::ptr_eq(&texture.memory, &self.core) {
            Ok(())
        } else {
            Err(AccessViolation::ForeignTexture.into())
        }
    }
}

impl std::fmt::Debug for SharedTextureMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTextureMemory")
            .field("label", &self.core.label)
            .field("resource", &self.core.resource.interface_name())
            .field("properties", &self.core.properties)
            .field("open_accesses", &self.open_access_count())
            .finish()
    }
}

/// Texture minted from [`SharedTextureMemory`].
pub struct SharedTexture {
    memory: Arc<MemoryCore>,
    native: NativeTexture,
    id: TextureId,
}

impl SharedTexture {
    /// Get the texture's identifier within its memory.
    pub fn id(&self) -> TextureId {
        self.id
    }

    /// Get the texture's properties.
    pub fn properties(&self) -> SharedTextureProperties {
        self.memory.properties
    }

    /// Check whether the texture holds an open access.
    pub fn is_accessing(&self) -> bool {
        self.memory.access.is_accessing(self.id)
    }

    pub(crate) fn device_core(&self) -> &Arc<DeviceCore> {
        &self.memory.device
    }

    pub(crate) fn native(&self) -> &NativeTexture {
        &self.native
    }

    pub(crate) fn note_submission(&self) -> Result<(), GpuError> {
        self.memory
            .access
            .note_submission(self.id)
            .map_err(GpuError::from)
    }
}

impl Drop for SharedTexture {
    fn drop(&mut self) {
        if self.memory.access.end(self.id).is_ok() {
            log::warn!(
                "Shared texture {} dropped with an open access; ending it",
                self.id.0
            );
            if let Err(e) = self
                .memory
                .device
                .instance
                .driver()
                .end_access(&self.memory.native, &self.native)
            {
                log::warn!("Implicit end_access failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for SharedTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTexture")
            .field("id", &self.id)
            .field("accessing", &self.is_accessing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceDescriptor;
    use crate::driver::{DummyComObject, DummyConfig};
    use crate::instance::{DriverSelection, GpuInstance, InstanceParameters};
    use crate::types::BackendType;

    fn device(features: DeviceFeatures) -> Arc<crate::GpuDevice> {
        let params = InstanceParameters::new()
            .with_driver(DriverSelection::Dummy)
            .with_dummy_config(DummyConfig::default());
        GpuInstance::with_parameters(params)
            .unwrap()
            .request_adapter(BackendType::Null)
            .unwrap()
            .request_device_with(&DeviceDescriptor::new().with_required_features(features))
            .unwrap()
    }

    fn driver_open_accesses(memory: &SharedTextureMemory) -> usize {
        match &memory.core.native {
            NativeSharedMemory::Dummy(native) => native.open_accesses(),
        }
    }

    fn d3d12_memory() -> Arc<SharedTextureMemory> {
        let device = device(DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D12_RESOURCE);
        let resource = DummyComObject::create("ID3D12Resource", None);
        device
            .import_shared_texture_memory(
                &SharedTextureMemoryDescriptor::d3d12_resource(resource).with_label("frame"),
            )
            .unwrap()
    }

    #[test]
    fn test_import_requires_feature() {
        let device = device(DeviceFeatures::empty());
        let resource = DummyComObject::create("ID3D12Resource", None);
        let err = device
            .import_shared_texture_memory(&SharedTextureMemoryDescriptor::d3d12_resource(resource))
            .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_import_takes_a_reference() {
        let device = device(DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D11_TEXTURE_2D);
        let texture = DummyComObject::create("ID3D11Texture2D", None);
        let desc = SharedTextureMemoryDescriptor::d3d11_texture_2d(texture.clone());
        let memory = device.import_shared_texture_memory(&desc).unwrap();
        drop(desc);

        // Ours, plus the memory's own copy and the one the driver holds.
        assert_eq!(unsafe { DummyComObject::ref_count(&texture) }, 3);
        drop(memory);
        assert_eq!(unsafe { DummyComObject::ref_count(&texture) }, 1);
    }

    #[test]
    fn test_begin_end_access() {
        let memory = d3d12_memory();
        let texture = memory.create_texture().unwrap();

        memory
            .begin_access(&texture, &BeginAccessDescriptor::new())
            .unwrap();
        assert!(texture.is_accessing());

        let state = memory.end_access(&texture).unwrap();
        assert!(state.initialized);
        assert!(state.is_complete());
        assert!(!texture.is_accessing());
    }

    #[test]
    fn test_end_without_begin_is_detected() {
        let memory = d3d12_memory();
        let texture = memory.create_texture().unwrap();
        assert_eq!(
            memory.end_access(&texture).unwrap_err(),
            GpuError::Access(AccessViolation::NotAccessing)
        );
    }

    #[test]
    fn test_texture_from_other_memory_rejected() {
        let first = d3d12_memory();
        let second = d3d12_memory();
        let texture = second.create_texture().unwrap();
        assert_eq!(
            first
                .begin_access(&texture, &BeginAccessDescriptor::new())
                .unwrap_err(),
            GpuError::Access(AccessViolation::ForeignTexture)
        );
    }

    #[test]
    fn test_textures_do_not_own_memory_handle() {
        let memory = d3d12_memory();
        let a = memory.create_texture().unwrap();
        let b = memory.create_texture().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(Arc::strong_count(&memory), 1);
        drop(b);
        drop(a);
        assert_eq!(Arc::strong_count(&memory), 1);
    }

    #[test]
    fn test_end_access_on_lost_device_keeps_access_open() {
        let params = InstanceParameters::new()
            .with_driver(DriverSelection::Dummy)
            .with_dummy_config(DummyConfig::default().with_device_loss_after(1));
        let device = GpuInstance::with_parameters(params)
            .unwrap()
            .request_adapter(BackendType::D3D12)
            .unwrap()
            .request_device_with(
                &DeviceDescriptor::new()
                    .with_required_features(DeviceFeatures::SHARED_TEXTURE_MEMORY_D3D12_RESOURCE),
            )
            .unwrap();
        let queue = device.queue().unwrap();
        let memory = device
            .import_shared_texture_memory(&SharedTextureMemoryDescriptor::d3d12_resource(
                DummyComObject::create("ID3D12Resource", None),
            ))
            .unwrap();
        let texture = memory.create_texture().unwrap();

        memory
            .begin_access(&texture, &BeginAccessDescriptor::new())
            .unwrap();
        queue.submit(&[&texture]).unwrap();
        assert!(device.is_lost());

        for _ in 0..2 {
            assert!(matches!(
                memory.end_access(&texture),
                Err(GpuError::DeviceLost { .. })
            ));
            assert!(texture.is_accessing());
            assert_eq!(driver_open_accesses(&memory), 1);
        }

        drop(texture);
        assert_eq!(memory.open_access_count(), 0);
        assert_eq!(driver_open_accesses(&memory), 0);
    }

    #[test]
    fn test_drop_with_open_access_ends_it() {
        let memory = d3d12_memory();
        let texture = memory.create_texture().unwrap();
        memory
            .begin_access(&texture, &BeginAccessDescriptor::new())
            .unwrap();
        assert_eq!(memory.open_access_count(), 1);
        assert_eq!(driver_open_accesses(&memory), 1);
        drop(texture);
        assert_eq!(memory.open_access_count(), 0);
        assert_eq!(driver_open_accesses(&memory), 0);
    }
}
