//! Command submission endpoint of a device.

use std::sync::Arc;

use crate::device::DeviceCore;
use crate::driver::NativeQueue;
use crate::error::GpuError;
use crate::shared_memory::SharedTexture;
use crate::types::{DeviceStatus, SubmissionIndex};

/// A device queue.
///
/// Queues are owned independently of the [`GpuDevice`](crate::GpuDevice) that
/// produced them and keep the native device alive.
pub struct GpuQueue {
    device: Arc<DeviceCore>,
    native: NativeQueue,
}

impl GpuQueue {
    pub(crate) fn new(device: Arc<DeviceCore>, native: NativeQueue) -> Self {
        Self { device, native }
    }

    /// Get the status of the owning device.
    pub fn device_status(&self) -> DeviceStatus {
        self.device.health.status()
    }

    /// Submit work that uses `textures`.
    ///
    /// Every texture must belong to this device and hold an open access.
    /// Fences passed to `begin_access` are waited on before the work runs.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::DeviceLost`] once the device has been lost, and
    /// [`GpuError::Access`] if a texture has no open access.
    pub fn submit(&self, textures: &[&SharedTexture]) -> Result<SubmissionIndex, GpuError> {
        self.device.health.check_alive()?;

        for texture in textures {
            if !Arc::ptr_eq(texture.device_core(), &self.device) {
                return Err(GpuError::InvalidParameter(
                    "texture belongs to another device".to_string(),
                ));
            }
            texture.note_submission()?;
        }

        let natives: Vec<_> = textures.iter().map(|t| t.native()).collect();
        let index = self
            .device
            .instance
            .driver()
            .submit(&self.native, &natives)?;
        log::trace!("Submitted work #{} ({} textures)", index, textures.len());
        Ok(SubmissionIndex(index))
    }
}

impl std::fmt::Debug for GpuQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuQueue")
            .field("native", &self.native)
            .field("device_status", &self.device_status())
            .finish()
    }
}
