//! Process-wide GPU state.
//!
//! A [`GpuRuntime`] owns the parameters every instance is created with and
//! enforces that at most one instance is live at a time. The C boundary keeps
//! a single runtime, installed by `redlilium_gpu_init`.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::GpuError;
use crate::instance::{GpuInstance, InstanceParameters};

/// Explicit process-wide GPU state.
#[derive(Debug)]
pub struct GpuRuntime {
    parameters: InstanceParameters,
    live_instance: Mutex<Weak<GpuInstance>>,
}

impl GpuRuntime {
    /// Create a runtime that creates instances with `parameters`.
    pub fn new(parameters: InstanceParameters) -> Self {
        Self {
            parameters,
            live_instance: Mutex::new(Weak::new()),
        }
    }

    /// Create a runtime configured from the environment.
    pub fn from_env() -> Self {
        Self::new(InstanceParameters::from_env())
    }

    /// Get the instance parameters.
    pub fn parameters(&self) -> &InstanceParameters {
        &self.parameters
    }

    /// Create the runtime's instance.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::InstanceAlreadyExists`] while a previously created
    /// instance (or anything negotiated from it) is still alive.
    pub fn create_instance(&self) -> Result<Arc<GpuInstance>, GpuError> {
        let mut live = self.live_instance.lock();
        if live.strong_count() > 0 {
            log::warn!("Refusing to create a second live GpuInstance");
            return Err(GpuError::InstanceAlreadyExists);
        }
        let instance = GpuInstance::with_parameters(self.parameters.clone())?;
        *live = Arc::downgrade(&instance);
        Ok(instance)
    }

    /// Get the live instance, if any.
    pub fn live_instance(&self) -> Option<Arc<GpuInstance>> {
        self.live_instance.lock().upgrade()
    }

    /// Check whether an instance is live.
    pub fn has_live_instance(&self) -> bool {
        self.live_instance.lock().strong_count() > 0
    }
}

impl Default for GpuRuntime {
    fn default() -> Self {
        Self::new(InstanceParameters::default())
    }
}
