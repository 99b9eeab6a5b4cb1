//! Instance → adapter → device → queue acquisition as one state machine.
//!
//! A [`DeviceSession`] performs each negotiation step once, in order, and
//! records how it went. Nothing is retried automatically: a failed step
//! leaves the session in a `Failed` state and the caller decides whether to
//! invoke it again.

use std::sync::Arc;

use crate::adapter::GpuAdapter;
use crate::device::{DeviceDescriptor, GpuDevice};
use crate::error::GpuError;
use crate::instance::{GpuInstance, InstanceParameters};
use crate::queue::GpuQueue;
use crate::types::BackendType;

/// Progress of an asynchronous negotiation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepState {
    /// The wait timed out while the native request was still in flight. The
    /// request is abandoned and its result, if it ever arrives, is dropped.
    Pending,
    Resolved,
    Failed,
}

/// Where a session is in the acquisition sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    InstanceReady,
    AdapterRequested(StepState),
    DeviceRequested(StepState),
    Ready,
}

/// A negotiated (instance, adapter, device, queue) tuple.
///
/// # Example
///
/// ```ignore
/// let mut session = DeviceSession::new(InstanceParameters::new());
/// session.establish(BackendType::D3D12)?;
/// let queue = session.queue_handle().unwrap();
/// ```
pub struct DeviceSession {
    parameters: InstanceParameters,
    device_desc: DeviceDescriptor,
    state: SessionState,
    instance: Option<Arc<GpuInstance>>,
    adapter: Option<Arc<GpuAdapter>>,
    device: Option<Arc<GpuDevice>>,
    queue: Option<Arc<GpuQueue>>,
}

impl DeviceSession {
    /// Create an uninitialized session.
    pub fn new(parameters: InstanceParameters) -> Self {
        Self {
            parameters,
            device_desc: DeviceDescriptor::new(),
            state: SessionState::Uninitialized,
            instance: None,
            adapter: None,
            device: None,
            queue: None,
        }
    }

    /// Create a session on an existing instance.
    pub fn from_instance(instance: Arc<GpuInstance>) -> Self {
        let mut session = Self::new(instance.parameters().clone());
        session.instance = Some(instance);
        session.state = SessionState::InstanceReady;
        session
    }

    /// Use `desc` when requesting the device.
    pub fn with_device_descriptor(mut self, desc: DeviceDescriptor) -> Self {
        self.device_desc = desc;
        self
    }

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get the instance, if created.
    pub fn instance(&self) -> Option<&Arc<GpuInstance>> {
        self.instance.as_ref()
    }

    /// Get the adapter, if resolved.
    pub fn adapter(&self) -> Option<&Arc<GpuAdapter>> {
        self.adapter.as_ref()
    }

    /// Get the device, if resolved.
    pub fn device(&self) -> Option<&Arc<GpuDevice>> {
        self.device.as_ref()
    }

    /// Get the queue, if the session is ready.
    pub fn queue_handle(&self) -> Option<&Arc<GpuQueue>> {
        self.queue.as_ref()
    }

    /// Check if the negotiated device has been lost.
    pub fn is_device_lost(&self) -> bool {
        self.device.as_ref().is_some_and(|device| device.is_lost())
    }

    /// Create the instance. Returns the existing one if already created.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver cannot be initialized.
    pub fn create_instance(&mut self) -> Result<&Arc<GpuInstance>, GpuError> {
        if self.instance.is_none() {
            let instance = GpuInstance::with_parameters(self.parameters.clone())?;
            self.instance = Some(instance);
            self.state = SessionState::InstanceReady;
        }
        self.instance
            .as_ref()
            .ok_or_else(|| GpuError::Internal("instance missing after creation".to_string()))
    }

    /// Request an adapter for `backend`.
    ///
    /// Replaces any previously negotiated adapter, device and queue.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::NotInitialized`] without an instance, or the
    /// negotiation error.
    pub fn request_adapter(&mut self, backend: BackendType) -> Result<&Arc<GpuAdapter>, GpuError> {
        let instance = self.instance.clone().ok_or(GpuError::NotInitialized)?;
        self.queue = None;
        self.device = None;
        self.adapter = None;

        match instance.request_adapter(backend) {
            Ok(adapter) => {
                self.state = SessionState::AdapterRequested(StepState::Resolved);
                Ok(&*self.adapter.insert(adapter))
            }
            Err(e) => {
                self.state = SessionState::AdapterRequested(unresolved(&e));
                Err(e)
            }
        }
    }

    /// Request the device from the negotiated adapter.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::InvalidParameter`] if no adapter has been
    /// resolved, or the negotiation error.
    pub fn request_device(&mut self) -> Result<&Arc<GpuDevice>, GpuError> {
        let adapter = self.adapter.clone().ok_or_else(|| {
            GpuError::InvalidParameter("no adapter has been negotiated".to_string())
        })?;
        self.queue = None;
        self.device = None;

        match adapter.request_device_with(&self.device_desc) {
            Ok(device) => {
                self.state = SessionState::DeviceRequested(StepState::Resolved);
                Ok(&*self.device.insert(device))
            }
            Err(e) => {
                self.state = SessionState::DeviceRequested(unresolved(&e));
                Err(e)
            }
        }
    }

    /// Get a queue from the negotiated device, completing the session.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::InvalidParameter`] if no device has been
    /// resolved, or [`GpuError::DeviceLost`].
    pub fn queue(&mut self) -> Result<Arc<GpuQueue>, GpuError> {
        let device = self.device.as_ref().ok_or_else(|| {
            GpuError::InvalidParameter("no device has been negotiated".to_string())
        })?;
        let queue = device.queue()?;
        self.queue = Some(queue.clone());
        self.state = SessionState::Ready;
        Ok(queue)
    }

    /// Run every remaining step, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the error of the failing step.
    pub fn establish(&mut self, backend: BackendType) -> Result<(), GpuError> {
        self.create_instance()?;
        if self.adapter.is_none() {
            self.request_adapter(backend)?;
        }
        if self.device.is_none() {
            self.request_device()?;
        }
        if self.queue.is_none() {
            self.queue()?;
        }
        log::info!("Device session ready on {}", backend);
        Ok(())
    }
}

fn unresolved(error: &GpuError) -> StepState {
    match error {
        GpuError::RequestTimeout { .. } => StepState::Pending,
        _ => StepState::Failed,
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("state", &self.state)
            .field("adapter", &self.adapter.as_ref().map(|a| &a.info().name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::driver::DummyConfig;
    use crate::instance::DriverSelection;

    fn params(config: DummyConfig) -> InstanceParameters {
        InstanceParameters::new()
            .with_driver(DriverSelection::Dummy)
            .with_dummy_config(config)
    }

    #[test]
    fn test_session_walks_states() {
        let mut session = DeviceSession::new(params(DummyConfig::default()));
        assert_eq!(session.state(), SessionState::Uninitialized);

        session.create_instance().unwrap();
        assert_eq!(session.state(), SessionState::InstanceReady);

        session.request_adapter(BackendType::Null).unwrap();
        assert_eq!(
            session.state(),
            SessionState::AdapterRequested(StepState::Resolved)
        );

        session.request_device().unwrap();
        assert_eq!(
            session.state(),
            SessionState::DeviceRequested(StepState::Resolved)
        );

        session.queue().unwrap();
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_steps_out_of_order() {
        let mut session = DeviceSession::new(params(DummyConfig::default()));
        assert_eq!(
            session.request_adapter(BackendType::Null).unwrap_err(),
            GpuError::NotInitialized
        );

        session.create_instance().unwrap();
        assert!(matches!(
            session.request_device(),
            Err(GpuError::InvalidParameter(_))
        ));
        assert!(matches!(session.queue(), Err(GpuError::InvalidParameter(_))));
    }

    #[test]
    fn test_failed_step_is_not_retried() {
        let mut session = DeviceSession::new(params(DummyConfig::default()));
        session.create_instance().unwrap();

        assert!(session.request_adapter(BackendType::Metal).is_err());
        assert_eq!(
            session.state(),
            SessionState::AdapterRequested(StepState::Failed)
        );
        assert!(session.adapter().is_none());

        // The caller may invoke the step again.
        session.request_adapter(BackendType::Null).unwrap();
        assert_eq!(
            session.state(),
            SessionState::AdapterRequested(StepState::Resolved)
        );
    }

    #[test]
    fn test_device_failure_state() {
        let mut session =
            DeviceSession::new(params(DummyConfig::default().with_device_failure("lost PCIe")));
        let err = session.establish(BackendType::Null).unwrap_err();
        assert_eq!(err, GpuError::DeviceRequestFailed("lost PCIe".to_string()));
        assert_eq!(
            session.state(),
            SessionState::DeviceRequested(StepState::Failed)
        );
    }

    #[test]
    fn test_timed_out_step_stays_pending() {
        let config = DummyConfig::default().with_completion_delay(Duration::from_millis(500));
        let mut session = DeviceSession::new(
            params(config).with_request_timeout(Duration::from_millis(10)),
        );
        session.create_instance().unwrap();

        let err = session.request_adapter(BackendType::Null).unwrap_err();
        assert!(matches!(err, GpuError::RequestTimeout { .. }));
        assert_eq!(
            session.state(),
            SessionState::AdapterRequested(StepState::Pending)
        );
        assert!(session.adapter().is_none());
    }

    #[test]
    fn test_from_instance() {
        let instance = GpuInstance::with_parameters(params(DummyConfig::default())).unwrap();
        let mut session = DeviceSession::from_instance(instance);
        assert_eq!(session.state(), SessionState::InstanceReady);
        session.establish(BackendType::Undefined).unwrap();
        assert!(session.queue_handle().is_some());
        assert!(!session.is_device_lost());
    }
}
