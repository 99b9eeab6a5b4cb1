//! GPU instance.
//!
//! The [`GpuInstance`] is the top-level entry point of a GPU session. It owns
//! the native driver and is the event pump every asynchronous request
//! completes through.

use std::sync::Arc;
use std::time::Duration;

use crate::adapter::GpuAdapter;
use crate::broker;
use crate::driver::{self, DummyConfig, GpuDriver, NativeInstanceDescriptor};
use crate::error::GpuError;
use crate::types::{BackendType, InstanceFeatures, InstanceToggles, RequestKind};

/// Environment variable selecting the driver (`auto`, `dummy` or `wgpu`).
pub const DRIVER_ENV: &str = "REDLILIUM_GPU_DRIVER";
/// Environment variable bounding blocking requests, in milliseconds.
pub const REQUEST_TIMEOUT_ENV: &str = "REDLILIUM_GPU_REQUEST_TIMEOUT_MS";

/// Which native driver an instance uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DriverSelection {
    /// wgpu when compiled in, dummy otherwise.
    #[default]
    Auto,
    /// The in-process dummy driver.
    Dummy,
    /// The wgpu driver. Unsupported without the `wgpu-backend` feature.
    Wgpu,
}

impl DriverSelection {
    /// Parse a driver name as accepted in [`DRIVER_ENV`].
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "dummy" => Some(Self::Dummy),
            "wgpu" => Some(Self::Wgpu),
            _ => None,
        }
    }
}

/// Parameters for creating a [`GpuInstance`].
///
/// # Example
///
/// ```ignore
/// let params = InstanceParameters::new()
///     .with_driver(DriverSelection::Dummy)
///     .with_request_timeout(Duration::from_secs(5));
/// let instance = GpuInstance::with_parameters(params)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct InstanceParameters {
    /// Driver to create.
    pub driver: DriverSelection,
    /// Behavior of the dummy driver, when selected.
    pub dummy: DummyConfig,
    /// Bound on blocking adapter/device requests. `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl InstanceParameters {
    /// Create default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the driver.
    pub fn with_driver(mut self, driver: DriverSelection) -> Self {
        self.driver = driver;
        self
    }

    /// Configure the dummy driver.
    pub fn with_dummy_config(mut self, config: DummyConfig) -> Self {
        self.dummy = config;
        self
    }

    /// Bound blocking requests.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Read parameters from [`DRIVER_ENV`] and [`REQUEST_TIMEOUT_ENV`].
    ///
    /// Unset variables keep their defaults; invalid values log a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut params = Self::new();

        if let Some(value) = lookup(DRIVER_ENV) {
            match DriverSelection::parse(&value) {
                Some(driver) => params.driver = driver,
                None => log::warn!("{DRIVER_ENV}: unknown driver '{value}', using auto"),
            }
        }

        if let Some(value) = lookup(REQUEST_TIMEOUT_ENV) {
            match value.trim().parse::<u64>() {
                Ok(ms) => params.request_timeout = Some(Duration::from_millis(ms)),
                Err(e) => log::warn!("{REQUEST_TIMEOUT_ENV}: invalid value '{value}': {e}"),
            }
        }

        params
    }
}

/// Top-level handle to the native GPU stack.
///
/// # Thread Safety
///
/// `GpuInstance` is `Send + Sync` and can be safely shared across threads.
///
/// # Example
///
/// ```ignore
/// let instance = GpuInstance::new()?;
/// let adapter = instance.request_adapter(BackendType::Undefined)?;
/// let device = adapter.request_device()?;
/// let queue = device.queue()?;
/// ```
pub struct GpuInstance {
    driver: Arc<dyn GpuDriver>,
    parameters: InstanceParameters,
}

impl GpuInstance {
    /// Features every instance is created with.
    pub const FEATURES: InstanceFeatures = InstanceFeatures::TIMED_WAIT_ANY;
    /// Toggles every instance is created with.
    pub const TOGGLES: InstanceToggles = InstanceToggles::ALLOW_UNSAFE_APIS;

    /// Create an instance with default parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver cannot be initialized.
    pub fn new() -> Result<Arc<Self>, GpuError> {
        Self::with_parameters(InstanceParameters::default())
    }

    /// Create an instance with custom parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the selected driver is unavailable.
    pub fn with_parameters(parameters: InstanceParameters) -> Result<Arc<Self>, GpuError> {
        log::info!("Creating GpuInstance (driver: {:?})", parameters.driver);

        let desc = NativeInstanceDescriptor {
            features: Self::FEATURES,
            toggles: Self::TOGGLES,
        };
        let driver = driver::create_driver(&parameters, &desc)?;
        log::info!("Using GPU driver: {}", driver.name());

        Ok(Arc::new(Self { driver, parameters }))
    }

    /// Get the driver (internal use only).
    pub(crate) fn driver(&self) -> &Arc<dyn GpuDriver> {
        &self.driver
    }

    /// Get the driver name.
    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Get the parameters the instance was created with.
    pub fn parameters(&self) -> &InstanceParameters {
        &self.parameters
    }

    /// Get the instance features.
    pub fn features(&self) -> InstanceFeatures {
        Self::FEATURES
    }

    /// Get the instance toggles.
    pub fn toggles(&self) -> InstanceToggles {
        Self::TOGGLES
    }

    /// Fire every completed request callback on the calling thread.
    pub fn process_events(&self) {
        self.driver.process_events();
    }

    /// Request an adapter for `backend`, blocking until the driver answers.
    ///
    /// [`BackendType::Undefined`] accepts any backend. The request is made
    /// once and never retried.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::AdapterUnavailable`] if no adapter matches, or a
    /// timeout error if the instance was created with a request timeout.
    pub fn request_adapter(
        self: &Arc<Self>,
        backend: BackendType,
    ) -> Result<Arc<GpuAdapter>, GpuError> {
        self.request_adapter_timeout(backend, self.parameters.request_timeout)
    }

    /// Request an adapter with an explicit timeout. `None` waits forever.
    ///
    /// # Errors
    ///
    /// See [`GpuInstance::request_adapter`].
    pub fn request_adapter_timeout(
        self: &Arc<Self>,
        backend: BackendType,
        timeout: Option<Duration>,
    ) -> Result<Arc<GpuAdapter>, GpuError> {
        log::debug!("Requesting {} adapter", backend);
        let driver = self.driver.as_ref();
        let grant = broker::block_on(driver, RequestKind::Adapter, timeout, |callback| {
            driver.request_adapter(backend, callback)
        })?;
        log::info!(
            "Adapter '{}' ({}) for {} request",
            grant.info.name,
            grant.info.backend,
            backend
        );
        Ok(Arc::new(GpuAdapter::new(self.clone(), grant)))
    }
}

impl std::fmt::Debug for GpuInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuInstance")
            .field("driver", &self.driver.name())
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl Drop for GpuInstance {
    fn drop(&mut self) {
        log::debug!("Destroying GpuInstance ({})", self.driver.name());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn dummy() -> Arc<GpuInstance> {
        GpuInstance::with_parameters(InstanceParameters::new().with_driver(DriverSelection::Dummy))
            .unwrap()
    }

    #[test]
    fn test_instance_fixed_policy() {
        let instance = dummy();
        assert!(instance.features().contains(InstanceFeatures::TIMED_WAIT_ANY));
        assert!(instance.toggles().contains(InstanceToggles::ALLOW_UNSAFE_APIS));
        assert_eq!(instance.driver_name(), "Dummy Driver");
    }

    #[test]
    fn test_request_adapter() {
        let instance = dummy();
        let adapter = instance.request_adapter(BackendType::Null).unwrap();
        assert_eq!(adapter.info().backend, BackendType::Null);

        let err = instance.request_adapter(BackendType::Vulkan).unwrap_err();
        assert!(matches!(err, GpuError::AdapterUnavailable(_)));
    }

    #[test]
    fn test_driver_selection_parse() {
        assert_eq!(DriverSelection::parse("dummy"), Some(DriverSelection::Dummy));
        assert_eq!(DriverSelection::parse(" WGPU "), Some(DriverSelection::Wgpu));
        assert_eq!(DriverSelection::parse("auto"), Some(DriverSelection::Auto));
        assert_eq!(DriverSelection::parse("vulkan"), None);
    }

    #[test]
    fn test_parameters_from_lookup() {
        let vars: HashMap<&str, &str> = [(DRIVER_ENV, "dummy"), (REQUEST_TIMEOUT_ENV, "250")]
            .into_iter()
            .collect();
        let params =
            InstanceParameters::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(params.driver, DriverSelection::Dummy);
        assert_eq!(params.request_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_parameters_invalid_values_keep_defaults() {
        let params = InstanceParameters::from_lookup(|name| match name {
            DRIVER_ENV => Some("metal".to_string()),
            REQUEST_TIMEOUT_ENV => Some("soon".to_string()),
            _ => None,
        });
        assert_eq!(params.driver, DriverSelection::Auto);
        assert_eq!(params.request_timeout, None);
    }
}
