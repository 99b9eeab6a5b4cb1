//! Blocking bridge over callback-based driver requests.
//!
//! Adapter and device negotiation are asynchronous in every native stack: the
//! request returns a future token and a callback fires later from the
//! instance's event pump. [`block_on`] turns such a request into a blocking
//! call. The callback resolves a one-shot channel owned jointly by both sides,
//! so a waiter that gives up never leaves the callback pointing at freed
//! state, and a driver that drops the callback is reported instead of hanging.

use std::fmt;
use std::time::{Duration, Instant};

use flume::{RecvTimeoutError, TryRecvError};

use crate::driver::GpuDriver;
use crate::error::GpuError;
use crate::types::RequestKind;

/// Poll interval used when the driver cannot wait on a single future.
const PUMP_INTERVAL: Duration = Duration::from_millis(1);

/// Token identifying an in-flight driver request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FutureId(pub u64);

/// Outcome of waiting on a future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The future's callback has run.
    Completed,
    /// The timeout elapsed first.
    TimedOut,
    /// The driver cannot wait on a single future; pump events instead.
    Unsupported,
}

/// Why a driver request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Nothing matched the request.
    Unavailable,
    /// The driver tried and failed.
    Error,
    /// The request needs something this driver or platform lacks.
    Unsupported,
    /// The instance went away before the request completed.
    InstanceDropped,
}

/// Failure reported through a request callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    pub status: RequestStatus,
    pub message: String,
}

impl RequestFailure {
    pub fn new(status: RequestStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn into_error(self, kind: RequestKind) -> GpuError {
        match (self.status, kind) {
            (RequestStatus::Unsupported, _) => GpuError::Unsupported(self.message),
            (RequestStatus::InstanceDropped, kind) => GpuError::RequestAbandoned(kind),
            (_, RequestKind::Adapter) => GpuError::AdapterUnavailable(self.message),
            (_, RequestKind::Device) => GpuError::DeviceRequestFailed(self.message),
        }
    }
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.status, self.message)
    }
}

/// Completion callback handed to the driver.
pub type RequestCallback<T> = Box<dyn FnOnce(Result<T, RequestFailure>) + Send>;

/// Run a driver request to completion.
///
/// `start` receives the completion callback and returns the request's future
/// token. The driver is then pumped with that token until the callback has
/// run. With `timeout = None` the wait is unbounded.
pub fn block_on<T, F>(
    driver: &dyn GpuDriver,
    kind: RequestKind,
    timeout: Option<Duration>,
    start: F,
) -> Result<T, GpuError>
where
    T: Send + 'static,
    F: FnOnce(RequestCallback<T>) -> FutureId,
{
    let (sender, receiver) = flume::bounded(1);
    let callback: RequestCallback<T> = Box::new(move |result| {
        // The waiter may have timed out and dropped the receiver.
        let _ = sender.try_send(result);
    });

    let started = Instant::now();
    let deadline = timeout.map(|timeout| started + timeout);
    let future = start(callback);
    log::debug!("waiting on {} request (future {})", kind, future.0);

    loop {
        match receiver.try_recv() {
            Ok(result) => return finish(kind, result),
            Err(TryRecvError::Disconnected) => {
                log::error!("{} request abandoned by the driver", kind);
                return Err(GpuError::RequestAbandoned(kind));
            }
            Err(TryRecvError::Empty) => {}
        }

        let remaining = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    log::error!("{} request timed out", kind);
                    return Err(GpuError::RequestTimeout {
                        request: kind,
                        waited: now - started,
                    });
                }
                Some(deadline - now)
            }
            None => None,
        };

        match driver.wait_any(future, remaining) {
            WaitStatus::Completed | WaitStatus::TimedOut => {}
            WaitStatus::Unsupported => {
                driver.process_events();
                let slice = remaining.map_or(PUMP_INTERVAL, |r| r.min(PUMP_INTERVAL));
                match receiver.recv_timeout(slice) {
                    Ok(result) => return finish(kind, result),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        log::error!("{} request abandoned by the driver", kind);
                        return Err(GpuError::RequestAbandoned(kind));
                    }
                }
            }
        }
    }
}

fn finish<T>(kind: RequestKind, result: Result<T, RequestFailure>) -> Result<T, GpuError> {
    result.map_err(|failure| {
        log::error!("{} request failed: {}", kind, failure.message);
        failure.into_error(kind)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DummyConfig, DummyDriver, NativeInstanceDescriptor};
    use crate::types::{BackendType, InstanceFeatures, InstanceToggles};

    fn driver(config: DummyConfig) -> DummyDriver {
        DummyDriver::new(
            config,
            &NativeInstanceDescriptor {
                features: InstanceFeatures::TIMED_WAIT_ANY,
                toggles: InstanceToggles::ALLOW_UNSAFE_APIS,
            },
        )
    }

    #[test]
    fn test_block_on_resolves_adapter() {
        let driver = driver(DummyConfig::default());
        let grant = block_on(&driver, RequestKind::Adapter, None, |callback| {
            driver.request_adapter(BackendType::Null, callback)
        })
        .unwrap();
        assert_eq!(grant.info.backend, BackendType::Null);
    }

    #[test]
    fn test_block_on_reports_failure() {
        let driver = driver(DummyConfig::default().with_reject_all(true));
        let err = block_on(&driver, RequestKind::Adapter, None, |callback| {
            driver.request_adapter(BackendType::Null, callback)
        })
        .unwrap_err();
        assert!(matches!(err, GpuError::AdapterUnavailable(_)));
    }

    #[test]
    fn test_block_on_times_out() {
        let driver = driver(DummyConfig::default().with_never_complete(true));
        let err = block_on(
            &driver,
            RequestKind::Adapter,
            Some(Duration::from_millis(10)),
            |callback| driver.request_adapter(BackendType::Null, callback),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GpuError::RequestTimeout {
                request: RequestKind::Adapter,
                ..
            }
        ));
    }

    #[test]
    fn test_block_on_detects_abandoned_callback() {
        let driver = driver(DummyConfig::default().with_abandon_requests(true));
        let err = block_on(&driver, RequestKind::Adapter, None, |callback| {
            driver.request_adapter(BackendType::Null, callback)
        })
        .unwrap_err();
        assert_eq!(err, GpuError::RequestAbandoned(RequestKind::Adapter));
    }

    #[test]
    fn test_block_on_pumps_without_timed_wait() {
        let driver = driver(
            DummyConfig::default()
                .with_timed_wait_any(false)
                .with_completion_delay(Duration::from_millis(5)),
        );
        let grant = block_on(&driver, RequestKind::Adapter, None, |callback| {
            driver.request_adapter(BackendType::Undefined, callback)
        })
        .unwrap();
        assert_eq!(grant.info.name, "Dummy Adapter");
    }

    #[test]
    fn test_failure_mapping() {
        let unsupported = RequestFailure::new(RequestStatus::Unsupported, "no D3D12");
        assert!(unsupported.into_error(RequestKind::Device).is_unsupported());

        let failed = RequestFailure::new(RequestStatus::Error, "oom");
        assert_eq!(
            failed.into_error(RequestKind::Device),
            GpuError::DeviceRequestFailed("oom".to_string())
        );
    }
}
