//! Timeline fences shared between the two sides of a texture import.
//!
//! A [`SharedFence`] carries a monotonically increasing completed value. The
//! side finishing its work signals a value; the other side waits until the
//! fence reaches it before touching the shared texture.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

static NEXT_FENCE_ID: AtomicU64 = AtomicU64::new(1);

/// Status of a fence relative to a target value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not reached the value yet.
    Unsignaled,
    /// The fence reached the value (work complete).
    Signaled,
}

/// Timeline fence with a CPU-side wait.
///
/// # Example
///
/// ```ignore
/// let state = memory.end_access(&texture)?;
/// for fence in &state.fences {
///     fence.fence.wait(fence.signaled_value);
/// }
/// ```
#[derive(Debug)]
pub struct SharedFence {
    /// Unique identifier for debugging.
    id: u64,
    completed: Mutex<u64>,
    signaled: Condvar,
}

impl SharedFence {
    /// Create a fence with a completed value of zero.
    pub fn new() -> Self {
        Self::with_value(0)
    }

    /// Create a fence that has already completed `value`.
    pub fn with_value(value: u64) -> Self {
        Self {
            id: NEXT_FENCE_ID.fetch_add(1, Ordering::Relaxed),
            completed: Mutex::new(value),
            signaled: Condvar::new(),
        }
    }

    /// Get the fence's unique ID (for debugging).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Highest value signaled so far.
    pub fn completed_value(&self) -> u64 {
        *self.completed.lock()
    }

    /// Signal `value`.
    ///
    /// The timeline never moves backwards: a value not above the current one
    /// is ignored and `false` is returned.
    pub fn signal(&self, value: u64) -> bool {
        let mut completed = self.completed.lock();
        if value <= *completed {
            log::warn!(
                "fence {}: ignoring signal {} (already at {})",
                self.id,
                value,
                *completed
            );
            return false;
        }
        *completed = value;
        self.signaled.notify_all();
        true
    }

    /// Check the status of the fence against `value`.
    pub fn status(&self, value: u64) -> FenceStatus {
        if self.completed_value() >= value {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        }
    }

    /// Check if the fence reached `value` (non-blocking).
    pub fn is_signaled(&self, value: u64) -> bool {
        self.status(value) == FenceStatus::Signaled
    }

    /// Block until the fence reaches `value`.
    pub fn wait(&self, value: u64) {
        let mut completed = self.completed.lock();
        while *completed < value {
            self.signaled.wait(&mut completed);
        }
    }

    /// Wait for the fence to reach `value` with a timeout.
    ///
    /// Returns `true` if the value was reached, `false` if timeout elapsed.
    pub fn wait_timeout(&self, value: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completed = self.completed.lock();
        while *completed < value {
            if self
                .signaled
                .wait_until(&mut completed, deadline)
                .timed_out()
            {
                return *completed >= value;
            }
        }
        true
    }
}

impl Default for SharedFence {
    fn default() -> Self {
        Self::new()
    }
}

/// A fence paired with the value the other side must wait for.
#[derive(Debug, Clone)]
pub struct SharedFenceState {
    pub fence: Arc<SharedFence>,
    pub signaled_value: u64,
}

impl SharedFenceState {
    /// Pair `fence` with `signaled_value`.
    pub fn new(fence: Arc<SharedFence>, signaled_value: u64) -> Self {
        Self {
            fence,
            signaled_value,
        }
    }

    /// Check if the fence already reached the paired value.
    pub fn is_complete(&self) -> bool {
        self.fence.is_signaled(self.signaled_value)
    }

    /// Wait for the paired value with a timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.fence.wait_timeout(self.signaled_value, timeout)
    }
}
