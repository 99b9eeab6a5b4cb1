//! Begin/end access bookkeeping for shared textures.
//!
//! A texture minted from shared texture memory may only be used by this
//! process's queue between a successful `begin_access` and the matching
//! `end_access`. The [`AccessTracker`] records which textures of one memory
//! object currently hold an open access and rejects calls that break the
//! alternation.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;

use crate::sync::SharedFenceState;

/// Identifier of a texture within its shared memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Misuse of the begin/end access protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessViolation {
    /// `begin_access` was called while the texture already had an open access.
    AlreadyAccessing,
    /// `end_access` was called without a preceding `begin_access`.
    NotAccessing,
    /// Another texture of the same memory holds an incompatible access.
    ExclusiveConflict,
    /// The texture was used by the queue without an open access.
    NotAccessible,
    /// The texture was minted from a different memory object.
    ForeignTexture,
}

impl fmt::Display for AccessViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyAccessing => write!(f, "texture access already begun"),
            Self::NotAccessing => write!(f, "end access without matching begin"),
            Self::ExclusiveConflict => {
                write!(f, "another texture holds an exclusive access")
            }
            Self::NotAccessible => write!(f, "texture used outside of an access"),
            Self::ForeignTexture => {
                write!(f, "texture belongs to a different shared memory")
            }
        }
    }
}

impl std::error::Error for AccessViolation {}

/// Parameters for beginning access to a shared texture.
#[derive(Debug, Clone)]
pub struct BeginAccessDescriptor {
    /// Whether the texture contents are already initialized.
    pub initialized: bool,
    /// Whether other read-only accesses may be open at the same time.
    pub concurrent_read: bool,
    /// Fences the queue waits on before using the texture.
    pub fences: Vec<SharedFenceState>,
}

impl BeginAccessDescriptor {
    /// Exclusive access to initialized contents with no fences.
    pub fn new() -> Self {
        Self {
            initialized: true,
            concurrent_read: false,
            fences: Vec::new(),
        }
    }

    /// Set whether the contents are initialized.
    pub fn with_initialized(mut self, initialized: bool) -> Self {
        self.initialized = initialized;
        self
    }

    /// Set whether the access is a concurrent read.
    pub fn with_concurrent_read(mut self, concurrent_read: bool) -> Self {
        self.concurrent_read = concurrent_read;
        self
    }

    /// Add a fence to wait on.
    pub fn with_fence(mut self, fence: SharedFenceState) -> Self {
        self.fences.push(fence);
        self
    }

    /// Wait on every fence of an end-access state from the other side.
    pub fn with_fences_from(mut self, state: &EndAccessState) -> Self {
        self.fences.extend(state.fences.iter().cloned());
        self
    }
}

impl Default for BeginAccessDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Synchronization state produced by `end_access`.
///
/// The other side must wait for every fence to reach its value before it
/// uses the texture.
#[derive(Debug, Clone, Default)]
pub struct EndAccessState {
    /// Whether the texture contents are initialized after this access.
    pub initialized: bool,
    /// Fences signaled when this side's work on the texture completes.
    pub fences: Vec<SharedFenceState>,
}

impl EndAccessState {
    /// Check whether every fence already reached its value.
    pub fn is_complete(&self) -> bool {
        self.fences.iter().all(SharedFenceState::is_complete)
    }

    /// Block until every fence reached its value, up to `timeout` in total.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        self.fences.iter().all(|state| {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            state.wait_timeout(remaining)
        })
    }
}

/// An open access on one texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessSession {
    pub concurrent_read: bool,
    pub initialized: bool,
    /// Queue submissions that referenced the texture during this access.
    pub submissions: u64,
}

/// Open accesses of one shared memory object.
#[derive(Debug, Default)]
pub struct AccessTracker {
    sessions: Mutex<HashMap<TextureId, AccessSession>>,
}

impl AccessTracker {
    /// Create a tracker with no open access.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of an access.
    pub fn begin(
        &self,
        texture: TextureId,
        desc: &BeginAccessDescriptor,
    ) -> Result<(), AccessViolation> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&texture) {
            return Err(AccessViolation::AlreadyAccessing);
        }
        let conflict = sessions
            .values()
            .any(|open| !(open.concurrent_read && desc.concurrent_read));
        if conflict {
            return Err(AccessViolation::ExclusiveConflict);
        }
        sessions.insert(
            texture,
            AccessSession {
                concurrent_read: desc.concurrent_read,
                initialized: desc.initialized,
                submissions: 0,
            },
        );
        Ok(())
    }

    /// Record the end of an access, returning the closed session.
    pub fn end(&self, texture: TextureId) -> Result<AccessSession, AccessViolation> {
        self.sessions
            .lock()
            .remove(&texture)
            .ok_or(AccessViolation::NotAccessing)
    }

    /// Check whether the texture holds an open access.
    pub fn is_accessing(&self, texture: TextureId) -> bool {
        self.sessions.lock().contains_key(&texture)
    }

    /// Record that a queue submission used the texture.
    pub fn note_submission(&self, texture: TextureId) -> Result<(), AccessViolation> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&texture)
            .ok_or(AccessViolation::NotAccessible)?;
        session.submissions += 1;
        session.initialized = true;
        Ok(())
    }

    /// Number of open accesses.
    pub fn open_count(&self) -> usize {
        self.sessions.lock().len()
    }
}
