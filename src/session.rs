//! Session lifecycle: handle routing, idle-timeout reclamation
//!
//! Every client session is bound to one dataset, resolution subset,
//! version and mode, and owns the server it was bound to. The manager
//! holds an explicit handle-to-session table; there is no ambient
//! "current session" state. Idle reclamation is an explicit armed
//! deadline re-checked against a generation counter, so an in-flight
//! request that reset the deadline before expiry always completes while
//! a request arriving after stop is rejected.

use crate::error::{DatastoreError, Result};
use crate::server::{DatasetServer, OperationMode, VersionSpec};
use crate::types::{BlockIdentification, DataType, ResolutionLevel};
use crate::version::Dataset;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// Opaque routable handle of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(Uuid);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Starting = 0,
    Active = 1,
    Stopping = 2,
    Stopped = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Starting,
            1 => SessionState::Active,
            2 => SessionState::Stopping,
            _ => SessionState::Stopped,
        }
    }
}

/// Status report of one session
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub handle: SessionHandle,
    pub uuid: Uuid,
    pub mode: OperationMode,
    pub version: VersionSpec,
    pub resolution_levels: Vec<ResolutionLevel>,
    pub timeout: Duration,
}

struct SessionInner {
    handle: SessionHandle,
    server: DatasetServer,
    timeout: Duration,
    state: AtomicU8,
    /// Bumped on every accepted request; the watchdog compares it
    /// against the value it armed with before declaring the session idle.
    generation: AtomicU64,
    deadline: Mutex<Instant>,
}

impl SessionInner {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Record activity: push the deadline out, then bump the generation.
    ///
    /// The deadline must be written first. The watchdog arms by loading
    /// the generation and then reading the deadline; bumping last means
    /// any bump it observes publishes a deadline that is already in
    /// place, so it can never sleep against a stale one and reclaim the
    /// session early.
    fn touch(&self) {
        *self.deadline.lock() = Instant::now() + self.timeout;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Active -> Stopping -> Stopped; false if some other path got there
    /// first.
    fn try_stop(&self) -> bool {
        if self
            .state
            .compare_exchange(
                SessionState::Active as u8,
                SessionState::Stopping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            self.state.store(SessionState::Stopped as u8, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

type SessionTable = Arc<RwLock<HashMap<SessionHandle, Arc<SessionInner>>>>;

/// Allocates sessions, routes handles to them and reclaims idle ones.
///
/// This manager does not coordinate two concurrently-open read-write
/// sessions on the same dataset; that exclusion is an external
/// precondition of the registry that hands out datasets.
pub struct SessionLifecycleManager {
    sessions: SessionTable,
}

impl Default for SessionLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLifecycleManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a session and return its routable handle.
    ///
    /// Validates that the dataset and requested version exist, binds the
    /// session's store, sets the session ACTIVE and arms its idle
    /// deadline.
    pub async fn start(
        &self,
        dataset: Dataset,
        resolution_levels: Vec<ResolutionLevel>,
        version: VersionSpec,
        mode: OperationMode,
        timeout: Duration,
    ) -> Result<SessionHandle> {
        if !tokio::fs::try_exists(&dataset.root).await? {
            return Err(DatastoreError::NotFound(format!(
                "dataset {} not found at {}",
                dataset.uuid,
                dataset.root.display()
            )));
        }
        let uuid = dataset.uuid;
        let server = DatasetServer::bind(dataset, resolution_levels, version, mode).await?;

        let handle = SessionHandle(Uuid::new_v4());
        let inner = Arc::new(SessionInner {
            handle,
            server,
            timeout,
            state: AtomicU8::new(SessionState::Starting as u8),
            generation: AtomicU64::new(0),
            deadline: Mutex::new(Instant::now() + timeout),
        });
        self.sessions.write().insert(handle, Arc::clone(&inner));
        inner
            .state
            .store(SessionState::Active as u8, Ordering::SeqCst);
        Self::spawn_watchdog(Arc::clone(&self.sessions), inner);

        info!(%handle, %uuid, %version, %mode, ?timeout, "session started");
        Ok(handle)
    }

    /// Stop a session immediately, bypassing the idle timer.
    pub fn stop(&self, handle: SessionHandle) -> Result<()> {
        let inner = self
            .sessions
            .write()
            .remove(&handle)
            .ok_or_else(|| gone(handle))?;
        if inner.try_stop() {
            info!(%handle, "session stopped");
            Ok(())
        } else {
            Err(gone(handle))
        }
    }

    /// Read a batch of blocks through a session.
    pub async fn read_block(
        &self,
        handle: SessionHandle,
        ids: &[BlockIdentification],
    ) -> Result<Bytes> {
        let inner = self.checkout(handle)?;
        inner.server.read_batch(ids).await
    }

    /// Write a batch of blocks through a session. Returns the number of
    /// blocks written.
    pub async fn write_block(
        &self,
        handle: SessionHandle,
        ids: &[BlockIdentification],
        input: &[u8],
    ) -> Result<usize> {
        let inner = self.checkout(handle)?;
        inner.server.write_batch(ids, input).await
    }

    /// Sample data type at a (time, channel, angle) path of the
    /// session's resolution level.
    pub async fn data_type(
        &self,
        handle: SessionHandle,
        time: i32,
        channel: i32,
        angle: i32,
    ) -> Result<DataType> {
        let inner = self.checkout(handle)?;
        inner.server.data_type(time, channel, angle).await
    }

    /// Create a new version through a read-write session.
    pub async fn create_version(&self, handle: SessionHandle) -> Result<u32> {
        let inner = self.checkout(handle)?;
        self.writer_manager(&inner)?.create_version().await
    }

    /// Delete a version through a read-write session.
    pub async fn delete_version(&self, handle: SessionHandle, version: u32) -> Result<()> {
        let inner = self.checkout(handle)?;
        self.writer_manager(&inner)?.delete_version(version).await
    }

    /// Promote a version to the baseline slot through a read-write
    /// session.
    pub async fn promote_version(&self, handle: SessionHandle, version: u32) -> Result<()> {
        let inner = self.checkout(handle)?;
        self.writer_manager(&inner)?.promote(version).await
    }

    /// Status report of a session; counts as activity like any call.
    pub fn status(&self, handle: SessionHandle) -> Result<SessionStatus> {
        let inner = self.checkout(handle)?;
        Ok(SessionStatus {
            handle,
            uuid: inner.server.uuid(),
            mode: inner.server.mode(),
            version: inner.server.version(),
            resolution_levels: inner.server.resolution_levels().to_vec(),
            timeout: inner.timeout,
        })
    }

    /// Number of currently routable sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions.read().len()
    }

    /// Accept-time guard: route the handle, verify the session is
    /// ACTIVE, record activity. The returned Arc keeps the session's
    /// bindings alive for the duration of the request even if the
    /// session is stopped concurrently.
    fn checkout(&self, handle: SessionHandle) -> Result<Arc<SessionInner>> {
        let inner = self
            .sessions
            .read()
            .get(&handle)
            .cloned()
            .ok_or_else(|| gone(handle))?;
        if inner.state() != SessionState::Active {
            return Err(gone(handle));
        }
        inner.touch();
        Ok(inner)
    }

    fn writer_manager<'a>(
        &self,
        inner: &'a Arc<SessionInner>,
    ) -> Result<&'a crate::version::VersionManager> {
        inner.server.version_manager().ok_or_else(|| {
            DatastoreError::InvalidState(
                "version operations need a read-write session".to_string(),
            )
        })
    }

    fn spawn_watchdog(sessions: SessionTable, inner: Arc<SessionInner>) {
        tokio::spawn(async move {
            loop {
                let armed_generation = inner.generation.load(Ordering::SeqCst);
                let deadline = *inner.deadline.lock();
                sleep_until(deadline).await;

                if inner.state() != SessionState::Active {
                    return;
                }
                // Activity since arming moved the deadline; re-arm.
                if inner.generation.load(Ordering::SeqCst) != armed_generation {
                    debug!(handle = %inner.handle, "idle deadline re-armed");
                    continue;
                }
                if inner.try_stop() {
                    sessions.write().remove(&inner.handle);
                    info!(handle = %inner.handle, "session reclaimed after idle timeout");
                }
                return;
            }
        });
    }
}

fn gone(handle: SessionHandle) -> DatastoreError {
    DatastoreError::Gone(format!("session {} is not routable", handle))
}
