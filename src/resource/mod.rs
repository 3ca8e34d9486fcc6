//! In-memory registries of hosts, tasks and peer tasks
//!
//! Registries own their entries behind `Arc`. Cross references between
//! entries are ids (a peer task stores its task id and host id), so lifetime
//! is governed solely by the registry that owns the entry.
//!
//! - [`host`] - CDN and peer hosts, keyed by host UUID
//! - [`task`] - Tasks and their piece tables, keyed by task id
//! - [`peer`] - Peer tasks, keyed by peer id, owned by the task manager

pub mod host;
pub mod peer;
pub mod task;

pub use host::{Host, HostManager, HostType};
pub use peer::{PeerNotifier, PeerStatus, PeerTask, PeerTaskManager};
pub use task::{Piece, PieceStyle, SizeScope, Task, TaskManager, TINY_FILE_SIZE};

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Entry state is only touched in short synchronous sections, so a panic while
// holding the lock cannot leave it half-updated; recover the guard instead of
// propagating the poison.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
