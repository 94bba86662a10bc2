//! Session Registry: owns opaque AI-provider session handles and the
//! clone/append reuse semantics dependent checks use to extend prior
//! reasoning without re-sending context. Modeled on an
//! `InMemoryCheckpointSaver`-style store — one lock-guarded map keyed by a
//! human-readable string, entries are independent after a clone — but
//! simplified to a single in-memory map instead of a trait over pluggable
//! backends, since
//! sessions never need to survive a restart the way checkpoints do.

pub mod error;
pub mod handle;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

pub use error::{Result, SessionError};
pub use handle::{SessionHandle, SessionTurn};

/// Observability snapshot over the registry's current contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub active_sessions: usize,
}

/// A shared, independently-lockable session slot. Cloning a session copies
/// the `SessionHandle` contents into a brand new `Arc<Mutex<_>>` so the clone
/// and its source can be mutated concurrently without contending on the same
/// lock or leaking writes between them.
type Slot = Arc<Mutex<SessionHandle>>;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: parking_lot::RwLock<HashMap<String, Slot>>,
    clone_suffix: parking_lot::RwLock<HashMap<String, AtomicU64>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent per key: registering the same handle twice is a no-op,
    /// registering a different handle under an existing key is a conflict.
    pub fn register(&self, key: &str, handle: SessionHandle) -> Result<()> {
        let mut sessions = self.sessions.write();
        match sessions.get(key) {
            Some(existing) => {
                if *existing.lock() == handle {
                    Ok(())
                } else {
                    Err(SessionError::Conflict { key: key.to_string() })
                }
            }
            None => {
                sessions.insert(key.to_string(), Arc::new(Mutex::new(handle)));
                Ok(())
            }
        }
    }

    /// The live handle, shared in place — the *append* reuse mode uses this
    /// directly so writes are visible to every holder of the key.
    pub fn get(&self, key: &str) -> Result<Slot> {
        self.sessions.read().get(key).cloned().ok_or_else(|| SessionError::NotFound(key.to_string()))
    }

    /// Snapshot `src_key`'s current contents into a fresh, independently
    /// mutable slot registered under `dst_key`. Safe to call while another
    /// task holds `src_key`'s lock for a write — the snapshot only blocks for
    /// the duration of the copy, never for the clone's subsequent use.
    pub fn clone_session(&self, src_key: &str, dst_key: &str) -> Result<Slot> {
        let source = self.get(src_key)?;
        let snapshot = source.lock().clone();
        let slot = Arc::new(Mutex::new(snapshot));
        self.sessions.write().insert(dst_key.to_string(), slot.clone());
        Ok(slot)
    }

    /// Best effort: removing a key that was never registered is not an
    /// error, since a run must never fail on session teardown.
    pub fn unregister(&self, key: &str) {
        self.sessions.write().remove(key);
    }

    /// A fresh, human-readable clone key: `{check_id}#{n}` where `n` is a
    /// monotonic counter scoped to `check_id`, so repeated forEach
    /// iterations of the same check never collide on a clone destination.
    pub fn next_clone_key(&self, check_id: &str) -> String {
        let counters = self.clone_suffix.read();
        if let Some(counter) = counters.get(check_id) {
            let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
            return format!("{check_id}#{n}");
        }
        drop(counters);
        let mut counters = self.clone_suffix.write();
        let counter = counters.entry(check_id.to_string()).or_insert_with(|| AtomicU64::new(0));
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{check_id}#{n}")
    }

    /// A point-in-time snapshot for observability. Never blocks on a writer
    /// for longer than the read lock's acquisition.
    pub fn stats(&self) -> SessionStats {
        SessionStats { active_sessions: self.sessions.read().len() }
    }
}
