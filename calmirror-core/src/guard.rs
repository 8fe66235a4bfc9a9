//! Loop guard: short-lived markers for writes the engine itself issued.
//!
//! A key must be registered before the first await of the write it covers,
//! so an inbound notification can never observe the write without the key.
//! All methods are synchronous for that reason.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::trace;

/// The kind of write a key covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardOp {
    Create,
    Update,
    Delete,
}

impl GuardOp {
    fn as_str(&self) -> &'static str {
        match self {
            GuardOp::Create => "create",
            GuardOp::Update => "update",
            GuardOp::Delete => "delete",
        }
    }
}

/// A marker scoped to (operation kind, entity id).
///
/// Creates start with a placeholder id since the real id is only known once
/// the external call returns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuardKey {
    op: GuardOp,
    id: String,
    placeholder: bool,
}

impl GuardKey {
    pub fn new(op: GuardOp, id: impl Into<String>) -> Self {
        GuardKey {
            op,
            id: id.into(),
            placeholder: false,
        }
    }

    /// A unique key for a create whose id is not known yet.
    pub fn placeholder(op: GuardOp) -> Self {
        GuardKey {
            op,
            id: uuid::Uuid::new_v4().to_string(),
            placeholder: true,
        }
    }

    pub fn op(&self) -> GuardOp {
        self.op
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }
}

impl fmt::Display for GuardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.placeholder {
            write!(f, "{}:pending-{}", self.op.as_str(), self.id)
        } else {
            write!(f, "{}:{}", self.op.as_str(), self.id)
        }
    }
}

#[derive(Debug, Default)]
struct GuardState {
    /// Key -> generation of its latest registration
    active: HashMap<GuardKey, u64>,
    next_generation: u64,
}

/// The set of active guard keys. Cloning shares the set.
#[derive(Debug, Clone, Default)]
pub struct SyncLoopGuard {
    state: Arc<Mutex<GuardState>>,
}

impl SyncLoopGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        // No code path panics mid-update, so a poisoned set is still consistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, key: GuardKey) {
        trace!(key = %key, "Guard registered");
        let mut state = self.lock();
        state.next_generation += 1;
        let generation = state.next_generation;
        state.active.insert(key, generation);
    }

    pub fn is_active(&self, key: &GuardKey) -> bool {
        self.lock().active.contains_key(key)
    }

    /// Whether any write on entity `id` is currently guarded.
    pub fn is_guarded(&self, id: &str) -> bool {
        self.lock()
            .active
            .keys()
            .any(|key| !key.placeholder && key.id == id)
    }

    pub fn release(&self, key: &GuardKey) {
        if self.lock().active.remove(key).is_some() {
            trace!(key = %key, "Guard released");
        }
    }

    /// Swap a placeholder for the key of the now known real id.
    ///
    /// Both happen under one lock so there is no moment where neither key
    /// is active.
    pub fn promote(&self, placeholder: &GuardKey, real: GuardKey) {
        trace!(from = %placeholder, to = %real, "Guard promoted");
        let mut state = self.lock();
        state.next_generation += 1;
        let generation = state.next_generation;
        state.active.remove(placeholder);
        state.active.insert(real, generation);
    }

    /// Release `key` after `delay` unless it was registered again meanwhile.
    ///
    /// Needs a tokio runtime.
    pub fn release_after(&self, key: GuardKey, delay: Duration) {
        let Some(generation) = self.lock().active.get(&key).copied() else {
            return;
        };

        let guard = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = guard.lock();
            if state.active.get(&key) == Some(&generation) {
                state.active.remove(&key);
                trace!(key = %key, "Guard expired");
            }
        });
    }

    pub fn len(&self) -> usize {
        self.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
