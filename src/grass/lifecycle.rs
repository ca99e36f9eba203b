//! Controller lifecycle state, the process-wide singleton slot and reload
//! hooks.
//!
//! Both the slot and the hooks are cheap cloneable handles onto shared
//! state; the host creates one of each and hands clones to every pipeline.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Controller lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Lifecycle {
    #[default]
    Disabled,
    Enabling,
    Active,
    Disabling,
}

/// Id of one pipeline controller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineId(pub u64);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Slot naming the one pipeline meant to be active.
///
/// Claiming an occupied slot fails but is not enforced: a second pipeline
/// still runs.
#[derive(Clone, Debug, Default)]
pub struct SingletonSlot {
    holder: Arc<Mutex<Option<PipelineId>>>,
}

impl SingletonSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot. Returns false if another pipeline holds it.
    pub fn claim(&self, id: PipelineId) -> bool {
        let mut holder = lock(&self.holder);
        match *holder {
            Some(current) => current == id,
            None => {
                *holder = Some(id);
                true
            }
        }
    }

    /// Release the slot if `id` holds it
    pub fn release(&self, id: PipelineId) {
        let mut holder = lock(&self.holder);
        if *holder == Some(id) {
            *holder = None;
        }
    }

    pub fn holder(&self) -> Option<PipelineId> {
        *lock(&self.holder)
    }
}

/// Subscription to [`ReloadHooks`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HookId(u64);

#[derive(Debug, Default)]
struct HookState {
    next_id: u64,
    subscribers: HashSet<HookId>,
    pending: HashSet<HookId>,
}

/// Teardown hooks run before the host hot-reloads.
///
/// [`ReloadHooks::fire`] only marks subscribers. A pipeline observes its mark
/// on its next tick, or right away through
/// [`prepare_reload`](crate::grass::pipeline::prepare_reload), which fires and
/// tears down every given pipeline before returning.
#[derive(Clone, Debug, Default)]
pub struct ReloadHooks {
    state: Arc<Mutex<HookState>>,
}

impl ReloadHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> HookId {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = HookId(state.next_id);
        state.subscribers.insert(id);
        id
    }

    pub fn unsubscribe(&self, id: HookId) {
        let mut state = lock(&self.state);
        state.subscribers.remove(&id);
        state.pending.remove(&id);
    }

    /// Announce an imminent reload to every subscriber
    pub fn fire(&self) {
        let mut state = lock(&self.state);
        let subscribers: Vec<_> = state.subscribers.iter().copied().collect();
        state.pending.extend(subscribers);
    }

    /// Consume a pending reload for `id`
    pub fn take_pending(&self, id: HookId) -> bool {
        lock(&self.state).pending.remove(&id)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singleton_claim_release() {
        let slot = SingletonSlot::new();
        let a = PipelineId(1);
        let b = PipelineId(2);
        assert!(slot.claim(a));
        assert!(slot.claim(a), "reclaiming own slot succeeds");
        assert!(!slot.claim(b));

        slot.release(b);
        assert_eq!(slot.holder(), Some(a), "only the holder can release");
        slot.release(a);
        assert_eq!(slot.holder(), None);
        assert!(slot.claim(b));
    }

    #[test]
    fn test_slot_shared_between_clones() {
        let slot = SingletonSlot::new();
        let other = slot.clone();
        slot.claim(PipelineId(5));
        assert_eq!(other.holder(), Some(PipelineId(5)));
    }

    #[test]
    fn test_reload_hooks() {
        let hooks = ReloadHooks::new();
        let a = hooks.subscribe();
        let b = hooks.subscribe();
        hooks.unsubscribe(b);

        assert!(!hooks.take_pending(a));
        hooks.fire();
        assert!(hooks.take_pending(a));
        assert!(!hooks.take_pending(a));
        assert!(!hooks.take_pending(b));
        assert_eq!(hooks.subscriber_count(), 1);
    }
}
