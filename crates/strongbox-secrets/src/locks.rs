//! Per-key mutual exclusion.
//!
//! Every mutation of a key (set, delete, rotation) runs while holding that
//! key's gate. Rotation additionally publishes its outcome on the slot so a
//! caller that queued behind an in-flight rotation can adopt the result
//! instead of rotating a second time.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::MutexGuard;

use crate::rotation::{RotationOutcome, RotationState};
use crate::types::SecretKey;

/// Lock and rotation bookkeeping for one key.
#[derive(Debug)]
pub(crate) struct KeySlot {
    gate: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    last: Mutex<Option<(u64, RotationOutcome)>>,
    phase: Mutex<RotationState>,
}

impl KeySlot {
    fn new() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            last: Mutex::new(None),
            phase: Mutex::new(RotationState::Active),
        }
    }

    /// Waits for exclusive access to the key.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Number of rotations finished on this slot.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Outcome of the rotation that finished after `observed`, if any.
    ///
    /// Call while holding the gate.
    pub(crate) fn completed_since(&self, observed: u64) -> Option<RotationOutcome> {
        if self.generation() == observed {
            return None;
        }
        self.last
            .lock()
            .as_ref()
            .filter(|(generation, _)| *generation > observed)
            .map(|(_, outcome)| outcome.clone())
    }

    /// Records the end of a rotation. `None` means it errored without an
    /// outcome waiters could adopt.
    pub(crate) fn finish(&self, outcome: Option<RotationOutcome>) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.last.lock() = outcome.map(|o| (generation, o));
        *self.phase.lock() = RotationState::Active;
    }

    pub(crate) fn set_phase(&self, state: RotationState) {
        *self.phase.lock() = state;
    }

    pub(crate) fn phase(&self) -> RotationState {
        *self.phase.lock()
    }
}

/// Registry of key slots.
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    slots: Mutex<HashMap<SecretKey, Arc<KeySlot>>>,
}

impl KeyLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the slot for `key`, creating it on first use.
    pub(crate) fn slot(&self, key: &SecretKey) -> Arc<KeySlot> {
        Arc::clone(
            self.slots
                .lock()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(KeySlot::new())),
        )
    }

    /// Returns the slot for `key` if one exists.
    pub(crate) fn existing(&self, key: &SecretKey) -> Option<Arc<KeySlot>> {
        self.slots.lock().get(key).cloned()
    }

    /// Drops slots nobody is using. Returns how many were removed.
    pub(crate) fn prune(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Version;

    fn key(name: &str) -> SecretKey {
        SecretKey::new(name).expect("key")
    }

    fn rotated(n: u64) -> RotationOutcome {
        RotationOutcome::Rotated {
            version: Version::new(n),
            previous: Some(Version::new(n - 1)),
        }
    }

    #[test]
    fn same_key_shares_a_slot() {
        let locks = KeyLocks::new();
        let a = locks.slot(&key("db/prod"));
        let b = locks.slot(&key("db/prod"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &locks.slot(&key("db/dev"))));
    }

    #[test]
    fn outcome_is_visible_to_earlier_observers_only() {
        let slot = KeySlot::new();
        let observed = slot.generation();
        assert!(slot.completed_since(observed).is_none());

        slot.finish(Some(rotated(2)));
        assert_eq!(slot.completed_since(observed), Some(rotated(2)));
        assert!(slot.completed_since(slot.generation()).is_none());
    }

    #[test]
    fn errored_rotation_is_not_adopted() {
        let slot = KeySlot::new();
        let observed = slot.generation();
        slot.finish(None);
        assert!(slot.completed_since(observed).is_none());
    }

    #[test]
    fn finish_resets_phase() {
        let slot = KeySlot::new();
        slot.set_phase(RotationState::RotationValidating);
        assert_eq!(slot.phase(), RotationState::RotationValidating);
        slot.finish(None);
        assert_eq!(slot.phase(), RotationState::Active);
    }

    #[test]
    fn prune_keeps_slots_in_use() {
        let locks = KeyLocks::new();
        let held = locks.slot(&key("a"));
        let _ = locks.slot(&key("b"));
        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);
        assert!(locks.existing(&key("a")).is_some());
        drop(held);
        assert_eq!(locks.prune(), 1);
    }

    #[tokio::test]
    async fn gate_is_exclusive() {
        let locks = KeyLocks::new();
        let slot = locks.slot(&key("k"));
        let guard = slot.lock().await;
        assert!(slot.gate.try_lock().is_err());
        drop(guard);
        assert!(slot.gate.try_lock().is_ok());
    }
}
