use crate::signed_state::ReservedSignedState;
use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// Holds the latest signed state and hands out reservations on it.
///
/// The nexus keeps its own reservation on the current state. Replacing the
/// state drops that reservation, so the old state is destroyed as soon as
/// the last reader releases it. Readers never take a lock.
#[derive(Default)]
pub struct SignedStateNexus {
    current: ArcSwapOption<ReservedSignedState>,
}

impl SignedStateNexus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current state, `None` clears the nexus.
    pub fn set(&self, state: Option<ReservedSignedState>) {
        self.current.store(state.map(Arc::new));
    }

    /// Replace the current state only if `state` is for a later round.
    /// Returns whether the nexus was updated.
    pub fn set_if_newer(&self, state: ReservedSignedState) -> bool {
        let state = Arc::new(state);
        let mut replaced = false;
        self.current.rcu(|current| match current {
            Some(existing) if existing.round() >= state.round() => {
                replaced = false;
                current.clone()
            }
            _ => {
                replaced = true;
                Some(state.clone())
            }
        });
        replaced
    }

    /// Reserve the current state. If the state is replaced while the
    /// reservation is taken, the attempt is repeated on the replacement.
    pub fn get(&self, reason: &'static str) -> Option<ReservedSignedState> {
        loop {
            let current = self.current.load_full()?;
            let reserved = current.state().try_reserve(reason);
            let latest = self.current.load();
            let unchanged = matches!(&*latest, Some(latest) if Arc::ptr_eq(latest, &current));
            match reserved {
                Some(reserved) if unchanged => return Some(reserved),
                None if unchanged => return None,
                _ => continue,
            }
        }
    }

    /// Round of the current state without reserving it.
    pub fn round(&self) -> Option<u64> {
        self.current.load_full().map(|state| state.round())
    }

    pub fn clear(&self) {
        self.set(None);
    }
}

impl std::fmt::Debug for SignedStateNexus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedStateNexus")
            .field("round", &self.round())
            .finish()
    }
}
