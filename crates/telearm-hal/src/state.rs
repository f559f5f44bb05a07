//! [`LinkState`] – the shared [`ConnectionState`] cell.
//!
//! Read by request handlers and the status monitor, written by the link's
//! lifecycle operations. The lock is never held across an `.await`.

use std::sync::Arc;

use parking_lot::Mutex;
use telearm_types::ConnectionState;

/// Cheaply clonable handle to the link's connection state.
#[derive(Clone, Debug)]
pub struct LinkState(Arc<Mutex<ConnectionState>>);

impl Default for LinkState {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(ConnectionState::Disconnected)))
    }
}

impl LinkState {
    pub fn get(&self) -> ConnectionState {
        *self.0.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }

    /// Overwrite the state, returning the previous value.
    pub fn replace(&self, next: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut *self.0.lock(), next)
    }

    /// `Connected → Faulted`. Any other state is left alone.
    ///
    /// Returns `true` if this call performed the transition.
    pub fn fault(&self) -> bool {
        let mut state = self.0.lock();
        if *state == ConnectionState::Connected {
            *state = ConnectionState::Faulted;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        assert_eq!(LinkState::default().get(), ConnectionState::Disconnected);
    }

    #[test]
    fn fault_only_from_connected() {
        let state = LinkState::default();
        assert!(!state.fault());
        assert_eq!(state.get(), ConnectionState::Disconnected);

        state.replace(ConnectionState::Connected);
        assert!(state.fault());
        assert_eq!(state.get(), ConnectionState::Faulted);
        assert!(!state.fault(), "second fault is a no-op");
    }

    #[test]
    fn clones_share_the_cell() {
        let state = LinkState::default();
        let other = state.clone();
        other.replace(ConnectionState::Connected);
        assert!(state.is_connected());
    }
}
