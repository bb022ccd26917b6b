//! Engine readiness lifecycle
//!
//! A small shared cell tracking where the session is in its lifecycle.
//! Written by the worker thread, readable from any caller without
//! touching the command channel.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle states surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Readiness {
    /// No model resident.
    NotLoaded = 0,
    /// A load is in progress.
    Loading = 1,
    /// Model loaded, warm-up generation running.
    WarmingUp = 2,
    /// Fully usable.
    Ready = 3,
    /// A load or context init failed; engine needs a new load.
    Error = 4,
}

impl Readiness {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Readiness::Loading,
            2 => Readiness::WarmingUp,
            3 => Readiness::Ready,
            4 => Readiness::Error,
            _ => Readiness::NotLoaded,
        }
    }
}

/// Shared, lock-free readiness cell.
///
/// Cloning yields another handle to the same state.
#[derive(Debug, Clone)]
pub struct ReadinessCell(Arc<AtomicU8>);

impl ReadinessCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(Readiness::NotLoaded as u8)))
    }

    pub fn get(&self) -> Readiness {
        Readiness::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: Readiness) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// True once a model is resident, including during warm-up.
    pub fn is_loaded(&self) -> bool {
        matches!(self.get(), Readiness::WarmingUp | Readiness::Ready)
    }
}

impl Default for ReadinessCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let cell = ReadinessCell::new();
        assert_eq!(cell.get(), Readiness::NotLoaded);
        assert!(!cell.is_loaded());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let cell = ReadinessCell::new();
        cell.set(Readiness::Loading);
        assert_eq!(cell.get(), Readiness::Loading);
        assert!(!cell.is_loaded());

        cell.set(Readiness::WarmingUp);
        assert!(cell.is_loaded());

        cell.set(Readiness::Ready);
        assert_eq!(cell.get(), Readiness::Ready);
        assert!(cell.is_loaded());
    }

    #[test]
    fn test_shared_across_clones() {
        let cell = ReadinessCell::new();
        let other = cell.clone();
        other.set(Readiness::Error);
        assert_eq!(cell.get(), Readiness::Error);
        assert!(!cell.is_loaded());
    }
}
