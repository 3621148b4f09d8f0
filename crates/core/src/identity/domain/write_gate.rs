use std::sync::{Mutex, MutexGuard, PoisonError};

/// Serializes every mutating identity operation in the process.
///
/// Resolution reads the whole store and then writes based on what it saw;
/// two resolutions interleaving would both decide "no match" and create two
/// persons for one face. Holding the gate across read-decide-write makes
/// resolve, rename and merge atomic with respect to each other.
#[derive(Debug, Default)]
pub struct WriteGate {
    lock: Mutex<()>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until no other writer holds the gate.
    ///
    /// A panicked writer poisons nothing worth protecting here (the guarded
    /// value is `()`), so poisoning is ignored.
    pub fn enter(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
