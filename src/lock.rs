//! Named lock wrappers over `spin`, mirroring the teacher kernel's
//! `Spinlock`/`Sleeplock` newtypes, simplified to spin-only locks.
//!
//! This core assumes a uniprocessor, cooperatively-scheduled kernel with
//! interrupt-level synchronization (spec.md §5): there is no blocking
//! scheduler to sleep on here, so every lock in this crate is a short-lived
//! spinlock rather than a sleep lock. The lock names below correspond
//! directly to spec.md §5's enumerated locks.

use spin::{Mutex, MutexGuard};

/// A spinlock carrying a debug name, for panic messages and for matching
/// spec.md's named locks one-to-one (`FAT lock`, `open-inode set lock`, ...).
pub struct NamedLock<T> {
    name: &'static str,
    inner: Mutex<T>,
}

impl<T> NamedLock<T> {
    pub const fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
