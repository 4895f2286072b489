//! The process-wide critical section.
//!
//! Serialises the rare global mutations: first-time initialisation and
//! global teardown. Steady-state per-call traffic never takes it; each
//! [`Registry`](crate::registry::Registry) has its own lock for that.
//!
//! The shared instance is allocated lazily by whichever thread asks for
//! it first. Once built, [`global`] is a single atomic load.

use once_cell::sync::OnceCell;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

static GLOBAL: OnceCell<CriticalSection> = OnceCell::new();

/// Returns the process-wide critical section, allocating it on first use.
pub fn global() -> &'static CriticalSection {
    GLOBAL.get_or_init(CriticalSection::new)
}

/// Whether [`global`] has been called yet. Never allocates.
pub fn is_allocated() -> bool {
    GLOBAL.get().is_some()
}

/// A reentrant mutual-exclusion primitive.
///
/// A thread that already holds the section may acquire it again; the
/// section is released when the outermost [`CriticalGuard`] drops.
pub struct CriticalSection {
    lock: ReentrantMutex<()>,
}

/// Proof that the current thread holds a [`CriticalSection`].
///
/// Teardown operations such as
/// [`Registry::kill`](crate::registry::Registry::kill) take a reference
/// to one so they cannot run outside the section.
#[must_use = "the critical section is released as soon as the guard is dropped"]
pub struct CriticalGuard<'a> {
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl CriticalSection {
    pub fn new() -> Self {
        Self {
            lock: ReentrantMutex::new(()),
        }
    }

    /// Block until the section is available, then hold it until the
    /// returned guard drops.
    pub fn acquire(&self) -> CriticalGuard<'_> {
        CriticalGuard {
            _guard: self.lock.lock(),
        }
    }

    /// Acquire only if no other thread holds the section.
    pub fn try_acquire(&self) -> Option<CriticalGuard<'_>> {
        self.lock
            .try_lock()
            .map(|guard| CriticalGuard { _guard: guard })
    }

    /// Release a guard explicitly. Equivalent to dropping it.
    pub fn release(guard: CriticalGuard<'_>) {
        drop(guard);
    }

    /// Whether any thread currently holds the section.
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

impl Default for CriticalSection {
    fn default() -> Self {
        Self::new()
    }
}
