//! Generic scope-guard helper.
//!
//! The kernel's resource owners (frame index, VMM, process table, FAT
//! volumes) each release their own resources directly in their `exit`/`free`
//! paths rather than through a generic RAII wrapper -- see
//! `process::exit::exit_process` for the deterministic release order
//! (§4.9). This module keeps only the one generic primitive worth sharing
//! across subsystems: a closure run on scope exit, used for the few cleanup
//! paths that are easier to express as "run this unless cancelled" than as
//! an explicit call at every early-return site.

/// Runs a cleanup closure when the guard is dropped, unless [`cancel`] was
/// called first.
///
/// [`cancel`]: ScopeGuard::cancel
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    /// Create a new scope guard.
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// Cancel the cleanup; the guard becomes a no-op on drop.
    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// Runs `$e` when the enclosing scope ends, unless the returned guard is
/// cancelled.
#[macro_export]
macro_rules! defer {
    ($e:expr) => {
        let _guard = $crate::raii::ScopeGuard::new(|| $e);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_guard() {
        let mut cleaned = false;
        {
            let _guard = ScopeGuard::new(|| {
                cleaned = true;
            });
        }
        assert!(cleaned);
    }

    #[test]
    fn test_scope_guard_cancel() {
        let mut cleaned = false;
        {
            let guard = ScopeGuard::new(|| {
                cleaned = true;
            });
            guard.cancel();
        }
        assert!(!cleaned);
    }
}
