//! Gradient-tracking mode.
//!
//! The tracking switch decides whether [`crate::autograd::apply_forward`]
//! records operations into the graph at all. It is thread-local rather than
//! process-global, so toggling it can never race in-flight graph construction
//! on another thread; scoped guards restore the previous mode on drop.

use std::cell::Cell;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = Cell::new(true);
}

/// Whether graph construction is currently enabled on this thread.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|flag| flag.get())
}

/// Sets the tracking mode and returns the previous value, so callers can
/// restore it non-lexically.
pub fn set_grad_enabled(enabled: bool) -> bool {
    GRAD_ENABLED.with(|flag| flag.replace(enabled))
}

/// RAII scope that disables gradient tracking until dropped.
pub struct NoGradGuard {
    prev: bool,
}

impl NoGradGuard {
    pub fn new() -> Self {
        NoGradGuard {
            prev: set_grad_enabled(false),
        }
    }
}

impl Default for NoGradGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        set_grad_enabled(self.prev);
    }
}

/// Disables gradient tracking for the lifetime of the returned guard.
pub fn no_grad() -> NoGradGuard {
    NoGradGuard::new()
}

/// RAII scope that enables gradient tracking until dropped.
pub struct EnableGradGuard {
    prev: bool,
}

impl EnableGradGuard {
    pub fn new() -> Self {
        EnableGradGuard {
            prev: set_grad_enabled(true),
        }
    }
}

impl Default for EnableGradGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EnableGradGuard {
    fn drop(&mut self) {
        set_grad_enabled(self.prev);
    }
}

/// Enables gradient tracking for the lifetime of the returned guard.
pub fn enable_grad() -> EnableGradGuard {
    EnableGradGuard::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_enabled_and_guard_restores() {
        assert!(is_grad_enabled());
        {
            let _guard = no_grad();
            assert!(!is_grad_enabled());
            {
                let _inner = enable_grad();
                assert!(is_grad_enabled());
            }
            assert!(!is_grad_enabled());
        }
        assert!(is_grad_enabled());
    }

    #[test]
    fn test_set_grad_enabled_returns_previous() {
        let prev = set_grad_enabled(false);
        assert!(prev);
        assert!(!is_grad_enabled());
        set_grad_enabled(prev);
        assert!(is_grad_enabled());
    }
}
