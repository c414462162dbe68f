//! # API
//!
//! Process-wide entry points for a scripting bridge.
//!
//! All calls share one [`PrimaryFovLock`] behind a mutex, so resolution, the gate and each protect-write-restore sequence never interleave between threads.
//! Failures are logged and reported as `false`; nothing here panics.

use std::fmt::Display;
use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;
use log::debug;

use crate::convert;
use crate::lock::PrimaryFovLock;

lazy_static! {
    static ref FOV_LOCK: Mutex<PrimaryFovLock> = Mutex::new(PrimaryFovLock::primary());
}

/// Runs `f` on the process-wide lock
fn with_lock<T>(f: impl FnOnce(&mut PrimaryFovLock) -> T) -> T {
    // a panic while patching cannot leave partial state behind, so a poisoned lock is still usable
    let mut fov = FOV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut fov)
}

/// Logs a failed operation and flattens the result
fn report<E: Display>(operation: &str, result: Result<(), E>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            debug!("{} failed: {}", operation, e);
            false
        }
    }
}

/// Returns `true` if patching is not prevented and the patch target can be found
pub fn is_patching_allowed() -> bool {
    with_lock(|fov| fov.is_patching_allowed())
}

/// Stops [`lock`], [`unlock`] and [`toggle_lock`] from writing until [`release_patching`]
pub fn prevent_patching() -> bool {
    with_lock(|fov| fov.prevent_patching())
}

/// Allows [`lock`], [`unlock`] and [`toggle_lock`] to write again
pub fn release_patching() -> bool {
    with_lock(|fov| fov.release_patching())
}

/// Returns `true` if the field of view is currently locked
pub fn is_locked() -> bool {
    with_lock(|fov| fov.is_locked())
}

/// Locks the field of view. Returns `true` if it is locked afterwards.
pub fn lock() -> bool {
    with_lock(|fov| report("lock", fov.lock()))
}

/// Unlocks the field of view. Returns `true` if it is unlocked afterwards.
pub fn unlock() -> bool {
    with_lock(|fov| report("unlock", fov.unlock()))
}

/// Flips the lock. Returns `true` if a write happened.
pub fn toggle_lock() -> bool {
    with_lock(|fov| report("toggle", fov.toggle()))
}

/// Converts internal to display field of view, or back when `inverse` is set
pub fn convert_format(value: f32, inverse: bool) -> f32 {
    convert::convert_format(value, inverse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// The test binary carries no patch site, so every write is refused and nothing panics
    fn test_without_patch_site() {
        assert!(!is_locked());
        assert!(!is_patching_allowed());
        assert!(!lock());
        assert!(!unlock());
        assert!(!toggle_lock());

        assert!(prevent_patching());
        assert!(!lock());
        assert!(release_patching());
    }

    #[test]
    fn test_convert_format() {
        assert!((convert_format(59.22966766, false) - 90.0).abs() < 1e-4);
        assert!((convert_format(90.0, true) - 59.22966766).abs() < 1e-4);
        assert_eq!(convert_format(-100.0, false), 0.0);
    }
}
