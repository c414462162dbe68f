//! # Patcher
//!
//! This module covers patchers, which overwrite bytes of loaded code in place.
//! Unlike a hook, a patch written here stays in effect until another patch overwrites it.

pub mod byte;
pub mod mem;

/// Writes a patch over a location in memory
///
/// # Safety
///
/// Patchers are inherently unsafe. The implementor must ensure that the implementation of `patch` writes exactly `patch.len()` bytes at `target` and nothing else
pub unsafe trait Patcher {
    /// Error type that can occur when patching. If patching always succeeds, use [`std::convert::Infallible`].
    type Error;

    /// Overwrites `patch.len()` bytes at `target` with `patch`.
    ///
    /// # Safety
    ///
    /// This function is intended to be used on arbitrary memory addresses, but `target` must be valid for the full length of the patch under the rules of the supplied patcher
    unsafe fn patch(&self, target: *mut u8, patch: &[u8]) -> Result<(), Self::Error>;
}
