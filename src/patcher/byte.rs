//! This module contains a byte patcher

use std::convert::Infallible;
use std::ptr;

use super::Patcher;

/// Patcher for copying byte arrays over memory that is already writable.
/// This patcher never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytePatcher;
impl BytePatcher {
    /// Creates a new [`BytePatcher`]
    pub fn new() -> Self {
        Self
    }
}
unsafe impl Patcher for BytePatcher {
    type Error = Infallible;

    unsafe fn patch(&self, target: *mut u8, patch: &[u8]) -> Result<(), Self::Error> {
        // Safety: caller must ensure that `target` is writable for the full length of the patch
        ptr::copy(patch.as_ptr(), target, patch.len());
        Ok(())
    }
}
