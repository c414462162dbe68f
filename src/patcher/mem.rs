//! This module contains a patcher which adjusts memory permissions to patch read-only code

use std::convert::Infallible;

use log::{error, warn};
use region::{Protection, Region};
use thiserror::Error;

use super::Patcher;

/// Errors when using permission patching
#[derive(Debug, Error)]
pub enum PermissionError<E> {
    /// The OS refused to make the target writable. Nothing was written.
    #[error("Error changing memory protections: {0}")]
    ProtectionChangeFailed(#[from] region::Error),
    /// Custom error type from the underlying patcher
    #[error("{0}")]
    CustomError(E),
}
impl From<Infallible> for PermissionError<Infallible> {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

/// Scoped change of memory protection.
///
/// Every region touched by the range is returned to the protection it had before [`ProtectionGuard::acquire`] when the guard is dropped.
/// Restoration is best-effort: failures are logged and otherwise ignored, since the guarded work has already happened.
#[derive(Debug)]
pub struct ProtectionGuard {
    /// Regions overlapping the range, with their original protection
    previous: Vec<Region>,
}
impl ProtectionGuard {
    /// Applies `protection` to the pages covering `address..address + len`.
    ///
    /// # Safety
    ///
    /// Changing protection affects whole pages. The caller must ensure nothing relies on the old protection of neighbouring bytes while the guard is alive.
    pub unsafe fn acquire(
        address: *const u8,
        len: usize,
        protection: Protection,
    ) -> Result<Self, region::Error> {
        let previous = region::query_range(address, len)?.collect::<Result<Vec<_>, _>>()?;
        region::protect(address, len, protection)?;
        Ok(Self { previous })
    }
}
impl Drop for ProtectionGuard {
    fn drop(&mut self) {
        for region in &self.previous {
            // Safety: we only restore protections that were in place when the guard was acquired
            let restored = unsafe {
                region::protect(region.as_ptr::<u8>(), region.len(), region.protection())
            };
            if let Err(e) = restored {
                warn!(
                    "failed to restore protection {:?} at {:#x}: {}",
                    region.protection(),
                    region.as_ptr::<u8>() as usize,
                    e
                );
            }
        }
    }
}

/// Discards any cached instruction stream for `address..address + len`
#[cfg(windows)]
pub fn flush_instruction_cache(address: *const u8, len: usize) {
    use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
    use windows::Win32::System::Threading::GetCurrentProcess;

    // Safety: the pseudo-handle for the current process is always valid
    if let Err(e) = unsafe { FlushInstructionCache(GetCurrentProcess(), Some(address as _), len) } {
        warn!("failed to flush instruction cache at {:#x}: {}", address as usize, e);
    }
}

/// Discards any cached instruction stream for `address..address + len`
#[cfg(not(windows))]
pub fn flush_instruction_cache(_address: *const u8, _len: usize) {
    // x86 keeps instruction fetch coherent with stores from the same process
}

/// This struct wraps patchers to allow them to write to code that's normally unwritable.
/// It achieves this result by making the target writable and executable, triggering the patch, flushing the instruction cache, and then reverting the permissions.
///
/// # Safety
///
/// `PermissionWrapper` relies on the size of the patch value to determine how many pages to change write permissions,
/// pairing `PermissionWrapper` with a patcher that writes more memory than the size of the patch is undefined behavior.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionWrapper<P: Patcher> {
    /// Underlying patcher.
    patcher: P,
}
impl<P: Patcher> PermissionWrapper<P> {
    /// Creates a new PermissionWrapper
    pub fn new(patcher: P) -> Self {
        Self { patcher }
    }
}

unsafe impl<P> Patcher for PermissionWrapper<P>
where
    P: Patcher,
    PermissionError<P::Error>: From<P::Error>,
{
    type Error = PermissionError<P::Error>;

    unsafe fn patch(&self, target: *mut u8, patch: &[u8]) -> Result<(), Self::Error> {
        let _guard = ProtectionGuard::acquire(target, patch.len(), Protection::READ_WRITE_EXECUTE)
            .map_err(|e| {
                error!(
                    "failed to change page protection for patching at {:#x}: {}",
                    target as usize, e
                );
                e
            })?;
        self.patcher.patch(target, patch)?;
        flush_instruction_cache(target, patch.len());
        Ok(())
    }
}
