//! # Lock
//!
//! This module covers the field-of-view lock: an owned context tying a [`Resolver`] and a [`Patcher`] together behind an on/off gate.
//!
//! Every mutation either writes the full payload (and flushes the instruction cache, when the patcher does so) or leaves memory untouched.

use std::ptr;

use log::trace;
use thiserror::Error;

use crate::locate::signature::{Payload, PatchSite, PrimaryModule, SignatureLocator, FOV_CLAMP};
use crate::locate::{LocateError, Locator, Resolver};
use crate::patcher::byte::BytePatcher;
use crate::patcher::mem::PermissionWrapper;
use crate::patcher::Patcher;

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError<E> {
    /// Patching has been prevented with [`FovLock::prevent_patching`]
    #[error("Patching is currently prevented")]
    GateClosed,
    /// The patch target could not be resolved
    #[error("{0}")]
    Locate(#[from] LocateError),
    /// The patcher failed. Memory at the target is unchanged.
    #[error("Failed to write patch: {0}")]
    Patch(E),
}

/// Observable state of the patch site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// The target has not been found (yet)
    Unresolved,
    /// The target holds anything other than the locking payload
    Unlocked,
    /// The target holds the locking payload
    Locked,
}

/// Field-of-view lock over a single patch site
///
/// Not synchronized. Callers sharing one across threads must serialize access, as [`crate::api`] does.
#[derive(Debug)]
pub struct FovLock<L: Locator, P: Patcher> {
    /// Lazily resolved patch target
    resolver: Resolver<L>,
    /// Writes payloads to the target
    patcher: P,
    /// Payloads for each state
    site: &'static PatchSite,
    /// When `false`, no writes are attempted
    gate_open: bool,
}

/// Lock over the field-of-view clamp of the running executable
pub type PrimaryFovLock = FovLock<SignatureLocator<PrimaryModule>, PermissionWrapper<BytePatcher>>;

impl PrimaryFovLock {
    /// Creates a lock that scans the primary module's `.text` section for [`FOV_CLAMP`]
    pub fn primary() -> Self {
        let locator = SignatureLocator::new(&FOV_CLAMP, PrimaryModule::default());
        let patcher = PermissionWrapper::new(BytePatcher::new());
        // Safety: targets come from an exact signature match inside the primary module's code section
        unsafe { Self::new(locator, patcher, &FOV_CLAMP) }
    }
}

impl<L: Locator, P: Patcher> FovLock<L, P> {
    /// Creates an unresolved lock with the gate open
    ///
    /// # Safety
    ///
    /// Any address `locator` yields must stay readable for [`PatchSite`] payload length bytes for the lifetime of the lock,
    /// and writing a payload of `site` there through `patcher` must be sound.
    pub unsafe fn new(locator: L, patcher: P, site: &'static PatchSite) -> Self {
        Self {
            resolver: Resolver::new(locator),
            patcher,
            site,
            gate_open: true,
        }
    }

    /// Returns `true` if the gate is open and the target can be resolved
    pub fn is_patching_allowed(&mut self) -> bool {
        self.gate_open && self.resolver.resolve().is_ok()
    }

    /// Closes the gate so that no further writes happen. Always succeeds.
    pub fn prevent_patching(&mut self) -> bool {
        trace!("patching prevented");
        self.gate_open = false;
        true
    }

    /// Reopens the gate. Always succeeds.
    pub fn release_patching(&mut self) -> bool {
        trace!("patching released");
        self.gate_open = true;
        true
    }

    /// Returns the gate state without resolving anything
    pub fn gate_open(&self) -> bool {
        self.gate_open
    }

    /// Returns the resolver, for inspecting the cached target
    pub fn resolver(&self) -> &Resolver<L> {
        &self.resolver
    }

    /// Reads the live bytes at `target`
    fn current(&self, target: usize) -> Payload {
        // Safety: `new` requires resolved targets to be readable for a full payload
        unsafe { ptr::read_volatile(target as *const Payload) }
    }

    /// Returns the current state, resolving the target first if needed
    pub fn state(&mut self) -> LockState {
        match self.resolver.resolve() {
            Ok(target) if self.current(target) == self.site.on => LockState::Locked,
            Ok(_) => LockState::Unlocked,
            Err(_) => LockState::Unresolved,
        }
    }

    /// Returns `true` if the target currently holds the locking payload. Unresolvable targets are reported as unlocked.
    pub fn is_locked(&mut self) -> bool {
        self.state() == LockState::Locked
    }

    /// Brings the target into the requested state, writing only if it differs
    pub fn set_locked(&mut self, locked: bool) -> Result<(), LockError<P::Error>> {
        if !self.gate_open {
            return Err(LockError::GateClosed);
        }
        let target = self.resolver.resolve()?;
        if (self.current(target) == self.site.on) == locked {
            trace!("patch target already {}", if locked { "locked" } else { "unlocked" });
            return Ok(());
        }
        self.write(target, locked)
    }

    /// Locks the field of view
    pub fn lock(&mut self) -> Result<(), LockError<P::Error>> {
        self.set_locked(true)
    }

    /// Unlocks the field of view
    pub fn unlock(&mut self) -> Result<(), LockError<P::Error>> {
        self.set_locked(false)
    }

    /// Writes the payload opposite to the observed state
    pub fn toggle(&mut self) -> Result<(), LockError<P::Error>> {
        if !self.gate_open {
            return Err(LockError::GateClosed);
        }
        let target = self.resolver.resolve()?;
        let locked = self.current(target) == self.site.on;
        self.write(target, !locked)
    }

    /// Writes the payload for `locked` at `target`
    fn write(&mut self, target: usize, locked: bool) -> Result<(), LockError<P::Error>> {
        let payload = self.site.payload(locked);
        // Safety: `new` requires writes of site payloads at resolved targets to be sound
        unsafe { self.patcher.patch(target as *mut u8, payload) }.map_err(LockError::Patch)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::convert::Infallible;

    use region::Protection;

    use super::{FovLock, LockError, LockState};
    use crate::locate::signature::tests::code_with;
    use crate::locate::signature::{SignatureLocator, FOV_CLAMP};
    use crate::locate::LocateError;
    use crate::patcher::byte::BytePatcher;
    use crate::patcher::mem::PermissionWrapper;
    use crate::patcher::Patcher;
    use crate::scan::CodeRegion;

    /// Byte patcher that counts how often it writes
    #[derive(Default)]
    struct CountingPatcher {
        /// Number of writes so far
        writes: Cell<usize>,
    }
    unsafe impl Patcher for CountingPatcher {
        type Error = Infallible;

        unsafe fn patch(&self, target: *mut u8, patch: &[u8]) -> Result<(), Self::Error> {
            self.writes.set(self.writes.get() + 1);
            BytePatcher::new().patch(target, patch)
        }
    }

    /// Patcher that always fails without writing
    struct FailingPatcher;
    unsafe impl Patcher for FailingPatcher {
        type Error = &'static str;

        unsafe fn patch(&self, _target: *mut u8, _patch: &[u8]) -> Result<(), Self::Error> {
            Err("denied")
        }
    }

    /// Lock over fake code containing `signature` at offset `at`; the target is at `at + 16`
    fn lock_over<P: Patcher>(
        code: &mut [u8],
        patcher: P,
    ) -> FovLock<SignatureLocator<CodeRegion>, P> {
        let region = CodeRegion::new(code.as_mut_ptr() as usize, code.len());
        let locator = SignatureLocator::new(&FOV_CLAMP, region);
        unsafe { FovLock::new(locator, patcher, &FOV_CLAMP) }
    }

    #[test]
    /// Locking twice writes once
    fn test_lock_idempotent() {
        let (mut code, at) = code_with(&FOV_CLAMP.unlocked);
        let mut fov = lock_over(&mut code, CountingPatcher::default());

        assert!(!fov.is_locked());
        fov.set_locked(true).unwrap();
        assert!(fov.is_locked());
        fov.set_locked(true).unwrap();
        assert_eq!(fov.patcher.writes.get(), 1);

        fov.unlock().unwrap();
        fov.unlock().unwrap();
        assert!(!fov.is_locked());
        assert_eq!(fov.patcher.writes.get(), 2);

        drop(fov);
        assert_eq!(&code[at..at + 32], &FOV_CLAMP.unlocked);
    }

    #[test]
    /// Code that was already patched before we loaded is recognized as locked
    fn test_already_locked() {
        let (mut code, at) = code_with(&FOV_CLAMP.locked);
        let mut fov = lock_over(&mut code, CountingPatcher::default());

        assert_eq!(fov.state(), LockState::Locked);
        fov.lock().unwrap();
        assert_eq!(fov.patcher.writes.get(), 0);

        fov.unlock().unwrap();
        assert_eq!(fov.state(), LockState::Unlocked);

        drop(fov);
        assert_eq!(&code[at + 16..at + 19], &[0x89, 0x41, 0x20]);
    }

    #[test]
    fn test_toggle_twice() {
        let (mut code, at) = code_with(&FOV_CLAMP.unlocked);
        let mut fov = lock_over(&mut code, CountingPatcher::default());

        fov.toggle().unwrap();
        assert!(fov.is_locked());
        fov.toggle().unwrap();
        assert!(!fov.is_locked());
        assert_eq!(fov.patcher.writes.get(), 2);

        drop(fov);
        assert_eq!(&code[at..at + 32], &FOV_CLAMP.unlocked);
    }

    #[test]
    /// A closed gate stops every write but not inspection
    fn test_gate() {
        let (mut code, at) = code_with(&FOV_CLAMP.unlocked);
        let mut fov = lock_over(&mut code, CountingPatcher::default());

        assert!(fov.is_patching_allowed());
        assert!(fov.prevent_patching());
        assert!(!fov.gate_open());
        assert!(!fov.is_patching_allowed());

        assert!(matches!(fov.lock(), Err(LockError::GateClosed)));
        assert!(matches!(fov.unlock(), Err(LockError::GateClosed)));
        assert!(matches!(fov.toggle(), Err(LockError::GateClosed)));
        assert_eq!(fov.patcher.writes.get(), 0);
        assert_eq!(fov.state(), LockState::Unlocked);

        assert!(fov.release_patching());
        assert!(fov.is_patching_allowed());
        fov.lock().unwrap();
        assert!(fov.is_locked());

        drop(fov);
        assert_eq!(&code[at + 16..at + 19], &[0x90, 0x90, 0x90]);
    }

    #[test]
    /// Without a signature nothing resolves and nothing is written
    fn test_unresolved() {
        let mut code = vec![0xccu8; 0x40];
        let mut fov = lock_over(&mut code, CountingPatcher::default());

        assert_eq!(fov.state(), LockState::Unresolved);
        assert!(!fov.is_locked());
        assert!(!fov.is_patching_allowed());
        assert!(matches!(
            fov.lock(),
            Err(LockError::Locate(LocateError::PatternNotFound))
        ));
        assert!(matches!(fov.toggle(), Err(LockError::Locate(_))));
        assert_eq!(fov.resolver().target(), None);
        assert_eq!(fov.patcher.writes.get(), 0);
    }

    #[test]
    /// Bytes that match neither payload read as unlocked
    fn test_foreign_bytes() {
        let (mut code, at) = code_with(&FOV_CLAMP.unlocked);
        let mut fov = lock_over(&mut code, CountingPatcher::default());
        let target = fov.resolver.resolve().unwrap();
        unsafe { std::ptr::copy_nonoverlapping([0xeb, 0x01, 0xcc].as_ptr(), target as *mut u8, 3) };

        assert_eq!(fov.state(), LockState::Unlocked);
        fov.unlock().unwrap();
        assert_eq!(fov.patcher.writes.get(), 0);

        fov.lock().unwrap();
        drop(fov);
        assert_eq!(&code[at + 16..at + 19], &[0x90, 0x90, 0x90]);
    }

    #[test]
    /// Patcher failures surface as errors and leave the bytes alone
    fn test_patch_failure() {
        let (mut code, at) = code_with(&FOV_CLAMP.unlocked);
        let mut fov = lock_over(&mut code, FailingPatcher);

        assert!(matches!(fov.lock(), Err(LockError::Patch("denied"))));
        assert!(matches!(fov.toggle(), Err(LockError::Patch(_))));
        assert!(!fov.is_locked());

        drop(fov);
        assert_eq!(&code[at..at + 32], &FOV_CLAMP.unlocked);
    }

    #[test]
    /// Full path through permission changes on a read-only, executable page
    fn test_protected_code() {
        let mut page = region::alloc(region::page::size(), Protection::READ_WRITE).unwrap();
        let base = page.as_mut_ptr::<u8>();
        let len = page.len();
        unsafe {
            std::ptr::copy_nonoverlapping(FOV_CLAMP.unlocked.as_ptr(), base.add(0x100), 32);
            region::protect(base as *const u8, len, Protection::READ_EXECUTE).unwrap();
        }

        let region = CodeRegion::new(base as usize, len);
        let locator = SignatureLocator::new(&FOV_CLAMP, region);
        let patcher = PermissionWrapper::new(BytePatcher::new());
        let mut fov = unsafe { FovLock::new(locator, patcher, &FOV_CLAMP) };

        let live = || unsafe { std::ptr::read_volatile(base.add(0x100) as *const [u8; 32]) };

        fov.lock().unwrap();
        assert!(fov.is_locked());
        assert_eq!(live(), FOV_CLAMP.locked);
        assert_eq!(
            region::query(base as *const u8).unwrap().protection(),
            Protection::READ_EXECUTE
        );

        fov.toggle().unwrap();
        assert!(!fov.is_locked());
        assert_eq!(live(), FOV_CLAMP.unlocked);
    }
}
