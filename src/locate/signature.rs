//! Locates a patch site by exact byte signature.
//!
//! A site is described by two 32-byte signatures of the surrounding code, one as shipped and one with the patch applied.
//! They differ only in a 3-byte run at a fixed interior offset, which is where the patch is written.

use log::debug;

use crate::scan::image::{self, TEXT_SECTION};
use crate::scan::{find_pattern, BytePattern, CodeRegion};

use super::{LocateError, Locator};

/// Length of the variable run inside a signature
pub const PAYLOAD_LEN: usize = 3;

/// Bytes written at the patch target
pub type Payload = [u8; PAYLOAD_LEN];

/// Description of one patchable location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSite {
    /// Signature of the code as shipped
    pub unlocked: BytePattern,
    /// Signature of the code with the patch applied
    pub locked: BytePattern,
    /// Offset of the patch target from the start of a signature match
    pub offset: usize,
    /// Bytes that engage the lock
    pub on: Payload,
    /// Original bytes
    pub off: Payload,
}
impl PatchSite {
    /// Returns the payload that produces the requested state
    pub fn payload(&self, locked: bool) -> &Payload {
        if locked {
            &self.on
        } else {
            &self.off
        }
    }

    /// Checks that the signatures agree outside the payload run and that each payload matches its signature
    pub fn validate(&self) -> bool {
        let run = self.offset..self.offset + PAYLOAD_LEN;
        if run.end > self.unlocked.len() {
            return false;
        }
        let outside_equal = self
            .unlocked
            .iter()
            .zip(&self.locked)
            .enumerate()
            .all(|(i, (a, b))| run.contains(&i) || a == b);

        outside_equal
            && self.unlocked[run.clone()] == self.off
            && self.locked[run] == self.on
            && self.on != self.off
    }
}

/// The copy loop that clamps the camera's field of view.
/// Locking replaces `mov [rcx+20h], eax` with three `nop`s so the clamped value is never stored.
pub static FOV_CLAMP: PatchSite = PatchSite {
    unlocked: [
        0x42, 0x08, 0x89, 0x41, 0x08, 0x0F, 0x10, 0x42, //
        0x10, 0x0F, 0x11, 0x41, 0x10, 0x8B, 0x42, 0x20, //
        0x89, 0x41, 0x20, 0x8B, 0x42, 0x24, 0x89, 0x41, //
        0x24, 0x8B, 0x42, 0x28, 0x89, 0x41, 0x28, 0x8B, //
    ],
    locked: [
        0x42, 0x08, 0x89, 0x41, 0x08, 0x0F, 0x10, 0x42, //
        0x10, 0x0F, 0x11, 0x41, 0x10, 0x8B, 0x42, 0x20, //
        0x90, 0x90, 0x90, 0x8B, 0x42, 0x24, 0x89, 0x41, //
        0x24, 0x8B, 0x42, 0x28, 0x89, 0x41, 0x28, 0x8B, //
    ],
    offset: 16,
    on: [0x90, 0x90, 0x90],
    off: [0x89, 0x41, 0x20],
};

/// Where a [`SignatureLocator`] gets the code region to scan
pub trait RegionSource {
    /// Returns the region to scan. Called once per lookup, never cached.
    fn code_region(&self) -> Result<CodeRegion, LocateError>;
}

/// A fixed region, for code that has already been mapped somewhere known
impl RegionSource for CodeRegion {
    fn code_region(&self) -> Result<CodeRegion, LocateError> {
        Ok(*self)
    }
}

/// A named section of the executable that started this process
#[derive(Debug, Clone, Copy)]
pub struct PrimaryModule {
    /// Section name, `.text` by default
    section: &'static str,
}
impl PrimaryModule {
    /// Scans `section` instead of `.text`
    pub fn with_section(section: &'static str) -> Self {
        Self { section }
    }
}
impl Default for PrimaryModule {
    fn default() -> Self {
        Self::with_section(TEXT_SECTION)
    }
}
impl RegionSource for PrimaryModule {
    fn code_region(&self) -> Result<CodeRegion, LocateError> {
        Ok(image::primary_section(self.section)?)
    }
}

/// Which signature a lookup matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMatch {
    /// The shipped code
    Unlocked,
    /// Code that was already patched
    Locked,
}

/// Finds a [`PatchSite`] by trying its unlocked signature, then its locked one.
///
/// Either match yields the same target. Which one matched says nothing reliable about the current lock state; read the live bytes for that.
#[derive(Debug, Clone, Copy)]
pub struct SignatureLocator<S: RegionSource> {
    /// Site to look for
    site: &'static PatchSite,
    /// Where to look
    source: S,
}
impl<S: RegionSource> SignatureLocator<S> {
    /// Creates a locator for `site` that scans the region returned by `source`
    pub fn new(site: &'static PatchSite, source: S) -> Self {
        debug_assert!(site.validate());
        Self { site, source }
    }

    /// Returns the patch target and which signature was found
    pub fn find(&self) -> Result<(usize, SignatureMatch), LocateError> {
        let region = self.source.code_region()?;

        // Safety: region sources only hand out mapped, readable code
        let found = unsafe {
            find_pattern(&region, &self.site.unlocked)
                .map(|address| (address, SignatureMatch::Unlocked))
                .or_else(|| {
                    find_pattern(&region, &self.site.locked)
                        .map(|address| (address, SignatureMatch::Locked))
                })
        };

        let (address, matched) = found.ok_or(LocateError::PatternNotFound)?;
        debug!("{:?} signature found at {:#x}", matched, address);
        Ok((address + self.site.offset, matched))
    }

    /// Returns the site this locator looks for
    pub fn site(&self) -> &'static PatchSite {
        self.site
    }
}
impl<S: RegionSource> Locator for SignatureLocator<S> {
    fn locate(&self) -> Result<usize, LocateError> {
        self.find().map(|(address, _)| address)
    }
}
