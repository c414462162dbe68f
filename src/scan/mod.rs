//! # Scan
//!
//! This module covers exact byte-signature scanning over a region of loaded code

pub mod image;

use std::slice;

/// A contiguous range of readable code in the current process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRegion {
    /// First byte of the region
    base: usize,
    /// Length of the region in bytes
    size: usize,
}
impl CodeRegion {
    /// Creates a region from a base address and a length
    pub fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }
    /// Creates a region covering `data`
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(data.as_ptr() as usize, data.len())
    }
    /// Start address of the region
    pub fn base(&self) -> usize {
        self.base
    }
    /// Length of the region in bytes
    pub fn size(&self) -> usize {
        self.size
    }
    /// Returns `true` if `address..address + len` lies fully inside the region
    pub fn contains(&self, address: usize, len: usize) -> bool {
        address >= self.base
            && address
                .checked_add(len)
                .map_or(false, |end| end <= self.base + self.size)
    }
    /// Views the region as a byte slice.
    ///
    /// # Safety
    ///
    /// The whole region must be mapped and readable for the lifetime of the returned slice
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        slice::from_raw_parts(self.base as *const u8, self.size)
    }
}

/// Fixed-length byte signature identifying one state of a patch site
pub type BytePattern = [u8; 32];

/// Scans `region` for the first exact occurrence of `pattern`, returning its address.
///
/// Every start offset is tried, aligned or not. Returns `None` if the region is shorter than the pattern or no match exists.
///
/// # Safety
///
/// The whole region must be mapped and readable for the duration of the scan
pub unsafe fn find_pattern(region: &CodeRegion, pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() || region.size() < pattern.len() {
        return None;
    }
    region
        .as_slice()
        .windows(pattern.len())
        .position(|window| window == pattern)
        .map(|offset| region.base() + offset)
}

#[cfg(test)]
mod tests {
    use super::{find_pattern, CodeRegion};

    #[test]
    /// The first of several matches wins, including unaligned ones
    fn test_first_match() {
        let data = [0xcc, 0x8b, 0x42, 0x20, 0xcc, 0x8b, 0x42, 0x20];
        let region = CodeRegion::from_slice(&data);

        let found = unsafe { find_pattern(&region, &[0x8b, 0x42, 0x20]) };
        assert_eq!(found, Some(data.as_ptr() as usize + 1));
    }

    #[test]
    /// A match flush against the end of the region is still found
    fn test_match_at_end() {
        let data = [0u8, 0, 0, 0, 1, 2, 3];
        let region = CodeRegion::from_slice(&data);

        let found = unsafe { find_pattern(&region, &[1, 2, 3]) };
        assert_eq!(found, Some(data.as_ptr() as usize + 4));
    }

    #[test]
    /// Near misses are not matches
    fn test_no_partial_match() {
        let data = [1u8, 2, 4, 1, 2];
        let region = CodeRegion::from_slice(&data);

        assert_eq!(unsafe { find_pattern(&region, &[1, 2, 3]) }, None);
    }

    #[test]
    /// Regions shorter than the pattern are rejected without reading
    fn test_region_too_small() {
        let data = [1u8, 2];
        let region = CodeRegion::from_slice(&data);

        assert_eq!(unsafe { find_pattern(&region, &[1, 2, 3]) }, None);
        assert_eq!(unsafe { find_pattern(&region, &[]) }, None);
    }

    #[test]
    fn test_contains() {
        let region = CodeRegion::new(0x1000, 0x10);

        assert!(region.contains(0x1000, 0x10));
        assert!(region.contains(0x100d, 3));
        assert!(!region.contains(0x100e, 3));
        assert!(!region.contains(0xfff, 1));
        assert!(!region.contains(usize::MAX, 2));
    }
}
