//! Locates sections of a loaded PE image by walking its headers in memory

use std::ptr;

use thiserror::Error;

use super::CodeRegion;

/// `MZ`
const DOS_MAGIC: u16 = 0x5a4d;
/// `PE\0\0`
const NT_SIGNATURE: u32 = 0x0000_4550;
/// Offset of `e_lfanew` in the DOS header
const E_LFANEW: usize = 0x3c;
/// Size of the NT signature plus `IMAGE_FILE_HEADER`
const NT_FIXED_LEN: usize = 4 + 20;
/// Offset of `NumberOfSections` from the NT header
const NUMBER_OF_SECTIONS: usize = 4 + 2;
/// Offset of `SizeOfOptionalHeader` from the NT header
const SIZE_OF_OPTIONAL_HEADER: usize = 4 + 16;
/// Offset of `SizeOfImage` from the optional header (same for PE32 and PE32+)
const SIZE_OF_IMAGE: usize = 56;
/// Size of one `IMAGE_SECTION_HEADER`
const SECTION_HEADER_LEN: usize = 40;

/// Name of the section holding executable code
pub const TEXT_SECTION: &str = ".text";

/// Errors when reading a loaded image
#[derive(Debug, Error)]
pub enum ImageError {
    /// The primary module handle could not be obtained
    #[error("Primary module not found")]
    ModuleNotFound,
    /// The image does not start with a DOS header
    #[error("Invalid DOS header")]
    InvalidDosHeader,
    /// `e_lfanew` does not point at a PE signature
    #[error("Invalid NT header")]
    InvalidNtHeader,
    /// No section with the requested name exists
    #[error("Section {0} not found")]
    SectionNotFound(String),
    /// The section's virtual range runs past the end of the image
    #[error("Section {0} extends past the end of the image")]
    SectionOutOfBounds(String),
    /// The current platform does not load PE images
    #[error("Loaded image inspection is not supported on this platform")]
    Unsupported,
}

/// Reads a little-endian `u16` at `base + offset`
unsafe fn read_u16(base: *const u8, offset: usize) -> u16 {
    u16::from_le_bytes(ptr::read_unaligned(base.add(offset) as *const [u8; 2]))
}

/// Reads a little-endian `u32` at `base + offset`
unsafe fn read_u32(base: *const u8, offset: usize) -> u32 {
    u32::from_le_bytes(ptr::read_unaligned(base.add(offset) as *const [u8; 4]))
}

/// Finds the section called `name` in the image loaded at `module` and returns its virtual range.
///
/// The name comparison is exact, so `.text` does not match `.textbss`.
///
/// # Safety
///
/// `module` must point at a mapped image whose headers are readable
pub unsafe fn find_section(module: *const u8, name: &str) -> Result<CodeRegion, ImageError> {
    if module.is_null() {
        return Err(ImageError::ModuleNotFound);
    }
    if read_u16(module, 0) != DOS_MAGIC {
        return Err(ImageError::InvalidDosHeader);
    }

    let nt = read_u32(module, E_LFANEW) as usize;
    if read_u32(module, nt) != NT_SIGNATURE {
        return Err(ImageError::InvalidNtHeader);
    }

    let sections = read_u16(module, nt + NUMBER_OF_SECTIONS) as usize;
    let optional_len = read_u16(module, nt + SIZE_OF_OPTIONAL_HEADER) as usize;
    let optional = nt + NT_FIXED_LEN;
    let image_size = read_u32(module, optional + SIZE_OF_IMAGE) as usize;

    // IMAGE_FIRST_SECTION
    let table = optional + optional_len;
    for i in 0..sections {
        let header = table + i * SECTION_HEADER_LEN;
        let raw_name = ptr::read_unaligned(module.add(header) as *const [u8; 8]);
        let len = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
        if &raw_name[..len] != name.as_bytes() {
            continue;
        }

        let virtual_size = read_u32(module, header + 8) as usize;
        let virtual_address = read_u32(module, header + 12) as usize;
        if virtual_address
            .checked_add(virtual_size)
            .map_or(true, |end| end > image_size)
        {
            return Err(ImageError::SectionOutOfBounds(name.to_owned()));
        }
        return Ok(CodeRegion::new(
            module as usize + virtual_address,
            virtual_size,
        ));
    }

    Err(ImageError::SectionNotFound(name.to_owned()))
}

/// Returns the load address of the executable that started this process
#[cfg(windows)]
pub fn primary_module() -> Result<*const u8, ImageError> {
    use windows::core::PCWSTR;
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;

    // Safety: a null name asks for the calling process's own image, which stays loaded
    let module = unsafe { GetModuleHandleW(PCWSTR::null()) }
        .map_err(|_| ImageError::ModuleNotFound)?;
    if module.0.is_null() {
        return Err(ImageError::ModuleNotFound);
    }
    Ok(module.0 as *const u8)
}

/// Returns the load address of the executable that started this process
#[cfg(not(windows))]
pub fn primary_module() -> Result<*const u8, ImageError> {
    Err(ImageError::Unsupported)
}

/// Finds the section called `name` in the primary module
pub fn primary_section(name: &str) -> Result<CodeRegion, ImageError> {
    let module = primary_module()?;
    // Safety: the primary module is mapped for the lifetime of the process
    unsafe { find_section(module, name) }
}
