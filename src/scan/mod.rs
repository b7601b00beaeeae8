//! Byte-pattern scanning
//!
//! Patterns combine literal bytes with wildcard positions and can be
//! matched against any byte slice or against the committed image of a
//! loaded module.

use std::ffi::CString;

use crate::error::{Error, Result};
use crate::ptr::MemoryPtr;

/// a byte pattern with wildcard positions
///
/// two source forms are accepted: the textual `"55 8B ? EC"` form where
/// `?` (or `??`) marks a wildcard, and a `(bytes, mask)` pair where
/// `mask[i] == '?'` marks byte `i` as a wildcard.
#[derive(Debug, Clone)]
pub struct Pattern {
    bytes: Vec<u8>,
    wildcard: Vec<bool>,
}

impl Pattern {
    /// parse the textual form, e.g. `"48 8B ? ? 90"`
    pub fn parse(pattern: &str) -> Option<Self> {
        let parts: Vec<&str> = pattern.split_whitespace().collect();
        if parts.is_empty() {
            return None;
        }

        let mut bytes = Vec::with_capacity(parts.len());
        let mut wildcard = Vec::with_capacity(parts.len());

        for part in parts {
            if part == "?" || part == "??" {
                bytes.push(0);
                wildcard.push(true);
            } else {
                bytes.push(u8::from_str_radix(part, 16).ok()?);
                wildcard.push(false);
            }
        }

        Some(Self { bytes, wildcard })
    }

    /// build from raw bytes and a mask string (`'?'` = wildcard)
    pub fn from_bytes(bytes: &[u8], mask: &str) -> Option<Self> {
        if bytes.len() != mask.len() || bytes.is_empty() {
            return None;
        }

        Some(Self {
            bytes: bytes.to_vec(),
            wildcard: mask.chars().map(|c| c == '?').collect(),
        })
    }

    /// pattern length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// true iff `window` matches the pattern byte for byte
    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() >= self.len()
            && window
                .iter()
                .zip(self.bytes.iter().zip(self.wildcard.iter()))
                .all(|(&data, (&byte, &any))| any || data == byte)
    }
}

/// pattern scanner over a byte slice
pub struct PatternScanner<'a> {
    data: &'a [u8],
}

impl<'a> PatternScanner<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// offset of the first match
    pub fn find(&self, pattern: &Pattern) -> Option<usize> {
        self.data
            .windows(pattern.len())
            .position(|window| pattern.matches(window))
    }

    /// offsets of every match
    pub fn find_all(&self, pattern: &Pattern) -> Vec<usize> {
        self.data
            .windows(pattern.len())
            .enumerate()
            .filter(|(_, window)| pattern.matches(window))
            .map(|(offset, _)| offset)
            .collect()
    }
}

/// base address of a loaded module, e.g. `"kernel32.dll"`
pub fn module_base(name: &str) -> Result<MemoryPtr> {
    let c_name = CString::new(name).map_err(|_| Error::ModuleNotFound {
        name: name.to_string(),
    })?;

    // SAFETY: c_name is a valid NUL-terminated string
    let handle = unsafe { GetModuleHandleA(c_name.as_ptr()) };
    if handle.is_null() {
        return Err(Error::ModuleNotFound {
            name: name.to_string(),
        });
    }

    Ok(MemoryPtr::from_mut_ptr(handle))
}

/// scan a loaded module's committed image for a pattern
///
/// walks the PE headers to find the image size, then scans the whole
/// mapped range. returns the address of the first match, or `None`.
pub fn find_in_module(module: &str, pattern: &Pattern) -> Result<Option<MemoryPtr>> {
    let base = module_base(module)?;
    let image = image_slice(module, base)?;

    Ok(PatternScanner::new(image)
        .find(pattern)
        .map(|offset| base.add(offset as u32)))
}

/// every match inside a loaded module's committed image
pub fn find_all_in_module(module: &str, pattern: &Pattern) -> Result<Vec<MemoryPtr>> {
    let base = module_base(module)?;
    let image = image_slice(module, base)?;

    Ok(PatternScanner::new(image)
        .find_all(pattern)
        .into_iter()
        .map(|offset| base.add(offset as u32))
        .collect())
}

/// borrow the full mapped image of a module as a byte slice
fn image_slice(module: &str, base: MemoryPtr) -> Result<&'static [u8]> {
    // SAFETY: base points at the DOS header of a mapped module
    let dos = unsafe { &*base.as_ptr::<DosHeader>() };
    if dos.e_magic != DOS_SIGNATURE {
        return Err(Error::BadImage {
            module: module.to_string(),
            reason: "missing MZ signature",
        });
    }

    // SAFETY: e_lfanew is the loader-validated offset to the NT headers
    let nt = unsafe { &*base.add(dos.e_lfanew as u32).as_ptr::<NtHeaders32>() };
    if nt.signature != NT_SIGNATURE {
        return Err(Error::BadImage {
            module: module.to_string(),
            reason: "missing PE signature",
        });
    }

    let size = nt.optional_header.size_of_image as usize;

    // SAFETY: the loader maps size_of_image bytes starting at base for the
    // lifetime of the module; the module stays loaded while we scan
    Ok(unsafe { core::slice::from_raw_parts(base.as_ptr::<u8>(), size) })
}

const DOS_SIGNATURE: u16 = 0x5A4D; // "MZ"
const NT_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"

/// IMAGE_DOS_HEADER, fields we never touch collapsed
#[repr(C, packed)]
#[allow(dead_code)]
struct DosHeader {
    e_magic: u16,
    e_reserved: [u16; 29],
    e_lfanew: i32,
}

/// IMAGE_FILE_HEADER
#[repr(C)]
#[allow(dead_code)]
struct FileHeader {
    machine: u16,
    number_of_sections: u16,
    time_date_stamp: u32,
    pointer_to_symbol_table: u32,
    number_of_symbols: u32,
    size_of_optional_header: u16,
    characteristics: u16,
}

/// IMAGE_OPTIONAL_HEADER32 up to the field we need
#[repr(C)]
#[allow(dead_code)]
struct OptionalHeader32 {
    magic: u16,
    major_linker_version: u8,
    minor_linker_version: u8,
    size_of_code: u32,
    size_of_initialized_data: u32,
    size_of_uninitialized_data: u32,
    address_of_entry_point: u32,
    base_of_code: u32,
    base_of_data: u32,
    image_base: u32,
    section_alignment: u32,
    file_alignment: u32,
    major_operating_system_version: u16,
    minor_operating_system_version: u16,
    major_image_version: u16,
    minor_image_version: u16,
    major_subsystem_version: u16,
    minor_subsystem_version: u16,
    win32_version_value: u32,
    size_of_image: u32,
}

/// IMAGE_NT_HEADERS32
#[repr(C)]
struct NtHeaders32 {
    signature: u32,
    file_header: FileHeader,
    optional_header: OptionalHeader32,
}

#[link(name = "kernel32")]
extern "system" {
    fn GetModuleHandleA(lpModuleName: *const core::ffi::c_char) -> *mut core::ffi::c_void;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let pattern = Pattern::parse("48 8B ? ? 90").unwrap();
        assert_eq!(pattern.len(), 5);
        assert!(pattern.matches(&[0x48, 0x8B, 0x05, 0x12, 0x90]));
        assert!(!pattern.matches(&[0x48, 0x8B, 0x05, 0x12, 0x91]));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Pattern::parse("").is_none());
        assert!(Pattern::parse("GG").is_none());
    }

    #[test]
    fn test_from_bytes_mask() {
        let pattern = Pattern::from_bytes(&[0x55, 0x00, 0xEC], "x?x").unwrap();
        assert!(pattern.matches(&[0x55, 0x8B, 0xEC]));
        assert!(pattern.matches(&[0x55, 0xFF, 0xEC]));
        assert!(!pattern.matches(&[0x56, 0x8B, 0xEC]));

        assert!(Pattern::from_bytes(&[0x55], "xx").is_none());
        assert!(Pattern::from_bytes(&[], "").is_none());
    }

    #[test]
    fn test_scanner_find() {
        let data = [0x48u8, 0x8B, 0x05, 0x12, 0x34, 0x56, 0x78, 0x90];
        let scanner = PatternScanner::new(&data);

        let head = Pattern::parse("48 8B 05").unwrap();
        assert_eq!(scanner.find(&head), Some(0));

        let wild = Pattern::parse("48 8B ? ? 34").unwrap();
        assert_eq!(scanner.find(&wild), Some(0));

        let missing = Pattern::parse("FF FF").unwrap();
        assert_eq!(scanner.find(&missing), None);
    }

    #[test]
    fn test_scanner_find_all() {
        let data = [0x90u8, 0xCC, 0x90, 0xCC, 0x90];
        let scanner = PatternScanner::new(&data);

        let pattern = Pattern::parse("90 CC").unwrap();
        assert_eq!(scanner.find_all(&pattern), vec![0, 2]);
    }

    #[test]
    fn test_module_base() {
        let base = module_base("kernel32.dll").unwrap();
        assert!(!base.is_null());

        assert!(module_base("definitely-not-loaded.dll").is_err());
    }

    #[test]
    fn test_find_in_module() {
        // every PE image begins with "MZ"
        let pattern = Pattern::parse("4D 5A").unwrap();
        let hit = find_in_module("kernel32.dll", &pattern).unwrap();
        assert_eq!(hit, Some(module_base("kernel32.dll").unwrap()));
    }
}
