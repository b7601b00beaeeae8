//! Page protection changes with RAII restore

use crate::error::{Error, Result};
use crate::ptr::MemoryPtr;

const PAGE_NOACCESS: u32 = 0x01;
const PAGE_READONLY: u32 = 0x02;
const PAGE_READWRITE: u32 = 0x04;
const PAGE_WRITECOPY: u32 = 0x08;
const PAGE_EXECUTE: u32 = 0x10;
const PAGE_EXECUTE_READ: u32 = 0x20;
const PAGE_EXECUTE_READWRITE: u32 = 0x40;
const PAGE_EXECUTE_WRITECOPY: u32 = 0x80;

/// memory protection kinds accepted by [`protect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    NoAccess,
    ReadOnly,
    ReadWrite,
    WriteCopy,
    Execute,
    ExecuteRead,
    ExecuteReadWrite,
    ExecuteWriteCopy,
}

impl Protection {
    /// the PAGE_* constant for this protection
    pub fn to_raw(self) -> u32 {
        match self {
            Self::NoAccess => PAGE_NOACCESS,
            Self::ReadOnly => PAGE_READONLY,
            Self::ReadWrite => PAGE_READWRITE,
            Self::WriteCopy => PAGE_WRITECOPY,
            Self::Execute => PAGE_EXECUTE,
            Self::ExecuteRead => PAGE_EXECUTE_READ,
            Self::ExecuteReadWrite => PAGE_EXECUTE_READWRITE,
            Self::ExecuteWriteCopy => PAGE_EXECUTE_WRITECOPY,
        }
    }
}

/// change protection of the pages covering `[address, address + size)`
///
/// returns the previous raw protection on success
pub fn protect(address: MemoryPtr, size: usize, protection: Protection) -> Result<u32> {
    let mut old_protect: u32 = 0;

    // SAFETY: VirtualProtect validates the range itself and fails cleanly
    let result = unsafe {
        VirtualProtect(
            address.as_mut_ptr(),
            size,
            protection.to_raw(),
            &mut old_protect,
        )
    };

    if result == 0 {
        Err(Error::ProtectionChangeFailed {
            address: address.address(),
            size,
        })
    } else {
        Ok(old_protect)
    }
}

/// RAII guard for memory protection changes
///
/// restores the previous protection when dropped, on every exit path
pub struct ProtectionGuard {
    address: MemoryPtr,
    size: usize,
    old_protection: u32,
}

impl ProtectionGuard {
    /// change protection, returning a guard that restores on drop
    pub fn new(address: MemoryPtr, size: usize, protection: Protection) -> Result<Self> {
        let old_protection = protect(address, size, protection)?;
        Ok(Self {
            address,
            size,
            old_protection,
        })
    }
}

impl Drop for ProtectionGuard {
    fn drop(&mut self) {
        let mut scratch: u32 = 0;
        // SAFETY: restoring the protection we recorded at construction
        unsafe {
            VirtualProtect(
                self.address.as_mut_ptr(),
                self.size,
                self.old_protection,
                &mut scratch,
            );
        }
    }
}

#[link(name = "kernel32")]
extern "system" {
    fn VirtualProtect(
        lpAddress: *mut core::ffi::c_void,
        dwSize: usize,
        flNewProtect: u32,
        lpflOldProtect: *mut u32,
    ) -> i32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protection_raw_values() {
        assert_eq!(Protection::NoAccess.to_raw(), 0x01);
        assert_eq!(Protection::ExecuteReadWrite.to_raw(), 0x40);
        assert_eq!(Protection::ExecuteWriteCopy.to_raw(), 0x80);
    }

    #[test]
    fn test_guard_restores() {
        let data = Box::new([0u8; 16]);
        let at = MemoryPtr::from_ptr(data.as_ptr());

        {
            let _guard = ProtectionGuard::new(at, 16, Protection::ExecuteReadWrite).unwrap();
            // protection is RWX inside the scope; writing is allowed
        }
        // after drop the heap page is back to its previous protection and
        // still readable
        assert_eq!(data[0], 0);
    }
}
