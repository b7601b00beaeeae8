//! Low-level memory operations
//!
//! Every mutator wraps the access in a [`ProtectionGuard`] and flushes the
//! instruction cache afterwards, so patching code bytes works without any
//! setup on the caller's side.

use core::cmp::Ordering;

use crate::error::{Error, Result};
use crate::mem::protect::{Protection, ProtectionGuard};
use crate::ptr::MemoryPtr;

const MEM_COMMIT: u32 = 0x1000;
const PAGE_NOACCESS: u32 = 0x01;

/// flush the instruction cache for `[address, address + size)`
pub fn flush_icache(address: MemoryPtr, size: usize) -> Result<()> {
    // SAFETY: FlushInstructionCache tolerates arbitrary ranges
    let result = unsafe { FlushInstructionCache(GetCurrentProcess(), address.as_ptr(), size) };

    if result == 0 {
        Err(Error::FlushFailed {
            address: address.address(),
            size,
        })
    } else {
        Ok(())
    }
}

/// read a value of type `T` from `address`
///
/// # Safety
/// `address` must point to at least `size_of::<T>()` bytes of committed
/// memory holding a valid `T`
pub unsafe fn read<T: Copy>(address: MemoryPtr) -> Result<T> {
    if address.is_null() {
        return Err(Error::NullPointer { context: "read" });
    }

    let _guard = ProtectionGuard::new(
        address,
        core::mem::size_of::<T>(),
        Protection::ExecuteReadWrite,
    )?;

    // SAFETY: caller ensures address validity; the guard made it readable
    Ok(unsafe { address.as_ptr::<T>().read_unaligned() })
}

/// write a value of type `T` to `address`
///
/// # Safety
/// `address` must point to at least `size_of::<T>()` bytes of committed
/// memory
pub unsafe fn write<T: Copy>(address: MemoryPtr, value: T) -> Result<()> {
    if address.is_null() {
        return Err(Error::NullPointer { context: "write" });
    }

    let size = core::mem::size_of::<T>();
    {
        let _guard = ProtectionGuard::new(address, size, Protection::ExecuteReadWrite)?;

        // SAFETY: caller ensures address validity; the guard made it writable
        unsafe {
            address.as_mut_ptr::<T>().write_unaligned(value);
        }
    }

    flush_icache(address, size)
}

/// fill `size` bytes at `address` with `value`
///
/// # Safety
/// `[address, address + size)` must be committed memory
pub unsafe fn fill(address: MemoryPtr, value: u8, size: usize) -> Result<()> {
    if address.is_null() {
        return Err(Error::NullPointer { context: "fill" });
    }

    {
        let _guard = ProtectionGuard::new(address, size, Protection::ExecuteReadWrite)?;

        // SAFETY: caller ensures the range is valid; the guard made it writable
        unsafe {
            core::ptr::write_bytes(address.as_mut_ptr::<u8>(), value, size);
        }
    }

    flush_icache(address, size)
}

/// copy `size` bytes from `src` to `dst`
///
/// the ranges must not overlap
///
/// # Safety
/// both ranges must be committed memory of at least `size` bytes
pub unsafe fn copy(dst: MemoryPtr, src: MemoryPtr, size: usize) -> Result<()> {
    if dst.is_null() || src.is_null() {
        return Err(Error::NullPointer { context: "copy" });
    }

    {
        let _guard = ProtectionGuard::new(dst, size, Protection::ExecuteReadWrite)?;

        // SAFETY: caller ensures both ranges are valid and disjoint
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr::<u8>(), dst.as_mut_ptr::<u8>(), size);
        }
    }

    flush_icache(dst, size)
}

/// compare `size` bytes at `a` against `size` bytes at `b`
///
/// # Safety
/// both ranges must be committed memory of at least `size` bytes
pub unsafe fn compare(a: MemoryPtr, b: MemoryPtr, size: usize) -> Result<Ordering> {
    if a.is_null() || b.is_null() {
        return Err(Error::NullPointer { context: "compare" });
    }

    let _guard_a = ProtectionGuard::new(a, size, Protection::ExecuteReadWrite)?;
    let _guard_b = ProtectionGuard::new(b, size, Protection::ExecuteReadWrite)?;

    // SAFETY: caller ensures both ranges are valid; the guards made them readable
    let (lhs, rhs) = unsafe {
        (
            core::slice::from_raw_parts(a.as_ptr::<u8>(), size),
            core::slice::from_raw_parts(b.as_ptr::<u8>(), size),
        )
    };

    Ok(lhs.cmp(rhs))
}

/// true iff the region containing `address` is committed and accessible
pub fn is_executable(address: MemoryPtr) -> bool {
    let mut mbi = MemoryBasicInformation::default();

    // SAFETY: VirtualQuery writes at most size_of::<MemoryBasicInformation>()
    let written = unsafe {
        VirtualQuery(
            address.as_ptr(),
            &mut mbi,
            core::mem::size_of::<MemoryBasicInformation>(),
        )
    };

    written != 0 && mbi.state == MEM_COMMIT && mbi.protect != PAGE_NOACCESS
}

/// MEMORY_BASIC_INFORMATION for 32-bit processes
#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct MemoryBasicInformation {
    base_address: u32,
    allocation_base: u32,
    allocation_protect: u32,
    region_size: u32,
    state: u32,
    protect: u32,
    type_: u32,
}

#[link(name = "kernel32")]
extern "system" {
    fn FlushInstructionCache(
        hProcess: *mut core::ffi::c_void,
        lpBaseAddress: *const core::ffi::c_void,
        dwSize: usize,
    ) -> i32;

    fn GetCurrentProcess() -> *mut core::ffi::c_void;

    fn VirtualQuery(
        lpAddress: *const core::ffi::c_void,
        lpBuffer: *mut MemoryBasicInformation,
        dwLength: usize,
    ) -> usize;
}
