//! 32-bit address wrapper
//!
//! Everything in this crate addresses code and data through [`MemoryPtr`],
//! a plain `u32` with explicit casts in both directions. Centralizing the
//! casts here keeps the rest of the crate free of `as` chains between
//! integers and raw pointers.

use core::fmt;
use core::ops::{Add, Sub};

/// an absolute address inside the current 32-bit process
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryPtr(u32);

impl MemoryPtr {
    /// the null address
    pub const NULL: Self = Self(0);

    /// wrap a raw address
    pub const fn new(address: u32) -> Self {
        Self(address)
    }

    /// address of the first byte behind `ptr`
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u32)
    }

    /// address of the first byte behind `ptr`
    pub fn from_mut_ptr<T>(ptr: *mut T) -> Self {
        Self(ptr as usize as u32)
    }

    /// the raw address
    pub const fn address(self) -> u32 {
        self.0
    }

    /// the raw address widened for indexing
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// reinterpret as a const pointer
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as usize as *const T
    }

    /// reinterpret as a mut pointer
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as usize as *mut T
    }

    /// true iff the address is zero
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// shift forward by `step` bytes (wrapping)
    pub const fn add(self, step: u32) -> Self {
        Self(self.0.wrapping_add(step))
    }

    /// shift back by `step` bytes (wrapping)
    pub const fn sub(self, step: u32) -> Self {
        Self(self.0.wrapping_sub(step))
    }
}

impl From<u32> for MemoryPtr {
    fn from(address: u32) -> Self {
        Self(address)
    }
}

impl From<usize> for MemoryPtr {
    fn from(address: usize) -> Self {
        Self(address as u32)
    }
}

impl<T> From<*const T> for MemoryPtr {
    fn from(ptr: *const T) -> Self {
        Self::from_ptr(ptr)
    }
}

impl<T> From<*mut T> for MemoryPtr {
    fn from(ptr: *mut T) -> Self {
        Self::from_mut_ptr(ptr)
    }
}

impl Add<u32> for MemoryPtr {
    type Output = Self;

    fn add(self, step: u32) -> Self {
        MemoryPtr::add(self, step)
    }
}

impl Sub<u32> for MemoryPtr {
    type Output = Self;

    fn sub(self, step: u32) -> Self {
        MemoryPtr::sub(self, step)
    }
}

impl fmt::Debug for MemoryPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryPtr({:#010x})", self.0)
    }
}

impl fmt::Display for MemoryPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        let p = MemoryPtr::new(0x1000);
        assert_eq!((p + 5).address(), 0x1005);
        assert_eq!((p - 0x10).address(), 0xFF0);
        assert_eq!(p.add(0).address(), 0x1000);
    }

    #[test]
    fn test_wrapping() {
        let p = MemoryPtr::new(u32::MAX);
        assert_eq!((p + 1).address(), 0);
        assert_eq!((MemoryPtr::NULL - 1).address(), u32::MAX);
    }

    #[test]
    fn test_ptr_round_trip() {
        let value = 7u32;
        let p = MemoryPtr::from_ptr(&value);
        assert!(!p.is_null());
        // SAFETY: p still points at `value`
        assert_eq!(unsafe { *p.as_ptr::<u32>() }, 7);
    }

    #[test]
    fn test_null() {
        assert!(MemoryPtr::NULL.is_null());
        assert!(MemoryPtr::default().is_null());
        assert!(!MemoryPtr::new(1).is_null());
    }
}
