//! Scoped byte patches
//!
//! Each type captures the previous contents before writing and restores
//! them when dropped. [`PatchUnit`] / [`PatchSet`] are the non-scoped
//! composite form for patch groups that are toggled as one.

use crate::error::Result;
use crate::mem::ops;
use crate::ptr::MemoryPtr;
use crate::scan;

/// writes one `T`-sized value, restoring the previous value on drop
pub struct ScopedWrite<T: Copy> {
    address: MemoryPtr,
    saved: Option<T>,
}

impl<T: Copy> ScopedWrite<T> {
    /// an empty patch that can be installed later
    pub fn empty() -> Self {
        Self {
            address: MemoryPtr::NULL,
            saved: None,
        }
    }

    /// back up the value at `address` and write `value` over it
    ///
    /// # Safety
    /// `address` must point to committed memory holding a valid `T`
    pub unsafe fn new(address: MemoryPtr, value: T) -> Result<Self> {
        let mut unit = Self::empty();
        // SAFETY: forwarded precondition
        unsafe { unit.install(address, value)? };
        Ok(unit)
    }

    /// install at a (possibly new) address, restoring any pending patch first
    ///
    /// # Safety
    /// `address` must point to committed memory holding a valid `T`
    pub unsafe fn install(&mut self, address: MemoryPtr, value: T) -> Result<()> {
        self.restore()?;

        self.address = address;
        // SAFETY: forwarded precondition
        self.saved = Some(unsafe { ops::read::<T>(address)? });
        // SAFETY: forwarded precondition
        unsafe { ops::write::<T>(address, value) }
    }

    /// put the previous value back
    pub fn restore(&mut self) -> Result<()> {
        if let Some(saved) = self.saved.take() {
            // SAFETY: the address held a T when we backed it up
            unsafe { ops::write::<T>(self.address, saved)? };
        }
        Ok(())
    }
}

impl<T: Copy> Drop for ScopedWrite<T> {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

/// copies `N` bytes from a source buffer, restoring the originals on drop
pub struct ScopedCopy<const N: usize> {
    address: MemoryPtr,
    saved: [u8; N],
    active: bool,
}

impl<const N: usize> ScopedCopy<N> {
    /// an empty patch that can be installed later
    pub fn empty() -> Self {
        Self {
            address: MemoryPtr::NULL,
            saved: [0; N],
            active: false,
        }
    }

    /// back up `N` bytes at `address` and copy `data` over them
    ///
    /// # Safety
    /// `[address, address + N)` must be committed memory
    pub unsafe fn new(address: MemoryPtr, data: &[u8; N]) -> Result<Self> {
        let mut unit = Self::empty();
        // SAFETY: forwarded precondition
        unsafe { unit.install(address, data)? };
        Ok(unit)
    }

    /// install at a (possibly new) address, restoring any pending patch first
    ///
    /// # Safety
    /// `[address, address + N)` must be committed memory
    pub unsafe fn install(&mut self, address: MemoryPtr, data: &[u8; N]) -> Result<()> {
        self.restore()?;

        self.address = address;
        // SAFETY: forwarded precondition; saved is local and disjoint
        unsafe {
            ops::copy(MemoryPtr::from_mut_ptr(self.saved.as_mut_ptr()), address, N)?;
            ops::copy(address, MemoryPtr::from_ptr(data.as_ptr()), N)?;
        }
        self.active = true;
        Ok(())
    }

    /// put the previous bytes back
    pub fn restore(&mut self) -> Result<()> {
        if self.active {
            self.active = false;
            // SAFETY: the range was valid when we backed it up
            unsafe { ops::copy(self.address, MemoryPtr::from_ptr(self.saved.as_ptr()), N)? };
        }
        Ok(())
    }
}

impl<const N: usize> Drop for ScopedCopy<N> {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

/// fills `N` bytes with one value, restoring the originals on drop
pub struct ScopedFill<const N: usize> {
    address: MemoryPtr,
    saved: [u8; N],
    active: bool,
}

impl<const N: usize> ScopedFill<N> {
    /// an empty patch that can be installed later
    pub fn empty() -> Self {
        Self {
            address: MemoryPtr::NULL,
            saved: [0; N],
            active: false,
        }
    }

    /// back up `N` bytes at `address` and fill them with `value`
    ///
    /// # Safety
    /// `[address, address + N)` must be committed memory
    pub unsafe fn new(address: MemoryPtr, value: u8) -> Result<Self> {
        let mut unit = Self::empty();
        // SAFETY: forwarded precondition
        unsafe { unit.install(address, value)? };
        Ok(unit)
    }

    /// install at a (possibly new) address, restoring any pending patch first
    ///
    /// # Safety
    /// `[address, address + N)` must be committed memory
    pub unsafe fn install(&mut self, address: MemoryPtr, value: u8) -> Result<()> {
        self.restore()?;

        self.address = address;
        // SAFETY: forwarded precondition; saved is local and disjoint
        unsafe {
            ops::copy(MemoryPtr::from_mut_ptr(self.saved.as_mut_ptr()), address, N)?;
            ops::fill(address, value, N)?;
        }
        self.active = true;
        Ok(())
    }

    /// put the previous bytes back
    pub fn restore(&mut self) -> Result<()> {
        if self.active {
            self.active = false;
            // SAFETY: the range was valid when we backed it up
            unsafe { ops::copy(self.address, MemoryPtr::from_ptr(self.saved.as_ptr()), N)? };
        }
        Ok(())
    }
}

impl<const N: usize> Drop for ScopedFill<N> {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

/// one replace/restore pair inside a [`PatchSet`]
#[derive(Clone)]
pub struct PatchUnit {
    address: MemoryPtr,
    replacement: Vec<u8>,
    original: Vec<u8>,
}

impl PatchUnit {
    /// patch at an absolute address with an explicit backup
    pub fn with_original(address: MemoryPtr, replacement: Vec<u8>, original: Vec<u8>) -> Self {
        Self {
            address,
            replacement,
            original,
        }
    }

    /// patch at an absolute address, capturing the backup from memory
    ///
    /// # Safety
    /// `[address, address + replacement.len())` must be committed memory
    pub unsafe fn new(address: MemoryPtr, replacement: Vec<u8>) -> Result<Self> {
        let mut original = vec![0u8; replacement.len()];
        // SAFETY: forwarded precondition; original is local and disjoint
        unsafe {
            ops::copy(
                MemoryPtr::from_mut_ptr(original.as_mut_ptr()),
                address,
                original.len(),
            )?;
        }
        Ok(Self {
            address,
            replacement,
            original,
        })
    }

    /// patch at `module base + offset`, capturing the backup from memory
    ///
    /// # Safety
    /// the offset must stay inside the module's committed image
    pub unsafe fn in_module(module: &str, offset: u32, replacement: Vec<u8>) -> Result<Self> {
        let base = scan::module_base(module)?;
        // SAFETY: forwarded precondition
        unsafe { Self::new(base.add(offset), replacement) }
    }

    /// the patched address
    pub fn address(&self) -> MemoryPtr {
        self.address
    }

    /// write the replacement bytes
    ///
    /// # Safety
    /// the patched range must still be committed memory
    pub unsafe fn install(&self) -> Result<()> {
        // SAFETY: forwarded precondition
        unsafe {
            ops::copy(
                self.address,
                MemoryPtr::from_ptr(self.replacement.as_ptr()),
                self.replacement.len(),
            )
        }
    }

    /// write the original bytes back
    ///
    /// # Safety
    /// the patched range must still be committed memory
    pub unsafe fn restore(&self) -> Result<()> {
        // SAFETY: forwarded precondition
        unsafe {
            ops::copy(
                self.address,
                MemoryPtr::from_ptr(self.original.as_ptr()),
                self.original.len(),
            )
        }
    }
}

/// a group of [`PatchUnit`]s toggled as one
///
/// removing happens in reverse insertion order so overlapping units
/// unwind correctly; all units are removed on drop.
#[derive(Default)]
pub struct PatchSet {
    units: Vec<PatchUnit>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// add a unit to the set (does not install it)
    pub fn add(&mut self, unit: PatchUnit) {
        self.units.push(unit);
    }

    /// install every unit
    ///
    /// # Safety
    /// every unit's range must still be committed memory
    pub unsafe fn install(&self) -> Result<()> {
        for unit in &self.units {
            // SAFETY: forwarded precondition
            unsafe { unit.install()? };
        }
        Ok(())
    }

    /// restore every unit
    ///
    /// # Safety
    /// every unit's range must still be committed memory
    pub unsafe fn remove(&self) -> Result<()> {
        for unit in self.units.iter().rev() {
            // SAFETY: forwarded precondition
            unsafe { unit.restore()? };
        }
        Ok(())
    }

    /// install or remove depending on `status`
    ///
    /// # Safety
    /// see [`PatchSet::install`] / [`PatchSet::remove`]
    pub unsafe fn toggle(&self, status: bool) -> Result<()> {
        if status {
            // SAFETY: forwarded precondition
            unsafe { self.install() }
        } else {
            // SAFETY: forwarded precondition
            unsafe { self.remove() }
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl Drop for PatchSet {
    fn drop(&mut self) {
        // SAFETY: units were valid at insertion; best effort on teardown
        let _ = unsafe { self.remove() };
    }
}
