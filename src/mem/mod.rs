//! Memory primitives
//!
//! Reads, writes, fills and copies that toggle page protection around the
//! access and flush the instruction cache afterwards, plus scoped patches
//! that restore the previous bytes when dropped.

pub mod ops;
pub mod patch;
pub mod protect;

pub use ops::{compare, copy, fill, flush_icache, is_executable, read, write};
pub use patch::{PatchSet, PatchUnit, ScopedCopy, ScopedFill, ScopedWrite};
pub use protect::{protect, Protection, ProtectionGuard};
