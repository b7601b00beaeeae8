#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::missing_safety_doc)] // we document safety in SAFETY comments

//! grapnel: inline function hooking for 32-bit x86 Windows
//!
//! This library patches the entry of an arbitrary in-process function so
//! that execution is redirected to a user-supplied replacement, while the
//! original remains callable through a generated trampoline:
//!
//! - [`Hook`]: per-target detour with install/remove and a typed
//!   "call original" respecting the victim's calling convention
//! - [`AsmBuffer`]: owned executable page with x86 opcode emitters
//! - memory primitives with scoped protection changes ([`mem`])
//! - scoped byte patches with automatic restore ([`mem::patch`])
//! - byte-pattern scanning inside a loaded module's PE image ([`scan`])
//!
//! # Example
//!
//! ```ignore
//! use grapnel::{Hook, MemoryPtr};
//!
//! extern "C" fn detour(a: i32, b: i32) -> i32 {
//!     -(a + b)
//! }
//!
//! type AddFn = extern "C" fn(i32, i32) -> i32;
//!
//! let mut hook = Hook::<AddFn>::new(MemoryPtr::new(0x4012F0), detour as AddFn);
//! hook.install()?;
//! // the target now negates; the original is still reachable:
//! let sum = unsafe { hook.call((3, 4)) };
//! assert_eq!(sum, 7);
//! hook.remove()?;
//! ```
//!
//! # Platform
//!
//! 32-bit x86 user-mode Windows only. The crate refuses to build anywhere
//! else. Patching is not atomic with respect to other threads executing
//! the victim's first bytes; callers that need that guarantee must suspend
//! those threads around [`Hook::install`] / [`Hook::remove`].

#[cfg(not(all(windows, target_arch = "x86")))]
compile_error!("grapnel supports 32-bit x86 Windows only.");

#[cfg(all(windows, target_arch = "x86"))]
pub mod error;
#[cfg(all(windows, target_arch = "x86"))]
pub mod hook;
#[cfg(all(windows, target_arch = "x86"))]
pub mod mem;
#[cfg(all(windows, target_arch = "x86"))]
pub mod ptr;
#[cfg(all(windows, target_arch = "x86"))]
pub mod scan;

// re-exports for convenience
#[cfg(all(windows, target_arch = "x86"))]
pub use error::{Error, Result};
#[cfg(all(windows, target_arch = "x86"))]
pub use hook::{AsmBuffer, CallingConvention, Hook, HookableFn, Register};
#[cfg(all(windows, target_arch = "x86"))]
pub use ptr::MemoryPtr;
#[cfg(all(windows, target_arch = "x86"))]
pub use scan::Pattern;

/// library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
