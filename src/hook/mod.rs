//! Inline hooking engine
//!
//! The engine has three layers, leaves first:
//!
//! 1. instruction length decoding and relative-address arithmetic
//!    ([`asm::decoder`], [`asm::reloc`])
//! 2. an executable buffer with x86 opcode emitters ([`asm::buffer`])
//! 3. the per-victim [`Hook`] object ([`detour`])
//!
//! # Example
//!
//! ```ignore
//! use grapnel::{Hook, MemoryPtr};
//!
//! type TargetFn = extern "stdcall" fn(u32) -> u32;
//!
//! extern "stdcall" fn my_detour(x: u32) -> u32 {
//!     x ^ 1
//! }
//!
//! let mut hook = Hook::<TargetFn>::new(MemoryPtr::new(0x0040_1000), my_detour);
//! hook.install()?;
//! let original_result = unsafe { hook.call((7,)) };
//! hook.remove()?;
//! ```

pub mod asm;
pub mod convention;
pub mod detour;

// re-exports
pub use asm::buffer::{AsmBuffer, Register};
pub use asm::decoder::{Inst, InstFlags};
pub use convention::{CallingConvention, HookableFn};
pub use detour::{Hook, HookContext};
