//! Code generation and instruction analysis for the hook engine

pub mod buffer;
pub mod decoder;
pub mod reloc;

pub use buffer::{AsmBuffer, Register};
pub use decoder::{Inst, InstFlags};
