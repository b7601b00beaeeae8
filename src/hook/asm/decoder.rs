//! Instruction length decoding
//!
//! The hook engine only needs lengths, the raw opcode bytes, and the
//! displacement of PC-relative transfers. iced-x86 does the actual
//! decoding; this module reduces its output to that small view.

use bitflags::bitflags;
use iced_x86::{Decoder, DecoderOptions, FlowControl, OpKind};

use crate::ptr::MemoryPtr;

/// longest legal x86 instruction
pub const MAX_INST_LEN: usize = 15;

bitflags! {
    /// properties of a decoded instruction
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InstFlags: u8 {
        /// the bytes do not decode to a legal instruction
        const ERROR = 1 << 0;
        /// the instruction transfers control PC-relatively
        const RELATIVE = 1 << 1;
        /// the displacement is the rel8 form
        const IMM8 = 1 << 2;
        /// the displacement is the rel32 form
        const IMM32 = 1 << 3;
    }
}

/// one decoded instruction
#[derive(Debug, Clone, Copy)]
pub struct Inst {
    /// instruction length in bytes (0 on error)
    pub len: usize,
    /// first opcode byte after any legacy prefixes
    pub opcode: u8,
    /// second opcode byte for `0F`-prefixed forms, else 0
    pub opcode2: u8,
    /// rel8 displacement when `IMM8` is set
    pub imm8: i8,
    /// rel32 displacement when `IMM32` is set
    pub imm32: i32,
    pub flags: InstFlags,
}

impl Inst {
    fn error() -> Self {
        Self {
            len: 0,
            opcode: 0,
            opcode2: 0,
            imm8: 0,
            imm32: 0,
            flags: InstFlags::ERROR,
        }
    }

    /// true iff decoding failed
    pub fn is_error(&self) -> bool {
        self.flags.contains(InstFlags::ERROR)
    }

    /// absolute destination of a relative transfer located at `at`
    pub fn branch_target(&self, at: MemoryPtr) -> MemoryPtr {
        let disp = if self.flags.contains(InstFlags::IMM8) {
            self.imm8 as i32
        } else {
            self.imm32
        };
        at.add(self.len as u32).add(disp as u32)
    }
}

/// decode the instruction at `at` in live memory
///
/// # Safety
/// `at` must point to at least [`MAX_INST_LEN`] readable bytes
pub unsafe fn decode(at: MemoryPtr) -> Inst {
    // SAFETY: forwarded precondition
    let bytes = unsafe { core::slice::from_raw_parts(at.as_ptr::<u8>(), MAX_INST_LEN) };
    decode_bytes(at.address(), bytes)
}

/// decode the first instruction of `bytes` as if it lived at `ip`
pub fn decode_bytes(ip: u32, bytes: &[u8]) -> Inst {
    let mut decoder = Decoder::with_ip(32, bytes, ip as u64, DecoderOptions::NONE);
    if !decoder.can_decode() {
        return Inst::error();
    }

    let instruction = decoder.decode();
    if instruction.is_invalid() {
        return Inst::error();
    }

    let len = instruction.len();

    // raw opcode bytes after legacy prefixes
    let mut index = 0;
    while index < len && is_legacy_prefix(bytes[index]) {
        index += 1;
    }
    let opcode = bytes.get(index).copied().unwrap_or(0);
    let opcode2 = if opcode == 0x0F {
        bytes.get(index + 1).copied().unwrap_or(0)
    } else {
        0
    };

    let mut flags = InstFlags::empty();
    let mut imm8 = 0i8;
    let mut imm32 = 0i32;

    let is_near_branch = matches!(
        instruction.flow_control(),
        FlowControl::UnconditionalBranch | FlowControl::ConditionalBranch | FlowControl::Call
    ) && matches!(
        instruction.op0_kind(),
        OpKind::NearBranch16 | OpKind::NearBranch32
    );

    if is_near_branch {
        flags |= InstFlags::RELATIVE;

        // recover the encoded displacement from the absolute target
        let target = instruction.near_branch_target() as u32;
        let disp = target.wrapping_sub(ip.wrapping_add(len as u32));

        // rel8 carriers: jmp short, Jcc short, loop/jecxz
        if matches!(opcode, 0xEB | 0x70..=0x7F | 0xE0..=0xE3) {
            flags |= InstFlags::IMM8;
            imm8 = disp as i8;
        } else {
            flags |= InstFlags::IMM32;
            imm32 = disp as i32;
        }
    }

    Inst {
        len,
        opcode,
        opcode2,
        imm8,
        imm32,
        flags,
    }
}

fn is_legacy_prefix(byte: u8) -> bool {
    matches!(
        byte,
        0x26 | 0x2E | 0x36 | 0x3E | 0x64 | 0x65 | 0x66 | 0x67 | 0xF0 | 0xF2 | 0xF3
    )
}
