//! PC-relative displacement arithmetic
//!
//! A rel32 operand encodes `target - instruction_end`, where the
//! instruction end is the operand's home address plus the instruction
//! length. Both directions wrap, matching what the CPU does.

use crate::ptr::MemoryPtr;

/// length of `jmp rel32` / `call rel32`
pub const JMP_REL32_LEN: usize = 5;

/// length of the near conditional jump form `0F 8x rel32`
pub const JCC_REL32_LEN: usize = 6;

/// displacement that makes an instruction of `oplen` bytes at `from`
/// transfer to `to`
pub fn rel32(to: MemoryPtr, from: MemoryPtr, oplen: usize) -> i32 {
    to.address()
        .wrapping_sub(from.address())
        .wrapping_sub(oplen as u32) as i32
}

/// absolute destination of an instruction of `oplen` bytes at `from`
/// carrying displacement `imm`
pub fn absolute(imm: i32, from: MemoryPtr, oplen: usize) -> MemoryPtr {
    MemoryPtr::new(
        from.address()
            .wrapping_add(oplen as u32)
            .wrapping_add(imm as u32),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rel32_forward() {
        // jmp at 0x1000 to 0x1100: 0x1100 - (0x1000 + 5)
        let offset = rel32(MemoryPtr::new(0x1100), MemoryPtr::new(0x1000), JMP_REL32_LEN);
        assert_eq!(offset, 0xFB);
    }

    #[test]
    fn test_rel32_backward() {
        let offset = rel32(MemoryPtr::new(0x1000), MemoryPtr::new(0x2000), JMP_REL32_LEN);
        assert_eq!(offset, -0x1005);
    }

    #[test]
    fn test_round_trip() {
        let from = MemoryPtr::new(0x0040_1000);
        for target in [0u32, 0x1234, 0x0040_0FFF, 0xFFFF_FFF0] {
            let to = MemoryPtr::new(target);
            for oplen in [JMP_REL32_LEN, JCC_REL32_LEN] {
                let imm = rel32(to, from, oplen);
                assert_eq!(absolute(imm, from, oplen), to);
            }
        }
    }

    #[test]
    fn test_absolute_of_zero_disp() {
        // a call with disp 0 targets the byte right after itself
        let site = MemoryPtr::new(0x1000);
        assert_eq!(absolute(0, site, JMP_REL32_LEN), site.add(5));
    }
}
