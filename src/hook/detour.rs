//! Inline detour engine
//!
//! One [`Hook`] per victim function. Installing rewrites the victim's
//! entry with a `jmp rel32` into a generated thunk that records the
//! caller's return address and forwards to the detour; the displaced
//! prologue is re-hosted in a continuation trampoline so the original
//! stays callable.
//!
//! Code buffer layout (offsets from the buffer base):
//!
//! ```text
//! 0x00  push eax
//! 0x01  mov eax, [esp + 4]         ; caller's return address
//! 0x05  mov [context], eax
//! 0x0A  pop eax
//! 0x0B  jmp detour
//! 0x10  <relocated prologue> ... jmp victim + prologue_len
//! ```

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use log::debug;

use crate::error::{Error, Result};
use crate::hook::asm::decoder::{self, InstFlags};
use crate::hook::asm::reloc::{self, JCC_REL32_LEN, JMP_REL32_LEN};
use crate::hook::asm::{AsmBuffer, Register};
use crate::hook::convention::HookableFn;
use crate::mem::ops;
use crate::ptr::MemoryPtr;

/// offset of the thunk's final `jmp detour`
const THUNK_TAIL: usize = 0x0B;

/// offset of the continuation trampoline (the "call original" entry)
const TRAMPOLINE_ENTRY: usize = 0x10;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct HookFlags: u8 {
        /// the victim currently carries our patch
        const INSTALLED = 1 << 0;
        /// the prologue could not be decoded; the hook is permanently inert
        const LISTING_BROKEN = 1 << 1;
        /// the victim's page was committed and accessible at construction
        const EXECUTABLE = 1 << 2;
        /// the victim is a call site, not a function entry
        const CALL_INSTRUCTION = 1 << 3;
    }
}

/// per-invocation data recorded by the entry thunk
#[repr(C)]
pub struct HookContext {
    return_address: AtomicU32,
}

impl HookContext {
    /// the caller's return address captured on the last pass through the
    /// thunk (the address right after the `call` that entered the victim)
    pub fn return_address(&self) -> u32 {
        self.return_address.load(Ordering::Relaxed)
    }

    /// address of the slot the generated code stores to
    fn slot(&self) -> MemoryPtr {
        MemoryPtr::from_ptr(&self.return_address as *const AtomicU32)
    }
}

/// an inline hook on one victim function
///
/// the type parameter is the victim's function pointer type; it fixes the
/// calling convention used by [`Hook::call`]. the hook removes itself when
/// dropped.
pub struct Hook<F: HookableFn> {
    victim: MemoryPtr,
    detour: MemoryPtr,
    prologue_len: usize,
    original: Option<Box<[u8]>>,
    code: Option<AsmBuffer>,
    call_target: MemoryPtr,
    flags: HookFlags,
    context: Box<HookContext>,
    _function: PhantomData<F>,
}

// SAFETY: the hook exclusively owns its buffer and context; the victim
// address is process-global state either way
unsafe impl<F: HookableFn> Send for Hook<F> {}

impl<F: HookableFn> Hook<F> {
    /// prepare a hook redirecting `victim` to `detour`
    ///
    /// decodes the victim's prologue and probes its protection; nothing is
    /// written until [`Hook::install`].
    pub fn new(victim: MemoryPtr, detour: F) -> Self {
        Self::with_raw_detour(victim, detour.as_ptr())
    }

    /// prepare a hook with an untyped detour address
    ///
    /// the detour must still follow `F`'s signature and convention.
    pub fn with_raw_detour(victim: MemoryPtr, detour: MemoryPtr) -> Self {
        let mut flags = HookFlags::empty();
        let mut prologue_len = 0usize;

        if ops::is_executable(victim) {
            flags |= HookFlags::EXECUTABLE;

            // consume whole instructions until a jmp rel32 fits
            let mut cursor = victim;
            while prologue_len < JMP_REL32_LEN {
                // SAFETY: the victim's region is committed and accessible
                let inst = unsafe { decoder::decode(cursor) };
                if inst.is_error() {
                    flags |= HookFlags::LISTING_BROKEN;
                    break;
                }

                cursor = cursor.add(inst.len as u32);
                prologue_len += inst.len;
            }
        }

        Self {
            victim,
            detour,
            prologue_len,
            original: None,
            code: None,
            call_target: MemoryPtr::NULL,
            flags,
            context: Box::new(HookContext {
                return_address: AtomicU32::new(0),
            }),
            _function: PhantomData,
        }
    }

    /// the patched function's address
    pub fn victim(&self) -> MemoryPtr {
        self.victim
    }

    /// the replacement function's address
    pub fn detour(&self) -> MemoryPtr {
        self.detour
    }

    /// number of victim bytes displaced by the patch
    pub fn prologue_len(&self) -> usize {
        self.prologue_len
    }

    /// true while the victim carries the patch
    pub fn is_installed(&self) -> bool {
        self.flags.contains(HookFlags::INSTALLED)
    }

    /// per-invocation data recorded by the thunk
    pub fn context(&self) -> &HookContext {
        &self.context
    }

    /// entry point of "call original"
    ///
    /// the continuation trampoline, or the call's absolute target in
    /// call-instruction mode. `None` before the first install.
    pub fn trampoline(&self) -> Option<MemoryPtr> {
        if self.flags.contains(HookFlags::CALL_INSTRUCTION) {
            Some(self.call_target)
        } else {
            self.code.as_ref().map(|code| code.get(TRAMPOLINE_ENTRY))
        }
    }

    /// redirect the victim to the detour
    ///
    /// idempotent while installed. errors report why nothing was written:
    /// a broken listing or non-executable target leaves the hook inert,
    /// allocation failures are propagated, and a decoder failure inside
    /// the displaced window aborts before the victim is touched.
    pub fn install(&mut self) -> Result<()> {
        if self.flags.contains(HookFlags::LISTING_BROKEN) {
            return Err(Error::ListingBroken {
                address: self.victim.address(),
            });
        }
        if self.flags.contains(HookFlags::INSTALLED) {
            return Ok(());
        }
        if !self.flags.contains(HookFlags::EXECUTABLE) {
            return Err(Error::NotExecutable {
                address: self.victim.address(),
            });
        }

        if let Some(code) = self.code.as_mut() {
            // the buffer survived a patch-branch remove; re-point the
            // thunk tail at the detour and we are done
            code.set_offset(THUNK_TAIL);
            code.jmp(self.detour);
            code.ready()?;

            self.flags |= HookFlags::INSTALLED;
            debug!("re-installed hook at {}", self.victim);
            return Ok(());
        }

        // a victim that starts with a near call is treated as a call site:
        // the call stays, only its operand is re-pointed
        // SAFETY: the victim's region is committed and accessible
        let first = unsafe { decoder::decode(self.victim) };
        if first.opcode == 0xE8 {
            self.call_target = reloc::absolute(first.imm32, self.victim, JMP_REL32_LEN);
            self.flags |= HookFlags::CALL_INSTRUCTION;
        }

        // back up the displaced bytes before anything is written
        let mut original = vec![0u8; self.prologue_len].into_boxed_slice();
        // SAFETY: both ranges are valid and disjoint
        unsafe {
            ops::copy(
                MemoryPtr::from_mut_ptr(original.as_mut_ptr()),
                self.victim,
                self.prologue_len,
            )?;
        }

        let mut code = AsmBuffer::new()?;
        self.emit_thunk(&mut code);
        debug_assert_eq!(code.offset(), TRAMPOLINE_ENTRY);

        if !self.flags.contains(HookFlags::CALL_INSTRUCTION) {
            if let Err(error) = self.emit_continuation(&mut code) {
                // refuse atomically: the victim is untouched and the
                // buffer is released; later installs stay inert
                self.flags |= HookFlags::LISTING_BROKEN;
                return Err(error);
            }
        }
        code.ready()?;

        // patch the victim entry
        let rel32 = reloc::rel32(code.begin(), self.victim, JMP_REL32_LEN);
        // SAFETY: the victim's range is committed; writes go through the
        // protection-toggling path
        unsafe {
            if !self.flags.contains(HookFlags::CALL_INSTRUCTION) {
                ops::write::<u8>(self.victim, 0xE9)?;
            }
            ops::write::<i32>(self.victim.add(1), rel32)?;

            if self.prologue_len > JMP_REL32_LEN {
                ops::fill(
                    self.victim.add(JMP_REL32_LEN as u32),
                    0x90,
                    self.prologue_len - JMP_REL32_LEN,
                )?;
            }
        }

        self.original = Some(original);
        self.code = Some(code);
        self.flags |= HookFlags::INSTALLED;

        debug!(
            "installed hook at {} -> {} ({} bytes displaced)",
            self.victim, self.detour, self.prologue_len
        );
        Ok(())
    }

    /// undo the patch
    ///
    /// re-reads the victim to tolerate third-party rewrites: if its first
    /// instruction still transfers into our code (or back to the original
    /// call target), the original bytes are restored and the buffer is
    /// released; otherwise someone re-patched on top of us, so only our
    /// thunk is neutralized and the buffer is kept for a later re-install.
    pub fn remove(&mut self) -> Result<()> {
        if !self.flags.contains(HookFlags::INSTALLED) {
            return Ok(());
        }

        let Some(code) = self.code.as_ref() else {
            return Err(Error::BufferMissing {
                address: self.victim.address(),
            });
        };
        let code_base = code.begin();

        // SAFETY: the victim's region is committed and accessible
        let inst = unsafe { decoder::decode(self.victim) };

        let unload = if inst.is_error()
            || !inst.flags.contains(InstFlags::RELATIVE)
            || !inst.flags.contains(InstFlags::IMM32)
        {
            true
        } else {
            let destination = reloc::absolute(inst.imm32, self.victim, inst.len);
            destination == code_base || destination == self.call_target
        };

        if unload {
            if let Some(original) = self.original.as_ref() {
                // SAFETY: restoring the bytes we backed up at install
                unsafe {
                    ops::copy(
                        self.victim,
                        MemoryPtr::from_ptr(original.as_ptr()),
                        self.prologue_len,
                    )?;
                }
            }

            self.original = None;
            self.code = None;
            self.call_target = MemoryPtr::NULL;
            self.flags
                .remove(HookFlags::INSTALLED | HookFlags::CALL_INSTRUCTION);

            debug!("removed hook at {} (restored original bytes)", self.victim);
        } else if self.flags.contains(HookFlags::CALL_INSTRUCTION) {
            // a later install only rewrites the tail again, so send the
            // thunk back to the function the call originally targeted
            let Some(code) = self.code.as_mut() else {
                return Err(Error::BufferMissing {
                    address: self.victim.address(),
                });
            };
            code.set_offset(THUNK_TAIL);
            code.jmp(self.call_target);
            code.ready()?;

            self.flags.remove(HookFlags::INSTALLED);
            debug!("neutralized call-site hook at {}", self.victim);
        } else {
            // execution that still reaches the thunk falls through the
            // nops onto the continuation trampoline
            // SAFETY: the tail is inside our own buffer
            unsafe {
                ops::fill(code_base.add(THUNK_TAIL as u32), 0x90, JMP_REL32_LEN)?;
            }

            self.flags.remove(HookFlags::INSTALLED);
            debug!("neutralized hook thunk at {}", self.victim);
        }

        Ok(())
    }

    /// invoke the original function with the victim's own convention
    ///
    /// goes through the continuation trampoline (or straight to the call
    /// target in call-instruction mode). before the first install this
    /// calls the victim itself, which still holds the original code.
    ///
    /// # Safety
    /// the victim must really be a function of type `F`, and the hook's
    /// state must match the victim's current bytes (no foreign rewrite of
    /// the displaced window)
    pub unsafe fn call(&self, args: F::Args) -> F::Output {
        let target = self.trampoline().unwrap_or(self.victim);
        // SAFETY: target is original code equivalent to the victim; the
        // caller guarantees the signature
        let original = unsafe { F::from_ptr(target) };
        // SAFETY: forwarded precondition
        unsafe { original.invoke(args) }
    }

    /// thunk: capture the caller's return address, then enter the detour
    fn emit_thunk(&self, code: &mut AsmBuffer) {
        code.push(Register::Eax);
        // [esp + 4] skips the eax we just saved
        code.mov_reg_mem(Register::Eax, Register::Esp, 4);
        code.mov_mem_reg(self.context.slot(), Register::Eax);
        code.pop(Register::Eax);
        code.jmp(self.detour);
    }

    /// re-host the displaced prologue, relocating PC-relative transfers
    fn emit_continuation(&self, code: &mut AsmBuffer) -> Result<()> {
        let mut now = self.victim;
        let mut covered = 0usize;

        while covered < self.prologue_len {
            // SAFETY: still inside the prologue we decoded at construction
            let inst = unsafe { decoder::decode(now) };
            if inst.is_error() {
                return Err(Error::ListingBroken {
                    address: now.address(),
                });
            }

            if inst.opcode == 0xE8 {
                // near call: same destination from the new home
                let destination = inst.branch_target(now);
                let rel32 = reloc::rel32(destination, code.now(), JMP_REL32_LEN);
                code.db(0xE8).db_value(rel32);
            } else if (inst.opcode & 0xFD) == 0xE9 {
                // jmp rel8/rel32: always re-emitted as the rel32 form
                let destination = inst.branch_target(now);
                let rel32 = reloc::rel32(destination, code.now(), JMP_REL32_LEN);
                code.db(0xE9).db_value(rel32);
            } else if (inst.opcode & 0xF0) == 0x70 || (inst.opcode2 & 0xF0) == 0x80 {
                // Jcc rel8/rel32: always the near form, condition kept
                let destination = inst.branch_target(now);
                let cond = if inst.opcode == 0x0F {
                    inst.opcode2
                } else {
                    inst.opcode
                } & 0x0F;
                let rel32 = reloc::rel32(destination, code.now(), JCC_REL32_LEN);
                code.db(0x0F).db(0x80 | cond).db_value(rel32);
            } else {
                // position-independent: copy verbatim
                // SAFETY: the instruction's bytes are readable
                let bytes =
                    unsafe { core::slice::from_raw_parts(now.as_ptr::<u8>(), inst.len) };
                code.db_bytes(bytes);
            }

            covered += inst.len;
            now = now.add(inst.len as u32);
        }

        // fall back into the victim right after the displaced window
        code.jmp(now);
        Ok(())
    }
}

impl<F: HookableFn> Drop for Hook<F> {
    fn drop(&mut self) {
        // ignore errors during drop
        let _ = self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{self, Protection};

    type RetFn = extern "C" fn() -> i32;
    type AddFn = extern "C" fn(i32, i32) -> i32;

    extern "C" fn neg_add(a: i32, b: i32) -> i32 {
        -(a + b)
    }

    extern "C" fn ret_zero() -> i32 {
        0
    }

    fn make_victim(bytes: &[u8]) -> AsmBuffer {
        let mut buffer = AsmBuffer::new().unwrap();
        buffer.db_bytes(bytes);
        buffer.ready().unwrap();
        buffer
    }

    fn as_fn<T: HookableFn>(at: MemoryPtr) -> T {
        // SAFETY: test victims are synthesized with matching signatures
        unsafe { T::from_ptr(at) }
    }

    // int add(int a, int b) { return a + b; } with a straight-line prologue
    const ADD_BYTES: [u8; 9] = [
        0x8B, 0x44, 0x24, 0x04, // mov eax, [esp + 4]
        0x03, 0x44, 0x24, 0x08, // add eax, [esp + 8]
        0xC3, // ret
    ];

    // int fortytwo(void) { return 42; }
    const FORTYTWO_BYTES: [u8; 6] = [
        0xB8, 0x2A, 0x00, 0x00, 0x00, // mov eax, 42
        0xC3, // ret
    ];

    #[test]
    fn test_cdecl_detour_round_trip() {
        let victim_buf = make_victim(&ADD_BYTES);
        let victim = victim_buf.begin();
        let direct: AddFn = as_fn(victim);

        assert_eq!(direct(3, 4), 7);

        let mut hook = Hook::<AddFn>::new(victim, neg_add);
        assert_eq!(hook.prologue_len(), 8);

        hook.install().unwrap();
        assert!(hook.is_installed());
        assert_eq!(direct(3, 4), -7);
        // the original stays reachable
        assert_eq!(unsafe { hook.call((3, 4)) }, 7);

        hook.remove().unwrap();
        assert!(!hook.is_installed());
        assert_eq!(direct(3, 4), 7);
    }

    #[test]
    fn test_patch_bytes_and_restore() {
        let victim_buf = make_victim(&ADD_BYTES);
        let victim = victim_buf.begin();

        let before: [u8; 9] = victim_buf.bytes()[..9].try_into().unwrap();

        let mut hook = Hook::<AddFn>::new(victim, neg_add);
        hook.install().unwrap();

        // jmp rel32 into the buffer base, nop fill to the prologue end
        let bytes = victim_buf.bytes();
        assert_eq!(bytes[0], 0xE9);
        let base = hook.trampoline().unwrap().sub(TRAMPOLINE_ENTRY as u32);
        let rel = i32::from_le_bytes(bytes[1..5].try_into().unwrap());
        assert_eq!(rel, reloc::rel32(base, victim, JMP_REL32_LEN));
        assert_eq!(&bytes[5..8], &[0x90, 0x90, 0x90]);

        hook.remove().unwrap();
        assert_eq!(&victim_buf.bytes()[..9], &before);

        // round-trip a second time
        hook.install().unwrap();
        hook.remove().unwrap();
        assert_eq!(&victim_buf.bytes()[..9], &before);
    }

    #[test]
    fn test_install_idempotent() {
        let victim_buf = make_victim(&ADD_BYTES);
        let mut hook = Hook::<AddFn>::new(victim_buf.begin(), neg_add);

        hook.install().unwrap();
        let trampoline = hook.trampoline().unwrap();

        hook.install().unwrap();
        assert_eq!(hook.trampoline().unwrap(), trampoline);
        assert_eq!(victim_buf.bytes()[0], 0xE9);
    }

    #[test]
    fn test_short_jmp_prologue_relocated() {
        // jmp over padding, then the real body
        let victim_buf = make_victim(&[
            0xEB, 0x03, // jmp +3
            0x90, 0x90, 0x90, // padding
            0xB8, 0x2A, 0x00, 0x00, 0x00, // mov eax, 42
            0xC3, // ret
        ]);
        let victim = victim_buf.begin();
        let direct: RetFn = as_fn(victim);

        assert_eq!(direct(), 42);

        let mut hook = Hook::<RetFn>::new(victim, ret_zero);
        assert_eq!(hook.prologue_len(), 5);
        hook.install().unwrap();

        assert_eq!(direct(), 0);

        // the short jmp grew to the rel32 form with the same destination
        let trampoline = hook.trampoline().unwrap();
        assert_eq!(unsafe { ops::read::<u8>(trampoline).unwrap() }, 0xE9);
        let rel = unsafe { ops::read::<i32>(trampoline.add(1)).unwrap() };
        assert_eq!(
            reloc::absolute(rel, trampoline, JMP_REL32_LEN),
            victim.add(5)
        );

        assert_eq!(unsafe { hook.call(()) }, 42);

        hook.remove().unwrap();
        assert_eq!(direct(), 42);
    }

    #[test]
    fn test_jcc_prologue_relocated() {
        let victim_buf = make_victim(&[
            0x74, 0x03, // jz +3
            0x90, 0x90, 0x90, // padding
            0xB8, 0x2A, 0x00, 0x00, 0x00, // mov eax, 42
            0xC3, // ret
        ]);
        let victim = victim_buf.begin();

        let mut hook = Hook::<RetFn>::new(victim, ret_zero);
        hook.install().unwrap();

        let trampoline = hook.trampoline().unwrap();
        let bytes =
            unsafe { core::slice::from_raw_parts(trampoline.as_ptr::<u8>(), 14) };

        // jz rel8 -> jz rel32, same destination
        assert_eq!(&bytes[..2], &[0x0F, 0x84]);
        let rel = i32::from_le_bytes(bytes[2..6].try_into().unwrap());
        assert_eq!(
            reloc::absolute(rel, trampoline, JCC_REL32_LEN),
            victim.add(5)
        );

        // padding copied verbatim, then the jmp back past the patch
        assert_eq!(&bytes[6..9], &[0x90, 0x90, 0x90]);
        assert_eq!(bytes[9], 0xE9);
        let back = i32::from_le_bytes(bytes[10..14].try_into().unwrap());
        assert_eq!(
            reloc::absolute(back, trampoline.add(9), JMP_REL32_LEN),
            victim.add(5)
        );
    }

    #[test]
    fn test_call_in_prologue_relocated() {
        // victim starts with something harmless, then calls a helper
        let helper_buf = make_victim(&FORTYTWO_BYTES);

        let mut victim_buf = AsmBuffer::new().unwrap();
        victim_buf.db(0x90); // nop
        let call_site = victim_buf.now();
        victim_buf.db(0xE8).db_value(reloc::rel32(
            helper_buf.begin(),
            call_site,
            JMP_REL32_LEN,
        ));
        victim_buf.db(0xC3); // ret
        victim_buf.ready().unwrap();

        let victim = victim_buf.begin();
        let direct: RetFn = as_fn(victim);
        assert_eq!(direct(), 42);

        let mut hook = Hook::<RetFn>::new(victim, ret_zero);
        assert_eq!(hook.prologue_len(), 6);
        hook.install().unwrap();

        // relocated call still reaches the helper
        let trampoline = hook.trampoline().unwrap();
        assert_eq!(unsafe { ops::read::<u8>(trampoline).unwrap() }, 0x90);
        assert_eq!(unsafe { ops::read::<u8>(trampoline.add(1)).unwrap() }, 0xE8);
        let rel = unsafe { ops::read::<i32>(trampoline.add(2)).unwrap() };
        assert_eq!(
            reloc::absolute(rel, trampoline.add(1), JMP_REL32_LEN),
            helper_buf.begin()
        );

        assert_eq!(unsafe { hook.call(()) }, 42);

        hook.remove().unwrap();
        assert_eq!(direct(), 42);
    }

    #[test]
    fn test_thiscall_method() {
        #[repr(C)]
        struct Obj {
            field: i32,
        }

        type MethodFn = extern "thiscall" fn(*mut Obj, i32) -> i32;

        extern "thiscall" fn method_detour(_this: *mut Obj, _x: i32) -> i32 {
            -1
        }

        // int Obj::method(int x) { return x + this->field; }
        let victim_buf = make_victim(&[
            0x8B, 0x44, 0x24, 0x04, // mov eax, [esp + 4]
            0x03, 0x01, // add eax, [ecx]
            0xC2, 0x04, 0x00, // ret 4
        ]);
        let victim = victim_buf.begin();

        let mut obj = Obj { field: 30 };
        let direct: MethodFn = as_fn(victim);
        assert_eq!(direct(&mut obj, 12), 42);

        let mut hook = Hook::<MethodFn>::new(victim, method_detour);
        hook.install().unwrap();

        assert_eq!(direct(&mut obj, 12), -1);
        assert_eq!(unsafe { hook.call((&mut obj as *mut Obj, 12)) }, 42);

        hook.remove().unwrap();
        assert_eq!(direct(&mut obj, 12), 42);
    }

    #[test]
    fn test_call_instruction_mode() {
        let callee_buf = make_victim(&FORTYTWO_BYTES);

        // a call site followed by ret; hooking targets the call itself
        let mut site_buf = AsmBuffer::new().unwrap();
        site_buf.db(0xE8).db_value(reloc::rel32(
            callee_buf.begin(),
            site_buf.begin(),
            JMP_REL32_LEN,
        ));
        site_buf.db(0xC3);
        site_buf.ready().unwrap();

        let victim = site_buf.begin();
        let through: RetFn = as_fn(victim);
        assert_eq!(through(), 42);

        extern "C" fn fortytwo_detour() -> i32 {
            -7
        }

        let mut hook = Hook::<RetFn>::new(victim, fortytwo_detour);
        assert_eq!(hook.prologue_len(), 5);
        hook.install().unwrap();

        // the call opcode survives; only its operand was rewritten
        assert_eq!(unsafe { ops::read::<u8>(victim).unwrap() }, 0xE8);
        assert_eq!(through(), -7);

        // "call original" goes straight to the absolute target
        assert_eq!(hook.trampoline().unwrap(), callee_buf.begin());
        assert_eq!(unsafe { hook.call(()) }, 42);

        hook.remove().unwrap();
        assert_eq!(through(), 42);
        let rel = unsafe { ops::read::<i32>(victim.add(1)).unwrap() };
        assert_eq!(
            reloc::absolute(rel, victim, JMP_REL32_LEN),
            callee_buf.begin()
        );
    }

    #[test]
    fn test_reinstall_after_foreign_overwrite() {
        let victim_buf = make_victim(&FORTYTWO_BYTES);
        let victim = victim_buf.begin();

        let mut hook = Hook::<RetFn>::new(victim, ret_zero);
        hook.install().unwrap();
        let trampoline = hook.trampoline().unwrap();

        // a third party re-points the victim somewhere else entirely
        let elsewhere_buf = make_victim(&[0xB8, 0x01, 0x00, 0x00, 0x00, 0xC3]);
        unsafe {
            ops::write::<u8>(victim, 0xE9).unwrap();
            ops::write::<i32>(
                victim.add(1),
                reloc::rel32(elsewhere_buf.begin(), victim, JMP_REL32_LEN),
            )
            .unwrap();
        }

        // remove keeps the buffer and only neutralizes the thunk
        hook.remove().unwrap();
        assert!(!hook.is_installed());
        assert_eq!(hook.trampoline(), Some(trampoline));
        let tail = trampoline.sub(JMP_REL32_LEN as u32);
        let nops = unsafe { ops::read::<[u8; 5]>(tail).unwrap() };
        assert_eq!(nops, [0x90; 5]);

        // "call original" still lands on the intact trampoline
        assert_eq!(unsafe { hook.call(()) }, 42);

        // the second install reuses the buffer and re-emits the tail
        hook.install().unwrap();
        assert_eq!(hook.trampoline(), Some(trampoline));
        assert_eq!(unsafe { ops::read::<u8>(tail).unwrap() }, 0xE9);
        let rel = unsafe { ops::read::<i32>(tail.add(1)).unwrap() };
        assert_eq!(
            reloc::absolute(rel, tail, JMP_REL32_LEN),
            hook.detour()
        );
    }

    #[test]
    fn test_remove_tolerates_foreign_plain_rewrite() {
        let victim_buf = make_victim(&FORTYTWO_BYTES);
        let victim = victim_buf.begin();
        let before: [u8; 6] = victim_buf.bytes()[..6].try_into().unwrap();

        let mut hook = Hook::<RetFn>::new(victim, ret_zero);
        hook.install().unwrap();

        // someone stamped a plain ret over our patch
        unsafe { ops::write::<u8>(victim, 0xC3).unwrap() };

        // not a rel32 transfer anymore: remove restores the backup
        hook.remove().unwrap();
        assert_eq!(&victim_buf.bytes()[..6], &before);
        assert!(hook.trampoline().is_none());
    }

    #[test]
    fn test_broken_listing_is_inert() {
        // 0F 04 is unassigned; construction records the broken listing
        let victim_buf = make_victim(&[0x0F, 0x04, 0x00, 0x00, 0x00, 0x00]);
        let victim = victim_buf.begin();
        let before: [u8; 6] = victim_buf.bytes()[..6].try_into().unwrap();

        let mut hook = Hook::<RetFn>::new(victim, ret_zero);
        assert!(matches!(
            hook.install(),
            Err(Error::ListingBroken { .. })
        ));
        assert!(!hook.is_installed());

        hook.remove().unwrap();
        assert_eq!(&victim_buf.bytes()[..6], &before);
    }

    #[test]
    fn test_not_executable_is_inert() {
        let victim_buf = make_victim(&FORTYTWO_BYTES);
        let victim = victim_buf.begin();

        mem::protect(victim, victim_buf.size(), Protection::NoAccess).unwrap();
        let mut hook = Hook::<RetFn>::new(victim, ret_zero);
        let result = hook.install();
        mem::protect(victim, victim_buf.size(), Protection::ExecuteReadWrite).unwrap();

        assert!(matches!(result, Err(Error::NotExecutable { .. })));
        assert!(!hook.is_installed());
        assert_eq!(&victim_buf.bytes()[..6], &FORTYTWO_BYTES);
    }

    #[test]
    fn test_return_address_captured() {
        let victim_buf = make_victim(&FORTYTWO_BYTES);
        let victim = victim_buf.begin();

        // a caller stub: call victim; ret
        let mut caller_buf = AsmBuffer::new().unwrap();
        caller_buf.db(0xE8).db_value(reloc::rel32(
            victim,
            caller_buf.begin(),
            JMP_REL32_LEN,
        ));
        caller_buf.db(0xC3);
        caller_buf.ready().unwrap();

        let mut hook = Hook::<RetFn>::new(victim, ret_zero);
        hook.install().unwrap();

        let through: RetFn = as_fn(caller_buf.begin());
        assert_eq!(through(), 0);

        // the thunk recorded the address right after the call
        assert_eq!(
            hook.context().return_address(),
            caller_buf.begin().add(5).address()
        );
    }

    #[test]
    fn test_drop_removes() {
        let victim_buf = make_victim(&ADD_BYTES);
        let victim = victim_buf.begin();
        let direct: AddFn = as_fn(victim);

        {
            let mut hook = Hook::<AddFn>::new(victim, neg_add);
            hook.install().unwrap();
            assert_eq!(direct(3, 4), -7);
        }

        assert_eq!(direct(3, 4), 7);
    }

    #[test]
    fn test_call_before_install_hits_victim() {
        let victim_buf = make_victim(&ADD_BYTES);
        let hook = Hook::<AddFn>::new(victim_buf.begin(), neg_add);

        assert!(hook.trampoline().is_none());
        assert_eq!(unsafe { hook.call((20, 22)) }, 42);
    }
}
