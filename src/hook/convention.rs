//! Typed function dispatch for "call original"
//!
//! [`HookableFn`] is implemented for bare function pointers in the four
//! 32-bit calling conventions so a [`crate::Hook`] can invoke the
//! displaced original through a pointer of the victim's own type. C++
//! member functions are `extern "thiscall"` with an explicit receiver as
//! the first argument.

use crate::ptr::MemoryPtr;

/// 32-bit x86 calling conventions supported by the hook engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    /// caller cleans the stack
    Cdecl,
    /// callee cleans the stack (Win32 API default)
    Stdcall,
    /// `this` in ECX, callee cleans the stack
    Thiscall,
    /// first two arguments in ECX/EDX, callee cleans the stack
    Fastcall,
}

/// a function pointer type the hook engine can redirect and re-invoke
///
/// # Safety
/// implementations must guarantee that `from_ptr` followed by `invoke`
/// performs a call with exactly the ABI the type names
pub unsafe trait HookableFn: Copy + Sized {
    /// argument tuple accepted by [`HookableFn::invoke`]
    type Args;
    type Output;

    const CONVENTION: CallingConvention;

    /// stack/register argument slots, with the convention's implicit
    /// arguments (`this` for thiscall, ECX/EDX for fastcall) subtracted
    const ARG_COUNT: usize;

    /// the function's entry address
    fn as_ptr(self) -> MemoryPtr;

    /// reinterpret an address as this function type
    ///
    /// # Safety
    /// `address` must be the entry of code with this exact signature
    unsafe fn from_ptr(address: MemoryPtr) -> Self;

    /// call the function with `args`
    ///
    /// # Safety
    /// the pointee must still be valid executable code
    unsafe fn invoke(self, args: Self::Args) -> Self::Output;
}

macro_rules! count_args {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count_args!($($tail)*) };
}

macro_rules! impl_hookable {
    ($abi:literal, $variant:ident, $implicit:expr $(, $arg:ident)*) => {
        unsafe impl<Ret, $($arg),*> HookableFn for extern $abi fn($($arg),*) -> Ret {
            type Args = ($($arg,)*);
            type Output = Ret;

            const CONVENTION: CallingConvention = CallingConvention::$variant;
            const ARG_COUNT: usize = count_args!($($arg)*).saturating_sub($implicit);

            fn as_ptr(self) -> MemoryPtr {
                MemoryPtr::new(self as usize as u32)
            }

            unsafe fn from_ptr(address: MemoryPtr) -> Self {
                // SAFETY: caller guarantees the address has this signature
                unsafe { core::mem::transmute(address.as_usize()) }
            }

            #[allow(non_snake_case)]
            unsafe fn invoke(self, ($($arg,)*): Self::Args) -> Ret {
                (self)($($arg),*)
            }
        }

        unsafe impl<Ret, $($arg),*> HookableFn for unsafe extern $abi fn($($arg),*) -> Ret {
            type Args = ($($arg,)*);
            type Output = Ret;

            const CONVENTION: CallingConvention = CallingConvention::$variant;
            const ARG_COUNT: usize = count_args!($($arg)*).saturating_sub($implicit);

            fn as_ptr(self) -> MemoryPtr {
                MemoryPtr::new(self as usize as u32)
            }

            unsafe fn from_ptr(address: MemoryPtr) -> Self {
                // SAFETY: caller guarantees the address has this signature
                unsafe { core::mem::transmute(address.as_usize()) }
            }

            #[allow(non_snake_case)]
            unsafe fn invoke(self, ($($arg,)*): Self::Args) -> Ret {
                // SAFETY: forwarded precondition
                unsafe { (self)($($arg),*) }
            }
        }
    };
}

macro_rules! impl_hookable_abi {
    ($abi:literal, $variant:ident, $implicit:expr) => {
        impl_hookable!($abi, $variant, $implicit);
        impl_hookable!($abi, $variant, $implicit, A);
        impl_hookable!($abi, $variant, $implicit, A, B);
        impl_hookable!($abi, $variant, $implicit, A, B, C);
        impl_hookable!($abi, $variant, $implicit, A, B, C, D);
        impl_hookable!($abi, $variant, $implicit, A, B, C, D, E);
        impl_hookable!($abi, $variant, $implicit, A, B, C, D, E, F);
        impl_hookable!($abi, $variant, $implicit, A, B, C, D, E, F, G);
        impl_hookable!($abi, $variant, $implicit, A, B, C, D, E, F, G, H);
    };
}

impl_hookable_abi!("C", Cdecl, 0);
impl_hookable_abi!("stdcall", Stdcall, 0);
impl_hookable_abi!("thiscall", Thiscall, 1);
impl_hookable_abi!("fastcall", Fastcall, 2);

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn add(a: i32, b: i32) -> i32 {
        a + b
    }

    extern "stdcall" fn mul(a: i32, b: i32) -> i32 {
        a * b
    }

    #[test]
    fn test_convention_tags() {
        type CdeclFn = extern "C" fn(i32, i32) -> i32;
        type StdcallFn = extern "stdcall" fn(i32) -> i32;
        type ThiscallFn = extern "thiscall" fn(*mut u8, i32) -> i32;
        type FastcallFn = extern "fastcall" fn(i32, i32, i32) -> i32;

        assert_eq!(CdeclFn::CONVENTION, CallingConvention::Cdecl);
        assert_eq!(StdcallFn::CONVENTION, CallingConvention::Stdcall);
        assert_eq!(ThiscallFn::CONVENTION, CallingConvention::Thiscall);
        assert_eq!(FastcallFn::CONVENTION, CallingConvention::Fastcall);
    }

    #[test]
    fn test_arg_counts() {
        assert_eq!(<extern "C" fn(i32, i32) -> i32>::ARG_COUNT, 2);
        assert_eq!(<extern "stdcall" fn() -> u32>::ARG_COUNT, 0);
        // the receiver is implicit
        assert_eq!(<extern "thiscall" fn(*mut u8, i32) -> i32>::ARG_COUNT, 1);
        // ECX/EDX carry the first two
        assert_eq!(
            <extern "fastcall" fn(i32, i32, i32) -> i32>::ARG_COUNT,
            1
        );
        assert_eq!(<extern "fastcall" fn(i32) -> i32>::ARG_COUNT, 0);
    }

    #[test]
    fn test_ptr_round_trip() {
        type AddFn = extern "C" fn(i32, i32) -> i32;

        let ptr = (add as AddFn).as_ptr();
        assert!(!ptr.is_null());

        // SAFETY: ptr came from a function of exactly this type
        let restored = unsafe { AddFn::from_ptr(ptr) };
        assert_eq!(unsafe { restored.invoke((2, 3)) }, 5);
    }

    #[test]
    fn test_invoke_stdcall() {
        type MulFn = extern "stdcall" fn(i32, i32) -> i32;

        let f = mul as MulFn;
        // SAFETY: f is a live function of this type
        assert_eq!(unsafe { f.invoke((6, 7)) }, 42);
    }
}
