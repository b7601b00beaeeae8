//! Unified error types for grapnel

use core::fmt;

/// all errors that can occur in grapnel
#[derive(Debug)]
pub enum Error {
    // === memory ===
    /// executable page allocation failed
    AllocationFailed { size: usize },

    /// failed to change memory protection
    ProtectionChangeFailed { address: u32, size: usize },

    /// instruction cache flush failed
    FlushFailed { address: u32, size: usize },

    /// null pointer where non-null expected
    NullPointer { context: &'static str },

    // === hooking ===
    /// the target page is not committed or is marked no-access
    NotExecutable { address: u32 },

    /// the decoder failed inside the bytes the hook must displace
    ListingBroken { address: u32 },

    /// hook state required an owned code buffer that is not present
    BufferMissing { address: u32 },

    // === scanning ===
    /// module with given name not loaded in this process
    ModuleNotFound { name: String },

    /// module image headers invalid or unsupported
    BadImage {
        module: String,
        reason: &'static str,
    },

    // === win32 ===
    /// underlying Win32 API returned error
    Win32 { code: u32, context: &'static str },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailed { size } => {
                write!(f, "failed to allocate {size} bytes of executable memory")
            }
            Self::ProtectionChangeFailed { address, size } => {
                write!(
                    f,
                    "failed to change protection for {size} bytes at {address:#010x}"
                )
            }
            Self::FlushFailed { address, size } => {
                write!(
                    f,
                    "failed to flush instruction cache for {size} bytes at {address:#010x}"
                )
            }
            Self::NullPointer { context } => {
                write!(f, "unexpected null pointer in {context}")
            }
            Self::NotExecutable { address } => {
                write!(f, "target at {address:#010x} is not executable")
            }
            Self::ListingBroken { address } => {
                write!(f, "undecodable instruction listing at {address:#010x}")
            }
            Self::BufferMissing { address } => {
                write!(f, "no code buffer owned for hook at {address:#010x}")
            }
            Self::ModuleNotFound { name } => {
                write!(f, "module not found: {name}")
            }
            Self::BadImage { module, reason } => {
                write!(f, "invalid PE image for {module}: {reason}")
            }
            Self::Win32 { code, context } => {
                write!(f, "Win32 error {code:#x} in {context}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// result type alias using grapnel's [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// create `Win32` from GetLastError
    pub fn from_last_error(context: &'static str) -> Self {
        // SAFETY: GetLastError is always safe to call
        let code = unsafe { GetLastError() };
        Self::Win32 { code, context }
    }
}

#[link(name = "kernel32")]
extern "system" {
    fn GetLastError() -> u32;
}
