//! Virtual file system: numbered drives routed to filesystem drivers.

pub mod ustar;
pub mod vfs;

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// Errors surfaced by the VFS and filesystem drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// The path does not match `<drive>:<path>`.
    InvalidPath,
    /// The addressed drive has no registered driver.
    DriveNotRegistered,
    /// No entry with that name.
    NotFound,
    /// The global handle table is full.
    NoFreeHandles,
    /// The handle is closed or out of range.
    BadHandle,
    /// The driver does not implement this operation.
    NotSupported,
    /// The backing store cannot grow any further.
    NoSpace,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPath => write!(f, "malformed path (expected <drive>:<path>)"),
            Self::DriveNotRegistered => write!(f, "drive not registered"),
            Self::NotFound => write!(f, "no such file or directory"),
            Self::NoFreeHandles => write!(f, "handle table full"),
            Self::BadHandle => write!(f, "bad file handle"),
            Self::NotSupported => write!(f, "operation not supported by driver"),
            Self::NoSpace => write!(f, "no space left"),
        }
    }
}

/// The operation vtable every filesystem driver provides.
///
/// `write` and `create` are optional; drivers without them inherit the
/// `NotSupported` defaults.
pub trait FsDriver: Send {
    /// Opens `path` (driver-local, no drive prefix) and returns a
    /// driver-local handle.
    fn open(&mut self, path: &str) -> Result<usize, FsError>;

    /// Reads up to `buf.len()` bytes at `offset`; short reads are clamped to
    /// the file size and `offset >= size` reads zero bytes.
    fn read(&mut self, handle: usize, buf: &mut [u8], offset: u64) -> Result<usize, FsError>;

    /// Returns the file size in bytes.
    fn size(&self, handle: usize) -> Result<u64, FsError>;

    /// Releases a driver-local handle.
    fn close(&mut self, handle: usize);

    /// Lists the direct children of `path`.
    fn read_dir(&self, path: &str) -> Result<Vec<String>, FsError>;

    /// Writes `buf` at `offset`, growing the file if the driver supports it.
    fn write(&mut self, _handle: usize, _buf: &[u8], _offset: u64) -> Result<usize, FsError> {
        Err(FsError::NotSupported)
    }

    /// Creates an empty file at `path`.
    fn create(&mut self, _path: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }
}
