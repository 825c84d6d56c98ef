//! VFS drive and handle tables.
//!
//! Paths name a drive by number: `<decimal-drive>:<path>`. Open resolves the
//! drive, asks its driver for a local handle, and records the pair in a
//! global handle table; read/write/size/close dispatch by global handle,
//! while `read_dir` and `create` re-parse a full path.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use zenith_core::sync::SpinLock;

use super::{FsDriver, FsError};

/// Number of drive slots.
pub const MAX_DRIVES: usize = 16;

/// Number of concurrently open global handles.
pub const MAX_HANDLES: usize = 64;

/// A global handle's routing entry.
#[derive(Clone, Copy)]
struct HandleEntry {
    drive: usize,
    local: usize,
}

/// Splits `<decimal-drive>:<path>` into its parts.
///
/// The drive number must have at least one digit and be followed by a colon;
/// everything after the colon is the driver-local path.
pub(crate) fn parse_path(path: &str) -> Result<(usize, &str), FsError> {
    let colon = path.find(':').ok_or(FsError::InvalidPath)?;
    let (digits, rest) = path.split_at(colon);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FsError::InvalidPath);
    }
    let drive: usize = digits.parse().map_err(|_| FsError::InvalidPath)?;
    Ok((drive, &rest[1..]))
}

/// The mount and handle tables.
pub struct Vfs {
    drives: [Option<Box<dyn FsDriver>>; MAX_DRIVES],
    handles: [Option<HandleEntry>; MAX_HANDLES],
}

impl Vfs {
    /// Creates an empty VFS.
    #[must_use]
    pub fn new() -> Self {
        Self {
            drives: [const { None }; MAX_DRIVES],
            handles: [const { None }; MAX_HANDLES],
        }
    }

    /// Registers `driver` as drive `number`.
    ///
    /// Replacing a live drive is allowed; its open handles go stale and
    /// return [`FsError::BadHandle`] semantics via the driver.
    pub fn register_drive(
        &mut self,
        number: usize,
        driver: Box<dyn FsDriver>,
    ) -> Result<(), FsError> {
        if number >= MAX_DRIVES {
            return Err(FsError::DriveNotRegistered);
        }
        self.drives[number] = Some(driver);
        crate::kinfo!("vfs: registered drive {number}");
        Ok(())
    }

    fn driver_mut(&mut self, drive: usize) -> Result<&mut Box<dyn FsDriver>, FsError> {
        self.drives
            .get_mut(drive)
            .and_then(Option::as_mut)
            .ok_or(FsError::DriveNotRegistered)
    }

    fn entry(&self, handle: usize) -> Result<HandleEntry, FsError> {
        self.handles
            .get(handle)
            .copied()
            .flatten()
            .ok_or(FsError::BadHandle)
    }

    /// Opens `path` and returns a global handle.
    pub fn open(&mut self, path: &str) -> Result<usize, FsError> {
        let (drive, local_path) = parse_path(path)?;
        let local = self.driver_mut(drive)?.open(local_path)?;

        let slot = self.handles.iter().position(Option::is_none);
        let Some(slot) = slot else {
            self.driver_mut(drive)?.close(local);
            return Err(FsError::NoFreeHandles);
        };
        self.handles[slot] = Some(HandleEntry { drive, local });
        Ok(slot)
    }

    /// Reads from an open handle at `offset`.
    pub fn read(&mut self, handle: usize, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
        let entry = self.entry(handle)?;
        self.driver_mut(entry.drive)?.read(entry.local, buf, offset)
    }

    /// Writes to an open handle at `offset`.
    pub fn write(&mut self, handle: usize, buf: &[u8], offset: u64) -> Result<usize, FsError> {
        let entry = self.entry(handle)?;
        self.driver_mut(entry.drive)?.write(entry.local, buf, offset)
    }

    /// Returns the size of the file behind an open handle.
    pub fn size(&self, handle: usize) -> Result<u64, FsError> {
        let entry = self.entry(handle)?;
        self.drives
            .get(entry.drive)
            .and_then(Option::as_ref)
            .ok_or(FsError::DriveNotRegistered)?
            .size(entry.local)
    }

    /// Closes a global handle.
    pub fn close(&mut self, handle: usize) -> Result<(), FsError> {
        let entry = self.entry(handle)?;
        self.driver_mut(entry.drive)?.close(entry.local);
        self.handles[handle] = None;
        Ok(())
    }

    /// Lists the direct children of a full `<drive>:<path>`.
    pub fn read_dir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let (drive, local_path) = parse_path(path)?;
        self.drives
            .get(drive)
            .and_then(Option::as_ref)
            .ok_or(FsError::DriveNotRegistered)?
            .read_dir(local_path)
    }

    /// Creates an empty file at a full `<drive>:<path>`.
    pub fn create(&mut self, path: &str) -> Result<(), FsError> {
        let (drive, local_path) = parse_path(path)?;
        self.driver_mut(drive)?.create(local_path)
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Global VFS instance
// ---------------------------------------------------------------------------

static VFS: SpinLock<Option<Vfs>> = SpinLock::new(None);

/// Initializes the global VFS.
///
/// # Panics
///
/// Panics if called twice.
pub fn init() {
    let mut vfs = VFS.lock();
    assert!(vfs.is_none(), "VFS already initialized");
    *vfs = Some(Vfs::new());
}

/// Runs a closure with a mutable reference to the global VFS.
///
/// # Panics
///
/// Panics if the VFS has not been initialized.
pub fn with_vfs<R>(f: impl FnOnce(&mut Vfs) -> R) -> R {
    let mut vfs = VFS.lock();
    f(vfs.as_mut().expect("VFS not initialized"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A driver that records calls and serves one 4-byte file.
    struct StubDriver {
        opened: Vec<String>,
        open_count: usize,
    }

    impl StubDriver {
        fn new() -> Self {
            Self { opened: Vec::new(), open_count: 0 }
        }
    }

    impl FsDriver for StubDriver {
        fn open(&mut self, path: &str) -> Result<usize, FsError> {
            self.opened.push(path.into());
            self.open_count += 1;
            Ok(self.open_count - 1)
        }

        fn read(&mut self, _handle: usize, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
            let data = b"data";
            let offset = offset as usize;
            if offset >= data.len() {
                return Ok(0);
            }
            let n = buf.len().min(data.len() - offset);
            buf[..n].copy_from_slice(&data[offset..offset + n]);
            Ok(n)
        }

        fn size(&self, _handle: usize) -> Result<u64, FsError> {
            Ok(4)
        }

        fn close(&mut self, _handle: usize) {}

        fn read_dir(&self, _path: &str) -> Result<Vec<String>, FsError> {
            Ok(vec!["a".into(), "b".into()])
        }
    }

    #[test]
    fn parse_path_grammar() {
        assert_eq!(parse_path("0:/man/intro.1"), Ok((0, "/man/intro.1")));
        assert_eq!(parse_path("15:"), Ok((15, "")));
        assert_eq!(parse_path("/no/drive"), Err(FsError::InvalidPath));
        assert_eq!(parse_path(":oops"), Err(FsError::InvalidPath));
        assert_eq!(parse_path("x1:/bad"), Err(FsError::InvalidPath));
    }

    #[test]
    fn open_routes_local_path_to_driver() {
        let mut vfs = Vfs::new();
        vfs.register_drive(3, Box::new(StubDriver::new())).unwrap();

        let handle = vfs.open("3:/etc/motd").unwrap();
        assert_eq!(vfs.size(handle), Ok(4));

        let mut buf = [0u8; 8];
        assert_eq!(vfs.read(handle, &mut buf, 0), Ok(4));
        assert_eq!(&buf[..4], b"data");
        vfs.close(handle).unwrap();
    }

    #[test]
    fn unregistered_drive_rejected() {
        let mut vfs = Vfs::new();
        assert_eq!(vfs.open("7:/x"), Err(FsError::DriveNotRegistered));
        assert_eq!(vfs.read_dir("7:/"), Err(FsError::DriveNotRegistered));
    }

    #[test]
    fn drive_number_out_of_range() {
        let mut vfs = Vfs::new();
        assert_eq!(
            vfs.register_drive(MAX_DRIVES, Box::new(StubDriver::new())),
            Err(FsError::DriveNotRegistered)
        );
        assert_eq!(vfs.open("16:/x"), Err(FsError::DriveNotRegistered));
    }

    #[test]
    fn handles_exhaust_at_capacity() {
        let mut vfs = Vfs::new();
        vfs.register_drive(0, Box::new(StubDriver::new())).unwrap();

        let mut handles = Vec::new();
        for _ in 0..MAX_HANDLES {
            handles.push(vfs.open("0:/f").unwrap());
        }
        assert_eq!(vfs.open("0:/f"), Err(FsError::NoFreeHandles));

        // Closing one slot frees it for reuse.
        vfs.close(handles[10]).unwrap();
        assert_eq!(vfs.open("0:/f"), Ok(handles[10]));
    }

    #[test]
    fn stale_handle_rejected() {
        let mut vfs = Vfs::new();
        vfs.register_drive(0, Box::new(StubDriver::new())).unwrap();
        let handle = vfs.open("0:/f").unwrap();
        vfs.close(handle).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(vfs.read(handle, &mut buf, 0), Err(FsError::BadHandle));
        assert_eq!(vfs.close(handle), Err(FsError::BadHandle));
    }

    #[test]
    fn write_default_is_not_supported() {
        let mut vfs = Vfs::new();
        vfs.register_drive(0, Box::new(StubDriver::new())).unwrap();
        let handle = vfs.open("0:/f").unwrap();
        assert_eq!(vfs.write(handle, b"x", 0), Err(FsError::NotSupported));
    }
}
