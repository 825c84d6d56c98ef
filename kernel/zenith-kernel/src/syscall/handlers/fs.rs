//! File syscalls: open/read/write/size/close/readdir/create.
//!
//! These keep the original contract of returning `-1` for any filesystem
//! failure rather than a specific errno; userspace only branches on the
//! sign.

use crate::fs::vfs;
use crate::syscall::userptr::{UserSlice, read_user_cstr};

/// `SYS_OPEN`: path → global handle, or -1.
pub fn sys_open(path_ptr: usize) -> isize {
    // SAFETY: The calling process's address space is active.
    let Ok(path) = (unsafe { read_user_cstr(path_ptr, 256) }) else {
        return -1;
    };
    match vfs::with_vfs(|vfs| vfs.open(&path)) {
        Ok(handle) => handle as isize,
        Err(_) => -1,
    }
}

/// `SYS_READ`: (handle, buf, offset, size) → bytes read, or -1.
pub fn sys_read(handle: usize, buf: usize, offset: usize, size: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf, size) else {
        return -1;
    };
    // SAFETY: Range validated; the caller's address space is active.
    let buf = unsafe { slice.as_mut_slice() };
    match vfs::with_vfs(|vfs| vfs.read(handle, buf, offset as u64)) {
        Ok(n) => n as isize,
        Err(_) => -1,
    }
}

/// `SYS_GETSIZE`: handle → size in bytes (0 for a bad handle).
pub fn sys_getsize(handle: usize) -> isize {
    match vfs::with_vfs(|vfs| vfs.size(handle)) {
        Ok(size) => size as isize,
        Err(_) => 0,
    }
}

/// `SYS_CLOSE`: releases a handle.
pub fn sys_close(handle: usize) -> isize {
    match vfs::with_vfs(|vfs| vfs.close(handle)) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// `SYS_READDIR`: (path, out_names, max) → entry count.
///
/// The entry names are packed as C strings into a fresh page of the
/// caller's heap; `out_names` receives one user pointer per entry.
pub fn sys_readdir(path_ptr: usize, out_names: usize, max_entries: usize) -> isize {
    // SAFETY: The calling process's address space is active.
    let Ok(path) = (unsafe { read_user_cstr(path_ptr, 256) }) else {
        return -1;
    };
    let names = match vfs::with_vfs(|vfs| vfs.read_dir(&path)) {
        Ok(names) => names,
        Err(_) => return -1,
    };
    let max_entries = max_entries.min(64);
    let Ok(out) = UserSlice::new(out_names, max_entries * 8) else {
        return -1;
    };

    // One heap page holds the string data.
    let Ok(page_va) = super::memory::alloc_user_pages(1) else {
        return -1;
    };

    let mut offset = 0usize;
    let mut copied = 0usize;
    for name in names.iter().take(max_entries) {
        let bytes = name.as_bytes();
        if offset + bytes.len() + 1 > zenith_core::PAGE_SIZE {
            break;
        }
        // SAFETY: The page was just mapped into the caller at page_va and
        // the offsets stay inside it.
        unsafe {
            core::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                (page_va as usize + offset) as *mut u8,
                bytes.len(),
            );
            *((page_va as usize + offset + bytes.len()) as *mut u8) = 0;

            let slot = (out.addr() + copied * 8) as *mut u64;
            *slot = page_va + offset as u64;
        }
        offset += bytes.len() + 1;
        copied += 1;
    }
    copied as isize
}

/// `SYS_FWRITE`: (handle, buf, offset, size) → bytes written, or -1.
pub fn sys_fwrite(handle: usize, buf: usize, offset: usize, size: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf, size) else {
        return -1;
    };
    // SAFETY: Range validated; the caller's address space is active.
    let data = unsafe { slice.as_slice() };
    match vfs::with_vfs(|vfs| vfs.write(handle, data, offset as u64)) {
        Ok(n) => n as isize,
        Err(_) => -1,
    }
}

/// `SYS_FCREATE`: creates an empty file.
pub fn sys_fcreate(path_ptr: usize) -> isize {
    // SAFETY: The calling process's address space is active.
    let Ok(path) = (unsafe { read_user_cstr(path_ptr, 256) }) else {
        return -1;
    };
    match vfs::with_vfs(|vfs| vfs.create(&path)) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}
