//! Window-registry syscalls for the userspace compositor.

use alloc::vec::Vec;

use zenith_core::{PAGE_SIZE, PhysAddr};

use crate::mm::pfa;
use crate::proc::sched;
use crate::syscall::abi::{WinCreateResult, WinEventAbi, WinInfo};
use crate::syscall::errno::{EFAULT, EINVAL, ENOMEM};
use crate::syscall::userptr::{UserPtr, UserSlice, read_user_cstr};
use crate::winsrv::{self, WinEvent};

/// Largest accepted window edge, in pixels.
const MAX_DIMENSION: usize = 4096;

/// `SYS_WINCREATE`: allocates a pixel buffer, maps it into the caller, and
/// registers the window. Writes a [`WinCreateResult`].
pub fn sys_wincreate(title_ptr: usize, width: usize, height: usize, result_ptr: usize) -> isize {
    let Ok(result_out) = UserPtr::<WinCreateResult>::new(result_ptr) else {
        return -EFAULT;
    };
    // SAFETY: The calling process's address space is active.
    let Ok(title) = (unsafe { read_user_cstr(title_ptr, 64) }) else {
        return -EFAULT;
    };
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return -EINVAL;
    }

    let bytes = width * height * 4;
    let pages = bytes.div_ceil(PAGE_SIZE);

    // Allocate the pixel frames up front so failure is clean.
    let frames: Result<Vec<PhysAddr>, isize> = pfa::with_pfa(|pool| {
        (0..pages)
            .map(|_| pool.allocate_zeroed().map_err(|_| -ENOMEM))
            .collect()
    });
    let frames = match frames {
        Ok(frames) => frames,
        Err(e) => return e,
    };

    let pixel_va = match super::memory::map_frames_at_heap(
        pages,
        Some(&frames),
        crate::mm::paging::user_flags(),
    ) {
        Ok(va) => va,
        Err(e) => {
            pfa::with_pfa(|pool| {
                for &frame in &frames {
                    pool.free(frame);
                }
            });
            return e;
        }
    };

    let owner = sched::current_pid();
    let id = winsrv::with_windows(|windows| {
        windows.create(owner, &title, width as i32, height as i32, frames)
    });

    let result = WinCreateResult {
        id: id.unwrap_or(-1),
        _pad: 0,
        pixel_va,
    };
    // SAFETY: Pointer validated; the caller's address space is active.
    unsafe { result_out.write(result) };
    if result.id < 0 { -EINVAL } else { 0 }
}

/// `SYS_WINDESTROY`: removes a window owned by the caller and returns its
/// pixel frames to the pool.
pub fn sys_windestroy(id: usize) -> isize {
    let id = id as i32;
    let owner = sched::current_pid();

    let owned = winsrv::with_windows(|windows| {
        let mut is_owner = false;
        windows.enumerate(|w| {
            if w.id == id {
                is_owner = w.owner_pid == owner;
            }
        });
        if is_owner { windows.destroy(id) } else { None }
    });

    match owned {
        Some(frames) => {
            pfa::with_pfa(|pool| {
                for frame in frames {
                    pool.free(frame);
                }
            });
            0
        }
        None => -EINVAL,
    }
}

/// `SYS_WINPRESENT`: marks the window's buffer dirty for the compositor.
pub fn sys_winpresent(id: usize) -> isize {
    if winsrv::with_windows(|windows| windows.present(id as i32)) {
        0
    } else {
        -EINVAL
    }
}

/// `SYS_WINPOLL`: dequeues the window's next event. Returns 1 when an
/// event was written, 0 when the queue is empty.
pub fn sys_winpoll(id: usize, event_ptr: usize) -> isize {
    let Ok(out) = UserPtr::<WinEventAbi>::new(event_ptr) else {
        return -EFAULT;
    };
    match winsrv::with_windows(|windows| windows.poll_event(id as i32)) {
        Some(event) => {
            // SAFETY: Pointer validated; the caller's address space is active.
            unsafe { out.write(WinEventAbi::from(event)) };
            1
        }
        None => 0,
    }
}

/// `SYS_WINENUM`: fills an array of [`WinInfo`]; returns the row count and
/// clears the dirty flags it reported.
pub fn sys_winenum(buf: usize, max_entries: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf, max_entries * core::mem::size_of::<WinInfo>()) else {
        return -EFAULT;
    };

    let mut count = 0usize;
    winsrv::with_windows(|windows| {
        windows.enumerate(|window| {
            if count >= max_entries {
                return;
            }
            let mut row = WinInfo {
                id: window.id,
                owner_pid: window.owner_pid as i32,
                title: [0; 64],
                width: window.width,
                height: window.height,
                dirty: u8::from(window.dirty),
                _pad: [0; 3],
            };
            let title = window.title.as_bytes();
            let n = title.len().min(63);
            row.title[..n].copy_from_slice(&title[..n]);

            // SAFETY: Range validated for max_entries rows.
            unsafe {
                let dst = (slice.addr() + count * core::mem::size_of::<WinInfo>()) as *mut WinInfo;
                core::ptr::write(dst, row);
            }
            count += 1;
        });
    });
    count as isize
}

/// `SYS_WINMAP`: maps a window's pixel buffer into the caller (the
/// compositor) and returns the user VA.
pub fn sys_winmap(id: usize) -> isize {
    let frames = winsrv::with_windows(|windows| {
        windows.frames_of(id as i32).map(<[PhysAddr]>::to_vec)
    });
    let Some(frames) = frames else {
        return -EINVAL;
    };
    match super::memory::map_frames_at_heap(
        frames.len(),
        Some(&frames),
        crate::mm::paging::user_flags(),
    ) {
        Ok(va) => va as isize,
        Err(e) => e,
    }
}

/// `SYS_WINSENDEVENT`: queues an event on a window (compositor → client).
pub fn sys_winsendevent(id: usize, event_ptr: usize) -> isize {
    let Ok(event) = UserPtr::<WinEventAbi>::new(event_ptr) else {
        return -EFAULT;
    };
    // SAFETY: Pointer validated; the caller's address space is active.
    let event = WinEvent::from(unsafe { event.read() });
    if winsrv::with_windows(|windows| windows.send_event(id as i32, event)) {
        0
    } else {
        -EINVAL
    }
}
