//! Console, info, time, input, random, and power syscalls.

use alloc::vec::Vec;

use zenith_core::sync::SpinLock;

use crate::proc::sched;
use crate::syscall::abi::{DateTime, DevInfo, KeyEvent, MouseState, SysInfo};
use crate::syscall::errno::EFAULT;
use crate::syscall::userptr::{UserPtr, UserSlice};

/// Writes `text` to the caller's output: the redirected stdout queue when
/// the process was spawned with `SYS_SPAWN_REDIR`, the kernel terminal
/// otherwise.
fn write_output(text: &[u8]) {
    let redirected = sched::with_sched(|sched| {
        let current = sched.current as u32;
        match sched.table.get_mut(current).and_then(|p| p.child_io.as_mut()) {
            Some(io) => {
                io.push_stdout(text);
                true
            }
            None => false,
        }
    });
    if !redirected {
        if let Ok(text) = core::str::from_utf8(text) {
            crate::terminal::with_terminal(|terminal| terminal.write_str(text));
        }
    }
}

/// `SYS_PRINT`: writes a NUL-terminated user string (up to 4 KiB).
pub fn sys_print(text_ptr: usize) -> isize {
    // Stream in page-bounded chunks so arbitrarily long strings cannot pin
    // the handler.
    let mut addr = text_ptr;
    let mut remaining = 4096usize;
    while remaining > 0 {
        let chunk_len = remaining.min(256);
        let Ok(slice) = UserSlice::new(addr, chunk_len) else {
            return -EFAULT;
        };
        // SAFETY: Range validated; the caller's address space is active.
        let bytes = unsafe { slice.as_slice() };
        match bytes.iter().position(|b| *b == 0) {
            Some(nul) => {
                write_output(&bytes[..nul]);
                return 0;
            }
            None => {
                write_output(bytes);
                addr += chunk_len;
                remaining -= chunk_len;
            }
        }
    }
    0
}

/// `SYS_PUTCHAR`: writes one character.
pub fn sys_putchar(ch: usize) -> isize {
    write_output(&[ch as u8]);
    0
}

/// `SYS_GETTICKS`: monotonic timer ticks.
pub fn sys_getticks() -> isize {
    crate::time::ticks() as isize
}

/// `SYS_GETMILLISECONDS`: milliseconds since boot.
pub fn sys_getms() -> isize {
    crate::time::now_ms() as isize
}

/// `SYS_GETINFO`: fills a [`SysInfo`].
pub fn sys_getinfo(info_ptr: usize) -> isize {
    let Ok(info) = UserPtr::<SysInfo>::new(info_ptr) else {
        return -EFAULT;
    };
    // SAFETY: Pointer validated; the caller's address space is active.
    unsafe { info.write(SysInfo::current()) };
    0
}

/// Pops one stdin key for a redirected caller, if any.
fn redirected_key() -> Option<Option<KeyEvent>> {
    sched::with_sched(|sched| {
        let current = sched.current as u32;
        sched
            .table
            .get_mut(current)
            .and_then(|p| p.child_io.as_mut())
            .map(|io| io.stdin_keys.pop_front())
    })
}

/// `SYS_ISKEYAVAILABLE`: non-blocking input poll.
pub fn sys_iskeyavailable() -> isize {
    let available = sched::with_sched(|sched| {
        let current = sched.current as u32;
        sched
            .table
            .get(current)
            .and_then(|p| p.child_io.as_ref())
            .map(|io| !io.stdin_keys.is_empty())
    });
    let available = available.unwrap_or_else(|| crate::input::with_input(|input| input.key_available()));
    isize::from(available)
}

/// `SYS_GETKEY`: blocks until a key event arrives, then writes it out.
pub fn sys_getkey(event_ptr: usize) -> isize {
    let Ok(out) = UserPtr::<KeyEvent>::new(event_ptr) else {
        return -EFAULT;
    };
    loop {
        let event = match redirected_key() {
            Some(queued) => queued,
            None => crate::input::with_input(crate::input::InputState::pop_key),
        };
        if let Some(event) = event {
            // SAFETY: Pointer validated; the caller's address space is active.
            unsafe { out.write(event) };
            return 0;
        }
        sched::yield_now();
    }
}

/// `SYS_GETCHAR`: blocks until a printable key press, returns its ASCII.
pub fn sys_getchar() -> isize {
    loop {
        let ch = match redirected_key() {
            Some(queued) => queued.and_then(|e| (e.pressed && e.ascii != 0).then_some(e.ascii)),
            None => crate::input::with_input(crate::input::InputState::pop_char),
        };
        if let Some(ch) = ch {
            return isize::from(ch);
        }
        sched::yield_now();
    }
}

/// `SYS_TERMSIZE`: columns in the low dword, rows in the high dword.
pub fn sys_termsize() -> isize {
    let redirected = sched::with_sched(|sched| {
        let current = sched.current as u32;
        sched
            .table
            .get(current)
            .and_then(|p| p.child_io.as_ref())
            .map(|io| io.term_size)
    });
    let (cols, rows) = redirected.unwrap_or_else(|| {
        crate::terminal::with_terminal(|t| {
            let (c, r) = t.size();
            (c as u32, r as u32)
        })
        .unwrap_or((80, 25))
    });
    (u64::from(cols) | (u64::from(rows) << 32)) as isize
}

/// `SYS_TERMSCALE`: applies an integer glyph scale.
pub fn sys_termscale(scale: usize) -> isize {
    crate::terminal::with_terminal(|t| t.set_scale(scale));
    0
}

/// `SYS_GETTIME`: fills a [`DateTime`] from the boot-captured wall clock.
pub fn sys_gettime(out_ptr: usize) -> isize {
    let Ok(out) = UserPtr::<DateTime>::new(out_ptr) else {
        return -EFAULT;
    };
    // SAFETY: Pointer validated; the caller's address space is active.
    unsafe { out.write(crate::time::current_datetime()) };
    0
}

/// `SYS_GETRANDOM`: fills the buffer with xorshift64* output.
pub fn sys_getrandom(buf: usize, len: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf, len) else {
        return -EFAULT;
    };
    // SAFETY: Range validated; the caller's address space is active.
    let out = unsafe { slice.as_mut_slice() };
    crate::rng::fill_bytes(out);
    out.len() as isize
}

/// `SYS_KLOG`: feeds a userspace message into the kernel log.
pub fn sys_klog(text_ptr: usize) -> isize {
    // SAFETY: The calling process's address space is active.
    match unsafe { crate::syscall::userptr::read_user_cstr(text_ptr, 256) } {
        Ok(text) => {
            crate::kinfo!("[pid {}] {}", sched::current_pid(), text);
            0
        }
        Err(e) => e,
    }
}

/// `SYS_MOUSESTATE`: writes the current mouse state.
pub fn sys_mousestate(out_ptr: usize) -> isize {
    let Ok(out) = UserPtr::<MouseState>::new(out_ptr) else {
        return -EFAULT;
    };
    let state = crate::input::with_input(crate::input::InputState::take_mouse);
    // SAFETY: Pointer validated; the caller's address space is active.
    unsafe { out.write(state) };
    0
}

/// `SYS_SETMOUSEBOUNDS`: clamps the cursor to `width × height`.
pub fn sys_setmousebounds(width: usize, height: usize) -> isize {
    crate::input::with_input(|input| input.set_mouse_bounds(width as i32, height as i32));
    0
}

/// `SYS_RESET`: warm reboot through firmware.
pub fn sys_reset() -> isize {
    crate::firmware::reset();
}

/// `SYS_SHUTDOWN`: power off through firmware.
pub fn sys_shutdown() -> isize {
    crate::firmware::shutdown();
}

// ── Device list ─────────────────────────────────────────────────────────

/// Devices registered during boot, reported by `SYS_DEVLIST`.
static DEVICES: SpinLock<Vec<DevInfo>> = SpinLock::new(Vec::new());

/// Registers a device row (called from platform bring-up).
pub fn register_device(info: DevInfo) {
    DEVICES.lock().push(info);
}

/// `SYS_DEVLIST`: fills an array of [`DevInfo`]; returns the row count.
pub fn sys_devlist(buf: usize, max_entries: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf, max_entries * core::mem::size_of::<DevInfo>()) else {
        return -EFAULT;
    };
    let devices = DEVICES.lock();
    let count = devices.len().min(max_entries);
    for (i, row) in devices.iter().take(count).enumerate() {
        // SAFETY: Range validated for max_entries rows.
        unsafe {
            let dst = (slice.addr() + i * core::mem::size_of::<DevInfo>()) as *mut DevInfo;
            core::ptr::write(dst, *row);
        }
    }
    count as isize
}
