//! Process syscalls: lifecycle, argv, child I/O, and the process list.

use crate::proc::{ProcState, exec, sched};
use crate::syscall::abi::{KeyEvent, ProcInfo};
use crate::syscall::errno::{EFAULT, EINVAL, ENOENT};
use crate::syscall::userptr::{UserPtr, UserSlice, read_user_cstr};

/// `SYS_EXIT`: terminates the calling process. Does not return.
pub fn sys_exit(code: usize) -> isize {
    sched::exit_current(code as i32)
}

/// `SYS_YIELD`: gives up the rest of the quantum.
pub fn sys_yield() -> isize {
    sched::yield_now();
    0
}

/// `SYS_SLEEP_MS`: blocks for at least the given number of milliseconds.
pub fn sys_sleep_ms(ms: usize) -> isize {
    crate::time::sleep_ms(ms as u64);
    0
}

/// `SYS_GETPID`: pid of the caller.
pub fn sys_getpid() -> isize {
    sched::current_pid() as isize
}

/// `SYS_SPAWN` / `SYS_SPAWN_REDIR`: loads an ELF and returns the child pid.
pub fn sys_spawn(path_ptr: usize, args_ptr: usize, redirected: bool) -> isize {
    // SAFETY: The calling process's address space is active.
    let Ok(path) = (unsafe { read_user_cstr(path_ptr, 256) }) else {
        return -EFAULT;
    };
    let args = if args_ptr == 0 {
        heapless::String::new()
    } else {
        // SAFETY: As above.
        match unsafe { read_user_cstr(args_ptr, 256) } {
            Ok(args) => args,
            Err(e) => return e,
        }
    };

    match exec::spawn(&path, &args, sched::current_pid(), redirected) {
        Ok(pid) => pid as isize,
        Err(exec::SpawnError::Fs(_)) => -ENOENT,
        Err(exec::SpawnError::TableFull) => -crate::syscall::errno::EAGAIN,
        Err(_) => -EINVAL,
    }
}

/// `SYS_WAITPID`: blocks until the child exits, then reclaims its slot and
/// returns the exit code.
pub fn sys_waitpid(pid: usize) -> isize {
    let pid = pid as u32;
    let caller = sched::current_pid();

    // The target must exist and be our child.
    let valid = sched::with_sched(|sched| {
        sched
            .table
            .get(pid)
            .is_some_and(|p| p.parent == caller)
    });
    if !valid {
        return -EINVAL;
    }

    loop {
        if let Some(code) = exec::reap(pid) {
            return code as isize;
        }
        sched::yield_now();
    }
}

/// `SYS_GETARGS`: copies the argv blob into the caller's buffer; returns
/// its length.
pub fn sys_getargs(buf: usize, max_len: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf, max_len) else {
        return -EFAULT;
    };
    sched::with_sched(|sched| {
        let current = sched.current as u32;
        let Some(process) = sched.table.get(current) else {
            return -EINVAL;
        };
        let n = process.argv.len().min(slice.len());
        // SAFETY: Range validated; the caller's address space is active.
        let out = unsafe { slice.as_mut_slice() };
        out[..n].copy_from_slice(&process.argv[..n]);
        n as isize
    })
}

/// `SYS_KILL`: marks a process terminated. The idle slot is untouchable.
pub fn sys_kill(pid: usize) -> isize {
    let pid = pid as u32;
    if pid == 0 {
        return -EINVAL;
    }
    let killed = sched::with_sched(|sched| match sched.table.get_mut(pid) {
        Some(process) if process.state != ProcState::Terminated => {
            process.state = ProcState::Terminated;
            process.exit_code = -1;
            true
        }
        _ => false,
    });
    if killed { 0 } else { -EINVAL }
}

/// `SYS_PROCLIST`: fills an array of [`ProcInfo`]; returns the row count.
pub fn sys_proclist(buf: usize, max_entries: usize) -> isize {
    let max_entries = max_entries.min(crate::proc::MAX_PROCESSES);
    let Ok(slice) = UserSlice::new(buf, max_entries * core::mem::size_of::<ProcInfo>()) else {
        return -EFAULT;
    };

    let mut count = 0usize;
    sched::with_sched(|sched| {
        sched.table.for_each(|process| {
            if count >= max_entries {
                return;
            }
            let mut row = ProcInfo {
                pid: process.pid as i32,
                parent_pid: process.parent as i32,
                state: match process.state {
                    ProcState::Free => 0,
                    ProcState::Ready => 1,
                    ProcState::Running => 2,
                    ProcState::Terminated => 3,
                },
                _pad: [0; 3],
                name: [0; 64],
                heap_used: process.heap_next - crate::mm::layout::USER_HEAP_BASE,
            };
            let name = process.name.as_bytes();
            let n = name.len().min(63);
            row.name[..n].copy_from_slice(&name[..n]);

            // SAFETY: Range validated for max_entries rows.
            unsafe {
                let dst = (slice.addr() + count * core::mem::size_of::<ProcInfo>()) as *mut ProcInfo;
                core::ptr::write(dst, row);
            }
            count += 1;
        });
    });
    count as isize
}

// ── Child-I/O redirection ───────────────────────────────────────────────

/// `SYS_CHILDIO_READ`: parent drains a redirected child's stdout.
pub fn sys_childio_read(pid: usize, buf: usize, max_len: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf, max_len) else {
        return -EFAULT;
    };
    let caller = sched::current_pid();
    sched::with_sched(|sched| {
        let Some(process) = sched.table.get_mut(pid as u32) else {
            return -EINVAL;
        };
        if process.parent != caller {
            return -EINVAL;
        }
        let Some(io) = process.child_io.as_mut() else {
            return -EINVAL;
        };
        // SAFETY: Range validated; the caller's address space is active.
        let out = unsafe { slice.as_mut_slice() };
        let mut n = 0;
        while n < out.len() {
            match io.stdout.pop_front() {
                Some(byte) => {
                    out[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        n as isize
    })
}

/// `SYS_CHILDIO_WRITE`: parent feeds bytes to a redirected child as key
/// presses.
pub fn sys_childio_write(pid: usize, buf: usize, len: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf, len) else {
        return -EFAULT;
    };
    // SAFETY: Range validated; the caller's address space is active.
    let data = unsafe { slice.as_slice() };
    with_redirected_child(pid as u32, |io| {
        for &byte in data {
            io.stdin_keys.push_back(KeyEvent {
                scancode: 0,
                ascii: byte,
                pressed: true,
                ..KeyEvent::default()
            });
        }
        data.len() as isize
    })
}

/// `SYS_CHILDIO_WRITEKEY`: parent injects one full key event.
pub fn sys_childio_writekey(pid: usize, event_ptr: usize) -> isize {
    let Ok(event) = UserPtr::<KeyEvent>::new(event_ptr) else {
        return -EFAULT;
    };
    // SAFETY: Pointer validated; the caller's address space is active.
    let event = unsafe { event.read() };
    with_redirected_child(pid as u32, |io| {
        io.stdin_keys.push_back(event);
        0
    })
}

/// `SYS_CHILDIO_SETTERMSZ`: sets the terminal size a redirected child sees.
pub fn sys_childio_settermsz(pid: usize, cols: usize, rows: usize) -> isize {
    with_redirected_child(pid as u32, |io| {
        io.term_size = (cols as u32, rows as u32);
        0
    })
}

/// Runs `f` over a redirected child of the caller, or returns `-EINVAL`.
fn with_redirected_child(pid: u32, f: impl FnOnce(&mut crate::proc::ChildIo) -> isize) -> isize {
    let caller = sched::current_pid();
    sched::with_sched(|sched| {
        let Some(process) = sched.table.get_mut(pid) else {
            return -EINVAL;
        };
        if process.parent != caller {
            return -EINVAL;
        }
        match process.child_io.as_mut() {
            Some(io) => f(io),
            None => -EINVAL,
        }
    })
}
