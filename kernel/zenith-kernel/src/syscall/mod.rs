//! System call interface: numbers, error codes, and the dispatch table.
//!
//! The numeric surface is fixed (userspace binaries bake the numbers in);
//! unknown numbers return `-ENOSYS`. Arguments arrive in the Linux
//! `SYSCALL` register convention with `r10` carrying the fourth argument
//! (the CPU clobbers `rcx`); the assembly entry remaps them to the SysV C
//! convention before calling [`dispatch`].

pub mod abi;
pub mod userptr;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod handlers;

/// Error numbers returned (negated) to userspace.
pub mod errno {
    /// No such file or directory.
    pub const ENOENT: isize = 2;
    /// Try again (resource temporarily exhausted).
    pub const EAGAIN: isize = 11;
    /// Out of memory.
    pub const ENOMEM: isize = 12;
    /// Bad address.
    pub const EFAULT: isize = 14;
    /// File exists.
    pub const EEXIST: isize = 17;
    /// Invalid argument.
    pub const EINVAL: isize = 22;
    /// Bad file handle.
    pub const EBADF: isize = 9;
    /// Function not implemented.
    pub const ENOSYS: isize = 38;
    /// Connection timed out.
    pub const ETIMEDOUT: isize = 110;
    /// Connection refused.
    pub const ECONNREFUSED: isize = 111;
    /// Host unreachable.
    pub const EHOSTUNREACH: isize = 113;
}

pub use errno::EFAULT;

/// Syscall numbers (stable ABI).
#[allow(missing_docs)]
pub mod nr {
    pub const EXIT: usize = 0;
    pub const YIELD: usize = 1;
    pub const SLEEP_MS: usize = 2;
    pub const GETPID: usize = 3;
    pub const PRINT: usize = 4;
    pub const PUTCHAR: usize = 5;
    pub const OPEN: usize = 6;
    pub const READ: usize = 7;
    pub const GETSIZE: usize = 8;
    pub const CLOSE: usize = 9;
    pub const READDIR: usize = 10;
    pub const ALLOC: usize = 11;
    pub const FREE: usize = 12;
    pub const GETTICKS: usize = 13;
    pub const GETMILLISECONDS: usize = 14;
    pub const GETINFO: usize = 15;
    pub const ISKEYAVAILABLE: usize = 16;
    pub const GETKEY: usize = 17;
    pub const GETCHAR: usize = 18;
    pub const PING: usize = 19;
    pub const SPAWN: usize = 20;
    pub const FBINFO: usize = 21;
    pub const FBMAP: usize = 22;
    pub const WAITPID: usize = 23;
    pub const TERMSIZE: usize = 24;
    pub const GETARGS: usize = 25;
    pub const RESET: usize = 26;
    pub const SHUTDOWN: usize = 27;
    pub const GETTIME: usize = 28;
    pub const SOCKET: usize = 29;
    pub const CONNECT: usize = 30;
    pub const BIND: usize = 31;
    pub const LISTEN: usize = 32;
    pub const ACCEPT: usize = 33;
    pub const SEND: usize = 34;
    pub const RECV: usize = 35;
    pub const CLOSESOCK: usize = 36;
    pub const GETNETCFG: usize = 37;
    pub const SETNETCFG: usize = 38;
    pub const SENDTO: usize = 39;
    pub const RECVFROM: usize = 40;
    pub const FWRITE: usize = 41;
    pub const FCREATE: usize = 42;
    pub const TERMSCALE: usize = 43;
    pub const RESOLVE: usize = 44;
    pub const GETRANDOM: usize = 45;
    pub const KLOG: usize = 46;
    pub const MOUSESTATE: usize = 47;
    pub const SETMOUSEBOUNDS: usize = 48;
    pub const SPAWN_REDIR: usize = 49;
    pub const CHILDIO_READ: usize = 50;
    pub const CHILDIO_WRITE: usize = 51;
    pub const CHILDIO_WRITEKEY: usize = 52;
    pub const CHILDIO_SETTERMSZ: usize = 53;
    pub const WINCREATE: usize = 54;
    pub const WINDESTROY: usize = 55;
    pub const WINPRESENT: usize = 56;
    pub const WINPOLL: usize = 57;
    pub const WINENUM: usize = 58;
    pub const WINMAP: usize = 59;
    pub const WINSENDEVENT: usize = 60;
    pub const PROCLIST: usize = 61;
    pub const KILL: usize = 62;
    pub const DEVLIST: usize = 63;
}

/// Socket type for `SYS_SOCKET`: TCP stream.
pub const SOCK_TCP: usize = 1;

/// Socket type for `SYS_SOCKET`: UDP datagram.
pub const SOCK_UDP: usize = 2;

/// Converts a network error into its syscall return code.
#[must_use]
pub fn net_errno(error: crate::net::NetError) -> isize {
    use crate::net::NetError;
    match error {
        NetError::NoDevice | NetError::Unreachable => -errno::EHOSTUNREACH,
        NetError::Timeout => -errno::ETIMEDOUT,
        NetError::BadPacket | NetError::NameTooLong => -errno::EINVAL,
        NetError::PortInUse | NetError::NoFreeSockets => -errno::EAGAIN,
        NetError::BadSocket => -errno::EBADF,
        NetError::NotConnected => -errno::EINVAL,
        NetError::Refused => -errno::ECONNREFUSED,
    }
}

/// Syscall dispatch, called from the `SYSCALL` entry stub.
///
/// Returns the value placed in `rax`; negative values are errors.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[unsafe(no_mangle)]
extern "C" fn syscall_dispatch(
    number: usize,
    a1: usize,
    a2: usize,
    a3: usize,
    a4: usize,
    a5: usize,
) -> isize {
    use handlers as h;

    match number {
        nr::EXIT => h::process::sys_exit(a1),
        nr::YIELD => h::process::sys_yield(),
        nr::SLEEP_MS => h::process::sys_sleep_ms(a1),
        nr::GETPID => h::process::sys_getpid(),
        nr::PRINT => h::misc::sys_print(a1),
        nr::PUTCHAR => h::misc::sys_putchar(a1),
        nr::OPEN => h::fs::sys_open(a1),
        nr::READ => h::fs::sys_read(a1, a2, a3, a4),
        nr::GETSIZE => h::fs::sys_getsize(a1),
        nr::CLOSE => h::fs::sys_close(a1),
        nr::READDIR => h::fs::sys_readdir(a1, a2, a3),
        nr::ALLOC => h::memory::sys_alloc(a1),
        nr::FREE => h::memory::sys_free(a1),
        nr::GETTICKS => h::misc::sys_getticks(),
        nr::GETMILLISECONDS => h::misc::sys_getms(),
        nr::GETINFO => h::misc::sys_getinfo(a1),
        nr::ISKEYAVAILABLE => h::misc::sys_iskeyavailable(),
        nr::GETKEY => h::misc::sys_getkey(a1),
        nr::GETCHAR => h::misc::sys_getchar(),
        nr::PING => h::net::sys_ping(a1, a2),
        nr::SPAWN => h::process::sys_spawn(a1, a2, false),
        nr::FBINFO => h::memory::sys_fbinfo(a1),
        nr::FBMAP => h::memory::sys_fbmap(),
        nr::WAITPID => h::process::sys_waitpid(a1),
        nr::TERMSIZE => h::misc::sys_termsize(),
        nr::GETARGS => h::process::sys_getargs(a1, a2),
        nr::RESET => h::misc::sys_reset(),
        nr::SHUTDOWN => h::misc::sys_shutdown(),
        nr::GETTIME => h::misc::sys_gettime(a1),
        nr::SOCKET => h::net::sys_socket(a1),
        nr::CONNECT => h::net::sys_connect(a1, a2, a3),
        nr::BIND => h::net::sys_bind(a1, a2),
        // Passive open is not part of the TCP machine (active connections
        // only), so the listen/accept pair is permanently unimplemented.
        nr::LISTEN | nr::ACCEPT => -errno::ENOSYS,
        nr::SEND => h::net::sys_send(a1, a2, a3),
        nr::RECV => h::net::sys_recv(a1, a2, a3),
        nr::CLOSESOCK => h::net::sys_closesock(a1),
        nr::GETNETCFG => h::net::sys_getnetcfg(a1),
        nr::SETNETCFG => h::net::sys_setnetcfg(a1),
        nr::SENDTO => h::net::sys_sendto(a1, a2, a3, a4, a5),
        nr::RECVFROM => h::net::sys_recvfrom(a1, a2, a3, a4),
        nr::FWRITE => h::fs::sys_fwrite(a1, a2, a3, a4),
        nr::FCREATE => h::fs::sys_fcreate(a1),
        nr::TERMSCALE => h::misc::sys_termscale(a1),
        nr::RESOLVE => h::net::sys_resolve(a1),
        nr::GETRANDOM => h::misc::sys_getrandom(a1, a2),
        nr::KLOG => h::misc::sys_klog(a1),
        nr::MOUSESTATE => h::misc::sys_mousestate(a1),
        nr::SETMOUSEBOUNDS => h::misc::sys_setmousebounds(a1, a2),
        nr::SPAWN_REDIR => h::process::sys_spawn(a1, a2, true),
        nr::CHILDIO_READ => h::process::sys_childio_read(a1, a2, a3),
        nr::CHILDIO_WRITE => h::process::sys_childio_write(a1, a2, a3),
        nr::CHILDIO_WRITEKEY => h::process::sys_childio_writekey(a1, a2),
        nr::CHILDIO_SETTERMSZ => h::process::sys_childio_settermsz(a1, a2, a3),
        nr::WINCREATE => h::win::sys_wincreate(a1, a2, a3, a4),
        nr::WINDESTROY => h::win::sys_windestroy(a1),
        nr::WINPRESENT => h::win::sys_winpresent(a1),
        nr::WINPOLL => h::win::sys_winpoll(a1, a2),
        nr::WINENUM => h::win::sys_winenum(a1, a2),
        nr::WINMAP => h::win::sys_winmap(a1),
        nr::WINSENDEVENT => h::win::sys_winsendevent(a1, a2),
        nr::PROCLIST => h::process::sys_proclist(a1, a2),
        nr::KILL => h::process::sys_kill(a1),
        nr::DEVLIST => h::misc::sys_devlist(a1, a2),
        _ => -errno::ENOSYS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_match_the_frozen_abi() {
        // Spot checks against the published surface.
        assert_eq!(nr::EXIT, 0);
        assert_eq!(nr::READDIR, 10);
        assert_eq!(nr::PING, 19);
        assert_eq!(nr::WAITPID, 23);
        assert_eq!(nr::GETTIME, 28);
        assert_eq!(nr::RECVFROM, 40);
        assert_eq!(nr::RESOLVE, 44);
        assert_eq!(nr::CHILDIO_SETTERMSZ, 53);
        assert_eq!(nr::WINSENDEVENT, 60);
        assert_eq!(nr::DEVLIST, 63);
    }

    #[test]
    fn net_errors_map_to_negative_codes() {
        use crate::net::NetError;
        assert_eq!(net_errno(NetError::Timeout), -errno::ETIMEDOUT);
        assert_eq!(net_errno(NetError::Refused), -errno::ECONNREFUSED);
        assert_eq!(net_errno(NetError::BadSocket), -errno::EBADF);
        assert!(net_errno(NetError::Unreachable) < 0);
    }
}
