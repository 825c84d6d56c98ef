//! Network syscalls: the BSD-shaped socket family, ping, and DNS.

use crate::net::{self, NetError, socket};
use crate::syscall::abi::{NetCfg, SockAddr};
use crate::syscall::errno::EFAULT;
use crate::syscall::userptr::{UserPtr, UserSlice, read_user_cstr};
use crate::syscall::{SOCK_TCP, SOCK_UDP, net_errno};

/// `SYS_SOCKET`: opens a descriptor of the given type.
pub fn sys_socket(sock_type: usize) -> isize {
    let result = match sock_type {
        SOCK_TCP => net::with_net(net::NetStack::socket_open_tcp),
        SOCK_UDP => net::with_net(net::NetStack::socket_open_udp),
        _ => return -crate::syscall::errno::EINVAL,
    };
    match result.and_then(|inner| inner) {
        Ok(descriptor) => descriptor as isize,
        Err(e) => net_errno(e),
    }
}

/// `SYS_CONNECT`: connects a socket (TCP handshake or UDP default peer).
pub fn sys_connect(descriptor: usize, ip: usize, port: usize) -> isize {
    match socket::connect_blocking(descriptor, ip as u32, port as u16) {
        Ok(()) => 0,
        Err(e) => net_errno(e),
    }
}

/// `SYS_BIND`: binds a UDP socket to a local port.
pub fn sys_bind(descriptor: usize, port: usize) -> isize {
    match net::with_net(|stack| stack.socket_bind(descriptor, port as u16)).and_then(|inner| inner) {
        Ok(()) => 0,
        Err(e) => net_errno(e),
    }
}

/// `SYS_SEND`: sends the whole buffer on a connected socket.
pub fn sys_send(descriptor: usize, buf: usize, len: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf, len) else {
        return -EFAULT;
    };
    // SAFETY: Range validated; the caller's address space is active.
    let data = unsafe { slice.as_slice() };
    match socket::send_blocking(descriptor, data) {
        Ok(n) => n as isize,
        Err(e) => net_errno(e),
    }
}

/// `SYS_RECV`: receives into the buffer; 0 means the peer closed.
pub fn sys_recv(descriptor: usize, buf: usize, len: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf, len) else {
        return -EFAULT;
    };
    // SAFETY: Range validated; the caller's address space is active.
    let data = unsafe { slice.as_mut_slice() };

    // TCP sockets stream; UDP sockets fall back to datagram receive.
    match net::with_net(|stack| stack.socket_tcp_conn(descriptor)) {
        Ok(Ok(_)) => match socket::recv_blocking(descriptor, data) {
            Ok(n) => n as isize,
            Err(e) => net_errno(e),
        },
        Ok(Err(NetError::BadSocket)) => match socket::recv_from_blocking(descriptor) {
            Ok((_ip, _port, payload)) => {
                let n = payload.len().min(data.len());
                data[..n].copy_from_slice(&payload[..n]);
                n as isize
            }
            Err(e) => net_errno(e),
        },
        Ok(Err(e)) => net_errno(e),
        Err(e) => net_errno(e),
    }
}

/// `SYS_CLOSESOCK`: releases a descriptor.
pub fn sys_closesock(descriptor: usize) -> isize {
    let now = crate::time::now_ms();
    match net::with_net(|stack| stack.socket_close(descriptor, now)).and_then(|inner| inner) {
        Ok(()) => 0,
        Err(e) => net_errno(e),
    }
}

/// `SYS_GETNETCFG`: fills a [`NetCfg`].
pub fn sys_getnetcfg(out_ptr: usize) -> isize {
    let Ok(out) = UserPtr::<NetCfg>::new(out_ptr) else {
        return -EFAULT;
    };
    let config = net::with_net(|stack| {
        let config = stack.config;
        let mac = stack.mac();
        (config, mac)
    });
    match config {
        Ok((config, mac)) => {
            let cfg = NetCfg {
                ip_address: config.ip,
                subnet_mask: config.netmask,
                gateway: config.gateway,
                mac_address: mac,
                _pad: [0; 2],
                dns_server: config.dns_server,
            };
            // SAFETY: Pointer validated; the caller's address space is active.
            unsafe { out.write(cfg) };
            0
        }
        Err(e) => net_errno(e),
    }
}

/// `SYS_SETNETCFG`: applies a [`NetCfg`] (MAC is read-only).
pub fn sys_setnetcfg(cfg_ptr: usize) -> isize {
    let Ok(cfg) = UserPtr::<NetCfg>::new(cfg_ptr) else {
        return -EFAULT;
    };
    // SAFETY: Pointer validated; the caller's address space is active.
    let cfg = unsafe { cfg.read() };
    let result = net::with_net(|stack| {
        stack.config.ip = cfg.ip_address;
        stack.config.netmask = cfg.subnet_mask;
        stack.config.gateway = cfg.gateway;
        stack.config.dns_server = cfg.dns_server;
    });
    match result {
        Ok(()) => 0,
        Err(e) => net_errno(e),
    }
}

/// `SYS_SENDTO`: sends one datagram to an explicit destination.
pub fn sys_sendto(descriptor: usize, buf: usize, len: usize, ip: usize, port: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf, len) else {
        return -EFAULT;
    };
    // SAFETY: Range validated; the caller's address space is active.
    let data = unsafe { slice.as_slice() };
    let now = crate::time::now_ms();
    let result = net::with_net(|stack| {
        stack.socket_send_to(descriptor, ip as u32, port as u16, data, now)
    });
    match result.and_then(|inner| inner) {
        Ok(_) => data.len() as isize,
        Err(e) => net_errno(e),
    }
}

/// `SYS_RECVFROM`: blocks for one datagram; writes the peer address.
pub fn sys_recvfrom(descriptor: usize, buf: usize, len: usize, src_ptr: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf, len) else {
        return -EFAULT;
    };
    let src_out = if src_ptr == 0 {
        None
    } else {
        match UserPtr::<SockAddr>::new(src_ptr) {
            Ok(ptr) => Some(ptr),
            Err(e) => return e,
        }
    };

    match socket::recv_from_blocking(descriptor) {
        Ok((ip, port, payload)) => {
            // SAFETY: Range validated; the caller's address space is active.
            let data = unsafe { slice.as_mut_slice() };
            let n = payload.len().min(data.len());
            data[..n].copy_from_slice(&payload[..n]);
            if let Some(out) = src_out {
                // SAFETY: Pointer validated above.
                unsafe { out.write(SockAddr { ip, port, _pad: 0 }) };
            }
            n as isize
        }
        Err(e) => net_errno(e),
    }
}

/// `SYS_PING`: ICMP echo round-trip in milliseconds, `-1` on timeout or
/// failure (original contract).
pub fn sys_ping(ip: usize, timeout_ms: usize) -> isize {
    match crate::net::icmp::ping(ip as u32, timeout_ms as u64) {
        Ok(rtt) => rtt as isize,
        Err(_) => -1,
    }
}

/// `SYS_RESOLVE`: DNS hostname → IPv4 address (wire order).
pub fn sys_resolve(name_ptr: usize) -> isize {
    // SAFETY: The calling process's address space is active.
    let Ok(hostname) = (unsafe { read_user_cstr(name_ptr, 128) }) else {
        return -EFAULT;
    };
    match crate::net::dns::resolve(&hostname) {
        Ok(ip) => ip as isize,
        Err(e) => net_errno(e),
    }
}
