//! Socket layer: the descriptor table behind the BSD-shaped syscalls.
//!
//! A descriptor wraps either a UDP port binding with a bounded datagram
//! queue or a TCP connection slot. Listening sockets are not supported (the
//! TCP machine is active-open only), so `listen`/`accept` fail at the
//! syscall boundary.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::{NetError, NetStack, ipv4, tcp, udp};

/// Socket descriptor table capacity.
pub const MAX_SOCKETS: usize = 16;

/// Datagrams queued per UDP socket before the oldest is dropped.
pub const UDP_QUEUE_DEPTH: usize = 16;

/// First ephemeral UDP source port.
const UDP_EPHEMERAL_BASE: u16 = 32768;

/// A received datagram: source address, source port, payload.
pub type Datagram = (u32, u16, Vec<u8>);

enum SocketKind {
    Udp {
        bound_port: Option<u16>,
        peer: Option<(u32, u16)>,
        rx: VecDeque<Datagram>,
    },
    Tcp {
        conn: Option<usize>,
    },
}

/// The descriptor table.
pub struct SocketTable {
    slots: [Option<SocketKind>; MAX_SOCKETS],
    next_ephemeral: u16,
}

impl SocketTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: [const { None }; MAX_SOCKETS],
            next_ephemeral: UDP_EPHEMERAL_BASE,
        }
    }

    fn alloc(&mut self, kind: SocketKind) -> Result<usize, NetError> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(NetError::NoFreeSockets)?;
        self.slots[slot] = Some(kind);
        Ok(slot)
    }
}

impl Default for SocketTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NetStack {
    /// Opens a UDP socket descriptor.
    pub(crate) fn socket_open_udp(&mut self) -> Result<usize, NetError> {
        self.sockets.alloc(SocketKind::Udp {
            bound_port: None,
            peer: None,
            rx: VecDeque::new(),
        })
    }

    /// Opens a TCP socket descriptor (unconnected).
    pub(crate) fn socket_open_tcp(&mut self) -> Result<usize, NetError> {
        self.sockets.alloc(SocketKind::Tcp { conn: None })
    }

    /// Binds a UDP socket to a local port.
    pub(crate) fn socket_bind(&mut self, index: usize, port: u16) -> Result<(), NetError> {
        let slot = self
            .sockets
            .slots
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(NetError::BadSocket)?;
        let SocketKind::Udp { bound_port, .. } = slot else {
            return Err(NetError::BadSocket);
        };
        if bound_port.is_some() {
            return Err(NetError::PortInUse);
        }
        self.udp.bind(port, udp::UdpSink::Socket(index))?;
        // Re-borrow: the UDP table borrow above required releasing `slot`.
        if let Some(SocketKind::Udp { bound_port, .. }) =
            self.sockets.slots.get_mut(index).and_then(Option::as_mut)
        {
            *bound_port = Some(port);
        }
        Ok(())
    }

    /// Ensures a UDP socket has a local port, auto-binding an ephemeral one.
    fn socket_udp_local_port(&mut self, index: usize) -> Result<u16, NetError> {
        if let Some(SocketKind::Udp { bound_port: Some(port), .. }) =
            self.sockets.slots.get(index).and_then(Option::as_ref)
        {
            return Ok(*port);
        }
        // Walk ephemeral ports until one binds.
        for _ in 0..MAX_SOCKETS {
            let port = self.sockets.next_ephemeral;
            self.sockets.next_ephemeral = self.sockets.next_ephemeral.checked_add(1).unwrap_or(UDP_EPHEMERAL_BASE);
            match self.socket_bind(index, port) {
                Ok(()) => return Ok(port),
                Err(NetError::PortInUse) => {}
                Err(e) => return Err(e),
            }
        }
        Err(NetError::NoFreeSockets)
    }

    /// Records the default peer for `send`/`recv` on a UDP socket, or opens
    /// a TCP connection (non-blocking part).
    pub(crate) fn socket_connect_start(
        &mut self,
        index: usize,
        ip: u32,
        port: u16,
        now_ms: u64,
    ) -> Result<(), NetError> {
        // First pass decides without holding the slot borrow across the
        // TCP open below.
        let already_connected = match self.sockets.slots.get_mut(index).and_then(Option::as_mut) {
            Some(SocketKind::Udp { peer, .. }) => {
                *peer = Some((ip, port));
                return Ok(());
            }
            Some(SocketKind::Tcp { conn }) => conn.is_some(),
            None => return Err(NetError::BadSocket),
        };
        if already_connected {
            return Err(NetError::PortInUse);
        }

        let conn_index = self.tcp_connect_start(ip, port, now_ms)?;
        if let Some(SocketKind::Tcp { conn }) =
            self.sockets.slots.get_mut(index).and_then(Option::as_mut)
        {
            *conn = Some(conn_index);
        }
        Ok(())
    }

    /// The TCP connection slot behind a socket, if connected.
    pub(crate) fn socket_tcp_conn(&self, index: usize) -> Result<usize, NetError> {
        match self.sockets.slots.get(index).and_then(Option::as_ref) {
            Some(SocketKind::Tcp { conn: Some(conn) }) => Ok(*conn),
            Some(SocketKind::Tcp { conn: None }) => Err(NetError::NotConnected),
            _ => Err(NetError::BadSocket),
        }
    }

    /// UDP sink target: queues a datagram on socket `index`.
    pub(crate) fn socket_deliver_udp(&mut self, index: usize, src_ip: u32, src_port: u16, payload: Vec<u8>) {
        let Some(SocketKind::Udp { rx, peer, .. }) =
            self.sockets.slots.get_mut(index).and_then(Option::as_mut)
        else {
            return;
        };
        // A connected socket filters foreign sources.
        if let Some((peer_ip, peer_port)) = peer {
            if *peer_ip != src_ip || *peer_port != src_port {
                return;
            }
        }
        if rx.len() == UDP_QUEUE_DEPTH {
            rx.pop_front();
        }
        rx.push_back((src_ip, src_port, payload));
    }

    /// Dequeues one datagram, if any.
    pub(crate) fn socket_recv_from(&mut self, index: usize) -> Result<Option<Datagram>, NetError> {
        let slot = self
            .sockets
            .slots
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(NetError::BadSocket)?;
        let SocketKind::Udp { rx, .. } = slot else {
            return Err(NetError::BadSocket);
        };
        Ok(rx.pop_front())
    }

    /// Sends a datagram from a UDP socket to an explicit destination.
    pub(crate) fn socket_send_to(
        &mut self,
        index: usize,
        dst_ip: u32,
        dst_port: u16,
        payload: &[u8],
        now_ms: u64,
    ) -> Result<ipv4::SendOutcome, NetError> {
        let local_port = self.socket_udp_local_port(index)?;
        self.udp_send(dst_ip, local_port, dst_port, payload, now_ms)
    }

    /// Sends on a connected socket (UDP default peer or TCP stream).
    pub(crate) fn socket_send(
        &mut self,
        index: usize,
        payload: &[u8],
        now_ms: u64,
    ) -> Result<usize, NetError> {
        enum Target {
            Udp(u32, u16),
            Tcp(usize),
        }
        let target = match self.sockets.slots.get(index).and_then(Option::as_ref) {
            Some(SocketKind::Udp { peer: Some((ip, port)), .. }) => Target::Udp(*ip, *port),
            Some(SocketKind::Udp { peer: None, .. } | SocketKind::Tcp { conn: None }) => {
                return Err(NetError::NotConnected);
            }
            Some(SocketKind::Tcp { conn: Some(conn) }) => Target::Tcp(*conn),
            None => return Err(NetError::BadSocket),
        };
        match target {
            Target::Udp(ip, port) => {
                self.socket_send_to(index, ip, port, payload, now_ms)?;
                Ok(payload.len())
            }
            Target::Tcp(conn) => self.tcp_send_data(conn, payload, now_ms),
        }
    }

    /// Closes a descriptor, releasing its port binding or connection.
    pub(crate) fn socket_close(&mut self, index: usize, now_ms: u64) -> Result<(), NetError> {
        let slot = self
            .sockets
            .slots
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(NetError::BadSocket)?;
        match slot {
            SocketKind::Udp { bound_port, .. } => {
                if let Some(port) = bound_port {
                    self.udp.unbind(port);
                }
            }
            SocketKind::Tcp { conn: Some(conn) } => {
                match self.tcp_state(conn) {
                    Ok(tcp::TcpState::Established | tcp::TcpState::CloseWait) => {
                        let _ = self.tcp_close_start(conn, now_ms);
                    }
                    _ => self.tcp_release(conn),
                }
            }
            SocketKind::Tcp { conn: None } => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Blocking wrappers used by the syscall layer
// ---------------------------------------------------------------------------

/// Connects a TCP socket, waiting out the 3-second handshake budget.
#[cfg(target_os = "none")]
pub fn connect_blocking(index: usize, ip: u32, port: u16) -> Result<(), NetError> {
    let started = crate::time::now_ms();
    super::with_net(|stack| stack.socket_connect_start(index, ip, port, started))??;

    // UDP connect is immediate.
    let conn = match super::with_net(|stack| stack.socket_tcp_conn(index))? {
        Ok(conn) => conn,
        Err(NetError::BadSocket) => return Ok(()),
        Err(e) => return Err(e),
    };

    loop {
        let now = crate::time::now_ms();
        let state = super::with_net(|stack| {
            stack.tcp_poll(now);
            (stack.tcp_state(conn), stack.tcp_refused(conn))
        })?;
        match state {
            (Ok(tcp::TcpState::Established), _) => return Ok(()),
            (Ok(tcp::TcpState::Closed), true) => return Err(NetError::Refused),
            (Ok(tcp::TcpState::Closed), false) => return Err(NetError::Timeout),
            (Err(e), _) => return Err(e),
            _ => {}
        }
        if now.saturating_sub(started) >= tcp::HANDSHAKE_TIMEOUT_MS {
            return Err(NetError::Timeout);
        }
        crate::time::sleep_ms(10);
    }
}

/// Sends a full buffer on a connected socket, yielding between segments.
#[cfg(target_os = "none")]
pub fn send_blocking(index: usize, data: &[u8]) -> Result<usize, NetError> {
    let mut sent = 0;
    while sent < data.len() {
        let now = crate::time::now_ms();
        let n = super::with_net(|stack| {
            stack.tcp_poll(now);
            stack.socket_send(index, &data[sent..], now)
        })??;
        sent += n;
        if n == 0 {
            crate::time::sleep_ms(5);
        }
    }
    Ok(sent)
}

/// Receives into `buf` from a connected TCP socket; blocks until data, EOF
/// (`Ok(0)`), or failure.
#[cfg(target_os = "none")]
pub fn recv_blocking(index: usize, buf: &mut [u8]) -> Result<usize, NetError> {
    let conn = super::with_net(|stack| stack.socket_tcp_conn(index))??;
    loop {
        let now = crate::time::now_ms();
        let got = super::with_net(|stack| {
            stack.tcp_poll(now);
            stack.tcp_recv_data(conn, buf)
        })??;
        if let Some(n) = got {
            return Ok(n);
        }
        crate::time::sleep_ms(5);
    }
}

/// Receives one datagram from a UDP socket; blocks until one arrives.
#[cfg(target_os = "none")]
pub fn recv_from_blocking(index: usize) -> Result<Datagram, NetError> {
    loop {
        if let Some(datagram) = super::with_net(|stack| stack.socket_recv_from(index))?? {
            return Ok(datagram);
        }
        crate::time::sleep_ms(5);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testutil;
    use crate::net::{ethernet, ipv4_addr};

    #[test]
    fn descriptor_table_exhausts() {
        let (mut stack, _frames) = testutil::stack();
        for _ in 0..MAX_SOCKETS {
            stack.socket_open_udp().unwrap();
        }
        assert_eq!(stack.socket_open_udp(), Err(NetError::NoFreeSockets));
    }

    #[test]
    fn close_releases_binding_and_slot() {
        let (mut stack, _frames) = testutil::stack();
        let sock = stack.socket_open_udp().unwrap();
        stack.socket_bind(sock, 7777).unwrap();
        stack.socket_close(sock, 0).unwrap();

        // Port and slot are both free again.
        let sock2 = stack.socket_open_udp().unwrap();
        assert_eq!(sock2, sock);
        assert!(stack.socket_bind(sock2, 7777).is_ok());
    }

    #[test]
    fn double_bind_rejected() {
        let (mut stack, _frames) = testutil::stack();
        let a = stack.socket_open_udp().unwrap();
        let b = stack.socket_open_udp().unwrap();
        stack.socket_bind(a, 5000).unwrap();
        assert_eq!(stack.socket_bind(b, 5000), Err(NetError::PortInUse));
        assert_eq!(stack.socket_bind(a, 5001), Err(NetError::PortInUse));
    }

    #[test]
    fn send_to_auto_binds_ephemeral_port() {
        let (mut stack, frames) = testutil::stack();
        let dst = ipv4_addr(10, 0, 68, 1);
        stack.arp.insert(dst, [0xAA; 6], 0);

        let sock = stack.socket_open_udp().unwrap();
        stack.socket_send_to(sock, dst, 53, b"q", 0).unwrap();

        let frames = frames.lock().unwrap();
        let udp = &frames[0][ethernet::HEADER_SIZE + ipv4::HEADER_SIZE..];
        let src_port = u16::from_be_bytes([udp[0], udp[1]]);
        assert!(src_port >= UDP_EPHEMERAL_BASE);
    }

    #[test]
    fn connected_udp_filters_sources() {
        let (mut stack, _frames) = testutil::stack();
        let peer = ipv4_addr(10, 0, 68, 1);
        let other = ipv4_addr(10, 0, 68, 2);

        let sock = stack.socket_open_udp().unwrap();
        stack.socket_bind(sock, 9000).unwrap();
        stack.socket_connect_start(sock, peer, 1234, 0).unwrap();

        stack.socket_deliver_udp(sock, other, 1234, b"stranger".to_vec());
        assert_eq!(stack.socket_recv_from(sock), Ok(None));

        stack.socket_deliver_udp(sock, peer, 1234, b"friend".to_vec());
        let (ip, port, data) = stack.socket_recv_from(sock).unwrap().unwrap();
        assert_eq!((ip, port), (peer, 1234));
        assert_eq!(data, b"friend");
    }

    #[test]
    fn udp_queue_drops_oldest_at_depth() {
        let (mut stack, _frames) = testutil::stack();
        let peer = ipv4_addr(10, 0, 68, 1);
        let sock = stack.socket_open_udp().unwrap();
        stack.socket_bind(sock, 9000).unwrap();

        for i in 0..=UDP_QUEUE_DEPTH as u8 {
            stack.socket_deliver_udp(sock, peer, 1, alloc::vec![i]);
        }
        // The first datagram (payload [0]) was pushed out.
        let (_, _, data) = stack.socket_recv_from(sock).unwrap().unwrap();
        assert_eq!(data, alloc::vec![1]);
    }

    #[test]
    fn tcp_socket_requires_connect_before_send() {
        let (mut stack, _frames) = testutil::stack();
        let sock = stack.socket_open_tcp().unwrap();
        assert_eq!(stack.socket_send(sock, b"x", 0), Err(NetError::NotConnected));
        assert_eq!(stack.socket_tcp_conn(sock), Err(NetError::NotConnected));
    }

    #[test]
    fn bad_descriptor_rejected() {
        let (mut stack, _frames) = testutil::stack();
        assert_eq!(stack.socket_recv_from(3), Err(NetError::BadSocket));
        assert_eq!(stack.socket_close(3, 0), Err(NetError::BadSocket));
    }
}
