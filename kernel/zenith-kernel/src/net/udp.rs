//! User Datagram Protocol.
//!
//! Bound ports route to in-kernel sinks — an index into a small table of
//! known consumers (the DNS resolver and the socket layer), not arbitrary
//! function pointers. Checksums follow RFC 768: a received zero checksum is
//! accepted unverified, an outgoing zero is transmitted as `0xFFFF`.

use super::{NetError, NetStack, ipv4};

/// UDP header length.
pub const HEADER_SIZE: usize = 8;

/// Maximum simultaneous port bindings.
pub const MAX_BINDINGS: usize = 16;

/// In-kernel consumer a bound port delivers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpSink {
    /// The DNS resolver's pending query.
    Dns,
    /// A socket-layer descriptor's receive queue.
    Socket(usize),
}

#[derive(Clone, Copy)]
struct Binding {
    port: u16,
    sink: UdpSink,
}

/// The bound-port table.
pub struct PortTable {
    bindings: [Option<Binding>; MAX_BINDINGS],
}

impl PortTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: [None; MAX_BINDINGS],
        }
    }

    /// Binds `port` to `sink`.
    pub fn bind(&mut self, port: u16, sink: UdpSink) -> Result<(), NetError> {
        if self.bindings.iter().flatten().any(|b| b.port == port) {
            return Err(NetError::PortInUse);
        }
        let Some(slot) = self.bindings.iter_mut().find(|b| b.is_none()) else {
            return Err(NetError::NoFreeSockets);
        };
        *slot = Some(Binding { port, sink });
        Ok(())
    }

    /// Releases the binding for `port` (no-op when absent).
    pub fn unbind(&mut self, port: u16) {
        for slot in &mut self.bindings {
            if slot.is_some_and(|b| b.port == port) {
                *slot = None;
                return;
            }
        }
    }

    /// Looks up the sink bound to `port`.
    #[must_use]
    pub fn sink_for(&self, port: u16) -> Option<UdpSink> {
        self.bindings
            .iter()
            .flatten()
            .find(|b| b.port == port)
            .map(|b| b.sink)
    }
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes a UDP datagram with a pseudo-header checksum.
fn build_datagram(
    src_ip: u32,
    dst_ip: u32,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> alloc::vec::Vec<u8> {
    let len = (HEADER_SIZE + payload.len()) as u16;
    let mut datagram = alloc::vec![0u8; HEADER_SIZE + payload.len()];
    datagram[0..2].copy_from_slice(&src_port.to_be_bytes());
    datagram[2..4].copy_from_slice(&dst_port.to_be_bytes());
    datagram[4..6].copy_from_slice(&len.to_be_bytes());
    datagram[HEADER_SIZE..].copy_from_slice(payload);

    let mut sum = ipv4::pseudo_header_checksum(src_ip, dst_ip, ipv4::PROTO_UDP, len, &datagram);
    if sum == 0 {
        // RFC 768: a computed zero is transmitted as all ones.
        sum = 0xFFFF;
    }
    datagram[6..8].copy_from_slice(&sum.to_be_bytes());
    datagram
}

impl NetStack {
    /// Handles a received UDP datagram.
    pub(crate) fn udp_input(&mut self, src_ip: u32, dst_ip: u32, datagram: &[u8]) {
        if datagram.len() < HEADER_SIZE {
            return;
        }
        let src_port = u16::from_be_bytes([datagram[0], datagram[1]]);
        let dst_port = u16::from_be_bytes([datagram[2], datagram[3]]);
        let udp_len = usize::from(u16::from_be_bytes([datagram[4], datagram[5]]));
        if udp_len < HEADER_SIZE || udp_len > datagram.len() {
            return;
        }

        let transmitted_sum = u16::from_be_bytes([datagram[6], datagram[7]]);
        if transmitted_sum != 0 {
            // A non-zero checksum must verify over the pseudo-header.
            let sum = ipv4::pseudo_header_checksum(
                src_ip,
                dst_ip,
                ipv4::PROTO_UDP,
                udp_len as u16,
                &datagram[..udp_len],
            );
            if sum != 0 {
                return;
            }
        }

        let payload_range = HEADER_SIZE..udp_len;
        let Some(sink) = self.udp.sink_for(dst_port) else {
            return;
        };
        match sink {
            UdpSink::Dns => {
                let payload = &datagram[payload_range];
                self.dns_on_datagram(payload);
            }
            UdpSink::Socket(index) => {
                // Clone out of the borrow before pushing into the socket.
                let payload = alloc::vec::Vec::from(&datagram[payload_range]);
                self.socket_deliver_udp(index, src_ip, src_port, payload);
            }
        }
    }

    /// Sends one UDP datagram.
    pub(crate) fn udp_send(
        &mut self,
        dst_ip: u32,
        src_port: u16,
        dst_port: u16,
        payload: &[u8],
        now_ms: u64,
    ) -> Result<ipv4::SendOutcome, NetError> {
        if HEADER_SIZE + payload.len() > ipv4::MAX_PAYLOAD {
            return Err(NetError::BadPacket);
        }
        let datagram = build_datagram(self.config.ip, dst_ip, src_port, dst_port, payload);
        self.ipv4_send(dst_ip, ipv4::PROTO_UDP, &datagram, now_ms)
    }
}

/// Test-only datagram builder shared with the IPv4 tests.
#[cfg(test)]
pub(crate) fn tests_build_datagram(
    src_ip: u32,
    dst_ip: u32,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> alloc::vec::Vec<u8> {
    build_datagram(src_ip, dst_ip, src_port, dst_port, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testutil;
    use crate::net::{ethernet, ipv4_addr};

    #[test]
    fn bind_rejects_duplicates_and_exhaustion() {
        let mut table = PortTable::new();
        table.bind(53, UdpSink::Dns).unwrap();
        assert_eq!(table.bind(53, UdpSink::Socket(0)), Err(NetError::PortInUse));

        for i in 1..MAX_BINDINGS as u16 {
            table.bind(1000 + i, UdpSink::Socket(i as usize)).unwrap();
        }
        assert_eq!(table.bind(9999, UdpSink::Socket(99)), Err(NetError::NoFreeSockets));

        table.unbind(1001);
        assert!(table.bind(9999, UdpSink::Socket(99)).is_ok());
    }

    #[test]
    fn datagram_checksum_includes_pseudo_header() {
        let src = ipv4_addr(10, 0, 68, 99);
        let dst = ipv4_addr(10, 0, 68, 1);
        let datagram = build_datagram(src, dst, 1234, 53, b"query");

        assert_eq!(u16::from_be_bytes([datagram[0], datagram[1]]), 1234);
        assert_eq!(u16::from_be_bytes([datagram[2], datagram[3]]), 53);
        assert_eq!(
            ipv4::pseudo_header_checksum(src, dst, ipv4::PROTO_UDP, datagram.len() as u16, &datagram),
            0
        );
        // Swapping the addresses must break verification.
        assert_ne!(
            ipv4::pseudo_header_checksum(dst, src, ipv4::PROTO_UDP, datagram.len() as u16, &datagram),
            0
        );
    }

    #[test]
    fn delivery_to_bound_socket() {
        let (mut stack, _frames) = testutil::stack();
        let sock = stack.socket_open_udp().unwrap();
        stack.socket_bind(sock, 68).unwrap();

        let src = ipv4_addr(10, 0, 68, 1);
        let datagram = build_datagram(src, stack.config.ip, 67, 68, b"offer");
        stack.udp_input(src, stack.config.ip, &datagram);

        let (ip, port, data) = stack.socket_recv_from(sock).unwrap().unwrap();
        assert_eq!((ip, port), (src, 67));
        assert_eq!(data, b"offer");
    }

    #[test]
    fn unbound_port_drops_silently() {
        let (mut stack, frames) = testutil::stack();
        let src = ipv4_addr(10, 0, 68, 1);
        let datagram = build_datagram(src, stack.config.ip, 5, 4242, b"noone");
        stack.udp_input(src, stack.config.ip, &datagram);
        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_checksum_accepted_as_is() {
        let (mut stack, _frames) = testutil::stack();
        let sock = stack.socket_open_udp().unwrap();
        stack.socket_bind(sock, 8000).unwrap();

        let src = ipv4_addr(10, 0, 68, 1);
        let mut datagram = build_datagram(src, stack.config.ip, 1, 8000, b"nochecksum");
        datagram[6..8].copy_from_slice(&[0, 0]);
        stack.udp_input(src, stack.config.ip, &datagram);

        assert!(stack.socket_recv_from(sock).unwrap().is_some());
    }

    #[test]
    fn bad_checksum_dropped() {
        let (mut stack, _frames) = testutil::stack();
        let sock = stack.socket_open_udp().unwrap();
        stack.socket_bind(sock, 8000).unwrap();

        let src = ipv4_addr(10, 0, 68, 1);
        let mut datagram = build_datagram(src, stack.config.ip, 1, 8000, b"corrupt");
        datagram[HEADER_SIZE] ^= 0xFF;
        stack.udp_input(src, stack.config.ip, &datagram);

        assert_eq!(stack.socket_recv_from(sock), Ok(None));
    }

    #[test]
    fn truncated_length_field_dropped() {
        let (mut stack, _frames) = testutil::stack();
        let sock = stack.socket_open_udp().unwrap();
        stack.socket_bind(sock, 8000).unwrap();

        let src = ipv4_addr(10, 0, 68, 1);
        let mut datagram = build_datagram(src, stack.config.ip, 1, 8000, b"len");
        datagram[4..6].copy_from_slice(&100u16.to_be_bytes()); // longer than the buffer
        stack.udp_input(src, stack.config.ip, &datagram);
        assert_eq!(stack.socket_recv_from(sock), Ok(None));
    }

    #[test]
    fn send_wraps_in_ipv4() {
        let (mut stack, frames) = testutil::stack();
        let dst = ipv4_addr(10, 0, 68, 1);
        stack.arp.insert(dst, [0xAA; 6], 0);

        stack.udp_send(dst, 5353, 53, b"q", 0).unwrap();

        let frames = frames.lock().unwrap();
        let ip = &frames[0][ethernet::HEADER_SIZE..];
        assert_eq!(ip[9], ipv4::PROTO_UDP);
        let udp = &ip[ipv4::HEADER_SIZE..];
        assert_eq!(u16::from_be_bytes([udp[2], udp[3]]), 53);
        assert_eq!(&udp[HEADER_SIZE..], b"q");
    }
}
