//! Internet Control Message Protocol: echo replies and the ping machinery
//! behind `SYS_PING`.

use super::{NetError, NetStack, checksum, ipv4};

/// Echo reply type.
const TYPE_ECHO_REPLY: u8 = 0;

/// Echo request type.
const TYPE_ECHO_REQUEST: u8 = 8;

/// ICMP header length (echo form).
pub const HEADER_SIZE: usize = 8;

/// Identifier stamped on our outgoing echo requests.
const PING_IDENT: u16 = 0x5A45; // "ZE"

/// Bytes of ping payload (classic 56-byte pattern).
const PING_PAYLOAD_LEN: usize = 56;

/// One outstanding echo request at a time.
pub struct PingState {
    /// Sequence number of the in-flight request, if any.
    in_flight: Option<u16>,
    /// Next sequence number to use.
    next_seq: u16,
    /// Millisecond timestamp when the reply arrived.
    reply_at_ms: Option<u64>,
}

impl PingState {
    /// Creates an idle ping tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_flight: None,
            next_seq: 1,
            reply_at_ms: None,
        }
    }
}

impl Default for PingState {
    fn default() -> Self {
        Self::new()
    }
}

impl NetStack {
    /// Handles a received ICMP message.
    pub(crate) fn icmp_input(&mut self, src: u32, packet: &[u8], now_ms: u64) {
        if packet.len() < HEADER_SIZE {
            return;
        }
        if checksum(&[packet]) != 0 {
            return;
        }

        let msg_type = packet[0];
        let code = packet[1];

        match (msg_type, code) {
            (TYPE_ECHO_REQUEST, 0) => {
                // Echo the message verbatim with the type rewritten.
                let mut reply = [0u8; ipv4::MAX_PAYLOAD];
                if packet.len() > reply.len() {
                    return;
                }
                reply[..packet.len()].copy_from_slice(packet);
                reply[0] = TYPE_ECHO_REPLY;
                reply[2..4].copy_from_slice(&[0, 0]);
                let sum = checksum(&[&reply[..packet.len()]]);
                reply[2..4].copy_from_slice(&sum.to_be_bytes());

                let _ = self.ipv4_send(src, ipv4::PROTO_ICMP, &reply[..packet.len()], now_ms);
            }
            (TYPE_ECHO_REPLY, 0) => {
                let ident = u16::from_be_bytes([packet[4], packet[5]]);
                let seq = u16::from_be_bytes([packet[6], packet[7]]);
                if ident == PING_IDENT && self.ping.in_flight == Some(seq) {
                    self.ping.in_flight = None;
                    self.ping.reply_at_ms = Some(now_ms);
                }
            }
            _ => {}
        }
    }

    /// Sends an echo request toward `dst` and arms the reply tracker.
    pub(crate) fn ping_start(&mut self, dst: u32, now_ms: u64) -> Result<u16, NetError> {
        let seq = self.ping.next_seq;
        self.ping.next_seq = self.ping.next_seq.wrapping_add(1);
        self.ping.in_flight = Some(seq);
        self.ping.reply_at_ms = None;

        let mut request = [0u8; HEADER_SIZE + PING_PAYLOAD_LEN];
        request[0] = TYPE_ECHO_REQUEST;
        request[4..6].copy_from_slice(&PING_IDENT.to_be_bytes());
        request[6..8].copy_from_slice(&seq.to_be_bytes());
        for (i, byte) in request[HEADER_SIZE..].iter_mut().enumerate() {
            *byte = i as u8;
        }
        let sum = checksum(&[&request]);
        request[2..4].copy_from_slice(&sum.to_be_bytes());

        self.ipv4_send(dst, ipv4::PROTO_ICMP, &request, now_ms)?;
        Ok(seq)
    }

    /// Millisecond timestamp of the reply to the armed request, if it came.
    pub(crate) fn ping_reply_at(&self) -> Option<u64> {
        self.ping.reply_at_ms
    }
}

/// Pings `dst`, returning the round-trip time in milliseconds.
///
/// Blocks (yielding) until the reply arrives or `timeout_ms` expires.
#[cfg(target_os = "none")]
pub fn ping(dst: u32, timeout_ms: u64) -> Result<u64, NetError> {
    let started = crate::time::now_ms();
    super::with_net(|stack| stack.ping_start(dst, started))??;

    loop {
        let now = crate::time::now_ms();
        let reply = super::with_net(|stack| stack.ping_reply_at())?;
        if let Some(at) = reply {
            return Ok(at.saturating_sub(started));
        }
        if now.saturating_sub(started) >= timeout_ms {
            return Err(NetError::Timeout);
        }
        crate::time::sleep_ms(10);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testutil;
    use crate::net::{ethernet, ipv4_addr};

    fn echo_request(ident: u16, seq: u16, payload: &[u8]) -> alloc::vec::Vec<u8> {
        let mut packet = alloc::vec![0u8; HEADER_SIZE + payload.len()];
        packet[0] = TYPE_ECHO_REQUEST;
        packet[4..6].copy_from_slice(&ident.to_be_bytes());
        packet[6..8].copy_from_slice(&seq.to_be_bytes());
        packet[HEADER_SIZE..].copy_from_slice(payload);
        let sum = checksum(&[&packet]);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
        packet
    }

    #[test]
    fn echo_request_gets_verbatim_reply() {
        let (mut stack, frames) = testutil::stack();
        let peer = ipv4_addr(10, 0, 68, 1);
        stack.arp.insert(peer, [0xAA; 6], 0);

        let request = echo_request(0x1234, 7, b"ping-payload");
        stack.icmp_input(peer, &request, 0);

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let icmp = &frames[0][ethernet::HEADER_SIZE + ipv4::HEADER_SIZE..];
        assert_eq!(icmp[0], TYPE_ECHO_REPLY);
        assert_eq!(icmp[1], 0);
        // Identifier, sequence, and payload are echoed unchanged.
        assert_eq!(&icmp[4..8], &request[4..8]);
        assert_eq!(&icmp[HEADER_SIZE..], b"ping-payload");
        // The reply checksum folds to zero.
        assert_eq!(checksum(&[icmp]), 0);
    }

    #[test]
    fn corrupt_echo_request_dropped() {
        let (mut stack, frames) = testutil::stack();
        let peer = ipv4_addr(10, 0, 68, 1);
        stack.arp.insert(peer, [0xAA; 6], 0);

        let mut request = echo_request(0x1234, 7, b"x");
        request[6] ^= 0x40; // break the checksum
        stack.icmp_input(peer, &request, 0);
        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn ping_roundtrip_records_reply_time() {
        let (mut stack, frames) = testutil::stack();
        let peer = ipv4_addr(10, 0, 68, 1);
        stack.arp.insert(peer, [0xAA; 6], 0);

        let seq = stack.ping_start(peer, 1_000).unwrap();
        assert_eq!(stack.ping_reply_at(), None);

        // Reflect the request back as a reply, as the peer would.
        let sent = frames.lock().unwrap()[0].clone();
        let mut reply = sent[ethernet::HEADER_SIZE + ipv4::HEADER_SIZE..].to_vec();
        reply[0] = TYPE_ECHO_REPLY;
        reply[2..4].copy_from_slice(&[0, 0]);
        let sum = checksum(&[&reply]);
        reply[2..4].copy_from_slice(&sum.to_be_bytes());

        stack.icmp_input(peer, &reply, 1_023);
        assert_eq!(stack.ping_reply_at(), Some(1_023));
        assert_eq!(u16::from_be_bytes([reply[6], reply[7]]), seq);
    }

    #[test]
    fn stale_or_foreign_replies_ignored() {
        let (mut stack, _frames) = testutil::stack();
        let peer = ipv4_addr(10, 0, 68, 1);
        stack.arp.insert(peer, [0xAA; 6], 0);
        stack.ping_start(peer, 0).unwrap();

        // Reply with the wrong identifier.
        let mut reply = echo_request(0x9999, 1, b"");
        reply[0] = TYPE_ECHO_REPLY;
        reply[2..4].copy_from_slice(&[0, 0]);
        let sum = checksum(&[&reply]);
        reply[2..4].copy_from_slice(&sum.to_be_bytes());
        stack.icmp_input(peer, &reply, 5);
        assert_eq!(stack.ping_reply_at(), None);
    }
}
