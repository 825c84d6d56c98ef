//! Internet Protocol version 4.
//!
//! Outbound datagrams that miss the ARP cache are parked in a small pending
//! queue and flushed when the reply arrives; the blocking send wrapper gives
//! resolution 150 ms (three 50 ms sleeps) before reporting failure.

use super::{IP_BROADCAST, NetError, NetStack, checksum, ethernet};

/// Header length without options (the only form we emit).
pub const HEADER_SIZE: usize = 20;

/// Protocol number: ICMP.
pub const PROTO_ICMP: u8 = 1;

/// Protocol number: TCP.
pub const PROTO_TCP: u8 = 6;

/// Protocol number: UDP.
pub const PROTO_UDP: u8 = 17;

/// Default time-to-live on emitted datagrams.
pub const DEFAULT_TTL: u8 = 64;

/// Largest IPv4 payload we can carry in one Ethernet frame.
pub const MAX_PAYLOAD: usize = ethernet::MAX_PAYLOAD_SIZE - HEADER_SIZE;

/// Datagrams parked while ARP resolves their next hop.
pub const PENDING_CAPACITY: usize = 4;

/// Outcome of a non-blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame left the device.
    Sent,
    /// Parked until ARP resolves the next hop.
    ArpPending,
}

struct PendingPacket {
    next_hop: u32,
    frame_len: usize,
    frame: [u8; ethernet::MAX_PAYLOAD_SIZE],
}

/// Queue of datagrams awaiting ARP resolution.
pub struct PendingQueue {
    slots: [Option<PendingPacket>; PENDING_CAPACITY],
}

impl PendingQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: [const { None }; PENDING_CAPACITY],
        }
    }

    fn push(&mut self, next_hop: u32, frame: &[u8]) {
        let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) else {
            // Queue full: the oldest strategy here is simply to drop.
            return;
        };
        let mut packet = PendingPacket {
            next_hop,
            frame_len: frame.len(),
            frame: [0; ethernet::MAX_PAYLOAD_SIZE],
        };
        packet.frame[..frame.len()].copy_from_slice(frame);
        *slot = Some(packet);
    }
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes an IPv4 header into `out`.
fn build_header(out: &mut [u8], ident: u16, total_len: u16, protocol: u8, src: u32, dst: u32) {
    out[0] = (4 << 4) | 5; // version 4, IHL 5 dwords
    out[1] = 0; // TOS
    out[2..4].copy_from_slice(&total_len.to_be_bytes());
    out[4..6].copy_from_slice(&ident.to_be_bytes());
    out[6..8].copy_from_slice(&0u16.to_be_bytes()); // flags + fragment offset
    out[8] = DEFAULT_TTL;
    out[9] = protocol;
    out[10..12].copy_from_slice(&0u16.to_be_bytes()); // checksum placeholder
    out[12..16].copy_from_slice(&src.to_le_bytes());
    out[16..20].copy_from_slice(&dst.to_le_bytes());

    let sum = checksum(&[&out[..HEADER_SIZE]]);
    out[10..12].copy_from_slice(&sum.to_be_bytes());
}

/// Computes the TCP/UDP pseudo-header checksum over `segment`.
///
/// `src`/`dst` are wire-order addresses; `length` is the transport segment
/// length that also appears in the pseudo-header.
#[must_use]
pub fn pseudo_header_checksum(src: u32, dst: u32, protocol: u8, length: u16, segment: &[u8]) -> u16 {
    checksum(&[
        &src.to_le_bytes(),
        &dst.to_le_bytes(),
        &[0, protocol],
        &length.to_be_bytes(),
        segment,
    ])
}

impl NetStack {
    /// Handles a received IPv4 packet (Ethernet payload).
    pub(crate) fn ipv4_input(&mut self, packet: &[u8], now_ms: u64) {
        if packet.len() < HEADER_SIZE {
            return;
        }

        let version = packet[0] >> 4;
        if version != 4 {
            return;
        }
        let ihl = usize::from(packet[0] & 0xF) * 4;
        if ihl < HEADER_SIZE || ihl > packet.len() {
            return;
        }
        if checksum(&[&packet[..ihl]]) != 0 {
            return;
        }

        let total_len = usize::from(u16::from_be_bytes([packet[2], packet[3]]));
        if total_len < ihl || total_len > packet.len() {
            return;
        }

        let src = u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]);
        let dst = u32::from_le_bytes([packet[16], packet[17], packet[18], packet[19]]);
        if dst != self.config.ip && dst != IP_BROADCAST {
            return;
        }

        let protocol = packet[9];
        let payload = &packet[ihl..total_len];
        match protocol {
            PROTO_ICMP => self.icmp_input(src, payload, now_ms),
            PROTO_UDP => self.udp_input(src, dst, payload),
            PROTO_TCP => self.tcp_input(src, dst, payload, now_ms),
            _ => {}
        }
    }

    /// Builds and sends one IPv4 datagram without blocking.
    ///
    /// On an ARP miss the finished frame is parked in the pending queue (a
    /// request is already in flight) and [`SendOutcome::ArpPending`] is
    /// returned; the queue drains from [`NetStack::flush_pending`] when any
    /// ARP packet refreshes the cache.
    pub(crate) fn ipv4_send(
        &mut self,
        dst: u32,
        protocol: u8,
        payload: &[u8],
        now_ms: u64,
    ) -> Result<SendOutcome, NetError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(NetError::BadPacket);
        }

        let total_len = (HEADER_SIZE + payload.len()) as u16;
        let ident = self.ip_ident;
        self.ip_ident = self.ip_ident.wrapping_add(1);

        let mut packet = [0u8; ethernet::MAX_PAYLOAD_SIZE];
        build_header(&mut packet, ident, total_len, protocol, self.config.ip, dst);
        packet[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
        let packet = &packet[..HEADER_SIZE + payload.len()];

        let next_hop = self.config.next_hop(dst);
        match self.arp_resolve(next_hop, now_ms) {
            Some(mac) => {
                if self.ethernet_send(mac, ethernet::ETHERTYPE_IPV4, packet) {
                    Ok(SendOutcome::Sent)
                } else {
                    Err(NetError::BadPacket)
                }
            }
            None => {
                self.pending.push(next_hop, packet);
                Ok(SendOutcome::ArpPending)
            }
        }
    }

    /// Retransmits parked datagrams whose next hop is now resolvable.
    pub(crate) fn flush_pending(&mut self, now_ms: u64) {
        for i in 0..PENDING_CAPACITY {
            let Some(next_hop) = self.pending.slots[i].as_ref().map(|p| p.next_hop) else {
                continue;
            };
            let Some(mac) = self.arp.lookup(next_hop, now_ms) else {
                continue;
            };
            let packet = self.pending.slots[i].take().expect("slot checked above");
            self.ethernet_send(mac, ethernet::ETHERTYPE_IPV4, &packet.frame[..packet.frame_len]);
        }
    }
}

/// Sends one datagram, waiting up to 150 ms for ARP resolution.
///
/// The parked copy is delivered by the pending-queue flush as soon as the
/// reply arrives; this wrapper only decides success or [`NetError::Unreachable`].
#[cfg(target_os = "none")]
pub fn send_blocking(dst: u32, protocol: u8, payload: &[u8]) -> Result<(), NetError> {
    let outcome = super::with_net(|stack| stack.ipv4_send(dst, protocol, payload, crate::time::now_ms()))??;
    if outcome == SendOutcome::Sent {
        return Ok(());
    }

    let next_hop = super::with_net(|stack| stack.config.next_hop(dst))?;
    for _ in 0..3 {
        crate::time::sleep_ms(50);
        let resolved = super::with_net(|stack| {
            let now = crate::time::now_ms();
            stack.arp.lookup(next_hop, now).is_some()
        })?;
        if resolved {
            return Ok(());
        }
    }
    Err(NetError::Unreachable)
}
