//! Address Resolution Protocol.
//!
//! A 32-entry cache maps wire-order IPv4 addresses to MACs with a 60-second
//! lifetime. Every received ARP packet refreshes the sender's mapping and
//! flushes the IPv4 pending queue; requests for our address get a reply.

use super::{BROADCAST_MAC, IP_BROADCAST, MacAddr, NetStack, ethernet};

/// Hardware type: Ethernet.
const HW_TYPE_ETHERNET: u16 = 1;

/// Protocol type: IPv4.
const PROTO_TYPE_IPV4: u16 = 0x0800;

/// Operation: request.
const OP_REQUEST: u16 = 1;

/// Operation: reply.
const OP_REPLY: u16 = 2;

/// Wire size of an Ethernet/IPv4 ARP packet.
pub const PACKET_SIZE: usize = 28;

/// Cache capacity.
pub const CACHE_SIZE: usize = 32;

/// Entry lifetime in milliseconds.
pub const CACHE_TTL_MS: u64 = 60_000;

#[derive(Clone, Copy)]
struct CacheEntry {
    ip: u32,
    mac: MacAddr,
    timestamp_ms: u64,
    valid: bool,
}

/// The IP → MAC cache.
pub struct ArpCache {
    entries: [CacheEntry; CACHE_SIZE],
}

impl ArpCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: [CacheEntry {
                ip: 0,
                mac: [0; 6],
                timestamp_ms: 0,
                valid: false,
            }; CACHE_SIZE],
        }
    }

    /// Inserts or refreshes a mapping.
    pub fn insert(&mut self, ip: u32, mac: MacAddr, now_ms: u64) {
        let mut empty_slot = None;
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if entry.valid && entry.ip == ip {
                entry.mac = mac;
                entry.timestamp_ms = now_ms;
                return;
            }
            if !entry.valid && empty_slot.is_none() {
                empty_slot = Some(i);
            }
        }
        if let Some(slot) = empty_slot {
            self.entries[slot] = CacheEntry {
                ip,
                mac,
                timestamp_ms: now_ms,
                valid: true,
            };
        }
    }

    /// Looks up a fresh mapping; expired entries are invalidated.
    pub fn lookup(&mut self, ip: u32, now_ms: u64) -> Option<MacAddr> {
        for entry in &mut self.entries {
            if entry.valid && entry.ip == ip {
                if now_ms.saturating_sub(entry.timestamp_ms) > CACHE_TTL_MS {
                    entry.valid = false;
                    return None;
                }
                return Some(entry.mac);
            }
        }
        None
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes one ARP packet.
fn build_packet(op: u16, sender_mac: MacAddr, sender_ip: u32, target_mac: MacAddr, target_ip: u32) -> [u8; PACKET_SIZE] {
    let mut pkt = [0u8; PACKET_SIZE];
    pkt[0..2].copy_from_slice(&HW_TYPE_ETHERNET.to_be_bytes());
    pkt[2..4].copy_from_slice(&PROTO_TYPE_IPV4.to_be_bytes());
    pkt[4] = 6; // hardware address length
    pkt[5] = 4; // protocol address length
    pkt[6..8].copy_from_slice(&op.to_be_bytes());
    pkt[8..14].copy_from_slice(&sender_mac);
    pkt[14..18].copy_from_slice(&sender_ip.to_le_bytes());
    pkt[18..24].copy_from_slice(&target_mac);
    pkt[24..28].copy_from_slice(&target_ip.to_le_bytes());
    pkt
}

impl NetStack {
    /// Handles a received ARP packet.
    pub(crate) fn arp_input(&mut self, packet: &[u8], now_ms: u64) {
        if packet.len() < PACKET_SIZE {
            return;
        }
        if u16::from_be_bytes([packet[0], packet[1]]) != HW_TYPE_ETHERNET
            || u16::from_be_bytes([packet[2], packet[3]]) != PROTO_TYPE_IPV4
        {
            return;
        }

        let op = u16::from_be_bytes([packet[6], packet[7]]);
        let sender_mac: MacAddr = packet[8..14].try_into().unwrap_or([0; 6]);
        let sender_ip = u32::from_le_bytes([packet[14], packet[15], packet[16], packet[17]]);
        let target_ip = u32::from_le_bytes([packet[24], packet[25], packet[26], packet[27]]);

        // Cache the sender's mapping, then send anything that was waiting
        // for it.
        self.arp.insert(sender_ip, sender_mac, now_ms);
        self.flush_pending(now_ms);

        if op == OP_REQUEST && target_ip == self.config.ip {
            let reply = build_packet(OP_REPLY, self.mac(), self.config.ip, sender_mac, sender_ip);
            self.ethernet_send(sender_mac, ethernet::ETHERTYPE_ARP, &reply);
        }
    }

    /// Resolves `ip` to a MAC address.
    ///
    /// Broadcast resolves immediately; a cache hit returns the mapping; a
    /// miss broadcasts a request and returns `None` so the caller can
    /// wait-and-retry.
    pub(crate) fn arp_resolve(&mut self, ip: u32, now_ms: u64) -> Option<MacAddr> {
        if ip == IP_BROADCAST {
            return Some(BROADCAST_MAC);
        }
        if let Some(mac) = self.arp.lookup(ip, now_ms) {
            return Some(mac);
        }
        self.arp_request(ip);
        None
    }

    /// Broadcasts a who-has request for `ip`.
    pub(crate) fn arp_request(&mut self, ip: u32) {
        let request = build_packet(OP_REQUEST, self.mac(), self.config.ip, [0; 6], ip);
        self.ethernet_send(BROADCAST_MAC, ethernet::ETHERTYPE_ARP, &request);
    }

    /// Announces our own mapping (gratuitous ARP), sent once at boot. No
    /// collision detection is performed.
    pub(crate) fn arp_announce(&mut self) {
        let announce = build_packet(OP_REQUEST, self.mac(), self.config.ip, [0; 6], self.config.ip);
        self.ethernet_send(BROADCAST_MAC, ethernet::ETHERTYPE_ARP, &announce);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ipv4_addr, testutil};

    #[test]
    fn cache_hit_within_ttl() {
        let mut cache = ArpCache::new();
        let ip = ipv4_addr(10, 0, 68, 1);
        cache.insert(ip, [1, 2, 3, 4, 5, 6], 1_000);
        assert_eq!(cache.lookup(ip, 30_000), Some([1, 2, 3, 4, 5, 6]));
        // A hit is returned only while now - timestamp <= 60 s.
        assert_eq!(cache.lookup(ip, 1_000 + CACHE_TTL_MS), Some([1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn cache_expires_after_ttl() {
        let mut cache = ArpCache::new();
        let ip = ipv4_addr(10, 0, 68, 1);
        cache.insert(ip, [1, 2, 3, 4, 5, 6], 1_000);
        assert_eq!(cache.lookup(ip, 1_000 + CACHE_TTL_MS + 1), None);
        // The expired entry slot is reusable.
        cache.insert(ipv4_addr(10, 0, 68, 2), [9; 6], 70_000);
        assert_eq!(cache.lookup(ipv4_addr(10, 0, 68, 2), 70_001), Some([9; 6]));
    }

    #[test]
    fn cache_refresh_updates_timestamp() {
        let mut cache = ArpCache::new();
        let ip = ipv4_addr(10, 0, 68, 1);
        cache.insert(ip, [1; 6], 0);
        cache.insert(ip, [2; 6], 50_000);
        assert_eq!(cache.lookup(ip, 100_000), Some([2; 6]));
    }

    #[test]
    fn cache_full_drops_new_entries() {
        let mut cache = ArpCache::new();
        for i in 0..CACHE_SIZE as u8 {
            cache.insert(ipv4_addr(10, 0, 0, i), [i; 6], 0);
        }
        cache.insert(ipv4_addr(192, 0, 2, 1), [0xFF; 6], 0);
        assert_eq!(cache.lookup(ipv4_addr(192, 0, 2, 1), 1), None);
        assert_eq!(cache.lookup(ipv4_addr(10, 0, 0, 7), 1), Some([7; 6]));
    }

    #[test]
    fn request_sent_on_miss() {
        let (mut stack, frames) = testutil::stack();
        let target = ipv4_addr(10, 0, 68, 1);
        assert_eq!(stack.arp_resolve(target, 0), None);

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(&frame[0..6], &BROADCAST_MAC);
        assert_eq!(u16::from_be_bytes([frame[12], frame[13]]), ethernet::ETHERTYPE_ARP);
        // Operation = request, target ip at payload offset 24.
        assert_eq!(u16::from_be_bytes([frame[20], frame[21]]), OP_REQUEST);
        assert_eq!(&frame[14 + 24..14 + 28], &ip_bytes(target));
    }

    #[test]
    fn broadcast_resolves_without_traffic() {
        let (mut stack, frames) = testutil::stack();
        assert_eq!(stack.arp_resolve(crate::net::IP_BROADCAST, 0), Some(BROADCAST_MAC));
        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn reply_caches_and_resolves() {
        let (mut stack, _frames) = testutil::stack();
        let peer_ip = ipv4_addr(10, 0, 68, 1);
        let peer_mac = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01];

        let reply = build_packet(OP_REPLY, peer_mac, peer_ip, stack.mac(), stack.config.ip);
        stack.arp_input(&reply, 5_000);

        assert_eq!(stack.arp_resolve(peer_ip, 6_000), Some(peer_mac));
    }

    #[test]
    fn request_for_our_ip_gets_reply() {
        let (mut stack, frames) = testutil::stack();
        let peer_ip = ipv4_addr(10, 0, 68, 7);
        let peer_mac = [0x02, 0x00, 0x00, 0x00, 0x00, 0x07];

        let request = build_packet(OP_REQUEST, peer_mac, peer_ip, [0; 6], stack.config.ip);
        stack.arp_input(&request, 0);

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        // Unicast back to the asker with our mapping.
        assert_eq!(&frame[0..6], &peer_mac);
        let payload = &frame[14..];
        assert_eq!(u16::from_be_bytes([payload[6], payload[7]]), OP_REPLY);
        assert_eq!(&payload[8..14], &stack.mac());
        assert_eq!(&payload[14..18], &ip_bytes(stack.config.ip));
        assert_eq!(&payload[24..28], &ip_bytes(peer_ip));
    }

    #[test]
    fn request_for_other_ip_ignored() {
        let (mut stack, frames) = testutil::stack();
        let request = build_packet(OP_REQUEST, [1; 6], ipv4_addr(10, 0, 68, 7), [0; 6], ipv4_addr(10, 0, 68, 200));
        stack.arp_input(&request, 0);
        assert!(frames.lock().unwrap().is_empty());
    }

    fn ip_bytes(ip: u32) -> [u8; 4] {
        ip.to_le_bytes()
    }
}
