//! DNS resolver (RFC 1035, A records only).
//!
//! Builds a recursive query, sends it to the configured resolver over UDP
//! port 53, and parses the first A record out of the response, walking
//! compressed names with a hard 32-jump bound. Results are cached in an
//! 8-entry table with a 60-second TTL floor; the oldest entry is evicted
//! when the table is full.

use super::{NetError, NetStack, udp};

/// Resolver port.
pub const DNS_PORT: u16 = 53;

/// Local port our queries originate from.
const QUERY_PORT: u16 = 5353;

/// Flags: standard query with recursion desired.
const FLAGS_RD: u16 = 0x0100;

/// QTYPE A (host address).
const QTYPE_A: u16 = 1;

/// QCLASS IN (internet).
const QCLASS_IN: u16 = 1;

/// Compression-pointer jump bound; terminates on malicious loops.
const MAX_JUMPS: usize = 32;

/// Cache capacity.
pub const CACHE_SIZE: usize = 8;

/// Minimum cache lifetime in seconds, applied to smaller (or zero) TTLs.
pub const MIN_TTL_SECONDS: u32 = 60;

/// Longest hostname we encode.
pub const MAX_HOSTNAME: usize = 128;

#[derive(Clone)]
struct CacheEntry {
    hostname: heapless::String<MAX_HOSTNAME>,
    ip: u32,
    ttl_seconds: u32,
    timestamp_ms: u64,
    valid: bool,
}

/// A parsed answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsAnswer {
    /// Resolved address, wire order.
    pub ip: u32,
    /// Answer TTL in seconds.
    pub ttl: u32,
}

/// Resolver state: the cache plus the single outstanding query.
pub struct DnsState {
    cache: [Option<CacheEntry>; CACHE_SIZE],
    /// Transaction id of the in-flight query, if any.
    pending_id: Option<u16>,
    /// Answer delivered by the UDP sink for the pending query.
    answer: Option<DnsAnswer>,
    next_id: u16,
}

impl DnsState {
    /// Creates an empty resolver state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: [const { None }; CACHE_SIZE],
            pending_id: None,
            answer: None,
            next_id: 1,
        }
    }

    /// Cache lookup honoring TTLs; expired entries are invalidated.
    pub fn cache_lookup(&mut self, hostname: &str, now_ms: u64) -> Option<u32> {
        for slot in self.cache.iter_mut().flatten() {
            if !slot.valid || slot.hostname.as_str() != hostname {
                continue;
            }
            let elapsed_s = now_ms.saturating_sub(slot.timestamp_ms) / 1000;
            if elapsed_s < u64::from(slot.ttl_seconds) {
                return Some(slot.ip);
            }
            slot.valid = false;
            return None;
        }
        None
    }

    /// Stores a mapping, evicting the oldest entry when full.
    pub fn cache_store(&mut self, hostname: &str, ip: u32, ttl_seconds: u32, now_ms: u64) {
        let ttl_seconds = ttl_seconds.max(MIN_TTL_SECONDS);
        let Ok(hostname) = heapless::String::try_from(hostname) else {
            return;
        };

        let mut slot_index = 0;
        let mut oldest = u64::MAX;
        for (i, slot) in self.cache.iter().enumerate() {
            match slot {
                Some(entry) if entry.valid => {
                    if entry.timestamp_ms < oldest {
                        oldest = entry.timestamp_ms;
                        slot_index = i;
                    }
                }
                _ => {
                    slot_index = i;
                    break;
                }
            }
        }

        self.cache[slot_index] = Some(CacheEntry {
            hostname,
            ip,
            ttl_seconds,
            timestamp_ms: now_ms,
            valid: true,
        });
    }
}

impl Default for DnsState {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes `hostname` as DNS labels (`example.com` → `\x07example\x03com\x00`).
///
/// Returns the number of bytes written, or `None` for empty labels, labels
/// over 63 bytes, or output overflow.
fn encode_name(hostname: &str, out: &mut [u8]) -> Option<usize> {
    let mut pos = 0;
    for label in hostname.split('.') {
        if label.is_empty() || label.len() > 63 {
            return None;
        }
        if pos + 1 + label.len() >= out.len() {
            return None;
        }
        out[pos] = label.len() as u8;
        out[pos + 1..pos + 1 + label.len()].copy_from_slice(label.as_bytes());
        pos += 1 + label.len();
    }
    if pos >= out.len() {
        return None;
    }
    out[pos] = 0;
    Some(pos + 1)
}

/// Builds a standard recursive A query. Returns the packet.
fn build_query(id: u16, hostname: &str) -> Result<alloc::vec::Vec<u8>, NetError> {
    if hostname.len() > MAX_HOSTNAME {
        return Err(NetError::NameTooLong);
    }
    let mut packet = alloc::vec![0u8; 12 + hostname.len() + 2 + 4];
    packet[0..2].copy_from_slice(&id.to_be_bytes());
    packet[2..4].copy_from_slice(&FLAGS_RD.to_be_bytes());
    packet[4..6].copy_from_slice(&1u16.to_be_bytes()); // QDCOUNT

    let name_len = encode_name(hostname, &mut packet[12..]).ok_or(NetError::NameTooLong)?;
    let mut pos = 12 + name_len;
    packet[pos..pos + 2].copy_from_slice(&QTYPE_A.to_be_bytes());
    pos += 2;
    packet[pos..pos + 2].copy_from_slice(&QCLASS_IN.to_be_bytes());
    pos += 2;
    packet.truncate(pos);
    Ok(packet)
}

/// Skips a (possibly compressed) name, returning the offset just past it.
///
/// Bounded to [`MAX_JUMPS`] pointer jumps so hostile packets terminate.
fn skip_name(packet: &[u8], mut offset: usize) -> Option<usize> {
    let mut jumps = 0;
    let mut return_offset = None;

    while offset < packet.len() && jumps < MAX_JUMPS {
        let len = packet[offset];
        if len == 0 {
            return Some(return_offset.unwrap_or(offset + 1));
        }
        if len & 0xC0 == 0xC0 {
            if offset + 1 >= packet.len() {
                return None;
            }
            if return_offset.is_none() {
                return_offset = Some(offset + 2);
            }
            offset = usize::from(len & 0x3F) << 8 | usize::from(packet[offset + 1]);
            jumps += 1;
            continue;
        }
        offset += 1 + usize::from(len);
        jumps += 1;
    }
    None
}

/// Parses a response, returning the first A record.
fn parse_response(expected_id: u16, packet: &[u8]) -> Option<DnsAnswer> {
    if packet.len() < 12 {
        return None;
    }
    if u16::from_be_bytes([packet[0], packet[1]]) != expected_id {
        return None;
    }
    if packet[2] & 0x80 == 0 {
        return None; // not a response
    }
    if packet[3] & 0x0F != 0 {
        return None; // RCODE signals an error
    }

    let qdcount = u16::from_be_bytes([packet[4], packet[5]]);
    let ancount = u16::from_be_bytes([packet[6], packet[7]]);

    // Skip the question section.
    let mut offset = 12;
    for _ in 0..qdcount {
        offset = skip_name(packet, offset)?;
        offset += 4; // QTYPE + QCLASS
        if offset > packet.len() {
            return None;
        }
    }

    // Walk the answers for the first A record.
    for _ in 0..ancount {
        offset = skip_name(packet, offset)?;
        if offset + 10 > packet.len() {
            return None;
        }
        let atype = u16::from_be_bytes([packet[offset], packet[offset + 1]]);
        let ttl = u32::from_be_bytes([
            packet[offset + 4],
            packet[offset + 5],
            packet[offset + 6],
            packet[offset + 7],
        ]);
        let rdlength = usize::from(u16::from_be_bytes([packet[offset + 8], packet[offset + 9]]));
        offset += 10;
        if offset + rdlength > packet.len() {
            return None;
        }

        if atype == QTYPE_A && rdlength == 4 {
            let ip = u32::from_le_bytes([
                packet[offset],
                packet[offset + 1],
                packet[offset + 2],
                packet[offset + 3],
            ]);
            return Some(DnsAnswer { ip, ttl });
        }
        offset += rdlength;
    }
    None
}

impl NetStack {
    /// UDP sink for port [`QUERY_PORT`]: parses a response to the pending
    /// query and records the answer for the waiting resolver.
    pub(crate) fn dns_on_datagram(&mut self, payload: &[u8]) {
        let Some(id) = self.dns.pending_id else {
            return;
        };
        if let Some(answer) = parse_response(id, payload) {
            self.dns.pending_id = None;
            self.dns.answer = Some(answer);
        }
    }

    /// Starts a query for `hostname` unless the cache already has it.
    ///
    /// Returns `Ok(Some(ip))` on a cache hit (no packet emitted),
    /// `Ok(None)` when a query went out and the caller should poll
    /// [`NetStack::dns_take_answer`].
    pub(crate) fn dns_resolve_start(
        &mut self,
        hostname: &str,
        now_ms: u64,
    ) -> Result<Option<u32>, NetError> {
        if let Some(ip) = self.dns.cache_lookup(hostname, now_ms) {
            return Ok(Some(ip));
        }

        let id = self.dns.next_id;
        self.dns.next_id = self.dns.next_id.wrapping_add(1).max(1);
        let query = build_query(id, hostname)?;

        // Idempotent bind: the sink stays registered across queries.
        match self.udp.bind(QUERY_PORT, udp::UdpSink::Dns) {
            Ok(()) | Err(NetError::PortInUse) => {}
            Err(e) => return Err(e),
        }

        self.dns.pending_id = Some(id);
        self.dns.answer = None;

        let resolver = self.config.dns_server;
        self.udp_send(resolver, QUERY_PORT, DNS_PORT, &query, now_ms)?;
        Ok(None)
    }

    /// Takes the answer to the pending query, caching it.
    pub(crate) fn dns_take_answer(&mut self, hostname: &str, now_ms: u64) -> Option<u32> {
        let answer = self.dns.answer.take()?;
        self.dns.cache_store(hostname, answer.ip, answer.ttl, now_ms);
        Some(answer.ip)
    }
}

/// Resolves `hostname` to an IPv4 address, waiting up to 5 seconds.
#[cfg(target_os = "none")]
pub fn resolve(hostname: &str) -> Result<u32, NetError> {
    const RESOLVE_TIMEOUT_MS: u64 = 5000;

    let started = crate::time::now_ms();
    if let Some(ip) = super::with_net(|stack| stack.dns_resolve_start(hostname, started))?? {
        return Ok(ip);
    }

    loop {
        let now = crate::time::now_ms();
        let answer = super::with_net(|stack| stack.dns_take_answer(hostname, now))?;
        if let Some(ip) = answer {
            return Ok(ip);
        }
        if now.saturating_sub(started) >= RESOLVE_TIMEOUT_MS {
            return Err(NetError::Timeout);
        }
        crate::time::sleep_ms(10);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testutil;
    use crate::net::{ethernet, ipv4, ipv4_addr};

    /// Builds a response for `query` carrying one A record.
    fn answer_for(query: &[u8], ip: u32, ttl: u32) -> alloc::vec::Vec<u8> {
        let mut response = query.to_vec();
        response[2] = 0x81; // response + RD
        response[3] = 0x80; // RA, RCODE 0
        response[6..8].copy_from_slice(&1u16.to_be_bytes()); // ANCOUNT
        // Answer: pointer to the question name at offset 12.
        response.extend_from_slice(&[0xC0, 0x0C]);
        response.extend_from_slice(&QTYPE_A.to_be_bytes());
        response.extend_from_slice(&QCLASS_IN.to_be_bytes());
        response.extend_from_slice(&ttl.to_be_bytes());
        response.extend_from_slice(&4u16.to_be_bytes());
        response.extend_from_slice(&ip.to_le_bytes());
        response
    }

    #[test]
    fn name_encoding() {
        let mut out = [0u8; 64];
        let n = encode_name("example.com", &mut out).unwrap();
        assert_eq!(&out[..n], b"\x07example\x03com\x00");
        assert!(encode_name("bad..name", &mut out).is_none());
        assert!(encode_name(core::str::from_utf8(&[b'a'; 64]).unwrap(), &mut out).is_none());
    }

    #[test]
    fn query_layout() {
        let query = build_query(0x1234, "example.test").unwrap();
        assert_eq!(&query[0..2], &[0x12, 0x34]);
        assert_eq!(u16::from_be_bytes([query[2], query[3]]), FLAGS_RD);
        assert_eq!(u16::from_be_bytes([query[4], query[5]]), 1);
        let tail = &query[query.len() - 4..];
        assert_eq!(tail, &[0, 1, 0, 1]); // QTYPE A, QCLASS IN
    }

    #[test]
    fn response_roundtrip() {
        let query = build_query(7, "example.test").unwrap();
        let ip = ipv4_addr(203, 0, 113, 5);
        let response = answer_for(&query, ip, 300);

        let answer = parse_response(7, &response).unwrap();
        assert_eq!(answer, DnsAnswer { ip, ttl: 300 });

        // Wrong transaction id is rejected.
        assert!(parse_response(8, &response).is_none());
    }

    #[test]
    fn error_rcode_rejected() {
        let query = build_query(7, "nxdomain.test").unwrap();
        let mut response = answer_for(&query, 1, 1);
        response[3] = 0x83; // NXDOMAIN
        assert!(parse_response(7, &response).is_none());
    }

    #[test]
    fn compression_loop_terminates() {
        // A name that points at itself forever.
        let mut packet = alloc::vec![0u8; 64];
        packet[0..2].copy_from_slice(&[0, 9]);
        packet[2] = 0x80;
        packet[4..6].copy_from_slice(&1u16.to_be_bytes()); // QDCOUNT = 1
        packet[12] = 0xC0;
        packet[13] = 12; // pointer to itself
        assert!(parse_response(9, &packet).is_none());
    }

    #[test]
    fn skip_name_handles_pointer() {
        // "abc" at 12, then at 20 a pointer back to 12.
        let mut packet = alloc::vec![0u8; 32];
        packet[12] = 3;
        packet[13..16].copy_from_slice(b"abc");
        packet[16] = 0;
        packet[20] = 0xC0;
        packet[21] = 12;
        assert_eq!(skip_name(&packet, 12), Some(17));
        assert_eq!(skip_name(&packet, 20), Some(22));
    }

    #[test]
    fn cache_respects_ttl_and_floor() {
        let mut state = DnsState::new();
        state.cache_store("example.test", 42, 10, 0); // floored to 60 s
        assert_eq!(state.cache_lookup("example.test", 59_999), Some(42));
        assert_eq!(state.cache_lookup("example.test", 60_000), None);
    }

    #[test]
    fn cache_evicts_oldest_when_full() {
        let mut state = DnsState::new();
        for i in 0..CACHE_SIZE as u32 {
            let name = alloc::format!("host{i}.test");
            state.cache_store(&name, i, 300, u64::from(i) * 1000);
        }
        state.cache_store("newcomer.test", 99, 300, 100_000);
        // host0 (oldest) was evicted; the rest survive.
        assert_eq!(state.cache_lookup("host0.test", 100_001), None);
        assert_eq!(state.cache_lookup("host1.test", 100_001), Some(1));
        assert_eq!(state.cache_lookup("newcomer.test", 100_001), Some(99));
    }

    #[test]
    fn second_resolve_hits_cache_without_traffic() {
        // The S5 scenario: resolve via a stub resolver once, then observe
        // the second lookup answered from cache with no packet emitted.
        let (mut stack, frames) = testutil::stack();
        stack.arp.insert(stack.config.dns_server, [0xAA; 6], 0);

        assert_eq!(stack.dns_resolve_start("example.test", 0), Ok(None));
        let query_count = frames.lock().unwrap().len();
        assert_eq!(query_count, 1);

        // Extract the query and synthesize the resolver's reply.
        let sent = frames.lock().unwrap()[0].clone();
        let udp_payload =
            sent[ethernet::HEADER_SIZE + ipv4::HEADER_SIZE + crate::net::udp::HEADER_SIZE..].to_vec();
        let ip = ipv4_addr(203, 0, 113, 5);
        let response = answer_for(&udp_payload, ip, 300);
        stack.dns_on_datagram(&response);

        assert_eq!(stack.dns_take_answer("example.test", 10), Some(ip));

        // Second resolve: cache hit, no new frames.
        assert_eq!(stack.dns_resolve_start("example.test", 5_000), Ok(Some(ip)));
        assert_eq!(frames.lock().unwrap().len(), query_count);
    }
}
