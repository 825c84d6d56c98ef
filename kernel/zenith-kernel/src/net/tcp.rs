//! Transmission Control Protocol (simplified).
//!
//! Active-open client connections only: Closed → SynSent → Established →
//! (FinWait1/FinWait2 | CloseWait) → TimeWait → Closed. One segment in
//! flight at a time with a fixed 1-second retransmission timeout, in-order
//! receive buffering into an 8 KiB ring with immediate ACKs, MSS 1460, and
//! no congestion control beyond the peer's advertised window.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::{NetError, NetStack, ipv4};

/// TCP header length without options.
pub const HEADER_SIZE: usize = 20;

/// Maximum segment size we send.
pub const MSS: usize = 1460;

/// Fixed retransmission timeout.
pub const RTO_MS: u64 = 1000;

/// Handshake gives up after this long.
pub const HANDSHAKE_TIMEOUT_MS: u64 = 3000;

/// TIME_WAIT lingers this long before the slot is reclaimed.
pub const TIME_WAIT_MS: u64 = 2 * RTO_MS;

/// Receive ring capacity per connection.
pub const RECV_BUFFER: usize = 8192;

/// Connection table capacity.
pub const MAX_CONNECTIONS: usize = 8;

/// First ephemeral local port.
const EPHEMERAL_BASE: u16 = 49152;

/// Header flag bits.
pub mod flags {
    /// No more data from sender.
    pub const FIN: u8 = 0x01;
    /// Synchronize sequence numbers.
    pub const SYN: u8 = 0x02;
    /// Reset the connection.
    pub const RST: u8 = 0x04;
    /// Push buffered data.
    pub const PSH: u8 = 0x08;
    /// Acknowledgment field significant.
    pub const ACK: u8 = 0x10;
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    /// No connection.
    Closed,
    /// SYN sent, waiting for SYN|ACK.
    SynSent,
    /// Data flows.
    Established,
    /// We sent FIN, waiting for its ACK.
    FinWait1,
    /// Our FIN is acked, waiting for the peer's.
    FinWait2,
    /// Peer sent FIN; we may still send.
    CloseWait,
    /// Both sides done; lingering before reuse.
    TimeWait,
}

/// A segment we sent and may need to retransmit.
struct InFlight {
    seq: u32,
    flags: u8,
    payload: Vec<u8>,
    sent_at_ms: u64,
}

/// One connection's state.
pub struct Connection {
    local_port: u16,
    remote_ip: u32,
    remote_port: u16,
    state: TcpState,
    /// Next sequence number we will send.
    snd_next: u32,
    /// Oldest unacknowledged sequence number.
    snd_una: u32,
    /// Next sequence number we expect from the peer.
    rcv_next: u32,
    /// Peer's advertised receive window.
    peer_window: u16,
    /// In-order received bytes awaiting `recv`.
    rx: VecDeque<u8>,
    /// The single retransmittable segment in flight.
    in_flight: Option<InFlight>,
    /// When the SYN went out (handshake timeout) or TIME_WAIT began.
    timer_started_ms: u64,
    /// Peer sent RST during handshake.
    refused: bool,
    /// Peer's FIN has been consumed (EOF after the ring drains).
    peer_closed: bool,
}

impl Connection {
    /// Current state.
    #[must_use]
    pub fn state(&self) -> TcpState {
        self.state
    }

    /// Bytes waiting in the receive ring.
    #[must_use]
    pub fn rx_available(&self) -> usize {
        self.rx.len()
    }

    fn advertised_window(&self) -> u16 {
        (RECV_BUFFER - self.rx.len()).min(usize::from(u16::MAX)) as u16
    }
}

/// The connection table.
pub struct ConnTable {
    conns: [Option<Connection>; MAX_CONNECTIONS],
    next_ephemeral: u16,
    /// Initial send sequence counter, bumped per connection.
    next_isn: u32,
}

impl ConnTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            conns: [const { None }; MAX_CONNECTIONS],
            next_ephemeral: EPHEMERAL_BASE,
            next_isn: 0x0001_0000,
        }
    }

    /// Reference to a live connection.
    pub fn get(&self, index: usize) -> Result<&Connection, NetError> {
        self.conns
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(NetError::BadSocket)
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut Connection, NetError> {
        self.conns
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(NetError::BadSocket)
    }

    fn find(&mut self, local_port: u16, remote_ip: u32, remote_port: u16) -> Option<usize> {
        self.conns.iter().position(|c| {
            c.as_ref().is_some_and(|c| {
                c.local_port == local_port && c.remote_ip == remote_ip && c.remote_port == remote_port
            })
        })
    }
}

impl Default for ConnTable {
    fn default() -> Self {
        Self::new()
    }
}

/// `true` when sequence number `a` precedes `b` (wrap-aware).
fn seq_before(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) > 0
}

/// Serializes one TCP segment with the pseudo-header checksum filled in.
#[allow(clippy::too_many_arguments)]
fn build_segment(
    src_ip: u32,
    dst_ip: u32,
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flag_bits: u8,
    window: u16,
    payload: &[u8],
) -> Vec<u8> {
    let len = HEADER_SIZE + payload.len();
    let mut segment = alloc::vec![0u8; len];
    segment[0..2].copy_from_slice(&src_port.to_be_bytes());
    segment[2..4].copy_from_slice(&dst_port.to_be_bytes());
    segment[4..8].copy_from_slice(&seq.to_be_bytes());
    segment[8..12].copy_from_slice(&ack.to_be_bytes());
    segment[12] = (5 << 4) as u8; // data offset: 5 dwords, no options
    segment[13] = flag_bits;
    segment[14..16].copy_from_slice(&window.to_be_bytes());
    segment[HEADER_SIZE..].copy_from_slice(payload);

    let sum = ipv4::pseudo_header_checksum(src_ip, dst_ip, ipv4::PROTO_TCP, len as u16, &segment);
    segment[16..18].copy_from_slice(&sum.to_be_bytes());
    segment
}

/// A parsed inbound segment header.
struct SegmentView<'a> {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flag_bits: u8,
    window: u16,
    payload: &'a [u8],
}

fn parse_segment(data: &[u8]) -> Option<SegmentView<'_>> {
    if data.len() < HEADER_SIZE {
        return None;
    }
    let data_offset = usize::from(data[12] >> 4) * 4;
    if data_offset < HEADER_SIZE || data_offset > data.len() {
        return None;
    }
    Some(SegmentView {
        src_port: u16::from_be_bytes([data[0], data[1]]),
        dst_port: u16::from_be_bytes([data[2], data[3]]),
        seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        flag_bits: data[13],
        window: u16::from_be_bytes([data[14], data[15]]),
        payload: &data[data_offset..],
    })
}

impl NetStack {
    fn tcp_emit(
        &mut self,
        remote_ip: u32,
        local_port: u16,
        remote_port: u16,
        seq: u32,
        ack: u32,
        flag_bits: u8,
        window: u16,
        payload: &[u8],
        now_ms: u64,
    ) {
        let segment = build_segment(
            self.config.ip,
            remote_ip,
            local_port,
            remote_port,
            seq,
            ack,
            flag_bits,
            window,
            payload,
        );
        let _ = self.ipv4_send(remote_ip, ipv4::PROTO_TCP, &segment, now_ms);
    }

    /// Opens a connection: allocates a slot and sends the SYN.
    ///
    /// Returns the connection index; poll [`NetStack::tcp_state`] for
    /// `Established` (the blocking wrapper does this with the 3 s budget).
    pub(crate) fn tcp_connect_start(
        &mut self,
        remote_ip: u32,
        remote_port: u16,
        now_ms: u64,
    ) -> Result<usize, NetError> {
        let slot = self
            .tcp
            .conns
            .iter()
            .position(Option::is_none)
            .ok_or(NetError::NoFreeSockets)?;

        let local_port = self.tcp.next_ephemeral;
        self.tcp.next_ephemeral = if self.tcp.next_ephemeral == u16::MAX {
            EPHEMERAL_BASE
        } else {
            self.tcp.next_ephemeral + 1
        };
        let isn = self.tcp.next_isn;
        self.tcp.next_isn = self.tcp.next_isn.wrapping_add(0x1_0000);

        self.tcp.conns[slot] = Some(Connection {
            local_port,
            remote_ip,
            remote_port,
            state: TcpState::SynSent,
            snd_next: isn.wrapping_add(1),
            snd_una: isn,
            rcv_next: 0,
            peer_window: u16::MAX,
            rx: VecDeque::new(),
            in_flight: None,
            timer_started_ms: now_ms,
            refused: false,
            peer_closed: false,
        });

        self.tcp_emit(
            remote_ip,
            local_port,
            remote_port,
            isn,
            0,
            flags::SYN,
            RECV_BUFFER as u16,
            &[],
            now_ms,
        );
        Ok(slot)
    }

    /// Handles a received TCP segment.
    pub(crate) fn tcp_input(&mut self, src_ip: u32, dst_ip: u32, data: &[u8], now_ms: u64) {
        let Some(view) = parse_segment(data) else {
            return;
        };
        // Verify the pseudo-header checksum over the whole segment.
        if ipv4::pseudo_header_checksum(src_ip, dst_ip, ipv4::PROTO_TCP, data.len() as u16, data) != 0 {
            return;
        }

        let Some(index) = self.tcp.find(view.dst_port, src_ip, view.src_port) else {
            return;
        };

        // Pull out the response parameters while mutating the connection,
        // then emit after the borrow ends.
        let mut response: Option<(u32, u32, u8)> = None; // (seq, ack, flags)
        let (remote_ip, local_port, remote_port, window);
        {
            let conn = self.tcp.conns[index].as_mut().expect("index from find");
            remote_ip = conn.remote_ip;
            local_port = conn.local_port;
            remote_port = conn.remote_port;
            conn.peer_window = view.window;

            if view.flag_bits & flags::RST != 0 {
                // The slot stays allocated so callers observe the refusal.
                conn.refused = conn.state == TcpState::SynSent;
                conn.state = TcpState::Closed;
                return;
            }

            match conn.state {
                TcpState::SynSent => {
                    let expects_syn_ack = view.flag_bits & (flags::SYN | flags::ACK) == (flags::SYN | flags::ACK);
                    if expects_syn_ack && view.ack == conn.snd_next {
                        conn.rcv_next = view.seq.wrapping_add(1);
                        conn.snd_una = view.ack;
                        conn.state = TcpState::Established;
                        response = Some((conn.snd_next, conn.rcv_next, flags::ACK));
                    }
                }
                TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2 => {
                    // Acknowledgment processing.
                    if view.flag_bits & flags::ACK != 0 && seq_before(conn.snd_una, view.ack) {
                        conn.snd_una = view.ack;
                        if let Some(in_flight) = &conn.in_flight {
                            let end = in_flight.seq.wrapping_add(in_flight.payload.len() as u32);
                            if !seq_before(view.ack, end.wrapping_add(u32::from(in_flight.flags & flags::FIN))) {
                                conn.in_flight = None;
                            }
                        }
                        if conn.state == TcpState::FinWait1 && view.ack == conn.snd_next {
                            conn.state = TcpState::FinWait2;
                        }
                    }

                    // In-order data lands in the ring; anything else only
                    // re-triggers an ACK of what we have.
                    let mut advanced = false;
                    if !view.payload.is_empty() {
                        if view.seq == conn.rcv_next {
                            let space = RECV_BUFFER - conn.rx.len();
                            let take = view.payload.len().min(space);
                            conn.rx.extend(view.payload[..take].iter().copied());
                            conn.rcv_next = conn.rcv_next.wrapping_add(take as u32);
                            advanced = true;
                        }
                        response = Some((conn.snd_next, conn.rcv_next, flags::ACK));
                    }

                    // The peer's FIN is consumable only once all data before
                    // it has been taken in order.
                    if view.flag_bits & flags::FIN != 0 {
                        let fin_seq = view.seq.wrapping_add(view.payload.len() as u32);
                        if fin_seq == conn.rcv_next || (advanced && fin_seq == conn.rcv_next) {
                            conn.rcv_next = conn.rcv_next.wrapping_add(1);
                            conn.peer_closed = true;
                            conn.state = match conn.state {
                                TcpState::Established => TcpState::CloseWait,
                                // Our FIN is acked (or crossing): wait out 2*RTO.
                                TcpState::FinWait1 | TcpState::FinWait2 => {
                                    conn.timer_started_ms = now_ms;
                                    TcpState::TimeWait
                                }
                                other => other,
                            };
                        }
                        response = Some((conn.snd_next, conn.rcv_next, flags::ACK));
                    }
                }
                TcpState::TimeWait => {
                    // Re-ack anything (a retransmitted FIN, usually).
                    response = Some((conn.snd_next, conn.rcv_next, flags::ACK));
                }
                TcpState::CloseWait | TcpState::Closed => {}
            }
            window = conn.advertised_window();
        }

        if let Some((seq, ack, flag_bits)) = response {
            self.tcp_emit(remote_ip, local_port, remote_port, seq, ack, flag_bits, window, &[], now_ms);
        }
    }

    /// Queues up to one MSS of `data` for transmission.
    ///
    /// Returns the number of bytes taken, or zero while a segment is still
    /// in flight (the blocking wrapper retries).
    pub(crate) fn tcp_send_data(
        &mut self,
        index: usize,
        data: &[u8],
        now_ms: u64,
    ) -> Result<usize, NetError> {
        let conn = self.tcp.conns.get_mut(index).and_then(Option::as_mut).ok_or(NetError::BadSocket)?;
        match conn.state {
            TcpState::Established | TcpState::CloseWait => {}
            TcpState::Closed if conn.refused => return Err(NetError::Refused),
            _ => return Err(NetError::NotConnected),
        }
        if conn.in_flight.is_some() {
            return Ok(0);
        }

        let take = data.len().min(MSS).min(usize::from(conn.peer_window));
        if take == 0 {
            return Ok(0);
        }

        let seq = conn.snd_next;
        let payload = Vec::from(&data[..take]);
        conn.snd_next = conn.snd_next.wrapping_add(take as u32);
        conn.in_flight = Some(InFlight {
            seq,
            flags: flags::ACK | flags::PSH,
            payload: payload.clone(),
            sent_at_ms: now_ms,
        });
        let (remote_ip, local_port, remote_port, ack, window) =
            (conn.remote_ip, conn.local_port, conn.remote_port, conn.rcv_next, conn.advertised_window());

        self.tcp_emit(
            remote_ip,
            local_port,
            remote_port,
            seq,
            ack,
            flags::ACK | flags::PSH,
            window,
            &payload,
            now_ms,
        );
        Ok(take)
    }

    /// Drains up to `buf.len()` bytes from the receive ring.
    ///
    /// `Ok(0)` means no data *and* the peer has closed (EOF); `Ok(None)` is
    /// represented by the caller retrying on `NotReady`.
    pub(crate) fn tcp_recv_data(&mut self, index: usize, buf: &mut [u8]) -> Result<Option<usize>, NetError> {
        let conn = self.tcp.conns.get_mut(index).and_then(Option::as_mut).ok_or(NetError::BadSocket)?;
        if conn.refused {
            return Err(NetError::Refused);
        }
        if conn.rx.is_empty() {
            // EOF once the peer closed and the ring is drained.
            if conn.peer_closed || conn.state == TcpState::Closed {
                return Ok(Some(0));
            }
            return Ok(None);
        }
        let n = buf.len().min(conn.rx.len());
        for byte in buf.iter_mut().take(n) {
            *byte = conn.rx.pop_front().expect("ring length checked");
        }
        Ok(Some(n))
    }

    /// Begins closing: sends FIN and advances the state machine.
    pub(crate) fn tcp_close_start(&mut self, index: usize, now_ms: u64) -> Result<(), NetError> {
        let conn = self.tcp.conns.get_mut(index).and_then(Option::as_mut).ok_or(NetError::BadSocket)?;
        let (remote_ip, local_port, remote_port) = (conn.remote_ip, conn.local_port, conn.remote_port);
        let (seq, ack, window);

        match conn.state {
            TcpState::Established => {
                seq = conn.snd_next;
                conn.snd_next = conn.snd_next.wrapping_add(1);
                conn.state = TcpState::FinWait1;
                (ack, window) = (conn.rcv_next, conn.advertised_window());
            }
            TcpState::CloseWait => {
                seq = conn.snd_next;
                conn.snd_next = conn.snd_next.wrapping_add(1);
                // Simplified passive close: linger in TIME_WAIT instead of
                // tracking LAST_ACK separately.
                conn.state = TcpState::TimeWait;
                conn.timer_started_ms = now_ms;
                (ack, window) = (conn.rcv_next, conn.advertised_window());
            }
            TcpState::SynSent | TcpState::Closed => {
                self.tcp.conns[index] = None;
                return Ok(());
            }
            _ => return Ok(()),
        }

        self.tcp_emit(
            remote_ip,
            local_port,
            remote_port,
            seq,
            ack,
            flags::FIN | flags::ACK,
            window,
            &[],
            now_ms,
        );
        Ok(())
    }

    /// Current state of a connection slot.
    pub(crate) fn tcp_state(&self, index: usize) -> Result<TcpState, NetError> {
        Ok(self.tcp.get(index)?.state())
    }

    /// `true` if the peer refused the connection.
    pub(crate) fn tcp_refused(&self, index: usize) -> bool {
        self.tcp.get(index).is_ok_and(|c| c.refused)
    }

    /// Timer pass: retransmits the in-flight segment after the RTO, fails
    /// handshakes after 3 s, and reclaims expired TIME_WAIT slots.
    pub(crate) fn tcp_poll(&mut self, now_ms: u64) {
        for index in 0..MAX_CONNECTIONS {
            let Some(conn) = self.tcp.conns[index].as_mut() else {
                continue;
            };

            match conn.state {
                TcpState::SynSent => {
                    if now_ms.saturating_sub(conn.timer_started_ms) >= HANDSHAKE_TIMEOUT_MS {
                        conn.state = TcpState::Closed;
                    }
                }
                TcpState::TimeWait => {
                    if now_ms.saturating_sub(conn.timer_started_ms) >= TIME_WAIT_MS {
                        self.tcp.conns[index] = None;
                        continue;
                    }
                }
                _ => {}
            }

            let Some(conn) = self.tcp.conns[index].as_mut() else {
                continue;
            };
            let retransmit = conn.in_flight.as_ref().is_some_and(|f| {
                now_ms.saturating_sub(f.sent_at_ms) >= RTO_MS
            });
            if retransmit {
                let (remote_ip, local_port, remote_port, ack, window) = (
                    conn.remote_ip,
                    conn.local_port,
                    conn.remote_port,
                    conn.rcv_next,
                    conn.advertised_window(),
                );
                let in_flight = conn.in_flight.as_mut().expect("checked above");
                in_flight.sent_at_ms = now_ms;
                let (seq, flag_bits, payload) = (in_flight.seq, in_flight.flags, in_flight.payload.clone());
                self.tcp_emit(remote_ip, local_port, remote_port, seq, ack, flag_bits, window, &payload, now_ms);
            }
        }
    }

    /// Releases a connection slot outright (socket close on a dead conn).
    pub(crate) fn tcp_release(&mut self, index: usize) {
        if index < MAX_CONNECTIONS {
            self.tcp.conns[index] = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testutil;
    use crate::net::{ethernet, ipv4_addr};

    const PEER_IP: u32 = ipv4_addr(10, 0, 68, 1);
    const PEER_MAC: [u8; 6] = [0xAA; 6];
    const PEER_PORT: u16 = 80;

    fn connected_stack() -> (NetStack, std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>>, usize, u32, u16) {
        let (mut stack, frames) = testutil::stack();
        stack.arp.insert(PEER_IP, PEER_MAC, 0);

        let index = stack.tcp_connect_start(PEER_IP, PEER_PORT, 0).unwrap();
        let syn = last_tcp(&frames);
        assert_eq!(syn.flag_bits, flags::SYN);
        let local_port = syn.src_port;
        let client_isn = syn.seq;

        // Peer's SYN|ACK with its own ISN.
        let peer_isn = 0x8000_0000u32;
        feed(&mut stack, peer_isn, client_isn.wrapping_add(1), flags::SYN | flags::ACK, &[], 1);
        assert_eq!(stack.tcp_state(index), Ok(TcpState::Established));

        // Our ACK completes the handshake.
        let ack = last_tcp(&frames);
        assert_eq!(ack.flag_bits, flags::ACK);
        assert_eq!(ack.ack, peer_isn.wrapping_add(1));

        (stack, frames, index, client_isn, local_port)
    }

    /// Parsed view of the last transmitted TCP segment.
    struct SentSegment {
        src_port: u16,
        seq: u32,
        ack: u32,
        flag_bits: u8,
        payload: Vec<u8>,
    }

    fn last_tcp(frames: &std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>>) -> SentSegment {
        let frames = frames.lock().unwrap();
        let frame = frames.last().expect("no frames transmitted");
        let tcp = &frame[ethernet::HEADER_SIZE + ipv4::HEADER_SIZE..];
        SentSegment {
            src_port: u16::from_be_bytes([tcp[0], tcp[1]]),
            seq: u32::from_be_bytes([tcp[4], tcp[5], tcp[6], tcp[7]]),
            ack: u32::from_be_bytes([tcp[8], tcp[9], tcp[10], tcp[11]]),
            flag_bits: tcp[13],
            payload: tcp[HEADER_SIZE..].to_vec(),
        }
    }

    /// Injects a segment from the peer into the stack.
    fn feed(stack: &mut NetStack, seq: u32, ack: u32, flag_bits: u8, payload: &[u8], now: u64) {
        // Find our local port from the connection table.
        let local_port = stack
            .tcp
            .conns
            .iter()
            .flatten()
            .next()
            .map(|c| c.local_port)
            .unwrap();
        let segment = build_segment(
            PEER_IP,
            stack.config.ip,
            PEER_PORT,
            local_port,
            seq,
            ack,
            flag_bits,
            0x4000,
            payload,
        );
        stack.tcp_input(PEER_IP, stack.config.ip, &segment, now);
    }

    #[test]
    fn handshake_reaches_established() {
        let (_stack, _frames, _index, _isn, _port) = connected_stack();
    }

    #[test]
    fn in_order_data_is_buffered_and_acked() {
        let (mut stack, frames, index, _isn, _port) = connected_stack();
        let peer_seq = 0x8000_0001u32;

        feed(&mut stack, peer_seq, 0, flags::ACK | flags::PSH, b"hello ", 2);
        feed(&mut stack, peer_seq + 6, 0, flags::ACK | flags::PSH, b"world", 3);

        let mut buf = [0u8; 32];
        assert_eq!(stack.tcp_recv_data(index, &mut buf), Ok(Some(11)));
        assert_eq!(&buf[..11], b"hello world");

        // The last ACK acknowledges everything received.
        let ack = last_tcp(&frames);
        assert_eq!(ack.flag_bits, flags::ACK);
        assert_eq!(ack.ack, peer_seq + 11);
    }

    #[test]
    fn out_of_order_segment_reacked_not_buffered() {
        let (mut stack, frames, index, _isn, _port) = connected_stack();
        let peer_seq = 0x8000_0001u32;

        // A gap: segment arrives 10 bytes early.
        feed(&mut stack, peer_seq + 10, 0, flags::ACK | flags::PSH, b"future", 2);

        let mut buf = [0u8; 16];
        assert_eq!(stack.tcp_recv_data(index, &mut buf), Ok(None));
        // Duplicate ACK re-asserts the expected sequence.
        let ack = last_tcp(&frames);
        assert_eq!(ack.ack, peer_seq);
    }

    #[test]
    fn send_emits_and_ack_clears_in_flight() {
        let (mut stack, frames, index, isn, _port) = connected_stack();

        assert_eq!(stack.tcp_send_data(index, b"GET /\r\n", 10), Ok(7));
        let seg = last_tcp(&frames);
        assert_eq!(seg.payload, b"GET /\r\n");
        assert_eq!(seg.seq, isn.wrapping_add(1));

        // Second send is refused while the first is unacked.
        assert_eq!(stack.tcp_send_data(index, b"more", 11), Ok(0));

        // The peer's ACK frees the pipe.
        feed(&mut stack, 0x8000_0001, isn.wrapping_add(8), flags::ACK, &[], 12);
        assert_eq!(stack.tcp_send_data(index, b"more", 13), Ok(4));
    }

    #[test]
    fn unacked_segment_retransmits_after_rto() {
        let (mut stack, frames, index, _isn, _port) = connected_stack();

        stack.tcp_send_data(index, b"data", 100).unwrap();
        let count_after_send = frames.lock().unwrap().len();

        stack.tcp_poll(100 + RTO_MS - 1);
        assert_eq!(frames.lock().unwrap().len(), count_after_send);

        stack.tcp_poll(100 + RTO_MS);
        assert_eq!(frames.lock().unwrap().len(), count_after_send + 1);
        let retrans = last_tcp(&frames);
        assert_eq!(retrans.payload, b"data");
    }

    #[test]
    fn peer_fin_moves_to_close_wait_and_eof() {
        let (mut stack, frames, index, _isn, _port) = connected_stack();
        let peer_seq = 0x8000_0001u32;

        feed(&mut stack, peer_seq, 0, flags::ACK | flags::PSH, b"bye", 2);
        feed(&mut stack, peer_seq + 3, 0, flags::FIN | flags::ACK, &[], 3);
        assert_eq!(stack.tcp_state(index), Ok(TcpState::CloseWait));

        // The FIN is acknowledged one past the data.
        let ack = last_tcp(&frames);
        assert_eq!(ack.ack, peer_seq + 4);

        let mut buf = [0u8; 8];
        assert_eq!(stack.tcp_recv_data(index, &mut buf), Ok(Some(3)));
        // Drained ring + peer closed = EOF.
        assert_eq!(stack.tcp_recv_data(index, &mut buf), Ok(Some(0)));
    }

    #[test]
    fn active_close_walks_fin_wait_to_time_wait() {
        let (mut stack, frames, index, isn, _port) = connected_stack();

        stack.tcp_close_start(index, 5).unwrap();
        assert_eq!(stack.tcp_state(index), Ok(TcpState::FinWait1));
        let fin = last_tcp(&frames);
        assert_eq!(fin.flag_bits, flags::FIN | flags::ACK);

        // Peer acks our FIN.
        feed(&mut stack, 0x8000_0001, isn.wrapping_add(2), flags::ACK, &[], 6);
        assert_eq!(stack.tcp_state(index), Ok(TcpState::FinWait2));

        // Peer's own FIN → TIME_WAIT, acked.
        feed(&mut stack, 0x8000_0001, isn.wrapping_add(2), flags::FIN | flags::ACK, &[], 7);
        assert_eq!(stack.tcp_state(index), Ok(TcpState::TimeWait));

        // The slot recycles after 2×RTO.
        stack.tcp_poll(7 + TIME_WAIT_MS);
        assert_eq!(stack.tcp_state(index), Err(NetError::BadSocket));
    }

    #[test]
    fn rst_during_handshake_is_refused() {
        let (mut stack, frames) = testutil::stack();
        stack.arp.insert(PEER_IP, PEER_MAC, 0);
        let index = stack.tcp_connect_start(PEER_IP, PEER_PORT, 0).unwrap();
        let syn = last_tcp(&frames);

        feed(&mut stack, 0, syn.seq.wrapping_add(1), flags::RST | flags::ACK, &[], 1);
        assert_eq!(stack.tcp_state(index), Ok(TcpState::Closed));
        assert!(stack.tcp_refused(index));
    }

    #[test]
    fn handshake_times_out() {
        let (mut stack, _frames) = testutil::stack();
        stack.arp.insert(PEER_IP, PEER_MAC, 0);
        let index = stack.tcp_connect_start(PEER_IP, PEER_PORT, 1_000).unwrap();

        stack.tcp_poll(1_000 + HANDSHAKE_TIMEOUT_MS - 1);
        assert_eq!(stack.tcp_state(index), Ok(TcpState::SynSent));
        stack.tcp_poll(1_000 + HANDSHAKE_TIMEOUT_MS);
        assert_eq!(stack.tcp_state(index), Ok(TcpState::Closed));
    }

    #[test]
    fn corrupt_checksum_ignored() {
        let (mut stack, _frames, index, _isn, _port) = {
            let (s, f, i, isn, p) = connected_stack();
            (s, f, i, isn, p)
        };
        let local_port = stack.tcp.conns[index].as_ref().unwrap().local_port;

        let mut segment = build_segment(
            PEER_IP,
            stack.config.ip,
            PEER_PORT,
            local_port,
            0x8000_0001,
            0,
            flags::ACK | flags::PSH,
            0x4000,
            b"evil",
        );
        segment[HEADER_SIZE] ^= 0xFF;
        stack.tcp_input(PEER_IP, stack.config.ip, &segment, 2);

        let mut buf = [0u8; 8];
        assert_eq!(stack.tcp_recv_data(index, &mut buf), Ok(None));
    }

    #[test]
    fn receive_window_shrinks_with_buffered_data() {
        let (mut stack, frames, _index, _isn, _port) = connected_stack();
        feed(&mut stack, 0x8000_0001, 0, flags::ACK | flags::PSH, &[0x55; 1000], 2);
        let ack = last_tcp(&frames);
        let _ = ack;
        let conn = stack.tcp.conns.iter().flatten().next().unwrap();
        assert_eq!(conn.advertised_window() as usize, RECV_BUFFER - 1000);
    }
}
