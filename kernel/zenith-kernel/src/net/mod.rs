//! Network stack core: Ethernet → ARP → IPv4 → {ICMP, UDP, TCP} plus a DNS
//! resolver and the socket layer behind the syscall surface.
//!
//! Every IPv4 address in the stack is kept in network byte order from the
//! moment it is parsed to the moment it is serialized; only display code
//! unpacks octets. The NIC driver is an external collaborator implementing
//! [`NetDevice`]; received frames enter through [`NetStack::on_frame`].

pub mod arp;
pub mod dns;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod socket;
pub mod tcp;
pub mod udp;

use alloc::boxed::Box;
use core::fmt;

use zenith_core::sync::SpinLock;

/// A 48-bit Ethernet address.
pub type MacAddr = [u8; 6];

/// The Ethernet broadcast address.
pub const BROADCAST_MAC: MacAddr = [0xFF; 6];

/// Errors surfaced by the network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// No NIC driver has been registered.
    NoDevice,
    /// Next-hop MAC could not be resolved in time.
    Unreachable,
    /// A bounded wait expired.
    Timeout,
    /// Input was malformed or too large to serialize.
    BadPacket,
    /// The requested local port is already bound.
    PortInUse,
    /// The socket or binding table is full.
    NoFreeSockets,
    /// The descriptor does not name a live socket.
    BadSocket,
    /// The operation needs an established connection.
    NotConnected,
    /// Hostname exceeds what a DNS query can encode.
    NameTooLong,
    /// The peer reset the connection.
    Refused,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDevice => write!(f, "no network device"),
            Self::Unreachable => write!(f, "host unreachable"),
            Self::Timeout => write!(f, "timed out"),
            Self::BadPacket => write!(f, "malformed packet"),
            Self::PortInUse => write!(f, "port already bound"),
            Self::NoFreeSockets => write!(f, "socket table full"),
            Self::BadSocket => write!(f, "bad socket descriptor"),
            Self::NotConnected => write!(f, "not connected"),
            Self::NameTooLong => write!(f, "hostname too long"),
            Self::Refused => write!(f, "connection refused"),
        }
    }
}

/// Packs four octets `a.b.c.d` into a network-byte-order `u32`.
#[inline]
#[must_use]
pub const fn ipv4_addr(a: u8, b: u8, c: u8, d: u8) -> u32 {
    u32::from_le_bytes([a, b, c, d])
}

/// Unpacks a network-byte-order IPv4 address into octets.
#[inline]
#[must_use]
pub const fn ip_octets(ip: u32) -> [u8; 4] {
    ip.to_le_bytes()
}

/// The IPv4 limited-broadcast address (255.255.255.255).
pub const IP_BROADCAST: u32 = 0xFFFF_FFFF;

/// Display adapter for wire-order IPv4 addresses.
pub struct IpDisplay(pub u32);

impl fmt::Display for IpDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = ip_octets(self.0);
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

/// RFC 1071 Internet checksum over a sequence of byte slices.
///
/// Slices are folded as one logical buffer of big-endian 16-bit words; an
/// odd trailing byte is padded with zero. The complement of the final folded
/// sum is returned in host order (serialize with `to_be_bytes`).
#[must_use]
pub fn checksum(parts: &[&[u8]]) -> u16 {
    let mut sum: u32 = 0;
    let mut carry_byte: Option<u8> = None;

    for part in parts {
        let mut bytes = part.iter().copied();
        if let Some(high) = carry_byte.take() {
            match bytes.next() {
                Some(low) => sum += u32::from(u16::from_be_bytes([high, low])),
                None => {
                    carry_byte = Some(high);
                    continue;
                }
            }
        }
        loop {
            let Some(high) = bytes.next() else { break };
            match bytes.next() {
                Some(low) => sum += u32::from(u16::from_be_bytes([high, low])),
                None => {
                    carry_byte = Some(high);
                    break;
                }
            }
        }
    }
    if let Some(high) = carry_byte {
        sum += u32::from(u16::from_be_bytes([high, 0]));
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// The network interface contract a NIC driver implements.
pub trait NetDevice: Send {
    /// The device's MAC address.
    fn mac(&self) -> MacAddr;

    /// Queues one Ethernet frame for transmission. Returns `false` if the
    /// device rejected it.
    fn transmit(&mut self, frame: &[u8]) -> bool;
}

/// Static network configuration; every address is network byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetConfig {
    /// Our IPv4 address.
    pub ip: u32,
    /// Subnet mask.
    pub netmask: u32,
    /// Default gateway.
    pub gateway: u32,
    /// DNS resolver.
    pub dns_server: u32,
}

impl Default for NetConfig {
    /// QEMU user-mode networking defaults.
    fn default() -> Self {
        Self {
            ip: ipv4_addr(10, 0, 68, 99),
            netmask: ipv4_addr(255, 255, 255, 0),
            gateway: ipv4_addr(10, 0, 68, 1),
            dns_server: ipv4_addr(10, 0, 68, 1),
        }
    }
}

impl NetConfig {
    /// Whether `dest` is on our subnet.
    #[must_use]
    pub fn is_local_subnet(&self, dest: u32) -> bool {
        (dest & self.netmask) == (self.ip & self.netmask)
    }

    /// Next-hop address for `dest`: the host itself when local, otherwise
    /// the default gateway.
    #[must_use]
    pub fn next_hop(&self, dest: u32) -> u32 {
        if self.is_local_subnet(dest) || dest == IP_BROADCAST {
            dest
        } else {
            self.gateway
        }
    }
}

/// All mutable network state, guarded by one lock.
///
/// Protocol layers are implemented as `impl NetStack` blocks in their own
/// modules; this struct just owns the state they share.
pub struct NetStack {
    pub(crate) device: Box<dyn NetDevice>,
    /// Interface configuration.
    pub config: NetConfig,
    pub(crate) arp: arp::ArpCache,
    pub(crate) pending: ipv4::PendingQueue,
    pub(crate) ip_ident: u16,
    pub(crate) udp: udp::PortTable,
    pub(crate) tcp: tcp::ConnTable,
    pub(crate) dns: dns::DnsState,
    pub(crate) ping: icmp::PingState,
    pub(crate) sockets: socket::SocketTable,
}

impl NetStack {
    /// Creates a stack bound to `device`.
    #[must_use]
    pub fn new(device: Box<dyn NetDevice>, config: NetConfig) -> Self {
        Self {
            device,
            config,
            arp: arp::ArpCache::new(),
            pending: ipv4::PendingQueue::new(),
            ip_ident: 0,
            udp: udp::PortTable::new(),
            tcp: tcp::ConnTable::new(),
            dns: dns::DnsState::new(),
            ping: icmp::PingState::new(),
            sockets: socket::SocketTable::new(),
        }
    }

    /// Our MAC address.
    #[must_use]
    pub fn mac(&self) -> MacAddr {
        self.device.mac()
    }
}

// ---------------------------------------------------------------------------
// Global stack instance
// ---------------------------------------------------------------------------

static NET: SpinLock<Option<NetStack>> = SpinLock::new(None);

/// Brings the stack up over `device` and announces our address with a
/// gratuitous ARP.
pub fn init(device: Box<dyn NetDevice>) {
    let mut stack = NetStack::new(device, NetConfig::default());
    crate::kinfo!(
        "net: up, ip {} gw {} dns {}",
        IpDisplay(stack.config.ip),
        IpDisplay(stack.config.gateway),
        IpDisplay(stack.config.dns_server),
    );
    stack.arp_announce();

    let mut net = NET.lock();
    assert!(net.is_none(), "network stack already initialized");
    *net = Some(stack);
}

/// Runs a closure with the stack, or `Err(NoDevice)` before [`init`].
pub fn with_net<R>(f: impl FnOnce(&mut NetStack) -> R) -> Result<R, NetError> {
    let mut net = NET.lock();
    match net.as_mut() {
        Some(stack) => Ok(f(stack)),
        None => Err(NetError::NoDevice),
    }
}

/// RX entry point for the NIC driver's interrupt handler.
pub fn on_frame_received(frame: &[u8]) {
    let now = crate::time::now_ms();
    // Dropped silently when the stack is not up yet.
    let _ = with_net(|stack| stack.on_frame(frame, now));
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use alloc::vec::Vec;
    use std::sync::{Arc, Mutex};

    /// Mock NIC capturing transmitted frames.
    pub struct MockDevice {
        pub frames: Arc<Mutex<Vec<Vec<u8>>>>,
        pub mac: MacAddr,
    }

    impl MockDevice {
        pub fn new() -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
            let frames = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    frames: frames.clone(),
                    mac: [0x52, 0x54, 0x00, 0x12, 0x34, 0x56],
                },
                frames,
            )
        }
    }

    impl NetDevice for MockDevice {
        fn mac(&self) -> MacAddr {
            self.mac
        }

        fn transmit(&mut self, frame: &[u8]) -> bool {
            self.frames.lock().unwrap().push(frame.to_vec());
            true
        }
    }

    /// A fresh stack over a mock device, plus the captured-frame log.
    pub fn stack() -> (NetStack, Arc<Mutex<Vec<Vec<u8>>>>) {
        let (device, frames) = MockDevice::new();
        (NetStack::new(Box::new(device), NetConfig::default()), frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_addr_is_wire_order() {
        let ip = ipv4_addr(10, 0, 68, 99);
        assert_eq!(ip_octets(ip), [10, 0, 68, 99]);
        assert_eq!(alloc::format!("{}", IpDisplay(ip)), "10.0.68.99");
    }

    #[test]
    fn next_hop_local_vs_gateway() {
        let config = NetConfig::default();
        assert_eq!(config.next_hop(ipv4_addr(10, 0, 68, 5)), ipv4_addr(10, 0, 68, 5));
        assert_eq!(config.next_hop(ipv4_addr(192, 0, 2, 1)), config.gateway);
        assert_eq!(config.next_hop(IP_BROADCAST), IP_BROADCAST);
    }

    #[test]
    fn checksum_folds_to_zero_over_valid_data() {
        // A checksummed buffer re-checksummed including its own checksum
        // field yields zero.
        let mut packet = [0x45u8, 0x00, 0x00, 0x1C, 0xAB, 0xCD, 0x00, 0x00, 0x40, 0x11, 0, 0];
        let sum = checksum(&[&packet]);
        packet[10..12].copy_from_slice(&sum.to_be_bytes());
        assert_eq!(checksum(&[&packet]), 0);
    }

    #[test]
    fn checksum_handles_odd_length_and_split_parts() {
        let whole = checksum(&[&[0x01, 0x02, 0x03, 0x04, 0x05]]);
        let split = checksum(&[&[0x01], &[0x02, 0x03], &[], &[0x04, 0x05]]);
        assert_eq!(whole, split);
    }

    #[test]
    fn checksum_known_vector() {
        // RFC 1071 example words 0x0001 0xf203 0xf4f5 0xf6f7 → sum 0xddf2.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum(&[&data]), !0xddf2u16);
    }
}
