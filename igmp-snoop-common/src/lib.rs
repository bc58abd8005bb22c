//! Shared types between the igmp-snoop userspace daemon and eBPF programs.
//!
//! This crate is `no_std` compatible so it can be used in eBPF programs.
//! All map key/value types are `repr(C)` for stable ABI across eBPF and userspace.
//!
//! The packet decisions themselves also live here ([`monitor`] and
//! [`forward`]) so the exact code that runs in the XDP programs can be driven
//! from userspace over plain byte slices.

#![cfg_attr(not(test), no_std)]

pub mod forward;
pub mod frame;
pub mod monitor;

/// Maximum number of interfaces in the forwarding table.
/// This is a compile-time bound for eBPF map sizing.
pub const MAX_SUBSCRIBERS: u32 = 128;

/// The forwarding table slot consulted by the upstream forwarder.
///
/// Forwarding is all-or-nothing: every interface in the table receives every
/// multicast stream, so the lookup only needs to know whether the table is
/// populated. The userspace writer keeps slot 0 occupied whenever it is.
pub const FORWARDING_SLOT: u32 = 0;

/// Size of the event ring buffer in bytes (must be a power-of-two multiple of the page size).
pub const EVENTS_RINGBUF_SIZE: u32 = 1 << 20;

// ---------------------------------------------------------------------------
// Membership Events
// ---------------------------------------------------------------------------

/// Kind of membership change observed on a downstream link.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Join = 1,
    Leave = 2,
}

impl EventKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(EventKind::Join),
            2 => Some(EventKind::Leave),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Join => "join",
            EventKind::Leave => "leave",
        }
    }
}

/// Membership change record carried from the downstream monitor to the
/// control loop through the `EVENTS` ring buffer.
///
/// Wire layout: three native-endian `u32` fields, 12 bytes, no padding.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MembershipEvent {
    /// Raw [`EventKind`] discriminant (1 = join, 2 = leave).
    pub kind: u32,
    /// Multicast group address, network byte order exactly as on the wire.
    pub group: u32,
    /// Interface index the report was received on.
    pub ifindex: u32,
}

#[cfg(feature = "userspace")]
unsafe impl aya::Pod for MembershipEvent {}

impl MembershipEvent {
    /// Size of one record in the ring buffer.
    pub const LEN: usize = core::mem::size_of::<MembershipEvent>();

    #[inline(always)]
    pub fn new(kind: EventKind, group: u32, ifindex: u32) -> Self {
        Self {
            kind: kind as u32,
            group,
            ifindex,
        }
    }

    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_raw(self.kind)
    }

    /// Group address as an [`Ipv4Addr`](core::net::Ipv4Addr).
    ///
    /// `group` holds the wire bytes in memory order, so the native-endian
    /// byte view is the dotted-quad order.
    pub fn group_addr(&self) -> core::net::Ipv4Addr {
        core::net::Ipv4Addr::from(self.group.to_ne_bytes())
    }

    /// Decode one record as delivered by the ring buffer.
    ///
    /// Returns `None` if the record has the wrong size.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() != Self::LEN {
            return None;
        }
        let word = |i: usize| u32::from_ne_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Some(Self {
            kind: word(0),
            group: word(4),
            ifindex: word(8),
        })
    }
}

// ---------------------------------------------------------------------------
// Seams between the decision logic and its environment
// ---------------------------------------------------------------------------

/// Producer side of the event channel.
///
/// Implementations must never block: if there is no room for the record the
/// event is discarded and `false` is returned.
pub trait EventSink {
    fn submit(&mut self, event: MembershipEvent) -> bool;
}

/// Read-only view of the forwarding table from the data path.
pub trait ForwardingLookup {
    /// Whether `slot` currently holds an interface.
    fn is_occupied(&self, slot: u32) -> bool;
}

/// Terminal decision for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Leave the frame to the regular network stack.
    Pass,
    /// Consume the frame here.
    Drop,
    /// Clone the frame to every interface in the forwarding table.
    Redirect,
}

// ---------------------------------------------------------------------------
// eBPF Map Names (must match between eBPF program and userspace loader)
// ---------------------------------------------------------------------------

/// Map name: RingBuf of MembershipEvent, downstream monitor to control loop.
pub const MAP_EVENTS: &str = "EVENTS";

/// Map name: DevMapHash<u32, ifindex>, broadcast set for the upstream forwarder.
pub const MAP_FORWARDING: &str = "FWD_MAP";

/// Program name: XDP program attached to every downstream link.
pub const PROG_DOWNSTREAM: &str = "xdp_downstream";

/// Program name: XDP program attached to the upstream link.
pub const PROG_UPSTREAM: &str = "xdp_upstream";

// ---------------------------------------------------------------------------
// Protocol Constants
// ---------------------------------------------------------------------------

/// Ethernet header size.
pub const ETH_HLEN: usize = 14;

/// Minimum IPv4 header size (no options).
pub const IP_HLEN: usize = 20;

/// IGMP header size (type, max resp time, checksum, group).
pub const IGMP_HLEN: usize = 8;

/// EtherType for IPv4.
pub const ETH_P_IP: u16 = 0x0800;

/// IP protocol number for IGMP.
pub const IPPROTO_IGMP: u8 = 2;

/// IP protocol number for UDP.
pub const IPPROTO_UDP: u8 = 17;

/// IGMP type reported as a legacy membership report.
pub const IGMP_LEGACY_MEMBERSHIP_REPORT: u8 = 0x11;

/// IGMPv2 membership report.
pub const IGMP_V2_MEMBERSHIP_REPORT: u8 = 0x16;

/// IGMPv2 leave group.
pub const IGMP_LEAVE_GROUP: u8 = 0x17;
