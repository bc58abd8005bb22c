//! Bounds-checked header access over raw frame memory.
//!
//! Every header layer is loaded through [`FrameView::header`], which refuses
//! to read unless the whole header lies inside the frame. Header structs are
//! byte-aligned so a load never depends on the alignment of the frame start.

use crate::{ETH_HLEN, IGMP_HLEN, IP_HLEN};

/// Plain-old-data header that can be read from any byte offset.
///
/// # Safety
///
/// Implementors must be `repr(C)`, have alignment 1 and be valid for every
/// bit pattern.
pub unsafe trait Header: Copy {
    const LEN: usize = core::mem::size_of::<Self>();
}

/// A read-only view of one captured frame.
pub trait FrameView {
    /// Number of bytes between the frame start and its end.
    fn len(&self) -> usize;

    /// Load the header of type `T` starting at `offset`.
    ///
    /// Returns `None` unless `offset + size_of::<T>() <= len()`.
    fn header<T: Header>(&self, offset: usize) -> Option<T>;
}

impl FrameView for [u8] {
    #[inline(always)]
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    #[inline(always)]
    fn header<T: Header>(&self, offset: usize) -> Option<T> {
        let end = offset.checked_add(T::LEN)?;
        let bytes = self.get(offset..end)?;
        // SAFETY: `bytes` spans exactly size_of::<T>() bytes and `T: Header`
        // accepts any bit pattern at any alignment.
        Some(unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const T) })
    }
}

// ---------------------------------------------------------------------------
// Header Layouts
// ---------------------------------------------------------------------------

/// Ethernet II header.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct EthHdr {
    pub dst_addr: [u8; 6],
    pub src_addr: [u8; 6],
    pub ether_type: [u8; 2],
}

unsafe impl Header for EthHdr {}

impl EthHdr {
    #[inline(always)]
    pub fn ether_type(&self) -> u16 {
        u16::from_be_bytes(self.ether_type)
    }
}

/// IPv4 header without options.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Ipv4Hdr {
    pub version_ihl: u8,
    pub tos: u8,
    pub tot_len: [u8; 2],
    pub id: [u8; 2],
    pub frag_off: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub check: [u8; 2],
    pub src_addr: [u8; 4],
    pub dst_addr: [u8; 4],
}

unsafe impl Header for Ipv4Hdr {}

impl Ipv4Hdr {
    /// Header length in bytes, options included.
    #[inline(always)]
    pub fn header_len(&self) -> usize {
        ((self.version_ihl & 0x0F) as usize) * 4
    }

    /// Whether the destination lies in 224.0.0.0/4.
    #[inline(always)]
    pub fn is_multicast_dst(&self) -> bool {
        self.dst_addr[0] & 0xF0 == 0xE0
    }
}

/// IGMPv1/v2 message header.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct IgmpHdr {
    pub kind: u8,
    pub max_resp: u8,
    pub check: [u8; 2],
    pub group: [u8; 4],
}

unsafe impl Header for IgmpHdr {}

impl IgmpHdr {
    /// Group address as a raw network-byte-order word.
    #[inline(always)]
    pub fn group_raw(&self) -> u32 {
        u32::from_ne_bytes(self.group)
    }
}

const _: () = {
    assert!(core::mem::size_of::<EthHdr>() == ETH_HLEN);
    assert!(core::mem::size_of::<Ipv4Hdr>() == IP_HLEN);
    assert!(core::mem::size_of::<IgmpHdr>() == IGMP_HLEN);
    assert!(core::mem::align_of::<Ipv4Hdr>() == 1);
};
