//! Adapters between the shared decision logic and the XDP runtime.

use aya_ebpf::{
    bindings::{xdp_action, BPF_F_BROADCAST},
    maps::{DevMapHash, RingBuf},
    programs::XdpContext,
};
use aya_log_ebpf::debug;

use igmp_snoop_common::{
    frame::{FrameView, Header},
    EventSink, ForwardingLookup, MembershipEvent, Verdict, FORWARDING_SLOT,
};

// ---------------------------------------------------------------------------
// Frame Access
// ---------------------------------------------------------------------------

/// Packet memory of the current XDP invocation.
pub struct XdpFrame<'a> {
    ctx: &'a XdpContext,
}

impl<'a> XdpFrame<'a> {
    #[inline(always)]
    pub fn new(ctx: &'a XdpContext) -> Self {
        Self { ctx }
    }
}

impl FrameView for XdpFrame<'_> {
    #[inline(always)]
    fn len(&self) -> usize {
        self.ctx.data_end() - self.ctx.data()
    }

    /// The comparison against `data_end` is what the verifier tracks, so it
    /// must be made on packet pointers right before the load.
    #[inline(always)]
    fn header<T: Header>(&self, offset: usize) -> Option<T> {
        let start = self.ctx.data();
        let end = self.ctx.data_end();
        if start + offset + T::LEN > end {
            return None;
        }
        Some(unsafe { core::ptr::read_unaligned((start + offset) as *const T) })
    }
}

// ---------------------------------------------------------------------------
// Event Channel
// ---------------------------------------------------------------------------

/// Reserve-or-fail producer over the `EVENTS` ring buffer.
pub struct RingBufSink<'a> {
    ctx: &'a XdpContext,
    ring: &'a RingBuf,
}

impl<'a> RingBufSink<'a> {
    #[inline(always)]
    pub fn new(ctx: &'a XdpContext, ring: &'a RingBuf) -> Self {
        Self { ctx, ring }
    }
}

impl EventSink for RingBufSink<'_> {
    #[inline(always)]
    fn submit(&mut self, event: MembershipEvent) -> bool {
        match self.ring.reserve::<MembershipEvent>(0) {
            Some(mut entry) => {
                entry.write(event);
                entry.submit(0);
                true
            }
            None => {
                debug!(
                    self.ctx,
                    "event channel full, lost kind={} ifindex={}", event.kind, event.ifindex
                );
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Forwarding Table
// ---------------------------------------------------------------------------

pub struct DevMapLookup<'a> {
    map: &'a DevMapHash,
}

impl<'a> DevMapLookup<'a> {
    #[inline(always)]
    pub fn new(map: &'a DevMapHash) -> Self {
        Self { map }
    }
}

impl ForwardingLookup for DevMapLookup<'_> {
    #[inline(always)]
    fn is_occupied(&self, slot: u32) -> bool {
        self.map.get(slot).is_some()
    }
}

// ---------------------------------------------------------------------------
// Verdict → XDP action
// ---------------------------------------------------------------------------

/// Translate a verdict into the XDP return code.
///
/// A broadcast redirect that the kernel refuses falls back to `XDP_PASS`.
#[inline(always)]
pub fn action(verdict: Verdict, fwd_map: &DevMapHash) -> u32 {
    match verdict {
        Verdict::Pass => xdp_action::XDP_PASS,
        Verdict::Drop => xdp_action::XDP_DROP,
        Verdict::Redirect => fwd_map
            .redirect(FORWARDING_SLOT, BPF_F_BROADCAST as u64)
            .unwrap_or(xdp_action::XDP_PASS),
    }
}
