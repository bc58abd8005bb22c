//! XDP programs for IGMP snooping and multicast fanout.
//!
//! `xdp_downstream` is attached to every subscriber-facing link. It consumes
//! IGMP traffic and reports joins/leaves to userspace through `EVENTS`.
//!
//! `xdp_upstream` is attached to the link facing the multicast source. It
//! broadcasts multicast data to every interface in `FWD_MAP`, which the
//! userspace control loop keeps in sync with the observed memberships.

#![no_std]
#![no_main]

use aya_ebpf::{
    macros::{map, xdp},
    maps::{DevMapHash, RingBuf},
    programs::XdpContext,
};

use igmp_snoop_common::{forward, monitor, EVENTS_RINGBUF_SIZE, MAX_SUBSCRIBERS};

mod runtime;

use runtime::{DevMapLookup, RingBufSink, XdpFrame};

// ---------------------------------------------------------------------------
// eBPF Maps
// ---------------------------------------------------------------------------

/// Membership events for the userspace control loop.
#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(EVENTS_RINGBUF_SIZE, 0);

/// Broadcast set: slot → downstream ifindex. Userspace keeps the slots
/// contiguous from 0, so slot 0 is present iff anyone is subscribed.
#[map]
static FWD_MAP: DevMapHash = DevMapHash::with_max_entries(MAX_SUBSCRIBERS, 0);

// ---------------------------------------------------------------------------
// XDP Entry Points
// ---------------------------------------------------------------------------

/// Downstream monitor.
///
/// Returns:
/// - `XDP_DROP`: IGMP frame (reported or ignored)
/// - `XDP_PASS`: anything else, including truncated frames
#[xdp]
pub fn xdp_downstream(ctx: XdpContext) -> u32 {
    let ifindex = unsafe { (*ctx.ctx).ingress_ifindex };
    let frame = XdpFrame::new(&ctx);
    let mut sink = RingBufSink::new(&ctx, &EVENTS);

    runtime::action(monitor::monitor(&frame, ifindex, &mut sink), &FWD_MAP)
}

/// Upstream forwarder.
///
/// Returns:
/// - `XDP_REDIRECT`: multicast data broadcast to every subscribed downstream
/// - `XDP_PASS`: unicast, IGMP, truncated, or no subscribers
#[xdp]
pub fn xdp_upstream(ctx: XdpContext) -> u32 {
    let frame = XdpFrame::new(&ctx);
    let table = DevMapLookup::new(&FWD_MAP);

    runtime::action(forward::forward(&frame, &table), &FWD_MAP)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
