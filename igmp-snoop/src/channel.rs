//! Consumer side of the event channel.
//!
//! In production the channel is the kernel `EVENTS` ring buffer, read through
//! [`RingBufSource`].

use std::io;
use std::os::fd::AsRawFd;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use aya::maps::{MapData, RingBuf};
use tracing::warn;

use igmp_snoop_common::MembershipEvent;

use crate::control::ControlStats;

/// Polling consumer of membership events.
pub trait EventSource {
    /// Wait up to `timeout` for events and hand every completed record to
    /// `handler`, in channel order.
    ///
    /// Returns the number of events handled; `Ok(0)` means the timeout
    /// expired. An `Interrupted` error asks the caller to stop.
    fn poll(
        &mut self,
        timeout: Duration,
        handler: &mut dyn FnMut(MembershipEvent),
    ) -> io::Result<usize>;
}

// ---------------------------------------------------------------------------
// Kernel Ring Buffer
// ---------------------------------------------------------------------------

/// Reads the `EVENTS` BPF ring buffer.
pub struct RingBufSource {
    ring: RingBuf<MapData>,
    stats: Arc<ControlStats>,
}

impl RingBufSource {
    pub fn new(ring: RingBuf<MapData>, stats: Arc<ControlStats>) -> Self {
        Self { ring, stats }
    }

    fn drain(&mut self, handler: &mut dyn FnMut(MembershipEvent)) -> usize {
        let mut handled = 0;
        while let Some(item) = self.ring.next() {
            if dispatch_record(&item, &self.stats, handler) {
                handled += 1;
            }
        }
        handled
    }
}

impl EventSource for RingBufSource {
    fn poll(
        &mut self,
        timeout: Duration,
        handler: &mut dyn FnMut(MembershipEvent),
    ) -> io::Result<usize> {
        let handled = self.drain(handler);
        if handled > 0 {
            return Ok(handled);
        }

        let mut pfd = libc::pollfd {
            fd: self.ring.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        if ret == 0 {
            return Ok(0);
        }

        Ok(self.drain(handler))
    }
}

/// Decode one ring buffer record and hand it to `handler`.
///
/// Records of the wrong size are counted as malformed and skipped. Returns
/// whether an event was delivered.
fn dispatch_record(
    record: &[u8],
    stats: &ControlStats,
    handler: &mut dyn FnMut(MembershipEvent),
) -> bool {
    match MembershipEvent::from_bytes(record) {
        Some(event) => {
            handler(event);
            true
        }
        None => {
            stats.malformed.fetch_add(1, Ordering::Relaxed);
            warn!(len = record.len(), "skipping event record of unexpected size");
            false
        }
    }
}
