//! Control loop: consume membership events and maintain the forwarding table.
//!
//! Runs on a dedicated thread. Each iteration polls the event channel with a
//! bounded timeout, then checks the shutdown flag, so a stop request is
//! honoured within one poll interval and never in the middle of a record.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use tracing::{debug, error, info, warn};

use igmp_snoop_common::{EventKind, MembershipEvent};

use crate::channel::EventSource;
use crate::fwd_table::{ForwardingTable, SlotStore};
use crate::membership::{MembershipSnapshot, MembershipTracker, Transition};

/// Counters shared with the metrics endpoint.
#[derive(Debug, Default)]
pub struct ControlStats {
    pub joins: AtomicU64,
    pub leaves: AtomicU64,
    /// Records with an unknown kind or an unexpected size.
    pub malformed: AtomicU64,
    /// Failed writes to the forwarding table.
    pub table_errors: AtomicU64,
    /// Interfaces currently in the forwarding table.
    pub forwarding_interfaces: AtomicU64,
}

pub struct ControlLoop<S> {
    tracker: MembershipTracker,
    table: Option<ForwardingTable<S>>,
    stats: Arc<ControlStats>,
    snapshot: Arc<ArcSwap<MembershipSnapshot>>,
}

impl<S: SlotStore> ControlLoop<S> {
    /// `table` is `None` when forwarding management is disabled; events are
    /// then only logged and tracked.
    pub fn new(
        table: Option<ForwardingTable<S>>,
        stats: Arc<ControlStats>,
        snapshot: Arc<ArcSwap<MembershipSnapshot>>,
    ) -> Self {
        Self {
            tracker: MembershipTracker::new(),
            table,
            stats,
            snapshot,
        }
    }

    #[cfg(test)]
    pub fn table(&self) -> Option<&ForwardingTable<S>> {
        self.table.as_ref()
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &MembershipTracker {
        &self.tracker
    }

    /// Poll `source` until `shutdown` is set or the poll is interrupted.
    pub fn run<E: EventSource>(
        &mut self,
        source: &mut E,
        timeout: Duration,
        shutdown: &AtomicBool,
    ) -> Result<()> {
        info!(timeout = ?timeout, "entering control loop");

        while !shutdown.load(Ordering::Relaxed) {
            match self.poll_once(source, timeout) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    info!("event poll interrupted, leaving control loop");
                    break;
                }
                Err(e) => return Err(e).context("polling event channel"),
            }
        }

        info!("control loop exited");
        Ok(())
    }

    /// One bounded poll of the channel.
    pub fn poll_once<E: EventSource>(
        &mut self,
        source: &mut E,
        timeout: Duration,
    ) -> io::Result<usize> {
        let mut changed = false;
        let handled = source.poll(timeout, &mut |event| changed |= self.handle(&event))?;

        if changed {
            self.snapshot.store(Arc::new(self.tracker.snapshot()));
        }
        Ok(handled)
    }

    /// Apply one event. Returns whether the membership state changed.
    pub fn handle(&mut self, event: &MembershipEvent) -> bool {
        let kind = match event.kind() {
            Some(k) => k,
            None => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(kind = event.kind, ifindex = event.ifindex, "ignoring event of unknown kind");
                return false;
            }
        };

        info!(
            kind = kind.as_str(),
            group = %event.group_addr(),
            ifindex = event.ifindex,
            "membership event"
        );

        match kind {
            EventKind::Join => self.stats.joins.fetch_add(1, Ordering::Relaxed),
            EventKind::Leave => self.stats.leaves.fetch_add(1, Ordering::Relaxed),
        };

        let transition = self.tracker.apply(kind, event.group_addr(), event.ifindex);
        match transition {
            Transition::Subscribed(ifindex) => debug!(ifindex, "first group joined"),
            Transition::Unsubscribed(ifindex) => debug!(ifindex, "last group left"),
            Transition::Unchanged => debug!(
                ifindex = event.ifindex,
                groups = self.tracker.groups(event.ifindex).count(),
                "interface subscription unchanged"
            ),
        }

        let Some(table) = self.table.as_mut() else {
            return true;
        };

        if let Err(e) = reconcile(&self.tracker, table) {
            self.stats.table_errors.fetch_add(1, Ordering::Relaxed);
            error!(error = %format!("{:#}", e), "failed to update forwarding table");
        }
        self.stats
            .forwarding_interfaces
            .store(table.len() as u64, Ordering::Relaxed);

        true
    }
}

/// Bring the forwarding table in line with the subscribed interfaces.
///
/// Runs on every event, so an interface left out by a failed write is
/// retried on the next report from any interface.
fn reconcile<S: SlotStore>(
    tracker: &MembershipTracker,
    table: &mut ForwardingTable<S>,
) -> Result<()> {
    let mut first_err = None;

    let stale: Vec<u32> = table
        .interfaces()
        .iter()
        .copied()
        .filter(|&ifindex| !tracker.is_subscribed(ifindex))
        .collect();
    for ifindex in stale {
        match table.remove(ifindex) {
            Ok(_) => info!(ifindex, "interface unsubscribed, forwarding disabled"),
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }

    for ifindex in tracker.interfaces() {
        if table.contains(ifindex) {
            continue;
        }
        match table.add(ifindex) {
            Ok(_) => info!(ifindex, "interface subscribed, forwarding enabled"),
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }

    first_err.map_or(Ok(()), Err)
}
