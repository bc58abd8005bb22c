//! Per-interface group membership learned from IGMP reports.
//!
//! There is no aging: an interface stays subscribed to a group until a Leave
//! for that group is seen on it.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use igmp_snoop_common::EventKind;

/// Effect of one event on the set of subscribed interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First group joined on this interface.
    Subscribed(u32),
    /// Last group left on this interface.
    Unsubscribed(u32),
    /// Interface subscription state did not change.
    Unchanged,
}

#[derive(Debug, Default)]
pub struct MembershipTracker {
    by_interface: BTreeMap<u32, BTreeSet<Ipv4Addr>>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, kind: EventKind, group: Ipv4Addr, ifindex: u32) -> Transition {
        match kind {
            EventKind::Join => {
                let groups = self.by_interface.entry(ifindex).or_default();
                let first = groups.is_empty();
                groups.insert(group);
                if first {
                    Transition::Subscribed(ifindex)
                } else {
                    Transition::Unchanged
                }
            }
            EventKind::Leave => {
                let Some(groups) = self.by_interface.get_mut(&ifindex) else {
                    return Transition::Unchanged;
                };
                if !groups.remove(&group) || !groups.is_empty() {
                    return Transition::Unchanged;
                }
                self.by_interface.remove(&ifindex);
                Transition::Unsubscribed(ifindex)
            }
        }
    }

    pub fn is_subscribed(&self, ifindex: u32) -> bool {
        self.by_interface.contains_key(&ifindex)
    }

    /// Interfaces with at least one joined group, ascending.
    pub fn interfaces(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_interface.keys().copied()
    }

    pub fn groups(&self, ifindex: u32) -> impl Iterator<Item = &Ipv4Addr> {
        self.by_interface.get(&ifindex).into_iter().flatten()
    }

    pub fn snapshot(&self) -> MembershipSnapshot {
        let mut groups = BTreeMap::<Ipv4Addr, Vec<u32>>::new();
        for (&ifindex, set) in &self.by_interface {
            for &group in set {
                groups.entry(group).or_default().push(ifindex);
            }
        }
        MembershipSnapshot {
            interfaces: self.by_interface.keys().copied().collect(),
            groups,
        }
    }
}

/// Read-only copy of the membership state published for other tasks.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MembershipSnapshot {
    /// Interfaces with at least one group, ascending.
    pub interfaces: Vec<u32>,
    /// Group → interfaces that joined it.
    pub groups: BTreeMap<Ipv4Addr, Vec<u32>>,
}
