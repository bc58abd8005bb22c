//! Userspace writer for the kernel forwarding table (`FWD_MAP`).
//!
//! Subscribed interfaces occupy the contiguous slots `0..n`. The upstream
//! forwarder only checks slot 0 before broadcasting, so the table is treated
//! as "someone is subscribed" exactly when slot 0 is present.

use anyhow::{bail, Context, Result};
use aya::maps::{DevMapHash, MapData};
use tracing::debug;

use igmp_snoop_common::{ForwardingLookup, MAX_SUBSCRIBERS};

/// Backing storage addressed by slot.
pub trait SlotStore {
    fn set(&mut self, slot: u32, ifindex: u32) -> Result<()>;
    fn clear(&mut self, slot: u32) -> Result<()>;
}

impl SlotStore for DevMapHash<MapData> {
    fn set(&mut self, slot: u32, ifindex: u32) -> Result<()> {
        self.insert(slot, ifindex, None, 0)
            .with_context(|| format!("writing FWD_MAP slot {} = ifindex {}", slot, ifindex))
    }

    fn clear(&mut self, slot: u32) -> Result<()> {
        self.remove(slot)
            .with_context(|| format!("clearing FWD_MAP slot {}", slot))
    }
}

/// Mirror of the kernel table plus the store it writes through to.
///
/// Invariants:
/// - `slots[i]` is the ifindex held by slot `i` in the store;
/// - an ifindex appears at most once;
/// - `slots.len() <= MAX_SUBSCRIBERS`.
pub struct ForwardingTable<S> {
    store: S,
    slots: Vec<u32>,
}

impl<S: SlotStore> ForwardingTable<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            slots: Vec::with_capacity(MAX_SUBSCRIBERS as usize),
        }
    }

    /// Interfaces currently receiving broadcast clones, in slot order.
    pub fn interfaces(&self) -> &[u32] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[cfg(test)]
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn contains(&self, ifindex: u32) -> bool {
        self.slots.contains(&ifindex)
    }

    /// Register `ifindex`. Returns `false` if it was already present.
    pub fn add(&mut self, ifindex: u32) -> Result<bool> {
        if self.contains(ifindex) {
            return Ok(false);
        }
        if self.slots.len() >= MAX_SUBSCRIBERS as usize {
            bail!(
                "forwarding table full ({} interfaces), cannot add ifindex {}",
                MAX_SUBSCRIBERS,
                ifindex
            );
        }

        let slot = self.slots.len() as u32;
        self.store.set(slot, ifindex)?;
        self.slots.push(ifindex);

        debug!(ifindex, slot, "added interface to forwarding table");
        Ok(true)
    }

    /// Unregister `ifindex`. Returns `false` if it was not present.
    ///
    /// The last slot is cleared before its interface is moved into the hole,
    /// so a concurrent reader may briefly miss that interface but never sees
    /// it twice.
    pub fn remove(&mut self, ifindex: u32) -> Result<bool> {
        let pos = match self.slots.iter().position(|&i| i == ifindex) {
            Some(p) => p,
            None => return Ok(false),
        };
        let last = self.slots.len() - 1;

        self.store.clear(last as u32)?;
        if pos != last {
            let moved = self.slots[last];
            if let Err(e) = self.store.set(pos as u32, moved) {
                // Keep the mirror honest: the moved interface is gone from the store.
                self.slots.truncate(last);
                return Err(e.context(format!("moving ifindex {} into slot {}", moved, pos)));
            }
        }
        self.slots.swap_remove(pos);

        debug!(ifindex, slot = pos, "removed interface from forwarding table");
        Ok(true)
    }
}

impl<S> ForwardingLookup for ForwardingTable<S> {
    fn is_occupied(&self, slot: u32) -> bool {
        (slot as usize) < self.slots.len()
    }
}
