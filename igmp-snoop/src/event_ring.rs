//! In-process event channel.
//!
//! A fixed-capacity lock-free single-producer single-consumer ring with the
//! same contract as the kernel `EVENTS` buffer: the producer reserves or
//! fails, the consumer polls with a timeout. It lets the monitor and the
//! control loop run end to end without a kernel.

use std::cell::UnsafeCell;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use igmp_snoop_common::{EventSink, MembershipEvent};

use crate::channel::EventSource;

/// Cache-aligned wrapper to keep the two cursors on separate lines.
#[repr(align(64))]
struct CacheAligned<T>(T);

struct Ring {
    slots: Box<[UnsafeCell<MembershipEvent>]>,
    mask: u64,
    /// Next sequence number the consumer will read.
    head: CacheAligned<AtomicU64>,
    /// Next sequence number the producer will publish.
    tail: CacheAligned<AtomicU64>,
    dropped: AtomicU64,
}

// SAFETY: Ring is Sync because:
// - only the single RingProducer writes, and only to slots in [tail, head + capacity)
// - only the single RingConsumer reads, and only slots in [head, tail)
// - publication of a slot is ordered by the Release store of `tail`
unsafe impl Sync for Ring {}

/// Create a lock-free single-producer single-consumer event ring.
///
/// # Panics
/// Panics if `capacity` is not a power of two.
pub fn event_ring(capacity: usize) -> (RingProducer, RingConsumer) {
    assert!(capacity.is_power_of_two(), "capacity must be power of 2");

    let empty = MembershipEvent {
        kind: 0,
        group: 0,
        ifindex: 0,
    };
    let slots: Vec<UnsafeCell<MembershipEvent>> =
        (0..capacity).map(|_| UnsafeCell::new(empty)).collect();

    let ring = Arc::new(Ring {
        slots: slots.into_boxed_slice(),
        mask: capacity as u64 - 1,
        head: CacheAligned(AtomicU64::new(0)),
        tail: CacheAligned(AtomicU64::new(0)),
        dropped: AtomicU64::new(0),
    });

    (
        RingProducer { ring: ring.clone() },
        RingConsumer { ring },
    )
}

/// Producer handle. Never blocks: a full ring drops the new event.
pub struct RingProducer {
    ring: Arc<Ring>,
}

impl RingProducer {
    /// Number of events discarded because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.ring.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for RingProducer {
    fn submit(&mut self, event: MembershipEvent) -> bool {
        let ring = &*self.ring;
        let tail = ring.tail.0.load(Ordering::Relaxed);
        let head = ring.head.0.load(Ordering::Acquire);

        if tail - head > ring.mask {
            ring.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let pos = (tail & ring.mask) as usize;
        unsafe {
            *ring.slots[pos].get() = event;
        }
        ring.tail.0.store(tail + 1, Ordering::Release);
        true
    }
}

/// Consumer handle.
pub struct RingConsumer {
    ring: Arc<Ring>,
}

impl RingConsumer {
    /// Take the oldest published event, if any.
    pub fn pop(&mut self) -> Option<MembershipEvent> {
        let ring = &*self.ring;
        let head = ring.head.0.load(Ordering::Relaxed);
        let tail = ring.tail.0.load(Ordering::Acquire);
        if head == tail {
            return None;
        }

        let pos = (head & ring.mask) as usize;
        let event = unsafe { *ring.slots[pos].get() };
        ring.head.0.store(head + 1, Ordering::Release);
        Some(event)
    }

    pub fn len(&self) -> usize {
        let tail = self.ring.tail.0.load(Ordering::Acquire);
        let head = self.ring.head.0.load(Ordering::Relaxed);
        (tail - head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSource for RingConsumer {
    fn poll(
        &mut self,
        timeout: Duration,
        handler: &mut dyn FnMut(MembershipEvent),
    ) -> io::Result<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut handled = 0;
            while let Some(event) = self.pop() {
                handler(event);
                handled += 1;
            }
            if handled > 0 {
                return Ok(handled);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(1)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use igmp_snoop_common::EventKind;

    fn ev(n: u32) -> MembershipEvent {
        MembershipEvent::new(EventKind::Join, u32::from_ne_bytes([239, 0, 0, n as u8]), n)
    }

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = event_ring(8);
        for i in 0..5 {
            assert!(tx.submit(ev(i)));
        }

        let mut seen = Vec::new();
        let n = rx.poll(Duration::from_millis(10), &mut |e| seen.push(e.ifindex)).unwrap();
        assert_eq!(n, 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_full_ring_drops_new_events() {
        let (mut tx, mut rx) = event_ring(4);
        for i in 0..4 {
            assert!(tx.submit(ev(i)));
        }
        assert!(!tx.submit(ev(99)));
        assert_eq!(tx.dropped(), 1);
        assert_eq!(rx.len(), 4);

        // Oldest events survive, the rejected one never appears.
        assert_eq!(rx.pop().map(|e| e.ifindex), Some(0));
        assert!(tx.submit(ev(5)));

        let mut seen = Vec::new();
        rx.poll(Duration::ZERO, &mut |e| seen.push(e.ifindex)).unwrap();
        assert_eq!(seen, vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_poll_timeout() {
        let (_tx, mut rx) = event_ring(4);
        let start = Instant::now();
        let n = rx.poll(Duration::from_millis(20), &mut |_| panic!("no events expected")).unwrap();
        assert_eq!(n, 0);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(rx.is_empty());
    }

    #[test]
    fn test_cross_thread_order() {
        const N: u32 = 10_000;
        let (mut tx, mut rx) = event_ring(64);

        let producer = std::thread::spawn(move || {
            let mut i = 0;
            while i < N {
                if tx.submit(ev(i)) {
                    i += 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });

        let mut seen = Vec::with_capacity(N as usize);
        while seen.len() < N as usize {
            rx.poll(Duration::from_millis(10), &mut |e| seen.push(e.ifindex))
                .unwrap();
        }
        producer.join().unwrap();

        assert!(seen.iter().copied().eq(0..N));
    }
}
