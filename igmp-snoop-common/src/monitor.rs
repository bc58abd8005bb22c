//! Downstream monitor: snoop IGMP membership traffic on subscriber links.
//!
//! IGMP frames never continue past this point. Reports and leaves are turned
//! into [`MembershipEvent`]s for the control loop and then dropped, every
//! other IGMP message is dropped silently. Non-IGMP traffic, and frames too
//! short to classify, are passed to the regular stack untouched.

use crate::frame::{EthHdr, FrameView, Header, IgmpHdr, Ipv4Hdr};
use crate::{
    EventKind, EventSink, MembershipEvent, Verdict, ETH_P_IP, IGMP_LEAVE_GROUP,
    IGMP_LEGACY_MEMBERSHIP_REPORT, IGMP_V2_MEMBERSHIP_REPORT, IPPROTO_IGMP, IP_HLEN,
};

/// Map an IGMP message type to the membership change it announces.
#[inline(always)]
pub fn classify(igmp_type: u8) -> Option<EventKind> {
    match igmp_type {
        IGMP_LEGACY_MEMBERSHIP_REPORT | IGMP_V2_MEMBERSHIP_REPORT => Some(EventKind::Join),
        IGMP_LEAVE_GROUP => Some(EventKind::Leave),
        _ => None,
    }
}

/// Process one frame received on the downstream link `ifindex`.
///
/// At most one event is submitted to `sink`. A full sink loses the event but
/// does not change the verdict.
#[inline(always)]
pub fn monitor<F, S>(frame: &F, ifindex: u32, sink: &mut S) -> Verdict
where
    F: FrameView + ?Sized,
    S: EventSink,
{
    // --- Parse Ethernet header ---
    let eth: EthHdr = match frame.header(0) {
        Some(h) => h,
        None => return Verdict::Pass,
    };
    if eth.ether_type() != ETH_P_IP {
        return Verdict::Pass;
    }

    // --- Parse IPv4 header ---
    let ip: Ipv4Hdr = match frame.header(EthHdr::LEN) {
        Some(h) => h,
        None => return Verdict::Pass,
    };
    if ip.proto != IPPROTO_IGMP {
        return Verdict::Pass;
    }

    let ip_hdr_len = ip.header_len();
    if ip_hdr_len < IP_HLEN {
        return Verdict::Pass;
    }

    // --- Parse IGMP header (after any IP options, e.g. Router Alert) ---
    let igmp: IgmpHdr = match frame.header(EthHdr::LEN + ip_hdr_len) {
        Some(h) => h,
        None => return Verdict::Pass,
    };

    let group = igmp.group_raw();
    if group == 0 {
        return Verdict::Drop;
    }

    let kind = match classify(igmp.kind) {
        Some(k) => k,
        None => return Verdict::Drop,
    };

    // Lost events are tolerated: the host repeats its report on the next query.
    let _ = sink.submit(MembershipEvent::new(kind, group, ifindex));

    Verdict::Drop
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{ETH_HLEN, IGMP_HLEN, IPPROTO_UDP};

    /// Sink with a fixed number of free slots.
    pub(crate) struct VecSink {
        pub events: Vec<MembershipEvent>,
        pub capacity: usize,
    }

    impl VecSink {
        pub(crate) fn new(capacity: usize) -> Self {
            Self {
                events: Vec::new(),
                capacity,
            }
        }
    }

    impl EventSink for VecSink {
        fn submit(&mut self, event: MembershipEvent) -> bool {
            if self.events.len() >= self.capacity {
                return false;
            }
            self.events.push(event);
            true
        }
    }

    /// Build an Ethernet + IPv4 (+ options) frame carrying `payload`.
    pub(crate) fn ipv4_frame(proto: u8, dst: [u8; 4], options: &[u8], payload: &[u8]) -> Vec<u8> {
        let ihl = (IP_HLEN + options.len()) / 4;
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0x01, 0x00, 0x5e, 0x01, 0x01, 0x01]);
        buf.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x07]);
        buf.extend_from_slice(&ETH_P_IP.to_be_bytes());

        let tot_len = (ihl * 4 + payload.len()) as u16;
        buf.push(0x40 | ihl as u8);
        buf.push(0);
        buf.extend_from_slice(&tot_len.to_be_bytes());
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf.push(1);
        buf.push(proto);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&[10, 0, 0, 2]);
        buf.extend_from_slice(&dst);
        buf.extend_from_slice(options);
        buf.extend_from_slice(payload);
        buf
    }

    pub(crate) fn igmp_frame(igmp_type: u8, group: [u8; 4]) -> Vec<u8> {
        let payload = [igmp_type, 0, 0, 0, group[0], group[1], group[2], group[3]];
        ipv4_frame(IPPROTO_IGMP, group, &[], &payload)
    }

    #[test]
    fn test_v2_report_is_join() {
        let frame = igmp_frame(IGMP_V2_MEMBERSHIP_REPORT, [239, 1, 1, 1]);
        let mut sink = VecSink::new(8);

        assert_eq!(monitor(&frame[..], 7, &mut sink), Verdict::Drop);
        assert_eq!(sink.events.len(), 1);

        let ev = sink.events[0];
        assert_eq!(ev.kind(), Some(EventKind::Join));
        assert_eq!(ev.group_addr(), core::net::Ipv4Addr::new(239, 1, 1, 1));
        assert_eq!(ev.group, u32::from_ne_bytes([239, 1, 1, 1]));
        assert_eq!(ev.ifindex, 7);
    }

    #[test]
    fn test_classification() {
        for (igmp_type, expected) in [
            (0x11u8, Some(EventKind::Join)),
            (0x16, Some(EventKind::Join)),
            (0x17, Some(EventKind::Leave)),
        ] {
            let frame = igmp_frame(igmp_type, [239, 0, 0, 9]);
            let mut sink = VecSink::new(8);
            assert_eq!(monitor(&frame[..], 3, &mut sink), Verdict::Drop);
            assert_eq!(sink.events.first().and_then(|e| e.kind()), expected);
        }
    }

    #[test]
    fn test_unknown_types_dropped_without_event() {
        for igmp_type in [0x00u8, 0x12, 0x22, 0x30, 0xff] {
            let frame = igmp_frame(igmp_type, [239, 0, 0, 9]);
            let mut sink = VecSink::new(8);
            assert_eq!(monitor(&frame[..], 3, &mut sink), Verdict::Drop);
            assert!(sink.events.is_empty(), "type {:#x} emitted an event", igmp_type);
        }
    }

    #[test]
    fn test_zero_group_rejected() {
        for igmp_type in [0x11u8, 0x16, 0x17] {
            let frame = igmp_frame(igmp_type, [0, 0, 0, 0]);
            let mut sink = VecSink::new(8);
            assert_eq!(monitor(&frame[..], 3, &mut sink), Verdict::Drop);
            assert!(sink.events.is_empty());
        }
    }

    #[test]
    fn test_full_channel_still_drops() {
        let frame = igmp_frame(IGMP_LEAVE_GROUP, [239, 1, 1, 1]);
        let mut sink = VecSink::new(0);
        assert_eq!(monitor(&frame[..], 7, &mut sink), Verdict::Drop);
        assert!(sink.events.is_empty());
    }

    #[test]
    fn test_router_alert_option() {
        let payload = [IGMP_V2_MEMBERSHIP_REPORT, 0, 0, 0, 239, 2, 2, 2];
        let frame = ipv4_frame(IPPROTO_IGMP, [239, 2, 2, 2], &[0x94, 0x04, 0, 0], &payload);
        let mut sink = VecSink::new(8);

        assert_eq!(monitor(&frame[..], 4, &mut sink), Verdict::Drop);
        assert_eq!(sink.events[0].group_addr(), core::net::Ipv4Addr::new(239, 2, 2, 2));
    }

    #[test]
    fn test_non_igmp_passes() {
        let frame = ipv4_frame(IPPROTO_UDP, [239, 1, 1, 1], &[], &[0u8; 16]);
        let mut sink = VecSink::new(8);
        assert_eq!(monitor(&frame[..], 1, &mut sink), Verdict::Pass);
        assert!(sink.events.is_empty());
    }

    #[test]
    fn test_non_ipv4_passes() {
        let mut frame = igmp_frame(IGMP_V2_MEMBERSHIP_REPORT, [239, 1, 1, 1]);
        frame[12..14].copy_from_slice(&0x86ddu16.to_be_bytes());
        let mut sink = VecSink::new(8);
        assert_eq!(monitor(&frame[..], 1, &mut sink), Verdict::Pass);
        assert!(sink.events.is_empty());
    }

    #[test]
    fn test_bad_ihl_passes() {
        let mut frame = igmp_frame(IGMP_V2_MEMBERSHIP_REPORT, [239, 1, 1, 1]);
        frame[ETH_HLEN] = 0x44;
        let mut sink = VecSink::new(8);
        assert_eq!(monitor(&frame[..], 1, &mut sink), Verdict::Pass);
    }

    #[test]
    fn test_truncated_frames_pass() {
        let frame = igmp_frame(IGMP_V2_MEMBERSHIP_REPORT, [239, 1, 1, 1]);
        assert_eq!(frame.len(), ETH_HLEN + IP_HLEN + IGMP_HLEN);

        for cut in 0..frame.len() {
            let mut sink = VecSink::new(8);
            assert_eq!(
                monitor(&frame[..cut], 1, &mut sink),
                Verdict::Pass,
                "frame truncated to {} bytes",
                cut
            );
            assert!(sink.events.is_empty());
        }
    }
}
