//! Upstream forwarder: fan multicast data out to subscribed downstream links.

use crate::frame::{EthHdr, FrameView, Header, Ipv4Hdr};
use crate::{ForwardingLookup, Verdict, ETH_P_IP, FORWARDING_SLOT, IPPROTO_IGMP};

/// Process one frame received on the upstream link.
///
/// Returns [`Verdict::Redirect`] when the frame is multicast data and the
/// forwarding table is populated; the caller then broadcasts it to every
/// interface in the table. Everything else is passed.
#[inline(always)]
pub fn forward<F, T>(frame: &F, table: &T) -> Verdict
where
    F: FrameView + ?Sized,
    T: ForwardingLookup + ?Sized,
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

    if !ip.is_multicast_dst() {
        return Verdict::Pass;
    }

    // Control traffic from upstream is left to the stack.
    if ip.proto == IPPROTO_IGMP {
        return Verdict::Pass;
    }

    if !table.is_occupied(FORWARDING_SLOT) {
        return Verdict::Pass;
    }

    Verdict::Redirect
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::tests::ipv4_frame;
    use crate::{ETH_HLEN, IPPROTO_UDP, IP_HLEN};

    struct Slots(Vec<u32>);

    impl ForwardingLookup for Slots {
        fn is_occupied(&self, slot: u32) -> bool {
            (slot as usize) < self.0.len()
        }
    }

    fn udp_frame(dst: [u8; 4]) -> Vec<u8> {
        ipv4_frame(IPPROTO_UDP, dst, &[], &[0u8; 8])
    }

    #[test]
    fn test_multicast_data_redirected() {
        let table = Slots(vec![11, 12]);
        assert_eq!(forward(&udp_frame([239, 1, 1, 1])[..], &table), Verdict::Redirect);
        assert_eq!(forward(&udp_frame([224, 1, 1, 1])[..], &table), Verdict::Redirect);
    }

    #[test]
    fn test_unicast_passes() {
        let table = Slots(vec![11]);
        assert_eq!(forward(&udp_frame([10, 0, 0, 5])[..], &table), Verdict::Pass);
        assert_eq!(forward(&udp_frame([255, 255, 255, 255])[..], &table), Verdict::Pass);
    }

    #[test]
    fn test_igmp_from_upstream_passes() {
        let table = Slots(vec![11]);
        let frame = ipv4_frame(IPPROTO_IGMP, [239, 1, 1, 1], &[], &[0x16, 0, 0, 0, 239, 1, 1, 1]);
        assert_eq!(forward(&frame[..], &table), Verdict::Pass);
    }

    #[test]
    fn test_empty_table_passes() {
        let table = Slots(Vec::new());
        assert_eq!(forward(&udp_frame([239, 1, 1, 1])[..], &table), Verdict::Pass);
    }

    #[test]
    fn test_non_ipv4_passes() {
        let table = Slots(vec![11]);
        let mut frame = udp_frame([239, 1, 1, 1]);
        frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
        assert_eq!(forward(&frame[..], &table), Verdict::Pass);
    }

    #[test]
    fn test_truncated_frames_pass() {
        let table = Slots(vec![11]);
        let frame = udp_frame([239, 1, 1, 1]);
        for cut in 0..ETH_HLEN + IP_HLEN {
            assert_eq!(forward(&frame[..cut], &table), Verdict::Pass, "cut at {}", cut);
        }
        // The forwarder does not look past the IPv4 header.
        assert_eq!(forward(&frame[..ETH_HLEN + IP_HLEN], &table), Verdict::Redirect);
    }
}
