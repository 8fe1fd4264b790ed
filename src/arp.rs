//! Address Resolution Protocol: the IPv4-over-Ethernet resolution cache and
//! the resolve-then-send deferral path.
//!
//! Outbound IPv4 frames stop here on their way to the link. If the
//! destination already has a cache entry the frame goes straight out;
//! otherwise the frame bytes are parked in a pending queue keyed by the
//! destination address and a single broadcast REQUEST goes out in its place.
//! Any later ARP packet from that address — reply or not — releases the
//! parked frame to the freshly learned MAC. One frame may wait per
//! destination; further sends to an unresolved address are dropped rather
//! than multiplying REQUESTs on the wire.
//!
//! There is no retry machinery. A pending frame whose REQUEST goes
//! unanswered ages out of the queue after [`ARP_PENDING_TIMEOUT_SEC`] and is
//! silently lost; cache entries age out after [`ARP_CACHE_TIMEOUT_SEC`].
//!
//! At init the stack broadcasts a gratuitous REQUEST for its own address,
//! announcing itself and probing for a duplicate.

use crate::*;

use byte_struct::*;
use static_assertions::const_assert;

const_assert!(ArpPacket::BYTE_LEN == 28);

/// Hardware type field value for ethernet
pub const ARP_HW_ETHER: u16 = 1;

/// Seconds a resolved cache entry stays usable without being re-learned
pub const ARP_CACHE_TIMEOUT_SEC: u64 = 60;

/// Seconds a parked frame waits for resolution before it is dropped
pub const ARP_PENDING_TIMEOUT_SEC: u64 = 1;

/// Resolution cache slots
pub(crate) const ARP_CACHE_SLOTS: usize = 16;

/// Pending-send queue slots
pub(crate) const ARP_PENDING_SLOTS: usize = 8;

/// A frame parked in the pending queue, owned as a byte copy until a reply
/// arrives or the entry ages out.
pub(crate) type PendingFrame = heapless::Vec<u8, FRAME_BUF_LEN>;

/// An ARP request or response for IPv4 addresses and standard MAC addresses.
/// Assumes 6-byte MAC addresses and 4-byte IPV4 addresses.
/// See https://en.wikipedia.org/wiki/Address_Resolution_Protocol .
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct ArpPacket {
    /// Hardware type (1 for ethernet)
    pub hw_type: u16,
    /// Protocol type (same as ethertype from the ethernet header)
    pub proto_type: EtherType,
    /// Hardware address length (6 for standard MAC)
    pub hw_len: u8,
    /// Protocol address length (4 for IPV4)
    pub proto_len: u8,
    /// ARP operation type
    pub opcode: ArpOperation,
    /// Sender MAC address
    pub sender_mac: MacAddr,
    /// Sender IP address
    pub sender_ip: Ipv4Addr,
    /// Target MAC address (zeroed in requests)
    pub target_mac: MacAddr,
    /// Target IP address
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Create a new ARP packet for IPV4 on ethernet
    pub fn new(
        opcode: ArpOperation,
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        ArpPacket {
            hw_type: ARP_HW_ETHER,
            proto_type: EtherType::Ipv4, // Always resolving an IPV4 address
            hw_len: 6,
            proto_len: 4,
            opcode,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

enum_with_unknown! {
    /// ARP request or response flag values
    pub enum ArpOperation(u16) {
        /// This is a request to confirm target IP address and acquire associated MAC address
        Request = 1,
        /// This is a response to confirm our IP address and provide associated MAC address
        Reply = 2
    }
}

impl ByteStructLen for ArpOperation {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for ArpOperation {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut bytes_read = [0_u8; 2];
        bytes_read.copy_from_slice(&bytes[0..=1]);
        ArpOperation::from(u16::from_be_bytes(bytes_read))
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        let bytes_to_write = u16::from(*self).to_be_bytes();
        bytes[0] = bytes_to_write[0];
        bytes[1] = bytes_to_write[1];
    }
}

impl<D: NetDriver> Stack<D> {
    /// Broadcast a request for the MAC that owns `target_ip`.
    pub(crate) fn arp_request(&mut self, target_ip: Ipv4Addr) {
        let pkt = ArpPacket::new(
            ArpOperation::Request,
            self.iface.mac,
            self.iface.ipv4,
            MacAddr::ANY,
            target_ip,
        );
        let mut buf = FrameBuf::new();
        buf.init_from(&pkt.to_be_bytes());
        self.ethernet_out(&mut buf, MacAddr::BROADCAST, EtherType::Arp);
    }

    /// Answer a request: unicast our MAC back to the asker.
    pub(crate) fn arp_reply(&mut self, target_ip: Ipv4Addr, target_mac: MacAddr) {
        let pkt = ArpPacket::new(
            ArpOperation::Reply,
            self.iface.mac,
            self.iface.ipv4,
            target_mac,
            target_ip,
        );
        let mut buf = FrameBuf::new();
        buf.init_from(&pkt.to_be_bytes());
        self.ethernet_out(&mut buf, target_mac, EtherType::Arp);
    }

    /// Receive one ARP packet.
    ///
    /// The sender association is learned unconditionally, whatever the
    /// opcode. If a frame was parked waiting on that sender it goes out now,
    /// and in that case no reply is generated even for a request addressed
    /// to us.
    pub(crate) fn arp_in(&mut self, buf: &mut FrameBuf) {
        if buf.len() < ArpPacket::BYTE_LEN {
            return;
        }
        let pkt = ArpPacket::read_bytes(buf.data());

        if pkt.hw_type != ARP_HW_ETHER
            || pkt.proto_type != EtherType::Ipv4
            || pkt.hw_len != 6
            || pkt.proto_len != 4
        {
            return;
        }

        let now = self.now;
        self.arp_cache.set(pkt.sender_ip, pkt.sender_mac, now);

        if let Some(parked) = self.arp_pending.remove(&pkt.sender_ip, now) {
            let mut fwd = FrameBuf::new();
            fwd.init_from(&parked);
            self.ethernet_out(&mut fwd, pkt.sender_mac, EtherType::Ipv4);
        } else if pkt.opcode == ArpOperation::Request && pkt.target_ip == self.iface.ipv4 {
            self.arp_reply(pkt.sender_ip, pkt.sender_mac);
        }
    }

    /// Send an IPv4 frame to `ip`, resolving the MAC first if needed.
    ///
    /// Unresolved destinations park the frame and broadcast one request;
    /// while a request is outstanding, further frames to the same
    /// destination are dropped.
    pub(crate) fn arp_out<const N: usize>(&mut self, buf: &mut Buf<N>, ip: Ipv4Addr) {
        let now = self.now;
        if let Some(mac) = self.arp_cache.get(&ip, now).copied() {
            self.ethernet_out(buf, mac, EtherType::Ipv4);
            return;
        }

        if self.arp_pending.contains(&ip, now) {
            // One outstanding frame per destination; no duplicate requests
            return;
        }

        let mut parked = PendingFrame::new();
        if parked.extend_from_slice(buf.data()).is_err() {
            log::warn!("arp: frame too large to park for resolution of {}", ip);
            return;
        }
        self.arp_pending.set(ip, parked, now);
        self.arp_request(ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::testutil::*;
    use crate::*;
    extern crate std;

    fn arp_frame(op: ArpOperation, sender_mac: MacAddr, sender_ip: Ipv4Addr) -> std::vec::Vec<u8> {
        let pkt = ArpPacket::new(op, sender_mac, sender_ip, TEST_MAC, TEST_IP);
        eth_frame(TEST_MAC, sender_mac, EtherType::Arp, &pkt.to_be_bytes())
    }

    #[test]
    fn test_request_for_our_ip_gets_a_reply() {
        let mut stack = test_stack();
        let asker_mac = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let asker_ip = Ipv4Addr::new([10, 0, 0, 9]);

        deliver(&mut stack, arp_frame(ArpOperation::Request, asker_mac, asker_ip));

        assert_eq!(stack.driver.tx.len(), 1);
        let frame = &stack.driver.tx[0];
        let eth = EthernetHeader::read_bytes(frame);
        assert_eq!(eth.dst_macaddr, asker_mac);
        assert_eq!(eth.ethertype, EtherType::Arp);

        let reply = ArpPacket::read_bytes(&frame[EthernetHeader::BYTE_LEN..]);
        assert_eq!(reply.opcode, ArpOperation::Reply);
        assert_eq!(reply.sender_mac, TEST_MAC);
        assert_eq!(reply.sender_ip, TEST_IP);
        assert_eq!(reply.target_mac, asker_mac);
        assert_eq!(reply.target_ip, asker_ip);
    }

    #[test]
    fn test_request_for_other_ip_learns_but_stays_silent() {
        let mut stack = test_stack();
        let sender_mac = MacAddr::new([0xaa; 6]);
        let sender_ip = Ipv4Addr::new([10, 0, 0, 9]);
        let pkt = ArpPacket::new(
            ArpOperation::Request,
            sender_mac,
            sender_ip,
            MacAddr::ANY,
            Ipv4Addr::new([10, 0, 0, 77]),
        );
        let frame = eth_frame(MacAddr::BROADCAST, sender_mac, EtherType::Arp, &pkt.to_be_bytes());

        deliver(&mut stack, frame);
        assert!(stack.driver.tx.is_empty());
        assert_eq!(stack.arp_cache.get(&sender_ip, stack.now), Some(&sender_mac));
    }

    #[test]
    fn test_malformed_packets_are_dropped() {
        let mut stack = test_stack();
        let sender_mac = MacAddr::new([0xaa; 6]);
        let mut pkt = ArpPacket::new(
            ArpOperation::Request,
            sender_mac,
            Ipv4Addr::new([10, 0, 0, 9]),
            MacAddr::ANY,
            TEST_IP,
        );
        pkt.hw_len = 8;
        let frame = eth_frame(TEST_MAC, sender_mac, EtherType::Arp, &pkt.to_be_bytes());

        deliver(&mut stack, frame);
        assert!(stack.driver.tx.is_empty());
        assert!(stack.arp_cache.is_empty(stack.now));
    }

    #[test]
    fn test_unresolved_send_emits_single_request() {
        let mut stack = test_stack();
        let dst = Ipv4Addr::new([10, 0, 0, 9]);

        let mut buf = FrameBuf::new();
        buf.init_from(&[1, 2, 3, 4]);
        stack.arp_out(&mut buf, dst);

        // One broadcast request, no payload frame yet
        assert_eq!(stack.driver.tx.len(), 1);
        let req = ArpPacket::read_bytes(&stack.driver.tx[0][EthernetHeader::BYTE_LEN..]);
        assert_eq!(req.opcode, ArpOperation::Request);
        assert_eq!(req.target_ip, dst);

        // A second send to the same unresolved destination is dropped outright
        let mut buf2 = FrameBuf::new();
        buf2.init_from(&[5, 6, 7, 8]);
        stack.arp_out(&mut buf2, dst);
        assert_eq!(stack.driver.tx.len(), 1);
    }

    #[test]
    fn test_reply_releases_parked_frame_to_learned_mac() {
        let mut stack = test_stack();
        let dst_ip = Ipv4Addr::new([10, 0, 0, 9]);
        let dst_mac = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

        let mut buf = FrameBuf::new();
        buf.init_from(&[0x45, 0x00, 0x00, 0x04]);
        stack.arp_out(&mut buf, dst_ip);
        stack.driver.tx.clear(); // drop the request

        deliver(&mut stack, arp_frame(ArpOperation::Reply, dst_mac, dst_ip));

        assert_eq!(stack.driver.tx.len(), 1);
        let frame = &stack.driver.tx[0];
        let eth = EthernetHeader::read_bytes(frame);
        assert_eq!(eth.dst_macaddr, dst_mac);
        assert_eq!(eth.ethertype, EtherType::Ipv4);
        assert_eq!(&frame[EthernetHeader::BYTE_LEN..], &[0x45, 0x00, 0x00, 0x04]);

        // The queue entry was consumed
        assert!(stack.arp_pending.is_empty(stack.now));
    }

    #[test]
    fn test_gratuitous_reply_also_releases_parked_frame() {
        let mut stack = test_stack();
        let dst_ip = Ipv4Addr::new([10, 0, 0, 9]);
        let dst_mac = MacAddr::new([0x12; 6]);

        let mut buf = FrameBuf::new();
        buf.init_from(&[9, 9]);
        stack.arp_out(&mut buf, dst_ip);
        stack.driver.tx.clear();

        // An unsolicited REQUEST from the awaited address counts as resolution
        deliver(&mut stack, arp_frame(ArpOperation::Request, dst_mac, dst_ip));

        // Parked frame went out; the request-for-us path was skipped
        assert_eq!(stack.driver.tx.len(), 1);
        let eth = EthernetHeader::read_bytes(&stack.driver.tx[0]);
        assert_eq!(eth.ethertype, EtherType::Ipv4);
        assert_eq!(eth.dst_macaddr, dst_mac);
    }

    #[test]
    fn test_parked_frame_ages_out() {
        let mut stack = test_stack();
        let dst_ip = Ipv4Addr::new([10, 0, 0, 9]);

        let mut buf = FrameBuf::new();
        buf.init_from(&[1]);
        stack.arp_out(&mut buf, dst_ip);
        stack.driver.tx.clear();

        // Let the pending entry expire, then resolve; nothing is released
        // but a fresh send becomes possible again.
        stack.now += ARP_PENDING_TIMEOUT_SEC + 1;
        assert!(stack.arp_pending.is_empty(stack.now));

        let mut buf2 = FrameBuf::new();
        buf2.init_from(&[2]);
        stack.arp_out(&mut buf2, dst_ip);
        assert_eq!(stack.driver.tx.len(), 1);
    }

    #[test]
    fn test_serialization_loop() -> () {
        let msg = ArpPacket::new(
            ArpOperation::Request,
            MacAddr::new([7_u8; 6]),
            Ipv4Addr::new([8_u8; 4]),
            MacAddr::new([9_u8; 6]),
            Ipv4Addr::new([10_u8; 4]),
        );
        // Serialize
        let bytes = msg.to_be_bytes();
        // Deserialize
        let msg_parsed = ArpPacket::read_bytes(&bytes);

        assert_eq!(msg, msg_parsed);
    }
}
