//! Control messages for IPv6: echo service, destination-unreachable, and
//! the neighbor-discovery subset an endpoint needs.
//!
//! Every inbound message is verified against the v6 pseudo-header checksum
//! before dispatch. Neighbor solicitations for our address are answered
//! with a solicited+override advertisement carrying our MAC in the
//! target-LLA option; advertisements from others are logged but do not feed
//! a neighbor cache (see [`crate::ipv6`] for the transmit-side MAC
//! derivation that makes this workable on a single link).

use crate::*;

use byte_struct::*;
use static_assertions::const_assert;

const_assert!(Icmpv6Header::BYTE_LEN == 4);
const_assert!(Icmpv6Echo::BYTE_LEN == 8);
const_assert!(NeighborSolicit::BYTE_LEN == 24);
const_assert!(NeighborAdvert::BYTE_LEN == 24);
const_assert!(NdpOptionLla::BYTE_LEN == 8);

/// Router flag of the neighbor-advertisement flags word
pub const NA_FLAG_ROUTER: u32 = 0x8000_0000;

/// Solicited flag: this advertisement answers a solicitation
pub const NA_FLAG_SOLICITED: u32 = 0x4000_0000;

/// Override flag: receivers should replace an existing cache entry
pub const NA_FLAG_OVERRIDE: u32 = 0x2000_0000;

/// Minimum IPv6 MTU, which bounds how much of an offending packet an
/// unreachable message may quote.
pub const IPV6_MIN_MTU: usize = 1280;

enum_with_unknown! {
    /// ICMPv6 message types handled here.
    /// Error messages are 0-127, informational 128-255.
    pub enum Icmpv6Type(u8) {
        /// No route, prohibited, or port closed
        DestUnreachable = 1,
        /// Packet exceeds the path MTU
        PacketTooBig = 2,
        /// Hop limit ran out
        TimeExceeded = 3,
        /// Malformed header field
        ParamProblem = 4,
        /// Echo request ("ping6")
        EchoRequest = 128,
        /// Answer to an echo request
        EchoReply = 129,
        /// Router solicitation (we are not a router)
        RouterSolicitation = 133,
        /// Router advertisement
        RouterAdvertisement = 134,
        /// Who owns this address?
        NeighborSolicitation = 135,
        /// I own this address
        NeighborAdvertisement = 136,
        /// Redirect to a better first hop
        Redirect = 137
    }
}

impl ByteStructLen for Icmpv6Type {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for Icmpv6Type {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

enum_with_unknown! {
    /// Destination-unreachable codes
    pub enum Icmpv6UnreachCode(u8) {
        /// No route to the destination
        NoRoute = 0,
        /// Administratively prohibited
        AdminProhibited = 1,
        /// Beyond the scope of the source address
        BeyondScope = 2,
        /// Address unreachable
        AddrUnreach = 3,
        /// No listener on the port
        PortUnreach = 4
    }
}

enum_with_unknown! {
    /// Option type tags trailing a neighbor-discovery message
    pub enum NdpOptionType(u8) {
        /// Link-layer address of the sender
        SourceLinkAddr = 1,
        /// Link-layer address of the advertised target
        TargetLinkAddr = 2,
        /// On-link prefix information
        PrefixInfo = 3,
        /// Original header of a redirected packet
        RedirectHeader = 4,
        /// Link MTU
        Mtu = 5
    }
}

impl ByteStructLen for NdpOptionType {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for NdpOptionType {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

/// Bare 4-byte ICMPv6 header shared by every message
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct Icmpv6Header {
    /// Message type
    pub icmp_type: Icmpv6Type,
    /// Type-specific code
    pub code: u8,
    /// Checksum over the pseudo-header and the whole message
    pub checksum: u16,
}

/// Echo request/reply message
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct Icmpv6Echo {
    /// 128 for a request, 129 for a reply
    pub icmp_type: Icmpv6Type,
    /// Always 0
    pub code: u8,
    /// Checksum
    pub checksum: u16,
    /// Identifier
    pub id: u16,
    /// Sequence number
    pub seq: u16,
}

/// Neighbor solicitation: who owns `target`?
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct NeighborSolicit {
    /// Always 135
    pub icmp_type: Icmpv6Type,
    /// Always 0
    pub code: u8,
    /// Checksum
    pub checksum: u16,
    /// Reserved word
    pub reserved: u32,
    /// The address being resolved
    pub target: Ipv6Addr,
}

/// Neighbor advertisement: `target` is at the MAC in the trailing option.
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct NeighborAdvert {
    /// Always 136
    pub icmp_type: Icmpv6Type,
    /// Always 0
    pub code: u8,
    /// Checksum
    pub checksum: u16,
    /// R/S/O flags in the top three bits
    pub flags: u32,
    /// The address being advertised
    pub target: Ipv6Addr,
}

/// Link-layer address option trailing an NS or NA
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct NdpOptionLla {
    /// Source or target link-layer address
    pub option_type: NdpOptionType,
    /// Option length in 8-byte units, always 1 here
    pub length: u8,
    /// The link-layer address itself
    pub mac: MacAddr,
}

impl<D: NetDriver> Stack<D> {
    /// Receive one ICMPv6 message: verify the pseudo-header checksum, then
    /// dispatch on type.
    pub(crate) fn icmpv6_in(&mut self, buf: &mut FrameBuf, src: Ipv6Addr) {
        if buf.len() < Icmpv6Header::BYTE_LEN {
            return;
        }

        // Save-zero-recompute-restore over the message in place
        let wire = u16::from_be_bytes([buf.data()[2], buf.data()[3]]);
        buf.data_mut()[2..4].copy_from_slice(&[0, 0]);
        let calc = transport_checksum_v6(IpProtocol::Icmpv6, buf.data(), &src, &self.iface.ipv6);
        buf.data_mut()[2..4].copy_from_slice(&wire.to_be_bytes());
        if calc != wire {
            log::debug!("icmpv6: checksum mismatch from {}", src);
            return;
        }

        let hdr = Icmpv6Header::read_bytes(buf.data());
        match hdr.icmp_type {
            Icmpv6Type::EchoRequest => self.icmpv6_echo_reply(buf, src),
            Icmpv6Type::EchoReply => log::debug!("icmpv6: echo reply from {}", src),
            Icmpv6Type::NeighborSolicitation => self.icmpv6_handle_ns(buf, src),
            Icmpv6Type::NeighborAdvertisement => self.icmpv6_handle_na(buf, src),
            Icmpv6Type::RouterSolicitation | Icmpv6Type::RouterAdvertisement => {
                log::debug!("icmpv6: ignoring router message from {}", src)
            }
            other => log::debug!("icmpv6: type {} from {}", u8::from(other), src),
        }
    }

    /// Copy the request back with the type flipped to reply.
    fn icmpv6_echo_reply(&mut self, request: &FrameBuf, src: Ipv6Addr) {
        let mut tx = FrameBuf::new();
        tx.init_from(request.data());

        let data = tx.data_mut();
        data[0] = u8::from(Icmpv6Type::EchoReply);
        data[1] = 0;
        data[2] = 0;
        data[3] = 0;
        let c = transport_checksum_v6(IpProtocol::Icmpv6, tx.data(), &self.iface.ipv6, &src);
        tx.data_mut()[2..4].copy_from_slice(&c.to_be_bytes());

        self.ipv6_out(&mut tx, src, IpProtocol::Icmpv6);
    }

    /// Answer a solicitation for our own address; anything else is not our
    /// business.
    fn icmpv6_handle_ns(&mut self, buf: &FrameBuf, src: Ipv6Addr) {
        if buf.len() < NeighborSolicit::BYTE_LEN {
            return;
        }
        let ns = NeighborSolicit::read_bytes(buf.data());
        if ns.target != self.iface.ipv6 {
            return;
        }
        self.icmpv6_send_na(ns.target, src, true);
    }

    /// Note the advertised link-layer address. A neighbor cache would be
    /// updated here; transmit-side MAC derivation makes do without one.
    fn icmpv6_handle_na(&mut self, buf: &FrameBuf, src: Ipv6Addr) {
        if buf.len() < NeighborAdvert::BYTE_LEN + NdpOptionLla::BYTE_LEN {
            return;
        }
        let option = NdpOptionLla::read_bytes(&buf.data()[NeighborAdvert::BYTE_LEN..]);
        if option.option_type == NdpOptionType::TargetLinkAddr && option.length == 1 {
            log::debug!("icmpv6: neighbor {} is at {}", src, option.mac);
        }
    }

    /// Ask the link who owns `target`, via its solicited-node multicast
    /// group, carrying our own MAC as the source-LLA option.
    pub fn icmpv6_send_ns(&mut self, target: Ipv6Addr) {
        let mut tx = FrameBuf::new();
        tx.init(NeighborSolicit::BYTE_LEN + NdpOptionLla::BYTE_LEN);

        let ns = NeighborSolicit {
            icmp_type: Icmpv6Type::NeighborSolicitation,
            code: 0,
            checksum: 0,
            reserved: 0,
            target,
        };
        ns.write_bytes(&mut tx.data_mut()[..NeighborSolicit::BYTE_LEN]);
        let option = NdpOptionLla {
            option_type: NdpOptionType::SourceLinkAddr,
            length: 1,
            mac: self.iface.mac,
        };
        option.write_bytes(&mut tx.data_mut()[NeighborSolicit::BYTE_LEN..]);

        let dst = target.solicited_node_multicast();
        let c = transport_checksum_v6(IpProtocol::Icmpv6, tx.data(), &self.iface.ipv6, &dst);
        tx.data_mut()[2..4].copy_from_slice(&c.to_be_bytes());

        self.ipv6_out(&mut tx, dst, IpProtocol::Icmpv6);
    }

    /// Advertise that `target` (ours) is at our MAC. `solicited` marks the
    /// advertisement as an answer rather than an announcement.
    pub(crate) fn icmpv6_send_na(&mut self, target: Ipv6Addr, dest: Ipv6Addr, solicited: bool) {
        let mut tx = FrameBuf::new();
        tx.init(NeighborAdvert::BYTE_LEN + NdpOptionLla::BYTE_LEN);

        let mut flags = NA_FLAG_OVERRIDE;
        if solicited {
            flags |= NA_FLAG_SOLICITED;
        }
        let na = NeighborAdvert {
            icmp_type: Icmpv6Type::NeighborAdvertisement,
            code: 0,
            checksum: 0,
            flags,
            target,
        };
        na.write_bytes(&mut tx.data_mut()[..NeighborAdvert::BYTE_LEN]);
        let option = NdpOptionLla {
            option_type: NdpOptionType::TargetLinkAddr,
            length: 1,
            mac: self.iface.mac,
        };
        option.write_bytes(&mut tx.data_mut()[NeighborAdvert::BYTE_LEN..]);

        let c = transport_checksum_v6(IpProtocol::Icmpv6, tx.data(), &self.iface.ipv6, &dest);
        tx.data_mut()[2..4].copy_from_slice(&c.to_be_bytes());

        self.ipv6_out(&mut tx, dest, IpProtocol::Icmpv6);
    }

    /// Tell `src` its packet could not be delivered, quoting as much of it
    /// as fits the minimum MTU.
    pub(crate) fn icmpv6_unreachable(
        &mut self,
        recv_buf: &FrameBuf,
        src: Ipv6Addr,
        code: Icmpv6UnreachCode,
    ) {
        let max_quote = IPV6_MIN_MTU - Ipv6Header::BYTE_LEN - 8;
        let quote_len = recv_buf.len().min(max_quote);

        let mut tx = FrameBuf::new();
        tx.init(8 + quote_len);

        let hdr = Icmpv6Header {
            icmp_type: Icmpv6Type::DestUnreachable,
            code: u8::from(code),
            checksum: 0,
        };
        hdr.write_bytes(&mut tx.data_mut()[..Icmpv6Header::BYTE_LEN]);
        // Bytes 4-7 stay zero (unused word)
        tx.data_mut()[8..].copy_from_slice(&recv_buf.data()[..quote_len]);

        let c = transport_checksum_v6(IpProtocol::Icmpv6, tx.data(), &self.iface.ipv6, &src);
        tx.data_mut()[2..4].copy_from_slice(&c.to_be_bytes());

        self.ipv6_out(&mut tx, src, IpProtocol::Icmpv6);
    }

    /// Transmit one echo request ("ping6") with the given payload.
    pub fn icmpv6_echo_request(&mut self, dest: Ipv6Addr, id: u16, seq: u16, payload: &[u8]) {
        let mut tx = FrameBuf::new();
        tx.init(Icmpv6Echo::BYTE_LEN + payload.len());

        let echo = Icmpv6Echo {
            icmp_type: Icmpv6Type::EchoRequest,
            code: 0,
            checksum: 0,
            id,
            seq,
        };
        echo.write_bytes(&mut tx.data_mut()[..Icmpv6Echo::BYTE_LEN]);
        tx.data_mut()[Icmpv6Echo::BYTE_LEN..].copy_from_slice(payload);

        let c = transport_checksum_v6(IpProtocol::Icmpv6, tx.data(), &self.iface.ipv6, &dest);
        tx.data_mut()[2..4].copy_from_slice(&c.to_be_bytes());

        self.ipv6_out(&mut tx, dest, IpProtocol::Icmpv6);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::testutil::*;
    use crate::*;
    extern crate std;
    use std::vec::Vec;

    fn icmpv6_message(src: Ipv6Addr, dst: Ipv6Addr, body: &mut [u8]) -> Vec<u8> {
        body[2] = 0;
        body[3] = 0;
        let c = transport_checksum_v6(IpProtocol::Icmpv6, body, &src, &dst);
        body[2..4].copy_from_slice(&c.to_be_bytes());
        ipv6_frame(src, dst, IpProtocol::Icmpv6, body)
    }

    #[test]
    fn test_echo_request_gets_reply_with_valid_checksum() {
        let mut stack = test_stack();
        let src = Ipv6Addr::link_local_from_mac(&MacAddr::new([2, 0, 0, 0, 0, 9]));

        let mut body = std::vec![0u8; Icmpv6Echo::BYTE_LEN + 4];
        let echo = Icmpv6Echo {
            icmp_type: Icmpv6Type::EchoRequest,
            code: 0,
            checksum: 0,
            id: 1,
            seq: 1,
        };
        echo.write_bytes(&mut body[..Icmpv6Echo::BYTE_LEN]);
        body[Icmpv6Echo::BYTE_LEN..].copy_from_slice(b"ping");
        let frame = icmpv6_message(src, stack.iface.ipv6, &mut body);

        deliver(&mut stack, frame);

        assert_eq!(stack.driver.tx.len(), 1);
        let (hdr, message) = parse_ipv6_tx(&stack.driver.tx[0]);
        assert_eq!(hdr.next_header, IpProtocol::Icmpv6);
        assert_eq!(hdr.dst, src);

        let reply = Icmpv6Echo::read_bytes(message);
        assert_eq!(reply.icmp_type, Icmpv6Type::EchoReply);
        assert_eq!(reply.id, 1);
        assert_eq!(reply.seq, 1);
        assert_eq!(&message[Icmpv6Echo::BYTE_LEN..], b"ping");

        // Receiver-side recomputation folds to zero: sum pseudo-header and
        // message with the checksum field left in place.
        let mut sum = checksum_accumulate(&hdr.src.0);
        sum += checksum_accumulate(&hdr.dst.0);
        sum += message.len() as u32;
        sum += u8::from(IpProtocol::Icmpv6) as u32;
        sum += checksum_accumulate(message);
        assert_eq!(checksum_finalize(sum), 0);
    }

    #[test]
    fn test_bad_checksum_is_dropped() {
        let mut stack = test_stack();
        let src = Ipv6Addr::link_local_from_mac(&MacAddr::new([2, 0, 0, 0, 0, 9]));

        let mut body = [128u8, 0, 0xde, 0xad, 0, 1, 0, 1];
        // Deliberately wrong checksum
        let frame = ipv6_frame(src, stack.iface.ipv6, IpProtocol::Icmpv6, &body);
        deliver(&mut stack, frame);
        assert!(stack.driver.tx.is_empty());

        // Sanity: the same message with a correct checksum is answered
        let frame = icmpv6_message(src, stack.iface.ipv6, &mut body);
        deliver(&mut stack, frame);
        assert_eq!(stack.driver.tx.len(), 1);
    }

    #[test]
    fn test_ns_for_our_address_triggers_solicited_na() {
        let mut stack = test_stack();
        let solicitor_mac = MacAddr::new([2, 0, 0, 0, 0, 9]);
        let solicitor = Ipv6Addr::link_local_from_mac(&solicitor_mac);

        let mut body = std::vec![0u8; NeighborSolicit::BYTE_LEN + NdpOptionLla::BYTE_LEN];
        let ns = NeighborSolicit {
            icmp_type: Icmpv6Type::NeighborSolicitation,
            code: 0,
            checksum: 0,
            reserved: 0,
            target: stack.iface.ipv6,
        };
        ns.write_bytes(&mut body[..NeighborSolicit::BYTE_LEN]);
        let option = NdpOptionLla {
            option_type: NdpOptionType::SourceLinkAddr,
            length: 1,
            mac: solicitor_mac,
        };
        option.write_bytes(&mut body[NeighborSolicit::BYTE_LEN..]);
        let frame = icmpv6_message(solicitor, stack.iface.ipv6, &mut body);

        deliver(&mut stack, frame);

        assert_eq!(stack.driver.tx.len(), 1);
        let (hdr, message) = parse_ipv6_tx(&stack.driver.tx[0]);
        assert_eq!(hdr.dst, solicitor);

        let na = NeighborAdvert::read_bytes(message);
        assert_eq!(na.icmp_type, Icmpv6Type::NeighborAdvertisement);
        assert_eq!(na.flags, NA_FLAG_SOLICITED | NA_FLAG_OVERRIDE);
        assert_eq!(na.target, stack.iface.ipv6);

        let option = NdpOptionLla::read_bytes(&message[NeighborAdvert::BYTE_LEN..]);
        assert_eq!(option.option_type, NdpOptionType::TargetLinkAddr);
        assert_eq!(option.length, 1);
        assert_eq!(option.mac, TEST_MAC);

        // Advertisement checksum holds under the pseudo-header
        let mut sum = checksum_accumulate(&hdr.src.0);
        sum += checksum_accumulate(&hdr.dst.0);
        sum += message.len() as u32;
        sum += u8::from(IpProtocol::Icmpv6) as u32;
        sum += checksum_accumulate(message);
        assert_eq!(checksum_finalize(sum), 0);
    }

    #[test]
    fn test_ns_for_other_address_is_ignored() {
        let mut stack = test_stack();
        let solicitor = Ipv6Addr::link_local_from_mac(&MacAddr::new([2, 0, 0, 0, 0, 9]));
        let other = Ipv6Addr::link_local_from_mac(&MacAddr::new([2, 0, 0, 0, 0, 0x42]));

        let mut body = std::vec![0u8; NeighborSolicit::BYTE_LEN];
        let ns = NeighborSolicit {
            icmp_type: Icmpv6Type::NeighborSolicitation,
            code: 0,
            checksum: 0,
            reserved: 0,
            target: other,
        };
        ns.write_bytes(&mut body[..]);
        let frame = icmpv6_message(solicitor, stack.iface.ipv6, &mut body);

        deliver(&mut stack, frame);
        assert!(stack.driver.tx.is_empty());
    }

    #[test]
    fn test_outbound_ns_goes_to_solicited_node_group() {
        let mut stack = test_stack();
        let target = Ipv6Addr::link_local_from_mac(&MacAddr::new([2, 0, 0, 0xab, 0xcd, 0xef]));

        stack.icmpv6_send_ns(target);

        assert_eq!(stack.driver.tx.len(), 1);
        let frame = &stack.driver.tx[0];
        let eth = EthernetHeader::read_bytes(frame);
        // Multicast MAC of the solicited-node group
        assert_eq!(eth.dst_macaddr, MacAddr::new([0x33, 0x33, 0xff, 0xab, 0xcd, 0xef]));

        let (hdr, message) = parse_ipv6_tx(frame);
        assert_eq!(hdr.dst, target.solicited_node_multicast());
        let ns = NeighborSolicit::read_bytes(message);
        assert_eq!(ns.icmp_type, Icmpv6Type::NeighborSolicitation);
        assert_eq!(ns.target, target);
        let option = NdpOptionLla::read_bytes(&message[NeighborSolicit::BYTE_LEN..]);
        assert_eq!(option.option_type, NdpOptionType::SourceLinkAddr);
        assert_eq!(option.mac, TEST_MAC);
    }

    #[test]
    fn test_echo_request_client_side() {
        let mut stack = test_stack();
        let dest = Ipv6Addr::link_local_from_mac(&MacAddr::new([2, 0, 0, 0, 0, 9]));

        stack.icmpv6_echo_request(dest, 7, 3, b"abc");

        let (hdr, message) = parse_ipv6_tx(&stack.driver.tx[0]);
        assert_eq!(hdr.dst, dest);
        let echo = Icmpv6Echo::read_bytes(message);
        assert_eq!(echo.icmp_type, Icmpv6Type::EchoRequest);
        assert_eq!(echo.id, 7);
        assert_eq!(echo.seq, 3);
        assert_eq!(&message[Icmpv6Echo::BYTE_LEN..], b"abc");
    }

    #[test]
    fn test_unreachable_quotes_offending_packet() {
        let mut stack = test_stack();
        let src = Ipv6Addr::link_local_from_mac(&MacAddr::new([2, 0, 0, 0, 0, 9]));

        let mut offending = FrameBuf::new();
        offending.init_from(b"original packet bytes");
        stack.icmpv6_unreachable(&offending, src, Icmpv6UnreachCode::PortUnreach);

        let (hdr, message) = parse_ipv6_tx(&stack.driver.tx[0]);
        assert_eq!(hdr.dst, src);
        assert_eq!(message[0], u8::from(Icmpv6Type::DestUnreachable));
        assert_eq!(message[1], u8::from(Icmpv6UnreachCode::PortUnreach));
        assert_eq!(&message[4..8], &[0, 0, 0, 0]);
        assert_eq!(&message[8..], b"original packet bytes");
    }
}
