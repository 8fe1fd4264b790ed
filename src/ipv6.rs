//! Internet layer: IPv6 header handling, address classification, and the
//! EUI-64 link-local identity.
//!
//! Reception accepts traffic for our unicast address and the all-nodes
//! multicast group, then dispatches on the next-header field; UDP and
//! registered upper protocols are shared with the v4 path and see a 16-byte
//! source address. Transmission derives the destination MAC directly from
//! the address where that is possible — multicast and link-local targets
//! encode it — and otherwise falls back to broadcast rather than running a
//! neighbor cache.

use crate::*;

use byte_struct::*;
use static_assertions::const_assert;

const_assert!(Ipv6Header::BYTE_LEN == 40);

/// Fixed IPv6 header length; there are no options, only extension headers,
/// and we emit none.
pub const IPV6_HEADER_LEN: usize = 40;

/// Hop limit for everything we originate
pub const IPV6_DEFAULT_HOP_LIMIT: u8 = 64;

/// Broad classes of IPv6 address, in the order they are tested.
#[derive(Clone, Copy, Debug, uDebug, PartialEq, Eq)]
pub enum Ipv6AddrType {
    /// All zeroes, `::`
    Unspecified,
    /// `::1`
    Loopback,
    /// `ff00::/8`
    Multicast,
    /// `fe80::/10`
    LinkLocal,
    /// `::ffff:a.b.c.d`
    Ipv4Mapped,
    /// `::a.b.c.d` (deprecated but still recognized)
    Ipv4Compatible,
    /// Anything else
    Global,
}

impl Ipv6Addr {
    /// All-zeroes address, `::`
    pub const UNSPECIFIED: Ipv6Addr = ByteArray([0_u8; 16]);

    /// Loopback, `::1`
    pub const LOOPBACK: Ipv6Addr = ByteArray([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);

    /// Every node on the link, `ff02::1`
    pub const ALL_NODES_MULTICAST: Ipv6Addr =
        ByteArray([0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);

    /// New from bytes
    pub const fn new(v: [u8; 16]) -> Self {
        ByteArray(v)
    }

    /// True for `ff00::/8`
    pub fn is_multicast(&self) -> bool {
        self.0[0] == 0xff
    }

    /// True for `fe80::/10`
    pub fn is_link_local(&self) -> bool {
        self.0[0] == 0xfe && (self.0[1] & 0xc0) == 0x80
    }

    /// True for `::ffff:a.b.c.d`
    pub fn is_ipv4_mapped(&self) -> bool {
        self.0[..10].iter().all(|b| *b == 0) && self.0[10] == 0xff && self.0[11] == 0xff
    }

    /// Classify the address
    pub fn addr_type(&self) -> Ipv6AddrType {
        if *self == Self::UNSPECIFIED {
            return Ipv6AddrType::Unspecified;
        }
        if *self == Self::LOOPBACK {
            return Ipv6AddrType::Loopback;
        }
        if self.is_multicast() {
            return Ipv6AddrType::Multicast;
        }
        if self.is_link_local() {
            return Ipv6AddrType::LinkLocal;
        }
        if self.is_ipv4_mapped() {
            return Ipv6AddrType::Ipv4Mapped;
        }
        if self.0[..12].iter().all(|b| *b == 0) && self.0[12..].iter().any(|b| *b != 0) {
            return Ipv6AddrType::Ipv4Compatible;
        }
        Ipv6AddrType::Global
    }

    /// The embedded IPv4 address of a mapped or compatible address
    pub fn to_ipv4(&self) -> Option<Ipv4Addr> {
        match self.addr_type() {
            Ipv6AddrType::Ipv4Mapped | Ipv6AddrType::Ipv4Compatible => Some(Ipv4Addr::new([
                self.0[12], self.0[13], self.0[14], self.0[15],
            ])),
            _ => None,
        }
    }

    /// Wrap an IPv4 address as `::ffff:a.b.c.d`
    pub fn from_ipv4(ip: &Ipv4Addr) -> Self {
        let mut out = [0_u8; 16];
        out[10] = 0xff;
        out[11] = 0xff;
        out[12..].copy_from_slice(&ip.0);
        ByteArray(out)
    }

    /// Link-local address derived from a MAC via EUI-64: flip the
    /// universal/local bit and splice `ff:fe` into the middle.
    pub fn link_local_from_mac(mac: &MacAddr) -> Self {
        let mut out = [0_u8; 16];
        out[0] = 0xfe;
        out[1] = 0x80;
        out[8] = mac.0[0] ^ 0x02;
        out[9] = mac.0[1];
        out[10] = mac.0[2];
        out[11] = 0xff;
        out[12] = 0xfe;
        out[13] = mac.0[3];
        out[14] = mac.0[4];
        out[15] = mac.0[5];
        ByteArray(out)
    }

    /// The solicited-node multicast group for this address,
    /// `ff02::1:ffXX:XXXX` with our low 24 bits.
    pub fn solicited_node_multicast(&self) -> Ipv6Addr {
        ByteArray([
            0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0xff, self.0[13], self.0[14], self.0[15],
        ])
    }

    /// Ethernet destination for a multicast address: `33:33` plus the low
    /// 32 bits.
    pub fn multicast_mac(&self) -> MacAddr {
        MacAddr::new([0x33, 0x33, self.0[12], self.0[13], self.0[14], self.0[15]])
    }

    /// Ethernet destination reconstructed from a link-local EUI-64 address:
    /// undo the U/L flip and drop the spliced `ff:fe`.
    pub fn link_local_mac(&self) -> MacAddr {
        MacAddr::new([
            self.0[8] ^ 0x02,
            self.0[9],
            self.0[10],
            self.0[13],
            self.0[14],
            self.0[15],
        ])
    }
}

/// IPv6 header per IETF-RFC-8200, fixed 40 bytes.
#[derive(ByteStruct, Clone, Copy, Debug)]
#[byte_struct_be]
pub struct Ipv6Header {
    /// Version (4 bits), traffic class (8 bits), flow label (20 bits)
    pub version_tc_flow: u32,
    /// Payload length, header excluded
    pub payload_len: u16,
    /// Protocol of the payload (no extension headers emitted)
    pub next_header: IpProtocol,
    /// Hop limit
    pub hop_limit: u8,
    /// Source address
    pub src: Ipv6Addr,
    /// Destination address
    pub dst: Ipv6Addr,
}

impl Ipv6Header {
    /// The version nibble
    pub fn version(&self) -> u8 {
        ((self.version_tc_flow >> 28) & 0x0F) as u8
    }

    /// The traffic-class byte
    pub fn traffic_class(&self) -> u8 {
        ((self.version_tc_flow >> 20) & 0xFF) as u8
    }

    /// The 20-bit flow label
    pub fn flow_label(&self) -> u32 {
        self.version_tc_flow & 0x000F_FFFF
    }

    /// Pack version, traffic class and flow label into the first word
    pub fn make_version_tc_flow(version: u8, tc: u8, flow: u32) -> u32 {
        ((version as u32) << 28) | ((tc as u32) << 20) | (flow & 0x000F_FFFF)
    }

    /// Pack into big-endian (network) byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

impl<D: NetDriver> Stack<D> {
    /// Receive one IPv6 packet: validate, filter on destination, trim link
    /// padding, strip the header and dispatch on next-header.
    pub(crate) fn ipv6_in(&mut self, buf: &mut FrameBuf) {
        if buf.len() < Ipv6Header::BYTE_LEN {
            return;
        }
        let hdr = Ipv6Header::read_bytes(buf.data());

        if hdr.version() != 6 {
            return;
        }
        let payload_len = hdr.payload_len as usize;
        if payload_len > buf.len() - Ipv6Header::BYTE_LEN {
            return;
        }

        let for_us = hdr.dst == self.iface.ipv6 || hdr.dst == Ipv6Addr::ALL_NODES_MULTICAST;
        if !for_us {
            return;
        }

        let total_len = Ipv6Header::BYTE_LEN + payload_len;
        if buf.len() > total_len {
            buf.remove_padding(buf.len() - total_len);
        }
        buf.remove_header(Ipv6Header::BYTE_LEN);

        match hdr.next_header {
            IpProtocol::Icmpv6 => self.icmpv6_in(buf, hdr.src),
            IpProtocol::Udp => self.udp_in(buf, IpAddr::V6(hdr.src)),
            protocol => {
                if let Some(handler) = self.registered_protocol(protocol) {
                    handler(self, buf, IpAddr::V6(hdr.src));
                } else {
                    log::trace!("ipv6: dropping next-header {} from {}", u8::from(protocol), hdr.src);
                }
            }
        }
    }

    /// Wrap a payload in a 40-byte header and put it on the wire.
    ///
    /// The destination MAC comes straight from the address for multicast and
    /// link-local targets; anything else goes out as broadcast, trusting the
    /// link to be small. A neighbor cache fed by NS/NA would go here.
    pub(crate) fn ipv6_out<const N: usize>(
        &mut self,
        buf: &mut Buf<N>,
        ip: Ipv6Addr,
        next_header: IpProtocol,
    ) {
        buf.add_header(Ipv6Header::BYTE_LEN);

        let hdr = Ipv6Header {
            version_tc_flow: Ipv6Header::make_version_tc_flow(6, 0, 0),
            payload_len: (buf.len() - Ipv6Header::BYTE_LEN) as u16,
            next_header,
            hop_limit: IPV6_DEFAULT_HOP_LIMIT,
            src: self.iface.ipv6,
            dst: ip,
        };
        hdr.write_bytes(&mut buf.data_mut()[..Ipv6Header::BYTE_LEN]);

        let dst_mac = if ip.is_multicast() {
            ip.multicast_mac()
        } else if ip.is_link_local() {
            ip.link_local_mac()
        } else {
            MacAddr::BROADCAST
        };

        self.ethernet_out(buf, dst_mac, EtherType::Ipv6);
    }
}
