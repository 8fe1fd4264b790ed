//! Internet layer: IPv4 receive validation, transmit, and fragmentation.
//!
//! The receive side takes exactly one datagram per link frame — there is no
//! reassembly — validates it, strips the header and dispatches on the
//! protocol field. ICMP and UDP are wired in directly; anything else goes
//! through the open protocol registry (the seam where a TCP implementation
//! plugs in), and a protocol nobody claims is answered with an ICMP
//! protocol-unreachable.
//!
//! The transmit side cuts oversized payloads into MTU-sized fragments that
//! share one identification value, then hands each fragment to ARP for MAC
//! resolution.

use crate::*;

use byte_struct::*;
use modular_bitfield::prelude::*;
use static_assertions::const_assert;

const_assert!(Ipv4Header::BYTE_LEN == 20);

/// Link MTU; the driver is a tap or pcap device, so this is fixed rather
/// than discovered.
pub const MTU: usize = 1500;

/// Hop count for everything we originate
pub const IP_DEFAULT_TTL: u8 = 64;

/// Largest payload of a single fragment: MTU minus the 20-byte header we
/// always emit (no options).
pub const IP_MAX_FRAGMENT_PAYLOAD: usize = MTU - Ipv4Header::BYTE_LEN;

/// More-fragments bit of the flags/fragment-offset word
pub const IP_MORE_FRAGMENTS: u16 = 1 << 13;

/// Mask of the 13-bit fragment offset (in 8-byte units)
pub const IP_FRAGMENT_OFFSET_MASK: u16 = 0x1FFF;

/// Version and header-length nibbles of the first header byte.
/// Always 4 and 5 on the wire for everything we emit.
#[bitfield]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionIhl {
    /// Header length in 32-bit words
    pub ihl: B4,
    /// Always 4
    pub version: B4,
}

impl ByteStructLen for VersionIhl {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for VersionIhl {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from_bytes([bytes[0]])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = self.into_bytes()[0];
    }
}

/// IPV4 header per IETF-RFC-791, options never emitted.
///
/// See https://en.wikipedia.org/wiki/IPv4
#[derive(ByteStruct, Clone, Copy, Debug)]
#[byte_struct_be]
pub struct Ipv4Header {
    /// Version (4 bits) and header length in words (4 bits)
    pub version_ihl: VersionIhl,
    /// Type-of-service; always 0 here
    pub tos: u8,
    /// Total length in bytes, header included
    pub total_len: u16,
    /// Identification shared by the fragments of one datagram
    pub id: u16,
    /// Flags (3 bits) and fragment offset in 8-byte units (13 bits)
    pub flags_frag: u16,
    /// Time-to-live
    pub ttl: u8,
    /// Payload protocol
    pub protocol: IpProtocol,
    /// Header checksum
    pub checksum: u16,
    /// Source IP address
    pub src: Ipv4Addr,
    /// Destination IP address
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    /// Header length in bytes as encoded in the IHL nibble
    pub fn header_len(&self) -> usize {
        self.version_ihl.ihl() as usize * 4
    }

    /// True when further fragments follow this one
    pub fn more_fragments(&self) -> bool {
        self.flags_frag & IP_MORE_FRAGMENTS != 0
    }

    /// Fragment offset in bytes
    pub fn fragment_offset(&self) -> usize {
        (self.flags_frag & IP_FRAGMENT_OFFSET_MASK) as usize * 8
    }

    /// Pack into big-endian (network) byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut header_bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut header_bytes);

        header_bytes
    }
}

impl<D: NetDriver> Stack<D> {
    /// Receive one IPv4 datagram.
    ///
    /// The validation chain drops short packets, wrong versions, bad header
    /// lengths, inconsistent total lengths, checksum mismatches and
    /// datagrams not addressed to us — all silently. Link padding past the
    /// total length is trimmed before dispatch.
    pub(crate) fn ip_in(&mut self, buf: &mut FrameBuf) {
        if buf.len() < Ipv4Header::BYTE_LEN {
            return;
        }
        let hdr = Ipv4Header::read_bytes(buf.data());

        if hdr.version_ihl.version() != 4 {
            return;
        }
        let header_len = hdr.header_len();
        if header_len < Ipv4Header::BYTE_LEN {
            return;
        }
        let total_len = hdr.total_len as usize;
        if total_len > buf.len() || total_len < header_len {
            return;
        }

        // Verify by recomputing over the header with the checksum field
        // taken as zero.
        let mut header_bytes = [0_u8; 60];
        header_bytes[..header_len].copy_from_slice(&buf.data()[..header_len]);
        header_bytes[10] = 0;
        header_bytes[11] = 0;
        if checksum(&header_bytes[..header_len]) != hdr.checksum {
            log::debug!("ip: checksum mismatch from {}", hdr.src);
            return;
        }

        if hdr.dst != self.iface.ipv4 {
            return;
        }

        if buf.len() > total_len {
            buf.remove_padding(buf.len() - total_len);
        }
        buf.remove_header(header_len);

        match hdr.protocol {
            IpProtocol::Icmp => self.icmp_in(buf, hdr.src),
            IpProtocol::Udp => self.udp_in(buf, IpAddr::V4(hdr.src)),
            protocol => {
                if let Some(handler) = self.registered_protocol(protocol) {
                    handler(self, buf, IpAddr::V4(hdr.src));
                } else {
                    // Nobody claims this protocol: put the header back so the
                    // reply can quote it, then say so.
                    buf.add_header(header_len);
                    self.icmp_unreachable(buf, hdr.src, IcmpCode::ProtocolUnreach);
                }
            }
        }
    }

    /// Send a payload to `ip`, fragmenting when it exceeds what one MTU
    /// carries. All fragments of one call share an identification value and
    /// go out back-to-back in ascending offset order.
    pub(crate) fn ip_out<const N: usize>(
        &mut self,
        buf: &mut Buf<N>,
        ip: Ipv4Addr,
        protocol: IpProtocol,
    ) {
        let id = self.ip_id;
        self.ip_id = self.ip_id.wrapping_add(1);

        if buf.len() <= IP_MAX_FRAGMENT_PAYLOAD {
            self.ip_fragment_out(buf, ip, protocol, id, 0, false);
            return;
        }

        let total = buf.len();
        let mut offset = 0;
        let mut fragment = FrameBuf::new();
        while offset < total {
            let fragment_len = IP_MAX_FRAGMENT_PAYLOAD.min(total - offset);
            fragment.init(fragment_len);
            fragment
                .data_mut()
                .copy_from_slice(&buf.data()[offset..offset + fragment_len]);

            let more = offset + fragment_len < total;
            self.ip_fragment_out(&mut fragment, ip, protocol, id, (offset / 8) as u16, more);
            offset += fragment_len;
        }
    }

    /// Wrap one fragment in a 20-byte header and pass it down for MAC
    /// resolution. `offset` is in 8-byte units.
    pub(crate) fn ip_fragment_out<const N: usize>(
        &mut self,
        buf: &mut Buf<N>,
        ip: Ipv4Addr,
        protocol: IpProtocol,
        id: u16,
        offset: u16,
        more_fragments: bool,
    ) {
        buf.add_header(Ipv4Header::BYTE_LEN);

        let mut flags_frag = offset & IP_FRAGMENT_OFFSET_MASK;
        if more_fragments {
            flags_frag |= IP_MORE_FRAGMENTS;
        }
        let hdr = Ipv4Header {
            version_ihl: VersionIhl::new().with_version(4).with_ihl(5),
            tos: 0,
            total_len: buf.len() as u16,
            id,
            flags_frag,
            ttl: IP_DEFAULT_TTL,
            protocol,
            checksum: 0,
            src: self.iface.ipv4,
            dst: ip,
        };
        hdr.write_bytes(&mut buf.data_mut()[..Ipv4Header::BYTE_LEN]);

        let c = checksum(&buf.data()[..Ipv4Header::BYTE_LEN]);
        buf.data_mut()[10..12].copy_from_slice(&c.to_be_bytes());

        self.arp_out(buf, ip);
    }
}
