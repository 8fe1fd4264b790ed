//! Transport layer: User Datagram Protocol
//!
//! Demultiplexes on destination port through a registration table filled by
//! [`Stack::udp_open`]. Handlers are shared between the v4 and v6 receive
//! paths and see the source as an [`IpAddr`]; the pseudo-header checksum is
//! chosen to match. A datagram for a port nobody opened is answered with
//! port-unreachable over the matching ICMP flavor.

use crate::*;

use byte_struct::*;
use static_assertions::const_assert;

const_assert!(UdpHeader::BYTE_LEN == 8);

/// Port table slots
pub(crate) const UDP_TABLE_SLOTS: usize = 16;

/// Largest payload a single v4 datagram can carry:
/// 65535 minus the IP and UDP headers.
pub const UDP_MAX_PAYLOAD: usize = 65535 - Ipv4Header::BYTE_LEN - UdpHeader::BYTE_LEN;

/// Datagram handler registered for a local port.
///
/// Called with the stack itself (so the handler can transmit), the payload,
/// and the peer's address and port. The payload borrow ends when the handler
/// returns; anything kept must be copied out.
pub type UdpHandler<D> = fn(&mut Stack<D>, &[u8], IpAddr, u16);

/// UDP datagram header structure like
///
/// value [0] source port [u16]
///
/// value [1] destination port [u16]
///
/// value [2] total length in bytes [u16], header + data
///
/// value [3] checksum [u16]
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct UdpHeader {
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// Total length including header and data
    pub length: u16,
    /// Pseudo-header checksum
    pub checksum: u16,
}

impl UdpHeader {
    /// Pack into big-endian (network) byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut header_bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut header_bytes);

        header_bytes
    }
}

/// Checksum a UDP segment against the pseudo-header of whichever IP version
/// carries it. Address families always agree by construction.
fn datagram_checksum(src: &IpAddr, dst: &IpAddr, segment: &[u8]) -> u16 {
    match (src, dst) {
        (IpAddr::V4(s), IpAddr::V4(d)) => transport_checksum_v4(IpProtocol::Udp, segment, s, d),
        (IpAddr::V6(s), IpAddr::V6(d)) => match transport_checksum_v6(IpProtocol::Udp, segment, s, d)
        {
            0 => 0xFFFF,
            c => c,
        },
        _ => 0,
    }
}

impl<D: NetDriver> Stack<D> {
    /// Receive one UDP datagram from either IP version.
    ///
    /// The checksum field is zeroed in place during verification and left
    /// that way, so the header quoted by a port-unreachable reply carries
    /// zero there.
    pub(crate) fn udp_in(&mut self, buf: &mut FrameBuf, src: IpAddr) {
        if buf.len() < UdpHeader::BYTE_LEN {
            return;
        }
        let hdr = UdpHeader::read_bytes(buf.data());
        let total_len = hdr.length as usize;
        if buf.len() < total_len {
            return;
        }

        buf.data_mut()[6..8].copy_from_slice(&[0, 0]);
        let our_addr = match src {
            IpAddr::V4(_) => IpAddr::V4(self.iface.ipv4),
            IpAddr::V6(_) => IpAddr::V6(self.iface.ipv6),
        };
        if datagram_checksum(&src, &our_addr, buf.data()) != hdr.checksum {
            log::debug!("udp: checksum mismatch from {}", src);
            return;
        }

        let handler = self.udp_table.get(&hdr.dst_port, self.now).copied();
        let Some(handler) = handler else {
            match src {
                IpAddr::V4(src_ip) => {
                    // Re-expose the stripped IP header for the quote
                    buf.add_header(Ipv4Header::BYTE_LEN);
                    self.icmp_unreachable(buf, src_ip, IcmpCode::PortUnreach);
                }
                IpAddr::V6(src_ip) => {
                    buf.add_header(Ipv6Header::BYTE_LEN);
                    self.icmpv6_unreachable(buf, src_ip, Icmpv6UnreachCode::PortUnreach);
                }
            }
            return;
        };

        buf.remove_header(UdpHeader::BYTE_LEN);
        handler(self, buf.data(), src, hdr.src_port);
    }

    /// Register a handler for a local port. Fails when the table is full.
    pub fn udp_open(&mut self, port: u16, handler: UdpHandler<D>) -> Result<(), NetError> {
        let now = self.now;
        if !self.udp_table.contains(&port, now) && self.udp_table.len(now) == self.udp_table.capacity()
        {
            return Err(NetError::TableFull);
        }
        self.udp_table.set(port, handler, now);
        Ok(())
    }

    /// Drop the handler for a local port.
    pub fn udp_close(&mut self, port: u16) {
        let now = self.now;
        self.udp_table.remove(&port, now);
    }

    /// Wrap a payload already sitting in `buf` and send it down the v4 path.
    pub(crate) fn udp_out<const N: usize>(
        &mut self,
        buf: &mut Buf<N>,
        src_port: u16,
        dst_ip: Ipv4Addr,
        dst_port: u16,
    ) {
        buf.add_header(UdpHeader::BYTE_LEN);

        let hdr = UdpHeader {
            src_port,
            dst_port,
            length: buf.len() as u16,
            checksum: 0,
        };
        hdr.write_bytes(&mut buf.data_mut()[..UdpHeader::BYTE_LEN]);

        let c = datagram_checksum(
            &IpAddr::V4(self.iface.ipv4),
            &IpAddr::V4(dst_ip),
            buf.data(),
        );
        buf.data_mut()[6..8].copy_from_slice(&c.to_be_bytes());

        self.ip_out(buf, dst_ip, IpProtocol::Udp);
    }

    /// Send one datagram. Payloads beyond a fragment are cut up by the IP
    /// layer; payloads beyond [`UDP_MAX_PAYLOAD`] are a programming error.
    pub fn udp_send(
        &mut self,
        data: &[u8],
        src_port: u16,
        dst_ip: Ipv4Addr,
        dst_port: u16,
    ) {
        assert!(data.len() <= UDP_MAX_PAYLOAD, "datagram too large");
        let mut tx = TxBuf::new();
        tx.init_from(data);
        self.udp_out(&mut tx, src_port, dst_ip, dst_port);
    }
}
