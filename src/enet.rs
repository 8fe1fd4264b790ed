//! Link layer: Ethernet II protocol
//!
//! Diagram at https://en.wikipedia.org/wiki/Ethernet_frame#Ethernet_II

use crate::*;

use byte_struct::*;
use static_assertions::const_assert;

const_assert!(EthernetHeader::BYTE_LEN == 14);

/// Header for Ethernet II frame like
///
/// value [0:5] dst macaddr ([0xFF_u8; 6] for broadcast)
///
/// value [6:11] src macaddr
///
/// value [12:13] ethertype
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct EthernetHeader {
    /// Destination MAC address
    pub dst_macaddr: MacAddr,
    /// Source MAC address
    pub src_macaddr: MacAddr,
    /// Protocol of the payload
    pub ethertype: EtherType,
}

enum_with_unknown! {
    /// EtherType tag values (incomplete list - there are many more not handled here)
    ///
    /// See https://en.wikipedia.org/wiki/EtherType
    pub enum EtherType(u16) {
        /// IPV4
        Ipv4 = 0x0800,
        /// ARP
        Arp = 0x0806,
        /// IPV6
        Ipv6 = 0x86DD
    }
}

impl ByteStructLen for EtherType {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for EtherType {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut bytes_read = [0_u8; 2];
        bytes_read.copy_from_slice(&bytes[0..=1]);
        EtherType::from(u16::from_be_bytes(bytes_read))
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        let bytes_to_write = u16::from(*self).to_be_bytes();
        bytes[0] = bytes_to_write[0];
        bytes[1] = bytes_to_write[1];
    }
}

impl<D: NetDriver> Stack<D> {
    /// Receive one frame from the link.
    ///
    /// Frames not addressed to us (our MAC, broadcast, or the 33:33 IPv6
    /// multicast range) are dropped without a word, as are runts.
    pub(crate) fn ethernet_in(&mut self, buf: &mut FrameBuf) {
        if buf.len() < EthernetHeader::BYTE_LEN {
            return;
        }
        let hdr = EthernetHeader::read_bytes(buf.data());

        let dst = hdr.dst_macaddr;
        if dst != self.iface.mac && dst != MacAddr::BROADCAST && !dst.is_ipv6_multicast() {
            return;
        }

        buf.remove_header(EthernetHeader::BYTE_LEN);

        match hdr.ethertype {
            EtherType::Arp => self.arp_in(buf),
            EtherType::Ipv4 => self.ip_in(buf),
            EtherType::Ipv6 => self.ipv6_in(buf),
            EtherType::Unknown(other) => {
                log::trace!("ethernet: dropping unknown ethertype {:#06x}", other)
            }
        }
    }

    /// Prepend the 14-byte link header and hand the frame to the driver.
    ///
    /// Transmit failures are logged and swallowed; only receive failures
    /// terminate the poll loop.
    pub(crate) fn ethernet_out<const N: usize>(
        &mut self,
        buf: &mut Buf<N>,
        dst_macaddr: MacAddr,
        ethertype: EtherType,
    ) {
        buf.add_header(EthernetHeader::BYTE_LEN);
        let hdr = EthernetHeader {
            dst_macaddr,
            src_macaddr: self.iface.mac,
            ethertype,
        };
        hdr.write_bytes(&mut buf.data_mut()[..EthernetHeader::BYTE_LEN]);

        if self.driver.send(buf.data()).is_err() {
            log::warn!("ethernet: driver rejected a {} byte frame", buf.len());
        }
    }
}
