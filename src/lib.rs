//! A no-std, heapless user-space TCP/IP stack core.
//!
//! Frames come in from a tap-style link driver (anything implementing
//! [`NetDriver`]) and travel up a layered receive pipeline:
//! Ethernet → ARP / IPv4 / IPv6 → ICMP / ICMPv6 / UDP → application handler.
//! Transmit runs the same layers in reverse, with IPv4 fragmentation and
//! ARP resolve-then-send deferral in between.
//!
//! All protocol state — ARP cache, pending-resolution queue, UDP port table,
//! echo-request tracking — lives in a single [`Stack`] value constructed at
//! init and polled from a cooperative single-threaded loop. Timers are
//! passive: the caller supplies a seconds-granularity clock value to the
//! entry points and expiry is checked on every map access.
//!
//! ```rust
//! use tapstack::*;
//!
//! struct NullDriver;
//!
//! impl NetDriver for NullDriver {
//!     fn recv(&mut self, _frame: &mut [u8]) -> Result<usize, NetError> {
//!         Ok(0) // nothing pending
//!     }
//!     fn send(&mut self, _frame: &[u8]) -> Result<(), NetError> {
//!         Ok(())
//!     }
//! }
//!
//! let mac = MacAddr::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
//! let ip = Ipv4Addr::new([10, 0, 0, 2]);
//! let mut stack = Stack::new(NullDriver, mac, ip, 0);
//!
//! // Link-local IPv6 identity is derived from the MAC at init (EUI-64).
//! assert_eq!(stack.iface.ipv6.0[0], 0xfe);
//!
//! while stack.poll(0).expect("driver failure") {}
//! ```

#![no_std]
#![allow(dead_code)]
#![deny(missing_docs)]

pub use byte_struct::{ByteStruct, ByteStructLen};
pub use ufmt::{derive::uDebug, uDebug, uDisplay, uWrite};

pub mod buf; // Packet buffer with front headroom for header push/pop
pub mod map; // Expiring maps (ARP cache, pending queue, demux tables)

pub mod enet; // Link layer
pub mod ip; // Internet layer, v4
pub mod ipv6; // Internet layer, v6
pub mod udp; // Transport layer

pub mod arp; // Address Resolution Protocol - between link and internet, required for IPv4 on ethernet
pub mod icmp; // Control messages and ping client for IPv4
pub mod icmpv6; // Control messages and neighbor discovery for IPv6

pub mod stack; // Interface identity, protocol registry, poll loop

pub use arp::*;
pub use buf::*;
pub use enet::*;
pub use icmp::*;
pub use icmpv6::*;
pub use ip::*;
pub use ipv6::*;
pub use map::*;
pub use stack::*;
pub use udp::*;

/// Standard 6-byte MAC address.
/// Split 24/24 format, Block ID | Device ID .
/// Locally-administered addresses are [0x02, ...], [0x06, ...], [0x0A, ...], [0x0E, ...]
pub type MacAddr = ByteArray<6>;

impl MacAddr {
    /// New from bytes
    pub const fn new(v: [u8; 6]) -> Self {
        ByteArray(v)
    }

    /// Broadcast address (all ones)
    pub const BROADCAST: MacAddr = ByteArray([0xFF_u8; 6]);

    /// Any address (all zeroes)
    pub const ANY: MacAddr = ByteArray([0x0_u8; 6]);

    /// IPv6 multicast MAC addresses start with 33:33
    pub fn is_ipv6_multicast(&self) -> bool {
        self.0[0] == 0x33 && self.0[1] == 0x33
    }
}

/// IPV4 address as bytes
pub type Ipv4Addr = ByteArray<4>;

impl Ipv4Addr {
    /// New from bytes
    pub const fn new(v: [u8; 4]) -> Self {
        ByteArray(v)
    }

    /// Broadcast address (all ones)
    pub const BROADCAST: Ipv4Addr = ByteArray([0xFF_u8; 4]);

    /// Any address (all zeroes)
    pub const ANY: Ipv4Addr = ByteArray([0x0_u8; 4]);
}

/// IPV6 address as bytes
pub type Ipv6Addr = ByteArray<16>;

/// A source or destination address handed to transport-layer handlers.
///
/// UDP and registered upper protocols are shared between the v4 and v6
/// receive paths, so their handlers take this instead of a fixed-width
/// address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpAddr {
    /// 4-byte IPv4 address
    V4(Ipv4Addr),
    /// 16-byte IPv6 address
    V6(Ipv6Addr),
}

impl uDebug for IpAddr {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        match self {
            IpAddr::V4(a) => <Ipv4Addr as uDebug>::fmt(a, f),
            IpAddr::V6(a) => <Ipv6Addr as uDebug>::fmt(a, f),
        }
    }
}

enum_with_unknown! {
    /// Transport-layer protocol numbers as they appear in the IPv4 protocol
    /// field and the IPv6 next-header field.
    /// There are many more not listed here; see
    /// <https://en.wikipedia.org/wiki/List_of_IP_protocol_numbers>.
    pub enum IpProtocol(u8) {
        /// Internet Control Message Protocol
        Icmp = 1,
        /// Transmission Control Protocol
        Tcp = 6,
        /// User Datagram Protocol
        Udp = 17,
        /// Internet Control Message Protocol for IPv6
        Icmpv6 = 58
    }
}

impl ByteStructLen for IpProtocol {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for IpProtocol {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

/// Newtype for [u8; N] in order to be able to implement traits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ByteArray<const N: usize>(pub [u8; N]);

impl<const N: usize> ByteStructLen for ByteArray<N> {
    const BYTE_LEN: usize = N;
}

impl<const N: usize> ByteStruct for ByteArray<N> {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut out = [0_u8; N];
        out.copy_from_slice(&bytes[0..N]);
        ByteArray(out)
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        for i in 0..N {
            bytes[i] = self.0[i];
        }
    }
}

impl<const N: usize> ByteArray<N> {
    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; N] {
        self.0
    }
}

impl uDebug for ByteArray<4> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        <[u8; 4] as uDebug>::fmt(&self.0, f)
    }
}

impl uDebug for ByteArray<6> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        <[u8; 6] as uDebug>::fmt(&self.0, f)
    }
}

impl uDebug for ByteArray<16> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        <[u8; 16] as uDebug>::fmt(&self.0, f)
    }
}

impl core::fmt::Display for ByteArray<4> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl core::fmt::Display for ByteArray<6> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl core::fmt::Display for ByteArray<16> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        // Mapped v4 addresses get the conventional ::ffff:a.b.c.d rendering,
        // everything else the full eight-group form.
        if self.is_ipv4_mapped() {
            return write!(
                f,
                "::ffff:{}.{}.{}.{}",
                self.0[12], self.0[13], self.0[14], self.0[15]
            );
        }
        for i in 0..8 {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}{:02x}", self.0[2 * i], self.0[2 * i + 1])?;
        }
        Ok(())
    }
}

impl core::fmt::Display for IpAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            IpAddr::V4(a) => core::fmt::Display::fmt(a, f),
            IpAddr::V6(a) => core::fmt::Display::fmt(a, f),
        }
    }
}

/// Derive To/From with an added "Unknown" variant catch-all for converting
/// from numerical values that do not match a valid variant in order to
/// avoid either panicking or cumbersome error handling.
///
/// Yoinked shamelessly (with some modification) from smoltcp.
#[macro_export]
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        #[derive(Debug, uDebug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// Catch-all for values that do not match a variant
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

/// Calculate IP checksum per IETF-RFC-768
/// following implementation guide in IETF-RFC-1071 section 4.1 .
/// See <https://datatracker.ietf.org/doc/html/rfc1071#section-4> .
///
/// A trailing odd byte is folded as the high-order byte of a final word,
/// as if the data were padded with one zero byte at the end.
pub fn checksum(data: &[u8]) -> u16 {
    // Partial calc
    let sum = checksum_accumulate(data);
    // Fold and flip
    let checksum = checksum_finalize(sum);

    checksum
}

/// Finalize an IP checksum by folding the accumulator from a [u32]
/// to a [u16] and taking the one's complement
pub fn checksum_finalize(sum: u32) -> u16 {
    // Copy to avoid mutating the input, which may be used for something else
    // since some checksums relate to overlapping data
    let mut sum = sum;

    // Fold 32-bit accumulator into 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    // Convert to u16 and take bitwise complement
    let checksum = !(sum as u16);

    checksum
}

/// Calculate an IP checksum on incomplete data
/// returning the unfolded accumulator as [u32]
///
/// This is a slowish method by about a factor of 2-4.
/// It would be faster to cast pairs of bytes to u16,
/// but this method avoids generating panic branches in slice operations.
pub fn checksum_accumulate(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut i: usize = 0;

    for x in data {
        if i % 2 == 0 {
            sum += (*x as u32) << 8;
        } else {
            sum += *x as u32;
        };

        i += 1;
    }

    sum
}

/// One's-complement checksum that folds a trailing odd byte into the
/// low-order byte of the final word, as if the data were padded with one
/// zero byte *in front of* the straggler.
///
/// Echo replies are summed this way while destination-unreachable messages
/// use [checksum]; peers verify each arithmetic bit-for-bit, so the two
/// variants must stay distinct.
pub fn checksum_trailing_low(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let words = data.len() / 2;

    for i in 0..words {
        sum += ((data[2 * i] as u32) << 8) | data[2 * i + 1] as u32;
    }
    if data.len() % 2 == 1 {
        sum += data[data.len() - 1] as u32;
    }

    checksum_finalize(sum)
}

/// Transport checksum over the IPv4 pseudo-header
/// `src ‖ dst ‖ 0 ‖ protocol ‖ length` followed by the transport segment.
///
/// A result of zero is transmitted as 0xFFFF per the usual convention.
pub fn transport_checksum_v4(
    protocol: IpProtocol,
    segment: &[u8],
    src: &Ipv4Addr,
    dst: &Ipv4Addr,
) -> u16 {
    let mut sum: u32 = 0;
    sum += checksum_accumulate(&src.0);
    sum += checksum_accumulate(&dst.0);
    sum += u8::from(protocol) as u32;
    sum += segment.len() as u32;
    sum += checksum_accumulate(segment);

    match checksum_finalize(sum) {
        0 => 0xFFFF,
        c => c,
    }
}

/// Transport checksum over the IPv6 pseudo-header
/// `src ‖ dst ‖ upper_len (32-bit) ‖ 0,0,0 ‖ next_header` followed by the
/// upper-layer message. Used by ICMPv6 and by UDP over IPv6.
pub fn transport_checksum_v6(
    next_header: IpProtocol,
    message: &[u8],
    src: &Ipv6Addr,
    dst: &Ipv6Addr,
) -> u16 {
    let mut sum: u32 = 0;
    sum += checksum_accumulate(&src.0);
    sum += checksum_accumulate(&dst.0);
    let len = message.len() as u32;
    sum += (len >> 16) & 0xFFFF;
    sum += len & 0xFFFF;
    sum += u8::from(next_header) as u32;
    sum += checksum_accumulate(message);

    checksum_finalize(sum)
}

#[cfg(test)]
mod test {

    use crate::*;
    extern crate std;
    use std::*;

    #[test]
    fn test_ipv4_header_checksum_roundtrip() -> () {
        let src: Ipv4Addr = Ipv4Addr::new([10, 0, 0, 1]);
        let dst: Ipv4Addr = Ipv4Addr::new([10, 0, 0, 2]);
        let mut header = Ipv4Header {
            version_ihl: VersionIhl::new().with_version(4).with_ihl(5),
            tos: 0,
            total_len: 20 + 8,
            id: 0,
            flags_frag: 0,
            ttl: 64,
            protocol: IpProtocol::Udp,
            checksum: 0,
            src,
            dst,
        };
        let checksum_pre = checksum(&header.to_be_bytes());
        header.checksum = checksum_pre;
        let checksum_post = checksum(&header.to_be_bytes());

        assert!(checksum_post == 0)
    }

    #[test]
    fn test_odd_trailing_byte_conventions_differ() {
        let data = [0x12u8, 0x34, 0xab];
        // High-order fold: virtual final word 0xab00
        assert_eq!(checksum(&data), !(0x1234u16 + 0xab00));
        // Low-order fold: virtual final word 0x00ab
        assert_eq!(checksum_trailing_low(&data), !(0x1234u16 + 0x00ab));
        // Even lengths agree
        let even = [0x12u8, 0x34, 0x56, 0x78];
        assert_eq!(checksum(&even), checksum_trailing_low(&even));
    }

    #[test]
    fn test_transport_checksum_v4_symmetric() {
        let src = Ipv4Addr::new([10, 0, 0, 1]);
        let dst = Ipv4Addr::new([10, 0, 0, 2]);
        let mut segment = [
            0x04u8, 0x00, // src port 1024
            0x00, 0x35, // dst port 53
            0x00, 0x0a, // length 10
            0x00, 0x00, // checksum
            0x68, 0x69, // "hi"
        ];
        let c = transport_checksum_v4(IpProtocol::Udp, &segment, &src, &dst);
        segment[6..8].copy_from_slice(&c.to_be_bytes());

        // Receiver recomputation with the checksum field zeroed sees the
        // same value it received.
        let mut verify = segment;
        verify[6..8].copy_from_slice(&[0, 0]);
        assert_eq!(
            transport_checksum_v4(IpProtocol::Udp, &verify, &src, &dst),
            c
        );
    }

    #[test]
    fn test_transport_checksum_v6_folds_to_all_ones() {
        let src = Ipv6Addr::link_local_from_mac(&MacAddr::new([2, 0, 0, 0, 0, 1]));
        let dst = Ipv6Addr::link_local_from_mac(&MacAddr::new([2, 0, 0, 0, 0, 2]));
        let mut message = [128u8, 0, 0, 0, 0, 1, 0, 1, 0x61, 0x62];
        let c = transport_checksum_v6(IpProtocol::Icmpv6, &message, &src, &dst);
        message[2..4].copy_from_slice(&c.to_be_bytes());

        // Summing the whole message including its checksum folds to zero
        // after the final complement.
        let mut sum = checksum_accumulate(&src.0);
        sum += checksum_accumulate(&dst.0);
        sum += message.len() as u32;
        sum += u8::from(IpProtocol::Icmpv6) as u32;
        sum += checksum_accumulate(&message);
        assert_eq!(checksum_finalize(sum), 0);
    }

    #[test]
    fn test_ip_addr_display() {
        assert_eq!(
            std::format!("{}", Ipv4Addr::new([192, 168, 1, 9])),
            "192.168.1.9"
        );
        assert_eq!(
            std::format!("{}", MacAddr::new([0xaa, 0xbb, 0xcc, 0, 1, 2])),
            "aa:bb:cc:00:01:02"
        );
        let mapped = Ipv6Addr::from_ipv4(&Ipv4Addr::new([1, 2, 3, 4]));
        assert_eq!(std::format!("{}", mapped), "::ffff:1.2.3.4");
    }
}
