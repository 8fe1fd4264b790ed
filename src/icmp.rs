//! Control messages for IPv4: echo service, destination-unreachable
//! emission, and a small client-side ping tracker.
//!
//! Echo requests are answered by copying the whole message back with the
//! type flipped. Outbound echo requests are remembered by sequence number so
//! that a matching reply yields a round-trip time; records vanish after
//! [`PING_TIMEOUT_SEC`] and a late reply is ignored.
//!
//! Two different one's-complement arithmetics are in play here: echo replies
//! fold a trailing odd byte with [`checksum_trailing_low`], destination-
//! unreachable messages with [`checksum`]. Peers verify each bit-for-bit, so
//! neither path may borrow the other's sum.

use crate::*;

use byte_struct::*;
use static_assertions::const_assert;

const_assert!(IcmpHeader::BYTE_LEN == 8);

/// Seconds an unanswered echo request stays tracked
pub const PING_TIMEOUT_SEC: u64 = 5;

/// Payload bytes carried by an outbound echo request
pub const PING_PAYLOAD_LEN: usize = 56;

/// Echo-request tracking slots
pub(crate) const PING_TRACK_SLOTS: usize = 16;

enum_with_unknown! {
    /// ICMP message types handled here
    pub enum IcmpType(u8) {
        /// Answer to an echo request
        EchoReply = 0,
        /// Destination unreachable family of errors
        DestUnreachable = 3,
        /// Echo request ("ping")
        EchoRequest = 8
    }
}

impl ByteStructLen for IcmpType {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for IcmpType {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

enum_with_unknown! {
    /// Destination-unreachable codes we originate
    pub enum IcmpCode(u8) {
        /// The datagram's protocol has no handler here
        ProtocolUnreach = 2,
        /// The datagram's UDP port is not open here
        PortUnreach = 3
    }
}

/// Fixed 8-byte ICMP header; for unreachable messages the id and seq words
/// are unused and zero.
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct IcmpHeader {
    /// Message type
    pub icmp_type: IcmpType,
    /// Type-specific code
    pub code: u8,
    /// Checksum over the whole ICMP message
    pub checksum: u16,
    /// Echo identifier
    pub id: u16,
    /// Echo sequence number
    pub seq: u16,
}

impl IcmpHeader {
    /// Pack into big-endian (network) byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

/// One outstanding echo request, keyed in the tracker by sequence number.
#[derive(Clone, Copy, Debug)]
pub struct PingRecord {
    /// Identifier the request went out with
    pub id: u16,
    /// Sequence number the request went out with
    pub seq: u16,
    /// Clock reading at transmit, whole seconds
    pub sent_at: u64,
    /// Where the request went
    pub dest: Ipv4Addr,
}

/// Running totals for the ping client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PingStats {
    /// Requests transmitted
    pub sent: u32,
    /// Replies matched to a tracked request
    pub received: u32,
    /// Fastest round trip, milliseconds
    pub min_ms: u64,
    /// Slowest round trip, milliseconds
    pub max_ms: u64,
    /// Sum of round trips, for the average
    pub total_ms: u64,
}

impl PingStats {
    /// Lost requests as a percentage of those sent
    pub fn loss_percent(&self) -> u32 {
        if self.sent == 0 {
            return 0;
        }
        (self.sent - self.received) * 100 / self.sent
    }

    /// Mean round trip in milliseconds, zero before any reply
    pub fn avg_ms(&self) -> u64 {
        if self.received == 0 {
            return 0;
        }
        self.total_ms / self.received as u64
    }
}

impl<D: NetDriver> Stack<D> {
    /// Receive one ICMP message: answer echo requests, fold matching echo
    /// replies into the ping statistics, ignore the rest.
    pub(crate) fn icmp_in(&mut self, buf: &mut FrameBuf, src_ip: Ipv4Addr) {
        if buf.len() < IcmpHeader::BYTE_LEN {
            return;
        }
        let hdr = IcmpHeader::read_bytes(buf.data());

        match hdr.icmp_type {
            IcmpType::EchoRequest => self.icmp_echo_reply(buf, src_ip),
            IcmpType::EchoReply => {
                let now = self.now;
                if let Some(record) = self.ping_track.remove(&hdr.seq, now) {
                    let rtt_ms = (now - record.sent_at) * 1000;
                    log::debug!(
                        "{} bytes from {}: icmp_seq={} time={} ms",
                        buf.len(),
                        src_ip,
                        hdr.seq,
                        rtt_ms
                    );
                    let stats = &mut self.ping_stats;
                    stats.received += 1;
                    stats.total_ms += rtt_ms;
                    if stats.received == 1 || rtt_ms < stats.min_ms {
                        stats.min_ms = rtt_ms;
                    }
                    if rtt_ms > stats.max_ms {
                        stats.max_ms = rtt_ms;
                    }
                }
            }
            _ => {}
        }
    }

    /// Copy the request back with the type flipped to reply.
    fn icmp_echo_reply(&mut self, request: &FrameBuf, src_ip: Ipv4Addr) {
        let mut tx = FrameBuf::new();
        tx.init_from(request.data());

        let data = tx.data_mut();
        data[0] = u8::from(IcmpType::EchoReply);
        data[2] = 0;
        data[3] = 0;
        let c = checksum_trailing_low(tx.data());
        tx.data_mut()[2..4].copy_from_slice(&c.to_be_bytes());

        self.ip_out(&mut tx, src_ip, IpProtocol::Icmp);
    }

    /// Tell `src_ip` its datagram could not be delivered.
    ///
    /// `recv_buf` must start at the offending IP header; the message quotes
    /// that header plus up to 8 payload bytes.
    pub(crate) fn icmp_unreachable(
        &mut self,
        recv_buf: &FrameBuf,
        src_ip: Ipv4Addr,
        code: IcmpCode,
    ) {
        let original = recv_buf.data();
        if original.len() < Ipv4Header::BYTE_LEN {
            return;
        }
        let ip_header_len = ((original[0] & 0x0F) as usize) * 4;
        let payload_quote = 8.min(original.len().saturating_sub(ip_header_len));
        let quote_len = ip_header_len + payload_quote;

        let mut tx = FrameBuf::new();
        tx.init(IcmpHeader::BYTE_LEN + quote_len);

        let hdr = IcmpHeader {
            icmp_type: IcmpType::DestUnreachable,
            code: u8::from(code),
            checksum: 0,
            id: 0,
            seq: 0,
        };
        hdr.write_bytes(&mut tx.data_mut()[..IcmpHeader::BYTE_LEN]);
        tx.data_mut()[IcmpHeader::BYTE_LEN..].copy_from_slice(&original[..quote_len]);

        let c = checksum(tx.data());
        tx.data_mut()[2..4].copy_from_slice(&c.to_be_bytes());

        self.ip_out(&mut tx, src_ip, IpProtocol::Icmp);
    }

    /// Transmit one echo request to `dest` and start tracking it.
    ///
    /// The payload is the classic 56-byte ramp; the sequence number is the
    /// running sent count and the identifier a stack-wide counter.
    pub fn ping_request(&mut self, dest: Ipv4Addr, now: u64) {
        self.now = now;

        let mut tx = FrameBuf::new();
        tx.init(PING_PAYLOAD_LEN);
        for (i, b) in tx.data_mut().iter_mut().enumerate() {
            *b = i as u8;
        }

        tx.add_header(IcmpHeader::BYTE_LEN);
        let seq = self.ping_stats.sent as u16;
        let hdr = IcmpHeader {
            icmp_type: IcmpType::EchoRequest,
            code: 0,
            checksum: 0,
            id: self.ping_id,
            seq,
        };
        hdr.write_bytes(&mut tx.data_mut()[..IcmpHeader::BYTE_LEN]);
        let c = checksum(tx.data());
        tx.data_mut()[2..4].copy_from_slice(&c.to_be_bytes());

        let record = PingRecord {
            id: self.ping_id,
            seq,
            sent_at: now,
            dest,
        };
        self.ping_track.set(seq, record, now);

        self.ip_out(&mut tx, dest, IpProtocol::Icmp);

        self.ping_stats.sent += 1;
        self.ping_id = self.ping_id.wrapping_add(1);
    }

    /// Snapshot of the ping counters.
    pub fn ping_stats(&self) -> PingStats {
        self.ping_stats
    }

    /// Echo requests still waiting on a reply.
    pub fn pending_ping_count(&mut self, now: u64) -> usize {
        self.ping_track.len(now)
    }

    /// Write the familiar closing statistics block to `w`.
    pub fn write_ping_report<W: uWrite>(&self, w: &mut W) -> Result<(), W::Error> {
        let stats = self.ping_stats;
        ufmt::uwriteln!(w, "--- ping statistics ---")?;
        ufmt::uwriteln!(
            w,
            "{} packets transmitted, {} received, {}% packet loss",
            stats.sent,
            stats.received,
            stats.loss_percent()
        )?;
        if stats.received > 0 {
            ufmt::uwriteln!(
                w,
                "rtt min/avg/max = {}/{}/{} ms",
                stats.min_ms,
                stats.avg_ms(),
                stats.max_ms
            )?;
        }
        Ok(())
    }
}
