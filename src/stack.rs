//! The stack itself: interface identity, protocol state, and the poll loop.
//!
//! Everything the protocol layers share — the link driver, our addresses,
//! the ARP cache and pending queue, the UDP port table, ping tracking, the
//! upper-protocol registry and the IP identification counter — lives in one
//! [`Stack`] value. Processing is single-threaded and run-to-completion:
//! each call to [`Stack::poll`] takes at most one frame from the driver and
//! every side effect of that frame, replies included, has happened by the
//! time it returns.
//!
//! There are no internal clocks. Entry points take the current time in whole
//! seconds and the expiring maps compare against it lazily.

use crate::*;

/// Errors surfaced to the embedding application. Network-level problems
/// (malformed frames, checksum mismatches, unresolvable peers) never show up
/// here; they are drops, visible only to the logger.
#[derive(Clone, Copy, Debug, uDebug, PartialEq, Eq)]
pub enum NetError {
    /// The link driver failed fatally; the poll loop should terminate.
    Driver,
    /// A fixed-size registration table has no free slot.
    TableFull,
}

impl core::fmt::Display for NetError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            NetError::Driver => write!(f, "link driver failure"),
            NetError::TableFull => write!(f, "registration table full"),
        }
    }
}

/// The link beneath the stack: a tap device, a pcap replay, or a test
/// harness.
pub trait NetDriver {
    /// Fetch one frame into `frame` without blocking. `Ok(0)` means nothing
    /// is pending; an error is fatal and stops the poll loop.
    fn recv(&mut self, frame: &mut [u8]) -> Result<usize, NetError>;

    /// Put one complete frame on the wire.
    fn send(&mut self, frame: &[u8]) -> Result<(), NetError>;
}

/// Handler for an IP protocol the stack itself does not terminate (TCP, or
/// anything experimental). The buffer starts at the protocol's own header;
/// the source address follows the IP version that carried the packet.
pub type ProtocolHandler<D> = fn(&mut Stack<D>, &mut FrameBuf, IpAddr);

/// Slots for registered upper protocols
pub(crate) const PROTOCOL_TABLE_SLOTS: usize = 4;

/// Who we are on the link.
#[derive(Clone, Copy, Debug, uDebug)]
pub struct Interface {
    /// Our MAC address
    pub mac: MacAddr,
    /// Our IPv4 address
    pub ipv4: Ipv4Addr,
    /// Our link-local IPv6 address, derived from the MAC at init
    pub ipv6: Ipv6Addr,
}

/// One interface's worth of protocol machinery.
pub struct Stack<D: NetDriver> {
    /// Interface identity; fixed after construction
    pub iface: Interface,
    pub(crate) driver: D,
    pub(crate) now: u64,
    pub(crate) arp_cache: ExpiringMap<Ipv4Addr, MacAddr, ARP_CACHE_SLOTS>,
    pub(crate) arp_pending: ExpiringMap<Ipv4Addr, PendingFrame, ARP_PENDING_SLOTS>,
    pub(crate) udp_table: ExpiringMap<u16, UdpHandler<D>, UDP_TABLE_SLOTS>,
    pub(crate) ping_track: ExpiringMap<u16, PingRecord, PING_TRACK_SLOTS>,
    pub(crate) ping_stats: PingStats,
    pub(crate) ping_id: u16,
    pub(crate) ip_id: u16,
    pub(crate) protocols: heapless::Vec<(IpProtocol, ProtocolHandler<D>), PROTOCOL_TABLE_SLOTS>,
}

impl<D: NetDriver> Stack<D> {
    /// Bring the interface up.
    ///
    /// Derives the link-local IPv6 identity from the MAC and announces the
    /// IPv4 address with a gratuitous ARP request, which doubles as a
    /// duplicate-address probe.
    pub fn new(driver: D, mac: MacAddr, ipv4: Ipv4Addr, now: u64) -> Self {
        let iface = Interface {
            mac,
            ipv4,
            ipv6: Ipv6Addr::link_local_from_mac(&mac),
        };
        let mut stack = Stack {
            iface,
            driver,
            now,
            arp_cache: ExpiringMap::new(ARP_CACHE_TIMEOUT_SEC),
            arp_pending: ExpiringMap::new(ARP_PENDING_TIMEOUT_SEC),
            udp_table: ExpiringMap::new(0),
            ping_track: ExpiringMap::new(PING_TIMEOUT_SEC),
            ping_stats: PingStats::default(),
            ping_id: 0,
            ip_id: 0,
            protocols: heapless::Vec::new(),
        };
        log::info!(
            "stack up: mac {} ipv4 {} ipv6 {}",
            iface.mac,
            iface.ipv4,
            iface.ipv6
        );
        stack.arp_request(ipv4);
        stack
    }

    /// Take one frame from the driver and run it through the pipeline.
    ///
    /// Returns `Ok(true)` when a frame was processed, `Ok(false)` when the
    /// link was idle, and the driver's error when reception fails fatally.
    pub fn poll(&mut self, now: u64) -> Result<bool, NetError> {
        self.now = now;

        let mut rx = FrameBuf::new();
        rx.init(MAX_FRAME_LEN);
        let n = self.driver.recv(rx.data_mut())?;
        if n == 0 {
            return Ok(false);
        }
        rx.truncate(n);

        self.ethernet_in(&mut rx);
        Ok(true)
    }

    /// Route an IP protocol nobody else terminates to `handler`. This is
    /// where a TCP implementation attaches itself.
    pub fn register_protocol(
        &mut self,
        protocol: IpProtocol,
        handler: ProtocolHandler<D>,
    ) -> Result<(), NetError> {
        if let Some(slot) = self.protocols.iter_mut().find(|(p, _)| *p == protocol) {
            slot.1 = handler;
            return Ok(());
        }
        self.protocols
            .push((protocol, handler))
            .map_err(|_| NetError::TableFull)
    }

    /// Remove a registered protocol handler.
    pub fn unregister_protocol(&mut self, protocol: IpProtocol) {
        if let Some(i) = self.protocols.iter().position(|(p, _)| *p == protocol) {
            self.protocols.swap_remove(i);
        }
    }

    /// Look up a registered handler.
    pub(crate) fn registered_protocol(&self, protocol: IpProtocol) -> Option<ProtocolHandler<D>> {
        self.protocols
            .iter()
            .find(|(p, _)| *p == protocol)
            .map(|(_, h)| *h)
    }

    /// Hand the driver back, tearing the stack down.
    pub fn shutdown(self) -> D {
        self.driver
    }
}
