//! Packet buffers with front headroom for header push/pop.
//!
//! Every layer of the transmit path prepends its header to the same buffer,
//! so payload data is laid out right-aligned in the backing storage and the
//! `start` cursor walks backward as headers are added. The receive path runs
//! the cursor the other way, stripping one header per layer; a stripped
//! header stays intact in the backing bytes and can be re-exposed with
//! [`Buf::add_header`], which is how destination-unreachable replies quote
//! the offending packet.
//!
//! Buffers are plain values. Nothing in the stack retains one across a call
//! boundary; the ARP pending queue keeps a byte copy instead (see
//! [`crate::arp`]).

/// Backing capacity for a single link-layer frame plus headroom.
pub const FRAME_BUF_LEN: usize = 1664;

/// Backing capacity for a maximum-size IPv4 datagram payload plus headroom.
/// Large transmits are cut into MTU-sized fragments before they reach the
/// link layer.
pub const TX_BUF_LEN: usize = 65600;

/// Largest frame accepted from the link driver.
pub const MAX_FRAME_LEN: usize = 1600;

/// A packet buffer for one frame off the wire or one outbound reply.
pub type FrameBuf = Buf<FRAME_BUF_LEN>;

/// A packet buffer large enough for any single UDP send before fragmentation.
pub type TxBuf = Buf<TX_BUF_LEN>;

/// Fixed-capacity packet buffer with a movable data window.
///
/// Invariants: `start + len <= N`, and the window only ever moves within the
/// backing array. Violating an operation's precondition is a programming
/// error and asserts.
pub struct Buf<const N: usize> {
    bytes: [u8; N],
    start: usize,
    len: usize,
}

impl<const N: usize> Buf<N> {
    /// An empty buffer with the data window parked at the end, so that the
    /// whole capacity is available as headroom.
    pub const fn new() -> Self {
        Buf {
            bytes: [0_u8; N],
            start: N,
            len: 0,
        }
    }

    /// Reset to a zero-filled payload of `len` bytes, right-aligned so that
    /// every byte in front of it is headroom for `add_header`.
    pub fn init(&mut self, len: usize) {
        assert!(len <= N, "payload does not fit buffer");
        self.start = N - len;
        self.len = len;
        self.bytes[self.start..].fill(0);
    }

    /// Reset and copy `data` in as the payload.
    pub fn init_from(&mut self, data: &[u8]) {
        self.init(data.len());
        self.bytes[self.start..].copy_from_slice(data);
    }

    /// Grow the window backward by `n` bytes; the caller writes the header
    /// into the newly exposed front. Requires `n` bytes of headroom.
    pub fn add_header(&mut self, n: usize) {
        assert!(n <= self.start, "headroom exhausted");
        self.start -= n;
        self.len += n;
    }

    /// Shrink the window from the front by `n` bytes. The dropped bytes stay
    /// in the backing array until the next `init`.
    pub fn remove_header(&mut self, n: usize) {
        assert!(n <= self.len, "header longer than payload");
        self.start += n;
        self.len -= n;
    }

    /// Shrink the window from the back by `n` bytes (link-layer padding).
    pub fn remove_padding(&mut self, n: usize) {
        assert!(n <= self.len, "padding longer than payload");
        self.len -= n;
    }

    /// Cut the window down to `len` bytes, keeping the front.
    pub fn truncate(&mut self, len: usize) {
        assert!(len <= self.len, "cannot truncate to a longer length");
        self.len = len;
    }

    /// Current window length
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the window is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes available in front of the window
    pub fn headroom(&self) -> usize {
        self.start
    }

    /// The data window
    pub fn data(&self) -> &[u8] {
        &self.bytes[self.start..self.start + self.len]
    }

    /// The data window, writable
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[self.start..self.start + self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;

    #[test]
    fn test_init_right_aligns_and_zeroes() {
        let mut buf = Buf::<64>::new();
        buf.init(16);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.headroom(), 48);
        assert!(buf.data().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_header_push_pop_restores_bytes() {
        let mut buf = Buf::<64>::new();
        buf.init_from(&[1, 2, 3, 4]);
        buf.add_header(2);
        buf.data_mut()[0] = 0xAA;
        buf.data_mut()[1] = 0xBB;
        assert_eq!(buf.data(), &[0xAA, 0xBB, 1, 2, 3, 4]);

        buf.remove_header(2);
        assert_eq!(buf.data(), &[1, 2, 3, 4]);

        // A stripped header survives in the backing bytes
        buf.add_header(2);
        assert_eq!(buf.data(), &[0xAA, 0xBB, 1, 2, 3, 4]);
    }

    #[test]
    fn test_remove_padding_and_truncate() {
        let mut buf = Buf::<32>::new();
        buf.init_from(&[9, 8, 7, 6, 5]);
        buf.remove_padding(2);
        assert_eq!(buf.data(), &[9, 8, 7]);
        buf.truncate(1);
        assert_eq!(buf.data(), &[9]);
    }

    #[test]
    #[should_panic(expected = "headroom exhausted")]
    fn test_add_header_without_headroom_panics() {
        let mut buf = Buf::<8>::new();
        buf.init(8);
        buf.add_header(1);
    }

    #[test]
    #[should_panic(expected = "header longer than payload")]
    fn test_remove_header_past_end_panics() {
        let mut buf = Buf::<8>::new();
        buf.init(4);
        buf.remove_header(5);
    }
}
