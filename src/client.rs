//! Per-connection state: the receive buffer, the outbound send queue and the
//! lifecycle bookkeeping (reference count plus disconnect latch).
//!
//! A [`Client`] is created by the engine when a connection is accepted and
//! destroyed only when it has been marked disconnecting *and* no outstanding
//! reference remains. Every in-flight I/O task and every transient accessor
//! holds one reference for its whole lifetime; the engine wraps those
//! references in an RAII guard that re-checks the destruction predicate on
//! drop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Notify;

/// Identifier assigned at accept time; unique and strictly increasing over
/// the server's uptime, never reused.
pub type ClientId = u64;

/// The client fields handed to application workers inside a request envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub ip: String,
    pub port: u16,
}

/// Contiguous per-connection receive buffer.
///
/// The valid bytes are always a prefix of the storage. Assemblers consume
/// from the front only: either the whole prefix of a completed message
/// (`drain_prefix`) or an interior range once it has been emitted (`excise`).
/// On underflow the buffer is left untouched so the next read appends after
/// the unconsumed bytes.
pub struct RecvBuffer {
    storage: Box<[u8]>,
    len: usize,
    last_read: usize,
}

impl RecvBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            last_read: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.storage.len()
    }

    /// Size of the most recent read, zero after a peer close. Kept for
    /// assemblers that frame messages on end-of-stream.
    pub fn last_read(&self) -> usize {
        self.last_read
    }

    /// The valid prefix.
    pub fn filled(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    /// Copy bytes into the spare tail, recording them as one read.
    /// Returns how many bytes fit.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.capacity() - self.len);
        self.storage[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.record_read(n);
        n
    }

    /// Remove the first `n` valid bytes, shifting the tail to offset 0.
    pub fn drain_prefix(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.storage.copy_within(n..self.len, 0);
        self.len -= n;
    }

    /// Remove the interior range `start..end`, shifting the tail left.
    pub fn excise(&mut self, start: usize, end: usize) {
        debug_assert!(start <= end && end <= self.len);
        self.storage.copy_within(end..self.len, start);
        self.len -= end - start;
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub(crate) fn spare_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.storage[len..]
    }

    pub(crate) fn record_read(&mut self, n: usize) {
        self.len += n;
        self.last_read = n;
    }
}

/// Outbound queue and in-flight flag, guarded by the per-client send-mutex.
#[derive(Default)]
pub(crate) struct SendState {
    pub sending: bool,
    pub outbound: VecDeque<Vec<u8>>,
}

pub struct Client {
    id: ClientId,
    peer_ip: String,
    peer_port: u16,
    pub(crate) recv: tokio::sync::Mutex<RecvBuffer>,
    pub(crate) writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    pub(crate) send_state: parking_lot::Mutex<SendState>,
    refs: AtomicU32,
    disconnecting: AtomicBool,
    /// Signalled by a worker once the receive buffer has been assembled,
    /// allowing the read task to arm the next receive.
    pub(crate) rearm: Notify,
    /// Signalled when the client is marked disconnecting so a blocked read
    /// task wakes up and exits.
    pub(crate) abort: Notify,
}

impl Client {
    /// Construct with a reference count of one: the engine's accept
    /// reference, released once the first receive has been armed.
    pub(crate) fn new(
        id: ClientId,
        peer_ip: String,
        peer_port: u16,
        writer: OwnedWriteHalf,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            id,
            peer_ip,
            peer_port,
            recv: tokio::sync::Mutex::new(RecvBuffer::new(buffer_capacity)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            send_state: parking_lot::Mutex::new(SendState::default()),
            refs: AtomicU32::new(1),
            disconnecting: AtomicBool::new(false),
            rearm: Notify::new(),
            abort: Notify::new(),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer_ip(&self) -> &str {
        &self.peer_ip
    }

    pub fn peer_port(&self) -> u16 {
        self.peer_port
    }

    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id,
            ip: self.peer_ip.clone(),
            port: self.peer_port,
        }
    }

    pub fn reference_count(&self) -> u32 {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting.load(Ordering::SeqCst)
    }

    /// Flip the one-way disconnect latch and wake a blocked read task.
    /// Returns true if this call was the one that set it.
    pub(crate) fn begin_disconnect(&self) -> bool {
        let newly = !self.disconnecting.swap(true, Ordering::SeqCst);
        self.abort.notify_one();
        newly
    }

    pub(crate) fn acquire_ref(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop one reference; returns the count after the decrement.
    pub(crate) fn release_ref(&self) -> u32 {
        let prev = self.refs.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0);
        prev - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_buffer_appends_and_tracks_last_read() {
        let mut buf = RecvBuffer::new(16);
        assert_eq!(buf.push_bytes(b"hello"), 5);
        assert_eq!(buf.push_bytes(b" world"), 6);
        assert_eq!(buf.filled(), b"hello world");
        assert_eq!(buf.last_read(), 6);
        assert_eq!(buf.capacity(), 16);
    }

    #[test]
    fn recv_buffer_caps_at_capacity() {
        let mut buf = RecvBuffer::new(4);
        assert_eq!(buf.push_bytes(b"abcdef"), 4);
        assert!(buf.is_full());
        assert_eq!(buf.push_bytes(b"x"), 0);
    }

    #[test]
    fn drain_prefix_keeps_the_tail_at_offset_zero() {
        let mut buf = RecvBuffer::new(16);
        buf.push_bytes(b"abcdef");
        buf.drain_prefix(4);
        assert_eq!(buf.filled(), b"ef");
        buf.drain_prefix(2);
        assert!(buf.is_empty());
    }

    #[test]
    fn excise_removes_an_interior_range() {
        let mut buf = RecvBuffer::new(16);
        buf.push_bytes(b"head-chunk-tail");
        buf.excise(4, 10);
        assert_eq!(buf.filled(), b"head-tail");
    }
}
