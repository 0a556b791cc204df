//! `StreamPair` (spec.md §3): the even/odd RTP+RTCP socket pair bound to one
//! side of a call, plus the per-direction state the dispatcher touches
//! (advertised remote address, codecs-on-record, packet counters, TTL).

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Per-call-leg default TTL (spec.md §5 "sessions have per-direction TTLs
/// refreshed on packet arrival"). Not specified numerically in the source
/// fragments retained here; chosen to comfortably outlast a SIP re-INVITE
/// cycle without leaking abandoned streams — see `DESIGN.md`.
pub const DEFAULT_STREAM_TTL: Duration = Duration::from_secs(60);

/// One side of a call: the bound RTP/RTCP socket pair and everything the
/// dispatcher needs to relay, record, or play back on it.
pub struct StreamPair {
    rtp_socket: UdpSocket,
    rtcp_socket: UdpSocket,
    local_port: u16,
    /// The address advertised by `UPDATE`/`LOOKUP` (from the SIP offer/answer).
    /// The forwarder may instead *learn* the true peer address from the first
    /// arriving packet; that relearning is the external forwarder's job and
    /// is not modeled here — this field is the control-plane hint it starts
    /// from.
    remote_addr: RwLock<Option<SocketAddr>>,
    /// Codecs recorded at last `UPDATE`/`LOOKUP`, reused when `PLAY` is given
    /// the literal codecs argument `session` (spec.md §4.8).
    codecs: RwLock<Option<String>>,
    packets_received: AtomicU64,
    packets_relayed: AtomicU64,
    ttl: RwLock<Duration>,
    last_activity: RwLock<Instant>,
}

impl StreamPair {
    /// Invariant: `rtcp_port == rtp_port + 1`, enforced by every constructor
    /// of a bound pair ([`crate::ports::PortPairAllocator::allocate`]) rather
    /// than re-checked here.
    pub fn new(rtp_socket: UdpSocket, rtcp_socket: UdpSocket, local_port: u16) -> Self {
        Self {
            rtp_socket,
            rtcp_socket,
            local_port,
            remote_addr: RwLock::new(None),
            codecs: RwLock::new(None),
            packets_received: AtomicU64::new(0),
            packets_relayed: AtomicU64::new(0),
            ttl: RwLock::new(DEFAULT_STREAM_TTL),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    pub fn rtp_socket(&self) -> &UdpSocket {
        &self.rtp_socket
    }

    pub fn rtcp_socket(&self) -> &UdpSocket {
        &self.rtcp_socket
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        *self.remote_addr.read()
    }

    pub fn set_remote_addr(&self, addr: SocketAddr) {
        *self.remote_addr.write() = Some(addr);
    }

    pub fn codecs(&self) -> Option<String> {
        self.codecs.read().clone()
    }

    pub fn set_codecs(&self, codecs: impl Into<String>) {
        *self.codecs.write() = Some(codecs.into());
    }

    pub fn record_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_relayed(&self) {
        self.packets_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn packets_relayed(&self) -> u64 {
        self.packets_relayed.load(Ordering::Relaxed)
    }

    pub fn set_ttl(&self, ttl: Duration) {
        *self.ttl.write() = ttl;
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn is_expired(&self) -> bool {
        self.last_activity.read().elapsed() > *self.ttl.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound_pair(base_port: u16) -> (UdpSocket, UdpSocket) {
        let rtp = UdpSocket::bind(("127.0.0.1", base_port)).unwrap();
        let rtcp = UdpSocket::bind(("127.0.0.1", base_port + 1)).unwrap();
        (rtp, rtcp)
    }

    #[test]
    fn fresh_pair_is_not_expired() {
        let (rtp, rtcp) = bound_pair(47100);
        let pair = StreamPair::new(rtp, rtcp, 47100);
        assert!(!pair.is_expired());
    }

    #[test]
    fn zero_ttl_pair_expires_immediately() {
        let (rtp, rtcp) = bound_pair(47102);
        let pair = StreamPair::new(rtp, rtcp, 47102);
        pair.set_ttl(Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(pair.is_expired());
    }

    #[test]
    fn record_received_touches_last_activity() {
        let (rtp, rtcp) = bound_pair(47104);
        let pair = StreamPair::new(rtp, rtcp, 47104);
        pair.set_ttl(Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(30));
        assert!(pair.is_expired());
        pair.record_received();
        assert!(!pair.is_expired());
        assert_eq!(pair.packets_received(), 1);
    }

    #[test]
    fn codecs_session_literal_reuses_last_recorded_value() {
        let (rtp, rtcp) = bound_pair(47106);
        let pair = StreamPair::new(rtp, rtcp, 47106);
        assert_eq!(pair.codecs(), None);
        pair.set_codecs("PCMU,PCMA");
        assert_eq!(pair.codecs(), Some("PCMU,PCMA".to_string()));
    }
}
