//! Media forwarder interface (spec.md §1 "on-wire RTP/RTCP packet
//! rewriter" external collaborator): the learning-mode relay that moves
//! datagrams between the two legs of a session once the control plane has
//! allocated their streams.
//!
//! Grounded on the teacher's `transport::udp::UdpTransport` (address-only,
//! ephemeral-socket send path) generalized to the two-leg, first-packet
//! address-learning shape this relay needs: payload rewriting and codec
//! translation are explicitly out of scope (spec.md Non-goals), so this
//! trait only forwards opaque bytes.

use std::net::SocketAddr;

use crate::error::Result;
use crate::session::{Leg, StreamPair};

/// Forwards datagrams between the two legs of a session. A stream pair
/// "learns" its peer's real address from the first packet it receives
/// rather than trusting the address advertised by `UPDATE`/`LOOKUP`, since
/// NAT commonly means the two differ.
pub trait MediaForwarder: Send + Sync {
    /// Relay `payload`, received on `leg`'s RTP socket, to the opposite
    /// leg's learned (or, absent a learned address yet, advertised) remote
    /// address. Returns the number of bytes actually sent.
    fn relay_rtp(&self, from: Leg, from_stream: &StreamPair, to_stream: &StreamPair, payload: &[u8]) -> Result<usize>;

    /// As [`relay_rtp`](Self::relay_rtp), for the RTCP socket.
    fn relay_rtcp(&self, from: Leg, from_stream: &StreamPair, to_stream: &StreamPair, payload: &[u8]) -> Result<usize>;
}

/// Default forwarder: plain learning-mode UDP relay with no payload
/// inspection or rewriting.
#[derive(Default)]
pub struct LearningForwarder;

impl LearningForwarder {
    fn relay(&self, from_stream: &StreamPair, to_stream: &StreamPair, payload: &[u8], rtcp: bool) -> Result<usize> {
        from_stream.record_received();
        let Some(dest) = to_stream.remote_addr() else {
            return Ok(0);
        };
        let socket = if rtcp { to_stream.rtcp_socket() } else { to_stream.rtp_socket() };
        let n = socket.send_to(payload, dest)?;
        to_stream.record_relayed();
        Ok(n)
    }
}

impl MediaForwarder for LearningForwarder {
    fn relay_rtp(&self, _from: Leg, from_stream: &StreamPair, to_stream: &StreamPair, payload: &[u8]) -> Result<usize> {
        self.relay(from_stream, to_stream, payload, false)
    }

    fn relay_rtcp(&self, _from: Leg, from_stream: &StreamPair, to_stream: &StreamPair, payload: &[u8]) -> Result<usize> {
        self.relay(from_stream, to_stream, payload, true)
    }
}

/// Learn the sender's address on a stream if it differs from what's on
/// record, per spec.md §1's "learning mode". Called by the media worker
/// loop on every datagram received, before relaying it.
pub fn learn_address(stream: &StreamPair, observed: SocketAddr) {
    if stream.remote_addr() != Some(observed) {
        stream.set_remote_addr(observed);
    }
}
