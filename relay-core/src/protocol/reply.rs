//! Reply path (spec.md §4.9).
//!
//! Formats a dispatcher result into wire bytes, writes it back over the
//! transport the command arrived on, and (datagram only) records the bytes
//! in the retransmit cache. Datagram sends never happen on this call stack —
//! they are handed to the net-I/O thread's queue, per spec.md §9's
//! "Asynchronous datagram send" design note and the teacher's
//! `UdpTransport` separation of socket ownership from the connection
//! threads that produce outbound bytes.

use std::io::{self, Write};
use std::net::SocketAddr;

use crate::concurrency::{WorkItem, WorkQueueSender};
use crate::protocol::command::Command;
use crate::protocol::dispatcher::DispatchReply;
use crate::rcache::RetransmitCache;
use crate::stats::Stats;

/// One reply queued for the net-I/O thread to `send_to`.
pub struct OutboundDatagram {
    pub addr: SocketAddr,
    pub bytes: Vec<u8>,
}

/// Render a dispatch result into wire bytes: `[cookie ]<body>\n`
/// (spec.md §6 "one command per line... reply is one or more lines").
fn format_reply(cmd: &Command, dispatch: &DispatchReply) -> Vec<u8> {
    let mut out = String::new();
    if let Some(cookie) = &cmd.cookie {
        out.push_str(cookie);
        out.push(' ');
    }
    out.push_str(&dispatch.body);
    out.push('\n');
    out.into_bytes()
}

/// Owns the shared state the reply path needs on every send: the retransmit
/// cache to insert into, the counters to bump, and the outbound queue the
/// net-I/O thread drains.
pub struct ReplyPath<'a> {
    rcache: &'a RetransmitCache,
    stats: &'a Stats,
    outbound: WorkQueueSender<OutboundDatagram>,
}

impl<'a> ReplyPath<'a> {
    pub fn new(rcache: &'a RetransmitCache, stats: &'a Stats, outbound: WorkQueueSender<OutboundDatagram>) -> Self {
        Self { rcache, stats, outbound }
    }

    /// Stream-transport reply: write directly to the control connection.
    pub fn send_stream(&self, cmd: &Command, dispatch: DispatchReply, writer: &mut impl Write) -> io::Result<()> {
        let bytes = format_reply(cmd, &dispatch);
        writer.write_all(&bytes)?;
        self.count(&dispatch);
        Ok(())
    }

    /// Datagram-transport reply: insert into the retransmit cache (if the
    /// command carried a cookie), then hand the bytes to the net-I/O thread
    /// rather than calling `send_to` on this (control) thread.
    pub fn send_datagram(&self, cmd: &Command, dispatch: DispatchReply) {
        let bytes = format_reply(cmd, &dispatch);
        if let Some(cookie) = &cmd.cookie {
            self.rcache.insert(cookie.clone(), bytes.clone());
        }
        if let Some(addr) = cmd.source {
            self.outbound.put(WorkItem::Data(OutboundDatagram { addr, bytes }));
        }
        self.count(&dispatch);
    }

    /// Re-send an already-formatted reply for a retransmitted cookie
    /// (spec.md §4.9 "re-sends the cached payload"). The original send
    /// already counted `ncmds_repld`/`ncmds_succd`/`ncmds_errs`; this resend
    /// does not count again.
    pub fn resend(&self, source: Option<SocketAddr>, bytes: Vec<u8>) {
        if let Some(addr) = source {
            self.outbound.put(WorkItem::Data(OutboundDatagram { addr, bytes }));
        }
    }

    fn count(&self, dispatch: &DispatchReply) {
        self.stats.ncmds_repld();
        if dispatch.is_error {
            self.stats.ncmds_errs();
        } else {
            self.stats.ncmds_succd();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::WorkQueue;
    use crate::protocol::command::TransportMode;
    use std::time::Instant;

    fn cmd(cookie: Option<&str>, source: Option<SocketAddr>) -> Command {
        Command {
            received_at: Instant::now(),
            transport: TransportMode::Datagram,
            source,
            cookie: cookie.map(String::from),
            args: vec![],
            subc_args: vec![],
            opcode: crate::protocol::command::Opcode::GetVer,
            common: Default::default(),
            resolved_leg: None,
        }
    }

    #[test]
    fn format_prefixes_cookie_and_terminates_with_newline() {
        let c = cmd(Some("c1"), None);
        let bytes = format_reply(&c, &DispatchReply { body: "0".into(), is_error: false });
        assert_eq!(bytes, b"c1 0\n");
    }

    #[test]
    fn format_without_cookie_for_stream_transport() {
        let c = cmd(None, None);
        let bytes = format_reply(&c, &DispatchReply { body: "20040107".into(), is_error: false });
        assert_eq!(bytes, b"20040107\n");
    }

    #[test]
    fn datagram_reply_inserts_into_rcache_and_enqueues_send() {
        let rcache = RetransmitCache::with_default_ttl();
        let stats = Stats::new();
        let queue: WorkQueue<OutboundDatagram> = WorkQueue::new(8, "outbound-test");
        let path = ReplyPath::new(&rcache, &stats, queue.sender());

        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let c = cmd(Some("c1"), Some(addr));
        path.send_datagram(&c, DispatchReply { body: "0".into(), is_error: false });

        assert_eq!(rcache.lookup("c1"), Some(b"c1 0\n".to_vec()));
        match queue.get(false) {
            Some(WorkItem::Data(OutboundDatagram { addr: a, bytes })) => {
                assert_eq!(a, addr);
                assert_eq!(bytes, b"c1 0\n");
            }
            _ => panic!("expected an enqueued outbound datagram"),
        }
        assert_eq!(
            stats.snapshot().iter().find(|(k, _)| *k == "ncmds_succd").unwrap().1,
            1
        );
    }

    #[test]
    fn error_reply_increments_error_counter_not_success() {
        let rcache = RetransmitCache::with_default_ttl();
        let stats = Stats::new();
        let queue: WorkQueue<OutboundDatagram> = WorkQueue::new(8, "outbound-test");
        let path = ReplyPath::new(&rcache, &stats, queue.sender());
        let c = cmd(Some("c1"), None);
        path.send_datagram(&c, DispatchReply { body: "E8".into(), is_error: true });
        assert_eq!(
            stats.snapshot().iter().find(|(k, _)| *k == "ncmds_errs").unwrap().1,
            1
        );
        assert_eq!(
            stats.snapshot().iter().find(|(k, _)| *k == "ncmds_succd").unwrap().1,
            0
        );
    }
}
