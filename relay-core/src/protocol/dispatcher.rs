//! Command dispatcher (spec.md §4.8).
//!
//! Grounded on `original_source/src/rtpp_command.c`'s `handle_command`
//! two-phase switch: dispatch first runs the opcodes that need no resolved
//! session (`GET_VER`, `VER_FEATURE`, `INFO`, `DELETE_ALL`, `GET_STATS`),
//! then resolves `find_stream` for the rest. Each handler here returns a
//! [`DispatchReply`] rather than writing to the wire directly — the reply
//! path (§4.9, `protocol::reply`) owns formatting and the duplex write.

use std::net::{IpAddr, SocketAddr};

use tracing::{debug, warn};

use crate::collab::{NotificationEmitter, PlaybackEngine, Recorder};
use crate::collab::recorder::{default_file_name, RecordingFormat};
use crate::config::RelayConfig;
use crate::error::{RelayError, ECODE_CPYFAIL, ECODE_INVLARG, ECODE_PLRFAIL, ECODE_SESUNKN};
use crate::ports::{AddressFamily, PortPairAllocator, PortPool};
use crate::protocol::capabilities;
use crate::protocol::command::{Command, Opcode};
use crate::session::{Leg, SessionStore, StreamPair};
use crate::stats::Stats;

/// The result of dispatching one command: body text (sans cookie) and
/// whether it represents an error, so the reply path knows which counter to
/// bump (spec.md §4.9).
pub struct DispatchReply {
    pub body: String,
    pub is_error: bool,
}

impl DispatchReply {
    fn ok(body: impl Into<String>) -> Self {
        Self { body: body.into(), is_error: false }
    }

    fn error(code: u32) -> Self {
        Self { body: format!("E{code}"), is_error: true }
    }
}

/// Owns everything a handler needs to reach: the session store, the
/// port-pair allocator and its per-family pools, the counters, and the
/// external-collaborator trait objects.
pub struct Dispatcher<'a> {
    sessions: &'a SessionStore,
    ports: PortPairAllocator,
    ipv4_pool: PortPool,
    ipv6_pool: PortPool,
    media_addr: IpAddr,
    stats: &'a Stats,
    recorder: &'a dyn Recorder,
    playback: &'a dyn PlaybackEngine,
    notify: &'a dyn NotificationEmitter,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        sessions: &'a SessionStore,
        config: &RelayConfig,
        stats: &'a Stats,
        recorder: &'a dyn Recorder,
        playback: &'a dyn PlaybackEngine,
        notify: &'a dyn NotificationEmitter,
    ) -> Self {
        Self {
            sessions,
            ports: PortPairAllocator::new(config.tos),
            ipv4_pool: PortPool::new(AddressFamily::V4, config.ipv4_ports.min, config.ipv4_ports.max),
            ipv6_pool: PortPool::new(AddressFamily::V6, config.ipv6_ports.min, config.ipv6_ports.max),
            media_addr: config.media_addr,
            stats,
            recorder,
            playback,
            notify,
        }
    }

    /// Dispatch one command, returning the reply body (spec.md §4.8
    /// contract). Never blocks on the network — any media-plane or
    /// collaborator work is call-and-return, as required by spec.md §5's
    /// "dispatch must not block on the network".
    pub fn dispatch(&self, cmd: &Command) -> DispatchReply {
        match &cmd.opcode {
            Opcode::GetVer => DispatchReply::ok(capabilities::base_version()),
            Opcode::VerFeature => self.handle_ver_feature(cmd),
            Opcode::Info { brief, load } => self.handle_info(*brief, *load),
            Opcode::DeleteAll => self.handle_delete_all(),
            Opcode::GetStats { verbose } => self.handle_get_stats(*verbose),
            Opcode::Update => self.handle_update(cmd),
            Opcode::Lookup => self.handle_lookup(cmd),
            Opcode::Delete { weak } => self.handle_delete(cmd, *weak),
            Opcode::Play => self.handle_play(cmd),
            Opcode::NoPlay => self.handle_noplay(cmd),
            Opcode::Record { single_file } => self.handle_record(cmd, *single_file, false),
            Opcode::Copy => self.handle_record(cmd, false, true),
            Opcode::Query => self.handle_query(cmd),
        }
    }

    fn handle_ver_feature(&self, cmd: &Command) -> DispatchReply {
        let Some(datestamp) = cmd.args.get(1) else {
            return DispatchReply::error(ECODE_INVLARG);
        };
        let known = capabilities::is_known(datestamp);
        // `20081224` additionally requires the notification subsystem to be
        // configured (spec.md §6, `original_source`'s special-cased check in
        // `handle_ver_feature` before the generic list scan).
        let precondition_met = if datestamp == "20081224" {
            self.notify.is_enabled()
        } else {
            true
        };
        DispatchReply::ok(if known && precondition_met { "1" } else { "0" })
    }

    fn handle_info(&self, brief: bool, load: bool) -> DispatchReply {
        let snapshot = self.stats.snapshot();
        let get = |name: &str| snapshot.iter().find(|(k, _)| *k == name).map(|(_, v)| *v).unwrap_or(0);

        let mut lines = vec![
            format!("sessions created: {}", get("nsess_created")),
            format!("sessions active: {}", self.sessions.len()),
            format!("streams active: {}", self.sessions.active_streams()),
            format!("packets received: {}", get("npkts_rcvd")),
            format!("packets relayed: {}", get("npkts_relayed")),
        ];
        if !brief {
            lines.push(format!("sessions destroyed: {}", get("nsess_destroyed")));
        }
        if load {
            lines.push(format!("average load: {:.2}", self.stats.average_load()));
        }
        DispatchReply::ok(lines.join("\n"))
    }

    fn handle_delete_all(&self) -> DispatchReply {
        let purged = self.sessions.purge();
        for _ in 0..purged {
            self.stats.nsess_destroyed();
        }
        debug!(purged, "DELETE_ALL purged sessions");
        DispatchReply::ok("0")
    }

    fn handle_get_stats(&self, verbose: bool) -> DispatchReply {
        let lines: Vec<String> = self
            .stats
            .snapshot()
            .into_iter()
            .map(|(name, value)| {
                if verbose {
                    format!("{name}:{value}")
                } else {
                    format!("{value}")
                }
            })
            .collect();
        DispatchReply::ok(lines.join(" "))
    }

    fn handle_update(&self, cmd: &Command) -> DispatchReply {
        let call_id = &cmd.common.call_id;
        let from_tag = &cmd.common.from_tag;
        if call_id.is_empty() || from_tag.is_empty() {
            return DispatchReply::error(ECODE_INVLARG);
        }

        // `UPDATE` is idempotent on an existing (call_id, from_tag): if a
        // session already exists for this leg, just touch it and report its
        // port rather than allocating a new one.
        if let Ok((session, leg)) = self.sessions.find_stream(call_id, from_tag, None) {
            let port = session.with_stream(leg, |s| s.local_port());
            if let Some(port) = port {
                return DispatchReply::ok(port.to_string());
            }
        }

        let advertised = parse_addr(cmd.args.get(3), cmd.args.get(4));
        let pool = self.pool_for(advertised.map(|a| a.ip()));
        let (rtp, rtcp, port) = match self.ports.allocate(pool, self.media_addr) {
            Ok(allocated) => allocated,
            Err(e) => return self.resource_error(e),
        };
        let stream = StreamPair::new(rtp, rtcp, port);
        if let Some(addr) = advertised {
            stream.set_remote_addr(addr);
        }
        self.sessions.create_session(call_id.clone(), from_tag.clone(), stream);
        self.stats.nsess_created();
        DispatchReply::ok(port.to_string())
    }

    /// Pick the port pool matching the advertised peer address's family,
    /// defaulting to IPv4 when no address was given.
    fn pool_for(&self, advertised: Option<IpAddr>) -> &PortPool {
        match advertised {
            Some(IpAddr::V6(_)) => &self.ipv6_pool,
            _ => &self.ipv4_pool,
        }
    }

    fn handle_lookup(&self, cmd: &Command) -> DispatchReply {
        let call_id = &cmd.common.call_id;
        let from_tag = &cmd.common.from_tag;
        let Some(to_tag) = &cmd.common.to_tag else {
            return DispatchReply::error(ECODE_INVLARG);
        };

        if let Ok((session, leg)) = self.sessions.find_stream(call_id, to_tag, None) {
            if leg == Leg::FromCallee {
                // Already promoted; report the existing port rather than
                // allocating a duplicate (matches `UPDATE`'s idempotence).
                if let Some(port) = session.with_stream(leg, |s| s.local_port()) {
                    return DispatchReply::ok(port.to_string());
                }
            }
        }

        // Nothing to promote: the synthetic "no port" reply spec.md §7
        // calls out specifically for `LOOKUP` on an unknown triple, without
        // spending a port allocation first.
        if self.sessions.find_stream(call_id, from_tag, None).is_err() {
            return DispatchReply::ok("0");
        }

        let advertised = parse_addr(cmd.args.get(3), cmd.args.get(4));
        let pool = self.pool_for(advertised.map(|a| a.ip()));
        let (rtp, rtcp, port) = match self.ports.allocate(pool, self.media_addr) {
            Ok(allocated) => allocated,
            Err(e) => return self.resource_error(e),
        };
        let stream = StreamPair::new(rtp, rtcp, port);
        if let Some(addr) = advertised {
            stream.set_remote_addr(addr);
        }

        match self.sessions.promote_session(call_id, from_tag, to_tag.clone(), stream) {
            Ok(_) => DispatchReply::ok(port.to_string()),
            Err(RelayError::SessionNotFound { .. }) => DispatchReply::ok("0"),
            Err(e) => self.resource_error(e),
        }
    }

    fn handle_delete(&self, cmd: &Command, weak: bool) -> DispatchReply {
        match self.sessions.delete(&cmd.common.call_id, &cmd.common.from_tag, weak) {
            Ok(()) => {
                self.stats.nsess_destroyed();
                DispatchReply::ok("0")
            }
            Err(_) => DispatchReply::error(ECODE_SESUNKN),
        }
    }

    fn handle_play(&self, cmd: &Command) -> DispatchReply {
        let (session, leg) = match self.resolve(cmd) {
            Ok(v) => v,
            Err(reply) => return reply,
        };
        let Some(file) = cmd.args.get(2) else {
            return DispatchReply::error(ECODE_INVLARG);
        };
        let requested_codecs = cmd.args.get(3).cloned();

        let codecs = session
            .with_stream(leg, |stream| {
                match requested_codecs.as_deref() {
                    // `session` literal: reuse codecs recorded at last
                    // update (spec.md §4.8).
                    Some("session") | None => stream.codecs(),
                    Some(explicit) => {
                        stream.set_codecs(explicit);
                        Some(explicit.to_string())
                    }
                }
            })
            .flatten();

        let Some(codecs) = codecs else {
            return DispatchReply::error(ECODE_INVLARG);
        };

        match self.playback.start(file, &codecs) {
            Ok(()) => DispatchReply::ok("0"),
            Err(e) => {
                warn!(error = %e, "PLAY failed");
                DispatchReply::error(ECODE_PLRFAIL)
            }
        }
    }

    fn handle_noplay(&self, cmd: &Command) -> DispatchReply {
        if let Err(reply) = self.resolve(cmd) {
            return reply;
        }
        if let Some(file) = cmd.args.get(2) {
            self.playback.stop(file);
        }
        DispatchReply::ok("0")
    }

    fn handle_record(&self, cmd: &Command, single_file: bool, fork: bool) -> DispatchReply {
        let (session, _leg) = match self.resolve(cmd) {
            Ok(v) => v,
            Err(reply) => return reply,
        };

        let format = if single_file { RecordingFormat::Raw } else { RecordingFormat::Pcap };
        let to_tag = session.to_tag();
        let mut failed = false;
        session.for_each_stream(|_leg, _stream| {
            let name = default_file_name(session.call_id(), session.from_tag(), to_tag.as_deref(), format);
            if self.recorder.start(&name, format).is_err() {
                failed = true;
            }
        });

        if failed {
            DispatchReply::error(if fork { ECODE_CPYFAIL } else { ECODE_INVLARG })
        } else {
            DispatchReply::ok("0")
        }
    }

    fn handle_query(&self, cmd: &Command) -> DispatchReply {
        let (session, leg) = match self.resolve(cmd) {
            Ok(v) => v,
            Err(reply) => return reply,
        };
        let counters = session
            .with_stream(leg, |s| format!("{} {}", s.packets_received(), s.packets_relayed()))
            .unwrap_or_else(|| "0 0".to_string());
        DispatchReply::ok(counters)
    }

    /// Resolve `cmd`'s `(call_id, from_tag, to_tag)` to a session and leg,
    /// mapping a miss to the stable `E<ECODE_SESUNKN>` reply every
    /// stream-bearing opcode but `LOOKUP` uses on failure (spec.md §7).
    fn resolve(&self, cmd: &Command) -> Result<(crate::concurrency::RefCounted<crate::session::Session>, Leg), DispatchReply> {
        self.sessions
            .find_stream(&cmd.common.call_id, &cmd.common.from_tag, cmd.common.to_tag.as_deref())
            .map_err(|_| DispatchReply::error(ECODE_SESUNKN))
    }

    fn resource_error(&self, e: RelayError) -> DispatchReply {
        warn!(error = %e, "resource allocation failed");
        match e.ecode() {
            Some(code) => DispatchReply::error(code),
            None => DispatchReply::error(ECODE_INVLARG),
        }
    }
}

fn parse_addr(ip: Option<&String>, port: Option<&String>) -> Option<SocketAddr> {
    let ip: IpAddr = ip?.parse().ok()?;
    let port: u16 = port?.parse().ok()?;
    Some(SocketAddr::new(ip, port))
}
