//! Server orchestrator (spec.md §2, §5).
//!
//! Owns the session store, the counters, the retransmit cache, the media
//! worker pool, the net-I/O thread, and the timed scheduler, and runs the
//! control I/O loop for one control endpoint on the calling thread (spec.md
//! §5 "Control thread... single-threaded per control endpoint"). Grounded on
//! the teacher's `Server` (binds listeners, owns a `SessionManager`, spawns
//! one thread per accepted connection) generalized from TCP-only to the
//! dual stream/datagram control transport this specification requires.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::collab::notify::{LoggingNotificationEmitter, NullNotificationEmitter};
use crate::collab::playback::NullPlaybackEngine;
use crate::collab::recorder::NullRecorder;
use crate::collab::{NotificationEmitter, PlaybackEngine, Recorder};
use crate::concurrency::refcount::RefCounted;
use crate::concurrency::{Signal, TaskHandle, TimedScheduler, WorkItem, WorkQueue};
use crate::config::{ControlTransport, RelayConfig};
use crate::error::Result;
use crate::protocol::command::TransportMode;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::parser::{self, ParseOutcome};
use crate::protocol::reply::{OutboundDatagram, ReplyPath};
use crate::rcache::RetransmitCache;
use crate::session::SessionStore;
use crate::stats::Stats;

/// A notice handed from the control thread to the media-worker pool
/// (spec.md §5 "Media workers... receive commands from the control thread
/// via the work queue").
#[derive(Debug, Clone)]
pub enum MediaEvent {
    SessionReady { call_id: String },
    SessionRemoved { call_id: String },
}

struct Maintenance {
    rcache: Arc<RetransmitCache>,
    sessions: Arc<SessionStore>,
    stats: Arc<Stats>,
    last_ncmds_rcvd: AtomicU64,
}

/// The RTP relay daemon's core: control-protocol engine plus the
/// concurrency substrate driving it.
pub struct RelayServer {
    config: RelayConfig,
    sessions: Arc<SessionStore>,
    stats: Arc<Stats>,
    rcache: Arc<RetransmitCache>,
    recorder: Arc<dyn Recorder>,
    playback: Arc<dyn PlaybackEngine>,
    notify: Arc<dyn NotificationEmitter>,
    media_queue: Arc<WorkQueue<MediaEvent>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let notify: Arc<dyn NotificationEmitter> = if config.notify_enabled {
            Arc::new(LoggingNotificationEmitter)
        } else {
            Arc::new(NullNotificationEmitter)
        };
        Self {
            rcache: Arc::new(RetransmitCache::new(config.rcache_ttl)),
            sessions: Arc::new(SessionStore::new()),
            stats: Arc::new(Stats::new()),
            recorder: Arc::new(NullRecorder),
            playback: Arc::new(NullPlaybackEngine),
            notify,
            media_queue: Arc::new(WorkQueue::new(256, "media-events")),
            config,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_playback(mut self, playback: Arc<dyn PlaybackEngine>) -> Self {
        self.playback = playback;
        self
    }

    pub fn with_notify(mut self, notify: Arc<dyn NotificationEmitter>) -> Self {
        self.notify = notify;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn notify(&self) -> &dyn NotificationEmitter {
        self.notify.as_ref()
    }

    /// Run the server: spawns the net-I/O thread, the media-worker pool, and
    /// the maintenance scheduler, then runs the control loop on the calling
    /// thread until it returns an I/O error. Blocks for the lifetime of the
    /// server.
    pub fn start(&self) -> Result<()> {
        let outbound: Arc<WorkQueue<OutboundDatagram>> = Arc::new(WorkQueue::new(256, "outbound"));
        let net_io = self.spawn_net_io(outbound.clone());
        let workers = self.spawn_workers();
        let (_scheduler, maintenance_tasks) = self.spawn_maintenance();

        info!(
            addr = %self.config.control_addr,
            port = self.config.control_port,
            transport = ?self.config.control_transport,
            "relay control endpoint starting"
        );

        let result = match self.config.control_transport {
            ControlTransport::Datagram => self.run_datagram_loop(outbound.sender()),
            ControlTransport::Stream => self.run_stream_loop(outbound.sender()),
        };

        for task in maintenance_tasks {
            task.cancel();
        }
        for _ in 0..workers.len() {
            self.media_queue.put(WorkItem::Signal(Signal::Shutdown));
        }
        for w in workers {
            let _ = w.join();
        }
        outbound.put(WorkItem::Signal(Signal::Shutdown));
        let _ = net_io.join();

        result
    }

    fn run_datagram_loop(&self, outbound: crate::concurrency::WorkQueueSender<OutboundDatagram>) -> Result<()> {
        let socket = UdpSocket::bind((self.config.control_addr, self.config.control_port))?;
        let reply_path = ReplyPath::new(&self.rcache, &self.stats, outbound);
        let dispatcher = Dispatcher::new(
            &self.sessions,
            &self.config,
            &self.stats,
            self.recorder.as_ref(),
            self.playback.as_ref(),
            self.notify.as_ref(),
        );

        let mut buf = [0u8; 2048];
        loop {
            let (n, addr) = socket.recv_from(&mut buf)?;
            self.stats.ncmds_rcvd();
            let raw = String::from_utf8_lossy(&buf[..n]);

            match parser::parse(&raw, TransportMode::Datagram, Some(addr), &self.rcache, &self.stats) {
                Ok(ParseOutcome::Fresh(cmd)) => {
                    let dispatch = dispatcher.dispatch(&cmd);
                    self.notify_workers(&cmd);
                    reply_path.send_datagram(&cmd, dispatch);
                }
                Ok(ParseOutcome::Retransmission { reply_bytes }) => {
                    debug!(%addr, "retransmission short-circuit, resending cached reply");
                    reply_path.resend(Some(addr), reply_bytes);
                }
                Err(failure) => {
                    warn!(%addr, error = %failure.error, "control command parse failure");
                    let code = failure.error.ecode().unwrap_or(1);
                    let body = match &failure.cookie {
                        Some(cookie) => format!("{cookie} E{code}\n"),
                        None => format!("E{code}\n"),
                    };
                    self.stats.ncmds_repld();
                    self.stats.ncmds_errs();
                    reply_path.resend(Some(addr), body.into_bytes());
                }
            }
        }
    }

    fn run_stream_loop(&self, outbound: crate::concurrency::WorkQueueSender<OutboundDatagram>) -> Result<()> {
        let listener = TcpListener::bind((self.config.control_addr, self.config.control_port))?;
        for stream in listener.incoming() {
            let mut stream = stream?;
            let peer = stream.peer_addr().ok();
            let reply_path = ReplyPath::new(&self.rcache, &self.stats, outbound.clone());
            let dispatcher = Dispatcher::new(
                &self.sessions,
                &self.config,
                &self.stats,
                self.recorder.as_ref(),
                self.playback.as_ref(),
                self.notify.as_ref(),
            );
            let reader = BufReader::new(stream.try_clone()?);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                self.stats.ncmds_rcvd();
                match parser::parse(&line, TransportMode::Stream, peer, &self.rcache, &self.stats) {
                    Ok(ParseOutcome::Fresh(cmd)) => {
                        let dispatch = dispatcher.dispatch(&cmd);
                        self.notify_workers(&cmd);
                        if let Err(e) = reply_path.send_stream(&cmd, dispatch, &mut stream) {
                            warn!(error = %e, "failed writing stream reply");
                            break;
                        }
                    }
                    Ok(ParseOutcome::Retransmission { .. }) => {
                        // Stream transport carries no cookie, so the rcache
                        // short-circuit never triggers here.
                    }
                    Err(failure) => {
                        let code = failure.error.ecode().unwrap_or(1);
                        self.stats.ncmds_repld();
                        self.stats.ncmds_errs();
                        if stream.write_all(format!("E{code}\n").as_bytes()).is_err() {
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn notify_workers(&self, cmd: &crate::protocol::Command) {
        use crate::protocol::Opcode;
        let event = match &cmd.opcode {
            Opcode::Update if !cmd.common.call_id.is_empty() => {
                Some(MediaEvent::SessionReady { call_id: cmd.common.call_id.clone() })
            }
            Opcode::Delete { .. } | Opcode::DeleteAll if !cmd.common.call_id.is_empty() => {
                Some(MediaEvent::SessionRemoved { call_id: cmd.common.call_id.clone() })
            }
            _ => None,
        };
        if let Some(event) = event {
            if self.media_queue.try_put(WorkItem::Data(event)).is_err() {
                warn!("media event queue full, dropping notice");
            }
        }
    }

    fn spawn_net_io(&self, outbound: Arc<WorkQueue<OutboundDatagram>>) -> thread::JoinHandle<()> {
        let socket = UdpSocket::bind((self.config.media_addr, 0)).expect("net-io socket bind");
        thread::Builder::new()
            .name("relay-net-io".into())
            .spawn(move || loop {
                match outbound.get(true) {
                    Some(WorkItem::Data(OutboundDatagram { addr, bytes })) => {
                        if let Err(e) = socket.send_to(&bytes, addr) {
                            error!(error = %e, %addr, "failed to send reply datagram");
                        }
                    }
                    Some(WorkItem::Signal(Signal::Shutdown)) | None => break,
                }
            })
            .expect("failed to spawn net-io thread")
    }

    fn spawn_workers(&self) -> Vec<thread::JoinHandle<()>> {
        (0..self.config.worker_count.max(1))
            .map(|idx| {
                let queue = self.media_queue.clone();
                thread::Builder::new()
                    .name(format!("relay-worker-{idx}"))
                    .spawn(move || loop {
                        match queue.get(true) {
                            Some(WorkItem::Data(event)) => {
                                debug!(worker = idx, ?event, "media worker observed session event");
                            }
                            Some(WorkItem::Signal(Signal::Shutdown)) | None => break,
                        }
                    })
                    .expect("failed to spawn media worker thread")
            })
            .collect()
    }

    fn spawn_maintenance(&self) -> (TimedScheduler<Maintenance>, Vec<TaskHandle>) {
        let scheduler = TimedScheduler::start();
        let maintenance = RefCounted::new(Maintenance {
            rcache: self.rcache.clone(),
            sessions: self.sessions.clone(),
            stats: self.stats.clone(),
            last_ncmds_rcvd: AtomicU64::new(0),
        });

        let eviction = scheduler.schedule(Duration::from_secs(10), maintenance.clone(), |_now, m| {
            let evicted = m.rcache.evict_expired();
            let expired_sessions = m.sessions.purge_expired();
            if evicted > 0 || expired_sessions > 0 {
                debug!(evicted, expired_sessions, "maintenance sweep");
            }
            crate::concurrency::CbResult::More
        });

        let stats_refresh = scheduler.schedule(Duration::from_secs(5), maintenance, |_now, m| {
            let current = m.stats.snapshot().into_iter().find(|(k, _)| *k == "ncmds_rcvd").map(|(_, v)| v).unwrap_or(0);
            let prev = m.last_ncmds_rcvd.swap(current, Ordering::Relaxed);
            m.stats.update_derived(current.saturating_sub(prev));
            crate::concurrency::CbResult::More
        });

        (scheduler, vec![eviction, stats_refresh])
    }
}
