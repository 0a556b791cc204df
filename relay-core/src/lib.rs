//! `relay-core`: the control-protocol engine, session model, and
//! concurrency substrate behind a media-plane RTP/RTCP relay daemon.
//!
//! A relay sits between two SIP signaling endpoints as a NAT-agnostic
//! bounce point for the media (RTP/RTCP) those endpoints negotiate: the
//! signaling layer (outside this crate's scope) tells the relay, over the
//! control protocol in [`protocol`], which port pairs to allocate and which
//! peer address to relay toward. [`server::RelayServer`] ties every module
//! below into one running daemon; everything else is usable on its own for
//! testing or embedding in a different server shape.

pub mod collab;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod media;
pub mod ports;
pub mod protocol;
pub mod rcache;
pub mod server;
pub mod session;
pub mod stats;

pub use config::{ControlTransport, PortRange, RelayConfig, RelayConfigBuilder};
pub use error::{RelayError, Result};
pub use server::RelayServer;
pub use session::{Leg, Session, SessionStore, StreamPair};
pub use stats::Stats;
