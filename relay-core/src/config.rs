//! Relay configuration (ambient addition per `SPEC_FULL.md` §1): the values
//! the command engine, port allocator, and session store are parameterized
//! by. Populated by the CLI's `clap` args, in the shape of the teacher's
//! `ServerConfig` — no config-file format is introduced, since loading one
//! is named as an external collaborator while the config *value* the core
//! consumes is not.

use std::net::IpAddr;
use std::time::Duration;

use crate::rcache::DEFAULT_RCACHE_TTL;
use crate::session::stream::DEFAULT_STREAM_TTL;

/// Port-range pool for one address family (spec.md §4.5).
#[derive(Debug, Clone, Copy)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl Default for PortRange {
    /// `35000..=65000`, the conventional ephemeral RTP range many SIP
    /// deployments reserve.
    fn default() -> Self {
        Self { min: 35000, max: 65000 }
    }
}

/// Top-level configuration for a [`crate::server::RelayServer`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the control endpoint binds to.
    pub control_addr: IpAddr,
    /// Port the control endpoint listens/receives on.
    pub control_port: u16,
    /// Whether the control endpoint is a stream or datagram transport.
    pub control_transport: ControlTransport,
    /// Local address media sockets are bound to.
    pub media_addr: IpAddr,
    pub ipv4_ports: PortRange,
    pub ipv6_ports: PortRange,
    /// IPv4 TOS byte applied to allocated media sockets, if any.
    pub tos: Option<u8>,
    pub rcache_ttl: Duration,
    pub stream_ttl: Duration,
    /// Whether the notification subsystem (capability `20081224`) is
    /// considered configured.
    pub notify_enabled: bool,
    /// Number of media-forwarder worker threads pulling from the work
    /// queue (spec.md §5).
    pub worker_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTransport {
    Stream,
    Datagram,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            control_addr: IpAddr::from([0, 0, 0, 0]),
            control_port: 22222,
            control_transport: ControlTransport::Datagram,
            media_addr: IpAddr::from([0, 0, 0, 0]),
            ipv4_ports: PortRange::default(),
            ipv6_ports: PortRange::default(),
            tos: None,
            rcache_ttl: DEFAULT_RCACHE_TTL,
            stream_ttl: DEFAULT_STREAM_TTL,
            notify_enabled: false,
            worker_count: 4,
        }
    }
}

impl RelayConfig {
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }
}

/// Small builder mirroring the teacher's `ServerConfig` construction style —
/// every setter takes and returns `Self` by value for chaining.
#[derive(Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    pub fn control_addr(mut self, addr: IpAddr) -> Self {
        self.config.control_addr = addr;
        self
    }

    pub fn control_port(mut self, port: u16) -> Self {
        self.config.control_port = port;
        self
    }

    pub fn control_transport(mut self, transport: ControlTransport) -> Self {
        self.config.control_transport = transport;
        self
    }

    pub fn media_addr(mut self, addr: IpAddr) -> Self {
        self.config.media_addr = addr;
        self
    }

    pub fn ipv4_ports(mut self, range: PortRange) -> Self {
        self.config.ipv4_ports = range;
        self
    }

    pub fn ipv6_ports(mut self, range: PortRange) -> Self {
        self.config.ipv6_ports = range;
        self
    }

    pub fn tos(mut self, tos: u8) -> Self {
        self.config.tos = Some(tos);
        self
    }

    pub fn rcache_ttl(mut self, ttl: Duration) -> Self {
        self.config.rcache_ttl = ttl;
        self
    }

    pub fn stream_ttl(mut self, ttl: Duration) -> Self {
        self.config.stream_ttl = ttl;
        self
    }

    pub fn notify_enabled(mut self, enabled: bool) -> Self {
        self.config.notify_enabled = enabled;
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    pub fn build(self) -> RelayConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_conservative_ephemeral_range() {
        let config = RelayConfig::default();
        assert_eq!(config.ipv4_ports.min, 35000);
        assert_eq!(config.ipv4_ports.max, 65000);
    }

    #[test]
    fn builder_overrides_selected_fields_only() {
        let config = RelayConfig::builder()
            .control_port(9999)
            .tos(0x10)
            .build();
        assert_eq!(config.control_port, 9999);
        assert_eq!(config.tos, Some(0x10));
        assert_eq!(config.control_transport, ControlTransport::Datagram);
    }
}
