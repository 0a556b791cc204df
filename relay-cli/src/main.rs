use std::net::IpAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use relay_core::{ControlTransport, PortRange, RelayConfig, RelayServer};

#[derive(Parser)]
#[command(name = "rtp-relay", about = "Standalone RTP/RTCP media relay daemon")]
struct Args {
    /// Address the control endpoint binds to.
    #[arg(long, default_value = "0.0.0.0")]
    control_addr: IpAddr,

    /// Port the control endpoint listens/receives on.
    #[arg(long, default_value_t = 22222)]
    control_port: u16,

    /// Control transport: "datagram" or "stream".
    #[arg(long, default_value = "datagram")]
    control_transport: String,

    /// Local address media sockets bind to.
    #[arg(long, default_value = "0.0.0.0")]
    media_addr: IpAddr,

    /// Lowest port in the IPv4 RTP/RTCP allocation range.
    #[arg(long, default_value_t = 35000)]
    port_min: u16,

    /// Highest port in the IPv4 RTP/RTCP allocation range.
    #[arg(long, default_value_t = 65000)]
    port_max: u16,

    /// Retransmit-cache TTL, in seconds.
    #[arg(long, default_value_t = 60)]
    rcache_ttl_secs: u64,

    /// Idle-stream TTL, in seconds.
    #[arg(long, default_value_t = 60)]
    stream_ttl_secs: u64,

    /// Number of media-forwarder worker threads.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Enable the timeout-notification capability (`VER_FEATURE 20081224`).
    #[arg(long)]
    notify: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let control_transport = match args.control_transport.to_ascii_lowercase().as_str() {
        "datagram" | "udp" => ControlTransport::Datagram,
        "stream" | "tcp" => ControlTransport::Stream,
        other => {
            eprintln!("unrecognized --control-transport {other:?}, expected \"datagram\" or \"stream\"");
            return ExitCode::FAILURE;
        }
    };

    let config = RelayConfig::builder()
        .control_addr(args.control_addr)
        .control_port(args.control_port)
        .control_transport(control_transport)
        .media_addr(args.media_addr)
        .ipv4_ports(PortRange { min: args.port_min, max: args.port_max })
        .rcache_ttl(Duration::from_secs(args.rcache_ttl_secs))
        .stream_ttl(Duration::from_secs(args.stream_ttl_secs))
        .worker_count(args.workers)
        .notify_enabled(args.notify)
        .build();

    let server = RelayServer::new(config);

    if let Err(e) = server.start() {
        eprintln!("relay server exited: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
