//! End-to-end control-protocol tests: a real `RelayServer` bound to a
//! loopback UDP socket, driven from plain client sockets the way a SIP
//! proxy's RTP-proxy client would.

use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

use relay_core::{ControlTransport, PortRange, RelayConfig, RelayServer};

fn spawn_server(control_port: u16) {
    // Each test owns a disjoint 300-port media range so concurrently running
    // tests never contend over the same candidate ports.
    let slot = (control_port - 41001) as u16;
    let media_min = 49000 + slot * 300;
    let config = RelayConfig::builder()
        .control_addr("127.0.0.1".parse().unwrap())
        .control_port(control_port)
        .control_transport(ControlTransport::Datagram)
        .media_addr("127.0.0.1".parse().unwrap())
        .ipv4_ports(PortRange { min: media_min, max: media_min + 299 })
        .build();
    let server = RelayServer::new(config);
    thread::spawn(move || {
        let _ = server.start();
    });
    thread::sleep(Duration::from_millis(150));
}

fn client() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind client socket");
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("set read timeout");
    socket
}

fn roundtrip(socket: &UdpSocket, port: u16, line: &str) -> String {
    socket.send_to(line.as_bytes(), ("127.0.0.1", port)).expect("send");
    let mut buf = [0u8; 1024];
    let (n, _) = socket.recv_from(&mut buf).expect("recv reply");
    String::from_utf8_lossy(&buf[..n]).trim_end().to_string()
}

#[test]
fn version_query_reports_base_datestamp() {
    let port = 41001;
    spawn_server(port);
    let socket = client();
    assert_eq!(roundtrip(&socket, port, "c1 V"), "c1 20040107");
}

#[test]
fn capability_probe_recognizes_known_and_unknown_datestamps() {
    let port = 41002;
    spawn_server(port);
    let socket = client();
    assert_eq!(roundtrip(&socket, port, "c1 VF 20191015"), "c1 1");
    assert_eq!(roundtrip(&socket, port, "c2 VF 19991231"), "c2 0");
}

#[test]
fn session_lifecycle_update_lookup_delete() {
    let port = 41003;
    spawn_server(port);
    let socket = client();

    let update = roundtrip(&socket, port, "c1 U call-int-1 ft 10.0.0.1 6000");
    let allocated: u16 = update.split(' ').nth(1).unwrap().parse().expect("numeric port reply");
    assert_eq!(allocated % 2, 0, "RTP port must be even");

    // `<op> call_id from_tag addr port [to_tag]` — promotes the callee leg.
    let lookup = roundtrip(&socket, port, "c2 L call-int-1 ft 10.0.0.2 7000 tt");
    assert!(!lookup.starts_with("c2 E"), "lookup should promote, not error: {lookup}");

    let delete = roundtrip(&socket, port, "c3 D call-int-1 ft");
    assert_eq!(delete, "c3 0");

    let second_delete = roundtrip(&socket, port, "c4 D call-int-1 ft");
    assert!(second_delete.starts_with("c4 E"));
}

#[test]
fn retransmission_of_same_cookie_resends_cached_reply() {
    let port = 41004;
    spawn_server(port);
    let socket = client();

    let first = roundtrip(&socket, port, "cdup U call-int-2 ft 10.0.0.1 6100");
    let second = roundtrip(&socket, port, "cdup U call-int-2 ft 10.0.0.1 6100");
    assert_eq!(first, second, "retransmitted cookie must resend the identical cached reply");
}

#[test]
fn subcommand_split_only_dispatches_the_primary_command() {
    let port = 41005;
    spawn_server(port);
    let socket = client();
    let reply = roundtrip(&socket, port, "c1 V && X");
    assert_eq!(reply, "c1 20040107");
}

#[test]
fn delete_all_clears_every_session() {
    let port = 41006;
    spawn_server(port);
    let socket = client();

    roundtrip(&socket, port, "c1 U call-int-3 ft 10.0.0.1 6200");
    roundtrip(&socket, port, "c2 U call-int-4 ft 10.0.0.1 6300");

    let reply = roundtrip(&socket, port, "c3 X");
    assert_eq!(reply, "c3 0");

    let stats = roundtrip(&socket, port, "c4 Gv");
    assert!(stats.contains("ncmds_rcvd:"));
}

#[test]
fn malformed_command_returns_stable_error_code() {
    let port = 41007;
    spawn_server(port);
    let socket = client();
    let reply = roundtrip(&socket, port, "c1 Dz call-x ft");
    assert_eq!(reply, "c1 E2");
}
