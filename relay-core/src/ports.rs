//! Port-pair allocator (spec.md §4.5).
//!
//! Grounded directly on `original_source/src/rtpp_command.c`'s
//! `create_twinlistener`/`rtpp_create_listener`: candidate base ports are
//! tried in a pseudo-random but pool-exhaustive order, a caller-supplied
//! `create` step is invoked per candidate, and the first successful bind wins.
//! The twin-socket bind itself (RTP on the even port, RTCP on the next odd
//! one) is realized here with `socket2`, in the style of the teacher's
//! `transport/udp.rs::UdpTransport::bind`, generalized to the pair-plus-retry
//! shape the source requires.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};

use rand::rng;
use rand::seq::SliceRandom;
use socket2::{Domain, Socket, Type};

use crate::error::{RelayError, Result};

/// 256 KiB, matching `create_twinlistener`'s `SO_RCVBUF` setting.
const RECV_BUFFER_SIZE: usize = 256 * 1024;

/// Outcome of one port-candidate attempt, mirroring the source's
/// `RTPP_PTU_{OK,ONE_MORE,BRKERR}` trio.
pub enum CandidateResult<T> {
    /// Bind succeeded; stop searching.
    Ok(T),
    /// This candidate is taken (`EADDRINUSE`/`EACCES`); try the next one.
    OneMore,
    /// A failure unrelated to port contention; abort the whole search.
    BrkErr(RelayError),
}

/// Try each candidate in `candidates` against `create` until one succeeds,
/// one hard-fails, or the candidates are exhausted (spec.md §4.5 algorithm).
pub fn search_ports<T>(
    candidates: impl Iterator<Item = u16>,
    mut create: impl FnMut(u16) -> CandidateResult<T>,
) -> Result<(T, u16)> {
    for port in candidates {
        match create(port) {
            CandidateResult::Ok(value) => return Ok((value, port)),
            CandidateResult::OneMore => continue,
            CandidateResult::BrkErr(err) => return Err(err),
        }
    }
    Err(RelayError::PortsExhausted)
}

/// Address family a [`PortPool`] draws candidates for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A configured `[min, max]` even-port range for one address family, drawn
/// from in pseudo-random, pool-exhaustive order (spec.md §4.5: "candidate
/// base ports in a pseudo-random but pool-exhaustive order").
pub struct PortPool {
    family: AddressFamily,
    min: u16,
    max: u16,
}

impl PortPool {
    /// `min`/`max` bound the even (RTP) port; the RTCP port is `rtp_port + 1`.
    /// Both are rounded so the pool only ever yields even candidates.
    pub fn new(family: AddressFamily, min: u16, max: u16) -> Self {
        let min = min + (min % 2);
        let max = max - (max % 2);
        Self { family, min, max }
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Every even port in `[min, max]`, visited in a shuffled order. The
    /// whole pool is exhausted before giving up, matching the source's
    /// "keep trying candidates until the pool is exhausted" contract rather
    /// than a fixed retry budget.
    pub fn candidates(&self) -> impl Iterator<Item = u16> {
        let mut ports: Vec<u16> = (self.min..=self.max).step_by(2).collect();
        ports.shuffle(&mut rng());
        ports.into_iter()
    }
}

/// Binds the RTP/RTCP twin-socket pair for one port-pair candidate
/// (`original_source`'s `create_twinlistener`): both sockets share
/// `local_addr`'s IP, on consecutive even/odd ports, each configured with a
/// 256 KiB receive buffer, nonblocking mode, receive-timestamping, and (for
/// IPv4) the given TOS byte.
pub struct PortPairAllocator {
    tos: Option<u8>,
}

impl PortPairAllocator {
    pub fn new(tos: Option<u8>) -> Self {
        Self { tos }
    }

    /// Allocate a bound RTP/RTCP socket pair from `pool`, returning the two
    /// sockets and the RTP (even) port chosen.
    pub fn allocate(
        &self,
        pool: &PortPool,
        local_addr: IpAddr,
    ) -> Result<(UdpSocket, UdpSocket, u16)> {
        search_ports(pool.candidates(), |port| {
            self.try_bind_pair(local_addr, port)
        })
        .map(|((rtp, rtcp), port)| (rtp, rtcp, port))
    }

    fn try_bind_pair(
        &self,
        local_addr: IpAddr,
        rtp_port: u16,
    ) -> CandidateResult<(UdpSocket, UdpSocket)> {
        let rtp = match self.bind_one(local_addr, rtp_port) {
            Ok(sock) => sock,
            Err(e) if is_port_busy(&e) => return CandidateResult::OneMore,
            Err(e) => return CandidateResult::BrkErr(RelayError::Io(e)),
        };
        let rtcp = match self.bind_one(local_addr, rtp_port + 1) {
            Ok(sock) => sock,
            Err(e) if is_port_busy(&e) => {
                // RTP half bound, RTCP half did not — release and retry the
                // pair at the next candidate (source: "both sockets created
                // so far for that attempt are released").
                return CandidateResult::OneMore;
            }
            Err(e) => return CandidateResult::BrkErr(RelayError::Io(e)),
        };
        CandidateResult::Ok((rtp.into(), rtcp.into()))
    }

    fn bind_one(&self, local_addr: IpAddr, port: u16) -> io::Result<Socket> {
        let domain = match local_addr {
            IpAddr::V4(_) => Domain::IPV4,
            IpAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, None)?;
        socket.bind(&SocketAddr::new(local_addr, port).into())?;
        socket.set_recv_buffer_size(RECV_BUFFER_SIZE)?;
        socket.set_nonblocking(true)?;
        if let (IpAddr::V4(_), Some(tos)) = (local_addr, self.tos) {
            socket.set_tos(tos as u32)?;
        }
        enable_recv_timestamping(&socket)?;
        Ok(socket)
    }
}

fn is_port_busy(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::AddrInUse | io::ErrorKind::PermissionDenied
    )
}

/// Turn on kernel receive-timestamping (`SO_TIMESTAMP`) on `socket`, matching
/// `create_twinlistener`'s `setsockopt(..., SO_TIMESTAMP, ...)` call. `socket2`
/// has no cross-platform wrapper for this option, so it's set directly
/// through `libc` on the platforms that support it; elsewhere this is a
/// best-effort no-op (the relay still functions without receive timestamps,
/// it just loses one diagnostic signal).
#[cfg(unix)]
fn enable_recv_timestamping(socket: &Socket) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let enable: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_TIMESTAMP,
            &enable as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn enable_recv_timestamping(_socket: &Socket) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_yields_only_even_ports_in_range() {
        let pool = PortPool::new(AddressFamily::V4, 35000, 35010);
        let ports: Vec<u16> = pool.candidates().collect();
        assert!(ports.iter().all(|p| p % 2 == 0));
        assert!(ports.iter().all(|p| (35000..=35010).contains(p)));
    }

    #[test]
    fn pool_exhausts_every_candidate_before_giving_up() {
        let pool = PortPool::new(AddressFamily::V4, 35000, 35010);
        let total = pool.candidates().count();
        assert_eq!(total, 6);
    }

    #[test]
    fn allocate_binds_consecutive_even_odd_pair() {
        let pool = PortPool::new(AddressFamily::V4, 36000, 36100);
        let allocator = PortPairAllocator::new(None);
        let (rtp, rtcp, port) = allocator
            .allocate(&pool, IpAddr::V4(std::net::Ipv4Addr::LOCALHOST))
            .expect("pool should not be exhausted in test range");
        assert_eq!(rtp.local_addr().unwrap().port(), port);
        assert_eq!(rtcp.local_addr().unwrap().port(), port + 1);
        assert_eq!(port % 2, 0);
    }

    #[test]
    fn search_ports_reports_exhaustion_when_every_candidate_is_busy() {
        let result: Result<((), u16)> =
            search_ports([1u16, 2, 3].into_iter(), |_| CandidateResult::OneMore);
        assert!(matches!(result, Err(RelayError::PortsExhausted)));
    }

    #[test]
    fn search_ports_propagates_hard_failure_without_trying_later_candidates() {
        let mut attempts = Vec::new();
        let result: Result<((), u16)> = search_ports([1u16, 2, 3].into_iter(), |port| {
            attempts.push(port);
            if port == 1 {
                CandidateResult::BrkErr(RelayError::PortsExhausted)
            } else {
                CandidateResult::Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(attempts, vec![1]);
    }
}
