//! `Command` (spec.md §3) and the opcode/common-argument shapes the parser
//! and dispatcher share.

use std::net::SocketAddr;
use std::time::Instant;

use crate::session::Leg;

/// Upper bound on the number of tokens in either `args` or `subc_args`
/// (spec.md §3 "both capped at `RTPC_MAX_ARGC`"). Not given numerically in
/// the retained source fragments; chosen generously above any legitimate
/// command's argument count — see `DESIGN.md`.
pub const RTPC_MAX_ARGC: usize = 20;

/// Whether a command arrived over a connection-oriented or datagram control
/// endpoint (spec.md §3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Stream,
    Datagram,
}

/// Per-opcode parsed arguments (spec.md §4.8). Modifier characters are
/// folded into the variant rather than kept as a separate flag set, so a
/// handler match arm sees exactly the options relevant to its opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
    GetVer,
    VerFeature,
    Info { brief: bool, load: bool },
    DeleteAll,
    Delete { weak: bool },
    Play,
    NoPlay,
    Record { single_file: bool },
    Copy,
    Update,
    Lookup,
    Query,
    GetStats { verbose: bool },
}

impl Opcode {
    /// Static label used as `cmd.cca.rname` (spec.md §4.7 `pre_parse`) and in
    /// log lines — the human name of the opcode, independent of modifiers.
    pub fn rname(&self) -> &'static str {
        match self {
            Opcode::GetVer => "GET_VER",
            Opcode::VerFeature => "VER_FEATURE",
            Opcode::Info { .. } => "INFO",
            Opcode::DeleteAll => "DELETE_ALL",
            Opcode::Delete { .. } => "DELETE",
            Opcode::Play => "PLAY",
            Opcode::NoPlay => "NOPLAY",
            Opcode::Record { .. } => "RECORD",
            Opcode::Copy => "COPY",
            Opcode::Update => "UPDATE",
            Opcode::Lookup => "LOOKUP",
            Opcode::Query => "QUERY",
            Opcode::GetStats { .. } => "GET_STATS",
        }
    }
}

/// Common fields every stream-bearing command carries, extracted by
/// `pre_parse` (spec.md §4.7) before the dispatcher sees the command.
#[derive(Debug, Clone, Default)]
pub struct CommonArgs {
    pub rname: &'static str,
    pub call_id: String,
    pub from_tag: String,
    pub to_tag: Option<String>,
}

/// One control request in flight (spec.md §3).
pub struct Command {
    pub received_at: Instant,
    pub transport: TransportMode,
    /// Source address, present only for datagram-transport commands.
    pub source: Option<SocketAddr>,
    /// Cookie token, present only for datagram-transport commands
    /// (spec.md §4.7).
    pub cookie: Option<String>,
    pub args: Vec<String>,
    pub subc_args: Vec<String>,
    pub opcode: Opcode,
    pub common: CommonArgs,
    /// Set by the dispatcher once it resolves `common` to a session/leg.
    pub resolved_leg: Option<Leg>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rname_is_independent_of_modifiers() {
        assert_eq!(Opcode::Delete { weak: true }.rname(), "DELETE");
        assert_eq!(Opcode::Delete { weak: false }.rname(), "DELETE");
    }
}
