//! Error types for the relay core.

use std::fmt;

/// Errors that can occur across the relay core.
///
/// Variants map to the five error kinds in the error-handling design:
///
/// - **Parse**: [`Parse`](Self::Parse) — malformed control command, recovered
///   locally and replied `E<code>`.
/// - **Lookup**: [`SessionNotFound`](Self::SessionNotFound) — session/tag
///   triple unknown.
/// - **Resource**: [`PortsExhausted`](Self::PortsExhausted),
///   [`Io`](Self::Io) — out of ports, socket/bind failures.
/// - **Semantic**: [`InvalidArg`](Self::InvalidArg) — opcode-specific
///   argument error (e.g. `PLAY ... session` with no codecs on record).
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No session matches the given `(call_id, from_tag, to_tag)` triple.
    #[error("session not found: call_id={call_id} from_tag={from_tag}")]
    SessionNotFound { call_id: String, from_tag: String },

    /// Malformed control command (spec error codes, see [`ParseErrorKind`]).
    #[error("control parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Opcode-specific semantic error (e.g. invalid codecs, play/copy failure).
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),

    /// The port-pair allocator exhausted its configured pool for a family.
    #[error("port pool exhausted")]
    PortsExhausted,

    /// [`crate::server::RelayServer::start`] has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`crate::server::RelayServer::start`] was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

/// Specific kind of control-command parse failure (spec.md §4.7).
///
/// Each variant corresponds to one of the distinct parse-error codes
/// enumerated in the spec, so callers and tests can assert on the exact
/// failure rather than just "some parse error occurred".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The command line had no non-empty tokens at all.
    EmptyCommand,
    /// Datagram transport requires a leading cookie token; none was present.
    MissingCookie,
    /// A `&&` separator appeared with no tokens following it.
    EmptySubCommand,
    /// More tokens than `RTPC_MAX_ARGC` were supplied.
    ArgcOverflow,
    /// An opcode modifier character was not recognized for that opcode.
    BadModifier,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCommand => write!(f, "empty command"),
            Self::MissingCookie => write!(f, "missing cookie in datagram mode"),
            Self::EmptySubCommand => write!(f, "empty sub-command after &&"),
            Self::ArgcOverflow => write!(f, "argument vector overflow"),
            Self::BadModifier => write!(f, "malformed opcode modifier"),
        }
    }
}

/// Reply-code bands (spec.md §6, §7). Parse errors and semantic errors each
/// occupy a stable, disjoint numbering space so the wire format never
/// changes meaning across versions.
impl ParseErrorKind {
    /// Numeric code sent back as `E<code>` for this parse failure.
    pub fn code(self) -> u32 {
        match self {
            Self::EmptyCommand => 1,
            Self::EmptySubCommand => 1,
            Self::BadModifier => 2,
            Self::ArgcOverflow => 3,
            Self::MissingCookie => 4,
        }
    }
}

impl RelayError {
    /// Maps this error to the stable `E<code>` reply value (spec.md §6).
    ///
    /// Returns `None` for errors that never reach the wire directly
    /// ([`NotStarted`](Self::NotStarted), [`AlreadyRunning`](Self::AlreadyRunning) —
    /// these are server lifecycle errors, not control-protocol replies).
    pub fn ecode(&self) -> Option<u32> {
        match self {
            Self::Io(_) => Some(ECODE_RESOURCE),
            Self::SessionNotFound { .. } => Some(ECODE_SESUNKN),
            Self::Parse { kind } => Some(kind.code()),
            Self::InvalidArg(_) => Some(ECODE_INVLARG),
            Self::PortsExhausted => Some(ECODE_RESOURCE),
            Self::NotStarted | Self::AlreadyRunning => None,
        }
    }
}

/// Session unknown (DELETE/PLAY/NOPLAY/RECORD/COPY/QUERY on an unresolved triple).
pub const ECODE_SESUNKN: u32 = 8;
/// Resource exhaustion (out of ports, bind failure).
pub const ECODE_RESOURCE: u32 = 9;
/// Opcode-specific invalid argument (e.g. `PLAY ... session` with nothing recorded).
pub const ECODE_INVLARG: u32 = 10;
/// Play request failed (tone/file generator could not be engaged).
pub const ECODE_PLRFAIL: u32 = 11;
/// Copy (forked recording) request failed.
pub const ECODE_CPYFAIL: u32 = 12;

/// Convenience alias for `Result<T, RelayError>`.
pub type Result<T> = std::result::Result<T, RelayError>;
