//! Command tokenizer and `pre_parse` (spec.md §4.7).
//!
//! Grounded on `original_source/src/rtpp_command.c`'s
//! `rtpp_command_split`/`rtpp_command_pre_parse`: tokenize, peel off the
//! datagram cookie, split on a literal `&&`, parse the opcode and its
//! modifiers, then fill in the common call-id/tag fields every
//! stream-bearing opcode shares. The retransmission short-circuit
//! (`rtpp_command_guard_retrans`) runs here too, at cookie-hit time, before
//! any of the rest of parsing happens.

use std::net::SocketAddr;
use std::time::Instant;

use crate::error::{ParseErrorKind, RelayError, Result};
use crate::protocol::command::{Command, CommonArgs, Opcode, TransportMode, RTPC_MAX_ARGC};
use crate::rcache::RetransmitCache;
use crate::stats::Stats;

/// What parsing a raw control line produced.
pub enum ParseOutcome {
    /// A new command ready for dispatch.
    Fresh(Command),
    /// The cookie matched a cache entry within TTL: dispatch is skipped and
    /// `reply_bytes` (already including the cookie prefix) should be resent
    /// verbatim (spec.md §4.9).
    Retransmission { reply_bytes: Vec<u8> },
}

/// A parse failure, carrying whatever cookie was already recovered (if any)
/// so the caller can still prefix an `E<code>` reply correctly on datagram
/// transport.
pub struct ParseFailure {
    pub cookie: Option<String>,
    pub error: RelayError,
}

fn tokenize(raw: &str) -> Vec<&str> {
    raw.split(['\r', '\n', '\t', ' '])
        .filter(|t| !t.is_empty())
        .collect()
}

/// Parse one raw control line. `rcache`/`stats` implement the at-most-once
/// short-circuit: a cookie seen before within TTL returns
/// [`ParseOutcome::Retransmission`] instead of a fresh [`Command`].
pub fn parse(
    raw: &str,
    transport: TransportMode,
    source: Option<SocketAddr>,
    rcache: &RetransmitCache,
    stats: &Stats,
) -> std::result::Result<ParseOutcome, ParseFailure> {
    let tokens = tokenize(raw);
    if tokens.is_empty() {
        return Err(ParseFailure {
            cookie: None,
            error: RelayError::Parse { kind: ParseErrorKind::EmptyCommand },
        });
    }

    let (cookie, cmd_tokens): (Option<&str>, &[&str]) = match transport {
        TransportMode::Datagram => {
            if tokens.len() < 2 {
                return Err(ParseFailure {
                    cookie: None,
                    error: RelayError::Parse { kind: ParseErrorKind::MissingCookie },
                });
            }
            (Some(tokens[0]), &tokens[1..])
        }
        TransportMode::Stream => (None, &tokens[..]),
    };
    let cookie = cookie.map(str::to_string);

    if let Some(cookie) = &cookie {
        if let Some(cached) = rcache.lookup(cookie) {
            stats.undo_ncmds_rcvd();
            stats.ncmds_rcvd_ndups();
            return Ok(ParseOutcome::Retransmission { reply_bytes: cached });
        }
    }

    let split_at = cmd_tokens.iter().position(|t| *t == "&&");
    let (args_tokens, subc_tokens): (&[&str], &[&str]) = match split_at {
        None => (cmd_tokens, &[]),
        Some(idx) => {
            if idx + 1 == cmd_tokens.len() {
                return Err(ParseFailure {
                    cookie,
                    error: RelayError::Parse { kind: ParseErrorKind::EmptySubCommand },
                });
            }
            (&cmd_tokens[..idx], &cmd_tokens[idx + 1..])
        }
    };

    if args_tokens.is_empty() {
        return Err(ParseFailure {
            cookie,
            error: RelayError::Parse { kind: ParseErrorKind::EmptyCommand },
        });
    }
    if args_tokens.len() > RTPC_MAX_ARGC || subc_tokens.len() > RTPC_MAX_ARGC {
        return Err(ParseFailure {
            cookie,
            error: RelayError::Parse { kind: ParseErrorKind::ArgcOverflow },
        });
    }

    let opcode = match parse_opcode(args_tokens[0]) {
        Ok(op) => op,
        Err(kind) => return Err(ParseFailure { cookie, error: RelayError::Parse { kind } }),
    };

    let args: Vec<String> = args_tokens.iter().map(|s| s.to_string()).collect();
    let subc_args: Vec<String> = subc_tokens.iter().map(|s| s.to_string()).collect();
    let common = pre_parse(&opcode, &args);

    Ok(ParseOutcome::Fresh(Command {
        received_at: Instant::now(),
        transport,
        source,
        cookie,
        args,
        subc_args,
        opcode,
        common,
        resolved_leg: None,
    }))
}

/// The first arg token's leading letter(s) name the opcode; any characters
/// after that are modifiers (spec.md §4.7 "modifier characters immediately
/// follow it").
fn parse_opcode(token: &str) -> std::result::Result<Opcode, ParseErrorKind> {
    let lower = token.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("vf") {
        return if rest.is_empty() {
            Ok(Opcode::VerFeature)
        } else {
            Err(ParseErrorKind::BadModifier)
        };
    }

    let mut chars = lower.chars();
    let head = chars.next().ok_or(ParseErrorKind::EmptyCommand)?;
    let mods: Vec<char> = chars.collect();

    match head {
        'v' => no_mods(mods, Opcode::GetVer),
        'x' => no_mods(mods, Opcode::DeleteAll),
        'p' => no_mods(mods, Opcode::Play),
        's' => no_mods(mods, Opcode::NoPlay),
        'c' => no_mods(mods, Opcode::Copy),
        'u' => no_mods(mods, Opcode::Update),
        'l' => no_mods(mods, Opcode::Lookup),
        'q' => no_mods(mods, Opcode::Query),
        'i' => {
            let mut brief = false;
            let mut load = false;
            for m in mods {
                match m {
                    'b' => brief = true,
                    'l' => load = true,
                    _ => return Err(ParseErrorKind::BadModifier),
                }
            }
            Ok(Opcode::Info { brief, load })
        }
        'd' => {
            let mut weak = false;
            for m in mods {
                match m {
                    'w' => weak = true,
                    _ => return Err(ParseErrorKind::BadModifier),
                }
            }
            Ok(Opcode::Delete { weak })
        }
        'r' => {
            let mut single_file = false;
            for m in mods {
                match m {
                    's' => single_file = true,
                    _ => return Err(ParseErrorKind::BadModifier),
                }
            }
            Ok(Opcode::Record { single_file })
        }
        'g' => {
            let mut verbose = false;
            for m in mods {
                match m {
                    'v' => verbose = true,
                    _ => return Err(ParseErrorKind::BadModifier),
                }
            }
            Ok(Opcode::GetStats { verbose })
        }
        _ => Err(ParseErrorKind::BadModifier),
    }
}

fn no_mods(mods: Vec<char>, op: Opcode) -> std::result::Result<Opcode, ParseErrorKind> {
    if mods.is_empty() {
        Ok(op)
    } else {
        Err(ParseErrorKind::BadModifier)
    }
}

/// Extract the common call-id/tag fields an opcode's argument layout
/// carries (spec.md §4.7 `pre_parse`). Opcodes with no session identity
/// (`GET_VER`, `VER_FEATURE`, `INFO`, `DELETE_ALL`, `GET_STATS`) get an empty
/// [`CommonArgs`] beyond `rname`.
fn pre_parse(opcode: &Opcode, args: &[String]) -> CommonArgs {
    let rname = opcode.rname();
    let mut common = CommonArgs { rname, ..Default::default() };

    match opcode {
        Opcode::GetVer | Opcode::VerFeature | Opcode::Info { .. } | Opcode::DeleteAll
        | Opcode::GetStats { .. } => {}

        Opcode::Update | Opcode::Lookup => {
            // `<op> call_id from_tag addr port [to_tag]`
            common.call_id = args.get(1).cloned().unwrap_or_default();
            common.from_tag = args.get(2).cloned().unwrap_or_default();
            common.to_tag = args.get(5).cloned();
        }

        Opcode::Delete { .. } | Opcode::Record { .. } | Opcode::Copy | Opcode::Query => {
            // `<op> call_id from_tag [to_tag]`
            common.call_id = args.get(1).cloned().unwrap_or_default();
            common.from_tag = args.get(2).cloned().unwrap_or_default();
            common.to_tag = args.get(3).cloned();
        }

        Opcode::Play | Opcode::NoPlay => {
            // `<op> call_id pname codecs from_tag [to_tag]`
            // (original_source rtpp_command.c's PLAY layout).
            common.call_id = args.get(1).cloned().unwrap_or_default();
            common.from_tag = args.get(4).cloned().unwrap_or_default();
            common.to_tag = args.get(5).cloned();
        }
    }
    common
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(raw: &str, transport: TransportMode) -> Command {
        let rcache = RetransmitCache::with_default_ttl();
        let stats = Stats::new();
        match parse(raw, transport, None, &rcache, &stats) {
            Ok(ParseOutcome::Fresh(cmd)) => cmd,
            Ok(ParseOutcome::Retransmission { .. }) => panic!("unexpected retransmission"),
            Err(f) => panic!("unexpected parse failure: {}", f.error),
        }
    }

    #[test]
    fn tokenizes_and_splits_subcommand() {
        let cmd = fresh("y1 U call-C ft 1.2.3.4 5000 && M0 someparam", TransportMode::Datagram);
        assert_eq!(cmd.cookie.as_deref(), Some("y1"));
        assert_eq!(cmd.args, vec!["U", "call-C", "ft", "1.2.3.4", "5000"]);
        assert_eq!(cmd.subc_args, vec!["M0", "someparam"]);
    }

    #[test]
    fn empty_command_is_rejected() {
        let rcache = RetransmitCache::with_default_ttl();
        let stats = Stats::new();
        let result = parse("   ", TransportMode::Stream, None, &rcache, &stats);
        assert!(matches!(
            result,
            Err(ParseFailure { error: RelayError::Parse { kind: ParseErrorKind::EmptyCommand }, .. })
        ));
    }

    #[test]
    fn datagram_without_any_command_after_cookie_is_missing_cookie() {
        let rcache = RetransmitCache::with_default_ttl();
        let stats = Stats::new();
        let result = parse("onlycookie", TransportMode::Datagram, None, &rcache, &stats);
        assert!(matches!(
            result,
            Err(ParseFailure { error: RelayError::Parse { kind: ParseErrorKind::MissingCookie }, .. })
        ));
    }

    #[test]
    fn trailing_double_ampersand_is_empty_subcommand() {
        let rcache = RetransmitCache::with_default_ttl();
        let stats = Stats::new();
        let result = parse("c1 V &&", TransportMode::Datagram, None, &rcache, &stats);
        assert!(matches!(
            result,
            Err(ParseFailure { error: RelayError::Parse { kind: ParseErrorKind::EmptySubCommand }, .. })
        ));
    }

    #[test]
    fn unknown_modifier_is_bad_modifier() {
        let rcache = RetransmitCache::with_default_ttl();
        let stats = Stats::new();
        let result = parse("c1 Dz call-1 ft", TransportMode::Datagram, None, &rcache, &stats);
        assert!(matches!(
            result,
            Err(ParseFailure { error: RelayError::Parse { kind: ParseErrorKind::BadModifier }, .. })
        ));
    }

    #[test]
    fn delete_weak_modifier_parses() {
        let cmd = fresh("c1 Dw call-1 ft", TransportMode::Datagram);
        assert_eq!(cmd.opcode, Opcode::Delete { weak: true });
        assert_eq!(cmd.common.call_id, "call-1");
        assert_eq!(cmd.common.from_tag, "ft");
    }

    #[test]
    fn retransmitted_cookie_short_circuits_before_dispatch() {
        let rcache = RetransmitCache::with_default_ttl();
        let stats = Stats::new();
        stats.ncmds_rcvd();
        rcache.insert("c1", b"c1 0\n".to_vec());

        let outcome = parse("c1 X", TransportMode::Datagram, None, &rcache, &stats).unwrap();
        match outcome {
            ParseOutcome::Retransmission { reply_bytes } => {
                assert_eq!(reply_bytes, b"c1 0\n");
            }
            ParseOutcome::Fresh(_) => panic!("expected retransmission"),
        }
        assert_eq!(
            stats.snapshot().iter().find(|(k, _)| *k == "ncmds_rcvd").unwrap().1,
            0
        );
        assert_eq!(
            stats.snapshot().iter().find(|(k, _)| *k == "ncmds_rcvd_ndups").unwrap().1,
            1
        );
    }

    #[test]
    fn argc_overflow_is_rejected() {
        let rcache = RetransmitCache::with_default_ttl();
        let stats = Stats::new();
        let many: String = (0..RTPC_MAX_ARGC + 2).map(|i| format!("t{i} ")).collect();
        let raw = format!("c1 {many}");
        let result = parse(&raw, TransportMode::Datagram, None, &rcache, &stats);
        assert!(matches!(
            result,
            Err(ParseFailure { error: RelayError::Parse { kind: ParseErrorKind::ArgcOverflow }, .. })
        ));
    }
}
