//! The `VER_FEATURE` capability list (spec.md §6), reproduced verbatim from
//! `original_source/src/rtpp_command.c`'s `proto_caps[]`.

/// One entry in the capability list: a YYYYMMDD datestamp and a short
/// human-readable description.
pub struct Capability {
    pub datestamp: &'static str,
    pub description: &'static str,
}

/// The capability list in declaration order. The first entry is the base
/// protocol version and, per the source, is never reported as an extension
/// by `VER_FEATURE -v`/`GET_VER -v` style introspection — only entries after
/// it are "features".
pub const PROTO_CAPS: &[Capability] = &[
    Capability { datestamp: "20040107", description: "Basic RTP proxy functionality" },
    Capability { datestamp: "20050322", description: "Support for multiple RTP streams and MOH" },
    Capability { datestamp: "20060704", description: "Support for extra parameter in the V command" },
    Capability { datestamp: "20071116", description: "Support for RTP re-packetization" },
    Capability { datestamp: "20071218", description: "Support for forking (copying) RTP stream" },
    Capability { datestamp: "20080403", description: "Support for RTP statistics querying" },
    Capability { datestamp: "20081102", description: "Support for setting codecs in the update/lookup command" },
    Capability { datestamp: "20081224", description: "Support for session timeout notifications" },
    Capability { datestamp: "20090810", description: "Support for automatic bridging" },
    Capability { datestamp: "20140323", description: "Support for tracking/reporting load" },
    Capability { datestamp: "20140617", description: "Support for anchoring session connect time" },
    Capability { datestamp: "20141004", description: "Support for extendable performance counters" },
    Capability { datestamp: "20150330", description: "Support for allocating a new port (\"Un\"/\"Ln\" commands)" },
    Capability { datestamp: "20150420", description: "Support for SEQ tracking and new rtpa_ counters; Q command extended" },
    Capability { datestamp: "20150617", description: "Support for the wildcard %%CC_SELF%% as a disconnect notify target" },
    Capability { datestamp: "20191015", description: "Support for the && sub-command specifier" },
];

/// The base protocol datestamp `GET_VER` replies with — `proto_caps[0]`.
pub fn base_version() -> &'static str {
    PROTO_CAPS[0].datestamp
}

/// Whether `datestamp` names a known capability. `VER_FEATURE` additionally
/// gates `20081224` on the notification subsystem being configured; that
/// runtime precondition lives in [`crate::protocol::dispatcher`], not here —
/// this function only answers "is the datestamp in the list at all".
pub fn is_known(datestamp: &str) -> bool {
    PROTO_CAPS.iter().any(|c| c.datestamp == datestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_version_is_first_entry() {
        assert_eq!(base_version(), "20040107");
    }

    #[test]
    fn known_and_unknown_datestamps() {
        assert!(is_known("20191015"));
        assert!(!is_known("19700101"));
    }
}
