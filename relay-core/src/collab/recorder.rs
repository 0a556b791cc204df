//! Recorder interface (spec.md §1 "PCAP/raw recorder" external collaborator,
//! §4.8 `RECORD`/`COPY`, §6 file-naming scheme).
//!
//! The recorder itself — writing PCAP or raw frames to disk — is out of
//! scope; this module is the seam the dispatcher calls through, plus the
//! file-naming helper the spec pins down precisely enough to be worth
//! implementing and testing even though the writer behind it is a stub.

use std::fmt;

/// File format a [`Recorder`] is asked to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingFormat {
    Pcap,
    Raw,
}

impl RecordingFormat {
    fn extension(self) -> &'static str {
        match self {
            RecordingFormat::Pcap => "pcap",
            RecordingFormat::Raw => "raw",
        }
    }
}

/// Engages/disengages recording on a stream. The dispatcher calls this once
/// per stream of a session for `RECORD` (and, with `fork = true`, for
/// `COPY`); it never writes media bytes itself.
pub trait Recorder: Send + Sync {
    /// Begin recording `leg_name`'s streams for this call under `file_name`
    /// (see [`default_file_name`]). Returns `Err` if the recorder could not
    /// be engaged (e.g. disk full), which the dispatcher maps to
    /// [`crate::error::ECODE_CPYFAIL`] for `COPY` or a generic resource error
    /// for `RECORD`.
    fn start(&self, file_name: &str, format: RecordingFormat) -> Result<(), RecorderError>;

    /// Stop any recording in progress for the given file stem. Idempotent.
    fn stop(&self, file_name: &str);
}

#[derive(Debug)]
pub struct RecorderError(pub String);

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recorder error: {}", self.0)
    }
}

impl std::error::Error for RecorderError {}

/// `{call_id}_{from_tag}_{to_tag}.{ext}` (spec.md §6). `to_tag` is rendered
/// as `NA` when the session has not yet been promoted by `LOOKUP` — `RECORD`
/// may legally be sent before that point.
pub fn default_file_name(
    call_id: &str,
    from_tag: &str,
    to_tag: Option<&str>,
    format: RecordingFormat,
) -> String {
    format!(
        "{call_id}_{from_tag}_{}.{}",
        to_tag.unwrap_or("NA"),
        format.extension()
    )
}

/// No-op recorder used when no collaborator is configured. `start` always
/// succeeds; nothing is persisted.
#[derive(Default)]
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn start(&self, _file_name: &str, _format: RecordingFormat) -> Result<(), RecorderError> {
        Ok(())
    }

    fn stop(&self, _file_name: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_uses_na_for_unpromoted_session() {
        assert_eq!(
            default_file_name("call-1", "ft", None, RecordingFormat::Pcap),
            "call-1_ft_NA.pcap"
        );
    }

    #[test]
    fn file_name_includes_both_tags_once_promoted() {
        assert_eq!(
            default_file_name("call-1", "ft", Some("tt"), RecordingFormat::Raw),
            "call-1_ft_tt.raw"
        );
    }

    #[test]
    fn null_recorder_always_succeeds() {
        let recorder = NullRecorder;
        assert!(recorder.start("x", RecordingFormat::Pcap).is_ok());
        recorder.stop("x");
    }
}
