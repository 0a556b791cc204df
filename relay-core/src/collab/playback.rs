//! Tone/file generator interface (spec.md §1 "DTMF side-channel module" and
//! §4.8 `PLAY`/`NOPLAY`), grounded on
//! `original_source/modules/catch_dtmf/rtpp_catch_dtmf.h`'s module-interface
//! shape: a small set of entry points the core calls through, with the
//! actual tone/file synthesis out of scope.

use std::fmt;

/// Engages/disengages playback on one stream. `PLAY ... session` (the
/// literal codecs argument meaning "reuse what was last recorded at
/// update") is resolved by the dispatcher before calling `start` — this
/// trait always receives a concrete codec list.
pub trait PlaybackEngine: Send + Sync {
    /// Start playing `file` on the given stream using `codecs`. Returns
    /// `Err` if the engine could not be engaged (missing file, unsupported
    /// codec), mapped by the dispatcher to
    /// [`crate::error::ECODE_PLRFAIL`].
    fn start(&self, file: &str, codecs: &str) -> Result<(), PlaybackError>;

    /// Stop playback on the stream named by `file`, if any is in progress.
    /// Idempotent.
    fn stop(&self, file: &str);
}

#[derive(Debug)]
pub struct PlaybackError(pub String);

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "playback error: {}", self.0)
    }
}

impl std::error::Error for PlaybackError {}

/// No-op engine used when no collaborator is configured.
#[derive(Default)]
pub struct NullPlaybackEngine;

impl PlaybackEngine for NullPlaybackEngine {
    fn start(&self, _file: &str, _codecs: &str) -> Result<(), PlaybackError> {
        Ok(())
    }

    fn stop(&self, _file: &str) {}
}
