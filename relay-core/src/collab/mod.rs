//! External-collaborator interfaces: the pieces spec.md §1 names but treats
//! as out of scope, specified here only as the traits the core dispatches
//! through.

pub mod notify;
pub mod playback;
pub mod recorder;

pub use notify::NotificationEmitter;
pub use playback::PlaybackEngine;
pub use recorder::Recorder;
