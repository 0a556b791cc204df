//! Media-plane forwarding (spec.md §1 "on-wire RTP/RTCP packet rewriter"
//! external collaborator — see [`forwarder`] for the seam and the default
//! learning-mode relay this crate ships).

pub mod forwarder;

pub use forwarder::{LearningForwarder, MediaForwarder};
