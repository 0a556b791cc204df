//! Session-timeout notification emitter (capability `20081224`, spec.md §6,
//! §9 design-note reference to the source's notify-target handling).
//!
//! `VER_FEATURE 20081224` must answer `0` unless this subsystem is actually
//! configured, regardless of the datestamp being in the static capability
//! list — [`NotificationEmitter::is_enabled`] is that runtime precondition.

/// Emits a one-shot notification when a session times out or is explicitly
/// torn down with notification requested. The wire format and transport for
/// the notification itself are out of scope; this is the seam the
/// dispatcher and TTL-expiry path call through.
pub trait NotificationEmitter: Send + Sync {
    /// Whether the notification subsystem is configured and able to accept
    /// targets. Gates `VER_FEATURE 20081224`.
    fn is_enabled(&self) -> bool;

    /// Notify `target` that `call_id`/`from_tag` has ended. Best-effort:
    /// failures are logged by the caller, not surfaced as command errors.
    fn notify(&self, target: &str, call_id: &str, from_tag: &str);
}

/// Disabled by default — no notification target configured.
#[derive(Default)]
pub struct NullNotificationEmitter;

impl NotificationEmitter for NullNotificationEmitter {
    fn is_enabled(&self) -> bool {
        false
    }

    fn notify(&self, _target: &str, _call_id: &str, _from_tag: &str) {}
}

/// Enabled via `RelayConfig::notify_enabled`/`--notify`, for deployments
/// that want `VER_FEATURE 20081224` to report support without wiring in a
/// real delivery mechanism (e.g. a SIP `NOTIFY` to `%%CC_SELF%%`, out of
/// scope here). `notify` logs the event rather than delivering it; a
/// deployment needing real delivery supplies its own [`NotificationEmitter`]
/// via `RelayServer::with_notify`.
#[derive(Default)]
pub struct LoggingNotificationEmitter;

impl NotificationEmitter for LoggingNotificationEmitter {
    fn is_enabled(&self) -> bool {
        true
    }

    fn notify(&self, target: &str, call_id: &str, from_tag: &str) {
        tracing::info!(target, call_id, from_tag, "session timeout notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_emitter_is_disabled() {
        assert!(!NullNotificationEmitter.is_enabled());
    }

    #[test]
    fn logging_emitter_is_enabled() {
        assert!(LoggingNotificationEmitter.is_enabled());
        LoggingNotificationEmitter.notify("sip:a@b", "call-1", "ft");
    }
}
