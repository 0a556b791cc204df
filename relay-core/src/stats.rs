//! Statistics counters (spec.md §4.8 `GET_STATS`, §4.9 reply-path bookkeeping).
//!
//! Plain named atomics plus one derived value (`average_load`) refreshed on a
//! fixed period by the [`crate::concurrency::TimedScheduler`] rather than
//! computed inline on every read — grounded on
//! `original_source/src/rtpp_objck.c`'s `update_derived_stats` tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

macro_rules! counters {
    ($($field:ident => $doc:literal),+ $(,)?) => {
        /// Named atomic counters backing `GET_STATS`/`INFO`.
        #[derive(Default)]
        pub struct Stats {
            $(#[doc = $doc] $field: AtomicU64,)+
            average_load: RwLock<f64>,
            load_window_start: RwLock<Option<Instant>>,
        }

        impl Stats {
            $(
                #[doc = concat!("Increment `", stringify!($field), "` and return the new value.")]
                pub fn $field(&self) -> u64 {
                    self.$field.fetch_add(1, Ordering::Relaxed) + 1
                }
            )+

            /// Every counter as `(name, value)`, in the stable order `GET_STATS`
            /// reports them.
            pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
                vec![$((stringify!($field), self.$field.load(Ordering::Relaxed))),+]
            }
        }
    };
}

counters! {
    ncmds_rcvd => "Control commands received.",
    ncmds_rcvd_ndups => "Retransmitted (duplicate) control commands detected via the rcache.",
    ncmds_repld => "Replies sent.",
    ncmds_succd => "Replies that reported success.",
    ncmds_errs => "Replies that reported an error.",
    npkts_rcvd => "RTP/RTCP packets received from either leg.",
    npkts_relayed => "RTP/RTCP packets relayed to the opposite leg.",
    npkts_played => "Packets emitted by the tone/file generator.",
    nsess_created => "Sessions created (UPDATE with no matching session).",
    nsess_destroyed => "Sessions destroyed (DELETE, DELETE_ALL, or TTL expiry).",
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decrement is not offered for the `ncmds_rcvd` family in general, but
    /// the at-most-once short-circuit (spec.md §4.9) specifically requires
    /// undoing the `ncmds_rcvd` bump made when the original (non-duplicate)
    /// command was read, since the duplicate is not a new arrival.
    pub fn undo_ncmds_rcvd(&self) {
        self.ncmds_rcvd.fetch_sub(1, Ordering::Relaxed);
    }

    /// Refresh the derived `average_load` figure. Intended as the body of a
    /// periodic [`crate::concurrency::TimedScheduler`] task; `window` is the
    /// number of commands received since the last call.
    pub fn update_derived(&self, commands_in_window: u64) {
        let now = Instant::now();
        let mut start = self.load_window_start.write();
        let elapsed = match *start {
            Some(prev) => now.duration_since(prev).as_secs_f64().max(f64::EPSILON),
            None => {
                *start = Some(now);
                return;
            }
        };
        *start = Some(now);
        *self.average_load.write() = commands_in_window as f64 / elapsed;
    }

    pub fn average_load(&self) -> f64 {
        *self.average_load.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let stats = Stats::new();
        assert_eq!(stats.ncmds_rcvd(), 1);
        assert_eq!(stats.ncmds_rcvd(), 2);
        assert_eq!(
            stats.snapshot().iter().find(|(k, _)| *k == "ncmds_rcvd").unwrap().1,
            2
        );
    }

    #[test]
    fn undo_ncmds_rcvd_reverses_one_increment() {
        let stats = Stats::new();
        stats.ncmds_rcvd();
        stats.ncmds_rcvd();
        stats.undo_ncmds_rcvd();
        assert_eq!(
            stats.snapshot().iter().find(|(k, _)| *k == "ncmds_rcvd").unwrap().1,
            1
        );
    }

    #[test]
    fn snapshot_includes_every_named_counter() {
        let stats = Stats::new();
        let names: Vec<&str> = stats.snapshot().into_iter().map(|(n, _)| n).collect();
        for expected in [
            "ncmds_rcvd",
            "ncmds_rcvd_ndups",
            "ncmds_repld",
            "ncmds_succd",
            "ncmds_errs",
            "npkts_rcvd",
            "npkts_relayed",
            "npkts_played",
            "nsess_created",
            "nsess_destroyed",
        ] {
            assert!(names.contains(&expected), "missing counter {expected}");
        }
    }

    #[test]
    fn average_load_is_zero_until_second_tick() {
        let stats = Stats::new();
        stats.update_derived(10);
        assert_eq!(stats.average_load(), 0.0);
    }
}
