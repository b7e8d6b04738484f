//! Decides when a backup is due and when to check again.

use std::thread;

use chrono::{Local, NaiveDateTime, TimeDelta};

use crate::settings::DownloadInterval;

/// Delay between two checks, independent of the outcome of a check.
pub fn recheck_delay() -> TimeDelta {
    TimeDelta::hours(1)
}

/// Earliest time the next backup is due.
///
/// [None] if no backup was made yet, i.e. a backup is due right away.
pub fn next_due(
    last_backup_time: Option<NaiveDateTime>,
    interval: DownloadInterval,
) -> Option<NaiveDateTime> {
    let last = last_backup_time?;
    // an overflowing due time is never reached
    Some(last.checked_add_signed(interval.duration()).unwrap_or(NaiveDateTime::MAX))
}

/// Returns if a backup is due at `now`.
///
/// A backup is due exactly once `interval` has elapsed since the last backup,
/// or if there never was one.
pub fn is_due(
    last_backup_time: Option<NaiveDateTime>,
    interval: DownloadInterval,
    now: NaiveDateTime,
) -> bool {
    next_due(last_backup_time, interval).is_none_or(|due| now >= due)
}

/// Arranges the next invocation.
pub trait Rearm {
    fn rearm(&mut self, at: NaiveDateTime);
}

/// Recurring timer owned by the host process.
///
/// Remembers the re-armed instant and sleeps until it on [wait_or](Self::wait_or).
#[derive(Debug, Default)]
pub struct Ticker {
    next: Option<NaiveDateTime>,
}

impl Ticker {
    pub fn next(&self) -> Option<NaiveDateTime> {
        self.next
    }

    /// Blocks until the re-armed instant, returns right away if it already passed.
    ///
    /// Stands in for the external trigger if nothing was armed and blocks for `fallback`.
    pub fn wait_or(&mut self, fallback: TimeDelta) {
        let next = self
            .next
            .take()
            .unwrap_or_else(|| Local::now().naive_local() + fallback);
        let remaining = (next - Local::now().naive_local())
            .to_std()
            .unwrap_or_default();
        log::debug!(target: "schedule", "Sleeping {}s until {next}", remaining.as_secs());
        thread::sleep(remaining);
    }
}

impl Rearm for Ticker {
    fn rearm(&mut self, at: NaiveDateTime) {
        log::debug!(target: "schedule", "Next check at {at}");
        self.next = Some(at);
    }
}
