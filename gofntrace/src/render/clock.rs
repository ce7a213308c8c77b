//! Wall-clock rendering of kernel timestamps
//!
//! Probe timestamps are nanoseconds since boot. Adding the boot time from
//! `/proc/stat` gives wall-clock time; we print it as UTC so that output
//! does not depend on the tracing host's time zone.

use std::fs;
use std::io;

const NANOS_PER_SEC: u64 = 1_000_000_000;
const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootClock {
    boot_epoch_secs: u64,
}

impl BootClock {
    /// Read the boot time (`btime`) from `/proc/stat`
    ///
    /// # Errors
    /// Returns an error if `/proc/stat` cannot be read or has no `btime` line
    pub fn from_proc_stat() -> io::Result<Self> {
        let stat = fs::read_to_string("/proc/stat")?;
        Self::parse_proc_stat(&stat)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no btime in /proc/stat"))
    }

    #[must_use]
    pub fn from_epoch_secs(boot_epoch_secs: u64) -> Self {
        Self { boot_epoch_secs }
    }

    fn parse_proc_stat(stat: &str) -> Option<Self> {
        let btime = stat.lines().find_map(|line| line.strip_prefix("btime "))?;
        Some(Self::from_epoch_secs(btime.trim().parse().ok()?))
    }

    /// `DD HH:MM:SS.ffff` for a timestamp in nanoseconds since boot
    #[must_use]
    pub fn format(&self, time_ns: u64) -> String {
        let secs = self.boot_epoch_secs + time_ns / NANOS_PER_SEC;
        let frac = (time_ns % NANOS_PER_SEC) / 100_000;

        let day_secs = secs % SECS_PER_DAY;
        let day = day_of_month(secs / SECS_PER_DAY);
        format!(
            "{day:02} {:02}:{:02}:{:02}.{frac:04}",
            day_secs / 3600,
            (day_secs / 60) % 60,
            day_secs % 60
        )
    }
}

/// Day of month for a count of days since 1970-01-01 (proleptic Gregorian)
fn day_of_month(days: u64) -> u64 {
    // shift the epoch to 0000-03-01 so leap days end each 4/100/400 cycle
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    doy - (153 * mp + 2) / 5 + 1
}
