//! Resolving a UTC offset to the set of canonical timezones that share it.
//!
//! Which zones sit at, say, +02:00 changes with daylight-saving
//! transitions, so an offset only maps to a zone set *during an interval*.
//! We compute those validity intervals lazily and cache them per offset:
//! scan forward in 3-day steps until the membership set changes (capped at
//! one year), then refine the boundary to the hour. Later queries inside a
//! known interval are a cache hit.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Offset, TimeZone, Utc};
use chrono_tz::TZ_VARIANTS;

/// One cached validity interval: during `[start, end)` exactly `zones`
/// have the offset.
#[derive(Clone, Debug)]
struct ZoneInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    zones: BTreeSet<String>,
}

/// Cache of offset → validity intervals. Grows monotonically; owned by
/// whoever scores messages.
#[derive(Debug, Default)]
pub struct OffsetZoneCache {
    intervals: BTreeMap<i32, Vec<ZoneInterval>>,
}

impl OffsetZoneCache {
    pub fn new() -> OffsetZoneCache {
        OffsetZoneCache::default()
    }

    /// The set of canonical zone names that have `offset_seconds` at `at`.
    ///
    /// An empty set means no zone currently has that offset; callers
    /// should treat that as "offset unresolvable" and score no match.
    pub fn zones_for(&mut self, offset_seconds: i32, at: DateTime<Utc>) -> BTreeSet<String> {
        let intervals = self.intervals.entry(offset_seconds).or_default();
        for interval in intervals.iter().rev() {
            if interval.start <= at && at < interval.end {
                return interval.zones.clone();
            }
        }

        let (zones, end) = find_zone_span(offset_seconds, at);
        // The first interval for an offset is backdated to the epoch; a
        // later interval starts where the previous one ended.
        let start = intervals
            .last()
            .map(|interval| interval.end)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        intervals.push(ZoneInterval {
            start,
            end,
            zones: zones.clone(),
        });
        zones
    }

    #[cfg(test)]
    fn interval_count(&self, offset_seconds: i32) -> usize {
        self.intervals
            .get(&offset_seconds)
            .map_or(0, |intervals| intervals.len())
    }
}

/// All zones with `offset_seconds` at the instant `at`.
fn zones_at(offset_seconds: i32, at: DateTime<Utc>) -> BTreeSet<String> {
    TZ_VARIANTS
        .iter()
        .filter(|tz| {
            tz.offset_from_utc_datetime(&at.naive_utc())
                .fix()
                .local_minus_utc()
                == offset_seconds
        })
        .map(|tz| tz.name().to_owned())
        .collect()
}

/// Find the zones with `offset_seconds` at `start` and how long that
/// membership set stays unchanged (capped at one year out).
fn find_zone_span(
    offset_seconds: i32,
    start: DateTime<Utc>,
) -> (BTreeSet<String>, DateTime<Utc>) {
    let maximum = start + Duration::days(365);
    let zones = zones_at(offset_seconds, start);

    // Coarse scan.
    let step = Duration::days(3);
    let mut at = start;
    loop {
        at += step;
        if zones_at(offset_seconds, at) != zones {
            at -= step;
            break;
        }
        if at > maximum {
            return (zones, at - step);
        }
    }

    // Refine the boundary to the hour.
    let step = Duration::hours(1);
    loop {
        at += step;
        if at > maximum || zones_at(offset_seconds, at) != zones {
            return (zones, at - step);
        }
    }
}
