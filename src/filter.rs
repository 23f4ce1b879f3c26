/// Physical-range filtering of soundings.
///
/// Each filter tags offending rows with its reject reason; rows whose tag
/// matches one of the enabled filters are then removed. Tags on surviving
/// rows are preserved so downstream consumers can audit what a disabled
/// filter would have rejected. Filters are independent predicates, so the
/// application order does not matter and re-running is a no-op.

use chrono::Utc;
use log::{info, warn};

use crate::config::FilterConfig;
use crate::model::{RejectReason, Sounding};

/// All five filters, the default set for `enabled_filters`.
pub const ALL_FILTERS: [RejectReason; 5] = [
    RejectReason::Latitude,
    RejectReason::Longitude,
    RejectReason::Depth,
    RejectReason::Time,
    RejectReason::Speed,
];

fn tag_if(sounding: &mut Sounding, reason: RejectReason, invalid: bool) {
    if invalid && !sounding.has_tag(reason) {
        sounding.outlier_tags.push(reason);
    }
}

/// Applies every filter predicate as a tag, then removes the rows whose
/// tags intersect `enabled_filters`.
pub fn clean(
    mut soundings: Vec<Sounding>,
    config: &FilterConfig,
    enabled_filters: &[RejectReason],
) -> Vec<Sounding> {
    let now = Utc::now();

    for sounding in &mut soundings {
        tag_if(
            sounding,
            RejectReason::Latitude,
            sounding.latitude < config.min_latitude || sounding.latitude > config.max_latitude,
        );
        tag_if(
            sounding,
            RejectReason::Longitude,
            sounding.longitude < config.min_longitude || sounding.longitude > config.max_longitude,
        );
        tag_if(
            sounding,
            RejectReason::Depth,
            sounding.depth_raw_m.is_nan()
                || sounding.depth_raw_m <= config.min_depth
                || config.max_depth.is_some_and(|max| sounding.depth_raw_m > max),
        );
        tag_if(sounding, RejectReason::Time, sounding.time_utc > now);
        tag_if(
            sounding,
            RejectReason::Speed,
            sounding.speed_kn.is_some_and(|speed| {
                config.min_speed.is_some_and(|min| speed < min)
                    || config.max_speed.is_some_and(|max| speed > max)
            }),
        );
    }

    for reason in ALL_FILTERS {
        let count = soundings.iter().filter(|s| s.has_tag(reason)).count();
        if count > 0 {
            warn!("{count} soundings {reason}");
        }
    }

    let initial = soundings.len();
    soundings.retain(|s| {
        !enabled_filters
            .iter()
            .any(|reason| s.outlier_tags.contains(reason))
    });
    let removed = initial - soundings.len();
    if removed > 0 {
        info!("{removed} soundings removed by enabled filters, {} kept", soundings.len());
    }

    soundings
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
