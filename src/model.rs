/// Canonical data model shared across the pipeline stages.
///
/// The source of truth for one measurement is the `Sounding` struct: the
/// mandatory parser fields plus optional downstream fields that later
/// stages fill in (zone, water level, processed depth, uncertainties,
/// order). Stages pass owned `Vec<Sounding>` snapshots; there is no shared
/// mutable frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Water-level time-series codes
// ---------------------------------------------------------------------------

/// IWLS time-series product codes.
///
/// Only the water-level family is listed here; the API exposes more
/// phenomena (winds, temperatures) that this pipeline never requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeSeries {
    /// Official quality-controlled water level observation.
    Wlo,
    /// Water level forecast for the next 48 hours.
    Wlf,
    /// SPINE water level forecast.
    WlfSpine,
    /// VTG water level forecast.
    WlfVtg,
    /// Water level prediction for the next years.
    Wlp,
    /// Tide-table high/low prediction.
    WlpHilo,
    /// Bores arrival and intensity.
    WlpBores,
    /// Reversing falls.
    WcpSlack,
    /// Dynamic vertical clearance forecast.
    Dvcf,
    /// SPINE dynamic vertical clearance forecast.
    DvcfSpine,
}

impl TimeSeries {
    pub const ALL: [TimeSeries; 10] = [
        TimeSeries::Wlo,
        TimeSeries::Wlf,
        TimeSeries::WlfSpine,
        TimeSeries::WlfVtg,
        TimeSeries::Wlp,
        TimeSeries::WlpHilo,
        TimeSeries::WlpBores,
        TimeSeries::WcpSlack,
        TimeSeries::Dvcf,
        TimeSeries::DvcfSpine,
    ];

    /// Wire code as sent to the API and written to output artifacts.
    pub fn code(&self) -> &'static str {
        match self {
            TimeSeries::Wlo => "wlo",
            TimeSeries::Wlf => "wlf",
            TimeSeries::WlfSpine => "wlf-spine",
            TimeSeries::WlfVtg => "wlf-vtg",
            TimeSeries::Wlp => "wlp",
            TimeSeries::WlpHilo => "wlp-hilo",
            TimeSeries::WlpBores => "wlp-bores",
            TimeSeries::WcpSlack => "wcp-slack",
            TimeSeries::Dvcf => "dvcf",
            TimeSeries::DvcfSpine => "dvcf-spine",
        }
    }

    /// Strict parse of a wire code.
    pub fn from_code(value: &str) -> Result<TimeSeries, UnknownTimeSeriesError> {
        TimeSeries::ALL
            .iter()
            .copied()
            .find(|ts| ts.code() == value)
            .ok_or_else(|| UnknownTimeSeriesError {
                code: value.to_string(),
            })
    }
}

impl fmt::Display for TimeSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown time-series code '{code}'")]
pub struct UnknownTimeSeriesError {
    pub code: String,
}

/// Which variant supplied a water-level value: the series itself, or a
/// cubic-spline resample of it (rendered with the `-interpolated` suffix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesLabel {
    Observed(TimeSeries),
    Interpolated(TimeSeries),
}

impl SeriesLabel {
    pub fn series(&self) -> TimeSeries {
        match self {
            SeriesLabel::Observed(ts) | SeriesLabel::Interpolated(ts) => *ts,
        }
    }

    /// True when the value traces back to quality-controlled observations
    /// rather than predictions (`wlo` but not any `wlp` variant).
    pub fn is_observation_based(&self) -> bool {
        let code = self.to_string();
        code.contains("wlo") && !code.contains("wlp")
    }
}

impl fmt::Display for SeriesLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesLabel::Observed(ts) => f.write_str(ts.code()),
            SeriesLabel::Interpolated(ts) => write!(f, "{}-interpolated", ts.code()),
        }
    }
}

// ---------------------------------------------------------------------------
// Outlier tags
// ---------------------------------------------------------------------------

/// Reason a sounding was flagged by the cleaner. Tags are kept on retained
/// rows for audit; rows whose tag matches an enabled filter are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    Latitude,
    Longitude,
    Depth,
    Time,
    Speed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RejectReason::Latitude => "rejected by latitude filter",
            RejectReason::Longitude => "rejected by longitude filter",
            RejectReason::Depth => "rejected by depth filter",
            RejectReason::Time => "rejected by time filter",
            RejectReason::Speed => "rejected by speed filter",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Soundings
// ---------------------------------------------------------------------------

/// Tide zone attributes denormalized onto a sounding after the spatial
/// join (copied from the generating station of the Voronoi cell).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TideZoneRef {
    pub id: String,
    pub code: String,
    pub name: String,
}

/// Water-level context recorded when a sounding is reduced to chart datum.
#[derive(Debug, Clone, PartialEq)]
pub struct WaterLevelInfo {
    pub water_level_m: f64,
    pub series: SeriesLabel,
    pub zone: TideZoneRef,
}

/// One depth measurement, from raw parse through full processing.
#[derive(Debug, Clone)]
pub struct Sounding {
    pub time_utc: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_raw_m: f64,
    pub speed_kn: Option<f64>,
    pub outlier_tags: Vec<RejectReason>,
    pub tide_zone: Option<TideZoneRef>,
    pub water_level: Option<WaterLevelInfo>,
    pub depth_processed_m: Option<f64>,
    pub uncertainty_m: Option<f64>,
    pub thu_m: Option<f64>,
    pub iho_order: Option<IhoOrder>,
}

impl Sounding {
    pub fn new(
        time_utc: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        depth_raw_m: f64,
        speed_kn: Option<f64>,
    ) -> Self {
        Sounding {
            time_utc,
            latitude,
            longitude,
            depth_raw_m,
            speed_kn,
            outlier_tags: Vec::new(),
            tide_zone: None,
            water_level: None,
            depth_processed_m: None,
            uncertainty_m: None,
            thu_m: None,
            iho_order: None,
        }
    }

    pub fn has_tag(&self, reason: RejectReason) -> bool {
        self.outlier_tags.contains(&reason)
    }
}

// ---------------------------------------------------------------------------
// Water-level samples
// ---------------------------------------------------------------------------

/// One sample of a station water-level series.
///
/// `value: None` marks the synthetic rows the reconciler pads onto series
/// that do not span the requested interval; they exist only so gap
/// detection sees the uncovered edges, and are dropped at finalization.
#[derive(Debug, Clone)]
pub struct WaterLevelSample {
    pub event_date: DateTime<Utc>,
    pub value: Option<f64>,
    pub series: Option<SeriesLabel>,
    /// Only meaningful for observed (`wlo`) series.
    pub qc_flag: Option<String>,
}

impl WaterLevelSample {
    pub fn new(event_date: DateTime<Utc>, value: f64, series: SeriesLabel) -> Self {
        WaterLevelSample {
            event_date,
            value: Some(value),
            series: Some(series),
            qc_flag: None,
        }
    }

    /// Padding row carrying no value, used to mark unsampled interval edges.
    pub fn empty_at(event_date: DateTime<Utc>) -> Self {
        WaterLevelSample {
            event_date,
            value: None,
            series: None,
            qc_flag: None,
        }
    }
}

/// Continuous per-station water-level series covering a requested interval,
/// with every sample resolved to a concrete value and source label.
#[derive(Debug, Clone)]
pub struct ReconciledSeries {
    pub station_id: String,
    pub position: Option<(f64, f64)>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Series codes that contributed at least one sample.
    pub series_codes: Vec<TimeSeries>,
    pub samples: Vec<ReconciledSample>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledSample {
    pub event_date: DateTime<Utc>,
    pub value: f64,
    pub series: SeriesLabel,
}

// ---------------------------------------------------------------------------
// IHO survey orders
// ---------------------------------------------------------------------------

/// IHO S-44 survey orders, strictest first. The derived ordering makes
/// `max` pick the worse (less strict) of two classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IhoOrder {
    Exclusive,
    Special,
    Order1a,
    Order1b,
    Order2,
    NotMet,
}

impl IhoOrder {
    /// The five graded orders, strictest first (`NotMet` excluded).
    pub const GRADED: [IhoOrder; 5] = [
        IhoOrder::Exclusive,
        IhoOrder::Special,
        IhoOrder::Order1a,
        IhoOrder::Order1b,
        IhoOrder::Order2,
    ];
}

impl fmt::Display for IhoOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IhoOrder::Exclusive => "Exclusive Order",
            IhoOrder::Special => "Special Order",
            IhoOrder::Order1a => "Order 1a",
            IhoOrder::Order1b => "Order 1b",
            IhoOrder::Order2 => "Order 2",
            IhoOrder::NotMet => "Order Not Met",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_series_codes_round_trip() {
        for ts in TimeSeries::ALL {
            assert_eq!(
                TimeSeries::from_code(ts.code()).unwrap(),
                ts,
                "code '{}' should round-trip",
                ts.code()
            );
        }
    }

    #[test]
    fn test_time_series_rejects_unknown_code() {
        assert!(TimeSeries::from_code("wl9").is_err());
        assert!(TimeSeries::from_code("").is_err());
    }

    #[test]
    fn test_series_label_rendering() {
        assert_eq!(SeriesLabel::Observed(TimeSeries::Wlo).to_string(), "wlo");
        assert_eq!(
            SeriesLabel::Interpolated(TimeSeries::WlfSpine).to_string(),
            "wlf-spine-interpolated"
        );
    }

    #[test]
    fn test_observation_based_excludes_predictions() {
        assert!(SeriesLabel::Observed(TimeSeries::Wlo).is_observation_based());
        assert!(SeriesLabel::Interpolated(TimeSeries::Wlo).is_observation_based());
        assert!(!SeriesLabel::Observed(TimeSeries::Wlp).is_observation_based());
        assert!(!SeriesLabel::Observed(TimeSeries::WlpHilo).is_observation_based());
        assert!(!SeriesLabel::Observed(TimeSeries::Wlf).is_observation_based());
    }

    #[test]
    fn test_iho_order_ranking_strictest_first() {
        assert!(IhoOrder::Exclusive < IhoOrder::Special);
        assert!(IhoOrder::Special < IhoOrder::Order1a);
        assert!(IhoOrder::Order2 < IhoOrder::NotMet);
        // max() must return the worse classification
        assert_eq!(
            IhoOrder::Order1a.max(IhoOrder::Special),
            IhoOrder::Order1a
        );
    }

    #[test]
    fn test_reject_reason_labels() {
        assert_eq!(
            RejectReason::Depth.to_string(),
            "rejected by depth filter"
        );
        assert_eq!(
            RejectReason::Speed.to_string(),
            "rejected by speed filter"
        );
    }
}
