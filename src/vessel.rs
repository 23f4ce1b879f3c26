/// Vessel sensor configuration lookup.
///
/// Lever arms follow the CARIS axis convention: from the vessel reference
/// point, +x to starboard, +y to the bow, +z down into the water. A
/// waterline above chart datum therefore carries a negative `z`.
///
/// Configurations are time-stamped: the value at an instant is the most
/// recent entry at or before it. The persistence backend is external —
/// this module only defines the lookup capability and ships the JSON
/// implementation.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum VesselError {
    #[error("failed to read vessel config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse vessel config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no vessel configuration for id '{0}'")]
    VesselNotFound(String),
    #[error("no '{sensor}' entry at or before {timestamp} for vessel '{vessel_id}'")]
    SensorNotFound {
        vessel_id: String,
        sensor: &'static str,
        timestamp: DateTime<Utc>,
    },
    #[error("the {0} configuration changed during the period covered by the data")]
    SensorConfiguration(&'static str),
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum AxisConvention {
    #[serde(rename = "CARIS")]
    Caris,
}

/// A time-stamped 3-D lever arm.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LeverArm {
    pub time_stamp: DateTime<Utc>,
    /// Athwart-ship offset, positive to starboard.
    pub x: f64,
    /// Along-ship offset, positive to the bow.
    pub y: f64,
    /// Vertical offset, positive into the water.
    pub z: f64,
}

/// A time-stamped waterline height (z only, CARIS sign).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Waterline {
    pub time_stamp: DateTime<Utc>,
    pub z: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VesselConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub axis_convention: AxisConvention,
    pub navigation: Vec<LeverArm>,
    pub motion: Vec<LeverArm>,
    pub sounder: Vec<LeverArm>,
    pub waterline: Vec<Waterline>,
}

fn most_recent_at<T: Copy>(
    entries: &[T],
    stamp_of: impl Fn(&T) -> DateTime<Utc>,
    timestamp: DateTime<Utc>,
) -> Option<T> {
    entries
        .iter()
        .filter(|entry| stamp_of(entry) <= timestamp)
        .max_by_key(|entry| stamp_of(entry))
        .copied()
}

impl VesselConfig {
    pub fn navigation_at(&self, timestamp: DateTime<Utc>) -> Result<LeverArm, VesselError> {
        most_recent_at(&self.navigation, |e| e.time_stamp, timestamp).ok_or(
            VesselError::SensorNotFound {
                vessel_id: self.id.clone(),
                sensor: "navigation",
                timestamp,
            },
        )
    }

    pub fn motion_at(&self, timestamp: DateTime<Utc>) -> Result<LeverArm, VesselError> {
        most_recent_at(&self.motion, |e| e.time_stamp, timestamp).ok_or(
            VesselError::SensorNotFound {
                vessel_id: self.id.clone(),
                sensor: "motion",
                timestamp,
            },
        )
    }

    pub fn sounder_at(&self, timestamp: DateTime<Utc>) -> Result<LeverArm, VesselError> {
        most_recent_at(&self.sounder, |e| e.time_stamp, timestamp).ok_or(
            VesselError::SensorNotFound {
                vessel_id: self.id.clone(),
                sensor: "sounder",
                timestamp,
            },
        )
    }

    pub fn waterline_at(&self, timestamp: DateTime<Utc>) -> Result<Waterline, VesselError> {
        most_recent_at(&self.waterline, |e| e.time_stamp, timestamp).ok_or(
            VesselError::SensorNotFound {
                vessel_id: self.id.clone(),
                sensor: "waterline",
                timestamp,
            },
        )
    }

    /// Sounder arm for a whole dataset interval. The entry active at
    /// `min_time` must still be active at `max_time` — a configuration
    /// change inside the processed range cannot be reduced consistently.
    pub fn sounder_over(
        &self,
        min_time: DateTime<Utc>,
        max_time: DateTime<Utc>,
    ) -> Result<LeverArm, VesselError> {
        let at_start = self.sounder_at(min_time)?;
        let at_end = self.sounder_at(max_time)?;
        if at_start.time_stamp != at_end.time_stamp {
            return Err(VesselError::SensorConfiguration("sounder"));
        }
        Ok(at_start)
    }

    /// Waterline for a whole dataset interval, same invariant as
    /// `sounder_over`.
    pub fn waterline_over(
        &self,
        min_time: DateTime<Utc>,
        max_time: DateTime<Utc>,
    ) -> Result<Waterline, VesselError> {
        let at_start = self.waterline_at(min_time)?;
        let at_end = self.waterline_at(max_time)?;
        if at_start.time_stamp != at_end.time_stamp {
            return Err(VesselError::SensorConfiguration("waterline"));
        }
        Ok(at_start)
    }
}

// ---------------------------------------------------------------------------
// Lookup capability
// ---------------------------------------------------------------------------

pub trait VesselConfigSource {
    fn get_vessel_config(&self, vessel_id: &str) -> Result<VesselConfig, VesselError>;
}

/// JSON-backed vessel registry: a file holding a list of vessel configs.
pub struct VesselConfigJsonSource {
    path: PathBuf,
}

impl VesselConfigJsonSource {
    pub fn new(path: impl Into<PathBuf>) -> VesselConfigJsonSource {
        VesselConfigJsonSource { path: path.into() }
    }

    fn load_all(&self) -> Result<Vec<VesselConfig>, VesselError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| VesselError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl VesselConfigSource for VesselConfigJsonSource {
    fn get_vessel_config(&self, vessel_id: &str) -> Result<VesselConfig, VesselError> {
        debug!("loading vessel configuration '{vessel_id}' from {}", self.path.display());

        self.load_all()?
            .into_iter()
            .find(|config| config.id == vessel_id)
            .ok_or_else(|| VesselError::VesselNotFound(vessel_id.to_string()))
    }
}

/// Convenience loader for a single-vessel JSON file path.
pub fn load_vessel_config(path: &Path, vessel_id: &str) -> Result<VesselConfig, VesselError> {
    VesselConfigJsonSource::new(path).get_vessel_config(vessel_id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    const VESSELS_JSON: &str = r#"[
      {
        "id": "Tuktoyaktuk",
        "name": "Tuktoyaktuk community logger",
        "axis_convention": "CARIS",
        "navigation": [
          { "time_stamp": "2021-01-01T00:00:00Z", "x": 0.0, "y": 0.0, "z": 0.0 }
        ],
        "motion": [
          { "time_stamp": "2021-01-01T00:00:00Z", "x": 0.0, "y": 0.0, "z": 0.0 }
        ],
        "sounder": [
          { "time_stamp": "2021-01-01T00:00:00Z", "x": 0.1, "y": 0.3, "z": 0.05 },
          { "time_stamp": "2024-06-01T00:00:00Z", "x": 0.1, "y": 0.3, "z": 0.08 }
        ],
        "waterline": [
          { "time_stamp": "2021-01-01T00:00:00Z", "z": -0.2 }
        ]
      }
    ]"#;

    fn fixture_source(dir: &tempfile::TempDir) -> VesselConfigJsonSource {
        let path = dir.path().join("vessels.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(VESSELS_JSON.as_bytes()).unwrap();
        VesselConfigJsonSource::new(path)
    }

    fn utc(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_lookup_returns_most_recent_entry() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture_source(&dir).get_vessel_config("Tuktoyaktuk").unwrap();

        // Before the 2024 refit: the 2021 arm applies.
        assert_eq!(config.sounder_at(utc(2023, 5, 1)).unwrap().z, 0.05);
        // After: the refit entry applies.
        assert_eq!(config.sounder_at(utc(2024, 7, 1)).unwrap().z, 0.08);
    }

    #[test]
    fn test_lookup_before_first_entry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture_source(&dir).get_vessel_config("Tuktoyaktuk").unwrap();

        assert!(matches!(
            config.sounder_at(utc(2019, 1, 1)),
            Err(VesselError::SensorNotFound { sensor: "sounder", .. })
        ));
    }

    #[test]
    fn test_unknown_vessel_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            fixture_source(&dir).get_vessel_config("Nonesuch"),
            Err(VesselError::VesselNotFound(_))
        ));
    }

    #[test]
    fn test_config_change_inside_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture_source(&dir).get_vessel_config("Tuktoyaktuk").unwrap();

        // Interval straddling the 2024-06-01 sounder refit.
        let result = config.sounder_over(utc(2024, 5, 1), utc(2024, 7, 1));
        assert!(matches!(
            result,
            Err(VesselError::SensorConfiguration("sounder"))
        ));

        // The waterline never changed, so the same interval is fine.
        assert_eq!(
            config.waterline_over(utc(2024, 5, 1), utc(2024, 7, 1)).unwrap().z,
            -0.2
        );
    }

    #[test]
    fn test_stable_interval_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture_source(&dir).get_vessel_config("Tuktoyaktuk").unwrap();

        let arm = config.sounder_over(utc(2022, 1, 1), utc(2023, 1, 1)).unwrap();
        assert_eq!(arm.z, 0.05);
    }

    #[test]
    fn test_waterline_above_datum_is_negative() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture_source(&dir).get_vessel_config("Tuktoyaktuk").unwrap();

        // CARIS +z is down; this waterline sits 0.2 m above datum.
        assert!(config.waterline_at(utc(2022, 1, 1)).unwrap().z < 0.0);
    }
}
