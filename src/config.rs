/// Pipeline configuration loader - parses the processing TOML file.
///
/// The recognized option tree is enumerated here and nothing else is
/// accepted: every table is deserialized with `deny_unknown_fields` so a
/// misspelled key fails the run instead of being silently ignored.
///
/// Layout of the file:
///
/// ```toml
/// [DATA.Transformation.filter]
/// min_latitude = -90.0
/// max_depth = 100.0
///
/// [DATA.Transformation.uncertainty]
/// constant_tvu_wlo = 0.15
///
/// [DATA.Georeference.water_level]
/// water_level_tolerance = 15
///
/// [IWLS.API.TimeSeries]
/// priority = ["wlo", "wlf-spine", "wlf", "wlp"]
/// max_time_gap = "60 min"
/// "threshold_interpolation-filling" = "3 h"
///
/// [IWLS.API.ENVIRONMENT.public]
/// name = "public"
/// endpoint = "EndpointPublic"
/// calls = 10
/// period = 1
///
/// [IWLS.API.PROFILE]
/// active = "public"
/// ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::Duration;
use regex::Regex;
use serde::Deserialize;

use crate::iwls::endpoint::EndpointKind;
use crate::model::{TimeSeries, UnknownTimeSeriesError};

pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;
pub const MIN_DEPTH: f64 = 0.0;

/// Default tolerance, in minutes, when joining soundings to water levels.
pub const WATER_LEVEL_TOLERANCE_MINUTES: i64 = 15;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
    #[error(transparent)]
    UnknownTimeSeries(#[from] UnknownTimeSeriesError),
}

// ---------------------------------------------------------------------------
// Validated configuration
// ---------------------------------------------------------------------------

/// Cleaner bounds. Max values left unset mean unbounded.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FilterConfig {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
    pub min_depth: f64,
    pub max_depth: Option<f64>,
    pub min_speed: Option<f64>,
    pub max_speed: Option<f64>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            min_latitude: MIN_LATITUDE,
            max_latitude: MAX_LATITUDE,
            min_longitude: MIN_LONGITUDE,
            max_longitude: MAX_LONGITUDE,
            min_depth: MIN_DEPTH,
            max_depth: None,
            min_speed: None,
            max_speed: None,
        }
    }
}

impl FilterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("min_latitude", self.min_latitude),
            ("max_latitude", self.max_latitude),
        ] {
            if !(MIN_LATITUDE..=MAX_LATITUDE).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [{MIN_LATITUDE}, {MAX_LATITUDE}], got {value}"
                )));
            }
        }
        for (name, value) in [
            ("min_longitude", self.min_longitude),
            ("max_longitude", self.max_longitude),
        ] {
            if !(MIN_LONGITUDE..=MAX_LONGITUDE).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [{MIN_LONGITUDE}, {MAX_LONGITUDE}], got {value}"
                )));
            }
        }
        if self.min_depth < 0.0 || self.max_depth.is_some_and(|d| d < 0.0) {
            return Err(ConfigError::Invalid(
                "depth bounds must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// TVU/THU computation constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct UncertaintyConfig {
    /// Station component when the water level came from observations.
    pub constant_tvu_wlo: f64,
    /// Station component fallback when it came from predictions.
    pub constant_tvu_wlp: f64,
    /// Depth-proportional TVU component, in percent of raw depth.
    pub depth_coefficient_tvu: f64,
    /// Full opening angle of the sounder cone, degrees.
    pub cone_angle_sonar: f64,
    /// Constant THU component, metres.
    pub constant_thu: f64,
    /// Decimal places kept on TVU/THU values.
    pub decimal_precision: u32,
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        UncertaintyConfig {
            constant_tvu_wlo: 0.15,
            constant_tvu_wlp: 0.35,
            depth_coefficient_tvu: 1.5,
            cone_angle_sonar: 20.0,
            constant_thu: 5.0,
            decimal_precision: 3,
        }
    }
}

/// Georeferencing options.
#[derive(Debug, Clone)]
pub struct GeoreferenceConfig {
    /// Maximum |Δt| between a sounding and the water-level sample used to
    /// reduce it.
    pub water_level_tolerance: Duration,
}

impl Default for GeoreferenceConfig {
    fn default() -> Self {
        GeoreferenceConfig {
            water_level_tolerance: Duration::minutes(WATER_LEVEL_TOLERANCE_MINUTES),
        }
    }
}

/// Water-level series retrieval and reconciliation options.
#[derive(Debug, Clone)]
pub struct TimeSeriesConfig {
    /// Series codes in preference order.
    pub priority: Vec<TimeSeries>,
    /// Largest tolerated sampling gap; `None` disables gap repair entirely.
    pub max_time_gap: Option<Duration>,
    /// Gaps shorter than this are interpolated, longer ones filled from the
    /// next priority; `None` means fill only.
    pub threshold_interpolation_filling: Option<Duration>,
    /// QC flags dropped from observed (`wlo`) series.
    pub wlo_qc_flag_filter: Vec<String>,
    /// Context added on both ends of every request, for spline support.
    pub buffer_time: Option<Duration>,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        TimeSeriesConfig {
            priority: vec![
                TimeSeries::Wlo,
                TimeSeries::WlfSpine,
                TimeSeries::Wlf,
                TimeSeries::Wlp,
            ],
            max_time_gap: Some(Duration::minutes(60)),
            threshold_interpolation_filling: Some(Duration::hours(3)),
            wlo_qc_flag_filter: Vec::new(),
            buffer_time: None,
        }
    }
}

/// One API environment (endpoint flavour + rate limit).
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub name: String,
    pub endpoint: EndpointKind,
    /// Requests allowed per `period`.
    pub calls: u32,
    /// Rate-limit window, seconds.
    pub period: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentName {
    Dev,
    Prod,
    Public,
}

/// Fully validated pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub filter: FilterConfig,
    pub uncertainty: UncertaintyConfig,
    pub georeference: GeoreferenceConfig,
    pub time_series: TimeSeriesConfig,
    pub environments: BTreeMap<EnvironmentName, EnvironmentConfig>,
    pub active_profile: EnvironmentName,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            filter: FilterConfig::default(),
            uncertainty: UncertaintyConfig::default(),
            georeference: GeoreferenceConfig::default(),
            time_series: TimeSeriesConfig::default(),
            environments: BTreeMap::new(),
            active_profile: EnvironmentName::Public,
        }
    }
}

impl PipelineConfig {
    /// Loads and validates the TOML configuration file.
    pub fn load(path: &Path) -> Result<PipelineConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        PipelineConfig::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<PipelineConfig, ConfigError> {
        let raw: RawConfig = toml::from_str(contents)?;
        raw.validate()
    }

    /// Environment selected by `IWLS.API.PROFILE.active`.
    pub fn active_environment(&self) -> Result<&EnvironmentConfig, ConfigError> {
        self.environments.get(&self.active_profile).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "active profile {:?} has no matching [IWLS.API.ENVIRONMENT] entry",
                self.active_profile
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// File-shape structs (exact TOML layout)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(rename = "DATA", default)]
    data: RawData,
    #[serde(rename = "IWLS", default)]
    iwls: RawIwls,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawData {
    #[serde(rename = "Transformation", default)]
    transformation: RawTransformation,
    #[serde(rename = "Georeference", default)]
    georeference: RawGeoreference,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTransformation {
    #[serde(default)]
    filter: FilterConfig,
    #[serde(default)]
    uncertainty: UncertaintyConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGeoreference {
    #[serde(default)]
    water_level: RawWaterLevel,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawWaterLevel {
    water_level_tolerance: i64,
}

impl Default for RawWaterLevel {
    fn default() -> Self {
        RawWaterLevel {
            water_level_tolerance: WATER_LEVEL_TOLERANCE_MINUTES,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIwls {
    #[serde(rename = "API", default)]
    api: RawApi,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawApi {
    #[serde(rename = "TimeSeries", default)]
    time_series: RawTimeSeries,
    #[serde(rename = "ENVIRONMENT", default)]
    environment: BTreeMap<String, RawEnvironment>,
    #[serde(rename = "PROFILE", default)]
    profile: RawProfile,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawTimeSeries {
    priority: Vec<String>,
    max_time_gap: Option<String>,
    #[serde(rename = "threshold_interpolation-filling")]
    threshold_interpolation_filling: Option<String>,
    wlo_qc_flag_filter: Option<Vec<String>>,
    /// Hours of context added on both ends of requests.
    buffer_time: Option<i64>,
}

impl Default for RawTimeSeries {
    fn default() -> Self {
        let defaults = TimeSeriesConfig::default();
        RawTimeSeries {
            priority: defaults
                .priority
                .iter()
                .map(|ts| ts.code().to_string())
                .collect(),
            max_time_gap: Some("60 min".to_string()),
            threshold_interpolation_filling: Some("3 h".to_string()),
            wlo_qc_flag_filter: None,
            buffer_time: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvironment {
    name: String,
    endpoint: String,
    calls: u32,
    period: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawProfile {
    active: EnvironmentName,
}

impl Default for RawProfile {
    fn default() -> Self {
        RawProfile {
            active: EnvironmentName::Public,
        }
    }
}

impl RawConfig {
    fn validate(self) -> Result<PipelineConfig, ConfigError> {
        self.data.transformation.filter.validate()?;

        let priority = self
            .iwls
            .api
            .time_series
            .priority
            .iter()
            .map(|code| TimeSeries::from_code(code))
            .collect::<Result<Vec<_>, _>>()?;
        if priority.is_empty() {
            return Err(ConfigError::Invalid(
                "IWLS.API.TimeSeries.priority must list at least one series".to_string(),
            ));
        }

        let max_time_gap = parse_time_gap(self.iwls.api.time_series.max_time_gap.as_deref())?;
        let threshold = parse_time_gap(
            self.iwls
                .api
                .time_series
                .threshold_interpolation_filling
                .as_deref(),
        )?;

        let buffer_time = match self.iwls.api.time_series.buffer_time {
            None => None,
            Some(hours) if hours > 0 => Some(Duration::hours(hours)),
            Some(hours) => {
                return Err(ConfigError::Invalid(format!(
                    "buffer_time must be a positive number of hours, got {hours}"
                )));
            }
        };

        let tolerance_minutes = self.data.georeference.water_level.water_level_tolerance;
        if tolerance_minutes <= 0 {
            return Err(ConfigError::Invalid(format!(
                "water_level_tolerance must be positive, got {tolerance_minutes}"
            )));
        }

        let mut environments = BTreeMap::new();
        for (key, raw) in self.iwls.api.environment {
            let name = match key.as_str() {
                "dev" => EnvironmentName::Dev,
                "prod" => EnvironmentName::Prod,
                "public" => EnvironmentName::Public,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "unknown environment '{other}' (expected dev, prod or public)"
                    )));
                }
            };
            if raw.calls == 0 || raw.period == 0 {
                return Err(ConfigError::Invalid(format!(
                    "environment '{key}': calls and period must be positive"
                )));
            }
            let endpoint = EndpointKind::from_config_name(&raw.endpoint).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "environment '{key}': unknown endpoint '{}'",
                    raw.endpoint
                ))
            })?;
            environments.insert(
                name,
                EnvironmentConfig {
                    name: raw.name,
                    endpoint,
                    calls: raw.calls,
                    period: raw.period,
                },
            );
        }

        Ok(PipelineConfig {
            filter: self.data.transformation.filter,
            uncertainty: self.data.transformation.uncertainty,
            georeference: GeoreferenceConfig {
                water_level_tolerance: Duration::minutes(tolerance_minutes),
            },
            time_series: TimeSeriesConfig {
                priority,
                max_time_gap,
                threshold_interpolation_filling: threshold,
                wlo_qc_flag_filter: self
                    .iwls
                    .api
                    .time_series
                    .wlo_qc_flag_filter
                    .unwrap_or_default(),
                buffer_time,
            },
            environments,
            active_profile: self.iwls.api.profile.active,
        })
    }
}

/// Parses a gap expression of the form `"<n> min"` or `"<n> h"`.
/// An empty string or `None` disables the corresponding behaviour.
pub fn parse_time_gap(value: Option<&str>) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    if value.is_empty() {
        return Ok(None);
    }

    let pattern = Regex::new(r"^(\d+)\s*(min|h)$").expect("static pattern");
    let captures = pattern.captures(value).ok_or_else(|| {
        ConfigError::Invalid(format!(
            "time gap must match '<number> min' or '<number> h', got '{value}'"
        ))
    })?;

    let amount: i64 = captures[1]
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("time gap amount out of range: '{value}'")))?;

    Ok(Some(match &captures[2] {
        "min" => Duration::minutes(amount),
        _ => Duration::hours(amount),
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
