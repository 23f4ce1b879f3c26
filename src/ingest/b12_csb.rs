/// B12-CSB GeoJSON reader (`.geojson`).
///
/// IHO B-12 crowd-sourced bathymetry interchange: a FeatureCollection of
/// point features carrying `time` and `depth` properties. Coordinates
/// come from the geometry, not the properties.

use std::path::Path;

use geojson::{Feature, GeoJson, Value};
use log::debug;

use super::{coerce_time_utc, ParseError, RawRecord};

pub(crate) const TIME: &str = "time";
pub(crate) const DEPTH: &str = "depth";

fn property_f64(feature: &Feature, key: &str) -> Option<f64> {
    let value = feature.properties.as_ref()?.get(key)?;
    match value {
        serde_json::Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        serde_json::Value::String(s) => super::coerce_f64(s),
        _ => None,
    }
}

fn property_str<'a>(feature: &'a Feature, key: &str) -> Option<&'a str> {
    feature.properties.as_ref()?.get(key)?.as_str()
}

fn has_property(feature: &Feature, key: &str) -> bool {
    feature
        .properties
        .as_ref()
        .is_some_and(|props| props.contains_key(key))
}

fn point_coordinates(feature: &Feature) -> Option<(f64, f64)> {
    match &feature.geometry {
        Some(geometry) => match &geometry.value {
            Value::Point(coords) if coords.len() >= 2 => Some((coords[0], coords[1])),
            _ => None,
        },
        None => None,
    }
}

pub(crate) fn read(file: &Path) -> Result<Vec<RawRecord>, ParseError> {
    debug!("reading B12-CSB file {}", file.display());

    let contents = std::fs::read_to_string(file).map_err(|e| ParseError::io(file, e))?;
    let geojson: GeoJson = contents
        .parse()
        .map_err(|e: geojson::Error| ParseError::malformed(file, e.to_string()))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => {
            return Err(ParseError::malformed(
                file,
                "expected a GeoJSON FeatureCollection",
            ));
        }
    };

    if !collection.features.is_empty() {
        if !collection.features.iter().any(|f| has_property(f, TIME)) {
            return Err(ParseError::MissingTimeColumn {
                file: file.to_path_buf(),
                column: TIME.to_string(),
            });
        }
        if !collection.features.iter().any(|f| has_property(f, DEPTH)) {
            return Err(ParseError::MissingDepthColumn {
                file: file.to_path_buf(),
                column: DEPTH.to_string(),
            });
        }
    }

    Ok(collection
        .features
        .iter()
        .map(|feature| {
            let (longitude, latitude) = match point_coordinates(feature) {
                Some((lon, lat)) => (Some(lon), Some(lat)),
                None => (None, None),
            };
            RawRecord {
                time_utc: property_str(feature, TIME).and_then(coerce_time_utc),
                latitude,
                longitude,
                depth_m: property_f64(feature, DEPTH),
                speed_kn: None,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures::{fixture_b12_csb_geojson, fixture_b12_csb_missing_depth};
    use std::io::Write;

    fn fixture_file(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("csb.geojson");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_read_extracts_geometry_and_properties() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture_file(&dir, fixture_b12_csb_geojson());

        let records = read(&path).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].longitude, Some(-68.52));
        assert_eq!(records[0].latitude, Some(48.42));
        assert_eq!(records[0].depth_m, Some(12.5));
        assert!(records[0].time_utc.is_some());
    }

    #[test]
    fn test_missing_depth_property_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture_file(&dir, fixture_b12_csb_missing_depth());

        assert!(matches!(
            read(&path).unwrap_err(),
            ParseError::MissingDepthColumn { .. }
        ));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture_file(&dir, "{ not geojson ]");

        assert!(matches!(
            read(&path).unwrap_err(),
            ParseError::Malformed { .. }
        ));
    }

    #[test]
    fn test_empty_collection_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture_file(&dir, r#"{"type": "FeatureCollection", "features": []}"#);

        assert!(read(&path).unwrap().is_empty());
    }
}
