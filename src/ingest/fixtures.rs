/// Test fixtures: representative logger-file payloads for the parser
/// tests.
///
/// These fixtures are structurally complete but truncated to the minimum
/// needed to exercise each parser. Header rows and column shapes mirror
/// the real exports:
///
///   OFM / DCDB — comma-separated `LON,LAT,DEPTH,TIME` (OFM ships as
///     `.xyz`, DCDB as `.csv`).
///   Lowrance — sonar-log CSV export with bracketed unit suffixes
///     (`WaterDepth[Feet]`, `Speed[m/s]`) and a `SurveyType` column where
///     only `Primary` rows are soundings.
///   BlackBox — headerless NMEA log: time, date, lat, lon, speed (km/h),
///     depth (m); time is `HHMMSSff`, date is `ddmmyy`.
///   Actisense — n2k decoded CSV with split position date/time columns.
///   B12-CSB — GeoJSON FeatureCollection of point features with `time`
///     and `depth` properties.

/// Three OFM rows, deliberately out of time order (18:31, 18:30, 18:32).
#[cfg(test)]
pub(crate) fn fixture_ofm_csv() -> &'static str {
    "LON,LAT,DEPTH,TIME\n\
     -135.0002,60.0001,10.3,2024-10-01T18:31:00Z\n\
     -135.0001,60.0000,10.0,2024-10-01T18:30:00Z\n\
     -135.0003,60.0002,10.6,2024-10-01T18:32:00Z\n"
}

/// DCDB export with a trailing provider column the parser must tolerate.
#[cfg(test)]
pub(crate) fn fixture_dcdb_csv() -> &'static str {
    "LON,LAT,DEPTH,TIME,PLATFORM_NAME\n\
     -63.55,44.64,22.5,2024-06-05T21:55:19Z,Aventure\n\
     -63.56,44.65,23.1,2024-06-05T21:55:29Z,Aventure\n\
     -63.57,44.66,bad,2024-06-05T21:55:39Z,Aventure\n"
}

/// Lowrance sonar log: two Primary rows and one secondary-channel row
/// that must be filtered out. Depths in feet, speeds in m/s.
#[cfg(test)]
pub(crate) fn fixture_lowrance_csv() -> &'static str {
    "DateTime[UTC],Longitude[°WGS84],Latitude[°WGS84],WaterDepth[Feet],Speed[m/s],SurveyType\n\
     2024-07-15 18:30:00.040,-133.03,69.44,32.808,2.5,Primary\n\
     2024-07-15 18:30:01.960,-133.04,69.45,33.0,2.6,Primary\n\
     2024-07-15 18:30:01.000,-133.04,69.45,33.0,2.6,Sidescan\n"
}

/// Headerless BlackBox NMEA log. Columns: time (HHMMSSff), date (ddmmyy),
/// latitude, longitude, speed (km/h), depth (m).
#[cfg(test)]
pub(crate) fn fixture_black_box_txt() -> &'static str {
    "18300045,011024,48.42,-68.52,10.0,12.5\n\
     18301045,011024,48.43,-68.53,10.2,12.8\n\
     18302045,011024,48.44,-68.54,abc,13.1\n"
}

/// Actisense n2k decoded export, trimmed to the signature columns.
#[cfg(test)]
pub(crate) fn fixture_actisense_csv() -> &'static str {
    "Line,Time,Name,Water Depth Transducer,Offset,Position date,Position time,Latitude.1,Longitude.1,Course Over Ground,Speed Over Ground,PGN\n\
     1,18:30:00.000,Depth,12.5,0.0,01/10/2024,18:30:00,48.42,-68.52,180.0,2.5,128267\n\
     2,18:30:01.000,Depth,12.8,0.0,01/10/2024,18:30:01,48.43,-68.53,181.0,2.6,128267\n"
}

/// B12-CSB GeoJSON with two soundings.
#[cfg(test)]
pub(crate) fn fixture_b12_csb_geojson() -> &'static str {
    r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "geometry": { "type": "Point", "coordinates": [-68.52, 48.42] },
      "properties": { "time": "2024-10-01T18:30:00Z", "depth": 12.5 }
    },
    {
      "type": "Feature",
      "geometry": { "type": "Point", "coordinates": [-68.53, 48.43] },
      "properties": { "time": "2024-10-01T18:30:10Z", "depth": 12.8 }
    }
  ]
}"#
}

/// B12-CSB GeoJSON whose features lack the depth property.
#[cfg(test)]
pub(crate) fn fixture_b12_csb_missing_depth() -> &'static str {
    r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "geometry": { "type": "Point", "coordinates": [-68.52, 48.42] },
      "properties": { "time": "2024-10-01T18:30:00Z" }
    }
  ]
}"#
}
