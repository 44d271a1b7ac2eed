//! GeoJSON map layer for geocoded rows.
//!
//! One Point feature per successful row. The `marker-color` property encodes
//! which provider produced the match (simplestyle-spec), so any GeoJSON
//! viewer shows primary and secondary hits in different colours.

use crate::batch::BatchReport;
use serde_json::{json, Value};

/// Marker colours by provider priority index; wraps around.
const PALETTE: &[&str] = &["#d63e2a", "#38aadd", "#72b026", "#d252b9", "#f69730"];

/// Marker colour for a provider, by its position in `providers`.
pub fn marker_color(providers: &[String], service: &str) -> &'static str {
    let index = providers
        .iter()
        .position(|p| p == service)
        .unwrap_or(providers.len());
    PALETTE[index % PALETTE.len()]
}

/// Mean latitude/longitude of the successful rows, if any.
pub fn center(report: &BatchReport) -> Option<(f64, f64)> {
    let coords: Vec<(f64, f64)> = report
        .successful_rows()
        .filter_map(|r| r.result.coordinates())
        .collect();
    if coords.is_empty() {
        return None;
    }
    let n = coords.len() as f64;
    let (lat, lon) = coords
        .iter()
        .fold((0.0_f64, 0.0_f64), |(a, b), &(lat, lon)| (a + lat, b + lon));
    Some((lat / n, lon / n))
}

/// Build a GeoJSON FeatureCollection with a top-level `center` ([lat, lon]).
pub fn feature_collection(report: &BatchReport, providers: &[String]) -> Value {
    let features: Vec<Value> = report
        .successful_rows()
        .filter_map(|row| {
            let (lat, lon) = row.result.coordinates()?;
            let cell = |i: usize| row.values.get(i).cloned().unwrap_or_default();
            Some(json!({
                "type": "Feature",
                // GeoJSON positions are [longitude, latitude]
                "geometry": { "type": "Point", "coordinates": [lon, lat] },
                "properties": {
                    "address": cell(report.columns.address),
                    "pin_code": cell(report.columns.pin_code),
                    "matched_address": row.result.matched_address,
                    "service": row.result.provider_name,
                    "marker-color": marker_color(providers, &row.result.provider_name),
                }
            }))
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "center": center(report).map(|(lat, lon)| vec![lat, lon]),
        "features": features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchSummary, GeocodedRow, ReportColumns};
    use crate::geocode::{FailureReason, GeocodeResult, Location};
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn row(address: &str, result: GeocodeResult) -> GeocodedRow {
        GeocodedRow {
            values: vec![address.to_string(), "560001".to_string()],
            result,
        }
    }

    fn hit(lat: f64, lon: f64, service: &str) -> GeocodeResult {
        GeocodeResult::success(
            Location {
                latitude: lat,
                longitude: lon,
                matched_address: "somewhere".into(),
            },
            service,
        )
    }

    fn report(rows: Vec<GeocodedRow>) -> BatchReport {
        BatchReport {
            headers: vec!["Address".into(), "Pin".into()],
            columns: ReportColumns {
                address: 0,
                pin_code: 1,
            },
            summary: BatchSummary::from_results(rows.iter().map(|r| &r.result)),
            rows,
            generated_at: Utc::now(),
        }
    }

    fn providers() -> Vec<String> {
        vec!["Nominatim".into(), "GoogleMaps".into()]
    }

    #[test]
    fn test_only_successes_are_plotted() {
        let r = report(vec![
            row("MG Road", hit(12.0, 77.0, "Nominatim")),
            row("ab", GeocodeResult::failed(FailureReason::TooShortOrInvalid)),
            row("Park Street", hit(22.0, 88.0, "GoogleMaps")),
        ]);
        let fc = feature_collection(&r, &providers());
        let features = fc["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["geometry"]["coordinates"][0], 77.0);
        assert_eq!(features[0]["properties"]["address"], "MG Road");
        assert_eq!(features[1]["properties"]["service"], "GoogleMaps");
    }

    #[test]
    fn test_colour_encodes_provider() {
        let p = providers();
        assert_ne!(marker_color(&p, "Nominatim"), marker_color(&p, "GoogleMaps"));
        assert_eq!(marker_color(&p, "Nominatim"), PALETTE[0]);
        assert_eq!(marker_color(&p, "Unknown"), PALETTE[2]);
    }

    #[test]
    fn test_center_is_mean() {
        let r = report(vec![
            row("MG Road", hit(10.0, 70.0, "Nominatim")),
            row("Park Street", hit(20.0, 80.0, "GoogleMaps")),
        ]);
        let (lat, lon) = center(&r).unwrap();
        assert_relative_eq!(lat, 15.0);
        assert_relative_eq!(lon, 75.0);
    }

    #[test]
    fn test_empty_layer_has_no_center() {
        let r = report(vec![row("ab", GeocodeResult::failed(FailureReason::NotFound))]);
        assert!(center(&r).is_none());
        let fc = feature_collection(&r, &providers());
        assert!(fc["center"].is_null());
        assert!(fc["features"].as_array().unwrap().is_empty());
    }
}
