//! # Report Payload Construction
//!
//! Selects the publishable photometry for a report submission and builds
//! the clearinghouse payload: first detection always, last detection when
//! the service requires first-and-last and more than one detection exists,
//! and the most recent non-detection strictly before the first detection.
//! When no prior non-detection exists the report falls back to archival
//! mode, either because the request asked for it explicitly or because the
//! service permits automatic archival submissions.

use crate::error::{DispatchError, Result};
use crate::models::{ObjectCoords, PhotometryPoint};
use serde_json::{json, Value};

/// Photometry-inclusion options after merging request-level and
/// service-level settings (request level wins)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotometryOptions {
    /// Publish both the first and the last detection
    pub first_and_last_detections: bool,
    /// Permit automatic archival fallback when no prior non-detection exists
    pub auto_archival: bool,
    /// Restrict publishable photometry to these alert streams
    pub streams: Option<Vec<String>>,
}

/// Partial options as stored in the JSON columns
#[derive(Debug, Clone, Default, serde::Deserialize)]
struct PartialOptions {
    first_and_last_detections: Option<bool>,
    auto_archival: Option<bool>,
    streams: Option<Vec<String>>,
}

fn decode_partial(raw: Option<&Value>) -> PartialOptions {
    raw.and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// Merge request-level overrides onto service-level defaults
pub fn merge_photometry_options(
    request_level: Option<&Value>,
    service_level: Option<&Value>,
) -> PhotometryOptions {
    let request = decode_partial(request_level);
    let service = decode_partial(service_level);
    PhotometryOptions {
        first_and_last_detections: request
            .first_and_last_detections
            .or(service.first_and_last_detections)
            .unwrap_or(false),
        auto_archival: request
            .auto_archival
            .or(service.auto_archival)
            .unwrap_or(false),
        streams: request.streams.or(service.streams),
    }
}

/// Compute the publishable subset: stream-filtered, deduplicated, and
/// sorted by observation time
pub fn publishable_photometry(
    points: &[PhotometryPoint],
    options: &PhotometryOptions,
) -> Vec<PhotometryPoint> {
    let mut seen = Vec::new();
    let mut subset: Vec<PhotometryPoint> = points
        .iter()
        .filter(|p| match &options.streams {
            Some(streams) => p
                .stream_name
                .as_ref()
                .is_some_and(|s| streams.contains(s)),
            None => true,
        })
        .filter(|p| {
            let key = p.dedup_key();
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        })
        .cloned()
        .collect();
    subset.sort_by(|a, b| a.mjd.total_cmp(&b.mjd));
    subset
}

/// Selected content of one report
#[derive(Debug, Clone, PartialEq)]
pub struct ReportContent {
    pub detections: Vec<PhotometryPoint>,
    pub non_detection: Option<PhotometryPoint>,
    pub archival: bool,
    pub archival_comment: Option<String>,
}

/// Select detections and the reference non-detection for a report.
///
/// `points` must already be the publishable subset. `archival_requested`
/// with its justification comes from the request row.
pub fn build_report_content(
    points: &[PhotometryPoint],
    options: &PhotometryOptions,
    archival_requested: bool,
    archival_comment: Option<&str>,
) -> Result<ReportContent> {
    let detections: Vec<&PhotometryPoint> = points.iter().filter(|p| p.is_detection()).collect();
    if detections.is_empty() {
        return Err(DispatchError::Validation(
            "no detections available to publish".to_string(),
        ));
    }
    if options.first_and_last_detections && detections.len() < 2 {
        return Err(DispatchError::Validation(
            "first and last detections required but only one detection is available".to_string(),
        ));
    }

    let first = detections[0].clone();
    let mut selected = vec![first.clone()];
    if options.first_and_last_detections && detections.len() > 1 {
        selected.push((*detections[detections.len() - 1]).clone());
    }

    if archival_requested {
        let comment = archival_comment
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                DispatchError::Validation(
                    "archival submissions require a non-empty justification".to_string(),
                )
            })?;
        return Ok(ReportContent {
            detections: selected,
            non_detection: None,
            archival: true,
            archival_comment: Some(comment.to_string()),
        });
    }

    let non_detection = points
        .iter()
        .filter(|p| !p.is_detection() && p.mjd < first.mjd)
        .max_by(|a, b| a.mjd.total_cmp(&b.mjd))
        .cloned();

    match non_detection {
        Some(nd) => Ok(ReportContent {
            detections: selected,
            non_detection: Some(nd),
            archival: false,
            archival_comment: None,
        }),
        None if options.auto_archival => {
            let mut streams: Vec<String> = selected
                .iter()
                .filter_map(|p| p.stream_name.clone())
                .collect();
            streams.dedup();
            let cited = if streams.is_empty() {
                "unspecified alert stream".to_string()
            } else {
                streams.join(", ")
            };
            Ok(ReportContent {
                detections: selected,
                non_detection: None,
                archival: true,
                archival_comment: Some(format!(
                    "No non-detection prior to first detection; archival report based on {cited}"
                )),
            })
        }
        None => Err(DispatchError::Validation(
            "no non-detection available prior to the first detection".to_string(),
        )),
    }
}

/// Remarks string cached alongside the reporter string
pub fn build_remarks(content: &ReportContent) -> String {
    content.archival_comment.clone().unwrap_or_default()
}

/// Serialize the report into the clearinghouse wire payload
pub fn to_report_payload(
    content: &ReportContent,
    coords: &ObjectCoords,
    reporter: &str,
    remarks: &str,
) -> Value {
    let photometry: Vec<Value> = content
        .detections
        .iter()
        .map(|p| {
            json!({
                "obsdate_mjd": p.mjd,
                "filter": p.filter,
                "mag": p.mag,
                "magerr": p.magerr,
                "limiting_mag": p.limiting_mag,
            })
        })
        .collect();

    let non_detection = if content.archival {
        json!({
            "archiveid": "0",
            "archival_remarks": content.archival_comment,
        })
    } else {
        content
            .non_detection
            .as_ref()
            .map(|nd| {
                json!({
                    "obsdate_mjd": nd.mjd,
                    "filter": nd.filter,
                    "limiting_mag": nd.limiting_mag,
                })
            })
            .unwrap_or(Value::Null)
    };

    json!({
        "at_report": {
            "internal_name": coords.obj_id,
            "ra": { "value": coords.ra },
            "dec": { "value": coords.dec },
            "reporter": reporter,
            "remarks": remarks,
            "discovery_datetime_mjd": content.detections.first().map(|p| p.mjd),
            "photometry": { "photometry_group": photometry },
            "non_detection": non_detection,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(mjd: f64, stream: Option<&str>) -> PhotometryPoint {
        PhotometryPoint {
            mjd,
            filter: "g".to_string(),
            mag: Some(18.0),
            magerr: Some(0.1),
            limiting_mag: None,
            stream_name: stream.map(str::to_string),
            origin: None,
        }
    }

    fn non_detection(mjd: f64) -> PhotometryPoint {
        PhotometryPoint {
            mjd,
            filter: "g".to_string(),
            mag: None,
            magerr: None,
            limiting_mag: Some(20.5),
            stream_name: None,
            origin: None,
        }
    }

    #[test]
    fn test_merge_request_wins() {
        let service = serde_json::json!({"first_and_last_detections": true, "auto_archival": true});
        let request = serde_json::json!({"first_and_last_detections": false});
        let merged = merge_photometry_options(Some(&request), Some(&service));
        assert!(!merged.first_and_last_detections);
        assert!(merged.auto_archival);
    }

    #[test]
    fn test_publishable_subset_filters_and_dedups() {
        let points = vec![
            detection(60001.0, Some("stream-a")),
            detection(60001.0, Some("stream-a")), // duplicate measurement
            detection(60002.0, Some("stream-b")),
        ];
        let options = PhotometryOptions {
            streams: Some(vec!["stream-a".to_string()]),
            ..Default::default()
        };
        let subset = publishable_photometry(&points, &options);
        assert_eq!(subset.len(), 1);
        assert_eq!(subset[0].mjd, 60001.0);
    }

    #[test]
    fn test_first_and_last_selection() {
        let points = vec![
            non_detection(59999.0),
            detection(60001.0, None),
            detection(60003.0, None),
            detection(60005.0, None),
        ];
        let options = PhotometryOptions {
            first_and_last_detections: true,
            ..Default::default()
        };
        let content = build_report_content(&points, &options, false, None).unwrap();
        assert_eq!(content.detections.len(), 2);
        assert_eq!(content.detections[0].mjd, 60001.0);
        assert_eq!(content.detections[1].mjd, 60005.0);
        assert_eq!(content.non_detection.as_ref().unwrap().mjd, 59999.0);
        assert!(!content.archival);
    }

    #[test]
    fn test_non_detection_must_precede_first_detection() {
        // the only non-detection sits between the detections, not before
        let points = vec![
            detection(60001.0, None),
            non_detection(60002.0),
            detection(60003.0, None),
        ];
        let err = build_report_content(&points, &PhotometryOptions::default(), false, None)
            .unwrap_err();
        assert!(err.to_string().contains("no non-detection available"));
    }

    #[test]
    fn test_archival_fallback_cites_streams() {
        let points = vec![detection(60001.0, Some("stream-a"))];
        let options = PhotometryOptions {
            auto_archival: true,
            ..Default::default()
        };
        let content = build_report_content(&points, &options, false, None).unwrap();
        assert!(content.archival);
        let comment = content.archival_comment.unwrap();
        assert!(comment.contains("stream-a"));
        assert!(comment.contains("archival report"));
    }

    #[test]
    fn test_explicit_archival_requires_justification() {
        let points = vec![detection(60001.0, None)];
        let options = PhotometryOptions::default();
        assert!(build_report_content(&points, &options, true, None).is_err());

        let content =
            build_report_content(&points, &options, true, Some("historic detection")).unwrap();
        assert!(content.archival);
        assert_eq!(content.archival_comment.as_deref(), Some("historic detection"));
    }

    #[test]
    fn test_validation_thresholds() {
        let err = build_report_content(
            &[non_detection(59999.0)],
            &PhotometryOptions::default(),
            false,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no detections"));

        let one_detection = vec![non_detection(59999.0), detection(60001.0, None)];
        let options = PhotometryOptions {
            first_and_last_detections: true,
            ..Default::default()
        };
        let err = build_report_content(&one_detection, &options, false, None).unwrap_err();
        assert!(err.to_string().contains("only one detection"));
    }

    #[test]
    fn test_payload_archival_block() {
        let points = vec![detection(60001.0, Some("stream-a"))];
        let options = PhotometryOptions {
            auto_archival: true,
            ..Default::default()
        };
        let content = build_report_content(&points, &options, false, None).unwrap();
        let coords = ObjectCoords {
            obj_id: "AT2026abc".to_string(),
            ra: 120.5,
            dec: -33.1,
        };
        let payload = to_report_payload(&content, &coords, "Reporter (Affil)", "");
        let report = &payload["at_report"];
        assert_eq!(report["internal_name"], "AT2026abc");
        assert_eq!(report["non_detection"]["archiveid"], "0");
        assert_eq!(report["photometry"]["photometry_group"].as_array().unwrap().len(), 1);
    }
}
