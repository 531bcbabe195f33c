//! # Photometry and Author Types
//!
//! Plain data carried between the stores, the report builder, and the
//! facility adapters. A point with a magnitude is a detection; a point
//! with only a limiting magnitude is a non-detection.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PhotometryPoint {
    /// Modified Julian date of the observation
    pub mjd: f64,
    /// Band/filter name
    pub filter: String,
    /// Brightness in magnitudes; absent for non-detections
    pub mag: Option<f64>,
    /// Brightness uncertainty in magnitudes
    pub magerr: Option<f64>,
    /// Limiting magnitude for non-detections
    pub limiting_mag: Option<f64>,
    /// Alert stream the point arrived on, cited in archival comments
    pub stream_name: Option<String>,
    /// Upstream origin of the point (instrument pipeline, facility name)
    pub origin: Option<String>,
}

impl PhotometryPoint {
    pub fn is_detection(&self) -> bool {
        self.mag.is_some()
    }

    /// Identity key for deduplication: same timestamp, band, brightness,
    /// and brightness error mean the same measurement. Float bit patterns
    /// give exact equality without rounding surprises.
    pub fn dedup_key(&self) -> (u64, String, Option<u64>, Option<u64>) {
        (
            self.mjd.to_bits(),
            self.filter.clone(),
            self.mag.map(f64::to_bits),
            self.magerr.map(f64::to_bits),
        )
    }

    /// Julian date of the observation, for relay payloads
    pub fn jd(&self) -> f64 {
        self.mjd + 2_400_000.5
    }
}

/// Sky position and identity of the object being published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ObjectCoords {
    pub obj_id: String,
    pub ra: f64,
    pub dec: f64,
}

/// One reporter entry; affiliations are mandatory for publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Author {
    pub given_name: String,
    pub family_name: String,
    pub affiliation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(mjd: f64, mag: Option<f64>) -> PhotometryPoint {
        PhotometryPoint {
            mjd,
            filter: "g".to_string(),
            mag,
            magerr: mag.map(|_| 0.1),
            limiting_mag: if mag.is_none() { Some(20.5) } else { None },
            stream_name: None,
            origin: None,
        }
    }

    #[test]
    fn test_detection_classification() {
        assert!(point(60000.0, Some(18.2)).is_detection());
        assert!(!point(60000.0, None).is_detection());
    }

    #[test]
    fn test_dedup_key_distinguishes_measurements() {
        let a = point(60000.0, Some(18.2));
        let b = point(60000.0, Some(18.2));
        let c = point(60000.1, Some(18.2));
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn test_julian_date_conversion() {
        let p = point(60000.0, Some(18.2));
        assert!((p.jd() - 2_460_000.5).abs() < f64::EPSILON);
    }
}
