//! # Relay Message Construction
//!
//! Builds the structured alert message published to the pub/sub relay:
//! topic, free-text title/message, author list, and a nested target array
//! keyed by object name with per-point timestamps (Julian date), band,
//! brightness, and brightness uncertainty.

use crate::error::{DispatchError, Result};
use crate::models::{ObjectCoords, PhotometryPoint};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayTarget {
    pub name: String,
    pub ra: f64,
    pub dec: f64,
    /// Julian date of the observation
    pub jd: f64,
    pub band: String,
    pub brightness: f64,
    pub brightness_error: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub topic: String,
    pub title: String,
    pub message: String,
    pub authors: String,
    pub targets: Vec<RelayTarget>,
}

/// Build the relay message from the publishable photometry subset
pub fn build_relay_message(
    topic: &str,
    coords: &ObjectCoords,
    points: &[PhotometryPoint],
    authors: &str,
    remarks: &str,
) -> Result<RelayMessage> {
    let targets: Vec<RelayTarget> = points
        .iter()
        .filter_map(|p| {
            p.mag.map(|brightness| RelayTarget {
                name: coords.obj_id.clone(),
                ra: coords.ra,
                dec: coords.dec,
                jd: p.jd(),
                band: p.filter.clone(),
                brightness,
                brightness_error: p.magerr,
            })
        })
        .collect();

    if targets.is_empty() {
        return Err(DispatchError::Validation(
            "no detections available to publish to the relay".to_string(),
        ));
    }

    Ok(RelayMessage {
        topic: topic.to_string(),
        title: format!("New detection of {}", coords.obj_id),
        message: remarks.to_string(),
        authors: authors.to_string(),
        targets,
    })
}
