//! Presentation payloads
//!
//! Every request ends in an [`Outcome`]: either a fully populated report or a
//! failure with its error kind. A report is only built once all of its inputs
//! exist, so partially populated pages cannot occur.

use crate::core::selector::SessionDefaults;
use crate::io::export::{ExportJob, ExportReceipts};
use crate::types::{BoundingBox, ChangeError, ChangeResult, Platform, TileHandle};
use serde::{Deserialize, Serialize};

/// Where the result map is centered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapView {
    pub region: BoundingBox,
    pub center_lon: f64,
    pub center_lat: f64,
    pub zoom: u8,
}

impl MapView {
    pub fn new(region: &BoundingBox, zoom: u8) -> Self {
        let (center_lon, center_lat) = region.center();
        Self { region: *region, center_lon, center_lat, zoom }
    }
}

/// Common access to the map view of every report
pub trait Report {
    fn view(&self) -> &MapView;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentinel1Report {
    pub title: String,
    pub download_text: String,
    /// First full scene
    pub map: TileHandle,
    /// Clipped view (first image, or maximum intensity)
    pub clip_map: TileHandle,
    pub view: MapView,
    pub download_url: String,
    pub projection: Option<String>,
    pub system_id: String,
    pub count: usize,
    pub timestamp: String,
    pub timestamps: Vec<String>,
    pub system_ids: Vec<String>,
    pub polarization: String,
    pub relative_orbits: Vec<Option<u32>>,
    pub export: Option<ExportJob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentinel2Report {
    pub download_text: String,
    pub map: TileHandle,
    pub clip_map: TileHandle,
    pub view: MapView,
    pub download_url: String,
    pub clip_download_url: String,
    pub system_id: String,
    pub cloud_cover: Option<f64>,
    pub projection: Option<String>,
    pub count: usize,
    pub sensing_orbits: Vec<Option<u32>>,
    pub timestamp: String,
    pub timestamps: Vec<String>,
    pub export: Option<ExportJob>,
}

/// One side of the image pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSummary {
    pub system_id: String,
    pub cloud_cover: Option<f64>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MadReport {
    pub title: String,
    pub map: TileHandle,
    pub view: MapView,
    pub platform: Platform,
    pub iterations: u32,
    pub first: AcquisitionSummary,
    pub second: AcquisitionSummary,
    /// Canonical correlations, one row per pass
    pub correlations: Vec<Vec<f64>>,
    pub exports: ExportReceipts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmnibusReport {
    pub title: String,
    pub map: TileHandle,
    pub view: MapView,
    pub projection: Option<String>,
    pub system_id: String,
    pub count: usize,
    pub download_url: String,
    pub timestamp: String,
    pub timestamps: Vec<String>,
    pub layer_names: Vec<String>,
    pub polarization: String,
    pub relative_orbits: Vec<Option<u32>>,
    pub significance: f64,
    pub use_median: bool,
    pub exports: ExportReceipts,
}

macro_rules! impl_report {
    ($($ty:ty),*) => {
        $(impl Report for $ty {
            fn view(&self) -> &MapView {
                &self.view
            }
        })*
    };
}

impl_report!(Sentinel1Report, Sentinel2Report, MadReport, OmnibusReport);

/// Failure categories shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptySeries,
    InsufficientSeries,
    RemoteService,
    Validation,
    Internal,
}

impl From<&ChangeError> for ErrorKind {
    fn from(e: &ChangeError) -> Self {
        match e {
            ChangeError::EmptySeries(_) => ErrorKind::EmptySeries,
            ChangeError::InsufficientSeries { .. } => ErrorKind::InsufficientSeries,
            ChangeError::RemoteService(_) => ErrorKind::RemoteService,
            ChangeError::Validation(_) => ErrorKind::Validation,
            ChangeError::Io(_) | ChangeError::Json(_) | ChangeError::Config(_) => ErrorKind::Internal,
        }
    }
}

/// Result of one request, as handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome<T> {
    Success {
        payload: T,
        /// Form defaults for the next request, remembering this region
        defaults: SessionDefaults,
    },
    Failure {
        kind: ErrorKind,
        message: String,
    },
}

impl<T: Report> Outcome<T> {
    /// Package a workflow result; `previous` are the caller's form defaults
    pub fn assemble(workflow: &str, result: ChangeResult<T>, previous: &SessionDefaults) -> Self {
        match result {
            Ok(payload) => {
                let defaults = previous.with_region(&payload.view().region);
                Outcome::Success { payload, defaults }
            }
            Err(e) => {
                log::warn!("{} request failed: {}", workflow, e);
                Outcome::Failure { kind: ErrorKind::from(&e), message: format!("Error in {}: {}", workflow, e) }
            }
        }
    }
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            Outcome::Success { payload, .. } => Some(payload),
            Outcome::Failure { .. } => None,
        }
    }
}

impl<T: Serialize> Outcome<T> {
    pub fn to_json(&self) -> ChangeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiles() -> TileHandle {
        TileHandle { url_template: "https://tiles/{z}/{x}/{y}".into(), token: "t".into() }
    }

    fn report(region: BoundingBox) -> OmnibusReport {
        OmnibusReport {
            title: "Sequential omnibus last change map".into(),
            map: tiles(),
            view: MapView::new(&region, 10),
            projection: Some("EPSG:32632".into()),
            system_id: "S1A".into(),
            count: 3,
            download_url: "https://download".into(),
            timestamp: "T20170601_1".into(),
            timestamps: vec!["T20170601_1".into(), "T20170613_2".into(), "T20170625_3".into()],
            layer_names: vec![],
            polarization: "VV,VH".into(),
            relative_orbits: vec![Some(15); 3],
            significance: 0.01,
            use_median: false,
            exports: ExportReceipts::default(),
        }
    }

    #[test]
    fn test_success_updates_defaults() {
        let region = BoundingBox::new(6.0, 51.0, 7.0, 52.0).unwrap();
        let outcome = Outcome::assemble("omnibus", Ok(report(region)), &SessionDefaults::default());
        match &outcome {
            Outcome::Success { defaults, payload } => {
                assert_eq!(defaults.region, region);
                assert_eq!(defaults.center_lon, 6.5);
                assert_eq!(payload.view.center_lat, 51.5);
            }
            other => panic!("expected success, got {:?}", other),
        }

        let json: serde_json::Value = serde_json::from_str(&outcome.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json["payload"]["exports"]["asset"].is_null());
    }

    #[test]
    fn test_failure_carries_kind() {
        let result: ChangeResult<OmnibusReport> =
            Err(ChangeError::InsufficientSeries { found: 1, required: 2 });
        let outcome = Outcome::assemble("omnibus", result, &SessionDefaults::default());
        assert!(!outcome.is_success());
        assert!(outcome.payload().is_none());
        match outcome {
            Outcome::Failure { kind, message } => {
                assert_eq!(kind, ErrorKind::InsufficientSeries);
                assert_eq!(message, "Error in omnibus: Less than 2 images found (1)");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(ErrorKind::from(&ChangeError::EmptySeries("x".into())), ErrorKind::EmptySeries);
        assert_eq!(ErrorKind::from(&ChangeError::Validation("x".into())), ErrorKind::Validation);
        assert_eq!(ErrorKind::from(&ChangeError::RemoteService("x".into())), ErrorKind::RemoteService);
        assert_eq!(ErrorKind::from(&ChangeError::Config("x".into())), ErrorKind::Internal);
    }
}
