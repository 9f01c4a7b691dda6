//! Batch export submission
//!
//! Validates every requested destination before submitting anything, then
//! starts the jobs without waiting for them to finish.

use crate::config::ServiceConfig;
use crate::io::remote::ComputeService;
use crate::types::{serialize_graph, ChangeError, ChangeResult, Expr, Raster};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Long-term storage destination of a batch export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportDestination {
    /// Managed asset store
    Asset { asset_id: String },
    /// Personal drive folder
    Drive { folder: String, file_prefix: String },
}

impl ExportDestination {
    pub fn kind(&self) -> DestinationKind {
        match self {
            ExportDestination::Asset { .. } => DestinationKind::Asset,
            ExportDestination::Drive { .. } => DestinationKind::Drive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestinationKind {
    Asset,
    Drive,
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationKind::Asset => write!(f, "Assets"),
            DestinationKind::Drive => write!(f, "Drive"),
        }
    }
}

/// What gets exported
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportPayload {
    Image {
        #[serde(serialize_with = "serialize_graph")]
        expression: Expr,
        bands: Vec<String>,
        scale: f64,
    },
    /// List-valued expression; each element becomes one CSV row (`data` column)
    Table {
        #[serde(serialize_with = "serialize_graph")]
        rows: Expr,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRequest {
    pub description: String,
    pub destination: ExportDestination,
    pub payload: ExportPayload,
    pub max_pixels: f64,
}

/// Lifecycle of a job as far as this crate follows it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Accepted by the service; completion is never awaited
    Submitted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJob {
    pub destination: DestinationKind,
    pub id: String,
    pub status: JobStatus,
}

impl ExportJob {
    /// Identifier as shown to users; `"none"` when nothing was exported
    pub fn display_id(job: Option<&ExportJob>) -> &str {
        job.map(|j| j.id.as_str()).unwrap_or("none")
    }
}

/// A requested export: asset id or file prefix, and scale in meters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportTarget {
    pub name: String,
    pub scale: f64,
}

/// Jobs started by one request; `None` where no export was requested
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportReceipts {
    pub asset: Option<ExportJob>,
    pub drive: Option<ExportJob>,
    /// Correlation table shipped alongside an asset export
    pub table: Option<ExportJob>,
}

impl ExportReceipts {
    pub fn is_empty(&self) -> bool {
        self.asset.is_none() && self.drive.is_none() && self.table.is_none()
    }
}

/// Asset ids look like `users/<name>/<asset>` or `projects/<p>/assets/<path>`
pub fn validate_asset_id(asset_id: &str) -> ChangeResult<()> {
    let pattern = Regex::new(
        r"^(users/[A-Za-z0-9_\-]+|projects/[A-Za-z0-9_\-]+/assets)(/[A-Za-z0-9_\-.]+)+$",
    )
    .map_err(|e| ChangeError::Validation(format!("Regex error: {}", e)))?;

    if pattern.is_match(asset_id) {
        Ok(())
    } else {
        Err(ChangeError::Validation(format!("Invalid asset id: '{}'", asset_id)))
    }
}

/// Drive file names cannot contain path separators
pub fn drive_file_prefix(name: &str) -> String {
    name.replace('/', "-")
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Asset,
    Drive,
    Table,
}

/// Submits batch exports and hands back their job ids without waiting
pub struct ExportDispatcher<'a, S: ComputeService + ?Sized> {
    service: &'a S,
    drive_folder: String,
    max_pixels: f64,
}

impl<'a, S: ComputeService + ?Sized> ExportDispatcher<'a, S> {
    pub fn new(service: &'a S, config: &ServiceConfig) -> Self {
        Self {
            service,
            drive_folder: config.drive_folder.clone(),
            max_pixels: config.max_pixels,
        }
    }

    fn image_payload(raster: &Raster, scale: f64) -> ChangeResult<ExportPayload> {
        if !(scale > 0.0) {
            return Err(ChangeError::Validation(format!("Export scale must be positive, got {}", scale)));
        }
        Ok(ExportPayload::Image {
            expression: raster.expr().clone(),
            bands: raster.bands().to_vec(),
            scale,
        })
    }

    pub fn asset_request(&self, raster: &Raster, target: &ExportTarget) -> ChangeResult<ExportRequest> {
        validate_asset_id(&target.name)?;
        Ok(ExportRequest {
            description: "assetExportTask".to_string(),
            destination: ExportDestination::Asset { asset_id: target.name.clone() },
            payload: Self::image_payload(raster, target.scale)?,
            max_pixels: self.max_pixels,
        })
    }

    pub fn drive_request(&self, raster: &Raster, target: &ExportTarget) -> ChangeResult<ExportRequest> {
        Ok(ExportRequest {
            description: "driveExportTask".to_string(),
            destination: ExportDestination::Drive {
                folder: self.drive_folder.clone(),
                file_prefix: drive_file_prefix(&target.name),
            },
            payload: Self::image_payload(raster, target.scale)?,
            max_pixels: self.max_pixels,
        })
    }

    /// CSV export of a list-valued expression to drive
    pub fn table_request(&self, rows: &Expr, name: &str) -> ExportRequest {
        ExportRequest {
            description: "driveExportTask".to_string(),
            destination: ExportDestination::Drive {
                folder: self.drive_folder.clone(),
                file_prefix: drive_file_prefix(name),
            },
            payload: ExportPayload::Table { rows: rows.clone() },
            max_pixels: self.max_pixels,
        }
    }

    /// Submit one export and return as soon as the service accepted it
    pub fn submit(&self, request: &ExportRequest) -> ChangeResult<ExportJob> {
        let destination = request.destination.kind();
        let id = self.service.submit_export(request)?;
        if id.trim().is_empty() {
            return Err(ChangeError::RemoteService(format!(
                "Export to {} returned an empty task id",
                destination
            )));
        }
        log::info!("Exporting to {}, task id: {}", destination, id);
        Ok(ExportJob { destination, id, status: JobStatus::Submitted })
    }

    /// Export `raster` to each requested destination.
    ///
    /// With `table`, an asset export also ships the table to drive under a name
    /// derived from the asset id. Requests are validated before anything is
    /// submitted; every submission is attempted even if an earlier one failed,
    /// and the first failure is returned afterwards.
    pub fn dispatch(
        &self,
        raster: &Raster,
        asset: Option<&ExportTarget>,
        drive: Option<&ExportTarget>,
        table: Option<&Expr>,
    ) -> ChangeResult<ExportReceipts> {
        let mut planned: Vec<(Slot, ExportRequest)> = Vec::new();
        if let Some(target) = asset {
            if let Some(rows) = table {
                planned.push((Slot::Table, self.table_request(rows, &target.name)));
            }
            planned.push((Slot::Asset, self.asset_request(raster, target)?));
        }
        if let Some(target) = drive {
            planned.push((Slot::Drive, self.drive_request(raster, target)?));
        }

        let mut receipts = ExportReceipts::default();
        let mut first_error: Option<ChangeError> = None;
        for (slot, request) in planned {
            match self.submit(&request) {
                Ok(job) => match slot {
                    Slot::Asset => receipts.asset = Some(job),
                    Slot::Drive => receipts.drive = Some(job),
                    Slot::Table => receipts.table = Some(job),
                },
                Err(e) => {
                    log::warn!("{:?} export failed: {}", slot, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(receipts),
        }
    }
}
