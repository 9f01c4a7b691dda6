//! In-memory compute service shared by the integration tests

#![allow(dead_code)]

use changemap::io::export::ExportRequest;
use changemap::io::remote::{CollectionQuery, ComputeService};
use changemap::types::{
    ChangeError, ChangeResult, EpochMillis, Expr, ImageHandle, Raster, TileHandle, TileStyle,
};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Milliseconds at midnight UTC of the given day
pub fn millis(year: i32, month: u32, day: u32) -> EpochMillis {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .map(|t| t.timestamp_millis())
        .unwrap_or_default()
}

/// Dual-polarized ascending IW scene
pub fn s1_image(id: &str, time_start: EpochMillis, relative_orbit: u32) -> ImageHandle {
    let properties = [
        ("transmitterReceiverPolarisation", json!(["VV", "VH"])),
        ("resolution_meters", json!(10)),
        ("instrumentMode", json!("IW")),
        ("orbitProperties_pass", json!("ASCENDING")),
        ("relativeOrbitNumber_start", json!(relative_orbit)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    ImageHandle {
        id: id.to_string(),
        time_start,
        bands: vec!["VV".to_string(), "VH".to_string(), "angle".to_string()],
        crs: Some("EPSG:32632".to_string()),
        properties,
    }
}

pub fn landsat8_image(id: &str, time_start: EpochMillis, cloud_cover: f64) -> ImageHandle {
    ImageHandle {
        id: id.to_string(),
        time_start,
        bands: ["B1", "B2", "B3", "B4", "B5", "B6", "B7", "B8", "B9", "B10", "B11", "BQA"]
            .iter()
            .map(|b| b.to_string())
            .collect(),
        crs: Some("EPSG:32632".to_string()),
        properties: [("CLOUD_COVER".to_string(), json!(cloud_cover))].into_iter().collect(),
    }
}

pub fn sentinel2_image(id: &str, time_start: EpochMillis, cloud_cover: f64, orbit: u32) -> ImageHandle {
    ImageHandle {
        id: id.to_string(),
        time_start,
        bands: ["B1", "B2", "B3", "B4", "B5", "B6", "B7", "B8", "B8A", "B9", "B10", "B11", "B12"]
            .iter()
            .map(|b| b.to_string())
            .collect(),
        crs: Some("EPSG:32632".to_string()),
        properties: [
            ("CLOUD_COVERAGE_ASSESSMENT".to_string(), json!(cloud_cover)),
            ("CLOUDY_PIXEL_PERCENTAGE".to_string(), json!(cloud_cover)),
            ("SENSING_ORBIT_NUMBER".to_string(), json!(orbit)),
        ]
        .into_iter()
        .collect(),
    }
}

/// Answers queries from a fixed catalogue and records everything it is asked
#[derive(Default)]
pub struct FakeComputeService {
    catalogue: HashMap<String, Vec<ImageHandle>>,
    /// Width of each correlation row returned for a list expression
    pub correlation_width: usize,
    /// Destination kinds whose exports are refused
    pub refuse_exports: Vec<String>,
    pub queries: Mutex<Vec<CollectionQuery>>,
    pub tiles: Mutex<Vec<(Raster, TileStyle)>>,
    pub downloads: Mutex<Vec<(Raster, f64, Option<String>)>>,
    pub exports: Mutex<Vec<ExportRequest>>,
    next_task: AtomicUsize,
}

impl FakeComputeService {
    pub fn new() -> Self {
        Self { correlation_width: 6, ..Default::default() }
    }

    pub fn with_images(mut self, collection: &str, images: Vec<ImageHandle>) -> Self {
        self.catalogue.entry(collection.to_string()).or_default().extend(images);
        self
    }

    pub fn refusing(mut self, destination: &str) -> Self {
        self.refuse_exports.push(destination.to_string());
        self
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().map(|q| q.len()).unwrap_or_default()
    }

    pub fn submitted(&self) -> Vec<ExportRequest> {
        self.exports.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn last_tile(&self) -> Option<(Raster, TileStyle)> {
        self.tiles.lock().ok().and_then(|t| t.last().cloned())
    }
}

fn matches(image: &ImageHandle, query: &CollectionQuery) -> bool {
    let start = query.window.start.timestamp_millis();
    let end = query.window.end.timestamp_millis();
    image.time_start >= start
        && image.time_start < end
        && query.filters.iter().all(|f| image.properties.get(&f.property) == Some(&f.equals))
}

fn sort_value(image: &ImageHandle, property: &str) -> f64 {
    if property == "system:time_start" {
        image.time_start as f64
    } else {
        image.number(property).unwrap_or(f64::MAX)
    }
}

impl ComputeService for FakeComputeService {
    fn query(&self, query: &CollectionQuery) -> ChangeResult<Vec<ImageHandle>> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.clone());
        }

        let mut images: Vec<ImageHandle> = self
            .catalogue
            .get(&query.collection)
            .map(|all| all.iter().filter(|i| matches(i, query)).cloned().collect())
            .unwrap_or_default();

        let property = query.sort.property.as_str();
        images.sort_by(|a, b| sort_value(a, property).total_cmp(&sort_value(b, property)));
        if !query.sort.ascending {
            images.reverse();
        }
        if let Some(limit) = query.limit {
            images.truncate(limit);
        }
        Ok(images)
    }

    fn tile(&self, raster: &Raster, style: &TileStyle) -> ChangeResult<TileHandle> {
        let mut tiles = self
            .tiles
            .lock()
            .map_err(|_| ChangeError::RemoteService("tile log poisoned".to_string()))?;
        tiles.push((raster.clone(), style.clone()));
        Ok(TileHandle {
            url_template: format!("https://tiles.test/map{}/{{z}}/{{x}}/{{y}}", tiles.len()),
            token: format!("token{}", tiles.len()),
        })
    }

    fn download_url(&self, raster: &Raster, scale: f64, crs: Option<&str>) -> ChangeResult<String> {
        let mut downloads = self
            .downloads
            .lock()
            .map_err(|_| ChangeError::RemoteService("download log poisoned".to_string()))?;
        downloads.push((raster.clone(), scale, crs.map(str::to_string)));
        Ok(format!("https://download.test/{}?scale={}", downloads.len(), scale))
    }

    fn submit_export(&self, request: &ExportRequest) -> ChangeResult<String> {
        let kind = request.destination.kind().to_string();
        if self.refuse_exports.contains(&kind) {
            return Err(ChangeError::RemoteService(format!("{} export refused", kind)));
        }
        let mut exports = self
            .exports
            .lock()
            .map_err(|_| ChangeError::RemoteService("export log poisoned".to_string()))?;
        exports.push(request.clone());
        let n = self.next_task.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("TASK{:04}", n))
    }

    /// A list expression evaluates to one row of correlations per item
    fn compute_value(&self, expr: &Expr) -> ChangeResult<serde_json::Value> {
        match expr {
            Expr::List { items } => Ok(json!(items
                .iter()
                .enumerate()
                .map(|(i, _)| vec![0.9 - 0.01 * i as f64; self.correlation_width])
                .collect::<Vec<_>>())),
            other => Err(ChangeError::RemoteService(format!("Cannot evaluate {:?}", other))),
        }
    }
}
