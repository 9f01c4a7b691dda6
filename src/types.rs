//! Domain types shared across the crate
//!
//! Lazy raster expressions, image handles from catalogue queries, form-level
//! value types and the crate-wide error enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Epoch timestamp in milliseconds, as reported by the compute service
pub type EpochMillis = i64;

/// Property map attached to a resolved image
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl Polarization {
    pub fn parse(value: &str) -> ChangeResult<Self> {
        match value.trim().to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            other => Err(ChangeError::Validation(format!("Invalid polarization: {}", other))),
        }
    }
}

/// Polarization selection for a Sentinel-1 query: one channel or a co/cross pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolarizationMode {
    Single(Polarization),
    Dual(Polarization, Polarization),
}

impl PolarizationMode {
    /// Parse the selector strings offered by the input form (`VV`, `VV,VH`, ...)
    pub fn parse(value: &str) -> ChangeResult<Self> {
        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [single] => Ok(PolarizationMode::Single(Polarization::parse(single)?)),
            [co, cross] => {
                let pair = (Polarization::parse(co)?, Polarization::parse(cross)?);
                match pair {
                    (Polarization::VV, Polarization::VH) | (Polarization::HH, Polarization::HV) => {
                        Ok(PolarizationMode::Dual(pair.0, pair.1))
                    }
                    _ => Err(ChangeError::Validation(format!(
                        "Unsupported polarization pair: {}",
                        value
                    ))),
                }
            }
            _ => Err(ChangeError::Validation(format!("Invalid polarization: {}", value))),
        }
    }

    /// Band names carried by images acquired in this mode
    pub fn bands(&self) -> Vec<String> {
        match self {
            PolarizationMode::Single(p) => vec![p.to_string()],
            PolarizationMode::Dual(a, b) => vec![a.to_string(), b.to_string()],
        }
    }
}

impl std::fmt::Display for PolarizationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolarizationMode::Single(p) => write!(f, "{}", p),
            PolarizationMode::Dual(a, b) => write!(f, "{},{}", a, b),
        }
    }
}

/// Orbit direction of a Sentinel-1 acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbitPass {
    Ascending,
    Descending,
}

impl OrbitPass {
    pub fn parse(value: &str) -> ChangeResult<Self> {
        match value.trim().to_uppercase().as_str() {
            "ASCENDING" => Ok(OrbitPass::Ascending),
            "DESCENDING" => Ok(OrbitPass::Descending),
            other => Err(ChangeError::Validation(format!("Invalid orbit pass: {}", other))),
        }
    }
}

impl std::fmt::Display for OrbitPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrbitPass::Ascending => write!(f, "ASCENDING"),
            OrbitPass::Descending => write!(f, "DESCENDING"),
        }
    }
}

/// Sensor platforms known to the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Sentinel1,
    Sentinel2,
    Landsat8,
    Landsat7,
    Landsat5,
}

impl Platform {
    pub fn parse(value: &str) -> ChangeResult<Self> {
        match value.trim().to_lowercase().as_str() {
            "sentinel1" => Ok(Platform::Sentinel1),
            "sentinel2" => Ok(Platform::Sentinel2),
            "landsat8" => Ok(Platform::Landsat8),
            "landsat7" => Ok(Platform::Landsat7),
            "landsat5" => Ok(Platform::Landsat5),
            other => Err(ChangeError::Validation(format!("Unknown platform: {}", other))),
        }
    }

    /// Collection identifier on the compute service
    pub fn collection(&self) -> &'static str {
        match self {
            Platform::Sentinel1 => "COPERNICUS/S1_GRD",
            Platform::Sentinel2 => "COPERNICUS/S2",
            Platform::Landsat8 => "LANDSAT/LC08/C01/T1",
            Platform::Landsat7 => "LANDSAT/LE7",
            Platform::Landsat5 => "LT5_L1T",
        }
    }

    /// Cloud metric used for "best first" ordering; SAR has none
    pub fn quality_property(&self) -> Option<&'static str> {
        match self {
            Platform::Sentinel1 => None,
            Platform::Sentinel2 => Some("CLOUDY_PIXEL_PERCENTAGE"),
            Platform::Landsat8 | Platform::Landsat7 | Platform::Landsat5 => Some("CLOUD_COVER"),
        }
    }

    /// Reflective bands compared by the pairwise workflow
    pub fn change_bands(&self) -> &'static [&'static str] {
        match self {
            Platform::Sentinel1 => &[],
            Platform::Sentinel2 => &["B2", "B3", "B4", "B8"],
            Platform::Landsat8 => &["B2", "B3", "B4", "B5", "B6", "B7"],
            Platform::Landsat7 | Platform::Landsat5 => &["B1", "B2", "B3", "B4", "B5", "B7"],
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Sentinel1 => write!(f, "sentinel1"),
            Platform::Sentinel2 => write!(f, "sentinel2"),
            Platform::Landsat8 => write!(f, "landsat8"),
            Platform::Landsat7 => write!(f, "landsat7"),
            Platform::Landsat5 => write!(f, "landsat5"),
        }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Build a validated rectangle; corners must be ordered and on the globe
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> ChangeResult<Self> {
        let values = [min_lon, min_lat, max_lon, max_lat];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ChangeError::Validation(
                "Bounding box coordinates must be finite".to_string(),
            ));
        }
        if !(-180.0..=180.0).contains(&min_lon) || !(-180.0..=180.0).contains(&max_lon) {
            return Err(ChangeError::Validation(format!(
                "Longitude out of range: {} .. {}",
                min_lon, max_lon
            )));
        }
        if !(-90.0..=90.0).contains(&min_lat) || !(-90.0..=90.0).contains(&max_lat) {
            return Err(ChangeError::Validation(format!(
                "Latitude out of range: {} .. {}",
                min_lat, max_lat
            )));
        }
        if min_lon >= max_lon {
            return Err(ChangeError::Validation(format!(
                "minLon ({}) must be less than maxLon ({})",
                min_lon, max_lon
            )));
        }
        if min_lat >= max_lat {
            return Err(ChangeError::Validation(format!(
                "minLat ({}) must be less than maxLat ({})",
                min_lat, max_lat
            )));
        }
        Ok(Self { min_lon, max_lon, min_lat, max_lat })
    }

    /// Center as (lon, lat)
    pub fn center(&self) -> (f64, f64) {
        ((self.min_lon + self.max_lon) / 2.0, (self.min_lat + self.max_lat) / 2.0)
    }

    /// Upper-left corner as [lon, lat]
    pub fn upper_left(&self) -> [f64; 2] {
        [self.min_lon, self.max_lat]
    }

    /// Lower-right corner as [lon, lat]
    pub fn lower_right(&self) -> [f64; 2] {
        [self.max_lon, self.min_lat]
    }
}

/// Half-open acquisition window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> ChangeResult<Self> {
        if start >= end {
            return Err(ChangeError::Validation(format!(
                "Start date {} must precede end date {}",
                start.format("%Y-%m-%d"),
                end.format("%Y-%m-%d")
            )));
        }
        Ok(Self { start, end })
    }
}

/// Reference to a single remote raster after filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageHandle {
    /// `system:id` on the compute service
    pub id: String,
    /// `system:time_start`
    pub time_start: EpochMillis,
    pub bands: Vec<String>,
    /// Native CRS of the first band, if the service reported it
    #[serde(default)]
    pub crs: Option<String>,
    #[serde(default)]
    pub properties: Properties,
}

impl ImageHandle {
    /// Numeric metadata property, if present
    pub fn number(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(serde_json::Value::as_f64)
    }

    /// Non-negative integer metadata property that fits in `u32`
    pub fn count(&self, key: &str) -> Option<u32> {
        self.properties
            .get(key)
            .and_then(serde_json::Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    }

    pub fn relative_orbit(&self) -> Option<u32> {
        self.count("relativeOrbitNumber_start")
    }

    pub fn sensing_orbit(&self) -> Option<u32> {
        self.count("SENSING_ORBIT_NUMBER")
    }

    /// Lazy raster for the whole image
    pub fn raster(&self) -> Raster {
        Raster::new(Expr::Image { id: self.id.clone() }, self.bands.clone())
    }
}

/// Node of the lazy expression graph evaluated by the compute service.
///
/// Serializes as a tree in which [`Expr::Shared`] nodes appear as references
/// only; send [`ExprGraph`] to the service so their definitions travel too.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    Image { id: String },
    Literal { value: serde_json::Value },
    Select { input: Box<Expr>, bands: Vec<String> },
    SelectIndex { input: Box<Expr>, index: usize },
    Clip { input: Box<Expr>, region: BoundingBox },
    Rename { input: Box<Expr>, names: Vec<String> },
    Concat { inputs: Vec<Expr> },
    ToByte { input: Box<Expr> },
    /// `exp(x * ln(10) / 10)`: restores linear intensity from decibels
    DbToLinear { input: Box<Expr> },
    Register { input: Box<Expr>, reference: Box<Expr>, max_offset: f64 },
    Max { inputs: Vec<Expr> },
    List { items: Vec<Expr> },
    /// `list` with `item` appended
    Append { list: Box<Expr>, item: Box<Expr> },
    Dict { entries: BTreeMap<String, Expr> },
    Get { input: Box<Expr>, key: String },
    Invoke { function: String, args: BTreeMap<String, Expr> },
    /// Node referenced from several places; evaluated once per request
    Shared { node: SharedExpr },
}

impl Expr {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Expr::Literal { value: value.into() }
    }

    /// Member `key` of a dictionary-valued expression
    pub fn get(&self, key: &str) -> Self {
        Expr::Get { input: Box::new(self.clone()), key: key.to_string() }
    }

    pub fn invoke<I>(function: &str, args: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, Expr)>,
    {
        Expr::Invoke {
            function: function.to_string(),
            args: args.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    pub fn append(&self, item: Expr) -> Self {
        Expr::Append { list: Box::new(self.clone()), item: Box::new(item) }
    }

    /// Wrap into a shared node. Clones of the result are cheap and all refer
    /// to the same node.
    pub fn shared(self) -> Self {
        match self {
            Expr::Shared { .. } => self,
            other => Expr::Shared { node: SharedExpr::new(other) },
        }
    }

    /// The expression behind any shared wrapper
    pub fn resolve(&self) -> &Expr {
        match self {
            Expr::Shared { node } => node.expr().resolve(),
            other => other,
        }
    }

    fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Image { .. } | Expr::Literal { .. } | Expr::Shared { .. } => Vec::new(),
            Expr::Select { input, .. }
            | Expr::SelectIndex { input, .. }
            | Expr::Clip { input, .. }
            | Expr::Rename { input, .. }
            | Expr::ToByte { input }
            | Expr::DbToLinear { input }
            | Expr::Get { input, .. } => vec![input.as_ref()],
            Expr::Register { input, reference, .. } => vec![input.as_ref(), reference.as_ref()],
            Expr::Append { list, item } => vec![list.as_ref(), item.as_ref()],
            Expr::Concat { inputs } | Expr::Max { inputs } | Expr::List { items: inputs } => {
                inputs.iter().collect()
            }
            Expr::Dict { entries } => entries.values().collect(),
            Expr::Invoke { args, .. } => args.values().collect(),
        }
    }
}

static NEXT_SHARED_ID: AtomicU64 = AtomicU64::new(1);

/// Reference-counted graph node with a process-unique id.
///
/// Equality and `Debug` go by id, so neither walks the shared subgraph.
#[derive(Clone)]
pub struct SharedExpr {
    id: u64,
    expr: Arc<Expr>,
}

impl SharedExpr {
    fn new(expr: Expr) -> Self {
        Self { id: NEXT_SHARED_ID.fetch_add(1, Ordering::Relaxed), expr: Arc::new(expr) }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl PartialEq for SharedExpr {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Debug for SharedExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedExpr#{}", self.id)
    }
}

impl Serialize for SharedExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.id)
    }
}

/// Wire form of an expression: every shared node defined once under `nodes`,
/// referenced by id from `root` and from other nodes
#[derive(Debug, Serialize)]
pub struct ExprGraph<'a> {
    pub nodes: BTreeMap<u64, &'a Expr>,
    pub root: &'a Expr,
}

impl<'a> ExprGraph<'a> {
    pub fn new(root: &'a Expr) -> Self {
        let mut nodes = BTreeMap::new();
        let mut pending = vec![root];
        while let Some(expr) = pending.pop() {
            if let Expr::Shared { node } = expr {
                if nodes.contains_key(&node.id) {
                    continue;
                }
                nodes.insert(node.id, node.expr());
                pending.push(node.expr());
            } else {
                pending.extend(expr.children());
            }
        }
        Self { nodes, root }
    }
}

/// `serialize_with` adapter encoding an expression field as an [`ExprGraph`]
pub fn serialize_graph<S: Serializer>(expr: &Expr, serializer: S) -> Result<S::Ok, S::Error> {
    ExprGraph::new(expr).serialize(serializer)
}

/// Lazy raster: an expression plus the band names it evaluates to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Raster {
    expr: Expr,
    bands: Vec<String>,
}

impl Raster {
    pub fn new(expr: Expr, bands: Vec<String>) -> Self {
        Self { expr, bands }
    }

    /// Single-band constant image
    pub fn constant(value: f64) -> Self {
        Self::new(Expr::literal(value), vec!["constant".to_string()])
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn select(&self, bands: &[&str]) -> ChangeResult<Raster> {
        if let Some(missing) = bands.iter().find(|b| !self.bands.iter().any(|have| have == *b)) {
            return Err(ChangeError::Validation(format!(
                "Band {} not present (available: {:?})",
                missing, self.bands
            )));
        }
        let bands: Vec<String> = bands.iter().map(|b| b.to_string()).collect();
        Ok(Self::new(
            Expr::Select { input: Box::new(self.expr.clone()), bands: bands.clone() },
            bands,
        ))
    }

    pub fn select_index(&self, index: usize) -> ChangeResult<Raster> {
        let band = self.bands.get(index).cloned().ok_or_else(|| {
            ChangeError::Validation(format!(
                "Band index {} out of range for {} band(s)",
                index,
                self.bands.len()
            ))
        })?;
        Ok(Self::new(
            Expr::SelectIndex { input: Box::new(self.expr.clone()), index },
            vec![band],
        ))
    }

    pub fn clip(&self, region: &BoundingBox) -> Raster {
        Self::new(
            Expr::Clip { input: Box::new(self.expr.clone()), region: *region },
            self.bands.clone(),
        )
    }

    pub fn rename(&self, names: Vec<String>) -> ChangeResult<Raster> {
        if names.len() != self.bands.len() {
            return Err(ChangeError::Validation(format!(
                "Cannot rename {} band(s) with {} name(s)",
                self.bands.len(),
                names.len()
            )));
        }
        Ok(Self::new(
            Expr::Rename { input: Box::new(self.expr.clone()), names: names.clone() },
            names,
        ))
    }

    /// Stack rasters band-wise, in order
    pub fn concat(rasters: &[Raster]) -> Raster {
        Self::new(
            Expr::Concat { inputs: rasters.iter().map(|r| r.expr.clone()).collect() },
            rasters.iter().flat_map(|r| r.bands.iter().cloned()).collect(),
        )
    }

    pub fn add_bands(&self, other: &Raster) -> Raster {
        Self::concat(&[self.clone(), other.clone()])
    }

    pub fn to_byte(&self) -> Raster {
        Self::new(Expr::ToByte { input: Box::new(self.expr.clone()) }, self.bands.clone())
    }

    pub fn db_to_linear(&self) -> Raster {
        Self::new(Expr::DbToLinear { input: Box::new(self.expr.clone()) }, self.bands.clone())
    }

    /// Co-register onto `reference`, allowing at most `max_offset` meters of shift
    pub fn register(&self, reference: &Raster, max_offset: f64) -> Raster {
        Self::new(
            Expr::Register {
                input: Box::new(self.expr.clone()),
                reference: Box::new(reference.expr.clone()),
                max_offset,
            },
            self.bands.clone(),
        )
    }

    /// Per-pixel maximum over a non-empty list of rasters
    pub fn max_of(rasters: &[Raster]) -> ChangeResult<Raster> {
        let first = rasters.first().ok_or_else(|| {
            ChangeError::Validation("Cannot take the maximum of an empty series".to_string())
        })?;
        Ok(Self::new(
            Expr::Max { inputs: rasters.iter().map(|r| r.expr.clone()).collect() },
            first.bands.clone(),
        ))
    }
}

/// Visualisation parameters for a tile request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileStyle {
    pub min: f64,
    pub max: f64,
    pub opacity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub palette: Option<String>,
}

/// Materialized map tiles: URL template and access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileHandle {
    pub url_template: String,
    pub token: String,
}

/// Error types for change-detection orchestration
#[derive(Debug, thiserror::Error)]
pub enum ChangeError {
    #[error("{0}")]
    EmptySeries(String),

    #[error("Less than {required} images found ({found})")]
    InsufficientSeries { found: usize, required: usize },

    #[error("Remote service error: {0}")]
    RemoteService(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ChangeError {
    fn from(e: reqwest::Error) -> Self {
        ChangeError::RemoteService(e.to_string())
    }
}

/// Result type for change-detection operations
pub type ChangeResult<T> = Result<T, ChangeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn image_with(key: &str, value: serde_json::Value) -> ImageHandle {
        ImageHandle {
            id: "img".to_string(),
            time_start: 0,
            bands: vec!["VV".to_string()],
            crs: None,
            properties: [(key.to_string(), value)].into_iter().collect(),
        }
    }

    #[test]
    fn test_orbit_numbers_reject_bad_metadata() {
        let key = "relativeOrbitNumber_start";
        assert_eq!(image_with(key, json!(15)).relative_orbit(), Some(15));
        assert_eq!(image_with(key, json!(-3)).relative_orbit(), None);
        assert_eq!(image_with(key, json!(15.5)).relative_orbit(), None);
        assert_eq!(image_with(key, json!(5_000_000_000u64)).relative_orbit(), None);
        assert_eq!(image_with(key, json!("15")).relative_orbit(), None);

        let key = "SENSING_ORBIT_NUMBER";
        assert_eq!(image_with(key, json!(108)).sensing_orbit(), Some(108));
        assert_eq!(image_with(key, json!(-1)).sensing_orbit(), None);
    }

    #[test]
    fn test_graph_defines_shared_node_once() {
        let scene = Expr::Image { id: "S2A_20170725".into() }.shared();
        let root = Expr::List { items: vec![scene.get("B2"), scene.get("B3"), scene.clone()] };

        let graph = ExprGraph::new(&root);
        assert_eq!(graph.nodes.len(), 1);

        let text = serde_json::to_string(&graph).unwrap();
        assert_eq!(text.matches("S2A_20170725").count(), 1);
        assert_eq!(text.matches("\"op\":\"shared\"").count(), 3);
    }

    #[test]
    fn test_nested_shared_nodes_are_collected() {
        let base = Expr::Image { id: "base".into() }.shared();
        let chain = (0..10).fold(base, |acc, i| {
            Expr::invoke("step", [("input", acc.clone()), ("again", acc), ("i", Expr::literal(i))])
                .shared()
        });

        let graph = ExprGraph::new(&chain);
        assert_eq!(graph.nodes.len(), 11);
        assert!(matches!(chain.resolve(), Expr::Invoke { function, .. } if function == "step"));
        assert_eq!(chain.clone().shared(), chain);
    }
}
