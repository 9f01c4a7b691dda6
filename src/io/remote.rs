//! Compute service client

use crate::config::ServiceConfig;
use crate::io::export::ExportRequest;
use crate::types::{
    BoundingBox, ChangeError, ChangeResult, DateWindow, Expr, ExprGraph, ImageHandle, Raster,
    TileHandle, TileStyle,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Equality filter on an image metadata property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub property: String,
    pub equals: serde_json::Value,
}

/// Result ordering for a collection query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub property: String,
    pub ascending: bool,
}

/// Filtered, sorted query against an image collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionQuery {
    pub collection: String,
    /// Points ([lon, lat]) every returned footprint must contain
    pub contains: Vec<[f64; 2]>,
    pub window: DateWindow,
    pub filters: Vec<PropertyFilter>,
    pub sort: SortKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl CollectionQuery {
    /// Images covering both the upper-left and lower-right corners of `region`
    /// acquired in `window`, oldest first
    pub fn new(collection: &str, region: &BoundingBox, window: &DateWindow) -> Self {
        Self {
            collection: collection.to_string(),
            contains: vec![region.upper_left(), region.lower_right()],
            window: *window,
            filters: Vec::new(),
            sort: SortKey { property: "system:time_start".to_string(), ascending: true },
            limit: None,
        }
    }

    pub fn filter_eq(mut self, property: &str, value: impl Into<serde_json::Value>) -> Self {
        self.filters.push(PropertyFilter { property: property.to_string(), equals: value.into() });
        self
    }

    pub fn sort_by(mut self, property: &str, ascending: bool) -> Self {
        self.sort = SortKey { property: property.to_string(), ascending };
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Remote geospatial compute service.
///
/// Rasters are lazy expression graphs; nothing is computed until one of these
/// calls materializes a result. Every failure is reported as
/// `ChangeError::RemoteService` and is fatal for the current request.
pub trait ComputeService: Send + Sync {
    /// Resolve a filtered collection into image handles, in query order
    fn query(&self, query: &CollectionQuery) -> ChangeResult<Vec<ImageHandle>>;

    /// Render `raster` as map tiles
    fn tile(&self, raster: &Raster, style: &TileStyle) -> ChangeResult<TileHandle>;

    /// Direct download URL for `raster` at `scale` meters per pixel,
    /// reprojected to `crs` when one is given
    fn download_url(
        &self,
        raster: &Raster,
        scale: f64,
        crs: Option<&str>,
    ) -> ChangeResult<String>;

    /// Start a batch export and return its job identifier without waiting
    fn submit_export(&self, request: &ExportRequest) -> ChangeResult<String>;

    /// Evaluate a non-raster expression to JSON
    fn compute_value(&self, expr: &Expr) -> ChangeResult<serde_json::Value>;
}

#[derive(Serialize)]
struct TileBody<'a> {
    expression: ExprGraph<'a>,
    bands: &'a [String],
    style: &'a TileStyle,
}

#[derive(Serialize)]
struct DownloadBody<'a> {
    expression: ExprGraph<'a>,
    bands: &'a [String],
    scale: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    crs: Option<&'a str>,
}

#[derive(Serialize)]
struct ComputeBody<'a> {
    expression: ExprGraph<'a>,
}

#[derive(Deserialize)]
struct QueryReply {
    images: Vec<ImageHandle>,
}

#[derive(Deserialize)]
struct DownloadReply {
    url: String,
}

#[derive(Deserialize)]
struct ExportReply {
    id: String,
}

#[derive(Deserialize)]
struct ComputeReply {
    result: serde_json::Value,
}

/// JSON-over-HTTP client for the compute service
pub struct HttpComputeService {
    client: reqwest::blocking::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpComputeService {
    pub fn new(config: &ServiceConfig) -> ChangeResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChangeError::RemoteService(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// Full URL of an API method
    pub fn method_url(&self, method: &str) -> String {
        format!("{}/v1/{}", self.endpoint, method)
    }

    fn post<B: Serialize, R: DeserializeOwned>(&self, method: &str, body: &B) -> ChangeResult<R> {
        let url = self.method_url(method);
        log::debug!("POST {}", url);

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|e| ChangeError::RemoteService(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(ChangeError::RemoteService(format!(
                "{} failed with status {}: {}",
                method,
                status,
                detail.trim()
            )));
        }

        response
            .json::<R>()
            .map_err(|e| ChangeError::RemoteService(format!("Malformed {} response: {}", method, e)))
    }
}

impl ComputeService for HttpComputeService {
    fn query(&self, query: &CollectionQuery) -> ChangeResult<Vec<ImageHandle>> {
        let reply: QueryReply = self.post("collections:query", query)?;
        log::debug!("{} returned {} image(s)", query.collection, reply.images.len());
        Ok(reply.images)
    }

    fn tile(&self, raster: &Raster, style: &TileStyle) -> ChangeResult<TileHandle> {
        let body = TileBody { expression: ExprGraph::new(raster.expr()), bands: raster.bands(), style };
        self.post("tiles", &body)
    }

    fn download_url(
        &self,
        raster: &Raster,
        scale: f64,
        crs: Option<&str>,
    ) -> ChangeResult<String> {
        let body = DownloadBody {
            expression: ExprGraph::new(raster.expr()),
            bands: raster.bands(),
            scale,
            crs,
        };
        let reply: DownloadReply = self.post("downloads", &body)?;
        Ok(reply.url)
    }

    fn submit_export(&self, request: &ExportRequest) -> ChangeResult<String> {
        let reply: ExportReply = self.post("exports", request)?;
        Ok(reply.id)
    }

    fn compute_value(&self, expr: &Expr) -> ChangeResult<serde_json::Value> {
        let body = ComputeBody { expression: ExprGraph::new(expr) };
        let reply: ComputeReply = self.post("values:compute", &body)?;
        Ok(reply.result)
    }
}
