//! Catalogue queries that turn a selection into an ordered image series

use crate::core::selector::Selection;
use crate::io::remote::{CollectionQuery, ComputeService};
use crate::types::{
    BoundingBox, ChangeError, ChangeResult, DateWindow, EpochMillis, ImageHandle, OrbitPass,
    Platform, PolarizationMode,
};

/// Upper bound on images fetched for "best first" lookups
const BEST_FIRST_LIMIT: usize = 100;

/// Non-empty, ordered result of a collection query
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSeries {
    images: Vec<ImageHandle>,
}

impl ImageSeries {
    fn new(images: Vec<ImageHandle>, context: &str) -> ChangeResult<Self> {
        if images.is_empty() {
            return Err(ChangeError::EmptySeries(context.to_string()));
        }
        Ok(Self { images })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[ImageHandle] {
        &self.images
    }

    pub fn first(&self) -> &ImageHandle {
        &self.images[0]
    }

    pub fn timestamps(&self) -> Vec<EpochMillis> {
        self.images.iter().map(|i| i.time_start).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.images.iter().map(|i| i.id.clone()).collect()
    }

    pub fn relative_orbits(&self) -> Vec<Option<u32>> {
        self.images.iter().map(ImageHandle::relative_orbit).collect()
    }

    pub fn sensing_orbits(&self) -> Vec<Option<u32>> {
        self.images.iter().map(ImageHandle::sensing_orbit).collect()
    }
}

/// Sentinel-1 GRD series request
#[derive(Debug, Clone, PartialEq)]
pub struct Sentinel1Query {
    pub selection: Selection,
    pub polarization: PolarizationMode,
    pub pass: OrbitPass,
    pub relative_orbit: Option<u32>,
}

impl Sentinel1Query {
    /// IW-mode, 10 m GRD scenes with the requested polarizations and pass,
    /// oldest first
    pub fn to_collection_query(&self) -> CollectionQuery {
        let pols: Vec<serde_json::Value> = self
            .polarization
            .bands()
            .into_iter()
            .map(serde_json::Value::from)
            .collect();
        let pol_filter = match pols.len() {
            1 => pols[0].clone(),
            _ => serde_json::Value::Array(pols),
        };

        let query = CollectionQuery::new(
            Platform::Sentinel1.collection(),
            &self.selection.region,
            &self.selection.window,
        )
        .filter_eq("transmitterReceiverPolarisation", pol_filter)
        .filter_eq("resolution_meters", 10)
        .filter_eq("instrumentMode", "IW")
        .filter_eq("orbitProperties_pass", self.pass.to_string());

        match self.relative_orbit {
            Some(orbit) => query.filter_eq("relativeOrbitNumber_start", orbit),
            None => query,
        }
    }
}

/// Resolves spatial/temporal selections into image handles
pub struct SeriesResolver<'a, S: ComputeService + ?Sized> {
    service: &'a S,
}

impl<'a, S: ComputeService + ?Sized> SeriesResolver<'a, S> {
    pub fn new(service: &'a S) -> Self {
        Self { service }
    }

    /// Run `query`; an empty answer fails with `EmptySeries(context)`
    pub fn resolve(&self, query: &CollectionQuery, context: &str) -> ChangeResult<ImageSeries> {
        log::info!(
            "Querying {} ({} filter(s), sorted by {})",
            query.collection,
            query.filters.len(),
            query.sort.property
        );
        let images = self.service.query(query)?;
        log::info!("Resolved {} image(s) from {}", images.len(), query.collection);
        ImageSeries::new(images, context)
    }

    pub fn sentinel1_series(&self, request: &Sentinel1Query) -> ChangeResult<ImageSeries> {
        self.resolve(&request.to_collection_query(), "No images found")
    }

    /// All scenes of `platform` in the window, least cloudy first
    pub fn best_first(
        &self,
        platform: Platform,
        quality_property: &str,
        region: &BoundingBox,
        window: &DateWindow,
        context: &str,
    ) -> ChangeResult<ImageSeries> {
        let query = CollectionQuery::new(platform.collection(), region, window)
            .sort_by(quality_property, true)
            .limit(BEST_FIRST_LIMIT);
        self.resolve(&query, context)
    }

    /// The least cloudy scene of an optical platform in the window
    pub fn best_optical(
        &self,
        platform: Platform,
        region: &BoundingBox,
        window: &DateWindow,
        context: &str,
    ) -> ChangeResult<ImageHandle> {
        let property = platform.quality_property().ok_or_else(|| {
            ChangeError::Validation(format!("{} has no cloud metric to rank scenes", platform))
        })?;
        let series = self.best_first(platform, property, region, window, context)?;
        Ok(series.first().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Polarization;
    use chrono::{TimeZone, Utc};

    fn selection() -> Selection {
        Selection {
            region: BoundingBox::new(8.444, 49.985, 8.682, 50.078).unwrap(),
            window: DateWindow::new(
                Utc.with_ymd_and_hms(2017, 5, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2017, 11, 1, 0, 0, 0).unwrap(),
            )
            .unwrap(),
        }
    }

    #[test]
    fn test_sentinel1_filters() {
        let request = Sentinel1Query {
            selection: selection(),
            polarization: PolarizationMode::Dual(Polarization::VV, Polarization::VH),
            pass: OrbitPass::Ascending,
            relative_orbit: Some(15),
        };
        let query = request.to_collection_query();

        assert_eq!(query.collection, "COPERNICUS/S1_GRD");
        assert_eq!(query.sort.property, "system:time_start");
        assert!(query.sort.ascending);

        let props: Vec<&str> = query.filters.iter().map(|f| f.property.as_str()).collect();
        assert_eq!(
            props,
            vec![
                "transmitterReceiverPolarisation",
                "resolution_meters",
                "instrumentMode",
                "orbitProperties_pass",
                "relativeOrbitNumber_start"
            ]
        );
        assert_eq!(query.filters[0].equals, serde_json::json!(["VV", "VH"]));
        assert_eq!(query.filters[3].equals, serde_json::json!("ASCENDING"));
    }

    #[test]
    fn test_single_polarization_without_orbit() {
        let request = Sentinel1Query {
            selection: selection(),
            polarization: PolarizationMode::Single(Polarization::VV),
            pass: OrbitPass::Descending,
            relative_orbit: None,
        };
        let query = request.to_collection_query();
        assert_eq!(query.filters.len(), 4);
        assert_eq!(query.filters[0].equals, serde_json::json!("VV"));
    }

    #[test]
    fn test_empty_series_rejected() {
        let result = ImageSeries::new(Vec::new(), "No images found for first time interval");
        match result {
            Err(ChangeError::EmptySeries(msg)) => assert!(msg.contains("first time interval")),
            other => panic!("expected EmptySeries, got {:?}", other),
        }
    }
}
