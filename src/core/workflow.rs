//! Request orchestration
//!
//! Each workflow goes Selector → Resolver → {Accumulator | Interpreter} →
//! Export Dispatcher → Response Assembler. Requests are independent; the only
//! state a [`ChangeDetector`] holds is its service client, kernels and config.

use crate::config::ServiceConfig;
use crate::core::imad::{accumulate, CorrelationTable, PairwiseKernel, RemoteImadKernel};
use crate::core::labels::{acquisition_time, acquisition_times, timestamp_labels};
use crate::core::omnibus::{interpret, ClippedSeries, DisplayVariant, OmnibusKernel, RemoteOmnibusKernel};
use crate::core::response::{
    AcquisitionSummary, MadReport, MapView, OmnibusReport, Outcome, Sentinel1Report, Sentinel2Report,
};
use crate::core::selector::{
    parse_iterations, parse_relative_orbit, parse_scale, parse_significance, FormFields,
    PairSelection, Selection, SessionDefaults,
};
use crate::io::export::{ExportDispatcher, ExportTarget};
use crate::io::remote::ComputeService;
use crate::io::resolver::{Sentinel1Query, SeriesResolver};
use crate::types::{
    ChangeError, ChangeResult, OrbitPass, Platform, PolarizationMode, Raster, TileStyle,
};

/// Sentinel-2 browse ranks scenes by the per-granule cloud assessment
const S2_BROWSE_QUALITY: &str = "CLOUD_COVERAGE_ASSESSMENT";

/// Requested export destinations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportOptions {
    pub asset: Option<ExportTarget>,
    pub drive: Option<ExportTarget>,
}

impl ExportOptions {
    /// `assexport`/`gdexport` checkboxes with their name and scale fields
    pub fn from_form(form: &FormFields) -> ChangeResult<Self> {
        let asset = if form.flag("assexport") {
            Some(ExportTarget {
                name: form.required("assexportname")?.to_string(),
                scale: parse_scale("assexportscale", form.required("assexportscale")?)?,
            })
        } else {
            None
        };
        let drive = if form.flag("gdexport") {
            Some(ExportTarget {
                name: form.required("gdexportname")?.to_string(),
                scale: parse_scale("gdexportscale", form.required("gdexportscale")?)?,
            })
        } else {
            None
        };
        Ok(Self { asset, drive })
    }
}

/// Single drive export used by the browse views (`export` checkbox)
fn browse_export(form: &FormFields) -> ChangeResult<Option<ExportTarget>> {
    if form.optional("export") != Some("export") {
        return Ok(None);
    }
    Ok(Some(ExportTarget {
        name: form.required("exportname")?.to_string(),
        scale: parse_scale("gdexportscale", form.required("gdexportscale")?)?,
    }))
}

fn sentinel1_query(form: &FormFields) -> ChangeResult<Sentinel1Query> {
    Ok(Sentinel1Query {
        selection: Selection::from_form(form)?,
        polarization: PolarizationMode::parse(form.required("polarization")?)?,
        pass: OrbitPass::parse(form.required("pass")?)?,
        relative_orbit: parse_relative_orbit(form.optional("relativeorbitnumber").unwrap_or(""))?,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sentinel1Request {
    pub query: Sentinel1Query,
    /// Show the per-pixel maximum over the series (shipping lanes)
    pub max_intensity: bool,
    pub export: Option<ExportTarget>,
}

impl Sentinel1Request {
    pub fn from_form(form: &FormFields) -> ChangeResult<Self> {
        Ok(Self {
            query: sentinel1_query(form)?,
            max_intensity: form.flag("slanes"),
            export: browse_export(form)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sentinel2Request {
    pub selection: Selection,
    pub export: Option<ExportTarget>,
}

impl Sentinel2Request {
    pub fn from_form(form: &FormFields) -> ChangeResult<Self> {
        Ok(Self { selection: Selection::from_form(form)?, export: browse_export(form)? })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MadRequest {
    pub platform: Platform,
    pub selection: PairSelection,
    pub iterations: u32,
    pub exports: ExportOptions,
}

impl MadRequest {
    pub fn from_form(form: &FormFields) -> ChangeResult<Self> {
        Ok(Self {
            platform: Platform::parse(form.required("platform")?)?,
            selection: PairSelection::from_form(form)?,
            iterations: parse_iterations(form.required("iterations")?)?,
            exports: ExportOptions::from_form(form)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OmnibusRequest {
    pub query: Sentinel1Query,
    pub significance: f64,
    pub use_median: bool,
    pub display: DisplayVariant,
    pub exports: ExportOptions,
}

impl OmnibusRequest {
    pub fn from_form(form: &FormFields) -> ChangeResult<Self> {
        Ok(Self {
            query: sentinel1_query(form)?,
            significance: parse_significance(form.required("significance")?)?,
            use_median: form.flag("median"),
            display: DisplayVariant::parse(form.optional("display").unwrap_or("")),
            exports: ExportOptions::from_form(form)?,
        })
    }
}

/// Orchestrates the four workflows against one compute service
pub struct ChangeDetector<S, P = RemoteImadKernel, O = RemoteOmnibusKernel> {
    service: S,
    pairwise: P,
    omnibus: O,
    config: ServiceConfig,
}

impl<S: ComputeService> ChangeDetector<S> {
    /// Detector using the service's own `imad` and `omnibus` kernels
    pub fn new(service: S, config: ServiceConfig) -> Self {
        Self::with_kernels(service, RemoteImadKernel, RemoteOmnibusKernel, config)
    }
}

impl<S, P, O> ChangeDetector<S, P, O>
where
    S: ComputeService,
    P: PairwiseKernel,
    O: OmnibusKernel,
{
    pub fn with_kernels(service: S, pairwise: P, omnibus: O, config: ServiceConfig) -> Self {
        Self { service, pairwise, omnibus, config }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn dispatcher(&self) -> ExportDispatcher<'_, S> {
        ExportDispatcher::new(&self.service, &self.config)
    }

    /// Sentinel-1 intensity time series, or its maximum with `max_intensity`
    pub fn sentinel1(&self, request: &Sentinel1Request) -> ChangeResult<Sentinel1Report> {
        let region = &request.query.selection.region;
        let series = SeriesResolver::new(&self.service).sentinel1_series(&request.query)?;
        let timestamps = acquisition_times(&series.timestamps())?;
        let labels = timestamp_labels(&series.timestamps())?;
        let first = series.first();

        let bands = request.query.polarization.bands();
        let band_refs: Vec<&str> = bands.iter().map(String::as_str).collect();
        let linear = series
            .images()
            .iter()
            .map(|image| Ok(image.raster().select(&band_refs)?.db_to_linear()))
            .collect::<ChangeResult<Vec<Raster>>>()?;

        let scene_style = TileStyle { min: 0.0, max: 1.0, opacity: 0.5, palette: None };
        let clip_style = TileStyle { min: 0.0, max: 1.0, opacity: 0.7, palette: None };
        let map = self.service.tile(&linear[0].select_index(0)?, &scene_style)?;

        let (output, clip_map, title, download_text) = if request.max_intensity {
            let output = Raster::max_of(&linear)?.clip(region);
            let clip_map = self.service.tile(&output.select_index(0)?, &clip_style)?;
            (output, clip_map, "Sentinel-1 Maximum Intensity Image", "Download maximum intensity image")
        } else {
            let clip_map = self.service.tile(&linear[0].clip(region).select_index(0)?, &clip_style)?;
            // newest acquisition first, bands suffixed with their acquisition label
            let mut layers = Vec::with_capacity(linear.len());
            for (image, label) in linear.iter().zip(&labels).rev() {
                let names = bands.iter().map(|b| format!("{}_{}", b, label)).collect();
                layers.push(image.clip(region).rename(names)?);
            }
            (
                Raster::concat(&layers),
                clip_map,
                "Sentinel-1 Intensity Image",
                "Download image collection intersection",
            )
        };

        let export = self.dispatcher().dispatch(&output, None, request.export.as_ref(), None)?.drive;
        let download_url = self.service.download_url(&output, self.config.download_scale, None)?;

        Ok(Sentinel1Report {
            title: title.to_string(),
            download_text: download_text.to_string(),
            map,
            clip_map,
            view: MapView::new(region, self.config.zoom),
            download_url,
            projection: first.crs.clone(),
            system_id: first.id.clone(),
            count: series.len(),
            timestamp: timestamps[0].clone(),
            timestamps,
            system_ids: series.ids(),
            polarization: request.query.polarization.to_string(),
            relative_orbits: series.relative_orbits(),
            export,
        })
    }

    /// Least cloudy Sentinel-2 scene in the window
    pub fn sentinel2(&self, request: &Sentinel2Request) -> ChangeResult<Sentinel2Report> {
        let region = &request.selection.region;
        let series = SeriesResolver::new(&self.service).best_first(
            Platform::Sentinel2,
            S2_BROWSE_QUALITY,
            region,
            &request.selection.window,
            "No images found",
        )?;
        let timestamps = acquisition_times(&series.timestamps())?;
        let image = series.first();
        let scene = image.raster();
        let clipped = scene.clip(region);
        let four_band = clipped.select(Platform::Sentinel2.change_bands())?;

        let export = self.dispatcher().dispatch(&four_band, None, request.export.as_ref(), None)?.drive;
        // both downloads stay in the scene's native projection
        let crs = image.crs.as_deref();
        let download_url = self.service.download_url(&scene, 30.0, crs)?;
        let clip_download_url =
            self.service.download_url(&four_band, self.config.download_scale, crs)?;

        let rgb = ["B2", "B3", "B4"];
        let map = self.service.tile(
            &scene.select(&rgb)?,
            &TileStyle { min: 0.0, max: 2000.0, opacity: 0.6, palette: None },
        )?;
        let clip_map = self.service.tile(
            &clipped.select(&rgb)?,
            &TileStyle { min: 0.0, max: 3000.0, opacity: 1.0, palette: None },
        )?;

        Ok(Sentinel2Report {
            download_text: "Download image intersection".to_string(),
            map,
            clip_map,
            view: MapView::new(region, self.config.zoom),
            download_url,
            clip_download_url,
            system_id: image.id.clone(),
            cloud_cover: image.number(S2_BROWSE_QUALITY),
            projection: image.crs.clone(),
            count: series.len(),
            sensing_orbits: series.sensing_orbits(),
            timestamp: timestamps[0].clone(),
            timestamps,
            export,
        })
    }

    /// Iteratively re-weighted MAD between the best scenes of two windows
    pub fn mad(&self, request: &MadRequest) -> ChangeResult<MadReport> {
        let platform = request.platform;
        let bands = platform.change_bands();
        let quality = platform.quality_property().ok_or_else(|| {
            ChangeError::Validation(format!("Pairwise change detection needs an optical platform, got {}", platform))
        })?;
        let region = &request.selection.region;
        let resolver = SeriesResolver::new(&self.service);

        let handle1 = resolver.best_optical(
            platform,
            region,
            &request.selection.first,
            "No images found for first time interval",
        )?;
        let handle2 = resolver.best_optical(
            platform,
            region,
            &request.selection.second,
            "No images found for second time interval",
        )?;

        let image1 = handle1.raster().clip(region).select(bands)?;
        let image2 = handle2
            .raster()
            .clip(region)
            .select(bands)?
            .register(&image1, self.config.registration_max_offset);

        let state = accumulate(&self.pairwise, &image1, &image2, request.iterations)?;

        let mad_names = (1..=bands.len()).map(|i| format!("MAD{}", i)).collect();
        let mad = state.change_metric().rename(mad_names)?;
        let chi2 = state.chi_square().rename(vec!["chi2".to_string()])?;
        let second_names = bands.iter().map(|b| format!("{}_1", b)).collect();
        let stack = Raster::concat(&[mad, chi2.clone(), image1, image2.rename(second_names)?]);

        let history = state.correlation_history();
        let exports = self.dispatcher().dispatch(
            &stack,
            request.exports.asset.as_ref(),
            request.exports.drive.as_ref(),
            Some(&history),
        )?;

        let correlations = CorrelationTable::from_json(&self.service.compute_value(&history)?)?;
        for (i, rhos) in correlations.rows().iter().enumerate() {
            log::debug!("Pass {} correlations: {:?}", i + 1, rhos);
        }

        let map = self.service.tile(
            &chi2,
            &TileStyle { min: 0.0, max: 10000.0, opacity: 0.7, palette: None },
        )?;

        Ok(MadReport {
            title: "Chi Square Image".to_string(),
            map,
            view: MapView::new(region, self.config.zoom),
            platform,
            iterations: state.done(),
            first: AcquisitionSummary {
                system_id: handle1.id.clone(),
                cloud_cover: handle1.number(quality),
                timestamp: acquisition_time(handle1.time_start)?,
            },
            second: AcquisitionSummary {
                system_id: handle2.id.clone(),
                cloud_cover: handle2.number(quality),
                timestamp: acquisition_time(handle2.time_start)?,
            },
            correlations: correlations.rows(),
            exports,
        })
    }

    /// Sequential omnibus change maps over a Sentinel-1 series
    pub fn omnibus(&self, request: &OmnibusRequest) -> ChangeResult<OmnibusReport> {
        let region = &request.query.selection.region;
        let series = match SeriesResolver::new(&self.service).sentinel1_series(&request.query) {
            Err(ChangeError::EmptySeries(_)) => {
                return Err(ChangeError::InsufficientSeries { found: 0, required: 2 })
            }
            other => other?,
        };

        let clipped = ClippedSeries::from_series(&series, request.query.polarization, region)?;
        let layers = interpret(&self.omnibus, &clipped, request.significance, request.use_median)?;

        let download_url =
            self.service.download_url(&layers.stack, self.config.download_scale, None)?;
        let exports = self.dispatcher().dispatch(
            &layers.stack,
            request.exports.asset.as_ref(),
            request.exports.drive.as_ref(),
            None,
        )?;

        let (layer, style) = layers.display(request.display)?;
        let map = self.service.tile(&layer, &style)?;
        let first = series.first();

        Ok(OmnibusReport {
            title: request.display.title().to_string(),
            map,
            view: MapView::new(region, self.config.zoom),
            projection: first.crs.clone(),
            system_id: first.id.clone(),
            count: layers.count(),
            download_url,
            timestamp: layers.labels[0].clone(),
            timestamps: layers.labels.clone(),
            layer_names: layers.layer_names().to_vec(),
            polarization: request.query.polarization.to_string(),
            relative_orbits: series.relative_orbits(),
            significance: request.significance,
            use_median: request.use_median,
            exports,
        })
    }

    pub fn handle_sentinel1(&self, form: &FormFields, defaults: &SessionDefaults) -> Outcome<Sentinel1Report> {
        let result = Sentinel1Request::from_form(form).and_then(|r| self.sentinel1(&r));
        Outcome::assemble("Sentinel1", result, defaults)
    }

    pub fn handle_sentinel2(&self, form: &FormFields, defaults: &SessionDefaults) -> Outcome<Sentinel2Report> {
        let result = Sentinel2Request::from_form(form).and_then(|r| self.sentinel2(&r));
        Outcome::assemble("Sentinel2", result, defaults)
    }

    pub fn handle_mad(&self, form: &FormFields, defaults: &SessionDefaults) -> Outcome<MadReport> {
        let result = MadRequest::from_form(form).and_then(|r| self.mad(&r));
        Outcome::assemble("MAD", result, defaults)
    }

    pub fn handle_omnibus(&self, form: &FormFields, defaults: &SessionDefaults) -> Outcome<OmnibusReport> {
        let result = OmnibusRequest::from_form(form).and_then(|r| self.omnibus(&r));
        Outcome::assemble("omnibus", result, defaults)
    }
}
