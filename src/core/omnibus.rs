//! Sequential omnibus change detection
//!
//! The omnibus likelihood-ratio test runs once over a whole clipped series and
//! answers, per pixel, when change last happened, when it first happened, how
//! often it happened, and whether it happened in each consecutive interval.
//! This module turns that verdict into one labeled, exportable layer stack.

use crate::core::labels::timestamp_labels;
use crate::io::resolver::ImageSeries;
use crate::types::{
    BoundingBox, ChangeError, ChangeResult, EpochMillis, Expr, PolarizationMode, Raster, TileStyle,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Five-color ramp shared by all change maps
pub const CHANGE_PALETTE: &str = "black,blue,cyan,yellow,red";

pub const LAST_CHANGE: &str = "lastChange";
pub const FIRST_CHANGE: &str = "firstChange";
pub const FREQUENCY: &str = "frequency";

/// Ordered images clipped to the region of interest; at least two
#[derive(Debug, Clone, PartialEq)]
pub struct ClippedSeries {
    images: Vec<Raster>,
    timestamps: Vec<EpochMillis>,
}

impl ClippedSeries {
    pub fn new(images: Vec<Raster>, timestamps: Vec<EpochMillis>) -> ChangeResult<Self> {
        if images.len() != timestamps.len() {
            return Err(ChangeError::Validation(format!(
                "{} image(s) but {} timestamp(s)",
                images.len(),
                timestamps.len()
            )));
        }
        if images.len() < 2 {
            return Err(ChangeError::InsufficientSeries { found: images.len(), required: 2 });
        }
        Ok(Self { images, timestamps })
    }

    /// Select the polarization bands, restore linear intensity from dB and clip
    pub fn from_series(
        series: &ImageSeries,
        polarization: PolarizationMode,
        region: &BoundingBox,
    ) -> ChangeResult<Self> {
        let bands = polarization.bands();
        let band_refs: Vec<&str> = bands.iter().map(String::as_str).collect();
        let images = series
            .images()
            .iter()
            .map(|image| Ok(image.raster().select(&band_refs)?.db_to_linear().clip(region)))
            .collect::<ChangeResult<Vec<_>>>()?;
        Self::new(images, series.timestamps())
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[Raster] {
        &self.images
    }

    pub fn timestamps(&self) -> &[EpochMillis] {
        &self.timestamps
    }

    pub fn to_expr(&self) -> Expr {
        Expr::List { items: self.images.iter().map(|r| r.expr().clone()).collect() }
    }
}

/// Per-pixel answer of the omnibus test
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeVerdict {
    pub last_change: Raster,
    pub first_change: Raster,
    pub frequency: Raster,
    /// One layer per consecutive acquisition pair
    pub interval_changes: Vec<Raster>,
}

/// Sequential omnibus test kernel; pure and deterministic
pub trait OmnibusKernel {
    fn evaluate(
        &self,
        series: &ClippedSeries,
        significance: f64,
        use_median: bool,
    ) -> ChangeResult<ChangeVerdict>;
}

/// Kernel evaluated by the compute service's `omnibus` function
#[derive(Debug, Clone, Default)]
pub struct RemoteOmnibusKernel;

impl OmnibusKernel for RemoteOmnibusKernel {
    fn evaluate(
        &self,
        series: &ClippedSeries,
        significance: f64,
        use_median: bool,
    ) -> ChangeResult<ChangeVerdict> {
        let result = Expr::invoke(
            "omnibus",
            [
                ("images", series.to_expr()),
                ("significance", Expr::literal(significance)),
                ("median", Expr::literal(use_median)),
            ],
        )
        .shared();

        let intervals = series.len() - 1;
        let bmap_bands = (1..=intervals).map(|i| format!("bmap{}", i)).collect();
        let bmap = Raster::new(result.get("bmap"), bmap_bands);
        let interval_changes = (0..intervals)
            .map(|i| bmap.select_index(i))
            .collect::<ChangeResult<Vec<_>>>()?;

        Ok(ChangeVerdict {
            last_change: Raster::new(result.get("cmap"), vec!["cmap".to_string()]),
            first_change: Raster::new(result.get("smap"), vec!["smap".to_string()]),
            frequency: Raster::new(result.get("fmap"), vec!["fmap".to_string()]),
            interval_changes,
        })
    }
}

/// Which change map is rendered as tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisplayVariant {
    #[default]
    LastChange,
    FirstChange,
    Frequency,
}

impl DisplayVariant {
    /// `fmap`/`frequency` and `smap`/`firstChange` select those maps; anything
    /// else shows the last change map
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "fmap" | "frequency" => DisplayVariant::Frequency,
            "smap" | "firstChange" => DisplayVariant::FirstChange,
            _ => DisplayVariant::LastChange,
        }
    }

    pub fn layer_name(&self) -> &'static str {
        match self {
            DisplayVariant::LastChange => LAST_CHANGE,
            DisplayVariant::FirstChange => FIRST_CHANGE,
            DisplayVariant::Frequency => FREQUENCY,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            DisplayVariant::LastChange => "Sequential omnibus last change map",
            DisplayVariant::FirstChange => "Sequential omnibus first change map",
            DisplayVariant::Frequency => "Sequential omnibus frequency map",
        }
    }

    /// Display range `[0, count]`, or `[0, count / 2]` for frequency
    pub fn style(&self, count: usize) -> TileStyle {
        let max = match self {
            DisplayVariant::Frequency => (count / 2) as f64,
            _ => count as f64,
        };
        TileStyle { min: 0.0, max, opacity: 0.4, palette: Some(CHANGE_PALETTE.to_string()) }
    }
}

/// Interpreted verdict: all maps stacked into one byte raster
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeLayers {
    /// `lastChange, firstChange, frequency`, then one layer per interval
    pub stack: Raster,
    /// Labels of every acquisition, reference image included
    pub labels: Vec<String>,
    pub verdict: ChangeVerdict,
    count: usize,
}

impl ChangeLayers {
    pub fn layer_names(&self) -> &[String] {
        self.stack.bands()
    }

    pub fn interval_count(&self) -> usize {
        self.verdict.interval_changes.len()
    }

    /// Number of acquisitions in the interpreted series
    pub fn count(&self) -> usize {
        self.count
    }

    /// The single layer and style rendered for `variant`
    pub fn display(&self, variant: DisplayVariant) -> ChangeResult<(Raster, TileStyle)> {
        let layer = self.stack.select(&[variant.layer_name()])?;
        Ok((layer, variant.style(self.count)))
    }
}

fn single_band(raster: &Raster, what: &str) -> ChangeResult<Raster> {
    if raster.band_count() != 1 {
        return Err(ChangeError::RemoteService(format!(
            "Omnibus {} has {} band(s), expected 1",
            what,
            raster.band_count()
        )));
    }
    Ok(raster.to_byte())
}

/// Evaluate the omnibus test once over `series` and stack its verdict.
///
/// Layers are named `lastChange`, `firstChange`, `frequency`, followed by the
/// timestamp labels of acquisitions 2..m (the first acquisition is the
/// reference and has no interval layer).
pub fn interpret<K: OmnibusKernel + ?Sized>(
    kernel: &K,
    series: &ClippedSeries,
    significance: f64,
    use_median: bool,
) -> ChangeResult<ChangeLayers> {
    if series.len() < 2 {
        return Err(ChangeError::InsufficientSeries { found: series.len(), required: 2 });
    }
    if !(significance > 0.0 && significance < 1.0) {
        return Err(ChangeError::Validation(format!(
            "Significance must lie in (0, 1), got {}",
            significance
        )));
    }

    let labels = timestamp_labels(series.timestamps())?;

    log::info!(
        "Running sequential omnibus test on {} images (alpha = {}, median = {})",
        series.len(),
        significance,
        use_median
    );
    let verdict = kernel.evaluate(series, significance, use_median)?;

    let expected = series.len() - 1;
    if verdict.interval_changes.len() != expected {
        return Err(ChangeError::RemoteService(format!(
            "Omnibus returned {} interval map(s) for {} images, expected {}",
            verdict.interval_changes.len(),
            series.len(),
            expected
        )));
    }

    let mut layers = vec![
        single_band(&verdict.last_change, "last change map")?,
        single_band(&verdict.first_change, "first change map")?,
        single_band(&verdict.frequency, "frequency map")?,
    ];
    for interval in &verdict.interval_changes {
        layers.push(single_band(interval, "interval map")?);
    }

    let mut names: Vec<String> =
        [LAST_CHANGE, FIRST_CHANGE, FREQUENCY].iter().map(|s| s.to_string()).collect();
    names.extend(labels[1..].iter().cloned());

    let mut seen = HashSet::new();
    if let Some(dup) = names.iter().find(|n| !seen.insert(n.as_str())) {
        return Err(ChangeError::RemoteService(format!("Duplicate layer name: {}", dup)));
    }

    let stack = Raster::concat(&layers).rename(names)?;
    log::debug!("Change layers: {:?}", stack.bands());

    Ok(ChangeLayers { stack, labels, verdict, count: series.len() })
}
