//! Region and time-window selection
//!
//! Turns the raw strings submitted by the browser form into validated query
//! parameters. Every malformed field surfaces as `ChangeError::Validation`
//! naming the offending field.

use crate::types::{BoundingBox, ChangeError, ChangeResult, DateWindow};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default zoom level of the result map
pub const DEFAULT_ZOOM: u8 = 10;

/// Raw form fields keyed by input name
#[derive(Debug, Clone, Default)]
pub struct FormFields {
    fields: HashMap<String, String>,
}

impl FormFields {
    pub fn new(fields: HashMap<String, String>) -> Self {
        Self { fields }
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.fields.insert(name.to_string(), value.to_string());
    }

    pub fn required(&self, name: &str) -> ChangeResult<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ChangeError::Validation(format!("Missing form field: {}", name)))
    }

    pub fn optional(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Checkbox semantics: present means checked
    pub fn flag(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

impl FromIterator<(String, String)> for FormFields {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Parse a calendar date (`YYYY-MM-DD`) or an RFC 3339 instant
pub fn parse_date(field: &str, value: &str) -> ChangeResult<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(DateTime::from_naive_utc_and_offset(midnight, Utc));
        }
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ChangeError::Validation(format!("Invalid date for {}: '{}' ({})", field, value, e)))
}

/// Parse a start/end pair into a window with `start < end`
pub fn parse_window(start: &str, end: &str) -> ChangeResult<DateWindow> {
    DateWindow::new(parse_date("startdate", start)?, parse_date("enddate", end)?)
}

pub fn parse_number(field: &str, value: &str) -> ChangeResult<f64> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| ChangeError::Validation(format!("Invalid number for {}: '{}'", field, value)))?;
    if !parsed.is_finite() {
        return Err(ChangeError::Validation(format!("Invalid number for {}: '{}'", field, value)));
    }
    Ok(parsed)
}

/// Export or download scale in meters per pixel
pub fn parse_scale(field: &str, value: &str) -> ChangeResult<f64> {
    let scale = parse_number(field, value)?;
    if scale <= 0.0 {
        return Err(ChangeError::Validation(format!("{} must be positive, got {}", field, scale)));
    }
    Ok(scale)
}

/// Number of refinement passes; at least one
pub fn parse_iterations(value: &str) -> ChangeResult<u32> {
    let n: u32 = value
        .trim()
        .parse()
        .map_err(|_| ChangeError::Validation(format!("Invalid iteration count: '{}'", value)))?;
    if n == 0 {
        return Err(ChangeError::Validation("Iteration count must be at least 1".to_string()));
    }
    Ok(n)
}

/// Significance level strictly inside (0, 1)
pub fn parse_significance(value: &str) -> ChangeResult<f64> {
    let alpha = parse_number("significance", value)?;
    if alpha <= 0.0 || alpha >= 1.0 {
        return Err(ChangeError::Validation(format!(
            "Significance must lie in (0, 1), got {}",
            alpha
        )));
    }
    Ok(alpha)
}

/// Empty input means "any relative orbit"
pub fn parse_relative_orbit(value: &str) -> ChangeResult<Option<u32>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| ChangeError::Validation(format!("Invalid relative orbit number: '{}'", value)))
}

/// Read `minLon`, `minLat`, `maxLon`, `maxLat` from the form
pub fn parse_bounds(form: &FormFields) -> ChangeResult<BoundingBox> {
    BoundingBox::new(
        parse_number("minLon", form.required("minLon")?)?,
        parse_number("minLat", form.required("minLat")?)?,
        parse_number("maxLon", form.required("maxLon")?)?,
        parse_number("maxLat", form.required("maxLat")?)?,
    )
}

/// Region plus a single acquisition window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub region: BoundingBox,
    pub window: DateWindow,
}

impl Selection {
    pub fn from_form(form: &FormFields) -> ChangeResult<Self> {
        Ok(Self {
            region: parse_bounds(form)?,
            window: parse_window(form.required("startdate")?, form.required("enddate")?)?,
        })
    }
}

/// Region plus the two windows compared by the pairwise workflow
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairSelection {
    pub region: BoundingBox,
    pub first: DateWindow,
    pub second: DateWindow,
}

impl PairSelection {
    pub fn from_form(form: &FormFields) -> ChangeResult<Self> {
        Ok(Self {
            region: parse_bounds(form)?,
            first: parse_window(form.required("startdate1")?, form.required("enddate1")?)?,
            second: parse_window(form.required("startdate2")?, form.required("enddate2")?)?,
        })
    }
}

/// Last-used region for pre-populating the next input form.
///
/// Supplied by the caller (cookie or client storage) and echoed back updated
/// with every successful response, so no process-wide state is involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDefaults {
    pub region: BoundingBox,
    pub center_lon: f64,
    pub center_lat: f64,
    pub zoom: u8,
    pub message: String,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            region: BoundingBox { min_lon: 8.444, max_lon: 8.682, min_lat: 49.985, max_lat: 50.078 },
            center_lon: 8.5,
            center_lat: 50.05,
            zoom: DEFAULT_ZOOM,
            message: "Choose a rectangular region".to_string(),
        }
    }
}

impl SessionDefaults {
    /// Defaults remembering `region` as the last selection
    pub fn with_region(&self, region: &BoundingBox) -> Self {
        let (center_lon, center_lat) = region.center();
        Self {
            region: *region,
            center_lon,
            center_lat,
            zoom: self.zoom,
            message: self.message.clone(),
        }
    }
}
