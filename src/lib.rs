//! changemap: Change Detection Orchestration for Remote Earth-Observation Archives
//!
//! Builds lazy raster expressions over a remote compute service and drives the
//! iteratively re-weighted MAD and sequential omnibus change detectors, from
//! form input through export submission to a presentation-ready outcome.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use crate::types::{
    BoundingBox, ChangeError, ChangeResult, DateWindow, EpochMillis, Expr, ExprGraph,
    ImageHandle, OrbitPass, Platform, Polarization, PolarizationMode, Raster, TileHandle,
    TileStyle,
};

pub use crate::config::ServiceConfig;
pub use crate::io::{ComputeService, ExportDispatcher, HttpComputeService, SeriesResolver};
pub use crate::core::{ChangeDetector, FormFields, Outcome, SessionDefaults};
