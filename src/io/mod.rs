//! Remote compute service access

pub mod remote;
pub mod resolver;
pub mod export;

pub use remote::{CollectionQuery, ComputeService, HttpComputeService};
pub use resolver::{ImageSeries, Sentinel1Query, SeriesResolver};
pub use export::{ExportDispatcher, ExportJob, ExportReceipts, ExportTarget};
