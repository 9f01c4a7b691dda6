//! Change detection workflows

pub mod selector;
pub mod labels;
pub mod imad;
pub mod omnibus;
pub mod response;
pub mod workflow;

// Re-export main types
pub use selector::{FormFields, PairSelection, Selection, SessionDefaults};
pub use labels::{acquisition_time, timestamp_labels};
pub use imad::{accumulate, CorrelationTable, IterationState, PairwiseKernel, RemoteImadKernel, StepOutput};
pub use omnibus::{interpret, ChangeLayers, ChangeVerdict, ClippedSeries, DisplayVariant, OmnibusKernel, RemoteOmnibusKernel};
pub use response::{ErrorKind, MadReport, MapView, OmnibusReport, Outcome, Sentinel1Report, Sentinel2Report};
pub use workflow::{ChangeDetector, ExportOptions, MadRequest, OmnibusRequest, Sentinel1Request, Sentinel2Request};
