//! Python bindings (`changemap._core`)

use crate::config::ServiceConfig;
use crate::core::imad::CorrelationTable;
use crate::core::labels;
use crate::core::response::Outcome;
use crate::core::selector::{FormFields, SessionDefaults};
use crate::core::workflow::ChangeDetector;
use crate::io::remote::HttpComputeService;
use crate::types::ChangeError;
use numpy::{IntoPyArray, PyArray2};
use pyo3::prelude::*;
use serde::Serialize;
use std::collections::HashMap;

fn runtime_error(e: ChangeError) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e))
}

fn value_error(e: ChangeError) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(timestamp_labels, m)?)?;
    m.add_function(wrap_pyfunction!(correlation_table, m)?)?;
    m.add_class::<PyChangeDetector>()?;
    Ok(())
}

/// `T<YYYYMMDD>_<n>` labels for millisecond timestamps
#[pyfunction]
fn timestamp_labels(timestamps: Vec<i64>) -> PyResult<Vec<String>> {
    labels::timestamp_labels(&timestamps).map_err(value_error)
}

/// Correlation history (JSON rows) as a passes x bands array
#[pyfunction]
fn correlation_table<'py>(py: Python<'py>, rows: &str) -> PyResult<&'py PyArray2<f64>> {
    let value: serde_json::Value = serde_json::from_str(rows).map_err(|e| value_error(e.into()))?;
    let table = CorrelationTable::from_json(&value).map_err(value_error)?;
    Ok(table.0.into_pyarray(py))
}

/// One browsing session against the compute service.
///
/// Form defaults are remembered per session object: a successful request
/// moves the default region to the one just processed.
#[pyclass(name = "ChangeDetector")]
struct PyChangeDetector {
    inner: ChangeDetector<HttpComputeService>,
    defaults: SessionDefaults,
}

impl PyChangeDetector {
    fn finish<T: Serialize>(&mut self, outcome: Outcome<T>) -> PyResult<String> {
        if let Outcome::Success { defaults, .. } = &outcome {
            self.defaults = defaults.clone();
        }
        outcome.to_json().map_err(runtime_error)
    }
}

#[pymethods]
impl PyChangeDetector {
    /// Connect using a JSON config file, or the default config location
    #[new]
    #[pyo3(signature = (config_path=None))]
    fn new(config_path: Option<String>) -> PyResult<Self> {
        let config = match config_path {
            Some(path) => ServiceConfig::load_from(std::path::Path::new(&path))
                .map(ServiceConfig::with_env_overrides),
            None => ServiceConfig::load(),
        }
        .map_err(value_error)?;
        let service = HttpComputeService::new(&config).map_err(runtime_error)?;

        Ok(PyChangeDetector {
            inner: ChangeDetector::new(service, config),
            defaults: SessionDefaults::default(),
        })
    }

    /// Current form defaults as JSON
    #[getter]
    fn defaults(&self) -> PyResult<String> {
        serde_json::to_string(&self.defaults).map_err(|e| runtime_error(e.into()))
    }

    fn sentinel1(&mut self, form: HashMap<String, String>) -> PyResult<String> {
        let outcome = self.inner.handle_sentinel1(&FormFields::new(form), &self.defaults);
        self.finish(outcome)
    }

    fn sentinel2(&mut self, form: HashMap<String, String>) -> PyResult<String> {
        let outcome = self.inner.handle_sentinel2(&FormFields::new(form), &self.defaults);
        self.finish(outcome)
    }

    fn mad(&mut self, form: HashMap<String, String>) -> PyResult<String> {
        let outcome = self.inner.handle_mad(&FormFields::new(form), &self.defaults);
        self.finish(outcome)
    }

    fn omnibus(&mut self, form: HashMap<String, String>) -> PyResult<String> {
        let outcome = self.inner.handle_omnibus(&FormFields::new(form), &self.defaults);
        self.finish(outcome)
    }

    fn __repr__(&self) -> String {
        format!("ChangeDetector(endpoint='{}')", self.inner.config().endpoint)
    }
}
