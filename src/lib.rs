//! lulcsat: supervised land-use/land-cover classification of Sentinel-2 composites
//!
//! Builds a median composite over a region and date range, derives NDVI, NDBI
//! and MNDWI, trains an RBF support vector classifier on labeled reference
//! points, reports confusion-matrix accuracy and kappa, and aggregates the
//! classified map into per-class areas in km².

pub mod types;
pub mod config;
pub mod io;
pub mod core;

// Re-export main types and entry points
pub use types::{
    BandImage, BoundingBox, ClassInfo, GeoPoint, GeoTransform, LabeledPoint, LandCoverClass,
    LulcError, LulcResult, SampleRow, SceneInfo, CLASS_NODATA,
};
pub use config::RunConfig;
pub use io::{MemorySceneSource, SafeArchiveSource, SceneSource};
pub use crate::core::{LandCoverPipeline, LulcProduct};

#[cfg(feature = "python")]
mod python {
    use crate::core::indices;
    use crate::{LandCoverPipeline, LulcError, RunConfig, SafeArchiveSource};
    use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;

    impl From<LulcError> for PyErr {
        fn from(err: LulcError) -> PyErr {
            match err {
                LulcError::Config(_) | LulcError::InvalidGeometry(_) | LulcError::Json(_) => {
                    PyValueError::new_err(err.to_string())
                }
                other => PyRuntimeError::new_err(other.to_string()),
            }
        }
    }

    /// Convert PyReadonlyArray2 to ndarray Array2
    fn numpy_to_array2(arr: PyReadonlyArray2<f32>) -> ndarray::Array2<f32> {
        arr.as_array().to_owned()
    }

    /// (a - b) / (a + b) per pixel, NaN where undefined
    #[pyfunction]
    fn normalized_difference<'py>(
        py: Python<'py>,
        band_a: PyReadonlyArray2<f32>,
        band_b: PyReadonlyArray2<f32>,
    ) -> PyResult<&'py PyArray2<f32>> {
        let a = numpy_to_array2(band_a);
        let b = numpy_to_array2(band_b);
        let index = py.allow_threads(|| indices::normalized_difference(&a, &b))?;
        Ok(index.into_pyarray(py))
    }

    /// Run a classification over a directory of product archives; returns the JSON summary
    #[pyfunction]
    fn run_pipeline(py: Python, config_json: String, archive_dir: String) -> PyResult<String> {
        py.allow_threads(|| {
            let config = RunConfig::from_json_str(&config_json)?;
            let source = SafeArchiveSource::open_dir(&archive_dir)?;
            let pipeline = LandCoverPipeline::new(config)?;
            let product = pipeline.run(&source)?;
            Ok(product.to_json()?)
        })
    }

    /// Reference run configuration as JSON
    #[pyfunction]
    fn default_config() -> PyResult<String> {
        Ok(RunConfig::default().to_json_pretty()?)
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(normalized_difference, m)?)?;
        m.add_function(wrap_pyfunction!(run_pipeline, m)?)?;
        m.add_function(wrap_pyfunction!(default_config, m)?)?;
        m.add("__version__", env!("CARGO_PKG_VERSION"))?;
        Ok(())
    }
}
