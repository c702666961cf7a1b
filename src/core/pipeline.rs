//! End-to-end land-cover classification run

use crate::config::RunConfig;
use crate::core::area::{AreaAggregator, ClassAreaResult, PixelAreaProvider, SphericalPixelArea};
use crate::core::classifier::{ClassifiedRaster, SvmClassifier, TrainedClassifier};
use crate::core::composite::ImageCompositor;
use crate::core::indices::{IndexComputer, IndexStack};
use crate::core::region::AnalysisGrid;
use crate::core::report::{self, MapSink, ReportSink};
use crate::core::sampling::{split_holdout, DroppedPoint, SampleExtraction, TrainingSampleExtractor};
use crate::core::validation::{ValidationReport, Validator};
use crate::io::SceneSource;
use crate::types::{LulcResult, SampleRow};
use serde::Serialize;

/// Everything one run produces
#[derive(Debug, Clone)]
pub struct LulcProduct {
    pub grid: AnalysisGrid,
    /// Scenes that entered the composite, in acquisition order
    pub scene_ids: Vec<String>,
    pub stack: IndexStack,
    pub samples: SampleExtraction,
    /// Rows the classifier was trained on (all samples unless a hold-out was requested)
    pub training: Vec<SampleRow>,
    pub holdout: Vec<SampleRow>,
    pub model: TrainedClassifier,
    pub training_validation: ValidationReport,
    pub holdout_validation: Option<ValidationReport>,
    pub classified: ClassifiedRaster,
    pub areas: ClassAreaResult,
}

/// Serializable digest of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSummary<'a> {
    pub scene_ids: &'a [String],
    pub grid_rows: usize,
    pub grid_cols: usize,
    pub scale_m: f64,
    pub index_names: &'a [String],
    pub sample_count: usize,
    pub training_count: usize,
    pub dropped_points: &'a [DroppedPoint],
    pub support_vectors: usize,
    pub training_validation: &'a ValidationReport,
    pub training_accuracy: f64,
    pub training_kappa: f64,
    pub holdout_validation: Option<&'a ValidationReport>,
    pub classified_pixels: usize,
    pub areas: &'a ClassAreaResult,
}

impl LulcProduct {
    pub fn summary(&self) -> ProductSummary<'_> {
        let (grid_rows, grid_cols) = self.grid.dim();
        ProductSummary {
            scene_ids: &self.scene_ids,
            grid_rows,
            grid_cols,
            scale_m: self.grid.scale_m(),
            index_names: self.stack.names(),
            sample_count: self.samples.rows.len(),
            training_count: self.training.len(),
            dropped_points: &self.samples.dropped,
            support_vectors: self.model.support_vector_count(),
            training_validation: &self.training_validation,
            training_accuracy: self.training_validation.accuracy(),
            training_kappa: self.training_validation.kappa(),
            holdout_validation: self.holdout_validation.as_ref(),
            classified_pixels: self.classified.valid_pixel_count(),
            areas: &self.areas,
        }
    }

    pub fn to_json(&self) -> LulcResult<String> {
        Ok(serde_json::to_string_pretty(&self.summary())?)
    }

    /// Validation reports in the order they were computed
    pub fn validations(&self) -> Vec<&ValidationReport> {
        std::iter::once(&self.training_validation)
            .chain(self.holdout_validation.as_ref())
            .collect()
    }
}

/// Composite, indices, sampling, training, validation, classification and
/// area aggregation for one validated configuration
pub struct LandCoverPipeline {
    config: RunConfig,
}

impl LandCoverPipeline {
    pub fn new(config: RunConfig) -> LulcResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn run(&self, source: &dyn SceneSource) -> LulcResult<LulcProduct> {
        self.run_with_area_provider(source, &SphericalPixelArea::default())
    }

    pub fn run_with_area_provider(
        &self,
        source: &dyn SceneSource,
        pixel_area: &dyn PixelAreaProvider,
    ) -> LulcResult<LulcProduct> {
        let config = &self.config;
        let region = config.region()?;
        let range = config.date_range()?;
        let grid = AnalysisGrid::for_region(&region, config.scale_m)?;
        log::info!(
            "Starting land-cover run: {} x {} grid at {} m, {} to {}",
            grid.dim().0, grid.dim().1, config.scale_m, range.start, range.end
        );

        // Step 1: median composite
        let composite = ImageCompositor::new(config.composite_params()?).composite(source, &region, &range, &grid)?;
        log::info!("Composite built from {} scenes", composite.scene_ids().len());

        // Step 2: spectral indices
        let stack = IndexComputer::new(config.index_definitions()?).compute(&composite)?;

        // Step 3: training samples
        let points = config.labeled_points()?;
        let samples = TrainingSampleExtractor::new(config.sampling_params()).extract(&stack, &region, &points)?;
        let (training, holdout) = match config.holdout_fraction {
            Some(fraction) => split_holdout(&samples.rows, fraction)?,
            None => (samples.rows.clone(), Vec::new()),
        };

        // Step 4: train and validate
        let model = SvmClassifier::new(config.classifier.clone()).train(&training)?;
        let training_validation = Validator::resubstitution(&model, &training);
        let holdout_validation = if holdout.is_empty() {
            if config.holdout_fraction.is_some() {
                log::warn!("Hold-out split left no samples to validate on");
            }
            None
        } else {
            Some(Validator::holdout(&model, &holdout))
        };

        // Step 5: classify the region
        let classified = model.classify(&stack, &region);

        // Step 6: per-class areas
        let areas = AreaAggregator::new(config.area_params()).aggregate(&classified, &region, pixel_area)?;
        if areas.approximate {
            log::warn!("Class areas were computed at a coarsened scale of {} m", areas.scale_m);
        }
        log::info!("Land-cover run completed: {:.4} km² classified", areas.total_valid_km2);

        Ok(LulcProduct {
            grid,
            scene_ids: composite.scene_ids().to_vec(),
            stack,
            samples,
            training,
            holdout,
            model,
            training_validation,
            holdout_validation,
            classified,
            areas,
        })
    }

    /// Send a finished product to the reporting and map sinks
    pub fn publish(
        &self,
        product: &LulcProduct,
        reports: &mut dyn ReportSink,
        map: Option<&mut dyn MapSink>,
    ) -> LulcResult<()> {
        report::report_results(reports, &self.config.classes, &product.validations(), &product.areas)?;
        if let Some(map) = map {
            report::render_map(map, &self.config.classes, &product.classified)?;
        }
        Ok(())
    }
}
