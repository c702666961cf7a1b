//! Core land-cover processing modules

pub mod region;
pub mod composite;
pub mod indices;
pub mod sampling;
pub mod classifier;
pub mod validation;
pub mod area;
pub mod report;
pub mod pipeline;

// Re-export main types
pub use region::{AnalysisGrid, Region, METERS_PER_DEGREE};
pub use composite::{CompositeImage, CompositeParams, DateRange, ImageCompositor};
pub use indices::{normalized_difference, IndexComputer, IndexDefinition, IndexStack};
pub use sampling::{split_holdout, DropReason, DroppedPoint, SampleExtraction, SamplingParams, TrainingSampleExtractor};
pub use classifier::{ClassifiedRaster, KernelType, SvmClassifier, SvmParams, TrainedClassifier};
pub use validation::{ConfusionMatrix, ValidationKind, ValidationReport, Validator};
pub use area::{AreaAggregator, AreaParams, ClassArea, ClassAreaResult, OverflowPolicy, PixelAreaProvider, SphericalPixelArea};
pub use report::{check_legend_consistency, legend_rows, palette, LegendMismatch, LegendRow, LogReportSink, MapSink, ReportSink};
pub use pipeline::{LandCoverPipeline, LulcProduct, ProductSummary};
