//! Run configuration: every external input of one classification run

use crate::core::area::{AreaParams, OverflowPolicy};
use crate::core::classifier::SvmParams;
use crate::core::composite::{CompositeParams, DateRange};
use crate::core::indices::{IndexComputer, IndexDefinition};
use crate::core::region::Region;
use crate::core::sampling::SamplingParams;
use crate::types::{ClassInfo, LabeledPoint, LandCoverClass, LulcError, LulcResult, CLASS_COUNT, FEATURE_COUNT};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Labeled reference point as written in configuration files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointConfig {
    pub lon: f64,
    pub lat: f64,
    pub class: u8,
}

/// Complete input of a classification run, loadable from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Region ring as [longitude, latitude] pairs
    pub region: Vec<[f64; 2]>,
    /// ISO 8601 start (inclusive)
    pub start: String,
    /// ISO 8601 end (exclusive)
    pub end: String,
    /// Source collection identifier
    pub collection: String,
    /// Bands to composite; empty composites the bands the indices need
    pub bands: Vec<String>,
    pub indices: Vec<IndexDefinition>,
    pub labeled_points: Vec<PointConfig>,
    pub classifier: SvmParams,
    /// Sampling and reduction scale in meters
    pub scale_m: f64,
    /// Pixel cap for the area reduction
    pub max_pixels: u64,
    pub overflow: OverflowPolicy,
    /// Fraction of samples withheld for independent validation
    pub holdout_fraction: Option<f64>,
    /// Class table: label id, name, display color
    pub classes: Vec<ClassInfo>,
}

impl Default for RunConfig {
    /// Reference run over Haridwar, Sentinel-2 L1C, calendar year 2023
    fn default() -> Self {
        let point = |lon, lat, class| PointConfig { lon, lat, class };
        Self {
            region: vec![
                [78.130, 30.020],
                [78.130, 29.880],
                [78.250, 29.880],
                [78.250, 30.020],
                [78.130, 30.020],
            ],
            start: "2023-01-01".to_string(),
            end: "2023-12-31".to_string(),
            collection: "COPERNICUS/S2".to_string(),
            bands: Vec::new(),
            indices: IndexDefinition::sentinel2_defaults().to_vec(),
            labeled_points: vec![
                point(78.18, 29.95, 0),
                point(78.20, 29.97, 1),
                point(78.19, 29.92, 2),
                point(78.15, 29.93, 3),
                point(78.22, 29.96, 4),
            ],
            classifier: SvmParams::default(),
            scale_m: 30.0,
            max_pixels: 1_000_000_000,
            overflow: OverflowPolicy::Error,
            holdout_fraction: None,
            classes: vec![
                ClassInfo::new(LandCoverClass::NonForest, "red"),
                ClassInfo::new(LandCoverClass::Forest, "green"),
                ClassInfo::new(LandCoverClass::Urban, "yellow"),
                ClassInfo::new(LandCoverClass::Water, "blue"),
                ClassInfo::new(LandCoverClass::BareLand, "brown"),
            ],
        }
    }
}

impl RunConfig {
    pub fn from_json_str(json: &str) -> LulcResult<Self> {
        let config: RunConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> LulcResult<Self> {
        log::info!("Loading run configuration from {}", path.as_ref().display());
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> LulcResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations that cannot describe a run
    pub fn validate(&self) -> LulcResult<()> {
        self.region()?;
        self.date_range()?;
        self.labeled_points()?;
        self.index_definitions()?;

        if !(self.scale_m.is_finite() && self.scale_m > 0.0) {
            return Err(LulcError::Config(format!("scale_m must be positive, got {}", self.scale_m)));
        }
        if self.max_pixels == 0 {
            return Err(LulcError::Config("max_pixels must be at least 1".to_string()));
        }
        if let Some(f) = self.holdout_fraction {
            if !(f > 0.0 && f < 1.0) {
                return Err(LulcError::Config(format!("holdout_fraction must be in (0, 1), got {}", f)));
            }
        }
        self.classifier
            .validate()
            .map_err(|e| LulcError::Config(e.to_string()))?;

        if self.classes.len() != CLASS_COUNT {
            return Err(LulcError::Config(format!(
                "Class table needs {} entries, got {}",
                CLASS_COUNT,
                self.classes.len()
            )));
        }
        for class in LandCoverClass::ALL {
            let matches = self.classes.iter().filter(|c| c.id == class.label()).count();
            if matches != 1 {
                return Err(LulcError::Config(format!(
                    "Class id {} must appear exactly once in the class table, found {}",
                    class.label(),
                    matches
                )));
            }
        }
        if let Some(c) = self.classes.iter().find(|c| c.name.trim().is_empty() || c.color.trim().is_empty()) {
            return Err(LulcError::Config(format!("Class id {} needs a name and a color", c.id)));
        }
        Ok(())
    }

    pub fn region(&self) -> LulcResult<Region> {
        let vertices: Vec<(f64, f64)> = self.region.iter().map(|v| (v[0], v[1])).collect();
        Region::new(&vertices)
    }

    pub fn date_range(&self) -> LulcResult<DateRange> {
        DateRange::parse(&self.start, &self.end)
    }

    pub fn labeled_points(&self) -> LulcResult<Vec<LabeledPoint>> {
        if self.labeled_points.is_empty() {
            return Err(LulcError::Config("No labeled points configured".to_string()));
        }
        self.labeled_points
            .iter()
            .map(|p| {
                if !p.lon.is_finite() || !p.lat.is_finite() {
                    return Err(LulcError::Config(format!("Labeled point ({}, {}) is not finite", p.lon, p.lat)));
                }
                let class = LandCoverClass::from_label(p.class)
                    .ok_or_else(|| LulcError::Config(format!("Unknown class label {}", p.class)))?;
                Ok(LabeledPoint::new(p.lon, p.lat, class))
            })
            .collect()
    }

    pub fn index_definitions(&self) -> LulcResult<[IndexDefinition; FEATURE_COUNT]> {
        self.indices.clone().try_into().map_err(|v: Vec<IndexDefinition>| {
            LulcError::Config(format!("Exactly {} indices are required, got {}", FEATURE_COUNT, v.len()))
        })
    }

    pub fn composite_params(&self) -> LulcResult<CompositeParams> {
        let bands = if self.bands.is_empty() {
            IndexComputer::new(self.index_definitions()?).required_bands()
        } else {
            self.bands.clone()
        };
        Ok(CompositeParams { collection: self.collection.clone(), bands })
    }

    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams { scale_m: self.scale_m }
    }

    pub fn area_params(&self) -> AreaParams {
        AreaParams {
            scale_m: self.scale_m,
            max_pixels: self.max_pixels,
            overflow: self.overflow,
        }
    }

    pub fn class_info(&self, class: LandCoverClass) -> Option<&ClassInfo> {
        self.classes.iter().find(|c| c.id == class.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_reference_run() {
        let config = RunConfig::default();
        config.validate().unwrap();
        assert_eq!(config.labeled_points().unwrap().len(), 5);
        assert_eq!(config.class_info(LandCoverClass::Water).unwrap().color, "blue");
        assert_eq!(
            config.composite_params().unwrap().bands,
            vec!["B11".to_string(), "B3".to_string(), "B4".to_string(), "B8".to_string()]
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = RunConfig::from_json_str(
            r#"{
                "start": "2022-01-01",
                "end": "2022-07-01",
                "classifier": {"kernel": "RBF", "gamma": 1.5},
                "max_pixels": 5000,
                "overflow": "best_effort"
            }"#,
        )
        .unwrap();
        assert_eq!(config.classifier.gamma, 1.5);
        assert_eq!(config.overflow, OverflowPolicy::BestEffort);
        assert_eq!(config.area_params().max_pixels, 5000);
        assert_eq!(config.scale_m, 30.0);
    }

    #[test]
    fn test_invalid_configs() {
        let bad_class = r#"{"labeled_points": [{"lon": 78.2, "lat": 29.9, "class": 9}]}"#;
        assert!(matches!(RunConfig::from_json_str(bad_class), Err(LulcError::Config(_))));

        let bad_dates = r#"{"start": "2023-06-01", "end": "2023-01-01"}"#;
        assert!(matches!(RunConfig::from_json_str(bad_dates), Err(LulcError::Config(_))));

        let bad_gamma = r#"{"classifier": {"gamma": -1.0}}"#;
        assert!(matches!(RunConfig::from_json_str(bad_gamma), Err(LulcError::Config(_))));

        let two_indices = r#"{"indices": [{"name": "NDVI", "band_a": "B8", "band_b": "B4"}]}"#;
        assert!(matches!(RunConfig::from_json_str(two_indices), Err(LulcError::Config(_))));

        let bad_region = r#"{"region": [[0.0, 0.0], [1.0, 1.0]]}"#;
        assert!(matches!(RunConfig::from_json_str(bad_region), Err(LulcError::InvalidGeometry(_))));

        assert!(matches!(RunConfig::from_json_str("{not json"), Err(LulcError::Json(_))));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = RunConfig { holdout_fraction: Some(0.25), ..RunConfig::default() };
        let json = config.to_json_pretty().unwrap();
        assert_eq!(RunConfig::from_json_str(&json).unwrap(), config);
    }
}
