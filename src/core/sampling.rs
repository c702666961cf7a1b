use crate::core::indices::IndexStack;
use crate::core::region::{AnalysisGrid, Region};
use crate::types::{LabeledPoint, LandCoverClass, LulcError, LulcResult, SampleRow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sampling parameters
#[derive(Debug, Clone)]
pub struct SamplingParams {
    /// Ground-sampling distance in meters
    pub scale_m: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self { scale_m: 30.0 }
    }
}

/// Why a labeled point produced no sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// Point lies outside the region polygon
    OutsideRegion,
    /// Point lies outside the index stack's grid
    OutsideExtent,
    /// Pixel under the point has no valid index value
    NoData,
}

/// Labeled point that was skipped, with its input position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedPoint {
    pub index: usize,
    pub point: LabeledPoint,
    pub reason: DropReason,
}

/// Labeled feature table plus the points that could not be sampled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleExtraction {
    pub rows: Vec<SampleRow>,
    pub dropped: Vec<DroppedPoint>,
}

/// Evaluates the index stack at labeled reference coordinates
pub struct TrainingSampleExtractor {
    params: SamplingParams,
}

impl TrainingSampleExtractor {
    pub fn new(params: SamplingParams) -> Self {
        Self { params }
    }

    /// Sample every point in input order. Points outside the region or the
    /// stack extent, or on no-data pixels, are dropped with a warning.
    pub fn extract(&self, stack: &IndexStack, region: &Region, points: &[LabeledPoint]) -> LulcResult<SampleExtraction> {
        let sampling_grid = if (self.params.scale_m - stack.grid().scale_m()).abs() < f64::EPSILON {
            stack.grid().clone()
        } else {
            AnalysisGrid::for_region(region, self.params.scale_m)?
        };

        let mut rows = Vec::with_capacity(points.len());
        let mut dropped = Vec::new();

        for (index, point) in points.iter().enumerate() {
            match self.sample_point(stack, region, &sampling_grid, point) {
                Ok(row) => rows.push(row),
                Err(reason) => {
                    log::warn!(
                        "Dropping labeled point #{} ({}, {}) class {}: {:?}",
                        index, point.location.lon, point.location.lat, point.class, reason
                    );
                    dropped.push(DroppedPoint { index, point: *point, reason });
                }
            }
        }

        log::info!("Extracted {} samples, dropped {} points", rows.len(), dropped.len());
        if rows.is_empty() {
            return Err(LulcError::TrainingEmpty { dropped: dropped.len() });
        }
        Ok(SampleExtraction { rows, dropped })
    }

    fn sample_point(
        &self,
        stack: &IndexStack,
        region: &Region,
        sampling_grid: &AnalysisGrid,
        point: &LabeledPoint,
    ) -> Result<SampleRow, DropReason> {
        let (lon, lat) = (point.location.lon, point.location.lat);
        if !region.contains(lon, lat) {
            return Err(DropReason::OutsideRegion);
        }
        // snap to the center of the sampling pixel, then read the stack there
        let (row, col) = sampling_grid.locate(lon, lat).ok_or(DropReason::OutsideExtent)?;
        let center = sampling_grid.pixel_center(row, col);
        let (row, col) = stack.grid().locate(center.lon, center.lat).ok_or(DropReason::OutsideExtent)?;
        let features = stack.feature_at(row, col).ok_or(DropReason::NoData)?;
        Ok(SampleRow { features, class: point.class })
    }
}

/// Deterministic stratified hold-out split.
///
/// Within each class, every k-th row (k = round(1 / fraction)) goes to the
/// hold-out set; classes with fewer than k rows stay entirely in training.
pub fn split_holdout(rows: &[SampleRow], fraction: f64) -> LulcResult<(Vec<SampleRow>, Vec<SampleRow>)> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(LulcError::Config(format!(
            "Hold-out fraction must be in (0, 1), got {}",
            fraction
        )));
    }
    let k = ((1.0 / fraction).round() as usize).max(2);

    let mut seen: BTreeMap<LandCoverClass, usize> = BTreeMap::new();
    let mut training = Vec::new();
    let mut holdout = Vec::new();
    for row in rows {
        let n = seen.entry(row.class).or_insert(0);
        *n += 1;
        if *n % k == 0 {
            holdout.push(*row);
        } else {
            training.push(*row);
        }
    }
    log::debug!("Hold-out split (every {}th per class): {} training, {} hold-out", k, training.len(), holdout.len());
    Ok((training, holdout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BandImage;
    use ndarray::Array2;

    fn region() -> Region {
        Region::new(&[(0.0, 0.0), (0.1, 0.0), (0.1, 0.1), (0.0, 0.1)]).unwrap()
    }

    fn stack(grid: &AnalysisGrid) -> IndexStack {
        let dim = grid.dim();
        let mut ndvi: BandImage = Array2::from_shape_fn(dim, |(_, c)| c as f32 / dim.1 as f32);
        ndvi[[0, 0]] = f32::NAN;
        let ndbi = Array2::from_elem(dim, -0.2_f32);
        let mndwi = Array2::from_elem(dim, 0.1_f32);
        IndexStack::new(
            grid.clone(),
            ["NDVI".to_string(), "NDBI".to_string(), "MNDWI".to_string()],
            [ndvi, ndbi, mndwi],
        )
        .unwrap()
    }

    #[test]
    fn test_extract_and_drop() {
        let region = region();
        let grid = AnalysisGrid::for_region(&region, 1000.0).unwrap();
        let stack = stack(&grid);
        let corner = grid.pixel_center(0, 0);

        let points = vec![
            LabeledPoint::new(0.05, 0.05, LandCoverClass::Forest),
            LabeledPoint::new(0.2, 0.05, LandCoverClass::Water),
            LabeledPoint::new(corner.lon, corner.lat, LandCoverClass::Urban),
            LabeledPoint::new(0.09, 0.01, LandCoverClass::BareLand),
        ];
        let extraction = TrainingSampleExtractor::new(SamplingParams { scale_m: 1000.0 })
            .extract(&stack, &region, &points)
            .unwrap();

        assert_eq!(extraction.rows.len(), 2);
        assert_eq!(extraction.rows[0].class, LandCoverClass::Forest);
        assert_eq!(extraction.rows[1].class, LandCoverClass::BareLand);
        assert!(extraction.rows[1].features[0] > extraction.rows[0].features[0]);

        let reasons: Vec<(usize, DropReason)> = extraction.dropped.iter().map(|d| (d.index, d.reason)).collect();
        assert_eq!(reasons, vec![(1, DropReason::OutsideRegion), (2, DropReason::NoData)]);
    }

    #[test]
    fn test_all_dropped_is_fatal() {
        let region = region();
        let grid = AnalysisGrid::for_region(&region, 1000.0).unwrap();
        let points = vec![LabeledPoint::new(1.0, 1.0, LandCoverClass::Forest)];
        let result = TrainingSampleExtractor::new(SamplingParams { scale_m: 1000.0 }).extract(&stack(&grid), &region, &points);
        assert!(matches!(result, Err(LulcError::TrainingEmpty { dropped: 1 })));
    }

    #[test]
    fn test_coarser_sampling_scale_snaps_to_center() {
        let region = region();
        let grid = AnalysisGrid::for_region(&region, 1000.0).unwrap();
        let points = vec![LabeledPoint::new(0.051, 0.051, LandCoverClass::Forest)];
        let extraction = TrainingSampleExtractor::new(SamplingParams { scale_m: 5000.0 })
            .extract(&stack(&grid), &region, &points)
            .unwrap();
        assert_eq!(extraction.rows.len(), 1);
    }

    #[test]
    fn test_split_holdout() {
        let mut rows = Vec::new();
        for i in 0..9 {
            let class = if i < 6 { LandCoverClass::Forest } else { LandCoverClass::Water };
            rows.push(SampleRow { features: [i as f64, 0.0, 0.0], class });
        }
        let (training, holdout) = split_holdout(&rows, 1.0 / 3.0).unwrap();
        assert_eq!(holdout.len(), 3);
        assert_eq!(training.len(), 6);
        assert_eq!(holdout[0].features[0], 2.0);
        assert_eq!(holdout[2].class, LandCoverClass::Water);

        assert!(split_holdout(&rows, 0.0).is_err());
        assert!(split_holdout(&rows, 1.0).is_err());
    }
}
