use crate::core::classifier::ClassifiedRaster;
use crate::core::region::{AnalysisGrid, Region};
use crate::types::{LandCoverClass, LulcError, LulcResult, CLASS_NODATA};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Authalic radius of the WGS84 ellipsoid (meters)
pub const AUTHALIC_RADIUS_M: f64 = 6_371_007.181;

const M2_PER_KM2: f64 = 1e6;

/// Provides the ground area of each pixel of a grid, in m²
pub trait PixelAreaProvider {
    fn pixel_areas(&self, grid: &AnalysisGrid) -> Array2<f64>;
}

/// Exact cell area of lon/lat pixels on a sphere
#[derive(Debug, Clone)]
pub struct SphericalPixelArea {
    pub radius_m: f64,
}

impl Default for SphericalPixelArea {
    fn default() -> Self {
        Self { radius_m: AUTHALIC_RADIUS_M }
    }
}

impl PixelAreaProvider for SphericalPixelArea {
    fn pixel_areas(&self, grid: &AnalysisGrid) -> Array2<f64> {
        let (rows, cols) = grid.dim();
        let dlon = grid.pixel_width_deg().to_radians();
        let r2 = self.radius_m * self.radius_m;
        let row_area: Vec<f64> = (0..rows)
            .map(|row| {
                let (top, bottom) = grid.row_latitudes(row);
                r2 * dlon * (top.to_radians().sin() - bottom.to_radians().sin()).abs()
            })
            .collect();
        Array2::from_shape_fn((rows, cols), |(row, _)| row_area[row])
    }
}

/// What to do when a reduction would exceed the pixel cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Fail with `LulcError::ReductionOverflow`
    Error,
    /// Coarsen the scale until the cap holds and flag the result approximate
    BestEffort,
}

/// Area reduction parameters
#[derive(Debug, Clone)]
pub struct AreaParams {
    /// Reduction scale in meters
    pub scale_m: f64,
    /// Maximum number of region pixels a reduction may visit
    pub max_pixels: u64,
    pub overflow: OverflowPolicy,
}

impl Default for AreaParams {
    fn default() -> Self {
        Self {
            scale_m: 30.0,
            max_pixels: 1_000_000_000,
            overflow: OverflowPolicy::Error,
        }
    }
}

/// Area of one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassArea {
    pub class: LandCoverClass,
    pub area_km2: f64,
    pub pixel_count: u64,
}

/// Per-class areas over the region, one entry per enumerated class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassAreaResult {
    pub classes: Vec<ClassArea>,
    /// Area of classified (non-no-data) pixels in the region
    pub total_valid_km2: f64,
    /// Region pixels visited at the effective scale
    pub region_pixels: u64,
    /// Scale the reduction actually ran at
    pub scale_m: f64,
    /// True when the scale was coarsened to respect the pixel cap
    pub approximate: bool,
}

impl ClassAreaResult {
    pub fn area_km2(&self, class: LandCoverClass) -> f64 {
        self.classes
            .iter()
            .find(|c| c.class == class)
            .map_or(0.0, |c| c.area_km2)
    }

    pub fn total_km2(&self) -> f64 {
        self.classes.iter().map(|c| c.area_km2).sum()
    }
}

/// Masked per-class sum of pixel areas
pub struct AreaAggregator {
    params: AreaParams,
}

impl AreaAggregator {
    pub fn new(params: AreaParams) -> Self {
        Self { params }
    }

    pub fn aggregate(
        &self,
        raster: &ClassifiedRaster,
        region: &Region,
        areas: &dyn PixelAreaProvider,
    ) -> LulcResult<ClassAreaResult> {
        if self.params.max_pixels == 0 {
            return Err(LulcError::Config("max_pixels must be at least 1".to_string()));
        }
        let mut scale = self.params.scale_m;
        let mut approximate = false;

        // grids carry no pixel storage; nothing grid-sized is allocated until the cap holds
        let (grid, region_pixels) = loop {
            let grid = if raster.grid().scale_m() == scale {
                raster.grid().clone()
            } else {
                AnalysisGrid::for_region(region, scale)?
            };
            let pixels = grid.count_region_pixels(region, self.params.max_pixels);
            if pixels <= self.params.max_pixels {
                break (grid, pixels);
            }
            match self.params.overflow {
                OverflowPolicy::Error => {
                    return Err(LulcError::ReductionOverflow { pixels, cap: self.params.max_pixels, scale });
                }
                OverflowPolicy::BestEffort => {
                    log::warn!(
                        "More than {} region pixels at {} m, coarsening",
                        self.params.max_pixels, scale
                    );
                    scale *= 2.0;
                    approximate = true;
                }
            }
        };

        let region_mask = grid.region_mask(region);
        let labels = self.labels_on(raster, &grid);
        let pixel_area = areas.pixel_areas(&grid);

        let mut classes = Vec::with_capacity(LandCoverClass::ALL.len());
        let mut total_valid_m2 = 0.0;
        for class in LandCoverClass::ALL {
            let label = class.label();
            let (area_m2, count) = Zip::from(&pixel_area).and(&labels).and(&region_mask).fold(
                (0.0_f64, 0u64),
                |(sum, n), &a, &l, &inside| {
                    if inside && l == label {
                        (sum + a, n + 1)
                    } else {
                        (sum, n)
                    }
                },
            );
            total_valid_m2 += area_m2;
            classes.push(ClassArea { class, area_km2: area_m2 / M2_PER_KM2, pixel_count: count });
            log::info!("{} area: {:.4} km² ({} pixels)", class, area_m2 / M2_PER_KM2, count);
        }

        Ok(ClassAreaResult {
            classes,
            total_valid_km2: total_valid_m2 / M2_PER_KM2,
            region_pixels,
            scale_m: scale,
            approximate,
        })
    }

    /// Classified labels on the reduction grid (nearest neighbour)
    fn labels_on(&self, raster: &ClassifiedRaster, grid: &AnalysisGrid) -> Array2<u8> {
        if raster.grid() == grid {
            return raster.labels().clone();
        }
        Array2::from_shape_fn(grid.dim(), |(row, col)| {
            let c = grid.pixel_center(row, col);
            raster.sample_at(c.lon, c.lat).map_or(CLASS_NODATA, |class| class.label())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn region() -> Region {
        Region::new(&[(78.13, 30.02), (78.13, 29.88), (78.25, 29.88), (78.25, 30.02)]).unwrap()
    }

    fn striped_raster(grid: &AnalysisGrid, region: &Region) -> ClassifiedRaster {
        let mask = grid.region_mask(region);
        let labels = Array2::from_shape_fn(grid.dim(), |(r, c)| {
            if !mask[[r, c]] || c % 10 == 0 {
                CLASS_NODATA
            } else {
                [0u8, 1, 2, 4][c % 4]
            }
        });
        ClassifiedRaster::from_labels(grid.clone(), labels).unwrap()
    }

    #[test]
    fn test_spherical_pixel_area_near_scale_squared() {
        let grid = AnalysisGrid::for_region(&region(), 30.0).unwrap();
        let areas = SphericalPixelArea::default().pixel_areas(&grid);
        for a in areas.iter() {
            assert_relative_eq!(*a, 900.0, max_relative = 0.01);
        }
    }

    #[test]
    fn test_region_area() {
        let grid = AnalysisGrid::for_region(&region(), 100.0).unwrap();
        let mask = grid.region_mask(&region());
        let areas = SphericalPixelArea::default().pixel_areas(&grid);
        let total: f64 = Zip::from(&areas).and(&mask).fold(0.0, |s, &a, &m| if m { s + a } else { s });
        // 0.12 x 0.14 degree box at ~30 N is about 180 km² on the sphere
        assert_relative_eq!(total / 1e6, 180.0, max_relative = 0.02);
    }

    #[test]
    fn test_absent_class_has_zero_area() {
        let region = region();
        let grid = AnalysisGrid::for_region(&region, 100.0).unwrap();
        let raster = striped_raster(&grid, &region);
        let params = AreaParams { scale_m: 100.0, ..AreaParams::default() };
        let result = AreaAggregator::new(params).aggregate(&raster, &region, &SphericalPixelArea::default()).unwrap();

        assert_eq!(result.classes.len(), 5);
        assert_eq!(result.area_km2(LandCoverClass::Water), 0.0);
        assert!(result.area_km2(LandCoverClass::Forest) > 0.0);
        assert!(!result.approximate);
        assert_relative_eq!(result.total_km2(), result.total_valid_km2, max_relative = 1e-9);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let region = region();
        let grid = AnalysisGrid::for_region(&region, 100.0).unwrap();
        let raster = striped_raster(&grid, &region);
        let params = AreaParams { scale_m: 100.0, max_pixels: 1000, overflow: OverflowPolicy::Error };
        let result = AreaAggregator::new(params).aggregate(&raster, &region, &SphericalPixelArea::default());
        match result {
            Err(LulcError::ReductionOverflow { pixels, cap, .. }) => {
                assert!(pixels > 1000);
                assert_eq!(cap, 1000);
            }
            other => panic!("expected overflow, got {:?}", other),
        }
    }

    #[test]
    fn test_overflow_at_fine_scale_is_reported_before_allocation() {
        // 0.2 m over the region is a ~4.5e9 pixel grid
        let region = region();
        let grid = AnalysisGrid::for_region(&region, 100.0).unwrap();
        let raster = striped_raster(&grid, &region);
        let params = AreaParams { scale_m: 0.2, max_pixels: 1_000_000, overflow: OverflowPolicy::Error };
        let result = AreaAggregator::new(params).aggregate(&raster, &region, &SphericalPixelArea::default());
        match result {
            Err(LulcError::ReductionOverflow { pixels, cap, scale }) => {
                assert_eq!(pixels, 1_000_001);
                assert_eq!(cap, 1_000_000);
                assert_eq!(scale, 0.2);
            }
            other => panic!("expected overflow, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_pixel_cap_is_rejected() {
        let region = region();
        let grid = AnalysisGrid::for_region(&region, 100.0).unwrap();
        let raster = striped_raster(&grid, &region);
        for overflow in [OverflowPolicy::Error, OverflowPolicy::BestEffort] {
            let params = AreaParams { scale_m: 100.0, max_pixels: 0, overflow };
            let result = AreaAggregator::new(params).aggregate(&raster, &region, &SphericalPixelArea::default());
            assert!(matches!(result, Err(LulcError::Config(ref m)) if m.contains("max_pixels")), "{:?}", result);
        }
    }

    #[test]
    fn test_class_areas_match_valid_pixel_area() {
        let region = region();
        let grid = AnalysisGrid::for_region(&region, 100.0).unwrap();
        let raster = striped_raster(&grid, &region);
        let params = AreaParams { scale_m: 100.0, ..AreaParams::default() };
        let result = AreaAggregator::new(params).aggregate(&raster, &region, &SphericalPixelArea::default()).unwrap();

        // every tenth column is no-data
        let mask = grid.region_mask(&region);
        let pixel_area = SphericalPixelArea::default().pixel_areas(&grid);
        let mut region_m2 = 0.0;
        let mut valid_m2 = 0.0;
        for ((row, col), &a) in pixel_area.indexed_iter() {
            if mask[[row, col]] {
                region_m2 += a;
                if col % 10 != 0 {
                    valid_m2 += a;
                }
            }
        }
        assert!(valid_m2 < region_m2);
        assert_relative_eq!(result.total_km2(), valid_m2 / 1e6, max_relative = 1e-9);
    }

    #[test]
    fn test_best_effort_coarsens_and_flags() {
        let region = region();
        let grid = AnalysisGrid::for_region(&region, 100.0).unwrap();
        let raster = striped_raster(&grid, &region);
        let params = AreaParams { scale_m: 100.0, max_pixels: 1000, overflow: OverflowPolicy::BestEffort };
        let result = AreaAggregator::new(params).aggregate(&raster, &region, &SphericalPixelArea::default()).unwrap();
        assert!(result.approximate);
        assert!(result.scale_m > 100.0);
        assert!(result.region_pixels <= 1000);
    }
}
