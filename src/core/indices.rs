//! Normalized-difference spectral indices
//!
//! Every index is `(A - B) / (A + B)` of two composite bands. Pixels where
//! either band is missing or negative, or where `A + B` vanishes, become NaN
//! (no-data) so valid values always lie in [-1, 1].

use crate::core::composite::CompositeImage;
use crate::core::region::AnalysisGrid;
use crate::types::{BandImage, FeatureVector, LulcError, LulcResult, Reflectance, FEATURE_COUNT};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Denominators below this magnitude are treated as zero
const DENOMINATOR_EPSILON: f64 = 1e-10;

/// Named normalized difference of two bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub band_a: String,
    pub band_b: String,
}

impl IndexDefinition {
    pub fn new(name: &str, band_a: &str, band_b: &str) -> Self {
        Self {
            name: name.to_string(),
            band_a: band_a.to_string(),
            band_b: band_b.to_string(),
        }
    }

    /// Vegetation: (NIR - Red) / (NIR + Red)
    pub fn ndvi() -> Self {
        Self::new("NDVI", "B8", "B4")
    }

    /// Built-up: (SWIR1 - NIR) / (SWIR1 + NIR)
    pub fn ndbi() -> Self {
        Self::new("NDBI", "B11", "B8")
    }

    /// Water (Xu, 2006): (Green - SWIR1) / (Green + SWIR1)
    pub fn mndwi() -> Self {
        Self::new("MNDWI", "B3", "B11")
    }

    /// NDVI, NDBI and MNDWI on Sentinel-2 band names
    pub fn sentinel2_defaults() -> [IndexDefinition; FEATURE_COUNT] {
        [Self::ndvi(), Self::ndbi(), Self::mndwi()]
    }
}

/// `(a - b) / (a + b)` per pixel, NaN where undefined
pub fn normalized_difference(band_a: &BandImage, band_b: &BandImage) -> LulcResult<BandImage> {
    if band_a.dim() != band_b.dim() {
        return Err(LulcError::Processing(format!(
            "Band shapes differ: {:?} vs {:?}",
            band_a.dim(),
            band_b.dim()
        )));
    }

    let mut out = Array2::<Reflectance>::from_elem(band_a.dim(), Reflectance::NAN);
    let kernel = |px: &mut Reflectance, &a: &Reflectance, &b: &Reflectance| {
        *px = normalized_pair(a as f64, b as f64).map_or(Reflectance::NAN, |v| v as Reflectance);
    };

    #[cfg(feature = "parallel")]
    Zip::from(&mut out).and(band_a).and(band_b).par_for_each(kernel);
    #[cfg(not(feature = "parallel"))]
    Zip::from(&mut out).and(band_a).and(band_b).for_each(kernel);

    Ok(out)
}

fn normalized_pair(a: f64, b: f64) -> Option<f64> {
    if !a.is_finite() || !b.is_finite() || a < 0.0 || b < 0.0 {
        return None;
    }
    let sum = a + b;
    if sum.abs() < DENOMINATOR_EPSILON {
        return None;
    }
    Some(((a - b) / sum).clamp(-1.0, 1.0))
}

/// Three index bands on one grid, the classifier's input
#[derive(Debug, Clone)]
pub struct IndexStack {
    grid: AnalysisGrid,
    names: [String; FEATURE_COUNT],
    bands: [BandImage; FEATURE_COUNT],
}

impl IndexStack {
    pub fn new(grid: AnalysisGrid, names: [String; FEATURE_COUNT], bands: [BandImage; FEATURE_COUNT]) -> LulcResult<Self> {
        if let Some(band) = bands.iter().find(|b| b.dim() != grid.dim()) {
            return Err(LulcError::Processing(format!(
                "Index band shape {:?} does not match grid {:?}",
                band.dim(),
                grid.dim()
            )));
        }
        Ok(Self { grid, names, bands })
    }

    pub fn grid(&self) -> &AnalysisGrid {
        &self.grid
    }

    pub fn names(&self) -> &[String; FEATURE_COUNT] {
        &self.names
    }

    pub fn band(&self, index: usize) -> Option<&BandImage> {
        self.bands.get(index)
    }

    /// Index vector at a pixel, `None` on no-data
    pub fn feature_at(&self, row: usize, col: usize) -> Option<FeatureVector> {
        let mut features = [0.0; FEATURE_COUNT];
        for (f, band) in features.iter_mut().zip(&self.bands) {
            let v = *band.get((row, col))?;
            if !v.is_finite() {
                return None;
            }
            *f = v as f64;
        }
        Some(features)
    }

    /// True where all indices are defined
    pub fn valid_mask(&self) -> Array2<bool> {
        Array2::from_shape_fn(self.grid.dim(), |(r, c)| self.feature_at(r, c).is_some())
    }
}

/// Derives the index stack from a composite
pub struct IndexComputer {
    definitions: [IndexDefinition; FEATURE_COUNT],
}

impl IndexComputer {
    pub fn new(definitions: [IndexDefinition; FEATURE_COUNT]) -> Self {
        Self { definitions }
    }

    pub fn sentinel2() -> Self {
        Self::new(IndexDefinition::sentinel2_defaults())
    }

    pub fn definitions(&self) -> &[IndexDefinition; FEATURE_COUNT] {
        &self.definitions
    }

    /// Bands the composite must provide
    pub fn required_bands(&self) -> Vec<String> {
        let mut bands: Vec<String> = self
            .definitions
            .iter()
            .flat_map(|d| [d.band_a.clone(), d.band_b.clone()])
            .collect();
        bands.sort();
        bands.dedup();
        bands
    }

    pub fn compute(&self, composite: &CompositeImage) -> LulcResult<IndexStack> {
        let mut bands: Vec<BandImage> = Vec::with_capacity(FEATURE_COUNT);
        for def in &self.definitions {
            log::debug!("Computing {} = ({} - {}) / ({} + {})", def.name, def.band_a, def.band_b, def.band_a, def.band_b);
            let index = normalized_difference(composite.band(&def.band_a)?, composite.band(&def.band_b)?)?;
            let valid = index.iter().filter(|v| v.is_finite()).count();
            log::info!("{}: {} of {} pixels valid", def.name, valid, index.len());
            bands.push(index);
        }

        let bands: [BandImage; FEATURE_COUNT] = bands
            .try_into()
            .map_err(|_| LulcError::Processing("Index stack must hold exactly three bands".to_string()))?;
        let names = self.definitions.clone().map(|d| d.name);
        IndexStack::new(composite.grid().clone(), names, bands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::region::Region;
    use std::collections::BTreeMap;

    #[test]
    fn test_normalized_difference_values() {
        let a = Array2::from_shape_vec((1, 4), vec![3.0, 0.0, 5.0, 1.0]).unwrap();
        let b = Array2::from_shape_vec((1, 4), vec![1.0, 0.0, f32::NAN, 1.0]).unwrap();
        let nd = normalized_difference(&a, &b).unwrap();
        assert!((nd[[0, 0]] - 0.5).abs() < 1e-6);
        assert!(nd[[0, 1]].is_nan(), "zero denominator must be no-data");
        assert!(nd[[0, 2]].is_nan());
        assert_eq!(nd[[0, 3]], 0.0);
    }

    #[test]
    fn test_index_bounds() {
        let a = Array2::from_shape_fn((20, 20), |(r, c)| (r * 37 % 11) as f32 * 123.0 - 100.0 + c as f32);
        let b = Array2::from_shape_fn((20, 20), |(r, c)| (c * 13 % 7) as f32 * 321.0 + r as f32 - 50.0);
        let nd = normalized_difference(&a, &b).unwrap();
        for v in nd.iter() {
            assert!(v.is_nan() || (-1.0..=1.0).contains(v), "out of range: {}", v);
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let a = Array2::<f32>::zeros((2, 2));
        let b = Array2::<f32>::zeros((2, 3));
        assert!(normalized_difference(&a, &b).is_err());
    }

    #[test]
    fn test_compute_stack() {
        let region = Region::new(&[(0.0, 0.0), (0.01, 0.0), (0.01, 0.01), (0.0, 0.01)]).unwrap();
        let grid = AnalysisGrid::for_region(&region, 500.0).unwrap();
        let dim = grid.dim();
        let mut bands = BTreeMap::new();
        bands.insert("B3".to_string(), Array2::from_elem(dim, 1500.0_f32));
        bands.insert("B4".to_string(), Array2::from_elem(dim, 900.0_f32));
        bands.insert("B8".to_string(), Array2::from_elem(dim, 400.0_f32));
        bands.insert("B11".to_string(), Array2::from_elem(dim, 200.0_f32));
        bands.get_mut("B4").unwrap()[[0, 0]] = f32::NAN;
        let composite = CompositeImage::from_bands(grid, bands, vec![]).unwrap();

        let computer = IndexComputer::sentinel2();
        assert_eq!(computer.required_bands(), vec!["B11", "B3", "B4", "B8"]);
        let stack = computer.compute(&composite).unwrap();
        assert_eq!(stack.names()[2], "MNDWI");
        assert!(stack.feature_at(0, 0).is_none());
        let f = stack.feature_at(1, 1).unwrap();
        assert!(f[0] < 0.0 && f[2] > 0.7);
        assert!(!stack.valid_mask()[[0, 0]]);
    }

    #[test]
    fn test_missing_band() {
        let region = Region::new(&[(0.0, 0.0), (0.01, 0.0), (0.01, 0.01), (0.0, 0.01)]).unwrap();
        let grid = AnalysisGrid::for_region(&region, 500.0).unwrap();
        let composite = CompositeImage::from_bands(grid, BTreeMap::new(), vec![]).unwrap();
        assert!(matches!(
            IndexComputer::sentinel2().compute(&composite),
            Err(LulcError::MissingData(_))
        ));
    }
}
