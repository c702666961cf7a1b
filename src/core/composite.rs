use crate::core::region::{AnalysisGrid, Region};
use crate::io::SceneSource;
use crate::types::{BandImage, LulcError, LulcResult, Reflectance, SceneInfo};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use ndarray::{Array2, Zip};
use serde::Serialize;
use std::collections::BTreeMap;

/// Half-open acquisition window `[start, end)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> LulcResult<Self> {
        if start >= end {
            return Err(LulcError::Config(format!(
                "Date range start {} is not before end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse ISO 8601 bounds, either full RFC 3339 timestamps or plain dates
    pub fn parse(start: &str, end: &str) -> LulcResult<Self> {
        Self::new(parse_time_flexible(start)?, parse_time_flexible(end)?)
    }

    pub fn contains(&self, time: &DateTime<Utc>) -> bool {
        *time >= self.start && *time < self.end
    }
}

/// Flexible time parsing for RFC 3339 timestamps and `YYYY-MM-DD` dates
pub fn parse_time_flexible(time_str: &str) -> LulcResult<DateTime<Utc>> {
    let time_str = time_str.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(time_str) {
        return Ok(time.with_timezone(&Utc));
    }
    if let Ok(time) = chrono::NaiveDateTime::parse_from_str(time_str, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(time.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(time_str, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    Err(LulcError::Config(format!("Unrecognised ISO 8601 time: '{}'", time_str)))
}

/// Compositing parameters
#[derive(Debug, Clone, Default)]
pub struct CompositeParams {
    /// Source collection identifier; empty accepts every collection
    pub collection: String,
    /// Bands to composite; empty means every band common to the selected scenes
    pub bands: Vec<String>,
}

/// Band-aligned median composite on an analysis grid
#[derive(Debug, Clone)]
pub struct CompositeImage {
    grid: AnalysisGrid,
    bands: BTreeMap<String, BandImage>,
    scene_ids: Vec<String>,
}

impl CompositeImage {
    /// Assemble a composite from bands that already share `grid`
    pub fn from_bands(grid: AnalysisGrid, bands: BTreeMap<String, BandImage>, scene_ids: Vec<String>) -> LulcResult<Self> {
        for (name, band) in &bands {
            if band.dim() != grid.dim() {
                return Err(LulcError::Processing(format!(
                    "Band {} has shape {:?}, grid is {:?}",
                    name,
                    band.dim(),
                    grid.dim()
                )));
            }
        }
        Ok(Self { grid, bands, scene_ids })
    }

    pub fn grid(&self) -> &AnalysisGrid {
        &self.grid
    }

    pub fn band(&self, name: &str) -> LulcResult<&BandImage> {
        self.bands
            .get(name)
            .ok_or_else(|| LulcError::MissingData(format!("Band {} is not part of the composite", name)))
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.keys().map(|k| k.as_str()).collect()
    }

    /// Scenes that contributed to the median
    pub fn scene_ids(&self) -> &[String] {
        &self.scene_ids
    }
}

/// Per-pixel temporal median compositor
pub struct ImageCompositor {
    params: CompositeParams,
}

impl ImageCompositor {
    pub fn new(params: CompositeParams) -> Self {
        Self { params }
    }

    /// Scenes of the configured collection acquired in `range` whose footprint
    /// intersects the region, ordered by acquisition time then id
    pub fn filter_scenes(
        &self,
        source: &dyn SceneSource,
        region: &Region,
        range: &DateRange,
    ) -> LulcResult<Vec<SceneInfo>> {
        let mut selected: Vec<SceneInfo> = source
            .scenes()?
            .into_iter()
            .filter(|s| self.params.collection.is_empty() || s.collection == self.params.collection)
            .filter(|s| range.contains(&s.acquired))
            .filter(|s| s.footprint.intersects(region.bounding_box()))
            .collect();
        selected.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));
        Ok(selected)
    }

    /// Filter the source and reduce the remaining scenes to a median composite
    pub fn composite(
        &self,
        source: &dyn SceneSource,
        region: &Region,
        range: &DateRange,
        grid: &AnalysisGrid,
    ) -> LulcResult<CompositeImage> {
        let scenes = self.filter_scenes(source, region, range)?;
        if scenes.is_empty() {
            return Err(LulcError::MissingData(format!(
                "No scenes of '{}' intersect the region between {} and {}",
                self.params.collection, range.start, range.end
            )));
        }
        log::info!("Compositing {} scenes", scenes.len());

        let band_names = self.select_bands(&scenes)?;
        let mut bands = BTreeMap::new();
        for band in &band_names {
            let mut layers = Vec::new();
            for scene in scenes.iter().filter(|s| s.has_band(band)) {
                log::debug!("Reading band {} of scene {}", band, scene.id);
                let layer = source.read_band(scene, band, grid)?;
                if layer.dim() != grid.dim() {
                    return Err(LulcError::Processing(format!(
                        "Scene {} band {} delivered shape {:?}, grid is {:?}",
                        scene.id,
                        band,
                        layer.dim(),
                        grid.dim()
                    )));
                }
                layers.push(layer);
            }
            if layers.is_empty() {
                return Err(LulcError::MissingData(format!("No selected scene provides band {}", band)));
            }
            bands.insert(band.clone(), median_composite(&layers, grid.dim()));
        }

        let scene_ids = scenes.into_iter().map(|s| s.id).collect();
        CompositeImage::from_bands(grid.clone(), bands, scene_ids)
    }

    fn select_bands(&self, scenes: &[SceneInfo]) -> LulcResult<Vec<String>> {
        if !self.params.bands.is_empty() {
            return Ok(self.params.bands.clone());
        }
        let mut common: Vec<String> = scenes[0].bands.clone();
        common.retain(|b| scenes.iter().all(|s| s.has_band(b)));
        common.sort();
        common.dedup();
        if common.is_empty() {
            return Err(LulcError::MissingData("Selected scenes share no band".to_string()));
        }
        Ok(common)
    }
}

/// Per-pixel median over the finite values of all layers
fn median_composite(layers: &[BandImage], dim: (usize, usize)) -> BandImage {
    let mut out = Array2::<Reflectance>::from_elem(dim, Reflectance::NAN);
    let fill = |(row, col): (usize, usize), px: &mut Reflectance| {
        let mut values: Vec<Reflectance> = layers
            .iter()
            .map(|l| l[[row, col]])
            .filter(|v| v.is_finite())
            .collect();
        if let Some(m) = median_of(&mut values) {
            *px = m;
        }
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut out).par_for_each(fill);
    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut out).for_each(fill);

    out
}

/// Median of finite values; the mean of the two middle values for even counts
pub fn median_of(values: &mut [Reflectance]) -> Option<Reflectance> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySceneSource;
    use crate::types::GeoTransform;
    use std::collections::HashMap;

    fn region() -> Region {
        Region::new(&[(10.0, 10.0), (10.0, 9.9), (10.1, 9.9), (10.1, 10.0)]).unwrap()
    }

    fn source() -> MemorySceneSource {
        let transform = GeoTransform::north_up(9.95, 10.05, 0.01, 0.01);
        let mut source = MemorySceneSource::new();
        for (day, value) in [(10, 100.0_f32), (20, 300.0), (30, 200.0)] {
            let mut bands = HashMap::new();
            bands.insert("B4".to_string(), Array2::from_elem((20, 20), value));
            let acquired = parse_time_flexible(&format!("2023-03-{:02}", day)).unwrap();
            source.add_scene(&format!("S{}", day), "TEST", acquired, transform.clone(), bands).unwrap();
        }
        // outside the region
        let mut bands = HashMap::new();
        bands.insert("B4".to_string(), Array2::from_elem((5, 5), 9999.0_f32));
        let acquired = parse_time_flexible("2023-03-15").unwrap();
        source
            .add_scene("FAR", "TEST", acquired, GeoTransform::north_up(50.0, 50.0, 0.01, 0.01), bands)
            .unwrap();
        source
    }

    #[test]
    fn test_median_of() {
        assert_eq!(median_of(&mut []), None);
        assert_eq!(median_of(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median_of(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }

    #[test]
    fn test_date_range_parsing() {
        let range = DateRange::parse("2023-01-01", "2023-12-31").unwrap();
        assert!(range.contains(&parse_time_flexible("2023-06-01T10:00:00Z").unwrap()));
        assert!(!range.contains(&parse_time_flexible("2023-12-31").unwrap()));
        assert!(DateRange::parse("2023-12-31", "2023-01-01").is_err());
        assert!(parse_time_flexible("31/12/2023").is_err());
    }

    #[test]
    fn test_median_composite_filters_date_and_bounds() {
        let region = region();
        let grid = AnalysisGrid::for_region(&region, 1000.0).unwrap();
        let compositor = ImageCompositor::new(CompositeParams::default());

        let range = DateRange::parse("2023-03-01", "2023-04-01").unwrap();
        let composite = compositor.composite(&source(), &region, &range, &grid).unwrap();
        assert_eq!(composite.scene_ids(), &["S10", "S20", "S30"]);
        let b4 = composite.band("B4").unwrap();
        assert!(b4.iter().all(|&v| v == 200.0));

        let range = DateRange::parse("2023-03-01", "2023-03-25").unwrap();
        let composite = compositor.composite(&source(), &region, &range, &grid).unwrap();
        assert!(composite.band("B4").unwrap().iter().all(|&v| v == 200.0));
        assert!(composite.band("B8").is_err());
    }

    #[test]
    fn test_empty_collection_is_missing_data() {
        let region = region();
        let grid = AnalysisGrid::for_region(&region, 1000.0).unwrap();
        let range = DateRange::parse("2024-01-01", "2024-02-01").unwrap();
        let result = ImageCompositor::new(CompositeParams::default()).composite(&source(), &region, &range, &grid);
        assert!(matches!(result, Err(LulcError::MissingData(_))));

        let params = CompositeParams { collection: "OTHER".to_string(), bands: vec![] };
        let range = DateRange::parse("2023-03-01", "2023-04-01").unwrap();
        let result = ImageCompositor::new(params).composite(&source(), &region, &range, &grid);
        assert!(matches!(result, Err(LulcError::MissingData(_))));
    }
}
