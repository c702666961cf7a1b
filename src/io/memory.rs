use crate::core::region::AnalysisGrid;
use crate::io::SceneSource;
use crate::types::{BandImage, GeoTransform, LulcError, LulcResult, SceneInfo};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Scene held in memory on its own lon/lat grid
#[derive(Debug, Clone)]
struct MemoryScene {
    info: SceneInfo,
    transform: GeoTransform,
    bands: HashMap<String, BandImage>,
}

/// In-memory image collection, mainly for tests and Python callers
#[derive(Debug, Clone, Default)]
pub struct MemorySceneSource {
    scenes: Vec<MemoryScene>,
}

impl MemorySceneSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scene; all bands must share one shape
    pub fn add_scene(
        &mut self,
        id: &str,
        collection: &str,
        acquired: DateTime<Utc>,
        transform: GeoTransform,
        bands: HashMap<String, BandImage>,
    ) -> LulcResult<()> {
        let mut shape = None;
        for (name, band) in &bands {
            match shape {
                None => shape = Some(band.dim()),
                Some(dim) if dim != band.dim() => {
                    return Err(LulcError::InvalidFormat(format!(
                        "Scene {} band {} has shape {:?}, expected {:?}",
                        id,
                        name,
                        band.dim(),
                        dim
                    )));
                }
                Some(_) => {}
            }
        }
        let dim = shape.ok_or_else(|| LulcError::InvalidFormat(format!("Scene {} has no bands", id)))?;

        let mut band_names: Vec<String> = bands.keys().cloned().collect();
        band_names.sort();

        self.scenes.push(MemoryScene {
            info: SceneInfo {
                id: id.to_string(),
                collection: collection.to_string(),
                acquired,
                footprint: transform.footprint(dim),
                bands: band_names,
            },
            transform,
            bands,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

impl SceneSource for MemorySceneSource {
    fn scenes(&self) -> LulcResult<Vec<SceneInfo>> {
        Ok(self.scenes.iter().map(|s| s.info.clone()).collect())
    }

    fn read_band(&self, scene: &SceneInfo, band: &str, grid: &AnalysisGrid) -> LulcResult<BandImage> {
        let stored = self
            .scenes
            .iter()
            .find(|s| s.info.id == scene.id)
            .ok_or_else(|| LulcError::MissingData(format!("Unknown scene {}", scene.id)))?;
        let data = stored
            .bands
            .get(band)
            .ok_or_else(|| LulcError::MissingData(format!("Scene {} has no band {}", scene.id, band)))?;
        Ok(grid.resample_nearest(data, &stored.transform))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::region::Region;
    use ndarray::Array2;

    #[test]
    fn test_add_scene_rejects_mismatched_bands() {
        let mut source = MemorySceneSource::new();
        let mut bands = HashMap::new();
        bands.insert("B3".to_string(), Array2::zeros((3, 3)));
        bands.insert("B4".to_string(), Array2::zeros((3, 4)));
        let result = source.add_scene("A", "TEST", Utc::now(), GeoTransform::north_up(0.0, 1.0, 0.1, 0.1), bands);
        assert!(result.is_err());
        assert!(source.is_empty());
    }

    #[test]
    fn test_read_band_on_grid() {
        let mut source = MemorySceneSource::new();
        let mut bands = HashMap::new();
        bands.insert("B8".to_string(), Array2::from_elem((10, 10), 42.0_f32));
        source
            .add_scene("A", "TEST", Utc::now(), GeoTransform::north_up(0.0, 1.0, 0.1, 0.1), bands)
            .unwrap();

        let scene = &source.scenes().unwrap()[0];
        assert_eq!(scene.bands, vec!["B8".to_string()]);

        // region sticks out east of the scene
        let region = Region::new(&[(0.5, 0.5), (1.5, 0.5), (1.5, 0.9), (0.5, 0.9)]).unwrap();
        let grid = AnalysisGrid::for_region(&region, 5000.0).unwrap();
        let band = source.read_band(scene, "B8", &grid).unwrap();
        assert!(band.iter().any(|v| *v == 42.0));
        assert!(band.iter().any(|v| v.is_nan()));
        assert!(source.read_band(scene, "B2", &grid).is_err());
    }
}
