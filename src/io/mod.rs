//! Image sources: the blocking boundary where scene pixels are materialised

pub mod memory;
pub mod safe_archive;
#[cfg(feature = "gdal")]
pub mod gdal_reader;

use crate::core::region::AnalysisGrid;
use crate::types::{BandImage, LulcResult, SceneInfo};

pub use memory::MemorySceneSource;
pub use safe_archive::{SafeArchive, SafeArchiveSource, SafePatterns, SafeProductName};

/// Catalogue of scenes plus pixel access on an analysis grid.
///
/// `read_band` is the one synchronous evaluation call per band and scene;
/// implementations may block on disk or network I/O.
pub trait SceneSource {
    /// List every scene the source can provide
    fn scenes(&self) -> LulcResult<Vec<SceneInfo>>;

    /// Materialise one band of a scene on `grid`, NaN where the scene has no data
    fn read_band(&self, scene: &SceneInfo, band: &str, grid: &AnalysisGrid) -> LulcResult<BandImage>;
}
