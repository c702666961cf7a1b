//! Sentinel-2 SAFE products packed as zip archives

use crate::core::region::AnalysisGrid;
use crate::io::SceneSource;
use crate::types::{BandImage, BoundingBox, GeoPoint, LulcError, LulcResult, SceneInfo};
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

const PRODUCT_NAME_PATTERN: &str =
    r"(S2[A-D])_(MSIL1C|MSIL2A)_(\d{8}T\d{6})_N(\d{4})_R(\d{3})_T([0-9A-Z]{5})_(\d{8}T\d{6})";
const BAND_ENTRY_PATTERN: &str = r"IMG_DATA/(?:R(\d+)m/)?[^/]*_(B\d{2}|B8A)(?:_\d+m)?\.jp2$";

/// Compiled product-name and band-entry patterns, shared by every archive of a scan
#[derive(Debug, Clone)]
pub struct SafePatterns {
    product_name: Regex,
    band_entry: Regex,
}

impl SafePatterns {
    pub fn new() -> LulcResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| LulcError::Processing(format!("Regex error: {}", e)))
        };
        Ok(Self {
            product_name: compile(PRODUCT_NAME_PATTERN)?,
            band_entry: compile(BAND_ENTRY_PATTERN)?,
        })
    }
}

/// Fields of a Sentinel-2 product name
#[derive(Debug, Clone, PartialEq)]
pub struct SafeProductName {
    pub name: String,
    pub mission: String,
    pub level: String,
    pub sensing_time: DateTime<Utc>,
    pub baseline: String,
    pub relative_orbit: u32,
    pub tile: String,
}

impl SafeProductName {
    /// Parse a product or archive file name such as
    /// `S2A_MSIL1C_20230305T051641_N0509_R062_T44RKU_20230305T071447.SAFE.zip`
    pub fn parse(file_name: &str) -> LulcResult<Self> {
        Self::parse_with(&SafePatterns::new()?, file_name)
    }

    pub fn parse_with(patterns: &SafePatterns, file_name: &str) -> LulcResult<Self> {
        let caps = patterns
            .product_name
            .captures(file_name)
            .ok_or_else(|| LulcError::InvalidFormat(format!("Not a Sentinel-2 product name: {}", file_name)))?;

        let sensing = NaiveDateTime::parse_from_str(&caps[3], "%Y%m%dT%H%M%S")
            .map_err(|e| LulcError::InvalidFormat(format!("Bad sensing time '{}': {}", &caps[3], e)))?;
        let relative_orbit = caps[5]
            .parse()
            .map_err(|e| LulcError::InvalidFormat(format!("Bad relative orbit '{}': {}", &caps[5], e)))?;

        Ok(Self {
            name: caps[0].to_string(),
            mission: caps[1].to_string(),
            level: caps[2].to_string(),
            sensing_time: sensing.and_utc(),
            baseline: caps[4].to_string(),
            relative_orbit,
            tile: caps[6].to_string(),
        })
    }

    /// Catalogue collection of the processing level
    pub fn collection(&self) -> &'static str {
        if self.level == "MSIL2A" {
            "COPERNICUS/S2_SR"
        } else {
            "COPERNICUS/S2"
        }
    }
}

/// Metadata read from one product archive
#[derive(Debug, Clone)]
pub struct SafeArchive {
    path: PathBuf,
    product: SafeProductName,
    acquired: DateTime<Utc>,
    footprint: BoundingBox,
    /// Band name (B4, B8A, B11, ...) to zip entry, finest resolution only
    bands: BTreeMap<String, String>,
}

impl SafeArchive {
    pub fn open<P: AsRef<Path>>(path: P) -> LulcResult<Self> {
        Self::open_with(path, &SafePatterns::new()?)
    }

    pub fn open_with<P: AsRef<Path>>(path: P, patterns: &SafePatterns) -> LulcResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let product = SafeProductName::parse_with(patterns, &file_name)?;
        log::debug!("Opening {} product {}", product.level, product.name);

        let file = File::open(&path)?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| LulcError::InvalidFormat(format!("Failed to open ZIP {}: {}", path.display(), e)))?;

        let entries: Vec<String> = archive.file_names().map(str::to_string).collect();
        let bands = discover_bands(&entries, &patterns.band_entry);
        if bands.is_empty() {
            return Err(LulcError::MissingData(format!("No band images in {}", path.display())));
        }

        let metadata_name = entries
            .iter()
            .find(|e| e.ends_with("MTD_MSIL1C.xml") || e.ends_with("MTD_MSIL2A.xml"))
            .cloned()
            .ok_or_else(|| LulcError::MissingData(format!("No product metadata in {}", path.display())))?;
        let mut xml = String::new();
        archive
            .by_name(&metadata_name)
            .map_err(|e| LulcError::InvalidFormat(format!("Failed to access {}: {}", metadata_name, e)))?
            .read_to_string(&mut xml)?;
        let metadata = parse_product_metadata(&xml)?;

        let acquired = metadata.start_time.unwrap_or(product.sensing_time);
        log::info!(
            "Found product {} ({} bands, footprint {:?})",
            product.name,
            bands.len(),
            metadata.footprint
        );

        Ok(Self { path, product, acquired, footprint: metadata.footprint, bands })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn product(&self) -> &SafeProductName {
        &self.product
    }

    pub fn footprint(&self) -> &BoundingBox {
        &self.footprint
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.keys().cloned().collect()
    }

    /// Zip entry holding `band`
    pub fn band_entry(&self, band: &str) -> Option<&str> {
        self.bands.get(band).map(String::as_str)
    }

    /// GDAL virtual path of a band image inside the archive
    pub fn band_path(&self, band: &str) -> LulcResult<String> {
        let entry = self
            .band_entry(band)
            .ok_or_else(|| LulcError::MissingData(format!("Band {} not in product {}", band, self.product.name)))?;
        Ok(format!("/vsizip/{}/{}", self.path.display(), entry))
    }

    pub fn scene_info(&self) -> SceneInfo {
        SceneInfo {
            id: self.product.name.clone(),
            collection: self.product.collection().to_string(),
            acquired: self.acquired,
            footprint: self.footprint.clone(),
            bands: self.band_names(),
        }
    }
}

/// Map band names to image entries, keeping the finest resolution of each band
fn discover_bands(entries: &[String], re: &Regex) -> BTreeMap<String, String> {
    let mut found: BTreeMap<String, (u32, String)> = BTreeMap::new();

    for entry in entries {
        let Some(caps) = re.captures(entry) else { continue };
        // L1C images carry no resolution folder
        let resolution: u32 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let band = normalize_band_name(&caps[2]);
        match found.get(&band) {
            Some((r, _)) if *r <= resolution => {}
            _ => {
                found.insert(band, (resolution, entry.clone()));
            }
        }
    }
    found.into_iter().map(|(band, (_, entry))| (band, entry)).collect()
}

/// `B04` -> `B4`, `B8A` and `B11` unchanged
fn normalize_band_name(raw: &str) -> String {
    match raw.strip_prefix("B0") {
        Some(rest) => format!("B{}", rest),
        None => raw.to_string(),
    }
}

#[derive(Debug)]
struct ProductMetadata {
    start_time: Option<DateTime<Utc>>,
    footprint: BoundingBox,
}

/// Read the acquisition start and the footprint polygon from an MTD_MSIL* document
fn parse_product_metadata(xml_content: &str) -> LulcResult<ProductMetadata> {
    let mut reader = Reader::from_str(xml_content);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut current_tag = String::new();
    let mut start_time = None;
    let mut footprint_points: Vec<GeoPoint> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                current_tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
            }
            Ok(Event::End(_)) => current_tag.clear(),
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|e| LulcError::Xml(e.to_string()))?;
                match current_tag.as_str() {
                    "PRODUCT_START_TIME" => {
                        start_time = Some(crate::core::composite::parse_time_flexible(text.trim())?);
                    }
                    "EXT_POS_LIST" if footprint_points.is_empty() => {
                        footprint_points = parse_pos_list(&text)?;
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(LulcError::Xml(format!(
                    "Error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    let footprint = BoundingBox::enclosing(&footprint_points)
        .ok_or_else(|| LulcError::MissingData("Product metadata has no footprint".to_string()))?;
    Ok(ProductMetadata { start_time, footprint })
}

/// `lat lon lat lon ...` as written in EXT_POS_LIST
fn parse_pos_list(text: &str) -> LulcResult<Vec<GeoPoint>> {
    let values: Vec<f64> = text
        .split_whitespace()
        .map(|v| v.parse::<f64>().map_err(|e| LulcError::Xml(format!("Bad coordinate '{}': {}", v, e))))
        .collect::<LulcResult<_>>()?;
    if values.len() % 2 != 0 {
        return Err(LulcError::Xml(format!("Odd number of footprint coordinates: {}", values.len())));
    }
    Ok(values.chunks_exact(2).map(|pair| GeoPoint::new(pair[1], pair[0])).collect())
}

/// Directory of Sentinel-2 product archives
#[derive(Debug, Clone, Default)]
pub struct SafeArchiveSource {
    archives: Vec<SafeArchive>,
}

impl SafeArchiveSource {
    /// Open every `.zip` in `dir`; unreadable archives are skipped with a warning
    pub fn open_dir<P: AsRef<Path>>(dir: P) -> LulcResult<Self> {
        let dir = dir.as_ref();
        log::info!("Scanning {} for Sentinel-2 products", dir.display());

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("zip")))
            .collect();
        paths.sort();

        let patterns = SafePatterns::new()?;
        let mut archives = Vec::with_capacity(paths.len());
        for path in paths {
            match SafeArchive::open_with(&path, &patterns) {
                Ok(archive) => archives.push(archive),
                Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
            }
        }
        log::info!("Opened {} products", archives.len());
        Ok(Self { archives })
    }

    pub fn archives(&self) -> &[SafeArchive] {
        &self.archives
    }

    fn archive(&self, scene: &SceneInfo) -> LulcResult<&SafeArchive> {
        self.archives
            .iter()
            .find(|a| a.product.name == scene.id)
            .ok_or_else(|| LulcError::MissingData(format!("Unknown scene {}", scene.id)))
    }
}

impl SceneSource for SafeArchiveSource {
    fn scenes(&self) -> LulcResult<Vec<SceneInfo>> {
        Ok(self.archives.iter().map(SafeArchive::scene_info).collect())
    }

    #[cfg(feature = "gdal")]
    fn read_band(&self, scene: &SceneInfo, band: &str, grid: &AnalysisGrid) -> LulcResult<BandImage> {
        let path = self.archive(scene)?.band_path(band)?;
        crate::io::gdal_reader::read_band_on_grid(&path, grid)
    }

    #[cfg(not(feature = "gdal"))]
    fn read_band(&self, scene: &SceneInfo, band: &str, _grid: &AnalysisGrid) -> LulcResult<BandImage> {
        let archive = self.archive(scene)?;
        let entry = archive
            .band_entry(band)
            .ok_or_else(|| LulcError::MissingData(format!("Band {} not in product {}", band, scene.id)))?;
        Err(LulcError::Processing(format!(
            "Reading {} requires JPEG 2000 decoding; rebuild with the `gdal` feature",
            entry
        )))
    }
}
