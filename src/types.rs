use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Surface reflectance (or digital number) sample
pub type Reflectance = f32;

/// 2D band raster on an analysis grid (rows x cols), NaN marks no-data
pub type BandImage = Array2<Reflectance>;

/// Number of spectral indices fed to the classifier
pub const FEATURE_COUNT: usize = 3;

/// Index vector of one pixel or sample
pub type FeatureVector = [f64; FEATURE_COUNT];

/// Label value stored in classified rasters for masked pixels
pub const CLASS_NODATA: u8 = 255;

/// Geographic coordinate (WGS84 degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Smallest box enclosing all points, `None` for an empty slice
    pub fn enclosing(points: &[GeoPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = BoundingBox {
            min_lon: first.lon,
            max_lon: first.lon,
            min_lat: first.lat,
            max_lat: first.lat,
        };
        for p in &points[1..] {
            bbox.min_lon = bbox.min_lon.min(p.lon);
            bbox.max_lon = bbox.max_lon.max(p.lon);
            bbox.min_lat = bbox.min_lat.min(p.lat);
            bbox.max_lat = bbox.max_lat.max(p.lat);
        }
        Some(bbox)
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square-ish pixels given in map units
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    /// Build from the six GDAL coefficients
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    /// Map coordinate of a fractional pixel position (col, row)
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Fractional pixel position (col, row) of a map coordinate
    pub fn invert(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (-self.rotation_y * dx + self.pixel_width * dy) / det;
        Some((col, row))
    }

    /// Integer pixel (row, col) containing a map coordinate, within `dim`
    pub fn locate(&self, x: f64, y: f64, dim: (usize, usize)) -> Option<(usize, usize)> {
        let (col, row) = self.invert(x, y)?;
        if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row.floor() as usize, col.floor() as usize);
        if row < dim.0 && col < dim.1 {
            Some((row, col))
        } else {
            None
        }
    }

    /// Bounding box of a raster of `dim` (rows, cols) in map units
    pub fn footprint(&self, dim: (usize, usize)) -> BoundingBox {
        let (rows, cols) = (dim.0 as f64, dim.1 as f64);
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(cols, 0.0),
            self.apply(0.0, rows),
            self.apply(cols, rows),
        ];
        let points: Vec<GeoPoint> = corners.iter().map(|&(x, y)| GeoPoint::new(x, y)).collect();
        // four corners, never empty
        BoundingBox::enclosing(&points).unwrap_or(BoundingBox {
            min_lon: self.top_left_x,
            max_lon: self.top_left_x,
            min_lat: self.top_left_y,
            max_lat: self.top_left_y,
        })
    }
}

/// Fixed land-cover class enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LandCoverClass {
    NonForest = 0,
    Forest = 1,
    Urban = 2,
    Water = 3,
    BareLand = 4,
}

/// Number of classes in the enumeration
pub const CLASS_COUNT: usize = 5;

impl LandCoverClass {
    pub const ALL: [LandCoverClass; CLASS_COUNT] = [
        LandCoverClass::NonForest,
        LandCoverClass::Forest,
        LandCoverClass::Urban,
        LandCoverClass::Water,
        LandCoverClass::BareLand,
    ];

    pub fn from_label(label: u8) -> Option<Self> {
        Self::ALL.get(label as usize).copied()
    }

    pub fn label(self) -> u8 {
        self as u8
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Default display name
    pub fn name(self) -> &'static str {
        match self {
            LandCoverClass::NonForest => "Non-forest",
            LandCoverClass::Forest => "Forest",
            LandCoverClass::Urban => "Urban",
            LandCoverClass::Water => "Water",
            LandCoverClass::BareLand => "Bare Land",
        }
    }
}

impl std::fmt::Display for LandCoverClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Class table entry: label id, display name and display color
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub id: u8,
    pub name: String,
    pub color: String,
}

impl ClassInfo {
    pub fn new(class: LandCoverClass, color: &str) -> Self {
        Self {
            id: class.label(),
            name: class.name().to_string(),
            color: color.to_string(),
        }
    }

    pub fn class(&self) -> Option<LandCoverClass> {
        LandCoverClass::from_label(self.id)
    }
}

/// Reference point with a known class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledPoint {
    pub location: GeoPoint,
    pub class: LandCoverClass,
}

impl LabeledPoint {
    pub fn new(lon: f64, lat: f64, class: LandCoverClass) -> Self {
        Self {
            location: GeoPoint::new(lon, lat),
            class,
        }
    }
}

/// Index vector sampled at a labeled point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub features: FeatureVector,
    pub class: LandCoverClass,
}

/// Scene metadata as listed by an image source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneInfo {
    pub id: String,
    /// Source collection identifier, e.g. `COPERNICUS/S2`
    pub collection: String,
    pub acquired: DateTime<Utc>,
    pub footprint: BoundingBox,
    pub bands: Vec<String>,
}

impl SceneInfo {
    pub fn has_band(&self, band: &str) -> bool {
        self.bands.iter().any(|b| b == band)
    }
}

/// Error types for land-cover processing
#[derive(Debug, thiserror::Error)]
pub enum LulcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("No training samples left after extraction ({dropped} points dropped)")]
    TrainingEmpty { dropped: usize },

    #[error("Classifier training failed: {0}")]
    ClassifierTraining(String),

    /// `pixels` is the count reached when counting stopped, a lower bound above `cap`
    #[error("Reduction at {scale} m covers more than {cap} region pixels (counted {pixels})")]
    ReductionOverflow { pixels: u64, cap: u64, scale: f64 },

    #[error("XML parsing error: {0}")]
    Xml(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for land-cover operations
pub type LulcResult<T> = Result<T, LulcError>;
