use crate::types::{BoundingBox, GeoPoint, GeoTransform, LulcError, LulcResult, Reflectance};
use ndarray::Array2;
use serde::Serialize;

/// Length of one degree of longitude at the equator on the WGS84 ellipsoid (meters)
pub const METERS_PER_DEGREE: f64 = 111_319.490_793_273_6;

/// Immutable polygon boundary for every spatial operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    /// Closed ring, first vertex repeated at the end
    vertices: Vec<GeoPoint>,
    bbox: BoundingBox,
}

impl Region {
    /// Build a region from (longitude, latitude) vertices.
    ///
    /// An open ring is closed automatically. At least three distinct
    /// vertices with valid WGS84 coordinates are required.
    pub fn new(vertices: &[(f64, f64)]) -> LulcResult<Self> {
        let mut ring: Vec<GeoPoint> = Vec::with_capacity(vertices.len() + 1);
        for &(lon, lat) in vertices {
            if !lon.is_finite() || !lat.is_finite() || lon.abs() > 180.0 || lat.abs() > 90.0 {
                return Err(LulcError::InvalidGeometry(format!(
                    "Vertex ({}, {}) is not a valid longitude/latitude pair",
                    lon, lat
                )));
            }
            ring.push(GeoPoint::new(lon, lat));
        }

        let mut distinct: Vec<GeoPoint> = Vec::new();
        for p in &ring {
            if !distinct.contains(p) {
                distinct.push(*p);
            }
        }
        if distinct.len() < 3 {
            return Err(LulcError::InvalidGeometry(format!(
                "Region needs at least 3 distinct vertices, got {}",
                distinct.len()
            )));
        }

        if ring.first() != ring.last() {
            ring.push(ring[0]);
        }

        let bbox = BoundingBox::enclosing(&ring)
            .ok_or_else(|| LulcError::InvalidGeometry("Empty region".to_string()))?;

        Ok(Self { vertices: ring, bbox })
    }

    pub fn vertices(&self) -> &[GeoPoint] {
        &self.vertices
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Point-in-polygon test (even-odd rule)
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        if !self.bbox.contains(lon, lat) {
            return false;
        }
        let mut inside = false;
        for edge in self.vertices.windows(2) {
            let (a, b) = (edge[0], edge[1]);
            if (a.lat > lat) != (b.lat > lat) {
                let x_cross = a.lon + (lat - a.lat) / (b.lat - a.lat) * (b.lon - a.lon);
                if lon < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }
}

/// North-up lon/lat raster grid covering a region at a ground-sampling distance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisGrid {
    transform: GeoTransform,
    rows: usize,
    cols: usize,
    scale_m: f64,
}

impl AnalysisGrid {
    /// Grid over the region's bounding box with pixels of `scale_m` meters
    /// measured at the region's center latitude
    pub fn for_region(region: &Region, scale_m: f64) -> LulcResult<Self> {
        if !scale_m.is_finite() || scale_m <= 0.0 {
            return Err(LulcError::Config(format!(
                "Scale must be a positive number of meters, got {}",
                scale_m
            )));
        }

        let bbox = region.bounding_box();
        let center_lat = bbox.center().lat.to_radians();
        let lat_step = scale_m / METERS_PER_DEGREE;
        let lon_step = scale_m / (METERS_PER_DEGREE * center_lat.cos().max(1e-6));

        let cols = ((bbox.max_lon - bbox.min_lon) / lon_step).ceil().max(1.0) as usize;
        let rows = ((bbox.max_lat - bbox.min_lat) / lat_step).ceil().max(1.0) as usize;

        log::debug!(
            "Analysis grid at {} m: {}x{} pixels ({:.3e} x {:.3e} deg)",
            scale_m, cols, rows, lon_step, lat_step
        );

        Ok(Self {
            transform: GeoTransform::north_up(bbox.min_lon, bbox.max_lat, lon_step, lat_step),
            rows,
            cols,
            scale_m,
        })
    }

    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scale_m(&self) -> f64 {
        self.scale_m
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Longitude/latitude of a pixel center
    pub fn pixel_center(&self, row: usize, col: usize) -> GeoPoint {
        let (lon, lat) = self.transform.apply(col as f64 + 0.5, row as f64 + 0.5);
        GeoPoint::new(lon, lat)
    }

    /// (top, bottom) latitude of a pixel row
    pub fn row_latitudes(&self, row: usize) -> (f64, f64) {
        let top = self.transform.top_left_y + row as f64 * self.transform.pixel_height;
        (top, top + self.transform.pixel_height)
    }

    /// Longitudinal pixel extent in degrees
    pub fn pixel_width_deg(&self) -> f64 {
        self.transform.pixel_width.abs()
    }

    /// Pixel (row, col) containing a coordinate
    pub fn locate(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        self.transform.locate(lon, lat, self.dim())
    }

    /// Pixels whose center lies inside the region
    pub fn region_mask(&self, region: &Region) -> Array2<bool> {
        Array2::from_shape_fn(self.dim(), |(row, col)| {
            let c = self.pixel_center(row, col);
            region.contains(c.lon, c.lat)
        })
    }

    /// Number of pixel centres inside the region, counted row by row without
    /// allocating. Counting stops as soon as the total exceeds `limit`, so the
    /// result is exact when it is `<= limit` and a lower bound otherwise.
    pub fn count_region_pixels(&self, region: &Region, limit: u64) -> u64 {
        let mut count = 0u64;
        for row in 0..self.rows {
            for col in 0..self.cols {
                let c = self.pixel_center(row, col);
                if region.contains(c.lon, c.lat) {
                    count += 1;
                    if count > limit {
                        return count;
                    }
                }
            }
        }
        count
    }

    /// Nearest-neighbour resampling of a georeferenced lon/lat raster onto this grid
    pub fn resample_nearest(&self, data: &Array2<Reflectance>, transform: &GeoTransform) -> Array2<Reflectance> {
        let src_dim = data.dim();
        Array2::from_shape_fn(self.dim(), |(row, col)| {
            let c = self.pixel_center(row, col);
            match transform.locate(c.lon, c.lat, src_dim) {
                Some(idx) => data[idx],
                None => Reflectance::NAN,
            }
        })
    }
}
