use crate::core::region::AnalysisGrid;
use crate::types::{BandImage, GeoTransform, LulcError, LulcResult, Reflectance};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::Dataset;
use ndarray::Array2;

/// Read the first band of a raster and sample it at every analysis-grid
/// pixel centre (nearest neighbour). Digital number 0 and the band's
/// no-data value become NaN.
pub fn read_band_on_grid(path: &str, grid: &AnalysisGrid) -> LulcResult<BandImage> {
    log::debug!("Reading raster band from: {}", path);

    let dataset = Dataset::open(path)?;
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();
    log::debug!("Raster size: {}x{}, geotransform: {:?}", width, height, transform);

    let rasterband = dataset.rasterband(1)?;
    let no_data = rasterband.no_data_value();
    let buffer = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
    let data = Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| LulcError::Processing(format!("Failed to reshape band data: {}", e)))?;

    // grid centres are lon/lat; the raster is usually in UTM
    let wgs84 = SpatialRef::from_epsg(4326)?;
    wgs84.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    let target = dataset.spatial_ref()?;
    target.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    let to_raster = CoordTransform::new(&wgs84, &target)?;

    let (rows, cols) = grid.dim();
    let mut xs = Vec::with_capacity(rows * cols);
    let mut ys = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let c = grid.pixel_center(row, col);
            xs.push(c.lon);
            ys.push(c.lat);
        }
    }
    let mut zs = vec![0.0; xs.len()];
    to_raster.transform_coords(&mut xs, &mut ys, &mut zs)?;

    let out = Array2::from_shape_fn((rows, cols), |(row, col)| {
        let i = row * cols + col;
        match transform.locate(xs[i], ys[i], (height, width)) {
            Some(px) => {
                let v = data[px];
                let is_no_data = no_data.map_or(false, |nd| f64::from(v) == nd);
                if v == 0.0 || is_no_data || !v.is_finite() {
                    Reflectance::NAN
                } else {
                    v
                }
            }
            None => Reflectance::NAN,
        }
    });

    log::debug!(
        "Sampled {} of {} grid pixels from {}",
        out.iter().filter(|v| v.is_finite()).count(),
        out.len(),
        path
    );
    Ok(out)
}
