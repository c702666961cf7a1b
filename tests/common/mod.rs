#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use lulcsat::{GeoTransform, LandCoverClass, MemorySceneSource, RunConfig};
use ndarray::{s, Array2};
use std::collections::HashMap;

/// Fixture extent: a little larger than the reference region
pub const WEST: f64 = 78.10;
pub const NORTH: f64 = 30.05;
pub const PIXEL_DEG: f64 = 0.0005;
pub const COLS: usize = 360;
pub const ROWS: usize = 400;

pub const BANDS: [&str; 4] = ["B3", "B4", "B8", "B11"];

/// Fixture rows and columns where B8 is missing in every 2023 scene
/// (lon 78.23 to 78.26, lat 29.87 to 29.90, no reference point inside)
pub const GAP_ROWS: std::ops::Range<usize> = 300..360;
pub const GAP_COLS: std::ops::Range<usize> = 260..320;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Digital numbers (B3, B4, B8, B11) of a pure pixel of each class
pub fn signature(class: LandCoverClass) -> [f32; 4] {
    match class {
        LandCoverClass::NonForest => [800.0, 900.0, 2000.0, 1800.0],
        LandCoverClass::Forest => [500.0, 300.0, 3500.0, 1500.0],
        LandCoverClass::Urban => [1200.0, 1300.0, 1600.0, 2400.0],
        LandCoverClass::Water => [1500.0, 900.0, 400.0, 200.0],
        LandCoverClass::BareLand => [1400.0, 1800.0, 2200.0, 3000.0],
    }
}

/// Ground truth of the synthetic landscape: the class of the nearest
/// reference point of the default configuration
pub fn truth_at(lon: f64, lat: f64) -> LandCoverClass {
    let config = RunConfig::default();
    let mut best = (f64::INFINITY, LandCoverClass::NonForest);
    for p in &config.labeled_points {
        let d = (p.lon - lon).powi(2) + (p.lat - lat).powi(2);
        if d < best.0 {
            if let Some(class) = LandCoverClass::from_label(p.class) {
                best = (d, class);
            }
        }
    }
    best.1
}

fn scene_bands(gain: f32, west: f64, north: f64) -> HashMap<String, Array2<f32>> {
    let mut classes = Array2::from_elem((ROWS, COLS), LandCoverClass::NonForest);
    for ((row, col), class) in classes.indexed_iter_mut() {
        let lon = west + (col as f64 + 0.5) * PIXEL_DEG;
        let lat = north - (row as f64 + 0.5) * PIXEL_DEG;
        *class = truth_at(lon, lat);
    }
    BANDS
        .iter()
        .enumerate()
        .map(|(b, name)| (name.to_string(), classes.map(|c| signature(*c)[b] * gain)))
        .collect()
}

/// Three usable 2023 scenes plus one outside the date range and one far away
pub fn landscape() -> MemorySceneSource {
    build_landscape(false)
}

/// As `landscape`, with the NIR band missing over `GAP_ROWS` x `GAP_COLS`
pub fn landscape_with_gap() -> MemorySceneSource {
    build_landscape(true)
}

fn build_landscape(gap: bool) -> MemorySceneSource {
    let transform = GeoTransform::north_up(WEST, NORTH, PIXEL_DEG, PIXEL_DEG);
    let mut source = MemorySceneSource::new();

    for (i, (month, gain)) in [(3u32, 1.00f32), (6, 1.01), (10, 1.02)].iter().enumerate() {
        let acquired = Utc.with_ymd_and_hms(2023, *month, 5, 5, 16, 41).unwrap();
        let mut bands = scene_bands(*gain, WEST, NORTH);
        if gap {
            if let Some(nir) = bands.get_mut("B8") {
                nir.slice_mut(s![GAP_ROWS, GAP_COLS]).fill(f32::NAN);
            }
        }
        source
            .add_scene(&format!("S2_2023_{}", i), "COPERNICUS/S2", acquired, transform.clone(), bands)
            .unwrap();
    }

    // same place, wrong year, flooded everywhere
    let mut flooded = HashMap::new();
    for (b, name) in BANDS.iter().enumerate() {
        flooded.insert(name.to_string(), Array2::from_elem((ROWS, COLS), signature(LandCoverClass::Water)[b]));
    }
    source
        .add_scene("S2_2022", "COPERNICUS/S2", Utc.with_ymd_and_hms(2022, 8, 1, 5, 0, 0).unwrap(), transform, flooded)
        .unwrap();

    let elsewhere = GeoTransform::north_up(10.0, 45.0, PIXEL_DEG, PIXEL_DEG);
    source
        .add_scene(
            "S2_ALPS",
            "COPERNICUS/S2",
            Utc.with_ymd_and_hms(2023, 7, 1, 10, 0, 0).unwrap(),
            elsewhere,
            scene_bands(1.0, 10.0, 45.0),
        )
        .unwrap();

    source
}
