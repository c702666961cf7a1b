//! Report and map sinks, palette and legend derived from the class table

use crate::core::area::ClassAreaResult;
use crate::core::classifier::ClassifiedRaster;
use crate::core::validation::{ConfusionMatrix, ValidationReport};
use crate::types::{ClassInfo, LandCoverClass, LulcResult};
use serde::{Deserialize, Serialize};

/// One legend entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendRow {
    pub color: String,
    pub name: String,
}

/// Legend rows in class-id order
pub fn legend_rows(classes: &[ClassInfo]) -> Vec<LegendRow> {
    let mut sorted: Vec<&ClassInfo> = classes.iter().collect();
    sorted.sort_by_key(|c| c.id);
    sorted
        .into_iter()
        .map(|c| LegendRow { color: c.color.clone(), name: c.name.clone() })
        .collect()
}

/// Raster palette indexed by class id
pub fn palette(classes: &[ClassInfo]) -> Vec<String> {
    legend_rows(classes).into_iter().map(|r| r.color).collect()
}

/// Legend entry whose color disagrees with the class table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendMismatch {
    pub name: String,
    pub table_color: String,
    pub legend_color: String,
}

/// Compare an externally supplied legend against the class table by name.
/// Mismatches are logged and returned; nothing is corrected.
pub fn check_legend_consistency(classes: &[ClassInfo], legend: &[LegendRow]) -> Vec<LegendMismatch> {
    let mut mismatches = Vec::new();
    for row in legend {
        if let Some(class) = classes.iter().find(|c| c.name == row.name) {
            if !class.color.eq_ignore_ascii_case(&row.color) {
                log::warn!(
                    "Legend shows '{}' as {} but the class table colors it {}",
                    row.name, row.color, class.color
                );
                mismatches.push(LegendMismatch {
                    name: row.name.clone(),
                    table_color: class.color.clone(),
                    legend_color: row.color.clone(),
                });
            }
        }
    }
    mismatches
}

/// Destination for key/value metrics
pub trait ReportSink {
    fn section(&mut self, title: &str, entries: &[(String, f64)]) -> LulcResult<()>;

    fn confusion_matrix(&mut self, title: &str, matrix: &ConfusionMatrix) -> LulcResult<()> {
        let entries: Vec<(String, f64)> = LandCoverClass::ALL
            .iter()
            .flat_map(|&actual| {
                LandCoverClass::ALL
                    .iter()
                    .map(move |&predicted| (format!("{} -> {}", actual, predicted), matrix.count(actual, predicted) as f64))
            })
            .collect();
        self.section(title, &entries)
    }
}

/// Destination for the classified map layer and its legend
pub trait MapSink {
    fn add_layer(&mut self, name: &str, raster: &ClassifiedRaster, palette: &[String]) -> LulcResult<()>;

    fn add_legend(&mut self, rows: &[LegendRow]) -> LulcResult<()>;
}

/// Writes every report section through the `log` facade
#[derive(Debug, Default)]
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn section(&mut self, title: &str, entries: &[(String, f64)]) -> LulcResult<()> {
        log::info!("{}:", title);
        for (key, value) in entries {
            log::info!("  {}: {}", key, value);
        }
        Ok(())
    }
}

/// Send validation metrics and class areas to a report sink
pub fn report_results(
    sink: &mut dyn ReportSink,
    classes: &[ClassInfo],
    validations: &[&ValidationReport],
    areas: &ClassAreaResult,
) -> LulcResult<()> {
    for report in validations {
        let title = format!("Validation ({})", report.kind.description());
        sink.confusion_matrix(&format!("{} confusion matrix", title), &report.matrix)?;
        sink.section(
            &title,
            &[
                ("Overall Accuracy".to_string(), report.accuracy()),
                ("Kappa Coefficient".to_string(), report.kappa()),
            ],
        )?;
    }

    let entries: Vec<(String, f64)> = areas
        .classes
        .iter()
        .map(|a| {
            let name = classes
                .iter()
                .find(|c| c.id == a.class.label())
                .map_or_else(|| a.class.name().to_string(), |c| c.name.clone());
            (format!("{} Area (km²)", name), a.area_km2)
        })
        .collect();
    let title = if areas.approximate {
        format!("Class areas (approximate, {} m)", areas.scale_m)
    } else {
        "Class areas".to_string()
    };
    sink.section(&title, &entries)
}

/// Send the classified layer with palette and legend to a map sink
pub fn render_map(sink: &mut dyn MapSink, classes: &[ClassInfo], raster: &ClassifiedRaster) -> LulcResult<()> {
    sink.add_layer("Classified Map", raster, &palette(classes))?;
    sink.add_legend(&legend_rows(classes))
}
