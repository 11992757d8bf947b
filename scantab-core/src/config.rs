use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    engines::EngineMode, layout::orientation::DEFAULT_MARKUP_WEIGHT,
    table::validate::ValidationConfig,
};

/// Smallest accepted rendering zoom, roughly 36 DPI.
pub const MIN_PDF_ZOOM: f32 = 0.5;

/// Knobs of the extraction pipeline.
///
/// Every field has a default, so a partial JSON file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Zoom factor used to rasterize PDF pages (1.0 is 72 DPI).
    pub pdf_zoom: f32,
    /// Minimum detector confidence for a table region.
    pub table_conf_threshold: f32,
    /// IoU at or above which the less confident of two tables is dropped.
    pub iou_threshold: f64,
    /// Try the four page orientations before extracting tables.
    pub detect_rotation: bool,
    pub orientation_markup_weight: f64,
    pub trim_whitespace: bool,
    pub clean_empty_rows: bool,
    pub clean_empty_cols: bool,
    pub min_table_rows: usize,
    pub min_table_cols: usize,
    pub max_empty_cell_ratio: f64,
    /// Repair mojibake and collapse whitespace in recognized text.
    pub clean_text: bool,
    /// Take the text of table-free PDF pages from their text layer.
    pub use_embedded_text: bool,
    /// The text layer is used only when it holds more characters than this.
    pub min_embedded_text_chars: usize,
    pub engine_mode: EngineMode,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            pdf_zoom: 2.0,
            table_conf_threshold: 0.5,
            iou_threshold: 0.5,
            detect_rotation: true,
            orientation_markup_weight: DEFAULT_MARKUP_WEIGHT,
            trim_whitespace: true,
            clean_empty_rows: true,
            clean_empty_cols: true,
            min_table_rows: 1,
            min_table_cols: 1,
            max_empty_cell_ratio: 0.9,
            clean_text: true,
            use_embedded_text: true,
            min_embedded_text_chars: 100,
            engine_mode: EngineMode::Cpu,
        }
    }
}

impl ExtractionConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("can't read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.pdf_zoom >= MIN_PDF_ZOOM) {
            anyhow::bail!(
                "pdf_zoom must be at least {MIN_PDF_ZOOM}, got {}",
                self.pdf_zoom
            );
        }
        if !(0.0..=1.0).contains(&self.table_conf_threshold) {
            anyhow::bail!(
                "table_conf_threshold must be within [0, 1], got {}",
                self.table_conf_threshold
            );
        }
        for (name, value) in [
            ("iou_threshold", self.iou_threshold),
            ("max_empty_cell_ratio", self.max_empty_cell_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{name} must be within [0, 1], got {value}");
            }
        }
        if !(self.orientation_markup_weight >= 0.0) {
            anyhow::bail!(
                "orientation_markup_weight must be positive, got {}",
                self.orientation_markup_weight
            );
        }
        Ok(())
    }

    pub fn validation(&self) -> ValidationConfig {
        ValidationConfig {
            trim_whitespace: self.trim_whitespace,
            clean_empty_rows: self.clean_empty_rows,
            clean_empty_cols: self.clean_empty_cols,
            min_rows: self.min_table_rows,
            min_cols: self.min_table_cols,
            max_empty_ratio: self.max_empty_cell_ratio,
        }
    }
}
