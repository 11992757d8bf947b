use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::geometry::{BBox, Rotation};

pub type PageNumber = usize;
pub type TableNumber = usize;

const SCANTAB_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", content = "label", rename_all = "snake_case")]
pub enum RegionKind {
    Table,
    Other(String),
}

impl RegionKind {
    pub fn from_label(label: &str) -> Self {
        if label.trim().eq_ignore_ascii_case("table") {
            RegionKind::Table
        } else {
            RegionKind::Other(label.to_owned())
        }
    }
}

/// A region reported by a layout detector.
///
/// The box is expressed in the frame of the image handed to the detector until the
/// region is [mapped back](DetectedRegion::mapped_back) to the page frame.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DetectedRegion {
    pub bbox: BBox,
    pub kind: RegionKind,
    pub confidence: f32,
    /// Structural markup of a table, when the detector recognizes it directly.
    pub markup: Option<String>,
    /// Page rotation the region was detected under.
    pub rotation: Rotation,
}

impl DetectedRegion {
    pub fn new(bbox: BBox, kind: RegionKind, confidence: f32) -> Self {
        Self {
            bbox,
            kind,
            confidence,
            markup: None,
            rotation: Rotation::Deg0,
        }
    }

    pub fn table(bbox: BBox, confidence: f32) -> Self {
        Self::new(bbox, RegionKind::Table, confidence)
    }

    pub fn with_markup(mut self, markup: impl Into<String>) -> Self {
        self.markup = Some(markup.into());
        self
    }

    #[inline]
    pub fn is_table(&self) -> bool {
        self.kind == RegionKind::Table
    }

    /// Number of characters of markup carried by the region.
    #[inline]
    pub fn markup_chars(&self) -> usize {
        self.markup.as_deref().map_or(0, |m| m.chars().count())
    }

    /// Copy of the region expressed in the unrotated `width x height` frame, tagged with
    /// the rotation it was detected under.
    pub fn mapped_back(&self, rotation: Rotation, width: u32, height: u32) -> Self {
        Self {
            bbox: self.bbox.map_back(rotation, width, height),
            rotation,
            ..self.clone()
        }
    }
}

/// A table cell as written in the markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cell {
    pub text: String,
    pub rowspan: usize,
    pub colspan: usize,
    /// Top-left `(row, col)` position once placed in a grid.
    pub anchor: Option<(usize, usize)>,
}

impl Cell {
    pub fn new(text: impl Into<String>, rowspan: usize, colspan: usize) -> Self {
        Self {
            text: text.into(),
            rowspan: rowspan.max(1),
            colspan: colspan.max(1),
            anchor: None,
        }
    }

    pub fn anchored(&self, row: usize, col: usize) -> Self {
        Self {
            anchor: Some((row, col)),
            ..self.clone()
        }
    }
}

/// Dense `rows x cols` table of cell text. Every row has the same length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Grid {
    #[serde(rename = "columns")]
    n_cols: usize,
    #[serde(rename = "data")]
    rows: Vec<Vec<String>>,
}

impl Grid {
    /// Builds a grid, padding shorter rows with empty strings.
    pub fn new(mut rows: Vec<Vec<String>>) -> Self {
        let n_cols = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in rows.iter_mut() {
            row.resize(n_cols, String::new());
        }
        Self { n_cols, rows }
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.n_rows() * self.n_cols()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_count() == 0
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedTable {
    pub page_number: PageNumber,
    /// 1-based, unique within the page, follows reading order.
    pub table_number: TableNumber,
    pub bbox: BBox,
    pub confidence: f32,
    pub rotation: Rotation,
    pub score: f64,
    pub grid: Grid,
    /// Cell boxes reported by the structure engine, in the frame of the upright crop.
    pub cell_bboxes: Vec<BBox>,
    /// Upright crop of the table, kept for exports.
    #[serde(skip)]
    pub crop: Option<DynamicImage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TextRegion {
    pub bbox: BBox,
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageMode {
    /// Tables were extracted and masked before text recognition.
    Tables,
    /// No usable table: the whole page went through text recognition.
    TextOnly,
}

/// Where the text block of a page comes from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    #[default]
    Ocr,
    /// The PDF text layer, used instead of recognition on pages without tables.
    Embedded,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    /// 1-based page number in the source document.
    pub page_number: PageNumber,
    /// Marker printed before the page content.
    pub header: String,
    pub width: u32,
    pub height: u32,
    pub mode: PageMode,
    pub tables: Vec<ExtractedTable>,
    pub text_block: String,
    pub text_source: TextSource,
}

impl PageResult {
    /// Result for a page that could not be processed at all.
    pub fn empty(page_number: PageNumber, header: String) -> Self {
        Self {
            page_number,
            header,
            width: 0,
            height: 0,
            mode: PageMode::TextOnly,
            tables: Vec::new(),
            text_block: String::new(),
            text_source: TextSource::Ocr,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentMetadata {
    pub table_count: usize,
    pub page_count: usize,
    #[serde(with = "serde_millis")]
    pub parsing_duration: Duration,
    pub scantab_version: String,
}

impl DocumentMetadata {
    pub fn new(pages: &[PageResult], parsing_duration: Duration) -> Self {
        Self {
            table_count: pages.iter().map(|p| p.tables.len()).sum(),
            page_count: pages.len(),
            parsing_duration,
            scantab_version: SCANTAB_VERSION.to_owned(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ParsedDocument {
    pub doc_name: String,
    pub pages: Vec<PageResult>,
    pub debug_path: Option<PathBuf>,
    pub metadata: DocumentMetadata,
}

impl ParsedDocument {
    pub fn tables(&self) -> impl Iterator<Item = &ExtractedTable> {
        self.pages.iter().flat_map(|p| p.tables.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_kind_from_label() {
        assert_eq!(RegionKind::from_label("Table"), RegionKind::Table);
        assert_eq!(RegionKind::from_label(" table "), RegionKind::Table);
        assert_eq!(
            RegionKind::from_label("Text"),
            RegionKind::Other("Text".to_owned())
        );
    }

    #[test]
    fn test_mapped_back_is_new_instance() {
        let region = DetectedRegion::table(BBox::new(10, 20, 90, 120), 0.9).with_markup("<t>");
        let mapped = region.mapped_back(Rotation::Deg90, 200, 100);

        assert_eq!(region.rotation, Rotation::Deg0);
        assert_eq!(region.bbox, BBox::new(10, 20, 90, 120));
        assert_eq!(mapped.rotation, Rotation::Deg90);
        assert_eq!(mapped.bbox, BBox::new(79, 10, 179, 90));
        assert_eq!(mapped.markup.as_deref(), Some("<t>"));
        assert_eq!(mapped.markup_chars(), 3);
    }

    #[test]
    fn test_grid_pads_ragged_rows() {
        let grid = Grid::new(vec![
            vec!["a".to_owned()],
            vec!["b".to_owned(), "c".to_owned(), "d".to_owned()],
        ]);
        assert_eq!(grid.n_rows(), 2);
        assert_eq!(grid.n_cols(), 3);
        assert_eq!(grid.get(0, 2), Some(""));
        assert_eq!(grid.get(1, 2), Some("d"));
        assert_eq!(grid.get(2, 0), None);
        assert!(grid.rows().iter().all(|r| r.len() == 3));
    }

    #[test]
    fn test_cell_spans_at_least_one() {
        let cell = Cell::new("x", 0, 0);
        assert_eq!((cell.rowspan, cell.colspan), (1, 1));
        assert_eq!(cell.anchored(2, 3).anchor, Some((2, 3)));
    }

    #[test]
    fn test_metadata_counts() {
        let mut page = PageResult::empty(1, "-- PAGE 1 --".to_owned());
        page.tables.push(ExtractedTable {
            page_number: 1,
            table_number: 1,
            bbox: BBox::default(),
            confidence: 1.0,
            rotation: Rotation::Deg0,
            score: 1.0,
            grid: Grid::default(),
            cell_bboxes: Vec::new(),
            crop: None,
        });
        let pages = vec![page, PageResult::empty(2, "-- PAGE 2 --".to_owned())];
        let metadata = DocumentMetadata::new(&pages, Duration::from_millis(12));
        assert_eq!(metadata.table_count, 1);
        assert_eq!(metadata.page_count, 2);

        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["parsing_duration"], 12);
    }
}
