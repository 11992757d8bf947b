use std::{path::Path, time::Instant};

use anyhow::Context;
use image::{DynamicImage, Rgb};
use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};
use tracing::instrument;

use crate::{
    config::ExtractionConfig,
    draw::draw_page_debug,
    engines::PageEngines,
    entities::{
        DetectedRegion, ExtractedTable, PageMode, PageNumber, PageResult, TextRegion, TextSource,
    },
    error::EngineError,
    geometry::BBox,
    layout::{nms::filter_overlapping, orientation::detect_page_tables},
    ocr::{clean_text, join_lines},
    table::{reconstruct_grid, validate::assess},
};

const MASK_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Copy of the page with every table painted blank so the text engine skips them.
pub fn mask_regions(page: &DynamicImage, tables: &[ExtractedTable]) -> DynamicImage {
    let mut masked = page.to_rgb8();
    for table in tables {
        if let Some((x, y, w, h)) = table.bbox.pixel_rect() {
            draw_filled_rect_mut(&mut masked, Rect::at(x as i32, y as i32).of_size(w, h), MASK_COLOR);
        }
    }
    DynamicImage::ImageRgb8(masked)
}

/// Crop of the region turned back upright, as its detector saw it.
fn upright_crop(page: &DynamicImage, region: &DetectedRegion) -> Option<DynamicImage> {
    let (x, y, w, h) = region.bbox.pixel_rect()?;
    Some(region.rotation.apply(&page.crop_imm(x, y, w, h)))
}

/// Markup carried by the detector, or asked from the structure engine along with its
/// cell boxes.
fn region_markup(
    region: &DetectedRegion,
    crop: Option<&DynamicImage>,
    engines: &mut PageEngines<'_>,
) -> anyhow::Result<(String, Vec<BBox>)> {
    if let Some(markup) = &region.markup {
        return Ok((markup.clone(), Vec::new()));
    }
    let crop = crop.context("table region has no pixels")?;
    let engine = engines
        .structure
        .as_deref_mut()
        .ok_or(EngineError::Unavailable("table structure"))?;
    let structure = engine.recognize(crop)?;
    let cells = structure.cells.into_iter().map(|cell| cell.bbox).collect();
    Ok((structure.markup, cells))
}

fn extract_tables(
    page_number: PageNumber,
    page: &DynamicImage,
    regions: &[DetectedRegion],
    engines: &mut PageEngines<'_>,
    config: &ExtractionConfig,
) -> Vec<ExtractedTable> {
    let validation = config.validation();
    let mut tables = Vec::with_capacity(regions.len());

    for (idx, region) in regions.iter().enumerate() {
        let crop = upright_crop(page, region);
        let (markup, cell_bboxes) = match region_markup(region, crop.as_ref(), engines) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("page {page_number}: dropping region #{idx}, no structure: {e:#}");
                continue;
            }
        };
        let expansion = match reconstruct_grid(Some(&markup)) {
            Ok(expansion) => expansion,
            Err(e) => {
                tracing::warn!("page {page_number}: dropping region #{idx}: {e}");
                continue;
            }
        };
        match assess(&expansion.grid, &validation) {
            Ok(accepted) => tables.push(ExtractedTable {
                page_number,
                table_number: tables.len() + 1,
                bbox: region.bbox,
                confidence: region.confidence,
                rotation: region.rotation,
                score: accepted.score,
                grid: accepted.grid,
                cell_bboxes,
                crop,
            }),
            Err(reason) => {
                tracing::debug!("page {page_number}: rejected region #{idx}: {reason}")
            }
        }
    }
    tables
}

fn recognize_text(
    page_number: PageNumber,
    image: &DynamicImage,
    engines: &mut PageEngines<'_>,
    config: &ExtractionConfig,
) -> (String, Vec<TextRegion>) {
    let Some(engine) = engines.text.as_deref_mut() else {
        tracing::warn!("page {page_number}: no text engine, text block left empty");
        return (String::new(), Vec::new());
    };
    match engine.recognize(image) {
        Ok(lines) => {
            let text = join_lines(&lines);
            let text = if config.clean_text {
                clean_text(&text)
            } else {
                text
            };
            (text, lines)
        }
        Err(e) => {
            tracing::error!("page {page_number}: text recognition failed: {e:#}");
            (String::new(), Vec::new())
        }
    }
}

/// Text layer of the page when it is long enough to stand in for recognition.
fn usable_embedded_text<'t>(
    embedded_text: Option<&'t str>,
    config: &ExtractionConfig,
) -> Option<&'t str> {
    if !config.use_embedded_text {
        return None;
    }
    let text = embedded_text?.trim();
    (text.chars().count() > config.min_embedded_text_chars).then_some(text)
}

/// Extracts the tables of one page image and the text around them.
///
/// A page without tables takes its text block from `embedded_text` instead of the text
/// engine when that text layer is long enough.
///
/// Nothing here is fatal: a failed detection degrades the page to text only, a table
/// that can't be reconstructed or validated is dropped, a failed text recognition leaves
/// the text block empty.
#[instrument(skip_all, fields(page_number, layout_duration_ms, ocr_duration_ms))]
pub fn assemble_page(
    page_number: PageNumber,
    header: String,
    page: &DynamicImage,
    engines: &mut PageEngines<'_>,
    config: &ExtractionConfig,
    embedded_text: Option<&str>,
    debug_dir: Option<&Path>,
) -> PageResult {
    let span = tracing::Span::current();
    span.record("page_number", page_number);

    let start = Instant::now();
    let detected = match engines.detector.as_deref_mut() {
        Some(detector) => detect_page_tables(detector, page, config),
        None => Err(EngineError::Unavailable("layout").into()),
    };
    let (regions, tables) = match detected {
        Ok(regions) => {
            let regions = filter_overlapping(regions, config.iou_threshold);
            let tables = extract_tables(page_number, page, &regions, engines, config);
            (regions, tables)
        }
        Err(e) => {
            tracing::warn!("page {page_number}: table detection failed, text only: {e:#}");
            (Vec::new(), Vec::new())
        }
    };
    span.record("layout_duration_ms", start.elapsed().as_millis() as u64);

    let mode = if tables.is_empty() {
        PageMode::TextOnly
    } else {
        PageMode::Tables
    };

    let start = Instant::now();
    let mut text_source = TextSource::Ocr;
    let (text_block, text_regions) = match mode {
        PageMode::Tables => {
            let masked = mask_regions(page, &tables);
            recognize_text(page_number, &masked, engines, config)
        }
        PageMode::TextOnly => match usable_embedded_text(embedded_text, config) {
            Some(text) => {
                tracing::debug!("page {page_number}: using the embedded text layer");
                text_source = TextSource::Embedded;
                let text = if config.clean_text {
                    clean_text(text)
                } else {
                    text.to_owned()
                };
                (text, Vec::new())
            }
            None => recognize_text(page_number, page, engines, config),
        },
    };
    span.record("ocr_duration_ms", start.elapsed().as_millis() as u64);

    if let Some(debug_dir) = debug_dir {
        let output_file = debug_dir.join(format!("page_{page_number}.png"));
        if let Err(e) = draw_page_debug(page, &regions, &tables, &text_regions).save(&output_file)
        {
            tracing::warn!("can't save debug image {}: {e}", output_file.display());
        }
    }

    tracing::debug!(
        "page {page_number}: {} tables, {} text lines",
        tables.len(),
        text_regions.len()
    );
    PageResult {
        page_number,
        header,
        width: page.width(),
        height: page.height(),
        mode,
        tables,
        text_block,
        text_source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geometry::Rotation,
        layout::LayoutDetector,
        ocr::TextEngine,
        table::{CellHint, TableStructure, TableStructureEngine},
    };
    use image::{GenericImageView, RgbImage};

    const SIMPLE_TABLE: &str =
        "<table><tr><td>Item</td><td>Qty</td></tr><tr><td>Bolt</td><td>4</td></tr></table>";

    struct FixedDetector(Vec<DetectedRegion>);

    impl LayoutDetector for FixedDetector {
        fn detect(&mut self, _image: &DynamicImage) -> anyhow::Result<Vec<DetectedRegion>> {
            Ok(self.0.clone())
        }
    }

    struct FixedStructure {
        seen: Vec<(u32, u32)>,
        cells: Vec<CellHint>,
    }

    impl FixedStructure {
        fn new() -> Self {
            Self {
                seen: Vec::new(),
                cells: Vec::new(),
            }
        }
    }

    impl TableStructureEngine for FixedStructure {
        fn recognize(&mut self, crop: &DynamicImage) -> anyhow::Result<TableStructure> {
            self.seen.push(crop.dimensions());
            Ok(TableStructure {
                markup: SIMPLE_TABLE.to_owned(),
                cells: self.cells.clone(),
            })
        }
    }

    struct FailingText;

    impl TextEngine for FailingText {
        fn recognize(&mut self, _image: &DynamicImage) -> anyhow::Result<Vec<TextRegion>> {
            anyhow::bail!("text engine crashed")
        }
    }

    fn no_rotation() -> ExtractionConfig {
        ExtractionConfig {
            detect_rotation: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_mask_regions_paints_white() {
        let page = DynamicImage::ImageRgb8(RgbImage::new(20, 20));
        let table = ExtractedTable {
            page_number: 1,
            table_number: 1,
            bbox: BBox::new(5, 5, 10, 10),
            confidence: 1.0,
            rotation: Rotation::Deg0,
            score: 1.0,
            grid: Default::default(),
            cell_bboxes: Vec::new(),
            crop: None,
        };
        let masked = mask_regions(&page, &[table]).to_rgb8();
        assert_eq!(masked.get_pixel(5, 5), &MASK_COLOR);
        assert_eq!(masked.get_pixel(9, 9), &MASK_COLOR);
        assert_eq!(masked.get_pixel(10, 10), &Rgb([0, 0, 0]));
        assert_eq!(masked.get_pixel(4, 5), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_structure_engine_fills_missing_markup() {
        let page = DynamicImage::new_rgb8(100, 100);
        let mut detector = FixedDetector(vec![
            DetectedRegion::table(BBox::new(10, 10, 60, 30), 0.9),
            DetectedRegion::table(BBox::new(0, 50, 100, 90), 0.8).with_markup("<div>nope</div>"),
        ]);
        let mut structure = FixedStructure::new();
        let mut text = FailingText;
        let mut engines = PageEngines {
            detector: Some(&mut detector),
            structure: Some(&mut structure),
            text: Some(&mut text),
        };

        let result = assemble_page(
            1,
            "-- PAGE 1 --".to_owned(),
            &page,
            &mut engines,
            &no_rotation(),
            None,
            None,
        );

        assert_eq!(result.mode, PageMode::Tables);
        assert_eq!(result.tables.len(), 1);
        assert_eq!(result.tables[0].table_number, 1);
        assert_eq!(result.tables[0].grid.get(1, 0), Some("Bolt"));
        assert_eq!(result.text_block, "");
        assert_eq!(structure.seen, vec![(50, 20)]);
    }

    #[test]
    fn test_missing_engines_degrade_to_text_only() {
        let page = DynamicImage::new_rgb8(10, 10);
        let mut engines = PageEngines {
            detector: None,
            structure: None,
            text: None,
        };
        let result = assemble_page(
            3,
            "h".to_owned(),
            &page,
            &mut engines,
            &ExtractionConfig::default(),
            None,
            None,
        );
        assert_eq!(result.mode, PageMode::TextOnly);
        assert!(result.tables.is_empty());
        assert_eq!(result.page_number, 3);
        assert_eq!((result.width, result.height), (10, 10));
        assert_eq!(result.text_source, TextSource::Ocr);
    }

    #[test]
    fn test_rejected_region_does_not_take_a_number() {
        let page = DynamicImage::new_rgb8(100, 100);
        let mut detector = FixedDetector(vec![
            DetectedRegion::table(BBox::new(0, 0, 100, 40), 0.9)
                .with_markup("<table><tr><td> </td><td></td></tr></table>"),
            DetectedRegion::table(BBox::new(0, 60, 100, 90), 0.8).with_markup(SIMPLE_TABLE),
        ]);
        let mut engines = PageEngines {
            detector: Some(&mut detector),
            structure: None,
            text: None,
        };

        let result = assemble_page(
            2,
            "-- PAGE 2 --".to_owned(),
            &page,
            &mut engines,
            &no_rotation(),
            None,
            None,
        );

        assert_eq!(result.tables.len(), 1);
        assert_eq!(result.tables[0].table_number, 1);
        assert_eq!(result.tables[0].bbox, BBox::new(0, 60, 100, 90));
        assert_eq!(result.tables[0].grid.get(0, 0), Some("Item"));
    }

    #[test]
    fn test_structure_cells_are_kept() {
        let page = DynamicImage::new_rgb8(100, 100);
        let mut detector = FixedDetector(vec![DetectedRegion::table(BBox::new(0, 0, 80, 40), 0.9)]);
        let mut structure = FixedStructure::new();
        structure.cells = vec![
            CellHint {
                bbox: BBox::new(0, 0, 40, 20),
            },
            CellHint {
                bbox: BBox::new(40, 0, 80, 20),
            },
        ];
        let mut engines = PageEngines {
            detector: Some(&mut detector),
            structure: Some(&mut structure),
            text: None,
        };

        let result = assemble_page(
            1,
            "-- PAGE 1 --".to_owned(),
            &page,
            &mut engines,
            &no_rotation(),
            None,
            None,
        );

        assert_eq!(
            result.tables[0].cell_bboxes,
            vec![BBox::new(0, 0, 40, 20), BBox::new(40, 0, 80, 20)]
        );
    }

    #[test]
    fn test_long_embedded_text_replaces_recognition() {
        let page = DynamicImage::new_rgb8(10, 10);
        let mut text = FailingText;
        let mut engines = PageEngines {
            detector: None,
            structure: None,
            text: Some(&mut text),
        };
        let layer = format!("  {}\n", "word ".repeat(30));

        let result = assemble_page(
            1,
            "-- PAGE 1 --".to_owned(),
            &page,
            &mut engines,
            &ExtractionConfig::default(),
            Some(layer.as_str()),
            None,
        );

        assert_eq!(result.mode, PageMode::TextOnly);
        assert_eq!(result.text_source, TextSource::Embedded);
        assert_eq!(result.text_block, "word ".repeat(30).trim());
    }

    #[test]
    fn test_short_or_disabled_embedded_text_falls_back_to_recognition() {
        let page = DynamicImage::new_rgb8(10, 10);
        let mut text = FailingText;
        let mut engines = PageEngines {
            detector: None,
            structure: None,
            text: Some(&mut text),
        };
        let config = ExtractionConfig::default();

        let short = assemble_page(
            1,
            "h".to_owned(),
            &page,
            &mut engines,
            &config,
            Some("Total 42"),
            None,
        );
        assert_eq!(short.text_source, TextSource::Ocr);
        assert_eq!(short.text_block, "");

        let disabled = ExtractionConfig {
            use_embedded_text: false,
            ..Default::default()
        };
        let layer = "word ".repeat(30);
        let result = assemble_page(
            1,
            "h".to_owned(),
            &page,
            &mut engines,
            &disabled,
            Some(layer.as_str()),
            None,
        );
        assert_eq!(result.text_source, TextSource::Ocr);
    }
}
