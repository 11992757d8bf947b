use image::{DynamicImage, GenericImageView};

use crate::{
    config::ExtractionConfig,
    entities::DetectedRegion,
    geometry::{BBox, Rotation},
    layout::{nms::sort_reading_order, LayoutDetector},
};

/// Weight of one markup character relative to one detected table when ranking
/// orientations.
pub const DEFAULT_MARKUP_WEIGHT: f64 = 0.001;

/// Best page orientation found by [`select_orientation`].
#[derive(Debug, Clone)]
pub struct Orientation {
    pub rotation: Rotation,
    pub score: f64,
    /// Tables in the unrotated page frame, in reading order.
    pub tables: Vec<DetectedRegion>,
}

/// `table_count + markup_weight * total markup characters`.
pub fn orientation_score(tables: &[DetectedRegion], markup_weight: f64) -> f64 {
    let markup_chars: usize = tables.iter().map(DetectedRegion::markup_chars).sum();
    tables.len() as f64 + markup_weight * markup_chars as f64
}

/// Runs the detector on the page rotated by `rotation` and returns the confident table
/// regions mapped back to the page frame.
pub fn detect_tables_at<D: LayoutDetector + ?Sized>(
    detector: &mut D,
    page: &DynamicImage,
    rotation: Rotation,
    conf_threshold: f32,
) -> anyhow::Result<Vec<DetectedRegion>> {
    let (width, height) = page.dimensions();
    let rotated = rotation.apply(page);
    let (rotated_width, rotated_height) = rotated.dimensions();

    let regions = detector.detect(&rotated)?;
    let tables = regions
        .into_iter()
        .filter(|r| r.is_table() && r.confidence >= conf_threshold)
        .map(|r| {
            let BBox { x1, y1, x2, y2 } = r.bbox;
            let upright = DetectedRegion {
                bbox: BBox::normalize([x1, y1, x2, y2], rotated_width, rotated_height),
                ..r
            };
            upright.mapped_back(rotation, width, height)
        })
        .collect();
    Ok(tables)
}

/// Tries the four page orientations and keeps the one with the highest score.
///
/// Orientations without tables are skipped and ties keep the earlier angle. Returns
/// `Ok(None)` when no orientation yields a table, and an error only when the detector
/// failed for every orientation.
#[tracing::instrument(skip_all)]
pub fn select_orientation<D: LayoutDetector + ?Sized>(
    detector: &mut D,
    page: &DynamicImage,
    conf_threshold: f32,
    markup_weight: f64,
) -> anyhow::Result<Option<Orientation>> {
    let mut best: Option<Orientation> = None;
    let mut failures = 0;
    let mut last_error = None;

    for rotation in Rotation::ALL {
        let tables = match detect_tables_at(detector, page, rotation, conf_threshold) {
            Ok(tables) => tables,
            Err(e) => {
                tracing::warn!("table detection at {}° failed: {e:#}", rotation.degrees());
                failures += 1;
                last_error = Some(e);
                continue;
            }
        };
        if tables.is_empty() {
            continue;
        }

        let score = orientation_score(&tables, markup_weight);
        tracing::debug!(
            "{}°: {} tables, score {score:.3}",
            rotation.degrees(),
            tables.len()
        );
        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(Orientation {
                rotation,
                score,
                tables,
            });
        }
    }

    if failures == Rotation::ALL.len() {
        if let Some(e) = last_error {
            return Err(e.context("table detection failed for every orientation"));
        }
    }

    if let Some(best) = best.as_mut() {
        sort_reading_order(&mut best.tables);
        tracing::info!(
            "selected orientation {}° with {} tables",
            best.rotation.degrees(),
            best.tables.len()
        );
    }
    Ok(best)
}

/// Page tables in reading order, honoring the rotation search setting.
pub fn detect_page_tables<D: LayoutDetector + ?Sized>(
    detector: &mut D,
    page: &DynamicImage,
    config: &ExtractionConfig,
) -> anyhow::Result<Vec<DetectedRegion>> {
    if config.detect_rotation {
        let orientation = select_orientation(
            detector,
            page,
            config.table_conf_threshold,
            config.orientation_markup_weight,
        )?;
        Ok(orientation.map(|o| o.tables).unwrap_or_default())
    } else {
        let mut tables =
            detect_tables_at(detector, page, Rotation::Deg0, config.table_conf_threshold)?;
        sort_reading_order(&mut tables);
        Ok(tables)
    }
}
