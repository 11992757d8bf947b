use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::{
    entities::{DetectedRegion, ExtractedTable, TextRegion},
    geometry::BBox,
};

const LAYOUT_COLOR: [u8; 4] = [0, 0, 255, 255];
const TABLE_COLOR: [u8; 4] = [209, 139, 0, 255];
const TEXT_COLOR: [u8; 4] = [17, 138, 1, 255];

fn draw_bbox(out_img: &mut RgbaImage, bbox: &BBox, color: [u8; 4], thickness: u32) {
    let width = bbox.width().max(1) as u32;
    let height = bbox.height().max(1) as u32;
    for offset in 0..thickness as i32 {
        let (w, h) = (
            width.saturating_sub(2 * offset as u32),
            height.saturating_sub(2 * offset as u32),
        );
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at(bbox.x1 + offset, bbox.y1 + offset).of_size(w, h);
        draw_hollow_rect_mut(out_img, rect, Rgba(color));
    }
}

/// Overlays the page with every detected region, the accepted tables and the
/// recognized text lines.
pub(crate) fn draw_page_debug(
    page_img: &DynamicImage,
    regions: &[DetectedRegion],
    tables: &[ExtractedTable],
    text_regions: &[TextRegion],
) -> RgbaImage {
    let mut out_img = page_img.to_rgba8();
    for region in regions {
        draw_bbox(&mut out_img, &region.bbox, LAYOUT_COLOR, 1);
    }
    for table in tables {
        draw_bbox(&mut out_img, &table.bbox, TABLE_COLOR, 3);
    }
    for line in text_regions {
        draw_bbox(&mut out_img, &line.bbox, TEXT_COLOR, 1);
    }
    out_img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_page_debug_colors() {
        let page = DynamicImage::new_rgb8(50, 50);
        let regions = vec![DetectedRegion::table(BBox::new(5, 5, 20, 20), 0.9)];
        let text = vec![TextRegion {
            bbox: BBox::new(30, 30, 45, 40),
            text: "x".to_owned(),
            confidence: 1.0,
        }];
        let out = draw_page_debug(&page, &regions, &[], &text);
        assert_eq!(out.get_pixel(5, 5), &Rgba(LAYOUT_COLOR));
        assert_eq!(out.get_pixel(30, 35), &Rgba(TEXT_COLOR));
        assert_eq!(out.get_pixel(10, 10), &Rgba([0, 0, 0, 255]));
    }
}
