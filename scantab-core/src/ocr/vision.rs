use std::io::Cursor;

use image::DynamicImage;
use objc2::ClassType;
use objc2_foundation::{CGRect, NSArray, NSData, NSDictionary};
use objc2_vision::{VNImageRequestHandler, VNRecognizeTextRequest, VNRequest};

use crate::{entities::TextRegion, geometry::BBox, ocr::TextEngine};

/// Vision normalized rect (origin bottom-left) to pixel box (origin top-left).
#[inline]
fn cgrect_to_bbox(bbox: &CGRect, img_width: u32, img_height: u32) -> BBox {
    let x0 = bbox.origin.x as f32 * img_width as f32;
    let y1 = (1f32 - bbox.origin.y as f32) * img_height as f32;
    let x1 = x0 + bbox.size.width as f32 * img_width as f32;
    let y0 = y1 - bbox.size.height as f32 * img_height as f32;
    BBox::normalize_f32([x0, y0, x1, y1], img_width, img_height)
}

/// Apple Vision text recognizer.
#[derive(Debug, Clone)]
pub struct VisionTextEngine {
    pub min_confidence: f32,
    pub language_correction: bool,
}

impl Default for VisionTextEngine {
    fn default() -> Self {
        Self {
            min_confidence: 0f32,
            language_correction: true,
        }
    }
}

impl TextEngine for VisionTextEngine {
    #[tracing::instrument(skip_all)]
    fn recognize(&mut self, image: &DynamicImage) -> anyhow::Result<Vec<TextRegion>> {
        let (img_width, img_height) = (image.width(), image.height());

        let mut lines = Vec::new();
        unsafe {
            let request = VNRecognizeTextRequest::new();
            request.setRecognitionLevel(objc2_vision::VNRequestTextRecognitionLevel::Accurate);
            request.setUsesLanguageCorrection(self.language_correction);

            let mut buffer: Cursor<Vec<u8>> = Cursor::new(Vec::new());
            image.write_to(&mut buffer, image::ImageFormat::Png)?;

            let handler = VNImageRequestHandler::initWithData_options(
                VNImageRequestHandler::alloc(),
                &NSData::with_bytes(buffer.get_ref()),
                &NSDictionary::new(),
            );
            let requests = NSArray::from_slice(&[request.as_ref() as &VNRequest]);
            handler.performRequests_error(&requests)?;

            if let Some(result) = request.results() {
                for recognized in result.to_vec() {
                    if (*recognized).confidence() <= self.min_confidence {
                        continue;
                    }
                    if let Some(candidate) = recognized.topCandidates(1).first() {
                        let bbox = (*recognized).boundingBox();
                        lines.push(TextRegion {
                            bbox: cgrect_to_bbox(&bbox, img_width, img_height),
                            text: candidate.string().to_string(),
                            confidence: candidate.confidence(),
                        })
                    }
                }
            }
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objc2_foundation::{CGPoint, CGSize};

    #[test]
    fn test_cgrect_to_bbox_flips_y() {
        let rect = CGRect {
            origin: CGPoint { x: 0.1, y: 0.5 },
            size: CGSize {
                width: 0.5,
                height: 0.25,
            },
        };
        assert_eq!(cgrect_to_bbox(&rect, 200, 100), BBox::new(20, 25, 120, 50));
    }
}
