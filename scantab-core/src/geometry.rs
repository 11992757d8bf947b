use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::InvalidAngle;

/// Axis-aligned box in pixel coordinates of a specific image.
///
/// Boxes coming out of [`BBox::normalize`] satisfy `0 <= x1 <= x2 <= width` and
/// `0 <= y1 <= y2 <= height`. Degenerate (zero width or height) boxes are legal and
/// contribute nothing to intersections or unions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    #[inline(always)]
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Builds a box that lies inside a `width x height` image.
    ///
    /// Detectors emit either `(x1, y1, x2, y2)` or `(x, y, w, h)`. When the second corner
    /// sits before the first one, the last two values are read as a width and height.
    /// Every coordinate is then clamped into the image.
    pub fn normalize(coords: [i32; 4], width: u32, height: u32) -> Self {
        let [x1, y1, mut x2, mut y2] = coords;
        if x2 < x1 || y2 < y1 {
            x2 = x1.saturating_add(x2);
            y2 = y1.saturating_add(y2);
        }
        let width = clamp_dim(width);
        let height = clamp_dim(height);
        Self {
            x1: x1.clamp(0, width),
            y1: y1.clamp(0, height),
            x2: x2.clamp(0, width),
            y2: y2.clamp(0, height),
        }
    }

    /// Same as [`BBox::normalize`] for float detector output, truncating toward zero.
    pub fn normalize_f32(coords: [f32; 4], width: u32, height: u32) -> Self {
        Self::normalize(coords.map(|v| v as i32), width, height)
    }

    #[inline(always)]
    pub fn width(&self) -> i64 {
        (self.x2 as i64 - self.x1 as i64).max(0)
    }

    #[inline(always)]
    pub fn height(&self) -> i64 {
        (self.y2 as i64 - self.y1 as i64).max(0)
    }

    #[inline(always)]
    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    #[inline(always)]
    pub fn is_degenerate(&self) -> bool {
        self.area() == 0
    }

    #[inline(always)]
    pub fn intersection(&self, other: &Self) -> i64 {
        let x1 = self.x1.max(other.x1) as i64;
        let y1 = self.y1.max(other.y1) as i64;
        let x2 = self.x2.min(other.x2) as i64;
        let y2 = self.y2.min(other.y2) as i64;
        if x2 < x1 || y2 < y1 {
            return 0;
        }
        (x2 - x1) * (y2 - y1)
    }

    #[inline(always)]
    pub fn union(&self, other: &Self) -> i64 {
        self.area() + other.area() - self.intersection(other)
    }

    /// Intersection over union, `0.0` for disjoint boxes or an empty union.
    #[inline(always)]
    pub fn iou(&self, other: &Self) -> f64 {
        let union = self.union(other);
        if union <= 0 {
            return 0.0;
        }
        self.intersection(other) as f64 / union as f64
    }

    /// Maps a box found in an image rotated by `rotation` back into the unrotated
    /// `width x height` frame.
    pub fn map_back(&self, rotation: Rotation, width: u32, height: u32) -> Self {
        let corners = [
            (self.x1, self.y1),
            (self.x2, self.y1),
            (self.x2, self.y2),
            (self.x1, self.y2),
        ]
        .map(|(x, y)| rotate_point(x, y, rotation, width, height));

        let xs = corners.map(|(x, _)| x);
        let ys = corners.map(|(_, y)| y);
        let (w, h) = (clamp_dim(width), clamp_dim(height));
        // min/max of 4 elements is never empty
        let min_x = xs.iter().copied().min().unwrap_or_default();
        let max_x = xs.iter().copied().max().unwrap_or_default();
        let min_y = ys.iter().copied().min().unwrap_or_default();
        let max_y = ys.iter().copied().max().unwrap_or_default();

        Self {
            x1: min_x.clamp(0, w),
            y1: min_y.clamp(0, h),
            x2: max_x.clamp(0, w),
            y2: max_y.clamp(0, h),
        }
    }

    /// Pixel rectangle `(x, y, width, height)` of this box, if it has a positive area.
    pub fn pixel_rect(&self) -> Option<(u32, u32, u32, u32)> {
        if self.is_degenerate() || self.x1 < 0 || self.y1 < 0 {
            return None;
        }
        Some((
            self.x1 as u32,
            self.y1 as u32,
            self.width() as u32,
            self.height() as u32,
        ))
    }
}

#[inline(always)]
fn clamp_dim(dim: u32) -> i32 {
    i32::try_from(dim).unwrap_or(i32::MAX)
}

/// One of the four lossless page orientations tried during detection.
///
/// `Deg90` is a quarter turn counter-clockwise, the others follow.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// The rotation undoing this one, i.e. `(360 - a) mod 360`.
    pub fn inverse(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg0,
            Rotation::Deg90 => Rotation::Deg270,
            Rotation::Deg180 => Rotation::Deg180,
            Rotation::Deg270 => Rotation::Deg90,
        }
    }

    /// Dimensions of a `width x height` image once rotated.
    pub fn rotated_size(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Rotation::Deg0 | Rotation::Deg180 => (width, height),
            Rotation::Deg90 | Rotation::Deg270 => (height, width),
        }
    }

    /// Rotates the image without resampling.
    pub fn apply(self, image: &DynamicImage) -> DynamicImage {
        match self {
            Rotation::Deg0 => image.clone(),
            // image's rotate* functions turn clockwise
            Rotation::Deg90 => image.rotate270(),
            Rotation::Deg180 => image.rotate180(),
            Rotation::Deg270 => image.rotate90(),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(value: Rotation) -> Self {
        value.degrees()
    }
}

impl TryFrom<u16> for Rotation {
    type Error = InvalidAngle;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(InvalidAngle(other)),
        }
    }
}

/// Maps a point of an image rotated by `rotation` back to the `width x height`
/// image it was produced from.
#[inline]
pub fn rotate_point(x: i32, y: i32, rotation: Rotation, width: u32, height: u32) -> (i32, i32) {
    let (w, h) = (clamp_dim(width), clamp_dim(height));
    match rotation {
        Rotation::Deg0 => (x, y),
        Rotation::Deg90 => (w - 1 - y, x),
        Rotation::Deg180 => (w - 1 - x, h - 1 - y),
        Rotation::Deg270 => (y, h - 1 - x),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};
    use rand::Rng;

    #[test]
    fn test_iou() {
        let bbox1 = BBox::new(0, 0, 10, 10);
        let bbox2 = BBox::new(5, 0, 15, 10);
        let bbox3 = BBox::new(20, 20, 30, 30);
        let flat = BBox::new(3, 3, 3, 9);

        assert_eq!(bbox1.iou(&bbox1), 1.0);
        assert_eq!(bbox1.iou(&bbox2), bbox2.iou(&bbox1));
        assert!((bbox1.iou(&bbox2) - 50.0 / 150.0).abs() < 1e-9);
        assert_eq!(bbox1.iou(&bbox3), 0.0);
        // Degenerate boxes contribute nothing
        assert_eq!(flat.iou(&flat), 0.0);
        assert_eq!(bbox1.iou(&flat), 0.0);
    }

    #[test]
    fn test_intersection_touching_edges() {
        let bbox1 = BBox::new(0, 0, 2, 2);
        let bbox2 = BBox::new(2, 0, 4, 2);
        assert_eq!(bbox1.intersection(&bbox2), 0);
        assert_eq!(bbox1.union(&bbox2), 8);
    }

    #[test]
    fn test_normalize_xyxy() {
        assert_eq!(
            BBox::normalize([10, 20, 30, 40], 100, 100),
            BBox::new(10, 20, 30, 40)
        );
    }

    #[test]
    fn test_normalize_xywh() {
        // (x, y, w, h) with w < x triggers the reinterpretation
        assert_eq!(
            BBox::normalize([50, 60, 20, 10], 200, 200),
            BBox::new(50, 60, 70, 70)
        );
    }

    #[test]
    fn test_normalize_clamps() {
        assert_eq!(
            BBox::normalize([-5, -5, 500, 50], 100, 80),
            BBox::new(0, 0, 100, 50)
        );
        assert_eq!(
            BBox::normalize([i32::MAX, 0, i32::MAX, 10], 100, 80),
            BBox::new(100, 0, 100, 10)
        );
    }

    #[test]
    fn test_normalize_always_inside_image() {
        let mut rng = rand::thread_rng();
        for _ in 0..2000 {
            let width = rng.gen_range(1..2000u32);
            let height = rng.gen_range(1..2000u32);
            let coords = [0; 4].map(|_| rng.gen_range(-5000..5000));
            let bbox = BBox::normalize(coords, width, height);
            assert!(bbox.x1 >= 0 && bbox.x1 <= width as i32, "{bbox:?}");
            assert!(bbox.x2 >= 0 && bbox.x2 <= width as i32, "{bbox:?}");
            assert!(bbox.y1 >= 0 && bbox.y1 <= height as i32, "{bbox:?}");
            assert!(bbox.y2 >= 0 && bbox.y2 <= height as i32, "{bbox:?}");
        }
    }

    #[test]
    fn test_iou_properties_random() {
        let mut rng = rand::thread_rng();
        let mut random_box = || {
            let x1 = rng.gen_range(0..500);
            let y1 = rng.gen_range(0..500);
            BBox::new(
                x1,
                y1,
                x1 + rng.gen_range(1..200),
                y1 + rng.gen_range(1..200),
            )
        };
        for _ in 0..1000 {
            let a = random_box();
            let b = random_box();
            let iou = a.iou(&b);
            assert_eq!(a.iou(&a), 1.0);
            assert_eq!(iou, b.iou(&a));
            assert!((0.0..=1.0).contains(&iou));
        }
    }

    #[test]
    fn test_rotate_point_corners() {
        let (w, h) = (200, 100);
        assert_eq!(rotate_point(3, 4, Rotation::Deg0, w, h), (3, 4));
        assert_eq!(rotate_point(0, 0, Rotation::Deg90, w, h), (199, 0));
        assert_eq!(rotate_point(0, 0, Rotation::Deg180, w, h), (199, 99));
        assert_eq!(rotate_point(0, 0, Rotation::Deg270, w, h), (0, 99));
    }

    #[test]
    fn test_rotate_point_round_trip() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let width = rng.gen_range(1..500u32);
            let height = rng.gen_range(1..500u32);
            let x = rng.gen_range(0..width as i32);
            let y = rng.gen_range(0..height as i32);
            for rotation in Rotation::ALL {
                // The forward mapping lands in the frame of the rotated image, so the
                // inverse uses the rotated dimensions.
                let (rw, rh) = rotation.rotated_size(width, height);
                let (fx, fy) = rotate_point(x, y, rotation.inverse(), rw, rh);
                assert_eq!(
                    rotate_point(fx, fy, rotation, width, height),
                    (x, y),
                    "rotation {rotation:?}"
                );
            }
        }
    }

    #[test]
    fn test_rotation_matches_image_pixels() {
        let (w, h) = (7u32, 4u32);
        let mut img = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
        img.put_pixel(5, 1, Rgba([255, 0, 0, 255]));
        let img = DynamicImage::ImageRgba8(img);

        for rotation in Rotation::ALL {
            let rotated = rotation.apply(&img);
            assert_eq!(rotated.dimensions(), rotation.rotated_size(w, h));
            let (rx, ry) = rotated
                .pixels()
                .find(|(_, _, p)| p.0 == [255, 0, 0, 255])
                .map(|(x, y, _)| (x as i32, y as i32))
                .unwrap();
            assert_eq!(rotate_point(rx, ry, rotation, w, h), (5, 1), "{rotation:?}");
        }
    }

    #[test]
    fn test_map_back_90() {
        // Box in a 100x200 image obtained by rotating a 200x100 page by 90 degrees
        let bbox = BBox::new(10, 20, 90, 120);
        assert_eq!(
            bbox.map_back(Rotation::Deg90, 200, 100),
            BBox::new(79, 10, 179, 90)
        );
        assert_eq!(bbox.map_back(Rotation::Deg0, 200, 100), BBox::new(10, 20, 90, 100));
    }

    #[test]
    fn test_map_back_stays_inside() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let width = rng.gen_range(1..800u32);
            let height = rng.gen_range(1..800u32);
            let bbox = BBox::new(
                rng.gen_range(-50..900),
                rng.gen_range(-50..900),
                rng.gen_range(-50..900),
                rng.gen_range(-50..900),
            );
            for rotation in Rotation::ALL {
                let mapped = bbox.map_back(rotation, width, height);
                assert!(mapped.x1 <= mapped.x2 && mapped.y1 <= mapped.y2);
                assert!(mapped.x1 >= 0 && mapped.x2 <= width as i32);
                assert!(mapped.y1 >= 0 && mapped.y2 <= height as i32);
            }
        }
    }

    #[test]
    fn test_rotation_serde() {
        assert_eq!(serde_json::to_string(&Rotation::Deg270).unwrap(), "270");
        assert_eq!(
            serde_json::from_str::<Rotation>("90").unwrap(),
            Rotation::Deg90
        );
        assert!(serde_json::from_str::<Rotation>("45").is_err());
    }
}
