use image::DynamicImage;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    entities::{DetectedRegion, RegionKind},
    error::EngineError,
    geometry::BBox,
};

pub mod model;
pub mod nms;
pub mod orientation;

/// Page layout detector.
///
/// Boxes are returned in the frame of the image passed in. Taking `&mut self` keeps a
/// single call in flight per detector instance.
pub trait LayoutDetector: Send {
    fn detect(&mut self, image: &DynamicImage) -> anyhow::Result<Vec<DetectedRegion>>;
}

impl<T: LayoutDetector + ?Sized> LayoutDetector for Box<T> {
    fn detect(&mut self, image: &DynamicImage) -> anyhow::Result<Vec<DetectedRegion>> {
        (**self).detect(image)
    }
}

/// Detector output as emitted by external engines, before any validation.
///
/// Follows the PP-Structure layout: `{"type": "table", "bbox": [..], "score": 0.9,
/// "res": {"html": "<table>.."}}`.
#[derive(Debug, Deserialize)]
pub struct RawRegion {
    #[serde(rename = "type", alias = "label")]
    pub kind: Option<Value>,
    pub bbox: Option<Value>,
    #[serde(alias = "confidence")]
    pub score: Option<Value>,
    pub res: Option<Value>,
    pub html: Option<Value>,
}

impl RawRegion {
    /// Validates the raw shape and maps it into a region of a `width x height` image.
    pub fn into_region(self, width: u32, height: u32) -> Result<DetectedRegion, String> {
        let kind = match self.kind {
            Some(Value::String(label)) => RegionKind::from_label(&label),
            other => return Err(format!("region type must be a string, got {other:?}")),
        };

        let coords = self
            .bbox
            .as_ref()
            .and_then(coords_from_value)
            .ok_or_else(|| format!("unusable bbox {:?}", self.bbox))?;
        let bbox = BBox::normalize(coords.map(|v| v as i32), width, height);

        let confidence = match self.score {
            None | Some(Value::Null) => 1.0,
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if (0.0..=1.0).contains(&v) => v as f32,
                _ => return Err(format!("score {n} is outside [0, 1]")),
            },
            Some(other) => return Err(format!("score must be a number, got {other}")),
        };

        let markup = self
            .res
            .as_ref()
            .and_then(|res| res.get("html"))
            .or(self.html.as_ref())
            .and_then(Value::as_str)
            .map(str::to_owned);

        let mut region = DetectedRegion::new(bbox, kind, confidence);
        region.markup = markup;
        Ok(region)
    }
}

/// Reads `[x1, y1, x2, y2]` or a polygon `[[x, y], ..]` into box coordinates.
pub(crate) fn coords_from_value(value: &Value) -> Option<[f64; 4]> {
    let items = value.as_array()?;
    if items.len() == 4 && items.iter().all(Value::is_number) {
        let mut coords = [0f64; 4];
        for (slot, item) in coords.iter_mut().zip(items) {
            *slot = item.as_f64().filter(|v| v.is_finite())?;
        }
        return Some(coords);
    }

    if items.len() < 3 {
        return None;
    }
    let mut points = Vec::with_capacity(items.len());
    for item in items {
        match item.as_array().map(Vec::as_slice) {
            Some([x, y]) => {
                let x = x.as_f64().filter(|v| v.is_finite())?;
                let y = y.as_f64().filter(|v| v.is_finite())?;
                points.push((x, y));
            }
            _ => return None,
        }
    }
    let x1 = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let y1 = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let x2 = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let y2 = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    Some([x1, y1, x2, y2])
}

/// Maps a detector JSON payload into typed regions, dropping entries that don't conform.
pub fn regions_from_json(
    payload: Value,
    width: u32,
    height: u32,
) -> anyhow::Result<Vec<DetectedRegion>> {
    let Value::Array(items) = payload else {
        return Err(EngineError::MalformedOutput {
            engine: "layout",
            reason: "expected a list of regions".to_owned(),
        }
        .into());
    };

    let mut regions = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let region = serde_json::from_value::<RawRegion>(item)
            .map_err(|e| e.to_string())
            .and_then(|raw| raw.into_region(width, height));
        match region {
            Ok(region) => regions.push(region),
            Err(reason) => tracing::warn!("dropping detected region #{idx}: {reason}"),
        }
    }
    Ok(regions)
}
