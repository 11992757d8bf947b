use image::DynamicImage;
use lazy_static::lazy_static;
use plsfix::fix_text;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::{entities::TextRegion, error::EngineError, geometry::BBox, layout::coords_from_value};

#[cfg(target_os = "macos")]
pub mod vision;

/// Recognizes text lines on a full page image.
pub trait TextEngine: Send {
    fn recognize(&mut self, image: &DynamicImage) -> anyhow::Result<Vec<TextRegion>>;
}

impl<T: TextEngine + ?Sized> TextEngine for Box<T> {
    fn recognize(&mut self, image: &DynamicImage) -> anyhow::Result<Vec<TextRegion>> {
        (**self).recognize(image)
    }
}

lazy_static! {
    static ref HSPACE_RUN_RE: Regex = Regex::new(r"[^\S\n]{2,}").unwrap();
    static ref NEWLINE_RUN_RE: Regex = Regex::new(r"\n{3,}").unwrap();
}

/// Joins recognized lines in engine order.
pub fn join_lines(regions: &[TextRegion]) -> String {
    regions
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Repairs mojibake and collapses runs of blanks and empty lines.
pub fn clean_text(text: &str) -> String {
    let fixed = fix_text(text, None);
    let collapsed = HSPACE_RUN_RE.replace_all(&fixed, " ");
    NEWLINE_RUN_RE
        .replace_all(&collapsed, "\n\n")
        .trim()
        .to_owned()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTextLine {
    /// PaddleOCR layout: `[[[x, y], ..], ["text", 0.98]]`
    Paddle(Value, Value),
    Object {
        bbox: Value,
        text: Value,
        #[serde(default, alias = "score")]
        confidence: Option<Value>,
    },
}

impl RawTextLine {
    fn into_region(self, width: u32, height: u32) -> Result<TextRegion, String> {
        let (bbox, text, confidence) = match self {
            RawTextLine::Paddle(bbox, Value::Array(mut rec)) if rec.len() == 2 => {
                let confidence = rec.pop();
                let text = rec.pop().unwrap_or_default();
                (bbox, text, confidence)
            }
            RawTextLine::Paddle(_, rec) => {
                return Err(format!("expected [text, confidence], got {rec}"))
            }
            RawTextLine::Object {
                bbox,
                text,
                confidence,
            } => (bbox, text, confidence),
        };

        let Value::String(text) = text else {
            return Err(format!("text must be a string, got {text}"));
        };
        let coords =
            coords_from_value(&bbox).ok_or_else(|| format!("unusable bbox {bbox}"))?;
        let confidence = match confidence {
            None | Some(Value::Null) => 1.0,
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if (0.0..=1.0).contains(&v) => v as f32,
                _ => return Err(format!("confidence {n} is outside [0, 1]")),
            },
            Some(other) => return Err(format!("confidence must be a number, got {other}")),
        };

        Ok(TextRegion {
            bbox: BBox::normalize(coords.map(|v| v as i32), width, height),
            text,
            confidence,
        })
    }
}

/// Maps a text engine JSON payload into typed regions, dropping lines that don't conform.
pub fn text_regions_from_json(
    payload: Value,
    width: u32,
    height: u32,
) -> anyhow::Result<Vec<TextRegion>> {
    let Value::Array(items) = payload else {
        return Err(EngineError::MalformedOutput {
            engine: "text",
            reason: "expected a list of lines".to_owned(),
        }
        .into());
    };
    let mut regions = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let region = serde_json::from_value::<RawTextLine>(item)
            .map_err(|e| e.to_string())
            .and_then(|raw| raw.into_region(width, height));
        match region {
            Ok(region) => regions.push(region),
            Err(reason) => tracing::warn!("dropping text line #{idx}: {reason}"),
        }
    }
    Ok(regions)
}
