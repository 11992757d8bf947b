use image::DynamicImage;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{EngineError, MarkupError},
    geometry::BBox,
    layout::coords_from_value,
};

pub mod grid;
pub mod markup;
pub mod validate;

use grid::Expansion;

/// Cell position reported by a table structure engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CellHint {
    pub bbox: BBox,
}

/// Output of a table structure engine for one table crop.
#[derive(Debug, Clone, PartialEq)]
pub struct TableStructure {
    pub markup: String,
    pub cells: Vec<CellHint>,
}

/// Recognizes the structure of a single upright table crop.
pub trait TableStructureEngine: Send {
    fn recognize(&mut self, crop: &DynamicImage) -> anyhow::Result<TableStructure>;
}

impl<T: TableStructureEngine + ?Sized> TableStructureEngine for Box<T> {
    fn recognize(&mut self, crop: &DynamicImage) -> anyhow::Result<TableStructure> {
        (**self).recognize(crop)
    }
}

#[derive(Debug, Deserialize)]
struct RawStructure {
    #[serde(alias = "structure")]
    html: Option<Value>,
    #[serde(default, alias = "cell_bbox")]
    cells: Vec<Value>,
}

/// Maps a structure engine JSON payload `{"html": "..", "cells": [[x1, y1, x2, y2], ..]}`.
pub fn structure_from_json(
    payload: Value,
    width: u32,
    height: u32,
) -> anyhow::Result<TableStructure> {
    let raw: RawStructure =
        serde_json::from_value(payload).map_err(|e| EngineError::MalformedOutput {
            engine: "table structure",
            reason: e.to_string(),
        })?;
    let markup = match raw.html {
        Some(Value::String(html)) => html,
        // Some engines emit the structure as a list of tokens
        Some(Value::Array(tokens)) if tokens.iter().all(Value::is_string) => tokens
            .iter()
            .filter_map(Value::as_str)
            .collect::<String>(),
        other => {
            return Err(EngineError::MalformedOutput {
                engine: "table structure",
                reason: format!("expected html markup, got {other:?}"),
            }
            .into())
        }
    };

    let mut cells = Vec::with_capacity(raw.cells.len());
    for (idx, value) in raw.cells.iter().enumerate() {
        match coords_from_value(value) {
            Some(coords) => cells.push(CellHint {
                bbox: BBox::normalize(coords.map(|v| v as i32), width, height),
            }),
            None => tracing::warn!("dropping cell #{idx} with unusable bbox {value}"),
        }
    }
    Ok(TableStructure { markup, cells })
}

/// Turns table markup into a dense grid. Missing markup is a reconstruction failure.
pub fn reconstruct_grid(markup: Option<&str>) -> Result<Expansion, MarkupError> {
    let markup = markup.ok_or(MarkupError::Empty)?;
    markup::check_required_tags(markup)?;
    let rows = markup::parse_table_rows(markup)?;
    if rows.is_empty() {
        return Err(MarkupError::NoRows);
    }
    grid::expand(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reconstruct_rowspan_table() {
        let expansion = reconstruct_grid(Some(
            r#"<table><tr><td rowspan="2">A</td><td>B</td></tr><tr><td>C</td></tr></table>"#,
        ))
        .unwrap();
        let grid = expansion.grid;
        assert_eq!((grid.n_rows(), grid.n_cols()), (2, 2));
        assert_eq!(grid.get(1, 0), Some("A"));
        assert_eq!(grid.get(1, 1), Some("C"));
    }

    #[test]
    fn test_reconstruct_failures() {
        assert_eq!(reconstruct_grid(None), Err(MarkupError::Empty));
        assert_eq!(
            reconstruct_grid(Some("<div>no table</div>")),
            Err(MarkupError::MissingTag("<table"))
        );
        assert_eq!(
            reconstruct_grid(Some("<table><tr></tr></table>")),
            Err(MarkupError::NoRows)
        );
        assert!(reconstruct_grid(Some("<table><tr><td rowspan=x>a</tr></tr>")).is_err());
        assert!(matches!(
            reconstruct_grid(Some(
                r#"<table><tr><td rowspan="65534" colspan="1000">x</td></tr></table>"#
            )),
            Err(MarkupError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_structure_from_json() {
        let structure = structure_from_json(
            json!({
                "html": "<table><tr><td>a</td></tr></table>",
                "cells": [[0, 0, 10, 10], [5, 5], [[1, 1], [9, 1], [9, 9], [1, 9]]]
            }),
            20,
            20,
        )
        .unwrap();
        assert!(structure.markup.starts_with("<table>"));
        assert_eq!(
            structure.cells,
            vec![
                CellHint {
                    bbox: BBox::new(0, 0, 10, 10)
                },
                CellHint {
                    bbox: BBox::new(1, 1, 9, 9)
                }
            ]
        );
    }

    #[test]
    fn test_structure_tokens_and_errors() {
        let structure = structure_from_json(
            json!({"structure": ["<table>", "<tr>", "<td>", "</td>", "</tr>", "</table>"]}),
            20,
            20,
        )
        .unwrap();
        assert_eq!(structure.markup, "<table><tr><td></td></tr></table>");
        assert!(structure.cells.is_empty());

        assert!(structure_from_json(json!({"html": 3}), 20, 20).is_err());
        assert!(structure_from_json(json!([1, 2]), 20, 20).is_err());
    }
}
