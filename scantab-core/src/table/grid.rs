use crate::{
    entities::{Cell, Grid},
    error::MarkupError,
};

/// Upper bound on `rows * cols` of an expanded grid.
pub const MAX_GRID_CELLS: usize = 1 << 20;

/// Result of placing cells into a dense grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub grid: Grid,
    /// Input cells with their resolved anchor, in document order. Cells that didn't fit
    /// the grid width are left without anchor.
    pub cells: Vec<Cell>,
}

/// Expands row/col spans into a dense grid.
///
/// The grid is `max_cols` wide, where `max_cols` is the largest sum of colspans over the
/// rows. Each row walks a column cursor that skips positions already filled by spans from
/// above; a cell's text is copied into every position it covers and rowspans extend the
/// grid downward when needed. Positions nobody covers hold the empty string.
///
/// Fails before allocating when the spans would make the grid larger than
/// [`MAX_GRID_CELLS`].
pub fn expand(rows: &[Vec<Cell>]) -> Result<Expansion, MarkupError> {
    let max_cols = rows
        .iter()
        .map(|row| row.iter().fold(0usize, |acc, c| acc.saturating_add(c.colspan)))
        .max()
        .unwrap_or(0);
    let max_rows = rows
        .iter()
        .enumerate()
        .flat_map(|(row_idx, row)| row.iter().map(move |c| row_idx.saturating_add(c.rowspan)))
        .fold(rows.len(), usize::max);
    if max_rows.saturating_mul(max_cols) > MAX_GRID_CELLS {
        return Err(MarkupError::TooLarge {
            rows: max_rows,
            cols: max_cols,
            max: MAX_GRID_CELLS,
        });
    }

    let mut slots: Vec<Vec<Option<&str>>> = Vec::with_capacity(rows.len());
    let mut cells = Vec::new();

    for (row_idx, row) in rows.iter().enumerate() {
        if row_idx >= slots.len() {
            slots.push(vec![None; max_cols]);
        }
        let mut col_idx = 0;
        for cell in row {
            while col_idx < max_cols && slots[row_idx][col_idx].is_some() {
                col_idx += 1;
            }
            if col_idx >= max_cols {
                cells.push(cell.clone());
                continue;
            }

            for r in 0..cell.rowspan {
                let target = row_idx + r;
                while target >= slots.len() {
                    slots.push(vec![None; max_cols]);
                }
                let end = (col_idx + cell.colspan).min(max_cols);
                for slot in slots[target][col_idx..end].iter_mut() {
                    *slot = Some(cell.text.as_str());
                }
            }
            cells.push(cell.anchored(row_idx, col_idx));
            col_idx += cell.colspan;
        }
    }

    let grid = Grid::new(
        slots
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|slot| slot.unwrap_or_default().to_owned())
                    .collect()
            })
            .collect(),
    );
    Ok(Expansion { grid, cells })
}
