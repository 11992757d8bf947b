use serde::{Deserialize, Serialize};

use crate::{entities::Grid, error::RejectReason};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ValidationConfig {
    pub trim_whitespace: bool,
    pub clean_empty_rows: bool,
    pub clean_empty_cols: bool,
    pub min_rows: usize,
    pub min_cols: usize,
    pub max_empty_ratio: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            trim_whitespace: true,
            clean_empty_rows: true,
            clean_empty_cols: true,
            min_rows: 1,
            min_cols: 1,
            max_empty_ratio: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableStats {
    pub rows: usize,
    pub cols: usize,
    pub empty_cells: usize,
    /// `empty_cells / (rows * cols)`, 1.0 for a grid without cells.
    pub empty_ratio: f64,
    /// Average number of characters per cell, empty cells included.
    pub avg_text_len: f64,
}

impl TableStats {
    pub fn of(grid: &Grid) -> Self {
        let total = grid.cell_count();
        let cells = grid.rows().iter().flatten();
        let empty_cells = cells.clone().filter(|c| c.is_empty()).count();
        let text_len: usize = cells.map(|c| c.chars().count()).sum();

        let (empty_ratio, avg_text_len) = if total == 0 {
            (1.0, 0.0)
        } else {
            (
                empty_cells as f64 / total as f64,
                text_len as f64 / total as f64,
            )
        };
        Self {
            rows: grid.n_rows(),
            cols: grid.n_cols(),
            empty_cells,
            empty_ratio,
            avg_text_len,
        }
    }

    /// `0.7 * filled ratio + 0.3 * min(1, avg_text_len / 10)`, within `[0, 1]`.
    pub fn score(&self) -> f64 {
        let fill = 1.0 - self.empty_ratio;
        let text = (self.avg_text_len / 10.0).min(1.0);
        (0.7 * fill + 0.3 * text).clamp(0.0, 1.0)
    }
}

/// Trims cells, then drops empty rows and empty columns as configured.
pub fn clean_grid(grid: &Grid, config: &ValidationConfig) -> Grid {
    let mut rows: Vec<Vec<String>> = grid
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .map(|c| {
                    if config.trim_whitespace {
                        c.trim().to_owned()
                    } else {
                        c.to_owned()
                    }
                })
                .collect()
        })
        .collect();

    if config.clean_empty_rows {
        rows.retain(|row| row.iter().any(|c| !c.is_empty()));
    }

    if config.clean_empty_cols {
        let keep: Vec<bool> = (0..grid.n_cols())
            .map(|col| rows.iter().any(|row| !row[col].is_empty()))
            .collect();
        for row in rows.iter_mut() {
            let mut col = 0;
            row.retain(|_| {
                let kept = keep[col];
                col += 1;
                kept
            });
        }
    }

    Grid::new(rows)
}

/// Quality gate on an already cleaned grid.
pub fn validate(grid: &Grid, config: &ValidationConfig) -> Result<TableStats, RejectReason> {
    let stats = TableStats::of(grid);
    if stats.rows < config.min_rows {
        return Err(RejectReason::TooFewRows {
            rows: stats.rows,
            min: config.min_rows,
        });
    }
    if stats.cols < config.min_cols {
        return Err(RejectReason::TooFewCols {
            cols: stats.cols,
            min: config.min_cols,
        });
    }
    if stats.empty_ratio > config.max_empty_ratio {
        return Err(RejectReason::TooManyEmpty {
            ratio: stats.empty_ratio,
            max: config.max_empty_ratio,
        });
    }
    Ok(stats)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedTable {
    pub grid: Grid,
    pub score: f64,
}

/// Cleans, validates and scores a reconstructed grid.
pub fn assess(grid: &Grid, config: &ValidationConfig) -> Result<AcceptedTable, RejectReason> {
    let cleaned = clean_grid(grid, config);
    let stats = validate(&cleaned, config)?;
    Ok(AcceptedTable {
        grid: cleaned,
        score: stats.score(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Grid {
        Grid::new(
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    fn raw_config() -> ValidationConfig {
        ValidationConfig {
            trim_whitespace: false,
            clean_empty_rows: false,
            clean_empty_cols: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_drops_empty_rows_and_cols() {
        let cleaned = clean_grid(
            &grid(&[
                &[" a ", "", "b"],
                &["  ", "", " "],
                &["c", "", "d"],
            ]),
            &ValidationConfig::default(),
        );
        assert_eq!(cleaned, grid(&[&["a", "b"], &["c", "d"]]));
    }

    #[test]
    fn test_clean_without_trim_keeps_whitespace_cells() {
        let config = ValidationConfig {
            trim_whitespace: false,
            ..Default::default()
        };
        let cleaned = clean_grid(&grid(&[&["a", " "], &["", ""]]), &config);
        assert_eq!(cleaned, grid(&[&["a", " "]]));
    }

    #[test]
    fn test_clean_everything_empty() {
        let cleaned = clean_grid(&grid(&[&["", " "], &[" ", ""]]), &ValidationConfig::default());
        assert!(cleaned.is_empty());
        assert_eq!(cleaned.n_rows(), 0);
        assert_eq!(cleaned.n_cols(), 0);
    }

    #[test]
    fn test_eight_of_nine_empty_passes() {
        let g = grid(&[&["x", "", ""], &["", "", ""], &["", "", ""]]);
        let stats = validate(&g, &raw_config()).unwrap();
        assert_eq!(stats.empty_cells, 8);
        assert!((stats.empty_ratio - 8.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_all_empty_is_rejected() {
        let g = grid(&[&["", "", ""], &["", "", ""], &["", "", ""]]);
        assert!(matches!(
            validate(&g, &raw_config()),
            Err(RejectReason::TooManyEmpty { .. })
        ));
    }

    #[test]
    fn test_min_rows_and_cols() {
        let config = ValidationConfig {
            min_rows: 2,
            min_cols: 2,
            ..raw_config()
        };
        assert_eq!(
            validate(&grid(&[&["a", "b"]]), &config),
            Err(RejectReason::TooFewRows { rows: 1, min: 2 })
        );
        assert_eq!(
            validate(&grid(&[&["a"], &["b"]]), &config),
            Err(RejectReason::TooFewCols { cols: 1, min: 2 })
        );
    }

    #[test]
    fn test_empty_grid_rejected_even_without_minimums() {
        let config = ValidationConfig {
            min_rows: 0,
            min_cols: 0,
            ..raw_config()
        };
        assert!(matches!(
            validate(&Grid::default(), &config),
            Err(RejectReason::TooManyEmpty { ratio, .. }) if ratio == 1.0
        ));
    }

    #[test]
    fn test_score() {
        // Full table with long text scores 1
        let full = TableStats::of(&grid(&[&["0123456789", "abcdefghijkl"]]));
        assert!((full.score() - 1.0).abs() < 1e-12);

        // Half empty, average length 1: 0.7 * 0.5 + 0.3 * 0.1
        let half = TableStats::of(&grid(&[&["ab", ""]]));
        assert!((half.score() - 0.38).abs() < 1e-12);

        let empty = TableStats::of(&Grid::default());
        assert_eq!(empty.score(), 0.0);
    }

    #[test]
    fn test_assess_scores_cleaned_grid() {
        let accepted = assess(
            &grid(&[&["Name", "Qty", ""], &["", "", ""], &["Bolts", "12", ""]]),
            &ValidationConfig::default(),
        )
        .unwrap();
        assert_eq!(accepted.grid.n_rows(), 2);
        assert_eq!(accepted.grid.n_cols(), 2);
        // 4 filled cells, 14 characters
        let expected = 0.7 + 0.3 * (14.0 / 4.0 / 10.0);
        assert!((accepted.score - expected).abs() < 1e-12);
    }
}
