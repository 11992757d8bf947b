use itertools::Itertools;

use crate::entities::Grid;

pub const EMPTY_TABLE: &str = "[Empty Table]";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    #[default]
    Markdown,
    Plain,
}

impl TableFormat {
    pub fn format(self, grid: &Grid) -> String {
        match self {
            TableFormat::Markdown => markdown_table(grid),
            TableFormat::Plain => plain_table(grid),
        }
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().join(" ")
}

fn column_widths(rows: &[Vec<String>], min_width: usize) -> Vec<usize> {
    let n_cols = rows.first().map_or(0, Vec::len);
    (0..n_cols)
        .map(|col| {
            rows.iter()
                .map(|row| row[col].chars().count())
                .max()
                .unwrap_or(0)
                .max(min_width)
        })
        .collect()
}

fn pad(text: &str, width: usize) -> String {
    format!("{text:<width$}")
}

/// Pipe table with the first grid row as header.
pub fn markdown_table(grid: &Grid) -> String {
    if grid.is_empty() {
        return EMPTY_TABLE.to_owned();
    }
    let rows: Vec<Vec<String>> = grid
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| single_line(cell).replace('|', "\\|"))
                .collect()
        })
        .collect();
    let widths = column_widths(&rows, 3);

    let format_row = |row: &Vec<String>| {
        let cells = row
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| pad(cell, width))
            .join(" | ");
        format!("| {cells} |")
    };

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(format_row(&rows[0]));
    lines.push(format!(
        "| {} |",
        widths.iter().map(|&w| "-".repeat(w)).join(" | ")
    ));
    lines.extend(rows[1..].iter().map(format_row));
    lines.join("\n")
}

/// Aligned columns separated by `|`, with a rule under the first row.
pub fn plain_table(grid: &Grid) -> String {
    if grid.is_empty() {
        return EMPTY_TABLE.to_owned();
    }
    let rows: Vec<Vec<String>> = grid
        .rows()
        .iter()
        .map(|row| row.iter().map(|cell| single_line(cell)).collect())
        .collect();
    let widths = column_widths(&rows, 1);

    let format_row = |row: &Vec<String>| {
        row.iter()
            .zip(&widths)
            .map(|(cell, &width)| pad(cell, width))
            .join(" | ")
            .trim_end()
            .to_owned()
    };

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(format_row(&rows[0]));
    lines.push(widths.iter().map(|&w| "-".repeat(w)).join("-+-"));
    lines.extend(rows[1..].iter().map(format_row));
    lines.join("\n")
}

pub fn csv_table(grid: &Grid) -> anyhow::Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(false)
        .from_writer(Vec::new());
    for row in grid.rows() {
        writer.write_record(row)?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

/// Grid rendered back to an HTML table, one `td` per grid position.
pub fn html_table(grid: &Grid) -> String {
    let mut html = String::from("<table>\n");
    for row in grid.rows() {
        html.push_str("  <tr>");
        for cell in row {
            html.push_str("<td>");
            html.push_str(&html_escape::encode_text(cell));
            html.push_str("</td>");
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</table>");
    html
}
