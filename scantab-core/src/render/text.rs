use crate::entities::PageResult;

use super::{table::TableFormat, Render, Renderer};

/// Page header, text block and tables as plain text, pages separated by a blank line.
#[derive(Debug, Default)]
pub struct TextRenderer {
    table_format: TableFormat,
    pages: Vec<String>,
}

impl TextRenderer {
    pub fn new(table_format: TableFormat) -> Self {
        Self {
            table_format,
            pages: Vec::new(),
        }
    }

    pub fn finalize(self) -> String {
        self.pages.join("\n\n").trim().to_owned()
    }
}

impl Renderer for TextRenderer {
    type Ok = ();

    fn render_page(&mut self, page: &PageResult) -> anyhow::Result<()> {
        let mut lines = vec![page.header.clone()];
        if !page.text_block.trim().is_empty() {
            lines.push(page.text_block.clone());
        }
        for table in &page.tables {
            lines.push(String::new());
            lines.push(format!("[TABLE {}]", table.table_number));
            lines.push(self.table_format.format(&table.grid));
            lines.push(String::new());
        }
        self.pages.push(lines.join("\n"));
        Ok(())
    }
}

#[tracing::instrument(skip_all)]
pub fn to_text<R: Render>(pages: R, table_format: TableFormat) -> anyhow::Result<String> {
    let mut renderer = TextRenderer::new(table_format);
    pages.render(&mut renderer)?;
    Ok(renderer.finalize())
}
