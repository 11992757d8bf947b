use html_escape::encode_text;

use crate::entities::PageResult;

use super::{table::html_table, Render, Renderer};

#[derive(Debug, Default)]
pub struct HTMLRenderer {
    body: String,
}

impl HTMLRenderer {
    pub fn finalize(self, page_title: &str) -> String {
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{}</body>\n</html>\n",
            encode_text(page_title),
            self.body
        )
    }
}

impl Renderer for HTMLRenderer {
    type Ok = ();

    fn render_page(&mut self, page: &PageResult) -> anyhow::Result<Self::Ok> {
        self.body.push_str(&format!(
            "<section class=\"page\" id=\"page-{}\">\n<h2>{}</h2>\n",
            page.page_number,
            encode_text(&page.header)
        ));
        if !page.text_block.trim().is_empty() {
            self.body
                .push_str(&format!("<pre>{}</pre>\n", encode_text(&page.text_block)));
        }
        for table in &page.tables {
            self.body.push_str(&format!(
                "<h3>Table {}</h3>\n{}\n",
                table.table_number,
                html_table(&table.grid)
            ));
        }
        self.body.push_str("</section>\n");
        Ok(())
    }
}

pub fn to_html<R: Render>(pages: R, page_title: &str) -> anyhow::Result<String> {
    let mut html_renderer = HTMLRenderer::default();
    pages.render(&mut html_renderer)?;
    Ok(html_renderer.finalize(page_title))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{PageMode, TextSource};

    #[test]
    fn test_html_escapes_page_text() {
        let page = PageResult {
            page_number: 1,
            header: "-- a<b.png --".to_owned(),
            width: 1,
            height: 1,
            mode: PageMode::TextOnly,
            tables: Vec::new(),
            text_block: "x & y".to_owned(),
            text_source: TextSource::Ocr,
        };
        let html = to_html([page].as_slice(), "doc").unwrap();
        assert!(html.contains("<h2>-- a&lt;b.png --</h2>"));
        assert!(html.contains("<pre>x &amp; y</pre>"));
        assert!(html.contains("<title>doc</title>"));
    }
}
