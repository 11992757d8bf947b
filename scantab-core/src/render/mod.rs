use anyhow::Context;

use crate::entities::{PageResult, ParsedDocument};

pub mod html;
pub mod table;
pub mod text;

pub trait Render {
    type Output;
    fn render<R: Renderer>(&self, renderer: &mut R) -> anyhow::Result<Self::Output>;
}

pub trait Renderer {
    type Ok;

    fn render_page(&mut self, page: &PageResult) -> anyhow::Result<Self::Ok>;
}

impl Render for &ParsedDocument {
    type Output = ();

    fn render<R: Renderer>(&self, renderer: &mut R) -> anyhow::Result<()> {
        for page in &self.pages {
            renderer
                .render_page(page)
                .with_context(|| format!("can't render page {}", page.page_number))?;
        }
        Ok(())
    }
}

impl Render for &[PageResult] {
    type Output = ();

    fn render<R: Renderer>(&self, renderer: &mut R) -> anyhow::Result<()> {
        for page in self.iter() {
            renderer
                .render_page(page)
                .with_context(|| format!("can't render page {}", page.page_number))?;
        }
        Ok(())
    }
}
