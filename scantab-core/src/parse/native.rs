use std::time::Instant;

use anyhow::Context;
use image::DynamicImage;
use pdfium_render::prelude::{PdfDocument, PdfRenderConfig, Pdfium};
use tracing::instrument;

use super::document::PageSource;

/// pdfium bindings, loaded from the system library.
pub struct PdfiumRenderer {
    pdfium: Pdfium,
}

impl PdfiumRenderer {
    pub fn new() -> anyhow::Result<Self> {
        let bindings =
            Pdfium::bind_to_system_library().context("can't load pdfium bindings")?;
        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }

    pub fn open<'a>(&'a self, data: &'a [u8], password: Option<&str>) -> anyhow::Result<PdfPages<'a>> {
        let document = self
            .pdfium
            .load_pdf_from_byte_slice(data, password)
            .context("can't open pdf document")?;
        Ok(PdfPages { document })
    }
}

/// Pages of an open PDF document.
pub struct PdfPages<'a> {
    document: PdfDocument<'a>,
}

impl PageSource for PdfPages<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    #[instrument(skip(self))]
    fn render_page(&mut self, index: usize, zoom: f32) -> anyhow::Result<DynamicImage> {
        let start_time = Instant::now();
        let page = self
            .document
            .pages()
            .get(index.try_into().context("page index out of range")?)?;
        let page_image = page
            .render_with_config(&PdfRenderConfig::default().scale_page_by_factor(zoom))
            .map(|bitmap| bitmap.as_image())?;
        tracing::debug!(
            "rendering page {} using pdfium took {}ms",
            index + 1,
            start_time.elapsed().as_millis()
        );
        Ok(page_image)
    }

    fn page_header(&self, index: usize) -> String {
        format!("-- PAGE {} --", index + 1)
    }

    fn embedded_text(&mut self, index: usize) -> anyhow::Result<Option<String>> {
        let page = self
            .document
            .pages()
            .get(index.try_into().context("page index out of range")?)?;
        let text = page.text()?.all();
        Ok(Some(text))
    }
}
