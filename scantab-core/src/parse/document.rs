use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::Context;
use image::DynamicImage;

use super::{native::PdfiumRenderer, page::assemble_page};
use crate::{
    config::ExtractionConfig,
    engines::EngineContext,
    entities::{DocumentMetadata, PageNumber, PageResult, ParsedDocument},
};

/// Raster image extensions accepted as single page documents.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp", "gif", "pnm", "ppm", "pgm", "pbm",
];

/// Something that yields page images.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Renders the 0-based page `index`. `zoom` only applies to vector sources.
    fn render_page(&mut self, index: usize, zoom: f32) -> anyhow::Result<DynamicImage>;

    /// Marker printed before the page content.
    fn page_header(&self, index: usize) -> String;

    /// Text layer of the 0-based page `index`, `None` for sources without one.
    fn embedded_text(&mut self, _index: usize) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// A single raster image seen as a one page document.
pub struct ImagePages {
    image: DynamicImage,
    name: String,
}

impl ImagePages {
    pub fn new(image: DynamicImage, name: impl Into<String>) -> Self {
        Self {
            image,
            name: name.into(),
        }
    }
}

impl PageSource for ImagePages {
    fn page_count(&self) -> usize {
        1
    }

    fn render_page(&mut self, index: usize, _zoom: f32) -> anyhow::Result<DynamicImage> {
        if index != 0 {
            anyhow::bail!("image documents have a single page, got index {index}");
        }
        Ok(self.image.clone())
    }

    fn page_header(&self, _index: usize) -> String {
        format!("-- {} --", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
}

impl DocumentKind {
    /// Kind of the document, from its file extension.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .with_context(|| format!("{} has no file extension", path.display()))?;
        if ext == "pdf" {
            Ok(DocumentKind::Pdf)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Ok(DocumentKind::Image)
        } else {
            anyhow::bail!("unsupported file type .{ext}")
        }
    }
}

/// Options for a single [`ScantabParser::parse_document`] call.
#[derive(Debug, Clone, Default)]
pub struct ScantabParseConfig<'a> {
    /// Password of an encrypted PDF.
    pub password: Option<&'a str>,

    /// 1-based pages to parse, all pages when `None`. Pages past the end are ignored.
    pub pages: Option<Vec<PageNumber>>,

    /// Where the per-page debug overlays are written.
    pub debug_dir: Option<PathBuf>,
}

/// Extracts tables and text from PDFs and scanned images.
///
/// Pages are processed one after the other; the engines live in the parser and are
/// reused across pages and documents.
pub struct ScantabParser {
    context: EngineContext,
    config: ExtractionConfig,
}

impl ScantabParser {
    pub fn new(context: EngineContext, config: ExtractionConfig) -> Self {
        Self { context, config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn context_mut(&mut self) -> &mut EngineContext {
        &mut self.context
    }

    /// Number of pages of a document without parsing it.
    pub fn page_count(doc: &[u8], kind: DocumentKind, password: Option<&str>) -> anyhow::Result<usize> {
        match kind {
            DocumentKind::Pdf => {
                let pdfium = PdfiumRenderer::new()?;
                let pages = pdfium.open(doc, password)?;
                Ok(pages.page_count())
            }
            DocumentKind::Image => Ok(1),
        }
    }

    /// Parses a document held in memory.
    ///
    /// `page_callback` is called with the page number once each page is done.
    pub fn parse_document<F>(
        &mut self,
        doc: &[u8],
        doc_name: String,
        kind: DocumentKind,
        config: ScantabParseConfig<'_>,
        page_callback: Option<F>,
    ) -> anyhow::Result<ParsedDocument>
    where
        F: FnMut(PageNumber),
    {
        let ScantabParseConfig {
            password,
            pages,
            debug_dir,
        } = config;
        match kind {
            DocumentKind::Pdf => {
                let pdfium = PdfiumRenderer::new()?;
                let mut source = pdfium.open(doc, password)?;
                self.parse_pages(&mut source, doc_name, pages.as_deref(), debug_dir, page_callback)
            }
            DocumentKind::Image => {
                let image = image::load_from_memory(doc).context("can't decode image")?;
                let mut source = ImagePages::new(image, doc_name.clone());
                self.parse_pages(&mut source, doc_name, pages.as_deref(), debug_dir, page_callback)
            }
        }
    }

    /// Reads and parses the document at `path`.
    pub fn parse_path<F>(
        &mut self,
        path: &Path,
        config: ScantabParseConfig<'_>,
        page_callback: Option<F>,
    ) -> anyhow::Result<ParsedDocument>
    where
        F: FnMut(PageNumber),
    {
        let kind = DocumentKind::from_path(path)?;
        let doc = std::fs::read(path).with_context(|| format!("can't read {}", path.display()))?;
        let doc_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.parse_document(&doc, doc_name, kind, config, page_callback)
    }

    /// Runs the page pipeline over the selected pages of `source`, in page order.
    ///
    /// A page that fails to render yields an empty result and doesn't stop the document.
    #[tracing::instrument(skip_all, fields(doc_name = %doc_name))]
    pub fn parse_pages<S, F>(
        &mut self,
        source: &mut S,
        doc_name: String,
        pages: Option<&[PageNumber]>,
        debug_dir: Option<PathBuf>,
        mut page_callback: Option<F>,
    ) -> anyhow::Result<ParsedDocument>
    where
        S: PageSource + ?Sized,
        F: FnMut(PageNumber),
    {
        let start_time = Instant::now();
        let page_count = source.page_count();
        let selected = select_pages(pages, page_count);

        let Self { context, config } = self;
        let mut results = Vec::with_capacity(selected.len());
        for page_number in selected {
            let index = page_number - 1;
            let header = source.page_header(index);
            let result = match source.render_page(index, config.pdf_zoom) {
                Ok(image) => {
                    let embedded_text = if config.use_embedded_text {
                        source.embedded_text(index).unwrap_or_else(|e| {
                            tracing::warn!("can't read text layer of page {page_number}: {e:#}");
                            None
                        })
                    } else {
                        None
                    };
                    let mut engines = context.page_engines();
                    assemble_page(
                        page_number,
                        header,
                        &image,
                        &mut engines,
                        config,
                        embedded_text.as_deref(),
                        debug_dir.as_deref(),
                    )
                }
                Err(e) => {
                    tracing::error!("can't render page {page_number}: {e:#}");
                    PageResult::empty(page_number, header)
                }
            };
            results.push(result);
            if let Some(callback) = page_callback.as_mut() {
                callback(page_number);
            }
        }

        let metadata = DocumentMetadata::new(&results, start_time.elapsed());
        tracing::info!(
            "parsed {} pages of {doc_name}, found {} tables in {}ms",
            metadata.page_count,
            metadata.table_count,
            metadata.parsing_duration.as_millis()
        );
        Ok(ParsedDocument {
            doc_name,
            pages: results,
            debug_path: debug_dir,
            metadata,
        })
    }
}

/// Sorted, deduplicated 1-based page numbers within `1..=page_count`.
fn select_pages(pages: Option<&[PageNumber]>, page_count: usize) -> Vec<PageNumber> {
    match pages {
        None => (1..=page_count).collect(),
        Some(pages) => {
            let mut selected: Vec<PageNumber> = pages
                .iter()
                .copied()
                .filter(|&p| {
                    let in_range = (1..=page_count).contains(&p);
                    if !in_range {
                        tracing::warn!("ignoring page {p}, document has {page_count} pages");
                    }
                    in_range
                })
                .collect();
            selected.sort_unstable();
            selected.dedup();
            selected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_kind_from_path() {
        assert_eq!(
            DocumentKind::from_path(Path::new("scan.PDF")).unwrap(),
            DocumentKind::Pdf
        );
        assert_eq!(
            DocumentKind::from_path(Path::new("dir/receipt.jpeg")).unwrap(),
            DocumentKind::Image
        );
        assert!(DocumentKind::from_path(Path::new("notes.docx")).is_err());
        assert!(DocumentKind::from_path(Path::new("README")).is_err());
    }

    #[test]
    fn test_select_pages() {
        assert_eq!(select_pages(None, 3), vec![1, 2, 3]);
        assert_eq!(select_pages(Some(&[3, 1, 3, 9, 0][..]), 3), vec![1, 3]);
        assert!(select_pages(Some(&[2][..]), 1).is_empty());
    }

    #[test]
    fn test_image_pages() {
        let mut pages = ImagePages::new(DynamicImage::new_rgb8(4, 2), "receipt.png");
        assert_eq!(pages.page_count(), 1);
        assert_eq!(pages.page_header(0), "-- receipt.png --");
        assert_eq!(pages.render_page(0, 2.0).unwrap().width(), 4);
        assert!(pages.render_page(1, 2.0).is_err());
        assert_eq!(pages.embedded_text(0).unwrap(), None);
    }
}
