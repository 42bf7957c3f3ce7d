//! PDF reader: open a file, read page dimensions and extract the whole
//! text layer in one pass.
//!
//! ## Why spawn_blocking?
//!
//! pdfium wraps a C++ library with thread-local state and is not safe to
//! call from async contexts. `tokio::task::spawn_blocking` moves the work
//! onto the blocking thread pool so the async workers never stall on
//! CPU-bound PDF parsing.
//!
//! ## Why extract every page's text up front?
//!
//! The routing oracle, the boundary detector and the header extractor all
//! want the same per-page text. Extracting once while the document is open
//! and caching the result in [`DocumentContent`] means the file is opened
//! exactly once per worker and the cache is owned by that worker alone.

use crate::error::FakturaError;
use crate::model::{DocumentContent, PageText};
use crate::pipeline::text_layer;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Open a PDF and extract dimensions plus the text layer of every page.
pub async fn load_document(path: &Path) -> Result<DocumentContent, FakturaError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || load_document_blocking(&path))
        .await
        .map_err(|e| FakturaError::Internal(format!("reader task panicked: {e}")))?
}

/// Blocking implementation of document loading.
fn load_document_blocking(path: &Path) -> Result<DocumentContent, FakturaError> {
    let pdfium = Pdfium::default();

    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| FakturaError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("{e:?}"),
        })?;

    let pdf_pages = document.pages();
    let mut pages = Vec::with_capacity(pdf_pages.len() as usize);

    for (index, page) in pdf_pages.iter().enumerate() {
        let page_no = (index + 1) as u32;
        // Dimensions read verbatim; no normalisation.
        let width = page.width().value as f64;
        let height = page.height().value as f64;

        let (tokens, raw_text) = text_layer::tokenize_page(&page, page_no, height);
        debug!(page = page_no, tokens = tokens.len(), "text layer extracted");

        pages.push(PageText {
            page_no,
            width,
            height,
            tokens,
            raw_text,
        });
    }

    info!(path = %path.display(), pages = pages.len(), "document loaded");

    Ok(DocumentContent {
        path: path.to_path_buf(),
        pages,
    })
}
