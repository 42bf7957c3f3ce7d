//! Page rasterisation for OCR and AI vision.
//!
//! The renderer is used strictly on demand — only pages the routing oracle
//! sends to OCR, and at most one page per AI-vision call, are ever
//! rasterised. Zoom is `dpi / 72`; the renderer itself applies no size cap
//! (vision preparation enforces its own limits downstream).
//!
//! Rendered pages are written under `<artifacts>/pages/` keyed by file
//! stem, page number and DPI, so a 400-DPI retry never clobbers the
//! 300-DPI attempt and OCR runs can be reproduced offline.

use crate::error::StageError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Rasterise one page to PNG bytes at the given DPI.
///
/// Runs inside `spawn_blocking`; pdfium is not async-safe.
pub async fn render_page_png(
    pdf_path: &Path,
    page_index: u32,
    dpi: u32,
) -> Result<Vec<u8>, StageError> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || render_page_blocking(&path, page_index, dpi))
        .await
        .map_err(|e| StageError::RenderFailed {
            page: page_index + 1,
            detail: format!("render task panicked: {e}"),
        })?
}

/// Blocking implementation of page rendering.
fn render_page_blocking(pdf_path: &Path, page_index: u32, dpi: u32) -> Result<Vec<u8>, StageError> {
    let page_no = page_index + 1;
    let fail = |detail: String| StageError::RenderFailed {
        page: page_no,
        detail,
    };

    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| fail(format!("open: {e:?}")))?;

    let page = document
        .pages()
        .get(page_index as u16)
        .map_err(|e| fail(format!("page: {e:?}")))?;

    let zoom = dpi as f32 / 72.0;
    let render_config = PdfRenderConfig::new().scale_page_by_factor(zoom);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| fail(format!("render: {e:?}")))?;

    let image: DynamicImage = bitmap.as_image();
    debug!(
        page = page_no,
        dpi,
        width = image.width(),
        height = image.height(),
        "page rendered"
    );

    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| fail(format!("png encode: {e}")))?;
    Ok(buf)
}

/// Artifact path for a rendered page: `<pages_dir>/<stem>_p<page>_<dpi>.png`.
pub fn artifact_path(pages_dir: &Path, file_stem: &str, page_no: u32, dpi: u32) -> PathBuf {
    pages_dir.join(format!("{file_stem}_p{page_no}_{dpi}.png"))
}

/// Render a page and persist it under the pages artifact directory.
/// Returns the artifact path together with the PNG bytes.
pub async fn render_to_artifact(
    pdf_path: &Path,
    file_stem: &str,
    page_index: u32,
    dpi: u32,
    pages_dir: &Path,
) -> Result<(PathBuf, Vec<u8>), StageError> {
    let bytes = render_page_png(pdf_path, page_index, dpi).await?;
    let target = artifact_path(pages_dir, file_stem, page_index + 1, dpi);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StageError::RenderFailed {
                page: page_index + 1,
                detail: format!("artifact dir: {e}"),
            })?;
    }
    tokio::fs::write(&target, &bytes)
        .await
        .map_err(|e| StageError::RenderFailed {
            page: page_index + 1,
            detail: format!("artifact write: {e}"),
        })?;
    Ok((target, bytes))
}
