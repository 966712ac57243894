//! MuPDF-backed decode engine

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use log::debug;
use mupdf::text_page::TextBlockType;
use mupdf::{Colorspace, Document, Matrix, Page, Pixmap, TextPageFlags};

use super::canvas::Canvas;
use super::engine::{DecodeEngine, DocumentHandle, PageHandle, TextContent, TextItem};
use super::error::DecodeError;
use super::params::Rotation;
use super::viewport::{PageSize, ViewportGeometry};

/// Opens PDF bytes with MuPDF
#[derive(Clone, Copy, Debug, Default)]
pub struct MupdfEngine;

#[async_trait(?Send)]
impl DecodeEngine for MupdfEngine {
    async fn open_document(&self, bytes: Arc<[u8]>) -> Result<Rc<dyn DocumentHandle>, DecodeError> {
        let doc = Document::from_bytes(&bytes, "application/pdf")
            .map_err(|e| DecodeError::InvalidDocument(e.to_string()))?;
        let page_count = doc.page_count()?;
        let page_count = usize::try_from(page_count)
            .map_err(|_| DecodeError::InvalidDocument(format!("bad page count {page_count}")))?;
        debug!("Opened PDF with {page_count} pages ({} bytes)", bytes.len());
        Ok(Rc::new(MupdfDocument {
            doc: RefCell::new(Some(doc)),
            page_count,
        }))
    }
}

struct MupdfDocument {
    doc: RefCell<Option<Document>>,
    page_count: usize,
}

#[async_trait(?Send)]
impl DocumentHandle for MupdfDocument {
    fn num_pages(&self) -> usize {
        self.page_count
    }

    async fn get_page(&self, number: usize) -> Result<Box<dyn PageHandle>, DecodeError> {
        if number == 0 || number > self.page_count {
            return Err(DecodeError::PageOutOfRange {
                page: number,
                count: self.page_count,
            });
        }
        let doc = self.doc.borrow();
        let doc = doc.as_ref().ok_or(DecodeError::Released)?;
        let page = doc.load_page((number - 1) as i32)?;
        let bounds = page.bounds()?;
        let size = PageSize::new(bounds.x1 - bounds.x0, bounds.y1 - bounds.y0);
        Ok(Box::new(MupdfPage { page, size }))
    }

    fn close(&self) {
        self.doc.borrow_mut().take();
    }
}

struct MupdfPage {
    page: Page,
    size: PageSize,
}

#[async_trait(?Send)]
impl PageHandle for MupdfPage {
    fn intrinsic_size(&self) -> PageSize {
        self.size
    }

    async fn render(
        &self,
        canvas: &mut Canvas,
        geometry: &ViewportGeometry,
    ) -> Result<(), DecodeError> {
        let mut matrix = Matrix::new_scale(geometry.scale, geometry.scale);
        if geometry.rotation != Rotation::Deg0 {
            matrix.concat(Matrix::new_rotate(f32::from(geometry.rotation.degrees())));
        }

        let rgb = Colorspace::device_rgb();
        let pixmap = self.page.to_pixmap(&matrix, &rgb, false, false)?;
        let raster = pixmap_to_rgba(&pixmap)?;
        canvas.draw_raster(&raster, geometry.offset_x, geometry.offset_y);
        Ok(())
    }

    async fn text_content(&self) -> Result<TextContent, DecodeError> {
        let text_page = self.page.to_text_page(TextPageFlags::empty())?;
        let mut items = Vec::new();
        for block in text_page.blocks() {
            if block.r#type() != TextBlockType::Text {
                continue;
            }
            for line in block.lines() {
                let text: String = line.chars().filter_map(|ch| ch.char()).collect();
                if text.trim().is_empty() {
                    continue;
                }
                let bbox = line.bounds();
                items.push(TextItem {
                    text,
                    x: bbox.x0,
                    y: bbox.y0,
                    width: bbox.x1 - bbox.x0,
                    height: bbox.y1 - bbox.y0,
                });
            }
        }
        Ok(TextContent { items })
    }
}

fn pixmap_to_rgba(pixmap: &Pixmap) -> Result<RgbaImage, DecodeError> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(DecodeError::engine(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    if samples.len() < stride.saturating_mul(height) || row_bytes > stride {
        return Err(DecodeError::engine("Pixmap buffer size mismatch"));
    }

    let mut out = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        let row = &samples[y * stride..y * stride + row_bytes];
        for px in row.chunks_exact(n) {
            let alpha = if n >= 4 { px[3] } else { 255 };
            out.extend_from_slice(&[px[0], px[1], px[2], alpha]);
        }
    }

    RgbaImage::from_raw(width as u32, height as u32, out)
        .ok_or_else(|| DecodeError::engine("Pixmap dimensions do not match buffer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::canvas::Color;
    use crate::block::params::BlockParameters;
    use crate::block::viewport::compute_viewport;

    /// One 200x100 page with a black 50pt square in the bottom-left corner
    fn square_pdf() -> Vec<u8> {
        let content = "0 0 0 rg 0 0 50 50 re f";
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 100] /Contents 4 0 R >>".to_string(),
            format!(
                "<< /Length {} >>\nstream\n{content}\nendstream",
                content.len()
            ),
        ];

        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
        }
        let xref_at = pdf.len();
        pdf.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
        pdf.extend_from_slice(b"0000000000 65535 f \n");
        for offset in offsets {
            pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        pdf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
                objects.len() + 1
            )
            .as_bytes(),
        );
        pdf
    }

    #[tokio::test]
    async fn renders_cropped_region() {
        let doc = MupdfEngine
            .open_document(Arc::from(square_pdf()))
            .await
            .unwrap();
        assert_eq!(doc.num_pages(), 1);

        let page = doc.get_page(1).await.unwrap();
        assert_eq!(page.intrinsic_size(), PageSize::new(200.0, 100.0));

        let params =
            BlockParameters::parse("file: sq.pdf\ndpi: 1\nrect: [0, 0.5, 0.5, 0.5]").unwrap();
        let geometry = compute_viewport(page.intrinsic_size(), &params).unwrap();
        let mut canvas = Canvas::new(geometry.output_width, geometry.output_height);
        page.render(&mut canvas, &geometry).await.unwrap();

        assert_eq!((canvas.image().width(), canvas.image().height()), (100, 50));
        assert_eq!(canvas.pixel(10, 25), Color::BLACK);
        assert_eq!(canvas.pixel(90, 25), Color::WHITE);
    }

    #[tokio::test]
    async fn rejects_garbage_and_out_of_range_pages() {
        let err = MupdfEngine
            .open_document(Arc::from(b"definitely not a pdf".to_vec()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DecodeError::InvalidDocument(_)));

        let doc = MupdfEngine
            .open_document(Arc::from(square_pdf()))
            .await
            .unwrap();
        assert!(matches!(
            doc.get_page(2).await.err().unwrap(),
            DecodeError::PageOutOfRange { page: 2, count: 1 }
        ));
        doc.close();
        assert!(matches!(
            doc.get_page(1).await.err().unwrap(),
            DecodeError::Released
        ));
    }
}
