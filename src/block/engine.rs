//! Decode engine seam
//!
//! The PDF decoder is an external service. The orchestrator only sees these
//! traits; `mupdf_engine` provides the production implementation.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use super::canvas::Canvas;
use super::error::DecodeError;
use super::viewport::{PageSize, ViewportGeometry};

/// A run of text on a page, in unrotated page units
#[derive(Clone, Debug, PartialEq)]
pub struct TextItem {
    pub text: String,
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Text content of one page
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextContent {
    pub items: Vec<TextItem>,
}

/// Opens documents from raw bytes
#[async_trait(?Send)]
pub trait DecodeEngine {
    async fn open_document(&self, bytes: Arc<[u8]>) -> Result<Rc<dyn DocumentHandle>, DecodeError>;
}

/// An open document
#[async_trait(?Send)]
pub trait DocumentHandle {
    fn num_pages(&self) -> usize;

    /// Load a page, 1-indexed
    async fn get_page(&self, number: usize) -> Result<Box<dyn PageHandle>, DecodeError>;

    /// Free engine resources. Called exactly once, through [`DocumentLease`].
    fn close(&self);
}

/// A loaded page
#[async_trait(?Send)]
pub trait PageHandle {
    /// Unrotated page size in points
    fn intrinsic_size(&self) -> PageSize;

    /// Paint the region described by `geometry` into `canvas`
    async fn render(&self, canvas: &mut Canvas, geometry: &ViewportGeometry)
    -> Result<(), DecodeError>;

    async fn text_content(&self) -> Result<TextContent, DecodeError>;
}

/// Owns a document handle and guarantees `close` runs exactly once
pub struct DocumentLease {
    handle: Rc<dyn DocumentHandle>,
    released: Cell<bool>,
}

impl DocumentLease {
    #[must_use]
    pub fn new(handle: Rc<dyn DocumentHandle>) -> Rc<Self> {
        Rc::new(Self {
            handle,
            released: Cell::new(false),
        })
    }

    /// The document, or `Released` once closed
    pub fn handle(&self) -> Result<&Rc<dyn DocumentHandle>, DecodeError> {
        if self.released.get() {
            Err(DecodeError::Released)
        } else {
            Ok(&self.handle)
        }
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.get()
    }

    /// Close the document; later calls do nothing
    pub fn release(&self) {
        if !self.released.replace(true) {
            debug!("Releasing document handle");
            self.handle.close();
        }
    }
}

impl Drop for DocumentLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for DocumentLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentLease")
            .field("pages", &self.handle.num_pages())
            .field("released", &self.released.get())
            .finish()
    }
}
