//! PDF block rendering
//!
//! A block's text is parsed into [`BlockParameters`], its source file is
//! fetched through the shared [`FileCache`], and each selected page is painted
//! into a [`Canvas`] by a [`DecodeEngine`]. The [`Orchestrator`] ties these
//! together per mounted block.

pub mod annotation;
pub mod cache;
pub mod canvas;
pub mod cursor;
pub mod engine;
pub mod error;
#[cfg(feature = "pdf")]
pub mod mupdf_engine;
pub mod orchestrator;
pub mod params;
pub mod state;
pub mod text_overlay;
pub mod viewport;

pub use annotation::execute_annotation;
pub use cache::{ContentSource, FileCache, FsSource};
pub use canvas::{Canvas, Color, DrawingSurface};
pub use cursor::{CursorTracker, StatusSink};
pub use engine::{DecodeEngine, DocumentHandle, DocumentLease, PageHandle, TextContent, TextItem};
pub use error::{
    AnnotationError, DecodeError, FetchError, ParseError, RenderError, ViewportError,
};
#[cfg(feature = "pdf")]
pub use mupdf_engine::MupdfEngine;
pub use orchestrator::{BlockHost, Orchestrator, PageOutput, RenderSession};
pub use params::{BlockParameters, CropRect, PageSelection, Rotation};
pub use state::{Command, Effect, Phase, RenderState};
pub use text_overlay::{PositionedText, TextOverlay};
pub use viewport::{PageSize, ViewportGeometry, compute_viewport};
