pub mod test_helpers {
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};
    use tokio::sync::Semaphore;

    use crate::block::cache::ContentSource;
    use crate::block::canvas::Canvas;
    use crate::block::cursor::StatusSink;
    use crate::block::engine::{DecodeEngine, DocumentHandle, PageHandle, TextContent, TextItem};
    use crate::block::error::{DecodeError, FetchError};
    use crate::block::orchestrator::{BlockHost, PageOutput};
    use crate::block::text_overlay::TextOverlay;
    use crate::block::viewport::{PageSize, ViewportGeometry};

    /// Gray every fake page is painted with
    pub const PAGE_SHADE: [u8; 4] = [200, 200, 200, 255];

    /// Bytes that [`FakeEngine`] opens as a document of `pages` pages
    #[must_use]
    pub fn fake_document(pages: usize, width: f32, height: f32) -> Vec<u8> {
        format!("fake:{pages}:{width}x{height}").into_bytes()
    }

    fn parse_fake(bytes: &[u8]) -> Option<(usize, PageSize)> {
        let text = std::str::from_utf8(bytes).ok()?;
        let rest = text.strip_prefix("fake:")?;
        let (pages, size) = rest.split_once(':')?;
        let (w, h) = size.split_once('x')?;
        Some((
            pages.parse().ok()?,
            PageSize::new(w.parse().ok()?, h.parse().ok()?),
        ))
    }

    /// Decode engine over [`fake_document`] bytes that counts opens and closes
    #[derive(Default)]
    pub struct FakeEngine {
        opens: Cell<usize>,
        closes: Rc<Cell<usize>>,
        gate: Option<Arc<Semaphore>>,
    }

    impl FakeEngine {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Every open waits for one permit from the returned semaphore
        #[must_use]
        pub fn gated() -> (Self, Arc<Semaphore>) {
            let gate = Arc::new(Semaphore::new(0));
            (
                Self {
                    gate: Some(Arc::clone(&gate)),
                    ..Self::default()
                },
                gate,
            )
        }

        #[must_use]
        pub fn opens(&self) -> usize {
            self.opens.get()
        }

        #[must_use]
        pub fn closes(&self) -> usize {
            self.closes.get()
        }
    }

    #[async_trait(?Send)]
    impl DecodeEngine for FakeEngine {
        async fn open_document(
            &self,
            bytes: Arc<[u8]>,
        ) -> Result<Rc<dyn DocumentHandle>, DecodeError> {
            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|_| DecodeError::engine("gate closed"))?
                    .forget();
            }
            self.opens.set(self.opens.get() + 1);
            let (pages, size) = parse_fake(&bytes)
                .ok_or_else(|| DecodeError::InvalidDocument("not a fake document".into()))?;
            Ok(Rc::new(FakeDocument {
                pages,
                size,
                closes: Rc::clone(&self.closes),
            }))
        }
    }

    struct FakeDocument {
        pages: usize,
        size: PageSize,
        closes: Rc<Cell<usize>>,
    }

    #[async_trait(?Send)]
    impl DocumentHandle for FakeDocument {
        fn num_pages(&self) -> usize {
            self.pages
        }

        async fn get_page(&self, number: usize) -> Result<Box<dyn PageHandle>, DecodeError> {
            if number == 0 || number > self.pages {
                return Err(DecodeError::PageOutOfRange {
                    page: number,
                    count: self.pages,
                });
            }
            Ok(Box::new(FakePage {
                number,
                size: self.size,
            }))
        }

        fn close(&self) {
            self.closes.set(self.closes.get() + 1);
        }
    }

    struct FakePage {
        number: usize,
        size: PageSize,
    }

    #[async_trait(?Send)]
    impl PageHandle for FakePage {
        fn intrinsic_size(&self) -> PageSize {
            self.size
        }

        async fn render(
            &self,
            canvas: &mut Canvas,
            geometry: &ViewportGeometry,
        ) -> Result<(), DecodeError> {
            let raster = RgbaImage::from_pixel(
                geometry.full_width.floor() as u32,
                geometry.full_height.floor() as u32,
                Rgba(PAGE_SHADE),
            );
            canvas.draw_raster(&raster, geometry.offset_x, geometry.offset_y);
            Ok(())
        }

        async fn text_content(&self) -> Result<TextContent, DecodeError> {
            Ok(TextContent {
                items: vec![TextItem {
                    text: format!("Page {}", self.number),
                    x: 10.0,
                    y: 10.0,
                    width: 50.0,
                    height: 12.0,
                }],
            })
        }
    }

    /// In-memory content source that counts fetches
    #[derive(Default)]
    pub struct CountingSource {
        files: Mutex<HashMap<PathBuf, Vec<u8>>>,
        fetches: AtomicUsize,
    }

    impl CountingSource {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn with_file(self, path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
            self.set(path, bytes);
            self
        }

        pub fn set(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
            self.files
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(path.into(), bytes);
        }

        #[must_use]
        pub fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContentSource for CountingSource {
        async fn fetch(&self, path: &Path) -> Result<Vec<u8>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.files
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(path)
                .cloned()
                .ok_or_else(|| FetchError::generic(path, "no such file"))
        }
    }

    /// Summary of one host call
    #[derive(Clone, Debug, PartialEq)]
    pub enum HostCall {
        Clear,
        Loading,
        Page {
            page: usize,
            width: u32,
            height: u32,
            width_percent: u32,
            link: Option<String>,
            annotation_error: Option<String>,
            text_items: usize,
        },
        Note(String),
        Error(String),
        OverlayUpdated { page: usize, scale_factor: f32 },
    }

    /// Block host that records what it was asked to show
    #[derive(Default)]
    pub struct RecordingHost {
        visible: Cell<bool>,
        calls: RefCell<Vec<HostCall>>,
        pages: RefCell<Vec<PageOutput>>,
    }

    impl RecordingHost {
        #[must_use]
        pub fn new(visible: bool) -> Rc<Self> {
            let host = Self::default();
            host.visible.set(visible);
            Rc::new(host)
        }

        pub fn set_visible(&self, visible: bool) {
            self.visible.set(visible);
        }

        #[must_use]
        pub fn calls(&self) -> Vec<HostCall> {
            self.calls.borrow().clone()
        }

        /// Calls other than `Loading` and `Clear`
        #[must_use]
        pub fn shown(&self) -> Vec<HostCall> {
            self.calls
                .borrow()
                .iter()
                .filter(|c| !matches!(c, HostCall::Loading | HostCall::Clear))
                .cloned()
                .collect()
        }

        /// Pages from the most recent render
        #[must_use]
        pub fn pages(&self) -> Vec<PageOutput> {
            self.pages.borrow().clone()
        }
    }

    impl BlockHost for RecordingHost {
        fn is_visible(&self) -> bool {
            self.visible.get()
        }

        fn clear(&self) {
            self.pages.borrow_mut().clear();
            self.calls.borrow_mut().push(HostCall::Clear);
        }

        fn show_loading(&self) {
            self.calls.borrow_mut().push(HostCall::Loading);
        }

        fn show_page(&self, page: PageOutput) {
            self.calls.borrow_mut().push(HostCall::Page {
                page: page.page,
                width: page.canvas.image().width(),
                height: page.canvas.image().height(),
                width_percent: page.width_percent,
                link: page.link.clone(),
                annotation_error: page.annotation_error.clone(),
                text_items: page.text_overlay.as_ref().map_or(0, TextOverlay::len),
            });
            self.pages.borrow_mut().push(page);
        }

        fn show_note(&self, markdown: &str, _source_path: &Path) {
            self.calls
                .borrow_mut()
                .push(HostCall::Note(markdown.to_string()));
        }

        fn show_error(&self, message: &str) {
            self.calls
                .borrow_mut()
                .push(HostCall::Error(message.to_string()));
        }

        fn update_text_overlay(&self, page: usize, overlay: &TextOverlay) {
            self.calls.borrow_mut().push(HostCall::OverlayUpdated {
                page,
                scale_factor: overlay.scale_factor(),
            });
        }
    }

    /// Status sink that records the latest status and every snippet
    #[derive(Default)]
    pub struct RecordingStatus {
        pub status: RefCell<Option<String>>,
        pub snippets: RefCell<Vec<String>>,
    }

    impl StatusSink for RecordingStatus {
        fn set_status(&self, text: &str) {
            *self.status.borrow_mut() = Some(text.to_string());
        }

        fn clear_status(&self) {
            *self.status.borrow_mut() = None;
        }

        fn offer_snippet(&self, snippet: &str) {
            self.snippets.borrow_mut().push(snippet.to_string());
        }
    }
}
