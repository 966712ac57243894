//! Render orchestrator
//!
//! Owns one [`RenderSession`] per mounted block, drives each through
//! [`RenderState`], and executes the resulting effects as local tasks. Must be
//! used from inside a `tokio::task::LocalSet`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, info, trace, warn};
use tokio::task::JoinHandle;

use crate::event_bus::{EventBus, HostEvent, InstanceId, Subscription};
use crate::settings::Settings;

use super::annotation::execute_annotation;
use super::cache::FileCache;
use super::canvas::Canvas;
use super::cursor::{CursorTracker, StatusSink};
use super::engine::{DecodeEngine, DocumentLease};
use super::error::RenderError;
use super::params::BlockParameters;
use super::state::{Command, Effect, Phase, RenderState};
use super::text_overlay::TextOverlay;
use super::viewport::compute_viewport;

/// One rendered page, ready for display
#[derive(Clone, Debug)]
pub struct PageOutput {
    /// 1-indexed page number
    pub page: usize,
    pub canvas: Canvas,
    /// CSS width as a percentage of the container
    pub width_percent: u32,
    /// `"<file>#page=<n>"` when the block asked for links
    pub link: Option<String>,
    /// Annotation failure, shown alongside the page
    pub annotation_error: Option<String>,
    pub text_overlay: Option<TextOverlay>,
}

/// The display surface a block renders into
pub trait BlockHost {
    /// Whether the block currently intersects the viewport
    fn is_visible(&self) -> bool;

    /// Remove everything previously shown
    fn clear(&self);

    fn show_loading(&self);

    fn show_page(&self, page: PageOutput);

    /// Render `markdown` below the pages, resolving links against `source_path`
    fn show_note(&self, markdown: &str, source_path: &Path);

    fn show_error(&self, message: &str);

    fn update_text_overlay(&self, page: usize, overlay: &TextOverlay);
}

/// Everything one mounted block owns
pub struct RenderSession {
    id: InstanceId,
    params: BlockParameters,
    host: Rc<dyn BlockHost>,
    state: RenderState,
    document: Option<Rc<DocumentLease>>,
    overlays: HashMap<usize, TextOverlay>,
    triggers: Option<JoinHandle<()>>,
}

impl RenderSession {
    fn new(
        id: InstanceId,
        params: BlockParameters,
        host: Rc<dyn BlockHost>,
        lazy_load: bool,
    ) -> Self {
        Self {
            id,
            params,
            host,
            state: RenderState::new(lazy_load),
            document: None,
            overlays: HashMap::new(),
            triggers: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    #[must_use]
    pub fn params(&self) -> &BlockParameters {
        &self.params
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }
}

impl fmt::Debug for RenderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderSession")
            .field("id", &self.id)
            .field("file", &self.params.file)
            .field("state", &self.state)
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}

type SessionRef = Rc<RefCell<RenderSession>>;

/// Shared by every task the orchestrator spawns
struct Context {
    cache: Arc<FileCache>,
    engine: Rc<dyn DecodeEngine>,
    settings: Settings,
    bus: Arc<EventBus>,
}

/// Why a render stopped early
enum Interrupt {
    /// A newer generation owns the session
    Stale,
    Failed(RenderError),
}

impl From<RenderError> for Interrupt {
    fn from(err: RenderError) -> Self {
        Interrupt::Failed(err)
    }
}

pub struct Orchestrator {
    ctx: Rc<Context>,
    sessions: RefCell<HashMap<InstanceId, SessionRef>>,
    next_id: Cell<u64>,
    events: Subscription,
    cursor: RefCell<CursorTracker>,
    status: Option<Rc<dyn StatusSink>>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        cache: Arc<FileCache>,
        engine: Rc<dyn DecodeEngine>,
        settings: Settings,
        bus: Arc<EventBus>,
    ) -> Self {
        let events = bus.subscribe();
        Self {
            ctx: Rc::new(Context {
                cache,
                engine,
                settings,
                bus,
            }),
            sessions: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
            events,
            cursor: RefCell::new(CursorTracker::new()),
            status: None,
        }
    }

    /// Forward pointer readouts to `sink`
    #[must_use]
    pub fn with_status_sink(mut self, sink: Rc<dyn StatusSink>) -> Self {
        self.status = Some(sink);
        self
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.ctx.settings
    }

    /// Mount a block. Parse failures are shown on `host` and no session is kept.
    pub fn attach(&self, source: &str, host: Rc<dyn BlockHost>) -> InstanceId {
        let id = InstanceId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let params = match BlockParameters::parse_with_dpi(source, self.ctx.settings.default_dpi)
        {
            Ok(params) => params,
            Err(e) => {
                let err = RenderError::from(e);
                warn!("Block {id} rejected: {err}");
                host.show_error(&err.display_message());
                return id;
            }
        };

        debug!("Attaching block {id} for {}", params.file);
        let visible = host.is_visible();
        let session = Rc::new(RefCell::new(RenderSession::new(
            id,
            params,
            host,
            self.ctx.settings.lazy_load,
        )));
        self.sessions.borrow_mut().insert(id, Rc::clone(&session));
        dispatch(&self.ctx, &session, Command::Attach { visible });
        id
    }

    /// Unmount a block. In-flight work for it is discarded.
    pub fn detach(&self, id: InstanceId) {
        let session = self.sessions.borrow_mut().remove(&id);
        if let Some(session) = session {
            debug!("Detaching block {id}");
            dispatch(&self.ctx, &session, Command::Destroy);
        }
    }

    #[must_use]
    pub fn phase(&self, id: InstanceId) -> Option<Phase> {
        self.sessions
            .borrow()
            .get(&id)
            .map(|session| session.borrow().phase())
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.borrow().len()
    }

    /// Process bus events. Only returns once every publisher is gone, which
    /// cannot happen while the orchestrator itself holds the bus.
    pub async fn run(&self) {
        while let Some(event) = self.events.recv().await {
            self.handle_event(event);
        }
        debug!("Event bus closed, orchestrator stopping");
    }

    /// Process events already queued on the bus
    pub fn drain_events(&self) {
        while let Some(event) = self.events.try_recv() {
            self.handle_event(event);
        }
    }

    pub fn handle_event(&self, event: HostEvent) {
        trace!("Orchestrator event {event:?}");
        match event {
            HostEvent::FileModified(path) => self.source_modified(&path),
            HostEvent::CanvasResized {
                instance,
                page,
                displayed_width,
            } => self.canvas_resized(instance, page, displayed_width),
            HostEvent::PointerMoved { x, y } => {
                let text = self.cursor.borrow().moved(x, y);
                if let Some(sink) = &self.status {
                    sink.set_status(&text);
                }
            }
            HostEvent::PointerUp { x, y } => {
                let snippet = self.cursor.borrow_mut().clicked(x, y);
                if let Some(sink) = &self.status {
                    sink.offer_snippet(&snippet);
                }
            }
            HostEvent::PointerLeft => {
                if let Some(sink) = &self.status {
                    sink.clear_status();
                }
            }
            // Lazy trigger tasks watch the viewport themselves
            HostEvent::ViewportChanged => {}
        }
    }

    fn source_modified(&self, path: &Path) {
        self.ctx.cache.invalid(path);
        let affected: Vec<SessionRef> = self
            .sessions
            .borrow()
            .values()
            .filter(|session| session.borrow().params.source() == path)
            .cloned()
            .collect();
        if !affected.is_empty() {
            info!("{path:?} changed, refreshing {} blocks", affected.len());
        }
        for session in affected {
            dispatch(&self.ctx, &session, Command::SourceChanged);
        }
    }

    fn canvas_resized(&self, id: InstanceId, page: usize, displayed_width: f32) {
        let Some(session) = self.sessions.borrow().get(&id).cloned() else {
            return;
        };
        let update = {
            let mut s = session.borrow_mut();
            let host = Rc::clone(&s.host);
            match s.overlays.get_mut(&page) {
                Some(overlay) => overlay
                    .resize(displayed_width)
                    .then(|| (host, overlay.clone())),
                None => None,
            }
        };
        if let Some((host, overlay)) = update {
            host.update_text_overlay(page, &overlay);
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let sessions: Vec<SessionRef> = self.sessions.get_mut().drain().map(|(_, s)| s).collect();
        for session in sessions {
            dispatch(&self.ctx, &session, Command::Destroy);
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("sessions", &self.sessions.borrow().len())
            .field("settings", &self.ctx.settings)
            .finish_non_exhaustive()
    }
}

fn dispatch(ctx: &Rc<Context>, session: &SessionRef, cmd: Command) {
    let effects = session.borrow_mut().state.apply(cmd);
    execute_effects(ctx, session, effects);
}

fn execute_effects(ctx: &Rc<Context>, session: &SessionRef, effects: Vec<Effect>) {
    for effect in effects {
        match effect {
            Effect::ArmLazyTriggers => arm_lazy_triggers(ctx, session),
            Effect::CancelLazyTriggers => {
                if let Some(handle) = session.borrow_mut().triggers.take() {
                    handle.abort();
                }
            }
            Effect::StartRender { generation } => {
                tokio::task::spawn_local(render_task(
                    Rc::clone(ctx),
                    Rc::clone(session),
                    generation,
                ));
            }
            Effect::ReleaseDocument => {
                let document = session.borrow_mut().document.take();
                if let Some(document) = document {
                    document.release();
                }
            }
        }
    }
}

fn arm_lazy_triggers(ctx: &Rc<Context>, session: &SessionRef) {
    let (id, delay) = {
        let s = session.borrow();
        (s.id, ctx.settings.fallback_delay(s.params.page.first()))
    };
    debug!("Block {id} waiting for visibility, fallback in {delay:?}");

    // Subscribe before spawning so no viewport change is missed
    let events = ctx.bus.subscribe();
    let handle = tokio::task::spawn_local(lazy_triggers(
        Rc::clone(ctx),
        Rc::clone(session),
        events,
        delay,
    ));
    if let Some(previous) = session.borrow_mut().triggers.replace(handle) {
        previous.abort();
    }
}

async fn lazy_triggers(
    ctx: Rc<Context>,
    session: SessionRef,
    events: Subscription,
    delay: std::time::Duration,
) {
    let host = Rc::clone(&session.borrow().host);
    let became_visible = async {
        loop {
            match events.recv().await {
                Some(HostEvent::ViewportChanged) if host.is_visible() => break,
                Some(_) => {}
                None => futures::future::pending::<()>().await,
            }
        }
    };

    let cmd = tokio::select! {
        () = became_visible => Command::BecameVisible,
        () = tokio::time::sleep(delay) => Command::FallbackFired,
    };
    trace!("Block {} lazy trigger: {cmd:?}", session.borrow().id);

    // Finished on our own; nothing left to abort
    drop(session.borrow_mut().triggers.take());
    dispatch(&ctx, &session, cmd);
}

async fn render_task(ctx: Rc<Context>, session: SessionRef, generation: u64) {
    let id = session.borrow().id;
    let ok = match render_pages(&ctx, &session, generation).await {
        Ok(()) => true,
        Err(Interrupt::Stale) => {
            debug!("Block {id} render {generation} superseded");
            return;
        }
        Err(Interrupt::Failed(err)) => {
            warn!("Block {id} render {generation} failed: {err}");
            let host = Rc::clone(&session.borrow().host);
            host.clear();
            host.show_error(&err.display_message());
            false
        }
    };
    dispatch(&ctx, &session, Command::RenderFinished { generation, ok });
}

fn ensure_current(session: &SessionRef, generation: u64) -> Result<(), Interrupt> {
    if session.borrow().state.is_current(generation) {
        Ok(())
    } else {
        Err(Interrupt::Stale)
    }
}

async fn render_pages(
    ctx: &Context,
    session: &SessionRef,
    generation: u64,
) -> Result<(), Interrupt> {
    let (id, params, host) = {
        let s = session.borrow();
        (s.id, s.params.clone(), Rc::clone(&s.host))
    };
    let path: PathBuf = params.source().to_path_buf();
    debug!("Block {id} render {generation} of {path:?}");
    // The block may have been detached before this task first ran
    ensure_current(session, generation)?;
    host.show_loading();

    let bytes = ctx.cache.get(&path).await;
    ensure_current(session, generation)?;
    let bytes = bytes.map_err(RenderError::from)?;

    let opened = ctx.engine.open_document(bytes).await;
    let lease = match opened {
        Ok(handle) => DocumentLease::new(handle),
        Err(e) => {
            ensure_current(session, generation)?;
            return Err(RenderError::from(e).into());
        }
    };
    if ensure_current(session, generation).is_err() {
        lease.release();
        return Err(Interrupt::Stale);
    }
    let previous = session.borrow_mut().document.replace(Rc::clone(&lease));
    if let Some(previous) = previous {
        previous.release();
    }

    let doc = Rc::clone(lease.handle().map_err(RenderError::from)?);
    let pages = params
        .page
        .resolve(doc.num_pages())
        .map_err(RenderError::from)?;

    let mut outputs = Vec::with_capacity(pages.len());
    for number in pages {
        let page = doc.get_page(number).await;
        ensure_current(session, generation)?;
        let page = page.map_err(RenderError::from)?;

        let geometry = compute_viewport(page.intrinsic_size(), &params).map_err(RenderError::from)?;
        let mut canvas = Canvas::new(geometry.output_width, geometry.output_height);
        let painted = page.render(&mut canvas, &geometry).await;
        ensure_current(session, generation)?;
        painted.map_err(RenderError::from)?;

        let annotation_error = if ctx.settings.allow_annotations && !params.annot.trim().is_empty()
        {
            execute_annotation(
                &params.annot,
                &mut canvas,
                params.dpi,
                geometry.output_width as f32 / params.dpi,
                geometry.output_height as f32 / params.dpi,
            )
            .err()
            .map(|e| e.to_string())
        } else {
            None
        };

        let text_overlay = if params.wants_text_overlay() {
            let content = page.text_content().await;
            ensure_current(session, generation)?;
            match content {
                Ok(content) => Some(TextOverlay::new(content, &geometry)),
                Err(e) => {
                    warn!("Block {id} page {number}: no text layer: {e}");
                    None
                }
            }
        } else {
            None
        };

        outputs.push(PageOutput {
            page: number,
            canvas,
            width_percent: params.display_width_percent(),
            link: params.page_link(number),
            annotation_error,
            text_overlay,
        });
    }

    ensure_current(session, generation)?;
    let overlays: HashMap<usize, TextOverlay> = outputs
        .iter()
        .filter_map(|out| out.text_overlay.clone().map(|overlay| (out.page, overlay)))
        .collect();
    session.borrow_mut().overlays = overlays;

    let count = outputs.len();
    host.clear();
    for output in outputs {
        host.show_page(output);
    }
    if !params.note.trim().is_empty() {
        host.show_note(&params.note, &path);
    }
    debug!("Block {id} render {generation} showed {count} pages");
    Ok(())
}
