//! Host event bus
//!
//! The host publishes viewport, file and pointer events; each render session
//! and the orchestrator subscribe. Publishing never blocks.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use flume::{Receiver, RecvError, Sender, TryRecvError};
use log::trace;

/// Identifies one mounted block
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Events raised by the host environment
#[derive(Clone, Debug, PartialEq)]
pub enum HostEvent {
    /// A file's content changed on disk
    FileModified(PathBuf),
    /// The viewport scrolled or resized
    ViewportChanged,
    /// A page canvas is now displayed at `displayed_width` CSS pixels
    CanvasResized {
        instance: InstanceId,
        page: usize,
        displayed_width: f32,
    },
    /// Pointer over a canvas, fractional raster coordinates
    PointerMoved { x: f32, y: f32 },
    /// Pointer released over a canvas
    PointerUp { x: f32, y: f32 },
    /// Pointer left the canvas
    PointerLeft,
}

/// Fan-out channel from the host to subscribers
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<HostEvent>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every live subscriber
    pub fn publish(&self, event: HostEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        trace!("Publishing {event:?} to {} subscribers", subscribers.len());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Receive every event published from now on
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = flume::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Subscription { rx }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Receiving end of a bus subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<HostEvent>,
}

impl Subscription {
    /// Next event; `None` once the bus is gone
    pub async fn recv(&self) -> Option<HostEvent> {
        match self.rx.recv_async().await {
            Ok(event) => Some(event),
            Err(RecvError::Disconnected) => None,
        }
    }

    /// Next already-queued event, if any
    #[must_use]
    pub fn try_recv(&self) -> Option<HostEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}
