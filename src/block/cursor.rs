//! Pointer position readout and coordinate snippets for annotation authoring

use std::fmt;

/// Receives cursor readouts
pub trait StatusSink {
    /// Show `text` in the status area
    fn set_status(&self, text: &str);

    fn clear_status(&self);

    /// A snippet ready to paste into an `annot` script
    fn offer_snippet(&self, snippet: &str);
}

/// Point in fractional raster coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CursorPoint {
    pub x: f32,
    pub y: f32,
}

impl fmt::Display for CursorPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", round3(self.x), round3(self.y))
    }
}

/// Tracks the last click so consecutive clicks describe a rectangle
#[derive(Debug, Default)]
pub struct CursorTracker {
    anchor: CursorPoint,
}

impl CursorTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn anchor(&self) -> CursorPoint {
        self.anchor
    }

    /// Status text for the current position
    #[must_use]
    pub fn moved(&self, x: f32, y: f32) -> String {
        CursorPoint { x, y }.to_string()
    }

    /// `W(..), H(..), W(..), H(..)` spanning the previous click to this one
    pub fn clicked(&mut self, x: f32, y: f32) -> String {
        let last = self.anchor;
        self.anchor = CursorPoint { x, y };
        format!(
            "W({}), H({}), W({}), H({})",
            round3(last.x),
            round3(last.y),
            round3(x - last.x),
            round3(y - last.y)
        )
    }
}

fn round3(v: f32) -> f32 {
    let r = (v * 1000.0).round() / 1000.0;
    if r == 0.0 { 0.0 } else { r }
}
