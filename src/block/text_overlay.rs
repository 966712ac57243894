//! Selectable text layer kept aligned with a rendered canvas

use log::trace;

use super::engine::TextContent;
use super::viewport::ViewportGeometry;

/// One text run in raster pixel space
#[derive(Clone, Debug, PartialEq)]
struct RasterText {
    text: String,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

/// A text run positioned in displayed (CSS) pixels
#[derive(Clone, Debug, PartialEq)]
pub struct PositionedText {
    pub text: String,
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub font_size: f32,
}

/// Text layer for one rendered page
#[derive(Clone, Debug, PartialEq)]
pub struct TextOverlay {
    items: Vec<RasterText>,
    output_width: u32,
    scale_factor: f32,
}

impl TextOverlay {
    /// Place `content` using the geometry the page was painted with
    #[must_use]
    pub fn new(content: TextContent, geometry: &ViewportGeometry) -> Self {
        let items = content
            .items
            .into_iter()
            .map(|item| RasterText {
                x: item.x * geometry.scale + geometry.offset_x,
                y: item.y * geometry.scale + geometry.offset_y,
                width: item.width * geometry.scale,
                height: item.height * geometry.scale,
                text: item.text,
            })
            .collect();
        Self {
            items,
            output_width: geometry.output_width,
            scale_factor: 1.0,
        }
    }

    #[must_use]
    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Track the canvas' displayed width. Returns true when the scale changed.
    pub fn resize(&mut self, displayed_width: f32) -> bool {
        if !displayed_width.is_finite() || displayed_width <= 0.0 || self.output_width == 0 {
            return false;
        }
        let factor = displayed_width / self.output_width as f32;
        if (factor - self.scale_factor).abs() <= f32::EPSILON {
            return false;
        }
        trace!(
            "Text overlay rescaled {:.4} -> {factor:.4}",
            self.scale_factor
        );
        self.scale_factor = factor;
        true
    }

    /// Items in displayed pixels at the current scale factor
    pub fn positioned_items(&self) -> impl Iterator<Item = PositionedText> + '_ {
        let k = self.scale_factor;
        self.items.iter().map(move |item| PositionedText {
            text: item.text.clone(),
            left: item.x * k,
            top: item.y * k,
            width: item.width * k,
            font_size: item.height * k,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::engine::TextItem;
    use crate::block::params::BlockParameters;
    use crate::block::viewport::{PageSize, compute_viewport};

    fn overlay() -> TextOverlay {
        let params = BlockParameters::parse("file: a.pdf\ndpi: 2\ntext: true").unwrap();
        let geometry = compute_viewport(PageSize::new(100.0, 50.0), &params).unwrap();
        let content = TextContent {
            items: vec![TextItem {
                text: "Hello".into(),
                x: 10.0,
                y: 5.0,
                width: 30.0,
                height: 8.0,
            }],
        };
        TextOverlay::new(content, &geometry)
    }

    #[test]
    fn places_items_in_raster_space() {
        let overlay = overlay();
        let items: Vec<_> = overlay.positioned_items().collect();
        assert_eq!(
            items,
            vec![PositionedText {
                text: "Hello".into(),
                left: 20.0,
                top: 10.0,
                width: 60.0,
                font_size: 16.0,
            }]
        );
    }

    #[test]
    fn resize_rescales_to_displayed_width() {
        let mut overlay = overlay();
        assert!(overlay.resize(100.0));
        assert_eq!(overlay.scale_factor(), 0.5);
        assert!(!overlay.resize(100.0));

        let item = overlay.positioned_items().next().unwrap();
        assert_eq!((item.left, item.top, item.font_size), (10.0, 5.0, 8.0));
    }

    #[test]
    fn resize_ignores_unusable_widths() {
        let mut overlay = overlay();
        assert!(!overlay.resize(0.0));
        assert!(!overlay.resize(f32::NAN));
        assert_eq!(overlay.scale_factor(), 1.0);
    }
}
