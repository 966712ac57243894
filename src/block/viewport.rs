//! Viewport transform engine
//!
//! Maps a page's intrinsic size plus the block's crop/zoom/rotation to the
//! pixel geometry that gets painted. Pure; nothing here touches a document.

use super::error::ViewportError;
use super::params::{BlockParameters, CropRect, Rotation};

/// Largest raster, in pixels, a single page may be rendered to
pub const MAX_RASTER_PIXELS: u64 = 64 * 1024 * 1024;

/// Page size in PDF points, before rotation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Size after applying a quarter-turn rotation
    #[must_use]
    pub fn rotated(self, rotation: Rotation) -> Self {
        if rotation.swaps_axes() {
            Self::new(self.height, self.width)
        } else {
            self
        }
    }
}

/// Pixel-space description of what part of a page is painted
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportGeometry {
    /// Painted width in pixels
    pub output_width: u32,
    /// Painted height in pixels
    pub output_height: u32,
    /// Horizontal translation of the full raster (zero or negative)
    pub offset_x: f32,
    /// Vertical translation of the full raster (zero or negative)
    pub offset_y: f32,
    /// Raster zoom factor
    pub scale: f32,
    pub rotation: Rotation,
    /// Width of the whole rotated page at `scale`
    pub full_width: f32,
    /// Height of the whole rotated page at `scale`
    pub full_height: f32,
}

impl ViewportGeometry {
    /// Map a point in unrotated page space to output pixels
    #[must_use]
    pub fn page_to_pixel(&self, page: PageSize, x: f32, y: f32) -> (f32, f32) {
        let (rx, ry) = match self.rotation {
            Rotation::Deg0 => (x, y),
            Rotation::Deg90 => (page.height - y, x),
            Rotation::Deg180 => (page.width - x, page.height - y),
            Rotation::Deg270 => (y, page.width - x),
        };
        (
            rx * self.scale + self.offset_x,
            ry * self.scale + self.offset_y,
        )
    }

    /// Whether the geometry covers the whole page
    #[must_use]
    pub fn is_full_page(&self) -> bool {
        self.offset_x == 0.0
            && self.offset_y == 0.0
            && self.output_width == self.full_width.floor() as u32
            && self.output_height == self.full_height.floor() as u32
    }
}

/// Compute the painted viewport for one page
pub fn compute_viewport(
    intrinsic: PageSize,
    params: &BlockParameters,
) -> Result<ViewportGeometry, ViewportError> {
    if !(intrinsic.width.is_finite()
        && intrinsic.height.is_finite()
        && intrinsic.width > 0.0
        && intrinsic.height > 0.0)
    {
        return Err(ViewportError::EmptyPage {
            width: intrinsic.width,
            height: intrinsic.height,
        });
    }

    let dpi = params.dpi;
    let page = intrinsic.rotated(params.rotation);
    let full_width = page.width * dpi;
    let full_height = page.height * dpi;

    // Crop fractions are of the unrotated page
    let (offset_x, offset_y, width, height) = match params.rect {
        CropRect::Full => (0.0, 0.0, full_width.floor(), full_height.floor()),
        CropRect::Region { x, y, w, h } => (
            -x * intrinsic.width * dpi,
            -y * intrinsic.height * dpi,
            (w * intrinsic.width * dpi).floor(),
            (h * intrinsic.height * dpi).floor(),
        ),
    };

    if width < 1.0 || height < 1.0 {
        return Err(ViewportError::Degenerate {
            width: width as i64,
            height: height as i64,
        });
    }
    // The whole page is rasterized before cropping, so both sizes are bounded
    for (w, h) in [(width, height), (full_width, full_height)] {
        if f64::from(w) * f64::from(h) > MAX_RASTER_PIXELS as f64 {
            return Err(ViewportError::TooLarge {
                width: w,
                height: h,
                limit: MAX_RASTER_PIXELS,
            });
        }
    }

    Ok(ViewportGeometry {
        output_width: width as u32,
        output_height: height as u32,
        offset_x,
        offset_y,
        scale: dpi,
        rotation: params.rotation,
        full_width,
        full_height,
    })
}
