//! Drawing surfaces
//!
//! `DrawingSurface` is the narrow set of primitives annotation scripts may use.
//! `Canvas` implements it over an RGBA pixel buffer; it is also what the decode
//! engine paints page rasters into.

use image::{Rgba, RgbaImage};

/// Straight (non-premultiplied) RGBA color
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    pub const TRANSPARENT: Self = Self::rgba(0, 0, 0, 0);

    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    #[must_use]
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Scale alpha by `factor` in `[0, 1]`
    #[must_use]
    pub fn with_alpha_factor(self, factor: f32) -> Self {
        let a = (f32::from(self.a) * factor.clamp(0.0, 1.0)).round() as u8;
        Self { a, ..self }
    }

    /// Parse a CSS color: `#rgb`, `#rrggbb`, `#rrggbbaa`, `rgb()`, `rgba()` or a basic name
    #[must_use]
    pub fn parse(css: &str) -> Option<Self> {
        let css = css.trim().to_ascii_lowercase();
        if let Some(hex) = css.strip_prefix('#') {
            return Self::parse_hex(hex);
        }
        if let Some(args) = css
            .strip_prefix("rgba(")
            .or_else(|| css.strip_prefix("rgb("))
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return Self::parse_functional(args);
        }
        Self::named(&css)
    }

    fn parse_hex(hex: &str) -> Option<Self> {
        let nibble = |i: usize| u8::from_str_radix(&hex[i..=i], 16).ok().map(|v| v * 17);
        let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        if !hex.is_ascii() {
            return None;
        }
        match hex.len() {
            3 => Some(Self::rgb(nibble(0)?, nibble(1)?, nibble(2)?)),
            6 => Some(Self::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Self::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }

    fn parse_functional(args: &str) -> Option<Self> {
        fn channel(s: &str) -> Option<u8> {
            s.parse::<f32>()
                .ok()
                .map(|v| v.clamp(0.0, 255.0).round() as u8)
        }

        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [r, g, b] => Some(Self::rgb(channel(r)?, channel(g)?, channel(b)?)),
            [r, g, b, a] => {
                let alpha = a.parse::<f32>().ok()?.clamp(0.0, 1.0);
                Some(Self::rgba(
                    channel(r)?,
                    channel(g)?,
                    channel(b)?,
                    (alpha * 255.0).round() as u8,
                ))
            }
            _ => None,
        }
    }

    fn named(name: &str) -> Option<Self> {
        let color = match name {
            "black" => Self::BLACK,
            "white" => Self::WHITE,
            "red" => Self::rgb(255, 0, 0),
            "green" => Self::rgb(0, 128, 0),
            "lime" => Self::rgb(0, 255, 0),
            "blue" => Self::rgb(0, 0, 255),
            "yellow" => Self::rgb(255, 255, 0),
            "orange" => Self::rgb(255, 165, 0),
            "purple" => Self::rgb(128, 0, 128),
            "gray" | "grey" => Self::rgb(128, 128, 128),
            "transparent" => Self::TRANSPARENT,
            _ => return None,
        };
        Some(color)
    }
}

/// One connected run of a path
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubPath {
    pub points: Vec<(f32, f32)>,
    pub closed: bool,
}

/// Text placed by an annotation, left for the host to typeset
#[derive(Clone, Debug, PartialEq)]
pub struct TextMark {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub font: String,
    pub color: Color,
}

/// Primitives available to annotation scripts
pub trait DrawingSurface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Color);
    fn stroke_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Color, line_width: f32);
    fn clear_rect(&mut self, x: f32, y: f32, w: f32, h: f32);
    fn stroke_path(&mut self, path: &[SubPath], color: Color, line_width: f32);
    fn fill_path(&mut self, path: &[SubPath], color: Color);
    fn fill_text(&mut self, text: &str, x: f32, y: f32, font: &str, color: Color);
}

/// RGBA raster a page is painted into
#[derive(Clone, Debug)]
pub struct Canvas {
    image: RgbaImage,
    marks: Vec<TextMark>,
}

impl Canvas {
    /// Blank white canvas
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])),
            marks: Vec::new(),
        }
    }

    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Text placed by `fill_text`, in drawing order
    #[must_use]
    pub fn text_marks(&self) -> &[TextMark] {
        &self.marks
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Color {
        let Rgba([r, g, b, a]) = *self.image.get_pixel(x, y);
        Color::rgba(r, g, b, a)
    }

    /// Copy a full-page raster so that its `(0, 0)` lands at `(offset_x, offset_y)`
    pub fn draw_raster(&mut self, raster: &RgbaImage, offset_x: f32, offset_y: f32) {
        let dx = offset_x.round() as i64;
        let dy = offset_y.round() as i64;
        for y in 0..self.image.height() {
            let sy = i64::from(y) - dy;
            if sy < 0 || sy >= i64::from(raster.height()) {
                continue;
            }
            for x in 0..self.image.width() {
                let sx = i64::from(x) - dx;
                if sx < 0 || sx >= i64::from(raster.width()) {
                    continue;
                }
                let px = *raster.get_pixel(sx as u32, sy as u32);
                self.image.put_pixel(x, y, px);
            }
        }
    }

    fn blend(&mut self, x: i64, y: i64, color: Color) {
        if x < 0 || y < 0 || x >= i64::from(self.image.width()) || y >= i64::from(self.image.height())
        {
            return;
        }
        let dst = self.image.get_pixel_mut(x as u32, y as u32);
        let alpha = f32::from(color.a) / 255.0;
        let mix = |src: u8, dst: u8| {
            (f32::from(src) * alpha + f32::from(dst) * (1.0 - alpha)).round() as u8
        };
        let out_alpha = (f32::from(color.a) + f32::from(dst[3]) * (1.0 - alpha)).round() as u8;
        *dst = Rgba([
            mix(color.r, dst[0]),
            mix(color.g, dst[1]),
            mix(color.b, dst[2]),
            out_alpha,
        ]);
    }

    /// Pixel index range covering `[start, start + len)`, clipped to `limit`
    fn span(start: f32, len: f32, limit: u32) -> std::ops::Range<i64> {
        let (lo, hi) = if len < 0.0 {
            (start + len, start)
        } else {
            (start, start + len)
        };
        let lo = lo.round().max(0.0) as i64;
        let hi = (hi.round() as i64).min(i64::from(limit));
        lo..hi.max(lo)
    }

    fn stroke_segment(&mut self, from: (f32, f32), to: (f32, f32), color: Color, width: f32) {
        let half = (width / 2.0).max(0.5);
        let min_x = (from.0.min(to.0) - half).floor() as i64;
        let max_x = (from.0.max(to.0) + half).ceil() as i64;
        let min_y = (from.1.min(to.1) - half).floor() as i64;
        let max_y = (from.1.max(to.1) + half).ceil() as i64;
        let (vx, vy) = (to.0 - from.0, to.1 - from.1);
        let len_sq = vx * vx + vy * vy;

        for y in min_y.max(0)..max_y.min(i64::from(self.image.height())) {
            for x in min_x.max(0)..max_x.min(i64::from(self.image.width())) {
                let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
                let t = if len_sq == 0.0 {
                    0.0
                } else {
                    (((px - from.0) * vx + (py - from.1) * vy) / len_sq).clamp(0.0, 1.0)
                };
                let (cx, cy) = (from.0 + t * vx, from.1 + t * vy);
                let dist_sq = (px - cx).powi(2) + (py - cy).powi(2);
                if dist_sq <= half * half {
                    self.blend(x, y, color);
                }
            }
        }
    }
}

impl DrawingSurface for Canvas {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Color) {
        for py in Self::span(y, h, self.image.height()) {
            for px in Self::span(x, w, self.image.width()) {
                self.blend(px, py, color);
            }
        }
    }

    fn stroke_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Color, line_width: f32) {
        let outline = SubPath {
            points: vec![(x, y), (x + w, y), (x + w, y + h), (x, y + h)],
            closed: true,
        };
        self.stroke_path(std::slice::from_ref(&outline), color, line_width);
    }

    fn clear_rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
        for py in Self::span(y, h, self.image.height()) {
            for px in Self::span(x, w, self.image.width()) {
                self.image.put_pixel(px as u32, py as u32, Rgba([0, 0, 0, 0]));
            }
        }
    }

    fn stroke_path(&mut self, path: &[SubPath], color: Color, line_width: f32) {
        for sub in path {
            for pair in sub.points.windows(2) {
                self.stroke_segment(pair[0], pair[1], color, line_width);
            }
            if sub.closed && sub.points.len() > 2 {
                if let (Some(&last), Some(&first)) = (sub.points.last(), sub.points.first()) {
                    self.stroke_segment(last, first, color, line_width);
                }
            }
        }
    }

    fn fill_path(&mut self, path: &[SubPath], color: Color) {
        // Even-odd scanline fill; every subpath is implicitly closed
        let edges: Vec<((f32, f32), (f32, f32))> = path
            .iter()
            .filter(|sub| sub.points.len() > 2)
            .flat_map(|sub| {
                let n = sub.points.len();
                (0..n).map(move |i| (sub.points[i], sub.points[(i + 1) % n]))
            })
            .collect();
        if edges.is_empty() {
            return;
        }

        let width = self.image.width();
        for y in 0..self.image.height() {
            let scan = y as f32 + 0.5;
            let mut crossings: Vec<f32> = edges
                .iter()
                .filter(|(a, b)| (a.1 <= scan) != (b.1 <= scan))
                .map(|(a, b)| a.0 + (scan - a.1) / (b.1 - a.1) * (b.0 - a.0))
                .collect();
            crossings.sort_by(f32::total_cmp);
            for pair in crossings.chunks_exact(2) {
                for x in Self::span(pair[0], pair[1] - pair[0], width) {
                    self.blend(x, i64::from(y), color);
                }
            }
        }
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, font: &str, color: Color) {
        self.marks.push(TextMark {
            text: text.to_string(),
            x,
            y,
            font: font.to_string(),
            color,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_css_colors() {
        assert_eq!(Color::parse("#f00"), Some(Color::rgb(255, 0, 0)));
        assert_eq!(Color::parse("#00ff0080"), Some(Color::rgba(0, 255, 0, 128)));
        assert_eq!(
            Color::parse("rgba(10, 20, 30, 0.5)"),
            Some(Color::rgba(10, 20, 30, 128))
        );
        assert_eq!(Color::parse(" Blue "), Some(Color::rgb(0, 0, 255)));
        assert_eq!(Color::parse("#12"), None);
        assert_eq!(Color::parse("chartreuse-ish"), None);
    }

    #[test]
    fn fill_rect_clips_to_canvas() {
        let mut canvas = Canvas::new(10, 10);
        canvas.fill_rect(5.0, 5.0, 100.0, 100.0, Color::BLACK);
        assert_eq!(canvas.pixel(4, 4), Color::WHITE);
        assert_eq!(canvas.pixel(9, 9), Color::BLACK);
    }

    #[test]
    fn translucent_fill_blends() {
        let mut canvas = Canvas::new(2, 2);
        canvas.fill_rect(0.0, 0.0, 2.0, 2.0, Color::rgba(0, 0, 0, 128));
        let px = canvas.pixel(0, 0);
        assert!(px.r > 120 && px.r < 135, "{px:?}");
        assert_eq!(px.a, 255);
    }

    #[test]
    fn stroke_rect_leaves_interior() {
        let mut canvas = Canvas::new(20, 20);
        canvas.stroke_rect(2.0, 2.0, 16.0, 16.0, Color::BLACK, 1.0);
        assert_eq!(canvas.pixel(2, 10), Color::BLACK);
        assert_eq!(canvas.pixel(10, 10), Color::WHITE);
    }

    #[test]
    fn fill_path_covers_triangle() {
        let mut canvas = Canvas::new(20, 20);
        let tri = SubPath {
            points: vec![(0.0, 0.0), (20.0, 0.0), (0.0, 20.0)],
            closed: false,
        };
        canvas.fill_path(&[tri], Color::BLACK);
        assert_eq!(canvas.pixel(2, 2), Color::BLACK);
        assert_eq!(canvas.pixel(18, 18), Color::WHITE);
    }

    #[test]
    fn draw_raster_applies_offset() {
        let mut raster = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        raster.put_pixel(2, 3, Rgba([0, 0, 0, 255]));
        let mut canvas = Canvas::new(2, 2);
        canvas.draw_raster(&raster, -1.0, -2.0);
        assert_eq!(canvas.pixel(1, 1), Color::BLACK);
        assert_eq!(canvas.pixel(0, 0), Color::WHITE);
    }

    #[test]
    fn text_is_recorded_not_rasterized() {
        let mut canvas = Canvas::new(4, 4);
        canvas.fill_text("hi", 1.0, 2.0, "50px sans-serif", Color::BLACK);
        assert_eq!(canvas.text_marks().len(), 1);
        assert_eq!(canvas.pixel(1, 2), Color::WHITE);
    }
}
