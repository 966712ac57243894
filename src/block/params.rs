//! Block parameter mini-language
//!
//! A block body is a list of `key: value` lines:
//!
//! ```text
//! file: lectures/week3.pdf
//! page: 2, 5-7
//! rect: [0.25, 0.25, 0.5, 0.5]
//! scale: 0.8
//! annot: |
//!     fillStyle = "rgba(255, 0, 0, 0.3)"
//!     fillRect(W(0.1), H(0.2), W(0.3), H(0.05))
//! ```
//!
//! Keys may appear in any order; a repeated key keeps its last value.
//! `annot` and `note` accept an indented block after `key: |`.

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::error::{DecodeError, ParseError};

/// Default raster zoom factor
pub const DEFAULT_DPI: f32 = 2.0;

/// Default display width as a fraction of the container
pub const DEFAULT_SCALE: f32 = 1.0;

/// Most page numbers one block may list, ranges expanded
pub const MAX_LISTED_PAGES: usize = 10_000;

static KEY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(file|page|rect|scale|rotation|rotat|dpi|annot|note|link|text)\s*:\s?(.*)$")
        .expect("key line pattern is valid")
});

static ANY_KEY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][\w-]*)\s*:").expect("key pattern is valid"));

static PAGE_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)-(\d+)$").expect("range pattern is valid"));

static RANGE_DASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*-\s*").expect("dash pattern is valid"));

/// Page rotation in quarter turns
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    #[must_use]
    pub fn from_degrees(degrees: i64) -> Option<Self> {
        match degrees {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    #[must_use]
    pub const fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// True for 90 and 270, where width and height trade places
    #[must_use]
    pub const fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

/// Normalized crop box, or the whole page
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum CropRect {
    /// Written as `[-1, -1, -1, -1]`
    #[default]
    Full,
    Region { x: f32, y: f32, w: f32, h: f32 },
}

impl CropRect {
    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }

    fn from_values(values: [f32; 4]) -> Result<Self, ParseError> {
        if values.iter().all(|v| *v == -1.0) {
            return Ok(Self::Full);
        }
        let [x, y, w, h] = values;
        let origin_ok = |v: f32| (0.0..1.0).contains(&v);
        let extent_ok = |v: f32| v > 0.0 && v <= 1.0;
        if !(origin_ok(x) && origin_ok(y)) {
            return Err(ParseError::new("rect", "x and y must lie in [0, 1)"));
        }
        if !(extent_ok(w) && extent_ok(h)) {
            return Err(ParseError::new("rect", "w and h must lie in (0, 1]"));
        }
        Ok(Self::Region { x, y, w, h })
    }

    #[must_use]
    pub fn as_array(&self) -> [f32; 4] {
        match *self {
            Self::Full => [-1.0; 4],
            Self::Region { x, y, w, h } => [x, y, w, h],
        }
    }
}

/// Which pages a block shows
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PageSelection {
    /// Written as `0`
    #[default]
    All,
    /// 1-indexed, ascending, no duplicates, never empty
    Pages(Vec<usize>),
}

impl PageSelection {
    /// Expand to concrete page numbers for a document with `count` pages
    pub fn resolve(&self, count: usize) -> Result<Vec<usize>, DecodeError> {
        match self {
            Self::All => Ok((1..=count).collect()),
            Self::Pages(pages) => {
                if let Some(&page) = pages.iter().find(|&&p| p > count) {
                    return Err(DecodeError::PageOutOfRange { page, count });
                }
                Ok(pages.clone())
            }
        }
    }

    /// First requested page number, `0` for the all-pages sentinel
    #[must_use]
    pub fn first(&self) -> usize {
        match self {
            Self::All => 0,
            Self::Pages(pages) => pages.first().copied().unwrap_or(0),
        }
    }

    fn parse(value: &str) -> Result<Self, ParseError> {
        let body = RANGE_DASH.replace_all(strip_brackets(value), "-");
        let mut pages = Vec::new();
        for token in body
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            if let Some(caps) = PAGE_RANGE.captures(token) {
                let start = parse_page_number(&caps[1])?;
                let end = parse_page_number(&caps[2])?;
                if start > end {
                    return Err(ParseError::new(
                        "page",
                        format!("range {start}-{end} is reversed"),
                    ));
                }
                if pages.len() + (end - start) >= MAX_LISTED_PAGES {
                    return Err(ParseError::new(
                        "page",
                        format!("more than {MAX_LISTED_PAGES} pages requested"),
                    ));
                }
                pages.extend(start..=end);
            } else {
                if pages.len() >= MAX_LISTED_PAGES {
                    return Err(ParseError::new(
                        "page",
                        format!("more than {MAX_LISTED_PAGES} pages requested"),
                    ));
                }
                pages.push(parse_page_number(token)?);
            }
        }

        if pages.is_empty() {
            return Err(ParseError::new("page", "no pages given"));
        }
        pages.sort_unstable();
        pages.dedup();

        if pages.contains(&0) {
            if pages.len() > 1 {
                return Err(ParseError::new(
                    "page",
                    "0 (all pages) cannot be combined with explicit pages",
                ));
            }
            return Ok(Self::All);
        }
        Ok(Self::Pages(pages))
    }
}

fn parse_page_number(token: &str) -> Result<usize, ParseError> {
    token
        .parse::<usize>()
        .map_err(|_| ParseError::new("page", format!("`{token}` is not a page number")))
}

/// Parsed and validated block request
#[derive(Clone, Debug, PartialEq)]
pub struct BlockParameters {
    pub file: String,
    pub page: PageSelection,
    pub rect: CropRect,
    pub scale: f32,
    pub rotation: Rotation,
    pub dpi: f32,
    pub annot: String,
    pub note: String,
    pub link: bool,
    pub text: bool,
}

impl BlockParameters {
    /// Parse block text with the built-in default dpi
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Self::parse_with_dpi(text, DEFAULT_DPI)
    }

    /// Parse block text, using `default_dpi` when the block sets none
    pub fn parse_with_dpi(text: &str, default_dpi: f32) -> Result<Self, ParseError> {
        let mut file = None;
        let mut page = PageSelection::All;
        let mut rect = CropRect::Full;
        let mut scale = DEFAULT_SCALE;
        let mut rotation = Rotation::Deg0;
        let mut dpi = default_dpi;
        let mut annot = String::new();
        let mut note = String::new();
        let mut link = false;
        let mut text_layer = false;

        for (key, value) in split_entries(text)? {
            match key.as_str() {
                "file" => file = Some(parse_file(&value)),
                "page" => page = PageSelection::parse(&value)?,
                "rect" => rect = parse_rect(&value)?,
                "scale" => scale = parse_float("scale", &value)?,
                "rotation" | "rotat" => rotation = parse_rotation(&value)?,
                "dpi" => dpi = parse_float("dpi", &value)?,
                "annot" => annot = value,
                "note" => note = value,
                "link" => link = parse_bool("link", &value)?,
                "text" => text_layer = parse_bool("text", &value)?,
                _ => unreachable!("split_entries only yields known keys"),
            }
        }

        let file = file
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ParseError::new("file", "a source file is required"))?;
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ParseError::new("scale", "must be a positive number"));
        }
        if !(dpi.is_finite() && dpi > 0.0) {
            return Err(ParseError::new("dpi", "must be a positive number"));
        }

        Ok(Self {
            file,
            page,
            rect,
            scale,
            rotation,
            dpi,
            annot,
            note,
            link,
            text: text_layer,
        })
    }

    /// Source path as given in the block
    #[must_use]
    pub fn source(&self) -> &Path {
        Path::new(&self.file)
    }

    /// Whether the selectable text layer applies to this request
    #[must_use]
    pub fn wants_text_overlay(&self) -> bool {
        self.text && self.rect.is_full() && self.rotation == Rotation::Deg0
    }

    /// Canvas CSS width as an integer percentage
    #[must_use]
    pub fn display_width_percent(&self) -> u32 {
        (self.scale * 100.0).floor() as u32
    }

    /// Link target for a page when `link` is set
    #[must_use]
    pub fn page_link(&self, page: usize) -> Option<String> {
        self.link.then(|| format!("{}#page={page}", self.file))
    }
}

impl fmt::Display for BlockParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "file: {}", self.file)?;
        match &self.page {
            PageSelection::All => writeln!(f, "page: 0")?,
            PageSelection::Pages(pages) => {
                let list: Vec<String> = pages.iter().map(ToString::to_string).collect();
                writeln!(f, "page: {}", list.join(", "))?;
            }
        }
        let [x, y, w, h] = self.rect.as_array();
        writeln!(f, "rect: [{x}, {y}, {w}, {h}]")?;
        writeln!(f, "scale: {}", self.scale)?;
        writeln!(f, "rotation: {}", self.rotation.degrees())?;
        writeln!(f, "dpi: {}", self.dpi)?;
        writeln!(f, "link: {}", self.link)?;
        writeln!(f, "text: {}", self.text)?;
        write_text_value(f, "annot", &self.annot)?;
        write_text_value(f, "note", &self.note)
    }
}

fn write_text_value(f: &mut fmt::Formatter<'_>, key: &str, value: &str) -> fmt::Result {
    let needs_block = value.contains('\n') || value == "|" || value.trim() != value;
    if !needs_block {
        return writeln!(f, "{key}: {value}");
    }
    writeln!(f, "{key}: |")?;
    for line in value.lines() {
        if line.trim().is_empty() {
            writeln!(f)?;
        } else {
            writeln!(f, "    {line}")?;
        }
    }
    Ok(())
}

/// Split block text into `(key, value)` pairs, folding `key: |` blocks
fn split_entries(text: &str) -> Result<Vec<(String, String)>, ParseError> {
    let mut entries = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(raw) = lines.next() {
        let line = raw.trim_end();
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some(caps) = KEY_LINE.captures(trimmed) else {
            let key = ANY_KEY_LINE
                .captures(trimmed)
                .map_or_else(|| trimmed.to_string(), |c| c[1].to_string());
            return Err(ParseError::new(key, "unrecognized entry"));
        };
        let key = caps[1].to_string();
        let value = caps[2].trim();

        if value == "|" && matches!(key.as_str(), "annot" | "note") {
            let mut block = Vec::new();
            while let Some(&next) = lines.peek() {
                let starts_at_margin = !next.starts_with(char::is_whitespace);
                if starts_at_margin && KEY_LINE.is_match(next.trim_end()) {
                    break;
                }
                block.push(next.trim_end());
                lines.next();
            }
            entries.push((key, dedent(&block)));
        } else {
            entries.push((key, value.to_string()));
        }
    }
    Ok(entries)
}

/// Strip the common indent, counted in characters so mixed-width
/// whitespace cannot split one
fn dedent(lines: &[&str]) -> String {
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);

    let mut out: Vec<&str> = lines
        .iter()
        .map(|l| match l.char_indices().nth(indent) {
            Some((at, _)) if !l.trim().is_empty() => &l[at..],
            _ => "",
        })
        .collect();
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

fn strip_brackets(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value)
        .trim()
}

fn parse_file(value: &str) -> String {
    let value = value.trim();
    let value = value
        .strip_prefix("[[")
        .and_then(|v| v.strip_suffix("]]"))
        .unwrap_or(value);
    value.trim_matches('"').trim().to_string()
}

fn parse_float(key: &str, value: &str) -> Result<f32, ParseError> {
    value
        .trim()
        .parse::<f32>()
        .map_err(|_| ParseError::new(key, format!("`{value}` is not a number")))
}

fn parse_rect(value: &str) -> Result<CropRect, ParseError> {
    let parts: Vec<&str> = strip_brackets(value)
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 4 {
        return Err(ParseError::new(
            "rect",
            format!("expected 4 values, found {}", parts.len()),
        ));
    }
    let mut values = [0.0_f32; 4];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = parse_float("rect", part)?;
    }
    CropRect::from_values(values)
}

fn parse_rotation(value: &str) -> Result<Rotation, ParseError> {
    let degrees = value
        .trim()
        .parse::<i64>()
        .map_err(|_| ParseError::new("rotation", format!("`{value}` is not an integer")))?;
    Rotation::from_degrees(degrees)
        .ok_or_else(|| ParseError::new("rotation", "must be one of 0, 90, 180, 270"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ParseError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(ParseError::new(key, format!("`{other}` is not a boolean"))),
    }
}
