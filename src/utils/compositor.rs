//! Title overlay for the cover: a gradient band above the base illustration
//! with the title word-wrapped, outlined and gradient-filled inside it.

use crate::core::cancel::Cancelled;
use crate::core::config::CoverConfig;
use image::{imageops, DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use thiserror::Error;

const BAND_TOP: [u8; 3] = [0x66, 0x7e, 0xea];
const BAND_BOTTOM: [u8; 3] = [0x76, 0x4b, 0xa2];
const TEXT_TOP: [u8; 3] = [0xfc, 0xd3, 0x4d];
const TEXT_BOTTOM: [u8; 3] = [0xf5, 0x9e, 0x0b];
const STROKE: [u8; 3] = [0xff, 0xff, 0xff];

/// Starting font size is `width / INITIAL_FONT_DIVISOR`.
const INITIAL_FONT_DIVISOR: f32 = 14.0;
const WRAP_WIDTH_RATIO: f32 = 0.9;
const LINE_HEIGHT_RATIO: f32 = 1.2;
const STROKE_RATIO: f32 = 1.0 / 8.0;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("font error: {0}")]
    Font(String),
    #[error("no font configured for the title overlay")]
    NoFont,
    #[error("overlay timed out")]
    Timeout,
    #[error("overlay task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Draws the title band onto an encoded base image and returns PNG bytes.
pub trait ImageCompositor: Send + Sync {
    fn compose_title(&self, base: &[u8], title: &str) -> Result<Vec<u8>, OverlayError>;
}

pub trait TextMeasure {
    fn text_width(&self, text: &str, size: f32) -> f32;
}

impl TextMeasure for fontdue::Font {
    fn text_width(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|c| self.metrics(c, size).advance_width).sum()
    }
}

/// Font sizing limits for the title.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TitleLayout {
    pub band_ratio: f32,
    pub min_font_size: f32,
    pub font_step: f32,
    pub max_lines: usize,
}

impl From<&CoverConfig> for TitleLayout {
    fn from(config: &CoverConfig) -> Self {
        Self {
            band_ratio: config.title_band_ratio,
            min_font_size: config.min_font_size,
            font_step: config.font_step,
            max_lines: config.max_lines,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FittedTitle {
    pub font_size: f32,
    pub lines: Vec<String>,
}

/// Greedy word wrap. A single word wider than `max_width` gets its own line.
pub fn wrap_title(measure: &dyn TextMeasure, title: &str, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in title.split_whitespace() {
        if line.is_empty() {
            line.push_str(word);
            continue;
        }
        let candidate = format!("{} {}", line, word);
        if measure.text_width(&candidate, size) > max_width {
            lines.push(std::mem::replace(&mut line, word.to_string()));
        } else {
            line = candidate;
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Shrinks the font until the title fits in `layout.max_lines` or the
/// minimum size is reached.
pub fn fit_title(
    measure: &dyn TextMeasure,
    title: &str,
    canvas_width: f32,
    layout: &TitleLayout,
) -> FittedTitle {
    let max_width = canvas_width * WRAP_WIDTH_RATIO;
    let mut font_size = (canvas_width / INITIAL_FONT_DIVISOR).floor();
    let mut lines = wrap_title(measure, title, font_size, max_width);
    while lines.len() > layout.max_lines && font_size > layout.min_font_size {
        font_size = (font_size - layout.font_step).max(layout.min_font_size);
        lines = wrap_title(measure, title, font_size, max_width);
    }
    FittedTitle { font_size, lines }
}

pub fn band_height(image_height: u32, band_ratio: f32) -> u32 {
    (image_height as f32 * band_ratio).round() as u32
}

/// Top edge of each title line, with the block centred vertically in the band.
pub fn line_tops(fitted: &FittedTitle, band: u32) -> Vec<f32> {
    let size = fitted.font_size;
    let line_height = size * LINE_HEIGHT_RATIO;
    let block_top = (band as f32 - line_height * fitted.lines.len() as f32) / 2.0;
    (0..fitted.lines.len())
        .map(|i| block_top + line_height * i as f32 + (line_height - size) / 2.0)
        .collect()
}

/// Position of row `y` inside the fill gradient of its own line, in `[0, 1]`.
pub fn fill_gradient_t(y: f32, tops: &[f32], font_size: f32) -> f32 {
    let top = tops
        .iter()
        .copied()
        .take_while(|top| *top <= y)
        .last()
        .or_else(|| tops.first().copied())
        .unwrap_or(0.0);
    ((y - top) / font_size.max(1.0)).clamp(0.0, 1.0)
}

fn lerp(from: [u8; 3], to: [u8; 3], t: f32) -> [u8; 3] {
    let t = t.clamp(0.0, 1.0);
    let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
    [mix(from[0], to[0]), mix(from[1], to[1]), mix(from[2], to[2])]
}

fn blend(pixel: &mut Rgba<u8>, color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    for (channel, value) in pixel.0.iter_mut().zip(color) {
        *channel = (value as f32 * alpha + *channel as f32 * (1.0 - alpha)).round() as u8;
    }
    pixel.0[3] = 255;
}

pub fn decode_base(bytes: &[u8]) -> Result<RgbaImage, OverlayError> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Taller canvas: gradient band on top, `base` below it.
pub fn build_canvas(base: &RgbaImage, band_ratio: f32) -> (RgbaImage, u32) {
    let (width, height) = base.dimensions();
    let band = band_height(height, band_ratio);
    let mut canvas = RgbaImage::new(width, height + band);
    for y in 0..band {
        let [r, g, b] = lerp(BAND_TOP, BAND_BOTTOM, y as f32 / band.max(1) as f32);
        for x in 0..width {
            canvas.put_pixel(x, y, Rgba([r, g, b, 255]));
        }
    }
    imageops::overlay(&mut canvas, base, 0, band as i64);
    (canvas, band)
}

/// Per-pixel coverage in `[0, 1]` over the whole canvas.
struct CoverageMask {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl CoverageMask {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![0.0; width as usize * height as usize],
        }
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            None
        } else {
            Some(y as usize * self.width as usize + x as usize)
        }
    }

    fn raise(&mut self, x: i64, y: i64, value: f32) {
        if let Some(i) = self.index(x, y) {
            if value > self.values[i] {
                self.values[i] = value;
            }
        }
    }

    fn dilate(&self, radius: f32) -> Self {
        let reach = radius.ceil() as i64;
        let offsets: Vec<(i64, i64)> = (-reach..=reach)
            .flat_map(|dy| (-reach..=reach).map(move |dx| (dx, dy)))
            .filter(|(dx, dy)| ((dx * dx + dy * dy) as f32).sqrt() <= radius)
            .collect();
        let mut out = Self::new(self.width, self.height);
        for y in 0..self.height as i64 {
            for x in 0..self.width as i64 {
                let Some(i) = self.index(x, y) else { continue };
                let value = self.values[i];
                if value <= 0.0 {
                    continue;
                }
                for (dx, dy) in &offsets {
                    out.raise(x + dx, y + dy, value);
                }
            }
        }
        out
    }
}

/// `image` + `fontdue` implementation of [`ImageCompositor`].
pub struct RasterCompositor {
    font: fontdue::Font,
    layout: TitleLayout,
}

impl RasterCompositor {
    pub fn from_font_bytes(bytes: &[u8], layout: TitleLayout) -> Result<Self, OverlayError> {
        let font = fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default())
            .map_err(|e| OverlayError::Font(e.to_string()))?;
        Ok(Self { font, layout })
    }

    /// Loads `cover.font_path`; no path means no overlay.
    pub fn from_config(config: &CoverConfig) -> Result<Self, OverlayError> {
        let path = config.font_path.as_deref().ok_or(OverlayError::NoFont)?;
        let bytes = std::fs::read(path)
            .map_err(|e| OverlayError::Font(format!("failed to read {}: {}", path, e)))?;
        Self::from_font_bytes(&bytes, TitleLayout::from(config))
    }

    fn rasterize_title(&self, fitted: &FittedTitle, canvas_width: u32, band: u32, mask: &mut CoverageMask) {
        let size = fitted.font_size;
        let ascent = self
            .font
            .horizontal_line_metrics(size)
            .map(|m| m.ascent)
            .unwrap_or(size * 0.8);

        for (line, line_top) in fitted.lines.iter().zip(line_tops(fitted, band)) {
            let baseline = line_top + ascent;
            let mut pen_x = (canvas_width as f32 - self.font.text_width(line, size)) / 2.0;

            for c in line.chars() {
                let (metrics, bitmap) = self.font.rasterize(c, size);
                let origin_x = (pen_x + metrics.xmin as f32).round() as i64;
                let origin_y =
                    (baseline - metrics.height as f32 - metrics.ymin as f32).round() as i64;
                for row in 0..metrics.height {
                    for col in 0..metrics.width {
                        let coverage = bitmap[row * metrics.width + col] as f32 / 255.0;
                        if coverage > 0.0 {
                            mask.raise(origin_x + col as i64, origin_y + row as i64, coverage);
                        }
                    }
                }
                pen_x += metrics.advance_width;
            }
        }
    }
}

impl ImageCompositor for RasterCompositor {
    fn compose_title(&self, base: &[u8], title: &str) -> Result<Vec<u8>, OverlayError> {
        let base = decode_base(base)?;
        let (mut canvas, band) = build_canvas(&base, self.layout.band_ratio);
        let (width, height) = canvas.dimensions();

        let fitted = fit_title(&self.font, title, width as f32, &self.layout);
        let mut fill = CoverageMask::new(width, height);
        self.rasterize_title(&fitted, width, band, &mut fill);
        let stroke = fill.dilate(fitted.font_size * STROKE_RATIO / 2.0);

        let tops = line_tops(&fitted, band);
        for (x, y, pixel) in canvas.enumerate_pixels_mut() {
            let Some(i) = fill.index(x as i64, y as i64) else { continue };
            let outline = stroke.values[i];
            if outline > 0.0 {
                blend(pixel, STROKE, outline);
            }
            let coverage = fill.values[i];
            if coverage > 0.0 {
                let t = fill_gradient_t(y as f32, &tops, fitted.font_size);
                let color = lerp(TEXT_TOP, TEXT_BOTTOM, t);
                blend(pixel, color, coverage);
            }
        }

        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(canvas).write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every character is half the font size wide.
    struct FixedWidth;

    impl TextMeasure for FixedWidth {
        fn text_width(&self, text: &str, size: f32) -> f32 {
            text.chars().count() as f32 * size * 0.5
        }
    }

    fn layout() -> TitleLayout {
        TitleLayout::from(&CoverConfig::default())
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 200, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_wrap_is_greedy() {
        // 10 px per char at size 20, so 100 px holds 10 chars.
        let lines = wrap_title(&FixedWidth, "The Brave Little Fox", 20.0, 100.0);
        assert_eq!(lines, vec!["The Brave", "Little Fox"]);
        let lines = wrap_title(&FixedWidth, "Supercalifragilistic fox", 20.0, 100.0);
        assert_eq!(lines, vec!["Supercalifragilistic", "fox"]);
        assert!(wrap_title(&FixedWidth, "   ", 20.0, 100.0).is_empty());
    }

    #[test]
    fn test_short_title_keeps_initial_size() {
        let fitted = fit_title(&FixedWidth, "Fox", 512.0, &layout());
        assert_eq!(fitted.font_size, 36.0);
        assert_eq!(fitted.lines, vec!["Fox"]);
    }

    #[test]
    fn test_long_title_shrinks_until_two_lines_or_floor() {
        let title = "The Very Brave Little Fox Who Learned To Share His Shiny Red Scarf";
        let fitted = fit_title(&FixedWidth, title, 512.0, &layout());
        let start = 36.0;
        assert!(fitted.font_size < start);
        assert!(fitted.font_size >= 24.0);
        assert!(fitted.lines.len() <= 2 || fitted.font_size == 24.0);
        // the step before the final size still needed more lines
        let previous = fitted.font_size + 3.0;
        if previous <= start {
            assert!(wrap_title(&FixedWidth, title, previous, 512.0 * 0.9).len() > 2);
        }
    }

    #[test]
    fn test_font_size_never_drops_below_floor() {
        let title = "Once upon a time a very small fox with a bright red scarf \
                     wandered far beyond the old oak tree to find a friend";
        let fitted = fit_title(&FixedWidth, title, 512.0, &layout());
        assert_eq!(fitted.font_size, 24.0);
        assert!(fitted.lines.len() > 2);

        let odd_step = TitleLayout {
            font_step: 5.0,
            ..layout()
        };
        let fitted = fit_title(&FixedWidth, title, 512.0, &odd_step);
        assert_eq!(fitted.font_size, 24.0);
    }

    #[test]
    fn test_fill_gradient_restarts_on_each_line() {
        let close = |a: f32, b: f32| (a - b).abs() < 1e-3;
        let fitted = FittedTitle {
            font_size: 30.0,
            lines: vec!["The Brave".to_string(), "Little Fox".to_string()],
        };
        let tops = line_tops(&fitted, 102);
        // block is 72 px tall, centred in 102 px; each line padded by 3 px
        assert_eq!(tops.len(), 2);
        assert!(close(tops[0], 18.0) && close(tops[1], 54.0));

        assert!(close(fill_gradient_t(33.0, &tops, 30.0), 0.5));
        assert!(close(fill_gradient_t(69.0, &tops, 30.0), 0.5));
        assert!(fill_gradient_t(55.0, &tops, 30.0) < 0.1);
        // antialiased edges just outside a line clamp to the ends
        assert_eq!(fill_gradient_t(10.0, &tops, 30.0), 0.0);
        assert_eq!(fill_gradient_t(50.0, &tops, 30.0), 1.0);
    }

    #[test]
    fn test_canvas_adds_gradient_band_above_base() {
        let base = decode_base(&png(512, 683)).unwrap();
        let (canvas, band) = build_canvas(&base, 0.15);
        assert_eq!(band, 102);
        assert_eq!(canvas.dimensions(), (512, 683 + 102));
        assert_eq!(canvas.get_pixel(0, 0).0, [0x66, 0x7e, 0xea, 255]);
        assert_eq!(canvas.get_pixel(5, band).0, [10, 200, 30, 255]);
        let near_bottom = canvas.get_pixel(0, band - 1).0;
        assert!(near_bottom[0] > 0x70 && near_bottom[2] < 0xaa);
    }

    #[test]
    fn test_garbage_input_is_overlay_error() {
        assert!(matches!(decode_base(b"not an image"), Err(OverlayError::Image(_))));
        assert!(matches!(
            RasterCompositor::from_font_bytes(b"not a font", layout()),
            Err(OverlayError::Font(_))
        ));
        assert!(matches!(
            RasterCompositor::from_config(&CoverConfig::default()),
            Err(OverlayError::NoFont)
        ));
    }

    #[test]
    fn test_dilate_spreads_coverage() {
        let mut mask = CoverageMask::new(9, 9);
        mask.raise(4, 4, 1.0);
        let grown = mask.dilate(2.0);
        assert_eq!(grown.values[grown.index(4, 6).unwrap()], 1.0);
        assert_eq!(grown.values[grown.index(6, 6).unwrap()], 0.0);
        assert_eq!(grown.values[grown.index(0, 0).unwrap()], 0.0);
    }

    #[test]
    fn test_renders_with_system_font_when_available() {
        let candidates = [
            "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
            "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
            "/Library/Fonts/Arial.ttf",
        ];
        let Some(bytes) = candidates.iter().find_map(|p| std::fs::read(p).ok()) else {
            return;
        };
        let compositor = RasterCompositor::from_font_bytes(&bytes, layout()).unwrap();
        let out = compositor
            .compose_title(&png(512, 683), "The Brave Little Fox")
            .unwrap();
        let rendered = decode_base(&out).unwrap();
        assert_eq!(rendered.dimensions(), (512, 785));
    }
}
