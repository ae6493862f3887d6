//! Overlay canvas and landmark drawing

mod landmarks;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use image::{imageops, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

pub use landmarks::{LandmarkPainter, SoftwarePainter};

use crate::platform::VideoFrame;

/// Errors producing overlay output
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("no video frame has been rendered yet")]
    NothingToCapture,

    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),

    #[error("snapshot request was dropped")]
    Dropped,
}

/// An RGBA color, written as `#RRGGBB` or `#RRGGBBAA`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(pub [u8; 4]);

impl Color {
    pub fn rgba(&self) -> Rgba<u8> {
        Rgba(self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid color {0:?}, expected #RRGGBB or #RRGGBBAA")]
pub struct ParseColorError(String);

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseColorError(s.to_string());
        let hex = s.strip_prefix('#').ok_or_else(invalid)?;
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(invalid());
        }

        let mut rgba = [0, 0, 0, 255];
        for (i, channel) in rgba.iter_mut().enumerate().take(hex.len() / 2) {
            *channel = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Color(rgba))
    }
}

impl TryFrom<String> for Color {
    type Error = ParseColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        if a == 255 {
            write!(f, "#{:02X}{:02X}{:02X}", r, g, b)
        } else {
            write!(f, "#{:02X}{:02X}{:02X}{:02X}", r, g, b, a)
        }
    }
}

/// Visual style for landmark points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawingStyle {
    /// Outline color
    pub color: Color,
    pub fill_color: Color,
    /// Outline width in pixels
    pub line_width: u32,
    /// Point radius in pixels
    pub radius: u32,
}

impl Default for DrawingStyle {
    fn default() -> Self {
        Self {
            color: Color([0x1F, 0x51, 0xFF, 0xFF]),
            fill_color: Color([0xD3, 0xD3, 0xD3, 0xFF]),
            line_width: 2,
            radius: 5,
        }
    }
}

/// Transparent drawing surface laid over the video
#[derive(Debug, Clone)]
pub struct Canvas {
    image: RgbaImage,
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

impl Canvas {
    pub fn new() -> Self {
        Self {
            image: RgbaImage::new(0, 0),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Resize to exactly `width` x `height`. A size change discards the
    /// previous contents.
    pub fn set_size(&mut self, width: u32, height: u32) {
        if self.image.dimensions() != (width, height) {
            self.image = RgbaImage::new(width, height);
        }
    }

    /// Reset every pixel to transparent
    pub fn clear(&mut self) {
        self.image.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }
}

/// Lay the overlay over `frame`, as the two are shown on screen
pub fn compose(frame: &VideoFrame, canvas: &Canvas) -> RgbaImage {
    let mut composed = image::DynamicImage::ImageRgb8(frame.image().clone()).into_rgba8();
    imageops::overlay(&mut composed, canvas.image(), 0, 0);
    composed
}

/// Write `frame` with its overlay to a PNG file
pub fn save_snapshot(frame: &VideoFrame, canvas: &Canvas, path: &Path) -> Result<(), RenderError> {
    compose(frame, canvas).save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_parse_color() {
        assert_eq!("#1F51FF".parse::<Color>().unwrap(), Color([0x1F, 0x51, 0xFF, 0xFF]));
        assert_eq!("#00000080".parse::<Color>().unwrap(), Color([0, 0, 0, 0x80]));
        assert!("1F51FF".parse::<Color>().is_err());
        assert!("#1F51".parse::<Color>().is_err());
        assert!("#GG51FF".parse::<Color>().is_err());
    }

    #[test]
    fn test_color_display_round_trips() {
        let style = DrawingStyle::default();
        assert_eq!(style.color.to_string(), "#1F51FF");
        assert_eq!(style.fill_color.to_string(), "#D3D3D3");
    }

    #[test]
    fn test_canvas_resize_clears() {
        let mut canvas = Canvas::new();
        canvas.set_size(4, 2);
        canvas.image_mut().put_pixel(1, 1, Rgba([255, 0, 0, 255]));

        // Same size keeps contents until cleared
        canvas.set_size(4, 2);
        assert_eq!(canvas.image().get_pixel(1, 1), &Rgba([255, 0, 0, 255]));
        canvas.clear();
        assert_eq!(canvas.image().get_pixel(1, 1), &Rgba([0, 0, 0, 0]));

        canvas.image_mut().put_pixel(1, 1, Rgba([255, 0, 0, 255]));
        canvas.set_size(8, 6);
        assert_eq!((canvas.width(), canvas.height()), (8, 6));
        assert_eq!(canvas.image().get_pixel(1, 1), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_compose_overlays_opaque_pixels() {
        let frame = VideoFrame::new(RgbImage::from_pixel(2, 2, Rgb([10, 20, 30])));
        let mut canvas = Canvas::new();
        canvas.set_size(2, 2);
        canvas.image_mut().put_pixel(0, 0, Rgba([255, 255, 255, 255]));

        let composed = compose(&frame, &canvas);
        assert_eq!(composed.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
        assert_eq!(composed.get_pixel(1, 1), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_save_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.png");
        let frame = VideoFrame::new(RgbImage::new(3, 2));
        let mut canvas = Canvas::new();
        canvas.set_size(3, 2);

        save_snapshot(&frame, &canvas, &path).unwrap();
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (3, 2));
    }
}
