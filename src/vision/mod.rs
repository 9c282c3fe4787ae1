//! Vision collaborators used by vision-gated steps.
//!
//! Text detection/recognition is an external engine plugged in through
//! [`TextRecognizer`]. Template search goes through [`TemplateLocator`], with
//! [`NccTemplateLocator`] as the built-in implementation.

mod template;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use template::NccTemplateLocator;

/// Vision errors.
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Failed to load image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Recognition engine error: {0}")]
    Engine(String),
    #[error("No text recognizer configured")]
    NoRecognizer,
    #[error("No screenshot has been captured yet")]
    NoScreenshot,
    #[error("Region {0:?} lies outside the {1}x{2} image")]
    RegionOutOfBounds(Rect, u32, u32),
}

/// A point in screenshot pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The rectangle as unsigned crop bounds, if it lies entirely inside
    /// an image of the given size and is not empty.
    pub fn within(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if self.x < 0 || self.y < 0 || self.width <= 0 || self.height <= 0 {
            return None;
        }
        let right = self.x as i64 + self.width as i64;
        let bottom = self.y as i64 + self.height as i64;
        if right > width as i64 || bottom > height as i64 {
            return None;
        }
        Some((
            self.x as u32,
            self.y as u32,
            self.width as u32,
            self.height as u32,
        ))
    }
}

/// One detected text box with its recognized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    /// Corner points of the (possibly rotated) box.
    pub corners: [Point; 4],
    pub text: String,
}

impl TextRegion {
    pub fn new(corners: [Point; 4], text: impl Into<String>) -> Self {
        Self {
            corners,
            text: text.into(),
        }
    }

    /// Box from an axis-aligned rectangle, corners clockwise from top-left.
    pub fn from_rect(rect: Rect, text: impl Into<String>) -> Self {
        let (x0, y0) = (rect.x as f32, rect.y as f32);
        let (x1, y1) = ((rect.x + rect.width) as f32, (rect.y + rect.height) as f32);
        Self::new(
            [
                Point::new(x0, y0),
                Point::new(x1, y0),
                Point::new(x1, y1),
                Point::new(x0, y1),
            ],
            text,
        )
    }

    /// Centroid of the four corner points, truncated to pixels.
    pub fn center(&self) -> (i32, i32) {
        let (sx, sy) = self
            .corners
            .iter()
            .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x, sy + p.y));
        let n = self.corners.len() as f32;
        ((sx / n) as i32, (sy / n) as i32)
    }
}

/// Best location of a template inside a screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplateMatch {
    /// Top-left corner of the matched window.
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Similarity score, 1.0 for a perfect match.
    pub score: f32,
}

impl TemplateMatch {
    pub fn center(&self) -> (i32, i32) {
        (
            (self.x + self.width / 2) as i32,
            (self.y + self.height / 2) as i32,
        )
    }
}

/// Detects text regions in an image and recognizes their text.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextRegion>, VisionError>;
}

/// Finds the best placement of a template image inside a larger image.
pub trait TemplateLocator: Send + Sync {
    /// Returns `None` when the template cannot fit inside `screen`.
    fn locate(
        &self,
        screen: &DynamicImage,
        template: &DynamicImage,
    ) -> Result<Option<TemplateMatch>, VisionError>;
}

/// Placeholder recognizer for setups without an OCR engine.
///
/// Every call fails, so OCR steps fail instead of passing vacuously.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTextRecognizer;

impl TextRecognizer for NoTextRecognizer {
    fn recognize(&self, _image: &DynamicImage) -> Result<Vec<TextRegion>, VisionError> {
        Err(VisionError::NoRecognizer)
    }
}
