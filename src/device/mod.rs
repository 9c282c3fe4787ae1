//! Device-control facade used by the task executor.
//!
//! [`DeviceControl`] bundles the input, screenshot, recognition and shell
//! primitives a script step needs. [`AdbController`] implements it on top of
//! [`AdbClient`](crate::adb::AdbClient) and the vision collaborators.

mod controller;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::task::Roi;
use crate::vision::{TemplateMatch, TextRegion, VisionError};

pub use controller::AdbController;

/// Operations a script step can perform on a device.
///
/// Image arguments name a screenshot in the work directory; an empty name
/// refers to the most recent screenshot.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Tap a point. `false` only when the device cannot be reached.
    async fn click(&self, x: i32, y: i32) -> bool;

    /// Swipe between two points over `duration_ms`.
    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u64) -> bool;

    /// Suspend the caller.
    async fn wait(&self, ms: u64);

    /// Capture the screen and return the saved file path.
    async fn capture_screenshot(&self, name: &str) -> Option<PathBuf>;

    /// Detect and recognize all text in a screenshot.
    async fn recognize_text(&self, image_name: &str) -> Result<Vec<TextRegion>, VisionError>;

    /// Recognize the text inside a region of a screenshot.
    ///
    /// The ROI is scaled to the screenshot resolution first; a scaled region
    /// that is not entirely inside the screenshot is an error.
    async fn recognize_region(&self, image_name: &str, roi: &Roi) -> Result<String, VisionError>;

    /// Find the best placement of a template image in a screenshot.
    async fn find_template(
        &self,
        image_name: &str,
        template_path: &str,
    ) -> Result<Option<TemplateMatch>, VisionError>;

    /// Run a raw shell command and return its output.
    async fn shell(&self, command: &str) -> String;
}
