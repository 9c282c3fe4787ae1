//! [`DeviceControl`] backed by the native ADB client and vision collaborators.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use image::DynamicImage;
use parking_lot::Mutex;
use regex::Regex;

use super::DeviceControl;
use crate::adb::{screenshot_file_name, AdbClient, DeviceAddress};
use crate::settings::{Settings, SettingsError};
use crate::task::Roi;
use crate::vision::{
    NccTemplateLocator, NoTextRecognizer, TemplateLocator, TemplateMatch, TextRecognizer,
    TextRegion, VisionError,
};

/// Drives one TCP/IP device through the ADB server.
pub struct AdbController {
    client: AdbClient,
    device: DeviceAddress,
    recognizer: Arc<dyn TextRecognizer>,
    locator: Arc<dyn TemplateLocator>,
    template_dir: PathBuf,
    last_screenshot: Mutex<Option<PathBuf>>,
}

impl AdbController {
    /// Create a controller without an OCR engine, using the built-in
    /// template matcher.
    pub fn new(client: AdbClient, device: DeviceAddress) -> Self {
        Self {
            client,
            device,
            recognizer: Arc::new(NoTextRecognizer),
            locator: Arc::new(NccTemplateLocator),
            template_dir: PathBuf::from("."),
            last_screenshot: Mutex::new(None),
        }
    }

    /// Build a controller from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let client = AdbClient::with_server(
            settings.adb_host.clone(),
            settings.adb_port,
            settings.work_dir.clone(),
        );
        Ok(Self::new(client, settings.device()?).with_template_dir(settings.template_dir.clone()))
    }

    /// Set the OCR engine.
    pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = recognizer;
        self
    }

    /// Set the template matcher.
    pub fn with_template_locator(mut self, locator: Arc<dyn TemplateLocator>) -> Self {
        self.locator = locator;
        self
    }

    /// Set the base directory for relative template paths.
    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = dir.into();
        self
    }

    pub fn client(&self) -> &AdbClient {
        &self.client
    }

    pub fn device(&self) -> &DeviceAddress {
        &self.device
    }

    /// Connect the ADB server to the device.
    pub async fn connect(&self) -> bool {
        self.client.connect(&self.device.host, self.device.port).await
    }

    /// Disconnect the ADB server from the device.
    pub async fn disconnect(&self) -> bool {
        self.client
            .disconnect(&self.device.host, self.device.port)
            .await
    }

    /// Path of the most recently captured screenshot.
    pub fn last_screenshot(&self) -> Option<PathBuf> {
        self.last_screenshot.lock().clone()
    }

    async fn input(&self, command: &str) -> bool {
        match self.client.try_shell(&self.device.serial(), command).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Input {:?} on {} failed: {}", command, self.device, e);
                false
            }
        }
    }

    fn resolve_image(&self, image_name: &str) -> Result<PathBuf, VisionError> {
        if image_name.trim().is_empty() {
            return self.last_screenshot().ok_or(VisionError::NoScreenshot);
        }
        Ok(self
            .client
            .work_dir()
            .join(screenshot_file_name(Some(image_name))))
    }

    fn resolve_template(&self, template_path: &str) -> PathBuf {
        let path = Path::new(template_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.template_dir.join(path)
        }
    }

    async fn recognize(&self, image: DynamicImage) -> Result<Vec<TextRegion>, VisionError> {
        let recognizer = self.recognizer.clone();
        tokio::task::spawn_blocking(move || recognizer.recognize(&image))
            .await
            .map_err(|e| VisionError::Engine(e.to_string()))?
    }
}

async fn load_image(path: PathBuf) -> Result<DynamicImage, VisionError> {
    tokio::task::spawn_blocking(move || image::open(&path))
        .await
        .map_err(|e| VisionError::Engine(e.to_string()))?
        .map_err(VisionError::from)
}

/// Keep the first match of `pattern` in `text`, or nothing.
fn filter_text(text: &str, pattern: &str) -> Result<String, VisionError> {
    let re = Regex::new(pattern).map_err(|e| VisionError::Engine(e.to_string()))?;
    Ok(re
        .find(text)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default())
}

/// Save a cropped region under `<work_dir>/debug_roi/`.
async fn save_debug_crop(work_dir: &Path, source: &Path, crop: DynamicImage) {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "screen".to_string());
    let path = work_dir.join("debug_roi").join(format!(
        "{}_{}_roi.png",
        stem,
        Local::now().format("%Y%m%d_%H%M%S_%3f")
    ));

    let target = path.clone();
    let saved = tokio::task::spawn_blocking(move || -> Result<(), String> {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        crop.save(&target).map_err(|e| e.to_string())
    })
    .await;

    match saved {
        Ok(Ok(())) => tracing::debug!("Saved ROI crop to {}", path.display()),
        Ok(Err(e)) => tracing::warn!("Failed to save ROI crop {}: {}", path.display(), e),
        Err(e) => tracing::warn!("ROI crop save task failed: {}", e),
    }
}

#[async_trait]
impl DeviceControl for AdbController {
    async fn click(&self, x: i32, y: i32) -> bool {
        self.input(&format!("input tap {} {}", x, y)).await
    }

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u64) -> bool {
        self.input(&format!(
            "input swipe {} {} {} {} {}",
            x1, y1, x2, y2, duration_ms
        ))
        .await
    }

    async fn wait(&self, ms: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }

    async fn capture_screenshot(&self, name: &str) -> Option<PathBuf> {
        let path = self
            .client
            .capture_screenshot(&self.device.serial(), Some(name))
            .await?;
        *self.last_screenshot.lock() = Some(path.clone());
        Some(path)
    }

    async fn recognize_text(&self, image_name: &str) -> Result<Vec<TextRegion>, VisionError> {
        let image = load_image(self.resolve_image(image_name)?).await?;
        self.recognize(image).await
    }

    async fn recognize_region(&self, image_name: &str, roi: &Roi) -> Result<String, VisionError> {
        let source = self.resolve_image(image_name)?;
        let screen = load_image(source.clone()).await?;
        let (width, height) = (screen.width(), screen.height());
        let rect = roi.scaled(width, height);
        let (x, y, w, h) = rect
            .within(width, height)
            .ok_or(VisionError::RegionOutOfBounds(rect, width, height))?;

        tracing::debug!("OCR region {:?} of {}x{} screenshot", rect, width, height);
        let crop = screen.crop_imm(x, y, w, h);
        if roi.debug_save {
            save_debug_crop(self.client.work_dir(), &source, crop.clone()).await;
        }
        let regions = self.recognize(crop).await?;
        let text: String = regions.iter().map(|r| r.text.as_str()).collect();

        match &roi.filter_pattern {
            Some(pattern) if !pattern.is_empty() => filter_text(&text, pattern),
            _ => Ok(text),
        }
    }

    async fn find_template(
        &self,
        image_name: &str,
        template_path: &str,
    ) -> Result<Option<TemplateMatch>, VisionError> {
        let screen = load_image(self.resolve_image(image_name)?).await?;
        let template = load_image(self.resolve_template(template_path)).await?;
        let locator = self.locator.clone();

        tokio::task::spawn_blocking(move || locator.locate(&screen, &template))
            .await
            .map_err(|e| VisionError::Engine(e.to_string()))?
    }

    async fn shell(&self, command: &str) -> String {
        self.client.shell(&self.device.serial(), command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, RgbImage};
    use std::io::Cursor;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Records the size of every image it sees and returns fixed regions.
    struct FixedRecognizer {
        regions: Vec<TextRegion>,
        seen: parking_lot::Mutex<Vec<(u32, u32)>>,
    }

    impl FixedRecognizer {
        fn new(texts: &[&str]) -> Arc<Self> {
            let regions = texts
                .iter()
                .map(|t| TextRegion::from_rect(crate::vision::Rect::new(0, 0, 10, 10), *t))
                .collect();
            Arc::new(Self {
                regions,
                seen: parking_lot::Mutex::new(Vec::new()),
            })
        }
    }

    impl TextRecognizer for FixedRecognizer {
        fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextRegion>, VisionError> {
            self.seen.lock().push((image.width(), image.height()));
            Ok(self.regions.clone())
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn unreachable_controller(work_dir: &Path) -> AdbController {
        // port 1 on loopback is never an ADB server
        let client = AdbClient::with_server("127.0.0.1", 1, work_dir);
        AdbController::new(client, DeviceAddress::new("10.0.0.9", 5555))
    }

    /// ADB server that accepts any transport and streams `payload` for every service.
    async fn streaming_server(payload: Vec<u8>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let payload = payload.clone();
                tokio::spawn(async move {
                    for _ in 0..2 {
                        let mut header = [0u8; 4];
                        stream.read_exact(&mut header).await.unwrap();
                        let len = usize::from_str_radix(std::str::from_utf8(&header).unwrap(), 16).unwrap();
                        let mut request = vec![0u8; len];
                        stream.read_exact(&mut request).await.unwrap();
                        stream.write_all(b"OKAY").await.unwrap();
                    }
                    stream.write_all(&payload).await.unwrap();
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_capture_then_recognize_latest() {
        let port = streaming_server(png_bytes(8, 6)).await;
        let dir = tempfile::tempdir().unwrap();
        let recognizer = FixedRecognizer::new(&["理智"]);
        let controller = AdbController::new(
            AdbClient::with_server("127.0.0.1", port, dir.path()),
            DeviceAddress::new("10.0.0.9", 5555),
        )
        .with_recognizer(recognizer.clone());

        let path = controller.capture_screenshot("main").await.unwrap();
        assert_eq!(path, dir.path().join("main.png"));
        assert_eq!(controller.last_screenshot(), Some(path));

        let regions = controller.recognize_text("").await.unwrap();
        assert_eq!(regions[0].text, "理智");
        assert_eq!(recognizer.seen.lock().as_slice(), &[(8, 6)]);
    }

    #[tokio::test]
    async fn test_recognize_without_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        let controller = unreachable_controller(dir.path());
        assert!(matches!(
            controller.recognize_text("").await,
            Err(VisionError::NoScreenshot)
        ));
    }

    #[tokio::test]
    async fn test_recognize_region_scales_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("screen.png"), png_bytes(2560, 1440)).unwrap();
        let recognizer = FixedRecognizer::new(&["理智 98", "/135"]);
        let controller = unreachable_controller(dir.path()).with_recognizer(recognizer.clone());

        let roi = Roi::new(800, 145, 100, 50).with_filter("[0-9]+");
        let text = controller.recognize_region("screen", &roi).await.unwrap();

        assert_eq!(text, "98");
        assert_eq!(recognizer.seen.lock().as_slice(), &[(200, 100)]);
    }

    #[tokio::test]
    async fn test_recognize_region_partly_outside_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("screen.png"), png_bytes(1280, 720)).unwrap();
        let recognizer = FixedRecognizer::new(&["x"]);
        let controller = unreachable_controller(dir.path()).with_recognizer(recognizer.clone());

        let roi = Roi::new(1250, 700, 100, 50);
        assert!(matches!(
            controller.recognize_region("screen", &roi).await,
            Err(VisionError::RegionOutOfBounds(..))
        ));
        assert!(recognizer.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_recognize_region_saves_debug_crop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("screen.png"), png_bytes(1280, 720)).unwrap();
        let controller =
            unreachable_controller(dir.path()).with_recognizer(FixedRecognizer::new(&["42"]));

        let mut roi = Roi::new(10, 10, 64, 32);
        roi.debug_save = true;
        assert_eq!(controller.recognize_region("screen", &roi).await.unwrap(), "42");

        let saved: Vec<_> = std::fs::read_dir(dir.path().join("debug_roi"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(saved.len(), 1);
        let crop = image::open(&saved[0]).unwrap();
        assert_eq!((crop.width(), crop.height()), (64, 32));
    }

    #[tokio::test]
    async fn test_recognize_region_outside_image() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("small.png"), png_bytes(64, 36)).unwrap();
        let controller =
            unreachable_controller(dir.path()).with_recognizer(FixedRecognizer::new(&["x"]));

        let roi = Roi::new(1300, 0, 100, 50);
        assert!(matches!(
            controller.recognize_region("small.png", &roi).await,
            Err(VisionError::RegionOutOfBounds(..))
        ));
    }

    #[tokio::test]
    async fn test_find_template_relative_to_template_dir() {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("templates");
        std::fs::create_dir_all(&templates).unwrap();

        let mut state = 99u32;
        let screen = GrayImage::from_fn(90, 60, |_, _| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            Luma([(state >> 16) as u8])
        });
        let button = image::imageops::crop_imm(&screen, 30, 20, 12, 8).to_image();
        screen.save(dir.path().join("battle.png")).unwrap();
        button.save(templates.join("button.png")).unwrap();

        let controller = unreachable_controller(dir.path()).with_template_dir(dir.path());
        let found = controller
            .find_template("battle.png", "templates/button.png")
            .await
            .unwrap()
            .unwrap();

        assert_eq!((found.x, found.y), (30, 20));
        assert!(found.score > 0.99);
    }

    #[tokio::test]
    async fn test_input_fails_when_server_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let controller = unreachable_controller(dir.path());

        assert!(!controller.click(10, 10).await);
        assert!(!controller.swipe(0, 0, 10, 10, 200).await);
        assert_eq!(controller.shell("echo hi").await, "");
        assert!(controller.capture_screenshot("x").await.is_none());
    }

    #[test]
    fn test_filter_text() {
        assert_eq!(filter_text("理智 98/135", "[0-9]+").unwrap(), "98");
        assert_eq!(filter_text("none", "[0-9]+").unwrap(), "");
    }
}
