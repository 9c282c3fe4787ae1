//! Native ADB client speaking the smart-socket protocol to the ADB server.
//!
//! Every operation opens a fresh TCP connection to the server, performs one
//! exchange and closes it. Transport faults never escape the public
//! operations: they are logged and reported as `false`, an empty string or
//! `None`.

use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::protocol::{self, AdbError};
use super::status::{parse_device_list, DeviceStatus};

/// Default ADB server host.
pub const DEFAULT_ADB_HOST: &str = "127.0.0.1";

/// Default ADB server port.
pub const DEFAULT_ADB_PORT: u16 = 5037;

const IMAGE_EXTENSIONS: [&str; 3] = [".png", ".jpg", ".jpeg"];

/// Client for an ADB server reachable over TCP.
///
/// # Example
/// ```rust,no_run
/// use droid_autobot::adb::AdbClient;
///
/// # async fn demo() {
/// let client = AdbClient::new("/tmp/adb");
/// if client.connect("192.168.3.69", 5555).await {
///     let model = client.shell("192.168.3.69:5555", "getprop ro.product.model").await;
///     println!("{}", model.trim());
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AdbClient {
    host: String,
    port: u16,
    work_dir: PathBuf,
}

impl AdbClient {
    /// Create a client for the default server at `127.0.0.1:5037`.
    ///
    /// Screenshots and pulled files are written under `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self::with_server(DEFAULT_ADB_HOST, DEFAULT_ADB_PORT, work_dir)
    }

    /// Create a client for a server at a custom address.
    pub fn with_server(host: impl Into<String>, port: u16, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port,
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Ask the server to connect to a device over TCP/IP.
    ///
    /// Reconnecting to an already connected device also succeeds.
    pub async fn connect(&self, ip: &str, port: u16) -> bool {
        let command = format!("host:connect:{}:{}", ip, port);
        match self.host_command(&command).await {
            Ok(reply) if reply.contains("connected") => {
                tracing::info!("ADB connect {}:{}: {}", ip, port, reply.trim());
                true
            }
            Ok(reply) => {
                tracing::warn!("ADB connect {}:{} refused: {}", ip, port, reply.trim());
                false
            }
            Err(e) => {
                tracing::warn!("ADB connect {}:{} failed: {}", ip, port, e);
                false
            }
        }
    }

    /// Ask the server to drop a TCP/IP device.
    pub async fn disconnect(&self, ip: &str, port: u16) -> bool {
        let command = format!("host:disconnect:{}:{}", ip, port);
        match self.host_command(&command).await {
            Ok(reply) if reply.contains("disconnected") => {
                tracing::info!("ADB disconnect {}:{}: {}", ip, port, reply.trim());
                true
            }
            Ok(reply) => {
                tracing::warn!("ADB disconnect {}:{} refused: {}", ip, port, reply.trim());
                false
            }
            Err(e) => {
                tracing::warn!("ADB disconnect {}:{} failed: {}", ip, port, e);
                false
            }
        }
    }

    /// List devices known to the server with their connection state.
    pub async fn list_devices(&self) -> Vec<(String, DeviceStatus)> {
        match self.host_command("host:devices").await {
            Ok(body) => parse_device_list(&body),
            Err(e) => {
                tracing::warn!("ADB device listing failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Run a shell command on a device and return its output.
    ///
    /// Returns an empty string if the server or device rejects the request.
    pub async fn shell(&self, serial: &str, command: &str) -> String {
        let output = self.shell_raw(serial, command).await;
        String::from_utf8_lossy(&output).into_owned()
    }

    /// Like [`shell`](Self::shell) but reports transport failures.
    pub async fn try_shell(&self, serial: &str, command: &str) -> Result<String, AdbError> {
        let output = self
            .device_command(serial, &format!("shell:{}", command))
            .await?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Run a shell command and split its output into non-empty lines.
    pub async fn shell_lines(&self, serial: &str, command: &str) -> Vec<String> {
        split_output_lines(&self.shell(serial, command).await)
    }

    /// Capture the device screen as PNG and save it under the work directory.
    ///
    /// `exec-out:screencap -p` is tried first because it is binary clean;
    /// `shell:screencap -p` is the fallback. `name` may omit the extension,
    /// and a timestamped name is used when it is `None` or empty.
    ///
    /// Returns the saved path, or `None` if no image data arrived or the file
    /// could not be written.
    pub async fn capture_screenshot(&self, serial: &str, name: Option<&str>) -> Option<PathBuf> {
        let mut png = match self.device_command(serial, "exec-out:screencap -p").await {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!("exec-out screencap on {} failed: {}", serial, e);
                Vec::new()
            }
        };

        if png.is_empty() {
            tracing::debug!("Falling back to shell screencap on {}", serial);
            png = self.shell_raw(serial, "screencap -p").await;
        }

        if png.is_empty() {
            tracing::error!("Screenshot on {} returned no data", serial);
            return None;
        }

        let path = self.work_dir.join(screenshot_file_name(name));
        match self.write_output(&path, &png).await {
            Ok(()) => {
                tracing::debug!("Saved {} byte screenshot to {}", png.len(), path.display());
                Some(path)
            }
            Err(e) => {
                tracing::error!("Failed to save screenshot to {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Copy a device file to the host by streaming it through `cat`.
    ///
    /// Relative `local` paths are resolved under the work directory. This is
    /// not the sync protocol: output passes through the device shell, so
    /// binary files are not guaranteed to survive intact.
    pub async fn pull(&self, serial: &str, remote: &str, local: impl AsRef<Path>) -> bool {
        let content = self.shell_raw(serial, &format!("cat {}", remote)).await;
        if content.is_empty() {
            tracing::warn!("Pull of {} from {} returned no data", remote, serial);
            return false;
        }

        let path = self.resolve_local(local.as_ref());
        match self.write_output(&path, &content).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to write pulled file {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Copy a host file to the device by writing it into `cat > <remote>`.
    ///
    /// The device sends no acknowledgement; success only means every byte was
    /// handed to the socket.
    pub async fn push(&self, serial: &str, local: impl AsRef<Path>, remote: &str) -> bool {
        let local = local.as_ref();
        let content = match tokio::fs::read(local).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!("Failed to read {} for push: {}", local.display(), e);
                return false;
            }
        };

        let result: Result<(), AdbError> = async {
            let mut stream = self
                .open_service(serial, &format!("shell:cat > {}", remote))
                .await?;
            stream.write_all(&content).await?;
            stream.shutdown().await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Push of {} to {}:{} failed: {}", local.display(), serial, remote, e);
                false
            }
        }
    }

    async fn shell_raw(&self, serial: &str, command: &str) -> Vec<u8> {
        match self.device_command(serial, &format!("shell:{}", command)).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("Shell {:?} on {} failed: {}", command, serial, e);
                Vec::new()
            }
        }
    }

    async fn open(&self) -> Result<TcpStream, AdbError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        Ok(stream)
    }

    /// Send a `host:` command and read its length-prefixed reply.
    async fn host_command(&self, command: &str) -> Result<String, AdbError> {
        let mut stream = self.open().await?;
        protocol::send_request(&mut stream, command).await?;
        protocol::read_status(&mut stream).await?;
        let body = protocol::read_length_prefixed(&mut stream).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Select the device transport and open a service on the same socket.
    async fn open_service(&self, serial: &str, service: &str) -> Result<TcpStream, AdbError> {
        let mut stream = self.open().await?;

        protocol::send_request(&mut stream, &format!("host:transport:{}", serial)).await?;
        protocol::read_status(&mut stream).await?;

        protocol::send_request(&mut stream, service).await?;
        protocol::read_status(&mut stream).await?;

        Ok(stream)
    }

    /// Run a device service and collect its raw output until EOF.
    async fn device_command(&self, serial: &str, service: &str) -> Result<Vec<u8>, AdbError> {
        let mut stream = self.open_service(serial, service).await?;
        protocol::read_until_eof(&mut stream).await
    }

    fn resolve_local(&self, local: &Path) -> PathBuf {
        if local.is_absolute() {
            local.to_path_buf()
        } else {
            self.work_dir.join(local)
        }
    }

    async fn write_output(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await
    }
}

/// Split shell output into lines, stripping `\r` and dropping blank lines.
pub fn split_output_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalize a screenshot file name.
///
/// Empty or missing names become `screenshot_<timestamp>.png`; names without
/// an image extension get `.png` appended.
pub fn screenshot_file_name(name: Option<&str>) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => {
            let lower = name.to_ascii_lowercase();
            if IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
                name.to_string()
            } else {
                format!("{}.png", name)
            }
        }
        None => format!(
            "screenshot_{}.png",
            Local::now().format("%Y%m%d_%H%M%S_%3f")
        ),
    }
}
