//! Device connection states reported by the ADB server.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection state of a device as reported in the `host:devices` listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceStatus {
    Device,
    Offline,
    Unauthorized,
    NoPermissions,
    Bootloader,
    Recovery,
    Sideload,
    Authorizing,
}

impl DeviceStatus {
    /// Convert a status token from the device list into a [`DeviceStatus`].
    ///
    /// Matching is exact and case-sensitive. Unrecognized tokens map to
    /// [`DeviceStatus::Offline`]: a device we cannot classify is treated as
    /// unusable rather than ready.
    pub fn from_token(token: &str) -> Self {
        match token {
            "device" => Self::Device,
            "offline" => Self::Offline,
            "unauthorized" => Self::Unauthorized,
            "no permissions" => Self::NoPermissions,
            "bootloader" => Self::Bootloader,
            "recovery" => Self::Recovery,
            "sideload" => Self::Sideload,
            "authorizing" => Self::Authorizing,
            other => {
                tracing::debug!("Unrecognized device status token {:?}, treating as offline", other);
                Self::Offline
            }
        }
    }

    /// The token the ADB server uses for this status.
    pub fn as_token(&self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Offline => "offline",
            Self::Unauthorized => "unauthorized",
            Self::NoPermissions => "no permissions",
            Self::Bootloader => "bootloader",
            Self::Recovery => "recovery",
            Self::Sideload => "sideload",
            Self::Authorizing => "authorizing",
        }
    }

    /// Whether shell and input commands can be issued to the device.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Device)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Parse the body of a `host:devices` reply.
///
/// Each line is `<serial>\t<status>`. The status may itself contain a space
/// (`no permissions`), optionally followed by extra detail, so only the first
/// tab separates the columns. Lines without a tab fall back to whitespace
/// splitting.
pub fn parse_device_list(body: &str) -> Vec<(String, DeviceStatus)> {
    let mut devices = Vec::new();

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let (serial, rest) = match line.split_once('\t') {
            Some((serial, rest)) => (serial.trim(), rest.trim()),
            None => match line.trim().split_once(char::is_whitespace) {
                Some((serial, rest)) => (serial, rest.trim()),
                None => continue,
            },
        };

        let status = if rest.starts_with("no permissions") {
            DeviceStatus::NoPermissions
        } else {
            let token = rest.split_whitespace().next().unwrap_or_default();
            DeviceStatus::from_token(token)
        };

        devices.push((serial.to_string(), status));
    }

    devices
}
