//! Network address of a TCP/IP-connected device.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Port `adbd` listens on in TCP/IP mode.
pub const DEFAULT_DEVICE_PORT: u16 = 5555;

/// `host:port` of a device reachable over the network.
///
/// Its string form doubles as the serial used for transport selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
}

impl DeviceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Serial the ADB server knows this device by.
    pub fn serial(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for DeviceAddress {
    type Err = String;

    /// Parse `host:port`; a bare host gets the default port 5555.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty device address".to_string());
        }

        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(format!("missing host in {:?}", s));
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port in {:?}", s))?;
                Ok(Self::new(host, port))
            }
            None => Ok(Self::new(s, DEFAULT_DEVICE_PORT)),
        }
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let address: DeviceAddress = "192.168.3.69:5555".parse().unwrap();
        assert_eq!(address, DeviceAddress::new("192.168.3.69", 5555));
        assert_eq!(address.serial(), "192.168.3.69:5555");
    }

    #[test]
    fn test_parse_bare_host() {
        let address: DeviceAddress = "10.0.0.7".parse().unwrap();
        assert_eq!(address.port, DEFAULT_DEVICE_PORT);
    }

    #[test]
    fn test_parse_invalid() {
        assert!("".parse::<DeviceAddress>().is_err());
        assert!(":5555".parse::<DeviceAddress>().is_err());
        assert!("host:99999".parse::<DeviceAddress>().is_err());
        assert!("host:abc".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let address: DeviceAddress = serde_json::from_str("\"127.0.0.1:16384\"").unwrap();
        assert_eq!(address.port, 16384);
        assert_eq!(serde_json::to_string(&address).unwrap(), "\"127.0.0.1:16384\"");
    }
}
