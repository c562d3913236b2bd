// Plume - Gas and distance telemetry publisher
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use std::error::Error;
use std::fmt::{self, Formatter};
use std::path::PathBuf;
use std::time::Duration;
use std::{fs, io, thread};

const SYSFS_NET: &str = "/sys/class/net";
const UNSET_ADDRESS: &str = "00:00:00:00:00:00";

/// Stable identifier for this device, used as the top level key for everything
/// written to the store. Usually the MAC address of the network interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DeviceIdentity {
    fn from(v: String) -> Self {
        Self(v)
    }
}

impl From<&str> for DeviceIdentity {
    fn from(v: &str) -> Self {
        Self(v.to_owned())
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error determining the state or address of a network interface
#[derive(Debug)]
pub enum NetworkError {
    Io(&'static str, io::Error),
    InvalidAddress(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::Io(msg, ref e) => write!(f, "{}: {}", msg, e),
            NetworkError::InvalidAddress(addr) => write!(f, "invalid hardware address '{}'", addr),
        }
    }
}

impl Error for NetworkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NetworkError::Io(_, ref e) => Some(e),
            _ => None,
        }
    }
}

/// Connectivity of the device. Associating with a wireless network and reconnecting
/// is left to the operating system, this only reports on the result.
pub trait Network {
    fn is_connected(&self) -> bool;
    fn hardware_address(&self) -> Result<DeviceIdentity, NetworkError>;
}

/// Network interface state read from sysfs.
#[derive(Debug, Clone)]
pub struct SysfsNetwork {
    root: PathBuf,
    interface: String,
}

impl SysfsNetwork {
    pub fn new(interface: &str) -> Self {
        Self::with_root(SYSFS_NET, interface)
    }

    pub(crate) fn with_root<P: Into<PathBuf>>(root: P, interface: &str) -> Self {
        Self {
            root: root.into(),
            interface: interface.to_owned(),
        }
    }

    fn attribute(&self, name: &str) -> io::Result<String> {
        let path = self.root.join(&self.interface).join(name);
        fs::read_to_string(path).map(|s| s.trim().to_owned())
    }
}

impl Network for SysfsNetwork {
    fn is_connected(&self) -> bool {
        match self.attribute("operstate") {
            Ok(state) => state == "up",
            Err(e) => {
                tracing::debug!(message = "unable to read interface state", interface = %self.interface, error = %e);
                false
            }
        }
    }

    fn hardware_address(&self) -> Result<DeviceIdentity, NetworkError> {
        let address = self
            .attribute("address")
            .map_err(|e| NetworkError::Io("unable to read interface address", e))?
            .to_uppercase();

        if address.is_empty() || address == UNSET_ADDRESS {
            return Err(NetworkError::InvalidAddress(address));
        }

        Ok(DeviceIdentity(address))
    }
}

/// Block until the network reports being connected, checking every `interval`.
pub fn wait_for_connection(network: &dyn Network, interval: Duration) {
    let mut attempts = 0u64;

    while !network.is_connected() {
        attempts += 1;
        tracing::info!(message = "waiting for network connection", attempts = attempts);
        thread::sleep(interval);
    }

    tracing::info!(message = "network connected", attempts = attempts);
}

#[cfg(test)]
mod test {
    use super::{wait_for_connection, DeviceIdentity, Network, NetworkError, SysfsNetwork};
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    fn sysfs_fixture(name: &str, operstate: &str, address: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("plume-{}-{}", name, std::process::id()));
        let iface = root.join("wlan0");
        fs::create_dir_all(&iface).unwrap();
        fs::write(iface.join("operstate"), format!("{}\n", operstate)).unwrap();
        fs::write(iface.join("address"), format!("{}\n", address)).unwrap();
        root
    }

    #[test]
    fn test_connected() {
        let root = sysfs_fixture("connected", "up", "aa:bb:cc:dd:ee:ff");
        let network = SysfsNetwork::with_root(root.clone(), "wlan0");

        assert!(network.is_connected());
        assert_eq!(DeviceIdentity::from("AA:BB:CC:DD:EE:FF"), network.hardware_address().unwrap());

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_not_connected() {
        let root = sysfs_fixture("dormant", "dormant", "aa:bb:cc:dd:ee:ff");
        let network = SysfsNetwork::with_root(root.clone(), "wlan0");

        assert!(!network.is_connected());
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_missing_interface() {
        let root = sysfs_fixture("missing", "up", "aa:bb:cc:dd:ee:ff");
        let network = SysfsNetwork::with_root(root.clone(), "eth9");

        assert!(!network.is_connected());
        assert!(matches!(network.hardware_address(), Err(NetworkError::Io(_, _))));

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_unset_address() {
        let root = sysfs_fixture("unset", "up", "00:00:00:00:00:00");
        let network = SysfsNetwork::with_root(root.clone(), "wlan0");

        assert!(matches!(network.hardware_address(), Err(NetworkError::InvalidAddress(_))));
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_wait_for_connection_returns_when_up() {
        let root = sysfs_fixture("wait", "up", "aa:bb:cc:dd:ee:ff");
        let network = SysfsNetwork::with_root(root.clone(), "wlan0");

        wait_for_connection(&network, Duration::from_millis(1));
        fs::remove_dir_all(root).unwrap();
    }
}
