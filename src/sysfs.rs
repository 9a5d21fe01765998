//! External inputs: the pciback slots file and per-device sysfs attributes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::device::{DeviceAddress, DeviceIdentity};

/// Devices currently bound to pciback, one address per line.
pub const DEFAULT_SLOTS_FILE: &str = "/sys/bus/pci/drivers/pciback/slots";
/// Descriptor sink consumed by pciback.
pub const DEFAULT_QUIRKS_FILE: &str = "/sys/bus/pci/drivers/pciback/quirks";
/// Directory of per-device attribute directories.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/bus/pci/devices";

/// Scan the pciback slots file for bound device addresses.
///
/// Lines that are not well-formed `XXXX:XX:XX.X` addresses are silently
/// ignored. An unreadable slots file is an error; callers treat it as the
/// non-fatal "no devices" case.
pub fn read_bound_devices(slots_path: &Path) -> Result<Vec<DeviceAddress>> {
    let text = fs::read_to_string(slots_path)
        .with_context(|| format!("read slots file {}", slots_path.display()))?;

    Ok(text
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect())
}

/// Identity lookup backed by the per-device sysfs attribute files
/// (`vendor`, `device`, `subsystem_vendor`, `subsystem_device`).
#[derive(Debug, Clone)]
pub struct SysfsPci {
    root: PathBuf,
}

impl Default for SysfsPci {
    fn default() -> Self {
        SysfsPci::new(DEFAULT_SYSFS_ROOT)
    }
}

impl SysfsPci {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SysfsPci { root: root.into() }
    }

    /// Read the four identity registers for the device at `addr`. A missing
    /// device directory or malformed attribute fails the lookup; the device
    /// sweep skips such devices and keeps going.
    pub fn identity(&self, addr: &DeviceAddress) -> Result<DeviceIdentity> {
        let dir = self.root.join(addr.to_string());
        Ok(DeviceIdentity {
            vendor_id: read_hex_attr(&dir, "vendor")?,
            device_id: read_hex_attr(&dir, "device")?,
            subsystem_vendor_id: read_hex_attr(&dir, "subsystem_vendor")?,
            subsystem_device_id: read_hex_attr(&dir, "subsystem_device")?,
        })
    }
}

/// Sysfs id attributes hold a single `0x`-prefixed hex value per file.
fn read_hex_attr(dir: &Path, attr: &str) -> Result<u16> {
    let path = dir.join(attr);
    let value = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let value = value.trim().trim_start_matches("0x");
    u16::from_str_radix(value, 16).with_context(|| format!("parse hex value in {}", path.display()))
}
