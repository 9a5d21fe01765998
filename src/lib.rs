//! Generate pciback config-space quirk descriptors from a JSON quirk list.
//!
//! Xen's pciback driver exposes a `quirks` file that tells it which
//! config-space registers of a passed-through device guests may access beyond
//! the whitelisted defaults. This crate loads a JSON description of known
//! device quirks, matches it against the devices currently bound to pciback
//! (via the driver's `slots` file and sysfs identity attributes), and writes
//! one descriptor line per matching field.

pub mod device;
pub mod quirks;
pub mod sysfs;

use std::io::Write;

use anyhow::{Context, Result};

pub use crate::device::{descriptor_line, matching_fields, DeviceAddress, DeviceIdentity};
pub use crate::quirks::{load_quirks, Field, Quirk, QuirkLoadReport};
pub use crate::sysfs::{read_bound_devices, SysfsPci};

/// Result of one full device sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub lines_written: usize,
    /// Devices skipped because their identity could not be read.
    pub skipped: Vec<String>,
}

/// Match every device against `quirks` and append the resulting descriptor
/// lines to `out`, in device order then quirk/field document order.
///
/// The sweep is best-effort: a device whose identity lookup fails is skipped
/// and reported, and the remaining devices are still processed. Only a
/// failing sink write is fatal.
pub fn write_descriptors<W, F>(
    out: &mut W,
    quirks: &[Quirk],
    devices: &[DeviceAddress],
    mut lookup: F,
) -> Result<SweepReport>
where
    W: Write,
    F: FnMut(&DeviceAddress) -> Result<DeviceIdentity>,
{
    let mut lines_written = 0;
    let mut skipped = Vec::new();

    for addr in devices {
        let identity = match lookup(addr) {
            Ok(identity) => identity,
            Err(err) => {
                skipped.push(format!("device {addr}: {err:#}"));
                continue;
            }
        };

        for field in matching_fields(&identity, quirks) {
            out.write_all(descriptor_line(addr, field).as_bytes())
                .with_context(|| format!("write descriptor for device {addr}"))?;
            lines_written += 1;
        }
    }

    Ok(SweepReport {
        lines_written,
        skipped,
    })
}
