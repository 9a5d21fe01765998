//! PCI device addressing, quirk matching, and descriptor formatting.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use anyhow::{bail, Result};

use crate::quirks::{Field, Quirk};

/// Location of a PCI function on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub domain: u16,
    pub bus: u8,
    pub dev: u8,
    pub func: u8,
}

impl FromStr for DeviceAddress {
    type Err = anyhow::Error;

    /// Parse the strict `XXXX:XX:XX.X` form (hex, zero-padded to 4/2/2/1
    /// digits). Unpadded or otherwise malformed addresses are rejected.
    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 12 || bytes[4] != b':' || bytes[7] != b':' || bytes[10] != b'.' {
            bail!("bad device address {s:?} (expected XXXX:XX:XX.X)");
        }
        Ok(DeviceAddress {
            domain: hex_part(s, 0..4)? as u16,
            bus: hex_part(s, 5..7)? as u8,
            dev: hex_part(s, 8..10)? as u8,
            func: hex_part(s, 11..12)? as u8,
        })
    }
}

fn hex_part(s: &str, range: Range<usize>) -> Result<u32> {
    let part = &s[range];
    if !part.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("bad device address {s:?} (expected XXXX:XX:XX.X)");
    }
    Ok(u32::from_str_radix(part, 16)?)
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.dev, self.func
        )
    }
}

/// Identity registers of one PCI function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub device_id: u16,
    pub subsystem_vendor_id: u16,
    pub subsystem_device_id: u16,
}

impl Quirk {
    /// Whether this quirk's identity filter applies to `identity`. Every
    /// position must either be the `ffff` wildcard or match exactly.
    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        self.vendor.matches(identity.vendor_id)
            && self.device.matches(identity.device_id)
            && self.subvendor.matches(identity.subsystem_vendor_id)
            && self.subdevice.matches(identity.subsystem_device_id)
    }
}

/// Every field to emit for one device, in quirk-then-field document order.
/// No matching quirks is not an error; the result is simply empty.
pub fn matching_fields<'a>(identity: &DeviceIdentity, quirks: &'a [Quirk]) -> Vec<&'a Field> {
    quirks
        .iter()
        .filter(|quirk| quirk.matches(identity))
        .flat_map(|quirk| quirk.fields.iter())
        .collect()
}

/// Render one pciback quirks line for `field` on the device at `addr`.
///
/// The format is fixed by the driver: lowercase zero-padded hex throughout,
/// except the size which is a plain decimal digit.
pub fn descriptor_line(addr: &DeviceAddress, field: &Field) -> String {
    format!(
        "{:04x}:{:02x}:{:02x}:{:01x}-{:08x}:{}:{:08x}\n",
        addr.domain,
        addr.bus,
        addr.dev,
        addr.func,
        field.register,
        field.size.bytes(),
        field.mask,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quirks::{FieldSize, IdMatch};

    fn quirk(vendor: IdMatch, device: IdMatch, fields: Vec<Field>) -> Quirk {
        Quirk {
            name: String::new(),
            vendor,
            device,
            subvendor: IdMatch::ANY,
            subdevice: IdMatch::ANY,
            fields,
        }
    }

    fn field(register: u32) -> Field {
        Field {
            register,
            size: FieldSize::Dword,
            mask: 0,
        }
    }

    const IDENTITY: DeviceIdentity = DeviceIdentity {
        vendor_id: 0x10de,
        device_id: 0x1234,
        subsystem_vendor_id: 0x1458,
        subsystem_device_id: 0x3678,
    };

    #[test]
    fn address_parses_and_displays_round_trip() {
        let addr: DeviceAddress = "0000:03:00.0".parse().unwrap();
        assert_eq!(
            addr,
            DeviceAddress {
                domain: 0,
                bus: 3,
                dev: 0,
                func: 0
            }
        );
        assert_eq!(addr.to_string(), "0000:03:00.0");
    }

    #[test]
    fn unpadded_address_is_rejected() {
        assert!("1:2:3.4".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        for bad in [
            "",
            "0000:03:00",
            "0000-03-00.0",
            "000g:03:00.0",
            "0000:03:00.00",
            "0000:03:00.0 extra",
        ] {
            assert!(bad.parse::<DeviceAddress>().is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn wildcards_match_everything_including_literal_ffff() {
        let all_wild = quirk(IdMatch::ANY, IdMatch::ANY, vec![field(0x40)]);
        assert!(all_wild.matches(&IDENTITY));

        let ffff_device = DeviceIdentity {
            vendor_id: 0xffff,
            device_id: 0xffff,
            subsystem_vendor_id: 0xffff,
            subsystem_device_id: 0xffff,
        };
        assert!(all_wild.matches(&ffff_device));
    }

    #[test]
    fn exact_ids_must_match_their_own_position() {
        let exact = quirk(
            IdMatch::exact(0x10de),
            IdMatch::exact(0x1234),
            vec![field(0x40)],
        );
        assert!(exact.matches(&IDENTITY));

        let other_vendor = DeviceIdentity {
            vendor_id: 0x8086,
            ..IDENTITY
        };
        assert!(!exact.matches(&other_vendor));
    }

    #[test]
    fn device_filter_checks_device_id_not_vendor_id() {
        // A filter whose device id happens to equal the device's *vendor* id
        // must not match.
        let confusable = quirk(IdMatch::ANY, IdMatch::exact(0x10de), vec![field(0x40)]);
        assert!(!confusable.matches(&IDENTITY));

        let correct = quirk(IdMatch::ANY, IdMatch::exact(0x1234), vec![field(0x40)]);
        assert!(correct.matches(&IDENTITY));
    }

    #[test]
    fn fields_come_out_in_quirk_then_field_order() {
        let quirks = vec![
            quirk(IdMatch::ANY, IdMatch::ANY, vec![field(0x00), field(0x04)]),
            quirk(IdMatch::exact(0x0000), IdMatch::ANY, vec![field(0x08)]),
            quirk(IdMatch::ANY, IdMatch::ANY, vec![field(0x0c)]),
        ];
        let registers: Vec<u32> = matching_fields(&IDENTITY, &quirks)
            .iter()
            .map(|f| f.register)
            .collect();
        // The middle quirk's vendor filter doesn't match and contributes nothing.
        assert_eq!(registers, [0x00, 0x04, 0x0c]);
    }

    #[test]
    fn descriptor_line_matches_the_driver_format() {
        let addr: DeviceAddress = "0000:00:00.0".parse().unwrap();
        let line = descriptor_line(
            &addr,
            &Field {
                register: 0x10,
                size: FieldSize::Dword,
                mask: 0xffff_ffff,
            },
        );
        assert_eq!(line, "0000:00:00:0-00000010:4:ffffffff\n");
    }

    #[test]
    fn descriptor_line_renders_size_as_decimal() {
        let addr: DeviceAddress = "0001:0a:1f.7".parse().unwrap();
        let line = descriptor_line(
            &addr,
            &Field {
                register: 0xdeadbeef,
                size: FieldSize::Word,
                mask: 0x0000_00ff,
            },
        );
        assert_eq!(line, "0001:0a:1f:7-deadbeef:2:000000ff\n");
    }
}
