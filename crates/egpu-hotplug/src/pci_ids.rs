//! Minimal reader for the `pci.ids` database shipped by hwdata/pciutils.
//!
//! Only vendor and device lines are kept. Subsystem lines and everything from
//! the first class section (`C xx`) onwards are skipped.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::debug;
use tracing::warn;

/// Well-known locations of the database, tried in order.
pub const DEFAULT_LOCATIONS: &[&str] = &[
    "/usr/share/hwdata/pci.ids",
    "/usr/share/misc/pci.ids",
    "/usr/share/pci.ids",
];

#[derive(Debug, Default)]
struct Vendor {
    name: String,
    devices: HashMap<u16, String>,
}

/// Vendor and device names keyed by PCI id.
#[derive(Debug, Default)]
pub struct PciIdDatabase {
    vendors: HashMap<u16, Vendor>,
}

impl PciIdDatabase {
    /// Loads the first readable database from `locations`.
    ///
    /// A missing database is not an error: lookups then fall back to raw ids.
    pub fn load(locations: &[PathBuf]) -> Self {
        for location in locations {
            match fs::read_to_string(location) {
                Ok(contents) => {
                    debug!(path = %location.display(), "loaded PCI id database");
                    return Self::parse(&contents);
                }
                Err(e) => debug!(path = %location.display(), error = %e, "PCI id database unavailable"),
            }
        }
        warn!("no PCI id database found, product names will be raw ids");
        Self::default()
    }

    pub fn parse(contents: &str) -> Self {
        let mut vendors: HashMap<u16, Vendor> = HashMap::new();
        let mut current: Option<u16> = None;

        for line in contents.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with("C ") {
                break;
            }
            if line.starts_with("\t\t") {
                continue;
            }

            if let Some(rest) = line.strip_prefix('\t') {
                let Some(vendor) = current.and_then(|id| vendors.get_mut(&id)) else {
                    continue;
                };
                if let Some((id, name)) = split_entry(rest) {
                    vendor.devices.insert(id, name.to_string());
                }
            } else if let Some((id, name)) = split_entry(line) {
                vendors.insert(
                    id,
                    Vendor {
                        name: name.to_string(),
                        devices: HashMap::new(),
                    },
                );
                current = Some(id);
            } else {
                current = None;
            }
        }

        Self { vendors }
    }

    pub fn vendor_name(&self, vendor: u16) -> Option<&str> {
        self.vendors.get(&vendor).map(|v| v.name.as_str())
    }

    pub fn device_name(&self, vendor: u16, device: u16) -> Option<&str> {
        self.vendors
            .get(&vendor)
            .and_then(|v| v.devices.get(&device))
            .map(String::as_str)
    }

    /// Device name, or `[vvvv:dddd]` when the database does not know it.
    pub fn product_name(&self, vendor: u16, device: u16) -> String {
        self.device_name(vendor, device)
            .map(str::to_string)
            .unwrap_or_else(|| format!("[{vendor:04x}:{device:04x}]"))
    }
}

fn split_entry(line: &str) -> Option<(u16, &str)> {
    let (id, name) = line.split_once("  ")?;
    let id = u16::from_str_radix(id.trim(), 16).ok()?;
    Some((id, name.trim()))
}

/// Parses a sysfs hex attribute such as `0x1002`.
pub fn parse_hex_attr(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u32::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    const SAMPLE: &str = "\
# pci.ids sample
#\tcomment with a tab
1002  Advanced Micro Devices, Inc. [AMD/ATI]
\t67df  Ellesmere [Radeon RX 470/480/570/570X/580/580X/590]
\t\t1002 0b37  Radeon RX 580
\taaf0  Ellesmere HDMI Audio [Radeon RX 470/480 / 570/580/590]
10de  NVIDIA Corporation
\t1b80  GP104 [GeForce GTX 1080]
C 03  Display controller
\t00  VGA compatible controller
";

    #[test]
    fn parses_vendors_and_devices() {
        let db = PciIdDatabase::parse(SAMPLE);

        assert_eq!(
            db.vendor_name(0x1002),
            Some("Advanced Micro Devices, Inc. [AMD/ATI]")
        );
        assert_eq!(
            db.device_name(0x1002, 0x67df),
            Some("Ellesmere [Radeon RX 470/480/570/570X/580/580X/590]")
        );
        assert_eq!(db.device_name(0x10de, 0x1b80), Some("GP104 [GeForce GTX 1080]"));
    }

    #[test]
    fn subsystem_lines_do_not_override_devices() {
        let db = PciIdDatabase::parse(SAMPLE);

        assert_eq!(db.device_name(0x1002, 0x0b37), None);
    }

    #[test]
    fn class_section_is_ignored() {
        let db = PciIdDatabase::parse(SAMPLE);

        assert_eq!(db.vendor_name(0x0003), None);
        assert_eq!(db.device_name(0x10de, 0x0000), None);
    }

    #[test]
    fn unknown_device_falls_back_to_ids() {
        let db = PciIdDatabase::default();

        assert_eq!(db.product_name(0x1002, 0x67df), "[1002:67df]");
    }

    #[test]
    fn hex_attributes() {
        assert_eq!(parse_hex_attr("0x030000\n"), Some(0x030000));
        assert_eq!(parse_hex_attr("1002"), Some(0x1002));
        assert_eq!(parse_hex_attr("zz"), None);
    }
}
