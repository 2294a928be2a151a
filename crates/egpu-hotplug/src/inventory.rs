//! Graphics device inventory.
//!
//! Scans the PCI devices directory for display controllers (class `0x03xxxx`)
//! and reports their bus address, bound driver and product name. Every query
//! rebuilds the list from scratch.

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::OnceLock;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;

use crate::error::HotplugError;
use crate::error::HotplugResult;
use crate::pci_ids;
use crate::pci_ids::PciIdDatabase;
use crate::sysfs::PCI_DEVICES_PATH;

/// PCI base class of display controllers.
const DISPLAY_CONTROLLER_CLASS: u32 = 0x03;

/// A graphics device as seen by one inventory query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsDevice {
    /// PCI address (e.g., "0000:05:00.0")
    pub bus_address: String,
    /// Bound driver, empty when the device has none
    pub driver_name: String,
    /// Human-readable product name
    pub product_name: String,
}

/// Source of the host's enumerated graphics devices.
pub trait GpuInventory {
    fn graphics_devices(&self) -> HotplugResult<Vec<GraphicsDevice>>;
}

/// Selects the target GPU: exact driver match and case-sensitive substring
/// match on the product name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuMatcher {
    pub driver: String,
    pub pattern: String,
}

impl GpuMatcher {
    pub fn new(driver: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            pattern: pattern.into(),
        }
    }

    pub fn matches(&self, device: &GraphicsDevice) -> bool {
        device.driver_name == self.driver && device.product_name.contains(&self.pattern)
    }

    /// First matching device in inventory order.
    pub fn first_match<'a>(&self, devices: &'a [GraphicsDevice]) -> Option<&'a GraphicsDevice> {
        devices.iter().find(|device| self.matches(device))
    }
}

/// Returns the bus address of the first device accepted by `matcher`, or
/// `None` when nothing matches.
pub fn find_address(
    inventory: &dyn GpuInventory,
    matcher: &GpuMatcher,
) -> HotplugResult<Option<String>> {
    let devices = inventory.graphics_devices()?;
    Ok(matcher
        .first_match(&devices)
        .map(|device| device.bus_address.clone()))
}

/// [`GpuInventory`] reading `/sys/bus/pci/devices`.
pub struct SysfsInventory {
    root: PathBuf,
    id_locations: Vec<PathBuf>,
    ids: OnceLock<PciIdDatabase>,
}

impl SysfsInventory {
    pub fn new() -> Self {
        Self::with_root(
            PCI_DEVICES_PATH,
            pci_ids::DEFAULT_LOCATIONS.iter().map(PathBuf::from).collect(),
        )
    }

    pub fn with_root(root: impl Into<PathBuf>, id_locations: Vec<PathBuf>) -> Self {
        Self {
            root: root.into(),
            id_locations,
            ids: OnceLock::new(),
        }
    }

    fn ids(&self) -> &PciIdDatabase {
        self.ids.get_or_init(|| PciIdDatabase::load(&self.id_locations))
    }

    fn read_device(&self, path: &Path, address: &str) -> Option<GraphicsDevice> {
        let class = read_hex(&path.join("class"))?;
        if class >> 16 != DISPLAY_CONTROLLER_CLASS {
            return None;
        }

        let vendor = read_hex(&path.join("vendor"))?;
        let device = read_hex(&path.join("device"))?;
        let (vendor, device) = (u16::try_from(vendor).ok()?, u16::try_from(device).ok()?);

        let driver_name = fs::read_link(path.join("driver"))
            .ok()
            .and_then(|target| target.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();

        let product_name = self.ids().product_name(vendor, device);

        debug!(
            address,
            vendor = ?self.ids().vendor_name(vendor),
            product = %product_name,
            driver = %driver_name,
            "found graphics device"
        );

        Some(GraphicsDevice {
            bus_address: address.to_string(),
            driver_name,
            product_name,
        })
    }
}

impl Default for SysfsInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuInventory for SysfsInventory {
    fn graphics_devices(&self) -> HotplugResult<Vec<GraphicsDevice>> {
        let entries = fs::read_dir(&self.root)
            .change_context_lazy(|| {
                HotplugError::inventory(format!("cannot list {}", self.root.display()))
            })?;

        let mut devices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                Report::new(HotplugError::inventory(format!(
                    "cannot read entry of {}",
                    self.root.display()
                )))
                .attach_printable(e)
            })?;
            let address = entry.file_name().to_string_lossy().into_owned();
            if let Some(device) = self.read_device(&entry.path(), &address) {
                devices.push(device);
            }
        }

        devices.sort_by(|a, b| a.bus_address.cmp(&b.bus_address));
        Ok(devices)
    }
}

fn read_hex(path: &Path) -> Option<u32> {
    let raw = fs::read_to_string(path)
        .map_err(|e| debug!(path = %path.display(), error = %e, "unreadable attribute"))
        .ok()?;
    pci_ids::parse_hex_attr(&raw)
}
