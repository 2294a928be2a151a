//! Locates the PCI node whose `rescan` control makes the kernel discover a
//! device hanging off a Thunderbolt dock.

use std::path::Path;
use std::path::PathBuf;

use tracing::debug;

use crate::sysfs::PCI_BUS_PATH;

/// Name of the rescan control inside a PCI node.
pub const RESCAN: &str = "rescan";

/// Upper bound on the number of parents visited.
const MAX_DEPTH: usize = 64;

/// Returns the nearest strict ancestor of `start` that contains a `rescan`
/// entry, or `None` once the filesystem root is reached.
pub fn find_rescan_ancestor(start: &Path) -> Option<PathBuf> {
    let mut current = start;

    for _ in 0..MAX_DEPTH {
        if current == Path::new("/") {
            return None;
        }
        let parent = current.parent()?;
        if parent.as_os_str().is_empty() {
            return None;
        }
        if parent.join(RESCAN).exists() {
            return Some(parent.to_path_buf());
        }
        current = parent;
    }

    debug!(start = %start.display(), "gave up looking for a rescan ancestor");
    None
}

/// Resolves the node to rescan for a dock at `dock_sysfs_path`.
///
/// The first rescan-capable ancestor is the dock's own PCI node; the bus
/// segment that has to see the new child sits one rescan-capable level above
/// it, hence the second lookup. Falls back to the whole PCI bus.
pub fn rescan_target(dock_sysfs_path: &Path) -> PathBuf {
    let target = find_rescan_ancestor(dock_sysfs_path)
        .and_then(|node| find_rescan_ancestor(&node));

    match target {
        Some(node) => node,
        None => {
            debug!(dock = %dock_sysfs_path.display(), "no rescan ancestor, rescanning the whole bus");
            PathBuf::from(PCI_BUS_PATH)
        }
    }
}

/// Path of the `rescan` control under `node`.
pub fn rescan_control(node: &Path) -> PathBuf {
    node.join(RESCAN)
}
