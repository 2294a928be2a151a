//! Writes to kernel pseudo-files (`rescan`, `driver/unbind`).

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::IntoRawFd;
use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;

use crate::error::HotplugError;
use crate::error::HotplugResult;

/// Root of the PCI bus in sysfs.
pub const PCI_BUS_PATH: &str = "/sys/bus/pci";

/// Per-device directory under the PCI bus.
pub const PCI_DEVICES_PATH: &str = "/sys/bus/pci/devices";

/// Privileged write primitive used by the controllers.
pub trait SysfsWriter {
    /// Writes `value` into `path` in a single operation.
    fn write(&self, path: &Path, value: &str) -> HotplugResult<()>;
}

/// [`SysfsWriter`] backed by the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsWriter;

impl SysfsWriter for FsWriter {
    fn write(&self, path: &Path, value: &str) -> HotplugResult<()> {
        tracing::debug!(path = %path.display(), value, "writing sysfs attribute");
        write_value(path, value)
            .change_context_lazy(|| HotplugError::io(path.display().to_string()))
    }
}

fn write_value(path: &Path, value: &str) -> Result<(), Report<io::Error>> {
    let data = value.as_bytes();
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(Report::new)?;

    let written = match file.write(data) {
        Ok(n) if n < data.len() => Err(Report::new(io::Error::from(io::ErrorKind::WriteZero))
            .attach_printable(format!("short write: {n} of {} bytes", data.len()))),
        Ok(_) => Ok(()),
        Err(e) => Err(Report::new(e)),
    };

    // first error wins, a failing close after a good write still surfaces
    let closed = close(file);
    written?;
    closed.map_err(|e| Report::new(e).attach_printable("close failed"))
}

fn close(file: File) -> io::Result<()> {
    let fd = file.into_raw_fd();
    // SAFETY: `fd` was just released from an owned `File` and is closed exactly once.
    if unsafe { libc::close(fd) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Path of a device's `driver/unbind` control.
pub fn unbind_path(address: &str) -> std::path::PathBuf {
    Path::new(PCI_DEVICES_PATH)
        .join(address)
        .join("driver")
        .join("unbind")
}
