use std::path::PathBuf;

use derive_more::Display;
use error_stack::Report;
use tracing::debug;
use tracing::info;

use crate::config::DockMode;
use crate::dock::DockAuthorization;
use crate::error::HotplugError;
use crate::error::HotplugResult;
use crate::inventory::GpuInventory;
use crate::inventory::GpuMatcher;
use crate::poll::Heartbeat;
use crate::poll::PollOutcome;
use crate::poll::PollPolicy;
use crate::poll::PollingGate;
use crate::rescan;
use crate::sysfs::SysfsWriter;
use crate::sysfs::PCI_BUS_PATH;

/// Progress of a bind run. `Confirmed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BindStage {
    #[display("start")]
    Start,
    #[display("dock resolved")]
    DockResolved,
    #[display("rescan triggered")]
    RescanTriggered,
    #[display("confirmed")]
    Confirmed,
    #[display("failed")]
    Failed,
}

/// Result of a successful bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOutcome {
    /// The `rescan` control that was written
    pub rescan_control: PathBuf,
    pub poll: PollOutcome,
}

/// Attach flow: resolve the dock, rescan its bus, wait for the GPU.
pub struct BindController<'a> {
    inventory: &'a dyn GpuInventory,
    dock: &'a dyn DockAuthorization,
    writer: &'a dyn SysfsWriter,
}

impl<'a> BindController<'a> {
    pub fn new(
        inventory: &'a dyn GpuInventory,
        dock: &'a dyn DockAuthorization,
        writer: &'a dyn SysfsWriter,
    ) -> Self {
        Self {
            inventory,
            dock,
            writer,
        }
    }

    pub fn run(
        &self,
        matcher: &GpuMatcher,
        mode: &DockMode,
        policy: PollPolicy,
        heartbeat: &mut dyn Heartbeat,
    ) -> HotplugResult<BindOutcome> {
        let mut stage = BindStage::Start;
        self.advance(&mut stage, matcher, mode, policy, heartbeat)
            .map_err(|report| {
                debug!(reached = %stage, "bind {}", BindStage::Failed);
                report.attach_printable(format!("bind stopped after: {stage}"))
            })
    }

    fn advance(
        &self,
        stage: &mut BindStage,
        matcher: &GpuMatcher,
        mode: &DockMode,
        policy: PollPolicy,
        heartbeat: &mut dyn Heartbeat,
    ) -> HotplugResult<BindOutcome> {
        let rescan_node = match mode {
            DockMode::Thunderbolt { uid } => {
                let dock = self
                    .dock
                    .resolve_dock(uid)
                    .map_err(|report| report.attach_printable("Dock not connected"))?;
                *stage = BindStage::DockResolved;
                debug!(dock = %dock.sysfs_path.display(), status = %dock.status, "dock resolved");

                if !dock.authorized() {
                    return Err(Report::new(HotplugError::NotAuthorized {
                        status: dock.status.to_string(),
                    })
                    .attach_printable(format!("uid: {uid}")));
                }
                rescan::rescan_target(&dock.sysfs_path)
            }
            DockMode::GlobalRescan => {
                *stage = BindStage::DockResolved;
                PathBuf::from(PCI_BUS_PATH)
            }
        };

        let rescan_control = rescan::rescan_control(&rescan_node);
        info!(path = %rescan_control.display(), "triggering PCI rescan");
        self.writer.write(&rescan_control, "1")?;
        *stage = BindStage::RescanTriggered;

        let poll = PollingGate::new(self.inventory, policy).wait_for_match(matcher, heartbeat)?;
        if !poll.found {
            return Err(Report::new(HotplugError::NotFound {
                pattern: matcher.pattern.clone(),
                attempts: poll.attempts_used,
            }));
        }

        *stage = BindStage::Confirmed;
        info!(address = ?poll.matched_address, attempts = poll.attempts_used, "GPU enumerated");
        Ok(BindOutcome {
            rescan_control,
            poll,
        })
    }
}
