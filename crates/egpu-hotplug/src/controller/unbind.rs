use derive_more::Display;
use error_stack::Report;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::SafetyGate;
use crate::error::HotplugError;
use crate::error::HotplugResult;
use crate::inventory;
use crate::inventory::GpuInventory;
use crate::inventory::GpuMatcher;
use crate::occupancy::OccupancyChecker;
use crate::sysfs;
use crate::sysfs::SysfsWriter;

/// Progress of an unbind run. `Unbound`, `Skipped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UnbindStage {
    #[display("start")]
    Start,
    #[display("located")]
    Located,
    #[display("safety checked")]
    SafetyChecked,
    #[display("unbound")]
    Unbound,
    #[display("skipped")]
    Skipped,
    #[display("failed")]
    Failed,
}

/// Result of a successful unbind run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnbindOutcome {
    /// No matching GPU is bound, nothing to do
    Skipped,
    /// Both functions were detached from their drivers
    Unbound {
        gpu_address: String,
        audio_address: String,
    },
}

/// Address of the HDMI/DP audio function paired with a GPU.
///
/// The audio codec is assumed to be function 1 of the same device; the first
/// `00.0` in the address is rewritten to `00.1`.
pub fn audio_function_address(gpu_address: &str) -> String {
    gpu_address.replacen("00.0", "00.1", 1)
}

/// Detach flow: locate the GPU, make sure nothing uses it, unbind both
/// functions.
pub struct UnbindController<'a> {
    inventory: &'a dyn GpuInventory,
    occupancy: &'a dyn OccupancyChecker,
    writer: &'a dyn SysfsWriter,
}

impl<'a> UnbindController<'a> {
    pub fn new(
        inventory: &'a dyn GpuInventory,
        occupancy: &'a dyn OccupancyChecker,
        writer: &'a dyn SysfsWriter,
    ) -> Self {
        Self {
            inventory,
            occupancy,
            writer,
        }
    }

    pub fn run(&self, matcher: &GpuMatcher, safety: SafetyGate) -> HotplugResult<UnbindOutcome> {
        let mut stage = UnbindStage::Start;
        self.advance(&mut stage, matcher, safety)
            .map_err(|report| {
                debug!(reached = %stage, "unbind {}", UnbindStage::Failed);
                report.attach_printable(format!("unbind stopped after: {stage}"))
            })
    }

    fn advance(
        &self,
        stage: &mut UnbindStage,
        matcher: &GpuMatcher,
        safety: SafetyGate,
    ) -> HotplugResult<UnbindOutcome> {
        let Some(gpu_address) = inventory::find_address(self.inventory, matcher)? else {
            *stage = UnbindStage::Skipped;
            info!(pattern = %matcher.pattern, driver = %matcher.driver, "GPU not bound, nothing to do");
            return Ok(UnbindOutcome::Skipped);
        };
        *stage = UnbindStage::Located;
        debug!(address = %gpu_address, "GPU located");

        match safety {
            SafetyGate::Enforced => {
                if !self.occupancy.is_free(&gpu_address) {
                    return Err(Report::new(HotplugError::Safety {
                        pattern: matcher.pattern.clone(),
                        address: gpu_address,
                    })
                    .attach_printable("close the applications using the GPU or pass --force"));
                }
            }
            SafetyGate::Bypassed => {
                warn!(address = %gpu_address, "skipping occupancy check");
            }
        }
        *stage = UnbindStage::SafetyChecked;

        let audio_address = audio_function_address(&gpu_address);
        for address in [&gpu_address, &audio_address] {
            // no rollback: a failure on the audio function leaves the GPU unbound
            self.writer.write(&sysfs::unbind_path(address), address)?;
            info!(address = %address, "unbound from driver");
        }
        *stage = UnbindStage::Unbound;

        Ok(UnbindOutcome::Unbound {
            gpu_address,
            audio_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::PathBuf;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::inventory::testing::device;
    use crate::inventory::testing::ScriptedInventory;
    use crate::sysfs::testing::RecordingWriter;

    struct FixedOccupancy {
        free: bool,
        checked: RefCell<Vec<String>>,
    }

    impl FixedOccupancy {
        fn new(free: bool) -> Self {
            Self {
                free,
                checked: RefCell::new(Vec::new()),
            }
        }
    }

    impl OccupancyChecker for FixedOccupancy {
        fn is_free(&self, address: &str) -> bool {
            self.checked.borrow_mut().push(address.to_string());
            self.free
        }
    }

    fn matcher() -> GpuMatcher {
        GpuMatcher::new("amdgpu", "Ellesmere")
    }

    fn ellesmere() -> ScriptedInventory {
        ScriptedInventory::always(vec![
            device("0000:00:02.0", "i915", "UHD 630"),
            device("0000:05:00.0", "amdgpu", "Ellesmere [Radeon RX 470/480/570/570X/580/580X/590]"),
        ])
    }

    fn unbind_write(address: &str) -> (PathBuf, String) {
        (
            PathBuf::from(format!("/sys/bus/pci/devices/{address}/driver/unbind")),
            address.to_string(),
        )
    }

    #[test_log::test]
    fn free_gpu_unbinds_gpu_then_audio() {
        let inventory = ellesmere();
        let occupancy = FixedOccupancy::new(true);
        let writer = RecordingWriter::default();

        let outcome = UnbindController::new(&inventory, &occupancy, &writer)
            .run(&matcher(), SafetyGate::Enforced)
            .expect("unbind should succeed");

        assert_eq!(
            outcome,
            UnbindOutcome::Unbound {
                gpu_address: "0000:05:00.0".to_string(),
                audio_address: "0000:05:00.1".to_string(),
            }
        );
        assert_eq!(*occupancy.checked.borrow(), vec!["0000:05:00.0".to_string()]);
        assert_eq!(
            *writer.writes.borrow(),
            vec![unbind_write("0000:05:00.0"), unbind_write("0000:05:00.1")]
        );
    }

    #[test_log::test]
    fn busy_gpu_without_force_writes_nothing() {
        let inventory = ellesmere();
        let occupancy = FixedOccupancy::new(false);
        let writer = RecordingWriter::default();

        let report = UnbindController::new(&inventory, &occupancy, &writer)
            .run(&matcher(), SafetyGate::Enforced)
            .expect_err("unbind should fail");

        assert!(matches!(
            report.current_context(),
            HotplugError::Safety { address, .. } if address == "0000:05:00.0"
        ));
        assert!(writer.writes.borrow().is_empty());
    }

    #[test_log::test]
    fn force_bypasses_occupancy_check() {
        let inventory = ellesmere();
        let occupancy = FixedOccupancy::new(false);
        let writer = RecordingWriter::default();

        UnbindController::new(&inventory, &occupancy, &writer)
            .run(&matcher(), SafetyGate::Bypassed)
            .expect("forced unbind should succeed");

        assert!(occupancy.checked.borrow().is_empty());
        assert_eq!(writer.writes.borrow().len(), 2);
    }

    #[test_log::test]
    fn absent_gpu_is_skipped() {
        let inventory = ScriptedInventory::always(vec![device("0000:00:02.0", "i915", "UHD 630")]);
        let occupancy = FixedOccupancy::new(true);
        let writer = RecordingWriter::default();

        let outcome = UnbindController::new(&inventory, &occupancy, &writer)
            .run(&matcher(), SafetyGate::Enforced)
            .expect("nothing to do is a success");

        assert_eq!(outcome, UnbindOutcome::Skipped);
        assert!(occupancy.checked.borrow().is_empty());
        assert!(writer.writes.borrow().is_empty());
        assert_eq!(inventory.queries.get(), 1);
    }

    #[test_log::test]
    fn audio_failure_keeps_gpu_unbound() {
        let inventory = ellesmere();
        let occupancy = FixedOccupancy::new(true);
        let writer = RecordingWriter {
            fail_on: Some(unbind_write("0000:05:00.1").0),
            ..Default::default()
        };

        let report = UnbindController::new(&inventory, &occupancy, &writer)
            .run(&matcher(), SafetyGate::Enforced)
            .expect_err("unbind should fail");

        assert!(matches!(report.current_context(), HotplugError::Io { .. }));
        assert_eq!(*writer.writes.borrow(), vec![unbind_write("0000:05:00.0")]);
    }

    #[test_log::test]
    fn gpu_failure_skips_audio() {
        let inventory = ellesmere();
        let occupancy = FixedOccupancy::new(true);
        let writer = RecordingWriter {
            fail_on: Some(unbind_write("0000:05:00.0").0),
            ..Default::default()
        };

        UnbindController::new(&inventory, &occupancy, &writer)
            .run(&matcher(), SafetyGate::Enforced)
            .expect_err("unbind should fail");

        assert!(writer.writes.borrow().is_empty());
    }

    #[test]
    fn inventory_failure_is_reported() {
        let inventory = ScriptedInventory::script(vec![Err("no sysfs".to_string())]);
        let occupancy = FixedOccupancy::new(true);
        let writer = RecordingWriter::default();

        let report = UnbindController::new(&inventory, &occupancy, &writer)
            .run(&matcher(), SafetyGate::Enforced)
            .expect_err("unbind should fail");

        assert!(matches!(report.current_context(), HotplugError::Inventory { .. }));
    }

    #[test]
    fn audio_function_is_function_one() {
        assert_eq!(audio_function_address("0000:05:00.0"), "0000:05:00.1");
        assert_eq!(audio_function_address("0000:00:00.0"), "0000:00:00.1");
        assert_eq!(audio_function_address("0000:0a:00.0"), "0000:0a:00.1");
    }
}
