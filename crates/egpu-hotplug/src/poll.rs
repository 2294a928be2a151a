//! Bounded wait for the kernel to enumerate a GPU after a rescan.

use std::io::Write;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::HotplugResult;
use crate::inventory::GpuInventory;
use crate::inventory::GpuMatcher;

pub const DEFAULT_ATTEMPTS: u32 = 10;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Attempt bound and spacing of a [`PollingGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// Result of one [`PollingGate::wait_for_match`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub found: bool,
    pub attempts_used: u32,
    pub matched_address: Option<String>,
}

/// Per-attempt progress signal shown to the user.
pub trait Heartbeat {
    /// Called after every attempt that did not find the device.
    fn beat(&mut self);
    /// Called once when polling stops, whatever the outcome.
    fn finish(&mut self, attempts_used: u32);
}

/// Prints a dot per miss and terminates the line afterwards.
#[derive(Debug, Default)]
pub struct DotHeartbeat {
    dots: u32,
}

impl Heartbeat for DotHeartbeat {
    fn beat(&mut self) {
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, ".");
        let _ = stdout.flush();
        self.dots += 1;
    }

    fn finish(&mut self, _attempts_used: u32) {
        if self.dots > 0 {
            println!();
            self.dots = 0;
        }
    }
}

/// Silent heartbeat.
#[derive(Debug, Default)]
pub struct NoHeartbeat;

impl Heartbeat for NoHeartbeat {
    fn beat(&mut self) {}
    fn finish(&mut self, _attempts_used: u32) {}
}

/// Repeats inventory queries until a match appears or the attempt bound is
/// reached.
pub struct PollingGate<'a> {
    inventory: &'a dyn GpuInventory,
    policy: PollPolicy,
}

impl<'a> PollingGate<'a> {
    pub fn new(inventory: &'a dyn GpuInventory, policy: PollPolicy) -> Self {
        Self { inventory, policy }
    }

    /// Waits for a device accepted by `matcher`.
    ///
    /// Stops at the first attempt that finds a match. A failing inventory
    /// query aborts the wait immediately instead of using up the remaining
    /// attempts.
    pub fn wait_for_match(
        &self,
        matcher: &GpuMatcher,
        heartbeat: &mut dyn Heartbeat,
    ) -> HotplugResult<PollOutcome> {
        let mut attempts_used = 0;

        while attempts_used < self.policy.max_attempts {
            if attempts_used > 0 {
                thread::sleep(self.policy.interval);
            }
            attempts_used += 1;

            let devices = match self.inventory.graphics_devices() {
                Ok(devices) => devices,
                Err(report) => {
                    heartbeat.finish(attempts_used);
                    return Err(report.attach_printable(format!(
                        "inventory query failed on attempt {attempts_used}"
                    )));
                }
            };

            if let Some(device) = matcher.first_match(&devices) {
                debug!(attempt = attempts_used, address = %device.bus_address, "GPU enumerated");
                heartbeat.finish(attempts_used);
                return Ok(PollOutcome {
                    found: true,
                    attempts_used,
                    matched_address: Some(device.bus_address.clone()),
                });
            }

            debug!(attempt = attempts_used, pattern = %matcher.pattern, "GPU not enumerated yet");
            heartbeat.beat();
        }

        heartbeat.finish(attempts_used);
        Ok(PollOutcome {
            found: false,
            attempts_used,
            matched_address: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::error::HotplugError;
    use crate::inventory::testing::device;
    use crate::inventory::testing::ScriptedInventory;

    const FAST: PollPolicy = PollPolicy {
        max_attempts: DEFAULT_ATTEMPTS,
        interval: Duration::ZERO,
    };

    #[derive(Default)]
    struct CountingHeartbeat {
        beats: u32,
        finished: Option<u32>,
    }

    impl Heartbeat for CountingHeartbeat {
        fn beat(&mut self) {
            self.beats += 1;
        }

        fn finish(&mut self, attempts_used: u32) {
            self.finished = Some(attempts_used);
        }
    }

    fn matcher() -> GpuMatcher {
        GpuMatcher::new("amdgpu", "Ellesmere")
    }

    #[test_log::test]
    fn stops_on_first_match() {
        let gpu = device("0000:05:00.0", "amdgpu", "Ellesmere [RX 580]");
        let inventory = ScriptedInventory::script(vec![
            Ok(vec![]),
            Ok(vec![]),
            Ok(vec![gpu.clone()]),
            Ok(vec![gpu]),
        ]);
        let mut heartbeat = CountingHeartbeat::default();

        let outcome = PollingGate::new(&inventory, FAST)
            .wait_for_match(&matcher(), &mut heartbeat)
            .expect("poll should succeed");

        assert_eq!(
            outcome,
            PollOutcome {
                found: true,
                attempts_used: 3,
                matched_address: Some("0000:05:00.0".to_string()),
            }
        );
        assert_eq!(inventory.queries.get(), 3);
        assert_eq!(heartbeat.beats, 2);
        assert_eq!(heartbeat.finished, Some(3));
    }

    #[test_log::test]
    fn gives_up_after_attempt_bound() {
        let inventory = ScriptedInventory::always(vec![device("0000:00:02.0", "i915", "UHD 630")]);
        let mut heartbeat = CountingHeartbeat::default();

        let outcome = PollingGate::new(&inventory, FAST)
            .wait_for_match(&matcher(), &mut heartbeat)
            .expect("poll should succeed");

        assert!(!outcome.found);
        assert_eq!(outcome.attempts_used, 10);
        assert_eq!(inventory.queries.get(), 10);
        assert_eq!(heartbeat.beats, 10);
    }

    #[test_log::test]
    fn query_failure_aborts_immediately() {
        let inventory = ScriptedInventory::script(vec![Ok(vec![]), Err("sysfs gone".to_string())]);
        let mut heartbeat = CountingHeartbeat::default();

        let report = PollingGate::new(&inventory, FAST)
            .wait_for_match(&matcher(), &mut heartbeat)
            .expect_err("poll should fail");

        assert!(matches!(report.current_context(), HotplugError::Inventory { .. }));
        assert_eq!(inventory.queries.get(), 2);
        assert_eq!(heartbeat.finished, Some(2));
    }

    #[test]
    fn attempts_are_spaced_by_interval() {
        let inventory = ScriptedInventory::always(vec![]);
        let policy = PollPolicy {
            max_attempts: 3,
            interval: Duration::from_millis(20),
        };

        let started = Instant::now();
        let outcome = PollingGate::new(&inventory, policy)
            .wait_for_match(&matcher(), &mut NoHeartbeat)
            .expect("poll should succeed");

        assert_eq!(outcome.attempts_used, 3);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn zero_attempts_never_queries() {
        let inventory = ScriptedInventory::always(vec![]);
        let policy = PollPolicy {
            max_attempts: 0,
            interval: Duration::ZERO,
        };

        let outcome = PollingGate::new(&inventory, policy)
            .wait_for_match(&matcher(), &mut NoHeartbeat)
            .expect("poll should succeed");

        assert!(!outcome.found);
        assert_eq!(inventory.queries.get(), 0);
    }
}
