use std::time::Duration;

use clap_complete::Shell;

use crate::config::cli::Cli;
use crate::config::cli::Commands;
use crate::config::cli::TargetArgs;
use crate::inventory::GpuMatcher;
use crate::poll::PollPolicy;

/// Environment variable enabling debug output.
pub const DEBUG_ENV_VAR: &str = "EGPU_HOTPLUG_DEBUG";

/// How the bind flow finds the bus to rescan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockMode {
    /// Ask boltd for the dock and rescan the bus segment above it
    Thunderbolt { uid: String },
    /// Rescan the whole PCI bus
    GlobalRescan,
}

/// Whether unbind refuses to detach a GPU that is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyGate {
    Enforced,
    Bypassed,
}

/// The operation selected on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Bind { poll: PollPolicy },
    Unbind { safety: SafetyGate },
    Completions { shell: Shell },
}

/// Everything a run needs, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub matcher: GpuMatcher,
    pub dock: DockMode,
    pub operation: Operation,
    pub debug: bool,
}

impl Settings {
    /// `debug` is whether [`DEBUG_ENV_VAR`] was present in the environment.
    pub fn from_cli(cli: Cli, debug: bool) -> Self {
        let Cli { target, command } = cli;

        let operation = match command {
            Commands::Bind(args) => Operation::Bind {
                poll: PollPolicy {
                    max_attempts: args.attempts,
                    interval: Duration::from_millis(args.interval_ms),
                },
            },
            Commands::Unbind(args) => Operation::Unbind {
                safety: if args.force {
                    SafetyGate::Bypassed
                } else {
                    SafetyGate::Enforced
                },
            },
            Commands::Completions(args) => Operation::Completions { shell: args.shell },
        };

        let TargetArgs {
            gpu,
            thunderbolt_uid,
            no_dock,
            driver,
        } = target;

        let dock = if no_dock {
            DockMode::GlobalRescan
        } else {
            DockMode::Thunderbolt {
                uid: thunderbolt_uid,
            }
        };

        Self {
            matcher: GpuMatcher::new(driver, gpu),
            dock,
            operation,
            debug,
        }
    }

    /// Reads the debug toggle from the process environment.
    pub fn debug_from_env() -> bool {
        std::env::var_os(DEBUG_ENV_VAR).is_some()
    }
}
