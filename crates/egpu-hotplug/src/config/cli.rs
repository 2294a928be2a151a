use std::io;

use clap::Args;
use clap::CommandFactory;
use clap::Parser;
use clap::Subcommand;
use clap_complete::Shell;
use utils::version;

pub const DEFAULT_GPU_PATTERN: &str = "Ellesmere";
pub const DEFAULT_THUNDERBOLT_UID: &str = "c7010000-0052-540e-03af-bfd8ce248908";
pub const DEFAULT_DRIVER: &str = "amdgpu";

/// Hot-plug an external GPU connected through a Thunderbolt dock
#[derive(Parser, Debug)]
#[command(
    name = "egpu-hotplug",
    about,
    version = &**version::VERSION,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rescan the dock's PCI bus and wait for the eGPU to appear
    Bind(BindArgs),
    /// Detach the eGPU from its driver so the cable can be removed
    Unbind(UnbindArgs),
    /// Print a shell completion script to stdout
    Completions(CompletionsArgs),
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    #[arg(
        short,
        long,
        global = true,
        default_value = DEFAULT_GPU_PATTERN,
        help = "Substring of the GPU product name to match"
    )]
    pub gpu: String,

    #[arg(
        short,
        long = "tb",
        global = true,
        env = "EGPU_HOTPLUG_TB_UID",
        default_value = DEFAULT_THUNDERBOLT_UID,
        help = "Thunderbolt device uid of the dock as known to boltd"
    )]
    pub thunderbolt_uid: String,

    #[arg(
        long,
        global = true,
        help = "Skip the Thunderbolt broker and rescan the whole PCI bus"
    )]
    pub no_dock: bool,

    #[arg(
        long,
        global = true,
        default_value = DEFAULT_DRIVER,
        help = "Kernel driver that owns the GPU"
    )]
    pub driver: String,
}

#[derive(Args, Debug, Clone)]
pub struct BindArgs {
    #[arg(
        long,
        default_value_t = crate::poll::DEFAULT_ATTEMPTS,
        help = "Number of enumeration checks after the rescan"
    )]
    pub attempts: u32,

    #[arg(
        long,
        default_value_t = 1000,
        help = "Delay between enumeration checks in milliseconds"
    )]
    pub interval_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct UnbindArgs {
    #[arg(short, long, help = "Unbind even if the GPU is in use")]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    #[arg(value_enum, help = "Shell to generate the completion script for")]
    pub shell: Shell,
}

/// Writes the completion script for `shell`.
pub fn write_completions(shell: Shell, out: &mut dyn io::Write) {
    clap_complete::generate(shell, &mut Cli::command(), "egpu-hotplug", out);
}
