use std::process::ExitCode;

use clap::Parser;
use egpu_hotplug::config;
use egpu_hotplug::config::Cli;
use egpu_hotplug::config::DockMode;
use egpu_hotplug::config::Operation;
use egpu_hotplug::config::Settings;
use egpu_hotplug::controller::BindController;
use egpu_hotplug::controller::UnbindController;
use egpu_hotplug::controller::UnbindOutcome;
use egpu_hotplug::dock::BoltClient;
use egpu_hotplug::error::HotplugResult;
use egpu_hotplug::inventory::SysfsInventory;
use egpu_hotplug::occupancy::FuserChecker;
use egpu_hotplug::poll::DotHeartbeat;
use egpu_hotplug::sysfs::FsWriter;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

fn main() -> ExitCode {
    setup_global_hooks();

    let cli = Cli::parse();
    let settings = Settings::from_cli(cli, Settings::debug_from_env());
    utils::logging::init(settings.debug);

    tracing::debug!("egpu-hotplug {}", &**version::VERSION);

    match run(&settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("Error: {report:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(settings: &Settings) -> HotplugResult<()> {
    let inventory = SysfsInventory::new();
    let writer = FsWriter;
    let pattern = &settings.matcher.pattern;

    match &settings.operation {
        Operation::Bind { poll } => {
            if let DockMode::Thunderbolt { uid } = &settings.dock {
                tracing::debug!(uid = %uid, "using Thunderbolt dock");
            }
            let broker = BoltClient;
            BindController::new(&inventory, &broker, &writer).run(
                &settings.matcher,
                &settings.dock,
                *poll,
                &mut DotHeartbeat::default(),
            )?;
            println!("GPU '{pattern}' found");
        }
        Operation::Unbind { safety } => {
            let occupancy = FuserChecker::new();
            match UnbindController::new(&inventory, &occupancy, &writer)
                .run(&settings.matcher, *safety)?
            {
                UnbindOutcome::Skipped => println!("GPU '{pattern}' not found. Nothing to do."),
                UnbindOutcome::Unbound { .. } => {
                    println!("GPU '{pattern}' unbound, please remove the cable.")
                }
            }
        }
        Operation::Completions { shell } => {
            config::write_completions(*shell, &mut std::io::stdout());
        }
    }

    Ok(())
}
