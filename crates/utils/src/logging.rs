//! provides logging helpers

use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Targets whose warnings are only shown when debugging is enabled.
const QUIET_TARGETS: &[&str] = &["egpu_hotplug::pci_ids", "egpu_hotplug::inventory"];

/// Builds the filter used by [`init`] from `RUST_LOG`.
///
/// `RUST_LOG` directives are applied on top of the defaults, so an explicit
/// directive for a quiet target still wins.
pub fn env_filter(debug: bool) -> filter::EnvFilter {
    let rust_log = std::env::var(filter::EnvFilter::DEFAULT_ENV).unwrap_or_default();
    filter_with_overrides(debug, &rust_log)
}

fn filter_with_overrides(debug: bool, overrides: &str) -> filter::EnvFilter {
    let default_level = if debug {
        filter::LevelFilter::DEBUG
    } else {
        filter::LevelFilter::INFO
    };

    let mut directives = vec![default_level.to_string()];
    if !debug {
        directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=error")));
    }
    // later directives for the same target replace earlier ones
    directives.push(overrides.to_string());

    filter::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .parse_lossy(directives.join(","))
}

/// initiate the global tracing subscriber
pub fn init(debug: bool) {
    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(debug)
        .with_filter(env_filter(debug));

    registry().with(fmt_layer).init();
}
