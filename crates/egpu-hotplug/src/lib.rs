//! Hot-plug support for an external GPU behind a Thunderbolt dock.
//!
//! `bind` asks boltd for the dock, rescans the PCI bus segment above it and
//! waits for the GPU driver to pick the card up. `unbind` makes sure nothing
//! holds the render node and detaches the GPU and its audio function from
//! their drivers so the cable can be pulled.

pub mod config;
pub mod controller;
pub mod dock;
pub mod error;
pub mod inventory;
pub mod occupancy;
pub mod pci_ids;
pub mod poll;
pub mod rescan;
pub mod sysfs;
