//! Thunderbolt dock lookup through the `boltd` authorization broker.
//!
//! The broker is queried over the system D-Bus:
//!
//! 1. `org.freedesktop.DBus.GetNameOwner("org.freedesktop.bolt")`
//! 2. `org.freedesktop.bolt1.Manager.DeviceByUid(uid)` on `/org/freedesktop/bolt`
//! 3. `org.freedesktop.DBus.Properties.GetAll("org.freedesktop.bolt1.Device")`
//!    on the returned device object
//!
//! Only the `SysfsPath` and `Status` properties are used.

use std::collections::HashMap;
use std::path::PathBuf;

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use zbus::blocking::fdo::DBusProxy;
use zbus::blocking::fdo::PropertiesProxy;
use zbus::blocking::Connection;
use zbus::blocking::Proxy;
use zbus::names::BusName;
use zbus::names::InterfaceName;
use zbus::zvariant::OwnedObjectPath;
use zbus::zvariant::OwnedValue;

use crate::error::HotplugError;
use crate::error::HotplugResult;

pub const BOLT_SERVICE: &str = "org.freedesktop.bolt";
pub const BOLT_MANAGER_PATH: &str = "/org/freedesktop/bolt";
pub const BOLT_MANAGER_INTERFACE: &str = "org.freedesktop.bolt1.Manager";
pub const BOLT_DEVICE_INTERFACE: &str = "org.freedesktop.bolt1.Device";

const SYSFS_PATH_PROPERTY: &str = "SysfsPath";
const STATUS_PROPERTY: &str = "Status";

/// Device status as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum DockStatus {
    #[display("authorized")]
    Authorized,
    #[display("connected")]
    Connected,
    #[display("connecting")]
    Connecting,
    #[display("authorizing")]
    Authorizing,
    #[display("auth-error")]
    AuthError,
    #[display("disconnected")]
    Disconnected,
    #[display("{_0}")]
    Other(String),
}

impl DockStatus {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized)
    }
}

impl From<&str> for DockStatus {
    fn from(s: &str) -> Self {
        match s {
            "authorized" => Self::Authorized,
            "connected" => Self::Connected,
            "connecting" => Self::Connecting,
            "authorizing" => Self::Authorizing,
            "auth-error" => Self::AuthError,
            "disconnected" => Self::Disconnected,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A dock resolved for one bind invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockDevice {
    pub sysfs_path: PathBuf,
    pub status: DockStatus,
}

impl DockDevice {
    pub fn authorized(&self) -> bool {
        self.status.is_authorized()
    }

    /// Builds a dock from the broker's `SysfsPath` and `Status` properties.
    pub fn from_properties(
        sysfs_path: Option<String>,
        status: Option<String>,
    ) -> HotplugResult<Self> {
        let sysfs_path = sysfs_path.ok_or_else(|| {
            Report::new(HotplugError::resolution(format!(
                "device has no {SYSFS_PATH_PROPERTY} property"
            )))
        })?;
        let status = status.ok_or_else(|| {
            Report::new(HotplugError::resolution(format!(
                "device has no {STATUS_PROPERTY} property"
            )))
        })?;

        Ok(Self {
            sysfs_path: PathBuf::from(sysfs_path),
            status: DockStatus::from(status.as_str()),
        })
    }
}

/// Resolves a Thunderbolt device uid to its dock.
pub trait DockAuthorization {
    fn resolve_dock(&self, uid: &str) -> HotplugResult<DockDevice>;
}

/// [`DockAuthorization`] talking to `boltd` over the system bus.
///
/// A fresh connection is opened for every lookup and dropped when it ends.
#[derive(Debug, Default, Clone, Copy)]
pub struct BoltClient;

impl BoltClient {
    fn lookup(&self, connection: &Connection, uid: &str) -> HotplugResult<DockDevice> {
        let dbus = DBusProxy::new(connection)
            .change_context(HotplugError::resolution("cannot create D-Bus proxy"))?;
        let service = BusName::try_from(BOLT_SERVICE)
            .change_context(HotplugError::resolution("invalid broker service name"))?;
        let owner = dbus
            .get_name_owner(service)
            .change_context(HotplugError::resolution(format!(
                "GetNameOwner failed for {BOLT_SERVICE}"
            )))?;
        debug!(owner = %owner, "resolved authorization broker");

        let manager = Proxy::new(
            connection,
            owner.to_string(),
            BOLT_MANAGER_PATH,
            BOLT_MANAGER_INTERFACE,
        )
        .change_context(HotplugError::resolution("cannot create broker manager proxy"))?;
        let device: OwnedObjectPath = manager
            .call("DeviceByUid", &(uid,))
            .change_context(HotplugError::resolution(format!(
                "{BOLT_MANAGER_INTERFACE}.DeviceByUid failed"
            )))
            .attach_printable_lazy(|| format!("uid: {uid}"))?;
        debug!(object = %device.as_str(), "resolved Thunderbolt device object");

        let properties = PropertiesProxy::builder(connection)
            .destination(owner.to_string())
            .and_then(|builder| builder.path(device.as_str()))
            .and_then(|builder| builder.build())
            .change_context(HotplugError::resolution("cannot create properties proxy"))?;
        let interface = InterfaceName::try_from(BOLT_DEVICE_INTERFACE)
            .change_context(HotplugError::resolution("invalid device interface name"))?;
        let mut all: HashMap<String, OwnedValue> = properties
            .get_all(Some(interface).into())
            .change_context(HotplugError::resolution(
                "org.freedesktop.DBus.Properties.GetAll failed",
            ))?;

        DockDevice::from_properties(
            take_string(&mut all, SYSFS_PATH_PROPERTY),
            take_string(&mut all, STATUS_PROPERTY),
        )
    }
}

impl DockAuthorization for BoltClient {
    #[tracing::instrument(level = "debug", skip(self))]
    fn resolve_dock(&self, uid: &str) -> HotplugResult<DockDevice> {
        let connection = Connection::system()
            .change_context(HotplugError::resolution("cannot connect to the system bus"))?;
        self.lookup(&connection, uid)
    }
}

fn take_string(properties: &mut HashMap<String, OwnedValue>, name: &str) -> Option<String> {
    let value = properties.remove(name)?;
    String::try_from(value)
        .map_err(|e| debug!(property = name, error = %e, "property is not a string"))
        .ok()
}
