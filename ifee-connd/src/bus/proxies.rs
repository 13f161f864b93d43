//! Hand declared proxies for the parts of ModemManager and NetworkManager the
//! daemon talks to.
//!
//! To poke at the same objects by hand:
//!
//! ```shell
//! $ busctl introspect \
//!     org.freedesktop.ModemManager1 \
//!     /org/freedesktop/ModemManager1/Modem/0 \
//!     org.freedesktop.ModemManager1.Modem
//! $ busctl call \
//!     org.freedesktop.NetworkManager \
//!     /org/freedesktop/NetworkManager/Settings \
//!     org.freedesktop.NetworkManager.Settings ListConnections
//! $ busctl get-property \
//!     org.freedesktop.NetworkManager \
//!     /org/freedesktop/NetworkManager \
//!     org.freedesktop.NetworkManager ActiveConnections
//! ```
use std::collections::HashMap;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue};

#[zbus::proxy(
    interface = "org.freedesktop.ModemManager1.Modem",
    default_service = "org.freedesktop.ModemManager1"
)]
pub trait Modem {
    fn enable(&self, enable: bool) -> zbus::Result<()>;
    fn reset(&self) -> zbus::Result<()>;
    fn set_power_state(&self, state: u32) -> zbus::Result<()>;

    #[zbus(property)]
    fn sim(&self) -> zbus::Result<OwnedObjectPath>;
    #[zbus(property)]
    fn manufacturer(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn model(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn revision(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn device(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn primary_port(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn ports(&self) -> zbus::Result<Vec<(String, u32)>>;
    #[zbus(property)]
    fn equipment_identifier(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn state(&self) -> zbus::Result<i32>;
    #[zbus(property)]
    fn state_failed_reason(&self) -> zbus::Result<u32>;
    #[zbus(property)]
    fn signal_quality(&self) -> zbus::Result<(u32, bool)>;
    #[zbus(property)]
    fn power_state(&self) -> zbus::Result<u32>;
    #[zbus(property)]
    fn access_technologies(&self) -> zbus::Result<u32>;
}

#[zbus::proxy(
    interface = "org.freedesktop.ModemManager1.Modem.Signal",
    default_service = "org.freedesktop.ModemManager1"
)]
pub trait Signal {
    fn setup(&self, rate: u32) -> zbus::Result<()>;

    #[zbus(property)]
    fn gsm(&self) -> zbus::Result<HashMap<String, OwnedValue>>;
    #[zbus(property)]
    fn umts(&self) -> zbus::Result<HashMap<String, OwnedValue>>;
    #[zbus(property)]
    fn lte(&self) -> zbus::Result<HashMap<String, OwnedValue>>;
    #[zbus(property)]
    fn cdma(&self) -> zbus::Result<HashMap<String, OwnedValue>>;
    #[zbus(property)]
    fn evdo(&self) -> zbus::Result<HashMap<String, OwnedValue>>;
}

#[zbus::proxy(
    interface = "org.freedesktop.NetworkManager",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager"
)]
pub trait NetworkManager {
    fn activate_connection(
        &self,
        connection: &ObjectPath<'_>,
        device: &ObjectPath<'_>,
        specific_object: &ObjectPath<'_>,
    ) -> zbus::Result<OwnedObjectPath>;

    fn deactivate_connection(&self, active_connection: &ObjectPath<'_>) -> zbus::Result<()>;

    #[zbus(property)]
    fn active_connections(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
}

#[zbus::proxy(
    interface = "org.freedesktop.NetworkManager.Settings",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager/Settings"
)]
pub trait Settings {
    fn list_connections(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
}

#[zbus::proxy(
    interface = "org.freedesktop.NetworkManager.Settings.Connection",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait SettingsConnection {
    fn get_settings(&self) -> zbus::Result<HashMap<String, HashMap<String, OwnedValue>>>;

    fn update(&self, properties: HashMap<String, HashMap<String, OwnedValue>>) -> zbus::Result<()>;
}

#[zbus::proxy(
    interface = "org.freedesktop.NetworkManager.Connection.Active",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait ActiveConnection {
    #[zbus(property)]
    fn connection(&self) -> zbus::Result<OwnedObjectPath>;
}
