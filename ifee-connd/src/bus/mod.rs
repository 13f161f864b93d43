//! Typed access to the three system services the daemon depends on:
//! ModemManager, NetworkManager and systemd.
//!
//! Every call either succeeds or fails with a [`ServiceError`]. Nothing here
//! retries; retry policy belongs to the callers.
use async_trait::async_trait;
use proxies::{
    ActiveConnectionProxy, ModemProxy, NetworkManagerProxy, SettingsConnectionProxy,
    SettingsProxy, SignalProxy,
};
use std::collections::HashMap;
use zbus::{
    fdo::ObjectManagerProxy,
    zvariant::{ObjectPath, OwnedObjectPath, OwnedValue},
};
use zbus_systemd::systemd1;

#[cfg(test)]
pub mod fake;
pub mod proxies;

pub const MM_SERVICE: &str = "org.freedesktop.ModemManager1";
pub const MM_PATH: &str = "/org/freedesktop/ModemManager1";
pub const NM_SERVICE: &str = "org.freedesktop.NetworkManager";
pub const SYSTEMD_SERVICE: &str = "org.freedesktop.systemd1";

/// Connection settings as returned by `GetSettings`, keyed by setting name
/// (`connection`, `gsm`, `vpn`, ...) and then by property.
pub type Settings = HashMap<String, HashMap<String, OwnedValue>>;

/// Orders object paths by their trailing numeric index, so `Modem/10` comes
/// after `Modem/2`. Paths without one go first, in their original order.
fn sort_by_index(paths: &mut [OwnedObjectPath]) {
    paths.sort_by_key(|p| p.as_str().rsplit('/').next()?.parse::<u32>().ok());
}

#[derive(Debug, thiserror::Error)]
#[error("{operation} failed: {cause}")]
pub struct ServiceError {
    pub operation: String,
    #[source]
    pub cause: zbus::Error,
}

impl ServiceError {
    pub fn new(operation: impl Into<String>, cause: impl Into<zbus::Error>) -> Self {
        Self {
            operation: operation.into(),
            cause: cause.into(),
        }
    }
}

trait OpExt<T> {
    fn op(self, operation: &str) -> Result<T, ServiceError>;
}

impl<T, E: Into<zbus::Error>> OpExt<T> for Result<T, E> {
    fn op(self, operation: &str) -> Result<T, ServiceError> {
        self.map_err(|e| ServiceError::new(operation, e))
    }
}

/// Raw property values of a `org.freedesktop.ModemManager1.Modem` object.
/// Enumerations are left as the integers found on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawModemProperties {
    pub sim: String,
    pub manufacturer: String,
    pub model: String,
    pub revision: String,
    pub device: String,
    pub primary_port: String,
    pub ports: Vec<(String, u32)>,
    pub equipment_identifier: String,
    pub state: i32,
    pub state_failed_reason: u32,
    pub signal_quality: u32,
    pub power_state: u32,
    pub access_technologies: u32,
}

/// Access technologies exposed by the `Modem.Signal` interface, in the order
/// they are probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTech {
    Gsm,
    Umts,
    Lte,
    Cdma,
    Evdo,
}

impl SignalTech {
    pub const PROBE_ORDER: [SignalTech; 5] = [
        SignalTech::Gsm,
        SignalTech::Umts,
        SignalTech::Lte,
        SignalTech::Cdma,
        SignalTech::Evdo,
    ];
}

#[async_trait]
pub trait ModemBus: 'static + Send + Sync {
    async fn list_modems(&self) -> Result<Vec<OwnedObjectPath>, ServiceError>;

    async fn modem_properties(
        &self,
        modem: &OwnedObjectPath,
    ) -> Result<RawModemProperties, ServiceError>;

    async fn enable(&self, modem: &OwnedObjectPath, enable: bool) -> Result<(), ServiceError>;

    async fn reset(&self, modem: &OwnedObjectPath) -> Result<(), ServiceError>;

    async fn set_power_state(
        &self,
        modem: &OwnedObjectPath,
        state: u32,
    ) -> Result<(), ServiceError>;

    async fn signal_setup(&self, modem: &OwnedObjectPath, rate_secs: u32)
        -> Result<(), ServiceError>;

    async fn signal_readings(
        &self,
        modem: &OwnedObjectPath,
        tech: SignalTech,
    ) -> Result<HashMap<String, f64>, ServiceError>;
}

#[async_trait]
pub trait NetworkBus: 'static + Send + Sync {
    async fn list_connections(&self) -> Result<Vec<OwnedObjectPath>, ServiceError>;

    async fn connection_settings(
        &self,
        connection: &OwnedObjectPath,
    ) -> Result<Settings, ServiceError>;

    async fn update_connection_settings(
        &self,
        connection: &OwnedObjectPath,
        settings: Settings,
    ) -> Result<(), ServiceError>;

    async fn active_connections(&self) -> Result<Vec<OwnedObjectPath>, ServiceError>;

    /// Resolves an active connection back to the settings object it was
    /// activated from.
    async fn active_connection_origin(
        &self,
        active: &OwnedObjectPath,
    ) -> Result<OwnedObjectPath, ServiceError>;

    async fn activate_connection(
        &self,
        connection: &OwnedObjectPath,
    ) -> Result<OwnedObjectPath, ServiceError>;

    async fn deactivate_connection(&self, active: &OwnedObjectPath) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait UnitBus: 'static + Send + Sync {
    async fn load_unit(&self, name: &str) -> Result<OwnedObjectPath, ServiceError>;

    async fn unit_sub_state(&self, unit: &OwnedObjectPath) -> Result<String, ServiceError>;

    async fn unit_file_state(&self, unit: &OwnedObjectPath) -> Result<String, ServiceError>;

    async fn start_unit(&self, name: &str, mode: &str) -> Result<(), ServiceError>;

    async fn stop_unit(&self, name: &str, mode: &str) -> Result<(), ServiceError>;

    async fn enable_unit_files(&self, names: &[String]) -> Result<(), ServiceError>;

    async fn disable_unit_files(&self, names: &[String]) -> Result<(), ServiceError>;

    async fn reload(&self) -> Result<(), ServiceError>;
}

/// System bus client implementing every bus trait over one zbus connection.
#[derive(Clone)]
pub struct ServiceBus {
    conn: zbus::Connection,
}

impl ServiceBus {
    pub fn new(conn: zbus::Connection) -> Self {
        Self { conn }
    }

    async fn modem(&self, path: &OwnedObjectPath) -> Result<ModemProxy<'static>, ServiceError> {
        ModemProxy::builder(&self.conn)
            .path(path.clone())
            .op("Modem.path")?
            .build()
            .await
            .op("Modem.resolve")
    }

    async fn signal(
        &self,
        path: &OwnedObjectPath,
    ) -> Result<SignalProxy<'static>, ServiceError> {
        SignalProxy::builder(&self.conn)
            .path(path.clone())
            .op("Signal.path")?
            .build()
            .await
            .op("Signal.resolve")
    }

    async fn settings_connection(
        &self,
        path: &OwnedObjectPath,
    ) -> Result<SettingsConnectionProxy<'static>, ServiceError> {
        SettingsConnectionProxy::builder(&self.conn)
            .path(path.clone())
            .op("Settings.Connection.path")?
            .build()
            .await
            .op("Settings.Connection.resolve")
    }

    async fn systemd(&self) -> Result<systemd1::ManagerProxy<'static>, ServiceError> {
        systemd1::ManagerProxy::new(&self.conn)
            .await
            .op("systemd1.Manager.resolve")
    }

    async fn unit(
        &self,
        path: &OwnedObjectPath,
    ) -> Result<systemd1::UnitProxy<'static>, ServiceError> {
        systemd1::UnitProxy::builder(&self.conn)
            .destination(SYSTEMD_SERVICE)
            .op("systemd1.Unit.destination")?
            .path(path.clone())
            .op("systemd1.Unit.path")?
            .build()
            .await
            .op("systemd1.Unit.resolve")
    }
}

#[async_trait]
impl ModemBus for ServiceBus {
    async fn list_modems(&self) -> Result<Vec<OwnedObjectPath>, ServiceError> {
        let om = ObjectManagerProxy::builder(&self.conn)
            .destination(MM_SERVICE)
            .op("ObjectManager.destination")?
            .path(MM_PATH)
            .op("ObjectManager.path")?
            .build()
            .await
            .op("ObjectManager.resolve")?;

        let objects = om
            .get_managed_objects()
            .await
            .op("ObjectManager.GetManagedObjects")?;

        let mut modems: Vec<_> = objects.into_keys().collect();
        sort_by_index(&mut modems);

        Ok(modems)
    }

    async fn modem_properties(
        &self,
        modem: &OwnedObjectPath,
    ) -> Result<RawModemProperties, ServiceError> {
        let m = self.modem(modem).await?;

        Ok(RawModemProperties {
            sim: m.sim().await.op("Modem.Sim")?.to_string(),
            manufacturer: m.manufacturer().await.op("Modem.Manufacturer")?,
            model: m.model().await.op("Modem.Model")?,
            revision: m.revision().await.op("Modem.Revision")?,
            device: m.device().await.op("Modem.Device")?,
            primary_port: m.primary_port().await.op("Modem.PrimaryPort")?,
            ports: m.ports().await.op("Modem.Ports")?,
            equipment_identifier: m
                .equipment_identifier()
                .await
                .op("Modem.EquipmentIdentifier")?,
            state: m.state().await.op("Modem.State")?,
            state_failed_reason: m
                .state_failed_reason()
                .await
                .op("Modem.StateFailedReason")?,
            signal_quality: m.signal_quality().await.op("Modem.SignalQuality")?.0,
            power_state: m.power_state().await.op("Modem.PowerState")?,
            access_technologies: m
                .access_technologies()
                .await
                .op("Modem.AccessTechnologies")?,
        })
    }

    async fn enable(&self, modem: &OwnedObjectPath, enable: bool) -> Result<(), ServiceError> {
        self.modem(modem)
            .await?
            .enable(enable)
            .await
            .op("Modem.Enable")
    }

    async fn reset(&self, modem: &OwnedObjectPath) -> Result<(), ServiceError> {
        self.modem(modem).await?.reset().await.op("Modem.Reset")
    }

    async fn set_power_state(
        &self,
        modem: &OwnedObjectPath,
        state: u32,
    ) -> Result<(), ServiceError> {
        self.modem(modem)
            .await?
            .set_power_state(state)
            .await
            .op("Modem.SetPowerState")
    }

    async fn signal_setup(
        &self,
        modem: &OwnedObjectPath,
        rate_secs: u32,
    ) -> Result<(), ServiceError> {
        self.signal(modem)
            .await?
            .setup(rate_secs)
            .await
            .op("Signal.Setup")
    }

    async fn signal_readings(
        &self,
        modem: &OwnedObjectPath,
        tech: SignalTech,
    ) -> Result<HashMap<String, f64>, ServiceError> {
        let s = self.signal(modem).await?;
        let raw = match tech {
            SignalTech::Gsm => s.gsm().await.op("Signal.Gsm")?,
            SignalTech::Umts => s.umts().await.op("Signal.Umts")?,
            SignalTech::Lte => s.lte().await.op("Signal.Lte")?,
            SignalTech::Cdma => s.cdma().await.op("Signal.Cdma")?,
            SignalTech::Evdo => s.evdo().await.op("Signal.Evdo")?,
        };

        let readings = raw
            .into_iter()
            .filter_map(|(k, v)| v.downcast_ref::<f64>().ok().map(|v| (k, v)))
            .collect();

        Ok(readings)
    }
}

#[async_trait]
impl NetworkBus for ServiceBus {
    async fn list_connections(&self) -> Result<Vec<OwnedObjectPath>, ServiceError> {
        SettingsProxy::new(&self.conn)
            .await
            .op("Settings.resolve")?
            .list_connections()
            .await
            .op("Settings.ListConnections")
    }

    async fn connection_settings(
        &self,
        connection: &OwnedObjectPath,
    ) -> Result<Settings, ServiceError> {
        self.settings_connection(connection)
            .await?
            .get_settings()
            .await
            .op("Settings.Connection.GetSettings")
    }

    async fn update_connection_settings(
        &self,
        connection: &OwnedObjectPath,
        settings: Settings,
    ) -> Result<(), ServiceError> {
        self.settings_connection(connection)
            .await?
            .update(settings)
            .await
            .op("Settings.Connection.Update")
    }

    async fn active_connections(&self) -> Result<Vec<OwnedObjectPath>, ServiceError> {
        NetworkManagerProxy::new(&self.conn)
            .await
            .op("NetworkManager.resolve")?
            .active_connections()
            .await
            .op("NetworkManager.ActiveConnections")
    }

    async fn active_connection_origin(
        &self,
        active: &OwnedObjectPath,
    ) -> Result<OwnedObjectPath, ServiceError> {
        ActiveConnectionProxy::builder(&self.conn)
            .path(active.clone())
            .op("Connection.Active.path")?
            .build()
            .await
            .op("Connection.Active.resolve")?
            .connection()
            .await
            .op("Connection.Active.Connection")
    }

    async fn activate_connection(
        &self,
        connection: &OwnedObjectPath,
    ) -> Result<OwnedObjectPath, ServiceError> {
        let root = ObjectPath::from_static_str_unchecked("/");

        NetworkManagerProxy::new(&self.conn)
            .await
            .op("NetworkManager.resolve")?
            .activate_connection(connection, &root, &root)
            .await
            .op("NetworkManager.ActivateConnection")
    }

    async fn deactivate_connection(&self, active: &OwnedObjectPath) -> Result<(), ServiceError> {
        NetworkManagerProxy::new(&self.conn)
            .await
            .op("NetworkManager.resolve")?
            .deactivate_connection(active)
            .await
            .op("NetworkManager.DeactivateConnection")
    }
}

#[async_trait]
impl UnitBus for ServiceBus {
    async fn load_unit(&self, name: &str) -> Result<OwnedObjectPath, ServiceError> {
        self.systemd()
            .await?
            .load_unit(name.to_string())
            .await
            .op("systemd1.Manager.LoadUnit")
    }

    async fn unit_sub_state(&self, unit: &OwnedObjectPath) -> Result<String, ServiceError> {
        self.unit(unit)
            .await?
            .sub_state()
            .await
            .op("systemd1.Unit.SubState")
    }

    async fn unit_file_state(&self, unit: &OwnedObjectPath) -> Result<String, ServiceError> {
        self.unit(unit)
            .await?
            .unit_file_state()
            .await
            .op("systemd1.Unit.UnitFileState")
    }

    async fn start_unit(&self, name: &str, mode: &str) -> Result<(), ServiceError> {
        self.systemd()
            .await?
            .start_unit(name.to_string(), mode.to_string())
            .await
            .map(|_job| ())
            .op("systemd1.Manager.StartUnit")
    }

    async fn stop_unit(&self, name: &str, mode: &str) -> Result<(), ServiceError> {
        self.systemd()
            .await?
            .stop_unit(name.to_string(), mode.to_string())
            .await
            .map(|_job| ())
            .op("systemd1.Manager.StopUnit")
    }

    async fn enable_unit_files(&self, names: &[String]) -> Result<(), ServiceError> {
        self.systemd()
            .await?
            .enable_unit_files(names.to_vec(), false, true)
            .await
            .map(|_changes| ())
            .op("systemd1.Manager.EnableUnitFiles")
    }

    async fn disable_unit_files(&self, names: &[String]) -> Result<(), ServiceError> {
        self.systemd()
            .await?
            .disable_unit_files(names.to_vec(), false)
            .await
            .map(|_changes| ())
            .op("systemd1.Manager.DisableUnitFiles")
    }

    async fn reload(&self) -> Result<(), ServiceError> {
        self.systemd()
            .await?
            .reload()
            .await
            .op("systemd1.Manager.Reload")
    }
}
