//! In-memory stand-in for ModemManager, NetworkManager and systemd that keeps
//! a log of every mutating call, so tests can assert cross-component ordering.
use super::{
    ModemBus, NetworkBus, RawModemProperties, ServiceError, Settings, SignalTech, UnitBus,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ModemEnable(bool),
    ModemPower(u32),
    ModemReset,
    Autoconnect(String, bool),
    Activate(String),
    Deactivate(String),
    UnitStart(String),
    UnitStop(String),
    UnitEnable(String),
    UnitDisable(String),
}

struct FakeConnection {
    id: String,
    path: OwnedObjectPath,
    autoconnect: Option<bool>,
    active: Option<OwnedObjectPath>,
    fail_activation: bool,
    /// Activated but not yet reported as active: remaining polls, path.
    pending: Option<(u32, OwnedObjectPath)>,
    activation_polls: u32,
}

struct FakeUnit {
    sub_state: String,
    file_state: String,
}

#[derive(Default)]
struct Inner {
    modems: Vec<(OwnedObjectPath, RawModemProperties)>,
    modems_unreachable: bool,
    fail_modem_enable: bool,
    signal: HashMap<String, f64>,
    connections: Vec<FakeConnection>,
    units: HashMap<String, FakeUnit>,
    activations: u32,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct FakeBus {
    inner: Mutex<Inner>,
}

fn failure(operation: &str) -> ServiceError {
    ServiceError::new(operation, zbus::Error::Failure("fake failure".to_string()))
}

fn path(p: String) -> OwnedObjectPath {
    OwnedObjectPath::try_from(p).unwrap()
}

fn owned(v: Value<'_>) -> OwnedValue {
    OwnedValue::try_from(v).unwrap()
}

impl FakeBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Adds a modem that is powered low and disabled.
    pub fn with_modem(self: Arc<Self>, index: u32) -> Arc<Self> {
        let props = RawModemProperties {
            manufacturer: "Quectel".to_string(),
            model: "EG25".to_string(),
            equipment_identifier: format!("35000000000000{index}"),
            state: 3,
            power_state: 2,
            signal_quality: 60,
            access_technologies: 16384,
            ..Default::default()
        };
        self.lock().modems.push((
            path(format!("/org/freedesktop/ModemManager1/Modem/{index}")),
            props,
        ));

        self
    }

    pub fn with_connection(self: Arc<Self>, id: &str) -> Arc<Self> {
        {
            let mut inner = self.lock();
            let n = inner.connections.len();
            inner.connections.push(FakeConnection {
                id: id.to_string(),
                path: path(format!("/org/freedesktop/NetworkManager/Settings/{n}")),
                autoconnect: None,
                active: None,
                fail_activation: false,
                pending: None,
                activation_polls: 0,
            });
        }

        self
    }

    pub fn with_unit(self: Arc<Self>, name: &str, sub_state: &str, file_state: &str) -> Arc<Self> {
        self.lock().units.insert(
            name.to_string(),
            FakeUnit {
                sub_state: sub_state.to_string(),
                file_state: file_state.to_string(),
            },
        );

        self
    }

    pub fn with_signal(self: Arc<Self>, readings: &[(&str, f64)]) -> Arc<Self> {
        self.lock().signal = readings
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();

        self
    }

    pub fn set_modem_state(&self, index: usize, state: i32, power_state: u32) {
        let mut inner = self.lock();
        inner.modems[index].1.state = state;
        inner.modems[index].1.power_state = power_state;
    }

    pub fn modem_state(&self, index: usize) -> (i32, u32) {
        let inner = self.lock();
        (inner.modems[index].1.state, inner.modems[index].1.power_state)
    }

    pub fn modems_unreachable(&self) {
        self.lock().modems_unreachable = true;
    }

    pub fn fail_modem_enable(&self) {
        self.lock().fail_modem_enable = true;
    }

    pub fn fail_activation(&self, id: &str) {
        if let Some(c) = self.lock().connections.iter_mut().find(|c| c.id == id) {
            c.fail_activation = true;
        }
    }

    /// The connection shows up as active only on the `polls`-th listing of
    /// active connections after it was activated.
    pub fn activate_after(&self, id: &str, polls: u32) {
        if let Some(c) = self.lock().connections.iter_mut().find(|c| c.id == id) {
            c.activation_polls = polls;
        }
    }

    pub fn connection_path(&self, id: &str) -> OwnedObjectPath {
        self.lock()
            .connections
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.path.clone())
            .unwrap()
    }

    pub fn autoconnect(&self, id: &str) -> Option<bool> {
        self.lock()
            .connections
            .iter()
            .find(|c| c.id == id)
            .and_then(|c| c.autoconnect)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.lock()
            .connections
            .iter()
            .any(|c| c.id == id && c.active.is_some())
    }

    pub fn unit_states(&self, name: &str) -> Option<(String, String)> {
        self.lock()
            .units
            .get(name)
            .map(|u| (u.sub_state.clone(), u.file_state.clone()))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

#[async_trait]
impl ModemBus for FakeBus {
    async fn list_modems(&self) -> Result<Vec<OwnedObjectPath>, ServiceError> {
        let inner = self.lock();
        if inner.modems_unreachable {
            return Err(failure("ObjectManager.GetManagedObjects"));
        }

        Ok(inner.modems.iter().map(|(p, _)| p.clone()).collect())
    }

    async fn modem_properties(
        &self,
        modem: &OwnedObjectPath,
    ) -> Result<RawModemProperties, ServiceError> {
        let inner = self.lock();
        if inner.modems_unreachable {
            return Err(failure("Modem.State"));
        }

        inner
            .modems
            .iter()
            .find(|(p, _)| p == modem)
            .map(|(_, props)| props.clone())
            .ok_or_else(|| failure("Modem.resolve"))
    }

    async fn enable(&self, modem: &OwnedObjectPath, enable: bool) -> Result<(), ServiceError> {
        let mut inner = self.lock();
        inner.calls.push(Call::ModemEnable(enable));
        if inner.fail_modem_enable {
            return Err(failure("Modem.Enable"));
        }

        if let Some((_, props)) = inner.modems.iter_mut().find(|(p, _)| p == modem) {
            props.state = if enable { 6 } else { 3 };
        }

        Ok(())
    }

    async fn reset(&self, _modem: &OwnedObjectPath) -> Result<(), ServiceError> {
        let mut inner = self.lock();
        inner.calls.push(Call::ModemReset);
        if inner.modems_unreachable {
            return Err(failure("Modem.Reset"));
        }

        Ok(())
    }

    async fn set_power_state(
        &self,
        modem: &OwnedObjectPath,
        state: u32,
    ) -> Result<(), ServiceError> {
        let mut inner = self.lock();
        inner.calls.push(Call::ModemPower(state));
        if let Some((_, props)) = inner.modems.iter_mut().find(|(p, _)| p == modem) {
            props.power_state = state;
        }

        Ok(())
    }

    async fn signal_setup(
        &self,
        _modem: &OwnedObjectPath,
        _rate_secs: u32,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn signal_readings(
        &self,
        _modem: &OwnedObjectPath,
        tech: SignalTech,
    ) -> Result<HashMap<String, f64>, ServiceError> {
        match tech {
            SignalTech::Lte => Ok(self.lock().signal.clone()),
            _ => Ok(HashMap::new()),
        }
    }
}

#[async_trait]
impl NetworkBus for FakeBus {
    async fn list_connections(&self) -> Result<Vec<OwnedObjectPath>, ServiceError> {
        Ok(self.lock().connections.iter().map(|c| c.path.clone()).collect())
    }

    async fn connection_settings(
        &self,
        connection: &OwnedObjectPath,
    ) -> Result<Settings, ServiceError> {
        let inner = self.lock();
        let conn = inner
            .connections
            .iter()
            .find(|c| &c.path == connection)
            .ok_or_else(|| failure("Settings.Connection.GetSettings"))?;

        let mut section = HashMap::new();
        section.insert("id".to_string(), owned(Value::from(conn.id.clone())));
        if let Some(ac) = conn.autoconnect {
            section.insert("autoconnect".to_string(), owned(Value::from(ac)));
        }

        Ok(HashMap::from([("connection".to_string(), section)]))
    }

    async fn update_connection_settings(
        &self,
        connection: &OwnedObjectPath,
        settings: Settings,
    ) -> Result<(), ServiceError> {
        let autoconnect = settings
            .get("connection")
            .and_then(|c| c.get("autoconnect"))
            .and_then(|v| v.downcast_ref::<bool>().ok());

        let mut inner = self.lock();
        let conn = inner
            .connections
            .iter_mut()
            .find(|c| &c.path == connection)
            .ok_or_else(|| failure("Settings.Connection.Update"))?;
        conn.autoconnect = autoconnect;
        let id = conn.id.clone();

        if let Some(ac) = autoconnect {
            inner.calls.push(Call::Autoconnect(id, ac));
        }

        Ok(())
    }

    async fn active_connections(&self) -> Result<Vec<OwnedObjectPath>, ServiceError> {
        let mut inner = self.lock();
        for conn in inner.connections.iter_mut() {
            let Some((polls, active)) = conn.pending.take() else {
                continue;
            };
            if polls <= 1 {
                conn.active = Some(active);
            } else {
                conn.pending = Some((polls - 1, active));
            }
        }

        Ok(inner.connections.iter().filter_map(|c| c.active.clone()).collect())
    }

    async fn active_connection_origin(
        &self,
        active: &OwnedObjectPath,
    ) -> Result<OwnedObjectPath, ServiceError> {
        self.lock()
            .connections
            .iter()
            .find(|c| c.active.as_ref() == Some(active))
            .map(|c| c.path.clone())
            .ok_or_else(|| failure("Connection.Active.Connection"))
    }

    async fn activate_connection(
        &self,
        connection: &OwnedObjectPath,
    ) -> Result<OwnedObjectPath, ServiceError> {
        let mut inner = self.lock();
        inner.activations += 1;
        let active = path(format!(
            "/org/freedesktop/NetworkManager/ActiveConnection/{}",
            inner.activations
        ));

        let conn = inner
            .connections
            .iter_mut()
            .find(|c| &c.path == connection)
            .ok_or_else(|| failure("NetworkManager.ActivateConnection"))?;
        let id = conn.id.clone();
        let fail = conn.fail_activation;
        if !fail {
            if conn.activation_polls > 0 {
                conn.pending = Some((conn.activation_polls, active.clone()));
            } else {
                conn.active = Some(active.clone());
            }
        }

        inner.calls.push(Call::Activate(id));
        if fail {
            return Err(failure("NetworkManager.ActivateConnection"));
        }

        Ok(active)
    }

    async fn deactivate_connection(&self, active: &OwnedObjectPath) -> Result<(), ServiceError> {
        let mut inner = self.lock();
        let conn = inner
            .connections
            .iter_mut()
            .find(|c| c.active.as_ref() == Some(active))
            .ok_or_else(|| failure("NetworkManager.DeactivateConnection"))?;
        conn.active = None;
        let id = conn.id.clone();
        inner.calls.push(Call::Deactivate(id));

        Ok(())
    }
}

#[async_trait]
impl UnitBus for FakeBus {
    async fn load_unit(&self, name: &str) -> Result<OwnedObjectPath, ServiceError> {
        if !self.lock().units.contains_key(name) {
            return Err(failure("systemd1.Manager.LoadUnit"));
        }

        let escaped = name.replace(['.', '-'], "_");
        Ok(path(format!("/org/freedesktop/systemd1/unit/{escaped}")))
    }

    async fn unit_sub_state(&self, unit: &OwnedObjectPath) -> Result<String, ServiceError> {
        let inner = self.lock();
        inner
            .units
            .iter()
            .find(|(name, _)| unit.as_str().ends_with(&name.replace(['.', '-'], "_")))
            .map(|(_, u)| u.sub_state.clone())
            .ok_or_else(|| failure("systemd1.Unit.SubState"))
    }

    async fn unit_file_state(&self, unit: &OwnedObjectPath) -> Result<String, ServiceError> {
        let inner = self.lock();
        inner
            .units
            .iter()
            .find(|(name, _)| unit.as_str().ends_with(&name.replace(['.', '-'], "_")))
            .map(|(_, u)| u.file_state.clone())
            .ok_or_else(|| failure("systemd1.Unit.UnitFileState"))
    }

    async fn start_unit(&self, name: &str, _mode: &str) -> Result<(), ServiceError> {
        let mut inner = self.lock();
        inner.calls.push(Call::UnitStart(name.to_string()));
        let unit = inner
            .units
            .get_mut(name)
            .ok_or_else(|| failure("systemd1.Manager.StartUnit"))?;
        unit.sub_state = "running".to_string();

        Ok(())
    }

    async fn stop_unit(&self, name: &str, _mode: &str) -> Result<(), ServiceError> {
        let mut inner = self.lock();
        inner.calls.push(Call::UnitStop(name.to_string()));
        let unit = inner
            .units
            .get_mut(name)
            .ok_or_else(|| failure("systemd1.Manager.StopUnit"))?;
        unit.sub_state = "dead".to_string();

        Ok(())
    }

    async fn enable_unit_files(&self, names: &[String]) -> Result<(), ServiceError> {
        let mut inner = self.lock();
        for name in names {
            inner.calls.push(Call::UnitEnable(name.clone()));
            if let Some(unit) = inner.units.get_mut(name) {
                unit.file_state = "enabled".to_string();
            }
        }

        Ok(())
    }

    async fn disable_unit_files(&self, names: &[String]) -> Result<(), ServiceError> {
        let mut inner = self.lock();
        for name in names {
            inner.calls.push(Call::UnitDisable(name.clone()));
            if let Some(unit) = inner.units.get_mut(name) {
                unit.file_state = "disabled".to_string();
            }
        }

        Ok(())
    }

    async fn reload(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}
