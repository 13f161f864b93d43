use crate::bus::{ServiceError, UnitBus};
use std::{fmt, sync::Arc};
use tracing::{debug, error};
use zbus::zvariant::OwnedObjectPath;

const RUNNING: &str = "running";
const ENABLED: &str = "enabled";
const MODE: &str = "replace";

/// A systemd service unit. Every mutating operation first checks the current
/// state and is a no-op if the unit is already there. Failures are logged and
/// swallowed.
#[derive(Clone)]
pub struct ServiceUnit {
    name: String,
    path: OwnedObjectPath,
    bus: Arc<dyn UnitBus>,
}

impl fmt::Display for ServiceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl ServiceUnit {
    /// Loads `name`, appending `.service` if it has no suffix.
    pub async fn load(bus: Arc<dyn UnitBus>, name: &str) -> Result<Self, ServiceError> {
        let name = if name.ends_with(".service") {
            name.to_string()
        } else {
            format!("{name}.service")
        };
        let path = bus.load_unit(&name).await?;

        Ok(Self { name, path, bus })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `SubState`, e.g. `running` or `dead`.
    pub async fn state(&self) -> Result<String, ServiceError> {
        self.bus.unit_sub_state(&self.path).await
    }

    pub async fn enabled(&self) -> Result<bool, ServiceError> {
        Ok(self.bus.unit_file_state(&self.path).await? == ENABLED)
    }

    async fn running(&self) -> Option<bool> {
        match self.state().await {
            Ok(state) => Some(state == RUNNING),
            Err(e) => {
                error!("[{self}] failed to read state: {e}");
                None
            }
        }
    }

    async fn is_enabled(&self) -> Option<bool> {
        match self.enabled().await {
            Ok(enabled) => Some(enabled),
            Err(e) => {
                error!("[{self}] failed to read unit file state: {e}");
                None
            }
        }
    }

    pub async fn start(&self) {
        if self.running().await != Some(false) {
            return;
        }

        match self.bus.start_unit(&self.name, MODE).await {
            Ok(()) => debug!("[{self}] started"),
            Err(e) => error!("[{self}] failed starting: {e}"),
        }
    }

    pub async fn stop(&self) {
        if self.running().await != Some(true) {
            return;
        }

        match self.bus.stop_unit(&self.name, MODE).await {
            Ok(()) => debug!("[{self}] stopped"),
            Err(e) => error!("[{self}] failed stopping: {e}"),
        }
    }

    pub async fn enable(&self) {
        if self.is_enabled().await != Some(false) {
            return;
        }

        let names = [self.name.clone()];
        let res = async {
            self.bus.enable_unit_files(&names).await?;
            self.bus.reload().await
        };

        match res.await {
            Ok(()) => debug!("[{self}] enabled"),
            Err(e) => error!("[{self}] failed enabling: {e}"),
        }
    }

    pub async fn disable(&self) {
        if self.is_enabled().await != Some(true) {
            return;
        }

        let names = [self.name.clone()];
        let res = async {
            self.bus.disable_unit_files(&names).await?;
            self.bus.reload().await
        };

        match res.await {
            Ok(()) => debug!("[{self}] disabled"),
            Err(e) => error!("[{self}] failed disabling: {e}"),
        }
    }
}
