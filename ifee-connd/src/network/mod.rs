use crate::bus::{NetworkBus, ServiceError, Settings};
use std::{fmt, sync::Arc};
use tracing::{debug, info};
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("[{id}] {source}")]
    Service {
        id: String,
        #[source]
        source: ServiceError,
    },
    #[error("[{id}] malformed settings: {reason}")]
    Malformed { id: String, reason: String },
}

/// Index of every connection profile known to NetworkManager.
#[derive(Clone)]
pub struct NetworkManager {
    bus: Arc<dyn NetworkBus>,
}

impl NetworkManager {
    pub fn new(bus: Arc<dyn NetworkBus>) -> Self {
        Self { bus }
    }

    /// Finds a connection profile by its human readable id.
    /// `Ok(None)` if no profile carries that id.
    pub async fn find(&self, id: &str) -> Result<Option<Connection>, ServiceError> {
        for path in self.bus.list_connections().await? {
            let settings = self.bus.connection_settings(&path).await?;

            if settings_id(&settings).as_deref() == Some(id) {
                return Ok(Some(Connection {
                    id: id.to_string(),
                    path,
                    bus: Arc::clone(&self.bus),
                }));
            }
        }

        Ok(None)
    }
}

/// A NetworkManager connection profile. `autoconnect` and `active` are
/// always read from the bus, never cached.
#[derive(Clone)]
pub struct Connection {
    id: String,
    path: OwnedObjectPath,
    bus: Arc<dyn NetworkBus>,
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("path", &self.path.as_str())
            .finish()
    }
}

impl Connection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    fn service_err(&self, source: ServiceError) -> ConnectionError {
        ConnectionError::Service {
            id: self.id.clone(),
            source,
        }
    }

    /// Missing `autoconnect` means NetworkManager's default, which is on.
    pub async fn autoconnect(&self) -> Result<bool, ConnectionError> {
        let settings = self
            .bus
            .connection_settings(&self.path)
            .await
            .map_err(|e| self.service_err(e))?;

        let autoconnect = settings
            .get("connection")
            .and_then(|c| c.get("autoconnect"))
            .and_then(|ac| ac.downcast_ref().ok())
            .unwrap_or(true);

        Ok(autoconnect)
    }

    pub async fn set_autoconnect(&self, autoconnect: bool) -> Result<(), ConnectionError> {
        let mut settings = self
            .bus
            .connection_settings(&self.path)
            .await
            .map_err(|e| self.service_err(e))?;

        let value = OwnedValue::try_from(Value::from(autoconnect)).map_err(|e| {
            ConnectionError::Malformed {
                id: self.id.clone(),
                reason: e.to_string(),
            }
        })?;

        settings
            .get_mut("connection")
            .ok_or_else(|| ConnectionError::Malformed {
                id: self.id.clone(),
                reason: "missing `connection` setting".to_string(),
            })?
            .insert("autoconnect".to_string(), value);

        self.bus
            .update_connection_settings(&self.path, settings)
            .await
            .map_err(|e| self.service_err(e))?;

        debug!("[{}] autoconnect - {autoconnect}", self.id);

        Ok(())
    }

    /// Scans every active connection for one originating from this profile.
    /// Returns the active connection object if found.
    pub async fn active_path(&self) -> Result<Option<OwnedObjectPath>, ConnectionError> {
        let actives = self
            .bus
            .active_connections()
            .await
            .map_err(|e| self.service_err(e))?;

        for active in actives {
            let origin = self
                .bus
                .active_connection_origin(&active)
                .await
                .map_err(|e| self.service_err(e))?;

            let settings = self
                .bus
                .connection_settings(&origin)
                .await
                .map_err(|e| self.service_err(e))?;

            if settings_id(&settings).as_deref() == Some(self.id.as_str()) {
                return Ok(Some(active));
            }
        }

        Ok(None)
    }

    pub async fn active(&self) -> Result<bool, ConnectionError> {
        Ok(self.active_path().await?.is_some())
    }

    pub async fn set_active(&self, active: bool) -> Result<(), ConnectionError> {
        let current = self.active_path().await?;

        match (current, active) {
            (Some(_), true) => debug!("[{}] already activated", self.id),
            (None, false) => debug!("[{}] already deactivated", self.id),
            (None, true) => {
                self.bus
                    .activate_connection(&self.path)
                    .await
                    .map_err(|e| self.service_err(e))?;

                info!("[{}] activated successfully", self.id);
            }
            (Some(active_path), false) => {
                self.bus
                    .deactivate_connection(&active_path)
                    .await
                    .map_err(|e| self.service_err(e))?;

                info!("[{}] deactivated successfully", self.id);
            }
        }

        Ok(())
    }
}

fn settings_id(settings: &Settings) -> Option<String> {
    settings.get("connection")?.get("id")?.downcast_ref().ok()
}
