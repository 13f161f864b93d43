use crate::state::{ControlFlags, SharedState};
use async_trait::async_trait;
use color_eyre::Result;
use ifee_connd_dbus::{Connd, ConndT, ControlState, FlightStatus, OBJ_PATH, SERVICE};
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use zbus::fdo::{Error as ZErr, Result as ZResult};

/// External control input: the only writer of the control flags.
#[derive(Clone)]
pub struct ConndService {
    state: SharedState,
}

impl ConndService {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Serves the control interface on `conn` until cancelled.
    pub fn spawn(
        self,
        conn: zbus::Connection,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<()>> {
        info!("spawning dbus service {SERVICE} at path {OBJ_PATH}");

        task::spawn(async move {
            conn.request_name(SERVICE)
                .await
                .inspect_err(|e| error!("failed to request name on dbus {e}"))?;

            conn.object_server()
                .at(OBJ_PATH, Connd::from(self))
                .await
                .inspect_err(|e| error!("failed to serve obj on dbus {e}"))?;

            info!("dbus service spawned successfully");
            cancel.cancelled().await;

            Ok(())
        })
    }
}

fn poisoned() -> ZErr {
    ZErr::Failed("shared state mtx err".to_string())
}

#[async_trait]
impl ConndT for ConndService {
    async fn set_control(&self, wifi: Option<bool>, modem: Option<bool>) -> ZResult<()> {
        let control = self
            .state
            .write(|s| {
                s.control.merge(ControlFlags { wifi, modem });
                s.control
            })
            .map_err(|_| poisoned())?;

        info!("control flags updated: {control:?}");

        Ok(())
    }

    async fn control(&self) -> ZResult<ControlState> {
        let ControlFlags { wifi, modem } =
            self.state.read(|s| s.control).map_err(|_| poisoned())?;

        Ok(ControlState { wifi, modem })
    }

    async fn flight_state(&self) -> ZResult<FlightStatus> {
        self.state
            .read(|s| FlightStatus {
                icao: s.icao.as_ref().map(|i| i.to_string()).unwrap_or_default(),
                active: s.active,
                velocity_kt: s.flight.velocity_kt,
                altitude_ft: s.flight.altitude_ft,
                lat: s.flight.position.map(|p| p.lat),
                lon: s.flight.position.map(|p| p.lon),
            })
            .map_err(|_| poisoned())
    }
}
