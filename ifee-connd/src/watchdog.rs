//! Control loop keeping modem, LTE bearer and VPN tunnel in line with the
//! flight state and the operator's control flags.
use crate::{
    modem::{Modem, ModemManager},
    network::{Connection, NetworkManager},
    probe::Prober,
    state::SharedState,
    utils::sleep_or_cancel,
};
use color_eyre::{eyre::eyre, Result};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, bon::Builder)]
pub struct WatchdogConfig {
    /// Preferred modem, first one otherwise.
    pub modem_index: Option<u32>,
    #[builder(into, default = "lte".to_string())]
    pub lte_connection: String,
    #[builder(into, default = "vpn".to_string())]
    pub vpn_connection: String,
    /// Probed once the LTE bearer is up.
    #[builder(into)]
    pub lte_host: String,
    /// Probed once the VPN tunnel is up.
    #[builder(into)]
    pub vpn_host: String,
    #[builder(default = Duration::from_secs(5))]
    pub wait_delay: Duration,
    #[builder(default = Duration::from_secs(1))]
    pub loop_delay: Duration,
    #[builder(default = 3)]
    pub probe_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    BringUp,
    TearDown,
}

impl Decision {
    pub fn from_inputs(adsb_active: bool, modem_allowed: bool) -> Self {
        match (adsb_active, modem_allowed) {
            (true, true) => Decision::BringUp,
            _ => Decision::TearDown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    Up,
    Failed,
    Cancelled,
}

/// What a single iteration ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Up,
    ModemFailed,
    LteFailed,
    VpnFailed,
    TornDown,
    NoModem,
    /// NetworkManager could not be queried, nothing was attempted.
    Skipped,
    Cancelled,
}

pub struct Watchdog {
    mm: ModemManager,
    nm: NetworkManager,
    prober: Arc<dyn Prober>,
    state: SharedState,
    config: WatchdogConfig,
    cancel: CancellationToken,
}

impl Watchdog {
    pub fn new(
        mm: ModemManager,
        nm: NetworkManager,
        prober: Arc<dyn Prober>,
        state: SharedState,
        config: WatchdogConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            mm,
            nm,
            prober,
            state,
            config,
            cancel,
        }
    }

    /// Runs until cancelled. Only a missing connection profile ends it with
    /// an error.
    pub async fn run(self) -> Result<()> {
        info!("watchdog started");

        while !self.cancel.is_cancelled() {
            self.iterate().await?;
            sleep_or_cancel(&self.cancel, self.config.loop_delay).await;
        }

        info!("watchdog stopped");

        Ok(())
    }

    pub async fn iterate(&self) -> Result<Outcome> {
        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let Some((lte, vpn)) = self.connections().await? else {
            return Ok(Outcome::Skipped);
        };

        let Some(modem) = self.mm.select(self.config.modem_index).await else {
            error!("no modem found");
            sleep_or_cancel(&self.cancel, self.config.wait_delay).await;
            return Ok(Outcome::NoModem);
        };

        let (adsb_active, control) = self
            .state
            .read(|s| (s.active, s.control))
            .map_err(|e| eyre!("failed to read shared state: {e:?}"))?;
        debug!("state -- ADS-B: {adsb_active}, control: {:?}", control.modem);

        let outcome = match Decision::from_inputs(adsb_active, control.modem_allowed()) {
            Decision::BringUp => self.bring_up(&modem, &lte, &vpn).await,
            Decision::TearDown => self.tear_down(&modem, &lte, &vpn).await,
        };

        Ok(outcome)
    }

    async fn connections(&self) -> Result<Option<(Connection, Connection)>> {
        let lookup = async {
            let lte = self.nm.find(&self.config.lte_connection).await?;
            let vpn = self.nm.find(&self.config.vpn_connection).await?;
            Ok::<_, crate::bus::ServiceError>((lte, vpn))
        };

        match lookup.await {
            Ok((Some(lte), Some(vpn))) => Ok(Some((lte, vpn))),
            Ok((None, _)) => Err(eyre!(
                "lte connection {} does not exist",
                self.config.lte_connection
            )),
            Ok((_, None)) => Err(eyre!(
                "vpn connection {} does not exist",
                self.config.vpn_connection
            )),
            Err(e) => {
                error!("failed to look up connections: {e}");
                sleep_or_cancel(&self.cancel, self.config.wait_delay).await;
                Ok(None)
            }
        }
    }

    async fn bring_up(&self, modem: &Modem, lte: &Connection, vpn: &Connection) -> Outcome {
        if !modem.enable(lte.id()).await {
            return Outcome::ModemFailed;
        }

        match self.activate_with_retry(lte, &self.config.lte_host).await {
            Activation::Up => {}
            Activation::Cancelled => return Outcome::Cancelled,
            Activation::Failed => {
                modem.disable(lte.id()).await;
                return Outcome::LteFailed;
            }
        }

        match self.activate_with_retry(vpn, &self.config.vpn_host).await {
            Activation::Up => Outcome::Up,
            Activation::Cancelled => Outcome::Cancelled,
            Activation::Failed => {
                modem.disable(lte.id()).await;
                Outcome::VpnFailed
            }
        }
    }

    async fn tear_down(&self, modem: &Modem, lte: &Connection, vpn: &Connection) -> Outcome {
        if let Err(e) = vpn.set_active(false).await {
            error!("failed to deactivate: {e}");
        }
        if !sleep_or_cancel(&self.cancel, self.config.wait_delay).await {
            return Outcome::Cancelled;
        }

        if let Err(e) = lte.set_active(false).await {
            error!("failed to deactivate: {e}");
        }
        if !sleep_or_cancel(&self.cancel, self.config.wait_delay).await {
            return Outcome::Cancelled;
        }

        modem.disable(lte.id()).await;

        Outcome::TornDown
    }

    /// Activates `conn`, waits for it to come up, then probes `host` up to
    /// `probe_attempts` times. Cancellation during any wait is reported as
    /// such, without further bus calls.
    async fn activate_with_retry(&self, conn: &Connection, host: &str) -> Activation {
        if let Err(e) = conn.set_active(true).await {
            error!("activate {conn} connection failed: {e}");
            return Activation::Failed;
        }

        loop {
            match conn.active().await {
                Ok(true) => break,
                Ok(false) => {
                    if !sleep_or_cancel(&self.cancel, self.config.wait_delay).await {
                        return Activation::Cancelled;
                    }
                }
                Err(e) => {
                    error!("activate {conn} connection failed: {e}");
                    return Activation::Failed;
                }
            }
        }

        for attempt in 1..=self.config.probe_attempts {
            if let Some(rtt) = self.prober.probe(host).await {
                debug!("ping {host} successful: {rtt:?}");
                return Activation::Up;
            }

            info!("ping {host} failed, attempt {attempt}");
            if !sleep_or_cancel(&self.cancel, self.config.wait_delay).await {
                return Activation::Cancelled;
            }
        }

        warn!("[{conn}] {host} unreachable");

        Activation::Failed
    }
}
