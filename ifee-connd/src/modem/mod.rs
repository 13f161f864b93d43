use crate::{
    bus::{ModemBus, SignalTech},
    network::NetworkManager,
};
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::{error, info, warn};
use zbus::zvariant::OwnedObjectPath;

pub mod types;

pub use types::{
    access_technologies, ModemFailReason, ModemOperState, ModemPowerState, ModemSnapshot,
};

/// Refresh rate requested from `Modem.Signal.Setup`.
const SIGNAL_RATE_SECS: u32 = 1;

/// Enumerates the modems ModemManager currently exposes.
#[derive(Clone)]
pub struct ModemManager {
    bus: Arc<dyn ModemBus>,
    nm: NetworkManager,
}

impl ModemManager {
    pub fn new(bus: Arc<dyn ModemBus>, nm: NetworkManager) -> Self {
        Self { bus, nm }
    }

    /// Every modem, ordered by modem index. An unreachable ModemManager is
    /// logged and reported as no modems.
    pub async fn modems(&self) -> Vec<Modem> {
        match self.bus.list_modems().await {
            Ok(paths) => paths
                .into_iter()
                .map(|path| Modem {
                    path,
                    bus: Arc::clone(&self.bus),
                    nm: self.nm.clone(),
                })
                .collect(),
            Err(e) => {
                error!("failed to list modems: {e}");
                Vec::new()
            }
        }
    }

    /// The modem whose index matches `index`, falling back to the first one.
    pub async fn select(&self, index: Option<u32>) -> Option<Modem> {
        let mut modems = self.modems().await;
        let pos = index
            .and_then(|i| modems.iter().position(|m| m.index() == Some(i)))
            .unwrap_or(0);

        if pos < modems.len() {
            Some(modems.swap_remove(pos))
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct Modem {
    path: OwnedObjectPath,
    bus: Arc<dyn ModemBus>,
    nm: NetworkManager,
}

impl fmt::Display for Modem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path.as_str())
    }
}

impl fmt::Debug for Modem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Modem").field(&self.path.as_str()).finish()
    }
}

impl Modem {
    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    /// Last segment of the object path, e.g. `3` for `.../Modem/3`.
    pub fn index(&self) -> Option<u32> {
        self.path.as_str().rsplit('/').next()?.parse().ok()
    }

    /// `None` means the modem state is unknown and must not be acted upon.
    pub async fn snapshot(&self) -> Option<ModemSnapshot> {
        let raw = match self.bus.modem_properties(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("[{self}] failed to read modem properties: {e}");
                return None;
            }
        };

        match ModemSnapshot::try_from(raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                error!("[{self}] malformed modem properties: {e}");
                None
            }
        }
    }

    /// Readings of the first access technology that reports any.
    pub async fn signal(&self) -> HashMap<String, f64> {
        if let Err(e) = self.bus.signal_setup(&self.path, SIGNAL_RATE_SECS).await {
            error!("[{self}] failed to set up signal refresh: {e}");
            return HashMap::new();
        }

        for tech in SignalTech::PROBE_ORDER {
            match self.bus.signal_readings(&self.path, tech).await {
                Ok(readings) if !readings.is_empty() => return readings,
                Ok(_) => continue,
                Err(e) => {
                    error!("[{self}] failed to read {tech:?} signal: {e}");
                    return HashMap::new();
                }
            }
        }

        HashMap::new()
    }

    pub async fn reset(&self) {
        match self.bus.reset(&self.path).await {
            Ok(()) => info!("[{self}] reset"),
            Err(e) => error!("[{self}] failed to reset: {e}"),
        }
    }

    pub async fn set_power_state(&self, target: ModemPowerState) -> bool {
        match self.bus.set_power_state(&self.path, target.as_raw()).await {
            Ok(()) => {
                info!("[{self}] power state - {target}");
                true
            }
            Err(e) => {
                error!("[{self}] failed to set power state {target}: {e}");
                false
            }
        }
    }

    /// Powers the modem on, enables it and turns on autoconnect of
    /// `connection`. Calling it on an enabled modem does nothing.
    pub async fn enable(&self, connection: &str) -> bool {
        let Some(snapshot) = self.snapshot().await else {
            return false;
        };

        if snapshot.power_state != ModemPowerState::On
            && !self.set_power_state(ModemPowerState::On).await
        {
            return false;
        }

        match snapshot.state {
            ModemOperState::Failed => {
                error!("[{self}] modem failed: {}", snapshot.fail_reason);
                false
            }
            state if state.is_enabled_or_enabling() => true,
            _ => {
                if let Err(e) = self.bus.enable(&self.path, true).await {
                    error!("[{self}] failed to enable: {e}");
                    return false;
                }

                if !self.set_autoconnect(connection, true).await {
                    return false;
                }

                info!("[{self}] enabled");
                true
            }
        }
    }

    /// Mirror of [`Modem::enable`]: autoconnect off, disable, power low.
    pub async fn disable(&self, connection: &str) -> bool {
        let Some(snapshot) = self.snapshot().await else {
            return false;
        };

        if snapshot.state == ModemOperState::Failed {
            error!("[{self}] modem failed: {}", snapshot.fail_reason);
            return false;
        }

        if !snapshot.state.is_disabled_or_disabling() {
            if !self.set_autoconnect(connection, false).await {
                return false;
            }

            if let Err(e) = self.bus.enable(&self.path, false).await {
                error!("[{self}] failed to disable: {e}");
                return false;
            }

            info!("[{self}] disabled");
        }

        if snapshot.power_state == ModemPowerState::Low {
            return true;
        }

        self.set_power_state(ModemPowerState::Low).await
    }

    async fn set_autoconnect(&self, connection: &str, autoconnect: bool) -> bool {
        let conn = match self.nm.find(connection).await {
            Ok(Some(conn)) => conn,
            Ok(None) => {
                warn!("[{self}] connection {connection} not found");
                return false;
            }
            Err(e) => {
                error!("[{self}] failed to look up connection {connection}: {e}");
                return false;
            }
        };

        match conn.set_autoconnect(autoconnect).await {
            Ok(()) => true,
            Err(e) => {
                error!("[{self}] {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{
        fake::{Call, FakeBus},
        RawModemProperties, ServiceError,
    };
    use async_trait::async_trait;
    use mockall::{mock, predicate::eq};

    mock! {
        pub Mm {}
        #[async_trait]
        impl ModemBus for Mm {
            async fn list_modems(&self) -> Result<Vec<OwnedObjectPath>, ServiceError>;

            async fn modem_properties(
                &self,
                modem: &OwnedObjectPath,
            ) -> Result<RawModemProperties, ServiceError>;

            async fn enable(&self, modem: &OwnedObjectPath, enable: bool)
                -> Result<(), ServiceError>;

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
    }

    async fn first_modem(bus: &Arc<FakeBus>) -> Modem {
        let nm = NetworkManager::new(bus.clone());
        ModemManager::new(bus.clone(), nm)
            .select(None)
            .await
            .unwrap()
    }

    fn modem_path() -> OwnedObjectPath {
        OwnedObjectPath::try_from("/org/freedesktop/ModemManager1/Modem/0").unwrap()
    }

    #[tokio::test]
    async fn it_brings_a_disabled_modem_up() {
        let bus = FakeBus::new().with_modem(0).with_connection("lte");
        let modem = first_modem(&bus).await;

        assert!(modem.enable("lte").await);

        assert_eq!(
            bus.calls(),
            vec![
                Call::ModemPower(3),
                Call::ModemEnable(true),
                Call::Autoconnect("lte".to_string(), true),
            ]
        );
    }

    #[tokio::test]
    async fn it_does_not_enable_twice() {
        let mut mm = MockMm::new();
        let mut state = 3;
        mm.expect_modem_properties().times(2).returning(move |_| {
            let props = RawModemProperties {
                state,
                power_state: 3,
                ..Default::default()
            };
            // the first Enable(true) moves the modem to Enabled
            state = 6;
            Ok(props)
        });
        mm.expect_enable()
            .with(eq(modem_path()), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        let net = FakeBus::new().with_connection("lte");
        let modem = Modem {
            path: modem_path(),
            bus: Arc::new(mm),
            nm: NetworkManager::new(net.clone()),
        };

        assert!(modem.enable("lte").await);
        assert!(modem.enable("lte").await);
    }

    #[tokio::test]
    async fn it_refuses_to_enable_a_failed_modem() {
        let bus = FakeBus::new().with_modem(0).with_connection("lte");
        bus.set_modem_state(0, -1, 3);
        let modem = first_modem(&bus).await;

        assert!(!modem.enable("lte").await);
        assert!(bus.calls().is_empty());
    }

    #[tokio::test]
    async fn it_fails_enable_when_connection_is_unknown() {
        let bus = FakeBus::new().with_modem(0);
        let modem = first_modem(&bus).await;

        assert!(!modem.enable("lte").await);
    }

    #[tokio::test]
    async fn it_fails_enable_when_modem_is_unreachable() {
        let bus = FakeBus::new().with_modem(0).with_connection("lte");
        let modem = first_modem(&bus).await;
        bus.modems_unreachable();

        assert!(modem.snapshot().await.is_none());
        assert!(!modem.enable("lte").await);
        assert!(bus.calls().is_empty());
    }

    #[tokio::test]
    async fn it_tears_an_enabled_modem_down() {
        let bus = FakeBus::new().with_modem(0).with_connection("lte");
        bus.set_modem_state(0, 11, 3);
        let modem = first_modem(&bus).await;

        assert!(modem.disable("lte").await);

        assert_eq!(
            bus.calls(),
            vec![
                Call::Autoconnect("lte".to_string(), false),
                Call::ModemEnable(false),
                Call::ModemPower(2),
            ]
        );
        assert_eq!(bus.modem_state(0), (3, 2));
    }

    #[tokio::test]
    async fn it_does_nothing_when_already_disabled_and_low() {
        let bus = FakeBus::new().with_modem(0).with_connection("lte");
        let modem = first_modem(&bus).await;

        assert!(modem.disable("lte").await);
        assert!(modem.disable("lte").await);
        assert!(bus.calls().is_empty());
    }

    #[tokio::test]
    async fn it_aborts_disable_when_enable_call_fails() {
        let bus = FakeBus::new().with_modem(0).with_connection("lte");
        bus.set_modem_state(0, 6, 3);
        bus.fail_modem_enable();
        let modem = first_modem(&bus).await;

        assert!(!modem.disable("lte").await);
        assert!(!bus.calls().contains(&Call::ModemPower(2)));
    }

    #[tokio::test]
    async fn it_selects_modem_by_index() {
        let bus = FakeBus::new().with_modem(0).with_modem(3);
        let nm = NetworkManager::new(bus.clone());
        let mm = ModemManager::new(bus.clone(), nm);

        assert_eq!(mm.select(Some(3)).await.unwrap().index(), Some(3));
        assert_eq!(mm.select(Some(7)).await.unwrap().index(), Some(0));
        assert_eq!(mm.select(None).await.unwrap().index(), Some(0));
    }

    #[tokio::test]
    async fn it_selects_nothing_without_modems() {
        let bus = FakeBus::new();
        let nm = NetworkManager::new(bus.clone());

        assert!(ModemManager::new(bus.clone(), nm).select(None).await.is_none());
    }

    #[tokio::test]
    async fn it_reads_first_non_empty_signal() {
        let bus = FakeBus::new()
            .with_modem(0)
            .with_signal(&[("rssi", -61.0), ("rsrq", -9.0)]);
        let modem = first_modem(&bus).await;

        let signal = modem.signal().await;

        assert_eq!(signal.get("rssi"), Some(&-61.0));
        assert_eq!(signal.len(), 2);
    }

    #[tokio::test]
    async fn it_probes_signal_technologies_in_order() {
        let mut mm = MockMm::new();
        mm.expect_signal_setup()
            .with(eq(modem_path()), eq(1))
            .returning(|_, _| Ok(()));
        mm.expect_signal_readings()
            .returning(|_, tech| match tech {
                SignalTech::Gsm => Ok(HashMap::new()),
                SignalTech::Umts => Ok(HashMap::from([("ecio".to_string(), -3.5)])),
                _ => panic!("probed past first non-empty technology"),
            });

        let net = FakeBus::new();
        let modem = Modem {
            path: modem_path(),
            bus: Arc::new(mm),
            nm: NetworkManager::new(net.clone()),
        };

        assert_eq!(modem.signal().await.get("ecio"), Some(&-3.5));
    }

    #[tokio::test]
    async fn it_swallows_reset_failures() {
        let bus = FakeBus::new().with_modem(0);
        let modem = first_modem(&bus).await;
        bus.modems_unreachable();

        modem.reset().await;

        assert_eq!(bus.calls(), vec![Call::ModemReset]);
    }
}
