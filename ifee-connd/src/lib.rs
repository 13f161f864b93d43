use adsb::{decode::ModeS, Processor, ProcessorConfig, RawMessage};
use bus::{ModemBus, NetworkBus, UnitBus};
use color_eyre::eyre::Result;
use modem::ModemManager;
use network::NetworkManager;
use probe::Prober;
use service::ConndService;
use state::SharedState;
use std::{sync::Arc, time::Duration};
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use unit::ServiceUnit;
use watchdog::{Watchdog, WatchdogConfig};

pub mod adsb;
pub mod bus;
pub mod icao;
pub mod modem;
pub mod network;
pub mod probe;
pub mod service;
pub mod state;
pub mod unit;
pub mod watchdog;
pub mod wifi;

mod utils;

pub type Tasks = Vec<JoinHandle<Result<()>>>;

/// Spawns every long running task of the daemon. A watchdog error cancels
/// `cancel` so the caller can shut the rest down.
#[bon::builder(finish_fn = run)]
pub async fn program<B>(
    bus: Arc<B>,
    control_bus: zbus::Connection,
    state: SharedState,
    prober: Arc<dyn Prober>,
    watchdog: WatchdogConfig,
    #[builder(default)] processor: ProcessorConfig,
    adsb_feed: Option<String>,
    wifi_unit: Option<String>,
    #[builder(default)] ensure_units: Vec<String>,
    cancel: CancellationToken,
) -> Result<Tasks>
where
    B: ModemBus + NetworkBus + UnitBus,
{
    let modem_bus: Arc<dyn ModemBus> = bus.clone();
    let network_bus: Arc<dyn NetworkBus> = bus.clone();
    let unit_bus: Arc<dyn UnitBus> = bus;

    let nm = NetworkManager::new(network_bus);
    let mm = ModemManager::new(modem_bus, nm.clone());

    let mut tasks = Tasks::new();

    let (tx, rx) = flume::unbounded::<RawMessage>();
    let surveillance = Processor::new(ModeS, state.clone(), processor);
    tasks.push(task::spawn(surveillance.run(rx, cancel.clone())));

    match adsb_feed {
        Some(addr) => {
            tasks.push(task::spawn(adsb::feed::run(
                addr,
                tx,
                watchdog.wait_delay,
                cancel.clone(),
            )));
        }
        // without a receiver the queue stays open and the processor idles
        None => {
            let cancel = cancel.clone();
            tasks.push(task::spawn(async move {
                cancel.cancelled().await;
                drop(tx);
                Ok(())
            }));
        }
    }

    wifi::ensure_units(unit_bus.clone(), &ensure_units).await;

    if let Some(name) = wifi_unit {
        match ServiceUnit::load(unit_bus, &name).await {
            Ok(unit) => tasks.push(task::spawn(wifi::follow(
                unit,
                state.clone(),
                watchdog.loop_delay,
                cancel.clone(),
            ))),
            Err(e) => error!("wifi unit {name} unavailable, not following it: {e}"),
        }
    }

    tasks.push(ConndService::new(state.clone()).spawn(control_bus, cancel.clone()));

    let wd = Watchdog::new(mm, nm, prober, state, watchdog, cancel.clone());
    tasks.push(task::spawn(async move {
        let res = wd.run().await;
        if let Err(e) = &res {
            error!("watchdog failed: {e:?}");
            cancel.cancel();
        }
        res
    }));

    info!("spawned {} tasks", tasks.len());

    Ok(tasks)
}

/// Awaits every task, returning the first error any of them ended with.
pub async fn join(tasks: Tasks, grace: Duration) -> Result<()> {
    let mut result = Ok(());

    for handle in tasks {
        let abort = handle.abort_handle();
        let res = match tokio::time::timeout(grace, handle).await {
            Ok(Ok(res)) => res,
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                abort.abort();
                continue;
            }
        };

        if result.is_ok() {
            result = res;
        }
    }

    result
}
