use crate::{
    bus::UnitBus,
    state::SharedState,
    unit::ServiceUnit,
    utils::sleep_or_cancel,
};
use color_eyre::{eyre::eyre, Result};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Makes sure each unit is enabled and running. Failures are logged.
pub async fn ensure_units(bus: Arc<dyn UnitBus>, names: &[String]) {
    for name in names {
        match ServiceUnit::load(Arc::clone(&bus), name).await {
            Ok(unit) => {
                unit.enable().await;
                unit.start().await;
            }
            Err(e) => error!("failed to load unit {name}: {e}"),
        }
    }
}

/// Applies a wifi control flag to the access point unit.
pub async fn apply(unit: &ServiceUnit, wifi: Option<bool>) {
    match wifi {
        Some(true) => {
            unit.enable().await;
            unit.start().await;
        }
        Some(false) => {
            unit.stop().await;
            unit.disable().await;
        }
        None => {}
    }
}

/// Keeps `unit` in line with the wifi control flag until cancelled.
pub async fn follow(
    unit: ServiceUnit,
    state: SharedState,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    info!("wifi follower started for {unit}");

    loop {
        let wifi = state
            .read(|s| s.control.wifi)
            .map_err(|e| eyre!("failed to read control flags: {e:?}"))?;

        apply(&unit, wifi).await;

        if !sleep_or_cancel(&cancel, interval).await {
            break;
        }
    }

    info!("wifi follower stopped");

    Ok(())
}
