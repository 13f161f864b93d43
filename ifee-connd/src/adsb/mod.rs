//! Surveillance processor: turns raw ADS-B frames of our own aircraft into
//! flight state and the velocity hysteresis flag the watchdog acts on.
use crate::{
    state::{Icao, SharedState},
    utils::sleep_or_cancel,
};
use color_eyre::{eyre::eyre, Result};
use decode::Decoder;
use flume::{Receiver, TryRecvError};
use std::time::Duration;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub mod decode;
pub mod feed;

pub const DEFAULT_THRESHOLD_KT: i32 = 160;

/// One frame as delivered by the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// 28 hex digits.
    pub payload: String,
    /// Unix seconds at reception.
    pub timestamp: i64,
}

impl RawMessage {
    pub fn new(payload: impl Into<String>, timestamp: i64) -> Self {
        Self {
            payload: payload.into(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, bon::Builder)]
pub struct ProcessorConfig {
    #[builder(default = DEFAULT_THRESHOLD_KT)]
    pub threshold_kt: i32,
    /// How long to wait before looking at an empty queue again.
    #[builder(default = Duration::from_secs(1))]
    pub idle_interval: Duration,
    /// Pause after each processed frame. Zero only yields.
    #[builder(default = Duration::ZERO)]
    pub pace: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Flips only when crossing the threshold in the direction opposite to the
/// current state: fast while active deactivates, slow while inactive
/// activates.
pub fn next_active(threshold_kt: i32, velocity_kt: i32, active: bool) -> bool {
    match (velocity_kt >= threshold_kt, active) {
        (true, true) => false,
        (false, false) => true,
        _ => active,
    }
}

/// Latest pending CPR frame of each parity.
#[derive(Debug, Default)]
struct Pending {
    even: Option<RawMessage>,
    odd: Option<RawMessage>,
}

impl Pending {
    /// Stores `msg`, replacing an older frame of the same parity. Once both
    /// parities are present they are handed out and the slots cleared.
    fn push(&mut self, msg: &RawMessage, odd: bool) -> Option<(RawMessage, RawMessage)> {
        if odd {
            self.odd = Some(msg.clone());
        } else {
            self.even = Some(msg.clone());
        }

        if self.even.is_some() && self.odd.is_some() {
            return self.even.take().zip(self.odd.take());
        }

        None
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.even.is_none() && self.odd.is_none()
    }
}

pub struct Processor<D> {
    decoder: D,
    state: SharedState,
    config: ProcessorConfig,
    pending: Pending,
}

impl<D: Decoder> Processor<D> {
    pub fn new(decoder: D, state: SharedState, config: ProcessorConfig) -> Self {
        Self {
            decoder,
            state,
            config,
            pending: Pending::default(),
        }
    }

    /// Drains `queue` until cancelled or every producer is gone. Returns
    /// right away if no aircraft address is configured.
    pub async fn run(
        mut self,
        queue: Receiver<RawMessage>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let icao = self
            .state
            .read(|s| s.icao.clone())
            .map_err(|e| eyre!("failed to read icao from shared state: {e:?}"))?;

        let Some(icao) = icao else {
            info!("no icao address configured, surveillance processor idle");
            return Ok(());
        };

        info!("tracking aircraft {icao}");

        while !cancel.is_cancelled() {
            let msg = match queue.try_recv() {
                Ok(msg) => msg,
                Err(TryRecvError::Empty) => {
                    sleep_or_cancel(&cancel, self.config.idle_interval).await;
                    continue;
                }
                Err(TryRecvError::Disconnected) => {
                    info!("surveillance feed closed");
                    break;
                }
            };

            if let Err(e) = self.handle(&icao, &msg) {
                debug!("dropping frame {}: {e}", msg.payload);
            }

            if self.config.pace.is_zero() {
                task::yield_now().await;
            } else {
                sleep_or_cancel(&cancel, self.config.pace).await;
            }
        }

        info!("surveillance processor stopped");

        Ok(())
    }

    pub fn handle(&mut self, icao: &Icao, msg: &RawMessage) -> Result<()> {
        let payload = msg.payload.as_str();
        if self.decoder.icao(payload)? != icao.as_str() {
            return Ok(());
        }

        match self.decoder.typecode(payload)? {
            19 | 5..=8 => {
                let velocity = self.decoder.velocity(payload)? as i32;
                let threshold = self.config.threshold_kt;

                let flipped = self
                    .state
                    .write(|s| {
                        s.flight.velocity_kt = velocity;
                        let next = next_active(threshold, velocity, s.active);
                        let flipped = next != s.active;
                        s.active = next;
                        flipped.then_some(next)
                    })
                    .map_err(|e| eyre!("failed to write velocity to shared state: {e:?}"))?;

                debug!("ts: {} icao: {icao} vel: {velocity}", msg.timestamp);
                match flipped {
                    Some(false) => info!("speed >= {threshold}kt, cellular link not allowed"),
                    Some(true) => info!("speed < {threshold}kt, cellular link allowed"),
                    None => {}
                }
            }
            9..=18 | 20..=22 => {
                let odd = self.decoder.odd_frame(payload)?;
                let Some((even, odd)) = self.pending.push(msg, odd) else {
                    return Ok(());
                };

                let position = self.decoder.airborne_position(
                    &even.payload,
                    &odd.payload,
                    even.timestamp,
                    odd.timestamp,
                )?;
                let altitude = self
                    .decoder
                    .altitude(payload)
                    .inspect_err(|e| debug!("keeping last altitude: {e}"))
                    .ok()
                    .map(|alt| alt as i32);

                self.state
                    .write(|s| {
                        if position.is_some() {
                            s.flight.position = position;
                        }
                        if let Some(alt) = altitude {
                            s.flight.altitude_ft = alt;
                        }
                    })
                    .map_err(|e| eyre!("failed to write position to shared state: {e:?}"))?;

                info!(
                    "ts: {} icao: {icao} pos: {position:?} alt: {altitude:?}",
                    msg.timestamp
                );
            }
            _ => {}
        }

        Ok(())
    }
}
