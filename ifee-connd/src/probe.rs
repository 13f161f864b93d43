use crate::utils::run_cmd;
use async_trait::async_trait;
use regex::Regex;
use std::{sync::LazyLock, time::Duration};

/// Network echo against a host.
#[async_trait]
pub trait Prober: 'static + Send + Sync {
    /// Round trip time, `None` if the host did not answer.
    async fn probe(&self, host: &str) -> Option<Duration>;
}

/// Single `ping` with a one second timeout.
pub struct PingCli;

#[async_trait]
impl Prober for PingCli {
    async fn probe(&self, host: &str) -> Option<Duration> {
        let output = run_cmd("ping", &["-c", "1", "-W", "1", host]).await.ok()?;

        // a reply without a parsable time still proves reachability
        Some(parse_rtt(&output).unwrap_or_default())
    }
}

fn parse_rtt(output: &str) -> Option<Duration> {
    static RTT: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"time[=<]([0-9.]+) ?ms").expect("valid regex"));

    let ms: f64 = RTT.captures(output)?.get(1)?.as_str().parse().ok()?;

    Some(Duration::from_micros((ms * 1000.0).round() as u64))
}
