use clap::{
    builder::{styling::AnsiColor, Styles},
    Parser, ValueEnum,
};
use color_eyre::eyre::{Result, WrapErr as _};
use ifee_connd::{
    bus::ServiceBus,
    icao::{self, GroundClient, IcaoCache},
    probe::PingCli,
    state::{Icao, Shared, SharedState},
    watchdog::WatchdogConfig,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::signal::unix::{self, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SYSLOG_IDENTIFIER: &str = "ifee-connd";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ControlBus {
    System,
    Session,
}

/// Cabin connectivity daemon
#[derive(Parser, Debug)]
#[clap(about, styles = clap_v3_styles())]
struct Cli {
    /// Index of the modem to manage, first one if unset
    #[arg(long, env = "IFEE_MODEM_INDEX")]
    modem_index: Option<u32>,
    #[arg(long, env = "IFEE_LTE_CONNECTION", default_value = "lte")]
    lte_connection: String,
    #[arg(long, env = "IFEE_VPN_CONNECTION", default_value = "vpn")]
    vpn_connection: String,
    /// Host probed once the LTE bearer is up
    #[arg(long, env = "IFEE_LTE_HOST")]
    lte_host: String,
    /// Host probed once the VPN tunnel is up
    #[arg(long, env = "IFEE_VPN_HOST")]
    vpn_host: String,
    /// Seconds to wait between retries
    #[arg(long, env = "IFEE_WAIT_DELAY", default_value_t = 5)]
    wait_delay: u64,
    /// Seconds between watchdog iterations
    #[arg(long, env = "IFEE_LOOP_DELAY", default_value_t = 1)]
    loop_delay: u64,
    /// Aircraft address, six hex digits
    #[arg(long, env = "IFEE_ICAO")]
    icao: Option<Icao>,
    #[arg(long, env = "IFEE_ICAO_CACHE", default_value = "/var/lib/ifee/icao.json")]
    icao_cache: PathBuf,
    #[arg(long, env = "IFEE_GROUND_URL")]
    ground_url: Option<String>,
    #[arg(long, env = "IFEE_GROUND_USER")]
    ground_user: Option<String>,
    #[arg(long, env = "IFEE_GROUND_PASSWORD", hide_env_values = true)]
    ground_password: Option<String>,
    #[arg(long, env = "IFEE_BOX_ID")]
    box_id: Option<String>,
    /// `host:port` of a receiver emitting raw AVR frames
    #[arg(long, env = "IFEE_ADSB_FEED")]
    adsb_feed: Option<String>,
    /// Unit following the wifi control flag
    #[arg(long, env = "IFEE_WIFI_UNIT")]
    wifi_unit: Option<String>,
    /// Units enabled and started at startup
    #[arg(long = "ensure-unit", env = "IFEE_ENSURE_UNITS", value_delimiter = ',')]
    ensure_units: Vec<String>,
    /// Bus the control interface is served on
    #[arg(long, env = "IFEE_CONTROL_BUS", value_enum, default_value_t = ControlBus::System)]
    control_bus: ControlBus,
}

impl Cli {
    fn ground(&self) -> Option<GroundClient> {
        let client = GroundClient::builder()
            .url(self.ground_url.as_deref()?)
            .username(self.ground_user.as_deref()?)
            .password(self.ground_password.as_deref()?)
            .box_id(self.box_id.as_deref()?)
            .build();

        Some(client)
    }

    fn watchdog(&self) -> WatchdogConfig {
        WatchdogConfig::builder()
            .maybe_modem_index(self.modem_index)
            .lte_connection(&self.lte_connection)
            .vpn_connection(&self.vpn_connection)
            .lte_host(&self.lte_host)
            .vpn_host(&self.vpn_host)
            .wait_delay(Duration::from_secs(self.wait_delay))
            .loop_delay(Duration::from_secs(self.loop_delay))
            .build()
    }
}

fn clap_v3_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Green.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let tel_flusher = ifee_telemetry::TelemetryConfig::new()
        .with_journald(SYSLOG_IDENTIFIER)
        .init();

    let cli = Cli::parse();
    info!(
        "starting: lte {} via {}, vpn {} via {}",
        cli.lte_connection, cli.lte_host, cli.vpn_connection, cli.vpn_host
    );

    let result = async {
        let system_bus = zbus::Connection::system()
            .await
            .wrap_err("failed to connect to system bus")?;
        let control_bus = match cli.control_bus {
            ControlBus::System => system_bus.clone(),
            ControlBus::Session => zbus::Connection::session()
                .await
                .wrap_err("failed to connect to session bus")?,
        };

        let cache = IcaoCache::new(&cli.icao_cache);
        let ground = cli.ground();
        let icao = icao::resolve(cli.icao.clone(), &cache, ground.as_ref()).await;
        let state = SharedState::new(Shared::new(icao));

        let cancel = CancellationToken::new();

        let tasks = ifee_connd::program()
            .bus(Arc::new(ServiceBus::new(system_bus)))
            .control_bus(control_bus)
            .state(state)
            .prober(Arc::new(PingCli))
            .watchdog(cli.watchdog())
            .maybe_adsb_feed(cli.adsb_feed.clone())
            .maybe_wifi_unit(cli.wifi_unit.clone())
            .ensure_units(cli.ensure_units.clone())
            .cancel(cancel.clone())
            .run()
            .await?;

        let mut sigterm = unix::signal(SignalKind::terminate())?;
        let mut sigint = unix::signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => warn!("received SIGTERM"),
            _ = sigint.recv()  => warn!("received SIGINT"),
            _ = cancel.cancelled() => warn!("a task requested shutdown"),
        }

        info!("cancelling tasks and exiting gracefully");
        cancel.cancel();

        ifee_connd::join(tasks, SHUTDOWN_GRACE).await
    }
    .await;

    tel_flusher.flush().await;

    result
}
