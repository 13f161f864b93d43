//! Process wide log setup for the ifee daemons.
//!
//! ```no_run
//! let flusher = ifee_telemetry::TelemetryConfig::new()
//!     .with_journald("ifee-connd")
//!     .init();
//! tracing::info!("up");
//! # async move {
//! flusher.flush().await;
//! # };
//! ```

use std::io::{IsTerminal as _, Write as _};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

/// Where log lines end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    Journald { syslog_identifier: String },
    Stderr,
}

impl Sink {
    /// Journald only makes sense when not attached to a terminal and an
    /// identifier was given.
    fn select(stderr_is_tty: bool, syslog_identifier: Option<&str>) -> Self {
        match syslog_identifier {
            Some(ident) if !stderr_is_tty => Sink::Journald {
                syslog_identifier: ident.to_owned(),
            },
            _ => Sink::Stderr,
        }
    }
}

#[derive(Debug)]
pub struct TelemetryConfig {
    syslog_identifier: Option<String>,
    global_filter: EnvFilter,
}

impl TelemetryConfig {
    /// Filter from `RUST_LOG`, `info` when unset.
    #[expect(clippy::new_without_default, reason = "may add required args later")]
    #[must_use]
    pub fn new() -> Self {
        Self {
            syslog_identifier: None,
            global_filter: EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        }
    }

    /// Logs to journald under `syslog_identifier`. Stderr is used anyway on
    /// a terminal.
    #[must_use]
    pub fn with_journald(mut self, syslog_identifier: &str) -> Self {
        self.syslog_identifier = Some(syslog_identifier.to_owned());
        self
    }

    #[must_use]
    pub fn with_global_filter(mut self, filter: EnvFilter) -> Self {
        self.global_filter = filter;
        self
    }

    pub fn try_init(self) -> Result<TelemetryFlusher, tracing_subscriber::util::TryInitError> {
        let sink = Sink::select(
            std::io::stderr().is_terminal(),
            self.syslog_identifier.as_deref(),
        );

        let journald_layer = match sink {
            Sink::Journald { syslog_identifier } => tracing_journald::layer()
                .inspect_err(|err| {
                    eprintln!(
                        "failed connecting to journald socket, \
                        falling back to stderr: {err}"
                    );
                })
                .map(|layer| layer.with_syslog_identifier(syslog_identifier))
                .ok(),
            Sink::Stderr => None,
        };
        let stderr_layer = journald_layer
            .is_none()
            .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(journald_layer)
            .with(self.global_filter)
            .try_init()?;

        Ok(TelemetryFlusher { _priv: () })
    }

    /// Panics if a global subscriber is already set. Call once, first thing
    /// in `main`.
    pub fn init(self) -> TelemetryFlusher {
        self.try_init().expect("failed to initialize ifee-telemetry")
    }
}

#[must_use = "call .flush at the end of the program, otherwise logs may get lost"]
pub struct TelemetryFlusher {
    _priv: (),
}

impl TelemetryFlusher {
    pub async fn flush(self) {
        std::io::stderr().flush().ok();
        std::io::stdout().flush().ok();
    }
}
