use eyre::Result;
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    prelude::*,
    Layer, Registry,
};

/// Logging level. A "higher level" means more will be logged.
#[derive(
    Default,
    Debug,
    Clone,
    Copy,
    serde::Deserialize,
    clap::ValueEnum,
    PartialOrd,
    Ord,
    PartialEq,
    Eq,
)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    /// Off
    Off = 0,
    /// Error
    Error = 1,
    /// Warn
    Warn = 2,
    /// Debug
    Debug = 3,
    /// Trace
    Trace = 5,
    /// Info
    #[serde(other)]
    #[default]
    Info = 4,
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Off => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
            Level::Info => LevelFilter::INFO,
        }
    }
}

/// Log output format
#[derive(Default, Debug, Clone, Copy, serde::Deserialize, clap::ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Style {
    /// Pretty print
    Pretty,
    /// JSON
    Json,
    /// Compact
    Compact,
    /// Default style
    #[serde(other)]
    #[default]
    Full,
}

/// Configuration for the tracing subscriber of the migration tool
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    pub fmt: Style,
    #[serde(default)]
    pub level: Level,
}

impl TracingConfig {
    fn targets(&self) -> Targets {
        let mut target_layer = Targets::new().with_default(self.level);
        if self.level < Level::Trace {
            // only show these debug and trace logs at trace level
            target_layer = target_layer.with_target("hyper", Level::Info);
            target_layer = target_layer.with_target("reqwest", Level::Info);
            target_layer = target_layer.with_target("ethers_providers", Level::Info);
            target_layer = target_layer.with_target("rustls", Level::Info);
        }
        target_layer
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = tracing_subscriber::fmt::layer();
        match self.fmt {
            Style::Pretty => layer.pretty().boxed(),
            Style::Json => layer.json().boxed(),
            Style::Compact => layer.compact().boxed(),
            Style::Full => layer.boxed(),
        }
    }

    /// Attempt to instantiate and register a tracing subscriber setup from
    /// settings.
    pub fn start_tracing(&self) -> Result<()> {
        let err_layer = tracing_error::ErrorLayer::default();

        let subscriber = Registry::default()
            .with(self.fmt_layer())
            .with(self.targets())
            .with(err_layer);

        subscriber.try_init()?;
        Ok(())
    }
}
