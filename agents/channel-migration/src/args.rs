use std::path::PathBuf;

use clap::Parser;

use crate::trace::{Level, Style, TracingConfig};

/// Submit pending channel migrations to a new ledger contract
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Args {
    /// Path to the json profile with the chain endpoint and the target ledger address
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Path to the keystore file of the submitting account
    #[arg(long)]
    pub ks: Option<PathBuf>,

    /// Password of the keystore
    #[arg(long, env = "MIGRATOR_KEYSTORE_PASSWORD", hide_env_values = true, default_value = "")]
    pub pw: String,

    /// Directory of the local channel store
    #[arg(long)]
    pub storedir: Option<PathBuf>,

    /// Maximum number of channels migrated in this run
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Highest acceptable gas price in gwei, before a fixed tolerance of 2 gwei
    #[arg(long, default_value_t = 4)]
    pub maxgas: u64,

    /// Number of blocks built on top of a migration transaction before it counts as mined
    #[arg(long, default_value_t = 0)]
    pub blkdelay: u64,

    #[arg(long, value_enum, default_value_t = Level::Info)]
    pub log_level: Level,

    #[arg(long, value_enum, default_value_t = Style::Full)]
    pub log_format: Style,
}

impl Args {
    pub fn tracing(&self) -> TracingConfig {
        TracingConfig {
            fmt: self.log_format,
            level: self.log_level,
        }
    }
}
