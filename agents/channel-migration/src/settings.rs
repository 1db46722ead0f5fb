use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, Environment, File, FileFormat};
use eyre::{bail, eyre, Context, Result};
use migrator::{Address, BatchSettings, FeePolicy, MAX_CHANNEL_LIMIT};

use crate::args::Args;

const DEFAULT_POLLING_INTERVAL_SECS: u64 = 10;

fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_SECS
}

/// Chain profile. Keys are matched case-insensitively and any of them can be
/// overridden with a `MIGRATOR_`-prefixed environment variable, e.g.
/// `MIGRATOR_ETHINSTANCE`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ProfileConf {
    /// json-rpc endpoint of the chain node
    #[serde(rename = "ethinstance", alias = "ethInstance")]
    pub eth_instance: String,
    /// ledger contract channels are migrated into
    #[serde(rename = "ledgeraddr", alias = "ledgerAddr")]
    pub ledger_addr: Address,
    /// queried from the node when absent
    #[serde(rename = "chainid", alias = "chainId", default)]
    pub chain_id: Option<u64>,
    /// seconds between receipt polls
    #[serde(rename = "pollinginterval", alias = "pollingInterval", default = "default_polling_interval")]
    pub polling_interval: u64,
}

impl ProfileConf {
    pub fn load(path: &Path) -> Result<Self> {
        Config::builder()
            .add_source(File::new(&path.to_string_lossy(), FileFormat::Json))
            .add_source(Environment::with_prefix("MIGRATOR"))
            .build()
            .and_then(Config::try_deserialize)
            .wrap_err_with(|| format!("Failed to load profile {}", path.display()))
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval)
    }
}

/// Everything the tool needs for one run, validated up front
#[derive(Debug, Clone)]
pub struct Settings {
    pub profile: ProfileConf,
    pub keystore: PathBuf,
    pub password: String,
    pub store_dir: PathBuf,
    pub batch: BatchSettings,
    /// blocks built on top of a migration transaction before it counts as mined
    pub confirmations: u64,
}

impl Settings {
    /// Validate the command line and load the profile it points to
    pub fn try_from_args(args: &Args) -> Result<Self> {
        let profile_path = args
            .profile
            .as_ref()
            .ok_or_else(|| eyre!("Please specify the profile file with --profile"))?;
        let keystore = args
            .ks
            .clone()
            .ok_or_else(|| eyre!("Please specify the keystore file with --ks"))?;
        let store_dir = args
            .storedir
            .clone()
            .ok_or_else(|| eyre!("Please specify the store directory with --storedir"))?;
        if !keystore.is_file() {
            bail!("Keystore file {} does not exist", keystore.display());
        }
        if args.maxgas <= 1 {
            bail!("--maxgas must be greater than 1 gwei, got {}", args.maxgas);
        }
        if args.limit > MAX_CHANNEL_LIMIT {
            bail!(
                "--limit must be at most {MAX_CHANNEL_LIMIT} channels, got {}",
                args.limit
            );
        }

        let profile = ProfileConf::load(profile_path)?;
        if profile.polling_interval == 0 {
            bail!(
                "invalid polling interval 0 in profile {}, expected at least 1 second",
                profile_path.display()
            );
        }
        let batch = BatchSettings::new(
            profile.ledger_addr,
            args.limit,
            FeePolicy::with_cap(args.maxgas),
        );
        Ok(Self {
            profile,
            keystore,
            password: args.pw.clone(),
            store_dir,
            batch,
            confirmations: args.blkdelay,
        })
    }
}
