pub mod check;
pub mod probe;
pub mod reset;
pub mod status;

use anyhow::Context as _;
use std::path::{Path, PathBuf};
use tracing::{error, warn};
use watchdog_core::config::{WarnLevel, WatchdogConfig};

/// Config resolved from file + environment, shared by every subcommand.
pub struct Context {
    pub config: WatchdogConfig,
    pub state_dir: PathBuf,
}

impl Context {
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = WatchdogConfig::load(explicit).context("failed to load config")?;
        let mut warnings = config.apply_env(|key| std::env::var(key).ok());
        warnings.extend(config.validate());

        for warning in warnings {
            match warning.level {
                WarnLevel::Error => error!("config: {}", warning.message),
                WarnLevel::Warning => warn!("config: {}", warning.message),
            }
        }

        let state_dir = config
            .resolve_state_dir()
            .context("cannot determine state directory")?;
        Ok(Self { config, state_dir })
    }
}
