use crate::error::{Result, WatchdogError};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Well-known locations
// ---------------------------------------------------------------------------

pub const CONFIG_DIR: &str = ".config/gateway-watchdog";
pub const CONFIG_FILE: &str = "config.yaml";
pub const STATE_DIR: &str = ".local/state/gateway-watchdog";

pub const LAST_ALERT_FILE: &str = "last-alert";
pub const LOCK_FILE: &str = "watchdog.lock";
pub const GATEWAY_LOG_FILE: &str = "gateway.log";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn home_dir() -> Result<PathBuf> {
    home::home_dir().ok_or(WatchdogError::HomeNotFound)
}

/// `~/.config/gateway-watchdog/config.yaml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// `~/.local/state/gateway-watchdog`
pub fn default_state_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(STATE_DIR))
}

pub fn last_alert_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LAST_ALERT_FILE)
}

pub fn lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LOCK_FILE)
}

pub fn gateway_log_path(state_dir: &Path) -> PathBuf {
    state_dir.join(GATEWAY_LOG_FILE)
}
