//! The last-alert timestamp persisted between scheduled runs.
//!
//! Layout:
//!   <state_dir>/last-alert   plain-text Unix seconds, `0` when healed
//!
//! The store is the only reader and writer of that file. A missing or
//! unparsable file reads as "never alerted".

use crate::error::Result;
use crate::io;
use crate::paths;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthState {
    pub last_alert_epoch: i64,
}

impl HealthState {
    pub fn has_alerted(&self) -> bool {
        self.last_alert_epoch != 0
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: paths::last_alert_path(state_dir),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state. Never fails: anything unreadable is `0`.
    pub fn load(&self) -> HealthState {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HealthState::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file unreadable, assuming no prior alert");
                return HealthState::default();
            }
        };
        match parse(&data) {
            Some(last_alert_epoch) => HealthState { last_alert_epoch },
            None => {
                warn!(path = %self.path.display(), "state file corrupt, assuming no prior alert");
                HealthState::default()
            }
        }
    }

    /// Create the file with `0` if it is missing, and rewrite it with `0` if
    /// it does not hold a valid timestamp. Returns the resulting state.
    pub fn init(&self) -> Result<HealthState> {
        match std::fs::read_to_string(&self.path) {
            Ok(data) => match parse(&data) {
                Some(last_alert_epoch) => return Ok(HealthState { last_alert_epoch }),
                None => {
                    warn!(path = %self.path.display(), "state file corrupt, resetting to 0");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.save(HealthState::default())?;
        Ok(HealthState::default())
    }

    pub fn record_alert(&self, now: i64) -> Result<()> {
        self.save(HealthState {
            last_alert_epoch: now,
        })
    }

    /// Reset to `0`. Returns whether the file had to be rewritten.
    pub fn clear(&self) -> Result<bool> {
        if self.stored() == Some(0) {
            return Ok(false);
        }
        self.save(HealthState::default())?;
        Ok(true)
    }

    /// The parsed file contents, `None` when missing or corrupt.
    fn stored(&self) -> Option<i64> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|data| parse(&data))
    }

    fn save(&self, state: HealthState) -> Result<()> {
        io::atomic_write(&self.path, format!("{}\n", state.last_alert_epoch).as_bytes())
    }
}

fn parse(data: &str) -> Option<i64> {
    let value: i64 = data.trim().parse().ok()?;
    (value >= 0).then_some(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
