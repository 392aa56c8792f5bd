use crate::error::{Result, WatchdogError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// GatewayConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    /// Match the gateway by command line with pkill/pgrep and spawn it detached.
    Process,
    /// Delegate to a systemd unit.
    Service,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_controller")]
    pub controller: ControllerKind,
    /// Pattern handed to `pkill -f` / `pgrep -f`.
    #[serde(default = "default_process_pattern")]
    pub process_pattern: String,
    #[serde(default = "default_start_command")]
    pub start_command: Vec<String>,
    #[serde(default = "default_service_unit")]
    pub service_unit: String,
    #[serde(default = "default_true")]
    pub user_service: bool,
    /// Where the detached gateway's stdout/stderr are appended.
    /// Defaults to `<state_dir>/gateway.log`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_control_timeout")]
    pub command_timeout_secs: u64,
}

fn default_controller() -> ControllerKind {
    ControllerKind::Process
}

fn default_process_pattern() -> String {
    "openclaw gateway".to_string()
}

fn default_start_command() -> Vec<String> {
    vec!["openclaw".to_string(), "gateway".to_string()]
}

fn default_service_unit() -> String {
    "openclaw-gateway.service".to_string()
}

fn default_true() -> bool {
    true
}

fn default_control_timeout() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            controller: default_controller(),
            process_pattern: default_process_pattern(),
            start_command: default_start_command(),
            service_unit: default_service_unit(),
            user_service: true,
            log_file: None,
            command_timeout_secs: default_control_timeout(),
        }
    }
}

impl GatewayConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// ProbeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    /// Inspect the output of the gateway's status command.
    Status,
    /// Send a real message to `self_target` and require it to go through.
    SendTest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_mode")]
    pub mode: ProbeMode,
    #[serde(default = "default_status_command")]
    pub status_command: Vec<String>,
    /// Prefix for the send-test probe; `--target` and `--message` are appended.
    #[serde(default = "default_send_command")]
    pub send_command: Vec<String>,
    #[serde(default)]
    pub self_target: String,
    #[serde(default = "default_test_message")]
    pub test_message: String,
    /// Case-insensitive substrings that mark the gateway unhealthy even on exit 0.
    #[serde(default = "default_failure_markers")]
    pub failure_markers: Vec<String>,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

fn default_probe_mode() -> ProbeMode {
    ProbeMode::Status
}

fn default_status_command() -> Vec<String> {
    vec![
        "openclaw".to_string(),
        "channels".to_string(),
        "status".to_string(),
    ]
}

fn default_send_command() -> Vec<String> {
    vec![
        "openclaw".to_string(),
        "message".to_string(),
        "send".to_string(),
        "--channel".to_string(),
        "whatsapp".to_string(),
    ]
}

fn default_test_message() -> String {
    "watchdog ping".to_string()
}

fn default_failure_markers() -> Vec<String> {
    vec![
        "disconnected".to_string(),
        "not connected".to_string(),
        "logged out".to_string(),
    ]
}

fn default_probe_timeout() -> u64 {
    15
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            mode: default_probe_mode(),
            status_command: default_status_command(),
            send_command: default_send_command(),
            self_target: String::new(),
            test_message: default_test_message(),
            failure_markers: default_failure_markers(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// RecoveryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Pause between stopping the old gateway and starting the new one.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
    /// Pause after start so the gateway can reconnect upstream before the re-probe.
    #[serde(default = "default_settle")]
    pub settle_secs: u64,
}

fn default_stop_grace() -> u64 {
    3
}

fn default_settle() -> u64 {
    10
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stop_grace_secs: default_stop_grace(),
            settle_secs: default_settle(),
        }
    }
}

impl RecoveryConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

// ---------------------------------------------------------------------------
// AlertsConfig
// ---------------------------------------------------------------------------

/// Twilio API-key credentials. Voice alerting is only attempted when every
/// field is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceCredentials {
    pub account_sid: String,
    pub api_key_sid: String,
    pub api_key_secret: String,
    pub from_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Phone number that receives the voice call.
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Google account the email CLI sends from.
    #[serde(default)]
    pub email_account: String,
    #[serde(default = "default_email_command")]
    pub email_command: String,
    #[serde(default = "default_email_timeout")]
    pub email_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceCredentials>,
    #[serde(default = "default_voice_api_base")]
    pub voice_api_base: String,
    #[serde(default = "default_voice_timeout")]
    pub voice_timeout_secs: u64,
}

fn default_cooldown() -> u64 {
    3600
}

fn default_email_command() -> String {
    "gog".to_string()
}

fn default_email_timeout() -> u64 {
    30
}

fn default_voice_api_base() -> String {
    "https://api.twilio.com".to_string()
}

fn default_voice_timeout() -> u64 {
    15
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            phone: String::new(),
            email: String::new(),
            cooldown_secs: default_cooldown(),
            email_account: String::new(),
            email_command: default_email_command(),
            email_timeout_secs: default_email_timeout(),
            voice: None,
            voice_api_base: default_voice_api_base(),
            voice_timeout_secs: default_voice_timeout(),
        }
    }
}

impl AlertsConfig {
    pub fn email_timeout(&self) -> Duration {
        Duration::from_secs(self.email_timeout_secs)
    }

    pub fn voice_timeout(&self) -> Duration {
        Duration::from_secs(self.voice_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// WatchdogConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    /// Directory holding the last-alert file, the run lock and the gateway log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl WatchdogConfig {
    /// Load the config file.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// tried and a missing file yields the built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => (paths::default_config_path()?, false),
        };
        if !path.exists() {
            if required {
                return Err(WatchdogError::ConfigRead {
                    path: path.display().to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path).map_err(|source| WatchdogError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    /// Overlay environment variables on top of the file values.
    ///
    /// `lookup` is `std::env::var(..).ok()` in production; tests pass a map.
    /// Unusable values are reported and the file value is kept.
    pub fn apply_env<F>(&mut self, lookup: F) -> Vec<ConfigWarning>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("WATCHDOG_ALERT_PHONE") {
            self.alerts.phone = v;
        }
        if let Some(v) = get("WATCHDOG_ALERT_EMAIL") {
            self.alerts.email = v;
        }
        if let Some(v) = get("WATCHDOG_EMAIL_ACCOUNT") {
            self.alerts.email_account = v;
        }
        if let Some(v) = get("WATCHDOG_GATEWAY_PROCESS") {
            self.gateway.process_pattern = v;
        }
        if let Some(v) = get("WATCHDOG_STATE_DIR") {
            self.state_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("WATCHDOG_COOLDOWN_SECS") {
            match v.trim().parse() {
                Ok(secs) => self.alerts.cooldown_secs = secs,
                Err(_) => warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "WATCHDOG_COOLDOWN_SECS='{v}' is not a whole number of seconds; \
                         keeping cooldown of {}s",
                        self.alerts.cooldown_secs
                    ),
                }),
            }
        }

        let voice = (
            get("TWILIO_ACCOUNT_SID"),
            get("TWILIO_API_KEY_SID"),
            get("TWILIO_API_KEY_SECRET"),
            get("TWILIO_FROM_NUMBER"),
        );
        if let (Some(account_sid), Some(api_key_sid), Some(api_key_secret), Some(from_number)) =
            voice
        {
            self.alerts.voice = Some(VoiceCredentials {
                account_sid,
                api_key_sid,
                api_key_secret,
                from_number,
            });
        }
        warnings
    }

    /// The state directory, falling back to `~/.local/state/gateway-watchdog`.
    pub fn resolve_state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => paths::default_state_dir(),
        }
    }

    pub fn gateway_log_file(&self, state_dir: &Path) -> PathBuf {
        self.gateway
            .log_file
            .clone()
            .unwrap_or_else(|| paths::gateway_log_path(state_dir))
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut warn = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message });
        };

        if self.alerts.phone.trim().is_empty() && self.alerts.email.trim().is_empty() {
            warn(
                WarnLevel::Error,
                "no alert recipient configured (alerts.phone / alerts.email)".to_string(),
            );
        }
        if self.alerts.voice.is_some() && self.alerts.phone.trim().is_empty() {
            warn(
                WarnLevel::Warning,
                "voice credentials set but alerts.phone is empty".to_string(),
            );
        }

        let active_probe = match self.probe.mode {
            ProbeMode::Status => &self.probe.status_command,
            ProbeMode::SendTest => &self.probe.send_command,
        };
        if active_probe.is_empty() {
            warn(WarnLevel::Error, "probe command is empty".to_string());
        }
        if self.probe.mode == ProbeMode::SendTest && self.probe.self_target.trim().is_empty() {
            warn(
                WarnLevel::Error,
                "probe.mode is send_test but probe.self_target is empty".to_string(),
            );
        }
        if self.probe.timeout_secs == 0 {
            warn(
                WarnLevel::Warning,
                "probe.timeout_secs is 0; every probe will time out".to_string(),
            );
        }

        match self.gateway.controller {
            ControllerKind::Process => {
                if self.gateway.process_pattern.trim().is_empty() {
                    warn(
                        WarnLevel::Error,
                        "gateway.process_pattern is empty; pkill would match everything"
                            .to_string(),
                    );
                }
                if self.gateway.start_command.is_empty() {
                    warn(
                        WarnLevel::Error,
                        "gateway.start_command is empty".to_string(),
                    );
                }
            }
            ControllerKind::Service => {
                if self.gateway.service_unit.trim().is_empty() {
                    warn(
                        WarnLevel::Error,
                        "gateway.service_unit is empty".to_string(),
                    );
                }
            }
        }

        if self.alerts.cooldown_secs == 0 {
            warn(
                WarnLevel::Warning,
                "alerts.cooldown_secs is 0; every failed run will alert".to_string(),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
