//! Gateway process control and the restart-and-settle recovery sequence.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::command::{self, CommandError};
use crate::config::{ControllerKind, RecoveryConfig, WatchdogConfig};

/// pkill / pgrep / `systemctl is-active` exit status for "nothing matched".
const NO_MATCH_EXIT: i32 = 1;
/// `systemctl is-active` reports inactive units with 3.
const UNIT_INACTIVE_EXIT: i32 = 3;

#[async_trait]
pub trait GatewayProcessController: Send + Sync {
    /// Stop the gateway. Stopping one that is not running is not an error.
    async fn stop(&self) -> Result<(), CommandError>;

    /// Start the gateway without waiting for it to exit.
    async fn start(&self) -> Result<(), CommandError>;

    async fn is_running(&self) -> Result<bool, CommandError>;

    /// Shell command an operator can run by hand to restart the gateway.
    fn remediation(&self) -> String;
}

pub fn build_controller(
    cfg: &WatchdogConfig,
    state_dir: &Path,
) -> Box<dyn GatewayProcessController> {
    let timeout = cfg.gateway.command_timeout();
    match cfg.gateway.controller {
        ControllerKind::Process => Box::new(ProcessController {
            pattern: cfg.gateway.process_pattern.clone(),
            start_command: cfg.gateway.start_command.clone(),
            log_file: cfg.gateway_log_file(state_dir),
            timeout,
        }),
        ControllerKind::Service => Box::new(ServiceController {
            unit: cfg.gateway.service_unit.clone(),
            user: cfg.gateway.user_service,
            timeout,
        }),
    }
}

// ---------------------------------------------------------------------------
// ProcessController
// ---------------------------------------------------------------------------

/// Finds the gateway by command-line pattern and respawns it detached, with
/// output appended to a log file.
#[derive(Debug, Clone)]
pub struct ProcessController {
    pub pattern: String,
    pub start_command: Vec<String>,
    pub log_file: PathBuf,
    pub timeout: Duration,
}

#[async_trait]
impl GatewayProcessController for ProcessController {
    async fn stop(&self) -> Result<(), CommandError> {
        let argv = vec!["pkill".to_string(), "-f".to_string(), self.pattern.clone()];
        match command::run(&argv, self.timeout).await {
            Ok(_) => Ok(()),
            Err(e) if e.exit_code() == Some(NO_MATCH_EXIT) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn start(&self) -> Result<(), CommandError> {
        spawn_detached(&self.start_command, &self.log_file)
    }

    async fn is_running(&self) -> Result<bool, CommandError> {
        let argv = vec!["pgrep".to_string(), "-f".to_string(), self.pattern.clone()];
        match command::run(&argv, self.timeout).await {
            Ok(_) => Ok(true),
            Err(e) if e.exit_code() == Some(NO_MATCH_EXIT) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn remediation(&self) -> String {
        format!(
            "pkill -f '{}'; nohup {} >> {} 2>&1 &",
            self.pattern,
            self.start_command.join(" "),
            self.log_file.display()
        )
    }
}

/// Spawn `argv` in a new session so it outlives this run and any terminal
/// hangup, with stdin closed and both output streams appended to `log_file`.
#[allow(clippy::zombie_processes)]
fn spawn_detached(argv: &[String], log_file: &Path) -> Result<(), CommandError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(CommandError::Unreachable {
            program: String::new(),
            reason: "empty start command".to_string(),
        });
    };

    let open_log = || -> std::io::Result<std::fs::File> {
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(log_file)
    };
    let log_err = |e: std::io::Error| CommandError::Unreachable {
        program: program.clone(),
        reason: format!("cannot open log {}: {e}", log_file.display()),
    };
    let stdout = open_log().map_err(log_err)?;
    let stderr = stdout.try_clone().map_err(log_err)?;

    let mut cmd = std::process::Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: setsid is async-signal-safe and only touches the child.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(std::io::Error::from)
            });
        }
    }

    // The child is intentionally not waited on; it is reparented when we exit.
    let child = cmd
        .spawn()
        .map_err(|e| CommandError::spawn_failed(program, e))?;
    info!(pid = child.id(), "gateway spawned");
    Ok(())
}

// ---------------------------------------------------------------------------
// ServiceController
// ---------------------------------------------------------------------------

/// Delegates lifecycle to a systemd unit.
#[derive(Debug, Clone)]
pub struct ServiceController {
    pub unit: String,
    pub user: bool,
    pub timeout: Duration,
}

impl ServiceController {
    fn systemctl(&self, verb: &str) -> Vec<String> {
        let mut argv = vec!["systemctl".to_string()];
        if self.user {
            argv.push("--user".to_string());
        }
        argv.push(verb.to_string());
        argv.push(self.unit.clone());
        argv
    }
}

#[async_trait]
impl GatewayProcessController for ServiceController {
    async fn stop(&self) -> Result<(), CommandError> {
        command::run(&self.systemctl("stop"), self.timeout)
            .await
            .map(|_| ())
    }

    async fn start(&self) -> Result<(), CommandError> {
        command::run(&self.systemctl("start"), self.timeout)
            .await
            .map(|_| ())
    }

    async fn is_running(&self) -> Result<bool, CommandError> {
        match command::run(&self.systemctl("is-active"), self.timeout).await {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.exit_code(), Some(NO_MATCH_EXIT | UNIT_INACTIVE_EXIT)) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn remediation(&self) -> String {
        self.systemctl("restart").join(" ")
    }
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

/// Stop, wait, start, settle. Every step is best effort.
pub struct Recovery {
    controller: Box<dyn GatewayProcessController>,
    stop_grace: Duration,
    settle: Duration,
}

impl Recovery {
    pub fn new(controller: Box<dyn GatewayProcessController>, cfg: &RecoveryConfig) -> Self {
        Self {
            controller,
            stop_grace: cfg.stop_grace(),
            settle: cfg.settle(),
        }
    }

    pub async fn recover(&self) {
        info!("restarting gateway");
        if let Err(e) = self.controller.stop().await {
            warn!(error = %e, "gateway stop failed, starting anyway");
        }
        tokio::time::sleep(self.stop_grace).await;

        if let Err(e) = self.controller.start().await {
            warn!(error = %e, "gateway start failed");
        }
        info!(settle_secs = self.settle.as_secs(), "waiting for gateway to reconnect");
        tokio::time::sleep(self.settle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls(Mutex<Vec<&'static str>>);

    struct FlakyController {
        calls: Arc<Calls>,
        fail_stop: bool,
    }

    #[async_trait]
    impl GatewayProcessController for FlakyController {
        async fn stop(&self) -> Result<(), CommandError> {
            self.calls.0.lock().unwrap().push("stop");
            if self.fail_stop {
                return Err(CommandError::NotFound("pkill".into()));
            }
            Ok(())
        }
        async fn start(&self) -> Result<(), CommandError> {
            self.calls.0.lock().unwrap().push("start");
            Ok(())
        }
        async fn is_running(&self) -> Result<bool, CommandError> {
            Ok(true)
        }
        fn remediation(&self) -> String {
            "restart it".into()
        }
    }

    fn instant() -> RecoveryConfig {
        RecoveryConfig {
            stop_grace_secs: 0,
            settle_secs: 0,
        }
    }

    #[tokio::test]
    async fn recover_stops_then_starts() {
        let calls = Arc::new(Calls::default());
        let recovery = Recovery::new(
            Box::new(FlakyController {
                calls: calls.clone(),
                fail_stop: false,
            }),
            &instant(),
        );
        recovery.recover().await;
        assert_eq!(*calls.0.lock().unwrap(), vec!["stop", "start"]);
    }

    #[tokio::test]
    async fn failed_stop_still_starts() {
        let calls = Arc::new(Calls::default());
        let recovery = Recovery::new(
            Box::new(FlakyController {
                calls: calls.clone(),
                fail_stop: true,
            }),
            &instant(),
        );
        recovery.recover().await;
        assert_eq!(*calls.0.lock().unwrap(), vec!["stop", "start"]);
    }

    #[test]
    fn service_argv_honours_user_flag() {
        let user = ServiceController {
            unit: "openclaw-gateway.service".into(),
            user: true,
            timeout: Duration::from_secs(1),
        };
        assert_eq!(
            user.systemctl("stop"),
            vec!["systemctl", "--user", "stop", "openclaw-gateway.service"]
        );
        let system = ServiceController {
            user: false,
            ..user
        };
        assert_eq!(
            system.remediation(),
            "systemctl restart openclaw-gateway.service"
        );
    }

    #[test]
    fn process_remediation_mentions_pattern_and_log() {
        let c = ProcessController {
            pattern: "openclaw gateway".into(),
            start_command: vec!["openclaw".into(), "gateway".into()],
            log_file: PathBuf::from("/tmp/gw.log"),
            timeout: Duration::from_secs(1),
        };
        let hint = c.remediation();
        assert!(hint.contains("pkill -f 'openclaw gateway'"));
        assert!(hint.contains("/tmp/gw.log"));
    }

    #[tokio::test]
    async fn spawn_detached_appends_to_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("logs/gateway.log");
        std::fs::create_dir_all(log.parent().unwrap()).unwrap();
        std::fs::write(&log, "previous\n").unwrap();

        spawn_detached(
            &["sh".into(), "-c".into(), "echo started".into()],
            &log,
        )
        .unwrap();

        // the detached child writes asynchronously
        let mut content = String::new();
        for _ in 0..50 {
            content = std::fs::read_to_string(&log).unwrap();
            if content.contains("started") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(content.starts_with("previous\n"));
        assert!(content.contains("started"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn spawn_detached_leads_its_own_session() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("gateway.log");

        // field 6 of /proc/<pid>/stat is the session id
        spawn_detached(
            &[
                "sh".into(),
                "-c".into(),
                "echo \"ids $$ $(cut -d' ' -f6 /proc/$$/stat)\"".into(),
            ],
            &log,
        )
        .unwrap();

        let mut line = None;
        for _ in 0..50 {
            let content = std::fs::read_to_string(&log).unwrap_or_default();
            if let Some(l) = content.lines().find(|l| l.starts_with("ids ")) {
                line = Some(l.to_string());
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let line = line.expect("child never wrote its ids");
        let ids: Vec<&str> = line.split_whitespace().skip(1).collect();
        assert_eq!(ids.len(), 2, "unexpected output {line:?}");
        assert_eq!(ids[0], ids[1], "child pid should equal its session id");
        let ours = nix::unistd::getsid(None).unwrap().to_string();
        assert_ne!(ids[1], ours);
    }

    #[test]
    fn spawn_detached_missing_binary() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = spawn_detached(
            &["no-such-gateway-bin-77a".into()],
            &dir.path().join("gw.log"),
        )
        .unwrap_err();
        assert!(matches!(err, CommandError::NotFound(_)));
    }

    #[tokio::test]
    async fn process_controller_reports_not_running() {
        let c = ProcessController {
            pattern: "no-such-gateway-pattern-5c0e1".into(),
            start_command: vec!["true".into()],
            log_file: PathBuf::from("/dev/null"),
            timeout: Duration::from_secs(5),
        };
        // skip on hosts without procps
        if command::locate("pgrep").is_none() {
            return;
        }
        assert!(!c.is_running().await.unwrap());
    }
}
