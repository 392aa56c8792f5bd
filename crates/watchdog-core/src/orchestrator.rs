//! One scheduled health check: probe, recover, re-probe, escalate.
//!
//! ```text
//! Probing ──healthy──▶ DoneOk
//!    │
//!  unhealthy
//!    ▼
//! Recovering ─▶ Reprobing ──healthy──▶ DoneRecovered
//!                   │
//!                unhealthy
//!                   ▼
//!              Escalating ─▶ DoneFailed
//! ```
//!
//! At most [`MAX_PROBES`] probes and one recovery happen per run. Nothing is
//! kept in memory between runs; the [`StateStore`] is the only durable state.

use std::path::Path;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::alert::{EscalationPolicy, EscalationReport};
use crate::config::WatchdogConfig;
use crate::error::Result;
use crate::gateway::{self, Recovery};
use crate::lock::RunLock;
use crate::probe::{CommandProbe, Probe, ProbeResult};
use crate::state::StateStore;

pub const MAX_PROBES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Probing,
    Recovering,
    Reprobing,
    Escalating,
    DoneOk,
    DoneRecovered,
    DoneFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Healthy,
    Recovered,
    Failed,
    /// Another run held the lock.
    Skipped,
}

impl CheckOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            CheckOutcome::Healthy | CheckOutcome::Recovered | CheckOutcome::Skipped => 0,
            CheckOutcome::Failed => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub outcome: CheckOutcome,
    pub probes: u32,
    pub recoveries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_probe: Option<ProbeResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationReport>,
}

impl CheckReport {
    fn skipped() -> Self {
        Self {
            outcome: CheckOutcome::Skipped,
            probes: 0,
            recoveries: 0,
            last_probe: None,
            escalation: None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}

pub trait Clock: Send + Sync {
    fn now_epoch(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

pub struct Orchestrator {
    probe: Box<dyn Probe>,
    recovery: Recovery,
    escalation: EscalationPolicy,
    store: StateStore,
    clock: Box<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        probe: Box<dyn Probe>,
        recovery: Recovery,
        escalation: EscalationPolicy,
        store: StateStore,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            probe,
            recovery,
            escalation,
            store,
            clock,
        }
    }

    /// Build the production wiring from a resolved config.
    pub fn from_config(cfg: &WatchdogConfig, state_dir: &Path) -> Self {
        let controller = gateway::build_controller(cfg, state_dir);
        let remediation = controller.remediation();
        Self::new(
            Box::new(CommandProbe::from_config(&cfg.probe)),
            Recovery::new(controller, &cfg.recovery),
            EscalationPolicy::from_config(&cfg.alerts, remediation),
            StateStore::new(state_dir),
            Box::new(SystemClock),
        )
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// [`run`](Self::run) under the run lock; a held lock yields `Skipped`.
    pub async fn run_exclusive(&self, state_dir: &Path) -> Result<CheckReport> {
        let Some(_lock) = RunLock::try_acquire(state_dir)? else {
            warn!("another check in progress, skipping");
            return Ok(CheckReport::skipped());
        };
        Ok(self.run().await)
    }

    pub async fn run(&self) -> CheckReport {
        if let Err(e) = self.store.init() {
            warn!(error = %e, path = %self.store.path().display(), "could not create state file");
        }

        let mut state = CheckState::Probing;
        let mut probes = 0;
        let mut recoveries = 0;
        let mut last_probe: Option<ProbeResult> = None;
        let mut escalation = None;

        loop {
            state = match state {
                CheckState::Probing | CheckState::Reprobing => {
                    let result = self.probe.probe().await;
                    probes += 1;
                    let next = match (state, result.healthy) {
                        (CheckState::Probing, true) => {
                            info!(diagnostic = %result.diagnostic, "gateway healthy");
                            CheckState::DoneOk
                        }
                        (_, true) => {
                            info!(diagnostic = %result.diagnostic, "gateway recovered after restart");
                            CheckState::DoneRecovered
                        }
                        (CheckState::Probing, false) => {
                            warn!(diagnostic = %result.diagnostic, "gateway unhealthy, attempting restart");
                            CheckState::Recovering
                        }
                        (_, false) => {
                            error!(diagnostic = %result.diagnostic, "gateway still unhealthy after restart");
                            CheckState::Escalating
                        }
                    };
                    last_probe = Some(result);
                    next
                }
                CheckState::Recovering => {
                    self.recovery.recover().await;
                    recoveries += 1;
                    CheckState::Reprobing
                }
                CheckState::Escalating => {
                    let diagnostic = last_probe
                        .as_ref()
                        .map(|p| p.diagnostic.as_str())
                        .unwrap_or_default();
                    let report = self
                        .escalation
                        .escalate(self.clock.now_epoch(), self.store.load(), &self.store, diagnostic)
                        .await;
                    escalation = Some(report);
                    CheckState::DoneFailed
                }
                CheckState::DoneOk | CheckState::DoneRecovered => {
                    self.clear_alert();
                    break;
                }
                CheckState::DoneFailed => break,
            };
        }

        debug_assert!(probes <= MAX_PROBES);
        let outcome = match state {
            CheckState::DoneOk => CheckOutcome::Healthy,
            CheckState::DoneRecovered => CheckOutcome::Recovered,
            _ => CheckOutcome::Failed,
        };
        CheckReport {
            outcome,
            probes,
            recoveries,
            last_probe,
            escalation,
        }
    }

    /// A healthy run re-arms alerting so the next outage alerts immediately.
    fn clear_alert(&self) {
        match self.store.clear() {
            Ok(true) => info!("alert cooldown cleared"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "could not clear alert state"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertError, ChannelReport, EmailSender, VoiceSender};
    use crate::command::CommandError;
    use crate::config::{AlertsConfig, RecoveryConfig};
    use crate::gateway::GatewayProcessController;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const T: i64 = 1_700_000_000;

    #[derive(Default)]
    struct Counters {
        probes: AtomicU32,
        stops: AtomicU32,
        starts: AtomicU32,
        calls: AtomicU32,
        emails: AtomicU32,
    }

    struct ScriptedProbe {
        script: Mutex<VecDeque<bool>>,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self) -> ProbeResult {
            self.counters.probes.fetch_add(1, Ordering::SeqCst);
            // an exhausted script keeps failing
            match self.script.lock().unwrap().pop_front() {
                Some(true) => ProbeResult::healthy("connected"),
                _ => ProbeResult::unhealthy("disconnected"),
            }
        }
    }

    struct CountingController(Arc<Counters>);

    #[async_trait]
    impl GatewayProcessController for CountingController {
        async fn stop(&self) -> std::result::Result<(), CommandError> {
            self.0.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn start(&self) -> std::result::Result<(), CommandError> {
            self.0.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn is_running(&self) -> std::result::Result<bool, CommandError> {
            Ok(true)
        }
        fn remediation(&self) -> String {
            "restart".into()
        }
    }

    struct CountingVoice(Arc<Counters>);

    #[async_trait]
    impl VoiceSender for CountingVoice {
        async fn call(&self, _: &str, _: &str) -> std::result::Result<(), AlertError> {
            self.0.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingEmail(Arc<Counters>);

    #[async_trait]
    impl EmailSender for CountingEmail {
        async fn send(&self, _: &str, _: &str, _: &str) -> std::result::Result<(), AlertError> {
            self.0.emails.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now_epoch(&self) -> i64 {
            self.0
        }
    }

    struct Harness {
        counters: Arc<Counters>,
        orchestrator: Orchestrator,
    }

    fn harness(dir: &Path, script: &[bool], now: i64, with_voice: bool) -> Harness {
        let counters = Arc::new(Counters::default());
        let alerts = AlertsConfig {
            phone: "+15550100".into(),
            email: "ops@example.com".into(),
            cooldown_secs: 3600,
            ..AlertsConfig::default()
        };
        let voice: Option<Box<dyn VoiceSender>> = if with_voice {
            Some(Box::new(CountingVoice(counters.clone())))
        } else {
            None
        };
        let orchestrator = Orchestrator::new(
            Box::new(ScriptedProbe {
                script: Mutex::new(script.iter().copied().collect()),
                counters: counters.clone(),
            }),
            Recovery::new(
                Box::new(CountingController(counters.clone())),
                &RecoveryConfig {
                    stop_grace_secs: 0,
                    settle_secs: 0,
                },
            ),
            EscalationPolicy::new(
                &alerts,
                voice,
                Box::new(CountingEmail(counters.clone())),
                "restart",
            ),
            StateStore::new(dir),
            Box::new(FixedClock(now)),
        );
        Harness {
            counters,
            orchestrator,
        }
    }

    fn get(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn healthy_first_probe_never_recovers() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path(), &[true], T, true);

        let report = h.orchestrator.run().await;

        assert_eq!(report.outcome, CheckOutcome::Healthy);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(get(&h.counters.probes), 1);
        assert_eq!(get(&h.counters.stops), 0);
        assert_eq!(get(&h.counters.starts), 0);
        assert!(report.escalation.is_none());
    }

    #[tokio::test]
    async fn healthy_run_repairs_corrupt_state_file() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path(), &[true, true], T, true);
        let path = h.orchestrator.store().path().to_path_buf();
        std::fs::write(&path, "garbage").unwrap();

        for _ in 0..2 {
            let report = h.orchestrator.run().await;
            assert_eq!(report.outcome, CheckOutcome::Healthy);
            assert_eq!(std::fs::read_to_string(&path).unwrap(), "0\n");
        }
    }

    #[tokio::test]
    async fn recovered_run_exits_zero_and_clears_cooldown() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path(), &[false, true], T, true);
        h.orchestrator.store().record_alert(T - 60).unwrap();

        let report = h.orchestrator.run().await;

        assert_eq!(report.outcome, CheckOutcome::Recovered);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.probes, 2);
        assert_eq!(report.recoveries, 1);
        assert_eq!(get(&h.counters.stops), 1);
        assert_eq!(get(&h.counters.starts), 1);
        assert_eq!(h.orchestrator.store().load().last_alert_epoch, 0);
        assert_eq!(get(&h.counters.emails), 0);
    }

    #[tokio::test]
    async fn double_failure_escalates_once_and_exits_one() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path(), &[false, false, false, false], T, true);

        let report = h.orchestrator.run().await;

        assert_eq!(report.outcome, CheckOutcome::Failed);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.probes, MAX_PROBES);
        assert_eq!(report.recoveries, 1);
        assert_eq!(get(&h.counters.probes), 2);
        assert_eq!(get(&h.counters.calls), 1);
        assert_eq!(get(&h.counters.emails), 1);
        assert_eq!(h.orchestrator.store().load().last_alert_epoch, T);
    }

    #[tokio::test]
    async fn bounded_for_every_probe_sequence() {
        for script in [
            vec![true, true],
            vec![true, false],
            vec![false, true],
            vec![false, false],
        ] {
            let dir = TempDir::new().unwrap();
            let h = harness(dir.path(), &script, T, true);
            let report = h.orchestrator.run().await;
            assert!(get(&h.counters.probes) <= MAX_PROBES, "{script:?}");
            assert!(get(&h.counters.starts) <= 1, "{script:?}");
            assert_eq!(report.probes, get(&h.counters.probes));
        }
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_alert() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path(), &[false, false], T + 1800, true);
        h.orchestrator.store().record_alert(T).unwrap();

        let report = h.orchestrator.run().await;

        assert_eq!(report.exit_code(), 1);
        assert!(matches!(
            report.escalation,
            Some(EscalationReport::Suppressed { .. })
        ));
        assert_eq!(get(&h.counters.calls), 0);
        assert_eq!(get(&h.counters.emails), 0);
        assert_eq!(h.orchestrator.store().load().last_alert_epoch, T);
    }

    #[tokio::test]
    async fn alert_fires_after_cooldown() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path(), &[false, false], T + 3700, true);
        h.orchestrator.store().record_alert(T).unwrap();

        h.orchestrator.run().await;

        assert_eq!(get(&h.counters.emails), 1);
        assert_eq!(h.orchestrator.store().load().last_alert_epoch, T + 3700);
    }

    #[tokio::test]
    async fn repeated_healthy_runs_leave_state_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());

        let first = harness(dir.path(), &[true], T, true).orchestrator.run().await;
        let after_first = std::fs::read(store.path()).unwrap();
        let second = harness(dir.path(), &[true], T + 1, true)
            .orchestrator
            .run()
            .await;
        let after_second = std::fs::read(store.path()).unwrap();

        assert_eq!(first.exit_code(), 0);
        assert_eq!(second.exit_code(), 0);
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn missing_state_file_still_alerts() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path(), &[false, false], T, true);
        assert!(!h.orchestrator.store().path().exists());

        h.orchestrator.run().await;

        assert_eq!(get(&h.counters.emails), 1);
        assert_eq!(get(&h.counters.calls), 1);
    }

    #[tokio::test]
    async fn no_voice_credentials_still_emails_and_fails() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path(), &[false, false], T, false);

        let report = h.orchestrator.run().await;

        assert_eq!(report.exit_code(), 1);
        assert_eq!(get(&h.counters.emails), 1);
        match report.escalation {
            Some(EscalationReport::Dispatched { voice, email }) => {
                assert!(matches!(voice, ChannelReport::Skipped(_)));
                assert_eq!(email, ChannelReport::Sent);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn held_lock_skips_without_probing() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path(), &[false, false], T, true);
        let _held = RunLock::try_acquire(dir.path()).unwrap().unwrap();

        let report = h.orchestrator.run_exclusive(dir.path()).await.unwrap();

        assert_eq!(report.outcome, CheckOutcome::Skipped);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(get(&h.counters.probes), 0);
    }

    #[tokio::test]
    async fn run_exclusive_runs_when_free() {
        let dir = TempDir::new().unwrap();
        let h = harness(dir.path(), &[true], T, true);
        let report = h.orchestrator.run_exclusive(dir.path()).await.unwrap();
        assert_eq!(report.outcome, CheckOutcome::Healthy);
        // lock released afterwards
        assert!(RunLock::try_acquire(dir.path()).unwrap().is_some());
    }
}
