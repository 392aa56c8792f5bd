use super::Context;
use crate::output::{print_fields, print_json};
use chrono::{DateTime, Utc};
use tracing::warn;
use watchdog_core::alert::should_alert;
use watchdog_core::command::locate;
use watchdog_core::config::{ControllerKind, WatchdogConfig};
use watchdog_core::gateway::build_controller;
use watchdog_core::probe::CommandProbe;
use watchdog_core::state::StateStore;

#[derive(serde::Serialize)]
struct StatusOutput {
    state_file: String,
    last_alert_epoch: i64,
    cooldown_secs: u64,
    cooldown_remaining_secs: u64,
    /// `None` when the controller could not be queried.
    gateway_running: Option<bool>,
    remediation: String,
    voice_configured: bool,
    binaries: Vec<BinaryStatus>,
}

#[derive(serde::Serialize)]
struct BinaryStatus {
    name: String,
    path: Option<String>,
}

/// Read-only snapshot; never takes the run lock or writes state.
pub async fn run(ctx: &Context, json: bool) -> anyhow::Result<i32> {
    let cfg = &ctx.config;
    let store = StateStore::new(&ctx.state_dir);
    let state = store.load();
    let now = Utc::now().timestamp();

    let cooldown_remaining_secs = if state.has_alerted()
        && !should_alert(now, state.last_alert_epoch, cfg.alerts.cooldown_secs)
    {
        let elapsed = now.saturating_sub(state.last_alert_epoch).max(0) as u64;
        cfg.alerts.cooldown_secs.saturating_sub(elapsed)
    } else {
        0
    };

    let controller = build_controller(cfg, &ctx.state_dir);
    let gateway_running = match controller.is_running().await {
        Ok(running) => Some(running),
        Err(e) => {
            warn!(error = %e, "could not query gateway process");
            None
        }
    };

    let output = StatusOutput {
        state_file: store.path().display().to_string(),
        last_alert_epoch: state.last_alert_epoch,
        cooldown_secs: cfg.alerts.cooldown_secs,
        cooldown_remaining_secs,
        gateway_running,
        remediation: controller.remediation(),
        voice_configured: cfg.alerts.voice.is_some(),
        binaries: required_binaries(cfg)
            .into_iter()
            .map(|name| BinaryStatus {
                path: locate(&name).map(|p| p.display().to_string()),
                name,
            })
            .collect(),
    };

    if json {
        print_json(&output)?;
        return Ok(0);
    }

    let mut rows = vec![
        ("state file", output.state_file.clone()),
        ("last alert", describe_alert(output.last_alert_epoch)),
        (
            "cooldown",
            if output.cooldown_remaining_secs > 0 {
                format!("{}s remaining", output.cooldown_remaining_secs)
            } else {
                "ready to alert".to_string()
            },
        ),
        (
            "gateway",
            match output.gateway_running {
                Some(true) => "running".to_string(),
                Some(false) => "not running".to_string(),
                None => "unknown".to_string(),
            },
        ),
        ("restart with", output.remediation.clone()),
        (
            "voice alerts",
            if output.voice_configured { "configured" } else { "not configured" }.to_string(),
        ),
    ];
    for bin in &output.binaries {
        rows.push((
            bin.name.as_str(),
            bin.path.clone().unwrap_or_else(|| "NOT FOUND".to_string()),
        ));
    }
    print_fields(&rows);
    Ok(0)
}

fn describe_alert(epoch: i64) -> String {
    if epoch == 0 {
        return "never".to_string();
    }
    match DateTime::<Utc>::from_timestamp(epoch, 0) {
        Some(at) => at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => epoch.to_string(),
    }
}

/// External programs the configured run would invoke, deduplicated.
fn required_binaries(cfg: &WatchdogConfig) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let probe = CommandProbe::from_config(&cfg.probe);
    if let Some(first) = probe.argv().first() {
        names.push(first.clone());
    }
    match cfg.gateway.controller {
        ControllerKind::Process => {
            names.push("pkill".into());
            names.push("pgrep".into());
            if let Some(first) = cfg.gateway.start_command.first() {
                names.push(first.clone());
            }
        }
        ControllerKind::Service => names.push("systemctl".into()),
    }
    names.push(cfg.alerts.email_command.clone());

    let mut seen = std::collections::HashSet::new();
    names.retain(|n| !n.is_empty() && seen.insert(n.clone()));
    names
}
