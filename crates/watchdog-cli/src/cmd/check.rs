use super::Context;
use crate::output::print_json;
use tracing::{error, info};
use watchdog_core::{CheckOutcome, Orchestrator};

/// Exit status used when a signal aborts the run mid-check.
const ABORTED_EXIT: i32 = 1;

pub async fn run(ctx: &Context, json: bool) -> anyhow::Result<i32> {
    let orchestrator = Orchestrator::from_config(&ctx.config, &ctx.state_dir);

    let report = tokio::select! {
        report = orchestrator.run_exclusive(&ctx.state_dir) => report?,
        signal = shutdown_signal() => {
            error!(signal, "interrupted, aborting check");
            return Ok(ABORTED_EXIT);
        }
    };

    match report.outcome {
        CheckOutcome::Healthy => info!(probes = report.probes, "check complete: healthy"),
        CheckOutcome::Recovered => info!(probes = report.probes, "check complete: recovered"),
        CheckOutcome::Failed => error!(
            probes = report.probes,
            recoveries = report.recoveries,
            "check complete: gateway down"
        ),
        CheckOutcome::Skipped => {}
    }

    if json {
        print_json(&report)?;
    }
    Ok(report.exit_code())
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            return tokio::select! {
                _ = term.recv() => "SIGTERM",
                _ = interrupt() => "SIGINT",
            };
        }
    }
    interrupt().await
}

async fn interrupt() -> &'static str {
    if tokio::signal::ctrl_c().await.is_err() {
        // No handler could be installed; never resolve.
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
