use super::Context;
use crate::output::print_json;
use tracing::{error, info};
use watchdog_core::probe::{CommandProbe, Probe};

/// One probe, reported and nothing else: no restart, no alert, no state write.
pub async fn run(ctx: &Context, json: bool) -> anyhow::Result<i32> {
    let probe = CommandProbe::from_config(&ctx.config.probe);
    let result = probe.probe().await;

    if result.healthy {
        info!(diagnostic = %result.diagnostic, "gateway healthy");
    } else {
        error!(diagnostic = %result.diagnostic, "gateway unhealthy");
    }

    if json {
        print_json(&result)?;
    }
    Ok(if result.healthy { 0 } else { 1 })
}
