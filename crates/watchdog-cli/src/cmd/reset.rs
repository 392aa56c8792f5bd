use super::Context;
use crate::output::print_json;
use watchdog_core::lock::RunLock;
use watchdog_core::state::StateStore;

#[derive(serde::Serialize)]
struct ResetOutput {
    cleared: bool,
    previous_alert_epoch: i64,
}

pub fn run(ctx: &Context, json: bool) -> anyhow::Result<i32> {
    let Some(_lock) = RunLock::try_acquire(&ctx.state_dir)? else {
        anyhow::bail!("a check is in progress; try again when it finishes");
    };

    let store = StateStore::new(&ctx.state_dir);
    let previous = store.load();
    store.clear()?;
    let cleared = previous.has_alerted();

    if json {
        print_json(&ResetOutput {
            cleared,
            previous_alert_epoch: previous.last_alert_epoch,
        })?;
    } else if cleared {
        println!("Alert cooldown cleared.");
    } else {
        println!("No alert recorded; nothing to clear.");
    }
    Ok(0)
}
