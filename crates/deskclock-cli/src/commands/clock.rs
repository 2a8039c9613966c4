//! Commands that drive the state machine from the clock rather than from
//! a user action.

use std::time::Duration;

use chrono::NaiveDateTime;
use deskclock_core::{AlarmService, Outcome, ScheduledTransition};
use serde::Serialize;

use super::{print_json, App, CliResult};

#[derive(Serialize)]
struct Applied {
    #[serde(flatten)]
    transition: ScheduledTransition,
    result: Outcome,
}

pub fn tick(at: Option<NaiveDateTime>) -> CliResult {
    let app = App::open(at)?;
    let applied: Vec<Applied> = app
        .manager
        .run_due()?
        .into_iter()
        .map(|(transition, result)| Applied { transition, result })
        .collect();
    print_json(&applied)
}

pub fn fix(at: Option<NaiveDateTime>) -> CliResult {
    let app = App::open(at)?;
    print_json(&app.manager.fix_all_instances()?)
}

pub fn next(at: Option<NaiveDateTime>) -> CliResult {
    let app = App::open(at)?;
    print_json(&app.manager.next_firing_instance()?)
}

pub fn daemon(at: Option<NaiveDateTime>) -> CliResult {
    let app = App::open(at)?;
    let poll_interval = Duration::from_millis(app.config.daemon.poll_interval_ms.max(10));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let handle = AlarmService::new(app.manager.clone())
            .with_poll_interval(poll_interval)
            .spawn();
        tokio::signal::ctrl_c().await?;
        tracing::info!("interrupt received; shutting down");
        handle.shutdown().await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
