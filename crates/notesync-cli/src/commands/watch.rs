use std::path::Path;

use notesync_core::ReachabilityProbe;

use crate::commands::common::{format_watch_line, load_config, open_sync_app};
use crate::error::CliError;

/// Run the sync loop in the foreground until Ctrl-C.
///
/// Connectivity comes from a reachability probe against the configured API;
/// a periodic background request also picks up edits made by other
/// processes sharing the same database.
pub async fn run_watch(db_path: &Path, config_path: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let Some(probe_url) = config.api_base_url.clone() else {
        return Err(CliError::SyncNotConfigured);
    };

    let probe = ReachabilityProbe::new(probe_url, config.probe_interval(), config.request_timeout())?;
    let online = probe.check().await;
    let app = open_sync_app(db_path, &config, online)?;
    app.load().await?;

    let probe_task = probe.spawn(app.connectivity().clone());
    let app_task = app.start();
    let mut snapshots = app.subscribe();
    let mut ticker = tokio::time::interval(config.probe_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    tracing::info!(online, "Watching for changes, press Ctrl-C to stop");
    let mut last_line = None;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            _ = ticker.tick() => {
                app.trigger().fire(app.trigger().tag());
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = format_watch_line(&snapshots.borrow_and_update());
                if last_line.as_ref() != Some(&line) {
                    println!("{line}");
                    last_line = Some(line);
                }
            }
        }
    }

    probe_task.abort();
    app_task.abort();
    Ok(())
}
