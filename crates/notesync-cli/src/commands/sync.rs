use std::path::Path;

use crate::commands::common::{format_sync_result, load_config, open_repository, open_sync_app};
use crate::error::CliError;

pub async fn run_sync(
    as_json: bool,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let app = open_sync_app(db_path, &config, true)?;
    app.load().await?;

    let result = app.sync_notes().await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", format_sync_result(&result));
    }

    if result.success {
        Ok(())
    } else {
        Err(CliError::SyncIncomplete(
            result
                .error
                .unwrap_or_else(|| "unknown sync failure".to_string()),
        ))
    }
}

pub async fn run_retry(db_path: &Path) -> Result<(), CliError> {
    let repo = open_repository(db_path)?;
    let rearmed = repo.retry_failed().await?;

    if rearmed == 0 {
        println!("No failed notes to retry.");
    } else {
        println!("Re-queued {rearmed} note(s); run `notesync sync` to push them.");
    }
    Ok(())
}
