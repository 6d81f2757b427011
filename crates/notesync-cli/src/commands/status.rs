use std::path::Path;

use notesync_core::{ReachabilityProbe, SyncConfig};
use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, load_config, open_repository};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub db_path: String,
    pub remote_configured: bool,
    /// `None` when no remote is configured
    pub online: Option<bool>,
    pub notes: usize,
    pub pending_count: usize,
    pub unresolved_count: usize,
    pub last_sync_attempt_at: Option<i64>,
    pub last_sync_success_at: Option<i64>,
}

pub async fn run_status(
    as_json: bool,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let repo = open_repository(db_path)?;

    let meta = repo.store().read(|tx| tx.get_meta()).await?;
    let report = StatusReport {
        db_path: db_path.display().to_string(),
        remote_configured: config.rest_config().is_some(),
        online: probe_remote(&config).await?,
        notes: repo.list_notes().await?.len(),
        pending_count: repo.pending_count().await?,
        unresolved_count: repo.list_unresolved().await?.len(),
        last_sync_attempt_at: meta.last_sync_attempt_at,
        last_sync_success_at: meta.last_sync_success_at,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_status_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}

async fn probe_remote(config: &SyncConfig) -> Result<Option<bool>, CliError> {
    let (Some(url), Some(_)) = (config.api_base_url.as_deref(), config.rest_config()) else {
        return Ok(None);
    };

    let probe = ReachabilityProbe::new(url, config.probe_interval(), config.request_timeout())?;
    Ok(Some(probe.check().await))
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let remote = match report.online {
        None => "not configured".to_string(),
        Some(true) => "online".to_string(),
        Some(false) => "offline".to_string(),
    };
    let when = |timestamp: Option<i64>| timestamp.map_or_else(|| "never".to_string(), format_sync_timestamp);

    vec![
        format!("database:      {}", report.db_path),
        format!("remote:        {remote}"),
        format!("notes:         {}", report.notes),
        format!("pending:       {}", report.pending_count),
        format!("need attention: {}", report.unresolved_count),
        format!("last attempt:  {}", when(report.last_sync_attempt_at)),
        format!("last success:  {}", when(report.last_sync_success_at)),
    ]
}
