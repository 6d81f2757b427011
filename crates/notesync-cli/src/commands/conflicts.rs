use std::path::Path;

use notesync_core::{Note, NoteRepository, SyncStatus};
use serde::Serialize;

use crate::commands::common::open_repository;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct UnresolvedItem {
    pub id: String,
    pub title: String,
    pub sync_status: SyncStatus,
    pub deleted: bool,
    pub version: i64,
    pub remote_version: Option<i64>,
    pub last_error: Option<String>,
}

pub async fn run_conflicts(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let repo = open_repository(db_path)?;
    let items = list_unresolved_items(&repo).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No notes need attention.");
        return Ok(());
    }

    for line in format_unresolved_lines(&items) {
        println!("{line}");
    }
    println!();
    println!("Edit or delete a conflicted note to keep your version; `notesync retry` re-queues failed ones.");
    Ok(())
}

pub async fn list_unresolved_items(repo: &NoteRepository) -> Result<Vec<UnresolvedItem>, CliError> {
    let mut items = Vec::new();
    for note in repo.list_unresolved().await? {
        let id = note.local_id;
        let ops = repo
            .store()
            .read(move |tx| tx.list_ops_for_note(&id))
            .await?;
        let last_error = ops.into_iter().rev().find_map(|op| op.last_error);
        items.push(unresolved_item(&note, last_error));
    }
    Ok(items)
}

fn unresolved_item(note: &Note, last_error: Option<String>) -> UnresolvedItem {
    UnresolvedItem {
        id: note.local_id.to_string(),
        title: note.title.clone(),
        sync_status: note.sync_status,
        deleted: note.deleted,
        version: note.version,
        remote_version: note.remote_version,
        last_error,
    }
}

pub fn format_unresolved_lines(items: &[UnresolvedItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let id = item.id.chars().take(13).collect::<String>();
            let title = if item.deleted {
                format!("{} (deleted)", item.title)
            } else {
                item.title.clone()
            };
            let remote = item
                .remote_version
                .map_or_else(|| "-".to_string(), |version| version.to_string());
            let mut line = format!(
                "{id:<13}  {:<8}  local=v{} remote=v{remote}  {title}",
                item.sync_status.as_str(),
                item.version
            );
            if let Some(error) = &item.last_error {
                line.push_str("  # ");
                line.push_str(error);
            }
            line
        })
        .collect()
}
