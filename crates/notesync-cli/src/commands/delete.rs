use std::path::Path;

use crate::commands::common::{normalize_note_identifier, open_repository, resolve_note};
use crate::error::CliError;

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let repo = open_repository(db_path)?;
    let note = resolve_note(&normalized_id, &repo).await?;

    repo.delete_note(&note.local_id).await?;
    println!("{}", note.local_id);
    Ok(())
}
