use std::path::Path;

use notesync_core::NoteInput;

use crate::commands::common::{normalize_content, open_repository, read_piped_stdin};
use crate::error::CliError;

pub async fn run_add(
    title_parts: &[String],
    body: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let title = normalize_content(&title_parts.join(" ")).ok_or(CliError::EmptyTitle)?;
    let body = match body {
        Some(body) => body.trim().to_string(),
        None => read_piped_stdin()?.unwrap_or_default(),
    };

    let repo = open_repository(db_path)?;
    let note = repo.create_note(&NoteInput::new(title, body)).await?;

    println!("{}", note.local_id);
    Ok(())
}
