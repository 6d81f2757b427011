use std::path::Path;

use notesync_core::NoteInput;

use crate::commands::common::{
    capture_editor_input_with_initial, normalize_note_identifier, open_repository,
    parse_editable, render_editable, resolve_note,
};
use crate::error::CliError;

pub async fn run_edit(
    id: &str,
    title: Option<&str>,
    body: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let repo = open_repository(db_path)?;
    let note = resolve_note(&normalized_id, &repo).await?;

    let input = if title.is_none() && body.is_none() {
        let initial = render_editable(&note.title, &note.body);
        let Some((title, body)) = capture_editor_input_with_initial(&initial)?
            .as_deref()
            .and_then(parse_editable)
        else {
            return Err(CliError::EmptyEditedContent);
        };
        NoteInput::new(title, body)
    } else {
        NoteInput::new(
            title.unwrap_or(note.title.as_str()),
            body.map_or_else(|| note.body.clone(), |body| body.trim().to_string()),
        )
    }
    .normalized()?;

    if input.title == note.title && input.body == note.body {
        println!("{}", note.local_id);
        return Ok(());
    }

    let updated = repo.update_note(&note.local_id, &input).await?;
    println!("{}", updated.local_id);
    Ok(())
}
