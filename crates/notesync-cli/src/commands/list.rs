use std::path::Path;

use crate::commands::common::{format_note_lines, note_to_list_item, open_repository, NoteListItem};
use crate::error::CliError;

pub async fn run_list(include_deleted: bool, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let repo = open_repository(db_path)?;
    let notes = if include_deleted {
        repo.list_all_notes().await?
    } else {
        repo.list_notes().await?
    };

    if as_json {
        let json_items = notes
            .iter()
            .map(note_to_list_item)
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if notes.is_empty() {
        println!("No notes yet.");
    } else {
        for line in format_note_lines(&notes) {
            println!("{line}");
        }
    }

    Ok(())
}
