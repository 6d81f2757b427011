use std::path::Path;

use crate::commands::common::{
    format_note_detail, normalize_note_identifier, note_to_list_item, open_repository,
    resolve_note,
};
use crate::error::CliError;

pub async fn run_show(id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let repo = open_repository(db_path)?;
    let note = resolve_note(&normalized_id, &repo).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&note_to_list_item(&note))?);
    } else {
        for line in format_note_detail(&note) {
            println!("{line}");
        }
    }
    Ok(())
}
