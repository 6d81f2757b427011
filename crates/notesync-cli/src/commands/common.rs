use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use notesync_core::{
    AppSnapshot, ConnectivityMonitor, LocalStore, Note, NoteId, NoteRepository, NotesApp,
    RestNoteService, SyncConfig, SyncResult, SyncStatus,
};
use serde::Serialize;

use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;

pub type SyncApp = NotesApp<RestNoteService>;

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub remote_id: Option<String>,
    pub title: String,
    pub preview: String,
    pub body: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
    pub version: i64,
    pub sync_status: SyncStatus,
    pub deleted: bool,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("NOTESYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("notesync")
        .join("notes.db")
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> Option<PathBuf> {
    cli_config_path.or_else(|| {
        dirs::config_dir().map(|dir| dir.join("notesync").join("config.json"))
    })
}

pub fn load_config(config_path: Option<&Path>) -> Result<SyncConfig, CliError> {
    Ok(SyncConfig::load(config_path)?)
}

pub fn open_repository(db_path: &Path) -> Result<NoteRepository, CliError> {
    Ok(NoteRepository::new(LocalStore::open(db_path)?))
}

/// Facade wired to the configured REST service
pub fn open_sync_app(db_path: &Path, config: &SyncConfig, online: bool) -> Result<SyncApp, CliError> {
    let Some(rest_config) = config.rest_config() else {
        return Err(CliError::SyncNotConfigured);
    };

    let remote = RestNoteService::new(rest_config)?;
    let store = LocalStore::open(db_path)?;
    Ok(NotesApp::from_config(
        store,
        remote,
        ConnectivityMonitor::new(online),
        config,
    ))
}

pub async fn resolve_note(note_query: &str, repo: &NoteRepository) -> Result<Note, CliError> {
    if let Ok(note_id) = note_query.parse::<NoteId>() {
        if let Some(note) = repo.get_note(&note_id).await? {
            return Ok(note);
        }
    }

    let mut matching = repo.find_by_id_prefix(note_query, 3).await?;
    if matching.len() > 1 {
        let options = matching
            .iter()
            .map(|note| short_id(&note.local_id))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(CliError::AmbiguousNoteId(format!(
            "ID prefix '{note_query}' is ambiguous; matches: {options}"
        )));
    }

    matching
        .pop()
        .ok_or_else(|| CliError::NoteNotFound(note_query.to_string()))
}

pub fn short_id(id: &NoteId) -> String {
    id.to_string().chars().take(SHORT_ID_LEN).collect()
}

pub fn format_note_lines(notes: &[Note]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let short_id = short_id(&note.local_id);
            let status = status_label(note);
            let preview = note_preview(note, 40);
            let relative_time = format_relative_time(note.updated_at, now_ms);

            format!("{short_id:<13}  {status:<9}  {preview:<40}  {relative_time}")
        })
        .collect()
}

fn status_label(note: &Note) -> String {
    if note.deleted {
        format!("{}*", note.sync_status)
    } else {
        note.sync_status.to_string()
    }
}

pub fn format_note_detail(note: &Note) -> Vec<String> {
    let mut lines = vec![
        format!("id:       {}", note.local_id),
        format!(
            "remote:   {}",
            note.remote_id.as_deref().unwrap_or("(not synced yet)")
        ),
        format!("status:   {}", note.sync_status),
        format!("version:  {}", note.version),
        format!("updated:  {}", format_sync_timestamp(note.updated_at)),
        String::new(),
        note.title.clone(),
    ];
    if !note.body.is_empty() {
        lines.push(String::new());
        lines.extend(note.body.lines().map(str::to_string));
    }
    lines
}

pub fn note_to_list_item(note: &Note) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();

    NoteListItem {
        id: note.local_id.to_string(),
        remote_id: note.remote_id.clone(),
        title: note.title.clone(),
        preview: note_preview(note, 80),
        body: note.body.clone(),
        created_at: note.created_at,
        updated_at: note.updated_at,
        relative_time: format_relative_time(note.updated_at, now_ms),
        version: note.version,
        sync_status: note.sync_status,
        deleted: note.deleted,
    }
}

pub fn note_preview(note: &Note, max_chars: usize) -> String {
    let first_line = note.title.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_result(result: &SyncResult) -> String {
    let summary = format!(
        "pushed {} change{}, pulled {}",
        result.synced,
        if result.synced == 1 { "" } else { "s" },
        result.pulled
    );

    match (&result.error, result.success) {
        (None, true) => format!("Sync completed: {summary}"),
        (Some(error), _) => format!("Sync incomplete: {summary}; {error}"),
        (None, false) => format!("Sync incomplete: {summary}"),
    }
}

pub fn format_watch_line(snapshot: &AppSnapshot) -> String {
    let mut line = format!(
        "[{}] notes={} pending={}",
        snapshot.sync_state.label(),
        snapshot.notes.len(),
        snapshot.pending_count
    );
    if let Some(error) = &snapshot.error {
        line.push_str("  ");
        line.push_str(error);
    }
    line
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_note_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyNoteId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Editor buffer layout: title on the first line, body after a blank line
pub fn render_editable(title: &str, body: &str) -> String {
    if body.is_empty() {
        format!("{title}\n")
    } else {
        format!("{title}\n\n{body}\n")
    }
}

pub fn parse_editable(content: &str) -> Option<(String, String)> {
    let content = normalize_content(content)?;
    let (title, body) = content.split_once('\n').unwrap_or((content.as_str(), ""));
    Some((title.trim().to_string(), body.trim().to_string()))
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input_with_initial(initial_content: &str) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_note_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let note_content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&note_content))
}

fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) => {
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            // Editor commands with args, e.g. "code --wait"
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let mut command = Command::new(program);
            command.args(parts).arg(file_path);

            let status = command.status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

fn create_temp_note_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("notesync-{}-{now}.md", std::process::id()))
}
