//! PostgREST-style HTTP client for the remote `notes` collection.

use std::fmt;
use std::time::Duration;

use reqwest::header::{ACCEPT, ETAG, IF_NONE_MATCH};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{RemoteError, RemoteNote, RemoteNoteService, RemoteResult, RemoteSnapshot};
use crate::error::{Error, Result};
use crate::models::NotePayload;
use crate::util::{is_http_url, normalize_text_option};

/// Connection settings for [`RestNoteService`]
#[derive(Clone, PartialEq, Eq)]
pub struct RestServiceConfig {
    /// REST root, e.g. `https://project.supabase.co/rest/v1`
    pub base_url: String,
    pub api_key: String,
    pub user_id: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for RestServiceConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RestServiceConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Clone)]
pub struct RestNoteService {
    notes_url: String,
    api_key: String,
    user_id: String,
    client: Client,
}

impl fmt::Debug for RestNoteService {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RestNoteService")
            .field("notes_url", &self.notes_url)
            .field("api_key", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl RestNoteService {
    pub fn new(config: RestServiceConfig) -> Result<Self> {
        let base_url = normalize_base_url(config.base_url)?;
        let api_key = normalize_text_option(Some(config.api_key))
            .ok_or_else(|| Error::Config("API key must not be empty".to_string()))?;
        let user_id = normalize_text_option(Some(config.user_id))
            .ok_or_else(|| Error::Config("user id must not be empty".to_string()))?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            notes_url: format!("{base_url}/notes"),
            api_key,
            user_id,
            client,
        })
    }

    fn request(&self, method: Method) -> RequestBuilder {
        self.client
            .request(method, &self.notes_url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "application/json")
            .query(&[("user_id", eq(&self.user_id))])
    }

    async fn fetch_one(&self, remote_id: &str) -> RemoteResult<Option<RemoteNote>> {
        let response = send(self.request(Method::GET).query(&[("id", eq(remote_id))])).await?;
        Ok(read_rows(response).await?.into_iter().next())
    }
}

impl RemoteNoteService for RestNoteService {
    async fn fetch_all(&self, cursor: Option<&str>) -> RemoteResult<Option<RemoteSnapshot>> {
        let mut request = self
            .request(Method::GET)
            .query(&[("order", "updated_at.desc")]);
        if let Some(cursor) = cursor {
            request = request.header(IF_NONE_MATCH, cursor);
        }

        let response = send(request).await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(None);
        }

        let cursor = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let notes = read_rows(response).await?;
        Ok(Some(RemoteSnapshot { notes, cursor }))
    }

    async fn create(&self, payload: &NotePayload) -> RemoteResult<RemoteNote> {
        let body = WireNoteWrite::new(&self.user_id, payload);
        let request = self
            .client
            .post(&self.notes_url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "application/json")
            .header("Prefer", "return=representation")
            .json(&body);

        let response = send(request).await.map_err(|error| match error {
            RemoteError::Conflict { .. } => RemoteError::Rejected {
                status: StatusCode::CONFLICT.as_u16(),
                message: "note already exists".to_string(),
            },
            other => other,
        })?;

        read_rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Network("create returned no representation".to_string()))
    }

    async fn update(
        &self,
        remote_id: &str,
        payload: &NotePayload,
        base_version: i64,
    ) -> RemoteResult<RemoteNote> {
        let body = WireNoteWrite::new(&self.user_id, payload);
        let request = self
            .request(Method::PATCH)
            .query(&[("id", eq(remote_id)), ("version", eq(base_version))])
            .header("Prefer", "return=representation")
            .json(&body);

        let rows = match send(request).await {
            Ok(response) => read_rows(response).await?,
            Err(RemoteError::Conflict { .. }) => Vec::new(),
            Err(error) => return Err(error),
        };
        if let Some(note) = rows.into_iter().next() {
            return Ok(note);
        }

        // Nothing matched: either the version moved on or the row is gone.
        match self.fetch_one(remote_id).await? {
            Some(current) => Err(RemoteError::Conflict {
                remote_version: current.version,
            }),
            None => Err(RemoteError::NotFound),
        }
    }

    async fn delete(&self, remote_id: &str) -> RemoteResult<()> {
        let request = self
            .request(Method::DELETE)
            .query(&[("id", eq(remote_id))])
            .header("Prefer", "return=representation");

        let rows = read_rows(send(request).await?).await?;
        if rows.is_empty() {
            return Err(RemoteError::NotFound);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WireNote {
    id: String,
    title: String,
    #[serde(default)]
    content: Option<String>,
    version: i64,
    updated_at: i64,
}

impl From<WireNote> for RemoteNote {
    fn from(value: WireNote) -> Self {
        Self {
            id: value.id,
            title: value.title,
            body: value.content.unwrap_or_default(),
            version: value.version,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireNoteWrite<'a> {
    user_id: &'a str,
    title: &'a str,
    content: &'a str,
    version: i64,
    updated_at: i64,
}

impl<'a> WireNoteWrite<'a> {
    fn new(user_id: &'a str, payload: &'a NotePayload) -> Self {
        Self {
            user_id,
            title: &payload.title,
            content: &payload.body,
            version: payload.version,
            updated_at: payload.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error: Option<String>,
    hint: Option<String>,
}

fn eq(value: impl fmt::Display) -> String {
    format!("eq.{value}")
}

async fn send(request: RequestBuilder) -> RemoteResult<Response> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    if status.is_success() || status == StatusCode::NOT_MODIFIED {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

async fn read_rows(response: Response) -> RemoteResult<Vec<RemoteNote>> {
    let rows = response
        .json::<Vec<WireNote>>()
        .await
        .map_err(|error| RemoteError::Network(format!("invalid response payload: {error}")))?;
    Ok(rows.into_iter().map(RemoteNote::from).collect())
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Network(error.to_string())
    }
}

fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound,
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            RemoteError::Conflict { remote_version: 0 }
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => RemoteError::Unavailable {
            status: status.as_u16(),
            message,
        },
        status if status.is_server_error() => RemoteError::Unavailable {
            status: status.as_u16(),
            message,
        },
        status => RemoteError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return match payload.hint {
                Some(hint) => format!("{} ({hint})", message.trim()),
                None => message.trim().to_string(),
            };
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed.to_string()
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("API URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "API URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> RestServiceConfig {
        RestServiceConfig {
            base_url: "https://example.supabase.co/rest/v1/".to_string(),
            api_key: "anon-secret".to_string(),
            user_id: "user-1".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn new_normalizes_base_url() {
        let service = RestNoteService::new(config()).unwrap();
        assert_eq!(
            service.notes_url,
            "https://example.supabase.co/rest/v1/notes"
        );
    }

    #[test]
    fn new_rejects_invalid_configuration() {
        let mut bad_url = config();
        bad_url.base_url = "example.supabase.co".to_string();
        assert!(matches!(
            RestNoteService::new(bad_url),
            Err(Error::Config(_))
        ));

        let mut no_key = config();
        no_key.api_key = "   ".to_string();
        assert!(matches!(RestNoteService::new(no_key), Err(Error::Config(_))));

        let mut no_user = config();
        no_user.user_id = String::new();
        assert!(matches!(
            RestNoteService::new(no_user),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn debug_redacts_api_key() {
        let debug = format!("{:?} {:?}", config(), RestNoteService::new(config()).unwrap());
        assert!(!debug.contains("anon-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_error(StatusCode::NOT_FOUND, ""), RemoteError::NotFound);
        assert!(matches!(
            status_error(StatusCode::PRECONDITION_FAILED, ""),
            RemoteError::Conflict { .. }
        ));
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_transient());
        assert_eq!(
            status_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                r#"{"message":"title too long","hint":"max 200"}"#
            ),
            RemoteError::Rejected {
                status: 422,
                message: "title too long (max 200)".to_string()
            }
        );
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            RemoteError::Rejected {
                status: 401,
                message: "HTTP 401".to_string()
            }
        );
    }

    #[test]
    fn wire_note_maps_content_to_body() {
        let wire: WireNote = serde_json::from_str(
            r#"{"id":"r1","user_id":"u","title":"T","content":null,"version":3,"updated_at":99}"#,
        )
        .unwrap();
        let note = RemoteNote::from(wire);
        assert_eq!(note.body, "");
        assert_eq!(note.version, 3);
    }
}
