use std::fs;
use std::io::ErrorKind;

use axum::{
    extract::{Path as UrlPath, State},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::atomic_write::write_atomic;
use crate::error::ApiError;
use crate::session;
use crate::{AppState, SharedState};

/// Everything the front end needs to start an edit session on one file.
#[derive(Debug, Serialize)]
pub struct EditPayload {
    pub content: String,
    pub filename: String,
    pub read_only: bool,
    pub generation: u64,
    pub csrf_token: String,
}

/// Body of `POST /save`: the edited content plus the generation the client
/// was handed when it opened the file.
#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    pub filename: String,
    pub content: String,
    pub generation: u64,
    pub csrf_token: String,
}

pub async fn index() -> Html<&'static str> {
    Html("Append <tt>/e/filename.txt</tt> to the URL to start editing.")
}

/// GET /e/{path}
pub async fn edit(
    State(state): State<SharedState>,
    jar: CookieJar,
    UrlPath(filename): UrlPath<String>,
) -> Response {
    if !session::is_authenticated(&state, &jar) {
        let next = format!("/e/{}", filename);
        return Redirect::to(&format!("/login?next={}", urlencoding::encode(&next)))
            .into_response();
    }

    match open_for_edit(&state, &filename) {
        Ok(payload) => Json(payload).into_response(),
        Err(err) => err.into_response(),
    }
}

/// POST /save
pub async fn save(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(req): Json<SaveRequest>,
) -> Response {
    if !session::is_authenticated(&state, &jar) {
        return ApiError::Unauthorized("not logged in").into_response();
    }

    match apply_save(&state, &req) {
        Ok(()) => {
            info!("saved {}", req.filename);
            "OK".into_response()
        }
        Err(err) => {
            warn!("save of {} rejected: {}", req.filename, err);
            err.into_response()
        }
    }
}

/// The Viewing -> Editing transition: resolve, read, hand out the current
/// generation and the process CSRF token.
fn open_for_edit(state: &AppState, filename: &str) -> Result<EditPayload, ApiError> {
    let path = state.sandbox.resolve(filename)?;

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            // Not an error: the file comes into existence on first save.
            warn!("{} does not exist yet; starting an empty document", filename);
            String::new()
        }
        Err(e) => return Err(e.into()),
    };

    let read_only = fs::metadata(&path)
        .map(|m| m.permissions().readonly())
        .unwrap_or(false);

    Ok(EditPayload {
        content,
        filename: filename.to_string(),
        read_only,
        generation: state.versions.get_or_init(filename),
        csrf_token: state.csrf_token.clone(),
    })
}

/// The Saving transition. Check order matters: CSRF, then path, then
/// generation, and only then the write. The generation is consumed before
/// the write is attempted, so a failed write still forces the client to
/// reload; see DESIGN.md for why that ordering is kept.
fn apply_save(state: &AppState, req: &SaveRequest) -> Result<(), ApiError> {
    if req.csrf_token != state.csrf_token {
        return Err(ApiError::Unauthorized("invalid CSRF token"));
    }

    // Re-resolve at save time: the payload path is attacker-controlled and
    // the filesystem may have changed since the file was opened.
    let path = state.sandbox.resolve(&req.filename)?;

    state.versions.check_and_advance(&req.filename, req.generation)?;

    write_atomic(&path, &req.content)?;
    Ok(())
}
