//! The download route: token lookup, login gate, file streaming, counting.

use super::{session::Session, state::ServerState};
use crate::downloads::token::{attachment_name, split_source_name};
use crate::downloads::{DownloadCounterStore, DownloadRecord, DownloadRecordStore};
use crate::mime_types::{mime_type_for_extension, DEFAULT_MIME_TYPE};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use tokio::{fs::File, io::BufReader};
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

const STREAM_BUFFER_SIZE: usize = 4096 * 16;

/// Terminal outcomes of a download request that do not stream the file.
/// Each maps to its own status: an unknown token is a plain not-found, a
/// missing login redirects the browser to the login page with a way back,
/// and an unreadable source is a server-side failure that names the
/// configured path so the author can fix the declaration.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("No download is registered under this link.")]
    RecordNotFound,
    #[error("You must be logged in to download this file.")]
    LoginRequired { login_url: String },
    #[error("The file {path} does not exist or cannot be read.")]
    SourceUnavailable { path: String },
    #[error("The download registry is unavailable.")]
    StoreFailure,
}

impl IntoResponse for DownloadError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            DownloadError::RecordNotFound => (StatusCode::NOT_FOUND, message).into_response(),
            DownloadError::LoginRequired { login_url } => Response::builder()
                .status(StatusCode::SEE_OTHER)
                .header(header::LOCATION, login_url)
                .body(Body::from(message))
                .unwrap(),
            DownloadError::SourceUnavailable { .. } | DownloadError::StoreFailure => {
                (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
            }
        }
    }
}

pub async fn serve_download(
    session: Option<Session>,
    State(state): State<ServerState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Response {
    match download_response(session, &state, &token, &headers).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn download_response(
    session: Option<Session>,
    state: &ServerState,
    token: &str,
    headers: &HeaderMap,
) -> Result<Response, DownloadError> {
    let record = match state.download_store.get_record(token) {
        Ok(Some(record)) if !record.source_path.is_empty() => record,
        Ok(_) => return Err(DownloadError::RecordNotFound),
        Err(err) => {
            error!("Failed to look up download record for {}: {}", token, err);
            return Err(DownloadError::StoreFailure);
        }
    };

    if record.login_required && session.is_none() {
        return Err(DownloadError::LoginRequired {
            login_url: login_url(state, token, headers),
        });
    }

    stream_source(state, &record).await
}

/// Where to send an unauthenticated browser: the login page, carrying the
/// referring page as the way back when known, otherwise the download URL
/// itself so logging in lands straight back on the file.
fn login_url(state: &ServerState, token: &str, headers: &HeaderMap) -> String {
    let return_to = headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
        .map(|referer| referer.to_owned())
        .unwrap_or_else(|| format!("/{}/{}", state.config.download_route_prefix, token));

    format!(
        "{}?return_to={}",
        state.config.login_path,
        urlencoding::encode(&return_to)
    )
}

async fn stream_source(
    state: &ServerState,
    record: &DownloadRecord,
) -> Result<Response, DownloadError> {
    let source_unavailable = || DownloadError::SourceUnavailable {
        path: record.source_path.clone(),
    };

    let file = File::open(&record.source_path)
        .await
        .map_err(|_| source_unavailable())?;
    let file_length = file
        .metadata()
        .await
        .map_err(|_| source_unavailable())?
        .len();

    let (stem, extension) = split_source_name(&record.source_path);
    let mime_type = extension
        .map(mime_type_for_extension)
        .unwrap_or(DEFAULT_MIME_TYPE);

    debug!(
        "Streaming {} ({} bytes) for token {}",
        record.source_path, file_length, record.token
    );

    // The bytes are on their way out; a counting failure must not take the
    // download down with it.
    match state.download_store.increment_and_persist(stem) {
        Ok(count) => debug!("Download count for {} is now {}", stem, count),
        Err(err) => error!("Failed to persist download count for {}: {}", stem, err),
    }

    let file_reader = BufReader::with_capacity(STREAM_BUFFER_SIZE, file);
    let stream = ReaderStream::with_capacity(file_reader, STREAM_BUFFER_SIZE);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"",
                attachment_name(&record.source_path)
            ),
        )
        .header(header::CONTENT_LENGTH, file_length)
        .body(Body::from_stream(stream))
        .unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses() {
        assert_eq!(
            DownloadError::RecordNotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DownloadError::StoreFailure.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            DownloadError::SourceUnavailable {
                path: "/srv/a.pdf".to_owned()
            }
            .into_response()
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn login_redirect_carries_the_location() {
        let response = DownloadError::LoginRequired {
            login_url: "/login?return_to=%2Fsecure-download%2Fa.pdf".to_owned(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/login?return_to=%2Fsecure-download%2Fa.pdf"
        );
    }

    #[test]
    fn source_unavailable_names_the_path() {
        let err = DownloadError::SourceUnavailable {
            path: "/srv/docs/report.pdf".to_owned(),
        };
        assert!(err.to_string().contains("/srv/docs/report.pdf"));
    }
}
