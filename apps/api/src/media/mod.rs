//! Media fetch: lists images behind a Google Drive or Dropbox shared link and
//! proxies Dropbox file bytes to the browser.

pub mod drive;
pub mod dropbox;
pub mod handlers;
pub mod links;

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Drive,
    Dropbox,
}

/// One image as returned to the client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub thumbnail_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Unrecognized media link: {0}")]
    UnrecognizedLink(String),

    #[error("{0} credentials are not configured")]
    NotConfigured(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} API error (status {status}): {message}")]
    Api {
        service: &'static str,
        status: u16,
        message: String,
    },
}

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::UnrecognizedLink(_) => {
                AppError::bad_request("INVALID_MEDIA_LINK", err.to_string())
            }
            MediaError::NotConfigured(name) => AppError::NotConfigured(name),
            MediaError::Api {
                service,
                status,
                message,
            } if (400..500).contains(&status) => AppError::Upstream {
                service,
                status: StatusCode::BAD_REQUEST,
                message,
            },
            MediaError::Api {
                service, message, ..
            } => AppError::Upstream {
                service,
                status: StatusCode::BAD_GATEWAY,
                message,
            },
            MediaError::Http(e) => AppError::Upstream {
                service: "Media",
                status: StatusCode::BAD_GATEWAY,
                message: e.to_string(),
            },
        }
    }
}

/// Best-effort image MIME type from a file name.
pub fn mime_for_name(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        _ => return None,
    };
    Some(mime)
}
