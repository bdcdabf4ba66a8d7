use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::errors::AppError;
use crate::media::links::{parse_media_link, MediaLink};
use crate::media::{MediaError, MediaFile, Provider};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct FetchMediaRequest {
    pub url: Option<String>,
}

#[derive(Serialize)]
pub struct FetchMediaResponse {
    pub success: bool,
    pub provider: Provider,
    pub files: Vec<MediaFile>,
    pub count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProxyQuery {
    pub link: Option<String>,
    pub path: Option<String>,
}

/// POST /api/fetch-media
pub async fn handle_fetch_media(
    State(state): State<AppState>,
    body: Option<Json<FetchMediaRequest>>,
) -> Result<Json<FetchMediaResponse>, AppError> {
    let raw = body
        .and_then(|Json(b)| b.url)
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::Validation("url is required".to_string()))?;
    let link = parse_media_link(&raw).ok_or_else(|| MediaError::UnrecognizedLink(raw.clone()))?;

    let provider = link.provider();
    let files = match &link {
        MediaLink::DriveFolder { id } => state.drive.list_folder_images(id).await?,
        MediaLink::DriveFile { id } => state.drive.file_image(id).await?,
        MediaLink::DropboxFolder { url } => state.dropbox.folder_images(url).await?,
        MediaLink::DropboxFile { url } => state.dropbox.file_image(url).await?,
    };

    info!("Fetched {} image(s) from {:?} link", files.len(), provider);
    Ok(Json(FetchMediaResponse {
        success: true,
        provider,
        count: files.len(),
        files,
    }))
}

/// GET /api/media-proxy?link=&path=
/// Streams one Dropbox file; an empty `path` addresses the link's own file.
pub async fn handle_media_proxy(
    State(state): State<AppState>,
    Query(params): Query<ProxyQuery>,
) -> Result<Response, AppError> {
    let (Some(link), Some(path)) = (
        params.link.filter(|l| !l.trim().is_empty()),
        params.path,
    ) else {
        return Err(AppError::Validation(
            "link and path query parameters are required".to_string(),
        ));
    };
    if !matches!(
        parse_media_link(&link),
        Some(MediaLink::DropboxFolder { .. } | MediaLink::DropboxFile { .. })
    ) {
        return Err(AppError::bad_request(
            "INVALID_MEDIA_LINK",
            "link must be a Dropbox shared link",
        ));
    }

    let file = state
        .dropbox
        .open_shared_file(&link, &path)
        .await
        .map_err(|e| match e {
            MediaError::NotConfigured(_) => AppError::from(e),
            other => {
                error!("Media proxy fetch failed for {path}: {other}");
                AppError::Upstream {
                    service: "Dropbox",
                    status: StatusCode::BAD_GATEWAY,
                    message: other.to_string(),
                }
            }
        })?;

    let content_type = file
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "private, max-age=3600".to_string()),
        ],
        Body::from_stream(file.response.bytes_stream()),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_response_shape() {
        let value = serde_json::to_value(FetchMediaResponse {
            success: true,
            provider: Provider::Dropbox,
            files: Vec::new(),
            count: 0,
        })
        .unwrap();
        assert_eq!(value["provider"], "dropbox");
        assert_eq!(value["count"], 0);
    }
}
