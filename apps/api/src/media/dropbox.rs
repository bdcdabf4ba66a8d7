//! Dropbox client for shared links.
//!
//! Uses a static access token when one is configured, otherwise exchanges the
//! refresh token for a short-lived one and caches it until shortly before it
//! expires. Thumbnails are fetched concurrently; a file whose thumbnail fails
//! is dropped from the listing rather than failing the request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::DropboxConfig;
use crate::media::{mime_for_name, MediaError, MediaFile};

const TOKEN_URL: &str = "https://api.dropbox.com/oauth2/token";
const API_URL: &str = "https://api.dropboxapi.com/2";
const CONTENT_URL: &str = "https://content.dropboxapi.com/2";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
pub struct FolderEntry {
    #[serde(rename = ".tag")]
    pub tag: String,
    pub name: String,
    pub id: Option<String>,
}

impl FolderEntry {
    /// Image files only; folders and other documents are skipped.
    pub fn image_mime(&self) -> Option<&'static str> {
        if self.tag == "file" {
            mime_for_name(&self.name)
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListFolderPage {
    entries: Vec<FolderEntry>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct SharedLinkMetadata {
    name: String,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// A proxied file body with the content type Dropbox reported.
pub struct ProxiedFile {
    pub content_type: Option<String>,
    pub response: reqwest::Response,
}

/// Relative URL of the media proxy for one file inside a shared link.
pub fn proxy_url(link: &str, path: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("link", link)
        .append_pair("path", path)
        .finish();
    format!("/api/media-proxy?{query}")
}

pub fn thumbnail_data_url(bytes: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes))
}

/// Dropbox-API-Arg for `get_thumbnail_v2` on a file reached through a shared link.
/// `path` is `None` when the link itself points at the file.
pub fn thumbnail_arg(link: &str, path: Option<&str>) -> Value {
    let mut resource = json!({ ".tag": "link", "url": link });
    if let Some(path) = path {
        resource["path"] = json!(path);
    }
    json!({
        "resource": resource,
        "format": "jpeg",
        "size": "w640h480",
        "mode": "bestfit",
    })
}

#[derive(Clone)]
pub struct DropboxClient {
    client: Client,
    config: DropboxConfig,
    token: Arc<Mutex<Option<(String, Instant)>>>,
}

impl DropboxClient {
    pub fn new(client: Client, config: DropboxConfig) -> Self {
        Self {
            client,
            config,
            token: Arc::new(Mutex::new(None)),
        }
    }

    async fn access_token(&self) -> Result<String, MediaError> {
        let (Some(app_key), Some(app_secret), Some(refresh_token)) = (
            self.config.app_key.as_deref(),
            self.config.app_secret.as_deref(),
            self.config.refresh_token.as_deref(),
        ) else {
            return self
                .config
                .access_token
                .clone()
                .ok_or(MediaError::NotConfigured("Dropbox"));
        };

        let mut cached = self.token.lock().await;
        if let Some((token, expires)) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < *expires {
                return Ok(token.clone());
            }
        }

        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", app_key),
                ("client_secret", app_secret),
            ])
            .send()
            .await?;
        let token: TokenResponse = check_status(response).await?.json().await?;

        debug!("Refreshed Dropbox access token (expires in {}s)", token.expires_in);
        let expires = Instant::now() + Duration::from_secs(token.expires_in);
        *cached = Some((token.access_token.clone(), expires));
        Ok(token.access_token)
    }

    async fn rpc<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Value,
    ) -> Result<T, MediaError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{API_URL}/{endpoint}"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Content endpoints take their argument as a JSON header and return raw bytes.
    async fn content(&self, endpoint: &str, arg: &Value) -> Result<reqwest::Response, MediaError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{CONTENT_URL}/{endpoint}"))
            .bearer_auth(token)
            .header("Dropbox-API-Arg", arg.to_string())
            .send()
            .await?;
        check_status(response).await
    }

    /// Every entry in a shared folder, following `has_more` cursors.
    pub async fn list_shared_folder(&self, link: &str) -> Result<Vec<FolderEntry>, MediaError> {
        let mut page: ListFolderPage = self
            .rpc(
                "files/list_folder",
                json!({ "path": "", "shared_link": { "url": link } }),
            )
            .await?;
        let mut entries = std::mem::take(&mut page.entries);
        while page.has_more {
            page = self
                .rpc("files/list_folder/continue", json!({ "cursor": page.cursor }))
                .await?;
            entries.append(&mut page.entries);
        }
        Ok(entries)
    }

    async fn thumbnail(&self, link: &str, path: Option<&str>) -> Result<String, MediaError> {
        let response = self
            .content("files/get_thumbnail_v2", &thumbnail_arg(link, path))
            .await?;
        Ok(thumbnail_data_url(&response.bytes().await?))
    }

    /// Images in a shared folder with inline thumbnails.
    pub async fn folder_images(&self, link: &str) -> Result<Vec<MediaFile>, MediaError> {
        let images: Vec<(FolderEntry, &'static str)> = self
            .list_shared_folder(link)
            .await?
            .into_iter()
            .filter_map(|entry| entry.image_mime().map(|mime| (entry, mime)))
            .collect();

        let fetches = images.into_iter().map(|(entry, mime)| async move {
            let path = format!("/{}", entry.name);
            match self.thumbnail(link, Some(&path)).await {
                Ok(thumbnail_url) => Some(MediaFile {
                    id: entry.id.clone().unwrap_or_else(|| path.clone()),
                    name: entry.name,
                    mime_type: mime.to_string(),
                    thumbnail_url,
                    download_url: None,
                    proxy_url: Some(proxy_url(link, &path)),
                }),
                Err(e) => {
                    warn!("Dropbox thumbnail failed for {path}: {e}");
                    None
                }
            }
        });

        Ok(join_all(fetches).await.into_iter().flatten().collect())
    }

    /// A shared link that points at a single file.
    pub async fn file_image(&self, link: &str) -> Result<Vec<MediaFile>, MediaError> {
        let meta: SharedLinkMetadata = self
            .rpc("sharing/get_shared_link_metadata", json!({ "url": link }))
            .await?;
        let Some(mime) = mime_for_name(&meta.name) else {
            return Ok(Vec::new());
        };
        let thumbnail_url = self.thumbnail(link, None).await?;
        Ok(vec![MediaFile {
            id: meta.id.unwrap_or_else(|| meta.name.clone()),
            name: meta.name,
            mime_type: mime.to_string(),
            thumbnail_url,
            download_url: None,
            proxy_url: Some(proxy_url(link, "")),
        }])
    }

    /// Opens the file at `path` inside the shared link for streaming.
    /// An empty `path` addresses the link's own file.
    pub async fn open_shared_file(&self, link: &str, path: &str) -> Result<ProxiedFile, MediaError> {
        let mut arg = json!({ "url": link });
        if !path.is_empty() {
            arg["path"] = json!(path);
        }
        let response = self.content("sharing/get_shared_link_file", &arg).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|ct| !ct.starts_with("application/octet-stream"))
            .map(str::to_string)
            .or_else(|| mime_for_name(path).map(str::to_string));
        Ok(ProxiedFile {
            content_type,
            response,
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, MediaError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("error_summary")
                .or_else(|| v.get("error_description"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(body);
    Err(MediaError::Api {
        service: "Dropbox",
        status: status.as_u16(),
        message,
    })
}
