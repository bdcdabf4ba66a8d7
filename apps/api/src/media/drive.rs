//! Google Drive v3 client, API-key authenticated. Only publicly shared files
//! are visible to it.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::media::{MediaError, MediaFile};

const DRIVE_API: &str = "https://www.googleapis.com/drive/v3/files";
const FILE_FIELDS: &str = "id,name,mimeType,thumbnailLink";
const PAGE_SIZE: &str = "1000";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub thumbnail_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveErrorBody {
    error: DriveErrorDetail,
}

#[derive(Debug, Deserialize)]
struct DriveErrorDetail {
    message: String,
}

impl DriveFile {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn into_media_file(self) -> MediaFile {
        let thumbnail_url = self.thumbnail_link.unwrap_or_else(|| {
            format!("https://drive.google.com/thumbnail?id={}&sz=w640", self.id)
        });
        MediaFile {
            download_url: Some(format!(
                "https://drive.google.com/uc?export=download&id={}",
                self.id
            )),
            thumbnail_url,
            id: self.id,
            name: self.name,
            mime_type: self.mime_type,
            proxy_url: None,
        }
    }
}

pub fn images_only(files: Vec<DriveFile>) -> Vec<MediaFile> {
    files
        .into_iter()
        .filter(DriveFile::is_image)
        .map(DriveFile::into_media_file)
        .collect()
}

#[derive(Clone)]
pub struct DriveClient {
    client: Client,
    api_key: Option<String>,
}

impl DriveClient {
    pub fn new(client: Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }

    fn api_key(&self) -> Result<&str, MediaError> {
        self.api_key
            .as_deref()
            .ok_or(MediaError::NotConfigured("GOOGLE_DRIVE_API_KEY"))
    }

    /// Every image directly inside a shared folder, following pagination.
    pub async fn list_folder_images(&self, folder_id: &str) -> Result<Vec<MediaFile>, MediaError> {
        let key = self.api_key()?;
        let query = format!("'{folder_id}' in parents and trashed = false");
        let fields = format!("nextPageToken,files({FILE_FIELDS})");

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", query.as_str()),
                ("fields", fields.as_str()),
                ("pageSize", PAGE_SIZE),
                ("key", key),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let response = self.client.get(DRIVE_API).query(&params).send().await?;
            let page: FileList = check_status(response).await?.json().await?;
            files.extend(page.files);

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        debug!("Drive folder {folder_id}: {} entries", files.len());
        Ok(images_only(files))
    }

    /// A single shared file; non-images yield an empty list.
    pub async fn file_image(&self, file_id: &str) -> Result<Vec<MediaFile>, MediaError> {
        let key = self.api_key()?;
        let response = self
            .client
            .get(format!("{DRIVE_API}/{file_id}"))
            .query(&[("fields", FILE_FIELDS), ("key", key)])
            .send()
            .await?;
        let file: DriveFile = check_status(response).await?.json().await?;
        Ok(images_only(vec![file]))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, MediaError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<DriveErrorBody>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    Err(MediaError::Api {
        service: "Google Drive",
        status: status.as_u16(),
        message,
    })
}
