//! Shared-link recognition for Google Drive and Dropbox.

use url::Url;

use crate::media::Provider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaLink {
    DriveFolder { id: String },
    DriveFile { id: String },
    /// `url` is the shared link as given; Dropbox needs its query (`rlkey`) intact.
    DropboxFolder { url: String },
    DropboxFile { url: String },
}

impl MediaLink {
    pub fn provider(&self) -> Provider {
        match self {
            MediaLink::DriveFolder { .. } | MediaLink::DriveFile { .. } => Provider::Drive,
            MediaLink::DropboxFolder { .. } | MediaLink::DropboxFile { .. } => Provider::Dropbox,
        }
    }
}

fn host_matches(url: &Url, domain: &str) -> bool {
    url.host_str().is_some_and(|host| {
        let host = host.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    })
}

fn valid_drive_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn parse_drive(url: &Url) -> Option<MediaLink> {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let from_path = match segments.as_slice() {
        ["drive", "folders", id, ..] | ["drive", "u", _, "folders", id, ..] => {
            Some(MediaLink::DriveFolder { id: id.to_string() })
        }
        ["file", "d", id, ..] | ["file", "u", _, "d", id, ..] => {
            Some(MediaLink::DriveFile { id: id.to_string() })
        }
        _ => None,
    };
    let link = from_path.or_else(|| {
        let id = url
            .query_pairs()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.into_owned())?;
        match segments.as_slice() {
            ["open"] | ["uc"] => Some(MediaLink::DriveFile { id }),
            _ => None,
        }
    })?;

    let valid = match &link {
        MediaLink::DriveFolder { id } | MediaLink::DriveFile { id } => valid_drive_id(id),
        _ => false,
    };
    valid.then_some(link)
}

fn parse_dropbox(url: &Url) -> Option<MediaLink> {
    let mut segments = url.path_segments()?.filter(|seg| !seg.is_empty());
    let owned = url.to_string();
    match (segments.next()?, segments.next()) {
        ("s", Some(_)) => Some(MediaLink::DropboxFile { url: owned }),
        ("sh", Some(_)) => Some(MediaLink::DropboxFolder { url: owned }),
        ("scl", Some("fi")) => segments.next().map(|_| MediaLink::DropboxFile { url: owned }),
        ("scl", Some("fo")) => segments.next().map(|_| MediaLink::DropboxFolder { url: owned }),
        _ => None,
    }
}

/// Classifies a pasted link. Returns `None` for anything that is neither a
/// Drive nor a Dropbox shared link.
pub fn parse_media_link(raw: &str) -> Option<MediaLink> {
    let raw = raw.trim();
    let url = Url::parse(raw)
        .or_else(|_| Url::parse(&format!("https://{raw}")))
        .ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    if host_matches(&url, "drive.google.com") || host_matches(&url, "docs.google.com") {
        parse_drive(&url)
    } else if host_matches(&url, "dropbox.com") {
        parse_dropbox(&url)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_folder_links() {
        assert_eq!(
            parse_media_link("https://drive.google.com/drive/folders/1AbC-d_E?usp=sharing"),
            Some(MediaLink::DriveFolder {
                id: "1AbC-d_E".into()
            })
        );
        assert_eq!(
            parse_media_link("https://drive.google.com/drive/u/1/folders/XYZ123"),
            Some(MediaLink::DriveFolder { id: "XYZ123".into() })
        );
    }

    #[test]
    fn test_drive_file_links() {
        assert_eq!(
            parse_media_link("https://drive.google.com/file/d/FILE42/view?usp=drive_link"),
            Some(MediaLink::DriveFile { id: "FILE42".into() })
        );
        assert_eq!(
            parse_media_link("https://drive.google.com/open?id=FILE42"),
            Some(MediaLink::DriveFile { id: "FILE42".into() })
        );
        assert_eq!(
            parse_media_link("drive.google.com/uc?export=download&id=FILE42"),
            Some(MediaLink::DriveFile { id: "FILE42".into() })
        );
    }

    #[test]
    fn test_dropbox_links() {
        let folder = "https://www.dropbox.com/scl/fo/abc123/xyz?rlkey=k1&dl=0";
        assert_eq!(
            parse_media_link(folder),
            Some(MediaLink::DropboxFolder { url: folder.into() })
        );
        let file = "https://www.dropbox.com/scl/fi/abc123/house.jpg?rlkey=k2&dl=0";
        assert_eq!(
            parse_media_link(file),
            Some(MediaLink::DropboxFile { url: file.into() })
        );
        assert!(matches!(
            parse_media_link("https://www.dropbox.com/sh/abc/def"),
            Some(MediaLink::DropboxFolder { .. })
        ));
        assert!(matches!(
            parse_media_link("https://dropbox.com/s/abc/photo.png"),
            Some(MediaLink::DropboxFile { .. })
        ));
    }

    #[test]
    fn test_unrecognized_links() {
        assert_eq!(parse_media_link(""), None);
        assert_eq!(parse_media_link("https://example.com/drive/folders/abc"), None);
        assert_eq!(parse_media_link("https://drive.google.com/drive/my-drive"), None);
        assert_eq!(parse_media_link("https://www.dropbox.com/home"), None);
        assert_eq!(parse_media_link("https://notdropbox.com/s/abc/x.jpg"), None);
        assert_eq!(parse_media_link("ftp://drive.google.com/drive/folders/abc"), None);
    }

    #[test]
    fn test_provider() {
        assert_eq!(
            MediaLink::DriveFile { id: "x".into() }.provider(),
            Provider::Drive
        );
        assert_eq!(
            MediaLink::DropboxFolder { url: "x".into() }.provider(),
            Provider::Dropbox
        );
    }
}
