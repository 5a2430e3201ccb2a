//! Provider adapters.
//!
//! Every adapter implements [`Destination`](crate::Destination) for one
//! service. Helpers shared by several adapters live here.

pub mod dropbox;
pub mod gyazo;
pub mod imgbb;
pub mod imgur;
pub mod onedrive;

pub use dropbox::DropboxDestination;
pub use gyazo::GyazoDestination;
pub use imgbb::ImgBBDestination;
pub use imgur::ImgurDestination;
pub use onedrive::OneDriveDestination;

use bytes::Bytes;
use chrono::Utc;
use reqwest::multipart::Part;
use url::Url;

use capshare_common::{
    DestinationSettings, Error, Result, ResultExt, ShareFile, ShareResponse,
};

use crate::destination::{DestinationKind, PanelItem, SettingsPanel};
use crate::file::mime_type_for;
use crate::token::{ACCESS_TOKEN, USERNAME};

/// Normalized response for a finished upload.
pub(crate) fn share_response(
    kind: DestinationKind,
    file: &ShareFile,
    link: String,
    share_id: String,
    delete_id: Option<String>,
    anon: bool,
) -> ShareResponse {
    ShareResponse {
        destination_id: kind.id(),
        path: file.path.clone(),
        size: file.size,
        dimensions: file.dimensions,
        date: Utc::now(),
        link,
        share_id,
        delete_id,
        anon,
    }
}

/// `base` with `segments` appended, each percent-encoded as needed.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base).host_context(format!("Invalid API URL '{}'", base))?;
    url.path_segments_mut()
        .map_err(|_| Error::host(format!("API URL '{}' cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Multipart file part carrying the capture.
pub(crate) fn file_part(data: Bytes, file: &ShareFile) -> Result<Part> {
    Part::bytes(data.to_vec())
        .file_name(file.file_name())
        .mime_str(mime_type_for(&file.path))
        .user_context("Invalid file type")
}

pub(crate) fn require_client_id<'a>(kind: DestinationKind, client_id: &'a str) -> Result<&'a str> {
    let client_id = client_id.trim();
    if client_id.is_empty() {
        return Err(Error::destination(
            kind.as_str(),
            "No client id configured for this destination",
        ));
    }
    Ok(client_id)
}

/// Login/logout panel shared by the OAuth destinations.
pub(crate) fn account_panel(settings: &DestinationSettings) -> SettingsPanel {
    let items = if settings.get_str(ACCESS_TOKEN).is_some() {
        let status = match settings.get_str(USERNAME) {
            Some(name) => format!("Logged in as {}", name),
            None => "Logged in".to_string(),
        };
        vec![PanelItem::Status(status), PanelItem::Logout]
    } else {
        vec![PanelItem::Status("Not logged in".to_string()), PanelItem::Login]
    };
    SettingsPanel { items }
}
