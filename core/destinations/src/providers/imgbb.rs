//! ImgBB: API-key uploads. There is no delete API; deletion opens the
//! delete page returned at upload time.

use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

use capshare_common::{
    DestinationSettings, Error, Result, ResultExt, ShareFile, ShareOptions, ShareResponse,
};

use crate::config::{DestinationsConfig, ImgBBConfig};
use crate::destination::{
    Capabilities, Destination, DestinationConfiguration, DestinationKind, PanelItem,
    SettingsPanel, UrlOpener,
};
use crate::file::FileSource;
use crate::http::{read_json, transport_error};
use crate::settings::SettingsHandle;

use super::{endpoint, file_part, share_response};

const KIND: DestinationKind = DestinationKind::ImgBB;

pub const API_KEY: &str = "apiKey";

const API_KEY_PAGE: &str = "https://api.imgbb.com/";

#[derive(Debug, Deserialize)]
struct Envelope {
    data: UploadedImage,
}

#[derive(Debug, Deserialize)]
struct UploadedImage {
    id: String,
    url_viewer: String,
    #[serde(default)]
    delete_url: Option<String>,
}

pub struct ImgBBDestination {
    http: Client,
    config: ImgBBConfig,
    files: Arc<dyn FileSource>,
}

impl ImgBBDestination {
    pub fn new(http: Client, config: &DestinationsConfig, files: Arc<dyn FileSource>) -> Self {
        Self {
            http,
            config: config.imgbb.clone(),
            files,
        }
    }
}

#[async_trait]
impl Destination for ImgBBDestination {
    fn kind(&self) -> DestinationKind {
        KIND
    }

    fn configuration(&self) -> DestinationConfiguration {
        DestinationConfiguration {
            id: KIND.id(),
            name: "ImgBB",
            always_available: false,
        }
    }

    fn default_settings(&self) -> DestinationSettings {
        DestinationSettings::new().with(API_KEY, "")
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            settings_panel: true,
            tool_bar: false,
            oauth_callback: false,
        }
    }

    fn is_available(&self, settings: &DestinationSettings) -> bool {
        settings.get_str(API_KEY).is_some()
    }

    async fn share(
        &self,
        file: &ShareFile,
        _options: &ShareOptions,
        settings: &SettingsHandle<'_>,
    ) -> Result<ShareResponse> {
        let key = settings
            .get()
            .get_str(API_KEY)
            .map(str::to_string)
            .ok_or_else(|| Error::destination(KIND.as_str(), "Missing API key; set one first"))?;
        let data = self.files.read(&file.path).await?;

        let mut url = endpoint(&self.config.api_url, &["1", "upload"])?;
        url.query_pairs_mut().append_pair("key", &key);

        let form = Form::new().part("image", file_part(data, file)?);
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error("Upload to ImgBB", e))?;

        let envelope: Envelope = read_json(KIND.as_str(), "Upload to ImgBB", response).await?;
        let image = envelope.data;
        tracing::info!(id = %image.id, "Uploaded to ImgBB");
        Ok(share_response(
            KIND,
            file,
            image.url_viewer,
            image.id,
            image.delete_url,
            false,
        ))
    }

    async fn delete(
        &self,
        share: &ShareResponse,
        _settings: &SettingsHandle<'_>,
        opener: &dyn UrlOpener,
    ) -> Result<()> {
        let delete_url = share.delete_id.as_deref().ok_or_else(|| {
            Error::destination(KIND.as_str(), "No delete link was recorded for this image")
        })?;
        let url = Url::parse(delete_url)
            .destination_context(KIND.as_str(), "Recorded delete link is invalid")?;

        tracing::debug!(id = %share.share_id, "Opening ImgBB delete page");
        opener.open_url(&url).await
    }

    fn settings_panel(&self, settings: &DestinationSettings) -> Option<SettingsPanel> {
        Some(SettingsPanel {
            items: vec![
                PanelItem::TextField {
                    key: API_KEY,
                    label: "API key",
                    secret: true,
                    value: settings.get_str(API_KEY).map(str::to_string),
                },
                PanelItem::Link {
                    label: "Get an API key",
                    url: API_KEY_PAGE.to_string(),
                },
            ],
        })
    }
}
