// src/services/bundler.rs
use crate::errors::StudioError;
use crate::models::AssetState;
use crate::services::image_codec;
use reqwest::Client;
use std::io::Write;
use zip::ZipWriter;
use zip::write::FileOptions;

pub const ARCHIVE_NAME: &str = "ui-assets.zip";

/// Packages completed assets for download. Image payloads are decoded from
/// their data URLs; videos are fetched from the gateway's download link.
pub struct Bundler {
    client: Client,
}

impl Bundler {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Section label lowercased, whitespace collapsed to underscores, with an
    /// extension matching the downloadable payload.
    pub fn asset_filename(asset: &AssetState) -> String {
        let stem = asset
            .idea
            .section
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_");

        let extension = if asset.video_url.is_some() {
            "mp4".to_string()
        } else {
            asset
                .mime_type
                .split('/')
                .nth(1)
                .filter(|ext| !ext.is_empty())
                .unwrap_or("png")
                .to_string()
        };

        format!("{}.{}", stem, extension)
    }

    /// Resolve the downloadable bytes and content type for one asset: the
    /// video when present, the still image otherwise.
    pub async fn resolve_bytes(
        &self,
        asset: &AssetState,
    ) -> Result<(Vec<u8>, String), StudioError> {
        if let Some(video_url) = &asset.video_url {
            let response = self
                .client
                .get(video_url)
                .send()
                .await
                .map_err(|e| StudioError::Bundle(format!("Failed to fetch video: {}", e)))?;
            if !response.status().is_success() {
                return Err(StudioError::Bundle(format!(
                    "Failed to fetch video. Status: {}",
                    response.status()
                )));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| StudioError::Bundle(format!("Failed to read video: {}", e)))?;
            return Ok((bytes.to_vec(), "video/mp4".to_string()));
        }

        let payload = image_codec::from_data_url(&asset.image_url)?;
        let bytes = image_codec::payload_bytes(&payload)?;
        Ok((bytes, payload.mime_type))
    }

    /// Build a single ZIP archive with one entry per asset.
    pub async fn package_assets(&self, assets: &[AssetState]) -> Result<Vec<u8>, StudioError> {
        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for asset in assets {
            let (bytes, _) = self.resolve_bytes(asset).await?;
            zip.start_file(Self::asset_filename(asset), options)
                .map_err(|e| StudioError::Bundle(e.to_string()))?;
            zip.write_all(&bytes)
                .map_err(|e| StudioError::Bundle(e.to_string()))?;
        }

        let cursor = zip
            .finish()
            .map_err(|e| StudioError::Bundle(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}

impl Default for Bundler {
    fn default() -> Self {
        Self::new()
    }
}
