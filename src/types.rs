//! Data returned by the Immich API.
//!
//! Only the fields the shortcodes read are typed; everything else on an
//! asset is kept in [`AssetMetadata::extra`] so callers can still reach it.

use crate::imaging::NO_DESCRIPTION_ALT;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `GET /api/albums/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumData {
    pub album_name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Assets in album order.
    #[serde(default)]
    pub assets: Vec<AlbumAsset>,
}

impl AlbumData {
    /// The description, if it has any visible content.
    pub fn visible_description(&self) -> Option<&str> {
        self.description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumAsset {
    pub id: String,
}

/// `GET /api/assets/{id}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub exif_info: ExifInfo,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AssetMetadata {
    /// Alt text: the EXIF description, verbatim, when it has visible
    /// content; otherwise a fixed fallback.
    pub fn alt_text(&self) -> &str {
        self.exif_info
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(NO_DESCRIPTION_ALT)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExifInfo {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Asset metadata together with the original file it describes.
#[derive(Debug, Clone)]
pub struct AssetImageData {
    pub metadata: AssetMetadata,
    pub original: Bytes,
}

/// `GET /api/users/me`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserInfo {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}
