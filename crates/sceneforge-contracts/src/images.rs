use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::errors::StudioError;

const BASE64_MARKER: &str = ";base64,";
const FALLBACK_MIME: &str = "application/octet-stream";

/// Base64 payload plus MIME type. Either field may be empty for an unfilled slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ImageRef {
    pub base64: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl ImageRef {
    pub fn new(base64: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            base64: base64.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Splits a `data:<mime>;base64,<payload>` string. Returns `None` for anything else.
    pub fn from_data_uri(uri: &str) -> Option<Self> {
        let (mime_type, payload) = parse_data_uri(uri)?;
        Some(Self::new(payload, mime_type))
    }

    pub fn has_payload(&self) -> bool {
        !self.base64.trim().is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.has_payload() && !self.mime_type.trim().is_empty()
    }

    pub fn to_data_uri(&self) -> String {
        to_data_uri(&self.mime_type, strip_data_uri_prefix(&self.base64))
    }
}

/// Removes a leading `data:...;base64,` prefix. Strings without one pass through.
pub fn strip_data_uri_prefix(value: &str) -> &str {
    if !value.starts_with("data:") {
        return value;
    }
    match value.find(BASE64_MARKER) {
        Some(idx) => &value[idx + BASE64_MARKER.len()..],
        None => value,
    }
}

pub fn to_data_uri(mime_type: &str, payload: &str) -> String {
    format!("data:{mime_type};base64,{payload}")
}

pub fn parse_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let idx = rest.find(BASE64_MARKER)?;
    Some((&rest[..idx], &rest[idx + BASE64_MARKER.len()..]))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

pub fn decode_data_uri(uri: &str) -> Result<DecodedImage> {
    let (mime_type, payload) =
        parse_data_uri(uri).ok_or_else(|| anyhow!("value is not a base64 data URI"))?;
    let bytes = BASE64
        .decode(payload.trim().as_bytes())
        .context("data URI base64 decode failed")?;
    Ok(DecodedImage {
        mime_type: mime_type.to_string(),
        bytes,
    })
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

/// Reads an image file into a data URI. No size or type validation.
pub fn read_image_file(path: &Path) -> Result<String, StudioError> {
    let bytes = std::fs::read(path).map_err(|err| StudioError::FileRead {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    let mime_type = mime_for_path(path)
        .or_else(|| sniff_mime(&bytes))
        .unwrap_or(FALLBACK_MIME);
    Ok(to_data_uri(mime_type, &BASE64.encode(bytes)))
}

pub fn load_image_ref(path: &Path) -> Result<ImageRef, StudioError> {
    let uri = read_image_file(path)?;
    ImageRef::from_data_uri(&uri).ok_or_else(|| StudioError::FileRead {
        path: path.display().to_string(),
        reason: "could not encode file as a data URI".to_string(),
    })
}

/// Decodes `uri` and writes it as `<dir>/<stem>.<ext>`.
pub fn export_data_uri(uri: &str, dir: &Path, stem: &str) -> Result<PathBuf> {
    let decoded = decode_data_uri(uri)?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(format!("{stem}.{}", extension_for_mime(&decoded.mime_type)));
    std::fs::write(&path, &decoded.bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePreview {
    pub mime_type: String,
    pub byte_len: usize,
    pub width: u32,
    pub height: u32,
}

pub fn preview_data_uri(uri: &str) -> Result<ImagePreview> {
    let decoded = decode_data_uri(uri)?;
    let image = image::load_from_memory(&decoded.bytes).context("image decode failed")?;
    Ok(ImagePreview {
        mime_type: decoded.mime_type,
        byte_len: decoded.bytes.len(),
        width: image.width(),
        height: image.height(),
    })
}
