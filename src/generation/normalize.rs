use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::generation::client::RawResponse;
use crate::generation::error::GenerationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum GeneratedImage {
    Url(String),
    Base64(Vec<u8>),
}

impl GeneratedImage {
    /// Sniffed MIME type of inline bytes; URLs are not fetched.
    pub fn mime_type(&self) -> Option<String> {
        match self {
            GeneratedImage::Url(_) => None,
            GeneratedImage::Base64(bytes) => {
                infer::get(bytes).map(|kind| kind.mime_type().to_string())
            }
        }
    }

    pub fn data_url(&self) -> String {
        match self {
            GeneratedImage::Url(url) => url.clone(),
            GeneratedImage::Base64(bytes) => {
                let mime_type = self.mime_type().unwrap_or_else(|| "image/png".to_string());
                format!(
                    "data:{};base64,{}",
                    mime_type,
                    general_purpose::STANDARD.encode(bytes)
                )
            }
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self.mime_type().as_deref() {
            Some("image/jpeg") => "jpg",
            Some("image/webp") => "webp",
            Some("image/gif") => "gif",
            _ => "png",
        }
    }
}

fn first_image_entry(payload: &Value) -> Option<&Value> {
    if let Some(images) = payload.get("images").and_then(Value::as_array) {
        return images.first();
    }
    if let Some(data) = payload.get("data").and_then(Value::as_array) {
        return data.first();
    }
    payload
        .get("url")
        .or_else(|| payload.get("image"))
        .filter(|value| value.is_string())
}

fn entry_text(entry: &Value) -> Option<&str> {
    if let Some(text) = entry.as_str() {
        return Some(text);
    }
    ["url", "b64_json", "base64", "image", "data"]
        .iter()
        .find_map(|field| entry.get(*field).and_then(Value::as_str))
}

fn strip_data_url_prefix(value: &str) -> &str {
    if value.starts_with("data:") {
        if let Some((_, payload)) = value.split_once(";base64,") {
            return payload;
        }
    }
    value
}

fn decode_inline(value: &str) -> Result<Vec<u8>, GenerationError> {
    let payload: String = strip_data_url_prefix(value)
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect();
    let bytes = general_purpose::STANDARD
        .decode(payload.as_bytes())
        .map_err(|err| {
            GenerationError::UnrecognizedResponse(format!("corrupt base64 image: {err}"))
        })?;
    if bytes.is_empty() {
        return Err(GenerationError::UnrecognizedResponse(
            "inline image is empty".to_string(),
        ));
    }
    if infer::get(&bytes).map_or(true, |kind| !kind.mime_type().starts_with("image/")) {
        warn!("Decoded inline image has an unrecognized format ({} bytes)", bytes.len());
    }
    Ok(bytes)
}

fn normalize_text(value: &str) -> Result<GeneratedImage, GenerationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GenerationError::UnrecognizedResponse(
            "image entry is empty".to_string(),
        ));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        // Parsed only to validate; the API's spelling of the URL is kept.
        Url::parse(trimmed).map_err(|err| {
            GenerationError::UnrecognizedResponse(format!("invalid image URL: {err}"))
        })?;
        return Ok(GeneratedImage::Url(trimmed.to_string()));
    }
    decode_inline(trimmed).map(GeneratedImage::Base64)
}

pub fn normalize_response(raw: RawResponse) -> Result<GeneratedImage, GenerationError> {
    match raw {
        RawResponse::Binary {
            bytes,
            content_type,
        } => {
            debug!(content_type = ?content_type, len = bytes.len(), "Binary image response");
            if bytes.is_empty() {
                return Err(GenerationError::UnrecognizedResponse(
                    "binary image response is empty".to_string(),
                ));
            }
            Ok(GeneratedImage::Base64(bytes))
        }
        RawResponse::Json(payload) => {
            let entry = first_image_entry(&payload).ok_or_else(|| {
                GenerationError::UnrecognizedResponse(
                    "response carries neither an image URL nor inline image data".to_string(),
                )
            })?;
            let text = entry_text(entry).ok_or_else(|| {
                GenerationError::UnrecognizedResponse(
                    "image entry has no url or base64 field".to_string(),
                )
            })?;
            normalize_text(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PNG_BYTES: [u8; 12] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

    fn png_base64() -> String {
        general_purpose::STANDARD.encode(PNG_BYTES)
    }

    #[test]
    fn inline_base64_decodes_to_bytes() {
        let raw = RawResponse::Json(json!({ "images": [png_base64()] }));
        let image = normalize_response(raw).unwrap();
        assert_eq!(image, GeneratedImage::Base64(PNG_BYTES.to_vec()));
        assert_eq!(image.mime_type().as_deref(), Some("image/png"));
    }

    #[test]
    fn url_entry_stays_a_url() {
        let raw = RawResponse::Json(json!({ "images": ["https://cdn.example.com/a.png"] }));
        assert_eq!(
            normalize_response(raw).unwrap(),
            GeneratedImage::Url("https://cdn.example.com/a.png".to_string())
        );
    }

    #[test]
    fn openai_style_data_entries_are_understood() {
        let raw = RawResponse::Json(json!({ "data": [{ "b64_json": png_base64() }] }));
        assert!(matches!(
            normalize_response(raw).unwrap(),
            GeneratedImage::Base64(_)
        ));

        let raw = RawResponse::Json(json!({ "data": [{ "url": "https://x.test/img.webp" }] }));
        assert!(matches!(
            normalize_response(raw).unwrap(),
            GeneratedImage::Url(_)
        ));
    }

    #[test]
    fn data_url_prefix_is_stripped() {
        let raw = RawResponse::Json(json!({
            "image": format!("data:image/png;base64,{}", png_base64())
        }));
        assert_eq!(
            normalize_response(raw).unwrap(),
            GeneratedImage::Base64(PNG_BYTES.to_vec())
        );
    }

    #[test]
    fn binary_body_is_inline_image() {
        let raw = RawResponse::Binary {
            bytes: PNG_BYTES.to_vec(),
            content_type: Some("image/png".to_string()),
        };
        assert_eq!(
            normalize_response(raw).unwrap(),
            GeneratedImage::Base64(PNG_BYTES.to_vec())
        );
    }

    #[test]
    fn unknown_shapes_and_corrupt_data_are_rejected() {
        for payload in [
            json!({ "status": "ok" }),
            json!({ "images": [] }),
            json!({ "images": ["%%% not base64 %%%"] }),
            json!({ "images": [{ "seed": 5 }] }),
        ] {
            let err = normalize_response(RawResponse::Json(payload.clone())).unwrap_err();
            assert!(
                matches!(err, GenerationError::UnrecognizedResponse(_)),
                "{payload} gave {err:?}"
            );
        }
    }

    #[test]
    fn url_is_returned_as_the_api_wrote_it() {
        let raw = RawResponse::Json(json!({ "images": ["  https://CDN.test/a b.png "] }));
        assert_eq!(
            normalize_response(raw).unwrap(),
            GeneratedImage::Url("https://CDN.test/a b.png".to_string())
        );

        let raw = RawResponse::Json(json!({ "url": "https://exa mple.com/x.png" }));
        assert!(matches!(
            normalize_response(raw),
            Err(GenerationError::UnrecognizedResponse(_))
        ));
    }

    #[test]
    fn serializes_as_tagged_union() {
        let value =
            serde_json::to_value(GeneratedImage::Url("https://a.test/b.png".into())).unwrap();
        assert_eq!(value, json!({ "kind": "url", "value": "https://a.test/b.png" }));
    }

    #[test]
    fn data_url_uses_sniffed_mime_type() {
        let image = GeneratedImage::Base64(PNG_BYTES.to_vec());
        assert!(image.data_url().starts_with("data:image/png;base64,"));
        assert_eq!(image.file_extension(), "png");
    }
}
