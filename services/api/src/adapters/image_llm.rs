//! services/api/src/adapters/image_llm.rs
//!
//! This module contains the adapter for the image generation model.
//! It implements the `ImageGenerationService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::images::{
        CreateImageRequestArgs, Image, ImageModel, ImageQuality as OpenAiQuality,
        ImageResponseFormat, ImageSize as OpenAiSize,
    },
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chat_core::ports::{
    GeneratedImage, ImageGenerationService, ImageQuality, ImageRequest, ImageSize, PortError, PortResult,
};
use tracing::{debug, info};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ImageGenerationService` using an OpenAI-compatible API.
#[derive(Clone)]
pub struct OpenAiImageAdapter {
    client: Client<OpenAIConfig>,
    model: ImageModel,
}

impl OpenAiImageAdapter {
    /// Creates a new `OpenAiImageAdapter` for the named model.
    pub fn new(client: Client<OpenAIConfig>, model: &str) -> Self {
        let model = match model {
            "dall-e-3" => ImageModel::DallE3,
            "dall-e-2" => ImageModel::DallE2,
            other => ImageModel::Other(other.to_string()),
        };
        Self { client, model }
    }
}

fn to_openai_size(size: ImageSize) -> OpenAiSize {
    match size {
        ImageSize::LANDSCAPE => OpenAiSize::S1792x1024,
        ImageSize::PORTRAIT => OpenAiSize::S1024x1792,
        _ => OpenAiSize::S1024x1024,
    }
}

fn to_openai_quality(quality: ImageQuality) -> OpenAiQuality {
    match quality {
        ImageQuality::Standard => OpenAiQuality::Standard,
        ImageQuality::Hd => OpenAiQuality::HD,
    }
}

//=========================================================================================
// Payload Decoding
//=========================================================================================

/// Decodes an image payload that is either raw base64 or a
/// `data:<mime>;base64,<payload>` URL. Returns the bytes and a file extension.
pub fn decode_envelope(payload: &str) -> PortResult<(Vec<u8>, String)> {
    let payload = payload.trim();
    let (mime, data) = match payload.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| PortError::Unexpected("data URL has no payload".to_string()))?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or_else(|| PortError::Unexpected("data URL is not base64 encoded".to_string()))?;
            (Some(mime), data)
        }
        None => (None, payload),
    };

    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| PortError::Unexpected(format!("invalid base64 image payload: {}", e)))?;
    if bytes.is_empty() {
        return Err(PortError::Unexpected("image payload is empty".to_string()));
    }

    let extension = mime
        .and_then(extension_for_mime)
        .unwrap_or_else(|| sniff_extension(&bytes));
    Ok((bytes, extension.to_string()))
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime.to_ascii_lowercase().as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

fn sniff_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "jpg"
    } else if bytes.starts_with(b"GIF8") {
        "gif"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "webp"
    } else {
        "png"
    }
}

//=========================================================================================
// `ImageGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ImageGenerationService for OpenAiImageAdapter {
    async fn generate_image(&self, request: &ImageRequest) -> PortResult<GeneratedImage> {
        let openai_request = CreateImageRequestArgs::default()
            .prompt(request.prompt.clone())
            .model(self.model.clone())
            .n(1)
            .size(to_openai_size(request.size))
            .quality(to_openai_quality(request.quality))
            .response_format(ImageResponseFormat::B64Json)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        debug!(size = %request.size, "Requesting image generation.");
        let response = self
            .client
            .images()
            .generate(openai_request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let image = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| PortError::Unexpected("Image API returned no images.".to_string()))?;

        let payload = match image.as_ref() {
            Image::B64Json { b64_json, .. } => b64_json.as_str().to_string(),
            // Some compatible routers put a data URL in the `url` field.
            Image::Url { url, .. } if url.starts_with("data:") => url.clone(),
            Image::Url { .. } => {
                return Err(PortError::Unexpected(
                    "Image API returned a remote URL instead of inline data.".to_string(),
                ))
            }
        };

        let (bytes, extension) = decode_envelope(&payload)?;
        info!(bytes = bytes.len(), extension = %extension, "Received generated image.");
        Ok(GeneratedImage {
            bytes,
            extension,
            width: request.size.width,
            height: request.size.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_raw_base64_is_sniffed() {
        let encoded = STANDARD.encode(PNG_HEADER);
        let (bytes, ext) = decode_envelope(&encoded).unwrap();
        assert_eq!(bytes, PNG_HEADER);
        assert_eq!(ext, "png");

        let jpeg = STANDARD.encode([0xFF, 0xD8, 0xFF, 0xE0]);
        assert_eq!(decode_envelope(&jpeg).unwrap().1, "jpg");
    }

    #[test]
    fn test_data_url_mime_sets_extension() {
        let url = format!("data:image/webp;base64,{}", STANDARD.encode(b"not really webp"));
        let (bytes, ext) = decode_envelope(&url).unwrap();
        assert_eq!(bytes, b"not really webp");
        assert_eq!(ext, "webp");
    }

    #[test]
    fn test_malformed_envelopes_are_rejected() {
        assert!(decode_envelope("data:image/png;base64").is_err());
        assert!(decode_envelope("data:image/png,plaintext").is_err());
        assert!(decode_envelope("%%%").is_err());
        assert!(decode_envelope("").is_err());
    }

    #[test]
    fn test_sizes_map_to_api_sizes() {
        assert_eq!(to_openai_size(ImageSize::LANDSCAPE), OpenAiSize::S1792x1024);
        assert_eq!(to_openai_size(ImageSize::PORTRAIT), OpenAiSize::S1024x1792);
        assert_eq!(to_openai_size(ImageSize::SQUARE), OpenAiSize::S1024x1024);
    }
}
