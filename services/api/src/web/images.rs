//! services/api/src/web/images.rs
//!
//! Image generation endpoint. Generated files are served separately from
//! `/images/files/{file}`.

use crate::error::ApiError;
use crate::web::middleware::AuthenticatedAccount;
use crate::web::state::AppState;
use axum::{
    extract::{Extension, State},
    Json,
};
use chat_core::ports::{ImageQuality, ImageSize};
use chat_core::GeneratedTurn;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct GenerateImageRequest {
    pub prompt: String,
    /// `1024x1024`, `1792x1024` or `1024x1792`.
    #[serde(default)]
    pub size: Option<String>,
    /// `standard` or `hd`.
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub quality: Option<ImageQuality>,
}

/// Generate an image into the active session, consuming one quota unit.
#[utoipa::path(
    post,
    path = "/images/generate",
    request_body = GenerateImageRequest,
    responses(
        (status = 200, description = "Image turn and remaining quota"),
        (status = 400, description = "Empty prompt or unsupported size"),
        (status = 429, description = "Quota exhausted; body carries reset_seconds, tier and limit"),
        (status = 502, description = "Image service unavailable")
    )
)]
pub async fn generate_image_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account)): Extension<AuthenticatedAccount>,
    Json(req): Json<GenerateImageRequest>,
) -> Result<Json<GeneratedTurn>, ApiError> {
    let size = match req.size.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw.parse::<ImageSize>()?,
        None => ImageSize::default(),
    };
    let generated = state
        .images
        .generate(&account, &req.prompt, size, req.quality.unwrap_or_default())
        .await?;
    Ok(Json(generated))
}
