//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the account-state REST endpoints (sessions,
//! preferences, tiers and quota) and the master definition for the OpenAPI
//! specification.

use crate::error::ApiError;
use crate::web::middleware::AuthenticatedAccount;
use crate::web::state::AppState;
use crate::web::{auth, chat, images};
use axum::{
    extract::{Extension, State},
    response::Json,
};
use chat_core::persona::PERSONALITIES;
use chat_core::quota::{self, QuotaStatus, TierPlan, TIER_PLANS};
use chat_core::{SessionSummary, Tier, Turn, UpgradeEntry, UserRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::forgot_handler,
        get_state_handler,
        create_session_handler,
        switch_session_handler,
        delete_session_handler,
        rename_session_handler,
        theme_handler,
        personality_handler,
        quota_handler,
        tiers_handler,
        upgrade_handler,
        chat::chat_handler,
        images::generate_image_handler,
    ),
    components(
        schemas(
            auth::SignupRequest, auth::LoginRequest, auth::ForgotRequest, auth::AuthResponse,
            auth::MessageResponse, StateResponse, CreateSessionRequest, SessionRequest,
            RenameSessionRequest, ThemeRequest, PersonalityRequest, TiersResponse, UpgradeRequest,
            UpgradeResponse, chat::ChatRequest, chat::ChatResponse, images::GenerateImageRequest,
        )
    ),
    tags(
        (name = "Chat API", description = "Multi-session chat with quota-gated image generation.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// Everything the client needs to render the chat screen.
#[derive(Serialize, ToSchema)]
pub struct StateResponse {
    pub email: String,
    #[schema(value_type = Vec<Object>)]
    pub sessions: Vec<SessionSummary>,
    pub active_session: Option<String>,
    /// History of the active session.
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<Turn>,
    pub theme: String,
    pub personality: String,
    pub personalities: Vec<String>,
    #[schema(value_type = String)]
    pub tier: Tier,
    #[schema(value_type = Object)]
    pub quota: QuotaStatus,
}

impl StateResponse {
    fn of(account: &str, record: &UserRecord, now: DateTime<Utc>) -> Self {
        Self {
            email: account.to_string(),
            sessions: record.session_summaries(),
            active_session: record.active_session.clone(),
            history: record
                .active()
                .map(|(_, session)| session.history.clone())
                .unwrap_or_default(),
            theme: record.theme.clone(),
            personality: record.personality.clone(),
            personalities: PERSONALITIES.iter().map(|(key, _)| key.to_string()).collect(),
            tier: record.tier,
            quota: quota::can_generate(record, now),
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct SessionRequest {
    pub session_id: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RenameSessionRequest {
    pub session_id: String,
    pub name: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ThemeRequest {
    pub theme: String,
}

#[derive(Deserialize, ToSchema)]
pub struct PersonalityRequest {
    pub personality: String,
}

#[derive(Serialize, ToSchema)]
pub struct TiersResponse {
    #[schema(value_type = String)]
    pub current: Tier,
    #[schema(value_type = Vec<Object>)]
    pub plans: Vec<TierPlan>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpgradeRequest {
    pub tier: String,
}

#[derive(Serialize, ToSchema)]
pub struct UpgradeResponse {
    #[schema(value_type = Object)]
    pub entry: UpgradeEntry,
    #[schema(value_type = Object)]
    pub quota: QuotaStatus,
}

/// Applies one mutation to the caller's record and returns the resulting state.
async fn mutate_state<F>(state: &AppState, account: &str, apply: F) -> Result<Json<StateResponse>, ApiError>
where
    F: FnOnce(&mut UserRecord, DateTime<Utc>) -> chat_core::CoreResult<()>,
{
    let view = state
        .directory
        .transact(account, |record| {
            let now = Utc::now();
            apply(record, now)?;
            Ok(StateResponse::of(account, record, now))
        })
        .await?;
    Ok(Json(view))
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Current sessions, active history, preferences and quota.
#[utoipa::path(
    get,
    path = "/state",
    responses(
        (status = 200, description = "Account state", body = StateResponse),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn get_state_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account)): Extension<AuthenticatedAccount>,
) -> Result<Json<StateResponse>, ApiError> {
    let record = state.directory.view(&account).await?;
    Ok(Json(StateResponse::of(&account, &record, Utc::now())))
}

/// Create a new chat session and make it active.
#[utoipa::path(
    post,
    path = "/sessions/create",
    request_body = CreateSessionRequest,
    responses((status = 200, description = "Session created", body = StateResponse))
)]
pub async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account)): Extension<AuthenticatedAccount>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<StateResponse>, ApiError> {
    mutate_state(&state, &account, |record, now| {
        record.create_session(req.name.as_deref(), now);
        Ok(())
    })
    .await
}

/// Make an existing session active.
#[utoipa::path(
    post,
    path = "/sessions/switch",
    request_body = SessionRequest,
    responses(
        (status = 200, description = "Session switched", body = StateResponse),
        (status = 404, description = "Session not found")
    )
)]
pub async fn switch_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account)): Extension<AuthenticatedAccount>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<StateResponse>, ApiError> {
    mutate_state(&state, &account, |record, _| record.switch_session(&req.session_id)).await
}

/// Delete a session. The last remaining session cannot be deleted.
#[utoipa::path(
    post,
    path = "/sessions/delete",
    request_body = SessionRequest,
    responses(
        (status = 200, description = "Session deleted", body = StateResponse),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Cannot delete the last session")
    )
)]
pub async fn delete_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account)): Extension<AuthenticatedAccount>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<StateResponse>, ApiError> {
    mutate_state(&state, &account, |record, _| record.delete_session(&req.session_id)).await
}

#[utoipa::path(
    post,
    path = "/sessions/rename",
    request_body = RenameSessionRequest,
    responses(
        (status = 200, description = "Session renamed", body = StateResponse),
        (status = 400, description = "Empty name"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn rename_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account)): Extension<AuthenticatedAccount>,
    Json(req): Json<RenameSessionRequest>,
) -> Result<Json<StateResponse>, ApiError> {
    mutate_state(&state, &account, |record, _| {
        record.rename_session(&req.session_id, &req.name)
    })
    .await
}

#[utoipa::path(
    post,
    path = "/theme",
    request_body = ThemeRequest,
    responses((status = 200, description = "Theme saved", body = StateResponse))
)]
pub async fn theme_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account)): Extension<AuthenticatedAccount>,
    Json(req): Json<ThemeRequest>,
) -> Result<Json<StateResponse>, ApiError> {
    mutate_state(&state, &account, |record, _| record.set_theme(&req.theme)).await
}

#[utoipa::path(
    post,
    path = "/personality",
    request_body = PersonalityRequest,
    responses((status = 200, description = "Personality saved", body = StateResponse))
)]
pub async fn personality_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account)): Extension<AuthenticatedAccount>,
    Json(req): Json<PersonalityRequest>,
) -> Result<Json<StateResponse>, ApiError> {
    mutate_state(&state, &account, |record, _| {
        record.set_personality(&req.personality);
        Ok(())
    })
    .await
}

/// Image quota for the current window.
#[utoipa::path(
    get,
    path = "/quota",
    responses((status = 200, description = "Quota status"))
)]
pub async fn quota_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account)): Extension<AuthenticatedAccount>,
) -> Result<Json<QuotaStatus>, ApiError> {
    Ok(Json(state.images.quota(&account).await?))
}

#[utoipa::path(
    get,
    path = "/tiers",
    responses((status = 200, description = "Plans and the caller's tier", body = TiersResponse))
)]
pub async fn tiers_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account)): Extension<AuthenticatedAccount>,
) -> Result<Json<TiersResponse>, ApiError> {
    let record = state.directory.view(&account).await?;
    Ok(Json(TiersResponse {
        current: record.tier,
        plans: TIER_PLANS.to_vec(),
    }))
}

/// Change tier. Payment is not processed; the price is recorded in the history.
#[utoipa::path(
    post,
    path = "/tiers/upgrade",
    request_body = UpgradeRequest,
    responses(
        (status = 200, description = "Tier changed", body = UpgradeResponse),
        (status = 400, description = "Unknown tier"),
        (status = 409, description = "Already on that tier")
    )
)]
pub async fn upgrade_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account)): Extension<AuthenticatedAccount>,
    Json(req): Json<UpgradeRequest>,
) -> Result<Json<UpgradeResponse>, ApiError> {
    let response = state
        .directory
        .transact(&account, |record| {
            let now = Utc::now();
            let entry = quota::upgrade(record, &req.tier, now)?;
            Ok(UpgradeResponse {
                entry,
                quota: quota::can_generate(record, now),
            })
        })
        .await?;
    Ok(Json(response))
}
