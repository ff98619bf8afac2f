//! Route handler functions for all API endpoints.
//!
//! Each handler extracts query/path parameters via axum extractors,
//! interacts with AppState services, and returns JSON responses.

use axum::extract::{Path, Query, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use keyturn_action::{landing_template, AccountAction};
use keyturn_core::token::{ActionToken, NewToken, TokenPolicy, TokenStatus};
use keyturn_core::types::{TargetRef, Viewer};
use keyturn_storage::TokenFilters;

use crate::error::ApiError;
use crate::state::AppState;

/// Response header carrying the consumption success message.
pub const MESSAGE_HEADER: &str = "x-keyturn-message";

const DEFAULT_LIST_LIMIT: u64 = 100;
const MAX_LIST_LIMIT: u64 = 1000;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct TokenListParams {
    pub action: Option<String>,
    pub is_canceled: Option<bool>,
    pub expired: Option<bool>,
    pub consumed: Option<bool>,
    pub q: Option<String>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub email: String,
    pub action: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<i64>,
    /// Explicit key. Generated when absent.
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkTokenRequest {
    pub ids: Vec<i64>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub registered_actions: usize,
    pub total_tokens: u64,
}

/// A token together with its derived state.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenView {
    pub id: i64,
    pub key: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub action: String,
    pub target: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub consumer_id: Option<i64>,
    pub is_canceled: bool,
    pub is_expired: bool,
    pub is_consumed: bool,
    pub status: TokenStatus,
}

impl TokenView {
    pub fn new(token: &ActionToken, policy: &TokenPolicy) -> Self {
        Self {
            id: token.id,
            key: token.key.clone(),
            email: token.email.clone(),
            first_name: token.first_name.clone(),
            last_name: token.last_name.clone(),
            action: token.action.clone(),
            target: token.target.as_ref().map(ToString::to_string),
            created_at: token.created_at,
            updated_at: token.updated_at,
            expiration_date: token.expiration_date(policy),
            consumed_at: token.consumed_at,
            consumer_id: token.consumer_id,
            is_canceled: token.is_canceled,
            is_expired: token.is_expired(policy),
            is_consumed: token.is_consumed(),
            status: token.status(policy),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionInfo {
    pub name: String,
    pub template: String,
}

impl ActionInfo {
    fn new(action: &dyn AccountAction) -> Self {
        Self {
            name: action.name().to_string(),
            template: landing_template(action).to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LandingResponse {
    pub token: TokenView,
    pub action: ActionInfo,
    pub template: String,
    pub context: Map<String, Value>,
    pub target: Option<Value>,
    pub can_be_consumed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsumeResponse {
    pub redirect_url: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenListResponse {
    pub tokens: Vec<TokenView>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenDetailResponse {
    pub token: TokenView,
    pub target: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkUpdateResponse {
    pub updated: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionsResponse {
    pub actions: Vec<ActionInfo>,
}

// =============================================================================
// Public handlers
// =============================================================================

pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let total_tokens = state.lifecycle.tokens().count()?;
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        registered_actions: state.registry().len(),
        total_tokens,
    }))
}

/// Look up a token and its registered action. Either missing is a 404.
fn load_token(
    state: &AppState,
    key: &str,
) -> Result<(ActionToken, std::sync::Arc<dyn AccountAction>), ApiError> {
    let token = state
        .lifecycle
        .find_by_key(key)?
        .ok_or_else(|| ApiError::NotFound("Token not found".to_string()))?;
    let action = state.registry().get_action(&token.action).ok_or_else(|| {
        tracing::debug!(action = %token.action, "Token refers to an unregistered action");
        ApiError::NotFound("Token not found".to_string())
    })?;
    Ok((token, action))
}

fn resolve_target(state: &AppState, target: Option<&TargetRef>) -> Result<Option<Value>, ApiError> {
    match target {
        Some(target) => Ok(state.targets.resolve(target)?),
        None => Ok(None),
    }
}

/// Landing page data for a token.
pub async fn landing(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(key): Path<String>,
) -> Result<Json<LandingResponse>, ApiError> {
    let (token, action) = load_token(&state, &key)?;
    let policy = state.policy();
    let template = landing_template(action.as_ref()).to_string();

    Ok(Json(LandingResponse {
        token: TokenView::new(&token, policy),
        action: ActionInfo::new(action.as_ref()),
        template,
        context: action.get_extra_context(&token, &viewer),
        target: resolve_target(&state, token.target.as_ref())?,
        can_be_consumed: action.can_be_consumed(&token, &viewer, policy),
    }))
}

/// Consume a token as the current viewer and redirect.
pub async fn consume(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let Some(user) = viewer.user() else {
        return Err(ApiError::Forbidden(
            "Sign in to use this link".to_string(),
        ));
    };

    let (token, action) = load_token(&state, &key)?;
    if !action.can_be_consumed(&token, &viewer, state.policy()) {
        return Err(ApiError::Forbidden(
            "This link can no longer be used".to_string(),
        ));
    }

    // The redirect target must be a valid header before the token is spent.
    let redirect_url = action.get_consumption_redirect_url(&token);
    let location = HeaderValue::from_str(&redirect_url)
        .map_err(|e| ApiError::Internal(format!("Invalid redirect URL: {}", e)))?;

    let consumed = state
        .lifecycle
        .try_consume(&key, user)
        .await?
        .ok_or_else(|| ApiError::Forbidden("This link can no longer be used".to_string()))?;

    let message = action.get_consumption_success_message(&consumed);

    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, location);
    match HeaderValue::from_str(&message) {
        Ok(value) => {
            headers.insert(MESSAGE_HEADER, value);
        }
        Err(_) => tracing::debug!("Success message is not a valid header value; body only"),
    }

    Ok((
        StatusCode::FOUND,
        headers,
        Json(ConsumeResponse {
            redirect_url,
            message,
        }),
    )
        .into_response())
}

// =============================================================================
// Admin handlers
// =============================================================================

pub async fn list_tokens(
    State(state): State<AppState>,
    Query(params): Query<TokenListParams>,
) -> Result<Json<TokenListResponse>, ApiError> {
    let filters = TokenFilters {
        action: params.action.filter(|a| !a.is_empty()),
        is_canceled: params.is_canceled,
        expired: params.expired,
        consumed: params.consumed,
        target: None,
        search: params.q.filter(|q| !q.trim().is_empty()),
        limit: Some(
            params
                .limit
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .clamp(1, MAX_LIST_LIMIT),
        ),
    };

    let policy = state.policy();
    let tokens: Vec<TokenView> = state
        .lifecycle
        .list(&filters)?
        .iter()
        .map(|t| TokenView::new(t, policy))
        .collect();

    Ok(Json(TokenListResponse {
        count: tokens.len(),
        tokens,
    }))
}

pub async fn get_token(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TokenDetailResponse>, ApiError> {
    let token = state
        .lifecycle
        .find_by_id(id)?
        .ok_or_else(|| ApiError::NotFound(format!("Token {} not found", id)))?;
    Ok(Json(TokenDetailResponse {
        token: TokenView::new(&token, state.policy()),
        target: resolve_target(&state, token.target.as_ref())?,
    }))
}

pub async fn create_token(
    State(state): State<AppState>,
    Json(req): Json<CreateTokenRequest>,
) -> Result<(StatusCode, Json<TokenView>), ApiError> {
    let mut new = NewToken::new(req.email, req.action).with_names(req.first_name, req.last_name);
    match (req.target_type, req.target_id) {
        (Some(content_type), Some(object_id)) => {
            new = new.with_target(TargetRef::new(content_type, object_id));
        }
        (None, None) => {}
        _ => {
            return Err(ApiError::BadRequest(
                "target_type and target_id must be given together".to_string(),
            ))
        }
    }
    if let Some(key) = req.key {
        new = new.with_key(key);
    }

    let token = state.lifecycle.create(&new).await?;
    Ok((StatusCode::CREATED, Json(TokenView::new(&token, state.policy()))))
}

fn require_ids(req: &BulkTokenRequest) -> Result<(), ApiError> {
    if req.ids.is_empty() {
        return Err(ApiError::BadRequest("ids must not be empty".to_string()));
    }
    Ok(())
}

pub async fn cancel_tokens(
    State(state): State<AppState>,
    Json(req): Json<BulkTokenRequest>,
) -> Result<Json<BulkUpdateResponse>, ApiError> {
    require_ids(&req)?;
    let updated = state.lifecycle.cancel(&req.ids)?;
    Ok(Json(BulkUpdateResponse { updated }))
}

pub async fn uncancel_tokens(
    State(state): State<AppState>,
    Json(req): Json<BulkTokenRequest>,
) -> Result<Json<BulkUpdateResponse>, ApiError> {
    require_ids(&req)?;
    let updated = state.lifecycle.uncancel(&req.ids)?;
    Ok(Json(BulkUpdateResponse { updated }))
}

pub async fn list_actions(State(state): State<AppState>) -> Json<ActionsResponse> {
    let actions = state
        .registry()
        .get_actions()
        .iter()
        .map(|a| ActionInfo::new(a.as_ref()))
        .collect();
    Json(ActionsResponse { actions })
}
