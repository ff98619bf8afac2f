//! Viewer resolution and staff gating.
//!
//! Every request gets a [`Viewer`] in its extensions. A valid
//! `Authorization: Bearer <token>` header resolves to the owning user; a
//! missing or unknown token leaves the request anonymous.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use keyturn_core::types::Viewer;

use crate::error::ApiError;
use crate::state::AppState;

/// Extract the bearer credential from request headers.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Middleware that attaches the request's [`Viewer`].
pub async fn resolve_viewer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let viewer = match bearer_token(req.headers()) {
        Some(token) => match state.users.find_by_auth_token(token)? {
            Some(user) => Viewer::User(user),
            None => {
                tracing::debug!("Unknown bearer token; treating request as anonymous");
                Viewer::Anonymous
            }
        },
        None => Viewer::Anonymous,
    };
    req.extensions_mut().insert(viewer);
    Ok(next.run(req).await)
}

/// Middleware for admin routes: 401 when anonymous, 403 when not staff.
pub async fn require_staff(req: Request, next: Next) -> Result<Response, ApiError> {
    match req.extensions().get::<Viewer>() {
        Some(viewer) if viewer.is_staff() => Ok(next.run(req).await),
        Some(Viewer::User(_)) => Err(ApiError::Forbidden(
            "Staff access required".to_string(),
        )),
        _ => Err(ApiError::Unauthorized(
            "Authentication required".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
