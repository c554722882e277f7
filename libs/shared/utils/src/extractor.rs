use std::sync::Arc;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use headers::{authorization::Bearer, Authorization, HeaderMapExt};

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::jwt::validate_token;

/// Layer applied to every protected route. Validates the bearer token
/// and stashes the authenticated `User` in request extensions.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let bearer: Authorization<Bearer> = request
        .headers()
        .typed_get()
        .ok_or_else(|| AppError::Auth("Missing or invalid authorization header".to_string()))?;

    let user: User = validate_token(bearer.token(), &config.app_jwt_secret).map_err(AppError::Auth)?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}
