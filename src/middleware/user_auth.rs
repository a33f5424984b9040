use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::User;
use crate::util::extract_bearer_token;

/// The signed-in user, inserted as a request extension by [`user_auth`].
#[derive(Clone)]
pub struct UserContext {
    pub user: User,
}

fn not_authenticated() -> AppError {
    AppError::Unauthorized("Not authenticated".into())
}

/// Resolve the bearer token through `auth_sessions`.
fn authenticate_user(state: &AppState, headers: &HeaderMap) -> Result<User> {
    let token = extract_bearer_token(headers).ok_or_else(not_authenticated)?;
    let conn = state.db.get()?;

    let user = queries::get_user_by_session_token(&conn, token)?.ok_or_else(not_authenticated)?;
    if user.banned {
        return Err(AppError::Forbidden("Account suspended".into()));
    }
    Ok(user)
}

pub async fn user_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let user = authenticate_user(&state, request.headers())?;
    request.extensions_mut().insert(UserContext { user });
    Ok(next.run(request).await)
}
