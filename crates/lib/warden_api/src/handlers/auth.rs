//! Authentication request handlers.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use warden_core::auth::validation::{
    ChangePasswordRequest, LoginRequest, RegisterRequest, UpdateProfileRequest,
};
use warden_core::models::auth::{AuthSession, TokenPair, User};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::middleware::client::Client;
use crate::services::cookies::{auth_cookie, clear_auth_cookie};

/// Phrase the caller must send to delete their account.
pub const DELETE_CONFIRMATION: &str = "DELETE_MY_ACCOUNT";

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: &'static str,
    pub user: User,
    pub tokens: TokenPair,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub message: &'static str,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAccountRequest {
    #[serde(default)]
    pub confirmation: String,
}

fn signed_in(
    state: &AppState,
    jar: CookieJar,
    session: AuthSession,
    message: &'static str,
) -> (CookieJar, Json<AuthResponse>) {
    let cookie = auth_cookie(
        &session.tokens.access_token,
        session.tokens.expires_in,
        state.config.cookie_secure,
    );
    let body = AuthResponse {
        message,
        user: session.user,
        tokens: session.tokens,
    };
    (jar.add(cookie), Json(body))
}

/// `POST /api/auth/register`: create an account and sign it in.
pub async fn register_handler(
    State(state): State<AppState>,
    Client(client): Client,
    jar: CookieJar,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<(StatusCode, CookieJar, Json<AuthResponse>)> {
    let Json(body) = payload?;
    let session = state.auth.register(body, &client).await?;
    let (jar, body) = signed_in(&state, jar, session, "Registration successful");
    Ok((StatusCode::CREATED, jar, body))
}

/// `POST /api/auth/login`: authenticate with email or username and password.
pub async fn login_handler(
    State(state): State<AppState>,
    Client(client): Client,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<(CookieJar, Json<AuthResponse>)> {
    let Json(body) = payload?;
    let session = state.auth.login(body, &client).await?;
    Ok(signed_in(&state, jar, session, "Login successful"))
}

/// `POST /api/auth/logout`: clear the auth cookie. Tokens are stateless and
/// simply expire.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<MessageResponse>) {
    (
        jar.add(clear_auth_cookie(state.config.cookie_secure)),
        Json(MessageResponse {
            message: "Logged out successfully",
        }),
    )
}

/// `GET /api/auth/me`: the authenticated user.
pub async fn me_handler(caller: AuthenticatedUser) -> Json<UserResponse> {
    Json(UserResponse { user: caller.user })
}

/// `PUT /api/auth/profile`: update email, username or display name.
pub async fn update_profile_handler(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> AppResult<Json<ProfileResponse>> {
    let Json(body) = payload?;
    let user = state.auth.update_profile(&caller.user.id, body).await?;
    Ok(Json(ProfileResponse {
        message: "Profile updated successfully",
        user,
    }))
}

/// `POST /api/auth/change-password`
pub async fn change_password_handler(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> AppResult<Json<MessageResponse>> {
    let Json(body) = payload?;
    state.auth.change_password(&caller.user.id, body).await?;
    Ok(Json(MessageResponse {
        message: "Password changed successfully",
    }))
}

/// `DELETE /api/auth/delete-account`: requires `{"confirmation": "DELETE_MY_ACCOUNT"}`.
pub async fn delete_account_handler(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    jar: CookieJar,
    payload: Result<Json<DeleteAccountRequest>, JsonRejection>,
) -> AppResult<(CookieJar, Json<MessageResponse>)> {
    let Json(body) = payload?;
    if body.confirmation != DELETE_CONFIRMATION {
        return Err(AppError::field(
            "confirmation",
            format!("Type {DELETE_CONFIRMATION} to confirm account deletion"),
            "INVALID_CONFIRMATION",
        ));
    }
    state.auth.delete_account(&caller.user.id).await?;
    Ok((
        jar.add(clear_auth_cookie(state.config.cookie_secure)),
        Json(MessageResponse {
            message: "Account deleted successfully",
        }),
    ))
}

/// Placeholder `OPTIONS` endpoint; the pipeline's CORS stage answers first.
pub async fn preflight_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}
