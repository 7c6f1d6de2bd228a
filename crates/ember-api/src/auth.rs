use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::warn;
use uuid::Uuid;

use ember_db::Database;
use ember_gateway::Gateway;
use ember_match::MatchEngine;
use ember_types::api::{
    Claims, LoginRequest, LoginResponse, OAuthLoginRequest, RegisterRequest, RegisterResponse,
};

use crate::error::ApiError;
use crate::identity::ProviderRegistry;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub engine: MatchEngine,
    pub gateway: Gateway,
    pub jwt_secret: String,
    pub providers: ProviderRegistry,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::Invalid("username must be 3-32 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Invalid(
            "password must be at least 8 characters".into(),
        ));
    }

    if state
        .db
        .get_user_by_username(&req.username)
        .map_err(ApiError::Unavailable)?
        .is_some()
    {
        return Err(ApiError::Conflict("username taken".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hash failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();

    state
        .db
        .create_user(&user_id.to_string(), &req.username, &password_hash)
        .map_err(ApiError::Unavailable)?;

    let token = create_token(&state.jwt_secret, user_id, &req.username)
        .map_err(ApiError::Internal)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { user_id, token }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_username(&req.username)
        .map_err(ApiError::Unavailable)?
        .ok_or(ApiError::Unauthorized)?;

    // OAuth-created accounts carry a placeholder, not an Argon2 hash;
    // password login on them always fails.
    let parsed_hash = PasswordHash::new(&user.password).map_err(|_| ApiError::Unauthorized)?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt user id: {}", e)))?;

    let token =
        create_token(&state.jwt_secret, user_id, &user.username).map_err(ApiError::Internal)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

/// Exchange an OAuth authorization code for an Ember session. The user is
/// created on first sight, keyed by the provider-scoped identity.
pub async fn oauth_login(
    State(state): State<AppState>,
    Json(req): Json<OAuthLoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let provider = state
        .providers
        .get(&req.provider)
        .ok_or_else(|| ApiError::Invalid(format!("unknown provider '{}'", req.provider)))?;

    let identity = provider.exchange_code(&req.code).await.map_err(|e| {
        warn!("OAuth code exchange via {} failed: {:#}", req.provider, e);
        ApiError::Unauthorized
    })?;

    // Stable username for the external identity; email when the provider
    // shares one, provider-scoped subject otherwise.
    let username = identity
        .email
        .clone()
        .unwrap_or_else(|| format!("{}:{}", identity.provider, identity.subject));

    let existing = state
        .db
        .get_user_by_username(&username)
        .map_err(ApiError::Unavailable)?;

    let user_id = match existing {
        Some(user) => user
            .id
            .parse()
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt user id: {}", e)))?,
        None => {
            let user_id = Uuid::new_v4();
            // Placeholder marker; PasswordHash::new never accepts it, so
            // these accounts cannot be password-logged-into.
            let placeholder = format!("!oauth:{}", identity.provider);
            state
                .db
                .create_user(&user_id.to_string(), &username, &placeholder)
                .map_err(ApiError::Unavailable)?;
            user_id
        }
    };

    let token = create_token(&state.jwt_secret, user_id, &username).map_err(ApiError::Internal)?;

    Ok(Json(LoginResponse {
        user_id,
        username,
        token,
    }))
}

fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
