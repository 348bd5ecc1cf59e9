use std::sync::Arc;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use parley_chat::ChatService;
use parley_types::api::Claims;
use parley_types::models::UserId;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub chat: ChatService,
    pub jwt_secret: String,
    /// Per-file intake limit for multipart bodies.
    pub max_file_bytes: usize,
}

/// Validate a bearer token issued by the account service.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Mint a token. Tokens normally come from the account service; this is for
/// tooling and tests.
pub fn create_token(
    secret: &str,
    user_id: UserId,
    username: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::days(7))
        .map(|t| t.timestamp() as usize)
        .unwrap_or(usize::MAX);

    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
