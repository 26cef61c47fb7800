use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::{Claims, TokenType};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error};

fn now() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or_default()
}

/// Signs an access token the way the identity service does. This service
/// only verifies tokens; the signer is kept for tooling and tests.
pub fn generate_access_token(
    user_id: u64,
    username: String,
    role: u8,
    department_id: Option<u64>,
    secret: &str,
    ttl: usize,
) -> Result<String, Error> {
    let issued = now();
    let claims = Claims {
        user_id,
        sub: username,
        role,
        exp: issued + ttl,
        jti: format!("{user_id}-{issued}"),
        token_type: TokenType::Access,
        department_id,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Access tokens only; a valid refresh token is still refused.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())?;

    if claims.token_type != TokenType::Access {
        return Err("not an access token".to_string());
    }
    Ok(claims)
}
