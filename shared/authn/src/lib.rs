//! Bearer-JWT extraction shared by every HTTP service (spec §6: "Bearer-token
//! auth throughout except provider webhooks"). Grounded on the teacher's
//! `signaling` service, which decoded the same claims by hand per request;
//! here it's an axum extractor so every handler gets it for free.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
};
use dto::AuthClaims;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

#[derive(Clone)]
pub struct JwtKeys {
    pub decoding_key: DecodingKey,
    pub validation: Validation,
}

impl JwtKeys {
    pub fn from_secret(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        JwtKeys {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

/// The authenticated caller, extracted from `Authorization: Bearer <jwt>`.
pub struct AuthUser(pub AuthClaims);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);

        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "missing bearer token"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or((StatusCode::UNAUTHORIZED, "malformed authorization header"))?;

        let claims = decode::<AuthClaims>(token, &keys.decoding_key, &keys.validation)
            .map_err(|err| {
                tracing::warn!(error = %err, "jwt decode failed");
                (StatusCode::UNAUTHORIZED, "invalid or expired token")
            })?
            .claims;

        Ok(AuthUser(claims))
    }
}
