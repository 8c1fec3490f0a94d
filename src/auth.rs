use actix_web::{dev::Payload, web, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::{ready, Ready};
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::routes::AppState;
use crate::throttle::LoginThrottle;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub roles: Vec<Role>,
}

/// Validate a JWT and return its claims.
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

/// Sign a token for `subject` that expires after `ttl`.
pub fn create_jwt(
    subject: &str,
    roles: Vec<Role>,
    secret: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = chrono::Utc::now().timestamp().max(0) as usize + ttl.as_secs() as usize;
    let claims = Claims { sub: subject.to_string(), exp: expiration, roles };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

/// Extractor yielding validated `Claims`.
pub struct Auth(pub Claims);

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let Some(state) = req.app_data::<web::Data<AppState>>() else {
            return ready(Err(actix_web::error::ErrorInternalServerError("app state missing")));
        };
        // Delegate to BearerAuth to parse the header.
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            return match decode_jwt(bearer.token(), &state.config.jwt_secret) {
                Ok(claims) => ready(Ok(Auth(claims))),
                Err(_) => ready(Err(actix_web::error::ErrorUnauthorized("Invalid JWT"))),
            };
        }
        ready(Err(actix_web::error::ErrorUnauthorized("Authorization required")))
    }
}

/// Capability handed to every mutating, export or import operation.
///
/// Built from verified claims; operations call [`AdminContext::ensure_admin`]
/// before touching anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminContext {
    subject: Option<String>,
    admin: bool,
}

impl AdminContext {
    pub fn anonymous() -> Self {
        Self { subject: None, admin: false }
    }

    pub fn admin(subject: impl Into<String>) -> Self {
        Self { subject: Some(subject.into()), admin: true }
    }

    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            subject: Some(claims.sub.clone()),
            admin: claims.roles.contains(&Role::Admin),
        }
    }

    pub fn from_auth(auth: Option<&Auth>) -> Self {
        auth.map_or_else(Self::anonymous, |a| Self::from_claims(&a.0))
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn ensure_admin(&self) -> Result<(), ApiError> {
        if self.admin { Ok(()) } else { Err(ApiError::Forbidden) }
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    pub user_id: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LoginResponse {
    pub token: String,
    /// Seconds until the token expires.
    pub expires_in: u64,
}

fn digest_eq(a: &str, b: &str) -> bool {
    Sha256::digest(a.as_bytes()) == Sha256::digest(b.as_bytes())
}

/// Exchange the shared admin credentials for an admin token.
pub fn login(
    config: &AppConfig,
    throttle: &LoginThrottle,
    client: &str,
    req: &LoginRequest,
) -> Result<LoginResponse, ApiError> {
    if !throttle.allow(client) {
        tracing::warn!(client, "admin login throttled");
        return Err(ApiError::TooManyRequests);
    }
    let (Some(id), Some(password)) = (config.admin_id.as_deref(), config.admin_password.as_deref()) else {
        tracing::warn!("admin login attempted but ADMIN_ID/ADMIN_PASSWORD are not configured");
        return Err(ApiError::Unauthorized);
    };
    // evaluate both so timing doesn't reveal which one was wrong
    let id_ok = digest_eq(&req.user_id, id);
    let password_ok = digest_eq(&req.password, password);
    if !(id_ok && password_ok) {
        tracing::warn!(client, "admin login failed");
        return Err(ApiError::Unauthorized);
    }
    throttle.reset(client);
    let token = create_jwt(id, vec![Role::Admin], &config.jwt_secret, config.admin_session).map_err(|e| {
        tracing::error!("failed to sign admin token: {e}");
        ApiError::Internal
    })?;
    Ok(LoginResponse { token, expires_in: config.admin_session.as_secs() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle() -> LoginThrottle {
        LoginThrottle::new(5, Duration::from_secs(60))
    }

    #[test]
    fn token_round_trip_carries_admin_role() {
        let cfg = AppConfig::for_tests();
        let token = create_jwt("admin", vec![Role::Admin], &cfg.jwt_secret, Duration::from_secs(60)).unwrap();
        let claims = decode_jwt(&token, &cfg.jwt_secret).unwrap();
        assert!(AdminContext::from_claims(&claims).is_admin());
        assert!(decode_jwt(&token, "another-secret-that-is-long-enough!!").is_err());
    }

    #[test]
    fn login_checks_both_credentials() {
        let cfg = AppConfig::for_tests();
        let bad = LoginRequest { user_id: "admin".into(), password: "nope".into() };
        assert!(matches!(login(&cfg, &throttle(), "c", &bad), Err(ApiError::Unauthorized)));
        let good = LoginRequest { user_id: "admin".into(), password: "secret".into() };
        let resp = login(&cfg, &throttle(), "c", &good).unwrap();
        assert_eq!(resp.expires_in, 30 * 60);
    }

    #[test]
    fn login_disabled_without_credentials() {
        let mut cfg = AppConfig::for_tests();
        cfg.admin_password = None;
        let req = LoginRequest { user_id: "admin".into(), password: "".into() };
        assert!(matches!(login(&cfg, &throttle(), "c", &req), Err(ApiError::Unauthorized)));
    }

    #[test]
    fn anonymous_is_refused() {
        assert!(matches!(AdminContext::anonymous().ensure_admin(), Err(ApiError::Forbidden)));
        assert!(AdminContext::admin("ops").ensure_admin().is_ok());
    }
}
