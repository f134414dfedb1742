use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use base64::engine::{general_purpose, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::handlers::api::AppState;
use crate::models::user::{Role, TokenPair, UserRecord};

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Payload carried inside every signed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub class_group: Option<String>,
    pub gender: Option<String>,
    pub role: Role,
    pub kind: TokenKind,
    pub exp: i64,
    pub nonce: String,
}

/// Verified identity of a request, handed explicitly to every collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub username: String,
    pub class_group: Option<String>,
    pub gender: Option<String>,
    pub role: Role,
    /// Raw access token, forwarded to remote collaborators
    pub token: String,
}

impl Session {
    pub fn from_claims(claims: Claims, token: &str) -> Self {
        Self {
            user_id: claims.sub,
            username: claims.username,
            class_group: claims.class_group,
            gender: claims.gender,
            role: claims.role,
            token: token.to_string(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("administrator role required".to_string()))
        }
    }
}

/// Issues and verifies HMAC-signed access and refresh tokens.
pub struct TokenSigner {
    secret: Vec<u8>,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenSigner {
    pub fn new(secret: &str, access_ttl_secs: i64, refresh_ttl_secs: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    /// Generate a random nonce so two tokens issued in the same second differ
    pub fn generate_nonce() -> String {
        rand::thread_rng().gen_range(10000000..99999999).to_string()
    }

    pub fn get_timestamp() -> i64 {
        Utc::now().timestamp()
    }

    /// Issue a fresh access/refresh pair for a user
    pub fn issue_pair(&self, user: &UserRecord) -> Result<TokenPair, ServiceError> {
        let now = Self::get_timestamp();
        let access = self.issue(user, TokenKind::Access, now + self.access_ttl_secs)?;
        let refresh = self.issue(user, TokenKind::Refresh, now + self.refresh_ttl_secs)?;

        debug!("Issued token pair for user {}", user.id);

        Ok(TokenPair {
            access,
            refresh,
            expires_in: self.access_ttl_secs,
        })
    }

    pub fn issue(&self, user: &UserRecord, kind: TokenKind, exp: i64) -> Result<String, ServiceError> {
        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            class_group: user.class_group.clone(),
            gender: user.gender.clone(),
            role: user.role,
            kind,
            exp,
            nonce: Self::generate_nonce(),
        };

        let json = serde_json::to_vec(&claims).map_err(|e| ServiceError::Internal(e.to_string()))?;
        let payload = general_purpose::URL_SAFE_NO_PAD.encode(json);
        let signature = self.sign(&payload)?;

        Ok(format!("{}.{}", payload, signature))
    }

    /// Check signature, kind and expiry of a token and return its claims
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, ServiceError> {
        let (payload, signature) = token
            .split_once('.')
            .ok_or_else(|| ServiceError::Unauthorized("malformed token".to_string()))?;

        let hex_hash = general_purpose::URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| ServiceError::Unauthorized("malformed token signature".to_string()))?;
        let raw_signature = hex::decode(hex_hash)
            .map_err(|_| ServiceError::Unauthorized("malformed token signature".to_string()))?;

        self.mac()?
            .chain_update(payload.as_bytes())
            .verify_slice(&raw_signature)
            .map_err(|_| ServiceError::Unauthorized("invalid token signature".to_string()))?;

        let json = general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| ServiceError::Unauthorized("malformed token payload".to_string()))?;
        let claims: Claims = serde_json::from_slice(&json)
            .map_err(|_| ServiceError::Unauthorized("malformed token payload".to_string()))?;

        if claims.kind != expected {
            return Err(ServiceError::Unauthorized("wrong token type".to_string()));
        }
        if claims.exp <= Self::get_timestamp() {
            return Err(ServiceError::Unauthorized("token expired".to_string()));
        }

        Ok(claims)
    }

    fn mac(&self) -> Result<HmacSha256, ServiceError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| ServiceError::Internal(e.to_string()))
    }

    // HMAC-SHA256 over the payload, hex encoded then base64 encoded
    fn sign(&self, payload: &str) -> Result<String, ServiceError> {
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let hex_hash = hex::encode(mac.finalize().into_bytes());
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(hex_hash.as_bytes()))
    }
}

/// Salted bcrypt hash as stored in the user directory.
pub fn hash_password(password: &str, cost: u32) -> Result<String, ServiceError> {
    bcrypt::hash(password, cost)
        .map_err(|e| ServiceError::Internal(format!("failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match bcrypt::verify(password, password_hash) {
        Ok(valid) => valid,
        Err(e) => {
            warn!("Unreadable stored password hash: {}", e);
            false
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Session {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;

        let claims = state.signer.verify(token, TokenKind::Access)?;

        Ok(Session::from_claims(claims, token))
    }
}
