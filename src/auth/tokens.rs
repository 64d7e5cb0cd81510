use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, TokenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Vendor,
    Pos,
}

/// Claims carried by session bearer tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub vendor_id: Option<i64>,
    pub pos_id: Option<i64>,
    pub role: Role,
    #[serde(default)]
    pub password_version: u32,
    pub exp: i64,
}

impl SessionClaims {
    /// Vendor and POS ids of a POS terminal session
    pub fn require_pos(&self) -> Result<(i64, i64), AppError> {
        match (self.role, self.vendor_id, self.pos_id) {
            (Role::Pos, Some(vendor_id), Some(pos_id)) => Ok((vendor_id, pos_id)),
            (Role::Pos, _, _) => Err(AppError::Unauthorized(
                "POS token is missing vendor_id or pos_id".to_string(),
            )),
            _ => Err(AppError::Unauthorized("POS role required".to_string())),
        }
    }

    pub fn require_vendor(&self) -> Result<i64, AppError> {
        match (self.role, self.vendor_id) {
            (Role::Vendor, Some(vendor_id)) => Ok(vendor_id),
            (Role::Vendor, None) => Err(AppError::Unauthorized(
                "Vendor token is missing vendor_id".to_string(),
            )),
            _ => Err(AppError::Unauthorized("Vendor role required".to_string())),
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Unauthorized("Admin role required".to_string()))
        }
    }
}

/// Claims of a callback token, scoped to one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackClaims {
    pub transaction_id: i64,
    pub exp: i64,
}

/// Signs and verifies both token kinds, each with its own secret
#[derive(Clone)]
pub struct TokenService {
    session_decoding: DecodingKey,
    callback_encoding: EncodingKey,
    callback_decoding: DecodingKey,
    callback_ttl: Duration,
    #[cfg(test)]
    session_encoding: EncodingKey,
}

impl TokenService {
    pub fn new(session_secret: &str, callback_secret: &str, callback_ttl_secs: i64) -> Self {
        Self {
            session_decoding: DecodingKey::from_secret(session_secret.as_bytes()),
            callback_encoding: EncodingKey::from_secret(callback_secret.as_bytes()),
            callback_decoding: DecodingKey::from_secret(callback_secret.as_bytes()),
            callback_ttl: Duration::seconds(callback_ttl_secs),
            #[cfg(test)]
            session_encoding: EncodingKey::from_secret(session_secret.as_bytes()),
        }
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        validation.leeway = 0;
        validation
    }

    pub fn verify_session(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let data = decode::<SessionClaims>(token, &self.session_decoding, &Self::validation())?;
        Ok(data.claims)
    }

    pub fn mint_callback_token(&self, transaction_id: i64) -> Result<String, TokenError> {
        let claims = CallbackClaims {
            transaction_id,
            exp: (Utc::now() + self.callback_ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.callback_encoding)
            .map_err(|e| TokenError::Generation(e.to_string()))
    }

    /// Transaction id the callback token was minted for
    pub fn verify_callback_token(&self, token: &str) -> Result<i64, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Missing);
        }
        let data = decode::<CallbackClaims>(token, &self.callback_decoding, &Self::validation())?;
        Ok(data.claims.transaction_id)
    }

    #[cfg(test)]
    pub fn issue_session(&self, claims: &SessionClaims) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &self.session_encoding).unwrap()
    }

    #[cfg(test)]
    pub fn sign_callback(&self, claims: &CallbackClaims) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &self.callback_encoding).unwrap()
    }
}

/// Callback URL handed to the gateway for one transaction
///
/// A `{jwt}` placeholder in the template is replaced by the token; otherwise
/// `/receive/<token>` is appended.
pub fn callback_url(template: &str, token: &str) -> String {
    if template.contains("{jwt}") {
        template.replace("{jwt}", token)
    } else {
        format!("{}/receive/{}", template.trim_end_matches('/'), token)
    }
}
