//! JWT token generation and verification.
//!
//! Access and refresh families are signed with disjoint secrets. Only HS256
//! is accepted on parse; any other algorithm tag is refused.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, RngCore, rng};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AuthError;
use crate::models::auth::{TokenClaims, TokenType, User};
use crate::uuid::uuidv7;

/// The single signing algorithm this codec issues and accepts.
pub const ALGORITHM: Algorithm = Algorithm::HS256;

/// Random bytes in an opaque refresh token.
const REFRESH_TOKEN_BYTES: usize = 32;

#[derive(Clone)]
struct FamilyKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl FamilyKeys {
    fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// Signs and parses token envelopes for both token families.
#[derive(Clone)]
pub struct TokenCodec {
    issuer: String,
    access: FamilyKeys,
    refresh: FamilyKeys,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec. The two secrets must be non-empty and distinct.
    pub fn new(
        issuer: impl Into<String>,
        access_secret: &[u8],
        refresh_secret: &[u8],
    ) -> Result<Self, AuthError> {
        if access_secret.is_empty() || refresh_secret.is_empty() {
            return Err(AuthError::BadRequest("signing secrets must not be empty".into()));
        }
        if access_secret == refresh_secret {
            return Err(AuthError::BadRequest(
                "access and refresh secrets must differ".into(),
            ));
        }
        Ok(Self {
            issuer: issuer.into(),
            access: FamilyKeys::from_secret(access_secret),
            refresh: FamilyKeys::from_secret(refresh_secret),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    fn keys(&self, family: TokenType) -> &FamilyKeys {
        match family {
            TokenType::Access => &self.access,
            TokenType::Refresh => &self.refresh,
        }
    }

    /// Build a claim set for `user` valid from `now` for `ttl`. Fails when
    /// the expiry is not representable.
    pub fn claims_for(
        &self,
        user: &User,
        roles: Vec<String>,
        session_id: Option<Uuid>,
        family: TokenType,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<TokenClaims, AuthError> {
        let iat = now.timestamp();
        let exp = now
            .checked_add_signed(ttl)
            .ok_or_else(|| AuthError::Internal(format!("token expiry overflows: {ttl}")))?;
        Ok(TokenClaims {
            iss: self.issuer.clone(),
            sub: user.id.to_string(),
            iat,
            nbf: iat,
            exp: exp.timestamp(),
            jti: uuidv7().to_string(),
            user_id: user.id.to_string(),
            username: user.username.clone(),
            email: user.email.clone(),
            roles,
            token_type: family,
            session_id: session_id.map(|id| id.to_string()).unwrap_or_default(),
        })
    }

    /// Sign `claims` with the secret of `family`.
    pub fn issue(&self, claims: &TokenClaims, family: TokenType) -> Result<String, AuthError> {
        if claims.token_type != family {
            return Err(AuthError::BadRequest(format!(
                "claims tagged {} cannot be issued as {family}",
                claims.token_type
            )));
        }
        if claims.exp <= claims.iat {
            return Err(AuthError::BadRequest("token expiry must follow issuance".into()));
        }
        encode(&Header::new(ALGORITHM), claims, &self.keys(family).encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
    }

    /// Verify signature, algorithm, issuer, `nbf`, `exp` and family.
    pub fn parse(&self, token: &str, family: TokenType) -> Result<TokenClaims, AuthError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);

        let data = decode::<TokenClaims>(token, &self.keys(family).decoding, &validation)
            .map_err(|e| {
                debug!(error = %e, %family, "token rejected");
                AuthError::InvalidToken(describe(e.kind()).to_string())
            })?;

        if data.claims.token_type != family {
            return Err(AuthError::InvalidToken("wrong token family".into()));
        }
        Ok(data.claims)
    }
}

fn describe(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::ExpiredSignature => "token expired",
        ErrorKind::ImmatureSignature => "token not yet valid",
        ErrorKind::InvalidSignature => "signature mismatch",
        ErrorKind::InvalidAlgorithm => "algorithm not accepted",
        ErrorKind::InvalidIssuer => "issuer mismatch",
        ErrorKind::MissingRequiredClaim(_) => "missing required claim",
        _ => "malformed token",
    }
}

/// Generate an opaque refresh token: 32 random bytes, URL-safe base64.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hash a refresh token for storage.
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Read the secret persisted as `file_name` under the platform data dir,
/// generating and persisting a new one when absent.
pub fn persisted_secret(file_name: &str) -> String {
    secret_at(&secret_path(file_name))
}

fn secret_at(path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    let persisted = match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent),
        None => Ok(()),
    }
    .and_then(|()| std::fs::write(path, &secret));
    match persisted {
        Ok(()) => info!(path = %path.display(), "generated new signing secret"),
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "could not persist signing secret; tokens will not survive a restart"
        ),
    }
    secret
}

/// Path to a persisted secret file.
fn secret_path(file_name: &str) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("narwhal")
        .join(file_name)
}
