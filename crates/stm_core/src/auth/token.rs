//! Stateless signed bearer tokens.
//!
//! # Responsibility
//! - Issue `{validUntil, user, verifier}` claims and encode them as base64
//!   JSON.
//! - Verify a presented token without server-side session state.
//!
//! # Invariants
//! - `verifier = hex(HMAC-SHA256(secret, "{valid_until}:{user}"))`.
//! - Verifiers are compared in constant time.
//! - A token is valid up to and including its `valid_until` second.

use crate::model::user::{normalize_user_id, UserId};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::{rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Default validity window of an issued token.
pub const DEFAULT_TOKEN_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

const RANDOM_SECRET_BYTES: usize = 32;
const BEARER_PREFIX: &str = "Bearer ";

/// Decoded token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// Expiry as unix seconds.
    pub valid_until: i64,
    pub user: UserId,
    pub verifier: String,
}

/// Token issuing or verification failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    MissingCredential,
    Malformed(String),
    InvalidVerifier,
    Expired { valid_until: i64 },
    InvalidSecret,
    EmptyUser,
}

impl Display for TokenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingCredential => write!(f, "missing credential"),
            Self::Malformed(details) => write!(f, "malformed token: {details}"),
            Self::InvalidVerifier => write!(f, "token verifier not valid"),
            Self::Expired { valid_until } => write!(f, "token expired at {valid_until}"),
            Self::InvalidSecret => write!(f, "token secret must not be empty"),
            Self::EmptyUser => write!(f, "token user must not be empty"),
        }
    }
}

impl Error for TokenError {}

/// Issues and verifies tokens with one process-wide secret.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    validity: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("secret", &"<redacted>")
            .field("validity", &self.validity)
            .finish()
    }
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>, validity: Duration) -> Result<Self, TokenError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(TokenError::InvalidSecret);
        }
        Ok(Self { secret, validity })
    }

    /// Signer with a fresh random secret; tokens die with the process.
    pub fn with_random_secret(validity: Duration) -> Self {
        let mut secret = vec![0_u8; RANDOM_SECRET_BYTES];
        rng().fill_bytes(&mut secret);
        Self { secret, validity }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Issues a token for `user` valid for the configured window from `now_unix`.
    pub fn issue(&self, user: &str, now_unix: i64) -> Result<Token, TokenError> {
        let user = normalize_user_id(user).map_err(|_| TokenError::EmptyUser)?;
        let window = i64::try_from(self.validity.as_secs()).unwrap_or(i64::MAX);
        let valid_until = now_unix.saturating_add(window);
        let verifier = self.verifier_for(&user, valid_until)?;
        Ok(Token {
            valid_until,
            user,
            verifier,
        })
    }

    /// Base64 JSON form carried as the bearer credential.
    pub fn encode(&self, token: &Token) -> Result<String, TokenError> {
        let json =
            serde_json::to_vec(token).map_err(|err| TokenError::Malformed(err.to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    /// Issues and encodes in one step.
    pub fn issue_encoded(&self, user: &str, now_unix: i64) -> Result<String, TokenError> {
        let token = self.issue(user, now_unix)?;
        self.encode(&token)
    }

    /// Verifies an encoded token and returns its user.
    ///
    /// Accepts the bare token or `Bearer <token>`.
    pub fn verify(&self, encoded: &str, now_unix: i64) -> Result<UserId, TokenError> {
        let encoded = encoded.trim();
        let encoded = encoded.strip_prefix(BEARER_PREFIX).unwrap_or(encoded).trim();
        if encoded.is_empty() {
            return Err(TokenError::MissingCredential);
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|err| TokenError::Malformed(err.to_string()))?;
        let token: Token =
            serde_json::from_slice(&bytes).map_err(|err| TokenError::Malformed(err.to_string()))?;

        if !self.verifier_matches(&token) {
            return Err(TokenError::InvalidVerifier);
        }
        if token.valid_until < now_unix {
            return Err(TokenError::Expired {
                valid_until: token.valid_until,
            });
        }
        Ok(token.user)
    }

    fn verifier_for(&self, user: &str, valid_until: i64) -> Result<String, TokenError> {
        let mac = self.mac(user, valid_until)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn verifier_matches(&self, token: &Token) -> bool {
        let Ok(presented) = hex::decode(&token.verifier) else {
            return false;
        };
        let Ok(mac) = self.mac(&token.user, token.valid_until) else {
            return false;
        };
        let expected = mac.finalize().into_bytes();
        if presented.len() != expected.len() {
            return false;
        }
        expected.as_slice().ct_eq(presented.as_slice()).into()
    }

    fn mac(&self, user: &str, valid_until: i64) -> Result<HmacSha256, TokenError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| TokenError::InvalidSecret)?;
        mac.update(format!("{valid_until}:{user}").as_bytes());
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::{Token, TokenError, TokenSigner, DEFAULT_TOKEN_VALIDITY};
    use base64::Engine;

    const NOW: i64 = 1_700_000_000;

    fn signer() -> TokenSigner {
        TokenSigner::new(b"test-secret".to_vec(), DEFAULT_TOKEN_VALIDITY).unwrap()
    }

    fn reencode(token: &Token) -> String {
        base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(token).unwrap())
    }

    #[test]
    fn issued_token_verifies_within_window() {
        let signer = signer();
        let encoded = signer.issue_encoded("alice", NOW).unwrap();
        assert_eq!(signer.verify(&encoded, NOW).unwrap(), "alice");
        assert_eq!(signer.verify(&format!("Bearer {encoded}"), NOW + 60).unwrap(), "alice");
        assert_eq!(signer.verify(&encoded, NOW + 86_400).unwrap(), "alice");
    }

    #[test]
    fn expired_token_is_rejected() {
        let signer = signer();
        let encoded = signer.issue_encoded("alice", NOW).unwrap();
        assert_eq!(
            signer.verify(&encoded, NOW + 86_401),
            Err(TokenError::Expired {
                valid_until: NOW + 86_400
            })
        );
    }

    #[test]
    fn tampered_claims_fail_verification() {
        let signer = signer();
        let mut token = signer.issue("alice", NOW).unwrap();
        token.user = "mallory".to_string();
        assert_eq!(signer.verify(&reencode(&token), NOW), Err(TokenError::InvalidVerifier));

        let mut token = signer.issue("alice", NOW).unwrap();
        token.valid_until += 3_600;
        assert_eq!(signer.verify(&reencode(&token), NOW), Err(TokenError::InvalidVerifier));
    }

    #[test]
    fn other_secret_cannot_forge() {
        let forger = TokenSigner::new(b"other".to_vec(), DEFAULT_TOKEN_VALIDITY).unwrap();
        let encoded = forger.issue_encoded("alice", NOW).unwrap();
        assert_eq!(signer().verify(&encoded, NOW), Err(TokenError::InvalidVerifier));
    }

    #[test]
    fn rejects_garbage_and_empty_input() {
        let signer = signer();
        assert_eq!(signer.verify("  ", NOW), Err(TokenError::MissingCredential));
        assert!(matches!(signer.verify("%%%", NOW), Err(TokenError::Malformed(_))));
        assert_eq!(
            TokenSigner::new(Vec::new(), DEFAULT_TOKEN_VALIDITY).unwrap_err(),
            TokenError::InvalidSecret
        );
        assert_eq!(signer.issue(" ", NOW).unwrap_err(), TokenError::EmptyUser);
    }

    #[test]
    fn random_secrets_differ_between_signers() {
        let first = TokenSigner::with_random_secret(DEFAULT_TOKEN_VALIDITY);
        let second = TokenSigner::with_random_secret(DEFAULT_TOKEN_VALIDITY);
        let encoded = first.issue_encoded("alice", NOW).unwrap();
        assert_eq!(first.verify(&encoded, NOW).unwrap(), "alice");
        assert_eq!(second.verify(&encoded, NOW), Err(TokenError::InvalidVerifier));
    }
}
