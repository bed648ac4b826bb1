//! Stateless `v4.public` access tokens.
//!
//! The signing key is an Ed25519 keypair derived from a 32-byte server seed.
//! Validation needs only the public half, the expected issuer/audience and the
//! current time.

use super::TokenError;
use ed25519_dalek::SigningKey;
use pasetors::keys::{AsymmetricPublicKey, AsymmetricSecretKey};
use pasetors::token::UntrustedToken;
use pasetors::version4::{PublicToken, V4};
use pasetors::Public;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub iss: String,
    pub aud: String,
    pub sub: Uuid,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sid: Option<Uuid>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl AccessClaims {
    #[must_use]
    pub fn user_id(&self) -> Uuid {
        self.sub
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: i64,
}

pub struct AccessTokenSigner {
    secret_key: AsymmetricSecretKey<V4>,
    public_key: AsymmetricPublicKey<V4>,
    issuer: String,
    audience: String,
    ttl_seconds: i64,
}

impl fmt::Debug for AccessTokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenSigner")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl AccessTokenSigner {
    /// Build a signer from a 32-byte Ed25519 seed.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the derived keypair is rejected.
    pub fn from_seed(
        seed: &[u8; 32],
        issuer: impl Into<String>,
        audience: impl Into<String>,
        ttl_seconds: i64,
    ) -> Result<Self, TokenError> {
        let signing_key = SigningKey::from_bytes(seed);
        let keypair = signing_key.to_keypair_bytes();
        let secret_key =
            AsymmetricSecretKey::<V4>::from(&keypair).map_err(|_| TokenError::InvalidKey)?;
        let public_key = AsymmetricPublicKey::<V4>::from(signing_key.verifying_key().as_bytes())
            .map_err(|_| TokenError::InvalidKey)?;

        Ok(Self {
            secret_key,
            public_key,
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_seconds,
        })
    }

    /// Sign a claim set for `user_id` issued at `now`.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded or signing fails.
    pub fn sign_at(
        &self,
        user_id: Uuid,
        session_id: Option<Uuid>,
        now: i64,
    ) -> Result<AccessToken, TokenError> {
        let claims = AccessClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: user_id,
            sid: session_id,
            iat: now,
            exp: now.saturating_add(self.ttl_seconds),
            jti: Ulid::new().to_string(),
        };
        let payload = serde_json::to_vec(&claims)?;
        let token = PublicToken::sign(&self.secret_key, &payload, None, None)
            .map_err(|_| TokenError::Signing)?;

        Ok(AccessToken {
            token,
            expires_at: claims.exp,
        })
    }

    /// Verify a token and return its claims.
    ///
    /// Anything that does not verify under our key, including garbage input
    /// and tokens minted for another issuer or audience, is `InvalidSignature`.
    ///
    /// # Errors
    /// Returns `InvalidSignature` or `Expired`.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<AccessClaims, TokenError> {
        let untrusted = UntrustedToken::<Public, V4>::try_from(token.trim())
            .map_err(|_| TokenError::InvalidSignature)?;
        let trusted = PublicToken::verify(&self.public_key, &untrusted, None, None)
            .map_err(|_| TokenError::InvalidSignature)?;
        let claims: AccessClaims =
            serde_json::from_str(trusted.payload()).map_err(|_| TokenError::InvalidSignature)?;

        if claims.iss != self.issuer || claims.aud != self.audience {
            return Err(TokenError::InvalidSignature);
        }
        if claims.exp <= now {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn signer(seed: u8) -> Result<AccessTokenSigner, TokenError> {
        AccessTokenSigner::from_seed(&[seed; 32], "https://sso.example.test", "api", 900)
    }

    #[test]
    fn sign_and_verify_returns_same_user() -> Result<(), TokenError> {
        let signer = signer(7)?;
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();

        let token = signer.sign_at(user_id, Some(session_id), NOW)?;
        assert!(token.token.starts_with("v4.public."));
        assert_eq!(token.expires_at, NOW + 900);

        let claims = signer.verify_at(&token.token, NOW + 1)?;
        assert_eq!(claims.user_id(), user_id);
        assert_eq!(claims.sid, Some(session_id));
        assert_eq!(claims.iat, NOW);
        Ok(())
    }

    #[test]
    fn verify_rejects_after_ttl() -> Result<(), TokenError> {
        let signer = signer(7)?;
        let token = signer.sign_at(Uuid::new_v4(), None, NOW)?;

        assert!(signer.verify_at(&token.token, NOW + 899).is_ok());
        assert!(matches!(
            signer.verify_at(&token.token, NOW + 900),
            Err(TokenError::Expired)
        ));
        Ok(())
    }

    #[test]
    fn verify_rejects_other_key() -> Result<(), TokenError> {
        let token = signer(7)?.sign_at(Uuid::new_v4(), None, NOW)?;
        let other = signer(9)?;

        assert!(matches!(
            other.verify_at(&token.token, NOW),
            Err(TokenError::InvalidSignature)
        ));
        Ok(())
    }

    #[test]
    fn verify_rejects_other_audience() -> Result<(), TokenError> {
        let token = signer(7)?.sign_at(Uuid::new_v4(), None, NOW)?;
        let other =
            AccessTokenSigner::from_seed(&[7u8; 32], "https://sso.example.test", "admin", 900)?;

        assert!(matches!(
            other.verify_at(&token.token, NOW),
            Err(TokenError::InvalidSignature)
        ));
        Ok(())
    }

    #[test]
    fn verify_rejects_garbage() -> Result<(), TokenError> {
        let signer = signer(7)?;
        for input in ["", "not-a-token", "v4.public.AAAA", "v4.local.AAAA"] {
            assert!(matches!(
                signer.verify_at(input, NOW),
                Err(TokenError::InvalidSignature)
            ));
        }
        Ok(())
    }

    #[test]
    fn debug_output_hides_key_material() -> Result<(), TokenError> {
        let rendered = format!("{:?}", signer(7)?);
        assert!(rendered.contains("https://sso.example.test"));
        assert!(!rendered.contains("secret_key"));
        Ok(())
    }
}
