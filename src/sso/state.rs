//! Sealed redirect state carried by the browser between `begin` and `callback`.
//!
//! Token layout, base64url without padding:
//!
//! ```text
//! issued_at (8, big endian) || nonce (12) || ChaCha20-Poly1305(ciphertext || tag)
//! ```
//!
//! `issued_at` stays in clear so expiry can be judged before the AEAD check,
//! and it is bound to the ciphertext as associated data.

use crate::clock::{Clock, SystemClock};
use base64ct::{Base64UrlUnpadded, Encoding};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_STATE_TTL_SECONDS: u64 = 5 * 60;

const AAD_PREFIX: &[u8] = b"passaggio-state:v1";
const ISSUED_AT_LEN: usize = 8;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const STATE_NONCE_BYTES: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("malformed state")]
    Malformed,
    #[error("state expired")]
    Expired,
    #[error("state failed authentication")]
    TamperedOrWrongKey,
    #[error("failed to seal state")]
    Encryption,
    #[error("failed to generate state nonce")]
    Entropy,
}

/// Request context recovered on callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectState {
    /// 128-bit random anti-forgery value, base64url.
    pub nonce: String,
    pub provider_type: String,
    pub redirect_target: String,
    pub issued_at: i64,
}

impl RedirectState {
    /// Fresh state with a random nonce.
    ///
    /// # Errors
    /// Returns `Entropy` if the OS RNG fails.
    pub fn new(
        provider_type: impl Into<String>,
        redirect_target: impl Into<String>,
        issued_at: i64,
    ) -> Result<Self, StateError> {
        let mut bytes = [0u8; STATE_NONCE_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|_| StateError::Entropy)?;
        Ok(Self {
            nonce: Base64UrlUnpadded::encode_string(&bytes),
            provider_type: provider_type.into(),
            redirect_target: redirect_target.into(),
            issued_at,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct SealedFields {
    #[serde(rename = "n")]
    nonce: String,
    #[serde(rename = "p")]
    provider_type: String,
    #[serde(rename = "r")]
    redirect_target: String,
}

#[derive(Clone)]
pub struct StateCodec {
    cipher: ChaCha20Poly1305,
    ttl_seconds: i64,
}

impl fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCodec")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl StateCodec {
    #[must_use]
    pub fn new(key: &[u8; 32], ttl: Duration) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
            ttl_seconds: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// Unix time after which a state issued at `issued_at` is rejected.
    #[must_use]
    pub fn expires_at(&self, issued_at: i64) -> i64 {
        issued_at.saturating_add(self.ttl_seconds)
    }

    /// Seal `state` into a URL-safe token.
    ///
    /// # Errors
    /// Returns `Encryption` only on an internal serialization or AEAD failure.
    pub fn encode(&self, state: &RedirectState) -> Result<String, StateError> {
        let fields = SealedFields {
            nonce: state.nonce.clone(),
            provider_type: state.provider_type.clone(),
            redirect_target: state.redirect_target.clone(),
        };
        let plaintext = serde_json::to_vec(&fields).map_err(|_| StateError::Encryption)?;

        let header = state.issued_at.to_be_bytes();
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|_| StateError::Entropy)?;

        let aad = associated_data(&header);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| StateError::Encryption)?;

        let mut raw = Vec::with_capacity(ISSUED_AT_LEN + NONCE_LEN + ciphertext.len());
        raw.extend_from_slice(&header);
        raw.extend_from_slice(&nonce_bytes);
        raw.extend_from_slice(&ciphertext);
        Ok(Base64UrlUnpadded::encode_string(&raw))
    }

    /// # Errors
    /// See [`StateCodec::decode_at`].
    pub fn decode(&self, token: &str) -> Result<RedirectState, StateError> {
        self.decode_at(token, SystemClock.now_unix())
    }

    /// Open a token at time `now`.
    ///
    /// Expiry is checked first, so a stale token reports `Expired` even if it
    /// was also altered.
    ///
    /// # Errors
    /// Returns `Malformed`, `Expired` or `TamperedOrWrongKey`.
    pub fn decode_at(&self, token: &str, now: i64) -> Result<RedirectState, StateError> {
        let raw = Base64UrlUnpadded::decode_vec(token.trim()).map_err(|_| StateError::Malformed)?;
        if raw.len() < ISSUED_AT_LEN + NONCE_LEN + TAG_LEN {
            return Err(StateError::Malformed);
        }

        let (header, rest) = raw.split_at(ISSUED_AT_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);
        let mut issued_at_bytes = [0u8; ISSUED_AT_LEN];
        issued_at_bytes.copy_from_slice(header);
        let issued_at = i64::from_be_bytes(issued_at_bytes);

        if self.expires_at(issued_at) < now {
            return Err(StateError::Expired);
        }

        let aad = associated_data(&issued_at_bytes);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| StateError::TamperedOrWrongKey)?;

        let fields: SealedFields =
            serde_json::from_slice(&plaintext).map_err(|_| StateError::Malformed)?;

        Ok(RedirectState {
            nonce: fields.nonce,
            provider_type: fields.provider_type,
            redirect_target: fields.redirect_target,
            issued_at,
        })
    }
}

fn associated_data(header: &[u8; ISSUED_AT_LEN]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(AAD_PREFIX.len() + header.len());
    aad.extend_from_slice(AAD_PREFIX);
    aad.extend_from_slice(header);
    aad
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn codec() -> StateCodec {
        StateCodec::new(&[11u8; 32], Duration::from_secs(DEFAULT_STATE_TTL_SECONDS))
    }

    fn state() -> RedirectState {
        RedirectState::new("oidc", "/app?tab=1", NOW).unwrap()
    }

    fn flip_bit(token: &str, byte: usize, bit: u8) -> String {
        let mut raw = Base64UrlUnpadded::decode_vec(token).unwrap();
        raw[byte] ^= 1 << bit;
        Base64UrlUnpadded::encode_string(&raw)
    }

    #[test]
    fn round_trip_reproduces_state() {
        let codec = codec();
        let state = state();
        let token = codec.encode(&state).unwrap();
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(codec.decode_at(&token, NOW + 10).unwrap(), state);
    }

    #[test]
    fn nonce_is_128_bits_and_unique() {
        let a = state();
        let b = state();
        assert_eq!(Base64UrlUnpadded::decode_vec(&a.nonce).unwrap().len(), 16);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn encoding_twice_yields_different_tokens() {
        let codec = codec();
        let state = state();
        assert_ne!(codec.encode(&state).unwrap(), codec.encode(&state).unwrap());
    }

    #[test]
    fn expires_after_ttl() {
        let codec = codec();
        let token = codec.encode(&state()).unwrap();
        assert!(codec.decode_at(&token, NOW + 300).is_ok());
        assert_eq!(
            codec.decode_at(&token, NOW + 301),
            Err(StateError::Expired)
        );
    }

    #[test]
    fn expired_wins_over_tampering() {
        let codec = codec();
        let token = codec.encode(&state()).unwrap();
        let last = Base64UrlUnpadded::decode_vec(&token).unwrap().len() - 1;
        let tampered = flip_bit(&token, last, 0);
        assert_eq!(
            codec.decode_at(&tampered, NOW + 1_000),
            Err(StateError::Expired)
        );
    }

    #[test]
    fn bit_flip_is_detected() {
        let codec = codec();
        let token = codec.encode(&state()).unwrap();
        let len = Base64UrlUnpadded::decode_vec(&token).unwrap().len();

        // Low bits of the issue time keep it inside the TTL window.
        for bit in 0..4 {
            assert_eq!(
                codec.decode_at(&flip_bit(&token, 7, bit), NOW),
                Err(StateError::TamperedOrWrongKey)
            );
        }
        for byte in ISSUED_AT_LEN..len {
            for bit in 0..8 {
                assert_eq!(
                    codec.decode_at(&flip_bit(&token, byte, bit), NOW),
                    Err(StateError::TamperedOrWrongKey),
                    "byte {byte} bit {bit}"
                );
            }
        }
    }

    #[test]
    fn header_flip_into_the_past_reads_as_expired() {
        let codec = codec();
        let token = codec.encode(&state()).unwrap();

        // Sign bit: issued_at becomes negative, far outside the window.
        assert_eq!(
            codec.decode_at(&flip_bit(&token, 0, 7), NOW),
            Err(StateError::Expired)
        );

        let (mut expired, mut tampered) = (0, 0);
        for byte in 0..ISSUED_AT_LEN {
            for bit in 0..8u8 {
                let mut mask = [0u8; ISSUED_AT_LEN];
                mask[byte] = 1 << bit;
                let shifted = NOW ^ i64::from_be_bytes(mask);
                let expected = if codec.expires_at(shifted) < NOW {
                    expired += 1;
                    StateError::Expired
                } else {
                    tampered += 1;
                    StateError::TamperedOrWrongKey
                };
                assert_eq!(
                    codec.decode_at(&flip_bit(&token, byte, bit), NOW),
                    Err(expected),
                    "byte {byte} bit {bit}"
                );
            }
        }
        assert!(expired > 0);
        assert!(tampered > 0);
    }

    #[test]
    fn wrong_key_is_rejected() {
        let token = codec().encode(&state()).unwrap();
        let other = StateCodec::new(&[12u8; 32], Duration::from_secs(300));
        assert_eq!(
            other.decode_at(&token, NOW),
            Err(StateError::TamperedOrWrongKey)
        );
    }

    #[test]
    fn malformed_inputs() {
        let codec = codec();
        for input in ["", "***", "AAAA", "not a token"] {
            assert_eq!(codec.decode_at(input, NOW), Err(StateError::Malformed));
        }
    }

    #[test]
    fn changed_character_fails() {
        let codec = codec();
        let token = codec.encode(&state()).unwrap();
        let mut chars: Vec<char> = token.chars().collect();
        let mid = chars.len() / 2;
        chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
        let altered: String = chars.into_iter().collect();
        assert!(codec.decode_at(&altered, NOW).is_err());
    }

    #[test]
    fn debug_hides_key() {
        let rendered = format!("{:?}", codec());
        assert!(rendered.contains("ttl_seconds"));
        assert!(!rendered.contains("cipher"));
    }
}
