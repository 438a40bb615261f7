//! Credential verification.
//!
//! Two independent verifiers sit behind the credential-check handshake
//! state: password (hash comparison) and public key (Ed25519 signature
//! over the router-issued challenge). Which one runs is decided by the
//! credential message the peer sent; a user record may register either
//! or both.

use async_trait::async_trait;

use ed25519_dalek::{Signature, VerifyingKey};
use tracing::debug;

use crate::error::AuthError;
use crate::hash::verify_password_hash;
use crate::store::{User, UserStore};
use rondo_proto::SessionType;

/// Proof material presented by the peer during the credential check.
#[derive(Debug, Clone)]
pub enum CredentialProof {
    Password {
        /// SHA-256 hex of the password.
        password_hash: String,
    },
    Signature {
        /// Key the peer claims; must equal the registered key.
        public_key: [u8; 32],
        /// Ed25519 signature over the challenge.
        signature: Vec<u8>,
        /// The challenge this router issued in its hello ack.
        challenge: [u8; 32],
    },
}

/// A pluggable credential verifier.
///
/// Implementations must be `Send + Sync`; they run concurrently across
/// connections. Verifiers see the user record only after the store lookup
/// succeeded, so they check proof material, not existence or enablement.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, user: &User, proof: &CredentialProof) -> Result<(), AuthError>;
}

/// Password-hash comparison verifier.
pub struct PasswordVerifier;

#[async_trait]
impl CredentialVerifier for PasswordVerifier {
    async fn verify(&self, user: &User, proof: &CredentialProof) -> Result<(), AuthError> {
        let presented = match proof {
            CredentialProof::Password { password_hash } => password_hash,
            _ => return Err(AuthError::CredentialNotRegistered),
        };
        let stored = user
            .password_hash
            .as_deref()
            .ok_or(AuthError::CredentialNotRegistered)?;
        if verify_password_hash(presented, stored) {
            Ok(())
        } else {
            Err(AuthError::WrongPassword)
        }
    }
}

/// Ed25519 challenge-signature verifier.
pub struct KeyVerifier;

#[async_trait]
impl CredentialVerifier for KeyVerifier {
    async fn verify(&self, user: &User, proof: &CredentialProof) -> Result<(), AuthError> {
        let (public_key, signature, challenge) = match proof {
            CredentialProof::Signature {
                public_key,
                signature,
                challenge,
            } => (public_key, signature, challenge),
            _ => return Err(AuthError::CredentialNotRegistered),
        };
        let registered = user.public_key.ok_or(AuthError::CredentialNotRegistered)?;
        if registered != *public_key {
            return Err(AuthError::BadSignature);
        }
        let key = VerifyingKey::from_bytes(&registered).map_err(|_| AuthError::BadSignature)?;
        let signature =
            Signature::from_slice(signature).map_err(|_| AuthError::BadSignature)?;
        key.verify_strict(challenge, &signature)
            .map_err(|_| AuthError::BadSignature)
    }
}

/// Run the full credential check for one peer.
///
/// Looks the user up, dispatches to the matching verifier, then checks
/// the requested session type against the user's allowed set. Internal
/// rejection reasons stay in the returned error; callers send only
/// [`AuthError::external_code`] to the wire.
pub async fn verify_credential(
    store: &UserStore,
    username: &str,
    proof: &CredentialProof,
    requested: Option<SessionType>,
) -> Result<User, AuthError> {
    let user = store.find_by_name(username).ok_or(AuthError::UnknownUser)?;

    if !user.enabled {
        return Err(AuthError::Disabled);
    }

    match proof {
        CredentialProof::Password { .. } => PasswordVerifier.verify(&user, proof).await?,
        CredentialProof::Signature { .. } => KeyVerifier.verify(&user, proof).await?,
    }

    // Hosts and proxies authenticate without a session type; only clients
    // name the activity they want up front.
    if let Some(requested) = requested {
        if !user.is_allowed(requested) {
            debug!(user = %user.name, session_type = %requested, "session type not allowed");
            return Err(AuthError::SessionTypeNotAllowed);
        }
    }

    Ok(user)
}
