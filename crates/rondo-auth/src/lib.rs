//! User store and credential verification for the rondo router.
//!
//! # Example
//!
//! ```
//! use rondo_auth::{sha256_hex, NewUser, UserStore};
//! use rondo_proto::SessionType;
//!
//! let store = UserStore::new();
//! store
//!     .add_user(NewUser {
//!         name: "alice".into(),
//!         password_hash: Some(sha256_hex("secret")),
//!         public_key: None,
//!         allowed_session_types: [SessionType::DesktopView].into(),
//!         enabled: true,
//!     })
//!     .unwrap();
//!
//! let user = store.find_by_name("alice").unwrap();
//! assert!(user.enabled);
//! ```

mod error;
mod hash;
mod store;
mod throttle;
mod verify;

pub use error::{AuthError, StoreError};
pub use hash::{sha256_hex, sha256_hex_bytes, verify_password_hash};
pub use store::{NewUser, User, UserId, UserStore};
pub use throttle::FailureThrottle;
pub use verify::{
    verify_credential, CredentialProof, CredentialVerifier, KeyVerifier, PasswordVerifier,
};
