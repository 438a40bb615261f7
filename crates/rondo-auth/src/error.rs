//! Authentication and store error types.

use rondo_proto::ErrorCode;

/// Authentication failure.
///
/// The variants are internal: logs and metrics distinguish an unknown
/// user from a wrong password from a disabled account, but the wire sees
/// only [`AuthError::external_code`], which collapses credential failures
/// to a single generic code.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("unknown user")]
    UnknownUser,

    #[error("wrong password")]
    WrongPassword,

    #[error("bad signature")]
    BadSignature,

    #[error("user disabled")]
    Disabled,

    #[error("credential kind not registered for user")]
    CredentialNotRegistered,

    #[error("session type not allowed for the user")]
    SessionTypeNotAllowed,

    #[error("too many failures from source")]
    Throttled,
}

impl AuthError {
    /// The code sent to the peer. Which credential check failed is never
    /// revealed; only the session-type rejection is distinct, and it does
    /// not disclose which types are allowed.
    pub fn external_code(&self) -> ErrorCode {
        match self {
            AuthError::SessionTypeNotAllowed => ErrorCode::SessionTypeNotAllowed,
            _ => ErrorCode::AccessDenied,
        }
    }

    /// Stable label for internal logging and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::UnknownUser => "unknown_user",
            AuthError::WrongPassword => "wrong_password",
            AuthError::BadSignature => "bad_signature",
            AuthError::Disabled => "disabled",
            AuthError::CredentialNotRegistered => "credential_not_registered",
            AuthError::SessionTypeNotAllowed => "session_type_not_allowed",
            AuthError::Throttled => "throttled",
        }
    }
}

/// User store mutation failure. Surfaced to the management collaborator.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("user name is empty or contains forbidden characters")]
    InvalidName,

    #[error("user name already taken")]
    DuplicateName,

    #[error("enabled user must allow at least one session type")]
    NoSessionTypes,

    #[error("user must carry a password hash or a public key")]
    NoCredentials,

    #[error("no such user")]
    NotFound,
}
