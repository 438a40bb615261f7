//! In-memory user store.
//!
//! The management collaborator creates and edits users; the handshake
//! path reads them. Suitable for the deployments this router targets; a
//! database-backed store would implement the same surface.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use rondo_proto::SessionType;

use crate::error::StoreError;

/// Store-assigned user id.
pub type UserId = u64;

/// A user record.
///
/// Either credential may be present; at least one must be. `enabled`
/// users must allow at least one session type.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// SHA-256 hex of the password, if password login is registered.
    pub password_hash: Option<String>,
    /// Ed25519 verifying key, if key login is registered.
    pub public_key: Option<[u8; 32]>,
    pub allowed_session_types: BTreeSet<SessionType>,
    pub enabled: bool,
}

impl User {
    pub fn is_allowed(&self, session_type: SessionType) -> bool {
        self.allowed_session_types.contains(&session_type)
    }
}

/// Fields for creating or replacing a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub password_hash: Option<String>,
    pub public_key: Option<[u8; 32]>,
    pub allowed_session_types: BTreeSet<SessionType>,
    pub enabled: bool,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn validate(user: &NewUser) -> Result<(), StoreError> {
    if !valid_name(&user.name) {
        return Err(StoreError::InvalidName);
    }
    if user.password_hash.is_none() && user.public_key.is_none() {
        return Err(StoreError::NoCredentials);
    }
    if user.enabled && user.allowed_session_types.is_empty() {
        return Err(StoreError::NoSessionTypes);
    }
    Ok(())
}

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    by_name: HashMap<String, UserId>,
    next_id: UserId,
}

/// Thread-safe user registry.
///
/// Explicitly constructed and owned by the router instance, never ambient
/// global state, so tests can run independent routers side by side.
pub struct UserStore {
    inner: RwLock<Inner>,
}

impl UserStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Add a user, returning its id.
    pub fn add_user(&self, user: NewUser) -> Result<UserId, StoreError> {
        validate(&user)?;
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&user.name) {
            return Err(StoreError::DuplicateName);
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.by_name.insert(user.name.clone(), id);
        inner.users.insert(
            id,
            User {
                id,
                name: user.name,
                password_hash: user.password_hash,
                public_key: user.public_key,
                allowed_session_types: user.allowed_session_types,
                enabled: user.enabled,
            },
        );
        Ok(id)
    }

    /// Replace an existing user's fields, keeping its id.
    pub fn update_user(&self, id: UserId, user: NewUser) -> Result<(), StoreError> {
        validate(&user)?;
        let mut inner = self.inner.write();
        match inner.by_name.get(&user.name) {
            Some(&other) if other != id => return Err(StoreError::DuplicateName),
            _ => {}
        }
        let old_name = match inner.users.get(&id) {
            Some(existing) => existing.name.clone(),
            None => return Err(StoreError::NotFound),
        };
        inner.by_name.remove(&old_name);
        inner.by_name.insert(user.name.clone(), id);
        inner.users.insert(
            id,
            User {
                id,
                name: user.name,
                password_hash: user.password_hash,
                public_key: user.public_key,
                allowed_session_types: user.allowed_session_types,
                enabled: user.enabled,
            },
        );
        Ok(())
    }

    pub fn remove_user(&self, id: UserId) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let user = inner.users.remove(&id).ok_or(StoreError::NotFound)?;
        inner.by_name.remove(&user.name);
        Ok(())
    }

    pub fn find_by_name(&self, name: &str) -> Option<User> {
        let inner = self.inner.read();
        let id = inner.by_name.get(name)?;
        inner.users.get(id).cloned()
    }

    pub fn get(&self, id: UserId) -> Option<User> {
        self.inner.read().users.get(&id).cloned()
    }

    /// All users, sorted by id for stable listings.
    pub fn list(&self) -> Vec<User> {
        let inner = self.inner.read();
        let mut users: Vec<User> = inner.users.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        users
    }

    pub fn len(&self) -> usize {
        self.inner.read().users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().users.is_empty()
    }
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256_hex;

    fn alice() -> NewUser {
        NewUser {
            name: "alice".into(),
            password_hash: Some(sha256_hex("secret")),
            public_key: None,
            allowed_session_types: [SessionType::DesktopView].into(),
            enabled: true,
        }
    }

    #[test]
    fn add_and_find() {
        let store = UserStore::new();
        let id = store.add_user(alice()).unwrap();
        let user = store.find_by_name("alice").unwrap();
        assert_eq!(user.id, id);
        assert!(user.is_allowed(SessionType::DesktopView));
        assert!(!user.is_allowed(SessionType::FileTransfer));
    }

    #[test]
    fn rejects_invalid_names() {
        let store = UserStore::new();
        for bad in ["", "with space", "semi;colon", "ütf"] {
            let mut user = alice();
            user.name = bad.into();
            assert_eq!(store.add_user(user), Err(StoreError::InvalidName));
        }
        // Full allowed character class.
        let mut user = alice();
        user.name = "User_01.backup-2".into();
        assert!(store.add_user(user).is_ok());
    }

    #[test]
    fn rejects_duplicate_name() {
        let store = UserStore::new();
        store.add_user(alice()).unwrap();
        assert_eq!(store.add_user(alice()), Err(StoreError::DuplicateName));
    }

    #[test]
    fn enabled_user_needs_a_session_type() {
        let store = UserStore::new();
        let mut user = alice();
        user.allowed_session_types.clear();
        assert_eq!(store.add_user(user.clone()), Err(StoreError::NoSessionTypes));

        // A disabled user may have none.
        user.enabled = false;
        assert!(store.add_user(user).is_ok());
    }

    #[test]
    fn needs_some_credential() {
        let store = UserStore::new();
        let mut user = alice();
        user.password_hash = None;
        assert_eq!(store.add_user(user), Err(StoreError::NoCredentials));
    }

    #[test]
    fn update_keeps_id_and_reindexes_name() {
        let store = UserStore::new();
        let id = store.add_user(alice()).unwrap();

        let mut renamed = alice();
        renamed.name = "alice2".into();
        store.update_user(id, renamed).unwrap();

        assert!(store.find_by_name("alice").is_none());
        assert_eq!(store.find_by_name("alice2").unwrap().id, id);
    }

    #[test]
    fn remove_user() {
        let store = UserStore::new();
        let id = store.add_user(alice()).unwrap();
        store.remove_user(id).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.remove_user(id), Err(StoreError::NotFound));
    }
}
