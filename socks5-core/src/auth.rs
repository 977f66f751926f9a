//! User/auth store: an add-only, builder-constructed map
//! from username to credentials, published to workers as an immutable,
//! reference-counted snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ProxyError, Result};

/// `{name, password, mark?}`. Names are unique within a [`UserStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub password: String,
    /// Per-user firewall mark, overriding the global `mark` config when set.
    pub mark: Option<u32>,
}

/// Map name -> User. Immutable once built; cheaply `Arc`-shared across
/// worker threads and sessions.
#[derive(Debug, Default)]
pub struct UserStore {
    users: HashMap<String, Arc<User>>,
}

impl UserStore {
    pub fn empty() -> Arc<Self> {
        Arc::new(UserStore {
            users: HashMap::new(),
        })
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<User>> {
        self.users.get(name)
    }

    /// Validate a username/password pair, returning the matched user.
    pub fn verify(&self, name: &str, password: &str) -> Option<Arc<User>> {
        self.users
            .get(name)
            .filter(|u| u.password == password)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Add-only builder; `add` rejects duplicate names.
#[derive(Debug, Default)]
pub struct UserStoreBuilder {
    users: HashMap<String, Arc<User>>,
}

impl UserStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, user: User) -> Result<()> {
        if self.users.contains_key(&user.name) {
            return Err(ProxyError::DuplicateUser(user.name));
        }
        self.users.insert(user.name.clone(), Arc::new(user));
        Ok(())
    }

    pub fn build(self) -> UserStore {
        UserStore { users: self.users }
    }
}

/// Parse the line-oriented auth file format: `name SP pass [SP hex-mark] NL`.
/// Blank lines and lines starting with `#` are skipped.
pub fn parse_auth_file(content: &str) -> Result<UserStore> {
    let mut builder = UserStoreBuilder::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| ProxyError::config(format!("malformed auth line: {line:?}")))?;
        let password = parts
            .next()
            .ok_or_else(|| ProxyError::config(format!("malformed auth line: {line:?}")))?;
        let mark = match parts.next() {
            Some(hex) => Some(
                u32::from_str_radix(hex.trim_start_matches("0x"), 16)
                    .map_err(|_| ProxyError::config(format!("invalid hex mark: {hex:?}")))?,
            ),
            None => None,
        };
        builder.add(User {
            name: name.to_string(),
            password: password.to_string(),
            mark,
        })?;
    }
    Ok(builder.build())
}

/// Build a store from the config's inline `{username, password}` pair.
pub fn single_user_store(username: &str, password: &str, mark: Option<u32>) -> Result<UserStore> {
    let mut builder = UserStoreBuilder::new();
    builder.add(User {
        name: username.to_string(),
        password: password.to_string(),
        mark,
    })?;
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_duplicate_names() {
        let mut b = UserStoreBuilder::new();
        b.add(User {
            name: "alice".into(),
            password: "p1".into(),
            mark: None,
        })
        .unwrap();
        let err = b
            .add(User {
                name: "alice".into(),
                password: "p2".into(),
                mark: None,
            })
            .unwrap_err();
        assert!(matches!(err, ProxyError::DuplicateUser(_)));
    }

    #[test]
    fn verify_checks_password() {
        let mut b = UserStoreBuilder::new();
        b.add(User {
            name: "user".into(),
            password: "pass".into(),
            mark: None,
        })
        .unwrap();
        let store = b.build();
        assert!(store.verify("user", "pass").is_some());
        assert!(store.verify("user", "wrong").is_none());
        assert!(store.verify("nobody", "pass").is_none());
    }

    #[test]
    fn parse_auth_file_skips_blank_and_comment_lines() {
        let content = "\n# comment\nalice secret\nbob hunter2 a1b2c3\n";
        let store = parse_auth_file(content).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.lookup("bob").unwrap().mark, Some(0xa1b2c3));
        assert!(store.lookup("alice").unwrap().mark.is_none());
    }

    #[test]
    fn parse_auth_file_rejects_malformed_line() {
        assert!(parse_auth_file("onlyname\n").is_err());
    }
}
