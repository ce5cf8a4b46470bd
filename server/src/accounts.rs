//! Account directory and credential hashing.
//!
//! Usernames are case-folded by the directory, so lookups and the uniqueness
//! check of registration agree on what "the same name" means.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("user already exists")]
    AlreadyExists,
    #[error("account storage error: {0}")]
    Storage(String),
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// Persistent user store.
pub trait AccountDirectory: Send + Sync {
    /// Stored password hash for `name`, if the user exists.
    fn get_user_by_name(&self, name: &str) -> Result<Option<String>, AccountError>;

    fn create_user(&self, name: &str, password_hash: &str) -> Result<(), AccountError>;
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

/// Why a requested username cannot be registered.
pub fn validate_username(username: &str) -> Result<(), String> {
    let len = username.chars().count();
    if len < 3 {
        return Err("username must be at least 3 characters long".to_string());
    }
    if len > 20 {
        return Err("username must be at most 20 characters long".to_string());
    }
    if username != username.trim() {
        return Err("leading or trailing whitespace".to_string());
    }
    Ok(())
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, AccountError> {
    Ok(bcrypt::hash(password, cost)?)
}

/// Any failure (including a malformed stored hash) counts as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// In-process directory, lost on restart.
#[derive(Default)]
pub struct MemoryAccounts {
    users: Mutex<HashMap<String, String>>,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountDirectory for MemoryAccounts {
    fn get_user_by_name(&self, name: &str) -> Result<Option<String>, AccountError> {
        Ok(self.users.lock().get(&fold(name)).cloned())
    }

    fn create_user(&self, name: &str, password_hash: &str) -> Result<(), AccountError> {
        let mut users = self.users.lock();
        let key = fold(name);
        if users.contains_key(&key) {
            return Err(AccountError::AlreadyExists);
        }
        users.insert(key, password_hash.to_string());
        Ok(())
    }
}

/// Directory persisted as a JSON object `{ name: hash }`.
///
/// The whole file is rewritten through a temporary sibling and renamed into
/// place on every new user.
pub struct FileAccounts {
    path: PathBuf,
    users: Mutex<HashMap<String, String>>,
}

impl FileAccounts {
    /// Load the directory, creating an empty file when none exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AccountError> {
        let path = path.as_ref().to_path_buf();
        let users = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| AccountError::Storage(format!("reading {}: {}", path.display(), e)))?;
            serde_json::from_str::<HashMap<String, String>>(&text)
                .map_err(|e| AccountError::Storage(format!("parsing {}: {}", path.display(), e)))?
        } else {
            HashMap::new()
        };

        let accounts = Self {
            path,
            users: Mutex::new(users),
        };
        accounts.persist(&accounts.users.lock())?;
        Ok(accounts)
    }

    fn persist(&self, users: &HashMap<String, String>) -> Result<(), AccountError> {
        let json = serde_json::to_string_pretty(users)
            .map_err(|e| AccountError::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| AccountError::Storage(format!("writing {}: {}", self.path.display(), e)))
    }
}

impl AccountDirectory for FileAccounts {
    fn get_user_by_name(&self, name: &str) -> Result<Option<String>, AccountError> {
        Ok(self.users.lock().get(&fold(name)).cloned())
    }

    fn create_user(&self, name: &str, password_hash: &str) -> Result<(), AccountError> {
        let mut users = self.users.lock();
        let key = fold(name);
        if users.contains_key(&key) {
            return Err(AccountError::AlreadyExists);
        }
        users.insert(key.clone(), password_hash.to_string());
        if let Err(e) = self.persist(&users) {
            users.remove(&key);
            return Err(e);
        }
        Ok(())
    }
}
