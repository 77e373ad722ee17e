//! Credential store backed by a CSV file

use argon2::password_hash::{rand_core, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

/// Credential store errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Please fill all fields")]
    MissingField,

    #[error("Username may only contain letters, digits, '.', '_' and '-'")]
    InvalidUsername,

    #[error("Password hashing failed: {0}")]
    Hash(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    username: String,
    password: String,
}

/// Trim and case-fold a username
pub fn normalize_username(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn valid_username(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Usernames and password hashes, loaded from and saved to `users.csv`
pub struct CredentialStore {
    path: PathBuf,
    users: DashMap<String, String>,
    write_lock: Mutex<()>,
    hasher: Argon2<'static>,
}

impl CredentialStore {
    /// Load the store from `path`; a missing or unreadable file starts empty
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let users = DashMap::new();
        for record in load_users(&path).await {
            let username = normalize_username(&record.username);
            if !username.is_empty() {
                users.insert(username, record.password.trim().to_string());
            }
        }
        Self {
            path,
            users,
            write_lock: Mutex::new(()),
            hasher: Argon2::default(),
        }
    }

    /// Number of registered users
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Register a user. Returns `Ok(false)` if the name is taken.
    pub async fn create(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        let username = normalize_username(username);
        let password = password.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingField);
        }
        if !valid_username(&username) {
            return Err(AuthError::InvalidUsername);
        }

        let _guard = self.write_lock.lock().await;
        if self.users.contains_key(&username) {
            return Ok(false);
        }

        let hasher = self.hasher.clone();
        let secret = password.to_string();
        let hash = tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut rand_core::OsRng);
            hasher
                .hash_password(secret.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| AuthError::Hash(e.to_string()))
        })
        .await
        .map_err(|e| AuthError::Hash(e.to_string()))??;

        self.users.insert(username.clone(), hash);
        if let Err(e) = self.save().await {
            self.users.remove(&username);
            return Err(e);
        }

        tracing::info!("Created account for {}", username);
        Ok(true)
    }

    /// Whether the username/password pair matches a registered user.
    ///
    /// Verification runs on the blocking pool.
    pub async fn validate(&self, username: &str, password: &str) -> bool {
        let username = normalize_username(username);
        let password = password.trim().to_string();
        let Some(stored) = self.users.get(&username).map(|r| r.value().clone()) else {
            return false;
        };

        let hasher = self.hasher.clone();
        let verified = tokio::task::spawn_blocking(move || match PasswordHash::new(&stored) {
            Ok(hash) => hasher.verify_password(password.as_bytes(), &hash).is_ok(),
            // Rows written before hashing was introduced hold the password itself
            Err(_) => stored == password,
        })
        .await;

        match verified {
            Ok(ok) => ok,
            Err(e) => {
                tracing::error!("Password verification task failed: {}", e);
                false
            }
        }
    }

    async fn save(&self) -> Result<(), AuthError> {
        let mut records: Vec<UserRecord> = self
            .users
            .iter()
            .map(|r| UserRecord {
                username: r.key().clone(),
                password: r.value().clone(),
            })
            .collect();
        records.sort_by(|a, b| a.username.cmp(&b.username));

        let mut writer = csv::Writer::from_writer(Vec::new());
        for record in &records {
            writer.serialize(record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| AuthError::Io(e.into_error()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write atomically: write to temp file, then rename
        let tmp_path = self.path.with_extension("csv.tmp");
        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, &self.path).await?;

        tracing::debug!("Saved {} users to {:?}", records.len(), self.path);
        Ok(())
    }
}

async fn load_users(path: &Path) -> Vec<UserRecord> {
    match fs::read(path).await {
        Ok(bytes) => {
            let mut reader = csv::Reader::from_reader(bytes.as_slice());
            let records: Vec<UserRecord> = reader
                .deserialize()
                .filter_map(|row| match row {
                    Ok(record) => Some(record),
                    Err(e) => {
                        tracing::warn!("Skipping malformed user row in {:?}: {}", path, e);
                        None
                    }
                })
                .collect();
            tracing::info!("Loaded {} users from {:?}", records.len(), path);
            records
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No users file found at {:?}, starting fresh", path);
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("Failed to read users file {:?}: {}", path, e);
            Vec::new()
        }
    }
}
