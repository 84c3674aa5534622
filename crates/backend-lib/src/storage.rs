// ============================
// passport-backend-lib/src/storage.rs
// ============================
//! Storage abstraction for users and passports, with in-memory and
//! flat-file implementations.
//!
//! Both implementations enforce the two uniqueness constraints the auth
//! module relies on: `username` across users and `(provider, providerId)`
//! across passports. A violated constraint surfaces as
//! [`AppError::UniquenessConflict`].
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{fs as tokio_fs, sync::Mutex};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{NewPassport, Passport, User};

/// Shared handle to the storage collaborator
pub type SharedStorage = Arc<dyn Storage>;

/// How to find a user
#[derive(Debug, Clone, Copy)]
pub enum UserLookup<'a> {
    Id(&'a str),
    Username(&'a str),
    Email(&'a str),
    Phone(&'a str),
}

impl UserLookup<'_> {
    fn matches(&self, user: &User) -> bool {
        match self {
            UserLookup::Id(id) => user.id == *id,
            UserLookup::Username(username) => user.username == *username,
            UserLookup::Email(email) => user.email.as_deref() == Some(*email),
            UserLookup::Phone(phone) => user.phone.as_deref() == Some(*phone),
        }
    }
}

/// Trait for storage backends
#[async_trait]
pub trait Storage: Send + Sync {
    /// Find a single user
    async fn find_user(&self, lookup: UserLookup<'_>) -> Result<Option<User>, AppError>;

    /// Insert a new user; fails on a taken username
    async fn insert_user(&self, user: &User) -> Result<(), AppError>;

    /// Replace an existing user
    async fn update_user(&self, user: &User) -> Result<(), AppError>;

    /// Remove a user; missing ids are ignored
    async fn delete_user(&self, id: &str) -> Result<(), AppError>;

    /// Set `visitedAt` on a user
    async fn touch_user(&self, id: &str, visited_at: DateTime<Utc>) -> Result<(), AppError>;

    /// Find a passport by id
    async fn find_passport(&self, id: &str) -> Result<Option<Passport>, AppError>;

    /// Find a passport by its external identity
    async fn find_passport_by_provider(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<Passport>, AppError>;

    /// All passports bound to a user
    async fn find_passports_by_user(&self, user_id: &str) -> Result<Vec<Passport>, AppError>;

    /// Insert a new passport; fails on a taken `(provider, providerId)`
    async fn insert_passport(&self, passport: &Passport) -> Result<(), AppError>;

    /// Apply freshly fetched provider data to the stored passport. Only the
    /// fetched fields change; `userId` is left as stored.
    async fn refresh_passport(&self, id: &str, data: NewPassport) -> Result<Passport, AppError>;

    /// Set `userId` to `user_id` only if it currently equals `expected`.
    /// Fails with `UniquenessConflict` otherwise.
    async fn bind_passport(
        &self,
        id: &str,
        expected: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Passport, AppError>;
}

fn username_taken(username: &str) -> AppError {
    AppError::UniquenessConflict(format!("username {username}"))
}

fn identity_taken(passport: &Passport) -> AppError {
    AppError::UniquenessConflict(format!(
        "passport {}:{}",
        passport.provider, passport.provider_id
    ))
}

fn passport_missing(id: &str) -> AppError {
    AppError::NotFound(format!("passport {id}"))
}

/// Compare-and-set on `userId`
fn rebind(
    passport: &mut Passport,
    expected: Option<&str>,
    user_id: Option<&str>,
) -> Result<(), AppError> {
    if passport.user_id.as_deref() != expected {
        return Err(AppError::UniquenessConflict(format!(
            "passport {} is bound elsewhere",
            passport.id
        )));
    }
    passport.user_id = user_id.map(str::to_string);
    passport.updated_at = Utc::now();
    Ok(())
}

/// In-memory storage, the default for tests and single-process hosts
#[derive(Clone, Default)]
pub struct MemoryStorage {
    users: Arc<DashMap<String, User>>,
    passports: Arc<DashMap<String, Passport>>,
    write_lock: Arc<Mutex<()>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored passports
    pub fn passport_count(&self) -> usize {
        self.passports.len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn find_user(&self, lookup: UserLookup<'_>) -> Result<Option<User>, AppError> {
        if let UserLookup::Id(id) = lookup {
            return Ok(self.users.get(id).map(|u| u.value().clone()));
        }
        Ok(self
            .users
            .iter()
            .find(|entry| lookup.matches(entry.value()))
            .map(|entry| entry.value().clone()))
    }

    async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        if self.users.iter().any(|u| u.username == user.username) {
            return Err(username_taken(&user.username));
        }
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        if !self.users.contains_key(&user.id) {
            return Err(AppError::NotFound(format!("user {}", user.id)));
        }
        if self
            .users
            .iter()
            .any(|u| u.id != user.id && u.username == user.username)
        {
            return Err(username_taken(&user.username));
        }
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        self.users.remove(id);
        Ok(())
    }

    async fn touch_user(&self, id: &str, visited_at: DateTime<Utc>) -> Result<(), AppError> {
        match self.users.get_mut(id) {
            Some(mut user) => {
                user.visited_at = Some(visited_at);
                Ok(())
            },
            None => Err(AppError::NotFound(format!("user {id}"))),
        }
    }

    async fn find_passport(&self, id: &str) -> Result<Option<Passport>, AppError> {
        Ok(self.passports.get(id).map(|p| p.value().clone()))
    }

    async fn find_passport_by_provider(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<Passport>, AppError> {
        Ok(self
            .passports
            .iter()
            .find(|p| p.provider == provider && p.provider_id == provider_id)
            .map(|p| p.value().clone()))
    }

    async fn find_passports_by_user(&self, user_id: &str) -> Result<Vec<Passport>, AppError> {
        let mut passports: Vec<Passport> = self
            .passports
            .iter()
            .filter(|p| p.user_id.as_deref() == Some(user_id))
            .map(|p| p.value().clone())
            .collect();
        passports.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(passports)
    }

    async fn insert_passport(&self, passport: &Passport) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        if self
            .passports
            .iter()
            .any(|p| p.provider == passport.provider && p.provider_id == passport.provider_id)
        {
            return Err(identity_taken(passport));
        }
        self.passports.insert(passport.id.clone(), passport.clone());
        Ok(())
    }

    async fn refresh_passport(&self, id: &str, data: NewPassport) -> Result<Passport, AppError> {
        let _guard = self.write_lock.lock().await;
        let mut passport = self.passports.get_mut(id).ok_or_else(|| passport_missing(id))?;
        passport.refresh(data);
        Ok(passport.clone())
    }

    async fn bind_passport(
        &self,
        id: &str,
        expected: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Passport, AppError> {
        let _guard = self.write_lock.lock().await;
        let mut passport = self.passports.get_mut(id).ok_or_else(|| passport_missing(id))?;
        rebind(&mut passport, expected, user_id)?;
        Ok(passport.clone())
    }
}

/// Flat-file implementation of the Storage trait.
///
/// One pretty-printed JSON document per record under `users/` and
/// `passports/`. Lookups other than by id scan the directory.
#[derive(Clone)]
pub struct FlatFileStorage {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FlatFileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("users"))?;
        std::fs::create_dir_all(root.join("passports"))?;
        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Path of a record. Ids are UUIDs; anything else never maps to a file.
    fn record_path(&self, collection: &str, id: &str) -> Option<PathBuf> {
        Uuid::parse_str(id).ok()?;
        Some(self.root.join(collection).join(format!("{id}.json")))
    }

    async fn read_record<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, AppError> {
        let Some(path) = self.record_path(collection, id) else {
            return Ok(None);
        };
        if !tokio_fs::try_exists(&path).await? {
            return Ok(None);
        }
        let content = tokio_fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn read_all<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, AppError> {
        let mut records = Vec::new();
        let mut entries = tokio_fs::read_dir(self.root.join(collection)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio_fs::read_to_string(&path).await?;
            records.push(serde_json::from_str(&content)?);
        }
        Ok(records)
    }

    /// Write through a temp file so readers never see a partial document
    async fn write_record<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        record: &T,
    ) -> Result<(), AppError> {
        let path = self
            .record_path(collection, id)
            .ok_or_else(|| AppError::Internal(format!("invalid record id {id}")))?;
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        tokio_fs::write(&tmp, json).await?;
        tokio_fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, AppError> {
        match self.record_path(collection, id) {
            Some(path) => Ok(tokio_fs::try_exists(path).await?),
            None => Ok(false),
        }
    }
}

#[async_trait]
impl Storage for FlatFileStorage {
    async fn find_user(&self, lookup: UserLookup<'_>) -> Result<Option<User>, AppError> {
        if let UserLookup::Id(id) = lookup {
            return self.read_record("users", id).await;
        }
        let users: Vec<User> = self.read_all("users").await?;
        Ok(users.into_iter().find(|u| lookup.matches(u)))
    }

    async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let users: Vec<User> = self.read_all("users").await?;
        if users.iter().any(|u| u.username == user.username) {
            return Err(username_taken(&user.username));
        }
        self.write_record("users", &user.id, user).await
    }

    async fn update_user(&self, user: &User) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        if !self.exists("users", &user.id).await? {
            return Err(AppError::NotFound(format!("user {}", user.id)));
        }
        let users: Vec<User> = self.read_all("users").await?;
        if users
            .iter()
            .any(|u| u.id != user.id && u.username == user.username)
        {
            return Err(username_taken(&user.username));
        }
        self.write_record("users", &user.id, user).await
    }

    async fn delete_user(&self, id: &str) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        if let Some(path) = self.record_path("users", id) {
            if tokio_fs::try_exists(&path).await? {
                tokio_fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    async fn touch_user(&self, id: &str, visited_at: DateTime<Utc>) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let mut user: User = self
            .read_record("users", id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {id}")))?;
        user.visited_at = Some(visited_at);
        self.write_record("users", id, &user).await
    }

    async fn find_passport(&self, id: &str) -> Result<Option<Passport>, AppError> {
        self.read_record("passports", id).await
    }

    async fn find_passport_by_provider(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<Passport>, AppError> {
        let passports: Vec<Passport> = self.read_all("passports").await?;
        Ok(passports
            .into_iter()
            .find(|p| p.provider == provider && p.provider_id == provider_id))
    }

    async fn find_passports_by_user(&self, user_id: &str) -> Result<Vec<Passport>, AppError> {
        let passports: Vec<Passport> = self.read_all("passports").await?;
        let mut bound: Vec<Passport> = passports
            .into_iter()
            .filter(|p| p.user_id.as_deref() == Some(user_id))
            .collect();
        bound.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(bound)
    }

    async fn insert_passport(&self, passport: &Passport) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let passports: Vec<Passport> = self.read_all("passports").await?;
        if passports
            .iter()
            .any(|p| p.provider == passport.provider && p.provider_id == passport.provider_id)
        {
            return Err(identity_taken(passport));
        }
        self.write_record("passports", &passport.id, passport).await
    }

    async fn refresh_passport(&self, id: &str, data: NewPassport) -> Result<Passport, AppError> {
        let _guard = self.write_lock.lock().await;
        let mut passport: Passport = self
            .read_record("passports", id)
            .await?
            .ok_or_else(|| passport_missing(id))?;
        passport.refresh(data);
        self.write_record("passports", id, &passport).await?;
        Ok(passport)
    }

    async fn bind_passport(
        &self,
        id: &str,
        expected: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Passport, AppError> {
        let _guard = self.write_lock.lock().await;
        let mut passport: Passport = self
            .read_record("passports", id)
            .await?
            .ok_or_else(|| passport_missing(id))?;
        rebind(&mut passport, expected, user_id)?;
        self.write_record("passports", id, &passport).await?;
        Ok(passport)
    }
}
