//! Object storage
//!
//! `Presigner` issues and checks HMAC-SHA256 signed URLs of the form
//! `{public_url}/{bucket}/{key}?method=..&expires=..&signature=..`.
//! The signature covers `"METHOD\nbucket/key\nexpires"`.
//!
//! `LocalObjectStore` is the bundled store behind `/storage/{*key}`; it
//! keeps one file per object under `storage.local_path`.

use crate::config::StorageConfig;
use crate::models::PresignedUrl;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use data_encoding::HEXLOWER_PERMISSIVE;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

type HmacSha256 = Hmac<Sha256>;

pub struct Presigner {
    secret: Vec<u8>,
    bucket: String,
    public_url: String,
    ttl: Duration,
}

impl Presigner {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            secret: config.signing_secret.as_bytes().to_vec(),
            bucket: config.bucket.clone(),
            public_url: config.public_url.trim_end_matches('/').to_string(),
            ttl: Duration::seconds(config.url_ttl_seconds),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn mac(&self, method: &str, key: &str, expires: i64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| anyhow!("Invalid signing key: {}", e))?;
        mac.update(method.to_ascii_uppercase().as_bytes());
        mac.update(b"\n");
        mac.update(self.bucket.as_bytes());
        mac.update(b"/");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Hex signature for `method` on `key` valid until unix time `expires`
    pub fn sign(&self, method: &str, key: &str, expires: i64) -> Result<String> {
        let mac = self.mac(method, key, expires)?;
        Ok(HEXLOWER_PERMISSIVE.encode(&mac.finalize().into_bytes()))
    }

    pub fn presign(&self, method: &str, key: &str, now: DateTime<Utc>) -> Result<PresignedUrl> {
        let method = method.to_ascii_uppercase();
        let expires_at = now + self.ttl;
        let expires = expires_at.timestamp();
        let signature = self.sign(&method, key, expires)?;

        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let url = format!(
            "{}/{}/{}?method={}&expires={}&signature={}",
            self.public_url, self.bucket, encoded_key, method, expires, signature
        );

        Ok(PresignedUrl {
            url,
            method,
            expires_at: Utc
                .timestamp_opt(expires, 0)
                .single()
                .unwrap_or(expires_at),
        })
    }

    /// Check a presented signature. Expired links and any mismatch fail;
    /// the comparison runs in constant time.
    pub fn verify(
        &self,
        method: &str,
        key: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if expires < now.timestamp() {
            return false;
        }
        let Ok(provided) = HEXLOWER_PERMISSIVE.decode(signature.as_bytes()) else {
            return false;
        };
        match self.mac(method, key, expires) {
            Ok(mac) => mac.verify_slice(&provided).is_ok(),
            Err(_) => false,
        }
    }

    /// Split a request path `bucket/key` into the key, if it names our bucket
    pub fn key_from_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        path.strip_prefix(self.bucket.as_str())?
            .strip_prefix('/')
            .filter(|key| !key.is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a key to a path under the root. Only plain relative segments
    /// are allowed.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.contains('\\') || key.contains('\0') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let relative = Path::new(key);
        let plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !plain || key.split('/').any(|segment| segment == "..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Write an object, returning its size
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        tracing::debug!(key = %key, bytes = data.len(), "Object stored");
        Ok(data.len() as u64)
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Size of a stored object, `None` if absent
    pub async fn size(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove an object; missing objects are not an error
    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
