//! Evidence file storage and signed download URLs
//!
//! Files live at `{root}/{user_id}/{evidence_id}/{sanitized_name}`. Links
//! handed to the transcription provider are
//! `{base}/storage/{path}?expires={unix}&signature={hex}` with
//! `signature = sha256(secret ":" path ":" expires)`.

use reclaim_common::api::{constant_time_eq, sign_payload};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Link expired")]
    Expired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid path")]
    InvalidPath,
}

#[derive(Clone)]
pub struct StorageService {
    root: PathBuf,
    secret: String,
    base_url: String,
    url_ttl_secs: u64,
}

impl StorageService {
    pub fn new(root: PathBuf, secret: String, base_url: &str, url_ttl_secs: u64) -> Self {
        Self {
            root,
            secret,
            base_url: base_url.trim_end_matches('/').to_string(),
            url_ttl_secs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative storage path for a new evidence file
    pub fn object_path(user_id: Uuid, evidence_id: Uuid, file_name: &str) -> String {
        format!("{}/{}/{}", user_id, evidence_id, sanitize_file_name(file_name))
    }

    /// Absolute location of a relative storage path
    ///
    /// Rejects absolute paths and any `..` component.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, SignatureError> {
        let relative = Path::new(relative);
        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(SignatureError::InvalidPath);
        }
        Ok(self.root.join(relative))
    }

    pub async fn write(&self, relative: &str, bytes: &[u8]) -> std::io::Result<()> {
        let path = self
            .resolve(relative)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await
    }

    pub async fn read(&self, relative: &str) -> std::io::Result<Vec<u8>> {
        let path = self
            .resolve(relative)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        tokio::fs::read(path).await
    }

    /// Remove a stored file; a file that is already gone is not an error
    pub async fn delete(&self, relative: &str) -> std::io::Result<()> {
        let path = self
            .resolve(relative)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    pub fn signature(&self, relative: &str, expires: i64) -> String {
        sign_payload(&self.secret, &format!("{}:{}", relative, expires))
    }

    /// Download URL valid for the configured TTL from `now_unix`
    pub fn signed_url(&self, relative: &str, now_unix: i64) -> String {
        let expires = now_unix + self.url_ttl_secs as i64;
        format!(
            "{}/storage/{}?expires={}&signature={}",
            self.base_url,
            relative,
            expires,
            self.signature(relative, expires)
        )
    }

    pub fn verify(
        &self,
        relative: &str,
        expires: i64,
        signature: &str,
        now_unix: i64,
    ) -> Result<(), SignatureError> {
        if !constant_time_eq(&self.signature(relative, expires), signature) {
            return Err(SignatureError::InvalidSignature);
        }
        if now_unix > expires {
            return Err(SignatureError::Expired);
        }
        Ok(())
    }
}

/// Keep ASCII letters, digits, `.`, `-` and `_`; everything else becomes `_`
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.chars().take(128).collect()
    }
}
