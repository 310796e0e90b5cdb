//! 会话存储 - 业务能力层
//!
//! 只负责"把凭据落盘 / 读回 / 删除"，供下次启动时恢复会话

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::SessionStoreError;
use crate::models::Credential;

#[derive(Serialize, Deserialize)]
struct StoredCredential {
    credential: Credential,
    saved_at: DateTime<Utc>,
}

/// 会话存储服务
///
/// 职责：
/// - 凭据以 JSON 保存在单个文件里，unix 下权限为 0600
/// - 不认识会话和工作流
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 保存凭据，先写临时文件再改名
    pub async fn save(&self, credential: &Credential) -> Result<(), SessionStoreError> {
        let stored = StoredCredential {
            credential: credential.clone(),
            saved_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&stored).map_err(|e| self.corrupt(e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io(e))?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await.map_err(|e| self.io(e))?;
        restrict_permissions(&tmp).await.map_err(|e| self.io(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io(e))?;

        debug!("凭据已保存: {}", self.path.display());
        Ok(())
    }

    /// 读取凭据，文件不存在时返回 None
    pub async fn load(&self) -> Result<Option<Credential>, SessionStoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io(e)),
        };
        let stored: StoredCredential = serde_json::from_slice(&bytes).map_err(|e| self.corrupt(e))?;
        debug!("已读取 {} 保存的凭据", stored.saved_at.format("%Y-%m-%d %H:%M:%S"));
        Ok(Some(stored.credential))
    }

    /// 删除凭据，文件不存在也算成功
    pub async fn clear(&self) -> Result<(), SessionStoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io(e)),
        }
    }

    fn io(&self, source: std::io::Error) -> SessionStoreError {
        SessionStoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn corrupt(&self, source: serde_json::Error) -> SessionStoreError {
        SessionStoreError::Corrupt {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
