//! 连接管理 - 业务能力层
//!
//! 只负责"用凭据换会话"，以及会话的恢复和注销。认证失败不重试。

use std::sync::Arc;
use tracing::{info, warn};

use crate::clients::LmsProvider;
use crate::error::{ConnectionError, SessionStoreError};
use crate::models::{Credential, Session};
use crate::services::SessionStore;

/// 连接管理服务
pub struct ConnectionManager {
    provider: Arc<dyn LmsProvider>,
    store: SessionStore,
}

impl ConnectionManager {
    pub fn new(provider: Arc<dyn LmsProvider>, store: SessionStore) -> Self {
        Self { provider, store }
    }

    /// 连接 LMS
    ///
    /// 成功后凭据写入会话存储；存储失败只影响下次恢复，不影响本次会话。
    pub async fn connect(&self, credential: &Credential) -> Result<Session, ConnectionError> {
        credential.validate()?;
        if credential.provider != self.provider.kind() {
            return Err(ConnectionError::InvalidCredential {
                reason: format!(
                    "凭据类型为 {}，当前配置的 LMS 为 {}",
                    credential.provider,
                    self.provider.kind()
                ),
            });
        }

        info!("🔌 正在连接 {} ({})", credential.provider, credential.endpoint);
        let session = self.provider.connect(credential).await?;

        if let Err(e) = self.store.save(credential).await {
            warn!("⚠️ 凭据保存失败，下次启动需要重新连接: {}", e);
        }

        log_connected(&session);
        Ok(session)
    }

    /// 用已保存的凭据重新连接，没有保存过时返回 None
    pub async fn resume(&self) -> Result<Option<Session>, ConnectionError> {
        let credential = match self.store.load().await {
            Ok(Some(credential)) => credential,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!("⚠️ 已保存的凭据不可用，将被删除: {}", e);
                if let Err(e) = self.store.clear().await {
                    warn!("⚠️ 删除凭据文件失败: {}", e);
                }
                return Ok(None);
            }
        };

        info!("♻️ 使用已保存的凭据恢复会话");
        match self.connect(&credential).await {
            Ok(session) => Ok(Some(session)),
            Err(err @ ConnectionError::InvalidCredential { .. }) => {
                // 凭据已失效，不再保留
                if let Err(e) = self.store.clear().await {
                    warn!("⚠️ 删除凭据文件失败: {}", e);
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// 注销：删除已保存的凭据
    pub async fn logout(&self) -> Result<(), SessionStoreError> {
        self.store.clear().await?;
        info!("👋 已注销，凭据已删除");
        Ok(())
    }
}

// ========== 日志辅助函数 ==========

fn log_connected(session: &Session) {
    match &session.user_name {
        Some(name) => info!("✓ 已连接 {}，用户: {}", session.provider, name),
        None => info!("✓ 已连接 {}", session.provider),
    }
}
