//! 密钥粘着性
//!
//! 记住上一次成功的密钥，下一批请求先试它。

use crate::storage::{get_or_default, KeyValueStore, LAST_SUCCESSFUL_KEY_ID};
use crate::types::Credential;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct StickinessTracker {
    store: Arc<dyn KeyValueStore>,
}

impl StickinessTracker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// 上一次成功的密钥 id
    pub async fn last_successful(&self) -> Option<String> {
        match get_or_default::<Option<String>>(self.store.as_ref(), LAST_SUCCESSFUL_KEY_ID, None).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "failed to read stickiness pointer");
                None
            }
        }
    }

    /// 把上一次成功的密钥移到第一位，其余保持原有相对顺序
    pub async fn reorder(&self, mut credentials: Vec<Credential>) -> Vec<Credential> {
        if credentials.len() <= 1 {
            return credentials;
        }

        let Some(last_id) = self.last_successful().await else {
            return credentials;
        };

        if let Some(index) = credentials.iter().position(|c| c.id == last_id) {
            if index > 0 {
                let sticky = credentials.remove(index);
                credentials.insert(0, sticky);
                debug!(credential = %last_id, "sticky credential moved to front");
            }
        }

        credentials
    }

    /// 记录成功的密钥（覆盖旧值），写入失败只记日志
    pub async fn record_success(&self, credential_id: &str) {
        if let Err(e) = self
            .store
            .set(LAST_SUCCESSFUL_KEY_ID, serde_json::Value::from(credential_id))
            .await
        {
            warn!(error = %e, "failed to record sticky credential");
        }
    }
}
