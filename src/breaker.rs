//! 冷却登记表（断路器）
//!
//! 以 `(密钥 id, 模型 id)` 为单位记录冷却到期时间。同一密钥下的不同模型在上游
//! 有各自独立的配额桶，所以断路器按「组合」而不是按密钥来开合。
//!
//! 内存中的表是权威状态；每次变动后把快照交给唯一的背景写入任务镜像到 session 存储，
//! 写入失败只记日志，不影响调用方。

use crate::clock::Clock;
use crate::storage::{KeyValueStore, StoreMirror, COOLDOWN_STATE_KEY};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// 断路器状态查询结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStatus {
    pub open: bool,
    pub remaining_seconds: u64,
}

/// 冷却登记表
#[derive(Clone)]
pub struct CooldownRegistry {
    state: Arc<RwLock<HashMap<String, i64>>>,
    mirror: StoreMirror,
    clock: Arc<dyn Clock>,
}

impl CooldownRegistry {
    /// 从存储加载，已经过期的项目直接丢弃
    ///
    /// 加载失败时以空表启动。
    pub async fn load(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        let mut state = HashMap::new();

        match store.get(COOLDOWN_STATE_KEY).await {
            Ok(Some(serde_json::Value::Object(map))) => {
                for (key, value) in map {
                    if let Some(until) = value.as_i64() {
                        if until > now {
                            state.insert(key, until);
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to load cooldown state, starting empty"),
        }

        debug!(entries = state.len(), "cooldown registry loaded");

        Self {
            state: Arc::new(RwLock::new(state)),
            mirror: StoreMirror::spawn(store, COOLDOWN_STATE_KEY),
            clock,
        }
    }

    fn unique_id(credential_id: &str, model_id: &str) -> String {
        format!("{}::{}", credential_id, model_id)
    }

    /// 查询某组合是否处于冷却中（无副作用）
    pub fn is_open(&self, credential_id: &str, model_id: &str) -> BreakerStatus {
        let now = self.clock.now_ms();
        let until = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            state.get(&Self::unique_id(credential_id, model_id)).copied()
        };

        match until {
            Some(until) if until > now => BreakerStatus {
                open: true,
                remaining_seconds: ((until - now) as u64).div_ceil(1000),
            },
            _ => BreakerStatus {
                open: false,
                remaining_seconds: 0,
            },
        }
    }

    /// 判处冷却：到期时间 = 现在 + `penalty_ms`；`penalty_ms == 0` 不做任何事
    pub fn trip(&self, credential_id: &str, model_id: &str, penalty_ms: u64) {
        if penalty_ms == 0 {
            return;
        }

        let until = self
            .clock
            .now_ms()
            .saturating_add(i64::try_from(penalty_ms).unwrap_or(i64::MAX));
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.insert(Self::unique_id(credential_id, model_id), until);
            // 持锁发布，快照的先后与变动的先后一致
            self.mirror.publish(Some(serde_json::Value::Object(
                state
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(*v)))
                    .collect(),
            )));
        }

        debug!(credential = credential_id, model = model_id, penalty_ms, "breaker tripped");
    }

    /// 当前仍在冷却中的组合数
    pub fn open_count(&self) -> usize {
        let now = self.clock.now_ms();
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.values().filter(|until| **until > now).count()
    }

    /// 等待目前为止的冷却状态写入存储
    pub async fn flush(&self) {
        self.mirror.flush().await;
    }
}
