//! 审计日志
//!
//! 保留最近的判读结果与其他失败，最新的在前，超过容量就丢掉最旧的。
//! 与冷却登记表相同，内存中的列表为准，写回 session 存储是背景动作。

use crate::clock::Clock;
use crate::storage::{KeyValueStore, StoreMirror, AUDIT_LOG_KEY};
use crate::types::{LogEntry, Severity};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

pub const DEFAULT_AUDIT_CAPACITY: usize = 20;

#[derive(Clone)]
pub struct AuditLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
    capacity: usize,
    mirror: StoreMirror,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    /// 从存储加载既有日志
    pub async fn load(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut entries: Vec<LogEntry> = match store.get(AUDIT_LOG_KEY).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(error = %e, "stored audit log is malformed, starting empty");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "failed to load audit log, starting empty");
                Vec::new()
            }
        };
        entries.truncate(capacity);

        Self {
            entries: Arc::new(Mutex::new(entries)),
            capacity,
            mirror: StoreMirror::spawn(store, AUDIT_LOG_KEY),
            clock,
        }
    }

    /// 新增一条日志（置于最前）
    pub fn append(
        &self,
        severity: Severity,
        message: impl Into<String>,
        context: Option<String>,
        remediation: Option<String>,
    ) {
        let entry = LogEntry {
            timestamp: self.clock.now_ms(),
            severity,
            message: message.into(),
            context,
            remediation,
        };

        let ctx = entry.context.as_deref().unwrap_or("");
        match severity {
            Severity::Info => info!(context = ctx, "{}", entry.message),
            Severity::Warn => warn!(context = ctx, "{}", entry.message),
            Severity::Error => error!(context = ctx, "{}", entry.message),
        }

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(0, entry);
        entries.truncate(self.capacity);
        match serde_json::to_value(&*entries) {
            Ok(snapshot) => self.mirror.publish(Some(snapshot)),
            Err(e) => warn!(error = %e, "failed to serialize audit log"),
        }
    }

    /// 全部日志，最新的在前
    pub fn read_all(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clear();
        self.mirror.publish(None);
    }

    /// 等待目前为止的日志写入存储
    pub async fn flush(&self) {
        self.mirror.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;

    async fn log_with(store: Arc<MemoryStore>) -> AuditLog {
        AuditLog::load(store, Arc::new(ManualClock::new(0)), DEFAULT_AUDIT_CAPACITY).await
    }

    #[tokio::test]
    async fn keeps_twenty_most_recent_first() {
        let log = log_with(Arc::new(MemoryStore::new())).await;
        for i in 0..25 {
            log.append(Severity::Warn, format!("entry {}", i), None, None);
        }
        let entries = log.read_all();
        assert_eq!(entries.len(), 20);
        assert_eq!(entries[0].message, "entry 24");
        assert_eq!(entries[19].message, "entry 5");
    }

    #[tokio::test]
    async fn entries_carry_context_and_remediation() {
        let log = log_with(Arc::new(MemoryStore::new())).await;
        log.append(
            Severity::Error,
            "failed",
            Some("[Status: 403] denied".to_string()),
            Some("check billing".to_string()),
        );
        let entry = &log.read_all()[0];
        assert_eq!(entry.severity, Severity::Error);
        assert_eq!(entry.context.as_deref(), Some("[Status: 403] denied"));
        assert_eq!(entry.remediation.as_deref(), Some("check billing"));
    }

    #[tokio::test]
    async fn reload_restores_persisted_entries() {
        let store = Arc::new(MemoryStore::new());
        let log = log_with(store.clone()).await;
        log.append(Severity::Info, "first", None, None);
        log.append(Severity::Info, "second", None, None);
        log.flush().await;

        let reloaded = log_with(store).await;
        let messages: Vec<String> = reloaded.read_all().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["second", "first"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn back_to_back_appends_all_survive_reload() {
        let store = Arc::new(MemoryStore::new());
        let log = log_with(store.clone()).await;

        let writer = log.clone();
        tokio::spawn(async move {
            writer.append(Severity::Warn, "one", None, None);
            writer.append(Severity::Warn, "two", None, None);
            writer.append(Severity::Warn, "three", None, None);
        })
        .await
        .unwrap();
        log.flush().await;

        assert_eq!(log_with(store).await.read_all().len(), 3);
    }

    #[tokio::test]
    async fn clear_empties_log() {
        let store = Arc::new(MemoryStore::new());
        let log = log_with(store.clone()).await;
        log.append(Severity::Info, "x", None, None);
        log.clear();
        assert!(log.read_all().is_empty());

        log.flush().await;
        assert_eq!(store.get(AUDIT_LOG_KEY).await.unwrap(), None);
    }
}
