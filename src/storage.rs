//! 键值存储模块
//!
//! 引擎所依赖的持久化存储只是一个简单的 get/set/remove 接口。
//! 提供两个实现：纯内存的 [`MemoryStore`] 与写入磁盘 JSON 文件的 [`JsonFileStore`]。

use crate::error::{Result, TranslationError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::warn;

/// 密钥池（local）
pub const CREDENTIALS_KEY: &str = "userApiKeys";
/// 用户设置（local）
pub const SETTINGS_KEY: &str = "translatorSettings";
/// 冷却状态快照（session）
pub const COOLDOWN_STATE_KEY: &str = "circuitBreakerState";
/// 上一次成功的密钥 id（session）
pub const LAST_SUCCESSFUL_KEY_ID: &str = "lastSuccessfulKeyId";
/// 审计日志（session）
pub const AUDIT_LOG_KEY: &str = "errorLogs";

/// 持久化键值存储
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// 读取并反序列化，不存在时返回 `default`
///
/// 存储中的值形状不对时同样回退到默认值，并记一条警告。
pub async fn get_or_default<T>(store: &dyn KeyValueStore, key: &str, default: T) -> Result<T>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(Value::Null) | None => Ok(default),
        Some(value) => match serde_json::from_value(value) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                warn!(key, error = %e, "stored value has unexpected shape, using default");
                Ok(default)
            }
        },
    }
}

/// 序列化后写入
pub async fn set_json<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(value)?;
    store.set(key, value).await
}

/// 某个键的背景写回
///
/// 调用方在持有自己的状态锁时调用 [`StoreMirror::publish`]，快照因此按变动顺序排队；
/// 唯一的写入任务只写最新的一份，旧快照不会盖过新快照。
#[derive(Clone)]
pub struct StoreMirror {
    key: &'static str,
    pending: Arc<watch::Sender<(u64, Option<Value>)>>,
    written: watch::Receiver<u64>,
}

impl StoreMirror {
    /// 启动写入任务，必须在 tokio 运行时内调用
    pub fn spawn(store: Arc<dyn KeyValueStore>, key: &'static str) -> Self {
        let (pending, rx) = watch::channel((0u64, None));
        let (done, written) = watch::channel(0u64);
        tokio::spawn(write_latest(store, key, rx, done));

        Self {
            key,
            pending: Arc::new(pending),
            written,
        }
    }

    /// 排入新快照；`None` 表示删除这个键
    pub fn publish(&self, snapshot: Option<Value>) {
        self.pending.send_modify(|(version, latest)| {
            *version += 1;
            *latest = snapshot;
        });
    }

    /// 等到目前为止排入的快照都已写入（或写入任务已结束）
    pub async fn flush(&self) {
        let target = self.pending.borrow().0;
        let mut written = self.written.clone();
        if written.wait_for(|done| *done >= target).await.is_err() {
            warn!(key = self.key, "store writer stopped before flush completed");
        }
    }
}

async fn write_latest(
    store: Arc<dyn KeyValueStore>,
    key: &'static str,
    mut pending: watch::Receiver<(u64, Option<Value>)>,
    done: watch::Sender<u64>,
) {
    while pending.changed().await.is_ok() {
        let (version, snapshot) = pending.borrow_and_update().clone();
        let result = match snapshot {
            Some(value) => store.set(key, value).await,
            None => store.remove(key).await,
        };
        if let Err(e) = result {
            warn!(key, error = %e, "failed to mirror state to store");
        }
        done.send_replace(version);
    }
}

/// 纯内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// 以单一 JSON 对象文件保存的存储
///
/// 内容缓存在内存中，每次 set/remove 都整份重写文件。文件不存在视为空存储。
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<Map<String, Value>>,
}

impl JsonFileStore {
    /// 打开（或准备新建）一个存储文件
    ///
    /// 文件内容无法解析时返回错误。
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = read_entries(&path).await?;
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// 与 [`JsonFileStore::open`] 相同，但内容损坏时以空存储启动
    ///
    /// 适合只放可重建状态（冷却、日志）的 session 存储；下一次写入会覆盖损坏的文件。
    pub async fn open_or_reset<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match read_entries(&path).await {
            Ok(entries) => entries,
            Err(e @ (TranslationError::Serialization(_) | TranslationError::Storage(_))) => {
                warn!(path = %path.display(), error = %e, "store file is damaged, starting empty");
                Map::new()
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 先写临时文件再改名，读者只会看到完整的旧文件或新文件
    async fn flush(&self, entries: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(entries)?;

        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(format!(".{}.tmp", std::process::id()));
        let tmp_path = self.path.with_file_name(tmp_name);

        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|e| TranslationError::Storage(format!("write {}: {}", tmp_path.display(), e)))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| TranslationError::Storage(format!("replace {}: {}", self.path.display(), e)))
    }
}

async fn read_entries(path: &Path) -> Result<Map<String, Value>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) if content.trim().is_empty() => Ok(Map::new()),
        Ok(content) => match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(TranslationError::Storage(format!(
                "{} does not contain a JSON object",
                path.display()
            ))),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        self.flush(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_round_trip_and_remove() {
        let store = MemoryStore::new();
        store.set("a", json!([1, 2])).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!([1, 2])));
        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_or_default_handles_missing_and_malformed() {
        let store = MemoryStore::new();
        let missing: Vec<String> = get_or_default(&store, "nope", vec!["d".to_string()]).await.unwrap();
        assert_eq!(missing, vec!["d"]);

        store.set("bad", json!({"not": "a list"})).await.unwrap();
        let malformed: Vec<String> = get_or_default(&store, "bad", Vec::new()).await.unwrap();
        assert!(malformed.is_empty());
    }
}
