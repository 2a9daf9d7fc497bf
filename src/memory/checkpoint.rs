//! 检查点存储：按会话线程 ID 持久化 ConversationState
//!
//! 提供内存实现（RwLock<HashMap>）与 JSON 文件实现（每个线程一个文件，写临时文件后 rename）。
//! 同一线程的「加载 -> 运行 -> 保存」由 ThreadLocks 串行化，防止用户重复提交导致更新丢失。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::core::{AgentError, ConversationState};

/// 检查点存储接口
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 加载线程状态；从未保存过时返回 None
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, AgentError>;

    /// 保存（整体替换）线程状态
    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<(), AgentError>;
}

/// 内存检查点（单进程部署）
#[derive(Default)]
pub struct MemoryCheckpointStore {
    states: RwLock<HashMap<String, ConversationState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn thread_count(&self) -> usize {
        self.states.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, AgentError> {
        Ok(self.states.read().await.get(thread_id).cloned())
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<(), AgentError> {
        self.states
            .write()
            .await
            .insert(thread_id.to_string(), state.clone());
        Ok(())
    }
}

/// JSON 文件检查点：dir/thread-<编码后的线程 ID>.json
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(checkpoint_file_name(thread_id))
    }
}

/// 线程 ID 到文件名的单射编码
///
/// 小写字母、数字与 `-` 原样保留，其余每个字节写成 `_xx`（小写十六进制）。
/// `_` 只作转义前缀，因此不同 ID 不会落到同一文件；结果只含小写字符，
/// 在大小写不敏感的文件系统上同样成立。
fn checkpoint_file_name(thread_id: &str) -> String {
    let mut name = String::with_capacity(thread_id.len() + 12);
    name.push_str("thread-");
    for b in thread_id.bytes() {
        if b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' {
            name.push(char::from(b));
        } else {
            name.push_str(&format!("_{b:02x}"));
        }
    }
    name.push_str(".json");
    name
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, AgentError> {
        let path = self.path_for(thread_id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AgentError::Checkpoint(format!("{}: {e}", path.display()))),
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| AgentError::Checkpoint(format!("{}: {e}", path.display())))
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<(), AgentError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AgentError::Checkpoint(e.to_string()))?;
        let path = self.path_for(thread_id);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| AgentError::Checkpoint(e.to_string()))?;
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| AgentError::Checkpoint(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| AgentError::Checkpoint(format!("{}: {e}", path.display())))?;
        Ok(())
    }
}

/// 每个线程一把锁：同一线程的轮次串行，不同线程互不阻塞
///
/// 无人持有也无人等待的锁在下一次 acquire 时清理，表的大小只随活跃线程数增长。
#[derive(Default)]
pub struct ThreadLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取线程锁；持有返回的 guard 期间，同一线程的其它轮次会等待
    pub async fn acquire(&self, thread_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // 持有者与等待者各持一份 Arc；只剩表内这一份说明已空闲
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// 根据配置创建检查点存储
pub fn create_checkpoint_store(backend: &str, dir: &Path) -> Arc<dyn CheckpointStore> {
    match backend.to_lowercase().as_str() {
        "file" => {
            tracing::info!("Using file checkpoint store: {:?}", dir);
            Arc::new(FileCheckpointStore::new(dir))
        }
        "memory" => {
            tracing::info!("Using in-memory checkpoint store");
            Arc::new(MemoryCheckpointStore::new())
        }
        other => {
            tracing::warn!("Unknown checkpoint backend '{}', using in-memory store", other);
            Arc::new(MemoryCheckpointStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;

    fn sample_state() -> ConversationState {
        let mut state = ConversationState::new();
        state.begin_turn("apa itu FAT?");
        state.push(Message::assistant("FAT adalah Fiber Access Terminal."));
        state
    }

    #[tokio::test]
    async fn memory_store_load_is_idempotent() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load("t1").await.unwrap().is_none());
        store.save("t1", &sample_state()).await.unwrap();
        let a = store.load("t1").await.unwrap();
        let b = store.load("t1").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.unwrap().len(), 2);
        assert_eq!(store.thread_count().await, 1);
    }

    #[tokio::test]
    async fn file_store_round_trips_and_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.load("user/../42").await.unwrap().is_none());

        let state = sample_state();
        store.save("user/../42", &state).await.unwrap();
        let loaded = store.load("user/../42").await.unwrap();
        assert_eq!(loaded, Some(state));

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1, "temp file must be renamed away");
    }

    #[tokio::test]
    async fn file_store_reports_corrupt_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(checkpoint_file_name("bad")), "{not json").unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(matches!(store.load("bad").await, Err(AgentError::Checkpoint(_))));
    }

    #[test]
    fn file_names_are_distinct_and_safe() {
        assert_eq!(checkpoint_file_name("web-42"), "thread-web-42.json");
        assert_eq!(checkpoint_file_name("user/42"), "thread-user_2f42.json");
        assert_eq!(checkpoint_file_name("user_42"), "thread-user_5f42.json");
        assert_eq!(checkpoint_file_name("A"), "thread-_41.json");
        assert_ne!(checkpoint_file_name("A"), checkpoint_file_name("a"));
        assert_eq!(checkpoint_file_name(""), "thread-.json");
        assert!(!checkpoint_file_name("../../etc/passwd").contains('/'));
    }

    #[tokio::test]
    async fn look_alike_thread_ids_keep_separate_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let mut private = ConversationState::new();
        private.begin_turn("rahasia milik user/42");
        store.save("user/42", &private).await.unwrap();

        assert!(store.load("user_42").await.unwrap().is_none());
        assert!(store.load("user 42").await.unwrap().is_none());
        assert_eq!(store.load("user/42").await.unwrap(), Some(private));
    }

    #[tokio::test]
    async fn same_thread_lock_is_exclusive() {
        let locks = ThreadLocks::new();
        let guard = locks.acquire("t1").await;
        let other = locks.acquire("t2").await;
        drop(other);

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            locks.acquire("t1"),
        )
        .await;
        assert!(pending.is_err(), "second acquire on same thread must wait");
        drop(guard);
        let _again = locks.acquire("t1").await;
    }

    #[tokio::test]
    async fn idle_thread_locks_are_pruned() {
        let locks = ThreadLocks::new();
        for id in ["a", "b", "c"] {
            drop(locks.acquire(id).await);
        }
        let held = locks.acquire("d").await;
        assert_eq!(locks.locks.lock().await.len(), 1);

        drop(locks.acquire("e").await);
        let map = locks.locks.lock().await;
        assert!(map.contains_key("d"), "held lock must survive pruning");
        drop(map);
        drop(held);
    }
}
