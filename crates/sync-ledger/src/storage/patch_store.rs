//! PatchStore - patch 的持久化、加载与清理
//!
//! 核心设计：
//! - 单个后台线程顺序持久化，提交通过零容量 channel 交接（调用方阻塞到线程接手为止）
//! - 每次持久化整体替换同 UUID 的旧记录
//! - 加载时全量排序（按时间戳倒序）后分页，超出保留数量的 patch 在后台线程中删除
//! - 记录的源端点 URI 与当前配置不一致时反转源/目标

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use sled::IVec;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::config::PatchStoreConfig;
use crate::endpoint::{Endpoint, PathSyncSource, PathSyncTarget};
use crate::error::{Result, SyncLedgerError};
use crate::patch::{Operation, Patch, PatchError};
use crate::storage::kv::{KvStore, PatchRecord, RawPatch};
use crate::version;

/// 持久化失败通知队列容量，满了之后新的失败只记日志
pub const FAILURE_QUEUE_CAPACITY: usize = 64;

/// 持久化失败通知
#[derive(Debug)]
pub struct PersistFailure {
    pub uuid: String,
    pub error: SyncLedgerError,
}

/// 持久化线程命令
enum PersistCommand {
    /// 持久化一个 patch
    Persist(Patch),
    /// 屏障：之前的提交全部落盘后回复
    Flush { respond_to: Sender<Result<()>> },
    /// 停止线程
    Shutdown,
}

/// 源/目标的一种朝向
struct Orientation {
    source: Arc<dyn PathSyncSource>,
    target: Arc<dyn PathSyncTarget>,
}

/// 加载与清理共享的状态
struct StoreInner {
    kv: KvStore,
    config: PatchStoreConfig,
    source_uri: String,
    /// 按配置的朝向
    forward: Orientation,
    /// 反转后的朝向；端点不具备相应能力时为 None
    inverted: Option<Orientation>,
    /// 尚未结束的清理线程
    pruners: Mutex<Vec<JoinHandle<()>>>,
    /// 上一次持久化的 patch 是否带错误（只由持久化线程写入）
    last_has_errors: AtomicBool,
}

/// patch 持久化存储
pub struct PatchStore {
    inner: Arc<StoreInner>,
    sender: Option<Sender<PersistCommand>>,
    worker: Option<JoinHandle<()>>,
    failures: Receiver<PersistFailure>,
}

impl PatchStore {
    /// 以默认配置打开 `folder_path` 下的存储
    pub fn open(
        folder_path: impl AsRef<Path>,
        source: Arc<dyn Endpoint>,
        target: Arc<dyn Endpoint>,
    ) -> Result<Self> {
        Self::open_with_config(PatchStoreConfig::default(), folder_path, source, target)
    }

    /// 打开存储，等待文件锁最多 `config.open_timeout`，然后启动持久化线程
    pub fn open_with_config(
        config: PatchStoreConfig,
        folder_path: impl AsRef<Path>,
        source: Arc<dyn Endpoint>,
        target: Arc<dyn Endpoint>,
    ) -> Result<Self> {
        let forward = Orientation {
            source: source.clone().as_sync_source().ok_or_else(|| {
                SyncLedgerError::InvalidArgument(format!(
                    "端点不能作为同步源: {}",
                    source.endpoint_info().uri
                ))
            })?,
            target: target.clone().as_sync_target().ok_or_else(|| {
                SyncLedgerError::InvalidArgument(format!(
                    "端点不能作为同步目标: {}",
                    target.endpoint_info().uri
                ))
            })?,
        };
        let inverted = match (target.clone().as_sync_source(), source.clone().as_sync_target()) {
            (Some(source), Some(target)) => Some(Orientation { source, target }),
            _ => None,
        };

        let db_path = folder_path.as_ref().join(&config.file_name);
        let kv = KvStore::open(&db_path, config.open_timeout)?;
        info!(
            "🚀 PatchStore 已打开: path={}, version={}, built={}",
            db_path.display(),
            version::version_string(),
            version::BUILD_TIME
        );

        let inner = Arc::new(StoreInner {
            kv,
            config,
            source_uri: source.endpoint_info().uri,
            forward,
            inverted,
            pruners: Mutex::new(Vec::new()),
            last_has_errors: AtomicBool::new(false),
        });

        // 用最近一次持久化的 patch 初始化错误标记
        let last_has_errors = match StoreInner::load(&inner, 0, 1) {
            Ok(last) => last.first().map_or(false, Patch::has_errors),
            Err(e) => {
                warn!("读取最近一次 patch 失败: {}", e);
                false
            }
        };
        inner.last_has_errors.store(last_has_errors, Ordering::SeqCst);

        let (sender, receiver) = bounded(0);
        let (failure_tx, failures) = bounded(FAILURE_QUEUE_CAPACITY);
        let worker = PersistWorker {
            inner: inner.clone(),
            receiver,
            failures: failure_tx,
        };
        let worker = thread::Builder::new()
            .name("patch-persist".to_string())
            .spawn(move || worker.run())
            .map_err(|e| SyncLedgerError::Runtime(format!("无法启动持久化线程: {}", e)))?;

        Ok(Self {
            inner,
            sender: Some(sender),
            worker: Some(worker),
            failures,
        })
    }

    /// 把 patch 交给持久化线程，阻塞到线程接手为止
    pub fn store(&self, patch: Patch) -> Result<()> {
        let sender = self.sender()?;
        sender.send(PersistCommand::Persist(patch)).map_err(|_| stopped("持久化线程已停止"))
    }

    /// 同 `store`
    pub fn publish_patch(&self, patch: Patch) -> Result<()> {
        self.store(patch)
    }

    /// 等待之前提交的 patch 全部落盘
    pub fn flush(&self) -> Result<()> {
        let (tx, rx) = bounded(1);
        self.sender()?
            .send(PersistCommand::Flush { respond_to: tx })
            .map_err(|_| stopped("持久化线程已停止"))?;
        rx.recv().map_err(|_| stopped("持久化线程响应失败"))?
    }

    /// 持久化失败通知，持久化线程在写入失败后继续处理后续提交
    ///
    /// 最多缓存 `FAILURE_QUEUE_CAPACITY` 条，未及时取走的后续失败会被丢弃。
    pub fn persist_failures(&self) -> Receiver<PersistFailure> {
        self.failures.clone()
    }

    /// 按时间戳倒序加载第 `offset` 条起的 `limit` 条 patch
    pub fn load(&self, offset: usize, limit: usize) -> Result<Vec<Patch>> {
        StoreInner::load(&self.inner, offset, limit)
    }

    /// 已存储的 patch 数量
    pub fn count(&self) -> Result<usize> {
        self.inner.kv.patch_count()
    }

    /// 最近一次持久化的 patch 是否带错误（决定下一个空 patch 是否写入）
    pub fn last_has_errors(&self) -> bool {
        self.inner.last_has_errors.load(Ordering::SeqCst)
    }

    /// 等待已触发的清理线程结束
    pub fn wait_for_pruning(&self) {
        self.inner.join_pruners();
    }

    /// `store` 的 async 版本，在阻塞线程池中等待交接
    pub async fn store_async(&self, patch: Patch) -> Result<()> {
        let sender = self.sender()?.clone();
        tokio::task::spawn_blocking(move || {
            sender.send(PersistCommand::Persist(patch)).map_err(|_| stopped("持久化线程已停止"))
        })
        .await
        .map_err(|e| SyncLedgerError::Runtime(format!("spawn_blocking 失败: {}", e)))?
    }

    /// `load` 的 async 版本
    pub async fn load_async(&self, offset: usize, limit: usize) -> Result<Vec<Patch>> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || StoreInner::load(&inner, offset, limit))
            .await
            .map_err(|e| SyncLedgerError::Runtime(format!("spawn_blocking 失败: {}", e)))?
    }

    /// `flush` 的 async 版本
    pub async fn flush_async(&self) -> Result<()> {
        let sender = self.sender()?.clone();
        tokio::task::spawn_blocking(move || {
            let (tx, rx) = bounded(1);
            sender
                .send(PersistCommand::Flush { respond_to: tx })
                .map_err(|_| stopped("持久化线程已停止"))?;
            rx.recv().map_err(|_| stopped("持久化线程响应失败"))?
        })
        .await
        .map_err(|e| SyncLedgerError::Runtime(format!("spawn_blocking 失败: {}", e)))?
    }

    /// 停止持久化线程，等待清理结束并刷盘
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn sender(&self) -> Result<&Sender<PersistCommand>> {
        self.sender.as_ref().ok_or_else(|| stopped("PatchStore 已停止"))
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(PersistCommand::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("持久化线程异常退出");
            }
        }
        self.inner.join_pruners();
        self.inner.kv.flush()?;
        info!("🛑 PatchStore 已停止: {}", self.inner.kv.path().display());
        Ok(())
    }
}

fn stopped(reason: &str) -> SyncLedgerError {
    SyncLedgerError::ShuttingDown(reason.to_string())
}

impl Drop for PatchStore {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.shutdown() {
                error!("关闭 PatchStore 失败: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for PatchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchStore")
            .field("path", &self.inner.kv.path())
            .field("source", &self.inner.source_uri)
            .field("running", &self.worker.is_some())
            .finish()
    }
}

impl StoreInner {
    fn load(inner: &Arc<Self>, offset: usize, limit: usize) -> Result<Vec<Patch>> {
        let raws = inner.kv.scan_patches()?;
        // 保留读取时的原始时间戳，清理时据此判断记录是否已被重新写入
        let mut patches: Vec<(Patch, Option<IVec>)> = raws
            .into_iter()
            .map(|raw| {
                let seen_stamp = raw.stamp.clone();
                (inner.rebuild(raw), seen_stamp)
            })
            .collect();

        patches.sort_by(|(a, _), (b, _)| b.stamp().cmp(&a.stamp()));
        let prunes: Vec<(String, Option<IVec>)> = patches
            .iter()
            .skip(inner.config.retention)
            .map(|(patch, seen_stamp)| (patch.uuid().to_string(), seen_stamp.clone()))
            .collect();

        let page: Vec<Patch> = patches
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(patch, _)| patch)
            .collect();

        if !prunes.is_empty() {
            Self::spawn_pruner(inner, prunes);
        }
        Ok(page)
    }

    /// 把原始记录还原成 Patch；单条操作损坏只跳过该操作
    fn rebuild(&self, raw: RawPatch) -> Patch {
        let mut orientation = &self.forward;
        if let Some(src) = &raw.source {
            if src.as_ref() != self.source_uri.as_bytes() {
                match &self.inverted {
                    Some(inverted) => orientation = inverted,
                    None => warn!(
                        "patch {} 记录的源为 {}，但端点不支持反转，保持当前朝向",
                        raw.uuid,
                        String::from_utf8_lossy(src)
                    ),
                }
            }
        }

        let mut patch = Patch::new(orientation.source.clone(), orientation.target.clone());
        patch.set_uuid(raw.uuid.clone());

        // 先恢复错误，再恢复时间戳
        if let Some(message) = &raw.patch_error {
            patch.set_patch_error(PatchError::new(String::from_utf8_lossy(message)));
        }

        let stamp = raw
            .stamp
            .as_ref()
            .and_then(|data| serde_json::from_slice::<DateTime<Utc>>(data).ok());
        match stamp {
            Some(stamp) => patch.set_stamp(stamp),
            None => {
                warn!("patch {} 的时间戳缺失或无法解析，使用当前时间", raw.uuid);
                patch.set_stamp(Utc::now());
            }
        }

        for (seq, data) in &raw.operations {
            match Operation::decode(data) {
                Ok(operation) => patch.enqueue(operation),
                Err(e) => {
                    error!("无法解析操作: patch={}, seq={}, error={}", raw.uuid, seq, e)
                }
            }
        }

        patch
    }

    fn spawn_pruner(inner: &Arc<Self>, stale: Vec<(String, Option<IVec>)>) {
        let store = inner.clone();
        let spawned = thread::Builder::new()
            .name("patch-pruner".to_string())
            .spawn(move || store.prune(&stale));

        match spawned {
            Ok(handle) => {
                let mut pruners = inner.pruners.lock();
                pruners.retain(|h| !h.is_finished());
                pruners.push(handle);
            }
            Err(e) => error!("无法启动清理线程: {}", e),
        }
    }

    fn prune(&self, stale: &[(String, Option<IVec>)]) {
        info!("清理 patch 存储: {} 个过期 patch", stale.len());
        for (uuid, seen_stamp) in stale {
            match self.kv.prune_patch(uuid, seen_stamp.as_deref()) {
                Ok(true) => {}
                Ok(false) => debug!("patch {} 已被重新写入，跳过清理", uuid),
                Err(e) => error!("无法删除 patch {}: {}", uuid, e),
            }
        }
    }

    fn join_pruners(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pruners.lock());
        for handle in handles {
            if handle.join().is_err() {
                error!("清理线程异常退出");
            }
        }
    }
}

/// 持久化线程
struct PersistWorker {
    inner: Arc<StoreInner>,
    receiver: Receiver<PersistCommand>,
    failures: Sender<PersistFailure>,
}

impl PersistWorker {
    fn run(self) {
        debug!("持久化线程开始处理提交");

        while let Ok(command) = self.receiver.recv() {
            match command {
                PersistCommand::Persist(patch) => {
                    if let Err(e) = self.persist(&patch) {
                        self.report_failure(patch.uuid(), e);
                    }
                }
                PersistCommand::Flush { respond_to } => {
                    let _ = respond_to.send(self.inner.kv.flush());
                }
                PersistCommand::Shutdown => {
                    debug!("持久化线程收到停止信号");
                    break;
                }
            }
        }
    }

    fn report_failure(&self, uuid: &str, error: SyncLedgerError) {
        if error.is_store_level() {
            error!("持久化 patch 失败: uuid={}, error={}", uuid, error);
        } else {
            warn!("patch 被拒绝: uuid={}, error={}", uuid, error);
        }

        let failure = PersistFailure {
            uuid: uuid.to_string(),
            error,
        };
        match self.failures.try_send(failure) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!("⚠️ 失败通知队列已满，丢弃: uuid={}", dropped.uuid);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// 返回是否真正写入
    fn persist(&self, patch: &Patch) -> Result<bool> {
        let has_errors = patch.has_errors();
        // 空且无错误的 patch 不存储，除非上一次带错误
        if patch.is_empty() && !has_errors && !self.inner.last_has_errors.load(Ordering::SeqCst) {
            debug!("跳过空 patch: {}", patch.uuid());
            return Ok(false);
        }

        let operations = patch
            .operations()
            .iter()
            .map(Operation::encode)
            .collect::<Result<Vec<_>>>()?;
        let record = PatchRecord {
            uuid: patch.uuid(),
            stamp: serde_json::to_vec(&patch.stamp())?,
            patch_error: patch.patch_error().map(|e| e.message.clone()),
            source: patch.source().endpoint_info().uri,
            operations,
        };

        self.inner.kv.replace_patch(&record)?;
        self.inner.last_has_errors.store(has_errors, Ordering::SeqCst);
        debug!("patch 已持久化: uuid={}, operations={}", patch.uuid(), patch.size());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{EndpointInfo, StaticEndpoint};
    use crate::patch::{ConflictType, Node, OperationType};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tempfile::TempDir;

    const LOCAL: &str = "fs:///home/user/Cells";
    const REMOTE: &str = "https://cells.example.com/ws/personal";

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn endpoints() -> (Arc<dyn Endpoint>, Arc<dyn Endpoint>) {
        (StaticEndpoint::shared(LOCAL), StaticEndpoint::shared(REMOTE))
    }

    fn open_store(dir: &TempDir) -> PatchStore {
        init_tracing();
        let (source, target) = endpoints();
        PatchStore::open(dir.path(), source, target).unwrap()
    }

    fn new_patch(store: &PatchStore) -> Patch {
        Patch::new(store.inner.forward.source.clone(), store.inner.forward.target.clone())
    }

    fn stamped_patch(store: &PatchStore, minutes_ago: i64) -> Patch {
        let mut patch = new_patch(store);
        patch.set_stamp(Utc::now() - ChronoDuration::minutes(minutes_ago));
        patch.enqueue(Operation::create(Node::file(format!("file-{minutes_ago}.txt"))));
        patch
    }

    #[test]
    fn test_round_trip_with_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let mut patch = new_patch(&store);
        patch.enqueue(Operation::create(Node::folder("photos")));
        patch.enqueue(Operation::conflict(
            Node::file("notes.md"),
            ConflictType::FileContent,
            Operation::update(Node::file("notes.md").with_etag("left")),
            Operation::update(Node::file("notes.md").with_etag("right")),
        ));
        patch.enqueue(Operation::move_to(Node::file("a.txt"), "b.txt"));
        patch.set_patch_error(PatchError::new("quota exceeded"));
        let uuid = patch.uuid().to_string();
        let stamp = patch.stamp();
        let operations = patch.operations().to_vec();

        store.store(patch).unwrap();
        store.flush().unwrap();

        let loaded = store.load(0, 10).unwrap();
        assert_eq!(loaded.len(), 1);
        let loaded = &loaded[0];
        assert_eq!(loaded.uuid(), uuid);
        assert_eq!(loaded.stamp(), stamp);
        assert_eq!(loaded.patch_error().unwrap().message, "quota exceeded");
        assert_eq!(loaded.operations(), operations.as_slice());
        assert_eq!(loaded.source().endpoint_info().uri, LOCAL);
        assert_eq!(loaded.target().endpoint_info().uri, REMOTE);
    }

    #[test]
    fn test_operations_keep_enqueue_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let mut patch = new_patch(&store);
        for name in ["A", "B", "C"] {
            patch.enqueue(Operation::update(Node::file(name)));
        }
        store.publish_patch(patch).unwrap();
        store.flush().unwrap();

        let loaded = store.load(0, 1).unwrap();
        let mut paths = Vec::new();
        loaded[0].walk_operations(&[], |op| paths.push(op.node().path.clone()));
        assert_eq!(paths, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_store_replaces_existing_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let mut first = new_patch(&store);
        first.enqueue(Operation::create(Node::file("one")));
        first.enqueue(Operation::create(Node::file("two")));
        first.set_patch_error(PatchError::new("interrupted"));
        let uuid = first.uuid().to_string();

        let mut second = new_patch(&store);
        second.set_uuid(uuid.clone());
        second.enqueue(Operation::delete(Node::file("three")));

        store.store(first).unwrap();
        store.store(second).unwrap();
        store.flush().unwrap();

        let loaded = store.load(0, 10).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].uuid(), uuid);
        assert!(!loaded[0].has_errors());
        assert_eq!(loaded[0].size(), 1);
        assert_eq!(loaded[0].operations()[0].op_type(), OperationType::Delete);
    }

    #[test]
    fn test_empty_patch_suppression() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        // 一次正常同步
        store.store(stamped_patch(&store, 10)).unwrap();
        // 空且无错误：不写入
        store.store(new_patch(&store)).unwrap();
        store.flush().unwrap();
        assert_eq!(store.count().unwrap(), 1);

        // 带错误的空 patch：写入
        let mut failed = new_patch(&store);
        failed.set_patch_error(PatchError::new("remote unreachable"));
        store.store(failed).unwrap();
        store.flush().unwrap();
        assert_eq!(store.count().unwrap(), 2);
        assert!(store.last_has_errors());

        // 错误之后的第一个空 patch 仍然写入，记录恢复
        store.store(new_patch(&store)).unwrap();
        // 之后的空 patch 不再写入
        store.store(new_patch(&store)).unwrap();
        store.flush().unwrap();
        assert_eq!(store.count().unwrap(), 3);
        assert!(!store.last_has_errors());
    }

    #[test]
    fn test_error_flag_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = open_store(&temp_dir);
            let mut failed = new_patch(&store);
            failed.set_patch_error(PatchError::new("disk full"));
            store.store(failed).unwrap();
            store.stop().unwrap();
        }

        let store = open_store(&temp_dir);
        assert!(store.last_has_errors());
        store.store(new_patch(&store)).unwrap();
        store.flush().unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_retention_prunes_oldest() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        for minutes_ago in 0..150 {
            store.store(stamped_patch(&store, minutes_ago)).unwrap();
        }
        store.flush().unwrap();

        let all = store.load(0, 1000).unwrap();
        assert_eq!(all.len(), 150);
        store.wait_for_pruning();

        assert_eq!(store.count().unwrap(), 100);
        let kept = store.load(0, 1000).unwrap();
        assert_eq!(kept.len(), 100);
        let kept_uuids: Vec<&str> = kept.iter().map(Patch::uuid).collect();
        let expected: Vec<&str> = all[..100].iter().map(Patch::uuid).collect();
        assert_eq!(kept_uuids, expected);
    }

    #[test]
    fn test_pagination_is_contiguous() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        for minutes_ago in 0..25 {
            store.store(stamped_patch(&store, minutes_ago)).unwrap();
        }
        store.flush().unwrap();

        let all = store.load(0, 100).unwrap();
        let first = store.load(0, 10).unwrap();
        let second = store.load(10, 10).unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(second.len(), 10);

        let paged: Vec<&str> = first.iter().chain(second.iter()).map(Patch::uuid).collect();
        let expected: Vec<&str> = all[..20].iter().map(Patch::uuid).collect();
        assert_eq!(paged, expected);
        assert!(all.windows(2).all(|w| w[0].stamp() >= w[1].stamp()));

        assert!(store.load(100, 10).unwrap().is_empty());
        assert!(store.load(0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_roles_inverted_when_endpoints_swapped() {
        let temp_dir = TempDir::new().unwrap();
        {
            // 以 (REMOTE, LOCAL) 的朝向写入
            let store = PatchStore::open(
                temp_dir.path(),
                StaticEndpoint::shared(REMOTE),
                StaticEndpoint::shared(LOCAL),
            )
            .unwrap();
            store.store(stamped_patch(&store, 1)).unwrap();
            store.stop().unwrap();
        }

        let store = open_store(&temp_dir);
        let loaded = store.load(0, 10).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].source().endpoint_info().uri, REMOTE);
        assert_eq!(loaded[0].target().endpoint_info().uri, LOCAL);
    }

    #[test]
    fn test_orientation_kept_when_source_cannot_be_target() {
        /// 只能作为源的本地端点
        #[derive(Debug)]
        struct SourceOnly;
        impl Endpoint for SourceOnly {
            fn endpoint_info(&self) -> EndpointInfo {
                EndpointInfo::new(LOCAL)
            }
            fn as_sync_source(self: Arc<Self>) -> Option<Arc<dyn PathSyncSource>> {
                Some(self)
            }
        }
        impl PathSyncSource for SourceOnly {}

        let temp_dir = TempDir::new().unwrap();
        {
            let store = PatchStore::open(
                temp_dir.path(),
                StaticEndpoint::shared(REMOTE),
                StaticEndpoint::shared(LOCAL),
            )
            .unwrap();
            store.store(stamped_patch(&store, 1)).unwrap();
            store.stop().unwrap();
        }

        init_tracing();
        let store =
            PatchStore::open(temp_dir.path(), Arc::new(SourceOnly), StaticEndpoint::shared(REMOTE))
                .unwrap();
        let loaded = store.load(0, 10).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].source().endpoint_info().uri, LOCAL);
        assert_eq!(loaded[0].target().endpoint_info().uri, REMOTE);
        assert_eq!(loaded[0].size(), 1);
    }

    #[test]
    fn test_corrupt_operation_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let valid: Vec<Vec<u8>> = (0..4)
            .map(|i| Operation::create(Node::file(format!("f{i}"))).encode().unwrap())
            .collect();
        let mut broken_conflict: serde_json::Value = serde_json::from_slice(
            &Operation::conflict(
                Node::file("f2"),
                ConflictType::NodeType,
                Operation::create(Node::file("f2")),
                Operation::create(Node::folder("f2")),
            )
            .encode()
            .unwrap(),
        )
        .unwrap();
        broken_conflict.as_object_mut().unwrap().remove("right_op");

        let mut operations = valid.clone();
        operations.insert(2, serde_json::to_vec(&broken_conflict).unwrap());
        store
            .inner
            .kv
            .replace_patch(&PatchRecord {
                uuid: "corrupt",
                stamp: serde_json::to_vec(&Utc::now()).unwrap(),
                patch_error: None,
                source: LOCAL.to_string(),
                operations,
            })
            .unwrap();

        let loaded = store.load(0, 10).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].size(), 4);
    }

    #[test]
    fn test_bad_stamp_falls_back_to_now() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store
            .inner
            .kv
            .replace_patch(&PatchRecord {
                uuid: "bad-stamp",
                stamp: b"yesterday-ish".to_vec(),
                patch_error: Some("boom".to_string()),
                source: LOCAL.to_string(),
                operations: Vec::new(),
            })
            .unwrap();

        let before = Utc::now();
        let loaded = store.load(0, 10).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].stamp() >= before);
        assert_eq!(loaded[0].patch_error().unwrap().message, "boom");
    }

    #[test]
    fn test_write_failure_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let failures = store.persist_failures();

        let mut bad = stamped_patch(&store, 0);
        bad.set_uuid("");
        store.store(bad).unwrap();
        // 失败后线程继续工作
        store.store(stamped_patch(&store, 1)).unwrap();
        store.flush().unwrap();

        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.uuid, "");
        assert!(matches!(failure.error, SyncLedgerError::InvalidArgument(_)));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_failure_queue_is_bounded() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let failures = store.persist_failures();

        for _ in 0..FAILURE_QUEUE_CAPACITY + 3 {
            let mut bad = stamped_patch(&store, 0);
            bad.set_uuid("bad\0uuid");
            store.store(bad).unwrap();
        }
        store.store(stamped_patch(&store, 1)).unwrap();
        store.flush().unwrap();

        assert_eq!(failures.try_iter().count(), FAILURE_QUEUE_CAPACITY);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_open_fails_while_locked() {
        let temp_dir = TempDir::new().unwrap();
        let _held = open_store(&temp_dir);

        let (source, target) = endpoints();
        let config = PatchStoreConfig::builder()
            .open_timeout(Duration::from_millis(200))
            .build();
        let err = PatchStore::open_with_config(config, temp_dir.path(), source, target)
            .unwrap_err();
        assert!(matches!(err, SyncLedgerError::Timeout(_)), "unexpected error: {err:?}");
    }

    #[test]
    fn test_source_must_support_role() {
        #[derive(Debug)]
        struct TargetOnly;
        impl Endpoint for TargetOnly {
            fn endpoint_info(&self) -> EndpointInfo {
                EndpointInfo::new("s3://bucket")
            }
            fn as_sync_target(self: Arc<Self>) -> Option<Arc<dyn PathSyncTarget>> {
                Some(self)
            }
        }
        impl PathSyncTarget for TargetOnly {}

        let temp_dir = TempDir::new().unwrap();
        let target = StaticEndpoint::shared(LOCAL);
        let err = PatchStore::open(temp_dir.path(), Arc::new(TargetOnly), target).unwrap_err();
        assert!(matches!(err, SyncLedgerError::InvalidArgument(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_wrappers() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.store_async(stamped_patch(&store, 3)).await.unwrap();
        store.store_async(stamped_patch(&store, 1)).await.unwrap();
        store.flush_async().await.unwrap();

        let loaded = store.load_async(0, 10).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded[0].stamp() > loaded[1].stamp());
    }
}
