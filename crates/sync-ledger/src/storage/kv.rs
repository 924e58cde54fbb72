//! KV 存储模块 - 基于 sled 的有序键值存储
//!
//! 本模块提供：
//! - 带超时的加锁打开（同一路径同一时间只能被一个实例持有）
//! - patch 命名空间的整体替换与删除（单个原子 batch）
//! - 与写入互斥的一致性扫描

use parking_lot::RwLock;
use sled::{Batch, Db, IVec, Tree};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{Result, SyncLedgerError};
use crate::storage::keys;

/// 加锁重试的初始退避
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);
/// 加锁重试的最大退避
const RETRY_MAX_DELAY: Duration = Duration::from_millis(500);

/// 一个 patch 在磁盘上的原始记录
#[derive(Debug, Default)]
pub struct RawPatch {
    pub uuid: String,
    pub stamp: Option<IVec>,
    pub patch_error: Option<IVec>,
    pub source: Option<IVec>,
    /// 按序号升序
    pub operations: Vec<(u64, IVec)>,
}

/// 待写入的 patch 记录
#[derive(Debug)]
pub struct PatchRecord<'a> {
    pub uuid: &'a str,
    pub stamp: Vec<u8>,
    pub patch_error: Option<String>,
    pub source: String,
    /// 已按入队顺序编码的操作
    pub operations: Vec<Vec<u8>>,
}

/// patch 账本的 KV 存储
#[derive(Debug)]
pub struct KvStore {
    path: PathBuf,
    db: Db,
    tree: Tree,
    /// 写入持有写锁，扫描持有读锁，扫描不会看到替换了一半的 patch
    commit_gate: RwLock<()>,
}

impl KvStore {
    /// 打开（必要时创建）存储，等待文件锁最多 `timeout`
    pub fn open(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncLedgerError::IO(format!("创建存储目录失败: {}", e)))?;
        }

        let deadline = Instant::now() + timeout;
        let mut delay = RETRY_BASE_DELAY;
        let db = loop {
            match sled::open(path) {
                Ok(db) => break db,
                Err(e) if is_lock_error(&e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SyncLedgerError::Timeout(format!(
                            "等待存储锁超时 ({:?}): {}: {}",
                            timeout,
                            path.display(),
                            e
                        )));
                    }
                    tracing::debug!("存储被占用，{:?} 后重试: {}", delay, path.display());
                    std::thread::sleep(delay.min(deadline - now));
                    delay = (delay * 2).min(RETRY_MAX_DELAY);
                }
                Err(e) => {
                    return Err(SyncLedgerError::KvStore(format!("打开 sled 数据库失败: {}", e)));
                }
            }
        };

        let tree = db
            .open_tree(keys::PATCH_TREE)
            .map_err(|e| SyncLedgerError::KvStore(format!("打开 patches Tree 失败: {}", e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            db,
            tree,
            commit_gate: RwLock::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 整体替换一个 patch：先删除旧记录的所有键，再写入新记录，在同一个 batch 中完成
    pub fn replace_patch(&self, record: &PatchRecord<'_>) -> Result<()> {
        if !keys::is_valid_uuid(record.uuid) {
            return Err(SyncLedgerError::InvalidArgument(format!(
                "patch uuid 不能为空或包含 NUL: {:?}",
                record.uuid
            )));
        }

        let _gate = self.commit_gate.write();
        let mut batch = self.removal_batch(record.uuid)?;

        batch.insert(keys::entry_key(record.uuid, keys::STAMP_KEY), record.stamp.as_slice());
        if let Some(message) = &record.patch_error {
            batch.insert(keys::entry_key(record.uuid, keys::PATCH_ERROR_KEY), message.as_bytes());
        }
        batch.insert(keys::entry_key(record.uuid, keys::SOURCE_KEY), record.source.as_bytes());
        // 序号从 1 开始，只在本 patch 内单调递增
        for (seq, data) in (1u64..).zip(record.operations.iter()) {
            batch.insert(keys::operation_key(record.uuid, seq), data.as_slice());
        }

        self.tree.apply_batch(batch)?;
        Ok(())
    }

    /// 删除一个 patch 的全部记录，前提是存储的时间戳仍是 `seen_stamp`
    ///
    /// 时间戳变了说明该 patch 在读取之后被重新写入，返回 `false` 且不删除。
    pub fn prune_patch(&self, uuid: &str, seen_stamp: Option<&[u8]>) -> Result<bool> {
        let _gate = self.commit_gate.write();
        let current = self.tree.get(keys::entry_key(uuid, keys::STAMP_KEY))?;
        if current.as_deref() != seen_stamp {
            return Ok(false);
        }
        let batch = self.removal_batch(uuid)?;
        self.tree.apply_batch(batch)?;
        Ok(true)
    }

    fn removal_batch(&self, uuid: &str) -> Result<Batch> {
        let mut batch = Batch::default();
        for item in self.tree.scan_prefix(keys::patch_prefix(uuid)) {
            let (key, _) = item?;
            batch.remove(key);
        }
        Ok(batch)
    }

    /// 按键顺序读取全部 patch 的原始记录
    pub fn scan_patches(&self) -> Result<Vec<RawPatch>> {
        let _gate = self.commit_gate.read();
        let mut patches: Vec<RawPatch> = Vec::new();

        for item in self.tree.iter() {
            let (key, value) = item?;
            let Some((uuid, entry)) = keys::parse_key(&key) else {
                tracing::warn!("跳过无法解析的键: {:?}", key);
                continue;
            };

            // 同一 patch 的键是连续的
            if patches.last().map_or(true, |last| last.uuid != uuid) {
                patches.push(RawPatch {
                    uuid,
                    ..RawPatch::default()
                });
            }
            let Some(current) = patches.last_mut() else {
                continue;
            };

            match entry {
                keys::PatchEntry::Stamp => current.stamp = Some(value),
                keys::PatchEntry::PatchError => current.patch_error = Some(value),
                keys::PatchEntry::Source => current.source = Some(value),
                keys::PatchEntry::Operation(seq) => current.operations.push((seq, value)),
                keys::PatchEntry::Unknown => {
                    tracing::debug!("忽略未知记录: patch={}", current.uuid);
                }
            }
        }

        Ok(patches)
    }

    /// 已存储的 patch 数量
    pub fn patch_count(&self) -> Result<usize> {
        let _gate = self.commit_gate.read();
        let mut count = 0usize;
        for item in self.tree.iter() {
            let (key, _) = item?;
            if let Some((_, keys::PatchEntry::Source)) = keys::parse_key(&key) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// 刷盘
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// sled 在另一个实例持有文件锁时返回的错误
fn is_lock_error(error: &sled::Error) -> bool {
    let msg = error.to_string();
    msg.contains("could not acquire lock")
        || msg.contains("could not acquire database file lock")
        || msg.contains("Resource temporarily unavailable")
        || msg.contains("WouldBlock")
        || matches!(error, sled::Error::Io(e) if e.kind() == std::io::ErrorKind::WouldBlock)
}
