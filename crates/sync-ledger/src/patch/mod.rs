//! Patch 模块 - 一次同步尝试的变更集合
//!
//! - `Operation`: 单个原子变更或冲突
//! - `Patch`: 源端点到目标端点之间的有序操作序列，附带时间戳、UUID 和可选的终止错误

pub mod operation;

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

use crate::endpoint::{PathSyncSource, PathSyncTarget};

pub use operation::{
    ChangeKind, ChangeOperation, ConflictOperation, ConflictType, Node, NodeKind, Operation,
    OperationType,
};

/// Patch 的终止错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PatchError {
    pub message: String,
}

impl PatchError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// 一次同步尝试的变更集合
///
/// 合并引擎在内存中逐条 `enqueue` 构建 patch，然后整体交给 `PatchStore`；
/// 交出所有权之后不再修改。
#[derive(Clone)]
pub struct Patch {
    uuid: String,
    source: Arc<dyn PathSyncSource>,
    target: Arc<dyn PathSyncTarget>,
    stamp: DateTime<Utc>,
    operations: Vec<Operation>,
    error: Option<PatchError>,
}

impl Patch {
    /// 创建绑定到 (source, target) 的空 patch，自动分配 UUID
    pub fn new(source: Arc<dyn PathSyncSource>, target: Arc<dyn PathSyncTarget>) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            source,
            target,
            stamp: Utc::now(),
            operations: Vec::new(),
            error: None,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn set_uuid<S: Into<String>>(&mut self, uuid: S) {
        self.uuid = uuid.into();
    }

    pub fn stamp(&self) -> DateTime<Utc> {
        self.stamp
    }

    pub fn set_stamp(&mut self, stamp: DateTime<Utc>) {
        self.stamp = stamp;
    }

    pub fn source(&self) -> &Arc<dyn PathSyncSource> {
        &self.source
    }

    pub fn target(&self) -> &Arc<dyn PathSyncTarget> {
        &self.target
    }

    pub fn set_source(&mut self, source: Arc<dyn PathSyncSource>) {
        self.source = source;
    }

    pub fn set_target(&mut self, target: Arc<dyn PathSyncTarget>) {
        self.target = target;
    }

    pub fn set_patch_error(&mut self, error: PatchError) {
        self.error = Some(error);
    }

    pub fn patch_error(&self) -> Option<&PatchError> {
        self.error.as_ref()
    }

    pub fn has_errors(&self) -> bool {
        self.error.is_some()
    }

    /// 追加一个操作（保持插入顺序）
    pub fn enqueue(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// 按顺序遍历操作；`filter` 为空表示不过滤
    pub fn walk_operations<F>(&self, filter: &[OperationType], mut f: F)
    where
        F: FnMut(&Operation),
    {
        self.operations
            .iter()
            .filter(|op| filter.is_empty() || filter.contains(&op.op_type()))
            .for_each(|op| f(op));
    }

    pub fn size(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl fmt::Debug for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patch")
            .field("uuid", &self.uuid)
            .field("source", &self.source.endpoint_info().uri)
            .field("target", &self.target.endpoint_info().uri)
            .field("stamp", &self.stamp)
            .field("operations", &self.operations.len())
            .field("error", &self.error)
            .finish()
    }
}
