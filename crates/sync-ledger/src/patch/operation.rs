//! 变更操作 - 普通变更与冲突
//!
//! 操作的持久化形式是一个带 `type` 标签的 JSON 对象。冲突操作额外携带
//! `conflict_type`、`left_op`、`right_op` 三个字段，其中左右两侧是完整的
//! 嵌套操作（各自带有自己的 `type` 标签），因此 Update 与 Delete 的冲突
//! 在重新加载后仍可区分。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{Result, SyncLedgerError};

/// 节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Folder,
}

/// 操作涉及的树节点（账本只透传，不解释）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub kind: NodeKind,
    #[serde(default)]
    pub size: i64,
    /// 修改时间（秒）
    #[serde(default)]
    pub mtime: i64,
}

impl Node {
    pub fn file<S: Into<String>>(path: S) -> Self {
        Self {
            path: path.into(),
            uuid: None,
            etag: None,
            kind: NodeKind::File,
            size: 0,
            mtime: 0,
        }
    }

    pub fn folder<S: Into<String>>(path: S) -> Self {
        Self {
            kind: NodeKind::Folder,
            ..Self::file(path)
        }
    }

    pub fn with_etag<S: Into<String>>(mut self, etag: S) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_uuid<S: Into<String>>(mut self, uuid: S) -> Self {
        self.uuid = Some(uuid.into());
        self
    }
}

/// 操作类型（用于过滤遍历）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Move,
    Conflict,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::Move => "move",
            OperationType::Conflict => "conflict",
        };
        f.write_str(name)
    }
}

/// 普通变更的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Move,
}

impl From<ChangeKind> for OperationType {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Create => OperationType::Create,
            ChangeKind::Update => OperationType::Update,
            ChangeKind::Delete => OperationType::Delete,
            ChangeKind::Move => OperationType::Move,
        }
    }
}

/// 冲突分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// 同一路径的文件夹在两端 UUID 不同
    FolderUuid,
    /// 同一文件在两端内容不同
    FileContent,
    /// 同一源被移动到不同位置
    MoveSameSource,
    /// 不同源被移动到同一位置
    MoveSameTarget,
    /// 同一路径在两端一个是文件一个是文件夹
    NodeType,
    /// 同一路径上的操作互相矛盾（如一端修改一端删除）
    PathOperation,
}

/// 普通变更
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeOperation {
    pub kind: ChangeKind,
    pub node: Node,
    /// Move 的目标路径
    pub move_to: Option<String>,
    pub stamp: DateTime<Utc>,
}

/// 冲突：两端对同一节点做了不兼容的修改
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictOperation {
    pub node: Node,
    pub conflict_type: ConflictType,
    pub left: Box<Operation>,
    pub right: Box<Operation>,
    pub stamp: DateTime<Utc>,
}

/// 单个原子操作
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Change(ChangeOperation),
    Conflict(ConflictOperation),
}

impl Operation {
    pub fn create(node: Node) -> Self {
        Self::change(ChangeKind::Create, node)
    }

    pub fn update(node: Node) -> Self {
        Self::change(ChangeKind::Update, node)
    }

    pub fn delete(node: Node) -> Self {
        Self::change(ChangeKind::Delete, node)
    }

    pub fn move_to<S: Into<String>>(node: Node, target_path: S) -> Self {
        Operation::Change(ChangeOperation {
            kind: ChangeKind::Move,
            node,
            move_to: Some(target_path.into()),
            stamp: Utc::now(),
        })
    }

    pub fn conflict(
        node: Node,
        conflict_type: ConflictType,
        left: Operation,
        right: Operation,
    ) -> Self {
        Operation::Conflict(ConflictOperation {
            node,
            conflict_type,
            left: Box::new(left),
            right: Box::new(right),
            stamp: Utc::now(),
        })
    }

    fn change(kind: ChangeKind, node: Node) -> Self {
        Operation::Change(ChangeOperation {
            kind,
            node,
            move_to: None,
            stamp: Utc::now(),
        })
    }

    pub fn op_type(&self) -> OperationType {
        match self {
            Operation::Change(change) => change.kind.into(),
            Operation::Conflict(_) => OperationType::Conflict,
        }
    }

    pub fn node(&self) -> &Node {
        match self {
            Operation::Change(change) => &change.node,
            Operation::Conflict(conflict) => &conflict.node,
        }
    }

    pub fn stamp(&self) -> DateTime<Utc> {
        match self {
            Operation::Change(change) => change.stamp,
            Operation::Conflict(conflict) => conflict.stamp,
        }
    }

    pub fn as_conflict(&self) -> Option<&ConflictOperation> {
        match self {
            Operation::Conflict(conflict) => Some(conflict),
            Operation::Change(_) => None,
        }
    }

    /// 编码为持久化记录
    pub fn encode(&self) -> Result<Vec<u8>> {
        let value = self.to_record()?;
        Ok(serde_json::to_vec(&value)?)
    }

    /// 从持久化记录解码
    ///
    /// 先读取 `type` 标签，冲突记录再单独解析三个必需字段；
    /// 任何一个缺失都只让这一条操作失败。
    pub fn decode(data: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(data)?;
        Self::from_record(value)
    }

    fn to_record(&self) -> Result<Value> {
        let record = match self {
            Operation::Change(change) => OperationRecord {
                op_type: change.kind.into(),
                node: change.node.clone(),
                stamp: change.stamp,
                move_to: change.move_to.clone(),
                conflict_type: None,
                left_op: None,
                right_op: None,
            },
            Operation::Conflict(conflict) => OperationRecord {
                op_type: OperationType::Conflict,
                node: conflict.node.clone(),
                stamp: conflict.stamp,
                move_to: None,
                conflict_type: Some(conflict.conflict_type),
                left_op: Some(conflict.left.to_record()?),
                right_op: Some(conflict.right.to_record()?),
            },
        };
        Ok(serde_json::to_value(record)?)
    }

    fn from_record(value: Value) -> Result<Self> {
        let record: OperationRecord = serde_json::from_value(value)?;
        let kind = match record.op_type {
            OperationType::Conflict => return Self::conflict_from_record(record),
            OperationType::Create => ChangeKind::Create,
            OperationType::Update => ChangeKind::Update,
            OperationType::Delete => ChangeKind::Delete,
            OperationType::Move => ChangeKind::Move,
        };
        Ok(Operation::Change(ChangeOperation {
            kind,
            node: record.node,
            move_to: record.move_to,
            stamp: record.stamp,
        }))
    }

    fn conflict_from_record(record: OperationRecord) -> Result<Self> {
        let conflict_type = record
            .conflict_type
            .ok_or_else(|| missing_conflict_field("conflict_type"))?;
        let left = record.left_op.ok_or_else(|| missing_conflict_field("left_op"))?;
        let right = record.right_op.ok_or_else(|| missing_conflict_field("right_op"))?;

        Ok(Operation::Conflict(ConflictOperation {
            node: record.node,
            conflict_type,
            left: Box::new(Self::from_record(left)?),
            right: Box::new(Self::from_record(right)?),
            stamp: record.stamp,
        }))
    }
}

fn missing_conflict_field(field: &str) -> SyncLedgerError {
    SyncLedgerError::InvalidData(format!("conflict record is missing `{}`", field))
}

/// 单条操作的持久化结构
#[derive(Debug, Serialize, Deserialize)]
struct OperationRecord {
    #[serde(rename = "type")]
    op_type: OperationType,
    node: Node,
    stamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    move_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conflict_type: Option<ConflictType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    left_op: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    right_op: Option<Value>,
}
