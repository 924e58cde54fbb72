//! Sync Ledger - 双端文件同步引擎的 patch 账本
//!
//! 记录、排序、清理并回放两棵文件树（本地、远端或混合）之间同步产生的
//! 变更集合（patch），包括：
//! - 📦 Patch / Operation 数据模型，冲突操作保留左右两侧的完整操作
//! - 💾 基于 sled 的持久化，同 UUID 整体替换
//! - 🧵 单个后台线程顺序写入，提交方通过零容量 channel 获得背压
//! - 🧹 只保留最近的 patch，超出部分在后台清理
//! - 🔄 端点朝向按 URI 识别，重启后源/目标互换也能还原
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use sync_ledger::{Node, Operation, Patch, PatchStore, StaticEndpoint};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let local = StaticEndpoint::shared("fs:///home/user/Cells");
//!     let remote = StaticEndpoint::shared("https://cells.example.com/ws/personal");
//!
//!     let store = PatchStore::open("/path/to/state", local.clone(), remote.clone())?;
//!
//!     let mut patch = Patch::new(local, remote);
//!     patch.enqueue(Operation::create(Node::file("report.pdf")));
//!     store.store(patch)?;
//!
//!     for patch in store.load(0, 20)? {
//!         println!("{} {} ops", patch.stamp(), patch.size());
//!     }
//!
//!     store.stop()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod patch;
pub mod storage;
pub mod version;

pub use config::{PatchStoreConfig, PatchStoreConfigBuilder};
pub use endpoint::{Endpoint, EndpointInfo, PathSyncSource, PathSyncTarget, StaticEndpoint};
pub use error::{Result, SyncLedgerError};
pub use patch::{
    ChangeKind, ChangeOperation, ConflictOperation, ConflictType, Node, NodeKind, Operation,
    OperationType, Patch, PatchError,
};
pub use storage::{PatchStore, PersistFailure};
