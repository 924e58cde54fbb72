//! 存储模块 - patch 账本的持久化层
//!
//! - `keys`: 持久化布局常量与键编码
//! - `kv`: 基于 sled 的有序键值存储
//! - `patch_store`: 顺序持久化、加载、分页与清理

pub mod keys;
pub mod kv;
pub mod patch_store;

pub use kv::KvStore;
pub use patch_store::{PatchStore, PersistFailure};
