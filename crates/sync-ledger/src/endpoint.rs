//! 端点能力契约
//!
//! 同步引擎的两个参与方（本地目录、远端存储、缓存……）在账本里只通过
//! 稳定的 URI 标识和角色能力出现：
//! - `PathSyncSource`: 可以作为同步源
//! - `PathSyncTarget`: 可以作为同步目标
//!
//! 一个具体端点可以同时具备两种能力；角色反转时通过 `as_sync_source` /
//! `as_sync_target` 显式收窄，而不是隐式假设。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// 端点描述信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// 稳定的 URI 标识（账本唯一依赖的字段）
    pub uri: String,
    pub requires_normalization: bool,
    pub requires_folders_rescan: bool,
    /// 端点的变更是否异步到达（如远端事件流）
    pub is_asynchronous: bool,
}

impl EndpointInfo {
    pub fn new<S: Into<String>>(uri: S) -> Self {
        Self {
            uri: uri.into(),
            requires_normalization: false,
            requires_folders_rescan: false,
            is_asynchronous: false,
        }
    }
}

/// 同步端点
pub trait Endpoint: fmt::Debug + Send + Sync {
    /// 端点信息
    fn endpoint_info(&self) -> EndpointInfo;

    /// 收窄为同步源；不具备该能力时返回 None
    fn as_sync_source(self: Arc<Self>) -> Option<Arc<dyn PathSyncSource>> {
        None
    }

    /// 收窄为同步目标；不具备该能力时返回 None
    fn as_sync_target(self: Arc<Self>) -> Option<Arc<dyn PathSyncTarget>> {
        None
    }
}

/// 可以作为同步源的端点
pub trait PathSyncSource: Endpoint {}

/// 可以作为同步目标的端点
pub trait PathSyncTarget: Endpoint {}

/// 只有身份信息的端点
///
/// 用于在没有实时端点的情况下读取历史（例如历史查看界面），
/// 同时具备源和目标两种能力。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticEndpoint {
    info: EndpointInfo,
}

impl StaticEndpoint {
    pub fn new<S: Into<String>>(uri: S) -> Self {
        Self {
            info: EndpointInfo::new(uri),
        }
    }

    pub fn with_info(info: EndpointInfo) -> Self {
        Self { info }
    }

    pub fn shared<S: Into<String>>(uri: S) -> Arc<Self> {
        Arc::new(Self::new(uri))
    }
}

impl Endpoint for StaticEndpoint {
    fn endpoint_info(&self) -> EndpointInfo {
        self.info.clone()
    }

    fn as_sync_source(self: Arc<Self>) -> Option<Arc<dyn PathSyncSource>> {
        Some(self)
    }

    fn as_sync_target(self: Arc<Self>) -> Option<Arc<dyn PathSyncTarget>> {
        Some(self)
    }
}

impl PathSyncSource for StaticEndpoint {}

impl PathSyncTarget for StaticEndpoint {}
