//! PatchStore 配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::storage::keys;

/// 默认保留的 patch 数量
pub const DEFAULT_RETENTION: usize = 100;

/// 默认等待存储文件锁的时间
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// PatchStore 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchStoreConfig {
    /// 按时间戳保留最近的 patch 数量，超出部分在加载后后台清理
    pub retention: usize,
    /// 打开存储时等待文件锁的最长时间
    pub open_timeout: Duration,
    /// 存储在目录下的文件名
    pub file_name: String,
}

impl Default for PatchStoreConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            file_name: keys::DB_FILE_NAME.to_string(),
        }
    }
}

impl PatchStoreConfig {
    pub fn builder() -> PatchStoreConfigBuilder {
        PatchStoreConfigBuilder::new()
    }
}

/// PatchStoreConfig 构建器
#[derive(Debug, Default)]
pub struct PatchStoreConfigBuilder {
    config: PatchStoreConfig,
}

impl PatchStoreConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PatchStoreConfig::default(),
        }
    }

    pub fn retention(mut self, retention: usize) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.config.open_timeout = timeout;
        self
    }

    pub fn file_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.file_name = name.into();
        self
    }

    pub fn build(self) -> PatchStoreConfig {
        self.config
    }
}
