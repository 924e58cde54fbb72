use thiserror::Error;

/// patch 账本的统一错误类型
#[derive(Debug, Error)]
pub enum SyncLedgerError {
    /// 底层 KV 存储（sled）出错
    #[error("KV store error: {0}")]
    KvStore(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IO(String),
    /// 等待存储文件锁超时
    #[error("Timeout: {0}")]
    Timeout(String),
    /// 后台持久化线程已经退出
    #[error("Shutting down: {0}")]
    ShuttingDown(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// 持久化记录结构不完整或无法解析
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<sled::Error> for SyncLedgerError {
    fn from(error: sled::Error) -> Self {
        SyncLedgerError::KvStore(error.to_string())
    }
}

impl From<serde_json::Error> for SyncLedgerError {
    fn from(error: serde_json::Error) -> Self {
        SyncLedgerError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for SyncLedgerError {
    fn from(error: std::io::Error) -> Self {
        SyncLedgerError::IO(error.to_string())
    }
}

impl SyncLedgerError {
    /// 是否为存储层错误（打开、加锁、写入），这类错误需要同步上报给调用方
    pub fn is_store_level(&self) -> bool {
        matches!(
            self,
            SyncLedgerError::KvStore(_) | SyncLedgerError::IO(_) | SyncLedgerError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncLedgerError>;
