use domain::{DomainError, RepositoryError};
use thiserror::Error;

/// 应用层错误
///
/// 校验、不存在与存储故障会同步返回给调用方。下游故障（断路器断开、重试耗尽）
/// 只出现在后台任务里，以 `DependencyError` 记录日志，不会返回给调用方。
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("position not found")]
    NotFound,
    #[error("store fault: {0}")]
    Store(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => ApplicationError::NotFound,
            RepositoryError::Storage { message } => ApplicationError::Store(message),
        }
    }
}

/// 外部依赖（配送服务、事件总线）调用失败
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DependencyError {
    /// 暂时不可用，可以重试
    #[error("dependency unavailable: {0}")]
    Unavailable(String),
    /// 依赖明确拒绝了请求，重试无意义
    #[error("dependency rejected request: {0}")]
    Rejected(String),
    #[error("dependency call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl DependencyError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}
