//! 翻译模块统一错误处理
//!
//! 按配置、传输、空结果、存储四大类划分错误，并提供可重试性
//! 与严重程度判断。存储类错误在缓存层内部消化，不会传播到翻译调用方。

use thiserror::Error;

/// 翻译错误类型
#[derive(Error, Debug, Clone)]
pub enum TranslationError {
    /// 配置错误：缺失或非法的后端/密钥，任何翻译尝试前即失败
    #[error("配置错误: {0}")]
    Config(String),

    /// 网络错误：连接失败、响应读取失败等
    #[error("网络错误: {0}")]
    Network(String),

    /// HTTP 状态错误：非 2xx 响应，携带状态码与响应体
    #[error("HTTP 错误 {status}: {body}")]
    Http { status: u16, body: String },

    /// 超时错误：请求超出时限并被中止
    #[error("操作超时: {0}")]
    Timeout(String),

    /// 空翻译错误：后端返回成功但没有可用的译文
    #[error("翻译结果为空")]
    EmptyTranslation,

    /// 解析错误：后端响应无法解析为预期结构
    #[error("响应解析失败: {0}")]
    Parse(String),

    /// 存储错误：缓存持久化失败（配额、序列化等）
    #[error("存储错误: {0}")]
    Storage(String),

    /// 输入验证错误
    #[error("输入无效: {0}")]
    Invalid(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl TranslationError {
    /// 检查错误是否可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            TranslationError::Network(_) => true,
            TranslationError::Timeout(_) => true,
            TranslationError::Http { status, .. } => *status >= 500 || *status == 429,
            TranslationError::EmptyTranslation => true,
            TranslationError::Parse(_) => false,
            TranslationError::Storage(_) => true,
            TranslationError::Config(_) => false,
            TranslationError::Invalid(_) => false,
            TranslationError::Internal(_) => false,
        }
    }

    /// 是否属于传输类失败（批次调用方对这类错误统一回退为原文）
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            TranslationError::Network(_)
                | TranslationError::Http { .. }
                | TranslationError::Timeout(_)
                | TranslationError::EmptyTranslation
                | TranslationError::Parse(_)
        )
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TranslationError::Config(_) => ErrorSeverity::Critical,
            TranslationError::Network(_) => ErrorSeverity::Warning,
            TranslationError::Http { .. } => ErrorSeverity::Warning,
            TranslationError::Timeout(_) => ErrorSeverity::Warning,
            TranslationError::EmptyTranslation => ErrorSeverity::Warning,
            TranslationError::Parse(_) => ErrorSeverity::Error,
            TranslationError::Storage(_) => ErrorSeverity::Warning,
            TranslationError::Invalid(_) => ErrorSeverity::Info,
            TranslationError::Internal(_) => ErrorSeverity::Critical,
        }
    }
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl From<reqwest::Error> for TranslationError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TranslationError::Timeout(error.to_string())
        } else if error.is_decode() {
            TranslationError::Parse(error.to_string())
        } else {
            TranslationError::Network(error.to_string())
        }
    }
}

impl From<serde_json::Error> for TranslationError {
    fn from(error: serde_json::Error) -> Self {
        TranslationError::Storage(format!("JSON序列化错误: {}", error))
    }
}

impl From<toml::de::Error> for TranslationError {
    fn from(error: toml::de::Error) -> Self {
        TranslationError::Config(format!("TOML解析错误: {}", error))
    }
}

impl From<config::ConfigError> for TranslationError {
    fn from(error: config::ConfigError) -> Self {
        TranslationError::Config(error.to_string())
    }
}

impl From<std::io::Error> for TranslationError {
    fn from(error: std::io::Error) -> Self {
        TranslationError::Internal(format!("IO错误: {}", error))
    }
}

impl From<tokio::time::error::Elapsed> for TranslationError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        TranslationError::Timeout(error.to_string())
    }
}

/// 错误结果类型别名
pub type TranslationResult<T> = Result<T, TranslationError>;

/// 记录错误日志并原样返回
pub fn log_error<T>(error: TranslationError) -> TranslationResult<T> {
    match error.severity() {
        ErrorSeverity::Info => tracing::info!("翻译信息: {}", error),
        ErrorSeverity::Warning => tracing::warn!("翻译警告: {}", error),
        ErrorSeverity::Error => tracing::error!("翻译错误: {}", error),
        ErrorSeverity::Critical => tracing::error!("翻译严重错误: {}", error),
    }

    Err(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TranslationError::Network("断开".into()).is_retryable());
        assert!(TranslationError::Timeout("10s".into()).is_retryable());
        assert!(!TranslationError::Config("缺少密钥".into()).is_retryable());
        assert!(TranslationError::Http { status: 503, body: String::new() }.is_retryable());
        assert!(!TranslationError::Http { status: 401, body: String::new() }.is_retryable());
    }

    #[test]
    fn test_transport_classification() {
        assert!(TranslationError::EmptyTranslation.is_transport());
        assert!(TranslationError::Http { status: 404, body: String::new() }.is_transport());
        assert!(!TranslationError::Storage("配额".into()).is_transport());
        assert!(!TranslationError::Config("无后端".into()).is_transport());
    }
}
