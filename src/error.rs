//! 错误定义模块
//!
//! 统一的错误分类：配置错误（启动时致命）、连接错误（走状态机失败事件）、
//! 网络不匹配错误（直接返回调用方）以及跨命名空间级联断开错误（尽力而为，最后汇总）。

use std::time::Duration;

use thiserror::Error;

use crate::domain::ChainNamespace;
use crate::service::connection_state_machine::ConnectionState;

/// 适配器（钱包库封装）返回的错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// 用户在钱包中拒绝了请求
    #[error("user rejected the request: {0}")]
    UserRejected(String),
    /// Provider 内部错误
    #[error("provider error: {0}")]
    Provider(String),
    /// 适配器不支持该操作或网络
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum AppKitError {
    // 配置错误
    #[error("project id is required")]
    MissingProjectId,
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("namespace {0} is already registered")]
    DuplicateNamespace(ChainNamespace),

    // 标识符错误
    #[error("unknown chain namespace: {0}")]
    UnknownNamespace(String),
    #[error("invalid CAIP identifier: {0}")]
    InvalidCaipId(String),

    // 控制器状态错误
    #[error("network {network} belongs to namespace {actual}, expected {expected}")]
    NamespaceMismatch {
        expected: ChainNamespace,
        actual: ChainNamespace,
        network: String,
    },
    #[error("namespace {0} is not registered")]
    NamespaceNotRegistered(ChainNamespace),
    #[error("no active namespace")]
    NoActiveNamespace,
    #[error("connector {0} not found")]
    ConnectorNotFound(String),
    #[error("connection for {namespace} is already {state}")]
    ConnectionInProgress {
        namespace: ChainNamespace,
        state: ConnectionState,
    },
    #[error("invalid state for {namespace}: expected {expected}, found {actual}")]
    InvalidState {
        namespace: ChainNamespace,
        expected: ConnectionState,
        actual: ConnectionState,
    },
    #[error("no pending network switch")]
    NoPendingSwitch,

    // 连接错误
    #[error("adapter error on {namespace}: {source}")]
    Adapter {
        namespace: ChainNamespace,
        #[source]
        source: AdapterError,
    },
    #[error("failed to disconnect {} namespace(s)", failures.len())]
    CascadeDisconnect {
        disconnected: Vec<ChainNamespace>,
        failures: Vec<(ChainNamespace, AdapterError)>,
    },

    // SIWX
    #[error("SIWX is not enabled")]
    SiwxDisabled,
    #[error("SIWX error: {0}")]
    Siwx(String),
    #[error("signature verification failed")]
    SignatureVerification,
    #[error("authentication timed out after {0:?}")]
    Timeout(Duration),

    // 基础设施
    #[error("storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppKitError>;

impl AppKitError {
    pub fn adapter(namespace: ChainNamespace, source: AdapterError) -> Self {
        Self::Adapter { namespace, source }
    }

    /// 机器可读的错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingProjectId => "missing_project_id",
            Self::Configuration(_) => "configuration_error",
            Self::DuplicateNamespace(_) => "duplicate_namespace",
            Self::UnknownNamespace(_) => "unknown_namespace",
            Self::InvalidCaipId(_) => "invalid_caip_id",
            Self::NamespaceMismatch { .. } => "namespace_mismatch",
            Self::NamespaceNotRegistered(_) => "namespace_not_registered",
            Self::NoActiveNamespace => "no_active_namespace",
            Self::ConnectorNotFound(_) => "connector_not_found",
            Self::ConnectionInProgress { .. } => "connection_in_progress",
            Self::InvalidState { .. } => "invalid_state",
            Self::NoPendingSwitch => "no_pending_switch",
            Self::Adapter { source, .. } => match source {
                AdapterError::UserRejected(_) => "user_rejected",
                AdapterError::Provider(_) => "provider_error",
                AdapterError::Unsupported(_) => "unsupported",
                AdapterError::Timeout(_) => "provider_timeout",
            },
            Self::CascadeDisconnect { .. } => "cascade_disconnect_failed",
            Self::SiwxDisabled => "siwx_disabled",
            Self::Siwx(_) => "siwx_error",
            Self::SignatureVerification => "invalid_signature",
            Self::Timeout(_) => "timeout",
            Self::Storage(_) => "storage_error",
            Self::Serialization(_) => "serialization_error",
            Self::Io(_) => "io_error",
        }
    }

    /// 转换为可展示给用户的提示
    ///
    /// 原始错误通过 `Display`/`source()` 保留用于诊断。
    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::Adapter {
                source: AdapterError::UserRejected(_),
                ..
            } => "Connection declined in the wallet".to_string(),
            Self::Adapter {
                source: AdapterError::Timeout(_),
                ..
            }
            | Self::Timeout(_) => "The wallet did not respond in time, please try again".to_string(),
            Self::Adapter { .. } => "Wallet connection failed, please try again".to_string(),
            Self::NamespaceMismatch { .. } => {
                "The wallet returned a network from a different chain".to_string()
            }
            Self::CascadeDisconnect { .. } => {
                "Some wallets could not be disconnected cleanly".to_string()
            }
            Self::SignatureVerification => "Error signing message".to_string(),
            Self::Siwx(_) | Self::SiwxDisabled => {
                "A problem occurred while trying to authenticate".to_string()
            }
            Self::MissingProjectId | Self::Configuration(_) => {
                "The application is misconfigured".to_string()
            }
            other => other.to_string(),
        }
    }

    /// 是否属于连接类错误（非致命，可重试）
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Adapter { .. } | Self::Timeout(_) | Self::SignatureVerification
        )
    }
}
