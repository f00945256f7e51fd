//! 连接器模型
//!
//! 连接器类型是封闭的枚举；每种类型必须声明自己的会话作用域，
//! 新增类型时编译器会强制补全 `session_scope` 的匹配分支。

use serde::{Deserialize, Serialize};

use crate::domain::ChainNamespace;

/// WalletConnect 连接器 id
pub const WALLET_CONNECT_CONNECTOR_ID: &str = "walletConnect";
/// Auth（邮箱/社交登录）连接器 id
pub const AUTH_CONNECTOR_ID: &str = "ID_AUTH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorKind {
    WalletConnect,
    /// 浏览器注入的 provider（window.ethereum 等）
    Injected,
    /// EIP-6963 广播的 provider
    Announced,
    Auth,
    External,
    /// 同一个钱包对象同时驱动多个命名空间，但每个命名空间独立连接
    MultiChain,
}

/// 跨命名空间共享底层会话的分组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionGroup {
    WalletConnect,
    Auth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionScope {
    /// 断开任意一个成员命名空间都必须断开整个分组
    Shared(SessionGroup),
    /// 每个命名空间独立
    Isolated,
}

impl ConnectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::WalletConnect => "WALLET_CONNECT",
            ConnectorKind::Injected => "INJECTED",
            ConnectorKind::Announced => "ANNOUNCED",
            ConnectorKind::Auth => "AUTH",
            ConnectorKind::External => "EXTERNAL",
            ConnectorKind::MultiChain => "MULTI_CHAIN",
        }
    }

    pub fn session_scope(&self) -> SessionScope {
        match self {
            ConnectorKind::WalletConnect => SessionScope::Shared(SessionGroup::WalletConnect),
            ConnectorKind::Auth => SessionScope::Shared(SessionGroup::Auth),
            ConnectorKind::Injected
            | ConnectorKind::Announced
            | ConnectorKind::External
            | ConnectorKind::MultiChain => SessionScope::Isolated,
        }
    }
}

impl SessionScope {
    /// 注册表中找不到连接器描述时，按约定的 id 推断作用域
    pub fn from_connector_id(connector_id: &str) -> Self {
        match connector_id {
            WALLET_CONNECT_CONNECTOR_ID => SessionScope::Shared(SessionGroup::WalletConnect),
            AUTH_CONNECTOR_ID => SessionScope::Shared(SessionGroup::Auth),
            _ => SessionScope::Isolated,
        }
    }

    pub fn group(&self) -> Option<SessionGroup> {
        match self {
            SessionScope::Shared(group) => Some(*group),
            SessionScope::Isolated => None,
        }
    }
}

/// 连接方式描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connector {
    pub id: String,
    pub name: String,
    pub kind: ConnectorKind,
    /// 该连接器可以驱动的命名空间
    pub chains: Vec<ChainNamespace>,
    pub explorer_id: Option<String>,
    pub image_url: Option<String>,
}

impl Connector {
    pub fn new(id: &str, name: &str, kind: ConnectorKind, chains: Vec<ChainNamespace>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            chains,
            explorer_id: None,
            image_url: None,
        }
    }

    pub fn wallet_connect(chains: Vec<ChainNamespace>) -> Self {
        Self::new(
            WALLET_CONNECT_CONNECTOR_ID,
            "WalletConnect",
            ConnectorKind::WalletConnect,
            chains,
        )
    }

    /// Auth 连接器只覆盖白名单内的命名空间
    pub fn auth() -> Self {
        Self::new(
            AUTH_CONNECTOR_ID,
            "Auth",
            ConnectorKind::Auth,
            crate::domain::AUTH_CONNECTOR_SUPPORTED_CHAINS.to_vec(),
        )
    }

    pub fn injected(id: &str, name: &str, namespace: ChainNamespace) -> Self {
        Self::new(id, name, ConnectorKind::Injected, vec![namespace])
    }

    pub fn with_explorer_id(mut self, explorer_id: &str) -> Self {
        self.explorer_id = Some(explorer_id.to_string());
        self
    }

    pub fn supports(&self, namespace: ChainNamespace) -> bool {
        self.chains.contains(&namespace)
    }

    pub fn session_scope(&self) -> SessionScope {
        self.kind.session_scope()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_scope_per_kind() {
        assert_eq!(
            ConnectorKind::WalletConnect.session_scope(),
            SessionScope::Shared(SessionGroup::WalletConnect)
        );
        assert_eq!(
            ConnectorKind::Auth.session_scope(),
            SessionScope::Shared(SessionGroup::Auth)
        );
        assert_eq!(ConnectorKind::Injected.session_scope(), SessionScope::Isolated);
        assert_eq!(ConnectorKind::MultiChain.session_scope(), SessionScope::Isolated);
    }

    #[test]
    fn test_scope_from_well_known_ids() {
        assert_eq!(
            SessionScope::from_connector_id("walletConnect").group(),
            Some(SessionGroup::WalletConnect)
        );
        assert_eq!(
            SessionScope::from_connector_id("ID_AUTH").group(),
            Some(SessionGroup::Auth)
        );
        assert_eq!(SessionScope::from_connector_id("io.metamask").group(), None);
    }

    #[test]
    fn test_auth_connector_chains() {
        let auth = Connector::auth();
        assert!(auth.supports(ChainNamespace::Eip155));
        assert!(auth.supports(ChainNamespace::Solana));
        assert!(!auth.supports(ChainNamespace::Bip122));
    }
}
