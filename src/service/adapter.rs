//! 链适配器接口
//!
//! 每个区块链家族（EVM、Solana、Bitcoin、Tron ...）实现同一组能力，
//! 核心只通过这个 trait 与具体钱包库交互。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AccountType, CaipNetwork, CaipNetworkId, ChainNamespace, ConnectorKind};
use crate::error::AdapterError;
use crate::infrastructure::ProviderEventSender;

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    pub connector_id: String,
    pub connector_kind: ConnectorKind,
    /// 期望连接的网络，None 表示由钱包决定
    pub chain_id: Option<CaipNetworkId>,
    pub rpc_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResult {
    pub address: String,
    pub chain_id: CaipNetworkId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAddress {
    pub address: String,
    pub account_type: AccountType,
    pub public_key: Option<String>,
}

impl AccountAddress {
    pub fn eoa(address: &str) -> Self {
        Self {
            address: address.to_string(),
            account_type: AccountType::Eoa,
            public_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConnectionParams {
    pub connector_id: String,
    pub namespace: ChainNamespace,
    pub chain_id: Option<CaipNetworkId>,
}

/// 恢复已有连接的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionResult {
    pub address: String,
    pub chain_id: CaipNetworkId,
    pub accounts: Vec<AccountAddress>,
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn namespace(&self) -> ChainNamespace;

    async fn connect(&self, params: ConnectParams) -> AdapterResult<ConnectResult>;

    async fn disconnect(&self) -> AdapterResult<()>;

    async fn get_accounts(&self) -> AdapterResult<Vec<AccountAddress>>;

    async fn sync_connection(&self, params: SyncConnectionParams)
        -> AdapterResult<ConnectionResult>;

    async fn switch_network(&self, network: &CaipNetwork) -> AdapterResult<()>;

    /// 返回签名（EVM 为 0x 前缀十六进制，Solana 为 base58）
    async fn sign_message(&self, message: &str, address: &str) -> AdapterResult<String>;

    /// 注册 provider 事件（accountsChanged / chainChanged / disconnect）
    fn bind_events(&self, _sender: ProviderEventSender) {}
}
