//! Domain 模块
//!
//! 命名空间、CAIP 标识、连接器与账户等领域模型

pub mod account;
pub mod caip;
pub mod chain_namespace;
pub mod connector;

// 重新导出常用类型
pub use account::{AccountData, AccountState, AccountStatus, AccountType};
pub use caip::{presets, CaipAddress, CaipNetwork, CaipNetworkId, NativeCurrency, DEFAULT_NETWORKS};
pub use chain_namespace::{ChainNamespace, AUTH_CONNECTOR_SUPPORTED_CHAINS};
pub use connector::{
    Connector, ConnectorKind, SessionGroup, SessionScope, AUTH_CONNECTOR_ID,
    WALLET_CONNECT_CONNECTOR_ID,
};
