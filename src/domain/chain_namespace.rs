//! 链命名空间
//!
//! CAIP-2 命名空间标签，标识一个区块链家族，在所有映射中作为键使用。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppKitError;
use crate::utils::chain_normalizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainNamespace {
    /// EVM 系列 (Ethereum, Polygon, Arbitrum, Base ...)
    Eip155,
    Solana,
    /// Bitcoin
    Bip122,
    Polkadot,
    Cosmos,
    Sui,
    Stacks,
    Ton,
    Tron,
}

/// Auth（邮箱/社交登录）连接器支持的命名空间
pub const AUTH_CONNECTOR_SUPPORTED_CHAINS: &[ChainNamespace] =
    &[ChainNamespace::Eip155, ChainNamespace::Solana];

impl ChainNamespace {
    pub const ALL: [ChainNamespace; 9] = [
        ChainNamespace::Eip155,
        ChainNamespace::Solana,
        ChainNamespace::Bip122,
        ChainNamespace::Polkadot,
        ChainNamespace::Cosmos,
        ChainNamespace::Sui,
        ChainNamespace::Stacks,
        ChainNamespace::Ton,
        ChainNamespace::Tron,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eip155 => "eip155",
            Self::Solana => "solana",
            Self::Bip122 => "bip122",
            Self::Polkadot => "polkadot",
            Self::Cosmos => "cosmos",
            Self::Sui => "sui",
            Self::Stacks => "stacks",
            Self::Ton => "ton",
            Self::Tron => "tron",
        }
    }

    /// 是否在 Auth 连接器的白名单内
    pub fn is_auth_supported(&self) -> bool {
        AUTH_CONNECTOR_SUPPORTED_CHAINS.contains(self)
    }
}

impl fmt::Display for ChainNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainNamespace {
    type Err = AppKitError;

    /// 同时接受规范名称和常见别名（evm、bitcoin、sol ...）
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        chain_normalizer::normalize_namespace(s)
    }
}
