//! CAIP 标识符与网络定义
//!
//! - CAIP-2 网络标识：`namespace:reference`（例如 `eip155:1`）
//! - CAIP-10 账户标识：`namespace:reference:address`
//!
//! `CaipNetwork` 来自配置，构造后不可变。

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::ChainNamespace;
use crate::error::AppKitError;

static CAIP2_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([-a-z0-9]{3,8}):([-_a-zA-Z0-9]{1,32})$").expect("valid CAIP-2 regex")
});

/// CAIP 标识符中的命名空间必须是规范名称，不接受别名
fn parse_canonical_namespace(s: &str) -> Result<ChainNamespace, AppKitError> {
    ChainNamespace::ALL
        .into_iter()
        .find(|ns| ns.as_str() == s)
        .ok_or_else(|| AppKitError::UnknownNamespace(s.to_string()))
}

/// CAIP-2 网络标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CaipNetworkId {
    namespace: ChainNamespace,
    reference: String,
}

impl CaipNetworkId {
    pub fn new(namespace: ChainNamespace, reference: impl Into<String>) -> Result<Self, AppKitError> {
        format!("{}:{}", namespace, reference.into()).parse()
    }

    pub fn namespace(&self) -> ChainNamespace {
        self.namespace
    }

    /// 链内引用（EVM 为 chain id，Solana/Bitcoin 为创世哈希前缀）
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl fmt::Display for CaipNetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

impl FromStr for CaipNetworkId {
    type Err = AppKitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = CAIP2_REGEX
            .captures(s.trim())
            .ok_or_else(|| AppKitError::InvalidCaipId(s.to_string()))?;

        Ok(Self {
            namespace: parse_canonical_namespace(&caps[1])?,
            reference: caps[2].to_string(),
        })
    }
}

impl TryFrom<String> for CaipNetworkId {
    type Error = AppKitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CaipNetworkId> for String {
    fn from(value: CaipNetworkId) -> Self {
        value.to_string()
    }
}

/// CAIP-10 账户标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CaipAddress {
    network: CaipNetworkId,
    address: String,
}

impl CaipAddress {
    pub fn new(network: CaipNetworkId, address: impl Into<String>) -> Self {
        Self {
            network,
            address: address.into(),
        }
    }

    pub fn network(&self) -> &CaipNetworkId {
        &self.network
    }

    /// 去掉 CAIP 前缀的纯地址
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for CaipAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.network, self.address)
    }
}

impl FromStr for CaipAddress {
    type Err = AppKitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(reference), Some(address)) if !address.is_empty() => Ok(Self {
                network: format!("{}:{}", ns, reference).parse()?,
                address: address.to_string(),
            }),
            _ => Err(AppKitError::InvalidCaipId(s.to_string())),
        }
    }
}

impl TryFrom<String> for CaipAddress {
    type Error = AppKitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CaipAddress> for String {
    fn from(value: CaipAddress) -> Self {
        value.to_string()
    }
}

/// 原生代币
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl NativeCurrency {
    pub fn new(name: &str, symbol: &str, decimals: u8) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            decimals,
        }
    }
}

/// 网络描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaipNetwork {
    /// 链内 id（与 `caip_network_id.reference()` 相同）
    pub id: String,
    pub caip_network_id: CaipNetworkId,
    pub chain_namespace: ChainNamespace,
    pub name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_url: Option<String>,
    pub testnet: bool,
}

impl CaipNetwork {
    pub fn new(
        namespace: ChainNamespace,
        reference: &str,
        name: &str,
        native_currency: NativeCurrency,
    ) -> Result<Self, AppKitError> {
        let caip_network_id = CaipNetworkId::new(namespace, reference)?;
        Ok(Self {
            id: caip_network_id.reference().to_string(),
            caip_network_id,
            chain_namespace: namespace,
            name: name.to_string(),
            native_currency,
            rpc_urls: Vec::new(),
            block_explorer_url: None,
            testnet: false,
        })
    }

    pub fn with_rpc_url(mut self, url: &str) -> Self {
        self.rpc_urls.push(url.to_string());
        self
    }

    pub fn with_block_explorer(mut self, url: &str) -> Self {
        self.block_explorer_url = Some(url.to_string());
        self
    }

    pub fn as_testnet(mut self) -> Self {
        self.testnet = true;
        self
    }

    /// 两个网络是否指向同一条链
    pub fn is_same_network(&self, other: &CaipNetwork) -> bool {
        self.caip_network_id == other.caip_network_id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 内置网络
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn preset(
    namespace: ChainNamespace,
    reference: &str,
    name: &str,
    currency: NativeCurrency,
    rpc_url: &str,
    explorer: &str,
) -> CaipNetwork {
    CaipNetwork {
        id: reference.to_string(),
        caip_network_id: CaipNetworkId {
            namespace,
            reference: reference.to_string(),
        },
        chain_namespace: namespace,
        name: name.to_string(),
        native_currency: currency,
        rpc_urls: vec![rpc_url.to_string()],
        block_explorer_url: Some(explorer.to_string()),
        testnet: false,
    }
}

pub mod presets {
    use super::*;

    pub fn mainnet() -> CaipNetwork {
        preset(
            ChainNamespace::Eip155,
            "1",
            "Ethereum",
            NativeCurrency::new("Ether", "ETH", 18),
            "https://cloudflare-eth.com",
            "https://etherscan.io",
        )
    }

    pub fn sepolia() -> CaipNetwork {
        preset(
            ChainNamespace::Eip155,
            "11155111",
            "Sepolia",
            NativeCurrency::new("Sepolia Ether", "ETH", 18),
            "https://rpc.sepolia.org",
            "https://sepolia.etherscan.io",
        )
        .as_testnet()
    }

    pub fn polygon() -> CaipNetwork {
        preset(
            ChainNamespace::Eip155,
            "137",
            "Polygon",
            NativeCurrency::new("POL", "POL", 18),
            "https://polygon-rpc.com",
            "https://polygonscan.com",
        )
    }

    pub fn arbitrum() -> CaipNetwork {
        preset(
            ChainNamespace::Eip155,
            "42161",
            "Arbitrum One",
            NativeCurrency::new("Ether", "ETH", 18),
            "https://arb1.arbitrum.io/rpc",
            "https://arbiscan.io",
        )
    }

    pub fn base() -> CaipNetwork {
        preset(
            ChainNamespace::Eip155,
            "8453",
            "Base",
            NativeCurrency::new("Ether", "ETH", 18),
            "https://mainnet.base.org",
            "https://basescan.org",
        )
    }

    pub fn solana() -> CaipNetwork {
        preset(
            ChainNamespace::Solana,
            "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp",
            "Solana",
            NativeCurrency::new("Solana", "SOL", 9),
            "https://api.mainnet-beta.solana.com",
            "https://solscan.io",
        )
    }

    pub fn solana_devnet() -> CaipNetwork {
        preset(
            ChainNamespace::Solana,
            "EtWTRABZaYq6iMfeYKouRu166VU2xqa1",
            "Solana Devnet",
            NativeCurrency::new("Solana", "SOL", 9),
            "https://api.devnet.solana.com",
            "https://solscan.io/?cluster=devnet",
        )
        .as_testnet()
    }

    pub fn bitcoin() -> CaipNetwork {
        preset(
            ChainNamespace::Bip122,
            "000000000019d6689c085ae165831e93",
            "Bitcoin",
            NativeCurrency::new("Bitcoin", "BTC", 8),
            "https://blockstream.info/api",
            "https://mempool.space",
        )
    }

    pub fn bitcoin_testnet() -> CaipNetwork {
        preset(
            ChainNamespace::Bip122,
            "000000000933ea01ad0ee984209779ba",
            "Bitcoin Testnet",
            NativeCurrency::new("Bitcoin", "BTC", 8),
            "https://blockstream.info/testnet/api",
            "https://mempool.space/testnet",
        )
        .as_testnet()
    }

    pub fn polkadot() -> CaipNetwork {
        preset(
            ChainNamespace::Polkadot,
            "91b171bb158e2d3848fa23a9f1c25182",
            "Polkadot",
            NativeCurrency::new("Polkadot", "DOT", 10),
            "wss://rpc.polkadot.io",
            "https://polkadot.subscan.io",
        )
    }

    pub fn tron() -> CaipNetwork {
        preset(
            ChainNamespace::Tron,
            "0x2b6653dc",
            "Tron",
            NativeCurrency::new("Tron", "TRX", 6),
            "https://api.trongrid.io",
            "https://tronscan.org",
        )
    }
}

/// 全部内置网络
pub static DEFAULT_NETWORKS: Lazy<Vec<CaipNetwork>> = Lazy::new(|| {
    vec![
        presets::mainnet(),
        presets::sepolia(),
        presets::polygon(),
        presets::arbitrum(),
        presets::base(),
        presets::solana(),
        presets::solana_devnet(),
        presets::bitcoin(),
        presets::bitcoin_testnet(),
        presets::polkadot(),
        presets::tron(),
    ]
});

/// 按 CAIP-2 标识查找内置网络
pub fn find_preset(id: &CaipNetworkId) -> Option<CaipNetwork> {
    DEFAULT_NETWORKS
        .iter()
        .find(|network| &network.caip_network_id == id)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_caip_network_id() {
        let id: CaipNetworkId = "eip155:1".parse().unwrap();
        assert_eq!(id.namespace(), ChainNamespace::Eip155);
        assert_eq!(id.reference(), "1");
        assert_eq!(id.to_string(), "eip155:1");
    }

    #[test]
    fn test_reject_invalid_caip_ids() {
        assert!("eip155".parse::<CaipNetworkId>().is_err());
        assert!("EIP155:1".parse::<CaipNetworkId>().is_err());
        assert!("evm:1".parse::<CaipNetworkId>().is_err());
        assert!("eip155:".parse::<CaipNetworkId>().is_err());
    }

    #[test]
    fn test_parse_caip_address() {
        let addr: CaipAddress = "eip155:1:0xabc".parse().unwrap();
        assert_eq!(addr.address(), "0xabc");
        assert_eq!(addr.network().to_string(), "eip155:1");
        assert!("eip155:1".parse::<CaipAddress>().is_err());
    }

    #[test]
    fn test_caip_network_id_serde_as_string() {
        let id: CaipNetworkId = "solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp\"");
        let back: CaipNetworkId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_presets_are_valid_caip_ids() {
        for network in DEFAULT_NETWORKS.iter() {
            let reparsed: CaipNetworkId = network.caip_network_id.to_string().parse().unwrap();
            assert_eq!(reparsed, network.caip_network_id);
            assert_eq!(network.id, reparsed.reference());
        }
    }

    #[test]
    fn test_find_preset() {
        let id: CaipNetworkId = "bip122:000000000019d6689c085ae165831e93".parse().unwrap();
        assert_eq!(find_preset(&id).unwrap().name, "Bitcoin");
        let unknown: CaipNetworkId = "eip155:999999".parse().unwrap();
        assert!(find_preset(&unknown).is_none());
    }
}
