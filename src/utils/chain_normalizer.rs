//! 链命名空间标准化模块
//!
//! 统一命名空间标识符的解析：配置文件、环境变量、CAIP 标识符中出现的
//! 别名（evm、ethereum、bitcoin、sol ...）都映射到同一个 `ChainNamespace`。

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::domain::ChainNamespace;
use crate::error::AppKitError;

/// 命名空间别名配置
#[derive(Debug, Clone)]
pub struct NamespaceIdentifier {
    /// 规范名称（CAIP-2 命名空间）
    pub namespace: ChainNamespace,
    /// 显示名称
    pub display_name: &'static str,
    /// 别名列表（比较时忽略大小写）
    pub aliases: &'static [&'static str],
}

/// 别名注册表（静态初始化）
static NAMESPACE_REGISTRY: Lazy<HashMap<String, NamespaceIdentifier>> = Lazy::new(|| {
    let namespaces = vec![
        NamespaceIdentifier {
            namespace: ChainNamespace::Eip155,
            display_name: "EVM",
            aliases: &["evm", "ethereum", "eth"],
        },
        NamespaceIdentifier {
            namespace: ChainNamespace::Solana,
            display_name: "Solana",
            aliases: &["sol"],
        },
        NamespaceIdentifier {
            namespace: ChainNamespace::Bip122,
            display_name: "Bitcoin",
            aliases: &["bitcoin", "btc"],
        },
        NamespaceIdentifier {
            namespace: ChainNamespace::Polkadot,
            display_name: "Polkadot",
            aliases: &["dot"],
        },
        NamespaceIdentifier {
            namespace: ChainNamespace::Cosmos,
            display_name: "Cosmos",
            aliases: &["atom"],
        },
        NamespaceIdentifier {
            namespace: ChainNamespace::Sui,
            display_name: "Sui",
            aliases: &[],
        },
        NamespaceIdentifier {
            namespace: ChainNamespace::Stacks,
            display_name: "Stacks",
            aliases: &["stx"],
        },
        NamespaceIdentifier {
            namespace: ChainNamespace::Ton,
            display_name: "TON",
            aliases: &["the-open-network"],
        },
        NamespaceIdentifier {
            namespace: ChainNamespace::Tron,
            display_name: "Tron",
            aliases: &["trx"],
        },
    ];

    let mut registry = HashMap::new();
    for ns in namespaces {
        // 注册规范名称
        registry.insert(ns.namespace.as_str().to_string(), ns.clone());

        // 注册所有别名
        for alias in ns.aliases {
            registry.insert(alias.to_string(), ns.clone());
        }
    }

    registry
});

/// 标准化命名空间标识符
///
/// ```rust
/// # use appkit_core::utils::chain_normalizer::normalize_namespace;
/// # use appkit_core::domain::ChainNamespace;
/// assert_eq!(normalize_namespace("EVM").unwrap(), ChainNamespace::Eip155);
/// assert_eq!(normalize_namespace("bip122").unwrap(), ChainNamespace::Bip122);
/// ```
pub fn normalize_namespace(input: &str) -> Result<ChainNamespace, AppKitError> {
    let key = input.trim().to_ascii_lowercase();

    if key.is_empty() {
        return Err(AppKitError::UnknownNamespace(input.to_string()));
    }

    NAMESPACE_REGISTRY
        .get(&key)
        .map(|ns| ns.namespace)
        .ok_or_else(|| AppKitError::UnknownNamespace(input.trim().to_string()))
}

/// 获取命名空间的显示名称
pub fn display_name(namespace: ChainNamespace) -> &'static str {
    NAMESPACE_REGISTRY
        .get(namespace.as_str())
        .map(|ns| ns.display_name)
        .unwrap_or("Unknown")
}
