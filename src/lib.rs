//! AppKit Core - 多链钱包连接核心
//!
//! 每个命名空间一个连接状态机，链控制器统一维护命名空间、网络、账户与连接器，
//! 网络切换协调器决定是否需要用户确认，SIWX 关卡负责可选的签名认证。

pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use client::AppKit;
pub use config::Config;
pub use error::{AdapterError, AppKitError, Result};

pub mod prelude {
    pub use crate::{
        client::AppKit,
        config::Config,
        domain::{
            presets, CaipAddress, CaipNetwork, CaipNetworkId, ChainNamespace, Connector,
            ConnectorKind,
        },
        error::{AdapterError, AppKitError, Result},
        infrastructure::{ProviderEvent, StateChange},
        service::{
            siwx::{SiwxClient, SiwxSession},
            ChainAdapter, ConnectionState, RouterView, SwitchDecision,
        },
    };
}
