//! Service 模块
//!
//! 连接状态机、链控制器、网络切换协调与 SIWX 认证

pub mod adapter;
pub mod chain_controller;
pub mod connection_state_machine;
pub mod connector_registry;
pub mod network_switch;
pub mod router;
pub mod siwx;

#[cfg(test)]
pub(crate) mod test_support;

pub use adapter::{
    AccountAddress, AdapterResult, ChainAdapter, ConnectParams, ConnectResult, ConnectionResult,
    SyncConnectionParams,
};
pub use chain_controller::{ChainController, NamespaceEntry, NetworkSwitchPlan};
pub use connection_state_machine::{
    ConnectionContext, ConnectionEvent, ConnectionRecord, ConnectionState, ConnectionStateMachine,
    StateTransition,
};
pub use connector_registry::ConnectorRegistry;
pub use network_switch::{NetworkSwitchCoordinator, SwitchDecision};
pub use router::{RouterController, RouterView};
