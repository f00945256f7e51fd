//! 网络切换协调器
//!
//! 决策顺序：
//! 1. 目标即当前活跃网络：不做任何事
//! 2. 调用方要求跳过确认，或当前通过 Auth 连接器连接且目标命名空间在 Auth 白名单内：直接切换
//! 3. 当前命名空间已连接、目标是另一个尚未连接的命名空间：需要用户确认并重新连接
//! 4. 其它情况：标准的切换网络确认流程

use serde::{Deserialize, Serialize};

use crate::domain::CaipNetwork;
use crate::service::chain_controller::ChainController;
use crate::service::connector_registry::ConnectorRegistry;
use crate::service::router::RouterView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchDecision {
    NoOp,
    SwitchImmediately,
    ConfirmNamespaceSwitch,
    ConfirmNetworkSwitch,
}

impl SwitchDecision {
    /// 该决策对应的路由视图
    pub fn view(&self) -> Option<RouterView> {
        match self {
            SwitchDecision::NoOp => None,
            SwitchDecision::SwitchImmediately | SwitchDecision::ConfirmNetworkSwitch => {
                Some(RouterView::SwitchNetwork)
            }
            SwitchDecision::ConfirmNamespaceSwitch => Some(RouterView::SwitchActiveChain),
        }
    }

    pub fn requires_confirmation(&self) -> bool {
        matches!(
            self,
            SwitchDecision::ConfirmNamespaceSwitch | SwitchDecision::ConfirmNetworkSwitch
        )
    }
}

pub struct NetworkSwitchCoordinator;

impl NetworkSwitchCoordinator {
    pub fn decide(
        controller: &ChainController,
        registry: &ConnectorRegistry,
        target: &CaipNetwork,
        ignore_switch_confirmation: bool,
    ) -> SwitchDecision {
        if controller
            .active_caip_network()
            .is_some_and(|active| active.is_same_network(target))
        {
            return SwitchDecision::NoOp;
        }

        let current = controller.active_namespace();
        let target_namespace = target.chain_namespace;

        let auth_switch = current.is_some_and(|ns| registry.is_auth_connected(ns))
            && registry.auth_supports(target_namespace);
        if ignore_switch_confirmation || auth_switch {
            return SwitchDecision::SwitchImmediately;
        }

        let current_connected = current.is_some_and(|ns| controller.is_connected(ns));
        if current_connected
            && current != Some(target_namespace)
            && !controller.is_connected(target_namespace)
        {
            return SwitchDecision::ConfirmNamespaceSwitch;
        }

        SwitchDecision::ConfirmNetworkSwitch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{presets, ChainNamespace};
    use crate::service::test_support::controller_with;

    fn connect(controller: &mut ChainController, caip_address: &str) {
        let address: crate::domain::CaipAddress = caip_address.parse().unwrap();
        let namespace = address.network().namespace();
        controller
            .set_account_connected(namespace, address, vec![])
            .unwrap();
    }

    #[test]
    fn test_same_network_is_noop() {
        let controller = controller_with(&[ChainNamespace::Eip155]);
        let registry = ConnectorRegistry::new();
        let decision =
            NetworkSwitchCoordinator::decide(&controller, &registry, &presets::mainnet(), true);
        assert_eq!(decision, SwitchDecision::NoOp);
        assert_eq!(decision.view(), None);
    }

    #[test]
    fn test_ignore_confirmation_switches_immediately() {
        let controller = controller_with(&[ChainNamespace::Eip155]);
        let registry = ConnectorRegistry::new();
        assert_eq!(
            NetworkSwitchCoordinator::decide(&controller, &registry, &presets::polygon(), true),
            SwitchDecision::SwitchImmediately
        );
    }

    #[test]
    fn test_auth_connector_bypasses_confirmation_for_allowlisted_namespace() {
        let mut controller = controller_with(&[ChainNamespace::Eip155, ChainNamespace::Solana]);
        let mut registry = ConnectorRegistry::new();
        connect(&mut controller, "eip155:1:0xabc");
        registry.set_connector_id(ChainNamespace::Eip155, "ID_AUTH");

        assert_eq!(
            NetworkSwitchCoordinator::decide(&controller, &registry, &presets::solana(), false),
            SwitchDecision::SwitchImmediately
        );
    }

    #[test]
    fn test_auth_connector_outside_allowlist_needs_confirmation() {
        let mut controller = controller_with(&[ChainNamespace::Eip155, ChainNamespace::Bip122]);
        let mut registry = ConnectorRegistry::new();
        connect(&mut controller, "eip155:1:0xabc");
        registry.set_connector_id(ChainNamespace::Eip155, "ID_AUTH");

        assert_eq!(
            NetworkSwitchCoordinator::decide(&controller, &registry, &presets::bitcoin(), false),
            SwitchDecision::ConfirmNamespaceSwitch
        );
    }

    #[test]
    fn test_registered_auth_connector_chains_take_precedence() {
        let mut controller = controller_with(&[ChainNamespace::Eip155, ChainNamespace::Solana]);
        let mut registry = ConnectorRegistry::new();
        registry.add_connector(crate::domain::Connector::new(
            "ID_AUTH",
            "Auth",
            crate::domain::ConnectorKind::Auth,
            vec![ChainNamespace::Eip155],
        ));
        connect(&mut controller, "eip155:1:0xabc");
        registry.set_connector_id(ChainNamespace::Eip155, "ID_AUTH");

        assert_eq!(
            NetworkSwitchCoordinator::decide(&controller, &registry, &presets::solana(), false),
            SwitchDecision::ConfirmNamespaceSwitch
        );
    }

    #[test]
    fn test_new_namespace_requires_namespace_confirmation() {
        let mut controller = controller_with(&[ChainNamespace::Eip155, ChainNamespace::Solana]);
        let mut registry = ConnectorRegistry::new();
        connect(&mut controller, "eip155:1:0xabc");
        registry.set_connector_id(ChainNamespace::Eip155, "io.metamask");

        let decision =
            NetworkSwitchCoordinator::decide(&controller, &registry, &presets::solana(), false);
        assert_eq!(decision, SwitchDecision::ConfirmNamespaceSwitch);
        assert_eq!(decision.view(), Some(RouterView::SwitchActiveChain));
    }

    #[test]
    fn test_connected_target_namespace_uses_standard_flow() {
        let mut controller = controller_with(&[ChainNamespace::Eip155, ChainNamespace::Solana]);
        let mut registry = ConnectorRegistry::new();
        connect(&mut controller, "eip155:1:0xabc");
        connect(
            &mut controller,
            "solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp:7S3P4HxJpyyigGzodYwHtCxZyUQe9JiBMHyRWXArAaKv",
        );
        registry.set_connector_id(ChainNamespace::Eip155, "io.metamask");
        registry.set_connector_id(ChainNamespace::Solana, "phantom");

        assert_eq!(
            NetworkSwitchCoordinator::decide(&controller, &registry, &presets::solana(), false),
            SwitchDecision::ConfirmNetworkSwitch
        );
    }

    #[test]
    fn test_same_namespace_uses_standard_flow() {
        let mut controller = controller_with(&[ChainNamespace::Eip155]);
        let mut registry = ConnectorRegistry::new();
        connect(&mut controller, "eip155:1:0xabc");
        registry.set_connector_id(ChainNamespace::Eip155, "walletConnect");

        let decision =
            NetworkSwitchCoordinator::decide(&controller, &registry, &presets::arbitrum(), false);
        assert_eq!(decision, SwitchDecision::ConfirmNetworkSwitch);
        assert!(decision.requires_confirmation());
    }
}
