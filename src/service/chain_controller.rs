//! 多命名空间链控制器
//!
//! 每个命名空间对应一个适配器条目（活跃网络、账户状态、适配器引用）。
//! 所有修改都经过控制器方法完成，UI 只能从这里判断命名空间是否已连接。

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::domain::{
    AccountData, AccountState, AccountStatus, AccountType, CaipAddress, CaipNetwork,
    CaipNetworkId, ChainNamespace, SessionScope,
};
use crate::error::{AppKitError, Result};
use crate::infrastructure::{StateChange, StateNotifier};
use crate::service::adapter::ChainAdapter;
use crate::service::connector_registry::ConnectorRegistry;

/// 单个命名空间的状态
pub struct NamespaceEntry {
    pub namespace: ChainNamespace,
    pub adapter: Arc<dyn ChainAdapter>,
    /// 应用请求的网络（按配置顺序）
    pub networks: Vec<CaipNetwork>,
    pub network_state: Option<CaipNetwork>,
    pub account_state: Option<AccountState>,
    pub preferred_account_type: AccountType,
    /// 钱包批准的网络（WalletConnect 会话返回）
    pub approved_caip_network_ids: Vec<CaipNetworkId>,
    pub supports_all_networks: bool,
}

fn ensure_namespace(namespace: ChainNamespace, network: &CaipNetwork) -> Result<()> {
    let actual = if network.chain_namespace != namespace {
        network.chain_namespace
    } else {
        network.caip_network_id.namespace()
    };

    if actual != namespace {
        return Err(AppKitError::NamespaceMismatch {
            expected: namespace,
            actual,
            network: network.caip_network_id.to_string(),
        });
    }
    Ok(())
}

/// 一次网络切换：先在读锁下生成，钱包确认后再持写锁提交
pub struct NetworkSwitchPlan {
    pub network: CaipNetwork,
    adapter: Arc<dyn ChainAdapter>,
    connected: bool,
    base: Option<CaipNetworkId>,
}

impl NetworkSwitchPlan {
    /// 请求钱包切换；未连接时只更新本地状态，不调用钱包
    pub async fn request_wallet(&self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        let namespace = self.network.chain_namespace;
        self.adapter.switch_network(&self.network).await.map_err(|e| {
            tracing::warn!(
                namespace = %namespace,
                network = %self.network.caip_network_id,
                error = %e,
                "Adapter failed to switch network"
            );
            AppKitError::adapter(namespace, e)
        })
    }
}

pub struct ChainController {
    entries: Vec<NamespaceEntry>,
    active_namespace: Option<ChainNamespace>,
    active_caip_network: Option<CaipNetwork>,
    active_caip_address: Option<CaipAddress>,
    is_switching_namespace: bool,
    smart_account_networks: Vec<CaipNetworkId>,
    last_connected_siwx_network: Option<CaipNetwork>,
    notifier: StateNotifier,
}

impl Default for ChainController {
    fn default() -> Self {
        Self::new(StateNotifier::default())
    }
}

impl ChainController {
    pub fn new(notifier: StateNotifier) -> Self {
        Self {
            entries: Vec::new(),
            active_namespace: None,
            active_caip_network: None,
            active_caip_address: None,
            is_switching_namespace: false,
            smart_account_networks: Vec::new(),
            last_connected_siwx_network: None,
            notifier,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.notifier.subscribe()
    }

    fn entry(&self, namespace: ChainNamespace) -> Result<&NamespaceEntry> {
        self.entries
            .iter()
            .find(|e| e.namespace == namespace)
            .ok_or(AppKitError::NamespaceNotRegistered(namespace))
    }

    fn entry_mut(&mut self, namespace: ChainNamespace) -> Result<&mut NamespaceEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.namespace == namespace)
            .ok_or(AppKitError::NamespaceNotRegistered(namespace))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 命名空间注册
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn register_namespace(
        &mut self,
        namespace: ChainNamespace,
        adapter: Arc<dyn ChainAdapter>,
        initial_networks: Vec<CaipNetwork>,
    ) -> Result<()> {
        if self.is_registered(namespace) {
            return Err(AppKitError::DuplicateNamespace(namespace));
        }
        if adapter.namespace() != namespace {
            return Err(AppKitError::Configuration(format!(
                "adapter for {} registered under {}",
                adapter.namespace(),
                namespace
            )));
        }
        for network in &initial_networks {
            ensure_namespace(namespace, network)?;
        }

        let network_state = initial_networks.first().cloned();
        self.entries.push(NamespaceEntry {
            namespace,
            adapter,
            networks: initial_networks,
            network_state: network_state.clone(),
            account_state: None,
            preferred_account_type: AccountType::default(),
            approved_caip_network_ids: Vec::new(),
            supports_all_networks: true,
        });

        tracing::info!(namespace = %namespace, "Namespace registered");
        self.notifier.notify(StateChange::NamespaceRegistered(namespace));

        if self.active_namespace.is_none() {
            self.active_namespace = Some(namespace);
            self.active_caip_network = network_state;
            self.notifier
                .notify(StateChange::ActiveNamespaceChanged(Some(namespace)));
        }

        Ok(())
    }

    /// 移除命名空间；若它是活跃命名空间，活跃命名空间移到下一个已注册的
    pub fn remove_namespace(&mut self, namespace: ChainNamespace) -> Result<Arc<dyn ChainAdapter>> {
        let index = self
            .entries
            .iter()
            .position(|e| e.namespace == namespace)
            .ok_or(AppKitError::NamespaceNotRegistered(namespace))?;
        let entry = self.entries.remove(index);

        if self.active_namespace == Some(namespace) {
            let next = self.entries.first();
            self.active_namespace = next.map(|e| e.namespace);
            self.active_caip_network = next.and_then(|e| e.network_state.clone());
            self.recompute_active_caip_address();
            self.notifier
                .notify(StateChange::ActiveNamespaceChanged(self.active_namespace));
        }

        tracing::info!(namespace = %namespace, "Namespace removed");
        self.notifier.notify(StateChange::NamespaceRemoved(namespace));
        Ok(entry.adapter)
    }

    pub fn is_registered(&self, namespace: ChainNamespace) -> bool {
        self.entries.iter().any(|e| e.namespace == namespace)
    }

    /// 按注册顺序
    pub fn namespaces(&self) -> Vec<ChainNamespace> {
        self.entries.iter().map(|e| e.namespace).collect()
    }

    pub fn adapter(&self, namespace: ChainNamespace) -> Option<Arc<dyn ChainAdapter>> {
        self.entry(namespace).ok().map(|e| e.adapter.clone())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 网络
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn add_network(&mut self, namespace: ChainNamespace, network: CaipNetwork) -> Result<()> {
        ensure_namespace(namespace, &network)?;
        let entry = self.entry_mut(namespace)?;
        if !entry.networks.iter().any(|n| n.is_same_network(&network)) {
            entry.networks.push(network);
        }
        Ok(())
    }

    pub fn remove_network(&mut self, namespace: ChainNamespace, id: &CaipNetworkId) -> Result<()> {
        let entry = self.entry_mut(namespace)?;
        entry.networks.retain(|n| &n.caip_network_id != id);

        let removed_active = entry
            .network_state
            .as_ref()
            .is_some_and(|n| &n.caip_network_id == id);
        if removed_active {
            entry.network_state = entry.networks.first().cloned();
            let replacement = entry.network_state.clone();
            if self.active_namespace == Some(namespace) {
                self.active_caip_network = replacement;
                self.recompute_active_caip_address();
            }
        }
        Ok(())
    }

    pub fn requested_caip_networks(&self, namespace: ChainNamespace) -> &[CaipNetwork] {
        self.entry(namespace)
            .map(|e| e.networks.as_slice())
            .unwrap_or(&[])
    }

    /// 所有命名空间请求的网络
    pub fn all_requested_caip_networks(&self) -> Vec<CaipNetwork> {
        self.entries
            .iter()
            .flat_map(|e| e.networks.iter().cloned())
            .collect()
    }

    pub fn find_network(&self, id: &CaipNetworkId) -> Option<&CaipNetwork> {
        self.entries
            .iter()
            .flat_map(|e| e.networks.iter())
            .find(|n| &n.caip_network_id == id)
    }

    pub fn set_approved_caip_networks(
        &mut self,
        namespace: ChainNamespace,
        ids: Vec<CaipNetworkId>,
        supports_all_networks: bool,
    ) -> Result<()> {
        let entry = self.entry_mut(namespace)?;
        entry.approved_caip_network_ids = ids;
        entry.supports_all_networks = supports_all_networks;
        Ok(())
    }

    pub fn approved_caip_network_ids(&self, namespace: ChainNamespace) -> &[CaipNetworkId] {
        self.entry(namespace)
            .map(|e| e.approved_caip_network_ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn supports_all_networks(&self, namespace: ChainNamespace) -> bool {
        self.entry(namespace)
            .map(|e| e.supports_all_networks)
            .unwrap_or(false)
    }

    /// 该命名空间的活跃网络是否在应用请求的网络列表中
    pub fn check_if_supported_network(&self, namespace: ChainNamespace) -> bool {
        match self.entry(namespace) {
            Ok(entry) => entry.network_state.as_ref().is_some_and(|active| {
                entry.networks.iter().any(|n| n.is_same_network(active))
            }),
            Err(_) => false,
        }
    }

    pub fn is_network_requested(&self, id: &CaipNetworkId) -> bool {
        self.entry(id.namespace())
            .map(|e| e.networks.iter().any(|n| &n.caip_network_id == id))
            .unwrap_or(false)
    }

    pub fn set_smart_account_enabled_networks(&mut self, ids: Vec<CaipNetworkId>) {
        self.smart_account_networks = ids;
    }

    pub fn check_if_smart_account_enabled(&self) -> bool {
        self.active_caip_network
            .as_ref()
            .is_some_and(|n| self.smart_account_networks.contains(&n.caip_network_id))
    }

    /// 第一个 Auth 连接器支持的命名空间网络（按注册顺序）
    pub fn first_caip_network_supporting_auth(&self) -> Option<CaipNetwork> {
        self.entries
            .iter()
            .filter(|e| e.namespace.is_auth_supported())
            .find_map(|e| e.network_state.clone().or_else(|| e.networks.first().cloned()))
    }

    pub fn set_last_connected_siwx_network(&mut self, network: CaipNetwork) {
        self.last_connected_siwx_network = Some(network);
    }

    pub fn last_connected_siwx_network(&self) -> Option<&CaipNetwork> {
        self.last_connected_siwx_network.as_ref()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 活跃网络 / 命名空间
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn active_namespace(&self) -> Option<ChainNamespace> {
        self.active_namespace
    }

    pub fn active_caip_network(&self) -> Option<&CaipNetwork> {
        self.active_caip_network.as_ref()
    }

    pub fn active_caip_address(&self) -> Option<&CaipAddress> {
        self.active_caip_address.as_ref()
    }

    pub fn is_switching_namespace(&self) -> bool {
        self.is_switching_namespace
    }

    pub fn set_is_switching_namespace(&mut self, switching: bool) {
        self.is_switching_namespace = switching;
    }

    pub fn get_caip_network_by_namespace(&self, namespace: ChainNamespace) -> Option<&CaipNetwork> {
        self.entry(namespace).ok()?.network_state.as_ref()
    }

    /// 设置命名空间的活跃网络，并使其成为活跃命名空间
    pub fn set_active_caip_network(
        &mut self,
        namespace: ChainNamespace,
        network: CaipNetwork,
    ) -> Result<()> {
        ensure_namespace(namespace, &network)?;
        let entry = self.entry_mut(namespace)?;
        entry.network_state = Some(network.clone());

        // 账户地址跟随网络
        if let Some(account) = entry.account_state.as_mut() {
            if let Some(address) = account.address.clone() {
                account.caip_address =
                    Some(CaipAddress::new(network.caip_network_id.clone(), address));
            }
        }

        let previous = self.active_namespace.replace(namespace);
        self.is_switching_namespace = previous.is_some_and(|p| p != namespace);
        self.active_caip_network = Some(network.clone());
        self.recompute_active_caip_address();

        tracing::info!(
            namespace = %namespace,
            network = %network.caip_network_id,
            "Active network set"
        );
        if previous != Some(namespace) {
            self.notifier
                .notify(StateChange::ActiveNamespaceChanged(Some(namespace)));
        }
        self.notifier.notify(StateChange::ActiveNetworkChanged {
            namespace,
            network: network.caip_network_id,
        });
        Ok(())
    }

    /// 更新命名空间的网络但不改变活跃命名空间（钱包侧切换了链）
    pub fn set_caip_network_for_namespace(
        &mut self,
        namespace: ChainNamespace,
        network: CaipNetwork,
    ) -> Result<()> {
        if self.active_namespace == Some(namespace) {
            return self.set_active_caip_network(namespace, network);
        }

        ensure_namespace(namespace, &network)?;
        let entry = self.entry_mut(namespace)?;
        entry.network_state = Some(network.clone());
        if let Some(account) = entry.account_state.as_mut() {
            if let Some(address) = account.address.clone() {
                account.caip_address =
                    Some(CaipAddress::new(network.caip_network_id.clone(), address));
            }
        }

        self.notifier.notify(StateChange::ActiveNetworkChanged {
            namespace,
            network: network.caip_network_id,
        });
        Ok(())
    }

    /// 读取切换所需的适配器与连接状态，并记下当前活跃网络
    pub fn plan_network_switch(&self, network: CaipNetwork) -> Result<NetworkSwitchPlan> {
        let namespace = network.chain_namespace;
        ensure_namespace(namespace, &network)?;
        let entry = self.entry(namespace)?;
        Ok(NetworkSwitchPlan {
            adapter: entry.adapter.clone(),
            connected: entry.account_state.as_ref().is_some_and(|a| a.is_connected()),
            base: self.active_caip_network.as_ref().map(|n| n.caip_network_id.clone()),
            network,
        })
    }

    /// 提交已被钱包接受的切换
    ///
    /// 等待钱包期间活跃网络被其它操作改动时放弃提交，返回 `false`。
    pub fn commit_network_switch(&mut self, plan: NetworkSwitchPlan) -> Result<bool> {
        let current = self.active_caip_network.as_ref().map(|n| &n.caip_network_id);
        if current != plan.base.as_ref() {
            tracing::warn!(
                network = %plan.network.caip_network_id,
                "Active network changed while waiting for the wallet, switch discarded"
            );
            return Ok(false);
        }

        let namespace = plan.network.chain_namespace;
        self.set_active_caip_network(namespace, plan.network)?;
        if self.is_connected(namespace) {
            self.is_switching_namespace = false;
        }
        Ok(true)
    }

    /// 切换活跃命名空间，沿用该命名空间的活跃网络
    pub fn switch_active_namespace(&mut self, namespace: ChainNamespace) -> Result<()> {
        let entry = self.entry(namespace)?;
        match entry
            .network_state
            .clone()
            .or_else(|| entry.networks.first().cloned())
        {
            Some(network) => self.set_active_caip_network(namespace, network),
            None => {
                let previous = self.active_namespace.replace(namespace);
                self.is_switching_namespace = previous.is_some_and(|p| p != namespace);
                self.active_caip_network = None;
                self.recompute_active_caip_address();
                self.notifier
                    .notify(StateChange::ActiveNamespaceChanged(Some(namespace)));
                Ok(())
            }
        }
    }

    fn recompute_active_caip_address(&mut self) {
        self.active_caip_address = self
            .active_namespace
            .and_then(|ns| self.entry(ns).ok())
            .and_then(|e| e.account_state.as_ref())
            .filter(|a| a.is_connected())
            .and_then(|a| a.caip_address.clone());
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 账户
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn set_account_connecting(&mut self, namespace: ChainNamespace) -> Result<()> {
        let entry = self.entry_mut(namespace)?;
        match entry.account_state.as_mut() {
            Some(account) => account.status = AccountStatus::Reconnecting,
            None => entry.account_state = Some(AccountState::connecting()),
        }
        Ok(())
    }

    pub fn set_account_connected(
        &mut self,
        namespace: ChainNamespace,
        caip_address: CaipAddress,
        all_accounts: Vec<String>,
    ) -> Result<()> {
        if caip_address.network().namespace() != namespace {
            return Err(AppKitError::NamespaceMismatch {
                expected: namespace,
                actual: caip_address.network().namespace(),
                network: caip_address.network().to_string(),
            });
        }

        let address = caip_address.address().to_string();
        let entry = self.entry_mut(namespace)?;
        entry.account_state = Some(AccountState::connected(caip_address, all_accounts));
        self.recompute_active_caip_address();

        self.notifier.notify(StateChange::AccountChanged {
            namespace,
            address: Some(address),
        });
        Ok(())
    }

    /// 更新地址（accountsChanged），保持连接状态
    pub fn set_account_address(&mut self, namespace: ChainNamespace, address: &str) -> Result<()> {
        let entry = self.entry_mut(namespace)?;
        let network_id = entry.network_state.as_ref().map(|n| n.caip_network_id.clone());
        if let Some(account) = entry.account_state.as_mut() {
            account.address = Some(address.to_string());
            account.caip_address = network_id.map(|id| CaipAddress::new(id, address));
        }
        self.recompute_active_caip_address();
        self.notifier.notify(StateChange::AccountChanged {
            namespace,
            address: Some(address.to_string()),
        });
        Ok(())
    }

    pub fn set_preferred_account_type(
        &mut self,
        namespace: ChainNamespace,
        account_type: AccountType,
    ) -> Result<()> {
        self.entry_mut(namespace)?.preferred_account_type = account_type;
        Ok(())
    }

    /// 清除账户状态；之后 `get_account_data` 返回 `None`
    pub fn reset_account(&mut self, namespace: ChainNamespace) -> Result<()> {
        let entry = self.entry_mut(namespace)?;
        let had_account = entry.account_state.take().is_some();
        self.recompute_active_caip_address();
        if had_account {
            tracing::debug!(namespace = %namespace, "Account reset");
            self.notifier.notify(StateChange::AccountChanged {
                namespace,
                address: None,
            });
        }
        Ok(())
    }

    /// 从未连接（或已重置）时返回 `None`
    pub fn get_account_data(&self, namespace: ChainNamespace) -> Option<AccountData> {
        let entry = self.entry(namespace).ok()?;
        let account = entry.account_state.as_ref()?;
        Some(AccountData {
            address: account.address.clone(),
            caip_address: account.caip_address.clone(),
            status: account.status,
            preferred_account_type: entry.preferred_account_type,
        })
    }

    pub fn is_connected(&self, namespace: ChainNamespace) -> bool {
        self.entry(namespace)
            .ok()
            .and_then(|e| e.account_state.as_ref())
            .is_some_and(|a| a.is_connected())
    }

    pub fn connected_namespaces(&self) -> Vec<ChainNamespace> {
        self.entries
            .iter()
            .filter(|e| e.account_state.as_ref().is_some_and(|a| a.is_connected()))
            .map(|e| e.namespace)
            .collect()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 级联断开
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 计算断开时必须一起处理的命名空间
    ///
    /// - 未指定命名空间：返回全部已注册命名空间（完全断开）
    /// - 指定命名空间：请求的命名空间排第一；若其连接属于共享会话分组
    ///   （WalletConnect / Auth），按注册顺序追加同一分组的其它命名空间
    /// - 独立连接器（injected / external ...）不级联
    pub fn get_chains_to_disconnect(
        &self,
        registry: &ConnectorRegistry,
        namespace: Option<ChainNamespace>,
    ) -> Vec<(ChainNamespace, Arc<dyn ChainAdapter>)> {
        let Some(namespace) = namespace else {
            return self
                .entries
                .iter()
                .map(|e| (e.namespace, e.adapter.clone()))
                .collect();
        };

        let Ok(requested) = self.entry(namespace) else {
            return Vec::new();
        };
        let mut chains = vec![(requested.namespace, requested.adapter.clone())];

        if let Some(SessionScope::Shared(group)) = registry.session_scope(namespace) {
            chains.extend(
                self.entries
                    .iter()
                    .filter(|e| e.namespace != namespace)
                    .filter(|e| {
                        registry.session_scope(e.namespace) == Some(SessionScope::Shared(group))
                    })
                    .map(|e| (e.namespace, e.adapter.clone())),
            );
        }

        chains
    }
}
