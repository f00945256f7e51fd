//! AppKit 客户端
//!
//! 组合链控制器、连接器注册表、每个命名空间的连接状态机、SIWX 关卡、
//! 网络切换协调器与持久化状态，对 UI 暴露连接、断开、切换网络等意图。
//!
//! 锁顺序：状态机 → 控制器 → 注册表 → 路由。同一命名空间的连接流程
//! 在整个过程中持有该命名空间的状态机锁，事件因此按到达顺序处理。
//! 等待钱包（连接、签名、切换网络）时不持有控制器锁；断开会先取消该
//! 命名空间挂起的认证，再获取状态机锁。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, MutexGuard, RwLock};
use uuid::Uuid;

use crate::config::{Config, SiwxConfig};
use crate::domain::{
    caip, AccountData, AccountStatus, AccountType, CaipAddress, CaipNetwork, CaipNetworkId, ChainNamespace,
    Connector, ConnectorKind, AUTH_CONNECTOR_ID, WALLET_CONNECT_CONNECTOR_ID,
};
use crate::error::{AppKitError, Result};
use crate::infrastructure::{
    PersistedState, ProviderEvent, ProviderEventBus, ProviderEventEnvelope, ProviderEventSender,
    StateChange, StateNotifier,
};
use crate::service::siwx::{
    AuthenticationPolicy, AuthenticationRequest, DefaultSiwx, InformalMessenger, SiwxClient,
    SiwxGate, SiwxSession,
};
use crate::service::{
    ChainAdapter, ChainController, ConnectParams, ConnectionEvent, ConnectionRecord,
    ConnectionState, ConnectionStateMachine, ConnectorRegistry, NetworkSwitchCoordinator,
    RouterController, RouterView, StateTransition, SwitchDecision, SyncConnectionParams,
};

type SharedMachine = Arc<Mutex<ConnectionStateMachine>>;

/// 记住最近处理过的 provider 事件 id，重复投递直接忽略
const SEEN_EVENT_CAPACITY: usize = 256;

/// 断开时等待状态机锁的单次时长，超时后再次取消挂起的认证
const TEARDOWN_LOCK_RETRY: Duration = Duration::from_millis(50);

/// 状态机快照，连接流程持有状态机锁时查询也不会阻塞
#[derive(Debug, Clone)]
struct MachineSnapshot {
    state: ConnectionState,
    history: Vec<StateTransition>,
    session: Option<SiwxSession>,
}

impl MachineSnapshot {
    fn of(machine: &ConnectionStateMachine) -> Self {
        Self {
            state: machine.state(),
            history: machine.history().to_vec(),
            session: machine.context().session.clone(),
        }
    }
}

/// 等待用户确认的网络切换
#[derive(Debug, Clone)]
struct PendingSwitch {
    target: CaipNetwork,
    decision: SwitchDecision,
}

fn default_siwx(config: &SiwxConfig, storage: PersistedState) -> DefaultSiwx {
    let mut messenger =
        InformalMessenger::new(&config.domain, &config.uri).with_expiration(config.expiration());
    if let Some(statement) = &config.statement {
        messenger = messenger.with_statement(statement);
    }
    DefaultSiwx::new(messenger, storage)
        .with_required(config.required)
        .with_sign_out_on_disconnect(config.sign_out_on_disconnect)
}

/// 持久化的连接器 id 在注册表中找不到时，按约定 id 推断类型
fn fallback_connector(connector_id: &str, namespace: ChainNamespace) -> Connector {
    let kind = match connector_id {
        WALLET_CONNECT_CONNECTOR_ID => ConnectorKind::WalletConnect,
        AUTH_CONNECTOR_ID => ConnectorKind::Auth,
        _ => ConnectorKind::External,
    };
    Connector::new(connector_id, connector_id, kind, vec![namespace])
}

pub struct AppKit {
    config: Config,
    controller: RwLock<ChainController>,
    registry: RwLock<ConnectorRegistry>,
    machines: RwLock<HashMap<ChainNamespace, SharedMachine>>,
    snapshots: RwLock<HashMap<ChainNamespace, MachineSnapshot>>,
    policy: AuthenticationPolicy,
    gate: SiwxGate,
    router: Mutex<RouterController>,
    pending_switch: Mutex<Option<PendingSwitch>>,
    storage: PersistedState,
    events: Mutex<ProviderEventBus>,
    seen_events: Mutex<VecDeque<Uuid>>,
    notifier: StateNotifier,
}

impl AppKit {
    /// 校验配置并按配置打开持久化存储
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let storage = config.storage.open()?;
        Ok(Self::build(config, storage))
    }

    /// 使用外部提供的存储（重启恢复、测试共享存储）
    pub fn with_storage(config: Config, storage: PersistedState) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, storage))
    }

    fn build(config: Config, storage: PersistedState) -> Self {
        let policy = AuthenticationPolicy::disabled();
        if config.siwx.enabled {
            policy.set_client(Some(Arc::new(default_siwx(&config.siwx, storage.clone()))));
        }

        let notifier = StateNotifier::default();
        tracing::info!(
            project_id = %config.project_id,
            networks = config.networks.len(),
            siwx = config.siwx.enabled,
            "AppKit initialized"
        );

        Self {
            controller: RwLock::new(ChainController::new(notifier.clone())),
            registry: RwLock::new(ConnectorRegistry::new()),
            machines: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            policy,
            gate: SiwxGate::new(),
            router: Mutex::new(RouterController::default()),
            pending_switch: Mutex::new(None),
            storage,
            events: Mutex::new(ProviderEventBus::new()),
            seen_events: Mutex::new(VecDeque::with_capacity(SEEN_EVENT_CAPACITY)),
            notifier,
            config,
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 初始化
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 注册适配器，网络取配置中属于该命名空间的部分
    pub async fn register_adapter(&self, adapter: Arc<dyn ChainAdapter>) -> Result<()> {
        let namespace = adapter.namespace();
        let networks = self
            .config
            .resolve_networks()?
            .into_iter()
            .filter(|n| n.chain_namespace == namespace)
            .collect();
        self.register_adapter_with_networks(adapter, networks).await
    }

    pub async fn register_adapter_with_networks(
        &self,
        adapter: Arc<dyn ChainAdapter>,
        networks: Vec<CaipNetwork>,
    ) -> Result<()> {
        let namespace = adapter.namespace();
        {
            let mut controller = self.controller.write().await;
            controller.register_namespace(namespace, adapter.clone(), networks.clone())?;

            let default_network = self
                .config
                .default_caip_network()?
                .filter(|n| controller.is_network_requested(&n.caip_network_id));
            if let Some(network) = default_network {
                if network.chain_namespace == namespace {
                    controller.set_active_caip_network(namespace, network)?;
                }
            }
        }

        let machine = ConnectionStateMachine::new(namespace, networks, self.policy.clone());
        self.snapshots
            .write()
            .await
            .insert(namespace, MachineSnapshot::of(&machine));
        self.machines
            .write()
            .await
            .insert(namespace, Arc::new(Mutex::new(machine)));

        adapter.bind_events(self.events.lock().await.sender(namespace));
        Ok(())
    }

    pub async fn add_connector(&self, connector: Connector) {
        self.registry.write().await.add_connector(connector);
    }

    /// 在这些网络上通过 Auth 连接器连接时使用智能账户
    pub async fn set_smart_account_enabled_networks(&self, ids: Vec<CaipNetworkId>) {
        self.controller
            .write()
            .await
            .set_smart_account_enabled_networks(ids);
    }

    /// 运行期替换 SIWX 客户端，下一次 CONNECT_SUCCESS 生效
    pub fn set_siwx(&self, client: Option<Arc<dyn SiwxClient>>) {
        tracing::info!(enabled = client.is_some(), "SIWX client updated");
        self.policy.set_client(client);
    }

    /// 供适配器以外的来源上报 provider 事件
    pub async fn event_sender(&self, namespace: ChainNamespace) -> ProviderEventSender {
        self.events.lock().await.sender(namespace)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 连接
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn connect(
        &self,
        namespace: ChainNamespace,
        connector_id: &str,
    ) -> Result<ConnectionRecord> {
        let adapter = self.adapter(namespace).await?;
        let connector = self
            .registry
            .read()
            .await
            .get_connector(connector_id)
            .cloned()
            .ok_or_else(|| AppKitError::ConnectorNotFound(connector_id.to_string()))?;
        if !connector.supports(namespace) {
            return Err(AppKitError::Configuration(format!(
                "connector {} does not support {}",
                connector_id, namespace
            )));
        }

        let machine = self.machine(namespace).await?;
        let mut machine = machine.lock().await;
        self.begin_connection(&mut machine).await?;

        let (chain_id, rpc_url) = {
            let controller = self.controller.read().await;
            let network = controller.get_caip_network_by_namespace(namespace);
            (
                network.map(|n| n.caip_network_id.clone()),
                network.and_then(|n| n.rpc_urls.first().cloned()),
            )
        };

        tracing::info!(
            namespace = %namespace,
            connector_id,
            kind = connector.kind.as_str(),
            "Connecting"
        );
        let connected = match adapter
            .connect(ConnectParams {
                connector_id: connector.id.clone(),
                connector_kind: connector.kind,
                chain_id,
                rpc_url,
            })
            .await
        {
            Ok(connected) => connected,
            Err(e) => {
                tracing::warn!(namespace = %namespace, error = %e, "Connect failed");
                self.fail_connection(&mut machine, e.to_string()).await;
                return Err(AppKitError::adapter(namespace, e));
            }
        };

        let accounts = match adapter.get_accounts().await {
            Ok(accounts) => accounts.into_iter().map(|a| a.address).collect(),
            Err(e) => {
                tracing::debug!(namespace = %namespace, error = %e, "Failed to list accounts");
                Vec::new()
            }
        };

        self.complete_connection(
            &mut machine,
            &adapter,
            &connector,
            connected.address,
            connected.chain_id,
            accounts,
        )
        .await
    }

    /// 通过 Auth（邮箱/社交登录）连接器连接
    ///
    /// 活跃命名空间不受 Auth 支持时，先切换到第一个支持 Auth 的网络。
    pub async fn connect_with_auth(&self) -> Result<ConnectionRecord> {
        let (namespace, connector_id) = {
            let mut controller = self.controller.write().await;
            let registry = self.registry.read().await;
            let connector = registry
                .get_auth_connector()
                .ok_or_else(|| AppKitError::ConnectorNotFound(AUTH_CONNECTOR_ID.to_string()))?;

            let namespace = match controller
                .active_namespace()
                .filter(|ns| connector.supports(*ns))
            {
                Some(namespace) => namespace,
                None => {
                    let network = controller
                        .first_caip_network_supporting_auth()
                        .filter(|n| connector.supports(n.chain_namespace))
                        .ok_or_else(|| {
                            AppKitError::Configuration(
                                "no registered namespace supports the auth connector".to_string(),
                            )
                        })?;
                    let namespace = network.chain_namespace;
                    tracing::info!(network = %network.caip_network_id, "Switching to a network supported by the auth connector");
                    controller.set_active_caip_network(namespace, network)?;
                    namespace
                }
            };
            (namespace, connector.id.clone())
        };

        self.connect(namespace, &connector_id).await
    }

    /// 用户取消该命名空间的签名请求（SIWX 强制时不允许）
    pub fn cancel_authentication(&self, namespace: ChainNamespace) -> Result<()> {
        if self.policy.client().is_some_and(|c| c.required()) {
            return Err(AppKitError::Siwx(
                "authentication is required for this app".to_string(),
            ));
        }
        if !self.gate.cancel(namespace) {
            tracing::debug!(namespace = %namespace, "No pending authentication to cancel");
        }
        Ok(())
    }

    /// 认证请求未完成时 UI 不能关闭弹窗
    pub fn is_siwx_close_disabled(&self) -> bool {
        self.gate.is_siwx_close_disabled()
    }

    /// 启动时根据持久化记录恢复连接
    ///
    /// 单个命名空间恢复失败不影响其它命名空间；有效的 SIWX 会话会被复用。
    pub async fn sync_existing_connection(&self) -> Result<Vec<ChainNamespace>> {
        let connector_ids = self.storage.connected_connector_ids()?;
        let statuses = self.storage.connection_statuses()?;
        let persisted_network = self.storage.active_caip_network_id()?;
        let persisted_namespace = self.storage.active_namespace()?;

        let mut restored = Vec::new();
        for (namespace, connector_id) in connector_ids {
            if statuses.get(&namespace) != Some(&AccountStatus::Connected) {
                continue;
            }
            let Ok(adapter) = self.adapter(namespace).await else {
                tracing::debug!(namespace = %namespace, "Skipping sync for unregistered namespace");
                continue;
            };

            let chain_id = persisted_network
                .clone()
                .filter(|id| id.namespace() == namespace);
            match self
                .sync_namespace(namespace, adapter, &connector_id, chain_id)
                .await
            {
                Ok(_) => restored.push(namespace),
                Err(e) => {
                    tracing::warn!(namespace = %namespace, error = %e, "Failed to restore connection")
                }
            }
        }

        if let Some(active) = persisted_namespace.filter(|ns| restored.contains(ns)) {
            {
                let mut controller = self.controller.write().await;
                controller.switch_active_namespace(active)?;
                controller.set_is_switching_namespace(false);
            }
            self.persist_active(active).await;
        }

        tracing::info!(restored = ?restored, "Existing connections synced");
        Ok(restored)
    }

    async fn sync_namespace(
        &self,
        namespace: ChainNamespace,
        adapter: Arc<dyn ChainAdapter>,
        connector_id: &str,
        chain_id: Option<CaipNetworkId>,
    ) -> Result<ConnectionRecord> {
        let connector = self
            .registry
            .read()
            .await
            .get_connector(connector_id)
            .cloned()
            .unwrap_or_else(|| fallback_connector(connector_id, namespace));

        let machine = self.machine(namespace).await?;
        let mut machine = machine.lock().await;
        self.begin_connection(&mut machine).await?;

        let chain_id = match chain_id {
            Some(id) => Some(id),
            None => self
                .controller
                .read()
                .await
                .get_caip_network_by_namespace(namespace)
                .map(|n| n.caip_network_id.clone()),
        };

        match adapter
            .sync_connection(SyncConnectionParams {
                connector_id: connector_id.to_string(),
                namespace,
                chain_id,
            })
            .await
        {
            Ok(connection) => {
                let accounts = connection.accounts.into_iter().map(|a| a.address).collect();
                self.complete_connection(
                    &mut machine,
                    &adapter,
                    &connector,
                    connection.address,
                    connection.chain_id,
                    accounts,
                )
                .await
            }
            Err(e) => {
                self.fail_connection(&mut machine, e.to_string()).await;
                if let Err(e) = self.storage.clear_namespace(namespace) {
                    tracing::warn!(namespace = %namespace, error = %e, "Failed to clear persisted connection");
                }
                Err(AppKitError::adapter(namespace, e))
            }
        }
    }

    async fn begin_connection(&self, machine: &mut ConnectionStateMachine) -> Result<()> {
        let namespace = machine.namespace();
        if machine.state() != ConnectionState::Disconnected {
            return Err(AppKitError::ConnectionInProgress {
                namespace,
                state: machine.state(),
            });
        }
        self.dispatch(machine, ConnectionEvent::ConnectRequest).await;
        self.controller
            .write()
            .await
            .set_account_connecting(namespace)
    }

    async fn fail_connection(&self, machine: &mut ConnectionStateMachine, reason: String) {
        let namespace = machine.namespace();
        self.dispatch(machine, ConnectionEvent::ConnectFailure { reason })
            .await;
        if let Err(e) = self.controller.write().await.reset_account(namespace) {
            tracing::warn!(namespace = %namespace, error = %e, "Failed to reset account");
        }
    }

    /// CONNECT_SUCCESS 之后的公共流程：可选认证、写入控制器、持久化
    async fn complete_connection(
        &self,
        machine: &mut ConnectionStateMachine,
        adapter: &Arc<dyn ChainAdapter>,
        connector: &Connector,
        address: String,
        chain_id: CaipNetworkId,
        mut accounts: Vec<String>,
    ) -> Result<ConnectionRecord> {
        let namespace = machine.namespace();
        if chain_id.namespace() != namespace {
            let err = AppKitError::NamespaceMismatch {
                expected: namespace,
                actual: chain_id.namespace(),
                network: chain_id.to_string(),
            };
            tracing::warn!(namespace = %namespace, chain_id = %chain_id, "Adapter returned a network from another namespace");
            self.fail_connection(machine, err.to_string()).await;
            return Err(err);
        }
        if accounts.is_empty() {
            accounts.push(address.clone());
        }

        let network = self.resolve_network(&chain_id).await;
        let record = ConnectionRecord {
            connector_id: connector.id.clone(),
            address: address.clone(),
            chain_id: chain_id.clone(),
            accounts: accounts.clone(),
        };
        self.dispatch(
            machine,
            ConnectionEvent::ConnectSuccess {
                connection: record.clone(),
            },
        )
        .await;

        self.registry
            .write()
            .await
            .set_connector_id(namespace, &connector.id);
        self.notifier.notify(StateChange::ConnectorChanged {
            namespace,
            connector_id: Some(connector.id.clone()),
        });

        if machine.state() == ConnectionState::RequestingAuthentication {
            self.authenticate(machine, adapter, connector, &address, network.clone())
                .await?;
        }

        {
            let mut controller = self.controller.write().await;
            match &network {
                Some(network) => controller.set_active_caip_network(namespace, network.clone())?,
                None => controller.switch_active_namespace(namespace)?,
            }
            if connector.kind == ConnectorKind::Auth && controller.check_if_smart_account_enabled() {
                controller.set_preferred_account_type(namespace, AccountType::SmartAccount)?;
            }
            controller.set_account_connected(
                namespace,
                CaipAddress::new(chain_id.clone(), address.as_str()),
                accounts,
            )?;
            controller.set_is_switching_namespace(false);
        }

        if network.is_none() {
            tracing::warn!(namespace = %namespace, chain_id = %chain_id, "Connected to a network outside the requested list");
            self.router.lock().await.push(RouterView::UnsupportedChain);
        } else {
            self.router.lock().await.reset(RouterView::Account);
        }

        if let Err(e) = self.persist_connection(namespace, &connector.id) {
            tracing::warn!(namespace = %namespace, error = %e, "Failed to persist connection");
        }
        self.persist_active(namespace).await;

        tracing::info!(
            namespace = %namespace,
            address = %address,
            chain_id = %chain_id,
            "Connected"
        );
        Ok(record)
    }

    async fn authenticate(
        &self,
        machine: &mut ConnectionStateMachine,
        adapter: &Arc<dyn ChainAdapter>,
        connector: &Connector,
        address: &str,
        network: Option<CaipNetwork>,
    ) -> Result<SiwxSession> {
        let namespace = machine.namespace();
        let Some(network) = network else {
            let reason = "cannot authenticate on a network outside the requested list";
            self.dispatch(
                machine,
                ConnectionEvent::AuthenticationRejected {
                    reason: reason.to_string(),
                },
            )
            .await;
            self.abandon_connection(namespace, adapter).await;
            return Err(AppKitError::Siwx(reason.to_string()));
        };

        // 社交登录弹窗需要超时
        let timeout = matches!(connector.kind, ConnectorKind::Auth)
            .then(|| self.config.siwx.social_login_timeout());

        self.router.lock().await.push(RouterView::SiwxSignMessage);
        let mark = machine.history().len();
        let result = self
            .gate
            .authenticate(
                machine,
                adapter.as_ref(),
                AuthenticationRequest {
                    address: address.to_string(),
                    network: network.clone(),
                    timeout,
                },
            )
            .await;
        self.publish_since(machine, mark).await;
        self.router
            .lock()
            .await
            .go_back_from(RouterView::SiwxSignMessage);

        match result {
            Ok(session) => {
                self.controller
                    .write()
                    .await
                    .set_last_connected_siwx_network(network);
                Ok(session)
            }
            Err(e) => {
                self.abandon_connection(namespace, adapter).await;
                Err(e)
            }
        }
    }

    /// 认证失败后清理：本地状态回到未连接，钱包侧尽力断开
    async fn abandon_connection(&self, namespace: ChainNamespace, adapter: &Arc<dyn ChainAdapter>) {
        if let Err(e) = self.controller.write().await.reset_account(namespace) {
            tracing::warn!(namespace = %namespace, error = %e, "Failed to reset account");
        }
        if self
            .registry
            .write()
            .await
            .remove_connector_id(namespace)
            .is_some()
        {
            self.notifier.notify(StateChange::ConnectorChanged {
                namespace,
                connector_id: None,
            });
        }
        if let Err(e) = self.storage.clear_namespace(namespace) {
            tracing::warn!(namespace = %namespace, error = %e, "Failed to clear persisted connection");
        }
        if let Err(e) = adapter.disconnect().await {
            tracing::warn!(namespace = %namespace, error = %e, "Adapter disconnect after failed authentication");
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 断开
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 断开命名空间（共享会话的命名空间一起断开）；不传命名空间时全部断开
    ///
    /// 每个命名空间独立尝试，本地状态总会被清除；有失败时最后汇总为
    /// `CascadeDisconnect`。
    pub async fn disconnect(&self, namespace: Option<ChainNamespace>) -> Result<Vec<ChainNamespace>> {
        let chains = {
            let controller = self.controller.read().await;
            if let Some(ns) = namespace {
                if !controller.is_registered(ns) {
                    return Err(AppKitError::NamespaceNotRegistered(ns));
                }
            }
            let registry = self.registry.read().await;
            controller.get_chains_to_disconnect(&registry, namespace)
        };
        tracing::info!(
            requested = ?namespace,
            namespaces = ?chains.iter().map(|(ns, _)| *ns).collect::<Vec<_>>(),
            "Disconnecting"
        );

        // 各命名空间互不阻塞，结果按请求顺序返回
        let outcomes = futures::future::join_all(
            chains
                .iter()
                .map(|(ns, adapter)| async move { (*ns, adapter.disconnect().await) }),
        )
        .await;

        let mut disconnected = Vec::new();
        let mut failures = Vec::new();
        let mut addresses = Vec::new();
        for (ns, result) in outcomes {
            addresses.extend(self.teardown_namespace(ns).await);
            match result {
                Ok(()) => disconnected.push(ns),
                Err(e) => {
                    tracing::warn!(namespace = %ns, error = %e, "Adapter disconnect failed");
                    failures.push((ns, e));
                }
            }
        }

        if namespace.is_none() {
            self.sign_out_siwx().await;
        } else {
            self.revoke_siwx_sessions(&addresses).await;
        }
        self.after_disconnect().await;

        if failures.is_empty() {
            Ok(disconnected)
        } else {
            Err(AppKitError::CascadeDisconnect {
                disconnected,
                failures,
            })
        }
    }

    /// 钱包侧已断开：只清理本地状态（含共享会话分组）
    async fn disconnect_locally(&self, namespace: ChainNamespace) {
        let chains = {
            let controller = self.controller.read().await;
            let registry = self.registry.read().await;
            controller.get_chains_to_disconnect(&registry, Some(namespace))
        };

        let mut addresses = Vec::new();
        for (ns, _) in chains {
            addresses.extend(self.teardown_namespace(ns).await);
        }
        self.revoke_siwx_sessions(&addresses).await;
        self.after_disconnect().await;
    }

    /// 返回被清除账户的 CAIP 地址
    async fn teardown_namespace(&self, namespace: ChainNamespace) -> Option<CaipAddress> {
        if let Ok(machine) = self.machine(namespace).await {
            let mut machine = self.lock_for_teardown(&machine, namespace).await;
            self.dispatch(&mut machine, ConnectionEvent::Disconnect).await;
        }

        let account = {
            let mut controller = self.controller.write().await;
            let account = controller.get_account_data(namespace);
            if let Err(e) = controller.reset_account(namespace) {
                tracing::warn!(namespace = %namespace, error = %e, "Failed to reset account");
            }
            account
        };

        if self
            .registry
            .write()
            .await
            .remove_connector_id(namespace)
            .is_some()
        {
            self.notifier.notify(StateChange::ConnectorChanged {
                namespace,
                connector_id: None,
            });
        }
        if let Err(e) = self.storage.clear_namespace(namespace) {
            tracing::warn!(namespace = %namespace, error = %e, "Failed to clear persisted connection");
        }

        account.and_then(|a| a.caip_address)
    }

    /// 连接流程可能正停在签名上并持有状态机锁：先取消认证，流程退出后再获取
    async fn lock_for_teardown<'a>(
        &self,
        machine: &'a SharedMachine,
        namespace: ChainNamespace,
    ) -> MutexGuard<'a, ConnectionStateMachine> {
        loop {
            if let Ok(guard) = machine.try_lock() {
                return guard;
            }
            if self.gate.cancel(namespace) {
                tracing::info!(namespace = %namespace, "Pending authentication cancelled by disconnect");
            }
            if let Ok(guard) = tokio::time::timeout(TEARDOWN_LOCK_RETRY, machine.lock()).await {
                return guard;
            }
        }
    }

    async fn after_disconnect(&self) {
        let any_connected = !self
            .controller
            .read()
            .await
            .connected_namespaces()
            .is_empty();
        if !any_connected {
            self.pending_switch.lock().await.take();
            self.router.lock().await.reset(RouterView::Connect);
        }
    }

    async fn sign_out_siwx(&self) {
        let Some(client) = self.policy.client() else {
            return;
        };
        if client.sign_out_on_disconnect() {
            if let Err(e) = client.sign_out().await {
                tracing::warn!(error = %e, "SIWX sign out failed");
            }
        }
    }

    async fn revoke_siwx_sessions(&self, addresses: &[CaipAddress]) {
        let Some(client) = self.policy.client() else {
            return;
        };
        if !client.sign_out_on_disconnect() {
            return;
        }
        for caip_address in addresses {
            if let Err(e) = client
                .revoke_session(caip_address.network(), caip_address.address())
                .await
            {
                tracing::warn!(address = %caip_address, error = %e, "Failed to revoke SIWX session");
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 网络切换
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 切换网络
    ///
    /// 需要确认的决策会保存目标网络并路由到确认视图，
    /// 随后由 `confirm_pending_switch` / `reject_pending_switch` 完成。
    pub async fn switch_network(
        &self,
        target: CaipNetwork,
        ignore_switch_confirmation: bool,
    ) -> Result<SwitchDecision> {
        if !self.config.features.enable_network_switch {
            return Err(AppKitError::Configuration(
                "network switching is disabled".to_string(),
            ));
        }

        let decision = {
            let controller = self.controller.read().await;
            let registry = self.registry.read().await;
            NetworkSwitchCoordinator::decide(
                &controller,
                &registry,
                &target,
                ignore_switch_confirmation,
            )
        };
        tracing::info!(network = %target.caip_network_id, ?decision, "Network switch requested");

        match decision {
            SwitchDecision::NoOp => {}
            SwitchDecision::SwitchImmediately => {
                let namespace = target.chain_namespace;
                let auth_connector = self.auth_connector_for(namespace).await;

                self.router.lock().await.push(RouterView::SwitchNetwork);
                let result = self.perform_switch(target).await;
                self.router.lock().await.go_back_from(RouterView::SwitchNetwork);
                result?;

                // Auth 钱包在目标命名空间上直接建立会话；失败时保留本地切换结果
                if let Some(connector_id) = auth_connector {
                    tracing::info!(namespace = %namespace, connector_id = %connector_id, "Connecting auth wallet on the target namespace");
                    if let Err(e) = self.connect(namespace, &connector_id).await {
                        tracing::warn!(namespace = %namespace, error = %e, "Auth connector could not join the target namespace");
                    }
                }
            }
            SwitchDecision::ConfirmNamespaceSwitch | SwitchDecision::ConfirmNetworkSwitch => {
                let view = decision.view();
                *self.pending_switch.lock().await = Some(PendingSwitch { target, decision });
                if let Some(view) = view {
                    self.router.lock().await.push(view);
                }
            }
        }

        Ok(decision)
    }

    /// 用户确认切换；目标命名空间尚未连接时路由到连接视图
    pub async fn confirm_pending_switch(&self) -> Result<SwitchDecision> {
        let pending = self
            .pending_switch
            .lock()
            .await
            .take()
            .ok_or(AppKitError::NoPendingSwitch)?;
        let namespace = pending.target.chain_namespace;

        let result = self.perform_switch(pending.target).await;
        let needs_connection = pending.decision == SwitchDecision::ConfirmNamespaceSwitch
            && !self.controller.read().await.is_connected(namespace);

        let mut router = self.router.lock().await;
        if let Some(view) = pending.decision.view() {
            router.go_back_from(view);
        }
        result?;
        if needs_connection {
            router.push(RouterView::Connect);
        }
        Ok(pending.decision)
    }

    pub async fn reject_pending_switch(&self) -> Result<()> {
        let pending = self
            .pending_switch
            .lock()
            .await
            .take()
            .ok_or(AppKitError::NoPendingSwitch)?;
        tracing::info!(network = %pending.target.caip_network_id, "Network switch rejected");
        if let Some(view) = pending.decision.view() {
            self.router.lock().await.go_back_from(view);
        }
        Ok(())
    }

    pub async fn pending_switch(&self) -> Option<CaipNetwork> {
        self.pending_switch
            .lock()
            .await
            .as_ref()
            .map(|p| p.target.clone())
    }

    /// 当前命名空间由 Auth 连接器连接、目标命名空间尚未连接时，返回要复用的连接器 id
    async fn auth_connector_for(&self, target: ChainNamespace) -> Option<String> {
        let controller = self.controller.read().await;
        let registry = self.registry.read().await;
        let current = controller.active_namespace()?;
        if current == target
            || controller.is_connected(target)
            || !registry.is_auth_connected(current)
        {
            return None;
        }
        registry
            .get_auth_connector()
            .filter(|c| c.supports(target))
            .map(|c| c.id.clone())
            .or_else(|| registry.get_connector_id(current).map(String::from))
    }

    /// 钱包确认期间不持有控制器锁；确认后活跃网络已变化则放弃提交
    async fn perform_switch(&self, target: CaipNetwork) -> Result<()> {
        let namespace = target.chain_namespace;
        let plan = self.controller.read().await.plan_network_switch(target)?;
        plan.request_wallet().await?;
        let committed = self.controller.write().await.commit_network_switch(plan)?;
        if committed {
            self.persist_active(namespace).await;
        }
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Provider 事件
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 处理已排队的 provider 事件，返回处理的数量
    pub async fn process_provider_events(&self) -> usize {
        let events = self.events.lock().await.drain();
        let count = events.len();
        for envelope in events {
            let event_id = envelope.event_id;
            if let Err(e) = self.handle_provider_event(envelope).await {
                tracing::warn!(%event_id, error = %e, "Failed to handle provider event");
            }
        }
        count
    }

    /// 幂等：同一事件 id 重复投递时直接忽略
    pub async fn handle_provider_event(&self, envelope: ProviderEventEnvelope) -> Result<()> {
        let namespace = envelope.namespace;
        {
            let mut seen = self.seen_events.lock().await;
            if seen.contains(&envelope.event_id) {
                tracing::debug!(event_id = %envelope.event_id, namespace = %namespace, "Duplicate provider event ignored");
                return Ok(());
            }
            if seen.len() == SEEN_EVENT_CAPACITY {
                seen.pop_front();
            }
            seen.push_back(envelope.event_id);
        }
        tracing::debug!(
            event_id = %envelope.event_id,
            namespace = %namespace,
            event = envelope.event.event_type(),
            "Provider event"
        );

        match envelope.event {
            ProviderEvent::Connect { address, chain_id } => {
                if !self.controller.read().await.is_connected(namespace) {
                    tracing::debug!(namespace = %namespace, "Ignoring connect event outside a connection flow");
                    return Ok(());
                }
                self.on_accounts_changed(namespace, &address).await?;
                self.on_chain_changed(namespace, chain_id).await
            }
            ProviderEvent::AccountsChanged { accounts } => match accounts.first() {
                Some(address) => self.on_accounts_changed(namespace, address).await,
                None => {
                    self.disconnect_locally(namespace).await;
                    Ok(())
                }
            },
            ProviderEvent::ChainChanged { chain_id } => {
                self.on_chain_changed(namespace, chain_id).await
            }
            ProviderEvent::Disconnect => {
                self.disconnect_locally(namespace).await;
                Ok(())
            }
        }
    }

    async fn on_accounts_changed(&self, namespace: ChainNamespace, address: &str) -> Result<()> {
        let current = {
            let controller = self.controller.read().await;
            if !controller.is_connected(namespace) {
                return Ok(());
            }
            controller
                .get_account_data(namespace)
                .and_then(|a| a.caip_address)
        };
        if current.as_ref().is_some_and(|c| c.address() == address) {
            return Ok(());
        }

        // 新账户没有会话时不能保持已认证连接
        if let (Some(client), Some(current)) = (self.policy.client(), &current) {
            if client.get_session(current.network(), address).await?.is_none() {
                tracing::info!(namespace = %namespace, "Account changed without SIWX session, disconnecting");
                self.disconnect_locally(namespace).await;
                return Ok(());
            }
        }

        self.controller
            .write()
            .await
            .set_account_address(namespace, address)?;
        tracing::info!(namespace = %namespace, address, "Account changed");
        Ok(())
    }

    async fn on_chain_changed(&self, namespace: ChainNamespace, chain_id: CaipNetworkId) -> Result<()> {
        if chain_id.namespace() != namespace {
            return Err(AppKitError::NamespaceMismatch {
                expected: namespace,
                actual: chain_id.namespace(),
                network: chain_id.to_string(),
            });
        }

        let network = {
            let controller = self.controller.read().await;
            if !controller.is_connected(namespace) {
                return Ok(());
            }
            let unchanged = controller
                .get_caip_network_by_namespace(namespace)
                .is_some_and(|n| n.caip_network_id == chain_id);
            if unchanged {
                return Ok(());
            }
            controller.find_network(&chain_id).cloned()
        };

        let network = match network {
            Some(network) => network,
            None => match caip::find_preset(&chain_id)
                .filter(|_| self.config.features.allow_unsupported_chain)
            {
                Some(network) => network,
                None => {
                    tracing::warn!(namespace = %namespace, chain_id = %chain_id, "Wallet switched to an unsupported network");
                    self.router.lock().await.push(RouterView::UnsupportedChain);
                    return Ok(());
                }
            },
        };

        self.controller
            .write()
            .await
            .set_caip_network_for_namespace(namespace, network)?;
        self.persist_active(namespace).await;
        let mut router = self.router.lock().await;
        if router.current() == RouterView::UnsupportedChain {
            router.go_back();
        }
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 查询
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.notifier.subscribe()
    }

    pub fn policy(&self) -> &AuthenticationPolicy {
        &self.policy
    }

    pub fn storage(&self) -> &PersistedState {
        &self.storage
    }

    pub fn controller(&self) -> &RwLock<ChainController> {
        &self.controller
    }

    pub fn registry(&self) -> &RwLock<ConnectorRegistry> {
        &self.registry
    }

    pub async fn connection_state(&self, namespace: ChainNamespace) -> Option<ConnectionState> {
        self.snapshots.read().await.get(&namespace).map(|s| s.state)
    }

    pub async fn connection_history(&self, namespace: ChainNamespace) -> Vec<StateTransition> {
        self.snapshots
            .read()
            .await
            .get(&namespace)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    pub async fn siwx_session(&self, namespace: ChainNamespace) -> Option<SiwxSession> {
        self.snapshots
            .read()
            .await
            .get(&namespace)
            .and_then(|s| s.session.clone())
    }

    pub async fn account_data(&self, namespace: ChainNamespace) -> Option<AccountData> {
        self.controller.read().await.get_account_data(namespace)
    }

    pub async fn is_connected(&self, namespace: ChainNamespace) -> bool {
        self.controller.read().await.is_connected(namespace)
    }

    pub async fn connected_namespaces(&self) -> Vec<ChainNamespace> {
        self.controller.read().await.connected_namespaces()
    }

    pub async fn active_namespace(&self) -> Option<ChainNamespace> {
        self.controller.read().await.active_namespace()
    }

    pub async fn active_caip_network(&self) -> Option<CaipNetwork> {
        self.controller.read().await.active_caip_network().cloned()
    }

    pub async fn active_caip_address(&self) -> Option<CaipAddress> {
        self.controller.read().await.active_caip_address().cloned()
    }

    pub async fn connector_id(&self, namespace: ChainNamespace) -> Option<String> {
        self.registry
            .read()
            .await
            .get_connector_id(namespace)
            .map(String::from)
    }

    pub async fn current_view(&self) -> RouterView {
        self.router.lock().await.current()
    }

    pub async fn router_history(&self) -> Vec<RouterView> {
        self.router.lock().await.history().to_vec()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 内部
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn adapter(&self, namespace: ChainNamespace) -> Result<Arc<dyn ChainAdapter>> {
        self.controller
            .read()
            .await
            .adapter(namespace)
            .ok_or(AppKitError::NamespaceNotRegistered(namespace))
    }

    async fn machine(&self, namespace: ChainNamespace) -> Result<SharedMachine> {
        self.machines
            .read()
            .await
            .get(&namespace)
            .cloned()
            .ok_or(AppKitError::NamespaceNotRegistered(namespace))
    }

    /// 请求的网络优先，其次内置网络
    async fn resolve_network(&self, chain_id: &CaipNetworkId) -> Option<CaipNetwork> {
        if let Some(network) = self.controller.read().await.find_network(chain_id) {
            return Some(network.clone());
        }
        caip::find_preset(chain_id).filter(|_| self.config.features.allow_unsupported_chain)
    }

    async fn dispatch(&self, machine: &mut ConnectionStateMachine, event: ConnectionEvent) {
        let mark = machine.history().len();
        machine.send(event);
        self.publish_since(machine, mark).await;
    }

    /// 发布状态机自 `mark` 之后的转换
    async fn publish_since(&self, machine: &ConnectionStateMachine, mark: usize) {
        let namespace = machine.namespace();
        for transition in machine.history().iter().skip(mark) {
            self.notifier.notify(StateChange::ConnectionStateChanged {
                namespace,
                from: transition.from,
                to: transition.to,
            });
        }
        self.snapshots
            .write()
            .await
            .insert(namespace, MachineSnapshot::of(machine));
    }

    fn persist_connection(&self, namespace: ChainNamespace, connector_id: &str) -> Result<()> {
        self.storage.set_connector_id(namespace, connector_id)?;
        self.storage
            .set_connection_status(namespace, AccountStatus::Connected)
    }

    async fn persist_active(&self, namespace: ChainNamespace) {
        let (active_namespace, active_network) = {
            let controller = self.controller.read().await;
            (
                controller.active_namespace(),
                controller
                    .active_caip_network()
                    .map(|n| n.caip_network_id.clone()),
            )
        };
        if active_namespace != Some(namespace) {
            return;
        }

        let result = self.storage.set_active_namespace(active_namespace).and_then(|_| {
            match &active_network {
                Some(id) => self.storage.set_active_caip_network_id(id),
                None => Ok(()),
            }
        });
        if let Err(e) = result {
            tracing::warn!(namespace = %namespace, error = %e, "Failed to persist active network");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeaturesConfig, LoggingConfig, MetadataConfig, StorageConfig};
    use crate::domain::presets;
    use crate::service::test_support::StubAdapter;

    fn config() -> Config {
        Config {
            project_id: "test-project".to_string(),
            metadata: MetadataConfig::default(),
            networks: vec![
                "eip155:1".to_string(),
                "eip155:137".to_string(),
                "solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp".to_string(),
            ],
            default_network: Some("eip155:137".to_string()),
            features: FeaturesConfig {
                enable_network_switch: true,
                allow_unsupported_chain: false,
                email: true,
                socials: true,
            },
            siwx: SiwxConfig {
                enabled: false,
                ..SiwxConfig::default()
            },
            storage: StorageConfig {
                backend: "memory".to_string(),
                path: None,
            },
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_missing_project_id_is_fatal() {
        let mut config = config();
        config.project_id = String::new();
        assert!(matches!(
            AppKit::new(config),
            Err(AppKitError::MissingProjectId)
        ));
    }

    #[test]
    fn test_fallback_connector_kind() {
        let wc = fallback_connector("walletConnect", ChainNamespace::Eip155);
        assert_eq!(wc.kind, ConnectorKind::WalletConnect);
        let auth = fallback_connector("ID_AUTH", ChainNamespace::Solana);
        assert_eq!(auth.kind, ConnectorKind::Auth);
        let other = fallback_connector("io.rabby", ChainNamespace::Eip155);
        assert_eq!(other.kind, ConnectorKind::External);
    }

    #[tokio::test]
    async fn test_register_uses_configured_networks_and_default() {
        let appkit = AppKit::new(config()).unwrap();
        appkit
            .register_adapter(StubAdapter::new(ChainNamespace::Solana))
            .await
            .unwrap();
        appkit
            .register_adapter(StubAdapter::new(ChainNamespace::Eip155))
            .await
            .unwrap();

        // 默认网络决定活跃命名空间
        assert_eq!(appkit.active_namespace().await, Some(ChainNamespace::Eip155));
        assert_eq!(
            appkit.active_caip_network().await.map(|n| n.caip_network_id),
            Some(presets::polygon().caip_network_id)
        );
        assert_eq!(
            appkit
                .controller()
                .read()
                .await
                .requested_caip_networks(ChainNamespace::Eip155)
                .len(),
            2
        );
        assert_eq!(
            appkit.connection_state(ChainNamespace::Solana).await,
            Some(ConnectionState::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_unknown_connector_is_rejected() {
        let appkit = AppKit::new(config()).unwrap();
        appkit
            .register_adapter(StubAdapter::new(ChainNamespace::Eip155))
            .await
            .unwrap();

        let err = appkit
            .connect(ChainNamespace::Eip155, "io.unknown")
            .await
            .unwrap_err();
        assert!(matches!(err, AppKitError::ConnectorNotFound(_)));
        assert_eq!(
            appkit.connection_state(ChainNamespace::Eip155).await,
            Some(ConnectionState::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_network_switch_disabled_by_config() {
        let mut config = config();
        config.features.enable_network_switch = false;
        let appkit = AppKit::new(config).unwrap();

        let err = appkit
            .switch_network(presets::mainnet(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppKitError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_confirm_without_pending_switch() {
        let appkit = AppKit::new(config()).unwrap();
        assert!(matches!(
            appkit.confirm_pending_switch().await,
            Err(AppKitError::NoPendingSwitch)
        ));
        assert!(matches!(
            appkit.reject_pending_switch().await,
            Err(AppKitError::NoPendingSwitch)
        ));
    }
}
