//! 测试辅助模块
//! 提供可编排的适配器和测试配置

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use appkit_core::config::{
    Config, FeaturesConfig, LoggingConfig, MetadataConfig, SiwxConfig, StorageConfig,
};
use appkit_core::domain::{CaipNetwork, CaipNetworkId, ChainNamespace, Connector, DEFAULT_NETWORKS};
use appkit_core::error::AdapterError;
use appkit_core::infrastructure::{PersistedState, ProviderEvent, ProviderEventSender};
use appkit_core::service::adapter::*;
use appkit_core::service::siwx::verifier::eip191_hash;
use appkit_core::AppKit;
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use sha3::{Digest, Keccak256};

pub const SOLANA_ADDRESS: &str = "7S3P4HxJpyyigGzodYwHtCxZyUQe9JiBMHyRWXArAaKv";
pub const BITCOIN_ADDRESS: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
pub const POLKADOT_ADDRESS: &str = "15oF4uVJwmo4TdGW7VfQxNLavjCXviqxT9S1MgbjMNHr6Sp5";

pub fn evm_key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).expect("valid test key")
}

pub fn evm_address(key: &SigningKey) -> String {
    let public_key = key.verifying_key().to_encoded_point(false);
    let hash = Keccak256::digest(&public_key.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// personal_sign 格式（r || s || v）
pub fn evm_sign(key: &SigningKey, message: &str) -> String {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&eip191_hash(message))
        .expect("signing succeeds");
    let mut bytes = signature.to_bytes().to_vec();
    bytes.push(recovery_id.to_byte() + 27);
    format!("0x{}", hex::encode(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignBehavior {
    Valid,
    /// 用另一把私钥签名
    WrongKey,
    Reject,
    /// 永不返回（弹窗被遗弃）
    Hang,
}

pub struct MockAdapter {
    namespace: ChainNamespace,
    key: SigningKey,
    address: Mutex<String>,
    forced_chain: Mutex<Option<CaipNetworkId>>,
    connect_error: Mutex<Option<AdapterError>>,
    disconnect_error: Mutex<Option<AdapterError>>,
    sync_error: Mutex<Option<AdapterError>>,
    switch_error: Mutex<Option<AdapterError>>,
    switch_hangs: AtomicBool,
    sign: Mutex<SignBehavior>,
    sender: Mutex<Option<ProviderEventSender>>,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub sync_calls: AtomicUsize,
    pub sign_calls: AtomicUsize,
    pub switched_to: Mutex<Vec<CaipNetworkId>>,
}

impl MockAdapter {
    pub fn new(namespace: ChainNamespace) -> Arc<Self> {
        let key = evm_key(7);
        let address = match namespace {
            ChainNamespace::Eip155 => evm_address(&key),
            ChainNamespace::Solana => SOLANA_ADDRESS.to_string(),
            ChainNamespace::Bip122 => BITCOIN_ADDRESS.to_string(),
            ChainNamespace::Polkadot => POLKADOT_ADDRESS.to_string(),
            other => format!("{}-address", other),
        };

        Arc::new(Self {
            namespace,
            key,
            address: Mutex::new(address),
            forced_chain: Mutex::new(None),
            connect_error: Mutex::new(None),
            disconnect_error: Mutex::new(None),
            sync_error: Mutex::new(None),
            switch_error: Mutex::new(None),
            switch_hangs: AtomicBool::new(false),
            sign: Mutex::new(SignBehavior::Valid),
            sender: Mutex::new(None),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            sync_calls: AtomicUsize::new(0),
            sign_calls: AtomicUsize::new(0),
            switched_to: Mutex::new(Vec::new()),
        })
    }

    pub fn address(&self) -> String {
        self.address.lock().unwrap().clone()
    }

    pub fn set_address(&self, address: &str) {
        *self.address.lock().unwrap() = address.to_string();
    }

    /// 钱包返回固定网络（忽略请求的网络）
    pub fn force_chain(&self, chain_id: &str) {
        *self.forced_chain.lock().unwrap() = Some(chain_id.parse().unwrap());
    }

    pub fn fail_connect(&self, error: AdapterError) {
        *self.connect_error.lock().unwrap() = Some(error);
    }

    pub fn fail_disconnect(&self, error: AdapterError) {
        *self.disconnect_error.lock().unwrap() = Some(error);
    }

    pub fn fail_sync(&self, error: AdapterError) {
        *self.sync_error.lock().unwrap() = Some(error);
    }

    pub fn fail_switch(&self, error: AdapterError) {
        *self.switch_error.lock().unwrap() = Some(error);
    }

    /// 切换网络请求永不返回（钱包弹窗无人处理）
    pub fn hang_switch(&self) {
        self.switch_hangs.store(true, Ordering::SeqCst);
    }

    pub fn set_sign(&self, behavior: SignBehavior) {
        *self.sign.lock().unwrap() = behavior;
    }

    /// 模拟钱包侧事件；未绑定时返回 false
    pub fn emit(&self, event: ProviderEvent) -> bool {
        match self.sender.lock().unwrap().as_ref() {
            Some(sender) => {
                sender.emit(event);
                true
            }
            None => false,
        }
    }

    fn default_chain(&self) -> CaipNetworkId {
        DEFAULT_NETWORKS
            .iter()
            .find(|n| n.chain_namespace == self.namespace)
            .map(|n| n.caip_network_id.clone())
            .expect("preset network for namespace")
    }

    fn resolve_chain(&self, requested: Option<CaipNetworkId>) -> CaipNetworkId {
        self.forced_chain
            .lock()
            .unwrap()
            .clone()
            .or(requested)
            .unwrap_or_else(|| self.default_chain())
    }
}

#[async_trait]
impl ChainAdapter for MockAdapter {
    fn namespace(&self) -> ChainNamespace {
        self.namespace
    }

    async fn connect(&self, params: ConnectParams) -> AdapterResult<ConnectResult> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.connect_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(ConnectResult {
            address: self.address(),
            chain_id: self.resolve_chain(params.chain_id),
        })
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        match self.disconnect_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn get_accounts(&self) -> AdapterResult<Vec<AccountAddress>> {
        Ok(vec![AccountAddress::eoa(&self.address())])
    }

    async fn sync_connection(
        &self,
        params: SyncConnectionParams,
    ) -> AdapterResult<ConnectionResult> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.sync_error.lock().unwrap().clone() {
            return Err(error);
        }
        let address = self.address();
        Ok(ConnectionResult {
            accounts: vec![AccountAddress::eoa(&address)],
            address,
            chain_id: self.resolve_chain(params.chain_id),
        })
    }

    async fn switch_network(&self, network: &CaipNetwork) -> AdapterResult<()> {
        if self.switch_hangs.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        if let Some(error) = self.switch_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.switched_to
            .lock()
            .unwrap()
            .push(network.caip_network_id.clone());
        Ok(())
    }

    async fn sign_message(&self, message: &str, _address: &str) -> AdapterResult<String> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.sign.lock().unwrap();
        match behavior {
            SignBehavior::Valid => Ok(evm_sign(&self.key, message)),
            SignBehavior::WrongKey => Ok(evm_sign(&evm_key(42), message)),
            SignBehavior::Reject => Err(AdapterError::UserRejected("user closed the popup".into())),
            SignBehavior::Hang => std::future::pending().await,
        }
    }

    fn bind_events(&self, sender: ProviderEventSender) {
        *self.sender.lock().unwrap() = Some(sender);
    }
}

pub fn test_config() -> Config {
    Config {
        project_id: "integration-project".to_string(),
        metadata: MetadataConfig::default(),
        networks: vec![
            "eip155:1".to_string(),
            "eip155:137".to_string(),
            "solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp".to_string(),
            "bip122:000000000019d6689c085ae165831e93".to_string(),
            "polkadot:91b171bb158e2d3848fa23a9f1c25182".to_string(),
        ],
        default_network: None,
        features: FeaturesConfig {
            enable_network_switch: true,
            allow_unsupported_chain: false,
            email: true,
            socials: true,
        },
        siwx: SiwxConfig {
            enabled: false,
            required: false,
            sign_out_on_disconnect: true,
            domain: "app.example.com".to_string(),
            uri: "https://app.example.com".to_string(),
            statement: Some("Sign in to Example".to_string()),
            expiration_secs: 3600,
            social_login_timeout_secs: 45,
        },
        storage: StorageConfig {
            backend: "memory".to_string(),
            path: None,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "text".to_string(),
            with_target: false,
            ansi: false,
        },
    }
}

pub fn siwx_config() -> Config {
    let mut config = test_config();
    config.siwx.enabled = true;
    config
}

pub fn connectors() -> Vec<Connector> {
    vec![
        Connector::wallet_connect(vec![
            ChainNamespace::Eip155,
            ChainNamespace::Solana,
            ChainNamespace::Bip122,
            ChainNamespace::Polkadot,
        ]),
        Connector::auth(),
        Connector::injected("io.metamask", "MetaMask", ChainNamespace::Eip155),
        Connector::injected("app.phantom", "Phantom", ChainNamespace::Solana),
        Connector::injected("xverse", "Xverse", ChainNamespace::Bip122),
        Connector::injected("io.talisman", "Talisman", ChainNamespace::Polkadot),
    ]
}

pub struct Harness {
    pub appkit: AppKit,
    pub adapters: HashMap<ChainNamespace, Arc<MockAdapter>>,
}

impl Harness {
    pub fn adapter(&self, namespace: ChainNamespace) -> &Arc<MockAdapter> {
        &self.adapters[&namespace]
    }
}

/// 按顺序注册命名空间并添加全部连接器
pub async fn harness(config: Config, namespaces: &[ChainNamespace]) -> Harness {
    harness_with_storage(config, PersistedState::in_memory(), namespaces).await
}

pub async fn harness_with_storage(
    config: Config,
    storage: PersistedState,
    namespaces: &[ChainNamespace],
) -> Harness {
    let appkit = AppKit::with_storage(config, storage).expect("valid config");
    let mut adapters = HashMap::new();
    for namespace in namespaces {
        let adapter = MockAdapter::new(*namespace);
        appkit
            .register_adapter(adapter.clone())
            .await
            .expect("register adapter");
        adapters.insert(*namespace, adapter);
    }
    for connector in connectors() {
        appkit.add_connector(connector).await;
    }
    Harness { appkit, adapters }
}
